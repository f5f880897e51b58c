use std::{collections::HashMap, fmt::Debug, future::Future, panic, sync::Arc};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    client::ControlPlane,
    config::{Backoff, Config},
    reconciler::{Outcome, Reconciler},
    subscriber::QualifiedName,
};

/// Dispatches a reconciliation for every identity yielded by `config`.
///
/// Each identity has at most one task in flight; a new trigger cancels it and starts over.
/// Returns once the subscription ends and every task has settled,
/// or once `shutdown` is cancelled, in which case in-flight tasks are cancelled too.
pub async fn run<ConfigT: Config, C: ControlPlane>(
    config: ConfigT,
    reconciler: Reconciler<C>,
    shutdown: CancellationToken,
) {
    let mut dispatcher = Dispatcher {
        reconciler: Arc::new(reconciler),
        backoff: config.backoff(),
        shutdown: shutdown.clone(),
        tasks: Arc::default(),
        next_task: 0,
    };

    let mut sub = config.subscribe();
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = sub.next() => event,
        };
        match event {
            Some(Ok(key)) => dispatcher.trigger(key),
            Some(Err(err)) => log::warn!("Watch failed, retrying: {err}"),
            None => break,
        }
    }

    dispatcher.drain().await;
}

type Tasks = Arc<Mutex<HashMap<QualifiedName, Handle>>>;

struct Dispatcher<C> {
    reconciler: Arc<Reconciler<C>>,
    backoff: Backoff,
    shutdown: CancellationToken,
    tasks: Tasks,
    next_task: u64,
}

struct Handle {
    id: u64,
    join_handle: JoinHandle<()>,
    token: CancellationToken,
}

impl Handle {
    async fn cancel(self) {
        self.token.cancel();
        self.join().await;
    }

    async fn join(self) {
        if let Err(err) = self.join_handle.await {
            if let Ok(panic) = err.try_into_panic() {
                panic::resume_unwind(panic)
            }
        }
    }
}

impl<C: ControlPlane> Dispatcher<C> {
    fn trigger(&mut self, key: QualifiedName) {
        let id = self.next_task;
        self.next_task += 1;
        let token = self.shutdown.child_token();

        // held until the new handle is stored, so a fast task cannot clean up before it exists
        let mut tasks = self.tasks.lock();
        let prev = tasks.remove(&key);

        let join_handle = tokio::spawn({
            let reconciler = Arc::clone(&self.reconciler);
            let tasks = Arc::clone(&self.tasks);
            let backoff = self.backoff;
            let token = token.clone();
            let key = key.clone();

            async move {
                if let Some(prev) = prev {
                    prev.cancel().await;
                }

                if !token.is_cancelled() {
                    let (reconciler, target) = (&*reconciler, &key);
                    reconcile_until_settled(
                        move || reconciler.reconcile(target),
                        &key,
                        backoff,
                        &token,
                    )
                    .await;
                }

                let mut tasks = tasks.lock();
                if tasks.get(&key).is_some_and(|handle| handle.id == id) {
                    tasks.remove(&key);
                }
            }
        });

        tasks.insert(
            key,
            Handle {
                id,
                join_handle,
                token,
            },
        );
    }

    async fn drain(self) {
        let handles: Vec<_> = self.tasks.lock().drain().map(|(_, handle)| handle).collect();
        let cancel = self.shutdown.is_cancelled();
        for handle in handles {
            if cancel {
                handle.cancel().await;
            } else {
                handle.join().await;
            }
        }
    }
}

/// Runs `reconcile` until it succeeds without asking for a requeue, or until `token` is cancelled.
///
/// Errors back off exponentially; a requeue waits `backoff.base` and resets the backoff.
async fn reconcile_until_settled<F, Fut, E>(
    mut reconcile: F,
    key: &QualifiedName,
    backoff: Backoff,
    token: &CancellationToken,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Outcome, E>>,
    E: Debug,
{
    let mut attempt = 0;
    loop {
        let result = tokio::select! {
            () = token.cancelled() => return,
            result = reconcile() => result,
        };

        let delay = match result {
            Ok(outcome) if !outcome.requeue => return,
            Ok(_) => {
                attempt = 0;
                log::debug!("Requeueing {key} in {:?}", backoff.base);
                backoff.base
            }
            Err(err) => {
                let delay = backoff.delay(attempt);
                attempt = attempt.saturating_add(1);
                log::warn!("Reconciling {key} failed, retrying in {delay:?}: {err:?}");
                delay
            }
        };

        tokio::select! {
            () = token.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, convert::Infallible, future, time::Duration};

    use futures::{
        channel::mpsc,
        stream::{self, BoxStream},
    };

    use super::*;
    use crate::tests::{sorted, Call, FakeControlPlane};

    struct Keys {
        rx: Mutex<Option<mpsc::UnboundedReceiver<QualifiedName>>>,
        backoff: Backoff,
    }

    fn keys(backoff: Backoff) -> (mpsc::UnboundedSender<QualifiedName>, Keys) {
        let (tx, rx) = mpsc::unbounded();
        let keys = Keys {
            rx: Mutex::new(Some(rx)),
            backoff,
        };
        (tx, keys)
    }

    impl Config for Keys {
        type SubscribeErr = Infallible;

        fn subscribe(&self) -> BoxStream<'static, Result<QualifiedName, Infallible>> {
            match self.rx.lock().take() {
                Some(rx) => rx.map(Ok).boxed(),
                None => stream::empty().boxed(),
            }
        }

        fn backoff(&self) -> Backoff {
            self.backoff
        }
    }

    fn seconds(base: u64, max: u64) -> Backoff {
        Backoff {
            base: Duration::from_secs(base),
            max: Duration::from_secs(max),
        }
    }

    fn cluster() -> FakeControlPlane {
        FakeControlPlane::default()
            .with_config_object("default", "settings")
            .with_monitor("default", "m", "x")
            .with_pod("default", "x-1", "x")
            .with_pod("default", "x-2", "x")
    }

    fn list_monitor_calls(fake: &FakeControlPlane) -> usize {
        fake.calls()
            .iter()
            .filter(|call| matches!(call, Call::ListMonitors(_)))
            .count()
    }

    #[tokio::test]
    async fn reconciles_each_trigger_then_returns() {
        let fake = cluster();
        let (tx, config) = keys(Backoff::default());
        tx.unbounded_send(QualifiedName::new("default", "settings"))
            .unwrap();
        drop(tx);

        run(config, Reconciler::new(fake.clone()), CancellationToken::new()).await;

        assert_eq!(fake.pod_names(), Vec::<String>::new());
        assert_eq!(fake.terminations().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reconciliations_are_retried_with_backoff() {
        let fake = cluster().fail_monitor_lists(2);
        let (tx, config) = keys(seconds(1, 60));
        tx.unbounded_send(QualifiedName::new("default", "settings"))
            .unwrap();
        drop(tx);

        let started = tokio::time::Instant::now();
        run(config, Reconciler::new(fake.clone()), CancellationToken::new()).await;

        assert_eq!(list_monitor_calls(&fake), 3);
        assert!(fake.pod_names().is_empty());
        // 1s after the first failure, 2s after the second
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_retries() {
        let fake = cluster().fail_monitor_lists(usize::MAX);
        let (tx, config) = keys(seconds(1, 1));
        tx.unbounded_send(QualifiedName::new("default", "settings"))
            .unwrap();

        let shutdown = CancellationToken::new();
        let stop = {
            let shutdown = shutdown.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(4500)).await;
                shutdown.cancel();
            }
        };
        tokio::join!(run(config, Reconciler::new(fake.clone()), shutdown), stop);

        // attempts at 0s, 1s, 2s, 3s and 4s
        assert_eq!(list_monitor_calls(&fake), 5);
        assert_eq!(fake.pod_names(), ["x-1", "x-2"]);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn new_trigger_supersedes_a_retrying_task() {
        let fake = cluster().fail_monitor_lists(1);
        let (tx, config) = keys(seconds(60, 60));
        let key = QualifiedName::new("default", "settings");
        tx.unbounded_send(key.clone()).unwrap();

        let trigger_again = {
            let fake = fake.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                // the first task is now waiting out its 60s backoff
                assert_eq!(list_monitor_calls(&fake), 1);
                tx.unbounded_send(key).unwrap();
            }
        };

        let started = tokio::time::Instant::now();
        tokio::join!(
            run(config, Reconciler::new(fake.clone()), CancellationToken::new()),
            trigger_again
        );

        assert_eq!(list_monitor_calls(&fake), 2);
        assert!(fake.pod_names().is_empty());
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn identities_are_reconciled_independently() {
        let fake = cluster()
            .with_config_object("default", "other")
            .with_pod("default", "x-3", "x");
        let (tx, config) = keys(Backoff::default());
        tx.unbounded_send(QualifiedName::new("default", "settings"))
            .unwrap();
        tx.unbounded_send(QualifiedName::new("default", "other"))
            .unwrap();
        tx.unbounded_send(QualifiedName::new("elsewhere", "settings"))
            .unwrap();
        drop(tx);

        run(config, Reconciler::new(fake.clone()), CancellationToken::new()).await;

        assert!(fake.pod_names().is_empty());
        assert_eq!(list_monitor_calls(&fake), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn requeued_outcome_runs_again_after_the_base_delay() {
        let mut calls = 0;
        let started = tokio::time::Instant::now();
        reconcile_until_settled(
            || {
                calls += 1;
                future::ready(Ok::<_, Infallible>(Outcome {
                    requeue: calls == 1,
                }))
            },
            &QualifiedName::new("default", "settings"),
            seconds(2, 60),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(calls, 2);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn requeue_resets_the_error_backoff() {
        let mut results: VecDeque<Result<Outcome, &str>> = VecDeque::from([
            Err("first"),
            Err("second"),
            Ok(Outcome { requeue: true }),
            Err("third"),
            Ok(Outcome::done()),
        ]);
        let started = tokio::time::Instant::now();
        reconcile_until_settled(
            || future::ready(results.pop_front().unwrap_or(Ok(Outcome::done()))),
            &QualifiedName::new("default", "settings"),
            seconds(1, 60),
            &CancellationToken::new(),
        )
        .await;

        assert!(results.is_empty());
        // 1s and 2s after the errors, 1s for the requeue, then 1s again
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_selector_does_not_keep_the_pass_retrying() {
        let fake = cluster().with_monitor("default", "bad", "a=b");
        let (tx, config) = keys(seconds(1, 60));
        tx.unbounded_send(QualifiedName::new("default", "settings"))
            .unwrap();
        drop(tx);

        let started = tokio::time::Instant::now();
        run(config, Reconciler::new(fake.clone()), CancellationToken::new()).await;

        assert_eq!(list_monitor_calls(&fake), 1);
        assert_eq!(sorted(fake.terminations()), ["x-1", "x-2"]);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
