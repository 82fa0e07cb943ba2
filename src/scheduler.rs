use std::sync::{Mutex, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Context handed to a background task for one run.
pub struct Context {
    pub run_id: u64,
    pub shutdown: broadcast::Receiver<()>,
}

/// A task the scheduler runs on a fixed cadence.
#[async_trait::async_trait]
pub trait BackgroundTask: Send + Sync {
    /// Task name for logging.
    fn name(&self) -> &'static str;

    /// How often to run this task.
    fn interval(&self) -> Duration;

    /// Execute one run. Long-running tasks should poll `ctx.shutdown`
    /// between units of work.
    async fn execute(&self, ctx: Context) -> crate::error::Result<()>;
}

/// Owns the engine's background tasks and shuts them down as a group.
pub struct Scheduler {
    tasks: RwLock<Vec<JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<broadcast::Sender<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tasks: RwLock::new(Vec::new()),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        }
    }

    /// A fresh receiver on the shutdown channel, for tasks spawned outside
    /// `register`.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<()>> {
        self.shutdown_tx
            .lock()
            .unwrap()
            .as_ref()
            .map(|tx| tx.subscribe())
    }

    /// Registers a periodic background task. No-op once shut down.
    pub fn register<T: BackgroundTask + 'static>(&self, task: std::sync::Arc<T>) {
        let Some(tx) = self.shutdown_tx.lock().unwrap().clone() else {
            return;
        };
        let handle = Self::spawn_timer_loop(task, tx);
        self.tasks.write().unwrap().push(handle);
    }

    /// Tracks an already-spawned task so shutdown can abort it.
    pub fn track(&self, handle: JoinHandle<()>) {
        self.tasks.write().unwrap().push(handle);
    }

    fn spawn_timer_loop<T: BackgroundTask + 'static>(
        task: std::sync::Arc<T>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> JoinHandle<()> {
        let interval = task.interval();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let mut run_id = 0u64;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so the task keeps
            // its configured cadence from startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_id += 1;
                        let ctx = Context {
                            run_id,
                            shutdown: shutdown_rx.resubscribe(),
                        };
                        if let Err(e) = task.execute(ctx).await {
                            tracing::error!(task = task.name(), error = %e, "task execution failed");
                        }
                    }

                    _ = shutdown_rx.recv() => {
                        tracing::info!(task = task.name(), "task shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Signals all tasks to stop and aborts any that have not exited.
    /// Callable from synchronous code; idempotent.
    pub fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        for task in self.tasks.write().unwrap().drain(..) {
            task.abort();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct TestTask {
        interval: Duration,
        counter: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl BackgroundTask for TestTask {
        fn name(&self) -> &'static str {
            "test-task"
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        async fn execute(&self, _ctx: Context) -> crate::error::Result<()> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_periodic_execution() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.register(Arc::new(TestTask {
            interval: Duration::from_millis(10),
            counter: counter.clone(),
        }));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(counter.load(Ordering::SeqCst) > 0);
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_stops_tasks() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.register(Arc::new(TestTask {
            interval: Duration::from_millis(10),
            counter: counter.clone(),
        }));

        tokio::time::sleep(Duration::from_millis(40)).await;
        scheduler.shutdown();
        let after = counter.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(after, counter.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_register_after_shutdown_is_noop() {
        let scheduler = Scheduler::new();
        scheduler.shutdown();

        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.register(Arc::new(TestTask {
            interval: Duration::from_millis(5),
            counter: counter.clone(),
        }));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
