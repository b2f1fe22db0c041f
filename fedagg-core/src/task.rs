use std::collections::VecDeque;
use std::future::Future;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use fedagg_logging::LOG_TASK;
use futures::future::{self, Either};
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

pub use tokio::time::sleep;

#[derive(Debug)]
struct TaskGroupInner {
    on_shutdown_tx: watch::Sender<bool>,
    // cloned into every shutdown token
    on_shutdown_rx: watch::Receiver<bool>,
    // only held for push/pop, never across an await
    join: std::sync::Mutex<VecDeque<(String, JoinHandle<()>)>>,
}

impl Default for TaskGroupInner {
    fn default() -> Self {
        let (on_shutdown_tx, on_shutdown_rx) = watch::channel(false);
        Self {
            on_shutdown_tx,
            on_shutdown_rx,
            join: std::sync::Mutex::new(VecDeque::new()),
        }
    }
}

impl TaskGroupInner {
    fn shutdown(&self) {
        self.on_shutdown_tx.send_replace(true);
    }
}

/// A group of tasks working together
///
/// The daemon spawns its webservers into one group, so a failure of any of
/// them (or a signal) shuts all of them down, and the main task can wait for
/// them to finish.
#[derive(Clone, Default, Debug)]
pub struct TaskGroup {
    inner: Arc<TaskGroupInner>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_handle(&self) -> TaskHandle {
        TaskHandle {
            inner: self.inner.clone(),
        }
    }

    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub async fn shutdown_join_all(
        self,
        join_timeout: impl Into<Option<Duration>>,
    ) -> Result<(), anyhow::Error> {
        self.shutdown();
        self.join_all(join_timeout.into()).await
    }

    pub fn install_kill_handler(&self) {
        use tokio::signal;

        async fn wait_for_shutdown_signal() {
            let ctrl_c = async {
                if let Err(err) = signal::ctrl_c().await {
                    warn!(target: LOG_TASK, %err, "Failed to install Ctrl+C handler");
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut stream) => {
                        stream.recv().await;
                    }
                    Err(err) => {
                        warn!(target: LOG_TASK, %err, "Failed to install SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                () = ctrl_c => {},
                () = terminate => {},
            }
        }

        tokio::spawn({
            let task_group = self.clone();
            async move {
                wait_for_shutdown_signal().await;
                info!(
                    target: LOG_TASK,
                    "signal received, starting graceful shutdown"
                );
                task_group.shutdown();
            }
        });
    }

    pub fn spawn<Fut, R>(
        &self,
        name: impl Into<String>,
        f: impl FnOnce(TaskHandle) -> Fut + Send + 'static,
    ) -> oneshot::Receiver<R>
    where
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let name = name.into();
        let span = info_span!(parent: Span::current(), "task", name);
        let mut guard = TaskPanicGuard {
            name: name.clone(),
            inner: self.inner.clone(),
            completed: false,
        };
        let handle = self.make_handle();

        let (tx, rx) = oneshot::channel();
        let join_handle = tokio::spawn({
            let name = name.clone();
            async move {
                debug!(target: LOG_TASK, "Starting task {name}");
                let r = f(handle).await;
                debug!(target: LOG_TASK, "Finished task {name}");
                // the caller may have dropped the receiver
                let _ = tx.send(r);
            }
            .instrument(span)
        });
        self.inner
            .join
            .lock()
            .expect("lock poison")
            .push_back((name, join_handle));
        guard.completed = true;

        rx
    }

    /// Like [`TaskGroup::spawn`], but the future is dropped as soon as the
    /// group shuts down
    pub fn spawn_cancellable<R>(
        &self,
        name: impl Into<String>,
        future: impl Future<Output = R> + Send + 'static,
    ) -> oneshot::Receiver<Result<R, ShuttingDownError>>
    where
        R: Send + 'static,
    {
        self.spawn(name, move |handle| async move {
            let value = handle.cancel_on_shutdown(future).await;
            if value.is_err() {
                // the task name comes from the enclosing span
                debug!(target: LOG_TASK, "task cancelled on shutdown");
            }
            value
        })
    }

    pub async fn join_all(self, timeout: Option<Duration>) -> Result<(), anyhow::Error> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut errors: Vec<JoinError> = vec![];

        // pop under the lock, await without it
        while let Some((name, join)) = {
            let mut lock = self.inner.join.lock().expect("lock poison");
            lock.pop_front()
        } {
            debug!(target: LOG_TASK, task=%name, "Waiting for task to finish");

            let join_result = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, join).await,
                None => Ok(join.await),
            };

            match join_result {
                Ok(Ok(())) => {
                    debug!(target: LOG_TASK, task=%name, "Task finished");
                }
                Ok(Err(e)) => {
                    error!(target: LOG_TASK, task=%name, error=%e, "Task panicked");
                    errors.push(e);
                }
                Err(_) => {
                    warn!(
                        target: LOG_TASK, task=%name,
                        "Timeout waiting for task to shut down"
                    );
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            let num_errors = errors.len();
            bail!("{num_errors} tasks did not finish cleanly: {errors:?}")
        }
    }
}

struct TaskPanicGuard {
    name: String,
    inner: Arc<TaskGroupInner>,
    /// Set once the task is registered, dropping the guard before that
    /// shuts the group down
    completed: bool,
}

impl Drop for TaskPanicGuard {
    fn drop(&mut self) {
        if !self.completed {
            info!(
                target: LOG_TASK,
                "Task {} shut down uncleanly. Shutting down task group.", self.name
            );
            self.inner.shutdown();
        }
    }
}

#[derive(Clone, Debug)]
pub struct TaskHandle {
    inner: Arc<TaskGroupInner>,
}

#[derive(thiserror::Error, Debug, Clone)]
#[error("Task group is shutting down")]
#[non_exhaustive]
pub struct ShuttingDownError {}

impl TaskHandle {
    /// Resolves once the group starts shutting down
    pub fn make_shutdown_rx(&self) -> TaskShutdownToken {
        TaskShutdownToken::new(self.inner.on_shutdown_rx.clone())
    }

    /// Drives `fut` until it finishes or the [`TaskGroup`] shuts down
    pub async fn cancel_on_shutdown<F: Future>(
        &self,
        fut: F,
    ) -> Result<F::Output, ShuttingDownError> {
        let rx = TaskShutdownToken::new(self.inner.on_shutdown_rx.clone());
        match future::select(pin!(rx), pin!(fut)).await {
            Either::Left(((), _)) => Err(ShuttingDownError {}),
            Either::Right((value, _)) => Ok(value),
        }
    }
}

pub struct TaskShutdownToken(Pin<Box<dyn Future<Output = ()> + Send>>);

impl TaskShutdownToken {
    fn new(mut rx: watch::Receiver<bool>) -> Self {
        Self(Box::pin(async move {
            let _ = rx.wait_for(|v| *v).await;
        }))
    }
}

impl Future for TaskShutdownToken {
    type Output = ();

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        self.0.as_mut().poll(cx)
    }
}
