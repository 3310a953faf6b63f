//! Process runtime for the `rake` binary: a multi-threaded Tokio runtime
//! paired with one root [`CancellationToken`] that every run observes.
use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct RakeHandle {
    inner: Handle,
    cancel: CancellationToken,
}

pub struct RakeRuntime {
    runtime: Runtime,
    cancel: CancellationToken,
}

impl RakeRuntime {
    /// ```
    /// use rake_runtime::RakeRuntime;
    /// use std::time::Duration;
    ///
    /// let runtime = RakeRuntime::build("doctest-runtime", Some(1)).expect("runtime builds");
    /// assert_eq!(runtime.block_on(async { 2 + 2 }), 4);
    /// runtime.shutdown(Duration::from_millis(10));
    /// ```
    pub fn build(thread_name: &str, worker_threads: Option<usize>) -> Result<Self> {
        let mut builder = Builder::new_multi_thread();
        builder.enable_all().thread_name(thread_name);

        if let Some(workers) = worker_threads {
            builder.worker_threads(workers.max(1));
        }

        let runtime = builder.build()?;
        Ok(Self {
            runtime,
            cancel: CancellationToken::new(),
        })
    }

    pub fn handle(&self) -> RakeHandle {
        RakeHandle {
            inner: self.runtime.handle().clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Cancel outstanding work and give tasks `graceful` to wind down.
    pub fn shutdown(self, graceful: Duration) {
        self.cancel.cancel();
        self.runtime.shutdown_timeout(graceful);
    }
}

impl RakeHandle {
    pub fn spawn<F, T>(&self, fut: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.spawn(fut)
    }

    /// Root token; cancelling it stops every run that observes it.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the root token on the first Ctrl-C.
    ///
    /// ```
    /// use rake_runtime::RakeRuntime;
    /// use std::time::Duration;
    ///
    /// let runtime = RakeRuntime::build("ctrl-c-example", Some(1)).unwrap();
    /// let handle = runtime.handle();
    /// let watcher = handle.cancel_on_ctrl_c();
    /// assert!(!handle.cancellation().is_cancelled());
    /// watcher.abort();
    /// runtime.shutdown(Duration::from_millis(5));
    /// ```
    pub fn cancel_on_ctrl_c(&self) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        self.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                res = tokio::signal::ctrl_c() => match res {
                    Ok(()) => {
                        tracing::warn!("interrupt received, cancelling runs");
                        cancel.cancel();
                    }
                    Err(err) => tracing::error!(error = %err, "cannot listen for ctrl-c"),
                },
            }
        })
    }
}
