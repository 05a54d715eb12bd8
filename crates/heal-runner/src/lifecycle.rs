use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Cloneable view of the stop flag handed to each background task.
#[derive(Clone, Debug)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop has been requested, or the lifecycle is gone.
    pub async fn stopped(&mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

/// Owns every background task: a shared stop flag plus the join handles.
pub struct Lifecycle {
    tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx, tasks: Vec::new() }
    }

    pub fn signal(&self) -> StopSignal {
        StopSignal { rx: self.tx.subscribe() }
    }

    /// Spawns `task` on the current runtime and tracks it for shutdown.
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "spawning background task");
        self.tasks.push((name, tokio::spawn(task)));
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(n, _)| *n).collect()
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Signals stop and waits for every task to finish its current unit of work.
    pub async fn shutdown(self) {
        self.stop();
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                warn!(task = name, "background task ended abnormally: {e:?}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_waits_for_tasks_to_observe_stop() {
        let mut lc = Lifecycle::new();
        let finished = Arc::new(AtomicBool::new(false));
        let mut stop = lc.signal();
        let flag = finished.clone();
        lc.spawn("sleeper", async move {
            stop.stopped().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(lc.task_names(), vec!["sleeper"]);

        lc.shutdown().await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn signal_taken_after_stop_is_already_stopped() {
        let lc = Lifecycle::new();
        lc.stop();
        let mut s = lc.signal();
        assert!(s.is_stopped());
        s.stopped().await;
    }
}
