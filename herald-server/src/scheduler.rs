use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Named periodic tasks driving the broker's background maintenance.
///
/// Each task runs its callback every `period` after an `initial_delay`,
/// until stopped. Registering a name that is already running replaces the
/// old task. Must be used from within a tokio runtime.
#[derive(Default)]
pub struct Scheduler {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_task<F>(&self, name: &str, f: F, initial_delay: Duration, period: Duration)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                f();
            }
        });

        let mut tasks = self.tasks.lock();
        if let Some(old) = tasks.insert(name.to_string(), handle) {
            old.abort();
        }
        debug!(
            "Scheduled task '{}' every {:?} after {:?}",
            name, period, initial_delay
        );
    }

    /// Stop a task by name; returns whether it was running
    pub fn stop_task(&self, name: &str) -> bool {
        match self.tasks.lock().remove(name) {
            Some(handle) => {
                handle.abort();
                debug!("Stopped task '{}'", name);
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let mut tasks = self.tasks.lock();
        for (name, handle) in tasks.drain() {
            handle.abort();
            debug!("Stopped task '{}'", name);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for handle in self.tasks.lock().values() {
            handle.abort();
        }
    }
}
