use std::{future::Future, time::Duration};

use tokio::task::JoinHandle;

/// Cancellable one-shot timer for the post-verdict quiet period. At most one
/// timer is armed at a time: arming again cancels the previous one, so a fire
/// can never overlap a newer arm. `on_fire` runs at most once.
#[derive(Default)]
pub struct DelayedTransition {
    task: Option<JoinHandle<()>>,
}

impl DelayedTransition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm<F, Fut>(&mut self, delay: Duration, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        self.cancel();
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire().await;
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for DelayedTransition {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
#[path = "tests/timer_tests.rs"]
mod tests;
