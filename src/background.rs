//! Tracked background work that outlives the response it was spawned for.
//!
//! Write-backs and other fire-and-forget tasks are registered here so the
//! host can keep the agent alive until they finish. Dropping a `Background`
//! aborts whatever is still running.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use tokio::task::JoinSet;
use tracing::warn;

#[derive(Default)]
pub struct Background {
  tasks: Mutex<JoinSet<()>>,
}

impl Background {
  pub fn new() -> Self {
    Self::default()
  }

  fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
    // A panic while holding the lock leaves the set itself intact
    self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Run `task` in the background without blocking the caller.
  ///
  /// Tasks that already finished are collected first so the set only
  /// holds work that is still running.
  pub fn spawn<F>(&self, task: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let mut tasks = self.tasks();
    reap(&mut tasks);
    tasks.spawn(task);
  }

  /// Number of tasks still running.
  pub fn pending(&self) -> usize {
    let mut tasks = self.tasks();
    reap(&mut tasks);
    tasks.len()
  }

  /// Wait until every task has finished, including tasks spawned while waiting.
  pub async fn settle(&self) {
    loop {
      let mut batch = std::mem::take(&mut *self.tasks());
      if batch.is_empty() {
        return;
      }

      while let Some(result) = batch.join_next().await {
        if let Err(e) = result {
          warn!("Background task did not complete: {}", e);
        }
      }
    }
  }
}

fn reap(tasks: &mut JoinSet<()>) {
  while let Some(result) = tasks.try_join_next() {
    if let Err(e) = result {
      warn!("Background task did not complete: {}", e);
    }
  }
}
