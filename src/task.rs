//! Task handle used by the default `TaskSpawner` impl: wraps a
//! `tokio::task::JoinHandle`, aborting on drop unless detached.
//!
//! Grounded on `bgp::task::Task` in the teacher repo; narrowed to what
//! the worker/partition/membership tasks here actually need (no
//! `Timer`, since nothing in this pipeline runs on a wall-clock tick).

use std::future::Future;

use tokio::task::{self, JoinHandle};

#[derive(Debug)]
pub struct Task<T> {
    join_handle: JoinHandle<T>,
    detached: bool,
}

impl<T> Task<T> {
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        Fut::Output: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
            detached: false,
        }
    }

    pub fn detach(&mut self) {
        self.detached = true;
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

/// `TaskSpawner` backed by real `tokio::spawn`, one task per class. The
/// class distinction exists so a runtime could in principle prioritize
/// or instrument them separately; today all four spawn identically.
#[derive(Debug, Default)]
pub struct TokioSpawner;

impl crate::external::TaskSpawner for TokioSpawner {
    fn spawn_partition(&self, fut: crate::external::BoxFuture<'static, ()>) {
        task::spawn(fut);
    }

    fn spawn_membership(&self, fut: crate::external::BoxFuture<'static, ()>) {
        task::spawn(fut);
    }

    fn spawn_send(&self, _group: usize, fut: crate::external::BoxFuture<'static, ()>) {
        task::spawn(fut);
    }

    fn spawn_send_ready(&self, fut: crate::external::BoxFuture<'static, ()>) {
        task::spawn(fut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn detach_leaves_the_future_running() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let mut task = Task::spawn(async move {
            ran_clone.store(true, Ordering::SeqCst);
        });
        task.detach();
        drop(task);
        tokio::task::yield_now().await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dropping_without_detach_aborts() {
        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (s, f) = (started.clone(), finished.clone());
        let task = Task::spawn(async move {
            s.store(true, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            f.store(true, Ordering::SeqCst);
        });
        tokio::task::yield_now().await;
        drop(task);
        tokio::task::yield_now().await;
        assert!(started.load(Ordering::SeqCst));
        assert!(!finished.load(Ordering::SeqCst));
    }
}
