// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Fixed pool of threads for device-facing work.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvError, Sender};
use std::thread::{self, JoinHandle};
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let workers = (0..threads.max(1))
            .map(|i| {
                let receiver: Receiver<Job> = receiver.clone();
                thread::Builder::new()
                    .name(format!("kmdlink-worker-{}", i))
                    .spawn(move || {
                        for job in receiver.iter() {
                            job();
                        }
                        debug!("Worker {} exiting", i);
                    })
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Queue `f`. Jobs start in submission order.
    pub fn submit<F, R>(&self, f: F) -> JobHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let job: Job = Box::new(move || {
            // The handle may already be gone.
            let _ = tx.send(f());
        });
        if let Some(sender) = &self.sender {
            // Only fails once every worker is gone; the handle then reports
            // a disconnect.
            let _ = sender.send(job);
        }
        JobHandle { result: rx }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.workers.len())
            .finish()
    }
}

#[derive(Debug)]
pub struct JobHandle<R> {
    result: Receiver<R>,
}

impl<R> JobHandle<R> {
    /// Block until the job has run.
    pub fn wait(self) -> Result<R, RecvError> {
        self.result.recv()
    }

    pub fn try_wait(&self) -> Option<R> {
        self.result.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_results_come_back() {
        let pool = WorkerPool::new(3).unwrap();
        let handles: Vec<_> = (0..10u32).map(|i| pool.submit(move || i * i)).collect();
        let results: Vec<u32> = handles.into_iter().map(|h| h.wait().unwrap()).collect();
        assert_eq!(results, (0..10).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn test_drop_runs_queued_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(2).unwrap();
            for _ in 0..20 {
                let counter = Arc::clone(&counter);
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_zero_threads_means_one() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.threads(), 1);
        assert_eq!(pool.submit(|| "done").wait().unwrap(), "done");
    }
}
