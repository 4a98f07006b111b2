use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, error};

use super::ThreadPool;
use crate::Result;

/// A thread pool with a fixed number of workers sharing one job queue.
///
/// The queue is the MPMC [`channel`] provided by the crossbeam crate, used
/// here as single producer, multiple consumer: the pool is the producer and
/// the worker threads are the consumers. A session that panics takes its
/// worker with it, and the worker's drop sentinel starts a replacement
/// thread so the pool does not shrink over time.
///
/// Note that with fewer workers than concurrent clients, whole sessions
/// queue behind one another; use the naive pool when that matters.
///
/// [`channel`]: https://docs.rs/crossbeam/latest/crossbeam/channel/index.html
pub struct SharedQueueThreadPool {
    tx: Sender<Box<dyn FnOnce() + Send + 'static>>,
}

impl ThreadPool for SharedQueueThreadPool {
    fn new(threads: u32) -> Result<Self> {
        let (tx, rx) = channel::unbounded::<Box<dyn FnOnce() + Send + 'static>>();
        for _ in 0..threads {
            let job_rx = JobReceiver(rx.clone());
            thread::Builder::new().spawn(move || run_jobs(job_rx))?;
        }
        Ok(SharedQueueThreadPool { tx })
    }

    /// # Panics
    /// panics if the pool has no worker threads left
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(Box::new(job))
            .expect("there are no threads in the pool");
    }
}

/// the receiving half a worker waits on, plus the panic-recovery sentinel:
/// if the worker is unwinding, its replacement is spawned from `drop`
#[derive(Clone)]
struct JobReceiver(Receiver<Box<dyn FnOnce() + Send + 'static>>);

impl Drop for JobReceiver {
    fn drop(&mut self) {
        if thread::panicking() {
            debug!("worker panicked, starting a replacement thread");
            let job_rx = self.clone();
            if let Err(e) = thread::Builder::new().spawn(move || run_jobs(job_rx)) {
                error!("failed to spawn a replacement thread: {}", e);
            }
        }
    }
}

/// waits for jobs on the wrapped receiver and runs them until the pool
/// (the sending half) is dropped
fn run_jobs(rx: JobReceiver) {
    loop {
        match rx.0.recv() {
            Ok(job) => job(),
            Err(_) => {
                debug!("worker exiting, the thread pool was destroyed");
                break;
            }
        }
    }
}
