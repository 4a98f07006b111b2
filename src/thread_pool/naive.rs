use std::thread;

use super::ThreadPool;
use crate::Result;

/// A pool that is not actually a pool: every job gets a fresh OS thread.
///
/// This is the server's default, giving each client connection its own
/// thread for the lifetime of its session.
pub struct NaiveThreadPool;

impl ThreadPool for NaiveThreadPool {
    fn new(_threads: u32) -> Result<Self> {
        Ok(NaiveThreadPool)
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        thread::spawn(job);
    }
}
