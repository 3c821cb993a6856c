//! Single-worker execution channel.
//!
//! One dedicated OS thread pulls boxed jobs off a bounded queue and runs them one at a time,
//! in submission order. Callers await a oneshot reply, so async tasks never block while the
//! data store works. Dropping the last sender lets the thread drain what is queued and exit.

#![forbid(unsafe_code)]

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use metrics::{gauge, histogram};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker channel closed")]
    Closed,
    #[error("worker job panicked")]
    Panicked,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub struct Worker {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
}

impl Worker {
    /// Start the worker thread. `queue_cap` bounds how many jobs may wait; submitters
    /// suspend while the queue is full.
    pub fn spawn(name: &str, queue_cap: usize) -> Result<Self, WorkerError> {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_cap.max(1));
        let pending = Arc::new(AtomicUsize::new(0));
        let depth = Arc::clone(&pending);
        let thread = std::thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut ran = 0u64;
            while let Some(job) = rx.blocking_recv() {
                let started = Instant::now();
                job();
                ran += 1;
                let left = depth.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
                gauge!("worker_queue_depth", left as f64);
                histogram!("worker_job_ms", started.elapsed().as_secs_f64() * 1000.0);
            }
            info!(ran, "worker queue closed; thread exiting");
        })?;
        debug!(name, queue_cap, "worker thread started");
        Ok(Self { tx: Mutex::new(Some(tx)), thread: Mutex::new(Some(thread)), pending })
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize { self.pending.load(Ordering::Acquire) }

    /// Run `f` on the worker thread and wait for its result.
    ///
    /// Once queued the job always runs to completion, even if this future is dropped.
    pub async fn submit<F, R>(&self, f: F) -> Result<R, WorkerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).clone().ok_or(WorkerError::Closed)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let out = std::panic::catch_unwind(AssertUnwindSafe(f));
            let _ = reply_tx.send(out);
        });
        // Count the job only once it holds a queue slot; a submit dropped while waiting for
        // room leaves nothing behind.
        let permit = tx.reserve().await.map_err(|_| WorkerError::Closed)?;
        let depth = self.pending.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        gauge!("worker_queue_depth", depth as f64);
        permit.send(job);
        drop(tx);
        match reply_rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => {
                warn!("worker job panicked");
                Err(WorkerError::Panicked)
            }
            Err(_) => Err(WorkerError::Closed),
        }
    }

    /// Stop accepting work, let the thread finish everything already queued, and join it.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().unwrap_or_else(PoisonError::into_inner).take());
        let thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(thread) = thread {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => info!("worker drained and joined"),
                Ok(Err(_)) => warn!("worker thread panicked"),
                Err(e) => warn!(error = %e, "joining worker thread failed"),
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // The detached thread still drains whatever is queued.
        drop(self.tx.lock().unwrap_or_else(PoisonError::into_inner).take());
    }
}
