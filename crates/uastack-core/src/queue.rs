//! Per-channel serialization queues.
//!
//! Each secure channel runs its encode work and its decode work on two
//! serial executors: actor tasks draining bounded mailboxes, so submissions
//! from one side execute in submission order without interleaving. That
//! ordering is what keeps outbound sequence numbers contiguous and inbound
//! reassembly deterministic without per-buffer locking. The jobs themselves
//! are synchronous and run to completion on the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use crate::error::UaError;
use crate::status;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Mailbox depth per executor; deeper than any sane chunk backlog.
const MAILBOX_CAPACITY: usize = 4096;

/// A single-threaded, ordered job executor.
pub struct SerialExecutor {
    sender: mpsc::Sender<Job>,
    paused: Arc<AtomicBool>,
}

impl SerialExecutor {
    /// Spawn the executor task. Must be called within a tokio runtime.
    pub fn spawn(name: &'static str) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Job>(MAILBOX_CAPACITY);
        let paused = Arc::new(AtomicBool::new(false));

        let paused_task = Arc::clone(&paused);
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                if paused_task.load(Ordering::SeqCst) {
                    trace!("{name}: dropping job submitted after pause");
                    continue;
                }
                job();
            }
        });

        Self { sender, paused }
    }

    /// Enqueue a job; it runs after everything submitted before it.
    ///
    /// # Errors
    ///
    /// `Bad_TcpServerTooBusy` when the mailbox is full or the executor has
    /// shut down.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), UaError> {
        if self.paused.load(Ordering::SeqCst) {
            // Dropped silently: pause exists precisely to discard trailing
            // work after a fatal error.
            return Ok(());
        }
        self.sender.try_send(Box::new(job)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => UaError::new(
                status::BAD_TCP_SERVER_TOO_BUSY,
                "serialization mailbox full",
            ),
            mpsc::error::TrySendError::Closed(_) => UaError::new(
                status::BAD_CONNECTION_CLOSED,
                "serialization executor stopped",
            ),
        })
    }

    /// Discard this and all future submissions.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }
}

/// The encode/decode executor pair of one channel.
pub struct SerializationQueue {
    encode: SerialExecutor,
    decode: SerialExecutor,
}

impl SerializationQueue {
    /// Spawn both executors. Must be called within a tokio runtime.
    pub fn spawn() -> Self {
        Self {
            encode: SerialExecutor::spawn("encode-queue"),
            decode: SerialExecutor::spawn("decode-queue"),
        }
    }

    /// Submit ordered encode work.
    pub fn encode(&self, job: impl FnOnce() + Send + 'static) -> Result<(), UaError> {
        self.encode.submit(job)
    }

    /// Submit ordered decode work.
    pub fn decode(&self, job: impl FnOnce() + Send + 'static) -> Result<(), UaError> {
        self.decode.submit(job)
    }

    /// Stop processing decode submissions; trailing buffers already on the
    /// wire are dropped instead of decoded.
    pub fn pause(&self) {
        self.decode.pause();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let queue = SerializationQueue::spawn();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let order = Arc::clone(&order);
            queue
                .encode(move || order.lock().unwrap().push(i))
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        let recorded = order.lock().unwrap().clone();
        assert_eq!(recorded, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn encode_and_decode_are_independent() {
        let queue = SerializationQueue::spawn();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let h = Arc::clone(&hits);
        queue.encode(move || h.lock().unwrap().push("encode")).unwrap();
        let h = Arc::clone(&hits);
        queue.decode(move || h.lock().unwrap().push("decode")).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut recorded = hits.lock().unwrap().clone();
        recorded.sort_unstable();
        assert_eq!(recorded, vec!["decode", "encode"]);
    }

    #[tokio::test]
    async fn pause_drops_subsequent_decode_jobs() {
        let queue = SerializationQueue::spawn();
        let hits = Arc::new(Mutex::new(0u32));

        let h = Arc::clone(&hits);
        queue.decode(move || *h.lock().unwrap() += 1).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        queue.pause();
        let h = Arc::clone(&hits);
        queue.decode(move || *h.lock().unwrap() += 1).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn pause_leaves_encode_side_running() {
        let queue = SerializationQueue::spawn();
        let hits = Arc::new(Mutex::new(0u32));

        queue.pause();
        let h = Arc::clone(&hits);
        queue.encode(move || *h.lock().unwrap() += 1).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
