use tokio::sync::{mpsc, watch, Mutex};

use crate::scheduler::job::JobSpec;

/// An item on the job queue.
#[derive(Debug)]
pub enum QueueEntry {
    Job(Box<JobSpec>),
    /// Tells the worker that dequeues it to stop pulling work
    Sentinel,
}

/// FIFO of jobs and sentinels shared by all workers.
///
/// Dequeue is mutually exclusive. Every entry put on the queue must be
/// acknowledged with [`JobQueue::task_done`] once handled; [`JobQueue::join`]
/// resolves when no unacknowledged entries remain.
#[derive(Debug)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<QueueEntry>,
    rx: Mutex<mpsc::UnboundedReceiver<QueueEntry>>,
    outstanding: watch::Sender<usize>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (outstanding, _) = watch::channel(0);
        Self {
            tx,
            rx: Mutex::new(rx),
            outstanding,
        }
    }

    pub fn put(&self, entry: QueueEntry) {
        self.outstanding.send_modify(|n| *n += 1);
        if self.tx.send(entry).is_err() {
            // The receiver lives as long as the queue, so this only happens mid-drop
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
            tracing::warn!("Job queue closed, entry dropped");
        }
    }

    pub fn put_job(&self, job: JobSpec) {
        self.put(QueueEntry::Job(Box::new(job)));
    }

    pub fn put_sentinels(&self, count: usize) {
        for _ in 0..count {
            self.put(QueueEntry::Sentinel);
        }
    }

    /// Take the next entry, waiting if the queue is empty.
    pub async fn get(&self) -> Option<QueueEntry> {
        self.rx.lock().await.recv().await
    }

    /// Acknowledge one dequeued entry.
    pub fn task_done(&self) {
        self.outstanding.send_modify(|n| {
            if *n == 0 {
                tracing::warn!("task_done called more times than entries were queued");
            }
            *n = n.saturating_sub(1);
        });
    }

    /// Number of entries queued or in flight but not yet acknowledged.
    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Wait until every entry put on the queue has been acknowledged.
    pub async fn join(&self) {
        let mut rx = self.outstanding.subscribe();
        // The sender is owned by `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}
