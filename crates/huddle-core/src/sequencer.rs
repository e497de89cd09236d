//! Key-partitioned sequential task runner.
//!
//! Tasks pushed under the same key run one at a time in push order; tasks
//! under different keys run concurrently. Each key gets a worker task on
//! first use, which retires as soon as its queue is drained. A panicking
//! task is reported like a failed one and does not take its queue down.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use tokio::sync::{Notify, mpsc};

use crate::errors::SessionError;

pub type SequencedTask = Pin<Box<dyn Future<Output = Result<(), SessionError>> + Send>>;

/// Receives failures of individual tasks. A failure never stops the queue.
pub type ErrorSink = Arc<dyn Fn(&str, &SessionError) + Send + Sync>;

#[derive(Clone)]
pub struct PeerSequencer {
    inner: Arc<Inner>,
}

struct Inner {
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<SequencedTask>>>,
    idle: Notify,
    sink: ErrorSink,
}

impl Inner {
    fn queues(&self) -> MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<SequencedTask>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PeerSequencer {
    pub fn new(sink: ErrorSink) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                idle: Notify::new(),
                sink,
            }),
        }
    }

    /// Queue `task` behind every earlier task for `key`.
    pub fn push<F>(&self, key: &str, task: F)
    where
        F: Future<Output = Result<(), SessionError>> + Send + 'static,
    {
        let mut task: SequencedTask = Box::pin(task);
        let mut queues = self.inner.queues();

        if let Some(tx) = queues.get(key) {
            match tx.send(task) {
                Ok(()) => return,
                // Worker was torn down without retiring (runtime shutdown); start over.
                Err(mpsc::error::SendError(returned)) => {
                    task = returned;
                    queues.remove(key);
                }
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        queues.insert(key.to_string(), tx);
        drop(queues);

        tracing::debug!(key, "sequencer queue created");
        tokio::spawn(Self::run(self.inner.clone(), key.to_string(), task, rx));
    }

    async fn run(
        inner: Arc<Inner>,
        key: String,
        first: SequencedTask,
        mut rx: mpsc::UnboundedReceiver<SequencedTask>,
    ) {
        let mut next = Some(first);
        while let Some(task) = next.take() {
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => (inner.sink)(&key, &e),
                Err(_) => {
                    tracing::error!(key = %key, "sequenced task panicked");
                    let e = SessionError::Negotiation("sequenced task panicked".to_string());
                    (inner.sink)(&key, &e);
                }
            }
            next = Self::next_or_retire(&inner, &key, &mut rx);
        }
        tracing::debug!(key = %key, "sequencer queue drained");
        inner.idle.notify_waiters();
    }

    /// Pops the next task; with an empty queue, removes the key while still
    /// holding the map lock so a concurrent `push` cannot slip in between.
    fn next_or_retire(
        inner: &Inner,
        key: &str,
        rx: &mut mpsc::UnboundedReceiver<SequencedTask>,
    ) -> Option<SequencedTask> {
        if let Ok(task) = rx.try_recv() {
            return Some(task);
        }
        let mut queues = inner.queues();
        match rx.try_recv() {
            Ok(task) => Some(task),
            Err(_) => {
                queues.remove(key);
                None
            }
        }
    }

    pub fn active_queues(&self) -> usize {
        self.inner.queues().len()
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.inner.queues().contains_key(key)
    }

    /// Wait until every queue has drained.
    pub async fn wait_idle(&self) {
        loop {
            let mut notified = std::pin::pin!(self.inner.idle.notified());
            notified.as_mut().enable();
            if self.active_queues() == 0 {
                return;
            }
            notified.await;
        }
    }
}
