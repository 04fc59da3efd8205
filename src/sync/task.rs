//! Deferred propagation: task descriptors and runners.

use crate::error::{Result, SyncError};
use crate::types::{RecordRef, TenantId, Timestamp};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// Minimal identity of a changed subject, plus the tenant active when the
/// change happened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTask {
    pub subject: RecordRef,
    pub tenant: Option<TenantId>,
    /// Attempts already made.
    #[serde(default)]
    pub attempt: u32,
}

impl SyncTask {
    pub fn new(subject: RecordRef, tenant: Option<TenantId>) -> Self {
        Self {
            subject,
            tenant,
            attempt: 0,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| SyncError::Deserialization(e.to_string()))
    }
}

/// Consumes one task. An `Err` asks the runner to retry.
pub type TaskHandler = Arc<dyn Fn(&SyncTask) -> Result<()> + Send + Sync>;

/// Asynchronous task delivery.
pub trait TaskRunner: Send + Sync {
    fn enqueue(&self, task: SyncTask) -> Result<()>;

    /// Stop accepting tasks and finish the queued ones.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Tasks given up on after their last attempt.
    fn dead_letters(&self) -> Vec<DeadLetter> {
        Vec::new()
    }
}

/// Runs each task on the caller's thread, once.
pub struct InlineRunner {
    handler: TaskHandler,
}

impl InlineRunner {
    pub fn new(handler: TaskHandler) -> Self {
        Self { handler }
    }
}

impl TaskRunner for InlineRunner {
    fn enqueue(&self, task: SyncTask) -> Result<()> {
        (*self.handler)(&task)
    }
}

/// A task that used up its attempts.
#[derive(Clone, Debug)]
pub struct DeadLetter {
    pub task: SyncTask,
    pub error: String,
    pub failed_at: Timestamp,
}

/// Background worker fed through a bounded channel.
///
/// Tasks travel encoded, as they would through an external queue. A failing
/// task is retried up to `max_attempts` times, then moved to the dead
/// letters.
pub struct ThreadedRunner {
    sender: Mutex<Option<Sender<Vec<u8>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
}

impl ThreadedRunner {
    pub fn start(handler: TaskHandler, capacity: usize, max_attempts: u32) -> Result<Self> {
        let (sender, receiver) = bounded::<Vec<u8>>(capacity.max(1));
        let dead_letters = Arc::new(Mutex::new(Vec::new()));

        let worker = {
            let dead_letters = Arc::clone(&dead_letters);
            thread::Builder::new()
                .name("propsync-worker".into())
                .spawn(move || Self::work(receiver, handler, max_attempts.max(1), dead_letters))?
        };

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            dead_letters,
        })
    }

    fn work(
        receiver: Receiver<Vec<u8>>,
        handler: TaskHandler,
        max_attempts: u32,
        dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    ) {
        for bytes in receiver {
            let mut task = match SyncTask::decode(&bytes) {
                Ok(task) => task,
                Err(e) => {
                    error!(error = %e, "dropping undecodable task");
                    continue;
                }
            };

            loop {
                task.attempt += 1;
                match (*handler)(&task) {
                    Ok(()) => {
                        debug!(subject = %task.subject, attempt = task.attempt, "task done");
                        break;
                    }
                    Err(e) if task.attempt < max_attempts => {
                        warn!(subject = %task.subject, attempt = task.attempt, error = %e, "task failed, retrying");
                    }
                    Err(e) => {
                        error!(subject = %task.subject, attempt = task.attempt, error = %e, "task failed, giving up");
                        dead_letters.lock().push(DeadLetter {
                            task: task.clone(),
                            error: e.to_string(),
                            failed_at: Timestamp::now(),
                        });
                        break;
                    }
                }
            }
        }
    }
}

impl TaskRunner for ThreadedRunner {
    fn enqueue(&self, task: SyncTask) -> Result<()> {
        let bytes = task.encode()?;
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => sender
                .send(bytes)
                .map_err(|_| SyncError::Dispatch("worker has stopped".into())),
            None => Err(SyncError::Dispatch("runner is shut down".into())),
        }
    }

    fn shutdown(&self) -> Result<()> {
        // Dropping the sender ends the worker loop once the queue drains.
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            worker
                .join()
                .map_err(|_| SyncError::Dispatch("worker panicked".into()))?;
        }
        Ok(())
    }

    fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().clone()
    }
}

impl Drop for ThreadedRunner {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "task runner did not shut down cleanly");
        }
    }
}
