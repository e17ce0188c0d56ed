use crate::error::AppError;
use crate::observability::get_metrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A detached task that failed after its caller already got a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub task: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Runs fire-and-forget work off the request path.
///
/// Failures are never silently dropped: each one is logged, counted and
/// pushed onto the dead-letter channel. Nothing is retried here.
#[derive(Clone)]
pub struct TaskRunner {
    sender: mpsc::UnboundedSender<DeadLetter>,
    receiver: Arc<Mutex<Option<mpsc::UnboundedReceiver<DeadLetter>>>>,
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRunner {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(Some(receiver))),
        }
    }

    /// Spawns `task` onto the runtime and returns immediately.
    pub fn spawn<F>(&self, name: &str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let sender = self.sender.clone();
        let name = name.to_string();

        tokio::spawn(async move {
            match task.await {
                Ok(()) => tracing::debug!(task = %name, "Detached task completed"),
                Err(e) => {
                    get_metrics().record_dead_letter(&name);
                    tracing::warn!(task = %name, error = %e, "Detached task failed, dead-lettered");

                    let letter = DeadLetter {
                        task: name,
                        error: e.to_string(),
                        failed_at: Utc::now(),
                    };
                    if sender.send(letter).is_err() {
                        tracing::warn!("Dead-letter receiver dropped");
                    }
                }
            }
        })
    }

    /// Hands out the dead-letter receiver. Only the first call gets it.
    pub fn dead_letters(&self) -> Option<mpsc::UnboundedReceiver<DeadLetter>> {
        match self.receiver.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner").finish_non_exhaustive()
    }
}
