use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::error::MetaError;

/// Terminal outcome delivered to the submitter of a replicated operation.
pub type OperationResult = Result<Vec<u8>, MetaError>;

type CompletionFn = Box<dyn FnOnce(OperationResult) + Send + 'static>;

/// Single-use completion handle for one in-flight replicated write.
///
/// Exactly-once delivery is a property of this type, not caller discipline:
/// the sink is taken atomically on first `resolve`, and later resolutions are
/// silent no-ops. A closure dropped unresolved (its worker task torn down
/// mid-flight) resolves itself with a submission rejection, so abandonment
/// cannot swallow a completion. The completion runs on whatever worker task
/// resolves it, never on the submitting thread.
pub struct OperationClosure {
    sink: Mutex<Option<CompletionFn>>,
}

impl OperationClosure {
    pub fn new(complete: impl FnOnce(OperationResult) + Send + 'static) -> Self {
        Self {
            sink: Mutex::new(Some(Box::new(complete))),
        }
    }

    /// Closure plus a receiver for await-style callers (the RPC front end).
    ///
    /// Dropping the closure unresolved delivers a rejection through the
    /// channel, so a waiting receiver observes a failure instead of hanging
    /// forever.
    pub fn channel() -> (Self, oneshot::Receiver<OperationResult>) {
        let (tx, rx) = oneshot::channel();
        let closure = Self::new(move |outcome| {
            // Receiver may have timed out and gone away; the late result is
            // dropped, not double-delivered.
            let _ = tx.send(outcome);
        });
        (closure, rx)
    }

    /// Deliver the outcome. At most the first call has any effect.
    pub fn resolve(&self, outcome: OperationResult) {
        let sink = self
            .sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(complete) = sink {
            complete(outcome);
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

impl Drop for OperationClosure {
    fn drop(&mut self) {
        let sink = self
            .sink
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(complete) = sink {
            complete(Err(MetaError::SubmissionRejected {
                reason: "operation abandoned before completion".to_string(),
            }));
        }
    }
}

impl std::fmt::Debug for OperationClosure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationClosure")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
