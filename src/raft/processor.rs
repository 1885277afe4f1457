use std::fmt::Debug;

/// Failure raised by a processor while handling a committed entry or a
/// snapshot blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// The request bytes were rejected. Replicated as an error response;
    /// the shard keeps applying subsequent entries.
    BadRequest { message: String },
    /// A snapshot blob could not be produced or restored. Fatal for the
    /// affected shard, surfaced to the engine as a storage error.
    BadSnapshot { message: String },
}

impl std::fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message } => write!(f, "bad request: {message}"),
            Self::BadSnapshot { message } => write!(f, "bad snapshot: {message}"),
        }
    }
}

impl std::error::Error for ProcessorError {}

/// Business logic for one state category, instantiated once per shard.
///
/// `apply` is the deterministic state transition executed once per committed
/// log entry. It must be a pure function of (current state, request bytes):
/// no wall-clock time, randomness, or external I/O, because the same sequence
/// replays on every replica and during recovery. The engine serializes calls
/// within a shard; different shards apply in parallel.
pub trait StateProcessor: Send + Debug + 'static {
    /// Stable partition namespace this processor owns.
    fn group_category(&self) -> &str;

    /// Apply one committed request, returning the response payload.
    fn apply(&mut self, request: &[u8]) -> Result<Vec<u8>, ProcessorError>;

    /// Evaluate a read-only request against current state. Invoked outside
    /// the replicated log, after a leadership fence, so it must not mutate.
    fn read(&self, request: &[u8]) -> Result<Vec<u8>, ProcessorError> {
        let _ = request;
        Err(ProcessorError::BadRequest {
            message: format!("category {:?} does not serve reads", self.group_category()),
        })
    }

    /// Serialize the full shard state for log compaction.
    fn save_snapshot(&self) -> Result<Vec<u8>, ProcessorError>;

    /// Replace the shard state with a previously saved snapshot.
    fn restore_snapshot(&mut self, snapshot: &[u8]) -> Result<(), ProcessorError>;
}

/// Builds one fresh [`StateProcessor`] per shard of its category.
///
/// Registered once before the coordinator starts; each shard owning its own
/// instance is what keeps shard state isolated and replay byte-identical.
pub trait StateProcessorFactory: Send + Sync + 'static {
    fn group_category(&self) -> &str;

    fn build(&self) -> Box<dyn StateProcessor>;
}
