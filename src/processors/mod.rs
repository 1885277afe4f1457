//! Bundled state processors.
//!
//! Each owns one category of broker control-plane state. They exist both as
//! working processors and as the reference for how to write a new one:
//! deterministic `apply`, pure `read`, full-state JSON snapshots.

pub mod counter;
pub mod subscription;

pub use counter::{CounterStateProcessor, CounterStateProcessorFactory};
pub use subscription::{SubscriptionStateProcessor, SubscriptionStateProcessorFactory};
