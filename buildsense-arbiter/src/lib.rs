//! Arbitration: merging proposals into one decision per room and round,
//! and the round lifecycle around it.

pub mod arbiter;
pub mod coordinator;
pub mod dispatch;
pub mod recorder;

pub use arbiter::{Arbiter, RoundContext};
pub use coordinator::{RoundCoordinator, RoundOutcome, RoundSettings};
pub use dispatch::{CommandDispatcher, LoggingDispatcher};
pub use recorder::{DecisionRecorder, JsonlDecisionRecorder, MemoryDecisionRecorder};
