//! Propagation and inbound selection

pub mod range;
pub mod selection;

pub use range::{in_range, line_of_sight, max_range, SenderFix};
pub use selection::{blocked_channels, rank, resolve, Candidate, SelectionContext, SelectionEngine};
