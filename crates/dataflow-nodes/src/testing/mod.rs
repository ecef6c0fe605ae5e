//! Testing nodes
//!
//! Nodes that misbehave on request or record how often they ran. Useful
//! for exercising failure handling and persistence of internal state.

mod counter;
mod fail;

pub use counter::ExecutionCounterNode;
pub use fail::{FailNode, FailPhase};
