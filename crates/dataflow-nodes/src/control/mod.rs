//! Control nodes
//!
//! Nodes that forward data unchanged, possibly after waiting.

mod delay;
mod passthrough;

pub use delay::DelayNode;
pub use passthrough::PassthroughNode;
