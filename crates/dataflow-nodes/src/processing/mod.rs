//! Processing nodes
//!
//! Nodes that transform their inputs.

mod concat;
mod math;

pub use concat::ConcatNode;
pub use math::{MathNode, MathOperation};
