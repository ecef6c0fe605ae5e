//! Input nodes
//!
//! Nodes that produce data from settings or external values.

mod constant;
mod credentials_reader;
mod variable_reader;

pub use constant::ConstantNode;
pub use credentials_reader::CredentialsReaderNode;
pub use variable_reader::VariableReaderNode;
