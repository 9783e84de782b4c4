//! Function calls issued by the remote model: fragment correlation and
//! execution planning.

pub mod catalog;
pub mod registry;

pub use catalog::{Execution, OperationCatalog};
pub use registry::{CorrelationRegistry, Discarded, PendingInvocation, ReadyInvocation};
