//! Runtime support for streaming decoder nodes

pub mod edge;
pub mod errors;
pub mod node;
pub mod receiver;
pub mod scheduler;
pub mod sender;

pub use edge::Edge;
pub use errors::{WorkError, WorkResult};
pub use node::ProcessNode;
pub use receiver::Receiver;
pub use scheduler::Scheduler;
pub use sender::{ChannelMessage, Sender, bounded};
