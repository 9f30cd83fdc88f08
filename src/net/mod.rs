pub mod client;
pub mod message;
pub mod registry;
pub mod router;
pub mod server;

pub use message::{JobSubmission, Message, ResourceFormat};
pub use registry::{ChannelHandle, ConnectionId, ConnectionRegistry};
pub use router::{MessageRouter, ServerContext};
pub use server::SocketServer;
