pub mod bootstrap;
pub mod dispatcher;
pub mod node;
pub mod peer;
pub mod registry;

pub use node::MeshNode;
pub use peer::PeerHandle;
pub use registry::{ChatRoom, DialRequest};
