//! # A peer-to-peer chat over plain TCP.
//!
//! Every participant listens and dials; there is no server. A newcomer dials
//! any member, announces itself with `/join`, and that member tells everyone
//! else to `/dial` the newcomer, so the participants end up fully meshed. The
//! chat log is pulled from the first contact with `/chatS` / `/chatR`.
//!
//! Architecture:
//!
//! ```text
//!  stdin ──LocalCommand──> MeshNode ──accept / fan-out dial──┐
//!                             │                              v
//!                             │        +-----------+    +---------------------------+
//!                             │        | TcpStream |<-->| reader/dispatcher/writer  |──┐
//!                             │        +-----------+    +---------------------------+  │
//!                             │        | TcpStream |<-->| reader/dispatcher/writer  |──┤
//!                             v        +-----------+    +---------------------------+  │
//!                        +----------+ <─────────────────────────────────────────────────┘
//!                        | ChatRoom |── ChatEvent ──> stdout
//!                        +----------+
//! ```

pub mod common;
pub mod config;
pub mod error;
pub mod network;
pub mod ui;
