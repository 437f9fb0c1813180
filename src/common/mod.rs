pub mod commands;
pub mod events;
pub mod types;

pub use commands::{Command, CommandError, LocalCommand};
pub use events::ChatEvent;
pub use types::ChatMessage;
