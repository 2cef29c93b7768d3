mod commands;
mod connection;
mod state;

pub use commands::{Command, CommandKind, CommandQueue, ParsePriorityError, Priority, QueueError};
pub(crate) use connection::Daemon;
pub(crate) use state::Shared;
pub use state::{ErrorCallback, SceneCallback, StateCallback};
