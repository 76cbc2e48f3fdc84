mod conversation;
mod error;
mod event;
mod fragment;
mod message;
mod sender;
mod slash_commands;
mod submission;

pub use conversation::*;
pub use error::*;
pub use event::*;
pub use fragment::*;
pub use message::*;
pub use sender::*;
pub use slash_commands::*;
pub use submission::*;
