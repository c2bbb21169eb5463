//! Wire types for the realtime conversation API as spoken over the WebRTC control channel.
pub mod session;
pub mod audio;
pub mod events;
mod content;

pub use session::{SessionConfig, SessionOptions};
pub use content::items::Item;
pub use content::message::*;
pub use events::{ClientEvent, ServerEvent};
