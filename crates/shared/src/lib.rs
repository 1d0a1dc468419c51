//! Shared wire types for the chathub client: hub names, the closed set of hub
//! methods and events, REST payloads and the hub frame codec.

pub mod error;
pub mod events;
pub mod hub;
pub mod models;
pub mod protocol;

pub use error::*;
pub use events::*;
pub use hub::*;
pub use models::*;
pub use protocol::*;
