//! Transport-facing ports and the inbound message model.

pub mod port;
pub mod types;

pub use port::{MessagingPort, PlatformAdminPort};
pub use types::InboundMessage;
