pub mod hub;
pub mod messages;

pub use hub::NotificationHub;
pub use messages::{WsMessage, message_types};
