pub mod message;
pub mod user;

pub use message::{MessageKind, MessageRecord};
pub use user::{User, UserInfo};
