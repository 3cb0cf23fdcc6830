pub mod chat;
pub mod contact;
pub mod member;
pub mod message;

pub use chat::Chat;
pub use contact::{Contact, ContactStatus};
pub use member::ChatMember;
pub use message::{Message, MessagePayload, MessageStatus, NewMessage};
