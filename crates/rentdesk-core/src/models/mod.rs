pub mod message;
pub mod session;

pub use message::{Attachment, Message, MessageAction, MessageKind, MessageStatus, Sender};
pub use session::{ConversationSession, Counterpart, ReservationSummary};
