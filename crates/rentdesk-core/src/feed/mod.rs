pub mod mux;
pub mod types;

pub use mux::{ConnectivitySignal, MuxEvent, MuxHandle, MuxState, ReconnectPolicy};
pub use types::{ActionSpec, FeedAttachment, FeedEvent};
