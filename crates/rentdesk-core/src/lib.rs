pub mod advisor;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod mapper;
pub mod merge;
pub mod models;
pub mod persist;
pub mod remote;
pub mod store;

// Re-export the embedding surface at the crate root for convenience
pub use config::CoreConfig;
pub use error::CoreError;
pub use events::CoreEvent;
pub use store::SessionStore;
