//! Browser session management
//!
//! Each browser session owns one `ChatSession` and therefore one transcript.
//! Sessions live only in memory and are dropped after a period of
//! inactivity. The `SessionStore` trait allows other backends.

pub mod adapters;
pub mod store;

pub use adapters::InMemorySessionStore;
pub use store::{Session, SessionStore, SessionStoreError, SessionStoreRef, SharedChat};
