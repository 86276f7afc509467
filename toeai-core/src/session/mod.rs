//! Chat session management
//!
//! Sessions are kept per user in one root state tree. Every mutation
//! goes through [`SessionStore`], which writes the whole tree back to
//! durable storage once the change is applied.

pub mod model;
pub mod persistence;
pub mod store;

pub use model::{ChatSession, Message, MessageDraft, Role, RootState};
pub use persistence::{StatePersistence, SCHEMA_VERSION, STATE_KEY};
pub use store::SessionStore;
