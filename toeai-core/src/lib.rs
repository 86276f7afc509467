//! Core types and plumbing for toeai
//!
//! This crate owns the chat session store, its persistence, and the
//! configuration and logging shared by the other toeai crates.

pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod storage;
pub mod utils;

pub use error::{Error, Result};
