//! Core domain + application logic for the quick-zip bot.
//!
//! This crate is intentionally framework-agnostic. Telegram lives behind the
//! `FileTransport` port implemented in the adapter crate.

pub mod archive;
pub mod audit;
pub mod batch;
pub mod config;
pub mod domain;
pub mod downloader;
pub mod errors;
pub mod logging;
pub mod security;
pub mod session;
pub mod transport;

pub use errors::{Error, Result};
