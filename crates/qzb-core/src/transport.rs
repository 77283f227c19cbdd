use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, FileMeta, FileRef},
    Result,
};

/// Hexagonal port for the chat platform.
///
/// Telegram is the first implementation; the shape keeps the core free of any
/// platform types so a Slack/Discord adapter could fit behind the same trait.
#[async_trait]
pub trait FileTransport: Send + Sync {
    /// Resolve a recorded reference to its remote size and name.
    async fn resolve_reference(&self, reference: &FileRef) -> Result<FileMeta>;

    /// Transfer the referenced file to `dest`, returning the written path.
    async fn download_to(&self, reference: &FileRef, dest: &Path) -> Result<PathBuf>;

    /// Send the finished archive back to the user.
    async fn deliver_file(&self, chat_id: ChatId, path: &Path) -> Result<()>;

    /// User-facing status/error message.
    async fn notify(&self, chat_id: ChatId, text: &str) -> Result<()>;
}
