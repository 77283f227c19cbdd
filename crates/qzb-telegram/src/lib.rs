//! Telegram adapter (teloxide).
//!
//! This crate implements the `qzb-core` FileTransport port over the Telegram
//! Bot API.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use teloxide::{net::Download, prelude::*, types::InputFile};

use tokio::time::sleep;

use qzb_core::{
    domain::{ChatId, FileMeta, FileRef},
    errors::Error,
    transport::FileTransport,
    Result,
};

pub mod handlers;
pub mod router;

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::Transfer(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

#[async_trait]
impl FileTransport for TelegramTransport {
    async fn resolve_reference(&self, reference: &FileRef) -> Result<FileMeta> {
        let file = self
            .with_retry(|| self.bot.get_file(reference.id.clone()))
            .await?;

        // Telegram's file API carries no display name; the name seen at
        // record time is authoritative.
        Ok(FileMeta {
            size_bytes: file.meta.size as u64,
            suggested_name: reference.suggested_name.clone(),
        })
    }

    async fn download_to(&self, reference: &FileRef, dest: &Path) -> Result<PathBuf> {
        let file = self
            .with_retry(|| self.bot.get_file(reference.id.clone()))
            .await?;

        let mut dst = tokio::fs::File::create(dest).await?;
        self.bot
            .download_file(&file.path, &mut dst)
            .await
            .map_err(|e| Error::Transfer(format!("telegram download failed: {e}")))?;

        Ok(dest.to_path_buf())
    }

    async fn deliver_file(&self, chat_id: ChatId, path: &Path) -> Result<()> {
        let document = InputFile::file(path.to_path_buf());
        self.with_retry(|| {
            self.bot
                .send_document(Self::tg_chat(chat_id), document.clone())
        })
        .await?;
        Ok(())
    }

    async fn notify(&self, chat_id: ChatId, text: &str) -> Result<()> {
        self.with_retry(|| self.bot.send_message(Self::tg_chat(chat_id), text.to_string()))
            .await?;
        Ok(())
    }
}
