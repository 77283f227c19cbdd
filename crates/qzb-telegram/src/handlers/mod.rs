//! Telegram update handlers.
//!
//! Each handler validates auth, extracts the platform-specific pieces of the
//! update, and calls into the `qzb-core` batch service.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use qzb_core::security::is_authorized;

use crate::router::AppState;

mod commands;
mod media;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let user_id = msg.from().map(|u| u.id.0 as i64);

    if !is_authorized(user_id, &state.cfg.telegram_allowed_users) {
        let _ = bot
            .send_message(
                msg.chat.id,
                "Unauthorized. Contact the bot owner for access.",
            )
            .await;
        return Ok(());
    }

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(bot, msg, state).await;
        }
        return Ok(());
    }

    media::handle_media(msg, state).await
}
