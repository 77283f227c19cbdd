use std::sync::Arc;

use teloxide::prelude::*;

use qzb_core::domain::{ChatId, UserId};

use crate::router::AppState;

const USAGE: &str = "Commands:\n\
/add - start collecting files for a new batch\n\
/zip <name> - bundle everything you sent into <name>.zip\n\
/cancel - discard the current batch";

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// Archive names come straight from the user and end up in a path; keep only
/// characters that cannot escape the batch directory.
fn sanitize_archive_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('.').to_string();
    if trimmed.is_empty() {
        "archive".to_string()
    } else {
        trimmed
    }
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let user_id = UserId(user.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);

    let (cmd, args) = parse_command(msg.text().unwrap_or(""));

    let outcome = match cmd.as_str() {
        "add" => state.service.begin_batch(user_id, chat_id).await,
        "zip" => {
            let name = args.split_whitespace().next().unwrap_or("");
            if name.is_empty() {
                let _ = bot
                    .send_message(msg.chat.id, "Please provide a name for the zip file.")
                    .await;
                return Ok(());
            }
            state
                .service
                .finalize_batch(user_id, chat_id, &sanitize_archive_name(name))
                .await
                .map(|_| ())
        }
        "cancel" => state.service.cancel_batch(user_id, chat_id).await,
        "start" | "help" => {
            let _ = bot.send_message(msg.chat.id, USAGE).await;
            return Ok(());
        }
        other => {
            let _ = bot
                .send_message(msg.chat.id, format!("Unknown command: /{other}\n\n{USAGE}"))
                .await;
            return Ok(());
        }
    };

    if let Err(e) = outcome {
        // User-state and size-limit errors were already reported to the user
        // by the service; everything else is unexpected.
        match e {
            qzb_core::Error::UserState(_) | qzb_core::Error::SizeLimit { .. } => {
                tracing::info!("command /{cmd} rejected for user {}: {e}", user_id.0);
            }
            other => {
                tracing::error!("command /{cmd} failed for user {}: {other}", user_id.0);
            }
        }
    }

    Ok(())
}
