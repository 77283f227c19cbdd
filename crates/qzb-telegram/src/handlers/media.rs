use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use qzb_core::domain::{FileRef, UserId};

use crate::router::AppState;

/// Pull a downloadable file reference out of whatever media kind the message
/// carries. Photos pick the largest rendition; kinds Telegram names get that
/// name attached for the archive entry later.
fn file_ref_from_message(msg: &Message) -> Option<FileRef> {
    if let Some(doc) = msg.document() {
        return Some(FileRef {
            id: doc.file.id.clone(),
            suggested_name: doc.file_name.clone(),
        });
    }
    if let Some(video) = msg.video() {
        return Some(FileRef {
            id: video.file.id.clone(),
            suggested_name: video.file_name.clone(),
        });
    }
    if let Some(audio) = msg.audio() {
        return Some(FileRef {
            id: audio.file.id.clone(),
            suggested_name: audio.file_name.clone(),
        });
    }
    if let Some(animation) = msg.animation() {
        return Some(FileRef {
            id: animation.file.id.clone(),
            suggested_name: animation.file_name.clone(),
        });
    }
    if let Some(voice) = msg.voice() {
        return Some(FileRef {
            id: voice.file.id.clone(),
            suggested_name: None,
        });
    }
    if let Some(sizes) = msg.photo() {
        let best = sizes.iter().max_by_key(|p| p.file.size)?;
        return Some(FileRef {
            id: best.file.id.clone(),
            suggested_name: None,
        });
    }
    None
}

pub async fn handle_media(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    // Batches are a private-chat workflow; group media is not collected.
    if !msg.chat.is_private() {
        return Ok(());
    }
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(reference) = file_ref_from_message(&msg) else {
        return Ok(());
    };

    let user_id = UserId(user.id.0 as i64);
    let recorded = state.service.record_file(user_id, reference).await;
    if recorded {
        tracing::debug!("recorded file for user {}", user_id.0);
    }

    Ok(())
}
