use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use qzb_core::{
    batch::BatchService, config::Config, session::SessionTracker, transport::FileTransport,
};

use crate::{handlers, TelegramTransport};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub service: Arc<BatchService>,
}

pub async fn run_polling(cfg: Arc<Config>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    if let Ok(me) = bot.get_me().await {
        tracing::info!("quick-zip-bot started: @{}", me.username());
    }
    tracing::info!("storage root: {}", cfg.storage_root.display());
    tracing::info!(
        "download concurrency: {}, max batch bytes: {}",
        cfg.concurrency_limit,
        cfg.max_batch_bytes
    );
    if cfg.telegram_allowed_users.is_empty() {
        tracing::info!("no allowlist configured; bot is open to all users");
    } else {
        tracing::info!("allowed users: {}", cfg.telegram_allowed_users.len());
    }

    let transport: Arc<dyn FileTransport> = Arc::new(TelegramTransport::new(bot.clone()));
    let service = Arc::new(BatchService::new(
        cfg.clone(),
        transport,
        SessionTracker::new(),
    ));

    let state = Arc::new(AppState { cfg, service });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
