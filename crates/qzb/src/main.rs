use std::sync::Arc;

use qzb_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), qzb_core::Error> {
    qzb_core::logging::init("qzb");

    let cfg = Arc::new(Config::load()?);

    qzb_telegram::router::run_polling(cfg)
        .await
        .map_err(|e| qzb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
