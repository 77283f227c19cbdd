/// Core error type for the bot.
///
/// The adapter crate maps its platform errors into this type so the batch
/// pipeline can handle failures consistently (user-facing message vs fatal).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("user state error: {0}")]
    UserState(String),

    #[error("batch size limit exceeded: {total} bytes (max {max})")]
    SizeLimit { total: u64, max: u64 },

    #[error("transfer error: {0}")]
    Transfer(String),

    #[error("archive write error: {0}")]
    ArchiveWrite(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
