/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Opaque handle to a remotely stored file, recorded when the user sends it.
///
/// The core never holds bytes until download time; size and final name are
/// resolved lazily through the transport port at finalize time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRef {
    pub id: String,
    pub suggested_name: Option<String>,
}

/// Remote metadata for a recorded reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMeta {
    pub size_bytes: u64,
    pub suggested_name: Option<String>,
}

/// A reference together with its resolved metadata, ready to download.
#[derive(Clone, Debug)]
pub struct ResolvedFile {
    pub reference: FileRef,
    pub meta: FileMeta,
}

impl ResolvedFile {
    /// File name the download should land under, preferring the resolved
    /// name over the one seen at record time. `index` disambiguates files
    /// that arrived with no name at all.
    pub fn local_name(&self, index: usize) -> String {
        self.meta
            .suggested_name
            .clone()
            .or_else(|| self.reference.suggested_name.clone())
            .unwrap_or_else(|| format!("file-{index}"))
    }
}
