//! Batch orchestration: the four operations the chat layer triggers, and the
//! finalize pipeline (resolve → size gate → download → append → deliver →
//! cleanup).

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    archive,
    audit::{AuditEvent, AuditLogger},
    config::Config,
    domain::{ChatId, FileRef, ResolvedFile, UserId},
    downloader,
    errors::Error,
    session::SessionTracker,
    transport::FileTransport,
    Result,
};

pub const ARCHIVE_EXTENSION: &str = ".zip";

pub const MSG_BATCH_STARTED: &str = "OK, send me some files.";
pub const MSG_NO_BATCH: &str = "You must use /add first.";
pub const MSG_NO_FILES: &str = "You must send me some files first.";
pub const MSG_SIZE_LIMIT: &str = "Total filesize must not exceed 2.0 GB.";
pub const MSG_BATCH_CANCELED: &str = "Batch canceled.";
pub const MSG_BATCH_FAILED: &str = "Something went wrong while building your archive. Please try again.";

/// Drives one user's collect-then-archive workflow end to end.
///
/// Sessions and storage directories are independent per user; concurrent
/// batches for different users only share the session map.
pub struct BatchService {
    cfg: Arc<Config>,
    transport: Arc<dyn FileTransport>,
    sessions: SessionTracker,
    audit: AuditLogger,
}

impl BatchService {
    /// The session store is constructed once at process start and handed in,
    /// so there is no hidden process-wide state.
    pub fn new(
        cfg: Arc<Config>,
        transport: Arc<dyn FileTransport>,
        sessions: SessionTracker,
    ) -> Self {
        let audit = AuditLogger::new(cfg.audit_log_path.clone(), cfg.audit_log_json);
        Self {
            cfg,
            transport,
            sessions,
            audit,
        }
    }

    /// `/add` — (re)open a batch for the user.
    pub async fn begin_batch(&self, user_id: UserId, chat_id: ChatId) -> Result<()> {
        self.sessions.start(user_id).await;
        self.audit_write(AuditEvent::batch_started(user_id.0));
        self.transport.notify(chat_id, MSG_BATCH_STARTED).await
    }

    /// A file arrived. Recorded only while a batch is open; silently ignored
    /// otherwise. Returns whether it was recorded.
    pub async fn record_file(&self, user_id: UserId, reference: FileRef) -> bool {
        let name = reference.suggested_name.clone();
        let recorded = self.sessions.record(user_id, reference).await;
        if recorded {
            self.audit_write(AuditEvent::file_recorded(user_id.0, name.as_deref()));
        }
        recorded
    }

    /// `/cancel` — discard the open batch, if any. Idempotent.
    pub async fn cancel_batch(&self, user_id: UserId, chat_id: ChatId) -> Result<()> {
        self.sessions.cancel(user_id).await;
        self.audit_write(AuditEvent::batch_canceled(user_id.0));
        self.transport.notify(chat_id, MSG_BATCH_CANCELED).await
    }

    /// `/zip <name>` — download everything recorded for the user, bundle it
    /// into `<name>.zip`, deliver it, and clean up.
    ///
    /// Any failure past the precondition checks clears the session and the
    /// scoped storage directory, and the user gets exactly one notification.
    pub async fn finalize_batch(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        archive_name: &str,
    ) -> Result<PathBuf> {
        if !self.sessions.has_open(user_id).await {
            self.transport.notify(chat_id, MSG_NO_BATCH).await?;
            return Err(Error::UserState(format!(
                "no open batch for user {}",
                user_id.0
            )));
        }
        if self.sessions.is_empty(user_id).await {
            // The batch stays open so the user can keep sending files.
            self.transport.notify(chat_id, MSG_NO_FILES).await?;
            return Err(Error::UserState(format!(
                "batch for user {} has no files",
                user_id.0
            )));
        }

        // From here on the session is consumed: a concurrent `/cancel` (or a
        // failure below) both land on `NoSession`.
        let refs = self.sessions.take(user_id).await?;
        let file_count = refs.len();

        let result = self.run_batch(user_id, chat_id, archive_name, refs).await;
        match &result {
            Ok((path, total_bytes)) => {
                self.audit_write(AuditEvent::batch_finalized(
                    user_id.0,
                    &path.file_name().unwrap_or_default().to_string_lossy(),
                    file_count,
                    *total_bytes,
                ));
            }
            Err(e) => {
                self.audit_write(AuditEvent::batch_failed(user_id.0, &e.to_string()));
                let text = match e {
                    Error::SizeLimit { .. } => MSG_SIZE_LIMIT,
                    _ => MSG_BATCH_FAILED,
                };
                // Best-effort: a notify failure must not mask the batch error.
                if let Err(notify_err) = self.transport.notify(chat_id, text).await {
                    tracing::warn!("failed to notify user {}: {notify_err}", user_id.0);
                }
            }
        }

        result.map(|(path, _)| path)
    }

    /// Steps 1–6 of finalize. Storage cleanup runs on every exit path once
    /// the scoped directory exists.
    async fn run_batch(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        archive_name: &str,
        refs: Vec<FileRef>,
    ) -> Result<(PathBuf, u64)> {
        // 1. Resolve sizes and gate on the aggregate limit before any
        //    download starts or any directory exists.
        let mut resolved = Vec::with_capacity(refs.len());
        let mut total_bytes: u64 = 0;
        for reference in refs {
            let meta = self.transport.resolve_reference(&reference).await?;
            total_bytes = total_bytes.saturating_add(meta.size_bytes);
            resolved.push(ResolvedFile { reference, meta });
        }
        if total_bytes > self.cfg.max_batch_bytes {
            return Err(Error::SizeLimit {
                total: total_bytes,
                max: self.cfg.max_batch_bytes,
            });
        }

        // 2. Scoped working directory, keyed by user so concurrent batches
        //    for other users never collide.
        let batch_dir = self.cfg.storage_root.join(user_id.0.to_string());
        tokio::fs::create_dir_all(&batch_dir).await?;

        let outcome = self
            .download_and_assemble(chat_id, archive_name, resolved, &batch_dir)
            .await;

        remove_batch_dir(&batch_dir).await;

        outcome.map(|path| (path, total_bytes))
    }

    /// Steps 3–5: bounded downloads streaming into strictly serialized
    /// appends, then delivery.
    async fn download_and_assemble(
        &self,
        chat_id: ChatId,
        archive_name: &str,
        resolved: Vec<ResolvedFile>,
        batch_dir: &Path,
    ) -> Result<PathBuf> {
        let archive_path = batch_dir.join(format!("{archive_name}{ARCHIVE_EXTENSION}"));

        let mut completed = downloader::download_all(
            Arc::clone(&self.transport),
            resolved,
            self.cfg.concurrency_limit,
            batch_dir.to_path_buf(),
        );

        // Downloads finish in any order; appends happen one at a time, in
        // completion order, on the blocking pool.
        while let Some(item) = completed.recv().await {
            let local_path = item?;
            let container = archive_path.clone();
            tokio::task::spawn_blocking(move || archive::append_entry(&container, &local_path))
                .await
                .map_err(|e| Error::ArchiveWrite(format!("append task failed: {e}")))??;
        }

        self.transport.deliver_file(chat_id, &archive_path).await?;
        Ok(archive_path)
    }

    fn audit_write(&self, event: AuditEvent) {
        if let Err(e) = self.audit.write(event) {
            tracing::warn!("failed to write audit event: {e}");
        }
    }
}

/// Remove the per-user batch directory (downloads and archive included).
///
/// Best-effort: a failure here is logged and never replaces the batch
/// outcome. Runs on the blocking pool so a large recursive delete cannot
/// stall other users' sessions.
async fn remove_batch_dir(dir: &Path) {
    let dir = dir.to_path_buf();
    let shown = dir.display().to_string();
    match tokio::task::spawn_blocking(move || std::fs::remove_dir_all(&dir)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("failed to remove batch dir {shown}: {e}"),
        Err(e) => tracing::warn!("cleanup task for {shown} failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FileMeta;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const USER: UserId = UserId(100);
    const CHAT: ChatId = ChatId(100);

    /// Fake chat platform backed by an in-memory file store. Delivery reads
    /// the archive immediately (before cleanup deletes it) and records its
    /// entries, mirroring how the real transport uploads the file.
    #[derive(Default)]
    struct FakeTransport {
        files: HashMap<String, Vec<u8>>,
        names: HashMap<String, String>,
        fail_download_id: Option<String>,
        fail_resolve: bool,
        fail_delivery: bool,
        downloads_started: AtomicUsize,
        delivered: Mutex<Vec<(String, Vec<(String, Vec<u8>)>)>>,
        notices: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn with_file(mut self, id: &str, name: &str, content: &[u8]) -> Self {
            self.files.insert(id.to_string(), content.to_vec());
            self.names.insert(id.to_string(), name.to_string());
            self
        }

        fn notices(&self) -> Vec<String> {
            self.notices.lock().unwrap().clone()
        }

        fn delivered(&self) -> Vec<(String, Vec<(String, Vec<u8>)>)> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FileTransport for FakeTransport {
        async fn resolve_reference(&self, reference: &FileRef) -> Result<FileMeta> {
            if self.fail_resolve {
                return Err(Error::Transfer("metadata fetch failed".to_string()));
            }
            let content = self
                .files
                .get(&reference.id)
                .ok_or_else(|| Error::Transfer(format!("unknown reference {}", reference.id)))?;
            Ok(FileMeta {
                size_bytes: content.len() as u64,
                suggested_name: self.names.get(&reference.id).cloned(),
            })
        }

        async fn download_to(&self, reference: &FileRef, dest: &Path) -> Result<PathBuf> {
            self.downloads_started.fetch_add(1, Ordering::SeqCst);
            if self.fail_download_id.as_deref() == Some(reference.id.as_str()) {
                return Err(Error::Transfer(format!("remote gone: {}", reference.id)));
            }
            let content = self
                .files
                .get(&reference.id)
                .ok_or_else(|| Error::Transfer(format!("unknown reference {}", reference.id)))?;
            std::fs::write(dest, content)?;
            Ok(dest.to_path_buf())
        }

        async fn deliver_file(&self, _chat_id: ChatId, path: &Path) -> Result<()> {
            if self.fail_delivery {
                return Err(Error::Transfer("upload rejected".to_string()));
            }
            let f = std::fs::File::open(path)?;
            let mut zip =
                zip::ZipArchive::new(f).map_err(|e| Error::External(format!("zip: {e}")))?;
            let mut entries = Vec::new();
            for i in 0..zip.len() {
                let mut entry = zip
                    .by_index(i)
                    .map_err(|e| Error::External(format!("zip: {e}")))?;
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                entries.push((entry.name().to_string(), data));
            }
            let archive_name = path.file_name().unwrap_or_default().to_string_lossy();
            self.delivered
                .lock()
                .unwrap()
                .push((archive_name.to_string(), entries));
            Ok(())
        }

        async fn notify(&self, _chat_id: ChatId, text: &str) -> Result<()> {
            self.notices.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn test_config(storage_root: &Path) -> Arc<Config> {
        Arc::new(Config {
            telegram_bot_token: "x".to_string(),
            telegram_allowed_users: vec![],
            concurrency_limit: 3,
            storage_root: storage_root.to_path_buf(),
            max_batch_bytes: 2_000_000_000,
            audit_log_path: storage_root.join("audit.log"),
            audit_log_json: true,
        })
    }

    fn tmp_root(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis();
        let pid = std::process::id();
        let dir = PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn reference(id: &str) -> FileRef {
        FileRef {
            id: id.to_string(),
            suggested_name: None,
        }
    }

    fn service(root: &Path, transport: Arc<FakeTransport>) -> BatchService {
        BatchService::new(test_config(root), transport, SessionTracker::new())
    }

    #[tokio::test]
    async fn finalize_builds_archive_delivers_and_cleans_up() {
        let root = tmp_root("qzb-batch-ok");
        let transport = Arc::new(
            FakeTransport::default()
                .with_file("m1", "beach.jpg", b"sand")
                .with_file("m2", "sunset.jpg", b"orange sky"),
        );
        let svc = service(&root, transport.clone());

        svc.begin_batch(USER, CHAT).await.unwrap();
        assert!(svc.record_file(USER, reference("m1")).await);
        assert!(svc.record_file(USER, reference("m2")).await);

        svc.finalize_batch(USER, CHAT, "vacation").await.unwrap();

        let delivered = transport.delivered();
        assert_eq!(delivered.len(), 1);
        let (archive_name, entries) = &delivered[0];
        assert_eq!(archive_name, "vacation.zip");

        // Entry order follows completion order; the entry set is fixed.
        let mut names: Vec<_> = entries.iter().map(|(n, _)| n.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["beach.jpg", "sunset.jpg"]);
        let total: usize = entries.iter().map(|(_, d)| d.len()).sum();
        assert_eq!(total, b"sand".len() + b"orange sky".len());

        // Storage and session are both gone.
        assert!(!root.join("100").exists());
        assert!(matches!(
            svc.finalize_batch(USER, CHAT, "again").await,
            Err(Error::UserState(_))
        ));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn size_limit_blocks_before_any_download() {
        let root = tmp_root("qzb-batch-size");
        let transport = Arc::new(
            FakeTransport::default()
                .with_file("m1", "a.bin", &[0u8; 600])
                .with_file("m2", "b.bin", &[0u8; 600]),
        );
        let svc = BatchService::new(
            Arc::new(Config {
                max_batch_bytes: 1_000,
                ..(*test_config(&root)).clone()
            }),
            transport.clone(),
            SessionTracker::new(),
        );

        svc.begin_batch(USER, CHAT).await.unwrap();
        svc.record_file(USER, reference("m1")).await;
        svc.record_file(USER, reference("m2")).await;

        let err = svc.finalize_batch(USER, CHAT, "huge").await.unwrap_err();
        assert!(matches!(err, Error::SizeLimit { total: 1200, .. }));

        assert_eq!(transport.downloads_started.load(Ordering::SeqCst), 0);
        assert!(!root.join("100").exists());
        assert!(transport.notices().iter().any(|n| n == MSG_SIZE_LIMIT));

        // The failed finalize cleared the session.
        assert!(!svc.record_file(USER, reference("m1")).await);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn finalize_without_begin_reports_user_state() {
        let root = tmp_root("qzb-batch-nobatch");
        let transport = Arc::new(FakeTransport::default());
        let svc = service(&root, transport.clone());

        let err = svc.finalize_batch(USER, CHAT, "x").await.unwrap_err();
        assert!(matches!(err, Error::UserState(_)));
        assert!(transport.notices().iter().any(|n| n == MSG_NO_BATCH));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn finalize_empty_batch_keeps_it_open() {
        let root = tmp_root("qzb-batch-empty");
        let transport = Arc::new(FakeTransport::default().with_file("m1", "late.txt", b"hi"));
        let svc = service(&root, transport.clone());

        svc.begin_batch(USER, CHAT).await.unwrap();
        let err = svc.finalize_batch(USER, CHAT, "x").await.unwrap_err();
        assert!(matches!(err, Error::UserState(_)));
        assert!(transport.notices().iter().any(|n| n == MSG_NO_FILES));

        // The user can still add files and finalize.
        assert!(svc.record_file(USER, reference("m1")).await);
        svc.finalize_batch(USER, CHAT, "late").await.unwrap();
        assert_eq!(transport.delivered().len(), 1);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn failed_download_aborts_cleans_up_and_notifies_once() {
        let root = tmp_root("qzb-batch-dlfail");
        let transport = Arc::new(
            FakeTransport {
                fail_download_id: Some("m2".to_string()),
                ..Default::default()
            }
            .with_file("m1", "ok.txt", b"fine")
            .with_file("m2", "bad.txt", b"nope")
            .with_file("m3", "also.txt", b"fine too"),
        );
        let svc = service(&root, transport.clone());

        svc.begin_batch(USER, CHAT).await.unwrap();
        for id in ["m1", "m2", "m3"] {
            svc.record_file(USER, reference(id)).await;
        }

        let err = svc.finalize_batch(USER, CHAT, "broken").await.unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));

        assert!(transport.delivered().is_empty());
        assert!(!root.join("100").exists());
        let failure_notices = transport
            .notices()
            .iter()
            .filter(|n| *n == MSG_BATCH_FAILED)
            .count();
        assert_eq!(failure_notices, 1);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn failed_resolution_cleans_up() {
        let root = tmp_root("qzb-batch-resfail");
        let transport = Arc::new(FakeTransport {
            fail_resolve: true,
            ..Default::default()
        });
        let svc = service(&root, transport.clone());

        svc.begin_batch(USER, CHAT).await.unwrap();
        svc.record_file(USER, reference("m1")).await;

        let err = svc.finalize_batch(USER, CHAT, "x").await.unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));
        assert!(!root.join("100").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn failed_append_cleans_up() {
        let root = tmp_root("qzb-batch-zipfail");
        let transport = Arc::new(FakeTransport::default().with_file("m1", "a.txt", b"abc"));
        let svc = service(&root, transport.clone());

        svc.begin_batch(USER, CHAT).await.unwrap();
        svc.record_file(USER, reference("m1")).await;

        // A directory squatting on the container path makes the append fail.
        std::fs::create_dir_all(root.join("100").join("blocked.zip")).unwrap();

        let err = svc.finalize_batch(USER, CHAT, "blocked").await.unwrap_err();
        assert!(matches!(err, Error::ArchiveWrite(_)));
        assert!(!root.join("100").exists());
        assert!(transport.delivered().is_empty());
        assert!(transport.notices().iter().any(|n| n == MSG_BATCH_FAILED));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn failed_delivery_still_cleans_up() {
        let root = tmp_root("qzb-batch-delivfail");
        let transport = Arc::new(
            FakeTransport {
                fail_delivery: true,
                ..Default::default()
            }
            .with_file("m1", "a.txt", b"abc"),
        );
        let svc = service(&root, transport.clone());

        svc.begin_batch(USER, CHAT).await.unwrap();
        svc.record_file(USER, reference("m1")).await;

        let err = svc.finalize_batch(USER, CHAT, "x").await.unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));
        assert!(!root.join("100").exists());
        assert!(transport.notices().iter().any(|n| n == MSG_BATCH_FAILED));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn files_sent_without_add_are_ignored() {
        let root = tmp_root("qzb-batch-noadd");
        let transport = Arc::new(FakeTransport::default().with_file("m1", "a.txt", b"abc"));
        let svc = service(&root, transport.clone());

        assert!(!svc.record_file(USER, reference("m1")).await);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn cancel_twice_equals_cancel_once() {
        let root = tmp_root("qzb-batch-cancel");
        let transport = Arc::new(FakeTransport::default());
        let svc = service(&root, transport.clone());

        svc.begin_batch(USER, CHAT).await.unwrap();
        svc.cancel_batch(USER, CHAT).await.unwrap();
        svc.cancel_batch(USER, CHAT).await.unwrap();

        assert!(!svc.record_file(USER, reference("m1")).await);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn concurrent_users_do_not_interfere() {
        let root = tmp_root("qzb-batch-multi");
        let transport = Arc::new(
            FakeTransport::default()
                .with_file("a1", "a.txt", b"user a")
                .with_file("b1", "b.txt", b"user b"),
        );
        let svc = Arc::new(service(&root, transport.clone()));

        let (user_a, chat_a) = (UserId(1), ChatId(1));
        let (user_b, chat_b) = (UserId(2), ChatId(2));

        svc.begin_batch(user_a, chat_a).await.unwrap();
        svc.begin_batch(user_b, chat_b).await.unwrap();
        svc.record_file(user_a, reference("a1")).await;
        svc.record_file(user_b, reference("b1")).await;

        let (ra, rb) = tokio::join!(
            svc.finalize_batch(user_a, chat_a, "mine"),
            svc.finalize_batch(user_b, chat_b, "yours"),
        );
        ra.unwrap();
        rb.unwrap();

        let delivered = transport.delivered();
        assert_eq!(delivered.len(), 2);
        assert!(!root.join("1").exists());
        assert!(!root.join("2").exists());

        let _ = std::fs::remove_dir_all(&root);
    }
}
