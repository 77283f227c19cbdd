//! Bounded-concurrency download scheduler.
//!
//! Given an ordered list of resolved references, keeps at most `limit`
//! transfers in flight and streams each completed local path to the consumer
//! in completion order (not submission order). The consumer can start acting
//! on the first finished file while later downloads are still running.

use std::{path::PathBuf, sync::Arc};

use tokio::{sync::mpsc, task::JoinSet};

use crate::{domain::ResolvedFile, errors::Error, transport::FileTransport, Result};

/// Start downloading `files` into `dest_dir` with at most `limit` concurrent
/// transfers. Completed paths arrive on the returned channel as each transfer
/// finishes; a failed transfer is sent as an error and ends the sequence
/// (remaining in-flight transfers are aborted).
pub fn download_all(
    transport: Arc<dyn FileTransport>,
    files: Vec<ResolvedFile>,
    limit: usize,
    dest_dir: PathBuf,
) -> mpsc::Receiver<Result<PathBuf>> {
    let limit = limit.max(1);
    let (tx, rx) = mpsc::channel(limit);
    tokio::spawn(drive(transport, files, limit, dest_dir, tx));
    rx
}

async fn drive(
    transport: Arc<dyn FileTransport>,
    files: Vec<ResolvedFile>,
    limit: usize,
    dest_dir: PathBuf,
    tx: mpsc::Sender<Result<PathBuf>>,
) {
    let mut next = 0usize;
    let mut in_flight: JoinSet<Result<PathBuf>> = JoinSet::new();

    loop {
        // Top up the in-flight set, in submission order.
        while in_flight.len() < limit && next < files.len() {
            let file = files[next].clone();
            let dest = dest_dir.join(file.local_name(next));
            let transport = Arc::clone(&transport);
            in_flight.spawn(async move { transport.download_to(&file.reference, &dest).await });
            next += 1;
        }

        // Whichever transfer finishes first is produced first.
        let Some(joined) = in_flight.join_next().await else {
            break;
        };
        let completed = joined.unwrap_or_else(|e| {
            Err(Error::Transfer(format!("download task failed: {e}")))
        });

        let failed = completed.is_err();
        if tx.send(completed).await.is_err() {
            break; // consumer hung up; dropping the set aborts the rest
        }
        if failed {
            break; // full abort: stop submitting, abort in-flight siblings
        }
    }
}
