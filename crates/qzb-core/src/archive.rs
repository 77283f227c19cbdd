//! Incremental zip container assembly.
//!
//! One batch produces one container; each completed download is appended as a
//! single stored entry named by its base file name. Calls for one container
//! must never overlap (the orchestrator serializes them and runs each on the
//! blocking pool).

use std::{fs, io, path::Path};

use zip::{write::FileOptions, CompressionMethod, ZipWriter};

use crate::{errors::Error, Result};

/// Append `source` to the container at `container`, creating the container on
/// first use. Synchronous, blocking disk I/O.
pub fn append_entry(container: &Path, source: &Path) -> Result<()> {
    let entry_name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            Error::ArchiveWrite(format!("source has no usable file name: {}", source.display()))
        })?;

    // Open the source before touching the container so a bad source leaves
    // the container untouched.
    let mut src = fs::File::open(source).map_err(|e| archive_io(source, e))?;

    let mut writer = if container.is_file() {
        let f = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(container)
            .map_err(|e| archive_io(container, e))?;
        ZipWriter::new_append(f).map_err(|e| Error::ArchiveWrite(format!("zip error: {e}")))?
    } else {
        let f = fs::File::create(container).map_err(|e| archive_io(container, e))?;
        ZipWriter::new(f)
    };

    // The container is a bundle, not a compressor; store entries verbatim.
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);
    writer
        .start_file(entry_name, options)
        .map_err(|e| Error::ArchiveWrite(format!("zip error: {e}")))?;

    io::copy(&mut src, &mut writer).map_err(|e| archive_io(container, e))?;

    writer
        .finish()
        .map_err(|e| Error::ArchiveWrite(format!("zip error: {e}")))?;
    Ok(())
}

fn archive_io(path: &Path, e: io::Error) -> Error {
    Error::ArchiveWrite(format!("{}: {e}", path.display()))
}
