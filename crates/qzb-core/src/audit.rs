//! Append-only audit log of user-visible batch events.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::{errors::Error, Result};

const AUDIT_MAX_TEXT: usize = 500;

/// RFC3339 timestamp in UTC (for logs/telemetry).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,
    pub user_id: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    fn base(event: &str, user_id: i64) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: event.to_string(),
            user_id,
            file_name: None,
            archive: None,
            file_count: None,
            total_bytes: None,
            error: None,
        }
    }

    pub fn batch_started(user_id: i64) -> Self {
        Self::base("batch_started", user_id)
    }

    pub fn file_recorded(user_id: i64, file_name: Option<&str>) -> Self {
        Self {
            file_name: file_name.map(|s| s.to_string()),
            ..Self::base("file_recorded", user_id)
        }
    }

    pub fn batch_finalized(
        user_id: i64,
        archive: &str,
        file_count: usize,
        total_bytes: u64,
    ) -> Self {
        Self {
            archive: Some(archive.to_string()),
            file_count: Some(file_count),
            total_bytes: Some(total_bytes),
            ..Self::base("batch_finalized", user_id)
        }
    }

    pub fn batch_canceled(user_id: i64) -> Self {
        Self::base("batch_canceled", user_id)
    }

    pub fn batch_failed(user_id: i64, error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::base("batch_failed", user_id)
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        // Truncate potentially large payloads.
        if let Some(s) = &event.error {
            event.error = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }
        if let Some(s) = &event.file_name {
            event.file_name = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        // Plain text format for readability.
        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            match v {
                serde_json::Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}
