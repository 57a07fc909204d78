use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{AuditError, AuditLog, FileAuditLog, MemoryAuditLog};

/// Which audit log to use
///
/// File-backed log in RON config:
/// ```ron
/// audit_log: File(
///     path: "/var/lib/herald/attempts.jsonl",
/// ),
/// ```
///
/// Memory-backed log, lost on exit:
/// ```ron
/// audit_log: Memory,
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub enum AuditLogConfig {
    File {
        path: PathBuf,
    },
    #[default]
    Memory,
}

impl AuditLogConfig {
    /// # Errors
    ///
    /// Fails if a file-backed log cannot be opened.
    pub async fn build(&self) -> Result<Arc<dyn AuditLog>, AuditError> {
        Ok(match self {
            Self::File { path } => Arc::new(FileAuditLog::open(path).await?),
            Self::Memory => Arc::new(MemoryAuditLog::new()),
        })
    }
}
