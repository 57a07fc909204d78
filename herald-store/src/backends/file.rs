use std::path::{Path, PathBuf};

use async_trait::async_trait;
use herald_common::{CampaignId, DeliveryAttempt, internal, tracing::warn};
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};

use crate::{
    AuditError,
    r#trait::{AuditLog, sort_for_report},
};

/// Audit log stored as JSON lines
///
/// Every append is written and `sync_data`ed under a mutex before it returns,
/// so records hit the disk one at a time and in the order they were appended.
/// Reads take the same mutex and never observe a half-written line.
///
/// Only the last line can be cut short, by a crash mid-write. Opening the log
/// removes such a line and reads skip it.
#[derive(Debug)]
pub struct FileAuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileAuditLog {
    /// Open (creating if needed) the log at `path`
    ///
    /// # Errors
    ///
    /// Returns an [`AuditError::Io`] if the parent directory cannot be created
    /// or the file cannot be opened for appending or repaired.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        repair_tail(&path, &mut file).await?;

        internal!("Audit log opened at {}", path.display());

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every record in the file, in append order
    ///
    /// An unterminated last line that does not decode is skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a complete line does not decode.
    pub async fn records(&self) -> Result<Vec<DeliveryAttempt>, AuditError> {
        let _guard = self.file.lock().await;
        let content = tokio::fs::read(&self.path).await?;
        let (complete, tail) = split_tail(&content);

        let mut records = complete
            .split(|byte| *byte == b'\n')
            .filter(|line| !is_blank(line))
            .map(|line| serde_json::from_slice(line).map_err(AuditError::from))
            .collect::<Result<Vec<DeliveryAttempt>, _>>()?;

        if !is_blank(tail) {
            match serde_json::from_slice(tail) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Skipping torn record at the end of the audit log"
                ),
            }
        }

        Ok(records)
    }
}

/// Make sure the file ends on a line boundary
///
/// A complete record that lost its newline gets one back, anything else after
/// the last newline is cut off.
async fn repair_tail(path: &Path, file: &mut File) -> Result<(), AuditError> {
    let content = tokio::fs::read(path).await?;
    let (complete, tail) = split_tail(&content);
    if tail.is_empty() {
        return Ok(());
    }

    if serde_json::from_slice::<DeliveryAttempt>(tail).is_ok() {
        write_line(file, b"\n").await?;
        return Ok(());
    }

    warn!(
        path = %path.display(),
        bytes = tail.len(),
        "Discarding torn record at the end of the audit log"
    );
    file.set_len(complete.len() as u64).await?;
    file.sync_data().await?;
    Ok(())
}

/// Split `content` after its last newline
fn split_tail(content: &[u8]) -> (&[u8], &[u8]) {
    let end = content
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map_or(0, |newline| newline + 1);
    content.split_at(end)
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

#[async_trait]
impl AuditLog for FileAuditLog {
    async fn append(&self, attempt: &DeliveryAttempt) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(attempt)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        let length = file.metadata().await?.len();
        if let Err(e) = write_line(&mut file, &line).await {
            // Later appends must not land on the end of a partial line
            if let Err(truncate) = file.set_len(length).await {
                warn!(
                    path = %self.path.display(),
                    error = %truncate,
                    "Could not remove a partial audit record"
                );
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn attempts(&self, campaign: CampaignId) -> Result<Vec<DeliveryAttempt>, AuditError> {
        let mut attempts: Vec<_> = self
            .records()
            .await?
            .into_iter()
            .filter(|attempt| attempt.campaign_id() == campaign)
            .collect();
        sort_for_report(&mut attempts);
        Ok(attempts)
    }
}

async fn write_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}
