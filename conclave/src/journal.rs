//! JSON-lines durability sink for ledgers.

use async_trait::async_trait;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use charter::{LedgerRecord, LedgerSink, SinkError};

/// Appends each sealed record as one JSON line and flushes before confirming.
pub struct JsonlSink<T> {
    path: PathBuf,
    file: Mutex<File>,
    _record: PhantomData<fn(T)>,
}

impl<T> JsonlSink<T> {
    /// Open (or create) a journal file in append mode.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        debug!(path = %path.display(), "Journal opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
            _record: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<T> LedgerSink<T> for JsonlSink<T>
where
    T: Serialize + Send + Sync,
{
    async fn persist(&self, record: &LedgerRecord<T>) -> Result<(), SinkError> {
        let mut line =
            serde_json::to_vec(record).map_err(|e| SinkError::Rejected(e.to_string()))?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charter::AppendOnlyLedger;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_records_written_as_lines() {
        let dir = std::env::temp_dir().join(format!("conclave-journal-{}", charter::new_id()));
        let path = dir.join("witness.jsonl");
        let sink = Arc::new(JsonlSink::<String>::open(&path).await.unwrap());
        let ledger = AppendOnlyLedger::new("witness").with_sink(sink, Default::default());

        ledger.append("first".to_string()).await.unwrap();
        ledger.append("second".to_string()).await.unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let record: LedgerRecord<String> = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(record.seq, 2);
        assert!(record.verify());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
