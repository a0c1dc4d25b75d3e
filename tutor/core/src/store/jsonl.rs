//! Checksummed JSON-lines store
//!
//! # Line Format
//!
//! ```text
//! <crc32 of json, 8 lowercase hex digits>\t<json MessageRecord>\n
//! ```
//!
//! Appends go straight to the end of the file. Removals rewrite the whole
//! file into a sibling temp file and rename it over the original.
//!
//! An unterminated final line is a write cut short by a crash: it is dropped
//! if it does not decode, and the file is rewritten without it. Any other
//! line that fails to parse or whose checksum does not match makes the file
//! corrupt: it is deleted and recreated empty.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{MessageRecord, MessageStore, StoreError};
use crate::character::CharacterId;
use crate::messages::MessageId;

/// Compute CRC32 checksum for a line payload
#[inline]
fn compute_checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

fn encode_line(record: &MessageRecord) -> Result<String, StoreError> {
    let json = serde_json::to_string(record)?;
    Ok(format!("{:08x}\t{json}\n", compute_checksum(json.as_bytes())))
}

/// Decode one line; the error describes why it was rejected
fn decode_line(line: &str) -> Result<MessageRecord, String> {
    let (checksum, json) = line
        .split_once('\t')
        .ok_or_else(|| "missing checksum separator".to_string())?;
    let expected =
        u32::from_str_radix(checksum, 16).map_err(|e| format!("bad checksum field: {e}"))?;
    let actual = compute_checksum(json.as_bytes());
    if expected != actual {
        return Err(format!(
            "checksum mismatch: expected {expected:08x}, got {actual:08x}"
        ));
    }
    serde_json::from_str(json).map_err(|e| format!("bad record: {e}"))
}

/// Decoded file contents
#[derive(Debug)]
struct Parsed {
    records: Vec<MessageRecord>,
    /// The file ended in a partial line and must be rewritten
    torn: bool,
}

/// Decode a whole file; the error carries the offending line number
fn parse(bytes: &[u8]) -> Result<Parsed, (usize, String)> {
    let (content, cut) = match std::str::from_utf8(bytes) {
        Ok(text) => (text, false),
        // Incomplete character at the very end
        Err(e) if e.error_len().is_none() => {
            let valid = std::str::from_utf8(&bytes[..e.valid_up_to()])
                .map_err(|e| (1, e.to_string()))?;
            (valid, true)
        }
        Err(e) => {
            let line = bytes[..e.valid_up_to()]
                .iter()
                .filter(|b| **b == b'\n')
                .count()
                + 1;
            return Err((line, "invalid UTF-8".to_string()));
        }
    };

    let torn = cut || !(content.is_empty() || content.ends_with('\n'));
    let lines: Vec<&str> = content.lines().collect();
    let last = lines.len().saturating_sub(1);

    let mut records = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match decode_line(line) {
            Ok(record) => records.push(record),
            Err(reason) if torn && i == last => {
                tracing::warn!(line = i + 1, reason = %reason, "Dropping torn final record");
            }
            Err(reason) => return Err((i + 1, reason)),
        }
    }

    Ok(Parsed { records, torn })
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replace the file at `path` with `records` (temp file + rename)
async fn write_records(path: &Path, records: &[MessageRecord]) -> Result<(), StoreError> {
    let mut content = String::new();
    for record in records {
        content.push_str(&encode_line(record)?);
    }

    let temp = temp_path_for(path);
    let mut file = fs::File::create(&temp).await?;
    file.write_all(content.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&temp, path).await?;
    Ok(())
}

/// Message store backed by a JSON-lines file
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    /// Cached file contents, in file order
    records: Mutex<Vec<MessageRecord>>,
}

impl JsonlStore {
    /// Open (or create) the store at `path`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file or its directory cannot be
    /// created. Corrupt content is not an error; the file is recreated.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let records = match fs::read(&path).await {
            Ok(bytes) => match parse(&bytes) {
                Ok(Parsed { records, torn: false }) => records,
                Ok(Parsed { records, torn: true }) => {
                    tracing::warn!(
                        path = %path.display(),
                        records = records.len(),
                        "Chat history ends in a partial write, truncating it"
                    );
                    write_records(&path, &records).await?;
                    records
                }
                Err((line_no, reason)) => {
                    tracing::warn!(
                        path = %path.display(),
                        line = line_no,
                        reason = %reason,
                        "Chat history is corrupt, recreating empty store"
                    );
                    fs::remove_file(&path).await?;
                    fs::File::create(&path).await?;
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::File::create(&path).await?;
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(
            path = %path.display(),
            records = records.len(),
            "Opened chat history"
        );

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Location of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file with `records`
    async fn rewrite(&self, records: &[MessageRecord]) -> Result<(), StoreError> {
        write_records(&self.path, records).await
    }
}

#[async_trait]
impl MessageStore for JsonlStore {
    async fn append(&self, record: MessageRecord) -> Result<(), StoreError> {
        let line = encode_line(&record)?;
        let mut records = self.records.lock().await;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let before = file.metadata().await?.len();

        let written = match file.write_all(line.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            // Keep the file ending on a whole line
            if let Err(rollback) = file.set_len(before).await {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "Failed to roll back partial append"
                );
            }
            return Err(e.into());
        }

        records.push(record);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<MessageRecord>, StoreError> {
        Ok(self.records.lock().await.clone())
    }

    async fn remove_many(&self, ids: &[MessageId]) -> Result<usize, StoreError> {
        let mut records = self.records.lock().await;
        let kept: Vec<MessageRecord> = records
            .iter()
            .filter(|r| !ids.contains(&r.id))
            .cloned()
            .collect();
        let removed = records.len() - kept.len();
        if removed > 0 {
            self.rewrite(&kept).await?;
            *records = kept;
        }
        Ok(removed)
    }

    async fn remove_character(&self, character: CharacterId) -> Result<usize, StoreError> {
        let mut records = self.records.lock().await;
        let kept: Vec<MessageRecord> = records
            .iter()
            .filter(|r| r.character != character)
            .cloned()
            .collect();
        let removed = records.len() - kept.len();
        if removed > 0 {
            self.rewrite(&kept).await?;
            *records = kept;
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        self.rewrite(&[]).await?;
        records.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.lock().await.len())
    }
}
