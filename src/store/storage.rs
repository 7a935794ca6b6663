//! On-disk persistence for the message store.
//!
//! Two files live in the data directory:
//!
//! - `messages.csv` — the durable record log, append-only, one row per
//!   stored message. This is the source of truth.
//! - `vectors.bin` — the embedding cache, rebuildable from the log.
//!
//! vectors.bin format:
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - chat_id: i64 (little-endian)
//! - message_id: i32 (little-endian)
//! - embedding: [f32; dimensions] (little-endian)

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messages::{parse_date, Message, MessageKey};
use crate::store::index::VectorIndex;

/// Current vectors.bin format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// A message as persisted: the message itself plus the ingestion timestamp,
/// which is distinct from the message's own date.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub message: Message,
    pub created_at: DateTime<Utc>,
}

/// Errors that can occur during vectors.bin operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,
}

struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

/// Persistence for the embedding cache.
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the vector index from storage.
    ///
    /// Fails with `ModelMismatch`/`VersionMismatch` when the file was
    /// written by a different model or format; callers treat those as
    /// "start fresh and re-embed".
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<VectorIndex, VectorStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = Self::read_header(&mut reader)?;
        Self::validate_header(&header, expected_model_id, expected_dimensions)?;

        let mut index =
            VectorIndex::with_capacity(header.dimensions as usize, header.entry_count as usize);

        for _ in 0..header.entry_count {
            let (key, embedding) = Self::read_entry(&mut reader, header.dimensions as usize)?;
            // Skip entries that fail to insert (e.g., zero norm)
            let _ = index.insert(key, embedding);
        }

        Ok(index)
    }

    /// Write the full index to storage, replacing any previous file.
    pub fn save(&self, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
        let tmp_path = self.path.with_extension("bin.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);

            Self::write_header(&mut writer, index, model_id)?;
            for (key, embedding) in index.iter() {
                Self::write_entry(&mut writer, key, embedding)?;
            }
            writer.flush()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn read_header(reader: &mut impl Read) -> Result<Header, VectorStorageError> {
        let mut buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buf).map_err(|_| {
            VectorStorageError::InvalidFormat("file too short for header".to_string())
        })?;

        let version = buf[0];
        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&buf[1..33]);
        let dimensions = u16::from_le_bytes([buf[33], buf[34]]);
        let entry_count = u64::from_le_bytes(buf[35..43].try_into().expect("8 byte slice"));
        let checksum = u32::from_le_bytes(buf[43..47].try_into().expect("4 byte slice"));

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf[..43]);
        if hasher.finalize() != checksum {
            return Err(VectorStorageError::ChecksumMismatch);
        }

        Ok(Header {
            version,
            model_id,
            dimensions,
            entry_count,
        })
    }

    fn validate_header(
        header: &Header,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<(), VectorStorageError> {
        if header.version != FORMAT_VERSION {
            return Err(VectorStorageError::VersionMismatch(
                header.version,
                FORMAT_VERSION,
            ));
        }
        if &header.model_id != expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }
        if header.dimensions as usize != expected_dimensions {
            // A dimension change without a model change should not happen;
            // treat it the same as a model swap.
            return Err(VectorStorageError::ModelMismatch);
        }
        Ok(())
    }

    fn write_header(
        writer: &mut impl Write,
        index: &VectorIndex,
        model_id: &[u8; 32],
    ) -> Result<(), VectorStorageError> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.push(FORMAT_VERSION);
        buf.extend_from_slice(model_id);
        buf.extend_from_slice(&(index.dimensions() as u16).to_le_bytes());
        buf.extend_from_slice(&(index.len() as u64).to_le_bytes());

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf);
        buf.extend_from_slice(&hasher.finalize().to_le_bytes());

        writer.write_all(&buf)?;
        Ok(())
    }

    fn read_entry(
        reader: &mut impl Read,
        dimensions: usize,
    ) -> Result<(MessageKey, Vec<f32>), VectorStorageError> {
        let mut chat_id = [0u8; 8];
        reader.read_exact(&mut chat_id)?;
        let mut message_id = [0u8; 4];
        reader.read_exact(&mut message_id)?;

        let mut raw = vec![0u8; dimensions * 4];
        reader.read_exact(&mut raw)?;
        let embedding = raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().expect("4 byte chunk")))
            .collect();

        Ok((
            MessageKey {
                chat_id: i64::from_le_bytes(chat_id),
                message_id: i32::from_le_bytes(message_id),
            },
            embedding,
        ))
    }

    fn write_entry(
        writer: &mut impl Write,
        key: MessageKey,
        embedding: &[f32],
    ) -> Result<(), VectorStorageError> {
        writer.write_all(&key.chat_id.to_le_bytes())?;
        writer.write_all(&key.message_id.to_le_bytes())?;
        for value in embedding {
            writer.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    }
}

/// One row of messages.csv. Optional fields are flattened to empty strings
/// because the csv crate round-trips plain strings most predictably.
#[derive(Debug, Serialize, Deserialize)]
struct LogRow {
    chat_id: i64,
    message_id: i32,
    chat_username: String,
    sender: String,
    date: String,
    created_at: String,
    text: String,
}

/// Append-only CSV log of stored messages.
pub struct MessageLog {
    path: PathBuf,
}

impl MessageLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read every record in the log. Malformed rows are skipped with a
    /// warning rather than failing the whole load.
    pub fn load(&self) -> Result<Vec<StoredRecord>, csv::Error> {
        if !self.exists() {
            return Ok(vec![]);
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut records = Vec::new();

        for row in reader.deserialize::<LogRow>() {
            let row = match row {
                Ok(row) => row,
                Err(err) => {
                    log::warn!("skipping malformed message log row: {err}");
                    continue;
                }
            };
            match Self::row_to_record(row) {
                Some(record) => records.push(record),
                None => log::warn!("skipping message log row with unparseable date"),
            }
        }

        Ok(records)
    }

    pub fn append(&self, record: &StoredRecord) -> Result<(), csv::Error> {
        let write_headers = !self.exists();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(csv::Error::from)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_headers)
            .from_writer(file);

        writer.serialize(Self::record_to_row(record))?;
        writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }

    fn record_to_row(record: &StoredRecord) -> LogRow {
        LogRow {
            chat_id: record.message.chat_id,
            message_id: record.message.message_id,
            chat_username: record.message.chat_username.clone().unwrap_or_default(),
            sender: record.message.sender.clone(),
            date: record.message.date.to_rfc3339(),
            created_at: record.created_at.to_rfc3339(),
            text: record.message.text.clone(),
        }
    }

    fn row_to_record(row: LogRow) -> Option<StoredRecord> {
        let date = parse_date(&row.date)?;
        let created_at = parse_date(&row.created_at)?;
        Some(StoredRecord {
            message: Message {
                message_id: row.message_id,
                chat_id: row.chat_id,
                chat_username: (!row.chat_username.is_empty()).then_some(row.chat_username),
                text: row.text,
                sender: row.sender,
                date,
            },
            created_at,
        })
    }
}
