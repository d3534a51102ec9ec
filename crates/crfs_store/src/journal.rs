//! Operation journal: the on-disk form of one filesystem's log.
//!
//! A journal is a sequence of batch records. Every `push_state` that adds
//! at least one new hash becomes exactly one record, so a batch is either
//! entirely present after a crash or entirely absent.
//!
//! ## Record format
//!
//! ```text
//! magic "COPL" (4) | version u16 LE (2) | body_len u32 LE (4)
//! header_crc u32 LE (4)   over magic, version and body_len
//! body: count u32 LE (4) | count x { len u16 LE (2) | hash bytes (len) }
//! crc32 LE (4)   over header and body
//! ```
//!
//! A record is torn only when its header is cut short, or when its
//! declared length runs past the end of the journal, or when it is the
//! last record and fails its checksum. Torn records are dropped on open.
//! Any other damage is reported as corruption.

use crate::backend::StorageBackend;
use crate::error::{StoreError, StoreResult};
use crfs_protocol::OpHash;

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"COPL";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 2;

/// magic (4) + version (2) + body_len (4) + header_crc (4)
const HEADER_SIZE: usize = 14;

/// Bytes covered by the header checksum.
const HEADER_CHECKED: usize = 10;

const CRC_SIZE: usize = 4;

/// A decoded batch record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    /// Offset of the record in the journal.
    pub offset: u64,
    /// Hashes added by the batch, in push order.
    pub hashes: Vec<OpHash>,
}

/// Result of scanning a journal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalScan {
    /// Every intact record.
    pub records: Vec<BatchRecord>,
    /// Length of the intact prefix.
    pub valid_len: u64,
    /// Bytes after the intact prefix belonging to a torn final record.
    pub torn_bytes: u64,
}

impl JournalScan {
    /// Iterates over all hashes in journal order.
    pub fn hashes(&self) -> impl Iterator<Item = &OpHash> {
        self.records.iter().flat_map(|r| r.hashes.iter())
    }
}

/// Encodes one batch record.
///
/// # Errors
///
/// Returns an error for an empty batch or a batch too large for the
/// length fields.
pub fn encode_batch(hashes: &[OpHash]) -> StoreResult<Vec<u8>> {
    if hashes.is_empty() {
        return Err(StoreError::corrupted("refusing to encode an empty batch"));
    }
    let count = u32::try_from(hashes.len())
        .map_err(|_| StoreError::corrupted("batch has too many hashes"))?;

    let body_len: usize = 4 + hashes.iter().map(|h| 2 + h.len()).sum::<usize>();
    let body_len_field = u32::try_from(body_len)
        .map_err(|_| StoreError::corrupted("batch too large for journal"))?;
    let mut data = Vec::with_capacity(HEADER_SIZE + body_len + CRC_SIZE);

    data.extend_from_slice(&JOURNAL_MAGIC);
    data.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
    data.extend_from_slice(&body_len_field.to_le_bytes());
    let header_crc = compute_crc32(&data);
    data.extend_from_slice(&header_crc.to_le_bytes());

    data.extend_from_slice(&count.to_le_bytes());
    for hash in hashes {
        // OpHash::MAX_LEN keeps this in range
        let len = u16::try_from(hash.len())
            .map_err(|_| StoreError::corrupted("hash too long for journal"))?;
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(hash.as_bytes());
    }

    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());

    Ok(data)
}

/// Scans raw journal bytes.
///
/// # Errors
///
/// Returns [`StoreError::Corrupted`] if a record other than the last one is
/// damaged, or if any record header is damaged.
pub fn scan(bytes: &[u8]) -> StoreResult<JournalScan> {
    let mut scan = JournalScan::default();
    let mut offset = 0usize;

    while offset < bytes.len() {
        match decode_record(&bytes[offset..]) {
            Decoded::Record { hashes, len } => {
                scan.records.push(BatchRecord {
                    offset: offset as u64,
                    hashes,
                });
                offset += len;
            }
            Decoded::Torn => {
                scan.torn_bytes = (bytes.len() - offset) as u64;
                break;
            }
            Decoded::Corrupt(reason) => {
                return Err(StoreError::corrupted(format!(
                    "journal record at offset {offset}: {reason}"
                )));
            }
        }
    }

    scan.valid_len = offset as u64;
    Ok(scan)
}

enum Decoded {
    Record { hashes: Vec<OpHash>, len: usize },
    Torn,
    Corrupt(String),
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn decode_record(buf: &[u8]) -> Decoded {
    if buf.len() < HEADER_SIZE {
        return if JOURNAL_MAGIC.starts_with(&buf[..buf.len().min(4)]) {
            Decoded::Torn
        } else {
            Decoded::Corrupt("invalid magic".into())
        };
    }

    if buf[0..4] != JOURNAL_MAGIC {
        return Decoded::Corrupt("invalid magic".into());
    }
    if compute_crc32(&buf[..HEADER_CHECKED]) != read_u32(buf, HEADER_CHECKED) {
        return Decoded::Corrupt("header checksum mismatch".into());
    }

    let version = u16::from_le_bytes([buf[4], buf[5]]);
    if version != JOURNAL_VERSION {
        return Decoded::Corrupt(format!("unsupported version {version}"));
    }

    let body_len = read_u32(buf, 6) as usize;
    let body_end = HEADER_SIZE.saturating_add(body_len);
    let record_len = body_end.saturating_add(CRC_SIZE);
    if record_len > buf.len() {
        return Decoded::Torn;
    }

    if compute_crc32(&buf[..body_end]) != read_u32(buf, body_end) {
        // a bad checksum on the last record is a torn write
        return if record_len == buf.len() {
            Decoded::Torn
        } else {
            Decoded::Corrupt("checksum mismatch".into())
        };
    }

    match decode_body(&buf[HEADER_SIZE..body_end]) {
        Ok(hashes) => Decoded::Record {
            hashes,
            len: record_len,
        },
        Err(reason) => Decoded::Corrupt(reason),
    }
}

fn decode_body(body: &[u8]) -> Result<Vec<OpHash>, String> {
    if body.len() < 4 {
        return Err("body too short".into());
    }
    let count = read_u32(body, 0) as usize;
    let mut cursor = 4;
    let mut hashes = Vec::with_capacity(count.min(4096));

    for _ in 0..count {
        if cursor + 2 > body.len() {
            return Err("hash count exceeds body".into());
        }
        let len = u16::from_le_bytes([body[cursor], body[cursor + 1]]) as usize;
        cursor += 2;
        if cursor + len > body.len() {
            return Err("hash length exceeds body".into());
        }
        let hash = OpHash::new(body[cursor..cursor + len].to_vec()).map_err(|e| e.to_string())?;
        hashes.push(hash);
        cursor += len;
    }

    if cursor != body.len() {
        return Err(format!("{} trailing body bytes", body.len() - cursor));
    }
    Ok(hashes)
}

/// Appends batches to a backend and replays them on open.
pub struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_write: bool,
}

impl Journal {
    /// Opens a journal, dropping a torn tail record if present.
    ///
    /// Returns the journal together with the result of the replay scan.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal is corrupted or cannot be read.
    pub fn open(
        mut backend: Box<dyn StorageBackend>,
        sync_on_write: bool,
    ) -> StoreResult<(Self, JournalScan)> {
        let bytes = backend.read_all()?;
        let scan = scan(&bytes)?;

        if scan.torn_bytes > 0 {
            tracing::warn!(
                valid_len = scan.valid_len,
                torn_bytes = scan.torn_bytes,
                "dropping torn journal tail"
            );
            backend.truncate(scan.valid_len)?;
        }

        Ok((
            Self {
                backend,
                sync_on_write,
            },
            scan,
        ))
    }

    /// Appends one batch as a single record.
    ///
    /// If the write fails, the journal is cut back to its previous length so
    /// later records are not stranded behind a partial one.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding, writing or syncing fails.
    pub fn append(&mut self, hashes: &[OpHash]) -> StoreResult<()> {
        let record = encode_batch(hashes)?;
        let before = self.backend.size()?;

        let result = self.backend.append(&record).and_then(|_| {
            if self.sync_on_write {
                self.backend.sync()
            } else {
                Ok(())
            }
        });

        if let Err(e) = result {
            if let Err(rollback) = self.backend.truncate(before) {
                tracing::error!(error = %rollback, "failed to roll back partial journal record");
            }
            return Err(e);
        }

        Ok(())
    }

    /// Returns the journal size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn size(&self) -> StoreResult<u64> {
        self.backend.size()
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

/// Computes CRC-32 (IEEE polynomial).
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
