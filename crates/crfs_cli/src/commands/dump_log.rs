//! Dump-log command implementation.

use crfs_protocol::FileSystemId;
use crfs_store::journal::{self, JournalScan};
use crfs_store::{FileBackend, JournalOperationLog, OperationLog, StorageBackend, OPLOG_DIR};
use serde::Serialize;
use std::path::Path;

/// Journal record representation for output.
#[derive(Debug, Serialize)]
pub struct BatchInfo {
    /// Filesystem the journal belongs to.
    pub fs: String,
    /// Offset in the journal file.
    pub offset: u64,
    /// Hashes in the batch, hex-encoded.
    pub hashes: Vec<String>,
}

/// Runs the dump-log command.
pub fn run(path: &Path, fs: Option<&str>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let oplog_dir = path.join(OPLOG_DIR);
    let filesystems = match fs {
        Some(fs) => vec![fs.parse::<FileSystemId>().map_err(|e| format!("filesystem id: {e}"))?],
        None => JournalOperationLog::open(&oplog_dir, false)?.filesystems()?,
    };

    let mut batches = Vec::new();
    for fs in filesystems {
        let journal_path = JournalOperationLog::journal_path(&oplog_dir, &fs);
        if !journal_path.exists() {
            return Err(format!("no journal for filesystem {fs}").into());
        }
        let scan = scan_file(&journal_path)?;
        if scan.torn_bytes > 0 {
            eprintln!("{fs}: {} byte(s) of incomplete trailing record", scan.torn_bytes);
        }
        batches.extend(describe(&fs, &scan));
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&batches)?);
        }
        _ => {
            print_text_output(&batches);
        }
    }

    Ok(())
}

/// Reads and parses a journal file without modifying it.
pub fn scan_file(path: &Path) -> Result<JournalScan, Box<dyn std::error::Error>> {
    let backend = FileBackend::open(path)?;
    Ok(journal::scan(&backend.read_all()?)?)
}

fn describe(fs: &FileSystemId, scan: &JournalScan) -> Vec<BatchInfo> {
    scan.records
        .iter()
        .map(|record| BatchInfo {
            fs: fs.to_string(),
            offset: record.offset,
            hashes: record.hashes.iter().map(|h| h.to_hex()).collect(),
        })
        .collect()
}

fn print_text_output(batches: &[BatchInfo]) {
    if batches.is_empty() {
        println!("No journal records");
        return;
    }

    for batch in batches {
        println!(
            "{} @{:<8} {} hash(es)",
            batch.fs,
            batch.offset,
            batch.hashes.len()
        );
        for hash in &batch.hashes {
            println!("    {hash}");
        }
    }
}
