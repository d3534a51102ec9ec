//! Verify command implementation.

use super::dump_log::scan_file;
use crfs_protocol::FileSystemId;
use crfs_store::{
    BlobStore, Directory, FileBlobStore, JournalOperationLog, OperationLog, BLOB_DIR,
    DIRECTORY_FILE, OPLOG_DIR,
};
use std::collections::HashSet;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of journals checked.
    pub journals_checked: usize,
    /// Number of hashes found in journals.
    pub hashes_logged: usize,
    /// Number of blobs checked.
    pub blobs_checked: usize,
    /// Logged hashes without a stored blob.
    pub headless: usize,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path, check_digests: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying data directory at {:?}", path);
    println!();

    let result = verify(path, check_digests)?;
    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Verification passed");
        Ok(())
    } else {
        println!("✗ Verification failed");
        Err("Verification failed".into())
    }
}

/// Checks the directory snapshot, every journal and every blob.
pub fn verify(path: &Path, check_digests: bool) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::default();

    let known: Option<HashSet<FileSystemId>> = if path.join(DIRECTORY_FILE).exists() {
        match Directory::open(path.join(DIRECTORY_FILE)) {
            Ok(directory) => Some(directory.filesystems().into_iter().map(|f| f.id).collect()),
            Err(e) => {
                result.errors.push(format!("directory: {e}"));
                None
            }
        }
    } else {
        result.warnings.push("directory snapshot not found".into());
        None
    };

    let oplog_dir = path.join(OPLOG_DIR);
    let blob_dir = path.join(BLOB_DIR);
    let blobs = FileBlobStore::open_existing(&blob_dir);

    let journals = if oplog_dir.exists() {
        JournalOperationLog::open(&oplog_dir, false)?.filesystems()?
    } else {
        Vec::new()
    };

    for fs in &journals {
        result.journals_checked += 1;
        if let Some(known) = &known {
            if !known.contains(fs) {
                result
                    .warnings
                    .push(format!("{fs}: journal for unregistered filesystem"));
            }
        }

        let scan = match scan_file(&JournalOperationLog::journal_path(&oplog_dir, fs)) {
            Ok(scan) => scan,
            Err(e) => {
                result.errors.push(format!("{fs}: {e}"));
                continue;
            }
        };
        if scan.torn_bytes > 0 {
            result.warnings.push(format!(
                "{fs}: {} byte(s) of incomplete trailing record",
                scan.torn_bytes
            ));
        }

        let hashes: HashSet<_> = scan.hashes().collect();
        result.hashes_logged += hashes.len();
        for hash in hashes {
            if !blobs.contains(fs, hash)? {
                result.headless += 1;
            }
        }
    }

    for fs in blobs.filesystems()? {
        for hash in blobs.list(&fs)? {
            result.blobs_checked += 1;
            if !check_digests {
                continue;
            }
            let data = blobs.get(&fs, &hash)?;
            if !hash.matches(&data) {
                result
                    .errors
                    .push(format!("{fs}/{hash}: content does not match its hash"));
            }
        }
    }

    Ok(result)
}

fn print_result(result: &VerifyResult) {
    println!("  Journals checked: {}", result.journals_checked);
    println!("  Hashes logged:    {}", result.hashes_logged);
    println!("  Blobs checked:    {}", result.blobs_checked);
    println!("  Without blob:     {}", result.headless);

    if !result.warnings.is_empty() {
        println!("  Warnings:");
        for warning in &result.warnings {
            println!("    - {}", warning);
        }
    }
    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in &result.errors {
            println!("    - {}", error);
        }
    }
}
