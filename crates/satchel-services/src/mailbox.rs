//! Mailbox store — durable per-account storage for email records and files.
//!
//! The filesystem implementation keeps one directory per account under a
//! configured root. Emails append to `email_from_<sender>.txt`, one
//! timestamped line per message; attachments land as plain files. Names
//! arriving off the wire are sanitised before they ever touch a path.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Seeded into every new account, matching the original service.
pub const WELCOME_FILE: &str = "new_email.txt";
const WELCOME_BODY: &str = "Welcome to your new account!";

const MAX_NAME_LEN: usize = 255;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("io failure at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ── Store interface ───────────────────────────────────────────────────────────

/// The persistence seam between the protocol engine and disk.
pub trait MailboxStore: Send + Sync {
    fn account_exists(&self, account: &str) -> bool;

    /// Returns true when the account was created, false when it already
    /// existed.
    fn create_account(&self, account: &str) -> Result<bool, StoreError>;

    /// File names in the account's mailbox, sorted for stable replies.
    fn list_files(&self, account: &str) -> Result<Vec<String>, StoreError>;

    /// Append one timestamped email record to the recipient's mailbox.
    fn append_email(
        &self,
        to: &str,
        from: &str,
        body: &str,
        timestamp: u64,
    ) -> Result<(), StoreError>;

    fn write_file(&self, account: &str, file_name: &str, bytes: &[u8])
        -> Result<(), StoreError>;

    fn read_file(&self, account: &str, file_name: &str) -> Result<Vec<u8>, StoreError>;
}

// ── Filesystem implementation ─────────────────────────────────────────────────

/// Directory-per-account store rooted at a single directory.
pub struct FsMailbox {
    root: PathBuf,
}

impl FsMailbox {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        Ok(Self { root })
    }

    fn account_dir(&self, account: &str) -> PathBuf {
        self.root.join(sanitize(account))
    }

    /// Account directory, failing when the account does not exist.
    fn existing_account_dir(&self, account: &str) -> Result<PathBuf, StoreError> {
        let dir = self.account_dir(account);
        if !dir.is_dir() {
            return Err(StoreError::AccountNotFound(account.to_string()));
        }
        Ok(dir)
    }
}

impl MailboxStore for FsMailbox {
    fn account_exists(&self, account: &str) -> bool {
        self.account_dir(account).is_dir()
    }

    fn create_account(&self, account: &str) -> Result<bool, StoreError> {
        let dir = self.account_dir(account);
        if dir.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        let welcome = dir.join(WELCOME_FILE);
        fs::write(&welcome, WELCOME_BODY).map_err(|e| io_err(&welcome, e))?;
        Ok(true)
    }

    fn list_files(&self, account: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.existing_account_dir(account)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| io_err(&dir, e))? {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn append_email(
        &self,
        to: &str,
        from: &str,
        body: &str,
        timestamp: u64,
    ) -> Result<(), StoreError> {
        let dir = self.existing_account_dir(to)?;
        let path = dir.join(format!("email_from_{}.txt", sanitize(from)));
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        writeln!(file, "{timestamp} - {body}").map_err(|e| io_err(&path, e))
    }

    fn write_file(
        &self,
        account: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let dir = self.existing_account_dir(account)?;
        let path = dir.join(sanitize(file_name));
        fs::write(&path, bytes).map_err(|e| io_err(&path, e))
    }

    fn read_file(&self, account: &str, file_name: &str) -> Result<Vec<u8>, StoreError> {
        let dir = self.existing_account_dir(account)?;
        let path = dir.join(sanitize(file_name));
        if !path.is_file() {
            return Err(StoreError::FileNotFound(file_name.to_string()));
        }
        fs::read(&path).map_err(|e| io_err(&path, e))
    }
}

/// Reduce a wire-supplied name to a single safe path component:
/// anything outside `[A-Za-z0-9._-]` becomes `_`, the result is capped at
/// 255 characters, and the dot-only names are mangled.
fn sanitize(name: &str) -> String {
    let mut safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    safe.truncate(MAX_NAME_LEN);
    if safe.is_empty() || safe.bytes().all(|b| b == b'.') {
        return "_".to_string();
    }
    safe
}

// ── Tests ─────────────────────────────────────────────────────────────────────
