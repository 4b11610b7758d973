//! Where committed accounts go.
//!
//! The store calls [`Persistence::save_all`] with the fully-verified
//! aggregates *before* swapping them into memory, so a failed write leaves
//! both the backend and the live ledger on the previous version. Calls are
//! made from a blocking thread, never from the async runtime.

use std::fs;
use std::path::{Path, PathBuf};

use super::account::Account;
use crate::error::LedgerError;

pub trait Persistence: Send + Sync + 'static {
    fn load_all(&self) -> Result<Vec<Account>, LedgerError>;

    /// Stores every account or none of them.
    fn save_all(&self, accounts: &[Account]) -> Result<(), LedgerError>;
}

/// Keeps nothing. Used by the demo and by tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemory;

impl Persistence for InMemory {
    fn load_all(&self) -> Result<Vec<Account>, LedgerError> {
        Ok(Vec::new())
    }

    fn save_all(&self, _accounts: &[Account]) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// One pretty-printed `<user_id>.json` per account in a directory.
#[derive(Debug, Clone)]
pub struct JsonDir {
    dir: PathBuf,
}

impl JsonDir {
    /// Creates the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, account: &Account) -> PathBuf {
        self.dir.join(format!("{}.json", account.user_id()))
    }

    fn write_tmp(&self, account: &Account) -> Result<(PathBuf, PathBuf), LedgerError> {
        let path = self.path_for(account);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(account)?)?;
        Ok((tmp, path))
    }
}

impl Persistence for JsonDir {
    fn load_all(&self) -> Result<Vec<Account>, LedgerError> {
        let mut accounts = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = fs::read_to_string(&path)?;
            accounts.push(serde_json::from_str::<Account>(&contents)?);
        }
        Ok(accounts)
    }

    /// Writes every temporary file first and renames only once all of them
    /// are on disk, so a failed write never publishes part of a batch.
    fn save_all(&self, accounts: &[Account]) -> Result<(), LedgerError> {
        let mut staged = Vec::with_capacity(accounts.len());
        for account in accounts {
            match self.write_tmp(account) {
                Ok(paths) => staged.push(paths),
                Err(err) => {
                    for (tmp, _) in &staged {
                        let _ = fs::remove_file(tmp);
                    }
                    return Err(err);
                }
            }
        }
        // rename is atomic on the same filesystem
        for (tmp, path) in &staged {
            fs::rename(tmp, path)?;
        }
        Ok(())
    }
}
