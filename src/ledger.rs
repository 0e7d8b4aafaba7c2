//! The failure ledger: a plain text file listing, one per line, the pages that
//! could not be mirrored during the last run.
//!
//! At the start of a run the previous ledger is read back and archived under
//! the first free `failures.lst.<N>` name, then a fresh ledger is created and
//! page tasks append to it as they fail.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{error, info, warn};

use crate::error::{Error, Result};

pub const FAILURE_LEDGER_FILE_NAME: &str = "failures.lst";

/// Pages read back from the previous run's ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveredFailures {
    pub pages: Vec<u32>,
    /// Where the previous ledger was moved to, if there was one.
    pub archived_to: Option<PathBuf>,
}

pub fn ledger_path(target_dir: &Path) -> PathBuf {
    target_dir.join(FAILURE_LEDGER_FILE_NAME)
}

/// Parses ledger contents, skipping lines that are not page numbers.
pub fn parse_ledger(contents: &str) -> Vec<u32> {
    contents
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .filter(|&page| page > 0)
        .collect()
}

/// First `<ledger>.<N>` name that does not exist yet.
pub fn next_archive_path(ledger: &Path) -> PathBuf {
    let mut index = 0u32;
    loop {
        let mut name = ledger.as_os_str().to_os_string();
        name.push(format!(".{}", index));
        let candidate = PathBuf::from(name);
        if !candidate.exists() {
            return candidate;
        }
        index += 1;
    }
}

/// Reads the ledger left by the previous run and moves it out of the way.
/// A missing ledger is not an error; an unreadable one is reported and
/// otherwise ignored.
pub fn recover_failures(ledger: &Path) -> RecoveredFailures {
    let contents = match fs::read_to_string(ledger) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return RecoveredFailures::default(),
        Err(e) => {
            error!(
                "Could not open list of failed downloads ({:?}) for reading: {}",
                ledger, e
            );
            return RecoveredFailures::default();
        }
    };

    let pages = parse_ledger(&contents);
    if !pages.is_empty() {
        let listed: Vec<String> = pages.iter().map(u32::to_string).collect();
        info!(
            "Found a list of failed downloads ({:?}); will reattempt pages {}",
            ledger,
            listed.join(", ")
        );
    }

    let archive = next_archive_path(ledger);
    let archived_to = match fs::rename(ledger, &archive) {
        Ok(()) => Some(archive),
        Err(e) => {
            error!(
                "Could not rename latest list of failed downloads to {:?}: {}",
                archive, e
            );
            None
        }
    };

    RecoveredFailures { pages, archived_to }
}

struct LedgerState {
    file: File,
    pages: Vec<u32>,
}

/// The ledger of the current run. Shared by all page tasks; appends are
/// serialized so lines never interleave.
pub struct FailureLedger {
    path: PathBuf,
    state: Mutex<LedgerState>,
}

impl FailureLedger {
    /// Creates an empty ledger, replacing any file at `path`.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(|source| Error::LedgerCreation {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            state: Mutex::new(LedgerState {
                file,
                pages: Vec::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a failed page number.
    pub fn record(&self, page_number: u32) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        let written = writeln!(state.file, "{}", page_number).and_then(|_| state.file.flush());
        if let Err(e) = written {
            warn!(
                "Could not log failed download of page {} in {:?}: {}",
                page_number, self.path, e
            );
        }
        state.pages.push(page_number);
    }

    /// Pages recorded so far, in the order they failed.
    pub fn recorded(&self) -> Vec<u32> {
        match self.state.lock() {
            Ok(state) => state.pages.clone(),
            Err(poisoned) => poisoned.into_inner().pages.clone(),
        }
    }
}
