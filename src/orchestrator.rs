use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::{MirrorConfig, PageRange};
use crate::downloader::{build_http_client, PageOutcome, PageTask};
use crate::error::{Error, Result};
use crate::ledger::{ledger_path, recover_failures, FailureLedger};

/// What happened during one run, page numbers in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub recovered: Vec<u32>,
    pub archived_ledger: Option<PathBuf>,
    pub selected: Vec<u32>,
    pub skipped: Vec<u32>,
    pub persisted: Vec<u32>,
    pub failed: Vec<u32>,
}

/// Every page covered by `ranges`, plus the pages that failed last time.
pub fn effective_pages(ranges: &[PageRange], recovered: &[u32]) -> BTreeSet<u32> {
    ranges
        .iter()
        .flat_map(PageRange::pages)
        .chain(recovered.iter().copied())
        .collect()
}

/// A page whose directory already exists is only fetched again when forced
/// or when it failed last time.
pub async fn should_fetch(page_dir: &Path, force: bool, recovered: bool) -> io::Result<bool> {
    if force || recovered {
        return Ok(true);
    }
    match tokio::fs::metadata(page_dir).await {
        Ok(metadata) => Ok(!metadata.is_dir()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e),
    }
}

pub struct FetchOrchestrator {
    config: Arc<MirrorConfig>,
    client: Client,
}

impl FetchOrchestrator {
    pub fn new(config: MirrorConfig) -> Result<Self> {
        let client = build_http_client()?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: MirrorConfig, client: Client) -> Self {
        Self {
            config: Arc::new(config),
            client,
        }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Mirrors the selected pages. Only usage errors and a ledger that cannot
    /// be created are returned as errors; failed pages end up in the ledger.
    pub async fn run(&self, ranges: &[PageRange]) -> Result<RunSummary> {
        let target_dir = self.config.target_dir();
        tokio::fs::create_dir_all(target_dir)
            .await
            .map_err(|e| Error::filesystem(target_dir, e))?;

        let ledger_file = ledger_path(target_dir);
        let recovered = recover_failures(&ledger_file);
        let recovered_pages: BTreeSet<u32> = recovered.pages.iter().copied().collect();

        let pages = effective_pages(ranges, &recovered.pages);
        if pages.is_empty() {
            return Err(Error::NoPagesSelected);
        }

        let ledger = Arc::new(FailureLedger::create(&ledger_file)?);
        let mut summary = RunSummary {
            recovered: recovered_pages.iter().copied().collect(),
            archived_ledger: recovered.archived_to,
            ..RunSummary::default()
        };

        let permits = self
            .config
            .max_concurrent
            .map(|limit| Arc::new(Semaphore::new(limit.get())));
        let mut tasks = JoinSet::new();

        for page in pages {
            let page_dir = self.config.page_dir(page);
            match should_fetch(&page_dir, self.config.force, recovered_pages.contains(&page)).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Page {} already fetched into {:?}; skipping", page, page_dir);
                    summary.skipped.push(page);
                    continue;
                }
                Err(e) => {
                    error!("Could not stat target directory {:?} for page {}: {}", page_dir, page, e);
                    ledger.record(page);
                    summary.failed.push(page);
                    continue;
                }
            }

            summary.selected.push(page);
            let task = PageTask::new(Arc::clone(&self.config), self.client.clone(), page);
            let ledger = Arc::clone(&ledger);
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = match permits {
                    Some(permits) => permits.acquire_owned().await.ok(),
                    None => None,
                };
                task.run(&ledger).await
            });
        }

        info!(
            "Fetching {} page(s), {} skipped",
            summary.selected.len(),
            summary.skipped.len()
        );

        let progress_bar = ProgressBar::new(summary.selected.len() as u64);
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner} [{bar:30}] {pos}/{len} pages {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => self.report(&outcome, &progress_bar, &mut summary),
                Err(e) => error!("Page task did not complete: {}", e),
            }
            progress_bar.inc(1);
        }
        progress_bar.finish_and_clear();

        summary.persisted.sort_unstable();
        summary.failed.sort_unstable();
        Ok(summary)
    }

    fn report(&self, outcome: &PageOutcome, progress_bar: &ProgressBar, summary: &mut RunSummary) {
        if outcome.is_persisted() {
            progress_bar.set_message(format!("{} page {}", "✓".green(), outcome.number));
            summary.persisted.push(outcome.number);
        } else {
            progress_bar.set_message(format!("{} page {}", "✗".red(), outcome.number));
            summary.failed.push(outcome.number);
        }
    }
}
