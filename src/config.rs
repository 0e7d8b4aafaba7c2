use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::Error;

/// Number of posts shown on a single topic page unless told otherwise.
pub const DEFAULT_POST_STEP: u32 = 15;

pub const FIRST_PAGE_NUMBER: u32 = 1;

/// Immutable settings for one mirroring run, shared by every page task.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub url_template: String,
    pub post_step: u32,
    pub target_dir: PathBuf,
    pub force: bool,
    pub verbose: bool,
    /// `None` spawns every page task at once.
    pub max_concurrent: Option<NonZeroUsize>,
}

impl MirrorConfig {
    pub fn new(url_template: impl Into<String>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            url_template: url_template.into(),
            post_step: DEFAULT_POST_STEP,
            target_dir: target_dir.into(),
            force: false,
            verbose: false,
            max_concurrent: None,
        }
    }

    pub fn with_post_step(mut self, post_step: u32) -> Self {
        self.post_step = post_step;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: Option<NonZeroUsize>) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn post_offset(&self, page_number: u32) -> u64 {
        u64::from(self.post_step) * u64::from(page_number.saturating_sub(1))
    }

    /// The URL of a page is the template followed by the offset of its first post.
    pub fn page_url(&self, page_number: u32) -> String {
        format!("{}{}", self.url_template, self.post_offset(page_number))
    }

    pub fn page_dir(&self, page_number: u32) -> PathBuf {
        self.target_dir.join(page_number.to_string())
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }
}

/// An inclusive range of page numbers, written `first..last` or just `last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub first: u32,
    pub last: u32,
}

impl PageRange {
    pub fn new(first: u32, last: u32) -> Self {
        Self { first, last }
    }

    /// Page numbers start at 1, so a zero bound is clamped.
    pub fn pages(&self) -> impl Iterator<Item = u32> {
        self.first.max(FIRST_PAGE_NUMBER)..=self.last
    }
}

impl FromStr for PageRange {
    type Err = Error;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidPageRange(spec.to_string());
        let spec_trimmed = spec.trim();

        match spec_trimmed.split_once("..") {
            Some((first, last)) => {
                let first = first.trim().parse().map_err(|_| invalid())?;
                let last = last.trim().parse().map_err(|_| invalid())?;
                Ok(Self::new(first, last))
            }
            None => {
                let last = spec_trimmed.parse().map_err(|_| invalid())?;
                Ok(Self::new(FIRST_PAGE_NUMBER, last))
            }
        }
    }
}
