use clap::Parser;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use crate::config::{MirrorConfig, PageRange, DEFAULT_POST_STEP};

#[derive(Parser, Debug)]
#[command(
    name = "forum-mirror",
    about = "Mirror the pages of a forum topic for offline viewing",
    version,
    long_about = "Downloads every page in the given ranges of a forum topic, together with the stylesheets, scripts and images it needs, and rewrites links so the copy can be browsed offline.\n\nBefore doing anything else, pages which could not be downloaded successfully during the last run are fetched again. A page range looks like `first..last`; a single number `last` means `1..last`. If no ranges are given, only failed downloads are reattempted."
)]
pub struct FetchCommand {
    /// Base URL of the topic pages; the offset of the first post of a page is appended to it
    #[arg(required = true, value_name = "URL")]
    pub url: String,

    /// Page ranges to fetch
    #[arg(value_name = "RANGE")]
    pub ranges: Vec<PageRange>,

    /// Overwrite pages that were already fetched
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Number of posts shown on a single page
    #[arg(
        short = 's',
        long,
        value_name = "POSTS",
        default_value_t = DEFAULT_POST_STEP,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub posts: u32,

    /// Directory where the pages will be downloaded (defaults to the current directory)
    #[arg(short = 't', long, value_name = "DIRECTORY")]
    pub target_dir: Option<PathBuf>,

    /// Output verbose messages
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Maximum number of pages fetched at the same time (unlimited if not set)
    #[arg(short = 'c', long)]
    pub max_concurrent: Option<NonZeroUsize>,
}

impl FetchCommand {
    pub fn into_config(self, default_target_dir: PathBuf) -> (MirrorConfig, Vec<PageRange>) {
        let mut config = MirrorConfig::new(self.url, self.target_dir.unwrap_or(default_target_dir))
            .with_post_step(self.posts)
            .with_force(self.force)
            .with_max_concurrent(self.max_concurrent);
        config.verbose = self.verbose;
        (config, self.ranges)
    }
}
