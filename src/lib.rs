pub mod charset;
pub mod cli;
pub mod config;
pub mod css_rewriter;
pub mod downloader;
pub mod error;
pub mod file_manager;
pub mod html_parser;
pub mod ledger;
pub mod link_rewriter;
pub mod orchestrator;
pub mod resource_cache;
pub mod url_resolver;

// Re-export main types for convenience
pub use cli::FetchCommand;
pub use config::{MirrorConfig, PageRange, DEFAULT_POST_STEP};
pub use downloader::{PageOutcome, PageState, PageTarget, PageTask};
pub use error::{Error, ErrorKind, Result};
pub use file_manager::{normalize_extension, FileManager};
pub use html_parser::{MarkupDocument, MarkupToken};
pub use ledger::{FailureLedger, RecoveredFailures, FAILURE_LEDGER_FILE_NAME};
pub use link_rewriter::{classify_link, LinkKind};
pub use orchestrator::{FetchOrchestrator, RunSummary};
pub use resource_cache::{LinkContext, ResourceCache};
pub use url_resolver::{resolve_link, ResolvedLink};
