use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;
use tokio::fs;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

/// File name used for URL paths that denote a directory.
const DIRECTORY_INDEX_NAME: &str = "index";

/// Content-type prefixes paired with the suffixes a local copy must carry,
/// along with the suffixes that already satisfy them.
const EXTENSION_RULES: &[(&[&str], &str, &[&str])] = &[
    (&["text/html", "application/xhtml+xml"], ".html", &[".html", ".htm"]),
    (&["text/css"], ".css", &[".css"]),
    (&["application/atom+xml"], ".atom", &[".atom"]),
    (&["application/rss+xml"], ".rss", &[".rss"]),
];

/// Appends the suffix a browser needs to recognise a local file of the given
/// content-type. Unknown content-types leave the name untouched.
pub fn normalize_extension(filename: &str, content_type: &str) -> String {
    let content_type = content_type.trim_start().to_ascii_lowercase();

    for (prefixes, suffix, accepted) in EXTENSION_RULES {
        if !prefixes.iter().any(|prefix| content_type.starts_with(prefix)) {
            continue;
        }

        let lowercase_name = filename.to_ascii_lowercase();
        if accepted.iter().any(|ext| lowercase_name.ends_with(ext)) {
            return filename.to_string();
        }
        return format!("{}{}", filename, suffix);
    }

    filename.to_string()
}

/// Maps the path of a URL onto a relative, slash-separated file path below
/// the host directory. Segments are percent-decoded, dot segments dropped, and
/// directory-like paths get an index file name. The query is not included.
pub fn localized_path(url: &Url) -> String {
    let raw_path = url.path();

    let mut segments: Vec<String> = raw_path
        .split('/')
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
        .filter(|segment| !segment.is_empty() && segment != "." && segment != "..")
        .collect();

    if raw_path.is_empty() || raw_path.ends_with('/') {
        segments.push(DIRECTORY_INDEX_NAME.to_string());
    }

    segments.join("/")
}

/// The file name a resource is stored under: its localized path, the raw
/// query kept as a literal `?query` suffix, then the normalized extension.
pub fn resource_file_name(url: &Url, content_type: &str) -> String {
    let mut name = localized_path(url);
    if let Some(query) = url.query().filter(|query| !query.is_empty()) {
        name.push('?');
        name.push_str(query);
    }
    normalize_extension(&name, content_type)
}

/// Writes mirrored files below the directory of a single host.
#[derive(Debug, Clone)]
pub struct FileManager {
    host_dir: PathBuf,
}

impl FileManager {
    pub fn new(host_dir: impl Into<PathBuf>) -> Self {
        Self {
            host_dir: host_dir.into(),
        }
    }

    pub fn host_dir(&self) -> &Path {
        &self.host_dir
    }

    pub fn path_for(&self, relative_path: &str) -> PathBuf {
        let mut path = self.host_dir.clone();
        for segment in relative_path.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }

    /// Writes `content` to the given relative path, creating parent
    /// directories as needed, and returns the full path of the file.
    pub async fn save_file(&self, relative_path: &str, content: &[u8]) -> Result<PathBuf> {
        let file_path = self.path_for(relative_path);

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::filesystem(parent, e))?;
        }

        fs::write(&file_path, content)
            .await
            .map_err(|e| Error::filesystem(&file_path, e))?;

        debug!("Saved {} bytes to {:?}", content.len(), file_path);
        Ok(file_path)
    }
}
