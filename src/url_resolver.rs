use std::path::{Component, Path};

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use url::{ParseError, Url};

use crate::file_manager::{localized_path, normalize_extension};

/// Characters that cannot appear literally in a segment of a rewritten
/// reference. Localized paths are decoded, so `%` itself is re-encoded.
const REFERENCE_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'\'')
    .add(b',')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// A link found in markup or CSS, resolved against the document it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedLink {
    /// No hierarchical path, e.g. `mailto:` or `javascript:`. Kept as written.
    Opaque(Url),
    /// Absolute URL obtained by resolving against the base document.
    Hierarchical(Url),
}

impl ResolvedLink {
    pub fn url(&self) -> &Url {
        match self {
            Self::Opaque(url) | Self::Hierarchical(url) => url,
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Self::Opaque(_))
    }

    pub fn host(&self) -> Option<&str> {
        self.url().host_str()
    }
}

/// Resolves raw link text found in a document located at `base`.
pub fn resolve_link(base: &Url, raw: &str) -> Result<ResolvedLink, ParseError> {
    match Url::parse(raw) {
        Ok(url) if url.cannot_be_a_base() => Ok(ResolvedLink::Opaque(url)),
        Ok(url) => Ok(ResolvedLink::Hierarchical(url)),
        Err(ParseError::RelativeUrlWithoutBase) => base.join(raw).map(ResolvedLink::Hierarchical),
        Err(e) => Err(e),
    }
}

/// Directory, as an absolute slash path, that relative references inside the
/// localized copy of `url` are computed from.
pub fn document_dir(url: &Url) -> String {
    let local = format!("/{}", localized_path(url));
    match local.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => local[..index].to_string(),
    }
}

/// Builds the reference that points from a document in `from_dir` to the
/// localized copy of `url`. Path segments are percent-encoded again, the raw
/// query becomes a literal `%3F<query>` suffix, and the result is passed
/// through the extension normalizer.
pub fn relative_reference(from_dir: &str, url: &Url, content_type: &str) -> String {
    let target = format!("/{}", localized_path(url));
    let relative = pathdiff::diff_paths(Path::new(&target), Path::new(from_dir))
        .map(|path| to_slash_path(&path))
        .unwrap_or_else(|| target.trim_start_matches('/').to_string());

    let mut reference = relative
        .split('/')
        .map(|segment| match segment {
            ".." => segment.to_string(),
            _ => utf8_percent_encode(segment, REFERENCE_SEGMENT).to_string(),
        })
        .collect::<Vec<_>>()
        .join("/");
    if let Some(query) = url.query().filter(|query| !query.is_empty()) {
        reference.push_str("%3F");
        reference.push_str(query);
    }

    normalize_extension(&reference, content_type)
}

fn to_slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
