use tracing::{debug, warn};

use crate::css_rewriter::rewrite_css;
use crate::html_parser::{MarkupDocument, MarkupToken, StartTag};
use crate::resource_cache::{LinkContext, ResourceCache};
use crate::url_resolver::{resolve_link, ResolvedLink};

/// Attributes whose value is a URL.
pub const LINK_ATTRIBUTES: &[&str] = &[
    "action",
    "code",
    "cite",
    "data",
    "formaction",
    "href",
    "icon",
    "manifest",
    "poster",
    "src",
    "srcset",
    "usemap",
    "archive",
    "background",
    "codebase",
    "classid",
    "lowsrc",
    "longdesc",
    "profile",
];

/// `rel` keywords that make a `link` element pull in a resource.
const REQUISITE_REL_KEYWORDS: &[&str] = &["stylesheet", "icon", "shortcut"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Resolved to an absolute URL and left remote.
    Navigational,
    /// Downloaded when on the page's host and pointed at the local copy.
    Requisite,
}

pub fn is_link_attribute(name: &str) -> bool {
    LINK_ATTRIBUTES.contains(&name)
}

/// Decides what to do with the link held by `attribute` on element `element`.
pub fn classify_link(element: &str, attribute: &str, rel: Option<&str>) -> LinkKind {
    let navigational = match attribute {
        "action" | "formaction" => true,
        "href" => match element {
            "a" | "area" | "embed" => true,
            "link" => !rel.is_some_and(|rel| {
                let rel = rel.to_ascii_lowercase();
                REQUISITE_REL_KEYWORDS.iter().any(|keyword| rel.contains(keyword))
            }),
            _ => false,
        },
        _ => false,
    };

    if navigational {
        LinkKind::Navigational
    } else {
        LinkKind::Requisite
    }
}

/// Position of the first link attribute and the value of the first `rel`
/// attribute of a tag. Scanning stops once both are known.
fn find_link_attributes(tag: &StartTag) -> (Option<usize>, Option<&str>) {
    let mut link_index = None;
    let mut rel = None;

    for (index, attr) in tag.attrs.iter().enumerate() {
        if link_index.is_some() && rel.is_some() {
            break;
        }
        if attr.name == "rel" {
            rel = rel.or(Some(attr.value.as_str()));
        } else if link_index.is_none() && is_link_attribute(&attr.name) {
            link_index = Some(index);
        }
    }

    (link_index, rel)
}

/// Rewrites the links of a tokenized page in place, downloading requisite
/// resources through `cache`. Failures only ever leave a single link as it was.
pub async fn rewrite_document(
    document: &mut MarkupDocument,
    context: &LinkContext,
    cache: &mut ResourceCache,
) {
    for token in document.tokens.iter_mut() {
        match token {
            MarkupToken::StartTag(tag) => rewrite_tag(tag, context, cache).await,
            MarkupToken::RawText { element, data } if element.as_str() == "style" => {
                *data = rewrite_css(data, context, cache).await;
            }
            _ => {}
        }
    }
}

async fn rewrite_tag(tag: &mut StartTag, context: &LinkContext, cache: &mut ResourceCache) {
    if let Some(style) = tag.attrs.iter_mut().find(|attr| attr.name == "style") {
        style.value = rewrite_css(&style.value, context, cache).await;
    }

    let (link_index, rel) = find_link_attributes(tag);
    let Some(index) = link_index else {
        return;
    };
    let kind = classify_link(&tag.name, &tag.attrs[index].name, rel);

    let attr = &mut tag.attrs[index];
    let rewritten = match kind {
        LinkKind::Navigational => absolutize(&attr.value, context),
        LinkKind::Requisite if attr.name == "srcset" => localize_srcset(&attr.value, context, cache).await,
        LinkKind::Requisite => cache.localize(&attr.value, context).await,
    };

    if let Some(value) = rewritten {
        debug!("<{} {}> {} -> {}", tag.name, attr.name, attr.value, value);
        attr.value = value;
    }
}

/// Navigational links point back at the live site.
fn absolutize(raw: &str, context: &LinkContext) -> Option<String> {
    match resolve_link(&context.base_url, raw.trim()) {
        Ok(ResolvedLink::Hierarchical(url)) => Some(url.to_string()),
        Ok(ResolvedLink::Opaque(_)) => None,
        Err(e) => {
            warn!("Could not parse URL of link {}: {}", raw, e);
            None
        }
    }
}

/// Localizes every candidate of a `srcset` list, keeping width and density
/// descriptors. Returns `None` when no candidate changed.
async fn localize_srcset(
    srcset: &str,
    context: &LinkContext,
    cache: &mut ResourceCache,
) -> Option<String> {
    let mut changed = false;
    let mut candidates = Vec::new();

    for candidate in srcset.split(',') {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            continue;
        }
        let (link, descriptor) = match candidate.split_once(char::is_whitespace) {
            Some((link, descriptor)) => (link, Some(descriptor.trim())),
            None => (candidate, None),
        };

        let link = match cache.localize(link, context).await {
            Some(localized) => {
                changed = true;
                localized
            }
            None => link.to_string(),
        };
        candidates.push(match descriptor {
            Some(descriptor) => format!("{} {}", link, descriptor),
            None => link,
        });
    }

    changed.then(|| candidates.join(", "))
}
