use std::collections::HashMap;

use futures::future::{BoxFuture, FutureExt};
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::charset::decode_stylesheet;
use crate::css_rewriter::{is_stylesheet, rewrite_css};
use crate::downloader::http_get;
use crate::error::Result;
use crate::file_manager::{resource_file_name, FileManager};
use crate::url_resolver::{document_dir, relative_reference, resolve_link, ResolvedLink};

/// The document a link was found in: links are resolved against `base_url`,
/// relative references are computed from `base_dir`, and only resources on
/// `host` and `port` are pulled into the mirror.
#[derive(Debug, Clone)]
pub struct LinkContext {
    pub base_url: Url,
    pub base_dir: String,
    pub host: String,
    pub port: Option<u16>,
}

impl LinkContext {
    pub fn new(base_url: Url, host: impl Into<String>) -> Self {
        let base_dir = document_dir(&base_url);
        let port = base_url.port_or_known_default();
        Self {
            base_url,
            base_dir,
            host: host.into(),
            port,
        }
    }

    /// Whether `url` is served by the same host and port as the page.
    pub fn is_local(&self, url: &Url) -> bool {
        url.host_str() == Some(self.host.as_str()) && url.port_or_known_default() == self.port
    }
}

/// Resources already written for one page, keyed by absolute URL.
///
/// A cache belongs to exactly one page task. Localized references are relative
/// to that page's directory, so sharing a cache between pages would hand out
/// paths that point nowhere.
pub struct ResourceCache {
    client: Client,
    files: FileManager,
    content_types: HashMap<String, String>,
    fetch_count: usize,
}

impl ResourceCache {
    pub fn new(client: Client, files: FileManager) -> Self {
        Self {
            client,
            files,
            content_types: HashMap::new(),
            fetch_count: 0,
        }
    }

    pub fn content_type(&self, url: &str) -> Option<&str> {
        self.content_types.get(url).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.content_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content_types.is_empty()
    }

    /// Number of network requests issued through this cache.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count
    }

    /// Returns the content-type of `url`, downloading and saving it first if
    /// this page has not seen it yet. Failures are not remembered, so a later
    /// reference to the same URL tries again.
    pub fn get_or_fetch<'a>(&'a mut self, url: &'a Url) -> BoxFuture<'a, Result<String>> {
        async move {
            if let Some(content_type) = self.content_types.get(url.as_str()) {
                debug!("Reusing {} ({})", url, content_type);
                return Ok(content_type.clone());
            }
            self.fetch(url).await
        }
        .boxed()
    }

    async fn fetch(&mut self, url: &Url) -> Result<String> {
        let key = url.as_str().to_string();
        self.fetch_count += 1;

        let (content_type, body) = http_get(&self.client, url.as_str()).await?;

        let content = if is_stylesheet(&content_type) {
            // entered before rewriting so a stylesheet referring back to itself terminates
            self.content_types.insert(key.clone(), content_type.clone());
            let context = LinkContext::new(url.clone(), url.host_str().unwrap_or_default());
            let stylesheet = decode_stylesheet(&body, &content_type);
            let css = rewrite_css(&stylesheet.text, &context, self).await;
            stylesheet.encode(&css)
        } else {
            body.to_vec()
        };

        let file_name = resource_file_name(url, &content_type);
        if let Err(e) = self.files.save_file(&file_name, &content).await {
            self.content_types.remove(&key);
            return Err(e);
        }

        debug!("Fetched resource {} as {}", url, file_name);
        self.content_types.insert(key, content_type.clone());
        Ok(content_type)
    }

    /// Fetches the resource behind a requisite link and returns the reference
    /// that replaces it. `None` means the link is left exactly as written:
    /// it could not be parsed, has no path, is opaque, lives on another host,
    /// or could not be fetched.
    pub async fn localize(&mut self, raw: &str, context: &LinkContext) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') || raw.starts_with('?') {
            return None;
        }

        let mut url = match resolve_link(&context.base_url, raw) {
            Ok(ResolvedLink::Hierarchical(url)) => url,
            Ok(ResolvedLink::Opaque(_)) => return None,
            Err(e) => {
                warn!("Could not parse URL of resource {}: {}", raw, e);
                return None;
            }
        };

        if !context.is_local(&url) {
            debug!("Leaving resource {} on foreign host in place", url);
            return None;
        }

        let fragment = url.fragment().map(str::to_string);
        url.set_fragment(None);

        match self.get_or_fetch(&url).await {
            Ok(content_type) => {
                let mut reference = relative_reference(&context.base_dir, &url, &content_type);
                if let Some(fragment) = fragment {
                    reference.push('#');
                    reference.push_str(&fragment);
                }
                Some(reference)
            }
            Err(e) => {
                warn!("Could not fetch resource {}: {}", url, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn page_context(server: &MockServer) -> LinkContext {
        let page_url = Url::parse(&format!("{}/topic?start=15", server.uri())).unwrap();
        let host = page_url.host_str().unwrap().to_string();
        LinkContext::new(page_url, host)
    }

    #[tokio::test]
    async fn test_second_lookup_uses_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"PNG".to_vec(), "image/png"))
            .expect(1)
            .mount(&server)
            .await;

        let temp_dir = tempdir().unwrap();
        let mut cache = ResourceCache::new(Client::new(), FileManager::new(temp_dir.path()));
        let context = page_context(&server);

        assert_eq!(cache.localize("img/a.png", &context).await.as_deref(), Some("img/a.png"));
        assert_eq!(cache.localize("/img/a.png", &context).await.as_deref(), Some("img/a.png"));

        assert_eq!(cache.fetch_count(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.content_type(&format!("{}/img/a.png", server.uri())),
            Some("image/png")
        );
        assert_eq!(std::fs::read(temp_dir.path().join("img/a.png")).unwrap(), b"PNG");
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.gif"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;

        let temp_dir = tempdir().unwrap();
        let mut cache = ResourceCache::new(Client::new(), FileManager::new(temp_dir.path()));
        let context = page_context(&server);

        assert_eq!(cache.localize("missing.gif", &context).await, None);
        assert_eq!(cache.localize("missing.gif", &context).await, None);
        assert!(cache.is_empty());
        assert_eq!(cache.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_foreign_host_and_opaque_links_are_left_alone() {
        let server = MockServer::start().await;
        let temp_dir = tempdir().unwrap();
        let mut cache = ResourceCache::new(Client::new(), FileManager::new(temp_dir.path()));
        let context = page_context(&server);

        for raw in [
            "http://cdn.other.example/lib.js",
            "data:image/gif;base64,R0lGOD",
            "javascript:void(0)",
            "#top",
            "?start=30",
            "",
        ] {
            assert_eq!(cache.localize(raw, &context).await, None, "{} should be left alone", raw);
        }
        assert_eq!(cache.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_query_and_fragment_in_reference() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/style.php"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"p {}".to_vec(), "text/css"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/icons.svg"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(b"<svg/>".to_vec(), "image/svg+xml"),
            )
            .mount(&server)
            .await;

        let temp_dir = tempdir().unwrap();
        let mut cache = ResourceCache::new(Client::new(), FileManager::new(temp_dir.path()));
        let context = page_context(&server);

        assert_eq!(
            cache.localize("style.php?id=1", &context).await.as_deref(),
            Some("style.php%3Fid=1.css")
        );
        assert!(temp_dir.path().join("style.php?id=1.css").exists());

        assert_eq!(
            cache.localize("icons.svg#reply", &context).await.as_deref(),
            Some("icons.svg#reply")
        );
    }

    #[tokio::test]
    async fn test_same_host_on_another_port_is_foreign() {
        let server = MockServer::start().await;
        let other = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x.png"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"PNG".to_vec(), "image/png"))
            .expect(0)
            .mount(&other)
            .await;

        let temp_dir = tempdir().unwrap();
        let mut cache = ResourceCache::new(Client::new(), FileManager::new(temp_dir.path()));
        let context = page_context(&server);

        let raw = format!("{}/x.png", other.uri());
        assert_eq!(cache.localize(&raw, &context).await, None);
        assert_eq!(cache.fetch_count(), 0);
        assert!(!temp_dir.path().join("x.png").exists());
    }

    #[tokio::test]
    async fn test_stylesheet_keeps_its_encoding() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/theme.css"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                b"/* \xCF\xF0\xE8\xE2\xE5\xF2 */ a { background: url('/bg.gif') }".to_vec(),
                "text/css; charset=windows-1251",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bg.gif"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"GIF".to_vec(), "image/gif"))
            .mount(&server)
            .await;

        let temp_dir = tempdir().unwrap();
        let mut cache = ResourceCache::new(Client::new(), FileManager::new(temp_dir.path()));
        let context = page_context(&server);

        assert_eq!(
            cache.localize("theme.css", &context).await.as_deref(),
            Some("theme.css")
        );
        assert_eq!(
            std::fs::read(temp_dir.path().join("theme.css")).unwrap(),
            b"/* \xCF\xF0\xE8\xE2\xE5\xF2 */ a { background: url('bg.gif') }".to_vec()
        );
    }
}
