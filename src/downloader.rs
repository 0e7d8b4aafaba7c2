use std::path::PathBuf;
use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, ClientBuilder, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

use crate::charset::decode_markup;
use crate::config::MirrorConfig;
use crate::error::{Error, Result};
use crate::file_manager::{localized_path, normalize_extension, FileManager};
use crate::html_parser::MarkupDocument;
use crate::ledger::FailureLedger;
use crate::link_rewriter::rewrite_document;
use crate::resource_cache::{LinkContext, ResourceCache};

pub fn build_http_client() -> Result<Client> {
    ClientBuilder::new()
        .use_rustls_tls()
        .build()
        .map_err(|source| Error::Transport {
            url: String::new(),
            source,
        })
}

/// Issues a GET request and returns the content-type and body of a 200 OK
/// response. Anything else is an error.
pub async fn http_get(client: &Client, url: &str) -> Result<(String, Vec<u8>)> {
    let transport = |source| Error::Transport {
        url: url.to_string(),
        source,
    };

    let response = client.get(url).send().await.map_err(transport)?;

    if response.status() != StatusCode::OK {
        return Err(Error::Status {
            url: url.to_string(),
            status: response.status(),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let body = response.bytes().await.map_err(transport)?;
    Ok((content_type, body.to_vec()))
}

/// One page of the topic to mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTarget {
    pub number: u32,
    pub url: String,
    pub dir: PathBuf,
}

impl PageTarget {
    pub fn new(config: &MirrorConfig, number: u32) -> Self {
        Self {
            number,
            url: config.page_url(number),
            dir: config.page_dir(number),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Pending,
    UrlDerived,
    Fetching,
    Rewriting,
    Persisted,
    Failed,
}

/// Result of running a page task to completion.
#[derive(Debug)]
pub struct PageOutcome {
    pub number: u32,
    pub state: PageState,
    /// Where the rewritten page was written, once persisted.
    pub saved_path: Option<PathBuf>,
    /// State the task was in when it failed, and why.
    pub failure: Option<(PageState, Error)>,
    pub resources_fetched: usize,
}

impl PageOutcome {
    pub fn is_persisted(&self) -> bool {
        self.state == PageState::Persisted
    }
}

/// Downloads one page, localizes what it needs, and writes it under
/// `<target>/<page>/<host>/`.
pub struct PageTask {
    target: PageTarget,
    config: Arc<MirrorConfig>,
    client: Client,
    state: PageState,
    resources_fetched: usize,
}

impl PageTask {
    pub fn new(config: Arc<MirrorConfig>, client: Client, number: u32) -> Self {
        let target = PageTarget::new(&config, number);
        Self {
            target,
            config,
            client,
            state: PageState::Pending,
            resources_fetched: 0,
        }
    }

    pub fn target(&self) -> &PageTarget {
        &self.target
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    fn advance(&mut self, state: PageState) {
        debug!("Page {}: {:?} -> {:?}", self.target.number, self.state, state);
        self.state = state;
    }

    /// Runs the task, recording the page in `ledger` if it fails.
    pub async fn run(mut self, ledger: &FailureLedger) -> PageOutcome {
        let number = self.target.number;
        if self.config.verbose {
            info!(
                "Starting the fetching of page {} into directory {:?}...",
                number, self.target.dir
            );
        }

        match self.execute().await {
            Ok(saved_path) => {
                if self.config.verbose {
                    info!("Finished the fetching of page {}.", number);
                }
                PageOutcome {
                    number,
                    state: self.state,
                    saved_path: Some(saved_path),
                    failure: None,
                    resources_fetched: self.resources_fetched,
                }
            }
            Err(e) => {
                let failed_in = self.state;
                warn!("Could not fetch page {} ({:?}): {}", number, failed_in, e);
                self.advance(PageState::Failed);
                ledger.record(number);
                PageOutcome {
                    number,
                    state: self.state,
                    saved_path: None,
                    failure: Some((failed_in, e)),
                    resources_fetched: self.resources_fetched,
                }
            }
        }
    }

    async fn execute(&mut self) -> Result<PathBuf> {
        let page_url = Url::parse(&self.target.url).map_err(|source| Error::InvalidUrl {
            url: self.target.url.clone(),
            source,
        })?;
        let host = page_url.host_str().unwrap_or_default().to_string();
        self.advance(PageState::UrlDerived);
        debug!("URL: {}", page_url);

        self.advance(PageState::Fetching);
        let (content_type, body) = http_get(&self.client, page_url.as_str()).await?;

        self.advance(PageState::Rewriting);
        let decoded = decode_markup(&body, &content_type);
        let mut document = MarkupDocument::parse(&decoded.text);
        let files = FileManager::new(self.target.dir.join(&host));
        let mut cache = ResourceCache::new(self.client.clone(), files.clone());
        let context = LinkContext::new(page_url.clone(), host);
        rewrite_document(&mut document, &context, &mut cache).await;
        self.resources_fetched = cache.len();

        let file_name = normalize_extension(&localized_path(&page_url), &content_type);
        let saved_path = files
            .save_file(&file_name, &decoded.encode(&document.serialize()))
            .await?;
        self.advance(PageState::Persisted);

        Ok(saved_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_page_target_derivation() {
        let config = MirrorConfig::new("http://forum.example/topic?start=", "/mirror");
        let target = PageTarget::new(&config, 2);

        assert_eq!(target.number, 2);
        assert_eq!(target.url, "http://forum.example/topic?start=15");
        assert_eq!(target.dir, PathBuf::from("/mirror/2"));
    }

    #[tokio::test]
    async fn test_http_get_rejects_non_ok_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/moved"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let result = http_get(&Client::new(), &format!("{}/moved", server.uri())).await;
        assert!(matches!(
            result,
            Err(Error::Status { status: StatusCode::NO_CONTENT, .. })
        ));
    }

    #[tokio::test]
    async fn test_page_task_persists_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/topic"))
            .and(query_param("start", "15"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"<html><body><img src="smile.gif"></body></html>"#,
                "text/html; charset=UTF-8",
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/smile.gif"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"GIF".to_vec(), "image/gif"))
            .expect(1)
            .mount(&server)
            .await;

        let temp_dir = tempdir().unwrap();
        let config = Arc::new(MirrorConfig::new(
            format!("{}/topic?start=", server.uri()),
            temp_dir.path(),
        ));
        let ledger = FailureLedger::create(temp_dir.path().join("failures.lst")).unwrap();

        let task = PageTask::new(config, Client::new(), 2);
        let outcome = task.run(&ledger).await;

        assert!(outcome.is_persisted());
        assert_eq!(outcome.resources_fetched, 1);
        let page_file = temp_dir.path().join("2/127.0.0.1/topic.html");
        assert_eq!(outcome.saved_path.as_deref(), Some(page_file.as_path()));
        assert_eq!(
            std::fs::read_to_string(page_file).unwrap(),
            r#"<html><body><img src="smile.gif"></body></html>"#
        );
        assert!(temp_dir.path().join("2/127.0.0.1/smile.gif").exists());
        assert!(ledger.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_page_task_keeps_declared_encoding() {
        let server = MockServer::start().await;
        let body = b"<p>\xCF\xF0\xE8\xE2\xE5\xF2</p><a href=\"/u\">\xEA\xF2\xEE</a>".to_vec();
        Mock::given(method("GET"))
            .and(path("/topic"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(body.clone(), "text/html; charset=windows-1251"),
            )
            .mount(&server)
            .await;

        let temp_dir = tempdir().unwrap();
        let config = Arc::new(MirrorConfig::new(
            format!("{}/topic?start=", server.uri()),
            temp_dir.path(),
        ));
        let ledger = FailureLedger::create(temp_dir.path().join("failures.lst")).unwrap();

        let outcome = PageTask::new(config, Client::new(), 2).run(&ledger).await;
        assert!(outcome.is_persisted());

        let mut expected = b"<p>\xCF\xF0\xE8\xE2\xE5\xF2</p><a href=\"".to_vec();
        expected.extend_from_slice(server.uri().as_bytes());
        expected.extend_from_slice(b"/u\">\xEA\xF2\xEE</a>");
        let saved = std::fs::read(temp_dir.path().join("2/127.0.0.1/topic.html")).unwrap();
        assert_eq!(saved, expected);
    }

    #[tokio::test]
    async fn test_page_task_failure_is_recorded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/topic"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let temp_dir = tempdir().unwrap();
        let config = Arc::new(MirrorConfig::new(
            format!("{}/topic?start=", server.uri()),
            temp_dir.path(),
        ));
        let ledger = FailureLedger::create(temp_dir.path().join("failures.lst")).unwrap();

        let outcome = PageTask::new(config, Client::new(), 4).run(&ledger).await;

        assert_eq!(outcome.state, PageState::Failed);
        assert!(matches!(
            outcome.failure,
            Some((PageState::Fetching, Error::Status { .. }))
        ));
        assert_eq!(ledger.recorded(), vec![4]);
        assert_eq!(
            std::fs::read_to_string(temp_dir.path().join("failures.lst")).unwrap(),
            "4\n"
        );
    }

    #[tokio::test]
    async fn test_invalid_page_url_fails_before_fetching() {
        let temp_dir = tempdir().unwrap();
        let config = Arc::new(MirrorConfig::new("not a url ", temp_dir.path()));
        let ledger = FailureLedger::create(temp_dir.path().join("failures.lst")).unwrap();

        let task = PageTask::new(config, Client::new(), 1);
        assert_eq!(task.state(), PageState::Pending);
        let outcome = task.run(&ledger).await;

        assert!(matches!(
            outcome.failure,
            Some((PageState::Pending, Error::InvalidUrl { .. }))
        ));
        assert_eq!(ledger.recorded(), vec![1]);
    }
}
