use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::resource_cache::{LinkContext, ResourceCache};

/// Matches `url("...")` and `url('...')`. Group 1 is everything up to the
/// opening quote, group 2 the link, group 3 the closing quote and paren.
fn css_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(url\s*\(["'])(.*?)(["']\))"#).expect("CSS url() pattern is valid")
    })
}

pub fn is_stylesheet(content_type: &str) -> bool {
    content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("text/css")
}

/// Rewrites every quoted `url(...)` in `css` so requisite resources point at
/// their localized copies. Occurrences whose link cannot be localized are
/// copied through unchanged.
pub async fn rewrite_css(css: &str, context: &LinkContext, cache: &mut ResourceCache) -> String {
    let pattern = css_url_pattern();
    let mut rewritten = String::with_capacity(css.len());
    let mut rest = css;

    while let Some(captures) = pattern.captures(rest) {
        let (Some(whole), Some(prefix), Some(link), Some(suffix)) =
            (captures.get(0), captures.get(1), captures.get(2), captures.get(3))
        else {
            break;
        };

        rewritten.push_str(&rest[..whole.start()]);
        match cache.localize(link.as_str(), context).await {
            Some(reference) => {
                rewritten.push_str(prefix.as_str());
                rewritten.push_str(&reference);
                rewritten.push_str(suffix.as_str());
            }
            None => {
                debug!("Keeping {} as written", whole.as_str());
                rewritten.push_str(whole.as_str());
            }
        }
        rest = &rest[whole.end()..];
    }

    rewritten.push_str(rest);
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_manager::FileManager;
    use reqwest::Client;
    use tempfile::tempdir;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context_for(server: &MockServer, document_path: &str) -> LinkContext {
        let url = Url::parse(&format!("{}{}", server.uri(), document_path)).unwrap();
        let host = url.host_str().unwrap().to_string();
        LinkContext::new(url, host)
    }

    async fn mount_image(server: &MockServer, image_path: &str, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path(image_path))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"GIF89a".to_vec(), "image/gif"))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[test]
    fn test_is_stylesheet() {
        assert!(is_stylesheet("text/css"));
        assert!(is_stylesheet("Text/CSS; charset=utf-8"));
        assert!(!is_stylesheet("text/html"));
        assert!(!is_stylesheet(""));
    }

    #[tokio::test]
    async fn test_rewrites_url_relative_to_stylesheet() {
        let server = MockServer::start().await;
        mount_image(&server, "/images/x.png", 1).await;

        let temp_dir = tempdir().unwrap();
        let mut cache = ResourceCache::new(Client::new(), FileManager::new(temp_dir.path()));
        let context = context_for(&server, "/styles/theme.css");

        let css = r#"body { background: url("../images/x.png") no-repeat; }"#;
        let rewritten = rewrite_css(css, &context, &mut cache).await;

        assert_eq!(rewritten, r#"body { background: url("../images/x.png") no-repeat; }"#);
        assert!(temp_dir.path().join("images/x.png").exists());
    }

    #[tokio::test]
    async fn test_rewrites_inline_style_relative_to_page() {
        let server = MockServer::start().await;
        mount_image(&server, "/forum/images/x.png", 1).await;

        let temp_dir = tempdir().unwrap();
        let mut cache = ResourceCache::new(Client::new(), FileManager::new(temp_dir.path()));
        let context = context_for(&server, "/forum/sub/topic");

        let css = "background: url('/forum/images/x.png'); color: red";
        let rewritten = rewrite_css(css, &context, &mut cache).await;

        assert_eq!(rewritten, "background: url('../images/x.png'); color: red");
    }

    #[tokio::test]
    async fn test_unparsable_link_is_copied_verbatim() {
        let server = MockServer::start().await;
        mount_image(&server, "/ok.gif", 1).await;

        let temp_dir = tempdir().unwrap();
        let mut cache = ResourceCache::new(Client::new(), FileManager::new(temp_dir.path()));
        let context = context_for(&server, "/topic");

        let css = r#"a { background: url("http://[bad/x.png") } b { background: url("ok.gif") }"#;
        let rewritten = rewrite_css(css, &context, &mut cache).await;

        assert_eq!(
            rewritten,
            r#"a { background: url("http://[bad/x.png") } b { background: url("ok.gif") }"#
        );
        assert!(temp_dir.path().join("ok.gif").exists());
    }

    #[tokio::test]
    async fn test_unquoted_and_foreign_urls_are_untouched() {
        let server = MockServer::start().await;
        let temp_dir = tempdir().unwrap();
        let mut cache = ResourceCache::new(Client::new(), FileManager::new(temp_dir.path()));
        let context = context_for(&server, "/topic");

        let css = r#"a { background: url(plain.png) } b { background: url("https://fonts.example/f.woff") }"#;
        let rewritten = rewrite_css(css, &context, &mut cache).await;

        assert_eq!(rewritten, css);
        assert_eq!(cache.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_repeated_url_is_fetched_once() {
        let server = MockServer::start().await;
        mount_image(&server, "/bg.gif", 1).await;

        let temp_dir = tempdir().unwrap();
        let mut cache = ResourceCache::new(Client::new(), FileManager::new(temp_dir.path()));
        let context = context_for(&server, "/topic");

        let css = r#".a { background: url("bg.gif") } .b { background: url('bg.gif') }"#;
        let rewritten = rewrite_css(css, &context, &mut cache).await;

        assert_eq!(rewritten, css);
        assert_eq!(cache.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_fetched_stylesheet_is_rewritten_before_saving() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/styles/theme.css"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                br#"@import url("theme.css"); .logo { background: url("/images/logo.gif") }"#.to_vec(),
                "text/css",
            ))
            .expect(1)
            .mount(&server)
            .await;
        mount_image(&server, "/images/logo.gif", 1).await;

        let temp_dir = tempdir().unwrap();
        let mut cache = ResourceCache::new(Client::new(), FileManager::new(temp_dir.path()));
        let context = context_for(&server, "/topic");

        let css = r#"@import url("styles/theme.css");"#;
        let rewritten = rewrite_css(css, &context, &mut cache).await;
        assert_eq!(rewritten, css);

        let saved = std::fs::read_to_string(temp_dir.path().join("styles/theme.css")).unwrap();
        assert_eq!(
            saved,
            r#"@import url("theme.css"); .logo { background: url("../images/logo.gif") }"#
        );
    }
}
