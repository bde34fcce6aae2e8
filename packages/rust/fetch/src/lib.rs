//! HTTP page fetcher.
//!
//! Fetches a source's page and maps every failure onto the stage
//! [`ErrorKind`](newsdesk_shared::ErrorKind) vocabulary so the stage runner
//! can decide whether to retry.

use std::sync::LazyLock;
use std::time::Duration;

use encoding_rs::{Encoding, UTF_8};
use regex::Regex;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument};
use url::Url;

use newsdesk_shared::{NewsdeskError, Result, StageError};

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("Newsdesk/", env!("CARGO_PKG_VERSION"));

/// How far into the body a `<meta charset>` declaration is looked for.
const META_SNIFF_LIMIT: usize = 1024;

static META_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?([\w:.-]+)"#).expect("valid regex")
});

/// Options for building an [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Whole-request timeout enforced by the HTTP client.
    pub timeout: Duration,
    /// Maximum redirects followed before giving up.
    pub max_redirects: usize,
    /// Overrides the default User-Agent.
    pub user_agent: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_redirects: 5,
            user_agent: None,
        }
    }
}

/// Body and status of a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub status: u16,
    pub body: String,
}

/// Plain HTTP GET fetcher. Cheap to clone (shares the connection pool).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(opts: &FetchOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(opts.user_agent.as_deref().unwrap_or(USER_AGENT))
            .redirect(reqwest::redirect::Policy::limited(opts.max_redirects))
            .timeout(opts.timeout)
            .build()
            .map_err(|e| NewsdeskError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// GET `url` and return its decoded body.
    ///
    /// Non-success statuses, transport errors and empty bodies all come back
    /// as classified [`StageError`]s.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch(&self, url: &Url) -> std::result::Result<FetchedBody, StageError> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| classify_transport(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StageError::from_status(status.as_u16(), url));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify_transport(url, &e))?;
        let body = decode_body(content_type.as_deref(), &bytes);

        if body.trim().is_empty() {
            return Err(StageError::malformed(format!("{url}: empty response body")));
        }

        debug!(status = status.as_u16(), bytes = body.len(), "page fetched");
        Ok(FetchedBody {
            status: status.as_u16(),
            body,
        })
    }
}

/// Decode a page body to text.
///
/// The encoding is taken from the `Content-Type` charset, then from a
/// `<meta charset>` near the top of the document. Undeclared bodies that are
/// not valid UTF-8 are run through charset detection.
pub fn decode_body(content_type: Option<&str>, bytes: &[u8]) -> String {
    let encoding = content_type
        .and_then(header_charset)
        .or_else(|| meta_charset(bytes))
        .unwrap_or_else(|| sniff_encoding(bytes));
    let (text, used, lossy) = encoding.decode(bytes);
    if lossy {
        debug!(encoding = used.name(), "body contained undecodable bytes");
    }
    text.into_owned()
}

fn header_charset(content_type: &str) -> Option<&'static Encoding> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        Encoding::for_label(value.trim().trim_matches(['"', '\'']).as_bytes())
    })
}

fn meta_charset(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(META_SNIFF_LIMIT)];
    let head = String::from_utf8_lossy(head);
    let label = META_CHARSET.captures(&head)?.get(1)?;
    Encoding::for_label(label.as_str().as_bytes())
}

fn sniff_encoding(bytes: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return encoding;
    }
    if std::str::from_utf8(bytes).is_ok() {
        return UTF_8;
    }
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(None, true)
}

/// Map a reqwest transport error onto a stage error kind.
///
/// Shared with other reqwest-backed capabilities so every HTTP failure is
/// classified the same way.
pub fn classify_transport(context: impl std::fmt::Display, err: &reqwest::Error) -> StageError {
    if err.is_timeout() {
        StageError::timeout(format!("{context}: {err}"))
    } else if err.is_redirect() || err.is_builder() {
        StageError::permanent(format!("{context}: {err}"))
    } else if let Some(status) = err.status() {
        StageError::from_status(status.as_u16(), context)
    } else if err.is_decode() {
        StageError::malformed(format!("{context}: {err}"))
    } else {
        StageError::transient(format!("{context}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsdesk_shared::ErrorKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&FetchOptions {
            timeout: Duration::from_millis(500),
            ..FetchOptions::default()
        })
        .unwrap()
    }

    async fn serve(status: u16, body: &str) -> (MockServer, Url) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/news"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&server)
            .await;
        let url = Url::parse(&format!("{}/news", server.uri())).unwrap();
        (server, url)
    }

    #[tokio::test]
    async fn fetches_body() {
        let (_server, url) = serve(200, "<html><h1>Headlines</h1></html>").await;
        let page = fetcher().fetch(&url).await.unwrap();
        assert_eq!(page.status, 200);
        assert!(page.body.contains("Headlines"));
    }

    async fn serve_raw(body: Vec<u8>, mime: &str) -> (MockServer, Url) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/news"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, mime))
            .mount(&server)
            .await;
        let url = Url::parse(&format!("{}/news", server.uri())).unwrap();
        (server, url)
    }

    #[tokio::test]
    async fn declared_gbk_body_is_decoded() {
        // "新闻" in GBK.
        let (_server, url) = serve_raw(vec![0xD0, 0xC2, 0xCE, 0xC5], "text/html; charset=gbk").await;
        let page = fetcher().fetch(&url).await.unwrap();
        assert_eq!(page.body, "新闻");
    }

    #[tokio::test]
    async fn meta_charset_is_honoured_without_header() {
        let mut body = b"<html><head><meta charset=\"gb2312\"></head><body>".to_vec();
        body.extend_from_slice(&[0xD0, 0xC2, 0xCE, 0xC5]);
        body.extend_from_slice(b"</body></html>");
        let (_server, url) = serve_raw(body, "text/html").await;
        let page = fetcher().fetch(&url).await.unwrap();
        assert!(page.body.contains("<body>新闻</body>"), "got {}", page.body);
    }

    #[test]
    fn undeclared_legacy_encoding_is_detected() {
        let text = "今天的新闻报道了经济发展和科技创新的最新进展，专家认为市场前景良好。";
        let (bytes, _, _) = encoding_rs::GBK.encode(text);
        assert!(std::str::from_utf8(&bytes).is_err());
        assert_eq!(decode_body(Some("text/html"), &bytes), text);
    }

    #[test]
    fn charset_parameter_parsing() {
        assert_eq!(header_charset("text/html; charset=\"GBK\""), Some(encoding_rs::GBK));
        assert_eq!(header_charset("text/html;charset=utf-8"), Some(UTF_8));
        assert_eq!(header_charset("text/html"), None);
        assert_eq!(header_charset("text/html; charset=no-such-thing"), None);
        assert_eq!(decode_body(None, "plain ascii".as_bytes()), "plain ascii");
    }

    #[tokio::test]
    async fn classifies_statuses() {
        for (status, kind) in [
            (404, ErrorKind::PermanentFetch),
            (403, ErrorKind::PermanentFetch),
            (429, ErrorKind::RateLimited),
            (503, ErrorKind::TransientNetwork),
        ] {
            let (_server, url) = serve(status, "nope").await;
            let err = fetcher().fetch(&url).await.unwrap_err();
            assert_eq!(err.kind, kind, "status {status}");
        }
    }

    #[tokio::test]
    async fn empty_body_is_malformed() {
        let (_server, url) = serve(200, "   ").await;
        let err = fetcher().fetch(&url).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;
        let url = Url::parse(&server.uri()).unwrap();
        let err = fetcher().fetch(&url).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        // Port 9 (discard) on localhost is almost never listening.
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let err = fetcher().fetch(&url).await.unwrap_err();
        assert!(
            matches!(err.kind, ErrorKind::TransientNetwork | ErrorKind::Timeout),
            "got {err}"
        );
    }
}
