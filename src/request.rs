use async_trait::async_trait;
use reqwest::{Client, Proxy, Url};
use tracing::debug;

use crate::error::FetchError;
use crate::throttle::THROTTLE_STATUSES;
use crate::{Config, Error, Result};

/// One GET for one logical page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: Url,
    /// HTTP Basic `(username, password)`.
    pub credentials: Option<(String, String)>,
}

impl PageRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            credentials: None,
        }
    }
}

/// Undecoded response to a `PageRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub body: Vec<u8>,
    pub status: u16,
    pub final_url: String,
}

impl RawPage {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Issues page requests. Never retries; a failed page is reported as is.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, request: &PageRequest) -> core::result::Result<RawPage, FetchError>;
}

/// `PageFetcher` over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout());
        if let Some(proxy) = config.proxy_url() {
            let proxy = Proxy::all(proxy.as_str())
                .map_err(|e| Error::Config(format!("invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Wraps an already configured client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, request: &PageRequest) -> core::result::Result<RawPage, FetchError> {
        let mut builder = self.client.get(request.url.clone());
        if let Some((user, password)) = &request.credentials {
            builder = builder.basic_auth(user, Some(password));
        }
        let res = builder.send().await?;

        let status = res.status();
        let final_url = res.url().to_string();
        debug!(url = %request.url, status = status.as_u16(), "fetched page");

        // Throttle statuses pass through so the detector can classify them.
        if !(status.is_success()
            || status.is_redirection()
            || THROTTLE_STATUSES.contains(&status.as_u16()))
        {
            return Err(match status.as_u16() {
                401 => FetchError::Unauthorized,
                code => FetchError::Status(code),
            });
        }

        let body = res.bytes().await?.to_vec();
        Ok(RawPage {
            body,
            status: status.as_u16(),
            final_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::error::ThrottleSignal;
    use crate::throttle::{self, Verdict};
    use pretty_assertions::assert_eq;

    /// Answers one connection with `status` and `body`; the handle yields the raw request head.
    async fn serve_once(status: &str, body: &'static str) -> (Url, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: text/html\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head: Vec<u8> = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&head).into_owned()
        });
        let url = Url::parse(&format!("http://{addr}/alice?page=1")).unwrap();
        (url, handle)
    }

    fn fetcher() -> HttpFetcher {
        // Environment proxies must not intercept loopback requests.
        HttpFetcher::with_client(Client::builder().no_proxy().build().unwrap())
    }

    #[test]
    fn builds_with_proxy_and_agent() {
        let config = Config::default().with_proxy("localhost:8080");
        assert!(HttpFetcher::new(&config).is_ok());
    }

    #[test]
    fn raw_page_text_is_lossy() {
        let page = RawPage {
            body: vec![b'o', b'k', 0xff],
            status: 200,
            final_url: "http://example.com/".into(),
        };
        assert_eq!(page.text(), "ok\u{fffd}");
    }

    #[tokio::test]
    async fn success_returns_the_body() {
        let (url, server) = serve_once("200 OK", "<html>hello</html>").await;
        let page = fetcher().fetch(&PageRequest::new(url.clone())).await.unwrap();
        server.await.unwrap();

        assert_eq!(page.status, 200);
        assert_eq!(page.text(), "<html>hello</html>");
        assert_eq!(page.final_url, url.to_string());
    }

    #[tokio::test]
    async fn throttle_statuses_reach_the_detector() {
        for (status, code) in [("503 Service Unavailable", 503), ("999 Request denied", 999)] {
            let (url, server) = serve_once(status, "busy").await;
            let page = fetcher().fetch(&PageRequest::new(url)).await.unwrap();
            server.await.unwrap();

            assert_eq!(page.status, code);
            assert_eq!(
                throttle::check(&page),
                Verdict::Throttled(ThrottleSignal::Status(code))
            );
        }
    }

    #[tokio::test]
    async fn rejected_credentials_are_unauthorized() {
        let (url, server) = serve_once("401 Unauthorized", "").await;
        let err = fetcher().fetch(&PageRequest::new(url)).await.unwrap_err();
        server.await.unwrap();
        assert!(matches!(err, FetchError::Unauthorized));
    }

    #[tokio::test]
    async fn other_failures_keep_their_status() {
        let (url, server) = serve_once("404 Not Found", "gone").await;
        let err = fetcher().fetch(&PageRequest::new(url)).await.unwrap_err();
        server.await.unwrap();
        assert!(matches!(err, FetchError::Status(404)));
    }

    #[tokio::test]
    async fn credentials_are_sent_as_basic_auth() {
        let (url, server) = serve_once("200 OK", "<posts></posts>").await;
        let mut request = PageRequest::new(url);
        request.credentials = Some(("alice".into(), "secret".into()));
        fetcher().fetch(&request).await.unwrap();

        let head = server.await.unwrap().to_lowercase();
        assert!(head.starts_with("get /alice?page=1 "), "{head}");
        // base64("alice:secret")
        assert!(head.contains("authorization: basic ywxpy2u6c2vjcmv0"), "{head}");
    }

    #[tokio::test]
    async fn anonymous_requests_carry_no_credentials() {
        let (url, server) = serve_once("200 OK", "ok").await;
        fetcher().fetch(&PageRequest::new(url)).await.unwrap();
        assert!(!server.await.unwrap().to_lowercase().contains("authorization:"));
    }
}
