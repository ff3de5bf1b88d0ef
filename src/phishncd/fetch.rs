use crate::phishncd::error::{ClassifyError, Result};
use std::io::Read;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 8;
pub const DEFAULT_MAX_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_RETRIES: u32 = 2;
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);

/// Source of page markup for the URL classifier.
pub trait PageFetcher: Sync {
    fn fetch(&self, url: &str) -> Result<String>;
}

#[derive(Clone, Debug)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub max_bytes: u64,
    pub retries: u32,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_bytes: DEFAULT_MAX_BYTES,
            retries: DEFAULT_RETRIES,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Single-page HTTP GET with a timeout, a body size cap and a short
/// retry loop for transient failures.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    config: FetchConfig,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = client_builder(&config)
            .build()
            .map_err(|err| ClassifyError::Config(format!("unable to build HTTP client: {}", err)))?;
        Ok(Self { client, config })
    }

    fn fetch_once(&self, url: &str) -> std::result::Result<String, FetchFailure> {
        let response = self.client.get(url).send().map_err(|err| FetchFailure {
            transient: err.is_timeout() || err.is_connect(),
            message: err.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure {
                transient: status.is_server_error()
                    || status == reqwest::StatusCode::TOO_MANY_REQUESTS,
                message: format!("HTTP {} for url ({})", status, url),
            });
        }
        if let Some(length) = response.content_length() {
            if length > self.config.max_bytes {
                return Err(FetchFailure::permanent(format!(
                    "response of {} bytes exceeds the {} byte limit",
                    length, self.config.max_bytes
                )));
            }
        }

        let mut body = Vec::new();
        response
            .take(self.config.max_bytes.saturating_add(1))
            .read_to_end(&mut body)
            .map_err(|err| FetchFailure {
                transient: true,
                message: err.to_string(),
            })?;
        if body.len() as u64 > self.config.max_bytes {
            return Err(FetchFailure::permanent(format!(
                "response exceeds the {} byte limit",
                self.config.max_bytes
            )));
        }
        Ok(String::from_utf8_lossy(body.as_slice()).into_owned())
    }
}

impl PageFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0u32;
        loop {
            match self.fetch_once(url) {
                Ok(body) => return Ok(body),
                Err(failure) if failure.transient && attempt < self.config.retries => {
                    attempt += 1;
                    log::warn!(
                        "Fetch of {} failed ({}), retry {}/{} in {:?}",
                        url,
                        failure.message,
                        attempt,
                        self.config.retries,
                        backoff
                    );
                    std::thread::sleep(backoff);
                    backoff *= 2;
                }
                Err(failure) => return Err(ClassifyError::Network(failure.message)),
            }
        }
    }
}

fn client_builder(config: &FetchConfig) -> reqwest::blocking::ClientBuilder {
    reqwest::blocking::Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.timeout)
}

struct FetchFailure {
    transient: bool,
    message: String,
}

impl FetchFailure {
    fn permanent(message: String) -> Self {
        Self {
            transient: false,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    /// A canned reply; `None` accepts the request and never answers.
    type Reply = Option<String>;

    /// Serves `replies` in order, one connection each, on a loopback port.
    /// Returns the page URL and the number of requests received.
    fn serve(replies: Vec<Reply>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        thread::spawn(move || {
            for reply in replies {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                let counter = Arc::clone(&counter);
                thread::spawn(move || answer(stream, reply, &counter));
            }
        });
        (format!("http://{}/login", addr), hits)
    }

    fn answer(mut stream: std::net::TcpStream, reply: Reply, hits: &AtomicUsize) {
        let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
        let mut line = String::new();
        while reader.read_line(&mut line).map(|read| read > 0).unwrap_or(false) {
            if line == "\r\n" {
                break;
            }
            line.clear();
        }
        hits.fetch_add(1, Ordering::SeqCst);
        match reply {
            Some(reply) => {
                let _ = stream.write_all(reply.as_bytes());
                let _ = stream.flush();
            }
            None => thread::sleep(Duration::from_secs(2)),
        }
    }

    fn reply(status: &str, body: &str) -> Reply {
        Some(format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        ))
    }

    fn loopback_fetcher(config: FetchConfig) -> HttpFetcher {
        let client = client_builder(&config)
            .no_proxy()
            .build()
            .expect("client");
        HttpFetcher { client, config }
    }

    #[test]
    fn test_default_config_matches_deployment() {
        let config = FetchConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(8));
        assert_eq!(config.user_agent, "Mozilla/5.0");
        assert_eq!(config.retries, 2);
        assert!(config.max_bytes > 0);
    }

    #[test]
    fn test_unsupported_scheme_is_network_error_without_retry() {
        let fetcher = HttpFetcher::new(FetchConfig {
            retries: 0,
            ..FetchConfig::default()
        })
        .expect("client");
        let err = fetcher
            .fetch("ftp://files.example/page.html")
            .expect_err("ftp is not fetched");
        assert_eq!(err.kind(), "network");
    }

    #[test]
    fn test_server_error_is_retried_until_success() {
        let (url, hits) = serve(vec![
            reply("503 Service Unavailable", "busy"),
            reply("200 OK", "<p>Sign in</p>"),
        ]);
        let fetcher = loopback_fetcher(FetchConfig::default());
        let body = fetcher.fetch(url.as_str()).expect("second attempt succeeds");
        assert_eq!(body, "<p>Sign in</p>");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rate_limit_retries_with_doubling_backoff_then_fails() {
        let (url, hits) = serve(vec![
            reply("429 Too Many Requests", ""),
            reply("429 Too Many Requests", ""),
            reply("429 Too Many Requests", ""),
        ]);
        let fetcher = loopback_fetcher(FetchConfig::default());
        let started = Instant::now();
        let err = fetcher.fetch(url.as_str()).expect_err("every attempt limited");
        assert_eq!(err.kind(), "network");
        assert!(err.to_string().contains("429"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(750));
    }

    #[test]
    fn test_client_error_is_not_retried() {
        let (url, hits) = serve(vec![reply("404 Not Found", "gone"), reply("200 OK", "late")]);
        let fetcher = loopback_fetcher(FetchConfig::default());
        let err = fetcher.fetch(url.as_str()).expect_err("404 fails");
        assert_eq!(err.kind(), "network");
        assert!(err.to_string().contains("404"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timeout_is_retried() {
        let (url, hits) = serve(vec![None, None]);
        let fetcher = loopback_fetcher(FetchConfig {
            timeout: Duration::from_millis(300),
            retries: 1,
            ..FetchConfig::default()
        });
        let err = fetcher.fetch(url.as_str()).expect_err("server never answers");
        assert_eq!(err.kind(), "network");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_declared_length_over_cap_is_rejected() {
        let (url, hits) = serve(vec![reply("200 OK", &"x".repeat(64))]);
        let fetcher = loopback_fetcher(FetchConfig {
            max_bytes: 16,
            ..FetchConfig::default()
        });
        let err = fetcher.fetch(url.as_str()).expect_err("too large");
        assert_eq!(err.kind(), "network");
        assert!(err.to_string().contains("64 bytes exceeds the 16 byte limit"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_streamed_body_over_cap_is_rejected() {
        let chunked = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n40\r\n{}\r\n0\r\n\r\n",
            "y".repeat(64)
        );
        let (url, hits) = serve(vec![Some(chunked)]);
        let fetcher = loopback_fetcher(FetchConfig {
            max_bytes: 16,
            ..FetchConfig::default()
        });
        let err = fetcher.fetch(url.as_str()).expect_err("too large");
        assert_eq!(err.kind(), "network");
        assert!(err.to_string().contains("exceeds the 16 byte limit"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unbounded_cap_does_not_overflow() {
        let (url, _hits) = serve(vec![reply("200 OK", "<p>ok</p>")]);
        let fetcher = loopback_fetcher(FetchConfig {
            max_bytes: u64::MAX,
            ..FetchConfig::default()
        });
        assert_eq!(fetcher.fetch(url.as_str()).expect("fetch"), "<p>ok</p>");
    }
}
