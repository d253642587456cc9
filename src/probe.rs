//! HTTP health probe.
//!
//! A probe reports the status code of any completed exchange, whatever the code.
//! Only failures to get a response at all (refused, DNS, timeout, protocol
//! error) produce an error description instead.
use std::time::Duration;

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// HTTP status code, absent when no response was received.
    pub status: Option<u16>,
    /// Why no response was received.
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn status(code: u16) -> Self {
        Self {
            status: Some(code),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: None,
            error: Some(error.into()),
        }
    }
}

/// Performs one bounded health check against a URL.
pub trait Prober {
    async fn probe(&mut self, url: &str, timeout: Duration) -> ProbeOutcome;
}

/// Probes with a plain HTTP GET.
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("service-watchdog/", env!("CARGO_PKG_VERSION")))
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }
}

impl Prober for HttpProber {
    async fn probe(&mut self, url: &str, timeout: Duration) -> ProbeOutcome {
        tracing::info!(%url, "probing");

        match self.client.get(url).timeout(timeout).send().await {
            Ok(resp) => {
                let code = resp.status().as_u16();
                if resp.status().is_success() {
                    tracing::info!(status = code, "probe responded");
                } else {
                    tracing::warn!(status = code, "probe responded with error status");
                }
                ProbeOutcome::status(code)
            }
            Err(e) => {
                let detail = describe(&e);
                tracing::warn!(error = %detail, "probe failed");
                ProbeOutcome::failed(format!("request error: {detail}"))
            }
        }
    }
}

/// Flatten an error and its sources into one line.
fn describe(e: &(dyn std::error::Error + 'static)) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !msg.contains(&text) {
            msg.push_str(": ");
            msg.push_str(&text);
        }
        source = inner.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the URL to hit.
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
        });
        format!("http://{addr}/snapshot")
    }

    #[tokio::test]
    async fn ok_response_yields_status() {
        let url =
            serve_once("HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok").await;
        let mut prober = HttpProber::new().unwrap();

        let outcome = prober.probe(&url, Duration::from_secs(5)).await;
        assert_eq!(outcome, ProbeOutcome::status(200));
    }

    #[tokio::test]
    async fn error_status_is_not_an_error() {
        let url = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let mut prober = HttpProber::new().unwrap();

        let outcome = prober.probe(&url, Duration::from_secs(5)).await;
        assert_eq!(outcome.status, Some(503));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn connection_refused_has_no_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut prober = HttpProber::new().unwrap();
        let outcome = prober
            .probe(&format!("http://{addr}/snapshot"), Duration::from_secs(5))
            .await;
        assert!(outcome.status.is_none());
        assert!(outcome.error.unwrap().starts_with("request error:"));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut prober = HttpProber::new().unwrap();
        let outcome = prober
            .probe(&format!("http://{addr}/"), Duration::from_millis(200))
            .await;
        assert!(outcome.status.is_none());
        assert!(outcome.error.is_some());
    }

    #[test]
    fn describe_includes_sources() {
        #[derive(Debug)]
        struct Wrapper(std::io::Error);
        impl std::fmt::Display for Wrapper {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "send failed")
            }
        }
        impl std::error::Error for Wrapper {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }
        let wrapped = Wrapper(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(describe(&wrapped), "send failed: connection refused");
    }
}
