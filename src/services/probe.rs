/// Manifest-availability probe
///
/// Decides whether a channel is currently reachable by checking its HLS
/// manifest. Pure read, no side effects. Network failures and non-2xx
/// responses degrade to "not live": absence of evidence is evidence of
/// absence for this subsystem.
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStatus {
    pub live: bool,
}

#[async_trait]
pub trait ManifestProbe: Send + Sync {
    /// Checks whether a manifest is currently served for `slug`.
    /// Never fails; a probe that cannot reach anything reports not live.
    async fn probe(&self, slug: &str) -> LiveStatus;
}

pub struct HttpManifestProbe {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpManifestProbe {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Ordered candidates: the proxied endpoint first, then the direct
    /// port the ingest server serves HLS on.
    fn candidate_urls(&self, slug: &str) -> Vec<String> {
        vec![
            format!("{}/app/live/{}/index.m3u8", self.base_url, slug),
            format!("{}:8888/app/live/{}/index.m3u8", self.base_url, slug),
        ]
    }
}

#[async_trait]
impl ManifestProbe for HttpManifestProbe {
    async fn probe(&self, slug: &str) -> LiveStatus {
        for url in self.candidate_urls(slug) {
            match self
                .client
                .head(&url)
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    debug!(%slug, %url, "manifest reachable");
                    return LiveStatus { live: true };
                }
                Ok(response) => {
                    debug!(%slug, %url, status = %response.status(), "manifest not served");
                }
                Err(err) => {
                    debug!(%slug, %url, error = %err, "probe attempt failed");
                }
            }
        }
        LiveStatus { live: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_urls_try_proxy_then_direct_port() {
        let probe = HttpManifestProbe::new("http://media.example.com/", Duration::from_secs(1));
        let urls = probe.candidate_urls("alice");
        assert_eq!(
            urls,
            vec![
                "http://media.example.com/app/live/alice/index.m3u8",
                "http://media.example.com:8888/app/live/alice/index.m3u8",
            ]
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_degrades_to_not_live() {
        // Reserved TEST-NET address; connection fails fast with the
        // short timeout and must never surface as an error.
        let probe = HttpManifestProbe::new("http://192.0.2.1", Duration::from_millis(200));
        let status = probe.probe("alice").await;
        assert!(!status.live);
    }
}
