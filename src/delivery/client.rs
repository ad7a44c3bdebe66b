/// Connection client
///
/// Consumer side of the push protocol: opens the streaming endpoint,
/// decodes frames, reconnects with exponential backoff when the
/// connection drops, and exposes the pull-based operations for clients
/// that are not currently connected.
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::delivery::frames::PushFrame;
use crate::error::{AppError, Result};
use crate::handlers::ApiResponse;
use crate::identity::USER_ID_HEADER;
use crate::models::{Notification, PagedNotifications, UnreadCount};

/// Exponential backoff with a cap; reset after a successful connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

pub struct StreamClient {
    http: reqwest::Client,
    base_url: String,
    user_id: Uuid,
}

impl StreamClient {
    pub fn new(base_url: &str, user_id: Uuid) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Consumes the push connection until it ends, forwarding decoded
    /// frames. Returns once the server closes the stream or the frame
    /// receiver goes away; transport errors surface as `Transient`.
    pub async fn stream_once(&self, frames: &UnboundedSender<PushFrame>) -> Result<()> {
        let response = self
            .http
            .get(self.url("/api/v1/notifications/stream"))
            .header(USER_ID_HEADER, self.user_id.to_string())
            .send()
            .await
            .map_err(transient)?
            .error_for_status()
            .map_err(transient)?;

        let mut body = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(transient)?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(end) = buffer.find("\n\n") {
                let event: String = buffer.drain(..end + 2).collect();
                for line in event.lines() {
                    let Some(json) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    match PushFrame::from_json(json) {
                        Ok(frame) => {
                            if frames.send(frame).is_err() {
                                // Consumer is gone; stop reading.
                                return Ok(());
                            }
                        }
                        Err(err) => {
                            debug!(error = %err, "skipping undecodable frame");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Keeps the push connection alive, reconnecting with exponential
    /// backoff on failure. Ends when the frame receiver is dropped.
    pub async fn run(&self, frames: UnboundedSender<PushFrame>) {
        let mut backoff = Backoff::default();
        loop {
            match self.stream_once(&frames).await {
                Ok(()) => backoff.reset(),
                Err(err) => warn!(error = %err, "push connection failed"),
            }
            if frames.is_closed() {
                break;
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }
    }

    pub async fn list(&self, page: i64, limit: i64) -> Result<PagedNotifications> {
        let response: ApiResponse<PagedNotifications> = self
            .http
            .get(self.url("/api/v1/notifications"))
            .query(&[("page", page), ("limit", limit)])
            .header(USER_ID_HEADER, self.user_id.to_string())
            .send()
            .await
            .map_err(transient)?
            .error_for_status()
            .map_err(transient)?
            .json()
            .await
            .map_err(transient)?;
        unwrap_data(response)
    }

    pub async fn unread(&self) -> Result<Vec<Notification>> {
        let response: ApiResponse<Vec<Notification>> = self
            .http
            .get(self.url("/api/v1/notifications/unread"))
            .header(USER_ID_HEADER, self.user_id.to_string())
            .send()
            .await
            .map_err(transient)?
            .error_for_status()
            .map_err(transient)?
            .json()
            .await
            .map_err(transient)?;
        unwrap_data(response)
    }

    pub async fn unread_count(&self) -> Result<i64> {
        let response: ApiResponse<UnreadCount> = self
            .http
            .get(self.url("/api/v1/notifications/unread/count"))
            .header(USER_ID_HEADER, self.user_id.to_string())
            .send()
            .await
            .map_err(transient)?
            .error_for_status()
            .map_err(transient)?
            .json()
            .await
            .map_err(transient)?;
        unwrap_data(response).map(|c| c.count)
    }

    pub async fn mark_read(&self, id: Uuid) -> Result<()> {
        self.http
            .patch(self.url(&format!("/api/v1/notifications/{}/read", id)))
            .header(USER_ID_HEADER, self.user_id.to_string())
            .send()
            .await
            .map_err(transient)?
            .error_for_status()
            .map_err(transient)?;
        Ok(())
    }

    pub async fn mark_all_read(&self) -> Result<()> {
        self.http
            .post(self.url("/api/v1/notifications/read-all"))
            .header(USER_ID_HEADER, self.user_id.to_string())
            .send()
            .await
            .map_err(transient)?
            .error_for_status()
            .map_err(transient)?;
        Ok(())
    }
}

fn transient(err: reqwest::Error) -> AppError {
    AppError::Transient(err.to_string())
}

fn unwrap_data<T>(response: ApiResponse<T>) -> Result<T> {
    response
        .data
        .ok_or_else(|| AppError::Internal(response.error.unwrap_or_else(|| "empty response".into())))
}
