use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::{debug, error};

use crate::models::SyncError;

pub const CALENDAR_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

/// Where feeds come from and where exported calendars go.
#[async_trait]
pub trait CalendarFeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, SyncError>;

    async fn push(&self, url: &str, calendar: String) -> Result<(), SyncError>;
}

/// Plain HTTP(S) feeds.
pub struct HttpCalendarFeed {
    client: Client,
}

impl HttpCalendarFeed {
    pub fn new(timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Fetch(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl CalendarFeedSource for HttpCalendarFeed {
    async fn fetch(&self, url: &str) -> Result<String, SyncError> {
        debug!("Fetching calendar feed from {}", url);

        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "text/calendar")
            .send()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            error!("Calendar feed {} answered {}", url, status);
            return Err(SyncError::Fetch(format!("HTTP {}", status)));
        }

        response.text().await.map_err(|e| SyncError::Fetch(e.to_string()))
    }

    async fn push(&self, url: &str, calendar: String) -> Result<(), SyncError> {
        debug!("Pushing calendar to {}", url);

        let response = self
            .client
            .put(url)
            .header(header::CONTENT_TYPE, CALENDAR_CONTENT_TYPE)
            .body(calendar)
            .send()
            .await
            .map_err(|e| SyncError::Push(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Calendar push to {} failed: {} - {}", url, status, body);
            return Err(SyncError::Push(format!("HTTP {}", status)));
        }

        Ok(())
    }
}
