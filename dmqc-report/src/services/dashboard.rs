//! Tracking dashboard client
//!
//! The dashboard records, per subject, how many sessions exist and how many
//! had been seen when the QC report was last generated. A report older than
//! the latest repeat session must be regenerated.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const USER_AGENT: &str = concat!("dmqc/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Dashboard client errors
#[derive(Debug, Error)]
pub enum DashboardError {
    /// Network communication error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Dashboard returned an error response
    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    /// Failed to parse response JSON
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Subject record as tracked by the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DashboardSubject {
    /// Session count when the report was last generated
    pub last_qc_repeat_generated: u32,
    /// Sessions currently known
    pub session_count: u32,
}

impl DashboardSubject {
    /// A repeat session arrived after the report was generated
    pub fn repeat_pending(&self) -> bool {
        self.last_qc_repeat_generated < self.session_count
    }
}

#[derive(Debug, Serialize)]
struct QcUpdate<'a> {
    static_page: &'a str,
    last_qc_repeat_generated: u32,
}

/// Dashboard lookups and updates
#[async_trait]
pub trait Dashboard: Send + Sync {
    /// `Ok(None)` when the subject is unknown or no dashboard is configured
    async fn get_subject(&self, full_id: &str) -> Result<Option<DashboardSubject>, DashboardError>;

    /// Record the generated report and the session count it covers
    async fn record_report(
        &self,
        full_id: &str,
        report: &str,
        session_count: u32,
    ) -> Result<(), DashboardError>;
}

/// Stand-in used when the study has no `dashboard_url`
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDashboard;

#[async_trait]
impl Dashboard for NoDashboard {
    async fn get_subject(&self, _full_id: &str) -> Result<Option<DashboardSubject>, DashboardError> {
        Ok(None)
    }

    async fn record_report(&self, _: &str, _: &str, _: u32) -> Result<(), DashboardError> {
        Ok(())
    }
}

/// HTTP JSON dashboard client
pub struct HttpDashboard {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpDashboard {
    pub fn new(base_url: &str) -> Result<Self, DashboardError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| DashboardError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn subject_url(&self, full_id: &str) -> String {
        format!("{}/api/subjects/{}", self.base_url, full_id)
    }
}

#[async_trait]
impl Dashboard for HttpDashboard {
    async fn get_subject(&self, full_id: &str) -> Result<Option<DashboardSubject>, DashboardError> {
        let url = self.subject_url(full_id);
        tracing::debug!(subject = %full_id, url = %url, "Querying dashboard");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| DashboardError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DashboardError::ApiError(status.as_u16(), error_text));
        }

        let body = response
            .text()
            .await
            .map_err(|e| DashboardError::NetworkError(e.to_string()))?;

        serde_json::from_str::<DashboardSubject>(&body)
            .map(Some)
            .map_err(|e| DashboardError::ParseError(format!("{} in {:?}", e, body)))
    }

    async fn record_report(
        &self,
        full_id: &str,
        report: &str,
        session_count: u32,
    ) -> Result<(), DashboardError> {
        let url = format!("{}/qc", self.subject_url(full_id));
        let body = QcUpdate {
            static_page: report,
            last_qc_repeat_generated: session_count,
        };

        let response = self
            .http_client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DashboardError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DashboardError::ApiError(status.as_u16(), error_text));
        }

        tracing::debug!(subject = %full_id, report, "Dashboard updated");
        Ok(())
    }
}
