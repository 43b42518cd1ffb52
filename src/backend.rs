//! Backend collaborator interface.
//!
//! The engine only ever talks to an abstract `BackendClient`; the concrete
//! transport lives behind it. `HttpBackend` is the production adapter:
//! JSON over HTTP with a bounded linear retry (3 attempts, delay growing
//! with the attempt number).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::NetworkError;
use crate::types::CaseType;

pub const MAX_RETRIES: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_millis(1000);

/// One row of the remotely maintained team ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankEntry {
    pub id: String,
    pub score: u64,
    #[serde(default)]
    pub goal: Option<u32>,
    /// Human-readable "last case" label, passed through for display.
    #[serde(default)]
    pub last_activity_label: Option<String>,
    #[serde(default)]
    pub last_activity_ts: Option<DateTime<Utc>>,
}

/// Team-level KPIs reported alongside the ranking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TeamKpis {
    pub team_total: u64,
    /// Percentage of the team currently at goal.
    pub team_efficiency: u32,
    pub weekly_data: [u64; 7],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeamData {
    pub ranking: Vec<RankEntry>,
    pub kpis: TeamKpis,
}

/// A user as the remote directory reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUser {
    pub id: String,
    pub leader_id: String,
    #[serde(default)]
    pub name: String,
}

/// A locally registered case on its way to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseSubmission {
    pub agent_id: String,
    pub leader_id: String,
    pub case_type: CaseType,
    pub case_id: String,
    pub level_up: bool,
}

#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn register_case(&self, submission: &CaseSubmission) -> Result<(), NetworkError>;

    async fn fetch_team_data(
        &self,
        leader_id: &str,
        date: NaiveDate,
    ) -> Result<TeamData, NetworkError>;

    async fn fetch_users(&self) -> Result<Vec<RemoteUser>, NetworkError>;

    /// Single-record lookup. `Ok(None)` means the directory has no such
    /// user — distinct from a transport failure.
    async fn lookup_user(&self, id: &str) -> Result<Option<RemoteUser>, NetworkError>;
}

// ---------------------------------------------------------------------------
// HTTP adapter
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    body: T,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TeamDataBody {
    ranking: Vec<RankEntry>,
    kpis: TeamKpis,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UsersBody {
    users: Vec<RemoteUser>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LookupBody {
    user: Option<RemoteUser>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody<'a> {
    action: &'static str,
    agent: &'a str,
    leader: &'a str,
    case_type: CaseType,
    case_id: &'a str,
    level_up: bool,
}

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Sends a request, retrying transport failures and error statuses
    /// with a linearly growing delay. Rejections and decode failures are
    /// never retried.
    async fn send_with_retry(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, NetworkError> {
        let mut attempt: u32 = 0;
        loop {
            let request = builder
                .try_clone()
                .ok_or_else(|| NetworkError::Transport("request is not retryable".into()))?;

            let error = match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => NetworkError::Status(response.status().as_u16()),
                Err(err) => NetworkError::from(err),
            };

            attempt += 1;
            if attempt >= MAX_RETRIES || !error.is_retryable() {
                return Err(error);
            }
            log::warn!(
                "Backend request failed ({}), retrying ({}/{})",
                error,
                attempt,
                MAX_RETRIES
            );
            tokio::time::sleep(RETRY_DELAY * attempt).await;
        }
    }

    async fn unwrap_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, NetworkError> {
        let envelope: Envelope<T> = response.json().await.map_err(NetworkError::from)?;
        if !envelope.ok {
            return Err(NetworkError::Rejected(
                envelope.error.unwrap_or_else(|| "unspecified error".into()),
            ));
        }
        Ok(envelope.body)
    }
}

#[async_trait]
impl BackendClient for HttpBackend {
    async fn register_case(&self, submission: &CaseSubmission) -> Result<(), NetworkError> {
        let body = RegisterBody {
            action: "registerCase",
            agent: &submission.agent_id,
            leader: &submission.leader_id,
            case_type: submission.case_type,
            case_id: &submission.case_id,
            level_up: submission.level_up,
        };
        let response = self
            .send_with_retry(self.client.post(&self.base_url).json(&body))
            .await?;
        #[derive(Debug, Default, Deserialize)]
        #[serde(default)]
        struct Empty {}
        Self::unwrap_envelope::<Empty>(response).await.map(|_| ())
    }

    async fn fetch_team_data(
        &self,
        leader_id: &str,
        date: NaiveDate,
    ) -> Result<TeamData, NetworkError> {
        let date = date.format("%Y-%m-%d").to_string();
        let response = self
            .send_with_retry(
                self.client
                    .get(&self.base_url)
                    .query(&[("team", leader_id), ("date", date.as_str())]),
            )
            .await?;
        let body: TeamDataBody = Self::unwrap_envelope(response).await?;
        Ok(TeamData {
            ranking: body.ranking,
            kpis: body.kpis,
        })
    }

    async fn fetch_users(&self) -> Result<Vec<RemoteUser>, NetworkError> {
        let response = self
            .send_with_retry(self.client.get(&self.base_url).query(&[("users", "1")]))
            .await?;
        let body: UsersBody = Self::unwrap_envelope(response).await?;
        Ok(body.users)
    }

    async fn lookup_user(&self, id: &str) -> Result<Option<RemoteUser>, NetworkError> {
        let response = self
            .send_with_retry(self.client.get(&self.base_url).query(&[("lookup", id)]))
            .await?;
        let body: LookupBody = Self::unwrap_envelope(response).await?;
        Ok(body.user)
    }
}
