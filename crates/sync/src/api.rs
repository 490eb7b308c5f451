//! HTTP client for the budget endpoints.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;

use relief_budget_core::messages::{
    BroadcastUpdateRequest, BroadcastUpdateResponse, ValidateRequest,
};
use relief_budget_core::{BudgetSnapshot, ValidationResult};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

/// Budget server operations used by the client runtime.
#[async_trait]
pub trait BudgetApi: Send + Sync {
    /// POST /budget/validate
    async fn validate(&self, request: &ValidateRequest) -> Result<ValidationResult>;

    /// POST /budget/broadcast-update
    async fn broadcast_update(
        &self,
        request: &BroadcastUpdateRequest,
    ) -> Result<BroadcastUpdateResponse>;

    /// GET /budget/{mis}
    async fn fetch_budget(&self, mis: &str) -> Result<BudgetSnapshot>;

    /// Replaces the bearer token sent with every request.
    fn set_session_key(&self, _key: Option<String>) {}
}

/// Error body written by the budget server: `{"code": 404, "message": "..."}`.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    code: Option<u16>,
    message: String,
}

fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(ApiErrorResponse {
            code: Some(code),
            message,
        }) if code != status.as_u16() => format!("{}: {}", code, message),
        Ok(error) => error.message,
        Err(_) => format!("Request failed: {}", body),
    }
}

/// reqwest-backed [`BudgetApi`].
#[derive(Debug)]
pub struct BudgetApiClient {
    client: reqwest::Client,
    config: SyncConfig,
    session_key: RwLock<Option<String>>,
}

impl BudgetApiClient {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            session_key: RwLock::new(None),
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let key = self
            .session_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(key) = key {
            let auth_value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| SyncError::invalid_request("Invalid session key format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }
        Ok(headers)
    }

    /// Parse a JSON response body.
    ///
    /// 401 maps to [`SyncError::AuthExpired`]; anything that is not JSON maps
    /// to [`SyncError::UnexpectedContentType`] (proxies and login pages answer
    /// with HTML).
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(SyncError::AuthExpired);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await?;
        debug!("API response ({}): {}", status, body);

        if !status.is_success() {
            return Err(SyncError::api(status.as_u16(), error_message(status, &body)));
        }

        if !content_type.contains("json") {
            return Err(SyncError::UnexpectedContentType(if content_type.is_empty() {
                "none".to_string()
            } else {
                content_type
            }));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "Failed to deserialize response. Body: {}, Error: {}",
                body,
                e
            );
            SyncError::Json(e)
        })
    }
}

#[async_trait]
impl BudgetApi for BudgetApiClient {
    async fn validate(&self, request: &ValidateRequest) -> Result<ValidationResult> {
        let response = self
            .client
            .post(self.config.endpoint("/budget/validate"))
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn broadcast_update(
        &self,
        request: &BroadcastUpdateRequest,
    ) -> Result<BroadcastUpdateResponse> {
        let response = self
            .client
            .post(self.config.endpoint("/budget/broadcast-update"))
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn fetch_budget(&self, mis: &str) -> Result<BudgetSnapshot> {
        if mis.trim().is_empty() {
            return Err(SyncError::invalid_request("Project mis is required"));
        }
        let mut url = url::Url::parse(&self.config.endpoint("/budget"))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::invalid_url(self.config.base_url.clone()))?
            .push(mis);

        let response = self
            .client
            .get(url)
            .headers(self.headers()?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    fn set_session_key(&self, key: Option<String>) {
        *self
            .session_key
            .write()
            .unwrap_or_else(PoisonError::into_inner) = key;
    }
}

/// Scripted [`BudgetApi`] for tests.
///
/// Validation replies are consumed in order; with none left `validate` fails
/// like an unreachable server. Broadcasts are recorded and acknowledged.
#[derive(Default)]
pub struct MockBudgetApi {
    validate_replies: Mutex<VecDeque<Result<ValidationResult>>>,
    snapshots: Mutex<HashMap<String, BudgetSnapshot>>,
    validate_calls: Mutex<Vec<ValidateRequest>>,
    broadcasts: Mutex<Vec<BroadcastUpdateRequest>>,
    fetches: Mutex<Vec<String>>,
}

impl MockBudgetApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_validate_reply(&self, reply: Result<ValidationResult>) {
        self.validate_replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    pub fn insert_snapshot(&self, snapshot: BudgetSnapshot) {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.mis.clone(), snapshot);
    }

    pub fn validate_calls(&self) -> Vec<ValidateRequest> {
        self.validate_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn broadcasts(&self) -> Vec<BroadcastUpdateRequest> {
        self.broadcasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl BudgetApi for MockBudgetApi {
    async fn validate(&self, request: &ValidateRequest) -> Result<ValidationResult> {
        self.validate_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.validate_replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::connection("no scripted reply")))
    }

    async fn broadcast_update(
        &self,
        request: &BroadcastUpdateRequest,
    ) -> Result<BroadcastUpdateResponse> {
        self.broadcasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        Ok(BroadcastUpdateResponse {
            success: true,
            recipients: 1,
        })
    }

    async fn fetch_budget(&self, mis: &str) -> Result<BudgetSnapshot> {
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(mis.to_string());
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(mis)
            .cloned()
            .ok_or_else(|| SyncError::api(404, format!("Project {} not found", mis)))
    }
}
