//! RPC client for the repository backend
//!
//! The backend daemon runs on the same host and exposes a JSON endpoint per
//! method under `/rpc/`. Replies are an envelope of either `ret` or `err`;
//! `err` strings for the file operations are classified into the typed
//! [`StoreError`] variants the terminators dispatch on. Staged files are
//! referenced by path because the backend shares the spool directory.

use crate::repo::{
    AccessAuthority, FileStore, QuotaAuthority, RepoDirectory, QuotaError, StoreError, WebAccess,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, warn};

pub struct RpcClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug)]
enum CallError {
    /// The backend could not be reached or answered garbage.
    Transport(String),
    /// The backend answered with an application error string.
    Backend(String),
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct RpcEnvelope<T> {
    #[serde(default)]
    ret: Option<T>,
    #[serde(default)]
    err: Option<String>,
}

#[derive(Deserialize)]
struct AccessReply {
    repo_id: String,
    username: String,
}

impl RpcClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, CallError> {
        let url = format!("{}/rpc/{}", self.base_url, method);
        debug!(method, "backend rpc call");

        let response = self
            .http
            .post(&url)
            .json(&params)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CallError::Transport(e.to_string()))?;

        let envelope: RpcEnvelope<T> = response
            .json()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;

        if let Some(err) = envelope.err {
            return Err(CallError::Backend(err));
        }
        envelope
            .ret
            .ok_or_else(|| CallError::Transport("empty rpc reply".to_string()))
    }

    async fn call_file_op(
        &self,
        method: &str,
        repo_id: &str,
        src_path: &Path,
        parent_dir: &str,
        name: &str,
        user: &str,
    ) -> Result<(), StoreError> {
        let params = json!({
            "repo_id": repo_id,
            "src_path": src_path.to_string_lossy(),
            "parent_dir": parent_dir,
            "name": name,
            "user": user,
        });
        match self.call::<Value>(method, params).await {
            Ok(_) => Ok(()),
            Err(CallError::Backend(msg)) => Err(classify_store_error(msg)),
            Err(CallError::Transport(msg)) => Err(StoreError::Transport(msg)),
        }
    }
}

/// Classify a backend error string into the variant the terminators map to
/// a wire code. Unknown strings stay as-is and surface as internal errors.
fn classify_store_error(msg: String) -> StoreError {
    match msg.as_str() {
        "Invalid filename" => StoreError::InvalidFilename,
        "file already exists" => StoreError::AlreadyExists,
        "file does not exist" => StoreError::NotFound,
        _ => StoreError::Other(msg),
    }
}

#[async_trait]
impl AccessAuthority for RpcClient {
    async fn query_access_token(&self, token: &str) -> Option<WebAccess> {
        match self
            .call::<AccessReply>("web_query_access_token", json!({ "token": token }))
            .await
        {
            Ok(reply) => Some(WebAccess {
                repo_id: reply.repo_id,
                user: reply.username,
            }),
            Err(e) => {
                warn!("access token lookup failed: {e:?}");
                None
            }
        }
    }
}

#[async_trait]
impl QuotaAuthority for RpcClient {
    async fn check_quota(&self, repo_id: &str) -> Result<(), QuotaError> {
        match self
            .call::<Value>("check_quota", json!({ "repo_id": repo_id }))
            .await
        {
            Ok(_) => Ok(()),
            Err(CallError::Backend(_)) => Err(QuotaError::Over(repo_id.to_string())),
            Err(CallError::Transport(msg)) => Err(QuotaError::Transport(msg)),
        }
    }
}

#[async_trait]
impl RepoDirectory for RpcClient {
    async fn head_dir_listing(&self, repo_id: &str, parent_dir: &str) -> Option<Vec<String>> {
        match self
            .call::<Vec<String>>(
                "list_dir_at_head",
                json!({ "repo_id": repo_id, "path": parent_dir }),
            )
            .await
        {
            Ok(listing) => Some(listing),
            Err(e) => {
                warn!(repo_id, parent_dir, "dir listing failed: {e:?}");
                None
            }
        }
    }
}

#[async_trait]
impl FileStore for RpcClient {
    async fn post_file(
        &self,
        repo_id: &str,
        src_path: &Path,
        parent_dir: &str,
        name: &str,
        user: &str,
    ) -> Result<(), StoreError> {
        self.call_file_op("post_file", repo_id, src_path, parent_dir, name, user)
            .await
    }

    async fn put_file(
        &self,
        repo_id: &str,
        src_path: &Path,
        parent_dir: &str,
        name: &str,
        user: &str,
    ) -> Result<(), StoreError> {
        self.call_file_op("put_file", repo_id, src_path, parent_dir, name, user)
            .await
    }
}
