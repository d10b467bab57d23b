// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cloud strategy: keys held in Google Secret Manager and fetched at decrypt
//! time, never written to host disk.
//!
//! The current key is the latest version of secret `<prefix><identity>`; a
//! staged key lives in `<prefix><identity>-next` until the rollover is
//! confirmed or aborted.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{Client, Method, StatusCode};
use sealfleet_config::model::CloudKeysConfig;
use sealfleet_core::{BundleIdentity, KeyId, KeyMaterial, KeyProvider, SealError, StrategyId};
use sealfleet_vault::crypto;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::locks::IdentityLocks;

#[derive(Deserialize)]
struct AccessResponse {
    payload: Option<AccessPayload>,
}

#[derive(Deserialize)]
struct AccessPayload {
    data: Option<String>,
}

/// Key provider backed by the Secret Manager REST API.
pub struct CloudKeyProvider {
    client: Client,
    endpoint: String,
    project: String,
    prefix: String,
    token: Option<SecretString>,
    locks: IdentityLocks,
}

impl std::fmt::Debug for CloudKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudKeyProvider")
            .field("endpoint", &self.endpoint)
            .field("project", &self.project)
            .field("prefix", &self.prefix)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl CloudKeyProvider {
    /// Build from configuration, reading the bearer token from `token_env`.
    pub fn from_config(config: &CloudKeysConfig) -> Result<Self, SealError> {
        let project = config
            .project
            .clone()
            .ok_or_else(|| SealError::Config("keys.cloud.project is not set".into()))?;
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.is_empty())
            .map(SecretString::from);
        if token.is_none() {
            warn!(env = %config.token_env, "cloud key token not set; key requests will fail");
        }
        Self::new(
            &config.endpoint,
            project,
            config.secret_prefix.clone(),
            token,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn new(
        endpoint: &str,
        project: String,
        prefix: String,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, SealError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SealError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            project,
            prefix,
            token,
            locks: IdentityLocks::new(),
        })
    }

    fn secret_id(&self, identity: &BundleIdentity, staged: bool) -> String {
        let suffix = if staged { "-next" } else { "" };
        // Secret ids allow [A-Za-z0-9_-]; identities may contain dots.
        format!("{}{}{suffix}", self.prefix, identity.as_str().replace('.', "_"))
    }

    fn secret_resource(&self, secret_id: &str) -> String {
        format!(
            "{}/projects/{}/secrets/{secret_id}",
            self.endpoint, self.project
        )
    }

    async fn request(
        &self,
        identity: &BundleIdentity,
        method: Method,
        url: String,
        body: Option<Value>,
    ) -> Result<reqwest::Response, SealError> {
        let token = self.token.as_ref().ok_or_else(|| {
            debug!(identity = %identity, "no cloud token configured");
            SealError::key_unavailable(identity)
        })?;
        let mut builder = self
            .client
            .request(method, url)
            .bearer_auth(token.expose_secret());
        if let Some(payload) = body {
            builder = builder.json(&payload);
        }
        builder.send().await.map_err(|e| {
            warn!(identity = %identity, error = %e, "cloud key backend unreachable");
            SealError::key_unavailable(identity)
        })
    }

    /// Latest version of a secret, `None` if the secret does not exist.
    async fn fetch_latest(
        &self,
        identity: &BundleIdentity,
        staged: bool,
    ) -> Result<Option<KeyMaterial>, SealError> {
        let url = format!(
            "{}/versions/latest:access",
            self.secret_resource(&self.secret_id(identity, staged))
        );
        let response = self.request(identity, Method::GET, url, None).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let parsed: AccessResponse = response.json().await.map_err(|e| {
                    warn!(identity = %identity, error = %e, "undecodable access response");
                    SealError::key_unavailable(identity)
                })?;
                let data = parsed
                    .payload
                    .and_then(|p| p.data)
                    .ok_or_else(|| SealError::key_unavailable(identity))?;
                let decoded = Zeroizing::new(
                    STANDARD
                        .decode(data)
                        .map_err(|_| SealError::key_unavailable(identity))?,
                );
                let text = std::str::from_utf8(&decoded)
                    .map_err(|_| SealError::key_unavailable(identity))?;
                KeyMaterial::from_hex(StrategyId::Cloud, text)
                    .map(Some)
                    .map_err(|_| SealError::key_unavailable(identity))
            }
            status => {
                warn!(identity = %identity, %status, "cloud key access refused");
                Err(SealError::key_unavailable(identity))
            }
        }
    }

    async fn ensure_secret(&self, identity: &BundleIdentity, secret_id: &str) -> Result<(), SealError> {
        let url = format!(
            "{}/projects/{}/secrets?secretId={secret_id}",
            self.endpoint, self.project
        );
        let body = json!({ "replication": { "automatic": {} } });
        let response = self.request(identity, Method::POST, url, Some(body)).await?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::CONFLICT => Ok(()),
            status => {
                warn!(identity = %identity, %status, "cloud secret creation refused");
                Err(SealError::key_unavailable(identity))
            }
        }
    }

    async fn add_version(
        &self,
        identity: &BundleIdentity,
        staged: bool,
        key: &KeyMaterial,
    ) -> Result<(), SealError> {
        let secret_id = self.secret_id(identity, staged);
        self.ensure_secret(identity, &secret_id).await?;
        let url = format!("{}:addVersion", self.secret_resource(&secret_id));
        let encoded = Zeroizing::new(STANDARD.encode(key.to_hex().as_bytes()));
        let body = json!({ "payload": { "data": encoded.as_str() } });
        let response = self.request(identity, Method::POST, url, Some(body)).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            warn!(identity = %identity, status = %response.status(), "cloud addVersion refused");
            Err(SealError::key_unavailable(identity))
        }
    }

    async fn delete_staged(&self, identity: &BundleIdentity) -> Result<bool, SealError> {
        let url = self.secret_resource(&self.secret_id(identity, true));
        let response = self.request(identity, Method::DELETE, url, None).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => {
                warn!(identity = %identity, %status, "cloud staged key deletion refused");
                Err(SealError::key_unavailable(identity))
            }
        }
    }
}

#[async_trait]
impl KeyProvider for CloudKeyProvider {
    fn strategy_id(&self) -> StrategyId {
        StrategyId::Cloud
    }

    async fn resolve(&self, identity: &BundleIdentity) -> Result<KeyMaterial, SealError> {
        self.fetch_latest(identity, false)
            .await?
            .ok_or_else(|| SealError::key_unavailable(identity))
    }

    async fn resolve_key(
        &self,
        identity: &BundleIdentity,
        key_id: &KeyId,
    ) -> Result<KeyMaterial, SealError> {
        for staged in [false, true] {
            if let Some(key) = self.fetch_latest(identity, staged).await?
                && key.key_id() == key_id
            {
                return Ok(key);
            }
        }
        Err(SealError::key_unavailable(identity))
    }

    async fn rotate(&self, identity: &BundleIdentity) -> Result<KeyMaterial, SealError> {
        let _guard = self.locks.lock(identity).await;
        let key = KeyMaterial::new(StrategyId::Cloud, crypto::generate_random_key()?);
        self.add_version(identity, true, &key).await?;
        info!(identity = %identity, key_id = %key.key_id(), "staged cloud key");
        Ok(key)
    }

    async fn confirm_rollover(
        &self,
        identity: &BundleIdentity,
        key_id: &KeyId,
    ) -> Result<(), SealError> {
        let _guard = self.locks.lock(identity).await;
        let staged = self
            .fetch_latest(identity, true)
            .await?
            .filter(|k| k.key_id() == key_id)
            .ok_or_else(|| SealError::key_unavailable(identity))?;
        self.add_version(identity, false, &staged).await?;
        self.delete_staged(identity).await?;
        info!(identity = %identity, key_id = %key_id, "promoted staged cloud key");
        Ok(())
    }

    async fn abort_rollover(&self, identity: &BundleIdentity) -> Result<(), SealError> {
        let _guard = self.locks.lock(identity).await;
        if self.delete_staged(identity).await? {
            info!(identity = %identity, "discarded staged cloud key");
        }
        Ok(())
    }
}
