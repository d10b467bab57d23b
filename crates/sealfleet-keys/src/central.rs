// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vault strategy: keys in a HashiCorp Vault KV v2 mount, fetched per request
//! with the caller's token so access is audited centrally.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use sealfleet_config::model::VaultKeysConfig;
use sealfleet_core::{BundleIdentity, KeyId, KeyMaterial, KeyProvider, SealError, StrategyId};
use sealfleet_vault::crypto;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::locks::IdentityLocks;

/// Environment variable consulted when `keys.vault.address` is unset.
pub const VAULT_ADDR_ENV: &str = "VAULT_ADDR";

#[derive(Deserialize)]
struct ReadResponse {
    data: ReadData,
}

#[derive(Deserialize)]
struct ReadData {
    data: KeyRecord,
}

#[derive(Deserialize)]
struct KeyRecord {
    key: String,
}

/// Key provider backed by a Vault KV v2 secrets engine.
pub struct VaultKeyProvider {
    client: Client,
    address: String,
    mount: String,
    path_prefix: String,
    token: Option<SecretString>,
    locks: IdentityLocks,
}

impl std::fmt::Debug for VaultKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKeyProvider")
            .field("address", &self.address)
            .field("mount", &self.mount)
            .field("path_prefix", &self.path_prefix)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl VaultKeyProvider {
    pub fn from_config(config: &VaultKeysConfig) -> Result<Self, SealError> {
        let address = config
            .address
            .clone()
            .or_else(|| std::env::var(VAULT_ADDR_ENV).ok())
            .ok_or_else(|| {
                SealError::Config(format!(
                    "keys.vault.address is not set and {VAULT_ADDR_ENV} is empty"
                ))
            })?;
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.is_empty())
            .map(SecretString::from);
        Self::new(
            &address,
            config.mount.clone(),
            config.path_prefix.clone(),
            token,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn new(
        address: &str,
        mount: String,
        path_prefix: String,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, SealError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SealError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            address: address.trim_end_matches('/').to_string(),
            mount: mount.trim_matches('/').to_string(),
            path_prefix: path_prefix.trim_matches('/').to_string(),
            token,
            locks: IdentityLocks::new(),
        })
    }

    fn key_path(&self, identity: &BundleIdentity, staged: bool) -> String {
        let suffix = if staged { ".next" } else { "" };
        if self.path_prefix.is_empty() {
            format!("{identity}{suffix}")
        } else {
            format!("{}/{identity}{suffix}", self.path_prefix)
        }
    }

    fn url(&self, kind: &str, identity: &BundleIdentity, staged: bool) -> String {
        format!(
            "{}/v1/{}/{kind}/{}",
            self.address,
            self.mount,
            self.key_path(identity, staged)
        )
    }

    async fn request(
        &self,
        identity: &BundleIdentity,
        method: Method,
        url: String,
        body: Option<Value>,
    ) -> Result<reqwest::Response, SealError> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| SealError::key_unavailable(identity))?;
        let mut builder = self
            .client
            .request(method, url)
            .header("X-Vault-Token", token.expose_secret());
        if let Some(payload) = body {
            builder = builder.json(&payload);
        }
        builder.send().await.map_err(|e| {
            warn!(identity = %identity, error = %e, "vault unreachable");
            SealError::key_unavailable(identity)
        })
    }

    async fn read(
        &self,
        identity: &BundleIdentity,
        staged: bool,
    ) -> Result<Option<KeyMaterial>, SealError> {
        let response = self
            .request(identity, Method::GET, self.url("data", identity, staged), None)
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let parsed: ReadResponse = response.json().await.map_err(|e| {
                    warn!(identity = %identity, error = %e, "undecodable vault response");
                    SealError::key_unavailable(identity)
                })?;
                let hex = Zeroizing::new(parsed.data.data.key);
                KeyMaterial::from_hex(StrategyId::Vault, &hex)
                    .map(Some)
                    .map_err(|_| SealError::key_unavailable(identity))
            }
            status => {
                warn!(identity = %identity, %status, "vault read refused");
                Err(SealError::key_unavailable(identity))
            }
        }
    }

    async fn write(
        &self,
        identity: &BundleIdentity,
        staged: bool,
        key: &KeyMaterial,
    ) -> Result<(), SealError> {
        let hex = key.to_hex();
        let body = json!({ "data": { "key": hex.as_str() } });
        let response = self
            .request(identity, Method::POST, self.url("data", identity, staged), Some(body))
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            warn!(identity = %identity, status = %response.status(), "vault write refused");
            Err(SealError::key_unavailable(identity))
        }
    }

    /// Delete every version of the staged key.
    async fn delete_staged(&self, identity: &BundleIdentity) -> Result<bool, SealError> {
        let response = self
            .request(identity, Method::DELETE, self.url("metadata", identity, true), None)
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => {
                warn!(identity = %identity, %status, "vault delete refused");
                Err(SealError::key_unavailable(identity))
            }
        }
    }
}

#[async_trait]
impl KeyProvider for VaultKeyProvider {
    fn strategy_id(&self) -> StrategyId {
        StrategyId::Vault
    }

    async fn resolve(&self, identity: &BundleIdentity) -> Result<KeyMaterial, SealError> {
        self.read(identity, false)
            .await?
            .ok_or_else(|| SealError::key_unavailable(identity))
    }

    async fn resolve_key(
        &self,
        identity: &BundleIdentity,
        key_id: &KeyId,
    ) -> Result<KeyMaterial, SealError> {
        for staged in [false, true] {
            if let Some(key) = self.read(identity, staged).await?
                && key.key_id() == key_id
            {
                return Ok(key);
            }
        }
        Err(SealError::key_unavailable(identity))
    }

    async fn rotate(&self, identity: &BundleIdentity) -> Result<KeyMaterial, SealError> {
        let _guard = self.locks.lock(identity).await;
        let key = KeyMaterial::new(StrategyId::Vault, crypto::generate_random_key()?);
        self.write(identity, true, &key).await?;
        info!(identity = %identity, key_id = %key.key_id(), "staged vault key");
        Ok(key)
    }

    async fn confirm_rollover(
        &self,
        identity: &BundleIdentity,
        key_id: &KeyId,
    ) -> Result<(), SealError> {
        let _guard = self.locks.lock(identity).await;
        let staged = self
            .read(identity, true)
            .await?
            .filter(|k| k.key_id() == key_id)
            .ok_or_else(|| SealError::key_unavailable(identity))?;
        self.write(identity, false, &staged).await?;
        self.delete_staged(identity).await?;
        info!(identity = %identity, key_id = %key_id, "promoted staged vault key");
        Ok(())
    }

    async fn abort_rollover(&self, identity: &BundleIdentity) -> Result<(), SealError> {
        let _guard = self.locks.lock(identity).await;
        if self.delete_staged(identity).await? {
            info!(identity = %identity, "discarded staged vault key");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api() -> BundleIdentity {
        BundleIdentity::new("api").unwrap()
    }

    fn provider(server: &MockServer) -> VaultKeyProvider {
        VaultKeyProvider::new(
            &server.uri(),
            "secret".into(),
            "sealfleet".into(),
            Some(SecretString::from("s.root".to_string())),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn read_body(key: &KeyMaterial) -> Value {
        json!({
            "data": {
                "data": { "key": key.to_hex().as_str() },
                "metadata": { "version": 2 }
            }
        })
    }

    #[tokio::test]
    async fn resolve_reads_kv_v2_with_vault_token() {
        let server = MockServer::start().await;
        let key = KeyMaterial::new(StrategyId::Vault, [3u8; 32]);
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/sealfleet/api"))
            .and(header("x-vault-token", "s.root"))
            .respond_with(ResponseTemplate::new(200).set_body_json(read_body(&key)))
            .expect(1)
            .mount(&server)
            .await;

        let resolved = provider(&server).resolve(&api()).await.unwrap();
        assert_eq!(resolved.key_id(), key.key_id());
    }

    #[tokio::test]
    async fn permission_denied_is_key_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(json!({ "errors": ["permission denied"] })),
            )
            .mount(&server)
            .await;
        let err = provider(&server).resolve(&api()).await.unwrap_err();
        assert_eq!(err.to_string(), "key material unavailable for bundle `api`");
    }

    #[tokio::test]
    async fn resolve_key_falls_back_to_staged_path() {
        let server = MockServer::start().await;
        let current = KeyMaterial::new(StrategyId::Vault, [1u8; 32]);
        let staged = KeyMaterial::new(StrategyId::Vault, [2u8; 32]);
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/sealfleet/api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(read_body(&current)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/sealfleet/api.next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(read_body(&staged)))
            .mount(&server)
            .await;

        let p = provider(&server);
        let found = p.resolve_key(&api(), staged.key_id()).await.unwrap();
        assert_eq!(found.key_id(), staged.key_id());
        assert_eq!(p.resolve(&api()).await.unwrap().key_id(), current.key_id());
    }

    #[tokio::test]
    async fn confirm_writes_current_then_deletes_staged_metadata() {
        let server = MockServer::start().await;
        let staged = KeyMaterial::new(StrategyId::Vault, [5u8; 32]);
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/sealfleet/api.next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(read_body(&staged)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/secret/data/sealfleet/api"))
            .and(body_json(json!({ "data": { "key": staged.to_hex().as_str() } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/secret/metadata/sealfleet/api.next"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        provider(&server)
            .confirm_rollover(&api(), staged.key_id())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn confirm_refuses_unknown_key_id() {
        let server = MockServer::start().await;
        let staged = KeyMaterial::new(StrategyId::Vault, [5u8; 32]);
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(read_body(&staged)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let other = KeyId::fingerprint(&[6u8; 32]);
        let err = provider(&server)
            .confirm_rollover(&api(), &other)
            .await
            .unwrap_err();
        assert!(matches!(err, SealError::KeyUnavailable { .. }));
    }

    #[test]
    fn empty_prefix_uses_identity_only() {
        let p = VaultKeyProvider::new(
            "http://127.0.0.1:8200/",
            "/kv/".into(),
            String::new(),
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(p.url("data", &api(), true), "http://127.0.0.1:8200/v1/kv/data/api.next");
    }
}
