//! Reading secret material from Vault.
//!
//! Responses are flattened into a [`SecretSnapshot`]. KV v2 mounts wrap the
//! payload one level deeper under `data`; KV v1 mounts and other engines
//! return it directly, so both shapes are accepted.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, value::RawValue};
use tracing::debug;

use crate::error::{Error, Result};

/// Key/value view of a secret at one point in time.
pub type SecretSnapshot = BTreeMap<String, Vec<u8>>;

/// A JSON object whose members keep the exact text they were sent as.
pub type RawObject = BTreeMap<String, Box<RawValue>>;

const KV_V2_DATA_KEY: &str = "data";
const TOKEN_HEADER: &str = "X-Vault-Token";
const NAMESPACE_HEADER: &str = "X-Vault-Namespace";

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Returns the `data` member of the response at `path`, or `None` when
    /// nothing is stored there.
    async fn read(&self, path: &str) -> Result<Option<RawObject>>;
}

#[derive(Clone, Debug)]
pub struct VaultConfig {
    pub address: String,
    pub token: String,
    pub namespace: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct LogicalResponse {
    #[serde(default)]
    data: Option<RawObject>,
}

#[derive(Clone, Debug)]
pub struct VaultClient {
    address: String,
    token: String,
    namespace: Option<String>,
    http: reqwest::Client,
}

impl VaultClient {
    pub fn new(config: &VaultConfig) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            address: config.address.trim_end_matches('/').to_owned(),
            token: config.token.clone(),
            namespace: config.namespace.clone().filter(|ns| !ns.is_empty()),
            http,
        })
    }
}

fn unavailable(path: &str, reason: impl ToString) -> Error {
    Error::StoreUnavailable {
        path: path.to_owned(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl SecretStore for VaultClient {
    async fn read(&self, path: &str) -> Result<Option<RawObject>> {
        let url = format!("{}/v1/{}", self.address, path.trim_start_matches('/'));

        let mut request = self.http.get(&url).header(TOKEN_HEADER, &self.token);
        if let Some(namespace) = &self.namespace {
            request = request.header(NAMESPACE_HEADER, namespace);
        }

        let response = request.send().await.map_err(|e| unavailable(path, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(path, "vault returned 404");
                Ok(None)
            }
            status if status.is_success() => {
                let body: LogicalResponse =
                    response.json().await.map_err(|e| unavailable(path, e))?;
                Ok(body.data)
            }
            status => Err(unavailable(path, format!("unexpected status: {status}"))),
        }
    }
}

/// Reads `path` and flattens the response into a snapshot.
pub async fn fetch_snapshot<S>(store: &S, path: &str) -> Result<SecretSnapshot>
where
    S: SecretStore + ?Sized,
{
    let raw = store
        .read(path)
        .await?
        .ok_or_else(|| Error::NotFound(path.to_owned()))?;

    Ok(snapshot_from_response(raw))
}

pub fn snapshot_from_response(mut raw: RawObject) -> SecretSnapshot {
    let entries = match raw.remove(KV_V2_DATA_KEY) {
        Some(data) => match serde_json::from_str::<RawObject>(data.get()) {
            Ok(nested) => nested,
            Err(_) => {
                raw.insert(KV_V2_DATA_KEY.to_owned(), data);
                raw
            }
        },
        None => raw,
    };

    entries
        .iter()
        .map(|(key, value)| (key.clone(), canonical_text(value).into_bytes()))
        .collect()
}

/// Values always reach the cluster as text, whatever their JSON type.
/// Numbers and booleans keep their literal, so `1e3` stays `1e3`.
fn canonical_text(raw: &RawValue) -> String {
    let literal = raw.get();
    match serde_json::from_str::<Value>(literal) {
        Ok(Value::String(s)) => s,
        Ok(Value::Null) => String::new(),
        Ok(Value::Number(_) | Value::Bool(_)) | Err(_) => literal.to_owned(),
        Ok(nested) => nested.to_string(),
    }
}
