use chrono::{DateTime, Utc};
use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Prefix used for the checksum annotation when `annotationPrefix` is empty.
pub const DEFAULT_ANNOTATION_PREFIX: &str = "secrets.github.com/";

const CHECKSUM_ANNOTATION_SUFFIX: &str = "secret-checksum";

/// A workload whose pods must roll when the mirrored secret changes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct WorkloadReference {
    /// Deployment, StatefulSet, DaemonSet or ReplicaSet (case-insensitive).
    pub kind: String,
    pub name: String,
    /// Defaults to the namespace of the owning SecretRotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl WorkloadReference {
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => default,
        }
    }

    /// Identifier recorded in `status.updatedWorkloads`. Qualified with the
    /// namespace only when it differs from the owner's.
    pub fn status_key(&self, owner_namespace: &str) -> String {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() && ns != owner_namespace => {
                format!("{}/{}/{}", ns, self.kind, self.name)
            }
            _ => format!("{}/{}", self.kind, self.name),
        }
    }
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "secrets.github.com",
    version = "v1alpha1",
    kind = "SecretRotation",
    namespaced,
    status = "SecretRotationStatus",
    shortname = "srot",
    printcolumn = r#"{"name":"Secret", "type":"string", "jsonPath":".spec.targetSecret"}"#,
    printcolumn = r#"{"name":"Checksum", "type":"string", "jsonPath":".status.secretChecksum"}"#,
    printcolumn = r#"{"name":"Last Rotation", "type":"date", "jsonPath":".status.lastRotation"}"#
)]
pub struct SecretRotationSpec {
    /// Vault path of the secret, e.g. `secret/data/app/db`.
    pub vault_path: String,
    /// Name of the Secret kept in sync in the SecretRotation's namespace.
    pub target_secret: String,
    #[serde(default)]
    pub target_workloads: Vec<WorkloadReference>,
    #[serde(default)]
    pub annotation_prefix: String,
}

impl SecretRotationSpec {
    pub fn annotation_key(&self) -> String {
        let prefix = if self.annotation_prefix.is_empty() {
            DEFAULT_ANNOTATION_PREFIX
        } else {
            &self.annotation_prefix
        };
        format!("{prefix}{CHECKSUM_ANNOTATION_SUFFIX}")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRotationStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rotation: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_checksum: Option<String>,
    #[serde(default)]
    pub updated_workloads: Vec<String>,
}
