use std::time::Duration;

use crate::store::VaultConfig;

/// Knobs for the reconcile loop, built once at startup.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Requeue delay after a secret store failure.
    pub retry_interval: Duration,
    /// Requeue delay after a successful pass. Vault changes are only
    /// noticed by polling at this interval.
    pub resync_interval: Duration,
    pub vault_timeout: Duration,
    /// Workloads annotated concurrently within one pass.
    pub workload_concurrency: usize,
    /// Deadline for a whole pass, cluster calls included.
    pub pass_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(60),
            resync_interval: Duration::from_secs(600),
            vault_timeout: Duration::from_secs(10),
            workload_concurrency: 1,
            pass_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(clap::Args, Clone, Debug)]
pub struct RunArgs {
    /// Vault server address, e.g. https://vault.vault.svc:8200
    #[arg(long, env = "VAULT_ADDR")]
    pub vault_addr: String,

    #[arg(long, env = "VAULT_TOKEN", hide_env_values = true)]
    pub vault_token: String,

    /// Vault Enterprise namespace
    #[arg(long, env = "VAULT_NAMESPACE")]
    pub vault_namespace: Option<String>,

    #[arg(long, default_value_t = 10)]
    pub vault_timeout_secs: u64,

    /// Delay before retrying when Vault can't be read
    #[arg(long, default_value_t = 60)]
    pub retry_interval_secs: u64,

    /// Delay between successful reconciles of the same SecretRotation
    #[arg(long, default_value_t = 600)]
    pub resync_interval_secs: u64,

    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub workload_concurrency: u16,

    /// Abort a reconcile pass that runs longer than this
    #[arg(long, default_value_t = 120)]
    pub pass_timeout_secs: u64,

    /// Only watch SecretRotations in this namespace
    #[arg(long)]
    pub namespace: Option<String>,
}

impl RunArgs {
    pub fn settings(&self) -> Settings {
        Settings {
            retry_interval: Duration::from_secs(self.retry_interval_secs),
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            vault_timeout: Duration::from_secs(self.vault_timeout_secs),
            workload_concurrency: usize::from(self.workload_concurrency),
            pass_timeout: Duration::from_secs(self.pass_timeout_secs),
        }
    }

    pub fn vault_config(&self) -> VaultConfig {
        VaultConfig {
            address: self.vault_addr.clone(),
            token: self.vault_token.clone(),
            namespace: self.vault_namespace.clone(),
            timeout: Duration::from_secs(self.vault_timeout_secs),
        }
    }
}
