use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::time::Duration;
use stratus_authz::{Identity, RoleTable, SubjectKind};

const DEFAULT_ROOT_NAMESPACE: &str = "cf";
const DEFAULT_AWAIT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_LIST_CONCURRENCY: usize = 16;
const DEFAULT_PRIVILEGED_SUBJECT: &str = "system:serviceaccount:cf:stratus-api";
const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

// Repository configuration sourced from environment variables, optionally
// overridden by a YAML file.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub root_namespace: String,
    pub await_timeout: Duration,
    pub list_concurrency: usize,
    pub privileged_identity: Identity,
    pub roles: RoleTable,
}

#[derive(Debug, Deserialize)]
struct RepositoryConfigOverride {
    root_namespace: Option<String>,
    await_timeout_ms: Option<u64>,
    list_concurrency: Option<usize>,
    privileged_subject: Option<String>,
    roles: Option<RoleTable>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            root_namespace: DEFAULT_ROOT_NAMESPACE.to_string(),
            await_timeout: Duration::from_millis(DEFAULT_AWAIT_TIMEOUT_MS),
            list_concurrency: DEFAULT_LIST_CONCURRENCY,
            privileged_identity: Identity::service_account("cf", "stratus-api"),
            roles: RoleTable::defaults(),
        }
    }
}

impl RepositoryConfig {
    pub fn from_env() -> Result<Self> {
        let root_namespace = std::env::var("STRATUS_ROOT_NAMESPACE")
            .unwrap_or_else(|_| DEFAULT_ROOT_NAMESPACE.to_string());
        let await_timeout_ms = std::env::var("STRATUS_AWAIT_TIMEOUT_MS")
            .unwrap_or_else(|_| DEFAULT_AWAIT_TIMEOUT_MS.to_string())
            .parse::<u64>()
            .with_context(|| "parse STRATUS_AWAIT_TIMEOUT_MS")?;
        let list_concurrency = std::env::var("STRATUS_LIST_CONCURRENCY")
            .unwrap_or_else(|_| DEFAULT_LIST_CONCURRENCY.to_string())
            .parse::<usize>()
            .with_context(|| "parse STRATUS_LIST_CONCURRENCY")?;
        let privileged_subject = std::env::var("STRATUS_PRIVILEGED_SUBJECT")
            .unwrap_or_else(|_| DEFAULT_PRIVILEGED_SUBJECT.to_string());
        let config = Self {
            root_namespace,
            await_timeout: Duration::from_millis(await_timeout_ms),
            list_concurrency,
            privileged_identity: parse_subject(&privileged_subject)?,
            roles: RoleTable::defaults(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("STRATUS_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read STRATUS_CONFIG: {path}"))?;
            let override_cfg: RepositoryConfigOverride = serde_yaml::from_str(&contents)
                .with_context(|| "parse repository config yaml")?;
            if let Some(value) = override_cfg.root_namespace {
                config.root_namespace = value;
            }
            if let Some(value) = override_cfg.await_timeout_ms {
                config.await_timeout = Duration::from_millis(value);
            }
            if let Some(value) = override_cfg.list_concurrency {
                config.list_concurrency = value;
            }
            if let Some(value) = override_cfg.privileged_subject {
                config.privileged_identity =
                    parse_subject(&value).with_context(|| "parse privileged_subject")?;
            }
            if let Some(value) = override_cfg.roles {
                config.roles = value;
            }
            config.validate()?;
        }
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.root_namespace.trim().is_empty() {
            bail!("root namespace must not be empty");
        }
        if self.list_concurrency == 0 {
            bail!("list concurrency must be at least 1");
        }
        if self.await_timeout.is_zero() {
            bail!("await timeout must be greater than zero");
        }
        if self.roles.is_empty() {
            bail!("role table must not be empty");
        }
        Ok(())
    }
}

/// Parse a subject name into an identity; service accounts use the
/// `system:serviceaccount:<scope>:<name>` form.
fn parse_subject(subject: &str) -> Result<Identity> {
    let kind = if subject.starts_with(SERVICE_ACCOUNT_PREFIX) {
        SubjectKind::ServiceAccount
    } else {
        SubjectKind::User
    };
    Identity::from_subject(kind, subject).with_context(|| format!("invalid subject {subject:?}"))
}
