//! Run configuration, resolved once at the start of an invocation.
//!
//! Default chains:
//! - `app_name`:  `name` override → `pr-{number}-{normalized repository}`
//! - `region`:    `region` input → `FLY_REGION` (merged by the caller) → `iad`
//! - `org`:       `org` input → `FLY_ORG` (merged by the caller) → `personal`
//! - `config`:    `fly.toml`
//! - `database`:  `app_name`

use crate::error::{FlyoverError, Result};

/// Apps are reachable at `{app}.{PLATFORM_DOMAIN}` once deployed.
pub const PLATFORM_DOMAIN: &str = "fly.dev";

const DEFAULT_REGION: &str = "iad";
const DEFAULT_ORG: &str = "personal";
const DEFAULT_CONFIG_PATH: &str = "fly.toml";

/// Raw optional inputs as they arrive from the CLI / environment.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub name: Option<String>,
    pub region: Option<String>,
    pub org: Option<String>,
    pub image: Option<String>,
    pub config_path: Option<String>,
    pub database: Option<String>,
    pub postgres: Option<String>,
    pub secrets: Option<String>,
    pub vm: Option<String>,
    pub memory: Option<String>,
    pub count: Option<u32>,
    pub github_token: Option<String>,
}

/// Immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub app_name: String,
    pub region: String,
    pub org: String,
    /// Container image to deploy. Only the deploy path requires it.
    pub image: Option<String>,
    pub config_path: String,
    /// Database name used when attaching to the shared Postgres cluster.
    pub database_name: String,
    /// Shared Postgres cluster app. Enables all attach/detach logic.
    pub postgres: Option<String>,
    /// Raw space-separated `KEY=VALUE` payload for bulk secret import.
    pub secrets: Option<String>,
    pub vm: Option<String>,
    pub memory: Option<String>,
    pub count: Option<u32>,
    pub github_token: Option<String>,
}

impl RunConfig {
    /// Resolve settings against the event's PR number and the repository.
    ///
    /// Invariant: the app name (derived or overridden) must contain the PR
    /// number as a substring, so a bad override can never destroy another
    /// PR's app.
    pub fn resolve(settings: Settings, pr_number: u64, repository: &str) -> Result<Self> {
        let app_name = settings
            .name
            .unwrap_or_else(|| default_app_name(pr_number, repository));

        if !app_name.contains(&pr_number.to_string()) {
            return Err(FlyoverError::NameSafetyCheck {
                name: app_name,
                number: pr_number,
            });
        }

        let database_name = settings.database.unwrap_or_else(|| app_name.clone());

        Ok(Self {
            app_name,
            region: settings.region.unwrap_or_else(|| DEFAULT_REGION.to_string()),
            org: settings.org.unwrap_or_else(|| DEFAULT_ORG.to_string()),
            image: settings.image,
            config_path: settings
                .config_path
                .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string()),
            database_name,
            postgres: settings.postgres,
            secrets: settings.secrets,
            vm: settings.vm,
            memory: settings.memory,
            count: settings.count,
            github_token: settings.github_token,
        })
    }
}

/// `pr-{number}-{repository}` with the repository lowercased and every
/// non-alphanumeric byte replaced by `-` (app names allow `[a-z0-9-]` only).
pub fn default_app_name(pr_number: u64, repository: &str) -> String {
    format!("pr-{pr_number}-{}", normalize_repo(repository))
}

fn normalize_repo(repository: &str) -> String {
    repository
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}
