//! The narrow interface this orchestrator assumes of the provider CLI.
//!
//! One method per external operation. The production implementation
//! ([`crate::flyctl::Flyctl`]) shells out to `flyctl`; tests inject a
//! recording fake to assert on the exact call sequence.

use serde::Deserialize;

use crate::error::Result;

/// The slice of `flyctl status --json` we care about.
#[derive(Debug, Clone, Deserialize)]
pub struct AppStatus {
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub app: String,
    pub config_path: String,
    pub image: String,
    pub region: String,
    /// Injected as the `GITHUB_TOKEN` build secret when present.
    pub build_token: Option<String>,
    /// Value for the `CACHEBUST` build arg; keeps credential-dependent
    /// build steps out of a stale layer cache.
    pub cache_bust: String,
}

#[derive(Debug, Clone)]
pub enum ScaleResource {
    Vm(String),
    Memory(String),
    Count(u32),
}

pub trait FlyClient {
    /// Whether the app currently exists (a failed status probe means "no").
    fn app_exists(&self, app: &str) -> Result<bool>;

    /// Create the app without deploying. May auto-provision a `{app}-db`
    /// Postgres from the copied config.
    fn create_app(&self, app: &str, org: &str, region: &str) -> Result<()>;

    fn destroy_app(&self, app: &str) -> Result<()>;

    fn list_secret_names(&self, app: &str) -> Result<Vec<String>>;

    fn set_secret(&self, app: &str, key: &str, value: &str) -> Result<()>;

    /// Bulk import: newline-separated `KEY=VALUE` lines on stdin.
    fn import_secrets(&self, app: &str, payload: &str) -> Result<()>;

    fn list_postgres_users(&self, cluster: &str) -> Result<Vec<String>>;

    /// Run SQL against a cluster's console.
    fn run_postgres_sql(&self, cluster: &str, sql: &str) -> Result<()>;

    fn attach_postgres(&self, cluster: &str, app: &str, database: &str) -> Result<()>;

    fn detach_postgres(&self, cluster: &str, app: &str) -> Result<()>;

    fn deploy(&self, request: &DeployRequest) -> Result<()>;

    fn scale(&self, app: &str, resource: &ScaleResource) -> Result<()>;

    fn status(&self, app: &str) -> Result<AppStatus>;
}
