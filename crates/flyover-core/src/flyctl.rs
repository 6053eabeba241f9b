//! Blocking `flyctl` subprocess client.
//!
//! Every call spawns one `flyctl` process and waits for it. Stdout is
//! captured (several commands emit JSON we parse); stderr is inherited so
//! provider log lines land in the CI log in real time. There is no timeout
//! handling here: flyctl owns its own deadlines.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::Deserialize;
use tracing::debug;

use crate::error::{FlyoverError, Result};
use crate::fly::{AppStatus, DeployRequest, FlyClient, ScaleResource};

pub struct Flyctl {
    program: PathBuf,
}

impl Flyctl {
    /// Locate the provider binary on PATH (`flyctl`, or its `fly` alias).
    pub fn discover() -> Result<Self> {
        let program = which::which("flyctl")
            .or_else(|_| which::which("fly"))
            .map_err(|_| FlyoverError::FlyctlNotFound)?;
        Ok(Self { program })
    }

    fn run(&self, args: &[&str], stdin_payload: Option<&str>) -> Result<String> {
        let command_line = format!("flyctl {}", args.join(" "));
        debug!("spawning: {command_line}");

        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        cmd.stdin(if stdin_payload.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| FlyoverError::Spawn {
            command: command_line.clone(),
            source: e,
        })?;

        if let Some(payload) = stdin_payload {
            if let Some(stdin) = child.stdin.as_mut() {
                stdin
                    .write_all(payload.as_bytes())
                    .map_err(|e| FlyoverError::Spawn {
                        command: command_line.clone(),
                        source: e,
                    })?;
            }
        }

        let output = child.wait_with_output().map_err(|e| FlyoverError::Spawn {
            command: command_line.clone(),
            source: e,
        })?;

        if !output.status.success() {
            return Err(FlyoverError::CommandFailed {
                command: command_line,
                status: output.status,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run_json<T: for<'de> Deserialize<'de>>(&self, args: &[&str]) -> Result<T> {
        let stdout = self.run(args, None)?;
        serde_json::from_str(&stdout).map_err(|e| FlyoverError::BadOutput {
            command: format!("flyctl {}", args.join(" ")),
            reason: e.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct SecretRow {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Deserialize)]
struct PostgresUserRow {
    #[serde(rename = "Username")]
    username: String,
}

/// Space-separated `KEY=VALUE` entries, one per line, for `secrets import`.
fn import_payload(raw: &str) -> String {
    let mut payload = raw.split_whitespace().collect::<Vec<_>>().join("\n");
    payload.push('\n');
    payload
}

impl FlyClient for Flyctl {
    fn app_exists(&self, app: &str) -> Result<bool> {
        match self.run(&["status", "--app", app], None) {
            Ok(_) => Ok(true),
            Err(FlyoverError::CommandFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create_app(&self, app: &str, org: &str, region: &str) -> Result<()> {
        self.run(
            &[
                "launch",
                "--no-deploy",
                "--copy-config",
                "--name",
                app,
                "--region",
                region,
                "--org",
                org,
            ],
            None,
        )
        .map(drop)
    }

    fn destroy_app(&self, app: &str) -> Result<()> {
        self.run(&["apps", "destroy", app, "--yes"], None).map(drop)
    }

    fn list_secret_names(&self, app: &str) -> Result<Vec<String>> {
        let rows: Vec<SecretRow> = self.run_json(&["secrets", "list", "--app", app, "--json"])?;
        Ok(rows.into_iter().map(|r| r.name).collect())
    }

    fn set_secret(&self, app: &str, key: &str, value: &str) -> Result<()> {
        let pair = format!("{key}={value}");
        self.run(&["secrets", "set", pair.as_str(), "--app", app], None)
            .map(drop)
    }

    fn import_secrets(&self, app: &str, payload: &str) -> Result<()> {
        let payload = import_payload(payload);
        self.run(&["secrets", "import", "--app", app], Some(payload.as_str()))
            .map(drop)
    }

    fn list_postgres_users(&self, cluster: &str) -> Result<Vec<String>> {
        let rows: Vec<PostgresUserRow> =
            self.run_json(&["postgres", "users", "list", "--app", cluster, "--json"])?;
        Ok(rows.into_iter().map(|r| r.username).collect())
    }

    fn run_postgres_sql(&self, cluster: &str, sql: &str) -> Result<()> {
        // SQL goes over stdin; `postgres connect` drops into a psql console.
        self.run(&["postgres", "connect", "--app", cluster], Some(sql))
            .map(drop)
    }

    fn attach_postgres(&self, cluster: &str, app: &str, database: &str) -> Result<()> {
        self.run(
            &[
                "postgres",
                "attach",
                cluster,
                "--app",
                app,
                "--database-name",
                database,
                "--yes",
            ],
            None,
        )
        .map(drop)
    }

    fn detach_postgres(&self, cluster: &str, app: &str) -> Result<()> {
        // `postgres detach` has no --yes flag; answer its prompts on stdin.
        self.run(
            &["postgres", "detach", cluster, "--app", app],
            Some("yes\nyes\n"),
        )
        .map(drop)
    }

    fn deploy(&self, request: &DeployRequest) -> Result<()> {
        let cache_bust = format!("CACHEBUST={}", request.cache_bust);
        let build_secret = request
            .build_token
            .as_ref()
            .map(|token| format!("GITHUB_TOKEN={token}"));
        let mut args = vec![
            "deploy",
            "--config",
            request.config_path.as_str(),
            "--app",
            request.app.as_str(),
            "--region",
            request.region.as_str(),
            "--image",
            request.image.as_str(),
            "--strategy",
            "immediate",
            "--build-arg",
            cache_bust.as_str(),
        ];
        if let Some(pair) = &build_secret {
            args.push("--build-secret");
            args.push(pair.as_str());
        }
        self.run(&args, None).map(drop)
    }

    fn scale(&self, app: &str, resource: &ScaleResource) -> Result<()> {
        let (kind, value) = match resource {
            ScaleResource::Vm(size) => ("vm", size.clone()),
            ScaleResource::Memory(mb) => ("memory", mb.clone()),
            ScaleResource::Count(n) => ("count", n.to_string()),
        };
        self.run(&["scale", kind, value.as_str(), "--app", app], None)
            .map(drop)
    }

    fn status(&self, app: &str) -> Result<AppStatus> {
        self.run_json(&["status", "--app", app, "--json"])
    }
}
