//! PR lifecycle orchestration policy.
//!
//! One invocation drives one state transition for one review app. A
//! `closed` event tears the app down; every other action rebuilds it from
//! scratch (destroy-then-create, never in-place reconciliation).
//!
//! Failure semantics: teardown, detach, and cleanup calls are best-effort
//! and never abort the run. Deploy, scaling, and the final status query
//! must succeed; their errors propagate. There are no retries — a rerun of
//! the whole orchestration is the recovery path.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{RunConfig, PLATFORM_DOMAIN};
use crate::error::{FlyoverError, Result};
use crate::event::Action;
use crate::fly::{DeployRequest, FlyClient, ScaleResource};

/// Facts reported after a successful deploy, for downstream workflow steps.
#[derive(Debug, Clone, Serialize)]
pub struct ResultFacts {
    pub hostname: String,
    pub url: String,
    pub id: String,
    pub name: String,
}

/// Drive one lifecycle transition. Returns `None` on the teardown path.
pub fn run(
    config: &RunConfig,
    action: Action,
    client: &dyn FlyClient,
) -> Result<Option<ResultFacts>> {
    if action.is_closed() {
        teardown(config, client);
        Ok(None)
    } else {
        rebuild(config, client).map(Some)
    }
}

/// Closed path: detach the shared cluster if one was configured, then
/// destroy the app. Both are best-effort — a PR closing must always succeed,
/// even when the app was never created.
fn teardown(config: &RunConfig, client: &dyn FlyClient) {
    let app = &config.app_name;
    if let Some(cluster) = &config.postgres {
        best_effort(
            "detach shared postgres",
            client.detach_postgres(cluster, app),
        );
    }
    best_effort("destroy app", client.destroy_app(app));
    info!("review app {app} torn down");
}

/// Open/update path: rebuild the app from a known-empty state, configure
/// it, deploy, scale, and report facts.
fn rebuild(config: &RunConfig, client: &dyn FlyClient) -> Result<ResultFacts> {
    let app = &config.app_name;
    let image = config.image.as_deref().ok_or(FlyoverError::MissingImage)?;

    if client.app_exists(app)? {
        best_effort("destroy stale app", client.destroy_app(app));
    }
    client.create_app(app, &config.org, &config.region)?;

    remove_auto_attached_db(config, client);

    let existing = best_effort("list secrets", client.list_secret_names(app)).unwrap_or_default();

    // The app was created moments ago, so it cannot carry a host secret yet;
    // set it unconditionally.
    best_effort(
        "set host secret",
        client.set_secret(app, "PHX_HOST", &format!("{app}.{PLATFORM_DOMAIN}")),
    );

    if !existing.iter().any(|name| name == "DATABASE_URL") {
        if let Some(cluster) = &config.postgres {
            // A user from a previous run of this PR may survive on the
            // shared cluster; its owned objects must be reassigned before
            // the user can be dropped.
            let user = sanitize_db_user(app);
            best_effort(
                "drop stale database user",
                client.run_postgres_sql(cluster, &drop_user_sql(&user)),
            );
            best_effort(
                "attach shared postgres",
                client.attach_postgres(cluster, app, &config.database_name),
            );
        }
    }

    if let Some(payload) = &config.secrets {
        best_effort("import secrets", client.import_secrets(app, payload));
    }

    client.deploy(&DeployRequest {
        app: app.clone(),
        config_path: config.config_path.clone(),
        image: image.to_string(),
        region: config.region.clone(),
        build_token: config.github_token.clone(),
        cache_bust: chrono::Utc::now().timestamp().to_string(),
    })?;

    if let Some(size) = &config.vm {
        client.scale(app, &ScaleResource::Vm(size.clone()))?;
    }
    if let Some(mb) = &config.memory {
        client.scale(app, &ScaleResource::Memory(mb.clone()))?;
    }
    if let Some(n) = config.count {
        client.scale(app, &ScaleResource::Count(n))?;
    }

    let status = client.status(app)?;
    info!("review app {app} deployed at {}", status.hostname);
    Ok(ResultFacts {
        url: format!("https://{}", status.hostname),
        hostname: status.hostname,
        id: status.id,
        name: status.name,
    })
}

/// `launch --copy-config` can auto-provision a `{app}-db` Postgres when the
/// copied config declares one. The database, when wanted at all, is attached
/// explicitly from the shared cluster — so an auto-attached one (detected by
/// it having users) is detached and destroyed.
fn remove_auto_attached_db(config: &RunConfig, client: &dyn FlyClient) {
    let app = &config.app_name;
    let auto_db = format!("{app}-db");
    let Some(users) = best_effort(
        "probe auto-attached database",
        client.list_postgres_users(&auto_db),
    ) else {
        return;
    };
    if users.is_empty() {
        return;
    }
    best_effort(
        "detach auto-attached database",
        client.detach_postgres(&auto_db, app),
    );
    best_effort(
        "destroy auto-attached database",
        client.destroy_app(&auto_db),
    );
}

/// Convert an ignorable failure into a warning. Call sites that use this
/// explicitly opted out of error propagation.
fn best_effort<T>(what: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("{what} failed, continuing: {err}");
            None
        }
    }
}

/// Postgres user names for attached apps replace everything outside
/// `[a-z0-9_]` with underscores.
fn sanitize_db_user(app: &str) -> String {
    app.to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn drop_user_sql(user: &str) -> String {
    format!("REASSIGN OWNED BY {user} TO postgres; DROP OWNED BY {user}; DROP USER IF EXISTS {user};")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::fly::AppStatus;
    use std::cell::RefCell;

    /// Records every provider call in order; behavior is knob-driven.
    #[derive(Default)]
    struct FakeClient {
        exists: bool,
        fail_destroy: bool,
        fail_deploy: bool,
        /// `None` simulates a failed probe (no auto db at all).
        auto_db_users: Option<Vec<String>>,
        secret_names: Option<Vec<String>>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeClient {
        fn log(&self, entry: String) {
            self.calls.borrow_mut().push(entry);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        fn position(&self, prefix: &str) -> Option<usize> {
            self.calls.borrow().iter().position(|c| c.starts_with(prefix))
        }

        fn failure(what: &str) -> FlyoverError {
            FlyoverError::BadOutput {
                command: what.to_string(),
                reason: "simulated failure".to_string(),
            }
        }
    }

    impl FlyClient for FakeClient {
        fn app_exists(&self, app: &str) -> Result<bool> {
            self.log(format!("exists {app}"));
            Ok(self.exists)
        }

        fn create_app(&self, app: &str, org: &str, region: &str) -> Result<()> {
            self.log(format!("create {app} {org} {region}"));
            Ok(())
        }

        fn destroy_app(&self, app: &str) -> Result<()> {
            self.log(format!("destroy {app}"));
            if self.fail_destroy {
                return Err(Self::failure("destroy"));
            }
            Ok(())
        }

        fn list_secret_names(&self, app: &str) -> Result<Vec<String>> {
            self.log(format!("secrets-list {app}"));
            Ok(self.secret_names.clone().unwrap_or_default())
        }

        fn set_secret(&self, app: &str, key: &str, value: &str) -> Result<()> {
            self.log(format!("secret-set {app} {key}={value}"));
            Ok(())
        }

        fn import_secrets(&self, app: &str, payload: &str) -> Result<()> {
            self.log(format!("secrets-import {app} {payload}"));
            Ok(())
        }

        fn list_postgres_users(&self, cluster: &str) -> Result<Vec<String>> {
            self.log(format!("pg-users {cluster}"));
            self.auto_db_users
                .clone()
                .ok_or_else(|| Self::failure("pg-users"))
        }

        fn run_postgres_sql(&self, cluster: &str, sql: &str) -> Result<()> {
            self.log(format!("pg-sql {cluster} {sql}"));
            Ok(())
        }

        fn attach_postgres(&self, cluster: &str, app: &str, database: &str) -> Result<()> {
            self.log(format!("pg-attach {cluster} {app} {database}"));
            Ok(())
        }

        fn detach_postgres(&self, cluster: &str, app: &str) -> Result<()> {
            self.log(format!("pg-detach {cluster} {app}"));
            Ok(())
        }

        fn deploy(&self, request: &DeployRequest) -> Result<()> {
            self.log(format!("deploy {} {}", request.app, request.image));
            if self.fail_deploy {
                return Err(Self::failure("deploy"));
            }
            Ok(())
        }

        fn scale(&self, app: &str, resource: &ScaleResource) -> Result<()> {
            let entry = match resource {
                ScaleResource::Vm(v) => format!("scale-vm {app} {v}"),
                ScaleResource::Memory(m) => format!("scale-memory {app} {m}"),
                ScaleResource::Count(n) => format!("scale-count {app} {n}"),
            };
            self.log(entry);
            Ok(())
        }

        fn status(&self, app: &str) -> Result<AppStatus> {
            self.log(format!("status {app}"));
            Ok(AppStatus {
                hostname: format!("{app}.fly.dev"),
                id: "app-id-1".to_string(),
                name: app.to_string(),
            })
        }
    }

    fn config(mut settings: Settings, pr_number: u64) -> RunConfig {
        if settings.image.is_none() {
            settings.image = Some("registry.fly.io/demo:pr".to_string());
        }
        RunConfig::resolve(settings, pr_number, "myorg/myapp").unwrap()
    }

    #[test]
    fn closed_detaches_then_destroys() {
        let client = FakeClient::default();
        let cfg = config(
            Settings {
                postgres: Some("shared-db".to_string()),
                ..Settings::default()
            },
            7,
        );

        let facts = run(&cfg, Action::Closed, &client).unwrap();
        assert!(facts.is_none());
        assert_eq!(
            client.calls(),
            [
                "pg-detach shared-db pr-7-myorg-myapp",
                "destroy pr-7-myorg-myapp"
            ]
        );
    }

    #[test]
    fn closed_without_postgres_skips_detach() {
        let client = FakeClient::default();
        let cfg = config(Settings::default(), 7);

        run(&cfg, Action::Closed, &client).unwrap();
        assert_eq!(client.calls(), ["destroy pr-7-myorg-myapp"]);
    }

    #[test]
    fn closed_succeeds_even_when_destroy_fails() {
        let client = FakeClient {
            fail_destroy: true,
            ..FakeClient::default()
        };
        let cfg = config(Settings::default(), 7);

        assert!(run(&cfg, Action::Closed, &client).unwrap().is_none());
    }

    #[test]
    fn closed_never_reaches_the_create_path() {
        let client = FakeClient::default();
        // Fully configured: image, postgres, secrets, scaling — none of it
        // may matter on the closed path.
        let cfg = config(
            Settings {
                postgres: Some("shared-db".to_string()),
                secrets: Some("A=1".to_string()),
                vm: Some("shared-cpu-1x".to_string()),
                count: Some(2),
                ..Settings::default()
            },
            7,
        );

        run(&cfg, Action::Closed, &client).unwrap();
        let calls = client.calls();
        assert!(calls.iter().all(|c| !c.starts_with("create")), "{calls:?}");
        assert!(calls.iter().all(|c| !c.starts_with("deploy")), "{calls:?}");
    }

    #[test]
    fn existing_app_is_destroyed_before_recreate() {
        let client = FakeClient {
            exists: true,
            ..FakeClient::default()
        };
        let cfg = config(Settings::default(), 42);

        run(&cfg, Action::Synchronize, &client).unwrap();
        let destroy = client.position("destroy pr-42").unwrap();
        let create = client.position("create pr-42").unwrap();
        assert!(destroy < create, "{:?}", client.calls());
    }

    #[test]
    fn fresh_app_is_created_directly() {
        let client = FakeClient::default();
        let cfg = config(Settings::default(), 42);

        run(&cfg, Action::Opened, &client).unwrap();
        assert!(client.position("destroy").is_none());
        assert!(client.position("create pr-42-myorg-myapp personal iad").is_some());
    }

    #[test]
    fn auto_attached_db_is_detached_and_destroyed() {
        let client = FakeClient {
            auto_db_users: Some(vec!["pr_42_myorg_myapp".to_string()]),
            ..FakeClient::default()
        };
        let cfg = config(Settings::default(), 42);

        run(&cfg, Action::Opened, &client).unwrap();
        let detach = client
            .position("pg-detach pr-42-myorg-myapp-db pr-42-myorg-myapp")
            .unwrap();
        let destroy = client.position("destroy pr-42-myorg-myapp-db").unwrap();
        let deploy = client.position("deploy").unwrap();
        assert!(detach < destroy && destroy < deploy, "{:?}", client.calls());
    }

    #[test]
    fn auto_db_without_users_is_left_alone() {
        let client = FakeClient {
            auto_db_users: Some(vec![]),
            ..FakeClient::default()
        };
        let cfg = config(Settings::default(), 42);

        run(&cfg, Action::Opened, &client).unwrap();
        assert!(client.position("pg-detach").is_none());
        assert!(client.position("destroy").is_none());
    }

    #[test]
    fn failed_auto_db_probe_is_ignored() {
        // auto_db_users: None → the users query itself errors.
        let client = FakeClient::default();
        let cfg = config(Settings::default(), 42);

        run(&cfg, Action::Opened, &client).unwrap();
        assert!(client.position("pg-users pr-42-myorg-myapp-db").is_some());
        assert!(client.position("pg-detach").is_none());
    }

    #[test]
    fn host_secret_is_always_set() {
        let client = FakeClient::default();
        let cfg = config(Settings::default(), 42);

        run(&cfg, Action::Opened, &client).unwrap();
        assert!(client
            .position("secret-set pr-42-myorg-myapp PHX_HOST=pr-42-myorg-myapp.fly.dev")
            .is_some());
    }

    #[test]
    fn database_url_present_skips_drop_and_attach() {
        let client = FakeClient {
            secret_names: Some(vec!["DATABASE_URL".to_string()]),
            ..FakeClient::default()
        };
        let cfg = config(
            Settings {
                postgres: Some("shared-db".to_string()),
                ..Settings::default()
            },
            42,
        );

        run(&cfg, Action::Opened, &client).unwrap();
        assert!(client.position("pg-sql").is_none());
        assert!(client.position("pg-attach").is_none());
    }

    #[test]
    fn database_url_absent_drops_stale_user_then_attaches() {
        let client = FakeClient::default();
        let cfg = config(
            Settings {
                postgres: Some("shared-db".to_string()),
                database: Some("reviews".to_string()),
                ..Settings::default()
            },
            42,
        );

        run(&cfg, Action::Opened, &client).unwrap();
        let drop = client.position("pg-sql shared-db").unwrap();
        let attach = client
            .position("pg-attach shared-db pr-42-myorg-myapp reviews")
            .unwrap();
        assert!(drop < attach, "{:?}", client.calls());

        // The dropped user is the app name with `-` squashed to `_`.
        let calls = client.calls();
        assert!(
            calls[drop].contains("DROP USER IF EXISTS pr_42_myorg_myapp"),
            "{}",
            calls[drop]
        );
        assert!(
            calls[drop].contains("REASSIGN OWNED BY pr_42_myorg_myapp TO postgres"),
            "{}",
            calls[drop]
        );
    }

    #[test]
    fn no_postgres_configured_means_no_database_calls() {
        let client = FakeClient::default();
        let cfg = config(Settings::default(), 42);

        run(&cfg, Action::Opened, &client).unwrap();
        assert!(client.position("pg-sql").is_none());
        assert!(client.position("pg-attach").is_none());
    }

    #[test]
    fn secrets_payload_is_imported() {
        let client = FakeClient::default();
        let cfg = config(
            Settings {
                secrets: Some("A=1 B=2".to_string()),
                ..Settings::default()
            },
            42,
        );

        run(&cfg, Action::Opened, &client).unwrap();
        assert!(client
            .position("secrets-import pr-42-myorg-myapp A=1 B=2")
            .is_some());
    }

    #[test]
    fn deploy_failure_aborts_before_scale_and_status() {
        let client = FakeClient {
            fail_deploy: true,
            ..FakeClient::default()
        };
        let cfg = config(
            Settings {
                vm: Some("performance-1x".to_string()),
                ..Settings::default()
            },
            42,
        );

        assert!(run(&cfg, Action::Opened, &client).is_err());
        assert!(client.position("scale-vm").is_none());
        assert!(client.position("status").is_none());
    }

    #[test]
    fn no_scale_overrides_issue_no_scale_calls() {
        let client = FakeClient::default();
        let cfg = config(Settings::default(), 42);

        run(&cfg, Action::Opened, &client).unwrap();
        assert!(client.position("scale-").is_none());
        // The final status query still runs.
        assert!(client.position("status pr-42-myorg-myapp").is_some());
    }

    #[test]
    fn scale_overrides_apply_in_vm_memory_count_order() {
        let client = FakeClient::default();
        let cfg = config(
            Settings {
                vm: Some("performance-1x".to_string()),
                memory: Some("2048".to_string()),
                count: Some(2),
                ..Settings::default()
            },
            42,
        );

        run(&cfg, Action::Opened, &client).unwrap();
        let vm = client.position("scale-vm").unwrap();
        let memory = client.position("scale-memory").unwrap();
        let count = client.position("scale-count").unwrap();
        assert!(vm < memory && memory < count, "{:?}", client.calls());
    }

    #[test]
    fn missing_image_fails_before_any_side_effect() {
        let client = FakeClient::default();
        let cfg = RunConfig::resolve(Settings::default(), 42, "myorg/myapp").unwrap();

        let err = run(&cfg, Action::Opened, &client).unwrap_err();
        assert!(matches!(err, FlyoverError::MissingImage));
        assert!(client.calls().is_empty());
    }

    #[test]
    fn facts_derive_url_from_hostname() {
        let client = FakeClient::default();
        let cfg = config(Settings::default(), 42);

        let facts = run(&cfg, Action::Opened, &client).unwrap().unwrap();
        assert_eq!(facts.hostname, "pr-42-myorg-myapp.fly.dev");
        assert_eq!(facts.url, "https://pr-42-myorg-myapp.fly.dev");
        assert_eq!(facts.id, "app-id-1");
        assert_eq!(facts.name, "pr-42-myorg-myapp");
    }

    #[test]
    fn sanitize_db_user_squashes_forbidden_chars() {
        assert_eq!(sanitize_db_user("pr-42-myorg-myapp"), "pr_42_myorg_myapp");
        assert_eq!(sanitize_db_user("PR-1.a/b"), "pr_1_a_b");
    }
}
