mod output;

use clap::Parser;
use std::path::PathBuf;

use flyover_core::config::{RunConfig, Settings};
use flyover_core::event::Event;
use flyover_core::flyctl::Flyctl;
use flyover_core::{orchestrator, FlyoverError};

/// Deploy, update, and tear down a Fly.io review app per pull request.
///
/// Reads the pull_request event payload, derives a deterministic app name
/// from the PR number and repository, and drives the app's lifecycle
/// through flyctl: `closed` destroys the app, everything else rebuilds and
/// redeploys it from scratch.
#[derive(Parser)]
#[command(name = "flyover", version)]
struct Cli {
    /// Path to the CI event payload (JSON)
    #[arg(long, env = "GITHUB_EVENT_PATH")]
    event_path: PathBuf,

    /// Repository this run is for, as "owner/repo"
    #[arg(long, env = "GITHUB_REPOSITORY")]
    repository: String,

    /// App name override (must contain the PR number)
    #[arg(long, env = "INPUT_NAME")]
    name: Option<String>,

    /// Deploy region (falls back to FLY_REGION, then "iad")
    #[arg(long, env = "INPUT_REGION")]
    region: Option<String>,

    /// Target organization (falls back to FLY_ORG, then "personal")
    #[arg(long, env = "INPUT_ORG")]
    org: Option<String>,

    /// Container image to deploy (required unless the PR is closing)
    #[arg(long, env = "INPUT_IMAGE")]
    image: Option<String>,

    /// Path to the app's fly.toml
    #[arg(long, env = "INPUT_CONFIG")]
    config: Option<String>,

    /// Database name on the shared cluster (default: app name)
    #[arg(long, env = "INPUT_DATABASE")]
    database: Option<String>,

    /// Shared Postgres cluster app; enables attach/detach
    #[arg(long, env = "INPUT_POSTGRES")]
    postgres: Option<String>,

    /// Space-separated KEY=VALUE pairs to import as app secrets
    #[arg(long, env = "INPUT_SECRETS", hide_env_values = true)]
    secrets: Option<String>,

    /// VM size override (e.g. "performance-1x")
    #[arg(long, env = "INPUT_VM")]
    vm: Option<String>,

    /// Memory override in MB
    #[arg(long, env = "INPUT_MEMORY")]
    memory: Option<String>,

    /// Instance count override
    #[arg(long, env = "INPUT_COUNT")]
    count: Option<u32>,

    /// Repository access token, passed to the build as a secret
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Print result facts as JSON instead of GITHUB_OUTPUT lines
    #[arg(long, short = 'j')]
    json: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        std::process::exit(exit_code(&e));
    }
}

/// Fatal provider command failures propagate the provider's exit code;
/// everything else exits 1.
fn exit_code(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<FlyoverError>() {
        Some(FlyoverError::CommandFailed { status, .. }) => status.code().unwrap_or(1),
        _ => 1,
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let event = Event::load(&cli.event_path)?;
    let pr_number = event.pr_number()?;

    let settings = Settings {
        name: cli.name,
        region: cli.region.or_else(|| env_nonempty("FLY_REGION")),
        org: cli.org.or_else(|| env_nonempty("FLY_ORG")),
        image: cli.image,
        config_path: cli.config,
        database: cli.database,
        postgres: cli.postgres,
        secrets: cli.secrets,
        vm: cli.vm,
        memory: cli.memory,
        count: cli.count,
        github_token: cli.github_token,
    };
    let config = RunConfig::resolve(settings, pr_number, &cli.repository)?;

    let client = Flyctl::discover()?;
    if let Some(facts) = orchestrator::run(&config, event.action, &client)? {
        output::emit(&facts, cli.json)?;
    }
    Ok(())
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
