//! Result facts for downstream workflow steps.
//!
//! Inside GitHub Actions (`GITHUB_OUTPUT` set), facts are appended to the
//! step-output file as `key=value` lines; elsewhere they go to stdout.

use std::fs::OpenOptions;
use std::io::Write;

use flyover_core::orchestrator::ResultFacts;

pub fn emit(facts: &ResultFacts, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(facts)?);
        return Ok(());
    }

    let lines = format!(
        "hostname={}\nurl={}\nid={}\nname={}\n",
        facts.hostname, facts.url, facts.id, facts.name
    );
    match std::env::var("GITHUB_OUTPUT") {
        Ok(path) if !path.is_empty() => {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(lines.as_bytes())?;
        }
        _ => print!("{lines}"),
    }
    Ok(())
}
