use std::time::Instant;

use tw_domain::config::{Config, ConfigSeverity};
use tw_mcp_client::{Session, SessionState, ToolRegistry};

/// Run the diagnostic checks and print a summary.
///
/// Returns `Ok(true)` when every check passes, `Ok(false)` when at least
/// one check failed.
pub async fn run(config: &Config, config_path: &str, pings: u32) -> anyhow::Result<bool> {
    println!("toolwire doctor");
    println!("===============\n");

    let mut all_passed = true;

    check_config_file(config_path);
    check_config_validation(config, &mut all_passed);
    check_tool_registry(config, &mut all_passed);
    check_worker(config, pings, &mut all_passed).await;

    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

// ── Individual checks ─────────────────────────────────────────────────

fn check_config_file(config_path: &str) {
    let exists = std::path::Path::new(config_path).exists();
    // A missing file is fine: the defaults are used.
    print_check(
        "Config file",
        true,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (using defaults)")
        },
    );
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
        return;
    }
    print_check(
        "Config validation",
        error_count == 0,
        format!("{} issue(s) ({} error(s))", issues.len(), error_count),
    );
    for issue in &issues {
        println!("      {issue}");
    }
    if error_count > 0 {
        *all_passed = false;
    }
}

fn check_tool_registry(config: &Config, all_passed: &mut bool) {
    match ToolRegistry::new(config.tools.clone()) {
        Ok(registry) => {
            let names: Vec<&str> = registry.names().collect();
            print_check("Tool registry", true, names.join(", "));
        }
        Err(e) => {
            print_check("Tool registry", false, e.to_string());
            *all_passed = false;
        }
    }
}

/// Spawn, handshake, ping `pings` times, then tear down. One line per step.
async fn check_worker(config: &Config, pings: u32, all_passed: &mut bool) {
    let session = Session::new(config.worker.clone());

    let started = Instant::now();
    match session.start().await {
        Ok(()) => print_check(
            "Worker start",
            true,
            format!(
                "'{}' pid {} ready in {}ms",
                config.worker.command,
                session
                    .worker_pid()
                    .map_or_else(|| "?".into(), |p| p.to_string()),
                started.elapsed().as_millis()
            ),
        ),
        Err(e) => {
            print_check("Worker start", false, e.to_string());
            if let Some(stderr) = e.stderr() {
                for line in stderr.lines() {
                    println!("      {line}");
                }
            }
            *all_passed = false;
            return;
        }
    }

    for n in 1..=pings {
        let started = Instant::now();
        match session.ping().await {
            Ok(()) => print_check(
                &format!("Ping {n}/{pings}"),
                true,
                format!("{}ms", started.elapsed().as_millis()),
            ),
            Err(e) => {
                print_check(&format!("Ping {n}/{pings}"), false, e.to_string());
                *all_passed = false;
                break;
            }
        }
    }

    session.shutdown().await;
    let state = session.state();
    let ok = state == SessionState::Terminated;
    print_check("Worker teardown", ok, state.to_string());
    if !ok {
        *all_passed = false;
    }
}

// ── Formatting helper ─────────────────────────────────────────────────

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
