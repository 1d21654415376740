use ad_domain::config::{Config, ConfigSeverity};
use ad_sessions::SessionStore;

/// Run all diagnostic checks and print a summary.
///
/// Returns `Ok(true)` when every check passes, `Ok(false)` when at least
/// one check failed.
pub fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("agentdock doctor");
    println!("================\n");

    let mut all_passed = true;

    // 1. Config file
    check_config_file(config_path, &mut all_passed);

    // 2. Config validation
    check_config_validation(config, &mut all_passed);

    // 3. Model provider
    check_model_provider(config, &mut all_passed);

    // 4. State directory
    check_writable_dir("State directory", &config.workspace.state_path, &mut all_passed);

    // 5. Workspace root
    check_writable_dir("Workspace root", &config.workspace.path, &mut all_passed);

    // 6. Session store
    check_session_store(config, &mut all_passed);

    // Summary
    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

// ── Individual checks ─────────────────────────────────────────────────

fn check_config_file(config_path: &str, all_passed: &mut bool) {
    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "Config file exists",
        exists,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (using defaults)")
        },
    );
    if !exists {
        *all_passed = false;
    }
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
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
}

fn check_model_provider(config: &Config, all_passed: &mut bool) {
    match crate::model::from_config(config) {
        Ok(client) => {
            print_check("Model provider", true, client.name().to_owned());
        }
        Err(e) => {
            print_check("Model provider", false, e.to_string());
            *all_passed = false;
        }
    }
}

fn check_writable_dir(name: &str, path: &std::path::Path, all_passed: &mut bool) {
    let created = std::fs::create_dir_all(path).is_ok();
    let writable = if created {
        let probe = path.join(".agentdock_doctor_probe");
        let w = std::fs::write(&probe, b"probe").is_ok();
        let _ = std::fs::remove_file(&probe);
        w
    } else {
        false
    };

    let detail = match (created, writable) {
        (true, true) => format!("{} (writable)", path.display()),
        (true, false) => format!("{} (not writable)", path.display()),
        _ => format!("{} (cannot create)", path.display()),
    };
    print_check(name, created && writable, detail);

    if !(created && writable) {
        *all_passed = false;
    }
}

fn check_session_store(config: &Config, all_passed: &mut bool) {
    match SessionStore::new(&config.workspace.state_path, &config.workspace.path) {
        Ok(store) => {
            print_check(
                "Session store",
                true,
                format!("{} session(s)", store.list().len()),
            );
        }
        Err(e) => {
            print_check("Session store", false, e.to_string());
            *all_passed = false;
        }
    }
}

// ── Formatting helper ─────────────────────────────────────────────────

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
