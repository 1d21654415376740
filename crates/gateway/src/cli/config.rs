use ad_domain::config::{Config, ConfigSeverity};

/// Parse and validate the config, printing any issues.
///
/// Returns `false` when errors are found (the caller exits with code 1).
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let mut errors = 0usize;
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Error => {
                errors += 1;
                println!("error: {issue}");
            }
            ConfigSeverity::Warning => println!("warning: {issue}"),
        }
    }
    println!(
        "\n{errors} error(s), {} warning(s) in {config_path}",
        issues.len() - errors
    );

    errors == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(output) => {
            println!("# resolved agentdock configuration");
            print!("{output}");
        }
        Err(e) => {
            eprintln!("Failed to serialize config: {e}");
            std::process::exit(1);
        }
    }
}
