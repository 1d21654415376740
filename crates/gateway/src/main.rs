use std::sync::Arc;

use clap::Parser;

use ad_gateway::cli::{Cli, Command, ConfigCommand};
use ad_gateway::{bootstrap, model, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Exit code contract: 0 success, 1 user-facing failure, 2 panic.
    std::panic::set_hook(Box::new(|info| {
        eprintln!("agentdock panicked: {info}");
        std::process::exit(2);
    }));

    // clap's usage errors default to exit code 2, which is reserved for
    // panics here; map them to the user-facing failure code instead.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            bootstrap::init_tracing();
            let (config, _config_path) = ad_gateway::cli::load_config()?;
            let config = Arc::new(config);
            let client = model::from_config(&config)?;
            let state = bootstrap::build_app_state(
                config,
                client,
                bootstrap::empty_tool_factory(),
            )
            .await?;
            bootstrap::spawn_background_tasks(&state);
            server::serve(state).await
        }

        Some(Command::Doctor) => {
            let (config, config_path) = ad_gateway::cli::load_config()?;
            if !ad_gateway::cli::doctor::run(&config, &config_path)? {
                std::process::exit(1);
            }
            Ok(())
        }

        Some(Command::Run {
            task,
            files,
            name,
            json,
        }) => {
            let (config, _config_path) = ad_gateway::cli::load_config()?;
            ad_gateway::cli::run::run(config, task, files, name, json).await
        }

        Some(Command::Chat { name, resume }) => {
            let (config, _config_path) = ad_gateway::cli::load_config()?;
            ad_gateway::cli::chat::chat(config, name, resume).await
        }

        Some(Command::Sessions) => {
            let (config, _config_path) = ad_gateway::cli::load_config()?;
            ad_gateway::cli::sessions::list(&config)
        }

        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = ad_gateway::cli::load_config()?;
            if !ad_gateway::cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }

        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = ad_gateway::cli::load_config()?;
            ad_gateway::cli::config::show(&config);
            Ok(())
        }

        Some(Command::Version) => {
            println!("agentdock {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
