use clap::Parser;
use tracing_subscriber::EnvFilter;

use tw_domain::config::LoggingConfig;
use tw_driver::cli::{self, Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to chat when no subcommand is given.
        None | Some(Command::Chat) => {
            let (config, _config_path) = cli::load_config()?;
            init_tracing(&config.logging);
            let clean = cli::chat::chat(config).await?;
            if !clean {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Doctor { pings }) => {
            let (config, config_path) = cli::load_config()?;
            init_tracing(&config.logging);
            let passed = cli::doctor::run(&config, &config_path, pings).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config()?;
            let valid = cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config()?;
            cli::config::show(&config)
        }
    }
}

/// Initialize stderr-only tracing. stdout belongs to the REPL.
///
/// `RUST_LOG` wins over the configured filter.
fn init_tracing(logging: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
