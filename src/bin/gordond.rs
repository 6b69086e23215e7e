use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use gordon::{config::GordonConfig, error::GordonError, kernel::Kernel};

/// Single-host container deployment platform: OCI registry, reverse proxy,
/// and deploy orchestrator in one process.
#[derive(Parser, Debug)]
#[command(name = "gordond", version, about)]
struct GordonArgs {
    /// Path to `gordon.toml`. Falls back to the embedded default config if
    /// omitted or the file does not exist.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Overrides `server.data_dir`.
    #[arg(long, value_name = "DIR")]
    data_dir: Option<String>,

    /// Overrides `server.port` (the reverse proxy listener).
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Overrides `server.registry_port` (the OCI registry + admin API
    /// listener).
    #[arg(long, value_name = "PORT")]
    registry_port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = GordonArgs::parse();

    let mut config = match GordonConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("gordond: config error: {e}");
            return ExitCode::from(2);
        }
    };

    if let Some(data_dir) = args.data_dir {
        config.server.data_dir = data_dir;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(registry_port) = args.registry_port {
        config.server.registry_port = registry_port;
    }
    if let Err(e) = config.validate() {
        eprintln!("gordond: config error: {e}");
        return ExitCode::from(2);
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ (GordonError::ConfigValidation(_) | GordonError::ConfigValidationErrors(_) | GordonError::ConfigNotFound(_))) => {
            eprintln!("gordond: config error: {e}");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("gordond: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run(config: GordonConfig) -> Result<(), GordonError> {
    let kernel = Kernel::build(config).await?;
    kernel.run().await
}
