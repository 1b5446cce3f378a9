use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use pgreconcile::config::{Config, DEFAULT_CONFIG_FILE};
use pgreconcile::{Converger, Director, Report};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Converge a PostgreSQL server to the roles, schemas, extensions and
/// default privileges declared in the configuration.
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default ./pgreconcile.toml is used
    #[clap(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Create or update every declared resource (default)
    Apply,
    /// Delete every declared resource, dependents first
    Destroy,
    /// Print the server version and the capabilities it supports
    Features,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Apply);

    let cfg = match Config::load_from(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        config = %cli.config.display(),
        host = %cfg.connection.host,
        port = cfg.connection.port,
        database = %cfg.connection.database,
        username = %cfg.connection.username,
        sslmode = cfg.connection.sslmode.as_str(),
        resources = cfg.resources.len(),
        max_concurrency = cfg.basic.max_concurrency,
        "pgreconcile starting"
    );

    let director = Director::new(cfg.connection.clone());
    let code = tokio::select! {
        code = run(command, &cfg, &director) => code,
        () = shutdown_signal() => {
            warn!("interrupted; open transactions are rolled back");
            ExitCode::from(130)
        }
    };
    director.close().await;
    code
}

async fn run(command: Command, cfg: &Config, director: &Director) -> ExitCode {
    match command {
        Command::Features => match director.target(director.base_database()) {
            Ok(target) => match target.features().await {
                Ok(features) => {
                    let supported: Vec<_> = features.supported().collect();
                    println!("PostgreSQL {}", features.version());
                    for feature in supported {
                        println!("  {feature}");
                    }
                    ExitCode::SUCCESS
                }
                Err(e) => fail(&e),
            },
            Err(e) => fail(&e),
        },
        Command::Apply => {
            let converger = Converger::new(director, cfg.basic.max_concurrency);
            summarize(&converger.apply(&cfg.resources).await)
        }
        Command::Destroy => {
            let converger = Converger::new(director, cfg.basic.max_concurrency);
            summarize(&converger.destroy(&cfg.resources).await)
        }
    }
}

fn summarize(report: &Report) -> ExitCode {
    for warning in report.warnings() {
        warn!(step = %warning.step, message = %warning.message, "cleanup warning");
    }
    for failure in &report.failures {
        error!(kind = %failure.kind, id = %failure.id, error = %failure.error, "failed");
    }
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn fail(e: &pgreconcile::ReconcileError) -> ExitCode {
    error!(error = %e, "command failed");
    ExitCode::FAILURE
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn apply_is_the_default_command() {
        let cli = Cli::try_parse_from(["pgreconcile"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn config_path_and_subcommand_parse() {
        let cli = Cli::try_parse_from(["pgreconcile", "--config", "prod.toml", "destroy"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Destroy)));
        assert_eq!(cli.config, PathBuf::from("prod.toml"));

        let cli = Cli::try_parse_from(["pgreconcile", "features", "-c", "x.toml"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Features)));
        assert_eq!(cli.config, PathBuf::from("x.toml"));

        assert!(Cli::try_parse_from(["pgreconcile", "migrate"]).is_err());
    }
}
