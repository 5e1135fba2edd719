mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command};
use std::process::ExitCode;
use std::time::Duration;
use tidevault_core::app::{App, AppBuilder};
use tidevault_core::config::{Config, ConfigError};
use tidevault_core::dump::format_size;
use tidevault_core::telemetry::logging;
use time::format_description::well_known::Rfc3339;
use tracing::{error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(err) = logging::init(&cli.logging.to_config()) {
        eprintln!("❌ {err}");
        return ExitCode::FAILURE;
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(ConfigError::MissingRequiredKeys(keys)) => {
            eprintln!("❌ Missing required environment variables:");
            for key in &keys {
                eprintln!("   {key}");
            }
            return ExitCode::FAILURE;
        }
        Err(err) => {
            eprintln!("❌ {err}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tidevault")
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("❌ failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    let command = cli.command.unwrap_or(Command::Run);
    let outcome = runtime.block_on(run(command, config));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match outcome {
        Ok(code) => code,
        Err(err) => {
            error!(target: "tidevault", error = %format!("{err:#}"), "command failed");
            eprintln!("❌ {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: Config) -> anyhow::Result<ExitCode> {
    for (key, value) in config.summary() {
        info!(target: "tidevault", setting = key, value = %value, "configuration");
    }
    let app = AppBuilder::new(config)
        .build()
        .context("failed to initialise tidevault")?;

    match command {
        Command::Run => {
            info!(target: "tidevault", "🌊 tidevault started; press Ctrl-C to stop");
            let summary = app.scheduler().run(shutdown_signal()).await;
            info!(
                target: "tidevault",
                cycles = summary.cycles,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "tidevault stopped"
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Once => {
            let result = app.runner().run_cycle().await;
            match result.remote_id() {
                Some(id) => {
                    println!("✅ Backup uploaded (file id {id})");
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    if let Some(err) = result.error() {
                        eprintln!("❌ {err}");
                    }
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Authorize { force } => {
            app.authorize(force).await?;
            println!(
                "✅ Authorized; token stored at {}",
                app.credentials().token_path().display()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::List => {
            list(&app).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Delete { file_id } => {
            app.delete_backup(&file_id).await?;
            println!("🗑️  Deleted {file_id}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn list(app: &App) -> anyhow::Result<()> {
    let files = app.list_backups().await?;
    if files.is_empty() {
        println!("No backups in folder {}", app.config().drive_folder_id);
        return Ok(());
    }
    for file in files {
        let created = file
            .created_time
            .and_then(|at| at.format(&Rfc3339).ok())
            .unwrap_or_else(|| "-".to_string());
        let size = file.size.map(format_size).unwrap_or_else(|| "-".to_string());
        println!("{:<36} {:>12} {:<25} {}", file.id, size, created, file.name);
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target: "tidevault", error = %err, "unable to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(target: "tidevault", error = %err, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!(target: "tidevault", "shutdown signal received");
}
