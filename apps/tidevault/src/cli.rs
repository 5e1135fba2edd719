use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tidevault_core::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "tidevault",
    about = "🌊 Scheduled MySQL dumps archived to Google Drive",
    author,
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "TIDEVAULT_LOG_LEVEL",
        default_value_t = LogLevel::Info,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "TIDEVAULT_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Back up now, then every day at BACKUP_TIME (default)
    Run,
    /// Run a single backup cycle and exit
    Once,
    /// Authorize Google Drive access and store the token
    Authorize {
        /// Discard the stored token and authorize again
        #[arg(long)]
        force: bool,
    },
    /// List backups in the configured Drive folder
    List,
    /// Delete a backup from Drive by file id
    Delete {
        #[arg(value_name = "FILE_ID")]
        file_id: String,
    },
}
