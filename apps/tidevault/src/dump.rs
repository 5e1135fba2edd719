//! Runs the external dump program and materialises its output as a
//! timestamped artifact under the backup directory.

use crate::clock::Clock;
use crate::config::Config;
use crate::cycle::ports::Dumper;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::process::Command;
use tracing::{debug, info, warn};

const MAX_NAME_ATTEMPTS: u32 = 1000;
const MIB: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("{program} failed: {detail}")]
    Process { program: String, detail: String },
    #[error("dump produced a missing or empty artifact at {}", .0.display())]
    EmptyArtifact(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone)]
pub struct DumpSettings {
    pub program: PathBuf,
    pub extra_args: Vec<String>,
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub backup_dir: PathBuf,
    /// Zone used to render the timestamp in artifact names.
    pub timezone: Tz,
}

impl DumpSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            program: config.mysql.dump_bin.clone(),
            extra_args: config.mysql.dump_args.clone(),
            host: config.mysql.host.clone(),
            user: config.mysql.user.clone(),
            password: config.mysql.password.clone(),
            database: config.mysql.database.clone(),
            backup_dir: config.backup_dir.clone(),
            timezone: config.timezone,
        }
    }
}

/// A dump that completed with a non-empty file on local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl BackupArtifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn display_size(&self) -> String {
        format_size(self.size_bytes)
    }
}

/// Sizes above one MiB render in MB, everything else in KB.
pub fn format_size(bytes: u64) -> String {
    if bytes > MIB {
        format!("{:.2} MB", bytes as f64 / MIB as f64)
    } else {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    }
}

/// `<source>_<YYYYMMDD>_<HHMMSS>.sql`, with `_<n>` before the extension
/// once a same-second name is already taken.
pub fn artifact_file_name(source: &str, stamp: &str, disambiguator: u32) -> String {
    if disambiguator == 0 {
        format!("{source}_{stamp}.sql")
    } else {
        format!("{source}_{stamp}_{disambiguator}.sql")
    }
}

/// mysqldump chatter that is expected and harmless.
pub fn is_benign_diagnostic(line: &str) -> bool {
    line.contains("Warning") || line.contains("Using a password")
}

pub struct DumpProducer<C> {
    settings: DumpSettings,
    clock: C,
}

impl<C: Clock> DumpProducer<C> {
    pub fn new(settings: DumpSettings, clock: C) -> Self {
        Self { settings, clock }
    }

    pub async fn produce(&self) -> Result<BackupArtifact, DumpError> {
        let settings = &self.settings;
        ensure_backup_dir(&settings.backup_dir).await?;

        let created_at = self.clock.now();
        let stamp = created_at
            .with_timezone(&settings.timezone)
            .format("%Y%m%d_%H%M%S")
            .to_string();
        let (path, file) =
            create_artifact_file(&settings.backup_dir, &settings.database, &stamp).await?;
        info!(
            target: "tidevault::dump",
            database = %settings.database,
            file = %path.display(),
            "starting database dump"
        );

        let program = settings.program.display().to_string();
        let mut command = Command::new(&settings.program);
        command
            .args(&settings.extra_args)
            .arg("-h")
            .arg(&settings.host)
            .arg("-u")
            .arg(&settings.user)
            .arg(format!("-p{}", settings.password))
            .arg(&settings.database)
            .stdin(Stdio::null())
            .stdout(Stdio::from(file.into_std().await))
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match command.output().await {
            Ok(output) => output,
            Err(err) => {
                discard_partial(&path).await;
                return Err(DumpError::Process {
                    program,
                    detail: format!("unable to start: {err}"),
                });
            }
        };
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            discard_partial(&path).await;
            return Err(DumpError::Process {
                program,
                detail: format!("{}: {}", output.status, stderr.trim()),
            });
        }
        report_diagnostics(&stderr);

        let size_bytes = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => 0,
            Err(err) => return Err(err.into()),
        };
        if size_bytes == 0 {
            discard_partial(&path).await;
            return Err(DumpError::EmptyArtifact(path));
        }

        let artifact = BackupArtifact {
            source: settings.database.clone(),
            created_at,
            path,
            size_bytes,
        };
        info!(
            target: "tidevault::dump",
            file = %artifact.path.display(),
            size = %artifact.display_size(),
            "database dump complete"
        );
        Ok(artifact)
    }
}

#[async_trait]
impl<C: Clock> Dumper for DumpProducer<C> {
    async fn produce(&self) -> Result<BackupArtifact, DumpError> {
        DumpProducer::produce(self).await
    }
}

async fn ensure_backup_dir(dir: &Path) -> io::Result<()> {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(());
    }
    tokio::fs::create_dir_all(dir).await?;
    info!(target: "tidevault::dump", dir = %dir.display(), "created backup directory");
    Ok(())
}

async fn create_artifact_file(
    dir: &Path,
    source: &str,
    stamp: &str,
) -> io::Result<(PathBuf, File)> {
    for disambiguator in 0..MAX_NAME_ATTEMPTS {
        let path = dir.join(artifact_file_name(source, stamp, disambiguator));
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free artifact name for {source}_{stamp} in {}", dir.display()),
    ))
}

/// Failed dumps leave no file behind to claim the next run's name.
async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(
            target: "tidevault::dump",
            file = %path.display(),
            "removed failed dump output"
        ),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(
            target: "tidevault::dump",
            file = %path.display(),
            error = %err,
            "could not remove failed dump output"
        ),
    }
}

fn report_diagnostics(stderr: &str) {
    for line in stderr.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if is_benign_diagnostic(line) {
            debug!(target: "tidevault::dump", line, "dump diagnostic");
        } else {
            warn!(target: "tidevault::dump", line, "dump wrote to stderr");
        }
    }
}
