use chrono::NaiveTime;
use chrono_tz::Tz;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Keys that must be present (and non-blank) before anything runs.
pub const REQUIRED_KEYS: &[&str] = &[
    "MYSQL_HOST",
    "MYSQL_USER",
    "MYSQL_PASSWORD",
    "MYSQL_DATABASE",
    "BACKUP_DIR",
    "GOOGLE_DRIVE_FOLDER_ID",
    "GOOGLE_CREDENTIALS_PATH",
];

const DEFAULT_BACKUP_TIME: &str = "00:00";
const DEFAULT_TIMEZONE: &str = "America/Lima";
const DEFAULT_TOKEN_PATH: &str = "./token.json";
const DEFAULT_DUMP_BIN: &str = "mysqldump";
const DEFAULT_UPLOAD_ATTEMPTS: u32 = 3;
const DEFAULT_UPLOAD_RETRY_BASE_SECS: u64 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingRequiredKeys(Vec<String>),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Clone)]
pub struct MysqlConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub dump_bin: PathBuf,
    pub dump_args: Vec<String>,
}

impl std::fmt::Debug for MysqlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("dump_bin", &self.dump_bin)
            .field("dump_args", &self.dump_args)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadRetry {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

/// Immutable process configuration, validated once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub mysql: MysqlConfig,
    pub backup_dir: PathBuf,
    pub drive_folder_id: String,
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    pub backup_time: NaiveTime,
    pub timezone: Tz,
    pub upload_retry: UploadRetry,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Every missing required key is
    /// reported at once; malformed optional values are only checked after
    /// the required set is complete.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let missing: Vec<String> = REQUIRED_KEYS
            .iter()
            .filter(|key| value(**key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingRequiredKeys(missing));
        }
        let required = |key: &str| value(key).unwrap_or_default();

        let backup_time = parse_backup_time(
            &value("BACKUP_TIME").unwrap_or_else(|| DEFAULT_BACKUP_TIME.to_string()),
        )?;
        let timezone = parse_timezone(
            &value("BACKUP_TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
        )?;
        let max_attempts = parse_number("UPLOAD_MAX_ATTEMPTS", value("UPLOAD_MAX_ATTEMPTS"))?
            .unwrap_or(DEFAULT_UPLOAD_ATTEMPTS as u64);
        if max_attempts == 0 || max_attempts > u32::MAX as u64 {
            return Err(invalid("UPLOAD_MAX_ATTEMPTS", "must be at least 1"));
        }
        let base_secs = parse_number("UPLOAD_RETRY_BASE_SECS", value("UPLOAD_RETRY_BASE_SECS"))?
            .unwrap_or(DEFAULT_UPLOAD_RETRY_BASE_SECS);

        Ok(Self {
            mysql: MysqlConfig {
                host: required("MYSQL_HOST").trim().to_string(),
                user: required("MYSQL_USER").trim().to_string(),
                password: required("MYSQL_PASSWORD"),
                database: required("MYSQL_DATABASE").trim().to_string(),
                dump_bin: PathBuf::from(
                    value("MYSQLDUMP_BIN").unwrap_or_else(|| DEFAULT_DUMP_BIN.to_string()),
                ),
                dump_args: value("MYSQLDUMP_ARGS")
                    .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default(),
            },
            backup_dir: PathBuf::from(required("BACKUP_DIR").trim()),
            drive_folder_id: required("GOOGLE_DRIVE_FOLDER_ID").trim().to_string(),
            credentials_path: PathBuf::from(required("GOOGLE_CREDENTIALS_PATH").trim()),
            token_path: PathBuf::from(
                value("GOOGLE_TOKEN_PATH").unwrap_or_else(|| DEFAULT_TOKEN_PATH.to_string()),
            ),
            backup_time,
            timezone,
            upload_retry: UploadRetry {
                max_attempts: max_attempts as u32,
                base_delay: Duration::from_secs(base_secs),
            },
        })
    }

    /// Non-secret settings for the startup banner.
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        vec![
            ("database", self.mysql.database.clone()),
            ("host", self.mysql.host.clone()),
            ("user", self.mysql.user.clone()),
            ("backup_dir", self.backup_dir.display().to_string()),
            ("drive_folder", self.drive_folder_id.clone()),
            (
                "schedule",
                format!("{} {}", self.backup_time.format("%H:%M"), self.timezone),
            ),
        ]
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn parse_backup_time(raw: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|err| invalid("BACKUP_TIME", format!("expected HH:MM ({err})")))
}

fn parse_timezone(raw: &str) -> Result<Tz, ConfigError> {
    raw.trim()
        .parse::<Tz>()
        .map_err(|err| invalid("BACKUP_TIMEZONE", err.to_string()))
}

fn parse_number(key: &str, raw: Option<String>) -> Result<Option<u64>, ConfigError> {
    raw.map(|value| {
        value
            .trim()
            .parse::<u64>()
            .map_err(|err| invalid(key, err.to_string()))
    })
    .transpose()
}
