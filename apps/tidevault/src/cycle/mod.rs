//! One backup cycle: dump, authenticate, upload, strictly in that order.
//!
//! Failures never escape [`CycleRunner::run_cycle`]; they come back as a
//! [`CycleResult`] naming the stage that failed.

pub mod ports;
pub mod retry;
#[cfg(test)]
pub(crate) mod testing;

use crate::auth::{AuthError, AuthorizedSession};
use crate::dump::{BackupArtifact, DumpError};
use crate::upload::UploadError;
use chrono::{DateTime, Utc};
use drive_sdk::DriveFile;
use ports::{Authenticator, Dumper, Uploader};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

pub use retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Dump,
    Authenticate,
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Dump => "dump",
            Stage::Authenticate => "authenticate",
            Stage::Upload => "upload",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("dump stage failed: {0}")]
    Dump(#[from] DumpError),
    #[error("authenticate stage failed: {0}")]
    Authenticate(#[from] AuthError),
    #[error("upload stage failed: {0}")]
    Upload(#[from] UploadError),
}

impl CycleError {
    pub fn stage(&self) -> Stage {
        match self {
            CycleError::Dump(_) => Stage::Dump,
            CycleError::Authenticate(_) => Stage::Authenticate,
            CycleError::Upload(_) => Stage::Upload,
        }
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    Uploaded {
        artifact: BackupArtifact,
        remote: DriveFile,
    },
    Failed(CycleError),
    /// Another cycle was already running.
    Skipped,
}

#[derive(Debug)]
pub struct CycleResult {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: CycleOutcome,
}

impl CycleResult {
    pub fn stage_reached(&self) -> Option<Stage> {
        match &self.outcome {
            CycleOutcome::Uploaded { .. } => Some(Stage::Upload),
            CycleOutcome::Failed(err) => Some(err.stage()),
            CycleOutcome::Skipped => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Uploaded { .. })
    }

    pub fn remote_id(&self) -> Option<&str> {
        match &self.outcome {
            CycleOutcome::Uploaded { remote, .. } => Some(remote.id.as_str()),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&CycleError> {
        match &self.outcome {
            CycleOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CycleRunner {
    dumper: Arc<dyn Dumper>,
    authenticator: Arc<dyn Authenticator>,
    uploader: Arc<dyn Uploader>,
    folder_id: String,
    retry: RetryPolicy,
    in_flight: AtomicBool,
    sequence: AtomicU64,
}

impl CycleRunner {
    pub fn new(
        dumper: Arc<dyn Dumper>,
        authenticator: Arc<dyn Authenticator>,
        uploader: Arc<dyn Uploader>,
        folder_id: impl Into<String>,
    ) -> Self {
        Self {
            dumper,
            authenticator,
            uploader,
            folder_id: folder_id.into(),
            retry: RetryPolicy::none(),
            in_flight: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }


    pub async fn run_cycle(&self) -> CycleResult {
        let started_at = Utc::now();
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            warn!(target: "tidevault::cycle", "a backup cycle is already running; trigger skipped");
            return CycleResult {
                cycle: 0,
                started_at,
                finished_at: Utc::now(),
                outcome: CycleOutcome::Skipped,
            };
        };
        let cycle = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        info!(target: "tidevault::cycle", cycle, "backup cycle started");

        let outcome = match self.execute().await {
            Ok((artifact, remote)) => CycleOutcome::Uploaded { artifact, remote },
            Err(err) => CycleOutcome::Failed(err),
        };
        let result = CycleResult {
            cycle,
            started_at,
            finished_at: Utc::now(),
            outcome,
        };
        report(&result);
        result
    }

    async fn execute(&self) -> Result<(BackupArtifact, DriveFile), CycleError> {
        let artifact = self.dumper.produce().await?;
        let session = self.authenticator.authenticate().await?;
        let remote = self.upload_with_retry(&session, &artifact).await?;
        Ok((artifact, remote))
    }

    async fn upload_with_retry(
        &self,
        session: &AuthorizedSession,
        artifact: &BackupArtifact,
    ) -> Result<DriveFile, UploadError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self
                .uploader
                .upload(session, &artifact.path, &self.folder_id)
                .await
            {
                Ok(remote) => return Ok(remote),
                Err(err) if err.is_transient() && self.retry.allows_another(attempts) => {
                    let delay = self.retry.next_delay(attempts);
                    warn!(
                        target: "tidevault::cycle",
                        attempt = attempts,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "upload failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn report(result: &CycleResult) {
    let elapsed_ms = (result.finished_at - result.started_at).num_milliseconds();
    match &result.outcome {
        CycleOutcome::Uploaded { artifact, remote } => info!(
            target: "tidevault::cycle",
            cycle = result.cycle,
            file = %artifact.path.display(),
            size = %artifact.display_size(),
            remote_id = %remote.id,
            elapsed_ms,
            "backup cycle complete"
        ),
        CycleOutcome::Failed(err) => error!(
            target: "tidevault::cycle",
            cycle = result.cycle,
            stage = %err.stage(),
            error = %err,
            elapsed_ms,
            "backup cycle failed"
        ),
        CycleOutcome::Skipped => {}
    }
}
