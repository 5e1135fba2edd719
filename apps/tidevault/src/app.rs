//! Wiring from a validated [`Config`] to the running pipeline.

use crate::auth::{
    AuthError, AuthorizedSession, CodePrompt, CredentialManager, InteractiveAuthenticator,
    StdinPrompt,
};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::cycle::ports::Authenticator;
use crate::cycle::{CycleRunner, RetryPolicy};
use crate::dump::{DumpProducer, DumpSettings};
use crate::scheduler::{DailySchedule, Scheduler};
use crate::upload::{DriveUploader, UploadError};
use drive_sdk::{DriveClient, DriveEndpoints, DriveError, DriveFile};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to build storage client: {0}")]
    Drive(#[from] DriveError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Upload(#[from] UploadError),
}

pub struct AppBuilder {
    config: Config,
    endpoints: DriveEndpoints,
    prompt: Arc<dyn CodePrompt>,
    clock: Arc<dyn Clock>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            endpoints: DriveEndpoints::google(),
            prompt: Arc::new(StdinPrompt),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn endpoints(mut self, endpoints: DriveEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn prompt(mut self, prompt: Arc<dyn CodePrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<App, AppError> {
        let config = self.config;
        let manager = CredentialManager::new(&config.credentials_path, &config.token_path);
        let authenticator: Arc<dyn Authenticator> =
            Arc::new(InteractiveAuthenticator::new(manager.clone(), self.prompt));
        let uploader = Arc::new(DriveUploader::new(DriveClient::new(self.endpoints)?));
        let dumper = Arc::new(DumpProducer::new(
            DumpSettings::from_config(&config),
            self.clock.clone(),
        ));

        let runner = CycleRunner::new(
            dumper,
            authenticator.clone(),
            uploader.clone(),
            config.drive_folder_id.clone(),
        )
        .with_retry(RetryPolicy::from_config(&config.upload_retry));

        Ok(App {
            config,
            manager,
            authenticator,
            uploader,
            runner: Arc::new(runner),
            clock: self.clock,
        })
    }
}

pub struct App {
    config: Config,
    manager: CredentialManager,
    authenticator: Arc<dyn Authenticator>,
    uploader: Arc<DriveUploader>,
    runner: Arc<CycleRunner>,
    clock: Arc<dyn Clock>,
}

impl App {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.manager
    }

    pub fn runner(&self) -> Arc<CycleRunner> {
        self.runner.clone()
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.runner.clone(),
            DailySchedule::new(self.config.backup_time, self.config.timezone),
            self.clock.clone(),
        )
    }

    /// Make sure a usable token is stored, running the interactive flow if
    /// needed. `force` throws the current token away first.
    pub async fn authorize(&self, force: bool) -> Result<AuthorizedSession, AppError> {
        if force {
            self.manager.discard_token().await?;
        }
        Ok(self.authenticator.authenticate().await?)
    }

    pub async fn list_backups(&self) -> Result<Vec<DriveFile>, AppError> {
        let session = self.authenticator.authenticate().await?;
        Ok(self
            .uploader
            .list_backups(&session, &self.config.drive_folder_id)
            .await?)
    }

    pub async fn delete_backup(&self, file_id: &str) -> Result<(), AppError> {
        let session = self.authenticator.authenticate().await?;
        Ok(self.uploader.delete_backup(&session, file_id).await?)
    }
}
