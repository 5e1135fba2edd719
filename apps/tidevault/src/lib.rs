//! Unattended MySQL backups archived to a Google Drive folder.
//!
//! A cycle dumps the database to a timestamped file, makes sure an
//! authorized session exists and uploads the file. The scheduler runs one
//! cycle at startup and then once a day.

pub mod app;
pub mod auth;
pub mod clock;
pub mod config;
pub mod cycle;
pub mod dump;
pub mod scheduler;
pub mod telemetry;
pub mod upload;
