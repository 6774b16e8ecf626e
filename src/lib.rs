//! Biblion circulation core
//!
//! The circulation and inventory-allocation engine of the Biblion library
//! system: copy ledger, loan lifecycle, reservation queue, overdue fine
//! assessment, and delinquency enforcement. HTTP controllers, authentication,
//! and the catalog itself live elsewhere and talk to this crate through the
//! service layer.

pub mod clock;
pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
