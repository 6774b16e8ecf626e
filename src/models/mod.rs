//! Domain models for the circulation core

pub mod book;
pub mod copy;
pub mod fine;
pub mod loan;
pub mod reservation;
pub mod user;
