//! Core types, engines and trait definitions for BehavMetrix.
//!
//! This crate has no HTTP or database dependencies. The rank and alert
//! engines are pure functions over log records; [`service::WelfareService`]
//! runs them against any [`store::ColonyStore`] backend.

pub mod alert;
pub mod animal;
pub mod config;
pub mod error;
pub mod ethogram;
pub mod log;
pub mod rank;
pub mod service;
pub mod session;
pub mod stats;
pub mod store;

pub use error::{Error, Result};
