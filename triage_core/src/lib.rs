#![forbid(unsafe_code)]

//! Core domain model and business logic for field triage.
//!
//! This crate provides:
//! - Domain types (protocols, steps, dispositions, screeners)
//! - Catalog management and validation
//! - Decision engine for protocol runs
//! - Screener engine for scored questionnaires
//! - Note codec for sharing and restoring encounters
//! - Encounter log persistence

pub mod types;
pub mod error;
pub mod catalog;
pub mod instruments;
pub mod config;
pub mod logging;
pub mod engine;
pub mod screener;
pub mod codec;
pub mod encounter_log;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use catalog::{build_default_catalog, get_default_catalog};
pub use config::Config;
pub use codec::{decode, encode, restore, EncodedNote, InclusionFlags, StepEntry};
pub use encounter_log::{read_encounters, EncounterRecord, EncounterSink, JsonlSink};
