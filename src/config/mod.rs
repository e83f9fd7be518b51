// src/config/mod.rs

//! Case model files for caseflow.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a model file from disk (`loader.rs`).
//! - Validate it and build [`crate::model::CaseDefinition`]s (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, parse_and_validate, parse_str};
pub use model::{
    EngineSection, ModelFile, RawCase, RawCriterion, RawItem, RawItemKind, RawModelFile,
    RawOnPart, RawRepetition,
};
pub use validate::parse_duration;
