// src/config/loader.rs

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::config::model::{ModelFile, RawModelFile};
use crate::errors::Result;

/// Load a model file from a given path and return the raw `RawModelFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawModelFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    debug!(path = %path.display(), bytes = contents.len(), "read model file");
    parse_str(&contents)
}

/// Deserialize model TOML held in memory.
pub fn parse_str(contents: &str) -> Result<RawModelFile> {
    let raw: RawModelFile = toml::from_str(contents)?;
    Ok(raw)
}

/// Load a model file from path and validate it.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - duplicate ids and unknown references,
///   - cycles in the stage hierarchy,
///   - kind-specific settings and expression syntax,
///   - case task references to cases of the same file.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ModelFile> {
    let raw = load_from_path(&path)?;
    ModelFile::try_from(raw)
}

/// Validate model TOML held in memory.
pub fn parse_and_validate(contents: &str) -> Result<ModelFile> {
    ModelFile::try_from(parse_str(contents)?)
}
