//! Loading intent specs from YAML files.

use std::path::Path;
use tandem_common::spec::{IntentSpec, ValidationError, ValidationWarning};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SpecLoadError {
    #[error("Failed to read spec file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse spec file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Read, parse and validate a spec file. Warnings are returned alongside the
/// spec; only structural errors fail the load.
pub async fn load_spec(
    path: &Path,
) -> Result<(IntentSpec, Vec<ValidationWarning>), SpecLoadError> {
    let content = tokio::fs::read_to_string(path).await?;
    let spec: IntentSpec = serde_yaml::from_str(&content)?;
    let warnings = spec.validate()?;
    debug!(spec = %spec.name, steps = spec.steps.len(), "loaded intent spec");
    Ok((spec, warnings))
}
