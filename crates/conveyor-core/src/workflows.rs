//! Loading and validating workflow manifests.
//!
//! Deserialization into the typed [`Workflow`] record enforces the
//! manifest's shape; [`validate`] carries the semantic rules the type
//! system cannot express (triggers present, jobs present, `needs`
//! references resolve).

use std::path::Path;

use thiserror::Error;

use crate::types::Workflow;

/// Errors surfaced while loading or validating a manifest.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The manifest file could not be read.
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The manifest is not valid YAML, or does not match the workflow shape.
    #[error("parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The manifest parsed but violates a semantic rule.
    #[error("schema error: {0}")]
    Schema(String),
}

/// Parses a YAML manifest file into a workflow record.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<Workflow, WorkflowError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| WorkflowError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_from_str(&raw)
}

/// Parses manifest source into a workflow record.
pub fn load_from_str(raw: &str) -> Result<Workflow, WorkflowError> {
    Ok(serde_yaml::from_str(raw)?)
}

/// Semantic validation of a parsed workflow.
pub fn validate(workflow: &Workflow) -> Result<(), WorkflowError> {
    if workflow.on.is_empty() {
        return Err(WorkflowError::Schema(
            "workflow declares no event triggers".to_string(),
        ));
    }
    if workflow.jobs.is_empty() {
        return Err(WorkflowError::Schema(
            "workflow declares no jobs".to_string(),
        ));
    }

    for (job_name, job) in &workflow.jobs {
        if job.runs_on.is_empty() {
            return Err(WorkflowError::Schema(format!(
                "job {job_name} has an empty runs-on image"
            )));
        }
        for dependency in job.dependencies() {
            if !workflow.jobs.contains_key(dependency) {
                return Err(WorkflowError::Schema(format!(
                    "job {job_name} needs unknown job {dependency}"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
name: example
on:
  limit: 3
jobs:
  echo:
    runs-on: alpine
    steps:
      - run: echo ${{ index }}
"#;

    #[test]
    fn loads_and_validates_a_manifest() {
        let workflow = load_from_str(MANIFEST).unwrap();
        assert_eq!(workflow.name.as_deref(), Some("example"));
        assert_eq!(workflow.on["limit"], serde_json::json!(3));
        assert_eq!(workflow.jobs["echo"].runs_on, "alpine");
        validate(&workflow).unwrap();
    }

    #[test]
    fn rejects_missing_jobs() {
        let workflow = load_from_str("on:\n  limit: 1\njobs: {}\n").unwrap();
        assert!(matches!(
            validate(&workflow).unwrap_err(),
            WorkflowError::Schema(_)
        ));
    }

    #[test]
    fn rejects_missing_triggers() {
        let workflow = load_from_str(
            "on: {}\njobs:\n  a:\n    runs-on: alpine\n    steps: []\n",
        )
        .unwrap();
        assert!(matches!(
            validate(&workflow).unwrap_err(),
            WorkflowError::Schema(_)
        ));
    }

    #[test]
    fn rejects_unresolved_needs() {
        let workflow = load_from_str(
            "on:\n  limit: 1\njobs:\n  b:\n    runs-on: alpine\n    needs: a\n    steps: []\n",
        )
        .unwrap();
        let err = validate(&workflow).unwrap_err();
        assert!(err.to_string().contains("unknown job a"), "{err}");
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(matches!(
            load_from_str("on: [unclosed").unwrap_err(),
            WorkflowError::Parse(_)
        ));
        // Shape mismatches are parse errors too: serde is the schema here.
        assert!(matches!(
            load_from_str("on:\n  limit: 1\njobs: 42\n").unwrap_err(),
            WorkflowError::Parse(_)
        ));
    }
}
