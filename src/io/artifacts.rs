//! Output directory handling, JSON documents and model files.
//!
//! A run owns its output directory. Re-running clears it first, but only when
//! the directory is empty or was written by an earlier run (it holds
//! `run_manifest.json`); anything else is refused so a mistyped path cannot
//! wipe unrelated files.

use std::fs::{self, File};
use std::path::Path;

use log::info;
use serde::Serialize;

use crate::error::PipelineError;
use crate::models::ModelArtifact;

pub const MANIFEST_FILE: &str = "run_manifest.json";
pub const MODELS_DIR: &str = "models";

fn io_err<'a>(what: &str, path: &'a Path) -> impl Fn(std::io::Error) -> PipelineError + 'a {
    let what = what.to_string();
    move |e| PipelineError::Artifact(format!("{what} '{}': {e}", path.display()))
}

/// Create or reset the output directory.
pub fn prepare_output_dir(dir: &Path) -> Result<(), PipelineError> {
    if dir.exists() {
        if !dir.is_dir() {
            return Err(PipelineError::Config(format!(
                "output path '{}' exists and is not a directory",
                dir.display()
            )));
        }
        let mut entries = fs::read_dir(dir).map_err(io_err("Failed to list", dir))?.peekable();
        let is_empty = entries.peek().is_none();
        if !is_empty {
            if !dir.join(MANIFEST_FILE).is_file() {
                return Err(PipelineError::Config(format!(
                    "output directory '{}' is not empty and holds no {MANIFEST_FILE}; refusing to overwrite",
                    dir.display()
                )));
            }
            info!("clearing previous run in {}", dir.display());
            fs::remove_dir_all(dir).map_err(io_err("Failed to clear", dir))?;
        }
    }
    fs::create_dir_all(dir.join(MODELS_DIR)).map_err(io_err("Failed to create", dir))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    let file = File::create(path).map_err(io_err("Failed to create", path))?;
    serde_json::to_writer_pretty(file, value).map_err(|e| {
        PipelineError::Artifact(format!("Failed to write JSON '{}': {e}", path.display()))
    })
}

pub fn write_model(path: &Path, artifact: &ModelArtifact) -> Result<(), PipelineError> {
    let bytes = artifact.to_bytes()?;
    fs::write(path, bytes).map_err(io_err("Failed to write model", path))
}

pub fn read_model(path: &Path) -> Result<ModelArtifact, PipelineError> {
    let bytes = fs::read(path).map_err(|e| {
        PipelineError::Input(format!("Failed to read model '{}': {e}", path.display()))
    })?;
    ModelArtifact::from_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_and_previous_run_dirs_are_prepared() {
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("out");
        prepare_output_dir(&out).unwrap();
        assert!(out.join(MODELS_DIR).is_dir());

        fs::write(out.join(MANIFEST_FILE), "{}").unwrap();
        fs::write(out.join("stale.csv"), "x").unwrap();
        prepare_output_dir(&out).unwrap();
        assert!(!out.join("stale.csv").exists());
        assert!(out.join(MODELS_DIR).is_dir());
    }

    #[test]
    fn foreign_directory_is_left_alone() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("notes.txt"), "keep me").unwrap();
        let err = prepare_output_dir(root.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(root.path().join("notes.txt").exists());
    }

    #[test]
    fn missing_model_file_is_an_input_error() {
        let root = tempfile::tempdir().unwrap();
        let err = read_model(&root.path().join("nope.bin")).unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
    }

    #[test]
    fn write_failures_name_the_path() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("absent").join("evaluation.json");
        let err = write_json(&path, &[1, 2, 3]).unwrap_err();
        match err {
            PipelineError::Artifact(msg) => {
                assert!(msg.starts_with("Failed to create '"));
                assert!(msg.contains("evaluation.json"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
