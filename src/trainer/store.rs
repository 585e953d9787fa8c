//! On-disk layout of training artifacts.
//!
//! ```text
//! {root}/{pipeline}/training_inputs.csv
//! {root}/{pipeline}/model_errors.json
//! {root}/{pipeline}/models/{model}_model.json
//! {root}/{pipeline}/models/{model}_model_error.json
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::datasource::Frame;
use crate::model::metrics::ErrorMetrics;
use crate::model::ModelPipeline;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pipeline_dir(&self, pipeline: &str) -> PathBuf {
        self.root.join(pipeline)
    }

    pub fn models_dir(&self, pipeline: &str) -> PathBuf {
        self.pipeline_dir(pipeline).join("models")
    }

    pub fn model_path(&self, pipeline: &str, model: &str) -> PathBuf {
        self.models_dir(pipeline).join(format!("{model}_model.json"))
    }

    pub fn model_error_path(&self, pipeline: &str, model: &str) -> PathBuf {
        self.models_dir(pipeline).join(format!("{model}_model_error.json"))
    }

    pub fn errors_path(&self, pipeline: &str) -> PathBuf {
        self.pipeline_dir(pipeline).join("model_errors.json")
    }

    pub fn inputs_path(&self, pipeline: &str) -> PathBuf {
        self.pipeline_dir(pipeline).join("training_inputs.csv")
    }

    pub fn save_inputs(&self, pipeline: &str, frame: &Frame) -> Result<PathBuf, StoreError> {
        let path = self.inputs_path(pipeline);
        create_parent(&path)?;
        let file = fs::File::create(&path).map_err(|source| io_error(&path, source))?;
        frame
            .write_csv(BufWriter::new(file))
            .map_err(|source| io_error(&path, source))?;
        Ok(path)
    }

    pub fn save_model(
        &self,
        pipeline: &str,
        model: &str,
        fitted: &ModelPipeline,
    ) -> Result<PathBuf, StoreError> {
        let path = self.model_path(pipeline, model);
        write_json(&path, fitted)?;
        Ok(path)
    }

    pub fn load_model(&self, pipeline: &str, model: &str) -> Result<ModelPipeline, StoreError> {
        read_json(&self.model_path(pipeline, model))
    }

    pub fn save_model_error(
        &self,
        pipeline: &str,
        model: &str,
        metrics: &ErrorMetrics,
    ) -> Result<(), StoreError> {
        write_json(&self.model_error_path(pipeline, model), metrics)
    }

    pub fn save_errors(
        &self,
        pipeline: &str,
        errors: &[(String, ErrorMetrics)],
    ) -> Result<(), StoreError> {
        let by_model: BTreeMap<&str, &ErrorMetrics> =
            errors.iter().map(|(name, m)| (name.as_str(), m)).collect();
        write_json(&self.errors_path(pipeline), &by_model)
    }

    pub fn load_errors(&self, pipeline: &str) -> Result<BTreeMap<String, ErrorMetrics>, StoreError> {
        read_json(&self.errors_path(pipeline))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn create_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
    }
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    create_parent(path)?;
    let data = serde_json::to_vec(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, data).map_err(|source| io_error(path, source))?;
    debug!(path = %path.display(), "Artifact written");
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let data = fs::read(path).map_err(|source| io_error(path, source))?;
    serde_json::from_slice(&data).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}
