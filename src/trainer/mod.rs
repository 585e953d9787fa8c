//! Model training and scoring.
//!
//! - [`runner`]: trains every pipeline/model pair and writes artifacts
//! - [`predictor`]: loads trained models and scores new data
//! - [`store`]: artifact paths and JSON persistence
//! - [`report`]: CLI tables

pub mod predictor;
pub mod report;
pub mod runner;
pub mod store;

use thiserror::Error;

use crate::datasource::DataSourceError;
use crate::model::ModelError;
use store::StoreError;

pub use predictor::Predictor;
pub use runner::{train, TrainingReport};

#[derive(Error, Debug)]
pub enum TrainerError {
    #[error(transparent)]
    DataSource(#[from] DataSourceError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no samples left for pipeline {0:?} after joining features with the target")]
    EmptyFrame(String),

    #[error("unknown pipeline {0:?}")]
    UnknownPipeline(String),

    #[error("pipeline {pipeline:?} has no model {model:?}")]
    UnknownModel { pipeline: String, model: String },

    #[error("no pipeline matches the supplied features {0:?}")]
    NoMatchingPipeline(Vec<String>),
}
