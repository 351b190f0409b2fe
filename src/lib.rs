//! Noisewise - robust losses and confidence-partitioned datasets for
//! learning with noisy labels
//!
//! This crate provides the curriculum-style losses that select the easiest
//! samples of a batch under a budget, together with the dataset and loader
//! plumbing that splits a noisy training set into labeled and unlabeled
//! parts from externally supplied clean predictions.

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod error;
pub mod training;

// Re-exports
pub use config::{DatasetConfig, DatasetKind, ExperimentConfig, LoaderConfig, NoiseConfig};
pub use error::{Error, Result};
pub use training::{create_loss, LoaderFactory, LoaderRequest, Loaders, LossConfig, LossOutcome, RobustLoss};
