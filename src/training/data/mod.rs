//! Data loading infrastructure for noisy-label training
//!
//! This module provides the sample indices of each supported source, the
//! confidence-driven partition policies, one dataset type per loading mode,
//! batch collation and the multi-worker data loader.

use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod annotations;
pub mod batching;
pub mod cifar;
pub mod datasets;
pub mod factory;
pub mod loaders;
pub mod partition;
pub mod sources;
pub mod transforms;

// Re-exports
pub use batching::{AllBatch, Collate, EvalBatch, LabeledBatch, UnlabeledBatch};
pub use datasets::{AllItem, AllSamples, EvalDataset, EvalItem, LabeledDataset, LabeledItem, UnlabeledDataset, UnlabeledItem};
pub use factory::{LoaderFactory, LoaderMode, LoaderRequest, Loaders};
pub use loaders::{BatchOf, DataLoader, DataLoaderBuilder, DataLoaderConfig, DataLoaderStream};
pub use partition::{Partition, PartitionInputs, PartitionPolicy, TruncateMode};
pub use sources::SourceIndex;
pub use transforms::{ImagePipeline, TransformStep};

/// Common sampling interface of every dataset mode
pub trait Dataset: Send + Sync {
    /// Item produced for one index
    type Item: Collate;

    /// Get the number of samples in the dataset
    fn len(&self) -> usize;

    /// Check if the dataset is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load, decode and transform the sample at `index`
    fn get(&self, index: usize) -> Result<Self::Item, DataError>;

    /// Sample at `index` as served in `epoch`
    ///
    /// Augmenting datasets draw fresh random transforms in every epoch; the
    /// default ignores the epoch.
    fn get_in_epoch(&self, index: usize, epoch: usize) -> Result<Self::Item, DataError> {
        let _ = epoch;
        self.get(index)
    }

    /// Get dataset metadata
    fn metadata(&self) -> &DatasetMetadata;
}

/// Loading mode a dataset was built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetMode {
    /// Full (optionally class-balanced) training set
    All,
    /// Predicted-clean samples
    Labeled,
    /// Predicted-noisy samples
    Unlabeled,
    /// Predicted-clean samples refined by the teacher set
    LabeledSvd,
    /// Complement of [`DatasetMode::LabeledSvd`]
    UnlabeledSvd,
    /// Held-out test split
    Test,
    /// Held-out validation split
    Val,
}

impl DatasetMode {
    /// Lower-case mode name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Labeled => "labeled",
            Self::Unlabeled => "unlabeled",
            Self::LabeledSvd => "labeled_svd",
            Self::UnlabeledSvd => "unlabeled_svd",
            Self::Test => "test",
            Self::Val => "val",
        }
    }
}

/// Dataset metadata
#[derive(Debug, Clone)]
pub struct DatasetMetadata {
    /// Dataset name/identifier
    pub name: String,
    /// Mode the dataset serves
    pub mode: DatasetMode,
    /// Number of samples
    pub num_samples: usize,
    /// Number of classes
    pub num_classes: usize,
}

/// Where the pixels of a sample live
#[derive(Debug, Clone)]
pub enum ImageRef {
    /// Encoded image file on disk
    Path(PathBuf),
    /// Decoded image held in memory (CIFAR binary batches)
    Memory {
        /// Position in the source split
        id: usize,
        /// Pixels
        image: Arc<RgbImage>,
    },
}

impl ImageRef {
    /// Stable textual key of the sample
    pub fn key(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Memory { id, .. } => format!("#{}", id),
        }
    }

    /// Decode the image as RGB
    pub fn load(&self, index: usize) -> Result<RgbImage, DataError> {
        match self {
            Self::Path(path) => image::open(path)
                .map(|img| img.to_rgb8())
                .map_err(|source| DataError::ImageLoad {
                    index,
                    path: path.clone(),
                    source,
                }),
            Self::Memory { image, .. } => Ok(image.as_ref().clone()),
        }
    }
}

/// One `(image, label)` association
#[derive(Debug, Clone)]
pub struct SampleRecord {
    /// Image location
    pub image: ImageRef,
    /// Class label (noisy for training splits)
    pub label: usize,
}

/// Immutable, shareable list of sample records
pub type SampleIndex = Arc<[SampleRecord]>;

/// Error types for data loading
#[derive(thiserror::Error, Debug)]
pub enum DataError {
    #[error("Dataset file not found: {path}")]
    DatasetNotFound { path: PathBuf },

    #[error("Invalid sample index: {index} >= {dataset_size}")]
    InvalidIndex { index: usize, dataset_size: usize },

    #[error("Malformed annotation at {path}:{line}: {reason}")]
    MalformedAnnotation {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("No label for key '{key}'")]
    MissingLabel { key: String },

    #[error("Label {label} of '{key}' is out of range for {num_classes} classes")]
    LabelOutOfRange {
        key: String,
        label: usize,
        num_classes: usize,
    },

    #[error("Malformed CIFAR batch {path}: {reason}")]
    MalformedBatch { path: PathBuf, reason: String },

    #[error("Noise percent {percent} is outside [0, 1]")]
    InvalidNoiseConfig { percent: f64 },

    #[error("Invalid noise file {path}: {reason}")]
    InvalidNoiseFile { path: PathBuf, reason: String },

    #[error("Invalid partition: {reason}")]
    InvalidPartition { reason: String },

    #[error("Failed to load image {path} (sample {index}): {source}")]
    ImageLoad {
        index: usize,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Transform failed for sample {index}: {reason}")]
    Transform { index: usize, reason: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Tensor error: {0}")]
    TensorError(#[from] candle_core::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Batch collation error: {reason}")]
    BatchCollationError { reason: String },

    #[error("Loader worker failed: {reason}")]
    WorkerFailed { reason: String },
}

impl DataError {
    /// Wrap an IO error with the path it happened on
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::DatasetNotFound {
                path: path.as_ref().to_path_buf(),
            }
        } else {
            Self::Io {
                path: path.as_ref().to_path_buf(),
                source,
            }
        }
    }
}
