//! Experiment configuration
//!
//! Configuration is loaded once by the caller and passed explicitly to the
//! components that need it. Nothing in the crate looks configuration up
//! through a process-wide instance.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::training::loss::LossConfig;

/// Top-level configuration for one noisy-label experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Experiment name, used in logs only
    pub name: String,
    /// Dataset source and noise settings
    pub dataset: DatasetConfig,
    /// Batching and worker settings
    #[serde(default)]
    pub loader: LoaderConfig,
    /// Loss function settings
    #[serde(default)]
    pub loss: LossConfig,
}

impl ExperimentConfig {
    /// Load configuration from a JSON or YAML file (chosen by extension)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let config: Self = if is_json(path) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON or YAML file (chosen by extension)
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            serde_yaml::to_string(self)?
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.dataset.validate()?;
        self.loader.validate()?;
        self.loss.validate()?;
        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("json")
}

/// Supported dataset sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    /// Clothing1M web-crawled clothing images
    Clothing1M,
    /// Street View House Numbers, exported as an image tree
    Svhn,
    /// CIFAR-10 binary batches
    Cifar10,
    /// CIFAR-100 binary batches
    Cifar100,
}

impl DatasetKind {
    /// Number of classes of the source dataset
    pub fn num_classes(self) -> usize {
        match self {
            Self::Clothing1M => 14,
            Self::Svhn | Self::Cifar10 => 10,
            Self::Cifar100 => 100,
        }
    }

    /// Upper-case name used in noise file names
    pub fn name(self) -> &'static str {
        match self {
            Self::Clothing1M => "CLOTHING1M",
            Self::Svhn => "SVHN",
            Self::Cifar10 => "CIFAR10",
            Self::Cifar100 => "CIFAR100",
        }
    }

    /// Whether training labels come from a noise file
    pub fn uses_noise_file(self) -> bool {
        matches!(self, Self::Cifar10 | Self::Cifar100)
    }
}

/// Dataset configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Dataset source
    pub kind: DatasetKind,
    /// Root directory of the dataset
    pub root: PathBuf,
    /// Number of classes; defaults to the source's class count
    #[serde(default)]
    pub num_classes: Option<usize>,
    /// Label noise injected into CIFAR-style training labels
    #[serde(default)]
    pub noise: NoiseConfig,
}

impl DatasetConfig {
    /// Create a configuration with default noise settings
    pub fn new(kind: DatasetKind, root: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            root: root.into(),
            num_classes: None,
            noise: NoiseConfig::default(),
        }
    }

    /// Effective number of classes
    pub fn num_classes(&self) -> usize {
        self.num_classes.unwrap_or_else(|| self.kind.num_classes())
    }

    /// Validate dataset configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_classes() < 2 {
            return Err(Error::config("Number of classes must be at least 2"));
        }
        if !(0.0..=1.0).contains(&self.noise.percent) {
            return Err(Error::config("Noise percent must be in [0.0, 1.0]"));
        }
        Ok(())
    }
}

/// Label noise settings for CIFAR-style sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseConfig {
    /// Fraction of training labels to corrupt
    pub percent: f64,
    /// Asymmetric (class-dependent) noise instead of uniform relabeling
    pub asymmetric: bool,
    /// Seed for noise generation
    pub seed: u64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            percent: 0.0,
            asymmetric: false,
            seed: 123,
        }
    }
}

/// Batching configuration shared by every loader the factory builds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Training batch size
    pub batch_size: usize,
    /// Batches per warmup / eval epoch; 0 keeps the full training set
    pub num_batches: usize,
    /// Number of loader workers
    pub num_workers: usize,
    /// Channel capacity between workers and consumer
    pub buffer_size: usize,
    /// Batch size for test and validation loaders
    pub eval_batch_size: usize,
    /// Seed for shuffling, subsampling and augmentation
    pub seed: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            num_batches: 0,
            num_workers: num_cpus::get().min(8),
            buffer_size: 16,
            eval_batch_size: 1000,
            seed: None,
        }
    }
}

impl LoaderConfig {
    /// Validate loader configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.eval_batch_size == 0 {
            return Err(Error::config("Batch size must be greater than 0"));
        }
        if self.num_workers == 0 {
            return Err(Error::config("Number of workers must be greater than 0"));
        }
        if self.buffer_size == 0 {
            return Err(Error::config("Buffer size must be greater than 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_config() -> ExperimentConfig {
        ExperimentConfig {
            name: "cifar10-sym-0.4".to_string(),
            dataset: DatasetConfig::new(DatasetKind::Cifar10, "/data/cifar10"),
            loader: LoaderConfig::default(),
            loss: LossConfig::default(),
        }
    }

    #[test]
    fn test_json_and_yaml_round_trip() {
        let dir = TempDir::new().unwrap();
        let config = sample_config();

        for name in ["exp.json", "exp.yaml"] {
            let path = dir.path().join(name);
            config.to_file(&path).unwrap();
            let loaded = ExperimentConfig::from_file(&path).unwrap();
            assert_eq!(loaded.name, config.name);
            assert_eq!(loaded.dataset.kind, DatasetKind::Cifar10);
            assert_eq!(loaded.loader.batch_size, config.loader.batch_size);
        }
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = sample_config();
        config.loader.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = sample_config();
        config.dataset.noise.percent = 1.5;
        assert!(config.validate().is_err());

        let mut config = sample_config();
        config.dataset.num_classes = Some(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_num_classes_defaults_to_source() {
        let config = DatasetConfig::new(DatasetKind::Clothing1M, "/data/clothing1m");
        assert_eq!(config.num_classes(), 14);
        assert_eq!(DatasetKind::Cifar100.num_classes(), 100);
    }
}
