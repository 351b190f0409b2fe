//! Loader factory: maps a loading mode to configured data loaders

use super::datasets::{AllSamples, EvalDataset, LabeledDataset, UnlabeledDataset};
use super::loaders::{DataLoader, DataLoaderConfig};
use super::partition::{PartitionInputs, PartitionPolicy, TruncateMode};
use super::sources::SourceIndex;
use super::transforms::ImagePipeline;
use super::{DataError, Dataset, DatasetMode};
use crate::config::{DatasetConfig, LoaderConfig};
use crate::error::Error;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};

/// Loading modes of a training run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderMode {
    /// Class-balanced training subsample with training augmentation
    Warmup,
    /// Labeled and unlabeled loaders from clean predictions
    Train,
    /// Labeled and unlabeled loaders from the teacher set
    TrainSvd,
    /// Training subsample with evaluation transforms, in order
    EvalTrain,
    /// Test split
    Test,
    /// Validation split
    Val,
}

impl LoaderMode {
    /// Mode name as accepted by [`FromStr`]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warmup => "warmup",
            Self::Train => "train",
            Self::TrainSvd => "train_svd",
            Self::EvalTrain => "eval_train",
            Self::Test => "test",
            Self::Val => "val",
        }
    }
}

impl fmt::Display for LoaderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoaderMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "warmup" => Ok(Self::Warmup),
            "train" => Ok(Self::Train),
            "train_svd" => Ok(Self::TrainSvd),
            "eval_train" => Ok(Self::EvalTrain),
            "test" => Ok(Self::Test),
            "val" => Ok(Self::Val),
            other => Err(Error::invalid_input(format!("unknown loader mode '{}'", other))),
        }
    }
}

/// A loader request with the inputs its mode needs
#[derive(Debug, Clone)]
pub enum LoaderRequest {
    /// Warmup loader
    Warmup,
    /// Labeled/unlabeled split from clean predictions
    Train {
        /// Predictions over the eval-train records
        inputs: PartitionInputs,
        /// Teacher restriction
        truncate: TruncateMode,
    },
    /// Labeled/unlabeled split from the teacher set
    TrainSvd {
        /// Predictions and teacher set
        inputs: PartitionInputs,
        /// Intersect the teacher set with the clean predictions
        refinement: bool,
    },
    /// Evaluation pass over the training subsample
    EvalTrain,
    /// Test loader
    Test,
    /// Validation loader
    Val,
}

impl LoaderRequest {
    /// Mode of the request
    pub fn mode(&self) -> LoaderMode {
        match self {
            Self::Warmup => LoaderMode::Warmup,
            Self::Train { .. } => LoaderMode::Train,
            Self::TrainSvd { .. } => LoaderMode::TrainSvd,
            Self::EvalTrain => LoaderMode::EvalTrain,
            Self::Test => LoaderMode::Test,
            Self::Val => LoaderMode::Val,
        }
    }
}

/// Loaders produced by [`LoaderFactory::run`]
pub enum Loaders {
    /// Shuffled training subsample
    Warmup(DataLoader<AllSamples>),
    /// Labeled and unlabeled loaders (`train` and `train_svd`)
    Train {
        /// Labeled loader
        labeled: DataLoader<LabeledDataset>,
        /// Unlabeled loader
        unlabeled: DataLoader<UnlabeledDataset>,
    },
    /// Ordered training subsample with evaluation transforms
    EvalTrain(DataLoader<AllSamples>),
    /// Test or validation loader
    Eval(DataLoader<EvalDataset>),
}

impl Loaders {
    /// `(mode, samples, batches)` of every loader
    pub fn summary(&self) -> Vec<(&'static str, usize, usize)> {
        fn row<D: Dataset + 'static>(loader: &DataLoader<D>) -> (&'static str, usize, usize) {
            (loader.metadata().mode.as_str(), loader.dataset_size(), loader.num_batches())
        }

        match self {
            Self::Warmup(loader) | Self::EvalTrain(loader) => vec![row(loader)],
            Self::Train { labeled, unlabeled } => vec![row(labeled), row(unlabeled)],
            Self::Eval(loader) => vec![row(loader)],
        }
    }
}

/// Builds the loaders of every mode over one shared sample index
pub struct LoaderFactory {
    source: Arc<SourceIndex>,
    config: LoaderConfig,
}

impl LoaderFactory {
    /// Load the source index and create a factory
    pub fn new(dataset: &DatasetConfig, config: LoaderConfig) -> Result<Self, DataError> {
        Ok(Self::from_source(SourceIndex::load(dataset)?, config))
    }

    /// Create a factory over an already loaded source index
    pub fn from_source(source: SourceIndex, config: LoaderConfig) -> Self {
        Self {
            source: Arc::new(source),
            config,
        }
    }

    /// Shared source index
    pub fn source(&self) -> &SourceIndex {
        &self.source
    }

    /// Loader configuration
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    fn loader_config(&self, batch_size: usize, shuffle: bool) -> DataLoaderConfig {
        DataLoaderConfig {
            batch_size,
            shuffle,
            num_workers: self.config.num_workers,
            buffer_size: self.config.buffer_size,
            drop_last: false,
            seed: self.config.seed,
        }
    }

    fn subsample(&self, factor: usize) -> Option<usize> {
        match self.config.num_batches {
            0 => None,
            n => Some(n * self.config.batch_size * factor),
        }
    }

    fn pipeline(&self, train: bool) -> ImagePipeline {
        ImagePipeline::for_dataset(self.source.kind, train)
    }

    fn all_samples(&self, num_samples: Option<usize>, train: bool) -> AllSamples {
        AllSamples::new(
            self.source.kind.name(),
            self.source.train.clone(),
            self.source.num_classes,
            num_samples,
            self.pipeline(train),
            self.config.seed,
        )
    }

    fn split(
        &self,
        inputs: &PartitionInputs,
        labeled: PartitionPolicy,
        unlabeled: PartitionPolicy,
    ) -> Result<Loaders, DataError> {
        let name = self.source.kind.name();
        let classes = self.source.num_classes;
        let seed = self.config.seed;

        let labeled = LabeledDataset::new(name, inputs, labeled, classes, self.pipeline(true), seed)?;
        let unlabeled = UnlabeledDataset::new(name, inputs, unlabeled, classes, self.pipeline(true), seed)?;
        let batch = self.config.batch_size;

        Ok(Loaders::Train {
            labeled: DataLoader::new(Arc::new(labeled), self.loader_config(batch, true)),
            unlabeled: DataLoader::new(Arc::new(unlabeled), self.loader_config(batch, true)),
        })
    }

    fn eval(&self, mode: DatasetMode) -> Result<Loaders, DataError> {
        let records = match mode {
            DatasetMode::Val => self.source.val.clone(),
            _ => self.source.test.clone(),
        };
        let dataset = EvalDataset::new(
            self.source.kind.name(),
            mode,
            records,
            self.source.num_classes,
            self.pipeline(false),
        )?;
        Ok(Loaders::Eval(DataLoader::new(
            Arc::new(dataset),
            self.loader_config(self.config.eval_batch_size, false),
        )))
    }

    /// Build the loaders of a request
    #[instrument(skip(self, request), fields(mode = %request.mode()))]
    pub fn run(&self, request: LoaderRequest) -> Result<Loaders, DataError> {
        let batch = self.config.batch_size;

        let loaders = match request {
            LoaderRequest::Warmup => {
                let dataset = self.all_samples(self.subsample(2), true);
                Loaders::Warmup(DataLoader::new(Arc::new(dataset), self.loader_config(batch * 2, true)))
            }
            LoaderRequest::Train { inputs, truncate } => self.split(
                &inputs,
                PartitionPolicy::Labeled { truncate },
                PartitionPolicy::Unlabeled { truncate },
            )?,
            LoaderRequest::TrainSvd { inputs, refinement } => self.split(
                &inputs,
                PartitionPolicy::LabeledSvd { refinement },
                PartitionPolicy::UnlabeledSvd { refinement },
            )?,
            LoaderRequest::EvalTrain => {
                let dataset = self.all_samples(self.subsample(1), false);
                Loaders::EvalTrain(DataLoader::new(Arc::new(dataset), self.loader_config(batch, false)))
            }
            LoaderRequest::Test => self.eval(DatasetMode::Test)?,
            LoaderRequest::Val => self.eval(DatasetMode::Val)?,
        };

        for (mode, samples, batches) in loaders.summary() {
            info!("{} loader ready: {} samples in {} batches", mode, samples, batches);
        }
        Ok(loaders)
    }
}
