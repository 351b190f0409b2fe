//! Training-side building blocks for learning with noisy labels
//!
//! # Main Components
//!
//! - **Loss**: curriculum-style robust losses (NPCL, curriculum, tight
//!   curriculum) and plain cross-entropy for warmup
//! - **Data**: sample indices, confidence-driven partitions, typed datasets
//!   and the multi-worker loader factory
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use noisewise::training::{create_loss, LossConfig, LoaderFactory, LoaderRequest, Loaders};
//!
//! let factory = LoaderFactory::new(&config.dataset, config.loader.clone())?;
//! let Loaders::Warmup(loader) = factory.run(LoaderRequest::Warmup)? else { unreachable!() };
//! let loss = create_loss(&LossConfig::npcl(0.2))?;
//!
//! while let Some(batch) = loader.next_batch().await? {
//!     let logits = model.forward(&batch.images)?;
//!     let outcome = loss.forward(&logits, &batch.labels)?;
//!     optimizer.backward_step(&outcome.into_tensor(logits.device())?)?;
//! }
//! ```

pub mod data;
pub mod loss;

#[cfg(test)]
mod tests;

// Data re-exports
pub use data::{
    AllSamples, DataError, DataLoader, DataLoaderConfig, Dataset, DatasetMode, EvalDataset, LabeledDataset,
    LoaderFactory, LoaderMode, LoaderRequest, Loaders, Partition, PartitionInputs, PartitionPolicy, SourceIndex,
    TruncateMode, UnlabeledDataset,
};

// Loss re-exports
pub use loss::{
    create_loss, CrossEntropyLoss, CurriculumLoss, CurriculumVariant, LossConfig, LossMetrics, LossOutcome, LossType,
    NpclLoss, ReductionMethod, RobustLoss,
};
