//! Dataset types, one per loading mode

use super::partition::{PartitionInputs, PartitionPolicy};
use super::transforms::ImagePipeline;
use super::{DataError, Dataset, DatasetMetadata, DatasetMode, SampleIndex, SampleRecord};
use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, instrument};

/// Item of the `all` mode
#[derive(Debug, Clone)]
pub struct AllItem {
    /// Transformed image `[3, H, W]`
    pub image: Tensor,
    /// Noisy label
    pub label: usize,
    /// Sample key (image path)
    pub key: String,
}

/// Item of the `labeled` modes
#[derive(Debug, Clone)]
pub struct LabeledItem {
    /// First augmented view
    pub view1: Tensor,
    /// Second, independently augmented view
    pub view2: Tensor,
    /// Noisy label
    pub label: usize,
    /// Clean confidence of the sample
    pub confidence: f32,
}

/// Item of the `unlabeled` modes
#[derive(Debug, Clone)]
pub struct UnlabeledItem {
    /// First augmented view
    pub view1: Tensor,
    /// Second, independently augmented view
    pub view2: Tensor,
}

/// Item of the `test` and `val` modes
#[derive(Debug, Clone)]
pub struct EvalItem {
    /// Transformed image
    pub image: Tensor,
    /// Clean label
    pub label: usize,
}

/// Per-sample augmentation randomness
///
/// With a seed every `(index, epoch)` pair gets its own reproducible stream,
/// otherwise the stream is drawn from the thread RNG.
#[derive(Debug, Clone, Copy)]
struct SampleRng {
    seed: Option<u64>,
}

impl SampleRng {
    fn for_sample(&self, index: usize, epoch: usize) -> StdRng {
        match self.seed {
            Some(seed) => {
                let stream = splitmix64(splitmix64(index as u64) ^ epoch as u64);
                StdRng::seed_from_u64(seed ^ stream)
            }
            None => StdRng::from_rng(&mut rand::rng()),
        }
    }
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn record(records: &[SampleRecord], index: usize) -> Result<&SampleRecord, DataError> {
    records.get(index).ok_or(DataError::InvalidIndex {
        index,
        dataset_size: records.len(),
    })
}

/// Full training set, optionally reduced to a class-balanced subsample
pub struct AllSamples {
    records: SampleIndex,
    pipeline: ImagePipeline,
    rng: SampleRng,
    metadata: DatasetMetadata,
}

impl AllSamples {
    /// Build the `all` dataset
    ///
    /// With `num_samples`, the records are shuffled and at most
    /// `num_samples / num_classes` samples of each class are kept, up to
    /// `num_samples` in total, then shuffled again. Without it every record
    /// is kept in source order.
    pub fn new(
        name: &str,
        records: SampleIndex,
        num_classes: usize,
        num_samples: Option<usize>,
        pipeline: ImagePipeline,
        seed: Option<u64>,
    ) -> Self {
        let records = match num_samples {
            Some(limit) => balanced_subsample(&records, num_classes, limit, seed),
            None => records,
        };

        info!("{} data has a size of {}", DatasetMode::All.as_str(), records.len());

        let metadata = DatasetMetadata {
            name: name.to_string(),
            mode: DatasetMode::All,
            num_samples: records.len(),
            num_classes,
        };

        Self {
            records,
            pipeline,
            rng: SampleRng { seed },
            metadata,
        }
    }

    /// Records in dataset order; predictions made over this dataset refer to them
    pub fn records(&self) -> SampleIndex {
        self.records.clone()
    }
}

fn balanced_subsample(records: &[SampleRecord], num_classes: usize, limit: usize, seed: Option<u64>) -> SampleIndex {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    };

    let mut order: Vec<usize> = (0..records.len()).collect();
    order.shuffle(&mut rng);

    let cap = limit as f64 / num_classes as f64;
    let mut per_class = vec![0usize; num_classes];
    let mut picked = Vec::with_capacity(limit.min(records.len()));
    for i in order {
        if picked.len() >= limit {
            break;
        }
        let label = records[i].label;
        if label < num_classes && (per_class[label] as f64) < cap {
            per_class[label] += 1;
            picked.push(records[i].clone());
        }
    }

    picked.shuffle(&mut rng);
    picked.into()
}

impl Dataset for AllSamples {
    type Item = AllItem;

    fn len(&self) -> usize {
        self.records.len()
    }

    fn get(&self, index: usize) -> Result<AllItem, DataError> {
        self.get_in_epoch(index, 0)
    }

    #[instrument(skip(self))]
    fn get_in_epoch(&self, index: usize, epoch: usize) -> Result<AllItem, DataError> {
        let sample = record(&self.records, index)?;
        let mut rng = self.rng.for_sample(index, epoch);
        let image = sample.image.load(index)?;

        Ok(AllItem {
            image: self.pipeline.apply(&image, &mut rng, index)?,
            label: sample.label,
            key: sample.image.key(),
        })
    }

    fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }
}

fn partition_records(
    inputs: &PartitionInputs,
    policy: PartitionPolicy,
    allowed: [DatasetMode; 2],
) -> Result<(Vec<SampleRecord>, Vec<f32>), DataError> {
    if !allowed.contains(&policy.mode()) {
        return Err(DataError::InvalidPartition {
            reason: format!("policy {} cannot build a {} dataset", policy.mode().as_str(), allowed[0].as_str()),
        });
    }

    let partition = policy.apply(inputs)?;
    let records = partition.indices.iter().map(|&i| inputs.records[i].clone()).collect();
    info!("{} data has a size of {}", policy.mode().as_str(), partition.len());
    Ok((records, partition.confidences))
}

/// Predicted-clean samples with their confidences
pub struct LabeledDataset {
    records: Vec<SampleRecord>,
    confidences: Vec<f32>,
    pipeline: ImagePipeline,
    rng: SampleRng,
    metadata: DatasetMetadata,
}

impl LabeledDataset {
    /// Build from a `Labeled` or `LabeledSvd` policy
    pub fn new(
        name: &str,
        inputs: &PartitionInputs,
        policy: PartitionPolicy,
        num_classes: usize,
        pipeline: ImagePipeline,
        seed: Option<u64>,
    ) -> Result<Self, DataError> {
        let (records, confidences) =
            partition_records(inputs, policy, [DatasetMode::Labeled, DatasetMode::LabeledSvd])?;

        let metadata = DatasetMetadata {
            name: name.to_string(),
            mode: policy.mode(),
            num_samples: records.len(),
            num_classes,
        };

        Ok(Self {
            records,
            confidences,
            pipeline,
            rng: SampleRng { seed },
            metadata,
        })
    }
}

impl Dataset for LabeledDataset {
    type Item = LabeledItem;

    fn len(&self) -> usize {
        self.records.len()
    }

    fn get(&self, index: usize) -> Result<LabeledItem, DataError> {
        self.get_in_epoch(index, 0)
    }

    #[instrument(skip(self))]
    fn get_in_epoch(&self, index: usize, epoch: usize) -> Result<LabeledItem, DataError> {
        let sample = record(&self.records, index)?;
        let mut rng = self.rng.for_sample(index, epoch);
        let image = sample.image.load(index)?;

        Ok(LabeledItem {
            view1: self.pipeline.apply(&image, &mut rng, index)?,
            view2: self.pipeline.apply(&image, &mut rng, index)?,
            label: sample.label,
            confidence: self.confidences[index],
        })
    }

    fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }
}

/// Predicted-noisy samples, served without labels
pub struct UnlabeledDataset {
    records: Vec<SampleRecord>,
    pipeline: ImagePipeline,
    rng: SampleRng,
    metadata: DatasetMetadata,
}

impl UnlabeledDataset {
    /// Build from an `Unlabeled` or `UnlabeledSvd` policy
    pub fn new(
        name: &str,
        inputs: &PartitionInputs,
        policy: PartitionPolicy,
        num_classes: usize,
        pipeline: ImagePipeline,
        seed: Option<u64>,
    ) -> Result<Self, DataError> {
        let (records, _) = partition_records(inputs, policy, [DatasetMode::Unlabeled, DatasetMode::UnlabeledSvd])?;

        let metadata = DatasetMetadata {
            name: name.to_string(),
            mode: policy.mode(),
            num_samples: records.len(),
            num_classes,
        };

        Ok(Self {
            records,
            pipeline,
            rng: SampleRng { seed },
            metadata,
        })
    }
}

impl Dataset for UnlabeledDataset {
    type Item = UnlabeledItem;

    fn len(&self) -> usize {
        self.records.len()
    }

    fn get(&self, index: usize) -> Result<UnlabeledItem, DataError> {
        self.get_in_epoch(index, 0)
    }

    #[instrument(skip(self))]
    fn get_in_epoch(&self, index: usize, epoch: usize) -> Result<UnlabeledItem, DataError> {
        let sample = record(&self.records, index)?;
        let mut rng = self.rng.for_sample(index, epoch);
        let image = sample.image.load(index)?;

        Ok(UnlabeledItem {
            view1: self.pipeline.apply(&image, &mut rng, index)?,
            view2: self.pipeline.apply(&image, &mut rng, index)?,
        })
    }

    fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }
}

/// Test or validation split with clean labels
pub struct EvalDataset {
    records: SampleIndex,
    pipeline: ImagePipeline,
    metadata: DatasetMetadata,
}

impl EvalDataset {
    /// Build a `Test` or `Val` dataset
    pub fn new(
        name: &str,
        mode: DatasetMode,
        records: SampleIndex,
        num_classes: usize,
        pipeline: ImagePipeline,
    ) -> Result<Self, DataError> {
        if !matches!(mode, DatasetMode::Test | DatasetMode::Val) {
            return Err(DataError::InvalidPartition {
                reason: format!("{} is not an evaluation mode", mode.as_str()),
            });
        }

        debug!("{} data has a size of {}", mode.as_str(), records.len());

        let metadata = DatasetMetadata {
            name: name.to_string(),
            mode,
            num_samples: records.len(),
            num_classes,
        };

        Ok(Self {
            records,
            pipeline,
            metadata,
        })
    }
}

impl Dataset for EvalDataset {
    type Item = EvalItem;

    fn len(&self) -> usize {
        self.records.len()
    }

    #[instrument(skip(self))]
    fn get(&self, index: usize) -> Result<EvalItem, DataError> {
        let sample = record(&self.records, index)?;
        // Evaluation pipelines have no random steps.
        let mut rng = StdRng::seed_from_u64(0);
        let image = sample.image.load(index)?;

        Ok(EvalItem {
            image: self.pipeline.apply(&image, &mut rng, index)?,
            label: sample.label,
        })
    }

    fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }
}
