//! CIFAR-10/100 binary batches and label-noise files
//!
//! CIFAR records are `label (1 byte) + 3072 bytes` for CIFAR-10 and
//! `coarse (1) + fine (1) + 3072 bytes` for CIFAR-100. Pixels are stored
//! as three 32x32 planes (R, G, B).
//!
//! Training labels are replaced by the noisy assignment from a JSON noise
//! file. The file is generated with a seeded RNG on first use and reused
//! afterwards so every run of an experiment sees the same corruption.

use super::{DataError, ImageRef, SampleRecord};
use crate::config::{DatasetKind, NoiseConfig};
use chrono::{DateTime, Utc};
use image::RgbImage;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Side length of a CIFAR image
pub const IMAGE_SIDE: u32 = 32;
const PLANE: usize = (IMAGE_SIDE * IMAGE_SIDE) as usize;
const PIXEL_BYTES: usize = 3 * PLANE;

/// Training or test split
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CifarSplit {
    /// Training batches
    Train,
    /// Test batch
    Test,
}

/// Batch files of a split
pub fn batch_files(kind: DatasetKind, split: CifarSplit) -> Vec<&'static str> {
    match (kind, split) {
        (DatasetKind::Cifar100, CifarSplit::Train) => vec!["train.bin"],
        (DatasetKind::Cifar100, CifarSplit::Test) => vec!["test.bin"],
        (_, CifarSplit::Train) => vec![
            "data_batch_1.bin",
            "data_batch_2.bin",
            "data_batch_3.bin",
            "data_batch_4.bin",
            "data_batch_5.bin",
        ],
        (_, CifarSplit::Test) => vec!["test_batch.bin"],
    }
}

/// Load every record of a split, in file order
pub fn load_split(root: &Path, kind: DatasetKind, split: CifarSplit) -> Result<Vec<SampleRecord>, DataError> {
    let label_bytes = if kind == DatasetKind::Cifar100 { 2 } else { 1 };
    let mut records = Vec::new();

    for name in batch_files(kind, split) {
        let path = root.join(name);
        let bytes = fs::read(&path).map_err(|e| DataError::io(&path, e))?;
        decode_batch(&path, &bytes, label_bytes, &mut records)?;
    }

    info!("Loaded {} {:?} records from {:?}", records.len(), split, root);
    Ok(records)
}

/// Decode one batch file, appending to `records`
pub fn decode_batch(
    path: &Path,
    bytes: &[u8],
    label_bytes: usize,
    records: &mut Vec<SampleRecord>,
) -> Result<(), DataError> {
    let record_len = label_bytes + PIXEL_BYTES;
    if bytes.len() % record_len != 0 {
        return Err(DataError::MalformedBatch {
            path: path.to_path_buf(),
            reason: format!("{} bytes is not a multiple of {}", bytes.len(), record_len),
        });
    }

    for chunk in bytes.chunks_exact(record_len) {
        // The fine label is the last label byte for CIFAR-100.
        let label = chunk[label_bytes - 1] as usize;
        let planes = &chunk[label_bytes..];

        let mut pixels = Vec::with_capacity(PIXEL_BYTES);
        for i in 0..PLANE {
            pixels.push(planes[i]);
            pixels.push(planes[PLANE + i]);
            pixels.push(planes[2 * PLANE + i]);
        }
        let image = RgbImage::from_raw(IMAGE_SIDE, IMAGE_SIDE, pixels).ok_or_else(|| {
            DataError::MalformedBatch {
                path: path.to_path_buf(),
                reason: "pixel buffer size mismatch".to_string(),
            }
        })?;

        records.push(SampleRecord {
            image: ImageRef::Memory {
                id: records.len(),
                image: Arc::new(image),
            },
            label,
        });
    }

    Ok(())
}

/// Persisted noisy label assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseFile {
    /// Dataset name (e.g. `CIFAR10`)
    pub dataset: String,
    /// Fraction of corrupted labels
    pub percent: f64,
    /// Class-dependent corruption
    pub asymmetric: bool,
    /// Generation seed
    pub seed: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Noisy label of every training sample
    pub noisy_labels: Vec<usize>,
}

/// Path of the noise file for a dataset and noise setting
pub fn noise_file_path(root: &Path, kind: DatasetKind, noise: &NoiseConfig) -> PathBuf {
    let asym = if noise.asymmetric { "True" } else { "False" };
    root.join(format!("{}_{:.1}_Asym_{}.json", kind.name(), noise.percent, asym))
}

/// Load the noise file, generating and saving it if it does not exist yet
pub fn load_or_generate_noise(
    path: &Path,
    kind: DatasetKind,
    noise: &NoiseConfig,
    clean_labels: &[usize],
    num_classes: usize,
) -> Result<NoiseFile, DataError> {
    if path.exists() {
        let content = fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
        let file: NoiseFile = serde_json::from_str(&content)?;
        if file.noisy_labels.len() != clean_labels.len() {
            return Err(DataError::InvalidNoiseFile {
                path: path.to_path_buf(),
                reason: format!(
                    "{} labels for {} training samples",
                    file.noisy_labels.len(),
                    clean_labels.len()
                ),
            });
        }
        if let Some(&bad) = file.noisy_labels.iter().find(|&&l| l >= num_classes) {
            return Err(DataError::InvalidNoiseFile {
                path: path.to_path_buf(),
                reason: format!("label {} out of range", bad),
            });
        }
        info!("Loaded noisy labels from {:?}", path);
        return Ok(file);
    }

    warn!("Noise file {:?} not found, generating a new assignment", path);
    let noisy_labels = inject_noise(kind, noise, clean_labels, num_classes);
    let file = NoiseFile {
        dataset: kind.name().to_string(),
        percent: noise.percent,
        asymmetric: noise.asymmetric,
        seed: noise.seed,
        created_at: Utc::now(),
        noisy_labels,
    };
    fs::write(path, serde_json::to_string(&file)?).map_err(|e| DataError::io(path, e))?;
    Ok(file)
}

/// Corrupt a clean label vector
///
/// Symmetric noise relabels `percent` of all samples uniformly at random.
/// Asymmetric noise relabels `percent` of every class to a fixed confusable
/// class: the CIFAR-10 pairs truck→automobile, bird→airplane, deer→horse and
/// cat↔dog, or for other sources the next class in its block of five.
pub fn inject_noise(kind: DatasetKind, noise: &NoiseConfig, clean: &[usize], num_classes: usize) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(noise.seed);
    let mut noisy = clean.to_vec();

    if noise.percent <= 0.0 {
        return noisy;
    }

    if !noise.asymmetric {
        let mut order: Vec<usize> = (0..clean.len()).collect();
        order.shuffle(&mut rng);
        let count = ((noise.percent * clean.len() as f64) as usize).min(order.len());
        for &i in &order[..count] {
            noisy[i] = rng.random_range(0..num_classes);
        }
        return noisy;
    }

    for class in 0..num_classes {
        let Some(target) = asymmetric_target(kind, class, num_classes) else {
            continue;
        };
        let mut members: Vec<usize> = (0..clean.len()).filter(|&i| clean[i] == class).collect();
        members.shuffle(&mut rng);
        let count = ((noise.percent * members.len() as f64) as usize).min(members.len());
        for &i in &members[..count] {
            noisy[i] = target;
        }
    }
    noisy
}

fn asymmetric_target(kind: DatasetKind, class: usize, num_classes: usize) -> Option<usize> {
    if kind == DatasetKind::Cifar10 {
        return match class {
            9 => Some(1),
            2 => Some(0),
            4 => Some(7),
            3 => Some(5),
            5 => Some(3),
            _ => None,
        };
    }
    let block = class / 5 * 5;
    let target = block + (class % 5 + 1) % 5;
    (target < num_classes).then_some(target)
}
