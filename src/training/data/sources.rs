//! Sample indices of the supported sources
//!
//! A [`SourceIndex`] holds the train, validation and test records of one
//! dataset. It is built once and shared by every dataset a factory creates.

use super::annotations::{read_key_list, read_label_file, read_label_map, resolve_key};
use super::cifar::{self, CifarSplit};
use super::{DataError, ImageRef, SampleIndex, SampleRecord};
use crate::config::{DatasetConfig, DatasetKind};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, instrument};

const ANNOTATION_DIR: &str = "annotations";

/// Train, validation and test records of a dataset
#[derive(Debug, Clone)]
pub struct SourceIndex {
    /// Source kind
    pub kind: DatasetKind,
    /// Number of classes
    pub num_classes: usize,
    /// Training records with noisy labels
    pub train: SampleIndex,
    /// Validation records with clean labels
    pub val: SampleIndex,
    /// Test records with clean labels
    pub test: SampleIndex,
}

impl SourceIndex {
    /// Read the annotations (or batches) of a dataset
    #[instrument(skip(config), fields(kind = ?config.kind, root = %config.root.display()))]
    pub fn load(config: &DatasetConfig) -> Result<Self, DataError> {
        let num_classes = config.num_classes();
        let root = config.root.as_path();
        if !(0.0..=1.0).contains(&config.noise.percent) {
            return Err(DataError::InvalidNoiseConfig {
                percent: config.noise.percent,
            });
        }

        let (train, val, test) = match config.kind {
            DatasetKind::Clothing1M => load_clothing1m(root)?,
            DatasetKind::Svhn => load_svhn(root)?,
            DatasetKind::Cifar10 | DatasetKind::Cifar100 => load_cifar(config)?,
        };

        for records in [&train, &val, &test] {
            check_labels(records, num_classes)?;
        }

        info!(
            "{} index: {} train, {} val, {} test samples",
            config.kind.name(),
            train.len(),
            val.len(),
            test.len()
        );

        Ok(Self {
            kind: config.kind,
            num_classes,
            train: train.into(),
            val: val.into(),
            test: test.into(),
        })
    }
}

type Splits = (Vec<SampleRecord>, Vec<SampleRecord>, Vec<SampleRecord>);

fn load_clothing1m(root: &Path) -> Result<Splits, DataError> {
    let dir = root.join(ANNOTATION_DIR);
    let noisy = read_label_map(dir.join("noisy_label_kv.txt"))?;
    let clean = read_label_map(dir.join("clean_label_kv.txt"))?;

    let train = keyed_records(root, &read_key_list(dir.join("noisy_train_key_list.txt"))?, &noisy)?;
    let val = keyed_records(root, &read_key_list(dir.join("clean_val_key_list.txt"))?, &clean)?;
    let test = keyed_records(root, &read_key_list(dir.join("clean_test_key_list.txt"))?, &clean)?;
    Ok((train, val, test))
}

fn load_svhn(root: &Path) -> Result<Splits, DataError> {
    let dir = root.join(ANNOTATION_DIR);
    let train = labeled_records(root, read_label_file(dir.join("train_label_kv.txt"))?);
    let test = labeled_records(root, read_label_file(dir.join("test_label_kv.txt"))?);
    Ok((train, test.clone(), test))
}

fn load_cifar(config: &DatasetConfig) -> Result<Splits, DataError> {
    let root = config.root.as_path();
    let mut train = cifar::load_split(root, config.kind, CifarSplit::Train)?;
    let test = cifar::load_split(root, config.kind, CifarSplit::Test)?;

    let clean: Vec<usize> = train.iter().map(|r| r.label).collect();
    let path = cifar::noise_file_path(root, config.kind, &config.noise);
    let noise = cifar::load_or_generate_noise(&path, config.kind, &config.noise, &clean, config.num_classes())?;
    for (record, label) in train.iter_mut().zip(noise.noisy_labels) {
        record.label = label;
    }

    Ok((train, test.clone(), test))
}

fn keyed_records(root: &Path, keys: &[String], labels: &HashMap<String, usize>) -> Result<Vec<SampleRecord>, DataError> {
    keys.iter()
        .map(|key| {
            let label = *labels
                .get(key)
                .ok_or_else(|| DataError::MissingLabel { key: key.clone() })?;
            Ok(SampleRecord {
                image: ImageRef::Path(resolve_key(root, key)),
                label,
            })
        })
        .collect()
}

fn labeled_records(root: &Path, entries: Vec<(String, usize)>) -> Vec<SampleRecord> {
    entries
        .into_iter()
        .map(|(key, label)| SampleRecord {
            image: ImageRef::Path(resolve_key(root, &key)),
            label,
        })
        .collect()
}

fn check_labels(records: &[SampleRecord], num_classes: usize) -> Result<(), DataError> {
    match records.iter().find(|r| r.label >= num_classes) {
        Some(record) => Err(DataError::LabelOutOfRange {
            key: record.image.key(),
            label: record.label,
            num_classes,
        }),
        None => Ok(()),
    }
}
