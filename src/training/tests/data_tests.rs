//! End-to-end tests of the data pipeline
//!
//! Fixtures are written to temporary directories, indexed by a
//! [`LoaderFactory`] and consumed through the async loaders.

use anyhow::{anyhow, Result};
use candle_core::Tensor;
use std::collections::{HashMap, HashSet};
use std::fs;
use tempfile::TempDir;

use crate::config::{DatasetConfig, DatasetKind, NoiseConfig};
use crate::training::data::cifar::NoiseFile;
use crate::training::data::{
    AllSamples, DataError, DataLoader, LoaderFactory, LoaderRequest, Loaders, PartitionInputs, TruncateMode,
};

use super::test_utils::{test_loader_config, write_cifar10_fixture, ClothingFixture};

fn eval_train(factory: &LoaderFactory) -> Result<DataLoader<AllSamples>> {
    match factory.run(LoaderRequest::EvalTrain)? {
        Loaders::EvalTrain(loader) => Ok(loader),
        _ => Err(anyhow!("expected an eval_train loader")),
    }
}

#[tokio::test]
async fn test_clothing1m_eval_train_keeps_source_order() -> Result<()> {
    let fixture = ClothingFixture::new(28)?;
    let factory = LoaderFactory::new(&fixture.config(), test_loader_config(4, 0))?;
    let loader = eval_train(&factory)?;

    assert_eq!(loader.dataset_size(), 28);
    assert_eq!(loader.num_batches(), 7);

    let batch = loader.next_batch().await?.ok_or_else(|| anyhow!("empty loader"))?;
    assert_eq!(batch.images.dims(), &[4, 3, 224, 224]);
    assert_eq!(batch.labels.to_vec1::<u32>()?, vec![0, 1, 2, 3]);

    let expected: Vec<String> = fixture.train_keys[..4]
        .iter()
        .map(|key| fixture.image_path(key).display().to_string())
        .collect();
    assert_eq!(batch.keys, expected);
    Ok(())
}

#[tokio::test]
async fn test_clothing1m_train_split_from_predictions() -> Result<()> {
    let fixture = ClothingFixture::new(28)?;
    let factory = LoaderFactory::new(&fixture.config(), test_loader_config(4, 0))?;
    let records = eval_train(&factory)?.dataset().records();

    let pred: Vec<bool> = (0..28).map(|i| i % 2 == 0).collect();
    let prob: Vec<f32> = (0..28).map(|i| i as f32 / 28.0).collect();
    let inputs = PartitionInputs::new(records, pred, prob, None)?;

    let Loaders::Train { labeled, unlabeled } = factory.run(LoaderRequest::Train {
        inputs,
        truncate: TruncateMode::None,
    })?
    else {
        return Err(anyhow!("expected train loaders"));
    };
    assert_eq!(labeled.dataset_size(), 14);
    assert_eq!(unlabeled.dataset_size(), 14);

    let batch = labeled.next_batch().await?.ok_or_else(|| anyhow!("empty labeled loader"))?;
    assert_eq!(batch.view1.dims(), &[4, 3, 224, 224]);
    assert_eq!(batch.view2.dims(), batch.view1.dims());

    // Sample i has label i % 14 and confidence i / 28, and only even i are clean.
    let labels = batch.labels.to_vec1::<u32>()?;
    let confidences = batch.confidences.to_vec1::<f32>()?;
    for (label, confidence) in labels.iter().zip(&confidences) {
        let index = (confidence * 28.0).round() as usize;
        assert_eq!(index % 2, 0);
        assert_eq!(*label as usize, fixture.train_labels[index]);
    }

    let views = unlabeled.next_batch().await?.ok_or_else(|| anyhow!("empty unlabeled loader"))?;
    assert_eq!(views.len(), 4);
    assert_eq!(views.view1.dims(), &[4, 3, 224, 224]);
    Ok(())
}

#[tokio::test]
async fn test_clothing1m_svd_split_uses_teacher_set() -> Result<()> {
    let fixture = ClothingFixture::new(28)?;
    let factory = LoaderFactory::new(&fixture.config(), test_loader_config(5, 0))?;
    let records = eval_train(&factory)?.dataset().records();

    let pred = vec![false; 28];
    let prob = vec![0.25; 28];
    let teacher: Vec<usize> = (0..10).collect();

    let missing = PartitionInputs::new(records.clone(), pred.clone(), prob.clone(), None)?;
    let result = factory.run(LoaderRequest::TrainSvd {
        inputs: missing,
        refinement: false,
    });
    assert!(matches!(result, Err(DataError::InvalidPartition { .. })));

    let inputs = PartitionInputs::new(records, pred, prob, Some(teacher))?;
    let Loaders::Train { labeled, unlabeled } = factory.run(LoaderRequest::TrainSvd {
        inputs,
        refinement: false,
    })?
    else {
        return Err(anyhow!("expected train loaders"));
    };
    assert_eq!(labeled.dataset_size(), 10);
    assert_eq!(unlabeled.dataset_size(), 18);
    assert_eq!(labeled.num_batches(), 2);

    let batch = labeled.next_batch().await?.ok_or_else(|| anyhow!("empty labeled loader"))?;
    assert!(batch.confidences.to_vec1::<f32>()?.iter().all(|&c| c == 1.0));
    Ok(())
}

#[tokio::test]
async fn test_clothing1m_eval_loaders_use_clean_labels() -> Result<()> {
    let fixture = ClothingFixture::new(14)?;
    let factory = LoaderFactory::new(&fixture.config(), test_loader_config(4, 0))?;

    let Loaders::Eval(val) = factory.run(LoaderRequest::Val)? else {
        return Err(anyhow!("expected an eval loader"));
    };
    let Loaders::Eval(test) = factory.run(LoaderRequest::Test)? else {
        return Err(anyhow!("expected an eval loader"));
    };
    assert_eq!(val.dataset_size(), 3);
    assert_eq!(test.num_batches(), 1);

    let batch = test.next_batch().await?.ok_or_else(|| anyhow!("empty test loader"))?;
    assert_eq!(batch.images.dims(), &[4, 3, 224, 224]);
    assert_eq!(batch.labels.to_vec1::<u32>()?, vec![6, 8, 10, 12]);
    Ok(())
}

#[tokio::test]
async fn test_clothing1m_warmup_is_class_balanced() -> Result<()> {
    let fixture = ClothingFixture::new(42)?;
    // 2 batches of 3 doubled: 12 samples, fewer than one per class
    let factory = LoaderFactory::new(&fixture.config(), test_loader_config(3, 2))?;

    let Loaders::Warmup(loader) = factory.run(LoaderRequest::Warmup)? else {
        return Err(anyhow!("expected a warmup loader"));
    };
    assert_eq!(loader.dataset_size(), 12);
    assert_eq!(loader.config().batch_size, 6);
    assert_eq!(loader.num_batches(), 2);

    let mut labels = Vec::new();
    for _ in 0..loader.num_batches() {
        let batch = loader.next_batch().await?.ok_or_else(|| anyhow!("short warmup epoch"))?;
        labels.extend(batch.labels.to_vec1::<u32>()?);
    }
    let distinct: HashSet<u32> = labels.iter().copied().collect();
    assert_eq!(distinct.len(), labels.len());
    Ok(())
}

#[tokio::test]
async fn test_cifar10_noise_file_is_generated_and_reused() -> Result<()> {
    let dir = TempDir::new()?;
    write_cifar10_fixture(dir.path(), 10)?;

    let mut config = DatasetConfig::new(DatasetKind::Cifar10, dir.path());
    config.noise = NoiseConfig {
        percent: 0.4,
        asymmetric: false,
        seed: 3,
    };

    let factory = LoaderFactory::new(&config, test_loader_config(8, 0))?;
    let noise_path = dir.path().join("CIFAR10_0.4_Asym_False.json");
    assert!(noise_path.exists());

    let saved: NoiseFile = serde_json::from_str(&fs::read_to_string(&noise_path)?)?;
    assert_eq!(saved.noisy_labels.len(), 50);
    assert_eq!(saved.dataset, "CIFAR10");

    let train_labels: Vec<usize> = factory.source().train.iter().map(|r| r.label).collect();
    assert_eq!(train_labels, saved.noisy_labels);

    // At most 40% of the labels change; symmetric noise may redraw the clean label.
    let changed = (0..50).filter(|&i| train_labels[i] != i % 10).count();
    assert!(changed <= 20, "{} labels changed", changed);

    let again = LoaderFactory::new(&config, test_loader_config(8, 0))?;
    let reloaded: Vec<usize> = again.source().train.iter().map(|r| r.label).collect();
    assert_eq!(reloaded, train_labels);

    let Loaders::Eval(test) = factory.run(LoaderRequest::Test)? else {
        return Err(anyhow!("expected an eval loader"));
    };
    let batch = test.next_batch().await?.ok_or_else(|| anyhow!("empty test loader"))?;
    assert_eq!(batch.images.dims(), &[10, 3, 32, 32]);
    assert_eq!(batch.labels.to_vec1::<u32>()?, (0..10).collect::<Vec<u32>>());
    Ok(())
}

#[tokio::test]
async fn test_cifar10_train_views_have_crop_shape() -> Result<()> {
    let dir = TempDir::new()?;
    write_cifar10_fixture(dir.path(), 4)?;
    let factory = LoaderFactory::new(&DatasetConfig::new(DatasetKind::Cifar10, dir.path()), test_loader_config(4, 0))?;

    let records = eval_train(&factory)?.dataset().records();
    let n = records.len();
    let inputs = PartitionInputs::new(records, vec![true; n], vec![0.9; n], None)?;
    let Loaders::Train { labeled, unlabeled } = factory.run(LoaderRequest::Train {
        inputs,
        truncate: TruncateMode::None,
    })?
    else {
        return Err(anyhow!("expected train loaders"));
    };
    assert_eq!(labeled.dataset_size(), 20);
    assert_eq!(unlabeled.dataset_size(), 0);

    let batch = labeled.next_batch().await?.ok_or_else(|| anyhow!("empty labeled loader"))?;
    assert_eq!(batch.view1.dims(), &[4, 3, 32, 32]);
    assert_eq!(batch.labels.dims(), &[4]);
    Ok(())
}

fn rows(batch: &Tensor) -> Result<Vec<Vec<f32>>> {
    let mut rows = Vec::with_capacity(batch.dim(0)?);
    for row in 0..batch.dim(0)? {
        rows.push(batch.get(row)?.flatten_all()?.to_vec1::<f32>()?);
    }
    Ok(rows)
}

#[tokio::test]
async fn test_labeled_views_are_redrawn_every_epoch() -> Result<()> {
    let fixture = ClothingFixture::new(6)?;
    let factory = LoaderFactory::new(&fixture.config(), test_loader_config(6, 0))?;
    let records = eval_train(&factory)?.dataset().records();
    let inputs = PartitionInputs::new(records, vec![true; 6], vec![0.5; 6], None)?;

    let Loaders::Train { labeled, .. } = factory.run(LoaderRequest::Train {
        inputs,
        truncate: TruncateMode::None,
    })?
    else {
        return Err(anyhow!("expected train loaders"));
    };

    // One batch per epoch; labels are distinct, so they identify samples
    // across the per-epoch shuffles.
    let mut epochs: Vec<HashMap<u32, (Vec<f32>, Vec<f32>)>> = Vec::new();
    for _ in 0..4 {
        let batch = labeled.next_batch().await?.ok_or_else(|| anyhow!("empty labeled loader"))?;
        assert!(labeled.next_batch().await?.is_none());

        let labels = batch.labels.to_vec1::<u32>()?;
        let views = rows(&batch.view1)?.into_iter().zip(rows(&batch.view2)?);
        epochs.push(labels.into_iter().zip(views).collect());
    }
    assert_eq!(labeled.current_epoch().await, 4);

    let first = &epochs[0];
    assert!(first.values().any(|(view1, view2)| view1 != view2));
    for label in first.keys() {
        let redrawn = epochs[1..].iter().any(|epoch| epoch[label].0 != first[label].0);
        assert!(redrawn, "view1 of label {} is identical in every epoch", label);
    }
    Ok(())
}
