//! Common utilities for the test suite

use anyhow::Result;
use candle_core::{Device, Tensor};
use image::{Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::{DatasetConfig, DatasetKind, LoaderConfig};
use crate::training::data::annotations::{write_key_list, write_label_file};

/// Create a test device (CPU for CI compatibility)
pub fn create_test_device() -> Device {
    Device::Cpu
}

/// Four samples: three confidently correct, the last confidently wrong
pub fn scenario_batch(device: &Device) -> Result<(Tensor, Tensor)> {
    let logits = Tensor::new(
        &[[5f32, 1.0, 1.0], [1.0, 5.0, 1.0], [1.0, 1.0, 5.0], [5.0, 1.0, 1.0]],
        device,
    )?;
    let targets = Tensor::new(&[0u32, 1, 2, 1], device)?;
    Ok((logits, targets))
}

/// `log(e^5 + 2e)`, the soft hinge of the misclassified scenario sample
pub fn scenario_lse() -> f64 {
    (5f64.exp() + 2.0 * 1f64.exp()).ln()
}

/// Logits that put `margin` on the target class of every row
pub fn confident_batch(targets: &[u32], num_classes: usize, margin: f32, device: &Device) -> Result<(Tensor, Tensor)> {
    let mut values = vec![0f32; targets.len() * num_classes];
    for (row, &target) in targets.iter().enumerate() {
        values[row * num_classes + target as usize] = margin;
    }
    let logits = Tensor::from_vec(values, (targets.len(), num_classes), device)?;
    let targets = Tensor::new(targets, device)?;
    Ok((logits, targets))
}

/// Assert two floats agree within `tolerance`
pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {} within {}, got {}",
        expected,
        tolerance,
        actual
    );
}

/// Small loader configuration with a fixed seed
pub fn test_loader_config(batch_size: usize, num_batches: usize) -> LoaderConfig {
    LoaderConfig {
        batch_size,
        num_batches,
        num_workers: 2,
        buffer_size: 4,
        eval_batch_size: 1000,
        seed: Some(7),
    }
}

fn write_png(path: &Path, shade: u8) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    // Horizontal and vertical gradients make crops and flips visible.
    RgbImage::from_fn(40, 30, |x, y| Rgb([shade, (x * 6) as u8, (y * 8) as u8])).save(path)?;
    Ok(())
}

/// Clothing1M-style image tree with annotation files
pub struct ClothingFixture {
    /// Keeps the directory alive
    pub dir: TempDir,
    /// Training keys in list order
    pub train_keys: Vec<String>,
    /// Noisy label of every training key
    pub train_labels: Vec<usize>,
}

impl ClothingFixture {
    /// `num_train` training images over 14 classes, 3 validation and 4 test images
    pub fn new(num_train: usize) -> Result<Self> {
        let dir = TempDir::new()?;
        let root = dir.path();
        let ann = root.join("annotations");
        fs::create_dir_all(&ann)?;

        let mut noisy = Vec::new();
        let mut train_keys = Vec::new();
        let mut train_labels = Vec::new();
        for i in 0..num_train {
            let key = format!("images/{}/{}.png", i % 3, i);
            write_png(&root.join(&key[7..]), i as u8)?;
            noisy.push((key.clone(), i % 14));
            train_keys.push(key);
            train_labels.push(i % 14);
        }

        let mut clean = Vec::new();
        let mut val_keys = Vec::new();
        let mut test_keys = Vec::new();
        for i in 0..7 {
            let key = format!("images/clean/{}.png", i);
            write_png(&root.join(&key[7..]), 200 + i as u8)?;
            clean.push((key.clone(), (i * 2) % 14));
            if i < 3 {
                val_keys.push(key);
            } else {
                test_keys.push(key);
            }
        }

        write_label_file(ann.join("noisy_label_kv.txt"), &noisy)?;
        write_label_file(ann.join("clean_label_kv.txt"), &clean)?;
        write_key_list(ann.join("noisy_train_key_list.txt"), &train_keys)?;
        write_key_list(ann.join("clean_val_key_list.txt"), &val_keys)?;
        write_key_list(ann.join("clean_test_key_list.txt"), &test_keys)?;

        Ok(Self {
            dir,
            train_keys,
            train_labels,
        })
    }

    /// Dataset configuration rooted at the fixture
    pub fn config(&self) -> DatasetConfig {
        DatasetConfig::new(DatasetKind::Clothing1M, self.dir.path())
    }

    /// Absolute image path of a training key
    pub fn image_path(&self, key: &str) -> PathBuf {
        self.dir.path().join(&key[7..])
    }
}

/// CIFAR-10 binary batches with `per_batch` records in every file
pub fn write_cifar10_fixture(root: &Path, per_batch: usize) -> Result<()> {
    let names = [
        "data_batch_1.bin",
        "data_batch_2.bin",
        "data_batch_3.bin",
        "data_batch_4.bin",
        "data_batch_5.bin",
        "test_batch.bin",
    ];
    for (file_no, name) in names.iter().enumerate() {
        let mut bytes = Vec::with_capacity(per_batch * 3073);
        for i in 0..per_batch {
            bytes.push(((file_no * per_batch + i) % 10) as u8);
            bytes.extend(std::iter::repeat(i as u8).take(3072));
        }
        fs::write(root.join(name), bytes)?;
    }
    Ok(())
}
