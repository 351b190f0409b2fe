//! Image pipeline: augmentation steps, tensor conversion and normalization

use super::DataError;
use crate::config::DatasetKind;
use candle_core::{Device, Tensor};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use rand::Rng;

/// One augmentation step
#[derive(Debug, Clone, PartialEq)]
pub enum TransformStep {
    /// Resize so the shorter side has this length, keeping the aspect ratio
    Resize(u32),
    /// Zero-pad every border by `padding`, then crop a random `size`x`size` window
    RandomCrop {
        /// Output side
        size: u32,
        /// Border padding
        padding: u32,
    },
    /// Crop the central `size`x`size` window
    CenterCrop(u32),
    /// Mirror horizontally with the given probability
    HorizontalFlip(f32),
    /// Random brightness, contrast and saturation factors
    ColorJitter {
        /// Brightness factor drawn from `[max(0, 1 - b), 1 + b]`
        brightness: f32,
        /// Contrast factor range
        contrast: (f32, f32),
        /// Saturation factor range
        saturation: (f32, f32),
    },
}

/// Augmentation steps followed by conversion to a normalized `(3, H, W)` tensor
#[derive(Debug, Clone)]
pub struct ImagePipeline {
    /// Steps applied in order
    pub steps: Vec<TransformStep>,
    /// Per-channel mean
    pub mean: [f32; 3],
    /// Per-channel standard deviation
    pub std: [f32; 3],
}

const CLOTHING1M_MEAN: [f32; 3] = [0.6959, 0.6537, 0.6371];
const CLOTHING1M_STD: [f32; 3] = [0.3113, 0.3192, 0.3214];
const CIFAR10_MEAN: [f32; 3] = [0.4914, 0.4822, 0.4465];
const CIFAR10_STD: [f32; 3] = [0.2023, 0.1994, 0.2010];
const CIFAR100_MEAN: [f32; 3] = [0.5071, 0.4867, 0.4408];
const CIFAR100_STD: [f32; 3] = [0.2675, 0.2565, 0.2761];
const SVHN_MEAN: [f32; 3] = [0.437_682_1, 0.443_769_7, 0.472_804_42];
const SVHN_STD: [f32; 3] = [0.198_030_12, 0.201_015_62, 0.197_036_14];

impl ImagePipeline {
    /// Create a pipeline
    pub fn new(steps: Vec<TransformStep>, mean: [f32; 3], std: [f32; 3]) -> Self {
        Self { steps, mean, std }
    }

    /// Training (`train = true`) or evaluation pipeline of a source
    pub fn for_dataset(kind: DatasetKind, train: bool) -> Self {
        use TransformStep::*;

        match (kind, train) {
            (DatasetKind::Clothing1M, true) => Self::new(
                vec![
                    Resize(256),
                    RandomCrop { size: 224, padding: 0 },
                    HorizontalFlip(0.5),
                ],
                CLOTHING1M_MEAN,
                CLOTHING1M_STD,
            ),
            (DatasetKind::Clothing1M, false) => {
                Self::new(vec![Resize(256), CenterCrop(224)], CLOTHING1M_MEAN, CLOTHING1M_STD)
            }
            (DatasetKind::Cifar10, true) => Self::new(cifar_augment(), CIFAR10_MEAN, CIFAR10_STD),
            (DatasetKind::Cifar10, false) => Self::new(Vec::new(), CIFAR10_MEAN, CIFAR10_STD),
            (DatasetKind::Cifar100, true) => Self::new(cifar_augment(), CIFAR100_MEAN, CIFAR100_STD),
            (DatasetKind::Cifar100, false) => Self::new(Vec::new(), CIFAR100_MEAN, CIFAR100_STD),
            (DatasetKind::Svhn, true) => Self::new(
                vec![
                    RandomCrop { size: 32, padding: 2 },
                    ColorJitter {
                        brightness: 63.0 / 255.0,
                        contrast: (0.2, 1.8),
                        saturation: (0.5, 1.5),
                    },
                ],
                SVHN_MEAN,
                SVHN_STD,
            ),
            (DatasetKind::Svhn, false) => Self::new(Vec::new(), SVHN_MEAN, SVHN_STD),
        }
    }

    /// Run every step on `image` and convert the result to a CPU `F32` tensor
    pub fn apply<R: Rng + ?Sized>(&self, image: &RgbImage, rng: &mut R, index: usize) -> Result<Tensor, DataError> {
        let mut current = image.clone();
        for step in &self.steps {
            current = step.apply(current, rng, index)?;
        }
        self.to_tensor(&current)
    }

    /// Scale to `[0, 1]`, normalize per channel, and lay out as `(3, H, W)`
    pub fn to_tensor(&self, image: &RgbImage) -> Result<Tensor, DataError> {
        let (width, height) = image.dimensions();
        let plane = (width * height) as usize;
        let mut data = vec![0f32; 3 * plane];

        for (i, pixel) in image.pixels().enumerate() {
            for c in 0..3 {
                data[c * plane + i] = (pixel[c] as f32 / 255.0 - self.mean[c]) / self.std[c];
            }
        }

        Ok(Tensor::from_vec(data, (3, height as usize, width as usize), &Device::Cpu)?)
    }
}

fn cifar_augment() -> Vec<TransformStep> {
    vec![
        TransformStep::RandomCrop { size: 32, padding: 4 },
        TransformStep::HorizontalFlip(0.5),
    ]
}

impl TransformStep {
    /// Apply the step
    pub fn apply<R: Rng + ?Sized>(&self, image: RgbImage, rng: &mut R, index: usize) -> Result<RgbImage, DataError> {
        match *self {
            Self::Resize(shorter) => Ok(resize_shorter(&image, shorter)),
            Self::RandomCrop { size, padding } => {
                let padded = if padding > 0 { pad(&image, padding) } else { image };
                let (width, height) = padded.dimensions();
                check_crop(width, height, size, index)?;
                let x = rng.random_range(0..=width - size);
                let y = rng.random_range(0..=height - size);
                Ok(imageops::crop_imm(&padded, x, y, size, size).to_image())
            }
            Self::CenterCrop(size) => {
                let (width, height) = image.dimensions();
                check_crop(width, height, size, index)?;
                let x = ((width - size) as f32 / 2.0).round() as u32;
                let y = ((height - size) as f32 / 2.0).round() as u32;
                Ok(imageops::crop_imm(&image, x, y, size, size).to_image())
            }
            Self::HorizontalFlip(p) => {
                if rng.random::<f32>() < p {
                    Ok(imageops::flip_horizontal(&image))
                } else {
                    Ok(image)
                }
            }
            Self::ColorJitter {
                brightness,
                contrast,
                saturation,
            } => {
                let b = rng.random_range((1.0 - brightness).max(0.0)..=1.0 + brightness);
                let c = rng.random_range(contrast.0..=contrast.1);
                let s = rng.random_range(saturation.0..=saturation.1);

                let mut out = blend(&image, b, |_| 0.0);
                let mean = mean_gray(&out);
                out = blend(&out, c, |_| mean);
                out = blend(&out, s, gray);
                Ok(out)
            }
        }
    }
}

fn check_crop(width: u32, height: u32, size: u32, index: usize) -> Result<(), DataError> {
    if size > width || size > height {
        return Err(DataError::Transform {
            index,
            reason: format!("crop {}x{} larger than image {}x{}", size, size, width, height),
        });
    }
    Ok(())
}

fn resize_shorter(image: &RgbImage, shorter: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let (w, h) = if width <= height {
        (shorter, (height as u64 * shorter as u64 / width.max(1) as u64) as u32)
    } else {
        ((width as u64 * shorter as u64 / height.max(1) as u64) as u32, shorter)
    };
    if (w, h) == (width, height) {
        return image.clone();
    }
    imageops::resize(image, w, h, FilterType::Triangle)
}

fn pad(image: &RgbImage, padding: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let mut out = RgbImage::new(width + 2 * padding, height + 2 * padding);
    imageops::replace(&mut out, image, padding as i64, padding as i64);
    out
}

fn gray(px: &Rgb<u8>) -> f32 {
    0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32
}

fn mean_gray(image: &RgbImage) -> f32 {
    let count = (image.width() * image.height()).max(1) as f32;
    image.pixels().map(gray).sum::<f32>() / count
}

/// `factor * px + (1 - factor) * reference(px)`, clamped to `u8`
fn blend(image: &RgbImage, factor: f32, reference: impl Fn(&Rgb<u8>) -> f32) -> RgbImage {
    let mut out = image.clone();
    for px in out.pixels_mut() {
        let r = reference(&*px);
        for c in 0..3 {
            px[c] = (factor * px[c] as f32 + (1.0 - factor) * r).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
