//! Batch collation for every dataset mode

use super::datasets::{AllItem, EvalItem, LabeledItem, UnlabeledItem};
use super::DataError;
use candle_core::{Device, Tensor};
use tracing::instrument;

/// Combine per-sample items into one batch
pub trait Collate: Sized + Send + 'static {
    /// Batch type produced from a list of items
    type Batch: Send + 'static;

    /// Collate items, preserving their order
    fn collate(items: Vec<Self>) -> Result<Self::Batch, DataError>;
}

/// Batch of the `all` mode
#[derive(Debug)]
pub struct AllBatch {
    /// Images `[B, 3, H, W]`
    pub images: Tensor,
    /// Noisy labels `[B]` (U32)
    pub labels: Tensor,
    /// Sample keys
    pub keys: Vec<String>,
}

/// Batch of the `labeled` and `labeled_svd` modes
#[derive(Debug)]
pub struct LabeledBatch {
    /// First augmented view `[B, 3, H, W]`
    pub view1: Tensor,
    /// Second augmented view `[B, 3, H, W]`
    pub view2: Tensor,
    /// Labels `[B]` (U32)
    pub labels: Tensor,
    /// Clean confidences `[B]` (F32)
    pub confidences: Tensor,
}

/// Batch of the `unlabeled` and `unlabeled_svd` modes
#[derive(Debug)]
pub struct UnlabeledBatch {
    /// First augmented view `[B, 3, H, W]`
    pub view1: Tensor,
    /// Second augmented view `[B, 3, H, W]`
    pub view2: Tensor,
}

/// Batch of the `test` and `val` modes
#[derive(Debug)]
pub struct EvalBatch {
    /// Images `[B, 3, H, W]`
    pub images: Tensor,
    /// Clean labels `[B]` (U32)
    pub labels: Tensor,
}

impl AllBatch {
    /// Number of samples
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True for an empty batch
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Move tensors to a different device
    pub fn to_device(self, device: &Device) -> Result<Self, candle_core::Error> {
        Ok(Self {
            images: self.images.to_device(device)?,
            labels: self.labels.to_device(device)?,
            keys: self.keys,
        })
    }
}

impl LabeledBatch {
    /// Number of samples
    pub fn len(&self) -> usize {
        self.view1.dims().first().copied().unwrap_or(0)
    }

    /// True for an empty batch
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move tensors to a different device
    pub fn to_device(self, device: &Device) -> Result<Self, candle_core::Error> {
        Ok(Self {
            view1: self.view1.to_device(device)?,
            view2: self.view2.to_device(device)?,
            labels: self.labels.to_device(device)?,
            confidences: self.confidences.to_device(device)?,
        })
    }
}

impl UnlabeledBatch {
    /// Number of samples
    pub fn len(&self) -> usize {
        self.view1.dims().first().copied().unwrap_or(0)
    }

    /// True for an empty batch
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move tensors to a different device
    pub fn to_device(self, device: &Device) -> Result<Self, candle_core::Error> {
        Ok(Self {
            view1: self.view1.to_device(device)?,
            view2: self.view2.to_device(device)?,
        })
    }
}

impl EvalBatch {
    /// Number of samples
    pub fn len(&self) -> usize {
        self.images.dims().first().copied().unwrap_or(0)
    }

    /// True for an empty batch
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move tensors to a different device
    pub fn to_device(self, device: &Device) -> Result<Self, candle_core::Error> {
        Ok(Self {
            images: self.images.to_device(device)?,
            labels: self.labels.to_device(device)?,
        })
    }
}

/// Stack `[3, H, W]` images into `[B, 3, H, W]`
#[instrument(skip(images), fields(count = images.len()))]
fn stack_images(images: &[Tensor]) -> Result<Tensor, DataError> {
    let Some(first) = images.first() else {
        return Err(DataError::BatchCollationError {
            reason: "cannot collate an empty batch".to_string(),
        });
    };

    if let Some((i, bad)) = images.iter().enumerate().find(|(_, t)| t.dims() != first.dims()) {
        return Err(DataError::BatchCollationError {
            reason: format!(
                "inconsistent image dimensions at index {}: expected {:?}, got {:?}",
                i,
                first.dims(),
                bad.dims()
            ),
        });
    }

    Ok(Tensor::stack(images, 0)?)
}

fn label_tensor(labels: impl Iterator<Item = usize>) -> Result<Tensor, DataError> {
    let labels: Vec<u32> = labels.map(|l| l as u32).collect();
    let len = labels.len();
    Ok(Tensor::from_vec(labels, len, &Device::Cpu)?)
}

impl Collate for AllItem {
    type Batch = AllBatch;

    fn collate(items: Vec<Self>) -> Result<AllBatch, DataError> {
        let images: Vec<Tensor> = items.iter().map(|item| item.image.clone()).collect();
        Ok(AllBatch {
            images: stack_images(&images)?,
            labels: label_tensor(items.iter().map(|item| item.label))?,
            keys: items.into_iter().map(|item| item.key).collect(),
        })
    }
}

impl Collate for LabeledItem {
    type Batch = LabeledBatch;

    fn collate(items: Vec<Self>) -> Result<LabeledBatch, DataError> {
        let view1: Vec<Tensor> = items.iter().map(|item| item.view1.clone()).collect();
        let view2: Vec<Tensor> = items.iter().map(|item| item.view2.clone()).collect();
        let confidences: Vec<f32> = items.iter().map(|item| item.confidence).collect();
        let len = confidences.len();

        Ok(LabeledBatch {
            view1: stack_images(&view1)?,
            view2: stack_images(&view2)?,
            labels: label_tensor(items.iter().map(|item| item.label))?,
            confidences: Tensor::from_vec(confidences, len, &Device::Cpu)?,
        })
    }
}

impl Collate for UnlabeledItem {
    type Batch = UnlabeledBatch;

    fn collate(items: Vec<Self>) -> Result<UnlabeledBatch, DataError> {
        let view1: Vec<Tensor> = items.iter().map(|item| item.view1.clone()).collect();
        let view2: Vec<Tensor> = items.iter().map(|item| item.view2.clone()).collect();

        Ok(UnlabeledBatch {
            view1: stack_images(&view1)?,
            view2: stack_images(&view2)?,
        })
    }
}

impl Collate for EvalItem {
    type Batch = EvalBatch;

    fn collate(items: Vec<Self>) -> Result<EvalBatch, DataError> {
        let images: Vec<Tensor> = items.iter().map(|item| item.image.clone()).collect();
        Ok(EvalBatch {
            images: stack_images(&images)?,
            labels: label_tensor(items.iter().map(|item| item.label))?,
        })
    }
}
