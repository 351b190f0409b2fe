//! Input validation and small tensor helpers shared by the losses

use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor, D};

/// Validated loss inputs
///
/// Logits are converted to F32 and targets to U32 so every loss works on the
/// same dtypes regardless of what the classifier produced.
#[derive(Debug, Clone)]
pub struct BatchInputs {
    /// Logits `[batch_size, num_classes]`, F32
    pub logits: Tensor,
    /// Targets `[batch_size]`, U32
    pub targets: Tensor,
    /// Number of samples
    pub batch_size: usize,
    /// Number of classes
    pub num_classes: usize,
}

impl BatchInputs {
    /// Validate shapes, dtypes and target range
    pub fn new(logits: &Tensor, targets: &Tensor) -> Result<Self> {
        let (batch_size, num_classes) = logits.dims2().map_err(|_| {
            Error::invalid_input(format!(
                "logits must be [batch_size, num_classes], got {:?}",
                logits.dims()
            ))
        })?;

        if batch_size == 0 {
            return Err(Error::invalid_input("batch must not be empty"));
        }
        if num_classes < 2 {
            return Err(Error::invalid_input("at least two classes are required"));
        }
        if targets.dims1().ok() != Some(batch_size) {
            return Err(Error::invalid_input(format!(
                "targets must be [{}], got {:?}",
                batch_size,
                targets.dims()
            )));
        }

        let targets = match targets.dtype() {
            DType::U32 => targets.clone(),
            DType::U8 | DType::I64 => targets.to_dtype(DType::U32)?,
            other => {
                return Err(Error::invalid_input(format!(
                    "targets must be an integer tensor, got {:?}",
                    other
                )))
            }
        };
        if let Some(bad) = targets
            .to_vec1::<u32>()?
            .into_iter()
            .find(|&t| t as usize >= num_classes)
        {
            return Err(Error::invalid_input(format!(
                "target {} out of range for {} classes",
                bad, num_classes
            )));
        }

        let logits = if logits.dtype() == DType::F32 {
            logits.contiguous()?
        } else {
            logits.to_dtype(DType::F32)?.contiguous()?
        };

        Ok(Self {
            logits,
            targets,
            batch_size,
            num_classes,
        })
    }

    /// Device holding the batch
    pub fn device(&self) -> &Device {
        self.logits.device()
    }
}

/// Fraction of rows whose argmax equals the target
pub fn batch_accuracy(logits: &Tensor, targets: &Tensor) -> Result<f64> {
    let predictions = logits.argmax(D::Minus1)?;
    let correct = predictions.eq(targets)?.to_dtype(DType::F32)?;
    Ok(correct.mean_all()?.to_scalar::<f32>()? as f64)
}

/// U32 index tensor for `index_select`
pub fn index_tensor(indices: &[usize], device: &Device) -> Result<Tensor> {
    let indices: Vec<u32> = indices.iter().map(|&i| i as u32).collect();
    let len = indices.len();
    Ok(Tensor::from_vec(indices, len, device)?)
}

/// Read a scalar loss tensor back as f64
pub fn scalar_value(tensor: &Tensor) -> Result<f64> {
    Ok(tensor.to_dtype(DType::F64)?.to_scalar::<f64>()?)
}
