//! Plain cross-entropy, used for warmup epochs before the robust losses

use super::margin::target_scores;
use super::utils::{batch_accuracy, scalar_value, BatchInputs};
use super::{LossMetrics, LossOutcome, ReductionMethod, RobustLoss};
use crate::error::{Error, Result};
use candle_core::{Tensor, D};
use candle_nn as nn;
use tracing::instrument;

/// Softmax cross-entropy with optional label smoothing
#[derive(Debug, Clone)]
pub struct CrossEntropyLoss {
    label_smoothing: f64,
    reduction: ReductionMethod,
}

impl CrossEntropyLoss {
    /// Create a cross-entropy loss
    pub fn new(label_smoothing: f64, reduction: ReductionMethod) -> Result<Self> {
        if !(0.0..1.0).contains(&label_smoothing) {
            return Err(Error::invalid_input(format!(
                "label smoothing must be in [0, 1), got {}",
                label_smoothing
            )));
        }
        Ok(Self {
            label_smoothing,
            reduction,
        })
    }

    fn per_sample(&self, logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
        let log_probs = nn::ops::log_softmax(logits, D::Minus1)?;
        let nll = target_scores(&log_probs, targets)?.neg()?;
        if self.label_smoothing == 0.0 {
            return Ok(nll);
        }

        let smooth = log_probs.mean(D::Minus1)?.neg()?;
        let s = self.label_smoothing;
        Ok(nll.affine(1.0 - s, 0.0)?.add(&smooth.affine(s, 0.0)?)?)
    }
}

impl RobustLoss for CrossEntropyLoss {
    #[instrument(skip_all)]
    fn forward(&self, logits: &Tensor, targets: &Tensor) -> Result<LossOutcome> {
        let inputs = BatchInputs::new(logits, targets)?;

        let value = match (self.reduction, self.label_smoothing == 0.0) {
            (ReductionMethod::Mean, true) => nn::loss::cross_entropy(&inputs.logits, &inputs.targets)?,
            (ReductionMethod::Mean, false) => self.per_sample(&inputs.logits, &inputs.targets)?.mean_all()?,
            (ReductionMethod::Sum, _) => self.per_sample(&inputs.logits, &inputs.targets)?.sum_all()?,
        };

        let mut metrics = LossMetrics::new(inputs.batch_size);
        metrics.num_selected = inputs.batch_size;
        metrics.total_loss = scalar_value(&value)?;
        metrics.add_component("cross_entropy", metrics.total_loss);
        metrics.add_metric("accuracy", batch_accuracy(&inputs.logits, &inputs.targets)?);

        Ok(LossOutcome::Loss { value, metrics })
    }

    fn name(&self) -> &'static str {
        "cross_entropy"
    }

    fn reduction(&self) -> ReductionMethod {
        self.reduction
    }
}
