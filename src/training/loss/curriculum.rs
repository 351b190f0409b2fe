//! Curriculum-style robust losses
//!
//! Both losses follow the same recipe: margins, soft hinge per sample,
//! budget-constrained selection of the easiest samples, then the maximum of
//! the selected loss mass and a count-based floor. The floor keeps the loss
//! from collapsing to zero by simply discarding samples.

use super::hinge::soft_hinge_loss;
use super::margin::{compute_margin, MarginKind};
use super::selection::{curriculum_select, selection_mask};
use super::utils::{batch_accuracy, index_tensor, scalar_value, BatchInputs};
use super::{LossMetrics, LossOutcome, ReductionMethod, RobustLoss};
use crate::error::{Error, Result};
use candle_core::{Tensor, D};
use tracing::{debug, instrument, warn};

/// Noise-pruned curriculum loss (NPCL)
///
/// With noise rate `epsilon` and batch size `n`, the selection budget is
/// `(1 - epsilon)^2 * n + (1 - epsilon) * #{margin < 0}` and the loss is
/// `max(sum(selected hinge), threshold - #selected)`, divided by
/// `#selected` under mean reduction.
#[derive(Debug, Clone)]
pub struct NpclLoss {
    epsilon: f64,
    reduction: ReductionMethod,
}

impl NpclLoss {
    /// Create an NPCL loss; `epsilon` must lie in `[0, 1]`
    pub fn new(epsilon: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&epsilon) {
            return Err(Error::invalid_input(format!(
                "NPCL epsilon must be in [0, 1], got {}",
                epsilon
            )));
        }
        Ok(Self {
            epsilon,
            reduction: ReductionMethod::Mean,
        })
    }

    /// Override the reduction
    pub fn with_reduction(mut self, reduction: ReductionMethod) -> Self {
        self.reduction = reduction;
        self
    }

    /// Noise rate
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Selection budget for a batch
    pub fn threshold(&self, batch_size: usize, num_negative_margin: usize) -> f64 {
        let keep = 1.0 - self.epsilon;
        keep * keep * batch_size as f64 + keep * num_negative_margin as f64
    }
}

impl RobustLoss for NpclLoss {
    #[instrument(skip_all, fields(epsilon = self.epsilon))]
    fn forward(&self, logits: &Tensor, targets: &Tensor) -> Result<LossOutcome> {
        let inputs = BatchInputs::new(logits, targets)?;

        let margin = compute_margin(&inputs.logits, &inputs.targets, MarginKind::TopTwo)?;
        let margins = margin.to_vec1::<f32>()?;
        let num_negative = margins.iter().filter(|m| **m < 0.0).count();
        let threshold = self.threshold(inputs.batch_size, num_negative);

        let losses = soft_hinge_loss(&margin, &inputs.logits, &inputs.targets)?;
        let selected = curriculum_select(&losses.to_vec1::<f32>()?, threshold);

        let mut metrics = LossMetrics::new(inputs.batch_size);
        metrics.threshold = Some(threshold);
        metrics.num_negative_margin = num_negative;
        metrics.num_selected = selected.len();
        metrics.add_metric("accuracy", batch_accuracy(&inputs.logits, &inputs.targets)?);

        if selected.is_empty() {
            warn!(
                batch_size = inputs.batch_size,
                threshold, "NPCL selected no samples, skipping batch"
            );
            return Ok(LossOutcome::NoSelection { metrics });
        }

        let selected_sum = losses
            .index_select(&index_tensor(&selected, inputs.device())?, 0)?
            .sum_all()?;
        let floor = threshold - selected.len() as f64;
        let floor_tensor = Tensor::new(floor as f32, inputs.device())?;
        let mut value = selected_sum.maximum(&floor_tensor)?;

        if self.reduction == ReductionMethod::Mean {
            value = value.affine(1.0 / selected.len() as f64, 0.0)?;
        }

        metrics.add_component("selected_hinge", scalar_value(&selected_sum)?);
        metrics.add_component("count_floor", floor);
        metrics.total_loss = scalar_value(&value)?;

        debug!(
            "NPCL selected {}/{} samples, threshold {:.3}, loss {:.4}",
            selected.len(),
            inputs.batch_size,
            threshold,
            metrics.total_loss
        );

        Ok(LossOutcome::Loss { value, metrics })
    }

    fn name(&self) -> &'static str {
        "npcl"
    }

    fn reduction(&self) -> ReductionMethod {
        self.reduction
    }
}

/// Which margin the curriculum loss uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurriculumVariant {
    /// Margins over softmax probabilities
    Standard,
    /// Margins over raw logits with the target class masked out
    Tight,
}

impl CurriculumVariant {
    fn margin_kind(self) -> MarginKind {
        match self {
            Self::Standard => MarginKind::Probability,
            Self::Tight => MarginKind::ExcludeTarget,
        }
    }
}

/// Curriculum loss
///
/// The selection is applied as a 0/1 mask over the per-sample hinge losses.
/// The loss is `max(mask · losses, n - #selected + #{unselected with margin < 0})`
/// with a selection budget of `threshold_scale * n`.
#[derive(Debug, Clone)]
pub struct CurriculumLoss {
    variant: CurriculumVariant,
    threshold_scale: f64,
    reduction: ReductionMethod,
}

impl CurriculumLoss {
    /// Create a curriculum loss; `threshold_scale` must lie in `[0, 2]`
    pub fn new(variant: CurriculumVariant, threshold_scale: f64) -> Result<Self> {
        if !(0.0..=2.0).contains(&threshold_scale) {
            return Err(Error::invalid_input(format!(
                "curriculum threshold scale must be in [0, 2], got {}",
                threshold_scale
            )));
        }
        Ok(Self {
            variant,
            threshold_scale,
            reduction: ReductionMethod::Sum,
        })
    }

    /// Standard curriculum loss with threshold `n`
    pub fn standard() -> Self {
        Self {
            variant: CurriculumVariant::Standard,
            threshold_scale: 1.0,
            reduction: ReductionMethod::Sum,
        }
    }

    /// Tight curriculum loss with threshold `n`
    pub fn tight() -> Self {
        Self {
            variant: CurriculumVariant::Tight,
            threshold_scale: 1.0,
            reduction: ReductionMethod::Sum,
        }
    }

    /// Override the reduction
    pub fn with_reduction(mut self, reduction: ReductionMethod) -> Self {
        self.reduction = reduction;
        self
    }

    /// Margin variant
    pub fn variant(&self) -> CurriculumVariant {
        self.variant
    }
}

impl RobustLoss for CurriculumLoss {
    #[instrument(skip_all, fields(variant = ?self.variant))]
    fn forward(&self, logits: &Tensor, targets: &Tensor) -> Result<LossOutcome> {
        let inputs = BatchInputs::new(logits, targets)?;
        let batch_size = inputs.batch_size;

        let margin = compute_margin(&inputs.logits, &inputs.targets, self.variant.margin_kind())?;
        let margins = margin.to_vec1::<f32>()?;
        let threshold = self.threshold_scale * batch_size as f64;

        let losses = soft_hinge_loss(&margin, &inputs.logits, &inputs.targets)?;
        let selected = curriculum_select(&losses.to_vec1::<f32>()?, threshold);
        let mask = selection_mask(&selected, batch_size);

        let mut metrics = LossMetrics::new(batch_size);
        metrics.threshold = Some(threshold);
        metrics.num_negative_margin = margins.iter().filter(|m| **m < 0.0).count();
        metrics.num_selected = selected.len();
        metrics.add_metric("accuracy", batch_accuracy(&inputs.logits, &inputs.targets)?);

        if selected.is_empty() {
            warn!(
                batch_size,
                threshold, "curriculum loss selected no samples, skipping batch"
            );
            return Ok(LossOutcome::NoSelection { metrics });
        }

        let mask_values: Vec<f32> = mask.iter().map(|&m| if m { 1.0 } else { 0.0 }).collect();
        let mask_tensor = Tensor::from_vec(mask_values, batch_size, inputs.device())?;
        let masked_sum = mask_tensor.mul(&losses)?.sum(D::Minus1)?;

        let unselected_negative = margins
            .iter()
            .zip(&mask)
            .filter(|(m, keep)| !**keep && **m < 0.0)
            .count();
        let floor = (batch_size - selected.len() + unselected_negative) as f64;
        let floor_tensor = Tensor::new(floor as f32, inputs.device())?;
        let mut value = masked_sum.maximum(&floor_tensor)?;

        if self.reduction == ReductionMethod::Mean {
            value = value.affine(1.0 / selected.len() as f64, 0.0)?;
        }

        metrics.add_component("selected_hinge", scalar_value(&masked_sum)?);
        metrics.add_component("count_floor", floor);
        metrics.total_loss = scalar_value(&value)?;

        debug!(
            "curriculum ({:?}) selected {}/{} samples, loss {:.4}",
            self.variant,
            selected.len(),
            batch_size,
            metrics.total_loss
        );

        Ok(LossOutcome::Loss { value, metrics })
    }

    fn name(&self) -> &'static str {
        match self.variant {
            CurriculumVariant::Standard => "curriculum",
            CurriculumVariant::Tight => "tight_curriculum",
        }
    }

    fn reduction(&self) -> ReductionMethod {
        self.reduction
    }
}
