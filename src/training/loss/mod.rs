//! Noise-robust loss functions
//!
//! Every loss maps a logit matrix `[batch_size, num_classes]` and a target
//! vector `[batch_size]` to a scalar. The curriculum family first computes a
//! per-sample margin, turns it into a per-sample hinge loss, then selects the
//! easy subset of the batch whose cumulative loss stays inside a rank-dependent
//! budget.
//!
//! # Key Components
//!
//! - **Margins**: top-two, probability and excluded-target margins
//! - **Hinge losses**: soft and hard hinge over margins
//! - **Selection**: budget-constrained ascending-loss selection
//! - **NPCL / Curriculum**: the batch-level robust losses
//! - **Cross-entropy**: plain baseline used during warmup
//!
//! # Usage
//!
//! ```rust,ignore
//! use noisewise::training::loss::{create_loss, LossConfig, LossType};
//!
//! let config = LossConfig::npcl(0.2);
//! let loss_fn = create_loss(&config)?;
//!
//! let outcome = loss_fn.forward(&logits, &targets)?;
//! let loss = outcome.into_tensor(&device)?;
//! ```

pub mod curriculum;
pub mod hinge;
pub mod margin;
pub mod selection;
pub mod supervised;
pub mod utils;

use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main trait for all batch losses
pub trait RobustLoss: Send + Sync {
    /// Compute the loss for one batch
    fn forward(&self, logits: &Tensor, targets: &Tensor) -> Result<LossOutcome>;

    /// Short name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Reduction applied to the batch loss
    fn reduction(&self) -> ReductionMethod;
}

/// Configuration for loss functions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossConfig {
    /// Type of loss function
    pub loss_type: LossType,

    /// Loss reduction; `None` uses the loss type's default
    #[serde(default)]
    pub reduction: Option<ReductionMethod>,
}

/// Type of loss function
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    /// Softmax cross-entropy
    CrossEntropy {
        /// Label smoothing factor (0.0 = no smoothing)
        label_smoothing: f64,
    },
    /// Noise-pruned curriculum loss
    Npcl {
        /// Expected noise rate, in [0, 1]
        epsilon: f64,
    },
    /// Curriculum loss over softmax-probability margins
    Curriculum {
        /// Selection threshold as a multiple of the batch size, in [0, 2]
        threshold_scale: f64,
    },
    /// Curriculum loss over logit margins with the target class masked out
    TightCurriculum {
        /// Selection threshold as a multiple of the batch size, in [0, 2]
        threshold_scale: f64,
    },
}

/// Loss reduction methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReductionMethod {
    /// Divide by the number of contributing samples
    Mean,
    /// Keep the summed value
    Sum,
}

impl LossType {
    /// Reduction used when the config does not name one
    pub fn default_reduction(&self) -> ReductionMethod {
        match self {
            Self::CrossEntropy { .. } | Self::Npcl { .. } => ReductionMethod::Mean,
            Self::Curriculum { .. } | Self::TightCurriculum { .. } => ReductionMethod::Sum,
        }
    }
}

impl LossConfig {
    /// Cross-entropy configuration
    pub fn cross_entropy() -> Self {
        Self {
            loss_type: LossType::CrossEntropy { label_smoothing: 0.0 },
            reduction: None,
        }
    }

    /// NPCL configuration with the given noise rate
    pub fn npcl(epsilon: f64) -> Self {
        Self {
            loss_type: LossType::Npcl { epsilon },
            reduction: None,
        }
    }

    /// Curriculum configuration with threshold equal to the batch size
    pub fn curriculum() -> Self {
        Self {
            loss_type: LossType::Curriculum { threshold_scale: 1.0 },
            reduction: None,
        }
    }

    /// Tight curriculum configuration with threshold equal to the batch size
    pub fn tight_curriculum() -> Self {
        Self {
            loss_type: LossType::TightCurriculum { threshold_scale: 1.0 },
            reduction: None,
        }
    }

    /// Effective reduction
    pub fn reduction(&self) -> ReductionMethod {
        self.reduction
            .unwrap_or_else(|| self.loss_type.default_reduction())
    }

    /// Validate hyperparameters
    pub fn validate(&self) -> Result<()> {
        match &self.loss_type {
            LossType::CrossEntropy { label_smoothing } => {
                if !(0.0..1.0).contains(label_smoothing) {
                    return Err(Error::config("Label smoothing must be in [0.0, 1.0)"));
                }
            }
            LossType::Npcl { epsilon } => {
                if !(0.0..=1.0).contains(epsilon) {
                    return Err(Error::config("NPCL epsilon must be in [0.0, 1.0]"));
                }
            }
            LossType::Curriculum { threshold_scale }
            | LossType::TightCurriculum { threshold_scale } => {
                if !(0.0..=2.0).contains(threshold_scale) {
                    return Err(Error::config(
                        "Curriculum threshold scale must be in [0.0, 2.0]",
                    ));
                }
            }
        }
        Ok(())
    }
}

impl Default for LossConfig {
    fn default() -> Self {
        Self::npcl(0.2)
    }
}

/// Result of one loss evaluation
#[derive(Debug)]
pub enum LossOutcome {
    /// A differentiable scalar loss
    Loss {
        /// Scalar loss tensor
        value: Tensor,
        /// Batch statistics
        metrics: LossMetrics,
    },
    /// The selection step kept no sample; the step should be skipped
    NoSelection {
        /// Batch statistics
        metrics: LossMetrics,
    },
}

impl LossOutcome {
    /// Loss tensor, if any sample was selected
    pub fn value(&self) -> Option<&Tensor> {
        match self {
            Self::Loss { value, .. } => Some(value),
            Self::NoSelection { .. } => None,
        }
    }

    /// Batch statistics
    pub fn metrics(&self) -> &LossMetrics {
        match self {
            Self::Loss { metrics, .. } | Self::NoSelection { metrics } => metrics,
        }
    }

    /// Whether the selection step came back empty
    pub fn is_no_selection(&self) -> bool {
        matches!(self, Self::NoSelection { .. })
    }

    /// Loss tensor, or a constant zero scalar for an empty selection
    pub fn into_tensor(self, device: &Device) -> Result<Tensor> {
        match self {
            Self::Loss { value, .. } => Ok(value),
            Self::NoSelection { .. } => Ok(Tensor::zeros((), DType::F32, device)?),
        }
    }
}

/// Batch-level loss statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LossMetrics {
    /// Final loss value (0 for an empty selection)
    pub total_loss: f64,
    /// Number of samples in the batch
    pub batch_size: usize,
    /// Number of samples kept by the selection step
    pub num_selected: usize,
    /// Selection budget, for curriculum losses
    pub threshold: Option<f64>,
    /// Number of samples with a negative margin
    pub num_negative_margin: usize,
    /// Individual loss components
    pub components: HashMap<String, f64>,
    /// Additional metrics
    pub metrics: HashMap<String, f64>,
}

impl LossMetrics {
    /// Create empty metrics for a batch
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Default::default()
        }
    }

    /// Add a loss component
    pub fn add_component(&mut self, name: &str, value: f64) {
        self.components.insert(name.to_string(), value);
    }

    /// Add a metric
    pub fn add_metric(&mut self, name: &str, value: f64) {
        self.metrics.insert(name.to_string(), value);
    }

    /// Batch accuracy (if computed)
    pub fn accuracy(&self) -> Option<f64> {
        self.metrics.get("accuracy").copied()
    }

    /// Fraction of the batch kept by the selection step
    pub fn selection_ratio(&self) -> f64 {
        if self.batch_size == 0 {
            0.0
        } else {
            self.num_selected as f64 / self.batch_size as f64
        }
    }
}

/// Build a loss function from its configuration
pub fn create_loss(config: &LossConfig) -> Result<Box<dyn RobustLoss>> {
    config.validate()?;
    let reduction = config.reduction();

    let loss: Box<dyn RobustLoss> = match &config.loss_type {
        LossType::CrossEntropy { label_smoothing } => {
            Box::new(CrossEntropyLoss::new(*label_smoothing, reduction)?)
        }
        LossType::Npcl { epsilon } => Box::new(NpclLoss::new(*epsilon)?.with_reduction(reduction)),
        LossType::Curriculum { threshold_scale } => Box::new(
            CurriculumLoss::new(CurriculumVariant::Standard, *threshold_scale)?
                .with_reduction(reduction),
        ),
        LossType::TightCurriculum { threshold_scale } => Box::new(
            CurriculumLoss::new(CurriculumVariant::Tight, *threshold_scale)?
                .with_reduction(reduction),
        ),
    };

    Ok(loss)
}

// Re-exports from submodules
pub use curriculum::{CurriculumLoss, CurriculumVariant, NpclLoss};
pub use hinge::{hard_hinge_loss, soft_hinge_loss};
pub use margin::{compute_margin, log_sum_exp, target_scores, MarginKind};
pub use selection::{curriculum_select, selection_mask};
pub use supervised::CrossEntropyLoss;
pub use utils::{batch_accuracy, BatchInputs};
