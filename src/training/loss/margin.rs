//! Per-sample margins
//!
//! A margin is the gap between the score of the target class and the best
//! competing score. Non-negative margins mean the sample is classified
//! correctly.

use crate::error::Result;
use candle_core::{Tensor, D};
use candle_nn::ops;

/// How the competing score is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarginKind {
    /// Raw logits: target minus the top-1 logit, falling back to the top-2
    /// logit when the target ties with the top-1 value
    TopTwo,
    /// Softmax probabilities, target excluded from the competitors
    ///
    /// This is `p[target] - max_{j != target} p[j]`, not
    /// `p[target] - max_j p[j]`. The latter is never positive and is exactly
    /// zero for every correctly classified sample. Here a correctly
    /// classified sample has a positive margin.
    Probability,
    /// Raw logits, target excluded from the competitors
    ExcludeTarget,
}

/// Compute the margin vector `[batch_size]`
///
/// `logits` must be F32 `[batch_size, num_classes]` and `targets` U32
/// `[batch_size]`; see [`super::BatchInputs`].
pub fn compute_margin(logits: &Tensor, targets: &Tensor, kind: MarginKind) -> Result<Tensor> {
    match kind {
        MarginKind::TopTwo => top_two_margin(logits, targets),
        MarginKind::Probability => {
            let probs = ops::softmax(logits, D::Minus1)?;
            exclude_target_margin(&probs, targets)
        }
        MarginKind::ExcludeTarget => exclude_target_margin(logits, targets),
    }
}

/// Score of the target class for every row
pub fn target_scores(scores: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let index = targets.unsqueeze(1)?;
    Ok(scores.gather(&index, 1)?.squeeze(1)?)
}

/// Numerically stable row-wise log-sum-exp
pub fn log_sum_exp(logits: &Tensor) -> Result<Tensor> {
    let max = logits.max_keepdim(D::Minus1)?;
    let sum = logits.broadcast_sub(&max)?.exp()?.sum_keepdim(D::Minus1)?;
    Ok(sum.log()?.add(&max)?.squeeze(D::Minus1)?)
}

fn top_two_margin(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let (sorted, _) = logits.contiguous()?.sort_last_dim(false)?;
    let top1 = sorted.narrow(1, 0, 1)?.squeeze(1)?;
    let top2 = sorted.narrow(1, 1, 1)?.squeeze(1)?;
    let target = target_scores(logits, targets)?;

    let margin1 = target.sub(&top1)?;
    let margin2 = target.sub(&top2)?;
    Ok(margin1.ne(0f32)?.where_cond(&margin1, &margin2)?)
}

fn exclude_target_margin(scores: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let (batch_size, num_classes) = scores.dims2()?;
    let device = scores.device();

    let labels = targets.to_vec1::<u32>()?;
    let mut mask = vec![0u8; batch_size * num_classes];
    for (row, &label) in labels.iter().enumerate() {
        mask[row * num_classes + label as usize] = 1;
    }
    let mask = Tensor::from_vec(mask, (batch_size, num_classes), device)?;
    let neg_inf = Tensor::full(f32::NEG_INFINITY, (batch_size, num_classes), device)?;

    let competing = mask.where_cond(&neg_inf, scores)?.max(D::Minus1)?;
    let target = target_scores(scores, targets)?;
    Ok(target.sub(&competing)?)
}
