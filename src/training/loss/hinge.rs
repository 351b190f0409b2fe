//! Hinge penalties over margins

use super::margin::{log_sum_exp, target_scores};
use crate::error::Result;
use candle_core::Tensor;

/// Soft hinge loss, one value per sample
///
/// Correctly classified samples (`margin >= 0`) pay `relu(1 - margin)`.
/// Misclassified samples pay the cross-entropy-like
/// `relu(1 - logits[target] + logsumexp(logits))`.
pub fn soft_hinge_loss(margin: &Tensor, logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let margin_term = margin.affine(-1.0, 1.0)?.relu()?;

    let target = target_scores(logits, targets)?;
    let entropy_term = log_sum_exp(logits)?.sub(&target)?.affine(1.0, 1.0)?.relu()?;

    Ok(margin.ge(0f32)?.where_cond(&margin_term, &entropy_term)?)
}

/// Hard hinge loss `max(0, 1 - margin)`
pub fn hard_hinge_loss(margin: &Tensor) -> Result<Tensor> {
    Ok(margin.affine(-1.0, 1.0)?.relu()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::Device;

    #[test]
    fn test_hard_hinge_clamps_at_zero() {
        let device = Device::Cpu;
        let margin = Tensor::new(&[-2f32, 0.0, 0.5, 1.0, 3.0], &device).unwrap();
        let loss = hard_hinge_loss(&margin).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(loss, vec![3.0, 1.0, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_soft_hinge_branches() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[5f32, 1., 1.], [5., 1., 1.]], &device).unwrap();
        let targets = Tensor::new(&[0u32, 1], &device).unwrap();
        let margin = Tensor::new(&[0.25f32, -4.0], &device).unwrap();

        let loss = soft_hinge_loss(&margin, &logits, &targets)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();

        assert_relative_eq!(loss[0], 0.75, epsilon = 1e-6);
        let lse = (5f32.exp() + 2.0 * 1f32.exp()).ln();
        assert_relative_eq!(loss[1], lse, epsilon = 1e-5);
    }
}
