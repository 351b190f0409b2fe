//! Budget-constrained sample selection

/// Select the easy subset of a batch
///
/// Losses are visited in ascending order while a running sum `L` is kept.
/// The sample at rank `i` (0-based) is selected whenever `L <= threshold + 1 - i`,
/// so the budget shrinks by one per rank. The scan covers the whole batch.
///
/// Returns the original positions of the selected samples, in selection
/// order. The result is empty when even the smallest loss exceeds
/// `threshold + 1`.
pub fn curriculum_select(losses: &[f32], threshold: f64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..losses.len()).collect();
    order.sort_by(|&a, &b| losses[a].total_cmp(&losses[b]));

    let mut running = 0.0f64;
    let mut selected = Vec::with_capacity(losses.len());
    for (rank, &index) in order.iter().enumerate() {
        running += losses[index] as f64;
        if running <= threshold + 1.0 - rank as f64 {
            selected.push(index);
        }
    }

    selected
}

/// Turn selected positions into a 0/1 mask of length `batch_size`
pub fn selection_mask(selected: &[usize], batch_size: usize) -> Vec<bool> {
    let mut mask = vec![false; batch_size];
    for &index in selected {
        if let Some(slot) = mask.get_mut(index) {
            *slot = true;
        }
    }
    mask
}
