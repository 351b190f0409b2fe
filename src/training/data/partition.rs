//! Confidence-driven partitioning of a training set
//!
//! A co-divide step produces, for every sample of an evaluation pass, a
//! clean/noisy prediction and a clean probability. Optionally a teacher
//! index set of trusted samples is supplied as well. The policies below turn
//! those into the index sets served by the labeled and unlabeled datasets.

use super::{DataError, DatasetMode, SampleIndex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How the teacher set restricts the regular labeled/unlabeled split
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncateMode {
    /// Teacher set is ignored
    #[default]
    None,
    /// Labeled samples must be in the teacher set; everything outside it is unlabeled
    Initial,
}

/// Validated inputs of a partition
#[derive(Debug, Clone)]
pub struct PartitionInputs {
    /// Records the predictions refer to, in prediction order
    pub records: SampleIndex,
    /// Clean prediction per record
    pub pred: Vec<bool>,
    /// Clean probability per record
    pub probabilities: Vec<f32>,
    /// Trusted subset, if any
    pub teacher_idx: Option<Vec<usize>>,
}

impl PartitionInputs {
    /// Check lengths and teacher indices
    pub fn new(
        records: SampleIndex,
        pred: Vec<bool>,
        probabilities: Vec<f32>,
        teacher_idx: Option<Vec<usize>>,
    ) -> Result<Self, DataError> {
        let n = records.len();
        if pred.len() != n {
            return Err(DataError::InvalidPartition {
                reason: format!("{} predictions for {} samples", pred.len(), n),
            });
        }
        if probabilities.len() != n {
            return Err(DataError::InvalidPartition {
                reason: format!("{} probabilities for {} samples", probabilities.len(), n),
            });
        }
        if let Some(teacher) = &teacher_idx {
            if let Some(&bad) = teacher.iter().find(|&&i| i >= n) {
                return Err(DataError::InvalidPartition {
                    reason: format!("teacher index {} out of range for {} samples", bad, n),
                });
            }
        }

        Ok(Self {
            records,
            pred,
            probabilities,
            teacher_idx,
        })
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when there are no samples
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn predicted(&self, clean: bool) -> BTreeSet<usize> {
        self.pred
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p == clean)
            .map(|(i, _)| i)
            .collect()
    }

    fn teacher(&self, policy: &PartitionPolicy) -> Result<BTreeSet<usize>, DataError> {
        self.teacher_idx
            .as_ref()
            .map(|t| t.iter().copied().collect())
            .ok_or_else(|| DataError::InvalidPartition {
                reason: format!("{} requires a teacher index set", policy.mode().as_str()),
            })
    }

    fn all(&self) -> BTreeSet<usize> {
        (0..self.len()).collect()
    }
}

/// Partition rule of one dataset mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionPolicy {
    /// Predicted clean samples
    Labeled {
        /// Teacher restriction
        truncate: TruncateMode,
    },
    /// Predicted noisy samples
    Unlabeled {
        /// Teacher restriction
        truncate: TruncateMode,
    },
    /// Teacher samples, or predicted clean ∩ teacher under refinement
    LabeledSvd {
        /// Intersect the teacher set with the clean predictions
        refinement: bool,
    },
    /// Complement of [`PartitionPolicy::LabeledSvd`]
    UnlabeledSvd {
        /// Intersect the teacher set with the clean predictions
        refinement: bool,
    },
}

/// Selected indices with their confidences
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// Ascending indices into the input records
    pub indices: Vec<usize>,
    /// Confidence of each selected index
    pub confidences: Vec<f32>,
}

impl Partition {
    /// Number of selected samples
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// True when nothing was selected
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

impl PartitionPolicy {
    /// Dataset mode this policy serves
    pub fn mode(&self) -> DatasetMode {
        match self {
            Self::Labeled { .. } => DatasetMode::Labeled,
            Self::Unlabeled { .. } => DatasetMode::Unlabeled,
            Self::LabeledSvd { .. } => DatasetMode::LabeledSvd,
            Self::UnlabeledSvd { .. } => DatasetMode::UnlabeledSvd,
        }
    }

    /// Compute the partition
    pub fn apply(&self, inputs: &PartitionInputs) -> Result<Partition, DataError> {
        let mut forced_confidence = false;

        let selected: BTreeSet<usize> = match *self {
            Self::Labeled { truncate } => {
                let clean = inputs.predicted(true);
                match truncate {
                    TruncateMode::None => clean,
                    TruncateMode::Initial => clean.intersection(&inputs.teacher(self)?).copied().collect(),
                }
            }
            Self::Unlabeled { truncate } => {
                let noisy = inputs.predicted(false);
                match truncate {
                    TruncateMode::None => noisy,
                    TruncateMode::Initial => {
                        let outside: BTreeSet<usize> =
                            inputs.all().difference(&inputs.teacher(self)?).copied().collect();
                        outside.union(&noisy).copied().collect()
                    }
                }
            }
            Self::LabeledSvd { refinement } => {
                let teacher = inputs.teacher(self)?;
                if refinement {
                    inputs.predicted(true).intersection(&teacher).copied().collect()
                } else {
                    forced_confidence = true;
                    teacher
                }
            }
            Self::UnlabeledSvd { refinement } => {
                let teacher = inputs.teacher(self)?;
                let trusted: BTreeSet<usize> = if refinement {
                    inputs.predicted(true).intersection(&teacher).copied().collect()
                } else {
                    teacher
                };
                inputs.all().difference(&trusted).copied().collect()
            }
        };

        let indices: Vec<usize> = selected.into_iter().collect();
        let confidences = indices
            .iter()
            .map(|&i| if forced_confidence { 1.0 } else { inputs.probabilities[i] })
            .collect();

        Ok(Partition { indices, confidences })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::data::{ImageRef, SampleRecord};
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn records(n: usize) -> SampleIndex {
        (0..n)
            .map(|i| SampleRecord {
                image: ImageRef::Path(PathBuf::from(format!("{}.png", i))),
                label: i % 3,
            })
            .collect()
    }

    fn inputs(pred: &[bool], teacher: Option<Vec<usize>>) -> PartitionInputs {
        let probabilities = (0..pred.len()).map(|i| i as f32 / 10.0).collect();
        PartitionInputs::new(records(pred.len()), pred.to_vec(), probabilities, teacher).unwrap()
    }

    #[test]
    fn test_labeled_and_unlabeled() {
        let inputs = inputs(&[true, false, true, false, true, false], Some(vec![0, 1, 2, 3]));

        let labeled = PartitionPolicy::Labeled {
            truncate: TruncateMode::None,
        }
        .apply(&inputs)
        .unwrap();
        assert_eq!(labeled.indices, vec![0, 2, 4]);
        assert_eq!(labeled.confidences, vec![0.0, 0.2, 0.4]);

        let unlabeled = PartitionPolicy::Unlabeled {
            truncate: TruncateMode::None,
        }
        .apply(&inputs)
        .unwrap();
        assert_eq!(unlabeled.indices, vec![1, 3, 5]);
    }

    #[test]
    fn test_initial_truncation() {
        let inputs = inputs(&[true, false, true, false, true, false], Some(vec![0, 1, 2, 3]));

        let labeled = PartitionPolicy::Labeled {
            truncate: TruncateMode::Initial,
        }
        .apply(&inputs)
        .unwrap();
        assert_eq!(labeled.indices, vec![0, 2]);

        let unlabeled = PartitionPolicy::Unlabeled {
            truncate: TruncateMode::Initial,
        }
        .apply(&inputs)
        .unwrap();
        assert_eq!(unlabeled.indices, vec![1, 3, 4, 5]);
    }

    #[test]
    fn test_svd_policies() {
        let inputs = inputs(&[true, true, false, false, true], Some(vec![1, 2, 4]));

        let labeled = PartitionPolicy::LabeledSvd { refinement: false }.apply(&inputs).unwrap();
        assert_eq!(labeled.indices, vec![1, 2, 4]);
        assert!(labeled.confidences.iter().all(|&c| c == 1.0));

        let unlabeled = PartitionPolicy::UnlabeledSvd { refinement: false }.apply(&inputs).unwrap();
        assert_eq!(unlabeled.indices, vec![0, 3]);

        let refined = PartitionPolicy::LabeledSvd { refinement: true }.apply(&inputs).unwrap();
        assert_eq!(refined.indices, vec![1, 4]);
        assert_eq!(refined.confidences, vec![0.1, 0.4]);

        let refined_rest = PartitionPolicy::UnlabeledSvd { refinement: true }.apply(&inputs).unwrap();
        assert_eq!(refined_rest.indices, vec![0, 2, 3]);
    }

    #[test]
    fn test_svd_requires_teacher() {
        let inputs = inputs(&[true, false], None);
        let result = PartitionPolicy::LabeledSvd { refinement: true }.apply(&inputs);
        assert!(matches!(result, Err(DataError::InvalidPartition { .. })));
    }

    #[test]
    fn test_inputs_validation() {
        assert!(PartitionInputs::new(records(3), vec![true; 2], vec![0.5; 3], None).is_err());
        assert!(PartitionInputs::new(records(3), vec![true; 3], vec![0.5; 4], None).is_err());
        assert!(PartitionInputs::new(records(3), vec![true; 3], vec![0.5; 3], Some(vec![3])).is_err());
        assert!(PartitionInputs::new(records(0), vec![], vec![], None).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn prop_labeled_unlabeled_cover_all(pred in proptest::collection::vec(any::<bool>(), 0..64)) {
            let inputs = inputs(&pred, None);
            let labeled = PartitionPolicy::Labeled { truncate: TruncateMode::None }.apply(&inputs).unwrap();
            let unlabeled = PartitionPolicy::Unlabeled { truncate: TruncateMode::None }.apply(&inputs).unwrap();

            let mut all: Vec<usize> = labeled.indices.iter().chain(&unlabeled.indices).copied().collect();
            all.sort_unstable();
            prop_assert_eq!(all, (0..pred.len()).collect::<Vec<_>>());
        }

        #[test]
        fn prop_svd_partitions_are_disjoint_and_cover(
            pred in proptest::collection::vec(any::<bool>(), 1..64),
            refinement in any::<bool>(),
            picks in proptest::collection::vec(any::<prop::sample::Index>(), 0..16),
        ) {
            let teacher: Vec<usize> = picks.iter().map(|p| p.index(pred.len())).collect();
            let inputs = inputs(&pred, Some(teacher));
            let labeled = PartitionPolicy::LabeledSvd { refinement }.apply(&inputs).unwrap();
            let unlabeled = PartitionPolicy::UnlabeledSvd { refinement }.apply(&inputs).unwrap();

            prop_assert!(labeled.indices.iter().all(|i| !unlabeled.indices.contains(i)));
            prop_assert_eq!(labeled.len() + unlabeled.len(), pred.len());
        }
    }
}
