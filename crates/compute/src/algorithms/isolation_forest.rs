//! Isolation forest outlier model.
//!
//! Anomalies need fewer random partitions to be isolated than normal
//! points, so their average root-to-leaf path across an ensemble of random
//! partition trees is shorter. Scores follow the classic normalization
//! `s(x) = 2^(-E[h(x)] / c(n))`, which lies in `[0, 1]` with values near 1
//! marking strong anomalies and values at or below 0.5 marking normal
//! points.
//!
//! Training is fully determined by [`ForestParams::seed`]: the same seed
//! and the same samples produce the same trees and the same scores.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use vigil_core::{VigilError, VigilResult};

/// Default sub-sampling size per tree.
pub const DEFAULT_SUBSAMPLE_SIZE: usize = 256;

/// Default ensemble size.
pub const DEFAULT_TREE_COUNT: usize = 100;

const EULER_GAMMA: f64 = 0.5772;

/// Score boundary used when contamination is not calibrated.
const AUTO_BOUNDARY: f64 = 0.5;

/// Average path length of an unsuccessful BST search over `n` points.
///
/// `c(n) = 2 * (ln(n - 1) + γ) - 2 * (n - 1) / n` for `n > 1`, else 0.
pub fn average_path_length(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
}

/// How the binary decision boundary is derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Contamination {
    /// Fixed boundary at score 0.5.
    Auto,
    /// Expected anomalous fraction of the training data, in `(0, 0.5]`.
    /// At most `ceil(rate * n)` training points fall beyond the boundary,
    /// and points with identical scores always land on the same side.
    Rate(f64),
}

/// Training parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub tree_count: usize,
    pub subsample_size: usize,
    pub seed: u64,
    pub contamination: Contamination,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            tree_count: DEFAULT_TREE_COUNT,
            subsample_size: DEFAULT_SUBSAMPLE_SIZE,
            seed: 0,
            contamination: Contamination::Auto,
        }
    }
}

// ── Trees ─────────────────────────────────────────────────────────────

/// A node of an isolation tree.
#[derive(Debug, Clone, PartialEq)]
pub enum IsolationNode {
    /// Split: values `< threshold` go left, the rest go right.
    Internal {
        feature: usize,
        threshold: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
    /// Training points that terminated here. `point` is set when they
    /// were all identical.
    Leaf {
        size: usize,
        point: Option<Vec<f64>>,
    },
}

impl IsolationNode {
    fn path_length(&self, sample: &[f64], depth: usize) -> f64 {
        match self {
            IsolationNode::Internal {
                feature,
                threshold,
                left,
                right,
            } => {
                if sample[*feature] < *threshold {
                    left.path_length(sample, depth + 1)
                } else {
                    right.path_length(sample, depth + 1)
                }
            }
            IsolationNode::Leaf { size, point } => {
                let rest = average_path_length(*size);
                match point {
                    // One more split separates an unseen value from a pure leaf.
                    Some(p) if p.as_slice() != sample => depth as f64 + rest.min(1.0),
                    _ => depth as f64 + rest,
                }
            }
        }
    }

    /// Path length of a value routed like `sample` that matches no
    /// training point at its leaf.
    fn novel_path_length(&self, sample: &[f64], depth: usize) -> f64 {
        match self {
            IsolationNode::Internal {
                feature,
                threshold,
                left,
                right,
            } => {
                if sample[*feature] < *threshold {
                    left.novel_path_length(sample, depth + 1)
                } else {
                    right.novel_path_length(sample, depth + 1)
                }
            }
            IsolationNode::Leaf { size, point } => {
                let rest = average_path_length(*size);
                match point {
                    Some(_) => depth as f64 + rest.min(1.0),
                    None => depth as f64 + rest,
                }
            }
        }
    }

    fn depth(&self) -> usize {
        match self {
            IsolationNode::Internal { left, right, .. } => 1 + left.depth().max(right.depth()),
            IsolationNode::Leaf { .. } => 0,
        }
    }

    fn leaf_total(&self) -> usize {
        match self {
            IsolationNode::Internal { left, right, .. } => left.leaf_total() + right.leaf_total(),
            IsolationNode::Leaf { size, .. } => *size,
        }
    }
}

/// One random partition tree over a training subsample.
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationTree {
    root: IsolationNode,
}

impl IsolationTree {
    fn build(samples: &[&[f64]], max_depth: usize, rng: &mut StdRng) -> Self {
        Self {
            root: build_node(samples, 0, max_depth, rng),
        }
    }

    /// Depth of the leaf `sample` falls into plus the expected remaining
    /// depth of that leaf's unresolved points.
    pub fn path_length(&self, sample: &[f64]) -> f64 {
        self.root.path_length(sample, 0)
    }

    /// Longest root-to-leaf edge count.
    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    /// Sum of leaf sizes; equals the subsample size the tree was built on.
    pub fn point_count(&self) -> usize {
        self.root.leaf_total()
    }

    pub fn root(&self) -> &IsolationNode {
        &self.root
    }
}

fn build_node(samples: &[&[f64]], depth: usize, max_depth: usize, rng: &mut StdRng) -> IsolationNode {
    let size = samples.len();
    if size <= 1 {
        return IsolationNode::Leaf {
            size,
            point: samples.first().map(|s| s.to_vec()),
        };
    }
    if depth >= max_depth {
        return IsolationNode::Leaf { size, point: None };
    }

    // Only dimensions with spread can be split.
    let dim = samples[0].len();
    let ranges: Vec<(usize, f64, f64)> = (0..dim)
        .filter_map(|f| {
            let (min, max) = samples.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
                (lo.min(s[f]), hi.max(s[f]))
            });
            (max > min && (max - min).is_finite()).then_some((f, min, max))
        })
        .collect();
    if ranges.is_empty() {
        return IsolationNode::Leaf {
            size,
            point: Some(samples[0].to_vec()),
        };
    }

    let (feature, min, max) = ranges[rng.gen_range(0..ranges.len())];
    let threshold = rng.gen_range(min..max);

    let (left, right): (Vec<&[f64]>, Vec<&[f64]>) =
        samples.iter().copied().partition(|s| s[feature] < threshold);
    if left.is_empty() || right.is_empty() {
        return IsolationNode::Leaf { size, point: None };
    }

    IsolationNode::Internal {
        feature,
        threshold,
        left: Box::new(build_node(&left, depth + 1, max_depth, rng)),
        right: Box::new(build_node(&right, depth + 1, max_depth, rng)),
    }
}

// ── Forest ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct FittedForest {
    trees: Vec<IsolationTree>,
    /// Points each tree was built from.
    sample_size: usize,
    dim: usize,
    /// Anomaly score separating normal from anomalous points.
    boundary: f64,
}

/// Ensemble of isolation trees. Untrained until [`IsolationForest::fit`]
/// succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationForest {
    params: ForestParams,
    fitted: Option<FittedForest>,
}

impl IsolationForest {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            fitted: None,
        }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Train on `samples`, replacing any previous model.
    ///
    /// Fails with `InsufficientData` on an empty set and leaves the forest
    /// untrained; a failed fit never keeps the previous trees.
    pub fn fit<S: AsRef<[f64]>>(&mut self, samples: &[S]) -> VigilResult<()> {
        self.fitted = None;

        if samples.is_empty() {
            return Err(VigilError::InsufficientData(
                "isolation forest needs at least one training sample".into(),
            ));
        }
        let dim = samples[0].as_ref().len();
        if dim == 0 {
            return Err(VigilError::InsufficientData(
                "training samples have no features".into(),
            ));
        }
        if let Some(bad) = samples.iter().find(|s| s.as_ref().len() != dim) {
            return Err(VigilError::DimensionMismatch {
                expected: dim,
                actual: bad.as_ref().len(),
            });
        }
        if self.params.tree_count == 0 || self.params.subsample_size == 0 {
            return Err(VigilError::InvalidConfig(
                "tree_count and subsample_size must be positive".into(),
            ));
        }

        let sample_size = self.params.subsample_size.min(samples.len());
        let max_depth = (sample_size as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(self.params.seed);

        let trees: Vec<IsolationTree> = (0..self.params.tree_count)
            .map(|_| {
                let subsample: Vec<&[f64]> = index::sample(&mut rng, samples.len(), sample_size)
                    .into_iter()
                    .map(|i| samples[i].as_ref())
                    .collect();
                IsolationTree::build(&subsample, max_depth, &mut rng)
            })
            .collect();

        let mut fitted = FittedForest {
            trees,
            sample_size,
            dim,
            boundary: AUTO_BOUNDARY,
        };

        if let Contamination::Rate(rate) = self.params.contamination {
            fitted.boundary = fitted.calibrate(samples, rate);
        }

        debug!(
            trees = fitted.trees.len(),
            sample_size,
            max_depth,
            boundary = fitted.boundary,
            "isolation forest fitted"
        );
        self.fitted = Some(fitted);
        Ok(())
    }

    /// Normalized isolation score in `[0, 1]`; higher = more anomalous.
    pub fn score(&self, sample: &[f64]) -> VigilResult<f64> {
        let fitted = self.fitted()?;
        fitted.check_dim(sample)?;
        Ok(fitted.anomaly_score(sample))
    }

    /// Signed distance past the decision boundary: `score - boundary`.
    /// Positive or zero means the point sits at or beyond the boundary.
    pub fn decision(&self, sample: &[f64]) -> VigilResult<f64> {
        let fitted = self.fitted()?;
        fitted.check_dim(sample)?;
        Ok(fitted.anomaly_score(sample) - fitted.boundary)
    }

    /// Binary verdict at the contamination-calibrated boundary.
    pub fn is_anomalous(&self, sample: &[f64]) -> VigilResult<bool> {
        Ok(self.decision(sample)? >= 0.0)
    }

    pub fn boundary(&self) -> VigilResult<f64> {
        Ok(self.fitted()?.boundary)
    }

    pub fn trees(&self) -> &[IsolationTree] {
        self.fitted.as_ref().map(|f| f.trees.as_slice()).unwrap_or(&[])
    }

    /// Points per tree, `min(subsample_size, training set size)`.
    pub fn sample_size(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.sample_size)
    }

    fn fitted(&self) -> VigilResult<&FittedForest> {
        self.fitted
            .as_ref()
            .ok_or_else(|| VigilError::NotFitted("isolation forest has not been trained".into()))
    }
}

impl FittedForest {
    fn check_dim(&self, sample: &[f64]) -> VigilResult<()> {
        if sample.len() != self.dim {
            return Err(VigilError::DimensionMismatch {
                expected: self.dim,
                actual: sample.len(),
            });
        }
        Ok(())
    }

    /// Boundary for an expected anomalous fraction `rate`.
    ///
    /// With `k = ceil(rate * n)`, the flagged training points are those
    /// scoring strictly above the k-th highest score, and the boundary sits
    /// midway between them and the rest. When no training point qualifies,
    /// the boundary sits midway between the top score and the score of an
    /// unseen value isolated next to the top-scoring point.
    fn calibrate<S: AsRef<[f64]>>(&self, samples: &[S], rate: f64) -> f64 {
        let mut scored: Vec<(f64, &[f64])> = samples
            .iter()
            .map(|s| (self.anomaly_score(s.as_ref()), s.as_ref()))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let n = scored.len();
        let k = ((rate.clamp(0.0, 0.5) * n as f64).ceil() as usize).clamp(1, n);
        let kth = scored[k - 1].0;

        match scored.iter().rposition(|(s, _)| *s > kth) {
            Some(last_flagged) => (scored[last_flagged].0 + kth) / 2.0,
            None => {
                let (top, point) = scored[0];
                (top + self.novel_score(point)).max(2.0 * top) / 2.0
            }
        }
    }

    /// Score of a value that follows `point`'s partitions but differs
    /// from it.
    fn novel_score(&self, point: &[f64]) -> f64 {
        let c = average_path_length(self.sample_size);
        if c <= 0.0 {
            return AUTO_BOUNDARY;
        }
        let avg_path = self
            .trees
            .iter()
            .map(|t| t.root.novel_path_length(point, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        2_f64.powf(-avg_path / c).clamp(0.0, 1.0)
    }

    fn anomaly_score(&self, sample: &[f64]) -> f64 {
        let c = average_path_length(self.sample_size);
        if c <= 0.0 {
            // A single training point carries no isolation information.
            return AUTO_BOUNDARY;
        }
        let avg_path = self
            .trees
            .iter()
            .map(|t| t.path_length(sample))
            .sum::<f64>()
            / self.trees.len() as f64;
        2_f64.powf(-avg_path / c).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outliers() -> Vec<Vec<f64>> {
        let mut data: Vec<Vec<f64>> = (0..200)
            .map(|i| vec![(i % 10) as f64, ((i % 7) + 1) as f64])
            .collect();
        data.push(vec![100.0, 100.0]);
        data.push(vec![-50.0, -50.0]);
        data
    }

    fn params(seed: u64) -> ForestParams {
        ForestParams {
            tree_count: 50,
            subsample_size: 128,
            seed,
            contamination: Contamination::Auto,
        }
    }

    #[test]
    fn average_path_length_edge_cases() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        let c2 = average_path_length(2);
        assert!((c2 - (2.0 * EULER_GAMMA - 1.0)).abs() < 1e-12);
        // Grows roughly logarithmically.
        assert!(average_path_length(256) > average_path_length(16));
        assert!((average_path_length(256) - 10.2448).abs() < 1e-3);
    }

    #[test]
    fn outliers_score_higher_than_inliers() {
        let data = cluster_with_outliers();
        let mut forest = IsolationForest::new(params(42));
        forest.fit(&data).unwrap();

        let inlier = forest.score(&[4.0, 4.0]).unwrap();
        let far = forest.score(&[100.0, 100.0]).unwrap();
        let negative = forest.score(&[-50.0, -50.0]).unwrap();
        assert!(far > inlier, "far={far} inlier={inlier}");
        assert!(negative > inlier);
        assert!(far > 0.5);
    }

    #[test]
    fn same_seed_is_reproducible() {
        let data = cluster_with_outliers();
        let mut a = IsolationForest::new(params(7));
        let mut b = IsolationForest::new(params(7));
        a.fit(&data).unwrap();
        b.fit(&data).unwrap();

        assert_eq!(a, b);
        for point in [[3.0, 2.0], [100.0, 100.0], [-1.0, 9.0]] {
            assert_eq!(a.score(&point).unwrap(), b.score(&point).unwrap());
        }
    }

    #[test]
    fn different_seeds_build_different_trees() {
        let data = cluster_with_outliers();
        let mut a = IsolationForest::new(params(1));
        let mut b = IsolationForest::new(params(2));
        a.fit(&data).unwrap();
        b.fit(&data).unwrap();
        assert_ne!(a.trees(), b.trees());
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let data = cluster_with_outliers();
        let mut forest = IsolationForest::new(params(3));
        forest.fit(&data).unwrap();
        for point in [[0.0, 0.0], [1e9, -1e9], [5.0, 5.0], [-1e-9, 1e12]] {
            let s = forest.score(&point).unwrap();
            assert!((0.0..=1.0).contains(&s), "score {s} out of range");
        }
    }

    #[test]
    fn tree_shape_respects_limits() {
        let data = cluster_with_outliers();
        let mut forest = IsolationForest::new(params(11));
        forest.fit(&data).unwrap();

        assert_eq!(forest.trees().len(), 50);
        assert_eq!(forest.sample_size(), Some(128));
        for tree in forest.trees() {
            assert!(tree.depth() <= 7); // ceil(log2(128))
            assert_eq!(tree.point_count(), 128);
        }
    }

    #[test]
    fn subsample_capped_at_dataset_size() {
        let data: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let mut forest = IsolationForest::new(ForestParams::default());
        forest.fit(&data).unwrap();
        assert_eq!(forest.sample_size(), Some(20));
        assert!(forest.trees().iter().all(|t| t.point_count() == 20));
    }

    #[test]
    fn single_point_does_not_divide_by_zero() {
        let mut forest = IsolationForest::new(params(5));
        forest.fit(&[vec![4.0]]).unwrap();
        let s = forest.score(&[1000.0]).unwrap();
        assert!(s.is_finite());
        assert_eq!(s, 0.5);
    }

    #[test]
    fn identical_points_make_single_leaf_trees() {
        let data = vec![vec![1.0]; 30];
        let mut forest = IsolationForest::new(params(5));
        forest.fit(&data).unwrap();
        for tree in forest.trees() {
            assert_eq!(
                tree.root(),
                &IsolationNode::Leaf {
                    size: 30,
                    point: Some(vec![1.0]),
                }
            );
        }
    }

    #[test]
    fn empty_training_set_is_rejected() {
        let mut forest = IsolationForest::new(params(1));
        let empty: Vec<Vec<f64>> = Vec::new();
        assert!(matches!(forest.fit(&empty), Err(VigilError::InsufficientData(_))));
        assert!(!forest.is_fitted());
    }

    #[test]
    fn failed_refit_discards_previous_model() {
        let mut forest = IsolationForest::new(params(1));
        forest.fit(&[vec![1.0], vec![2.0]]).unwrap();
        let empty: Vec<Vec<f64>> = Vec::new();
        assert!(forest.fit(&empty).is_err());
        assert!(matches!(forest.score(&[1.0]), Err(VigilError::NotFitted(_))));
    }

    #[test]
    fn scoring_untrained_model_fails() {
        let forest = IsolationForest::new(params(1));
        assert!(matches!(forest.score(&[1.0]), Err(VigilError::NotFitted(_))));
        assert!(matches!(forest.decision(&[1.0]), Err(VigilError::NotFitted(_))));
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let mut forest = IsolationForest::new(params(1));
        assert!(matches!(
            forest.fit(&[vec![1.0, 2.0], vec![1.0]]),
            Err(VigilError::DimensionMismatch { expected: 2, actual: 1 })
        ));

        forest.fit(&[vec![1.0], vec![2.0], vec![3.0]]).unwrap();
        assert!(matches!(
            forest.score(&[1.0, 2.0]),
            Err(VigilError::DimensionMismatch { expected: 1, actual: 2 })
        ));
    }

    #[test]
    fn contamination_rate_sets_boundary_from_training_scores() {
        let data = cluster_with_outliers();
        let mut forest = IsolationForest::new(ForestParams {
            contamination: Contamination::Rate(0.01),
            ..params(9)
        });
        forest.fit(&data).unwrap();

        let boundary = forest.boundary().unwrap();
        assert!(boundary > 0.0 && boundary < 1.0);
        assert!(forest.is_anomalous(&[100.0, 100.0]).unwrap());
        assert!(!forest.is_anomalous(&[4.0, 4.0]).unwrap());

        let flagged = data.iter().filter(|s| forest.is_anomalous(s).unwrap()).count();
        assert!(flagged >= 2 && flagged <= 10, "flagged {flagged}");
    }

    #[test]
    fn auto_contamination_uses_half() {
        let mut forest = IsolationForest::new(params(4));
        forest.fit(&cluster_with_outliers()).unwrap();
        assert_eq!(forest.boundary().unwrap(), 0.5);
    }

    #[test]
    fn unseen_value_beside_pure_leaf_scores_higher() {
        let data: Vec<Vec<f64>> = (0..100).map(|i| vec![if i < 95 { 0.0 } else { 4.0 }]).collect();
        let mut forest = IsolationForest::new(params(8));
        forest.fit(&data).unwrap();

        let seen = forest.score(&[4.0]).unwrap();
        let unseen = forest.score(&[2209.0]).unwrap();
        assert!(unseen > seen, "unseen={unseen} seen={seen}");
    }

    #[test]
    fn boundary_never_splits_tied_scores() {
        // 2% of the points share the top value; a rate of 1% lands inside
        // that group.
        let data: Vec<Vec<f64>> = (0..300)
            .map(|i| {
                let v = match i % 100 {
                    0..=69 => 0.0,
                    70..=97 => 1.0,
                    _ => 4.0,
                };
                vec![v]
            })
            .collect();
        let mut forest = IsolationForest::new(ForestParams {
            contamination: Contamination::Rate(0.01),
            ..params(21)
        });
        forest.fit(&data).unwrap();

        let top = forest.decision(&[4.0]).unwrap();
        let next = forest.decision(&[1.0]).unwrap();
        assert!(top < 0.0 || next < 0.0, "top={top} next={next}");
        for v in [0.0, 1.0, 4.0] {
            let d = forest.decision(&[v]).unwrap();
            assert!(d != 0.0, "value {v} sits on the boundary");
        }
        assert!(forest.is_anomalous(&[2209.0]).unwrap());
    }

    #[test]
    fn tied_top_group_puts_boundary_above_it() {
        let data: Vec<Vec<f64>> = (0..200).map(|i| vec![(i % 2) as f64]).collect();
        let mut forest = IsolationForest::new(ForestParams {
            contamination: Contamination::Rate(0.1),
            ..params(2)
        });
        forest.fit(&data).unwrap();

        assert!(!forest.is_anomalous(&[0.0]).unwrap());
        assert!(!forest.is_anomalous(&[1.0]).unwrap());
        assert!(forest.is_anomalous(&[50.0]).unwrap());
    }
}
