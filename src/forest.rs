//! Random forest regressor: bootstrap-aggregated CART regression trees.
//!
//! Training is fully determined by `ForestParams::seed`, so fitting the same
//! data twice yields identical trees. The fitted model is plain data and
//! serializes with serde.

use linfa::prelude::{DatasetBase, Fit, PredictInplace};
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub seed: u64,
    pub min_samples_split: usize,
    pub max_depth: Option<usize>,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            seed: 42,
            min_samples_split: 2,
            max_depth: None,
        }
    }
}

impl ForestParams {
    pub fn n_trees(mut self, n_trees: usize) -> Self {
        self.n_trees = n_trees;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.n_trees == 0 {
            return Err(PipelineError::InvalidParams("n_trees must be at least 1".into()));
        }
        if self.min_samples_split < 2 {
            return Err(PipelineError::InvalidParams(
                "min_samples_split must be at least 2".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Single regression tree stored as a flat node arena; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    y: &'a Array1<f64>,
    params: &'a ForestParams,
    nodes: Vec<Node>,
}

impl<'a> TreeBuilder<'a> {
    fn grow(&mut self, samples: &[usize], depth: usize) -> usize {
        let node_id = self.nodes.len();
        let n = samples.len() as f64;
        let mean = samples.iter().map(|&i| self.y[i]).sum::<f64>() / n;
        self.nodes.push(Node::Leaf { value: mean });

        let depth_reached = self.params.max_depth.map_or(false, |max| depth >= max);
        if samples.len() < self.params.min_samples_split || depth_reached {
            return node_id;
        }

        let Some(split) = self.best_split(samples) else {
            return node_id;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&i| self.x[[i, split.feature]] <= split.threshold);
        let left_id = self.grow(&left, depth + 1);
        let right_id = self.grow(&right, depth + 1);
        self.nodes[node_id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: left_id,
            right: right_id,
        };
        node_id
    }

    /// Exhaustive search for the split with the lowest summed squared error.
    fn best_split(&self, samples: &[usize]) -> Option<SplitCandidate> {
        let total_sum: f64 = samples.iter().map(|&i| self.y[i]).sum();
        let total_sq: f64 = samples.iter().map(|&i| self.y[i] * self.y[i]).sum();
        let n = samples.len();
        let parent_impurity = total_sq - total_sum * total_sum / n as f64;
        if parent_impurity <= f64::EPSILON {
            return None;
        }

        let mut best: Option<SplitCandidate> = None;
        let mut order = samples.to_vec();
        for feature in 0..self.x.ncols() {
            order.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for k in 0..n - 1 {
                let yi = self.y[order[k]];
                left_sum += yi;
                left_sq += yi * yi;

                let here = self.x[[order[k], feature]];
                let next = self.x[[order[k + 1], feature]];
                if here >= next {
                    continue;
                }

                let n_left = (k + 1) as f64;
                let n_right = (n - k - 1) as f64;
                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let impurity = (left_sq - left_sum * left_sum / n_left)
                    + (right_sq - right_sum * right_sum / n_right);

                if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                    let mut threshold = here + (next - here) / 2.0;
                    if threshold >= next {
                        threshold = here;
                    }
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        impurity,
                    });
                }
            }
        }

        best.filter(|b| b.impurity < parent_impurity)
    }
}

impl RegressionTree {
    fn fit(x: &Array2<f64>, y: &Array1<f64>, samples: &[usize], params: &ForestParams) -> Self {
        let mut builder = TreeBuilder {
            x,
            y,
            params,
            nodes: Vec::new(),
        };
        builder.grow(samples, 0);
        RegressionTree {
            nodes: builder.nodes,
        }
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = 0;
        loop {
            match &self.nodes[node] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    params: ForestParams,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl RandomForestRegressor {
    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    /// Mean of the per-tree predictions.
    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
        total / self.trees.len() as f64
    }
}

impl Fit<Array2<f64>, Array1<f64>, PipelineError> for ForestParams {
    type Object = RandomForestRegressor;

    fn fit(&self, dataset: &DatasetBase<Array2<f64>, Array1<f64>>) -> Result<Self::Object, PipelineError> {
        self.validate()?;
        let x = dataset.records();
        let y = dataset.targets();
        let n = x.nrows();
        if n == 0 {
            return Err(PipelineError::InvalidParams("cannot fit a forest on zero rows".into()));
        }
        if y.len() != n {
            return Err(PipelineError::InvalidParams(format!(
                "{} feature rows but {} targets",
                n,
                y.len()
            )));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let trees = (0..self.n_trees)
            .map(|_| {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(x, y, &bootstrap, self)
            })
            .collect();

        Ok(RandomForestRegressor {
            params: *self,
            n_features: x.ncols(),
            trees,
        })
    }
}

impl PredictInplace<Array2<f64>, Array1<f64>> for RandomForestRegressor {
    fn predict_inplace(&self, x: &Array2<f64>, y: &mut Array1<f64>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );
        for (row, target) in x.rows().into_iter().zip(y.iter_mut()) {
            *target = self.predict_row(row);
        }
    }

    fn default_target(&self, x: &Array2<f64>) -> Array1<f64> {
        Array1::zeros(x.nrows())
    }
}
