//! Gradient-boosted regression tree ensemble and its JSON artifact format.
//!
//! ```json
//! {
//!   "base_score": 540088.1,
//!   "learning_rate": 0.1,
//!   "n_features": 2,
//!   "trees": [
//!     {"nodes": [
//!       {"kind": "split", "feature": 0, "threshold": 3.5, "left": 1, "right": 2},
//!       {"kind": "leaf", "value": -12000.0},
//!       {"kind": "leaf", "value": 18000.0}
//!     ]}
//!   ]
//! }
//! ```
//!
//! A row goes left when `row[feature] <= threshold`. Models exported from
//! XGBoost carry `"split_rule": "less"`: left when `row[feature] < threshold`,
//! compared in single precision as XGBoost does. Children are always stored
//! after their parent, so traversal terminates.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vectorizer::FeatureMatrix;

#[derive(Debug, Error)]
pub enum RegressorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed model: {0}")]
    Format(#[from] serde_json::Error),

    #[error("tree {tree}: {reason}")]
    InvalidTree { tree: usize, reason: String },

    #[error("expected {expected} features, got {actual}")]
    Shape { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitRule {
    #[default]
    LessEqual,
    Less,
}

impl SplitRule {
    fn goes_left(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::LessEqual => value <= threshold,
            Self::Less => (value as f32) < (threshold as f32),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Leaf value reached by `row`, or `None` if the walk leaves the tree or
    /// the row is too short.
    pub fn predict(&self, row: &[f64], rule: SplitRule) -> Option<f64> {
        let mut index = 0;
        for _ in 0..self.nodes.len() {
            match self.nodes.get(index)? {
                Node::Leaf { value } => return Some(*value),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if rule.goes_left(*row.get(*feature)?, *threshold) {
                        *left
                    } else {
                        *right
                    }
                }
            }
        }
        None
    }

    fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("no nodes".into());
        }
        for (index, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= n_features {
                        return Err(format!("node {index} splits on feature {feature}"));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("node {index} has a non-finite threshold"));
                    }
                    for child in [*left, *right] {
                        if child <= index || child >= self.nodes.len() {
                            return Err(format!("node {index} points at node {child}"));
                        }
                    }
                }
                Node::Leaf { value } if !value.is_finite() => {
                    return Err(format!("node {index} has a non-finite value"));
                }
                Node::Leaf { .. } => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedRegressor {
    pub base_score: f64,
    pub learning_rate: f64,
    pub n_features: usize,
    #[serde(default)]
    pub split_rule: SplitRule,
    pub trees: Vec<Tree>,
}

impl GradientBoostedRegressor {
    pub fn from_path(path: &Path) -> Result<Self, RegressorError> {
        Self::from_slice(&fs::read(path)?)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, RegressorError> {
        let model: Self = serde_json::from_slice(bytes)?;
        model.validate()?;
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<(), RegressorError> {
        fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), RegressorError> {
        for (index, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features)
                .map_err(|reason| RegressorError::InvalidTree {
                    tree: index,
                    reason,
                })?;
        }
        Ok(())
    }

    pub fn predict_row(&self, row: &[f64]) -> Result<f64, RegressorError> {
        if row.len() != self.n_features {
            return Err(RegressorError::Shape {
                expected: self.n_features,
                actual: row.len(),
            });
        }
        let mut boost = 0.0;
        for (index, tree) in self.trees.iter().enumerate() {
            boost += tree.predict(row, self.split_rule).ok_or_else(|| RegressorError::InvalidTree {
                tree: index,
                reason: "walk did not reach a leaf".into(),
            })?;
        }
        Ok(self.base_score + self.learning_rate * boost)
    }

    pub fn predict(&self, matrix: &FeatureMatrix) -> Result<Vec<f64>, RegressorError> {
        matrix.rows().map(|row| self.predict_row(row)).collect()
    }
}
