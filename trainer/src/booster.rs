//! Gradient boosting with XGBoost, converted into the JSON tree ensemble the
//! pricing API serves.
//!
//! The booster's text dump is parsed back into trees. XGBoost node ids are
//! not contiguous after pruning, so every tree is renumbered in pre-order,
//! which keeps children after their parent.

use std::collections::HashMap;

use anyhow::{ensure, Context, Result};
use pricing_api::regressor::{GradientBoostedRegressor, Node, SplitRule, Tree};
use tracing::debug;
use xgboost::{parameters, Booster, DMatrix};

#[derive(Debug, Clone)]
pub struct BoostingParams {
    pub n_estimators: u32,
    pub max_depth: u32,
    pub learning_rate: f32,
    pub subsample: f32,
    pub min_child_weight: f32,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: 3,
            learning_rate: 0.1,
            subsample: 1.0,
            min_child_weight: 1.0,
            seed: 42,
        }
    }
}

pub struct Fitted {
    pub model: GradientBoostedRegressor,
    /// Total split gain per feature, normalized to sum to 1.
    pub importances: Vec<f64>,
}

pub fn fit(x: &[Vec<f64>], y: &[f64], params: &BoostingParams) -> Result<Fitted> {
    let (booster, base_score) = train(x, y, params)?;
    let n_features = x[0].len();

    let dump = booster
        .dump_model(true, None)
        .context("failed to dump boosted trees")?;
    let (trees, gains) = parse_dump(&dump, n_features)?;
    debug!(trees = trees.len(), "converted boosted trees");

    let total: f64 = gains.iter().sum();
    let importances = if total > 0.0 {
        gains.iter().map(|g| g / total).collect()
    } else {
        gains
    };

    let model = GradientBoostedRegressor {
        base_score: f64::from(base_score),
        // leaf values in the dump are already scaled by eta
        learning_rate: 1.0,
        n_features,
        split_rule: SplitRule::Less,
        trees,
    };
    model.validate()?;
    Ok(Fitted { model, importances })
}

/// Trains a squared-error booster starting from the label mean.
fn train(x: &[Vec<f64>], y: &[f64], params: &BoostingParams) -> Result<(Booster, f32)> {
    ensure!(!y.is_empty(), "cannot fit on an empty training set");
    ensure!(x.len() == y.len(), "{} rows but {} targets", x.len(), y.len());
    ensure!(
        params.subsample > 0.0 && params.subsample <= 1.0,
        "subsample must be in (0, 1]"
    );
    let n_features = x[0].len();
    ensure!(n_features > 0, "rows have no features");
    ensure!(
        x.iter().all(|row| row.len() == n_features),
        "rows have differing widths"
    );

    let dense: Vec<f32> = x.iter().flatten().map(|&v| v as f32).collect();
    let labels: Vec<f32> = y.iter().map(|&v| v as f32).collect();
    let base_score = (y.iter().sum::<f64>() / y.len() as f64) as f32;

    let mut dtrain = DMatrix::from_dense(&dense, x.len()).context("failed to build training matrix")?;
    dtrain.set_labels(&labels).context("failed to set training labels")?;

    let learning_params = parameters::learning::LearningTaskParametersBuilder::default()
        .objective(parameters::learning::Objective::RegLinear)
        .base_score(base_score)
        .seed(params.seed)
        .build()
        .map_err(anyhow::Error::msg)?;
    let tree_params = parameters::tree::TreeBoosterParametersBuilder::default()
        .max_depth(params.max_depth)
        .eta(params.learning_rate)
        .subsample(params.subsample)
        .min_child_weight(params.min_child_weight)
        .build()
        .map_err(anyhow::Error::msg)?;
    let booster_params = parameters::BoosterParametersBuilder::default()
        .booster_type(parameters::BoosterType::Tree(tree_params))
        .learning_params(learning_params)
        .verbose(false)
        .build()
        .map_err(anyhow::Error::msg)?;
    let training_params = parameters::TrainingParametersBuilder::default()
        .dtrain(&dtrain)
        .boost_rounds(params.n_estimators)
        .booster_params(booster_params)
        .build()
        .map_err(anyhow::Error::msg)?;

    let booster = Booster::train(&training_params).context("xgboost training failed")?;
    Ok((booster, base_score))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DumpNode {
    Split {
        feature: usize,
        threshold: f64,
        yes: usize,
        no: usize,
        gain: f64,
    },
    Leaf {
        value: f64,
    },
}

/// Parses `Booster::dump_model` text into trees plus total gain per feature.
fn parse_dump(dump: &str, n_features: usize) -> Result<(Vec<Tree>, Vec<f64>)> {
    let mut gains = vec![0.0; n_features];
    let mut trees = Vec::new();
    let mut nodes: HashMap<usize, DumpNode> = HashMap::new();

    for line in dump.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if line.starts_with("booster[") {
            continue;
        }
        let (id, node) =
            parse_line(line).with_context(|| format!("unexpected dump line `{line}`"))?;
        if id == 0 && !nodes.is_empty() {
            trees.push(renumber(&std::mem::take(&mut nodes))?);
        }
        if let DumpNode::Split { feature, gain, .. } = node {
            ensure!(feature < n_features, "split on feature f{feature} of {n_features}");
            gains[feature] += gain;
        }
        ensure!(nodes.insert(id, node).is_none(), "node {id} appears twice");
    }
    if !nodes.is_empty() {
        trees.push(renumber(&nodes)?);
    }
    Ok((trees, gains))
}

/// `0:[f2<1500.5] yes=1,no=2,missing=1,gain=..,cover=..` or `3:leaf=-0.25,cover=..`
fn parse_line(line: &str) -> Option<(usize, DumpNode)> {
    let (id, rest) = line.split_once(':')?;
    let id = id.parse().ok()?;

    if let Some(leaf) = rest.strip_prefix("leaf=") {
        let value = leaf.split(',').next()?.parse().ok()?;
        return Some((id, DumpNode::Leaf { value }));
    }

    let (condition, attrs) = rest.strip_prefix("[f")?.split_once(']')?;
    let (feature, threshold) = condition.split_once('<')?;
    let (mut yes, mut no, mut gain) = (None, None, 0.0);
    for attr in attrs.trim().split(',') {
        match attr.split_once('=') {
            Some(("yes", v)) => yes = v.parse().ok(),
            Some(("no", v)) => no = v.parse().ok(),
            Some(("gain", v)) => gain = v.parse().ok()?,
            _ => {}
        }
    }
    Some((
        id,
        DumpNode::Split {
            feature: feature.parse().ok()?,
            threshold: threshold.parse().ok()?,
            yes: yes?,
            no: no?,
            gain,
        },
    ))
}

fn renumber(nodes: &HashMap<usize, DumpNode>) -> Result<Tree> {
    let mut out = Vec::with_capacity(nodes.len());
    emit(0, nodes, &mut out)?;
    ensure!(
        out.len() == nodes.len(),
        "{} of {} dumped nodes are unreachable",
        nodes.len().saturating_sub(out.len()),
        nodes.len()
    );
    Ok(Tree::new(out))
}

/// Appends the subtree rooted at dump node `id` in pre-order and returns its
/// new index.
fn emit(id: usize, nodes: &HashMap<usize, DumpNode>, out: &mut Vec<Node>) -> Result<usize> {
    ensure!(out.len() < nodes.len(), "dumped tree revisits node {id}");
    let node = nodes
        .get(&id)
        .with_context(|| format!("dumped tree references missing node {id}"))?;
    let index = out.len();
    match *node {
        DumpNode::Leaf { value } => out.push(Node::Leaf { value }),
        DumpNode::Split {
            feature,
            threshold,
            yes,
            no,
            ..
        } => {
            out.push(Node::Leaf { value: 0.0 });
            let left = emit(yes, nodes, out)?;
            let right = emit(no, nodes, out)?;
            out[index] = Node::Split {
                feature,
                threshold,
                left,
                right,
            };
        }
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "booster[0]:
0:[f0<3.5] yes=1,no=2,missing=1,gain=400,cover=10
\t1:leaf=-10,cover=5
\t2:[f1<50] yes=3,no=4,missing=3,gain=100,cover=5
\t\t3:leaf=4,cover=2
\t\t4:leaf=8,cover=3
booster[1]:
0:leaf=0.5,cover=10
";

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..40u32).map(|i| vec![f64::from(i % 10), f64::from(i)]).collect();
        let y = x.iter().map(|row| if row[0] > 5.0 { 300.0 } else { 100.0 }).collect();
        (x, y)
    }

    #[test]
    fn parses_split_and_leaf_lines() {
        assert_eq!(
            parse_line("0:[f2<1500.5] yes=1,no=2,missing=1,gain=12.5,cover=40"),
            Some((
                0,
                DumpNode::Split {
                    feature: 2,
                    threshold: 1500.5,
                    yes: 1,
                    no: 2,
                    gain: 12.5,
                }
            ))
        );
        assert_eq!(
            parse_line("7:leaf=-2.5e-01,cover=3"),
            Some((7, DumpNode::Leaf { value: -0.25 }))
        );
        assert_eq!(parse_line("booster"), None);
    }

    #[test]
    fn dump_converts_to_trees_and_gains() {
        let (trees, gains) = parse_dump(DUMP, 2).unwrap();
        assert_eq!(trees.len(), 2);
        assert_eq!(gains, [400.0, 100.0]);

        let model = GradientBoostedRegressor {
            base_score: 100.0,
            learning_rate: 1.0,
            n_features: 2,
            split_rule: SplitRule::Less,
            trees,
        };
        model.validate().unwrap();
        assert_eq!(model.predict_row(&[3.0, 0.0]).unwrap(), 90.5);
        // 3.5 is not below the threshold, so it goes right
        assert_eq!(model.predict_row(&[3.5, 10.0]).unwrap(), 104.5);
        assert_eq!(model.predict_row(&[9.0, 50.0]).unwrap(), 108.5);
    }

    #[test]
    fn gapped_node_ids_are_renumbered() {
        let dump = "0:[f0<1] yes=5,no=6,missing=5,gain=1,cover=2\n5:leaf=1,cover=1\n6:leaf=2,cover=1\n";
        let (trees, _) = parse_dump(dump, 1).unwrap();
        assert_eq!(
            trees[0].nodes,
            [
                Node::Split {
                    feature: 0,
                    threshold: 1.0,
                    left: 1,
                    right: 2,
                },
                Node::Leaf { value: 1.0 },
                Node::Leaf { value: 2.0 },
            ]
        );
    }

    #[test]
    fn dangling_child_is_rejected() {
        let dump = "0:[f0<1] yes=1,no=2,missing=1,gain=1,cover=2\n1:leaf=1,cover=1\n";
        assert!(parse_dump(dump, 1).is_err());
    }

    #[test]
    fn out_of_range_feature_is_rejected() {
        let dump = "0:[f3<1] yes=1,no=2,missing=1,gain=1,cover=2\n1:leaf=1\n2:leaf=2\n";
        assert!(parse_dump(dump, 2).is_err());
    }

    #[test]
    fn converted_model_matches_booster() {
        let (x, y) = step_data();
        let params = BoostingParams {
            n_estimators: 30,
            max_depth: 2,
            learning_rate: 0.3,
            ..BoostingParams::default()
        };
        let (booster, _) = train(&x, &y, &params).unwrap();
        let dense: Vec<f32> = x.iter().flatten().map(|&v| v as f32).collect();
        let expected = booster
            .predict(&DMatrix::from_dense(&dense, x.len()).unwrap())
            .unwrap();

        let fitted = fit(&x, &y, &params).unwrap();
        for (row, want) in x.iter().zip(expected) {
            let got = fitted.model.predict_row(row).unwrap();
            assert!((got - f64::from(want)).abs() < 1e-2, "{got} vs {want}");
        }
    }

    #[test]
    fn learns_a_step_function() {
        let (x, y) = step_data();
        let params = BoostingParams {
            n_estimators: 50,
            max_depth: 2,
            learning_rate: 0.3,
            ..BoostingParams::default()
        };
        let fitted = fit(&x, &y, &params).unwrap();

        let low = fitted.model.predict_row(&[2.0, 0.0]).unwrap();
        let high = fitted.model.predict_row(&[8.0, 0.0]).unwrap();
        assert!((low - 100.0).abs() < 5.0, "low = {low}");
        assert!((high - 300.0).abs() < 5.0, "high = {high}");
        assert!(fitted.importances[0] > 0.9);
    }

    #[test]
    fn rejects_empty_input() {
        assert!(fit(&[], &[], &BoostingParams::default()).is_err());
    }
}
