#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
}

/// Scores predictions against labels. `r2` follows the usual convention of
/// 1.0 for a perfect fit of a constant target and 0.0 otherwise.
pub fn evaluate(labels: &[f64], predictions: &[f64]) -> Option<RegressionMetrics> {
    if labels.is_empty() || labels.len() != predictions.len() {
        return None;
    }
    let n = labels.len() as f64;
    let mean = labels.iter().sum::<f64>() / n;

    let (mut squared, mut absolute, mut total) = (0.0, 0.0, 0.0);
    for (label, prediction) in labels.iter().zip(predictions) {
        let error = label - prediction;
        squared += error * error;
        absolute += error.abs();
        total += (label - mean).powi(2);
    }

    let r2 = if total > 0.0 {
        1.0 - squared / total
    } else if squared == 0.0 {
        1.0
    } else {
        0.0
    };

    Some(RegressionMetrics {
        rmse: (squared / n).sqrt(),
        mae: absolute / n,
        r2,
    })
}
