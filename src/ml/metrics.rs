use serde::{Deserialize, Serialize};

/// Regression scores for one partition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionScores {
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
    /// Mean absolute percentage error; `None` when a true value is exactly zero.
    pub mape: Option<f64>,
}

impl RegressionScores {
    pub fn compute(truth: &[f64], pred: &[f64]) -> Self {
        let n = truth.len().min(pred.len());
        if n == 0 {
            return Self {
                rmse: 0.0,
                mae: 0.0,
                r2: 0.0,
                mape: None,
            };
        }
        let (truth, pred) = (&truth[..n], &pred[..n]);
        let count = n as f64;

        let sse: f64 = truth.iter().zip(pred).map(|(t, p)| (t - p).powi(2)).sum();
        let abs_err: f64 = truth.iter().zip(pred).map(|(t, p)| (t - p).abs()).sum();
        let mean = truth.iter().sum::<f64>() / count;
        let sst: f64 = truth.iter().map(|t| (t - mean).powi(2)).sum();

        // Same convention as scikit-learn for a constant target.
        let r2 = if sst == 0.0 {
            if sse == 0.0 { 1.0 } else { 0.0 }
        } else {
            1.0 - sse / sst
        };

        let mape = if truth.iter().any(|t| *t == 0.0) {
            None
        } else {
            let pct: f64 = truth.iter().zip(pred).map(|(t, p)| ((t - p) / t).abs()).sum();
            Some(pct / count * 100.0)
        };

        Self {
            rmse: (sse / count).sqrt(),
            mae: abs_err / count,
            r2,
            mape,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationMetrics {
    pub train_rmse: f64,
    pub train_mae: f64,
    pub train_r2: f64,
    pub train_mape: Option<f64>,
    pub val_rmse: f64,
    pub val_mae: f64,
    pub val_r2: f64,
    pub val_mape: Option<f64>,
}

impl EvaluationMetrics {
    pub fn from_scores(train: RegressionScores, val: RegressionScores) -> Self {
        Self {
            train_rmse: train.rmse,
            train_mae: train.mae,
            train_r2: train.r2,
            train_mape: train.mape,
            val_rmse: val.rmse,
            val_mae: val.mae,
            val_r2: val.r2,
            val_mape: val.mape,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn scores_known_values() {
        let truth = [100.0, 200.0, 300.0, 400.0];
        let pred = [110.0, 190.0, 330.0, 370.0];
        let scores = RegressionScores::compute(&truth, &pred);

        // errors: -10, 10, -30, 30
        assert_relative_eq!(scores.mae, 20.0);
        assert_relative_eq!(scores.rmse, 500.0_f64.sqrt());
        assert_relative_eq!(scores.r2, 1.0 - 2000.0 / 50_000.0);
        // 10% + 5% + 10% + 7.5%
        assert_relative_eq!(scores.mape.unwrap(), 8.125, epsilon = 1e-12);
    }

    #[test]
    fn mape_is_undefined_for_zero_truth() {
        let scores = RegressionScores::compute(&[0.0, 100.0], &[10.0, 90.0]);
        assert!(scores.mape.is_none());
    }

    #[test]
    fn constant_target_r2() {
        assert_eq!(RegressionScores::compute(&[5.0, 5.0], &[5.0, 5.0]).r2, 1.0);
        assert_eq!(RegressionScores::compute(&[5.0, 5.0], &[4.0, 6.0]).r2, 0.0);
    }

    #[test]
    fn metrics_serialize_with_camel_case_keys() {
        let scores = RegressionScores::compute(&[1.0, 2.0], &[1.0, 2.0]);
        let json = serde_json::to_value(EvaluationMetrics::from_scores(scores, scores)).unwrap();
        for key in [
            "trainRmse", "trainMae", "trainR2", "trainMape", "valRmse", "valMae", "valR2", "valMape",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
