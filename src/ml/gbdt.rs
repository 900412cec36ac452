//! Gradient-boosted regression trees on top of the `gbdt` crate.
//!
//! Each boosting stage is a single-iteration `gbdt` model fitted to the current
//! residuals, over a seeded bag of rows and a seeded subset of columns. Running the
//! stages ourselves keeps early stopping on the validation partition and lets the
//! ensemble be truncated to its best iteration.

use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec, ValueType};
use gbdt::gradient_boost::GBDT;
use rand::rngs::StdRng;
use rand::seq::{SliceRandom, index};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub max_depth: u32,
    pub learning_rate: f64,
    pub feature_fraction: f64,
    pub bagging_fraction: f64,
    /// Rows are resampled every `bagging_freq` rounds; 0 disables bagging.
    pub bagging_freq: usize,
    pub n_estimators: usize,
    pub early_stopping_rounds: usize,
    pub min_data_in_leaf: usize,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            max_depth: 5,
            learning_rate: 0.05,
            feature_fraction: 0.8,
            bagging_fraction: 0.8,
            bagging_freq: 5,
            n_estimators: 1000,
            early_stopping_rounds: 50,
            min_data_in_leaf: 20,
            seed: 42,
        }
    }
}

/// Outcome of a fit, for logging and metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitReport {
    pub rounds_run: usize,
    pub best_iteration: usize,
    pub best_validation_rmse: Option<f64>,
}

/// One boosting round: a residual model over a subset of the columns.
#[derive(Serialize, Deserialize)]
struct Stage {
    features: Vec<usize>,
    booster: GBDT,
}

impl Stage {
    fn fit(params: &BoostingParams, features: Vec<usize>, rows: &[&[f64]], residuals: &[f64]) -> Self {
        let mut cfg = Config::new();
        cfg.set_feature_size(features.len());
        cfg.set_max_depth(params.max_depth.max(1));
        cfg.set_iterations(1);
        cfg.set_shrinkage(params.learning_rate as ValueType);
        cfg.set_loss("SquaredError");
        cfg.set_min_leaf_size(params.min_data_in_leaf.max(1));
        // Row and column sampling happen before the stage sees the data.
        cfg.set_data_sample_ratio(1.0);
        cfg.set_feature_sample_ratio(1.0);
        cfg.set_debug(false);
        cfg.set_training_optimization_level(2);

        let mut data: DataVec = rows
            .iter()
            .zip(residuals)
            .map(|(row, &residual)| Data::new_training_data(project(row, &features), 1.0, residual as ValueType, None))
            .collect();
        let mut booster = GBDT::new(&cfg);
        booster.fit(&mut data);
        Self { features, booster }
    }

    fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        let data: DataVec = rows
            .iter()
            .map(|row| Data::new_test_data(project(row, &self.features), None))
            .collect();
        self.booster.predict(&data).into_iter().map(f64::from).collect()
    }
}

fn project(row: &[f64], features: &[usize]) -> Vec<ValueType> {
    features.iter().map(|&f| row[f] as ValueType).collect()
}

#[derive(Serialize, Deserialize)]
pub struct GradientBoostedModel {
    base_score: f64,
    stages: Vec<Stage>,
    /// Permutation importance per feature, measured once at fit time.
    importance: Vec<f64>,
}

impl fmt::Debug for GradientBoostedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GradientBoostedModel")
            .field("base_score", &self.base_score)
            .field("stages", &self.stages.len())
            .field("importance", &self.importance)
            .finish()
    }
}

impl GradientBoostedModel {
    /// Fits on the training partition, using the validation partition for
    /// early stopping. The returned model is truncated to the best iteration.
    pub fn fit(
        params: &BoostingParams,
        train_x: &[Vec<f64>],
        train_y: &[f64],
        val_x: &[Vec<f64>],
        val_y: &[f64],
    ) -> (Self, FitReport) {
        let n_rows = train_y.len();
        let n_features = train_x.first().map_or(0, Vec::len);
        let base_score = if n_rows == 0 {
            0.0
        } else {
            train_y.iter().sum::<f64>() / n_rows as f64
        };

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut train_pred = vec![base_score; n_rows];
        let mut val_pred = vec![base_score; val_y.len()];
        let mut stages: Vec<Stage> = Vec::new();
        let mut bag: Vec<usize> = (0..n_rows).collect();

        let mut best_rmse = f64::INFINITY;
        let mut best_iteration = 0;
        let mut rounds_run = 0;

        for round in 0..params.n_estimators {
            if n_rows == 0 || n_features == 0 {
                break;
            }

            let bagging = params.bagging_freq > 0 && params.bagging_fraction < 1.0;
            if bagging && round % params.bagging_freq == 0 {
                bag = sample_sorted(&mut rng, n_rows, params.bagging_fraction);
            }
            let features = sample_sorted(&mut rng, n_features, params.feature_fraction);

            let rows: Vec<&[f64]> = bag.iter().map(|&r| train_x[r].as_slice()).collect();
            let residuals: Vec<f64> = bag.iter().map(|&r| train_y[r] - train_pred[r]).collect();
            let stage = Stage::fit(params, features, &rows, &residuals);

            for (pred, step) in train_pred.iter_mut().zip(stage.predict(train_x)) {
                *pred += step;
            }
            for (pred, step) in val_pred.iter_mut().zip(stage.predict(val_x)) {
                *pred += step;
            }
            stages.push(stage);
            rounds_run = round + 1;

            if val_y.is_empty() {
                best_iteration = rounds_run;
                continue;
            }

            let rmse = rmse(&val_pred, val_y);
            if rmse < best_rmse {
                best_rmse = rmse;
                best_iteration = rounds_run;
            } else if rounds_run - best_iteration >= params.early_stopping_rounds {
                debug!(
                    "Early stopping at round {} (best {} with rmse {:.1})",
                    rounds_run, best_iteration, best_rmse
                );
                break;
            }
        }

        stages.truncate(best_iteration);
        let mut model = Self {
            base_score,
            stages,
            importance: vec![0.0; n_features],
        };
        let (eval_x, eval_y) = if val_y.is_empty() { (train_x, train_y) } else { (val_x, val_y) };
        model.importance = model.permutation_importance(eval_x, eval_y, &mut rng);

        let report = FitReport {
            rounds_run,
            best_iteration,
            best_validation_rmse: best_rmse.is_finite().then_some(best_rmse),
        };
        (model, report)
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.predict(&[row.to_vec()])[0]
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        let mut out = vec![self.base_score; rows.len()];
        for stage in &self.stages {
            for (pred, step) in out.iter_mut().zip(stage.predict(rows)) {
                *pred += step;
            }
        }
        out
    }

    pub fn n_trees(&self) -> usize {
        self.stages.len()
    }

    /// Each feature's share of the total importance; zeros when no feature matters.
    pub fn feature_importance(&self) -> Vec<f64> {
        self.importance.clone()
    }

    /// RMSE increase when one column is shuffled, clamped at zero and normalized.
    fn permutation_importance(&self, rows: &[Vec<f64>], truth: &[f64], rng: &mut StdRng) -> Vec<f64> {
        let n_features = self.importance.len();
        if rows.is_empty() || self.stages.is_empty() {
            return vec![0.0; n_features];
        }

        let baseline = rmse(&self.predict(rows), truth);
        let mut shuffled = rows.to_vec();
        let raw: Vec<f64> = (0..n_features)
            .map(|feature| {
                let mut column: Vec<f64> = rows.iter().map(|r| r[feature]).collect();
                column.shuffle(rng);
                for (row, value) in shuffled.iter_mut().zip(column) {
                    row[feature] = value;
                }
                let increase = (rmse(&self.predict(&shuffled), truth) - baseline).max(0.0);
                for (row, original) in shuffled.iter_mut().zip(rows) {
                    row[feature] = original[feature];
                }
                increase
            })
            .collect();

        let total: f64 = raw.iter().sum();
        raw.into_iter()
            .map(|v| if total > 0.0 { v / total } else { 0.0 })
            .collect()
    }
}

fn rmse(pred: &[f64], truth: &[f64]) -> f64 {
    let sse: f64 = pred.iter().zip(truth).map(|(p, t)| (p - t).powi(2)).sum();
    (sse / truth.len() as f64).sqrt()
}

/// Sorted sample of `round(n * fraction)` distinct indices, at least one.
fn sample_sorted(rng: &mut StdRng, n: usize, fraction: f64) -> Vec<usize> {
    if fraction >= 1.0 {
        return (0..n).collect();
    }
    let amount = ((n as f64 * fraction).round() as usize).clamp(1, n);
    let mut picked = index::sample(rng, n, amount).into_vec();
    picked.sort_unstable();
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data(n: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64, (i % 7) as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| if r[0] < n as f64 / 2.0 { 100.0 } else { 300.0 }).collect();
        (x, y)
    }

    #[test]
    fn sampling_keeps_at_least_one_index() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(sample_sorted(&mut rng, 10, 1.0), (0..10).collect::<Vec<_>>());
        assert_eq!(sample_sorted(&mut rng, 10, 0.01).len(), 1);
        let picked = sample_sorted(&mut rng, 50, 0.5);
        assert_eq!(picked.len(), 25);
        assert!(picked.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn learns_a_step_function() {
        let (x, y) = step_data(200);
        let params = BoostingParams {
            bagging_fraction: 1.0,
            feature_fraction: 1.0,
            learning_rate: 0.3,
            min_data_in_leaf: 5,
            ..BoostingParams::default()
        };
        let (model, report) = GradientBoostedModel::fit(&params, &x, &y, &x, &y);

        assert!(report.best_iteration > 0);
        assert_eq!(model.n_trees(), report.best_iteration);
        assert!((model.predict_row(&[10.0, 3.0]) - 100.0).abs() < 5.0);
        assert!((model.predict_row(&[190.0, 1.0]) - 300.0).abs() < 5.0);
    }

    #[test]
    fn early_stopping_truncates_to_best_iteration() {
        let (x, y) = step_data(200);
        let params = BoostingParams {
            n_estimators: 400,
            early_stopping_rounds: 5,
            learning_rate: 0.5,
            ..BoostingParams::default()
        };
        let (model, report) = GradientBoostedModel::fit(&params, &x, &y, &x, &y);
        assert!(report.rounds_run >= report.best_iteration);
        assert_eq!(model.n_trees(), report.best_iteration);
        assert!(report.best_validation_rmse.is_some());
    }

    #[test]
    fn importance_favours_the_informative_feature() {
        let (x, y) = step_data(200);
        let (model, _) = GradientBoostedModel::fit(&BoostingParams::default(), &x, &y, &x, &y);
        let importance = model.feature_importance();
        assert!(importance[0] > importance[1]);
        assert!((importance.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fitting_is_deterministic_for_a_seed() {
        let (x, y) = step_data(120);
        let params = BoostingParams::default();
        let (a, _) = GradientBoostedModel::fit(&params, &x, &y, &x, &y);
        let (b, _) = GradientBoostedModel::fit(&params, &x, &y, &x, &y);
        assert_eq!(a.n_trees(), b.n_trees());
        assert_eq!(a.predict(&x), b.predict(&x));
        assert_eq!(a.feature_importance(), b.feature_importance());
    }

    #[test]
    fn constant_target_has_no_importance() {
        let x: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64]).collect();
        let y = vec![42.0; 100];
        let (model, _) = GradientBoostedModel::fit(&BoostingParams::default(), &x, &y, &x, &y);
        assert!((model.predict_row(&[5.0]) - 42.0).abs() < 1e-6);
        assert!(model.feature_importance().iter().all(|&v| v == 0.0));
    }
}
