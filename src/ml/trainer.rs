use crate::config::TrainingConfig;
use crate::ml::artifact::{
    self, FeatureImportance, MODEL_TYPE, ModelArtifact, ModelMetadata,
};
use crate::ml::features::{FEATURE_COLUMNS, FeatureEngineer, TrainingData};
use crate::ml::gbdt::{BoostingParams, GradientBoostedModel};
use crate::ml::metrics::{EvaluationMetrics, RegressionScores};
use crate::ml::stats::remove_outliers;
use crate::model::{Listing, PipelineError};
use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::path::Path;
use tracing::{debug, info, warn};

/// How many importances go into the metadata file.
pub const TOP_IMPORTANCES: usize = 10;

/// Coarse progress reported while training.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingMilestone {
    DataLoaded { listings: usize, usable_rows: usize },
    SplitDone { train_rows: usize, validation_rows: usize },
    FitStarted,
    FitComplete { best_iteration: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerStatus {
    Untrained,
    Trained,
    Persisted,
}

#[derive(Debug)]
enum TrainerState {
    Untrained,
    Trained(Box<ModelArtifact>),
    Persisted(Box<ModelArtifact>),
}

/// Fits, evaluates and persists the price model.
pub struct ModelTrainer {
    config: TrainingConfig,
    params: BoostingParams,
    state: TrainerState,
}

impl ModelTrainer {
    pub fn new(config: TrainingConfig, params: BoostingParams) -> Self {
        Self {
            config,
            params,
            state: TrainerState::Untrained,
        }
    }

    pub fn train(&mut self, listings: &[Listing], remove_outliers: bool) -> Result<EvaluationMetrics, PipelineError> {
        self.train_with_progress(listings, remove_outliers, |_| {})
    }

    /// Trains on `listings`, reporting milestones to `progress`. On failure the
    /// trainer is left untrained.
    pub fn train_with_progress(
        &mut self,
        listings: &[Listing],
        remove_outliers: bool,
        mut progress: impl FnMut(TrainingMilestone),
    ) -> Result<EvaluationMetrics, PipelineError> {
        let previous = std::mem::replace(&mut self.state, TrainerState::Untrained);
        match self.fit(listings, remove_outliers, &mut progress) {
            Ok(trained) => {
                let metrics = trained.metadata.metrics;
                self.state = TrainerState::Trained(Box::new(trained));
                Ok(metrics)
            }
            Err(e) => {
                if let TrainerState::Trained(_) = previous {
                    warn!("Training failed; discarding the previously trained, unsaved model");
                }
                Err(e)
            }
        }
    }

    fn fit(
        &self,
        listings: &[Listing],
        remove_outliers_flag: bool,
        progress: &mut impl FnMut(TrainingMilestone),
    ) -> Result<ModelArtifact, PipelineError> {
        info!("Training listings: {}", listings.len());

        let filtered;
        let batch = if remove_outliers_flag {
            filtered = remove_outliers(listings, self.config.outlier_n_std);
            &filtered[..]
        } else {
            listings
        };

        let (engineer, data) = FeatureEngineer::prepare_training_data(batch, self.config.unseen_categories)?;
        info!("Features: {} | usable rows: {}", FEATURE_COLUMNS.len(), data.len());
        progress(TrainingMilestone::DataLoaded {
            listings: listings.len(),
            usable_rows: data.len(),
        });

        if data.len() < self.config.min_data_count {
            return Err(PipelineError::InsufficientData {
                available: data.len(),
                required: self.config.min_data_count,
            });
        }

        let (train, val) = train_test_split(data, self.config.test_size, self.config.random_state);
        info!("Train rows: {} | validation rows: {}", train.len(), val.len());
        progress(TrainingMilestone::SplitDone {
            train_rows: train.len(),
            validation_rows: val.len(),
        });

        progress(TrainingMilestone::FitStarted);
        let (model, report) = GradientBoostedModel::fit(
            &self.params,
            &train.features,
            &train.targets,
            &val.features,
            &val.targets,
        );
        info!(
            "Fit complete: {} rounds run, best iteration {}, {} trees kept",
            report.rounds_run,
            report.best_iteration,
            model.n_trees()
        );
        if let Some(best_rmse) = report.best_validation_rmse {
            debug!("Best validation RMSE during boosting: {:.0}", best_rmse);
        }
        progress(TrainingMilestone::FitComplete {
            best_iteration: report.best_iteration,
        });

        let metrics = EvaluationMetrics::from_scores(
            RegressionScores::compute(&train.targets, &model.predict(&train.features)),
            RegressionScores::compute(&val.targets, &model.predict(&val.features)),
        );
        info!(
            "Train RMSE: {:.0} | Validation RMSE: {:.0} | Validation R²: {:.4}",
            metrics.train_rmse, metrics.val_rmse, metrics.val_r2
        );

        let metadata = ModelMetadata {
            trained_at: Utc::now(),
            model_type: MODEL_TYPE.to_string(),
            metrics,
            feature_importance: rank_importance(&model.feature_importance()),
        };
        Ok(ModelArtifact::new(model, engineer, metadata))
    }

    pub fn status(&self) -> TrainerStatus {
        match self.state {
            TrainerState::Untrained => TrainerStatus::Untrained,
            TrainerState::Trained(_) => TrainerStatus::Trained,
            TrainerState::Persisted(_) => TrainerStatus::Persisted,
        }
    }

    pub fn artifact(&self) -> Option<&ModelArtifact> {
        match &self.state {
            TrainerState::Untrained => None,
            TrainerState::Trained(a) | TrainerState::Persisted(a) => Some(a),
        }
    }

    /// Consumes the trainer, handing over the fitted bundle.
    pub fn into_artifact(self) -> Option<ModelArtifact> {
        match self.state {
            TrainerState::Untrained => None,
            TrainerState::Trained(a) | TrainerState::Persisted(a) => Some(*a),
        }
    }

    pub fn metrics(&self) -> Option<EvaluationMetrics> {
        self.artifact().map(|a| a.metadata.metrics)
    }

    /// Full ranked importance list; the metadata file keeps only the top entries.
    pub fn feature_importance(&self) -> Option<Vec<FeatureImportance>> {
        self.artifact()
            .map(|a| ranked_importance(&a.model.feature_importance()))
    }

    /// Writes the bundle and the metadata file. Requires a successful `train`.
    pub fn save_model(&mut self, model_path: &Path, metadata_path: &Path) -> Result<(), PipelineError> {
        let artifact = match std::mem::replace(&mut self.state, TrainerState::Untrained) {
            TrainerState::Untrained => return Err(PipelineError::NotTrained),
            TrainerState::Trained(a) | TrainerState::Persisted(a) => a,
        };

        let written = artifact::write_artifact(model_path, &artifact)
            .and_then(|_| artifact::write_metadata(metadata_path, &artifact.metadata));
        match written {
            Ok(()) => {
                self.state = TrainerState::Persisted(artifact);
                Ok(())
            }
            Err(e) => {
                self.state = TrainerState::Trained(artifact);
                Err(e)
            }
        }
    }

    pub fn load_model(model_path: &Path) -> Result<ModelArtifact, PipelineError> {
        artifact::read_artifact(model_path)
    }

    pub fn load_metadata(metadata_path: &Path) -> Result<Option<ModelMetadata>, PipelineError> {
        artifact::read_metadata(metadata_path)
    }
}

fn ranked_importance(importance: &[f64]) -> Vec<FeatureImportance> {
    let mut ranked: Vec<FeatureImportance> = FEATURE_COLUMNS
        .iter()
        .zip(importance)
        .map(|(feature, &importance)| FeatureImportance {
            feature: feature.to_string(),
            importance,
        })
        .collect();
    // Stable: equal importances keep column order.
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked
}

fn rank_importance(importance: &[f64]) -> Vec<FeatureImportance> {
    let mut ranked = ranked_importance(importance);
    ranked.truncate(TOP_IMPORTANCES);
    ranked
}

/// Seeded shuffle split; the validation partition gets `ceil(n * test_size)` rows.
pub fn train_test_split(data: TrainingData, test_size: f64, seed: u64) -> (TrainingData, TrainingData) {
    let n = data.len();
    let n_val = ((n as f64 * test_size).ceil() as usize).min(n);

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let mut features: Vec<Option<Vec<f64>>> = data.features.into_iter().map(Some).collect();
    let mut train = TrainingData::default();
    let mut val = TrainingData::default();
    for (position, &row) in order.iter().enumerate() {
        let target = if position < n_val { &mut val } else { &mut train };
        if let Some(x) = features[row].take() {
            target.features.push(x);
            target.targets.push(data.targets[row]);
        }
    }
    (train, val)
}
