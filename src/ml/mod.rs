// ML module: feature derivation, boosting, training and scoring.

pub mod artifact;
pub mod encoder;
pub mod features;
pub mod gbdt;
pub mod metrics;
pub mod predictor;
pub mod stats;
pub mod trainer;


pub use artifact::{FeatureImportance, ModelArtifact, ModelMetadata};
pub use encoder::{CategoricalEncoder, UnseenCategoryPolicy};
pub use features::{FEATURE_COLUMNS, FeatureEngineer, FeatureVector, Imputation, TrainingData};
pub use gbdt::{BoostingParams, GradientBoostedModel};
pub use metrics::EvaluationMetrics;
pub use predictor::{BargainTier, PricePredictor, ScoredListing};
pub use trainer::{ModelTrainer, TrainerStatus, TrainingMilestone};
