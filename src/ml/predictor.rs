use crate::ml::artifact::{self, ModelArtifact};
use crate::ml::features::Imputation;
use crate::model::{Listing, PipelineError, PredictionRecord};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Value substituted for features still missing at inference time.
const INFERENCE_FILL: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BargainTier {
    Exceptional,
    Strong,
    Moderate,
    None,
}

impl BargainTier {
    pub fn from_rate(discount_rate: f64) -> Self {
        if discount_rate >= 30.0 {
            BargainTier::Exceptional
        } else if discount_rate >= 20.0 {
            BargainTier::Strong
        } else if discount_rate >= 10.0 {
            BargainTier::Moderate
        } else {
            BargainTier::None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BargainTier::Exceptional => "exceptional",
            BargainTier::Strong => "strong",
            BargainTier::Moderate => "moderate",
            BargainTier::None => "none",
        }
    }
}

/// Model output for one listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredListing {
    pub listing_id: String,
    pub predicted_price: i64,
    pub actual_price: Option<i64>,
    pub price_difference: Option<i64>,
    /// `None` when the predicted price is not positive or the listing has no price.
    pub discount_rate: Option<f64>,
}

impl ScoredListing {
    pub fn new(listing_id: impl Into<String>, predicted_price: i64, actual_price: Option<i64>) -> Self {
        let price_difference = actual_price.map(|actual| predicted_price - actual);
        let discount_rate = price_difference
            .filter(|_| predicted_price > 0)
            .map(|diff| diff as f64 * 100.0 / predicted_price as f64);
        Self {
            listing_id: listing_id.into(),
            predicted_price,
            actual_price,
            price_difference,
            discount_rate,
        }
    }

    pub fn require_discount_rate(&self) -> Result<f64, PipelineError> {
        self.discount_rate.ok_or_else(|| PipelineError::UndefinedDiscount {
            listing_id: self.listing_id.clone(),
        })
    }

    pub fn tier(&self) -> BargainTier {
        self.discount_rate.map_or(BargainTier::None, BargainTier::from_rate)
    }
}

/// Scores listings against a persisted model artifact.
pub struct PricePredictor {
    model_path: PathBuf,
    artifact: Option<ModelArtifact>,
}

impl PricePredictor {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            artifact: None,
        }
    }

    /// Wraps an in-memory artifact; `load_model` still reads from `model_path`.
    pub fn from_artifact(model_path: impl Into<PathBuf>, artifact: ModelArtifact) -> Self {
        Self {
            model_path: model_path.into(),
            artifact: Some(artifact),
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn artifact(&self) -> Option<&ModelArtifact> {
        self.artifact.as_ref()
    }

    pub fn load_model(&mut self) -> Result<&ModelArtifact, PipelineError> {
        let artifact = artifact::read_artifact(&self.model_path)?;
        info!(
            "Model loaded: {} (trained {})",
            self.model_path.display(),
            artifact.model_version()
        );
        Ok(&*self.artifact.insert(artifact))
    }

    fn loaded(&mut self) -> Result<&ModelArtifact, PipelineError> {
        if self.artifact.is_none() {
            self.load_model()?;
        }
        self.artifact.as_ref().ok_or(PipelineError::NotTrained)
    }

    pub fn predict(&mut self, listings: &[Listing]) -> Result<Vec<ScoredListing>, PipelineError> {
        let artifact = self.loaded()?;
        let rows: Vec<Vec<f64>> = artifact
            .features
            .create_features(listings, Imputation::None)?
            .iter()
            .map(|vector| vector.to_dense_filled(INFERENCE_FILL))
            .collect();

        let scored: Vec<ScoredListing> = listings
            .iter()
            .zip(artifact.model.predict(&rows))
            .map(|(listing, predicted)| ScoredListing::new(listing.id.clone(), predicted as i64, listing.price))
            .collect();

        debug!("Scored {} listings", scored.len());
        Ok(scored)
    }

    /// Persistable records for every row with a defined discount rate.
    pub fn create_prediction_records(&mut self, scored: &[ScoredListing]) -> Result<Vec<PredictionRecord>, PipelineError> {
        let model_version = self.loaded()?.model_version();
        let predicted_at = Utc::now();

        let records: Vec<PredictionRecord> = scored
            .iter()
            .filter_map(|s| {
                Some(PredictionRecord {
                    listing_id: s.listing_id.clone(),
                    predicted_price: s.predicted_price,
                    actual_price: s.actual_price?,
                    price_difference: s.price_difference?,
                    discount_rate: s.discount_rate?,
                    model_version: model_version.clone(),
                    predicted_at,
                })
            })
            .collect();

        let skipped = scored.len() - records.len();
        if skipped > 0 {
            info!("Skipped {} listings with an undefined discount rate", skipped);
        }
        Ok(records)
    }

    /// Listings whose discount rate is at least `min_discount_rate`, highest first.
    pub fn find_bargain_properties(
        &mut self,
        listings: &[Listing],
        min_discount_rate: f64,
    ) -> Result<Vec<ScoredListing>, PipelineError> {
        Ok(select_bargains(self.predict(listings)?, min_discount_rate))
    }
}

/// Keeps rows at or above the threshold; `sort_by` is stable so ties keep input order.
pub fn select_bargains(scored: Vec<ScoredListing>, min_discount_rate: f64) -> Vec<ScoredListing> {
    let mut bargains: Vec<(f64, ScoredListing)> = scored
        .into_iter()
        .filter_map(|s| s.discount_rate.map(|rate| (rate, s)))
        .filter(|(rate, _)| *rate >= min_discount_rate)
        .collect();
    bargains.sort_by(|a, b| b.0.total_cmp(&a.0));
    info!(
        "Found {} bargains at or above {:.1}%",
        bargains.len(),
        min_discount_rate
    );
    bargains.into_iter().map(|(_, s)| s).collect()
}
