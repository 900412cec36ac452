// Core structs: Listing, PredictionRecord, store filters and error types
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// One observed property offering, as produced by a scraper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Content hash of the source URL.
    pub id: String,
    pub source_site: String,
    pub url: String,
    pub prefecture: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
    /// Asking price in yen.
    pub price: Option<i64>,
    /// Floor area in square meters.
    pub floor_area: Option<f64>,
    /// Building age in years.
    pub building_age: Option<f64>,
    pub floor_number: Option<i64>,
    pub total_floors: Option<i64>,
    /// Layout code such as "2LDK".
    pub layout: Option<String>,
    pub structure: Option<String>,
    /// Orientation of the main windows.
    pub direction: Option<String>,
    pub nearest_station: Option<String>,
    /// Walking minutes to the nearest station.
    pub station_distance: Option<f64>,
    pub management_fee: Option<i64>,
    pub repair_reserve_fund: Option<i64>,
    pub scraped_at: DateTime<Utc>,
}

/// One scoring result for one listing. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub listing_id: String,
    pub predicted_price: i64,
    pub actual_price: i64,
    pub price_difference: i64,
    pub discount_rate: f64,
    pub model_version: String,
    pub predicted_at: DateTime<Utc>,
}

/// Filter for arbitrary listing reads.
#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub prefecture: Option<String>,
    pub city: Option<String>,
    pub source_site: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreStatistics {
    pub total_listings: usize,
    pub total_predictions: usize,
    pub prefecture_counts: Vec<(String, usize)>,
    pub site_counts: Vec<(String, usize)>,
    pub avg_price: f64,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("insufficient training data: {available} usable rows, at least {required} required")]
    InsufficientData { available: usize, required: usize },

    #[error("no trained model found at {}; train a model first", path.display())]
    ModelNotFound { path: PathBuf },

    #[error("category '{value}' of feature '{feature}' was not seen during training")]
    UnknownCategory { feature: String, value: String },

    #[error("discount rate is undefined for listing {listing_id}")]
    UndefinedDiscount { listing_id: String },

    #[error("model has not been trained")]
    NotTrained,

    #[error("model artifact {} is corrupt: {reason}", path.display())]
    CorruptArtifact { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to publish file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    #[error("not found")]
    NotFound,
}
