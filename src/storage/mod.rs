// Storage module: the listing store contract and its SQLite implementation.

pub mod sqlite;

pub use sqlite::SqliteStorage;

use crate::model::{Listing, ListingFilter, PredictionRecord, StorageError};

/// Read/write contract the pipeline needs from a listing store.
pub trait ListingStore {
    /// Listings with a price, floor area and building age, newest first.
    fn fetch_trainable_listings(&self) -> Result<Vec<Listing>, StorageError>;

    fn fetch_listings(&self, filter: &ListingFilter) -> Result<Vec<Listing>, StorageError>;

    /// Best-effort insert, one row at a time. Returns how many rows were written.
    fn write_predictions(&self, records: &[PredictionRecord]) -> usize;

    /// Listings whose latest prediction has a discount rate of at least
    /// `min_discount_rate`, highest first.
    fn fetch_bargains(
        &self,
        min_discount_rate: f64,
        limit: usize,
    ) -> Result<Vec<(Listing, PredictionRecord)>, StorageError>;
}
