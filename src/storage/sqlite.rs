use crate::model::{Listing, ListingFilter, PredictionRecord, StorageError, StoreStatistics};
use crate::storage::ListingStore;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use tracing::{debug, warn};

const LISTING_COLUMNS: &str = "l.id, l.source_site, l.url, l.prefecture, l.city, l.address, l.price,
     l.floor_area, l.building_age, l.floor_number, l.total_floors, l.layout, l.structure,
     l.direction, l.nearest_station, l.station_distance, l.management_fee,
     l.repair_reserve_fund, l.scraped_at";

const PREDICTION_COLUMNS: &str = "p.listing_id, p.predicted_price, p.actual_price, p.price_difference,
     p.discount_rate, p.model_version, p.predicted_at";

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens the database file, creating parent directories and the schema as needed.
    pub fn open(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Failed to create database directory {}: {}", parent.display(), e);
            }
        }
        Self::with_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS listings (
                id TEXT PRIMARY KEY,
                source_site TEXT NOT NULL,
                url TEXT NOT NULL,
                prefecture TEXT,
                city TEXT,
                address TEXT,
                price INTEGER,
                floor_area REAL,
                building_age REAL,
                floor_number INTEGER,
                total_floors INTEGER,
                layout TEXT,
                structure TEXT,
                direction TEXT,
                nearest_station TEXT,
                station_distance REAL,
                management_fee INTEGER,
                repair_reserve_fund INTEGER,
                scraped_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                listing_id TEXT NOT NULL,
                predicted_price INTEGER NOT NULL,
                actual_price INTEGER NOT NULL,
                price_difference INTEGER NOT NULL,
                discount_rate REAL NOT NULL,
                model_version TEXT NOT NULL,
                predicted_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_listings_prefecture ON listings(prefecture);
            CREATE INDEX IF NOT EXISTS idx_listings_city ON listings(city);
            CREATE INDEX IF NOT EXISTS idx_listings_price ON listings(price);
            CREATE INDEX IF NOT EXISTS idx_listings_scraped_at ON listings(scraped_at);
            CREATE INDEX IF NOT EXISTS idx_listings_source_site ON listings(source_site);
            CREATE INDEX IF NOT EXISTS idx_predictions_listing ON predictions(listing_id);
            CREATE INDEX IF NOT EXISTS idx_predictions_discount ON predictions(discount_rate);
            "
        )?;

        Ok(Self { conn })
    }

    /// Inserts or replaces a listing by id.
    pub fn save_listing(&self, listing: &Listing) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO listings (
                id, source_site, url, prefecture, city, address, price,
                floor_area, building_age, floor_number, total_floors, layout, structure,
                direction, nearest_station, station_distance, management_fee,
                repair_reserve_fund, scraped_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                &listing.id,
                &listing.source_site,
                &listing.url,
                &listing.prefecture,
                &listing.city,
                &listing.address,
                &listing.price,
                &listing.floor_area,
                &listing.building_age,
                &listing.floor_number,
                &listing.total_floors,
                &listing.layout,
                &listing.structure,
                &listing.direction,
                &listing.nearest_station,
                &listing.station_distance,
                &listing.management_fee,
                &listing.repair_reserve_fund,
                timestamp(&listing.scraped_at),
            ],
        )?;
        Ok(())
    }

    /// Saves each listing independently; returns how many were stored.
    pub fn save_listings(&self, listings: &[Listing]) -> usize {
        listings
            .iter()
            .filter(|listing| match self.save_listing(listing) {
                Ok(()) => true,
                Err(e) => {
                    warn!("DB save error for {}: {}", listing.id, e);
                    false
                }
            })
            .count()
    }

    pub fn get_listing(&self, id: &str) -> Result<Listing, StorageError> {
        let sql = format!("SELECT {} FROM listings l WHERE l.id = ?1", LISTING_COLUMNS);
        self.conn
            .query_row(&sql, params![id], |row| Self::map_listing(row, 0))
            .optional()?
            .ok_or(StorageError::NotFound)
    }

    pub fn listing_count(&self) -> Result<usize, StorageError> {
        let count: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM listings", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Scrape time of the most recent listing, if any.
    pub fn last_scraped_at(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let latest: Option<String> = self
            .conn
            .query_row("SELECT MAX(scraped_at) FROM listings", [], |row| row.get(0))?;
        match latest {
            Some(s) => Ok(Some(s.parse()?)),
            None => Ok(None),
        }
    }

    /// Deletes listings scraped more than `retention_days` ago and any predictions
    /// left without a listing. Returns the number of listings deleted.
    pub fn delete_old_data(&self, retention_days: i64) -> Result<usize, StorageError> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let deleted = self.conn.execute(
            "DELETE FROM listings WHERE scraped_at < ?1",
            params![timestamp(&cutoff)],
        )?;
        let orphans = self.conn.execute(
            "DELETE FROM predictions WHERE listing_id NOT IN (SELECT id FROM listings)",
            [],
        )?;
        debug!("Deleted {} old listings and {} orphaned predictions", deleted, orphans);
        Ok(deleted)
    }

    pub fn get_statistics(&self) -> Result<StoreStatistics, StorageError> {
        let total_listings = self.listing_count()?;
        let total_predictions: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM predictions", [], |row| row.get(0))?;
        let avg_price: Option<f64> = self
            .conn
            .query_row("SELECT AVG(price) FROM listings", [], |row| row.get(0))?;

        Ok(StoreStatistics {
            total_listings,
            total_predictions,
            prefecture_counts: self.group_counts("prefecture")?,
            site_counts: self.group_counts("source_site")?,
            avg_price: avg_price.unwrap_or(0.0),
        })
    }

    fn group_counts(&self, column: &str) -> Result<Vec<(String, usize)>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT COALESCE({col}, 'unknown'), COUNT(*) AS n FROM listings
             GROUP BY {col} ORDER BY n DESC, 1 ASC",
            col = column
        ))?;

        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let count: usize = row.get(1)?;
            Ok((key, count))
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn insert_prediction(&self, record: &PredictionRecord) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO predictions (
                listing_id, predicted_price, actual_price, price_difference,
                discount_rate, model_version, predicted_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &record.listing_id,
                &record.predicted_price,
                &record.actual_price,
                &record.price_difference,
                &record.discount_rate,
                &record.model_version,
                timestamp(&record.predicted_at),
            ],
        )?;
        Ok(())
    }

    /// Maps listing columns starting at `offset` in the order of `LISTING_COLUMNS`.
    fn map_listing(row: &Row, offset: usize) -> Result<Listing, rusqlite::Error> {
        let scraped_at_idx = offset + 18;
        let scraped_at_str: String = row.get(scraped_at_idx)?;
        let scraped_at = parse_column(scraped_at_idx, &scraped_at_str)?;

        Ok(Listing {
            id: row.get(offset)?,
            source_site: row.get(offset + 1)?,
            url: row.get(offset + 2)?,
            prefecture: row.get(offset + 3)?,
            city: row.get(offset + 4)?,
            address: row.get(offset + 5)?,
            price: row.get(offset + 6)?,
            floor_area: row.get(offset + 7)?,
            building_age: row.get(offset + 8)?,
            floor_number: row.get(offset + 9)?,
            total_floors: row.get(offset + 10)?,
            layout: row.get(offset + 11)?,
            structure: row.get(offset + 12)?,
            direction: row.get(offset + 13)?,
            nearest_station: row.get(offset + 14)?,
            station_distance: row.get(offset + 15)?,
            management_fee: row.get(offset + 16)?,
            repair_reserve_fund: row.get(offset + 17)?,
            scraped_at,
        })
    }

    fn map_prediction(row: &Row, offset: usize) -> Result<PredictionRecord, rusqlite::Error> {
        let predicted_at_idx = offset + 6;
        let predicted_at_str: String = row.get(predicted_at_idx)?;

        Ok(PredictionRecord {
            listing_id: row.get(offset)?,
            predicted_price: row.get(offset + 1)?,
            actual_price: row.get(offset + 2)?,
            price_difference: row.get(offset + 3)?,
            discount_rate: row.get(offset + 4)?,
            model_version: row.get(offset + 5)?,
            predicted_at: parse_column(predicted_at_idx, &predicted_at_str)?,
        })
    }
}

impl ListingStore for SqliteStorage {
    fn fetch_trainable_listings(&self) -> Result<Vec<Listing>, StorageError> {
        let sql = format!(
            "SELECT {} FROM listings l
             WHERE l.price IS NOT NULL AND l.floor_area IS NOT NULL AND l.building_age IS NOT NULL
             ORDER BY l.scraped_at DESC",
            LISTING_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| Self::map_listing(row, 0))?;

        let mut listings = Vec::new();
        for listing in rows {
            listings.push(listing?);
        }
        Ok(listings)
    }

    fn fetch_listings(&self, filter: &ListingFilter) -> Result<Vec<Listing>, StorageError> {
        let sql = format!(
            "SELECT {} FROM listings l
             WHERE (?1 IS NULL OR l.prefecture = ?1)
               AND (?2 IS NULL OR l.city = ?2)
               AND (?3 IS NULL OR l.source_site = ?3)
             ORDER BY l.scraped_at DESC
             LIMIT ?4",
            LISTING_COLUMNS
        );
        // SQLite treats a negative LIMIT as unbounded.
        let limit = filter.limit.map_or(-1, |l| l as i64);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![&filter.prefecture, &filter.city, &filter.source_site, limit],
            |row| Self::map_listing(row, 0),
        )?;

        let mut listings = Vec::new();
        for listing in rows {
            listings.push(listing?);
        }
        Ok(listings)
    }

    fn write_predictions(&self, records: &[PredictionRecord]) -> usize {
        let mut written = 0;
        for record in records {
            match self.insert_prediction(record) {
                Ok(()) => written += 1,
                Err(e) => warn!("Prediction insert failed for {}: {}", record.listing_id, e),
            }
        }
        debug!("Wrote {} of {} predictions", written, records.len());
        written
    }

    fn fetch_bargains(
        &self,
        min_discount_rate: f64,
        limit: usize,
    ) -> Result<Vec<(Listing, PredictionRecord)>, StorageError> {
        let sql = format!(
            "SELECT {}, {} FROM listings l
             INNER JOIN predictions p ON p.listing_id = l.id
             WHERE p.id = (SELECT MAX(id) FROM predictions WHERE listing_id = l.id)
               AND p.discount_rate >= ?1
             ORDER BY p.discount_rate DESC, p.id ASC
             LIMIT ?2",
            LISTING_COLUMNS, PREDICTION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![min_discount_rate, limit as i64], |row| {
            Ok((Self::map_listing(row, 0)?, Self::map_prediction(row, 19)?))
        })?;

        let mut bargains = Vec::new();
        for row in rows {
            bargains.push(row?);
        }
        Ok(bargains)
    }
}

/// Fixed-width UTC timestamps so text comparison matches time order.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_column(idx: usize, value: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    value.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{generate_listings, sample_listing};

    fn record(listing_id: &str, discount_rate: f64) -> PredictionRecord {
        PredictionRecord {
            listing_id: listing_id.to_string(),
            predicted_price: 50_000_000,
            actual_price: 40_000_000,
            price_difference: 10_000_000,
            discount_rate,
            model_version: "2026-01-01T00:00:00+00:00".to_string(),
            predicted_at: Utc::now(),
        }
    }

    #[test]
    fn listing_round_trip() {
        let storage = SqliteStorage::in_memory().unwrap();
        let mut listing = sample_listing("https://suumo.jp/test/round-trip");
        listing.direction = None;
        storage.save_listing(&listing).unwrap();

        let loaded = storage.get_listing(&listing.id).unwrap();
        assert_eq!(loaded.price, listing.price);
        assert_eq!(loaded.floor_area, listing.floor_area);
        assert_eq!(loaded.direction, None);
        assert_eq!(loaded.nearest_station, listing.nearest_station);
        assert_eq!(loaded.repair_reserve_fund, listing.repair_reserve_fund);
        assert_eq!(loaded.scraped_at.timestamp_micros(), listing.scraped_at.timestamp_micros());
        assert!(matches!(storage.get_listing("missing"), Err(StorageError::NotFound)));
    }

    #[test]
    fn schema_has_no_unused_columns() {
        let storage = SqliteStorage::in_memory().unwrap();
        let mut stmt = storage.conn.prepare("PRAGMA table_info(listings)").unwrap();
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(columns.len(), 19);
        assert!(columns.iter().any(|c| c == "nearest_station"));
        assert!(columns.iter().any(|c| c == "repair_reserve_fund"));
        assert!(!columns.iter().any(|c| c == "updated_at"));
    }

    #[test]
    fn upsert_replaces_existing_listing() {
        let storage = SqliteStorage::in_memory().unwrap();
        let mut listing = sample_listing("https://suumo.jp/test/upsert");
        storage.save_listing(&listing).unwrap();
        listing.price = Some(39_800_000);
        storage.save_listing(&listing).unwrap();

        assert_eq!(storage.listing_count().unwrap(), 1);
        assert_eq!(storage.get_listing(&listing.id).unwrap().price, Some(39_800_000));
    }

    #[test]
    fn trainable_listings_need_price_area_and_age() {
        let storage = SqliteStorage::in_memory().unwrap();
        let mut listings = generate_listings(5, 1);
        listings[0].price = None;
        listings[1].building_age = None;
        listings[2].station_distance = None;
        assert_eq!(storage.save_listings(&listings), 5);

        assert_eq!(storage.fetch_trainable_listings().unwrap().len(), 3);
    }

    #[test]
    fn listing_filter_applies() {
        let storage = SqliteStorage::in_memory().unwrap();
        let listings = generate_listings(40, 2);
        storage.save_listings(&listings);

        let tokyo = storage
            .fetch_listings(&ListingFilter {
                prefecture: Some("東京都".to_string()),
                ..Default::default()
            })
            .unwrap();
        let expected = listings.iter().filter(|l| l.prefecture.as_deref() == Some("東京都")).count();
        assert_eq!(tokyo.len(), expected);

        let limited = storage
            .fetch_listings(&ListingFilter {
                limit: Some(7),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 7);
    }

    #[test]
    fn bargains_use_latest_prediction() {
        let storage = SqliteStorage::in_memory().unwrap();
        let listings = generate_listings(3, 3);
        storage.save_listings(&listings);

        let written = storage.write_predictions(&[
            record(&listings[0].id, 35.0),
            record(&listings[0].id, 5.0),
            record(&listings[1].id, 20.0),
            record(&listings[2].id, 25.0),
        ]);
        assert_eq!(written, 4);

        let bargains = storage.fetch_bargains(20.0, 10).unwrap();
        let ids: Vec<&str> = bargains.iter().map(|(l, _)| l.id.as_str()).collect();
        assert_eq!(ids, vec![listings[2].id.as_str(), listings[1].id.as_str()]);
        assert_eq!(bargains[1].1.discount_rate, 20.0);

        assert_eq!(storage.fetch_bargains(20.0, 1).unwrap().len(), 1);
    }

    #[test]
    fn old_data_and_orphans_are_deleted() {
        let storage = SqliteStorage::in_memory().unwrap();
        let mut listings = generate_listings(2, 4);
        listings[0].scraped_at = Utc::now() - Duration::days(400);
        storage.save_listings(&listings);
        storage.write_predictions(&[record(&listings[0].id, 30.0), record(&listings[1].id, 30.0)]);

        assert_eq!(storage.delete_old_data(365).unwrap(), 1);
        let stats = storage.get_statistics().unwrap();
        assert_eq!(stats.total_listings, 1);
        assert_eq!(stats.total_predictions, 1);
    }

    #[test]
    fn statistics_group_by_prefecture_and_site() {
        let storage = SqliteStorage::in_memory().unwrap();
        let listings = generate_listings(30, 5);
        storage.save_listings(&listings);

        let stats = storage.get_statistics().unwrap();
        assert_eq!(stats.total_listings, 30);
        assert_eq!(stats.site_counts, vec![("SUUMO".to_string(), 30)]);
        assert_eq!(stats.prefecture_counts.iter().map(|(_, n)| n).sum::<usize>(), 30);
        assert!(stats.avg_price > 0.0);
        assert!(storage.last_scraped_at().unwrap().is_some());
    }
}
