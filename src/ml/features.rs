//! Feature derivation from raw listings.
//!
//! `FEATURE_COLUMNS` is the contract between training and inference: both sides
//! produce vectors over exactly these columns, in this order.

use crate::ml::encoder::{CategoricalEncoder, UNKNOWN_CATEGORY, UnseenCategoryPolicy};
use crate::ml::stats::median;
use crate::model::{Listing, PipelineError};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const BASE_NUMERIC_COLUMNS: [&str; 7] = [
    "floor_area",
    "building_age",
    "floor_number",
    "total_floors",
    "station_distance",
    "management_fee",
    "repair_reserve_fund",
];

pub const DERIVED_NUMERIC_COLUMNS: [&str; 4] = [
    "building_age_squared",
    "mgmt_fee_per_sqm",
    "floor_ratio",
    "room_count",
];

pub const CATEGORICAL_COLUMNS: [&str; 8] = [
    "prefecture",
    "city",
    "layout",
    "structure",
    "direction",
    "station_distance_category",
    "age_category",
    "area_category",
];

pub const FEATURE_COLUMNS: [&str; 19] = [
    "floor_area",
    "building_age",
    "floor_number",
    "total_floors",
    "station_distance",
    "management_fee",
    "repair_reserve_fund",
    "building_age_squared",
    "mgmt_fee_per_sqm",
    "floor_ratio",
    "room_count",
    "prefecture_encoded",
    "city_encoded",
    "layout_encoded",
    "structure_encoded",
    "direction_encoded",
    "station_distance_category_encoded",
    "age_category_encoded",
    "area_category_encoded",
];

const STATION_BANDS: Bands = (&[5.0, 10.0, 15.0], &["very_close", "close", "medium", "far"]);
const AGE_BANDS: Bands = (
    &[5.0, 10.0, 20.0, 30.0],
    &["new", "relatively_new", "medium", "old", "very_old"],
);
const AREA_BANDS: Bands = (&[40.0, 60.0, 80.0], &["small", "medium", "large", "very_large"]);

/// How missing numeric inputs are filled before derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Imputation {
    /// Median of the field over the current batch (training).
    BatchMedian,
    /// Leave missing; the predictor fills with zero afterwards.
    None,
}

/// Listing attributes after derivation, before categorical encoding. A band
/// category is `None` when its source field is missing.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedRow {
    pub base: [Option<f64>; 7],
    pub derived: [Option<f64>; 4],
    pub categories: [Option<String>; 8],
}

/// Numeric representation of one listing over `FEATURE_COLUMNS`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: [Option<f64>; 19],
}

impl FeatureVector {
    pub fn get(&self, column: &str) -> Option<f64> {
        FEATURE_COLUMNS
            .iter()
            .position(|c| *c == column)
            .and_then(|i| self.values[i])
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    pub fn is_complete(&self) -> bool {
        self.values.iter().all(Option::is_some)
    }

    /// Dense row, or `None` if any column is missing.
    pub fn to_dense(&self) -> Option<Vec<f64>> {
        self.values.iter().copied().collect()
    }

    /// Dense row with missing columns replaced by `fill`.
    pub fn to_dense_filled(&self, fill: f64) -> Vec<f64> {
        self.values.iter().map(|v| v.unwrap_or(fill)).collect()
    }
}

/// Feature matrix and target vector ready for fitting.
#[derive(Debug, Clone, Default)]
pub struct TrainingData {
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

impl TrainingData {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Deterministic transformation from listings to feature vectors, holding the
/// fitted categorical encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEngineer {
    encoder: CategoricalEncoder,
}

impl FeatureEngineer {
    /// Fits the encoder on the categories of a median-imputed batch.
    pub fn fit(listings: &[Listing], policy: UnseenCategoryPolicy) -> Self {
        let rows = derive_rows(listings, Imputation::BatchMedian);
        Self::fit_rows(&rows, policy)
    }

    fn fit_rows(rows: &[DerivedRow], policy: UnseenCategoryPolicy) -> Self {
        let columns = CATEGORICAL_COLUMNS.iter().enumerate().map(|(i, name)| {
            let values: Vec<&str> = rows.iter().filter_map(|r| r.categories[i].as_deref()).collect();
            (*name, values)
        });
        Self {
            encoder: CategoricalEncoder::fit(policy, columns),
        }
    }

    pub fn encoder(&self) -> &CategoricalEncoder {
        &self.encoder
    }

    pub fn feature_columns() -> &'static [&'static str] {
        &FEATURE_COLUMNS
    }

    pub fn create_features(
        &self,
        listings: &[Listing],
        imputation: Imputation,
    ) -> Result<Vec<FeatureVector>, PipelineError> {
        derive_rows(listings, imputation)
            .into_iter()
            .map(|row| self.encode_row(row))
            .collect()
    }

    fn encode_row(&self, row: DerivedRow) -> Result<FeatureVector, PipelineError> {
        let mut values = [None; 19];
        values[..7].copy_from_slice(&row.base);
        values[7..11].copy_from_slice(&row.derived);
        for (i, (feature, value)) in CATEGORICAL_COLUMNS.iter().zip(row.categories.iter()).enumerate() {
            if let Some(value) = value {
                values[11 + i] = Some(self.encoder.encode(feature, value)? as f64);
            }
        }
        Ok(FeatureVector { values })
    }

    /// Derives features with batch-median imputation, fits the encoder, and
    /// drops rows with any missing feature or a missing target price.
    pub fn prepare_training_data(
        listings: &[Listing],
        policy: UnseenCategoryPolicy,
    ) -> Result<(Self, TrainingData), PipelineError> {
        let rows = derive_rows(listings, Imputation::BatchMedian);
        let engineer = Self::fit_rows(&rows, policy);

        let mut data = TrainingData::default();
        for (listing, row) in listings.iter().zip(rows) {
            let vector = engineer.encode_row(row)?;
            if let (Some(features), Some(price)) = (vector.to_dense(), listing.price) {
                data.features.push(features);
                data.targets.push(price as f64);
            }
        }

        debug!(
            "Prepared {} of {} listings over {} features",
            data.len(),
            listings.len(),
            FEATURE_COLUMNS.len()
        );
        Ok((engineer, data))
    }
}

fn base_numerics(listing: &Listing) -> [Option<f64>; 7] {
    [
        listing.floor_area,
        listing.building_age,
        listing.floor_number.map(|v| v as f64),
        listing.total_floors.map(|v| v as f64),
        listing.station_distance,
        listing.management_fee.map(|v| v as f64),
        listing.repair_reserve_fund.map(|v| v as f64),
    ]
}

/// Derives one listing without any imputation.
pub fn derive_row(listing: &Listing) -> DerivedRow {
    derive_with_base(listing, base_numerics(listing))
}

pub fn derive_rows(listings: &[Listing], imputation: Imputation) -> Vec<DerivedRow> {
    let mut bases: Vec<[Option<f64>; 7]> = listings.iter().map(base_numerics).collect();

    if imputation == Imputation::BatchMedian {
        for column in 0..BASE_NUMERIC_COLUMNS.len() {
            let present: Vec<f64> = bases.iter().filter_map(|b| b[column]).collect();
            if let Some(fill) = median(&present) {
                for base in bases.iter_mut() {
                    base[column].get_or_insert(fill);
                }
            }
        }
    }

    listings
        .iter()
        .zip(bases)
        .map(|(listing, base)| derive_with_base(listing, base))
        .collect()
}

fn derive_with_base(listing: &Listing, base: [Option<f64>; 7]) -> DerivedRow {
    let [floor_area, building_age, floor_number, total_floors, station_distance, management_fee, _] = base;

    let building_age_squared = building_age.map(|age| age * age);
    let mgmt_fee_per_sqm = finite(management_fee.zip(floor_area).map(|(fee, area)| fee / (area + 1.0)));
    let floor_ratio = finite(floor_number.zip(total_floors).map(|(floor, total)| floor / (total + 1.0)));
    let room_count = Some(extract_room_count(listing.layout.as_deref()) as f64);

    let category = |value: &Option<String>| Some(value.clone().unwrap_or_else(|| UNKNOWN_CATEGORY.to_string()));
    let banded = |value: Option<f64>, bands: Bands| value.map(|v| band(v, bands).to_string());

    DerivedRow {
        base,
        derived: [building_age_squared, mgmt_fee_per_sqm, floor_ratio, room_count],
        categories: [
            category(&listing.prefecture),
            category(&listing.city),
            category(&listing.layout),
            category(&listing.structure),
            category(&listing.direction),
            banded(station_distance, STATION_BANDS),
            banded(building_age, AGE_BANDS),
            banded(floor_area, AREA_BANDS),
        ],
    }
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

type Bands = (&'static [f64], &'static [&'static str]);

/// Left-open, right-closed banding starting at zero. Values at or below zero
/// and NaN fall outside every band.
pub fn band(value: f64, (edges, labels): Bands) -> &'static str {
    if value.is_nan() || value <= 0.0 {
        return UNKNOWN_CATEGORY;
    }
    edges
        .iter()
        .position(|edge| value <= *edge)
        .map_or(labels[labels.len() - 1], |i| labels[i])
}

pub fn station_distance_category(minutes: f64) -> &'static str {
    band(minutes, STATION_BANDS)
}

pub fn age_category(years: f64) -> &'static str {
    band(years, AGE_BANDS)
}

pub fn area_category(square_meters: f64) -> &'static str {
    band(square_meters, AREA_BANDS)
}

/// First integer in a layout code such as "2LDK"; 1 when there is none.
pub fn extract_room_count(layout: Option<&str>) -> u32 {
    let Some(layout) = layout else {
        return 1;
    };
    let digits: String = layout
        .chars()
        .skip_while(|c| ascii_digit(*c).is_none())
        .map_while(ascii_digit)
        .collect();
    digits.parse().unwrap_or(1)
}

// Full-width digits show up in scraped Japanese layout codes.
fn ascii_digit(c: char) -> Option<char> {
    match c {
        '0'..='9' => Some(c),
        '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32),
        _ => None,
    }
}
