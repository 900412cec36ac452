//! Categorical encoder state shared between training and inference.
//!
//! The encoder is fitted exactly once on the training batch and then travels
//! inside the model artifact. Nothing mutates it after `fit`.

use crate::model::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Sentinel category for missing or out-of-band values.
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// What to do with a category that was never seen during fit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnseenCategoryPolicy {
    /// Fail with `UnknownCategory`.
    #[default]
    Reject,
    /// Map to a code reserved at fit time, one past the last known code.
    ReserveBucket,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CategoryCodes {
    codes: BTreeMap<String, u32>,
    unseen_code: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEncoder {
    policy: UnseenCategoryPolicy,
    columns: BTreeMap<String, CategoryCodes>,
}

impl CategoricalEncoder {
    /// Fits one code table per feature. Codes follow the sorted order of the
    /// distinct values, so the same batch always produces the same table.
    pub fn fit<'a>(
        policy: UnseenCategoryPolicy,
        columns: impl IntoIterator<Item = (&'a str, Vec<&'a str>)>,
    ) -> Self {
        let columns = columns
            .into_iter()
            .map(|(feature, values)| {
                let distinct: BTreeSet<&str> = values.into_iter().collect();
                let codes: BTreeMap<String, u32> = distinct
                    .into_iter()
                    .enumerate()
                    .map(|(code, value)| (value.to_string(), code as u32))
                    .collect();
                let unseen_code = match policy {
                    UnseenCategoryPolicy::Reject => None,
                    UnseenCategoryPolicy::ReserveBucket => Some(codes.len() as u32),
                };
                (feature.to_string(), CategoryCodes { codes, unseen_code })
            })
            .collect();

        Self { policy, columns }
    }

    pub fn encode(&self, feature: &str, value: &str) -> Result<u32, PipelineError> {
        let unknown = || PipelineError::UnknownCategory {
            feature: feature.to_string(),
            value: value.to_string(),
        };
        let table = self.columns.get(feature).ok_or_else(unknown)?;
        match table.codes.get(value) {
            Some(&code) => Ok(code),
            None => table.unseen_code.ok_or_else(unknown),
        }
    }

    /// Number of known categories for a feature, excluding any reserved bucket.
    pub fn category_count(&self, feature: &str) -> Option<usize> {
        self.columns.get(feature).map(|t| t.codes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefecture_encoder(policy: UnseenCategoryPolicy) -> CategoricalEncoder {
        CategoricalEncoder::fit(
            policy,
            [("prefecture", vec!["東京都", "神奈川県", "東京都"])],
        )
    }

    #[test]
    fn encoding_is_stable() {
        let encoder = prefecture_encoder(UnseenCategoryPolicy::Reject);
        let first = encoder.encode("prefecture", "東京都").unwrap();
        let second = encoder.encode("prefecture", "東京都").unwrap();
        assert_eq!(first, second);
        assert_eq!(encoder.category_count("prefecture"), Some(2));
    }

    #[test]
    fn codes_follow_sorted_order() {
        let encoder = CategoricalEncoder::fit(
            UnseenCategoryPolicy::Reject,
            [("layout", vec!["3LDK", "1K", "2LDK"])],
        );
        assert_eq!(encoder.encode("layout", "1K").unwrap(), 0);
        assert_eq!(encoder.encode("layout", "2LDK").unwrap(), 1);
        assert_eq!(encoder.encode("layout", "3LDK").unwrap(), 2);
    }

    #[test]
    fn unseen_category_is_rejected_by_default() {
        let encoder = prefecture_encoder(UnseenCategoryPolicy::default());
        let err = encoder.encode("prefecture", "大阪府").unwrap_err();
        match err {
            PipelineError::UnknownCategory { feature, value } => {
                assert_eq!(feature, "prefecture");
                assert_eq!(value, "大阪府");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn reserved_bucket_takes_unseen_values() {
        let encoder = prefecture_encoder(UnseenCategoryPolicy::ReserveBucket);
        assert_eq!(encoder.encode("prefecture", "大阪府").unwrap(), 2);
        assert_eq!(encoder.encode("prefecture", "北海道").unwrap(), 2);
        assert_eq!(encoder.encode("prefecture", "東京都").unwrap(), 0);
        assert_eq!(encoder.encode("prefecture", "神奈川県").unwrap(), 1);
    }

    #[test]
    fn unfitted_feature_is_an_error() {
        let encoder = prefecture_encoder(UnseenCategoryPolicy::ReserveBucket);
        assert!(encoder.encode("city", "横浜市").is_err());
    }
}
