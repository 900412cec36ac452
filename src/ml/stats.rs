use crate::model::Listing;
use tracing::info;

/// Median of the given values, `None` for an empty slice.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Population mean and standard deviation.
pub fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
    Some((mean, variance.sqrt()))
}

/// Keeps listings whose price lies within `mean ± n_std · std` (bounds inclusive).
/// Listings without a price are dropped.
pub fn remove_outliers(listings: &[Listing], n_std: f64) -> Vec<Listing> {
    let prices: Vec<f64> = listings
        .iter()
        .filter_map(|l| l.price)
        .map(|p| p as f64)
        .collect();

    let Some((mean, std)) = mean_and_std(&prices) else {
        return Vec::new();
    };
    let lower = mean - n_std * std;
    let upper = mean + n_std * std;

    let kept: Vec<Listing> = listings
        .iter()
        .filter(|l| {
            l.price
                .map(|p| (p as f64) >= lower && (p as f64) <= upper)
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    info!(
        "Outlier removal: {} -> {} listings (bounds {:.0}..={:.0})",
        listings.len(),
        kept.len(),
        lower,
        upper
    );
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::sample_listing;

    fn with_prices(prices: &[i64]) -> Vec<Listing> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let mut l = sample_listing(&format!("https://example.jp/{}", i));
                l.price = Some(p);
                l
            })
            .collect()
    }

    #[test]
    fn median_of_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn single_spike_in_five_stays_within_three_sigma() {
        // mean 2080, population std 3960: 10000 is well inside mean + 3σ.
        let listings = with_prices(&[100, 100, 100, 100, 10_000]);
        let kept = remove_outliers(&listings, 3.0);
        assert_eq!(kept.len(), 5);

        // With a tighter band the spike goes.
        let kept = remove_outliers(&listings, 1.5);
        assert_eq!(kept.len(), 4);
        assert!(kept.iter().all(|l| l.price == Some(100)));
    }

    #[test]
    fn bounds_are_inclusive() {
        // mean 1, std 1: bounds are exactly [0, 2].
        let listings = with_prices(&[0, 2]);
        let kept = remove_outliers(&listings, 1.0);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn listings_without_price_are_dropped() {
        let mut listings = with_prices(&[100, 110, 120]);
        listings[1].price = None;
        let kept = remove_outliers(&listings, 3.0);
        assert_eq!(kept.len(), 2);
    }
}
