// Utility functions
use sha2::{Digest, Sha256};

/// Stable listing identifier: hex SHA-256 of the source URL.
pub fn listing_id_from_url(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// Formats a yen amount the way listing sites print it (億円 / 万円 / 円).
pub fn format_price(price: i64) -> String {
    if price >= 100_000_000 {
        format!("{:.2}億円", price as f64 / 100_000_000.0)
    } else if price >= 10_000 {
        format!("{:.0}万円", price as f64 / 10_000.0)
    } else {
        format!("{}円", price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_id_is_stable_per_url() {
        let a = listing_id_from_url("https://suumo.jp/ms/chuko/123/");
        let b = listing_id_from_url("https://suumo.jp/ms/chuko/123/");
        let c = listing_id_from_url("https://suumo.jp/ms/chuko/124/");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn formats_prices_by_magnitude() {
        assert_eq!(format_price(150_000_000), "1.50億円");
        assert_eq!(format_price(45_000_000), "4500万円");
        assert_eq!(format_price(9_800), "9800円");
    }
}
