use crate::model::Listing;
use crate::utils::listing_id_from_url;

pub fn normalize_all(listings: &mut [Listing]) {
    for listing in listings.iter_mut() {
        normalize_listing(listing);
    }
}

/// Trims text fields, drops empty ones and fills a missing id from the URL hash.
pub fn normalize_listing(listing: &mut Listing) {
    listing.url = listing.url.trim().to_string();
    listing.source_site = listing.source_site.trim().to_string();

    for field in [
        &mut listing.prefecture,
        &mut listing.city,
        &mut listing.address,
        &mut listing.layout,
        &mut listing.structure,
        &mut listing.direction,
        &mut listing.nearest_station,
    ] {
        *field = field
            .take()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
    }

    if listing.id.trim().is_empty() {
        listing.id = listing_id_from_url(&listing.url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::sample_listing;

    #[test]
    fn blanks_become_missing_and_id_is_filled() {
        let mut listing = sample_listing("https://suumo.jp/ms/1/");
        listing.id = String::new();
        listing.city = Some("   ".into());
        listing.layout = Some(" 2LDK ".into());

        normalize_listing(&mut listing);

        assert_eq!(listing.id, listing_id_from_url("https://suumo.jp/ms/1/"));
        assert_eq!(listing.city, None);
        assert_eq!(listing.layout.as_deref(), Some("2LDK"));
    }
}
