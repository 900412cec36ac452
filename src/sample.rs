// Synthetic listings for seeding an empty store and for tests
use crate::model::Listing;
use crate::utils::listing_id_from_url;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const CITIES: &[(&str, &[(&str, f64)])] = &[
    ("東京都", &[("渋谷区", 1.45), ("新宿区", 1.35), ("港区", 1.6), ("世田谷区", 1.2), ("目黒区", 1.3)]),
    ("神奈川県", &[("横浜市", 1.0), ("川崎市", 0.95), ("相模原市", 0.7), ("藤沢市", 0.8)]),
    ("埼玉県", &[("さいたま市", 0.8), ("川口市", 0.75), ("川越市", 0.65), ("所沢市", 0.6)]),
    ("千葉県", &[("千葉市", 0.7), ("市川市", 0.75), ("船橋市", 0.7), ("松戸市", 0.65)]),
];
const LAYOUTS: &[&str] = &["1K", "1DK", "1LDK", "2DK", "2LDK", "3DK", "3LDK"];
const STRUCTURES: &[&str] = &["RC造", "SRC造", "鉄骨造"];
const DIRECTIONS: &[&str] = &["南", "東", "西", "北", "南東", "南西"];

/// Yen per square meter for a new unit next to a station in a 1.0 city.
const BASE_PRICE_PER_SQM: f64 = 800_000.0;

/// Generates `count` plausible listings. The same seed always yields the same batch.
pub fn generate_listings(count: usize, seed: u64) -> Vec<Listing> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count).map(|i| random_listing(&mut rng, i, seed)).collect()
}

fn random_listing(rng: &mut StdRng, index: usize, seed: u64) -> Listing {
    let (prefecture, cities) = CITIES[rng.random_range(0..CITIES.len())];
    let (city, city_factor) = cities[rng.random_range(0..cities.len())];

    let floor_area = (rng.random_range(30.0..100.0_f64) * 100.0).round() / 100.0;
    let building_age = rng.random_range(0..=40) as f64;
    let station_distance = rng.random_range(1..=15) as f64;
    let total_floors = rng.random_range(5..=20_i64);
    let floor_number = rng.random_range(1..=total_floors);

    let age_factor = (1.0 - building_age * 0.015).max(0.35);
    let station_factor = 1.0 - station_distance * 0.01;
    let noise = rng.random_range(0.9..1.1);
    let raw = floor_area * BASE_PRICE_PER_SQM * city_factor * age_factor * station_factor * noise;
    // Listing sites quote prices in units of 10,000 yen.
    let price = ((raw / 10_000.0).round() as i64) * 10_000;

    let url = format!("https://suumo.jp/sample/{}/{}", seed, index);
    Listing {
        id: listing_id_from_url(&url),
        source_site: "SUUMO".to_string(),
        url,
        prefecture: Some(prefecture.to_string()),
        city: Some(city.to_string()),
        address: Some(format!(
            "{}{}{}-{}-{}",
            prefecture,
            city,
            rng.random_range(1..=10),
            rng.random_range(1..=20),
            rng.random_range(1..=30)
        )),
        price: Some(price),
        floor_area: Some(floor_area),
        building_age: Some(building_age),
        floor_number: Some(floor_number),
        total_floors: Some(total_floors),
        layout: Some(LAYOUTS[rng.random_range(0..LAYOUTS.len())].to_string()),
        structure: Some(STRUCTURES[rng.random_range(0..STRUCTURES.len())].to_string()),
        direction: Some(DIRECTIONS[rng.random_range(0..DIRECTIONS.len())].to_string()),
        nearest_station: Some(format!("{}駅", city)),
        station_distance: Some(station_distance),
        management_fee: Some(rng.random_range(5_000..=30_000)),
        repair_reserve_fund: Some(rng.random_range(3_000..=20_000)),
        scraped_at: Utc::now(),
    }
}

/// A single fully populated listing with fixed attributes.
pub fn sample_listing(url: &str) -> Listing {
    Listing {
        id: listing_id_from_url(url),
        source_site: "SUUMO".to_string(),
        url: url.to_string(),
        prefecture: Some("東京都".to_string()),
        city: Some("世田谷区".to_string()),
        address: Some("東京都世田谷区1-2-3".to_string()),
        price: Some(45_000_000),
        floor_area: Some(62.5),
        building_age: Some(12.0),
        floor_number: Some(4),
        total_floors: Some(10),
        layout: Some("2LDK".to_string()),
        structure: Some("RC造".to_string()),
        direction: Some("南".to_string()),
        nearest_station: Some("三軒茶屋駅".to_string()),
        station_distance: Some(7.0),
        management_fee: Some(15_000),
        repair_reserve_fund: Some(12_000),
        scraped_at: Utc::now(),
    }
}
