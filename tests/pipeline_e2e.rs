use estate_sniper::config::AppConfig;
use estate_sniper::ml::{ModelTrainer, PricePredictor, TrainerStatus};
use estate_sniper::model::ListingFilter;
use estate_sniper::normalizer::normalize_all;
use estate_sniper::sample::generate_listings;
use estate_sniper::storage::{ListingStore, SqliteStorage};
use tempfile::tempdir;

#[test]
fn train_score_and_query_bargains() {
    let dir = tempdir().unwrap();
    let mut config = AppConfig {
        model_dir: dir.path().join("models"),
        ..AppConfig::default()
    };
    config.boosting.n_estimators = 80;
    config.boosting.early_stopping_rounds = 15;

    let storage = SqliteStorage::in_memory().unwrap();
    let mut listings = generate_listings(250, 99);
    // One listing is deliberately underpriced.
    listings[0].price = listings[0].price.map(|p| p / 2);
    normalize_all(&mut listings);
    assert_eq!(storage.save_listings(&listings), 250);

    let training_set = storage.fetch_trainable_listings().unwrap();
    let mut trainer = ModelTrainer::new(config.training.clone(), config.boosting.clone());
    let metrics = trainer
        .train(&training_set, config.training.remove_outliers)
        .unwrap();
    assert!(metrics.val_rmse > 0.0);
    trainer
        .save_model(&config.model_path(), &config.metadata_path())
        .unwrap();
    assert_eq!(trainer.status(), TrainerStatus::Persisted);

    let mut predictor = PricePredictor::new(config.model_path());
    let all = storage.fetch_listings(&ListingFilter::default()).unwrap();
    let scored = predictor.predict(&all).unwrap();
    assert_eq!(scored.len(), all.len());

    let records = predictor.create_prediction_records(&scored).unwrap();
    let version = predictor.artifact().unwrap().model_version();
    assert!(records.iter().all(|r| r.model_version == version));
    assert_eq!(storage.write_predictions(&records), records.len());

    let threshold = 20.0;
    let from_store = storage.fetch_bargains(threshold, 100).unwrap();
    let from_predictor = predictor.find_bargain_properties(&all, threshold).unwrap();
    assert_eq!(from_store.len(), from_predictor.len());
    assert!(from_store.iter().all(|(_, p)| p.discount_rate >= threshold));
    assert!(from_store
        .windows(2)
        .all(|w| w[0].1.discount_rate >= w[1].1.discount_rate));
    assert!(
        from_store.iter().any(|(l, _)| l.id == listings[0].id),
        "halved listing should be flagged"
    );

    let metadata = ModelTrainer::load_metadata(&config.metadata_path())
        .unwrap()
        .unwrap();
    assert_eq!(metadata.trained_at.to_rfc3339(), version);
}
