use estate_sniper::config::{AppConfig, ConfigError, load_config};
use estate_sniper::ml::{
    BargainTier, ModelArtifact, ModelTrainer, PricePredictor, ScoredListing, TrainingMilestone,
};
use estate_sniper::model::{Listing, ListingFilter, PipelineError};
use estate_sniper::normalizer::normalize_all;
use estate_sniper::sample::generate_listings;
use estate_sniper::storage::{ListingStore, SqliteStorage};
use estate_sniper::utils::format_price;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize logging; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Panic occurred: {:?}", panic_info);
    }));

    let config: Arc<AppConfig> = match load_config("config.json") {
        Ok(cfg) => Arc::new(cfg),
        Err(ConfigError::Io(e)) if e.kind() == ErrorKind::NotFound => {
            warn!("config.json not found, using defaults");
            Arc::new(AppConfig::default())
        }
        Err(e) => {
            error!("Config load error: {}", e);
            return;
        }
    };

    let storage = match SqliteStorage::open(&config.database_path) {
        Ok(s) => Arc::new(Mutex::new(s)),
        Err(e) => {
            error!("Failed to initialize storage: {}", e);
            return;
        }
    };

    seed_if_empty(storage.clone(), &config).await;

    loop {
        run_cycle(storage.clone(), config.clone()).await;

        let Some(interval) = config.rescore_interval_seconds else {
            break;
        };
        info!("Waiting {}s until the next scoring run...", interval);
        sleep(Duration::from_secs(interval)).await;
    }
}

/// Fills an empty store with synthetic listings when configured to.
async fn seed_if_empty(storage: Arc<Mutex<SqliteStorage>>, config: &AppConfig) {
    if config.sample_listings == 0 {
        return;
    }
    let storage = storage.lock().await;
    match storage.listing_count() {
        Ok(0) => {
            let mut listings = generate_listings(config.sample_listings, config.training.random_state);
            normalize_all(&mut listings);
            let saved = storage.save_listings(&listings);
            info!("Seeded store with {} sample listings", saved);
        }
        Ok(count) => debug!("Store already holds {} listings", count),
        Err(e) => warn!("Listing count failed: {}", e),
    }
}

/// One maintenance, training and scoring pass over the store.
async fn run_cycle(storage: Arc<Mutex<SqliteStorage>>, config: Arc<AppConfig>) {
    info!("Starting scoring run...");

    let training_set = {
        let storage = storage.lock().await;
        match storage.delete_old_data(config.retention_days) {
            Ok(0) => {}
            Ok(n) => info!("Deleted {} listings older than {} days", n, config.retention_days),
            Err(e) => warn!("Retention cleanup failed: {}", e),
        }
        if let Ok(Some(latest)) = storage.last_scraped_at() {
            info!("Latest listing scraped at {}", latest);
        }
        match storage.fetch_trainable_listings() {
            Ok(listings) => listings,
            Err(e) => {
                error!("Failed to fetch training listings: {}", e);
                return;
            }
        }
    };

    let predictor = match train_and_save(training_set, config.clone()).await {
        Ok(artifact) => PricePredictor::from_artifact(config.model_path(), artifact),
        Err(PipelineError::InsufficientData { available, required }) => {
            warn!(
                "Not enough data to retrain ({} of {} rows); scoring with the last saved model",
                available, required
            );
            PricePredictor::new(config.model_path())
        }
        Err(e) => {
            error!("Training failed: {}", e);
            return;
        }
    };

    let listings = {
        let storage = storage.lock().await;
        match storage.fetch_listings(&ListingFilter::default()) {
            Ok(listings) => listings,
            Err(e) => {
                error!("Failed to fetch listings for scoring: {}", e);
                return;
            }
        }
    };

    let scored = tokio::task::spawn_blocking(move || {
        let mut predictor = predictor;
        let scored = score_listings(&mut predictor, &listings)?;
        predictor.create_prediction_records(&scored)
    })
    .await;

    let records = match scored {
        Ok(Ok(records)) => records,
        Ok(Err(e)) => {
            error!("Scoring failed: {}", e);
            return;
        }
        Err(e) => {
            error!("Scoring task panicked: {}", e);
            return;
        }
    };

    let storage = storage.lock().await;
    let written = storage.write_predictions(&records);
    info!("Stored {} of {} predictions", written, records.len());

    match storage.fetch_bargains(config.min_discount_rate, config.bargain_limit) {
        Ok(bargains) => {
            info!("Bargains at or above {:.1}%: {}", config.min_discount_rate, bargains.len());
            for (listing, prediction) in bargains.iter().take(10) {
                info!(
                    "[{}] {:.1}% | {} (predicted {}) | {} {} | {}",
                    BargainTier::from_rate(prediction.discount_rate).label(),
                    prediction.discount_rate,
                    format_price(prediction.actual_price),
                    format_price(prediction.predicted_price),
                    listing.prefecture.as_deref().unwrap_or("-"),
                    listing.city.as_deref().unwrap_or("-"),
                    listing.url
                );
            }
        }
        Err(e) => warn!("Bargain query failed: {}", e),
    }

    match storage.get_statistics() {
        Ok(stats) => info!(
            "Store: {} listings, {} predictions, average price {}",
            stats.total_listings,
            stats.total_predictions,
            format_price(stats.avg_price as i64)
        ),
        Err(e) => warn!("Statistics query failed: {}", e),
    }
}

/// Trains off the async runtime and persists the result, logging milestones as they arrive.
async fn train_and_save(listings: Vec<Listing>, config: Arc<AppConfig>) -> Result<ModelArtifact, PipelineError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<TrainingMilestone>();

    let progress = tokio::spawn(async move {
        while let Some(milestone) = rx.recv().await {
            match milestone {
                TrainingMilestone::DataLoaded { listings, usable_rows } => {
                    info!("Training data loaded: {} listings, {} usable rows", listings, usable_rows)
                }
                TrainingMilestone::SplitDone { train_rows, validation_rows } => {
                    info!("Split done: {} train / {} validation", train_rows, validation_rows)
                }
                TrainingMilestone::FitStarted => info!("Fit started..."),
                TrainingMilestone::FitComplete { best_iteration } => {
                    info!("Fit complete at iteration {}", best_iteration)
                }
            }
        }
    });

    let task = tokio::task::spawn_blocking(move || {
        let mut trainer = ModelTrainer::new(config.training.clone(), config.boosting.clone());
        trainer.train_with_progress(&listings, config.training.remove_outliers, |m| {
            let _ = tx.send(m);
        })?;
        trainer.save_model(&config.model_path(), &config.metadata_path())?;
        trainer.into_artifact().ok_or(PipelineError::NotTrained)
    });

    let result = match task.await {
        Ok(result) => result,
        Err(e) => Err(PipelineError::Io(std::io::Error::other(e))),
    };
    if let Err(e) = progress.await {
        warn!("Progress logger stopped: {}", e);
    }
    result
}

/// Scores the whole batch; an unseen category falls back to per-listing scoring so
/// one odd listing does not block the rest.
fn score_listings(predictor: &mut PricePredictor, listings: &[Listing]) -> Result<Vec<ScoredListing>, PipelineError> {
    match predictor.predict(listings) {
        Err(PipelineError::UnknownCategory { feature, value }) => {
            warn!(
                "Unseen {} '{}' in batch; scoring listings one at a time",
                feature, value
            );
            let mut scored = Vec::with_capacity(listings.len());
            let mut skipped = 0;
            for listing in listings {
                match predictor.predict(std::slice::from_ref(listing)) {
                    Ok(mut one) => scored.append(&mut one),
                    Err(PipelineError::UnknownCategory { .. }) => skipped += 1,
                    Err(e) => return Err(e),
                }
            }
            warn!("Skipped {} listings with unseen categories", skipped);
            Ok(scored)
        }
        other => other,
    }
}
