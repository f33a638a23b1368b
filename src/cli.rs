//! CLI commands for f1-predict.
//!
//! Supports API server mode, session ingestion, training and CLI prediction.

use anyhow::Context;
use chrono::Duration as ChronoDuration;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::features::{FeatureBuilder, FeatureSchema, FeatureVector};
use crate::metrics::EvaluationReport;
use crate::pipeline::{self, TrainingOptions};
use crate::predictor::Predictor;
use crate::registry::ModelRegistry;
use crate::storage::{CachedSource, CsvDirectorySource, RaceRepository, SessionCache, SessionSource};
use crate::trainer::ModelArtifact;
use crate::types::{PredictRequest, PredictResponse, RankedDriver};

#[derive(Parser)]
#[command(name = "f1-predict")]
#[command(version, about = "F1 race winner prediction: training pipeline, API and CLI", long_about = None)]
pub struct Cli {
    /// Config file (defaults to ./config.* when present)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Load session exports into the local database
    Ingest {
        /// Directory of <race_id>.csv exports
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Bypass the session cache
        #[arg(long)]
        no_cache: bool,

        /// Clear the session cache before reading
        #[arg(long)]
        refresh: bool,
    },

    /// Print the pre-race feature table for stored races
    Features {
        /// Only this race
        #[arg(short, long)]
        race: Option<String>,

        /// Rolling window override
        #[arg(short, long)]
        window: Option<usize>,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Train a model on stored races and publish it
    Train {
        /// Rolling window override
        #[arg(short, long)]
        window: Option<usize>,

        /// Number of trees override
        #[arg(short = 'n', long)]
        ensemble_size: Option<usize>,

        /// Random seed override (forest and split)
        #[arg(short, long)]
        seed: Option<u64>,

        /// Maximum tree depth override
        #[arg(long)]
        max_depth: Option<usize>,

        /// Held-out fraction override
        #[arg(long)]
        test_fraction: Option<f64>,

        /// Abort after this many seconds without publishing
        #[arg(long)]
        timeout: Option<u64>,

        /// Train and evaluate only; do not publish
        #[arg(long)]
        dry_run: bool,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Predict a race from a request JSON file
    Predict {
        /// Path to request JSON ({"race": {...}, "drivers": [...]})
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Input holds prepared feature vectors, as printed by `features --format json`
        #[arg(long)]
        features: bool,

        /// Output format (json, table)
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Show the feature schema of the current model
    Schema {
        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// List model versions, or make an earlier one current
    Rollback {
        /// Version to republish; lists versions when omitted
        #[arg(value_name = "VERSION")]
        version: Option<String>,
    },
}

/// Ingest session exports through the cache into the repository.
pub async fn run_ingest(
    config: &AppConfig,
    dir: Option<PathBuf>,
    no_cache: bool,
    refresh: bool,
) -> anyhow::Result<()> {
    let dir = dir.unwrap_or_else(|| config.storage.sessions_dir.clone());
    eprintln!("Reading sessions from: {}", dir.display());

    let csv = CsvDirectorySource::new(&dir);
    let source: Box<dyn SessionSource> = if no_cache {
        Box::new(csv)
    } else {
        let cache = SessionCache::new(
            config.cache.dir.clone(),
            ChronoDuration::hours(config.cache.ttl_hours),
        );
        if refresh {
            eprintln!("Clearing session cache: {}", config.cache.dir.display());
            cache.clear()?;
        } else {
            eprintln!("Session cache TTL: {}h", cache.ttl().num_hours());
        }
        Box::new(CachedSource::new(csv, cache))
    };

    let mut repo = RaceRepository::new(&config.storage.db_path)?;
    let races = source.list_races()?;
    eprintln!("Found {} races", races.len());

    let mut total_inserted = 0;
    for race_id in &races {
        if !refresh && repo.race_exists(race_id)? {
            eprintln!("  {}: already stored, skipping", race_id);
            continue;
        }
        let records = source.fetch_session(race_id)?;
        let inserted = repo.insert_records(&records)?;
        total_inserted += inserted;
        eprintln!("  {}: {} rows ({} new)", race_id, records.len(), inserted);
    }

    eprintln!(
        "Ingested {} new rows; database now holds {} races / {} rows",
        total_inserted,
        repo.race_count()?,
        repo.record_count()?
    );
    Ok(())
}

/// Print the historical feature table.
pub async fn run_features(
    config: &AppConfig,
    race: Option<String>,
    window: Option<usize>,
    format: String,
) -> anyhow::Result<()> {
    let repo = RaceRepository::new(&config.storage.db_path)?;
    let records = repo.all_records()?;
    eprintln!("Loaded {} rows", records.len());

    let registry = ModelRegistry::new(&config.registry.dir)?;
    let schema = match (published_schema(&registry)?, window) {
        // Exactly what the published model scores
        (Some(schema), None) => schema,
        (previous, window) => pipeline::schema_for(
            &records,
            window.unwrap_or(config.features.rolling_window),
            previous.as_ref(),
        )?,
    };
    let builder = FeatureBuilder::new(schema);

    let vectors = match race {
        Some(race_id) => builder
            .build_for_race(&records, &race_id)
            .map(|(_, vectors)| vectors)
            .with_context(|| format!("Race not found: {}", race_id))?,
        None => pipeline::feature_table(&records, &builder),
    };

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&vectors)?),
        "table" => print_feature_table(builder.schema(), &vectors),
        _ => {
            eprintln!("Unknown format: {}. Using table.", format);
            print_feature_table(builder.schema(), &vectors);
        }
    }

    Ok(())
}

/// Train, evaluate and publish.
#[allow(clippy::too_many_arguments)]
pub async fn run_train(
    config: &AppConfig,
    window: Option<usize>,
    ensemble_size: Option<usize>,
    seed: Option<u64>,
    max_depth: Option<usize>,
    test_fraction: Option<f64>,
    timeout: Option<u64>,
    dry_run: bool,
    format: String,
) -> anyhow::Result<()> {
    let mut options: TrainingOptions = config.training_options();
    if let Some(w) = window {
        options.rolling_window = w;
    }
    if let Some(n) = ensemble_size {
        options.hyperparameters.ensemble_size = n;
    }
    if let Some(s) = seed {
        options.hyperparameters.random_seed = s;
        options.split_seed = s;
    }
    if max_depth.is_some() {
        options.hyperparameters.max_depth = max_depth;
    }
    if let Some(f) = test_fraction {
        options.test_fraction = f;
    }
    let timeout = timeout.or(config.training.timeout_secs);

    let repo = RaceRepository::new(&config.storage.db_path)?;
    let records = repo.all_records()?;
    eprintln!(
        "Training on {} rows from {} races",
        records.len(),
        repo.race_count()?
    );

    // New ids extend the published vocabularies; known ids keep their codes
    let registry = ModelRegistry::new(&config.registry.dir)?;
    let previous = published_schema(&registry)?;
    if let Some(schema) = &previous {
        eprintln!(
            "Extending vocabularies of the published model ({} drivers, {} teams)",
            schema.drivers.len(),
            schema.teams.len()
        );
    }

    let job = move || pipeline::train_from_records(&records, &options, previous.as_ref());
    let Some(result) = run_with_deadline(job, timeout.map(Duration::from_secs)).await? else {
        anyhow::bail!(
            "Training timed out after {}s; nothing was published",
            timeout.unwrap_or_default()
        );
    };
    let (artifact, report) = result?;

    if dry_run {
        eprintln!("Dry run: model {} not published", artifact.version);
    } else {
        let pointer = registry.save(&artifact)?;
        eprintln!("Published model {} ({})", pointer.version, pointer.blake3);
    }

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_report(&artifact, &report),
    }

    Ok(())
}

/// Run CLI prediction from file.
pub async fn run_predict(
    config: &AppConfig,
    input: PathBuf,
    features: bool,
    format: String,
) -> anyhow::Result<()> {
    eprintln!("Loading model from: {}", config.registry.dir.display());
    let predictor = Predictor::open(ModelRegistry::new(&config.registry.dir)?)?;

    // Read input file
    let input_json = std::fs::read_to_string(&input)
        .with_context(|| format!("Failed to read {}", input.display()))?;

    let (race_id, model_version, ranking) = if features {
        let vectors: Vec<FeatureVector> = serde_json::from_str(&input_json)?;
        if vectors.is_empty() {
            anyhow::bail!("No feature vectors provided");
        }
        let race_id = vectors[0].race_id.clone();
        if vectors.iter().any(|v| v.race_id != race_id) {
            anyhow::bail!("Feature vectors span more than one race");
        }
        eprintln!("Scoring {} prepared vectors for race {}", vectors.len(), race_id);

        let artifact = predictor.snapshot().ok_or(PipelineError::NoModelAvailable)?;
        let ranking = predictor.predict(&vectors)?;
        (race_id, artifact.version.clone(), ranking)
    } else {
        let req: PredictRequest = serde_json::from_str(&input_json)?;
        if req.drivers.is_empty() {
            anyhow::bail!("No drivers provided");
        }

        eprintln!("Processing race: {}", req.race.race_id);
        eprintln!("Drivers: {}", req.drivers.len());

        let repo = RaceRepository::new(&config.storage.db_path)?;
        let history = repo.records_before(&req.race)?;
        let (artifact, ranking) = predictor.predict_race(&history, &req.race, &req.drivers)?;
        (req.race.race_id, artifact.version.clone(), ranking)
    };

    let ranking: Vec<RankedDriver> = ranking
        .into_iter()
        .map(|(driver_id, win_probability)| RankedDriver {
            driver_id,
            win_probability,
        })
        .collect();
    let response = PredictResponse {
        race_id,
        model_version,
        predicted_winner: ranking.first().map(|r| r.driver_id.clone()),
        ranking,
    };

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&response)?),
        "table" => print_prediction_table(&response),
        _ => {
            eprintln!("Unknown format: {}. Using JSON.", format);
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}

/// Show the schema of the current model.
pub async fn run_schema(config: &AppConfig, format: String) -> anyhow::Result<()> {
    let registry = ModelRegistry::new(&config.registry.dir)?;
    let schema = registry.current_schema()?;

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&schema)?),
        _ => {
            println!("Encoding:       {}", schema.fingerprint());
            println!("Rolling window: {}", schema.rolling_window);
            println!("Drivers known:  {}", schema.drivers.len());
            println!("Teams known:    {}", schema.teams.len());
            if !schema.drivers.is_empty() {
                println!();
                let drivers: Vec<&str> = (1..=schema.drivers.len() as u32)
                    .filter_map(|code| schema.drivers.decode(code))
                    .collect();
                println!("Drivers: {}", drivers.join(", "));
            }
            println!();
            for (i, name) in schema.feature_names.iter().enumerate() {
                println!("  {:>2}  {}", i, name);
            }
        }
    }

    Ok(())
}

/// List versions or roll back to one.
pub async fn run_rollback(config: &AppConfig, version: Option<String>) -> anyhow::Result<()> {
    let registry = ModelRegistry::new(&config.registry.dir)?;

    match version {
        Some(version) => {
            let pointer = registry.rollback(&version)?;
            eprintln!("Current model is now {} ({})", pointer.version, pointer.blake3);
        }
        None => {
            let current = registry.current()?.map(|p| p.version);
            for v in registry.versions()? {
                let marker = if current.as_deref() == Some(v.as_str()) { "*" } else { " " };
                println!("{} {}", marker, v);
            }
        }
    }

    Ok(())
}

/// Schema of the published model, or `None` before the first publish.
fn published_schema(registry: &ModelRegistry) -> anyhow::Result<Option<FeatureSchema>> {
    match registry.current_schema() {
        Ok(schema) => Ok(Some(schema)),
        Err(PipelineError::NoModelAvailable) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Run `job` on its own thread and wait at most `limit` for its result.
///
/// Returns `None` on timeout. The thread is left detached and whatever it
/// produces later is dropped, so shutting down the runtime does not wait on it.
pub async fn run_with_deadline<T, F>(job: F, limit: Option<Duration>) -> anyhow::Result<Option<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::Builder::new()
        .name("f1-train".to_string())
        .spawn(move || {
            // The receiver is gone once the deadline has passed
            let _ = tx.send(job());
        })?;

    let received = match limit {
        Some(limit) => match tokio::time::timeout(limit, rx).await {
            Ok(received) => received,
            Err(_) => return Ok(None),
        },
        None => rx.await,
    };
    Ok(Some(received.context("training thread exited without a result")?))
}

/// Print prediction results in table format.
fn print_prediction_table(response: &PredictResponse) {
    println!("Race: {}  (model {})", response.race_id, response.model_version);
    println!();
    println!("=== Win Probabilities ===");
    for (i, r) in response.ranking.iter().enumerate() {
        println!("  {:>2}. {:<12} {:>6.2}%", i + 1, r.driver_id, r.win_probability * 100.0);
    }
}

fn print_feature_table(schema: &FeatureSchema, vectors: &[FeatureVector]) {
    print!("{:<10} {:<12}", "race", "driver");
    for name in &schema.feature_names {
        print!(" {:>10}", truncate(name, 10));
    }
    println!();
    for v in vectors {
        print!("{:<10} {:<12}", v.race_id, v.driver_id);
        for name in &schema.feature_names {
            match v.get(name) {
                Some(value) => print!(" {:>10.3}", value),
                None => print!(" {:>10}", "-"),
            }
        }
        println!();
    }
}

fn print_report(artifact: &ModelArtifact, report: &EvaluationReport) {
    println!("Model:    {}", artifact.version);
    println!("Trees:    {}", artifact.forest.trees.len());
    println!("Features: {}", artifact.schema.feature_names.len());
    println!("Train n:  {}", artifact.train_samples);
    println!();
    print!("{}", report.to_table());
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
