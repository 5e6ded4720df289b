//! Model Manager - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use model_manager::{
    DownloadSource, GenerateParams, InferenceEngine, ManagerConfig, ModelFormat, ModelInfo,
    ModelManager, ModelRegistry, PerformanceTracker, ResponseCache, StateManager, SystemSampler,
    metrics,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "model-manager")]
#[command(about = "Local AI model lifecycle manager", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the models directory and hub cache for artifacts
    Discover {
        /// Register everything found
        #[arg(long)]
        register: bool,
    },
    /// List registered models
    List,
    /// Register a model artifact
    Register {
        /// Unique model id
        id: String,
        /// Artifact path (file or directory)
        #[arg(long)]
        path: PathBuf,
        /// Display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Remove a model from the registry
    Remove { id: String },
    /// Download a model from the hub or a URL
    Download {
        /// Model id to download as
        model_id: String,
        /// Hugging Face repository (e.g. "org/name")
        #[arg(long, conflicts_with = "url")]
        repo: Option<String>,
        /// Direct URL (http(s):// or file://)
        #[arg(long)]
        url: Option<String>,
        /// Skip registration after completion
        #[arg(long)]
        no_register: bool,
    },
    /// Load a model to verify its artifact, then release it
    Verify { id: String },
    /// Run a generation call through cache, loader and adapter
    Generate {
        model_id: String,
        prompt: String,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        top_p: Option<f32>,
    },
    /// Print the performance report for a model
    Report {
        model_id: String,
        /// Clear the model's records after reporting
        #[arg(long)]
        reset: bool,
    },
    /// Print cache statistics, system usage and Prometheus metrics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
    }

    // Load configuration
    let config = ManagerConfig::load(cli.config)?;
    config.validate()?;

    tracing::info!(
        models_dir = ?config.models_dir,
        state_file = ?config.state_file,
        cache_backend = ?config.cache.backend,
        "Configuration loaded"
    );

    // Setup metrics
    let prometheus_handle = metrics::setup_metrics()?;

    // Wire components
    let registry = Arc::new(ModelRegistry::new());
    let state_manager = StateManager::new(config.state_file.clone(), registry.clone());
    state_manager.restore().await?;

    let manager = Arc::new(
        ModelManager::from_config(&config, registry.clone())
            .context("Failed to construct model manager")?,
    );
    let cache = Arc::new(
        ResponseCache::from_config(&config.cache)
            .await
            .context("Failed to open response cache")?,
    );
    let tracker = PerformanceTracker::new(config.performance.enabled);
    let engine = InferenceEngine::new(manager.clone(), cache.clone(), tracker.clone());

    // Background CPU/memory gauges, independent of any inference call
    let sampler_handle = config.performance.enabled.then(|| {
        Arc::new(SystemSampler::new()).spawn(std::time::Duration::from_secs(
            config.performance.system_sample_interval_secs,
        ))
    });

    match cli.command {
        Commands::Discover { register } => {
            let discovered = manager.discover_models();
            for info in &discovered {
                println!(
                    "{}\t{}\t{}\t{}",
                    info.id,
                    info.format,
                    human_bytes(info.size_bytes),
                    info.path.display()
                );
            }
            if register {
                for info in discovered {
                    manager.register_model(info).await;
                }
                state_manager.save().await?;
            }
        }

        Commands::List => {
            for info in manager.get_all_models().await {
                println!(
                    "{}\t{}\t{}\t{}",
                    info.id,
                    info.format,
                    human_bytes(info.size_bytes),
                    info.path.display()
                );
            }
        }

        Commands::Register {
            id,
            path,
            name,
            description,
        } => {
            let format = ModelFormat::from_path(&path)
                .with_context(|| format!("Unrecognized model format: {:?}", path))?;
            let mut info = ModelInfo::new(&id, format, &path)
                .with_size(model_manager::models::discovery::artifact_size(&path));
            if let Some(name) = name {
                info = info.with_name(name);
            }
            if let Some(description) = description {
                info = info.with_description(description);
            }
            manager.register_model(info).await;
            state_manager.save().await?;
            println!("registered {id}");
        }

        Commands::Remove { id } => {
            manager.remove_model(&id).await?;
            state_manager.save().await?;
            println!("removed {id}");
        }

        Commands::Download {
            model_id,
            repo,
            url,
            no_register,
        } => {
            let source = match (repo, url) {
                (Some(repo), None) => DownloadSource::Hub { repo },
                (None, Some(url)) => DownloadSource::Url { url },
                _ => anyhow::bail!("Specify exactly one of --repo or --url"),
            };

            let downloads = model_manager::DownloadManager::new(&config, registry.clone());
            let task = downloads.download_from_source(source, &model_id, !no_register);

            let progress = watch_download(&task).await;
            match progress.status {
                model_manager::DownloadStatus::Completed => {
                    if !no_register {
                        state_manager.save().await?;
                    }
                    println!("downloaded {model_id}");
                }
                status => {
                    anyhow::bail!(
                        "download {status}: {}",
                        progress.error.unwrap_or_else(|| "no detail".to_string())
                    );
                }
            }
        }

        Commands::Verify { id } => {
            manager.load_model(&id).await?;
            manager.unload_model(&id).await?;
            println!("ok {id}");
        }

        Commands::Generate {
            model_id,
            prompt,
            max_tokens,
            temperature,
            top_p,
        } => {
            let params = GenerateParams {
                max_tokens,
                temperature,
                top_p,
                ..Default::default()
            };
            let outcome = engine.generate(&model_id, &prompt, &params).await?;
            if outcome.cached {
                tracing::info!(model_id = %model_id, "Response served from cache");
            }
            println!("{}", outcome.output.text);
        }

        Commands::Report { model_id, reset } => {
            match tracker.report(&model_id) {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => println!("no records for {model_id}"),
            }
            if reset {
                tracker.reset(&model_id);
            }
        }

        Commands::Stats => {
            let sampler = SystemSampler::new();
            let sample = sampler.sample();
            println!(
                "cache: {:?}  entries: {}",
                cache.stats(),
                cache.len().await.unwrap_or(0)
            );
            println!("registered models: {}", registry.count().await);
            println!(
                "system: cpu {:.1}%  memory {} / {}",
                sample.cpu_percent,
                human_bytes(sample.memory_used_bytes),
                human_bytes(sample.memory_total_bytes)
            );
            print!("{}", prometheus_handle.render());
        }
    }

    if let Some(handle) = sampler_handle {
        handle.abort();
    }

    Ok(())
}

/// Poll a download task, echoing progress until it finishes
async fn watch_download(
    task: &model_manager::DownloadTask,
) -> model_manager::download::DownloadProgress {
    let mut last_percent = -1.0f64;
    loop {
        let progress = task.progress();
        if progress.status.is_terminal() {
            return progress;
        }
        if (progress.percent - last_percent).abs() >= 1.0 {
            last_percent = progress.percent;
            eprintln!(
                "{} {:5.1}%  {}  {}/s",
                progress.status,
                progress.percent,
                human_bytes(progress.bytes_downloaded),
                human_bytes(progress.bytes_per_sec as u64)
            );
        }
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    }
}

fn human_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
