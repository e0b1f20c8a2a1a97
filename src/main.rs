//! remote-resource-s3 -- resolve and fetch the objects a `RemoteResourceS3`
//! declares.
//!
//! `run` performs reconciliation passes against a resource manifest,
//! optionally repeating on an interval until SIGINT/SIGTERM.  `expand` only
//! performs directory expansion and prints the resulting resource.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use remote_resource_s3::config::{apply_env_overrides, load_config, Config, LoggingConfig};
use remote_resource_s3::controller::{DownloadController, S3Controller};
use remote_resource_s3::dispatch::S3Engine;
use remote_resource_s3::reconcile::{reconcile, ReconcileReport};
use remote_resource_s3::resource::load_resource;
use remote_resource_s3::secrets::{FileSecretStore, KubeSecretStore, SecretStore};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "remote-resource-s3",
    version,
    about = "Resolve credentials and expand S3 directory requests for remote resources"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Expand directories and download every request.
    Run {
        /// Resource manifest (YAML or JSON).
        #[arg(short, long)]
        resource: PathBuf,

        /// Write downloaded bodies into this directory.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Repeat every N seconds until interrupted.
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Expand directories and print the resulting resource.
    Expand {
        /// Resource manifest (YAML or JSON).
        #[arg(short, long)]
        resource: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load configuration from {path}"))?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config);
    init_tracing(&config.logging);

    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path);
    }

    if config.observability.metrics {
        remote_resource_s3::metrics::init_metrics()?;
        remote_resource_s3::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let namespace = config.kube.current_namespace();
    let secrets = build_secret_store(&config, &namespace)?;
    let engine = Arc::new(S3Engine::new(&config, secrets)?);

    match cli.command {
        Command::Run {
            resource,
            output,
            interval,
        } => {
            let pass = || run_pass(&engine, &config, &namespace, &resource, output.as_deref());
            match interval {
                None => pass().await?,
                Some(secs) => {
                    let shutdown = shutdown_signal();
                    tokio::pin!(shutdown);
                    loop {
                        if let Err(e) = pass().await {
                            error!("Reconciliation pass failed: {:#}", e);
                        }
                        tokio::select! {
                            _ = &mut shutdown => break,
                            _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                        }
                    }
                }
            }
        }
        Command::Expand { resource } => {
            let manifest = load_resource(&resource)
                .with_context(|| format!("failed to load resource {}", resource.display()))?;
            let mut controller = S3Controller::new(engine, manifest, &namespace);
            controller.added().await?;
            print!("{}", serde_yaml::to_string(controller.resource())?);
        }
    }

    info!("remote-resource-s3 finished");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_secret_store(config: &Config, namespace: &str) -> anyhow::Result<Arc<dyn SecretStore>> {
    match config.secrets.backend.as_str() {
        "kube" => {
            let store = KubeSecretStore::new(&config.kube)?;
            info!("Kubernetes secret store using {}", config.kube.api_server);
            Ok(Arc::new(store))
        }
        "file" => {
            let path = config.secrets.file.as_ref().ok_or_else(|| {
                anyhow::anyhow!("secrets.backend is 'file' but secrets.file is not set")
            })?;
            let store = FileSecretStore::load(path, namespace)?;
            info!("Loaded {} secrets from {}", store.len(), path);
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("unknown secrets.backend '{other}'"),
    }
}

/// Load the manifest, reconcile it and write the results out.
async fn run_pass(
    engine: &Arc<S3Engine>,
    config: &Config,
    namespace: &str,
    resource: &Path,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let manifest = load_resource(resource)
        .with_context(|| format!("failed to load resource {}", resource.display()))?;
    let name = manifest.display_name();
    let mut controller = S3Controller::new(Arc::clone(engine), manifest, namespace);
    let report = reconcile(&mut controller)
        .await
        .with_context(|| format!("reconciliation of {name} failed"))?;

    match output {
        Some(dir) => write_report(dir, &report)?,
        None => {
            for fetched in &report.fetched {
                info!(
                    "Fetched {} ({} bytes)",
                    fetched.url,
                    fetched.response.body.len()
                );
            }
        }
    }

    if let Some(path) = &config.observability.metrics_textfile {
        remote_resource_s3::metrics::write_textfile(path)
            .with_context(|| format!("failed to write metrics to {path}"))?;
    }
    Ok(())
}

/// Write each fetched body to `dir` as `{index}-{object name}`.
fn write_report(dir: &Path, report: &ReconcileReport) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    for (index, fetched) in report.fetched.iter().enumerate() {
        let file = dir.join(format!("{index:04}-{}", file_name_for(&fetched.url)));
        std::fs::write(&file, &fetched.response.body)
            .with_context(|| format!("failed to write {}", file.display()))?;
        info!("Wrote {} to {}", fetched.url, file.display());
    }
    Ok(())
}

fn file_name_for(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .map(|segment| {
            percent_encoding::percent_decode_str(&segment)
                .decode_utf8_lossy()
                .replace(['/', '\\'], "_")
        })
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .unwrap_or_else(|| "object".to_string())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
