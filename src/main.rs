use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use serde_json::json;
use stage_broker::config::{BackendKind, BrokerConfig};
use stage_broker::infrastructure::storage;
use stage_broker::{Content, Stage, StorageBackend, TelemetryClient};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Storage backend, overrides STORAGE_BACKEND (local, s3)
    #[arg(short, long)]
    backend: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create any missing stage directories or buckets
    Stage,
    /// Write a file or inline data into a stage
    Write {
        #[arg(short, long, default_value = "quarantine")]
        stage: Stage,
        /// Artifact key (default: random UUID)
        #[arg(short, long)]
        key: Option<String>,
        /// File to upload
        #[arg(conflicts_with = "data", required_unless_present = "data")]
        file: Option<PathBuf>,
        /// Inline content instead of a file
        #[arg(long)]
        data: Option<String>,
    },
    /// Copy an artifact between stages, keeping its key
    Copy {
        #[arg(long, default_value = "quarantine")]
        from: Stage,
        #[arg(long)]
        to: Stage,
        key: String,
    },
    /// Report whether an artifact exists
    Ls {
        #[arg(short, long, default_value = "quarantine")]
        stage: Stage,
        key: String,
    },
    /// Like ls, but fails when the artifact is missing
    Head {
        #[arg(short, long, default_value = "quarantine")]
        stage: Stage,
        key: String,
    },
    /// Probe stage locations, or one named directory/bucket
    UpCheck {
        #[arg(long)]
        name: Option<String>,
    },
    /// Check FULL_CONTROL grants on every stage bucket (s3 only)
    VerifyAcl,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stage_broker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = BrokerConfig::from_env();
    if let Some(backend) = &args.backend {
        config.backend = match backend.to_lowercase().as_str() {
            "local" => BackendKind::Local,
            "s3" => BackendKind::S3,
            other => bail!("unknown backend '{}', expected local or s3", other),
        };
    }

    let telemetry = TelemetryClient::new(config.telemetry.clone());
    let backend = storage::setup_storage(&config).await;
    info!("🚀 Stage broker using {} backend", backend.backend_name());

    let output = match args.command {
        Command::Stage => {
            backend.stage().await?;
            json!({ "staged": true })
        }
        Command::Write {
            stage,
            key,
            file,
            data,
        } => {
            let key = key.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
            let content = match (file, data) {
                (Some(path), _) => Content::File(path),
                (None, Some(data)) => Content::from(data),
                (None, None) => bail!("either a file or --data is required"),
            };

            let started = Instant::now();
            let receipt = backend.write(content, stage, &key).await?;
            let progress = receipt.progress.snapshot();
            telemetry
                .record_transfer("write", stage, progress.bytes_transferred, started.elapsed())
                .await;

            json!({ "location": receipt.location, "progress": progress })
        }
        Command::Copy { from, to, key } => {
            let started = Instant::now();
            let location = backend.copy(from, to, &key).await?;
            let bytes = backend
                .ls(to, &key)
                .await?
                .metadata()
                .map(|m| m.content_length)
                .unwrap_or(0);
            telemetry
                .record_transfer("copy", to, bytes, started.elapsed())
                .await;

            json!({ "location": location })
        }
        Command::Ls { stage, key } => serde_json::to_value(backend.ls(stage, &key).await?)?,
        Command::Head { stage, key } => serde_json::to_value(backend.head(stage, &key).await?)?,
        Command::UpCheck { name } => match name {
            Some(name) => {
                let up = backend.probe(&name).await;
                json!({ "name": name, "up": up })
            }
            None => {
                let mut report = serde_json::Map::new();
                for stage in Stage::ALL {
                    let up = backend.up_check(stage).await;
                    if !up {
                        error!("❌ Stage {} ({}) is down", stage, backend.location_name(stage));
                    }
                    report.insert(stage.to_string(), json!(up));
                }
                serde_json::Value::Object(report)
            }
        },
        Command::VerifyAcl => {
            if config.backend != BackendKind::S3 {
                bail!("verify-acl needs the s3 backend");
            }
            let object_store = storage::setup_object_storage(&config.object_store).await;
            let mut report = serde_json::Map::new();
            for stage in Stage::ALL {
                let grants = object_store
                    .verify_acl(stage)
                    .await
                    .with_context(|| format!("ACL check failed for stage {}", stage))?;
                let grants: Vec<serde_json::Value> = grants
                    .iter()
                    .map(|g| json!({ "grantee": g.grantee, "permission": g.permission }))
                    .collect();
                report.insert(
                    object_store.bucket(stage).to_string(),
                    serde_json::Value::Array(grants),
                );
            }
            serde_json::Value::Object(report)
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
