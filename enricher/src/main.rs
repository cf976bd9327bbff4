//! Batch enrichment CLI.
//!
//! Selects every document matching a correlation identifier and asynchronously applies a
//! partial-update payload to each of them, printing a summary of the run. Exits non-zero
//! on configuration or selection errors; per-document update failures are reported in
//! the summary without failing the run.

use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use enrich::config::{BatchConfig, FilterConfig, JobConfig, StoreConfig};
use enrich::enrich_error;
use enrich::error::{EnrichResult, ErrorKind};
use enrich::job::EnrichmentJob;
use enrich::store::http::HttpStore;
use enrich::types::JobSummary;

#[derive(Debug, Parser)]
#[command(name = "enricher", version, about = "Batch-enrich documents matching a correlation ID")]
struct AppArgs {
    /// Hostname of the document store's HTTP API
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port of the document store's HTTP API
    #[arg(long, default_value = "9200")]
    port: u16,

    /// Namespace (index) holding the documents; defaults to today's logstash index
    #[arg(long)]
    namespace: Option<String>,

    /// Document kind (type) within the namespace
    #[arg(long, default_value = "audit_log")]
    kind: String,

    /// Name of the field that contains the correlation ID
    #[arg(long, default_value = "correlation.id")]
    field: String,

    /// Value of the correlation field - ALL documents matching will be updated
    #[arg(long)]
    value: String,

    /// JSON document merged into every matched document; the default is a no-op
    #[arg(long, default_value = "{}")]
    json: String,

    /// Create missing documents instead of failing their updates
    #[arg(long)]
    upsert: bool,

    /// Number of concurrent workers draining the mutation queue
    #[arg(long, default_value = "10")]
    max_workers: usize,

    /// Maximum number of operations per bulk dispatch call
    #[arg(long, default_value = "10")]
    batch_size: usize,

    /// Maximum time in milliseconds to wait for a batch to fill before dispatching
    #[arg(long, default_value = "60000")]
    flush_interval_ms: u64,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "enricher=info,enrich=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args = AppArgs::parse();

    match run(args).await {
        Ok(summary) => print_summary(&summary),
        Err(err) => {
            error!("enrichment failed: {err}");
            std::process::exit(1);
        }
    }
}

async fn run(args: AppArgs) -> EnrichResult<JobSummary> {
    let payload: serde_json::Value = serde_json::from_str(&args.json).map_err(|err| {
        enrich_error!(
            ErrorKind::ConfigError,
            "Unable to parse the update document into well formed JSON",
            source: err
        )
    })?;

    let namespace = args
        .namespace
        .unwrap_or_else(|| Utc::now().format("logstash-%Y.%m.%d").to_string());

    let config = JobConfig {
        store: StoreConfig {
            host: args.host,
            port: args.port,
        },
        namespace,
        kind: args.kind,
        filter: FilterConfig {
            field: args.field,
            value: args.value,
        },
        payload,
        upsert: args.upsert,
        page_size: JobConfig::DEFAULT_PAGE_SIZE,
        batch: BatchConfig {
            max_size: args.batch_size,
            max_fill_ms: args.flush_interval_ms,
        },
        max_workers: args.max_workers,
    };

    let store = HttpStore::new(&config.store)?;

    let mut job = EnrichmentJob::new(config, store);
    job.start().await?;
    job.wait().await
}

fn print_summary(summary: &JobSummary) {
    if summary.total_selected == 0 {
        info!("no documents matched the filter, nothing to do");
    } else if summary.is_full_success() {
        info!(
            selected = summary.total_selected,
            succeeded = summary.total_succeeded,
            "all matched documents enriched"
        );
    } else {
        warn!(
            selected = summary.total_selected,
            succeeded = summary.total_succeeded,
            failed = summary.total_failed,
            "some updates were rejected, the failures below were not applied"
        );
        for failure in &summary.failures {
            warn!(target = %failure.target, outcome = ?failure.outcome, "update failed");
        }
    }

    println!(
        "selected={} succeeded={} failed={}",
        summary.total_selected, summary.total_succeeded, summary.total_failed
    );
}
