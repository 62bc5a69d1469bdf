//! bizintel - multi-source business intelligence collector
//!
//! A CLI tool that queries review, competitor, LLM research and loan data
//! providers for one business concurrently and exports the results.
//!
//! Exit codes:
//!   0 - Success (sources that failed are listed in the manifest)
//!   1 - Runtime error (invalid business, config, output directory, etc.)
//!   2 - At least one selected source failed and --strict was given

mod analysis;
mod cli;
mod config;
mod error;
mod models;
mod report;
mod sources;
mod workflow;

use analysis::Aggregator;
use anyhow::{Context, Result};
use cli::{Args, ReportFormat};
use config::{Config, CONFIG_FILE_NAME};
use indicatif::{ProgressBar, ProgressStyle};
use models::{BusinessDescriptor, SourceId, SourceStatus};
use report::export::run_prefix;
use report::{ArtifactSink, ExportWriter, FsArtifactSink, RunSummary};
use sources::{
    CompetitorsAdapter, Credentials, HttpProviderClient, LoansAdapter, ProviderClient,
    ResearchAdapter, RetryPolicy, ReviewsAdapter, SourceOptions,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Config is read before logging so that `general.verbose` applies.
    let config = match load_config(&args) {
        Ok(mut config) => {
            config.merge_with_args(&args);
            config
        }
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(config.log_level(&args));

    info!("bizintel v{}", env!("CARGO_PKG_VERSION"));
    debug!("Selected sources: {:?}", args.selected_sources());

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .bizintel.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   API keys are read from GOOGLE_API_KEY, OPENAI_API_KEY and SBA_API_KEY.");
    Ok(())
}

/// Initialize logging at the given level.
fn init_logging(level: tracing::Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run aggregation and export. Returns exit code (0 or 2).
async fn run(args: Args, config: Config) -> Result<i32> {
    let start_time = Instant::now();

    let location = args
        .location
        .clone()
        .unwrap_or_else(|| config.general.location.clone());
    let descriptor = BusinessDescriptor::new(
        args.name.clone().unwrap_or_default(),
        args.business_type.clone(),
        location,
        config.research.context.clone(),
    )
    .context("Invalid business description")?;

    let selected = args.selected_sources();
    let options = SourceOptions {
        radius_meters: config.places.radius_meters,
        state: args.state.clone(),
        loan_limit: config.loans.limit,
        eligibility: args.eligibility(),
    };

    let aggregator = build_aggregator(&config, &args.credentials())?;

    if args.dry_run {
        return handle_dry_run(&aggregator, &descriptor, &selected, &config);
    }

    println!("🔎 Researching: {}", descriptor.name());
    if let Some(business_type) = descriptor.business_type() {
        println!("   Type: {}", business_type);
    }
    println!("   Location: {}", descriptor.location());
    println!(
        "   Sources: {}",
        selected
            .iter()
            .map(SourceId::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let unique: BTreeSet<SourceId> = selected.iter().copied().collect();
    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(unique.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    };

    let writer = ExportWriter::to_dir(&config.general.output_dir);
    let outcome = workflow::run_with_progress(
        &aggregator,
        &writer,
        &descriptor,
        &selected,
        &options,
        |source, result, _| {
            progress.set_message(format!("{} {}", source.label(), result.status()));
            progress.inc(1);
        },
    )
    .await;
    progress.finish_and_clear();

    let duration = start_time.elapsed().as_secs_f64();
    let summary = RunSummary::new(&outcome.bundle, &outcome.export, duration);

    // Run report next to the artifacts
    let report_text = match args.report_format {
        ReportFormat::Json => report::generate_json_summary(&summary)?,
        ReportFormat::Markdown => report::generate_markdown_summary(&summary),
    };
    let sink = FsArtifactSink::new(&config.general.output_dir);
    let report_name = format!(
        "{}_report",
        run_prefix(descriptor.name(), outcome.bundle.created_at())
    );
    let report_path = sink
        .persist_text(&report_name, args.report_format.extension(), &report_text)
        .context("Failed to write run report")?;

    println!("\n📊 Run Summary:");
    for line in &summary.sources {
        if line.status == SourceStatus::Skipped {
            continue;
        }
        let records = line
            .records
            .map(|n| format!(" ({} records)", n))
            .unwrap_or_default();
        println!(
            "   {} {}: {}{}",
            line.status.emoji(),
            line.source.label(),
            line.status,
            records
        );
        if let Some(ref note) = line.note {
            println!("      {}", note);
        }
    }
    println!("   Files written: {}", outcome.export.artifacts.len());
    println!("   Duration: {:.1}s", duration);
    println!(
        "\n✅ Done! Output in {} (report: {})",
        config.general.output_dir.display(),
        report_path.display()
    );

    if args.strict && outcome.has_failures() {
        eprintln!("\n⛔ At least one source failed. Failing (exit code 2).");
        return Ok(2);
    }

    Ok(0)
}

/// Build the adapter registry from config and credentials.
///
/// A source whose adapter cannot be constructed is registered as unavailable
/// so that selecting it reports the configuration problem.
fn build_aggregator(config: &Config, credentials: &Credentials) -> Result<Aggregator> {
    let retry = RetryPolicy::with_retries(config.http.retries);
    let http = HttpProviderClient::new(config.http_timeout(), retry.clone())
        .context("Failed to set up HTTP client")?;
    let client: Arc<dyn ProviderClient> = Arc::new(http);

    let mut aggregator = Aggregator::new().with_default_timeout(config.source_timeout());

    match ReviewsAdapter::new(
        Arc::clone(&client),
        credentials.google_api_key.as_deref(),
        config.places.base_url.clone(),
    ) {
        Ok(adapter) => aggregator.register(Arc::new(adapter)),
        Err(e) => aggregator.register_unavailable(SourceId::Reviews, e),
    };

    match CompetitorsAdapter::new(
        Arc::clone(&client),
        credentials.google_api_key.as_deref(),
        config.competitors_settings(),
    ) {
        Ok(adapter) => aggregator.register(Arc::new(adapter)),
        Err(e) => aggregator.register_unavailable(SourceId::Competitors, e),
    };

    let research_client: Arc<dyn ProviderClient> = match credentials.openai_api_key.as_deref() {
        Some(key) => Arc::new(
            HttpProviderClient::new(config.research_timeout(), retry)
                .context("Failed to set up research HTTP client")?
                .with_bearer(key.trim()),
        ),
        None => Arc::clone(&client),
    };
    match ResearchAdapter::new(
        research_client,
        credentials.openai_api_key.as_deref(),
        config.research_settings(),
    ) {
        Ok(adapter) => aggregator.register(Arc::new(adapter)),
        Err(e) => aggregator.register_unavailable(SourceId::Research, e),
    };

    aggregator.register(Arc::new(LoansAdapter::new(
        client,
        credentials.sba_api_key.as_deref(),
        config.loans.base_url.clone(),
        config.loans.default_state.clone(),
    )));

    Ok(aggregator)
}

/// Handle --dry-run: show the plan without calling any provider.
fn handle_dry_run(
    aggregator: &Aggregator,
    descriptor: &BusinessDescriptor,
    selected: &[SourceId],
    config: &Config,
) -> Result<i32> {
    println!("\n🔍 Dry run: no providers will be called.\n");
    println!("   Business: {}", descriptor.name());
    println!("   Location: {}", descriptor.location());
    println!("   Output:   {}\n", config.general.output_dir.display());

    let unique: BTreeSet<SourceId> = selected.iter().copied().collect();
    for source in SourceId::ALL {
        let marker = if !unique.contains(&source) {
            "⏭️  skipped"
        } else if aggregator.is_available(source) {
            "✅ ready"
        } else {
            "❌ unavailable (missing credentials)"
        };
        println!(
            "     {:<12} {} (timeout {}s)",
            source.label(),
            marker,
            aggregator.timeout_for(source).as_secs()
        );
    }

    println!("\n✅ Dry run complete. No network calls were made.");
    Ok(0)
}

/// Load configuration from file or use defaults.
///
/// Runs before logging is set up, so problems go straight to stderr.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok(config),
        Ok(None) => Ok(Config::default()),
        Err(e) => {
            eprintln!("⚠️  Ignoring {}: {:#}", CONFIG_FILE_NAME, e);
            Ok(Config::default())
        }
    }
}
