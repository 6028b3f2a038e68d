use anyhow::Context;
use book_crawler::config::{ConfigFormat, ConfigLoader, OutputFormat, Overrides, ScraperConfig};
use book_crawler::metrics::MetricsSnapshot;
use book_crawler::model::ScrapeResult;
use book_crawler::output;
use book_crawler::{MetricsCollector, Pipeline, PipelineOptions, Scraper};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "book-crawler")]
#[command(version = "0.1.0")]
#[command(about = "Concurrent book catalog scraper with retries and batched output", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape the catalog
    Run {
        /// Path to a configuration file (JSON/YAML/TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Base URL to start from
        #[arg(long)]
        base_url: Option<String>,

        /// Maximum number of pages to follow
        #[arg(long)]
        pages: Option<u32>,

        /// Concurrent requests and pipeline workers
        #[arg(long)]
        parallel: Option<usize>,

        /// Delay between requests in milliseconds
        #[arg(long)]
        delay: Option<u64>,

        /// Extra random delay in milliseconds
        #[arg(long)]
        random_delay: Option<u64>,

        /// Retries per failed page
        #[arg(long)]
        max_retries: Option<u32>,

        /// Initial retry backoff in milliseconds
        #[arg(long)]
        retry_backoff: Option<u64>,

        /// Retry backoff cap in milliseconds
        #[arg(long)]
        retry_backoff_max: Option<u64>,

        /// Honour robots.txt
        #[arg(long)]
        respect_robots: bool,

        /// Output file path
        #[arg(short, long)]
        output: Option<String>,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<FormatArg>,

        /// Debug logging and periodic pipeline stats
        #[arg(short, long)]
        verbose: bool,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },
    /// Validate configuration and print the effective settings
    Check {
        /// Path to a configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print format
        #[arg(short, long, value_enum, default_value_t = PrintFormat::Toml)]
        format: PrintFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Csv,
    Json,
    Dual,
    Sqlite,
    Console,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => OutputFormat::Csv,
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Dual => OutputFormat::Dual,
            FormatArg::Sqlite => OutputFormat::Sqlite,
            FormatArg::Console => OutputFormat::Console,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PrintFormat {
    Toml,
    Yaml,
    Json,
}

impl From<PrintFormat> for ConfigFormat {
    fn from(arg: PrintFormat) -> Self {
        match arg {
            PrintFormat::Toml => ConfigFormat::Toml,
            PrintFormat::Yaml => ConfigFormat::Yaml,
            PrintFormat::Json => ConfigFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Run { verbose: true, .. });
    if std::env::var("RUST_LOG").is_err() {
        let level = if verbose { "debug" } else { "info" };
        unsafe {
            std::env::set_var("RUST_LOG", level);
        }
    }
    let logger = env_logger::Builder::from_default_env().build();
    let multi = Arc::new(MultiProgress::new());

    match cli.command {
        Commands::Run {
            config,
            base_url,
            pages,
            parallel,
            delay,
            random_delay,
            max_retries,
            retry_backoff,
            retry_backoff_max,
            respect_robots,
            output,
            format,
            verbose,
            no_progress,
        } => {
            let progress = !no_progress;
            let level = logger.filter();
            if progress {
                indicatif_log_bridge::LogWrapper::new((*multi).clone(), logger)
                    .try_init()
                    .context("install logger")?;
            } else {
                log::set_boxed_logger(Box::new(logger)).context("install logger")?;
            }
            log::set_max_level(level);

            let overrides = Overrides {
                base_url,
                max_pages: pages,
                parallelism: parallel,
                delay_ms: delay,
                random_delay_ms: random_delay,
                max_retries,
                retry_backoff_ms: retry_backoff,
                retry_backoff_max_ms: retry_backoff_max,
                respect_robots_txt: respect_robots.then_some(true),
                output_file: output,
                output_format: format.map(OutputFormat::from),
            };
            if let Some(path) = &config {
                log::info!("Loading config from {:?}", path);
            }
            let settings = ConfigLoader::load(config.as_deref(), &overrides)?;

            let multi_for_sink = progress.then(|| multi.clone());
            run(settings, verbose, progress, multi, multi_for_sink).await?;
        }
        Commands::Check { config, format } => {
            log::set_boxed_logger(Box::new(logger)).context("install logger")?;
            log::set_max_level(log::LevelFilter::Info);

            match ConfigLoader::load(config.as_deref(), &Overrides::default()) {
                Ok(cfg) => {
                    println!("✅ Config is valid:");
                    println!("{}", ConfigLoader::render(&cfg, format.into())?);
                }
                Err(e) => {
                    eprintln!("❌ Config error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

async fn run(
    config: ScraperConfig,
    verbose: bool,
    progress: bool,
    multi: Arc<MultiProgress>,
    sink_multi: Option<Arc<MultiProgress>>,
) -> anyhow::Result<()> {
    let metrics = MetricsCollector::new();
    let sink = output::create_sink(&config, sink_multi).await?;

    let pipeline = Pipeline::new(sink.clone(), metrics.clone(), PipelineOptions::from(&config));
    pipeline.start(config.parallelism);
    if verbose {
        pipeline.start_metrics_reporting(config.metrics_interval());
    }

    let scraper = Scraper::new(config.clone())?.with_metrics(metrics.clone());

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, shutting down...");
            ctrl_c.cancel();
        }
    });

    let mut progress_bar: Option<ProgressBar> = None;
    let mut progress_task = None;
    if progress {
        let pb = multi.add(ProgressBar::new(u64::from(config.max_pages)));
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                )?
                .progress_chars("#>-"),
        );

        let mut metrics_rx = scraper.watch_metrics();
        let pb_clone = pb.clone();
        progress_bar = Some(pb);
        progress_task = Some(tokio::spawn(async move {
            while metrics_rx.changed().await.is_ok() {
                let snapshot: MetricsSnapshot = metrics_rx.borrow().clone();
                pb_clone.set_position(snapshot.requests_success);
                pb_clone.set_message(format!(
                    "Books: {} | Success: {:.1}% | RPS: {:.2}",
                    snapshot.processed, snapshot.success_rate, snapshot.requests_per_second
                ));
            }
        }));
    }

    log::info!("Starting crawl...");
    let crawl = scraper.run(cancel, &pipeline).await;

    // stop intake, flush, then check and release the sink
    let drained = pipeline.close().await;
    let checked = match &drained {
        Ok(()) => sink.validate().await,
        Err(_) => Ok(()),
    };
    let closed = sink.close().await;

    if let Some(task) = progress_task {
        task.abort();
    }
    if let Some(pb) = progress_bar {
        let final_metrics = metrics.snapshot();
        pb.set_style(
            ProgressStyle::default_bar()
                .template("✅ [{elapsed_precise}] [{bar:40.green/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        pb.finish_with_message(format!(
            "Books: {} | Success: {:.1}% - Completed",
            final_metrics.processed, final_metrics.success_rate
        ));
    }

    let mut result = crawl?;
    // records still buffered when the crawl ended are counted once drained
    result.total_count = metrics.processed();
    print_summary(&result, &metrics.snapshot(), &config);

    drained.context("pipeline failed")?;
    checked.context("output validation failed")?;
    closed.context("closing output")?;
    Ok(())
}

fn print_summary(result: &ScrapeResult, metrics: &MetricsSnapshot, config: &ScraperConfig) {
    let elapsed = result.elapsed().as_secs_f64();

    println!("\n✅ Crawl Completed:");
    println!("   Books Scraped: {}", result.total_count);
    println!("   Pages Followed: {}", result.page_count);
    println!("   Requests: {}", result.request_count);
    println!("   Success Rate: {:.1}%", result.success_rate());
    println!("   Errors: {}", result.error_count);
    println!("   Retries: {}", result.retry_count);

    if !result.errors_by_kind.is_empty() {
        println!("   Errors by Category:");
        for (kind, count) in &result.errors_by_kind {
            println!("     {}: {}", kind, count);
        }
    }

    if metrics.validation_errors_total() > 0 {
        println!("   Validation Failures:");
        for (kind, count) in &metrics.validation_errors {
            println!("     {}: {}", kind, count);
        }
    }

    if !result.failed_urls.is_empty() {
        println!("   Failed URLs: {}", result.failed_urls.len());
        for url in result.failed_urls.iter().take(10) {
            println!("     - {}", url);
        }
        if result.failed_urls.len() > 10 {
            println!("     ... and {} more", result.failed_urls.len() - 10);
        }
    }

    println!("   Average Duration: {}ms", metrics.avg_response_time_ms);
    println!("   Total Time: {:.1}s", elapsed);
    if elapsed > 0.0 {
        println!("   Books/sec: {:.2}", result.total_count as f64 / elapsed);
    }
    if config.output_format != OutputFormat::Console {
        println!("   Output: {} ({})", config.output_file, config.output_format);
    }
}
