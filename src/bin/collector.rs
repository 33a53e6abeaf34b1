#![forbid(unsafe_code)]

//! Scheduled entry point. `collect` performs one run against the staging
//! area; `status` reports how full staging is without touching the network.
//! Meant to be invoked once per day by cron or a CI schedule.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand_core::OsRng;
use thumbtrend_tools::batches;
use thumbtrend_tools::collector::{
    CollectionPlan, Collector, RegionStrategy, RunOutcome, StagingLayout, select_regions,
};
use thumbtrend_tools::config::{self, ConfigOverrides, DEFAULT_CONFIG_PATH, Sources};
use thumbtrend_tools::discovery::{DiscoveryRequest, DurationBucket};
use thumbtrend_tools::thumbnails::HttpImageSource;
use thumbtrend_tools::youtube::{YouTubeClient, default_category_ids, expand_regions};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(author, version, about = "Collect trending video thumbnails into a rotating staging area.")]
struct Cli {
    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v debug, -vv trace)"
    )]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover videos, download thumbnails, stage metadata, signal rotation.
    Collect(CollectArgs),
    /// Print staged sample count, next batch name, and any pending rotation.
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
struct StagingArgs {
    #[arg(long = "root", value_name = "PATH", help = "Working root holding current/, batches/ and .rotate")]
    root: Option<PathBuf>,
    #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH, help = "Path to the env file")]
    config: PathBuf,
    #[arg(
        long = "batch-limit",
        value_name = "N",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Staged samples that trigger a rotation"
    )]
    batch_limit: Option<u64>,
}

#[derive(Args, Debug)]
struct StatusArgs {
    #[command(flatten)]
    staging: StagingArgs,
}

#[derive(Args, Debug)]
struct CollectArgs {
    #[command(flatten)]
    staging: StagingArgs,
    #[arg(long = "api-key", value_name = "KEY", help = "API key (defaults to YOUTUBE_API_KEY)")]
    api_key: Option<String>,
    #[arg(long = "test-mode", help = "Small, low-quota run that rotates after 3 samples")]
    test_mode: bool,
    #[arg(long = "days-ago", value_name = "DAYS")]
    days_ago: Option<u32>,
    #[arg(long = "videos-per-category", value_name = "N")]
    videos_per_category: Option<usize>,
    #[arg(long = "category", value_name = "ID", value_delimiter = ',', help = "Category ids (repeatable or comma separated)")]
    categories: Vec<String>,
    #[arg(long = "region", value_name = "CODE", value_delimiter = ',', help = "Region codes or presets such as US_EU")]
    regions: Vec<String>,
    #[arg(long = "region-strategy", value_enum, default_value_t = StrategyArg::Random)]
    region_strategy: StrategyArg,
    #[arg(long = "min-subscribers", value_name = "N")]
    min_subscribers: Option<u64>,
    #[arg(long = "min-views", value_name = "N")]
    min_views: Option<u64>,
    #[arg(long = "min-duration", value_name = "SECONDS")]
    min_duration_seconds: Option<u64>,
    #[arg(long = "duration", value_name = "BUCKET", help = "any, short, medium or long")]
    duration: Option<DurationBucket>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum StrategyArg {
    Random,
    All,
}

impl From<StrategyArg> for RegionStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Random => RegionStrategy::RandomOne,
            StrategyArg::All => RegionStrategy::All,
        }
    }
}

/// Default knobs for a run before individual flags are applied.
#[derive(Debug, Clone)]
struct Preset {
    days_ago: u32,
    videos_per_category: usize,
    categories: Vec<String>,
    regions: Vec<String>,
    min_subscribers: u64,
    min_views: u64,
    min_duration_seconds: u64,
    duration: DurationBucket,
    batch_limit: Option<u64>,
}

impl Preset {
    fn production() -> Self {
        Self {
            days_ago: 7,
            videos_per_category: 5,
            categories: default_category_ids(),
            regions: vec!["US_EU".into()],
            min_subscribers: 10_000,
            min_views: 100,
            min_duration_seconds: 0,
            duration: DurationBucket::Medium,
            batch_limit: None,
        }
    }

    /// Gaming only, US only, tiny thresholds: a handful of quota units.
    fn test() -> Self {
        Self {
            days_ago: 7,
            videos_per_category: 2,
            categories: vec!["20".into()],
            regions: vec!["US".into()],
            min_subscribers: 100,
            min_views: 10,
            min_duration_seconds: 30,
            duration: DurationBucket::Medium,
            batch_limit: Some(3),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Collect(args) => collect(args),
        Command::Status(args) => status(args),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(level)
        .init();
}

fn build_request(args: &CollectArgs, preset: Preset) -> Result<(DiscoveryRequest, Vec<String>)> {
    let categories: BTreeSet<String> = if args.categories.is_empty() {
        preset.categories.into_iter().collect()
    } else {
        args.categories
            .iter()
            .map(|c| c.trim().to_owned())
            .filter(|c| !c.is_empty())
            .collect()
    };
    if categories.is_empty() {
        bail!("at least one category is required");
    }

    let regions = if args.regions.is_empty() {
        expand_regions(&preset.regions)
    } else {
        expand_regions(&args.regions)
    };
    if regions.is_empty() {
        bail!("at least one region is required");
    }

    let days_ago = args.days_ago.unwrap_or(preset.days_ago);
    let videos_per_category = args.videos_per_category.unwrap_or(preset.videos_per_category);
    if days_ago == 0 || videos_per_category == 0 {
        bail!("--days-ago and --videos-per-category must be positive");
    }

    let request = DiscoveryRequest {
        days_ago,
        videos_per_category,
        categories,
        regions: Vec::new(),
        min_subscribers: args.min_subscribers.unwrap_or(preset.min_subscribers),
        min_views: args.min_views.unwrap_or(preset.min_views),
        min_duration_seconds: args
            .min_duration_seconds
            .unwrap_or(preset.min_duration_seconds),
        duration_bucket: args.duration.unwrap_or(preset.duration),
    };
    Ok((request, regions))
}

fn collect(args: CollectArgs) -> Result<()> {
    let preset = if args.test_mode {
        Preset::test()
    } else {
        Preset::production()
    };
    let overrides = ConfigOverrides {
        api_key: args.api_key.clone(),
        output_root: args.staging.root.clone(),
        batch_limit: args.staging.batch_limit.or(preset.batch_limit),
    };
    // Configuration problems abort here, before anything touches disk.
    let sources = Sources::gather(overrides, &args.staging.config)?;
    let config = config::resolve(&sources)?;

    let (mut request, regions) = build_request(&args, preset)?;
    request.regions = select_regions(&regions, args.region_strategy.into(), &mut OsRng);

    let layout = StagingLayout::new(&config.output_root);
    println!("===================================");
    println!("Trending Thumbnail Collector{}", if args.test_mode { " (test mode)" } else { "" });
    println!("===================================");
    println!("Root: {}", layout.root.display());
    println!("Categories: {}", request.categories.iter().cloned().collect::<Vec<_>>().join(", "));
    println!("Regions: {}", request.regions.join(", "));
    println!("Batch limit: {}", config.batch_limit);
    println!();

    let collector = Collector::new(
        YouTubeClient::new(config.api_key.clone()),
        HttpImageSource::new(),
        layout,
    );
    let plan = CollectionPlan {
        request,
        batch_limit: config.batch_limit,
    };
    let outcome = collector.run(&plan)?;
    print_summary(&outcome, config.batch_limit);
    Ok(())
}

fn print_summary(outcome: &RunOutcome, batch_limit: u64) {
    println!();
    println!("Target version: {}", outcome.target_batch);
    if outcome.discovery.is_empty() {
        println!(
            "No videos found ({} of {} queries failed). Nothing staged.",
            outcome.discovery.failed_pairs.len(),
            outcome.discovery.pairs_queried
        );
        return;
    }
    println!(
        "Discovered: {} videos ({} filtered out, {} failed queries)",
        outcome.discovery.records.len(),
        outcome.discovery.skipped.len(),
        outcome.discovery.failed_pairs.len()
    );
    println!(
        "Thumbnails: {} saved, {} failed",
        outcome.thumbnails.saved.len(),
        outcome.thumbnails.failures.len()
    );
    for failure in &outcome.thumbnails.failures {
        println!("  - {}: {}", failure.video_id, failure.cause);
    }
    println!("Appended {} metadata rows", outcome.rows_written);
    println!("Total in current/: {}/{}", outcome.staged_total, batch_limit);
    match &outcome.rotation {
        Some(batch) => println!("Rotation needed: flag written for {batch}"),
        None => println!("Collection complete (no rotation yet)"),
    }
}

fn status(args: StatusArgs) -> Result<()> {
    let overrides = ConfigOverrides {
        api_key: None,
        output_root: args.staging.root.clone(),
        batch_limit: args.staging.batch_limit,
    };
    let sources = Sources::gather(overrides, &args.staging.config)?;
    let staging = config::resolve_staging(&sources)?;
    let layout = StagingLayout::new(&staging.output_root);

    let staged = batches::count_staged_samples(&layout.metadata)?;
    let latest = batches::latest_batch(&layout.batches)?;
    let next = batches::version_after(latest)?;

    println!("Root: {}", layout.root.display());
    println!("Staged samples: {}/{}", staged, staging.batch_limit);
    match latest {
        Some(version) => println!("Latest committed batch: {version}"),
        None => println!("Latest committed batch: none"),
    }
    println!("Next batch: {next}");
    match batches::pending_rotation(&layout.rotate_flag)? {
        Some(batch) => println!("Pending rotation: {batch}"),
        None => println!("Pending rotation: none"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_collect(args: &[&str]) -> CollectArgs {
        let cli = Cli::try_parse_from(std::iter::once("collector").chain(args.iter().copied()))
            .unwrap();
        match cli.command {
            Command::Collect(args) => args,
            Command::Status(_) => panic!("expected collect"),
        }
    }

    #[test]
    fn production_defaults_fill_the_request() -> Result<()> {
        let args = parse_collect(&["collect"]);
        let (request, regions) = build_request(&args, Preset::production())?;
        assert_eq!(request.days_ago, 7);
        assert_eq!(request.videos_per_category, 5);
        assert_eq!(request.min_subscribers, 10_000);
        assert_eq!(request.duration_bucket, DurationBucket::Medium);
        assert_eq!(request.categories.len(), default_category_ids().len());
        assert_eq!(regions.len(), 7);
        assert_eq!(args.region_strategy, StrategyArg::Random);
        Ok(())
    }

    #[test]
    fn flags_override_test_preset() -> Result<()> {
        let args = parse_collect(&[
            "collect",
            "--test-mode",
            "--category",
            "10,24",
            "--region",
            "gb",
            "--min-views",
            "0",
            "--duration",
            "long",
        ]);
        assert!(args.test_mode);
        let (request, regions) = build_request(&args, Preset::test())?;
        assert_eq!(request.videos_per_category, 2);
        assert_eq!(request.min_views, 0);
        assert_eq!(request.min_duration_seconds, 30);
        assert_eq!(request.duration_bucket, DurationBucket::Long);
        assert_eq!(
            request.categories.into_iter().collect::<Vec<_>>(),
            vec!["10".to_owned(), "24".to_owned()]
        );
        assert_eq!(regions, vec!["GB".to_owned()]);
        Ok(())
    }

    #[test]
    fn zero_window_is_rejected() {
        let args = parse_collect(&["collect", "--days-ago", "0"]);
        assert!(build_request(&args, Preset::production()).is_err());
    }

    #[test]
    fn unknown_duration_bucket_fails_parsing() {
        let result = Cli::try_parse_from(["collector", "collect", "--duration", "epic"]);
        assert!(result.is_err());
    }

    #[test]
    fn zero_batch_limit_is_rejected() {
        for command in ["collect", "status"] {
            let result = Cli::try_parse_from(["collector", command, "--batch-limit", "0"]);
            assert!(result.is_err(), "{command} accepted a zero limit");
        }
    }

    #[test]
    fn status_accepts_staging_flags() {
        let cli = Cli::try_parse_from(["collector", "status", "--root", "/data", "--batch-limit", "3"])
            .unwrap();
        match cli.command {
            Command::Status(args) => {
                assert_eq!(args.staging.root, Some(PathBuf::from("/data")));
                assert_eq!(args.staging.batch_limit, Some(3));
            }
            Command::Collect(_) => panic!("expected status"),
        }
    }
}
