//! chainview CLI: headless front end to the chunked metric cache.
//!
//! Commands:
//! - `fetch`: fetch a metric over a visible range, print merged points as CSV
//! - `chunks`: print the active chunk set for a range
//! - `cache status`: report local cache entries and size
//! - `cache clear`: wipe the local cache

use anyhow::{bail, Context, Result};
use chainview_core::config::EngineConfig;
use chainview_core::data::FileStore;
use chainview_core::domain::{
    MetricKey, PointValue, Position, RawSeries, RenderPoint, SchemeKind, ValueShape,
};
use chainview_core::engine::{Engine, FetchDecision};
use chainview_core::scheme::{date_to_position, position_to_date, IndexScheme, Schemes};
use chainview_core::view::{
    active_chunks, apply_tick, persist, Bucketing, LiveOutcome, MergedSeries, Tick, VisibleRange,
};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "chainview",
    about = "chainview CLI: chunked blockchain metric cache"
)]
struct Cli {
    /// Path to a TOML engine config. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides applied on top of the config file.
#[derive(clap::Args, Default)]
struct EngineArgs {
    /// Primary endpoint root.
    #[arg(long)]
    base_url: Option<String>,

    /// Backup endpoint root, tried once after the primary fails.
    #[arg(long)]
    backup_url: Option<String>,

    /// Local cache directory.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Rows per height chunk.
    #[arg(long)]
    bucket_size: Option<i64>,
}

#[derive(clap::Args)]
struct RangeArgs {
    /// Index scheme: date or height.
    #[arg(long, default_value = "date")]
    scheme: String,

    /// Range start (YYYY-MM-DD for dates, a block height otherwise).
    #[arg(long)]
    from: Option<String>,

    /// Range end, inclusive.
    #[arg(long)]
    to: Option<String>,

    /// Neighbouring chunks to add on each side.
    #[arg(long)]
    margin: Option<usize>,

    /// File remembering the last range per scheme. Defaults to the user config dir.
    #[arg(long)]
    state_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a metric over a range and print merged points as CSV.
    Fetch {
        /// Metric name, e.g. `close` or `hashrate`.
        metric: String,

        #[command(flatten)]
        range: RangeArgs,

        /// Display bucketing: identity, week, month, or a fixed width.
        #[arg(long, default_value = "identity")]
        bucket: String,

        /// JSON-lines file of live ticks folded into the last point.
        #[arg(long)]
        ticks: Option<PathBuf>,

        /// Maximum time to wait for all chunks.
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,

        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Print the active chunk set for a range.
    Chunks {
        #[command(flatten)]
        range: RangeArgs,

        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Local cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report entry count and size.
    Status {
        /// Cache directory. Defaults to the config's `cache_dir`.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Remove every cached response.
    Clear {
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chainview=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Fetch {
            metric,
            range,
            bucket,
            ticks,
            wait_secs,
            engine,
        } => run_fetch(
            engine.apply(config)?,
            &metric,
            &range,
            &bucket,
            ticks.as_deref(),
            Duration::from_secs(wait_secs),
        ),
        Commands::Chunks { range, engine } => run_chunks(engine.apply(config)?, &range),
        Commands::Cache { action } => match action {
            CacheAction::Status { cache_dir } => {
                run_cache_status(&cache_dir.unwrap_or(config.cache_dir))
            }
            CacheAction::Clear { cache_dir } => {
                run_cache_clear(&cache_dir.unwrap_or(config.cache_dir))
            }
        },
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => Ok(EngineConfig::default()),
    }
}

impl EngineArgs {
    fn apply(self, mut config: EngineConfig) -> Result<EngineConfig> {
        if let Some(url) = self.base_url {
            config.base_url = url;
        }
        if self.backup_url.is_some() {
            config.backup_url = self.backup_url;
        }
        if let Some(dir) = self.cache_dir {
            config.cache_dir = dir;
        }
        if let Some(secs) = self.timeout_secs {
            config.request_timeout_secs = secs;
        }
        if let Some(bucket) = self.bucket_size {
            config.height_bucket = bucket;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_scheme(s: &str) -> Result<SchemeKind> {
    match SchemeKind::parse(s) {
        Some(kind) => Ok(kind),
        None => bail!("unknown scheme '{s}'. Valid: date, height"),
    }
}

fn parse_position(scheme: SchemeKind, s: &str) -> Result<Position> {
    match scheme {
        SchemeKind::ByDate => {
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))?;
            Ok(date_to_position(date))
        }
        SchemeKind::ByHeight => s
            .parse()
            .with_context(|| format!("invalid block height '{s}'")),
    }
}

fn format_position(scheme: SchemeKind, pos: Position) -> String {
    match (scheme, position_to_date(pos)) {
        (SchemeKind::ByDate, Some(date)) => date.format("%Y-%m-%d").to_string(),
        _ => pos.to_string(),
    }
}

fn state_path(range: &RangeArgs) -> PathBuf {
    range.state_file.clone().unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chainview")
            .join("ranges.json")
    })
}

/// Range from flags, falling back to the remembered one; the resolved range
/// is remembered for next time.
fn resolve_range(scheme: SchemeKind, args: &RangeArgs) -> Result<VisibleRange> {
    let path = state_path(args);
    let mut memory = persist::load(&path);
    let remembered = memory.get(scheme);

    let from = args.from.as_deref().map(|s| parse_position(scheme, s)).transpose()?;
    let to = args.to.as_deref().map(|s| parse_position(scheme, s)).transpose()?;
    let range = match (from, to, remembered) {
        (Some(from), Some(to), _) => VisibleRange::new(from, to),
        (Some(from), None, Some(r)) => VisibleRange::new(from, r.to),
        (None, Some(to), Some(r)) => VisibleRange::new(r.from, to),
        (None, None, Some(r)) => r,
        (Some(from), None, None) if scheme == SchemeKind::ByDate => {
            VisibleRange::new(from, date_to_position(Utc::now().date_naive()))
        }
        _ => bail!("no --from/--to given and no remembered {scheme} range"),
    };

    memory.set(scheme, range);
    if let Err(e) = persist::save(&path, &memory) {
        warn!(path = %path.display(), error = %e, "could not remember visible range");
    }
    Ok(range)
}

fn run_chunks(config: EngineConfig, args: &RangeArgs) -> Result<()> {
    let scheme_kind = parse_scheme(&args.scheme)?;
    let range = resolve_range(scheme_kind, args)?;
    let schemes = Schemes::from_config(&config);
    let scheme = schemes.get(scheme_kind);
    let set = active_chunks(scheme, &range, args.margin.unwrap_or(config.margin_chunks));

    println!(
        "Range: {} to {} ({scheme_kind})",
        format_position(scheme_kind, range.from),
        format_position(scheme_kind, range.to)
    );
    println!("{:<12} {:<12} {:<12}", "Chunk", "From", "To");
    println!("{}", "-".repeat(38));
    for &id in set.ids() {
        let span = scheme.chunk_id_to_range(id);
        println!(
            "{:<12} {:<12} {:<12}",
            id.to_string(),
            format_position(scheme_kind, span.start),
            format_position(scheme_kind, span.end - 1)
        );
    }
    Ok(())
}

fn run_fetch(
    config: EngineConfig,
    metric: &str,
    args: &RangeArgs,
    bucket: &str,
    ticks: Option<&Path>,
    wait: Duration,
) -> Result<()> {
    let scheme = parse_scheme(&args.scheme)?;
    let bucketing: Bucketing = bucket.parse().map_err(anyhow::Error::msg)?;
    let range = resolve_range(scheme, args)?;
    let margin = args.margin.unwrap_or(config.margin_chunks);

    let mut engine = Engine::connect(config)?;
    let key = MetricKey::new(metric, scheme);
    let active = active_chunks(engine.scheme(scheme), &range, margin);
    info!(%key, chunks = active.len(), "fetching");

    // Height chunks unlock one by one. Failed chunks may be resent, hence the bound.
    for _ in 0..=active.len() {
        let decisions = engine.fetch_active(&key, &active, Utc::now())?;
        let sent = decisions
            .iter()
            .filter(|(_, d)| matches!(d, FetchDecision::Dispatched { .. }))
            .count();
        if sent == 0 {
            break;
        }
        engine.wait_idle(wait);
        if engine.in_flight() > 0 {
            warn!(in_flight = engine.in_flight(), "timed out waiting for chunks");
            break;
        }
    }

    let raw = engine
        .full_data(&key)
        .unwrap_or_else(|| RawSeries::empty(ValueShape::Scalar));
    let mut merged = MergedSeries::new();
    merged.merge(&raw, bucketing);

    if let Some(path) = ticks {
        for tick in read_ticks(path)? {
            if apply_tick(&mut merged, &tick, scheme, bucketing) == LiveOutcome::Ignored {
                warn!(time = tick.time, "ignored stale tick");
            }
        }
    }

    let visible: Vec<&RenderPoint> = merged
        .points()
        .iter()
        .filter(|p| range.contains(p.position))
        .collect();
    if visible.is_empty() {
        bail!("no data for {key} in the requested range");
    }
    write_csv(scheme, &visible)?;
    info!(points = visible.len(), "done");
    Ok(())
}

fn read_ticks(path: &Path) -> Result<Vec<Tick>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open ticks file {}", path.display()))?;
    let mut ticks = Vec::new();
    for (i, line) in io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let tick: Tick = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid tick", path.display(), i + 1))?;
        ticks.push(tick);
    }
    Ok(ticks)
}

fn write_csv(scheme: SchemeKind, points: &[&RenderPoint]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout().lock());
    match points[0].value {
        PointValue::Scalar(_) => writer.write_record(["position", "label", "value"])?,
        PointValue::Ohlc(_) => {
            writer.write_record(["position", "label", "open", "high", "low", "close"])?
        }
    }
    for point in points {
        let position = point.position.to_string();
        let label = format_position(scheme, point.position);
        match point.value {
            PointValue::Scalar(v) => {
                writer.write_record([position, label, format_value(v)])?;
            }
            PointValue::Ohlc(bar) => {
                writer.write_record([
                    position,
                    label,
                    format_value(bar.open),
                    format_value(bar.high),
                    format_value(bar.low),
                    format_value(bar.close),
                ])?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

/// Gaps print as empty cells.
fn format_value(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}

fn run_cache_status(cache_dir: &Path) -> Result<()> {
    let store = FileStore::new(cache_dir);
    let status = store.status()?;
    if status.entries == 0 {
        println!("Cache is empty: {}", cache_dir.display());
        return Ok(());
    }
    println!("Cache: {}", cache_dir.display());
    println!("Entries: {}", status.entries);
    println!("Total size: {}", format_size(status.bytes));
    Ok(())
}

fn run_cache_clear(cache_dir: &Path) -> Result<()> {
    let removed = FileStore::new(cache_dir).clear()?;
    println!("Removed {removed} cached response(s) from {}", cache_dir.display());
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_args(from: Option<&str>, to: Option<&str>, state: &Path) -> RangeArgs {
        RangeArgs {
            scheme: "height".into(),
            from: from.map(str::to_string),
            to: to.map(str::to_string),
            margin: None,
            state_file: Some(state.to_path_buf()),
        }
    }

    fn resolve(args: &RangeArgs) -> Result<VisibleRange> {
        resolve_range(SchemeKind::ByHeight, args)
    }

    #[test]
    fn dates_parse_to_day_positions() {
        assert_eq!(parse_position(SchemeKind::ByDate, "1970-01-02").unwrap(), 1);
        assert!(parse_position(SchemeKind::ByDate, "2021/06/01").is_err());
        assert_eq!(parse_position(SchemeKind::ByHeight, "850500").unwrap(), 850_500);
    }

    #[test]
    fn omitted_range_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("ranges.json");

        let first = resolve(&range_args(Some("10"), Some("20"), &state)).unwrap();
        let again = resolve(&range_args(None, None, &state)).unwrap();
        assert_eq!(first, again);

        let moved = resolve(&range_args(None, Some("30"), &state)).unwrap();
        assert_eq!(moved, VisibleRange::new(10, 30));
    }

    #[test]
    fn missing_range_without_memory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("ranges.json");
        assert!(resolve(&range_args(None, None, &state)).is_err());
    }

    #[test]
    fn overrides_replace_config_values() {
        let args = EngineArgs {
            base_url: Some("https://mirror.example/api".into()),
            bucket_size: Some(500),
            ..EngineArgs::default()
        };
        let config = args.apply(EngineConfig::default()).unwrap();
        assert_eq!(config.base_url, "https://mirror.example/api");
        assert_eq!(config.height_bucket, 500);
    }

    #[test]
    fn gaps_print_empty() {
        assert_eq!(format_value(f64::NAN), "");
        assert_eq!(format_value(1.5), "1.5");
    }
}
