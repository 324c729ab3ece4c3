mod config;
mod engine;
mod error;
mod progress;
mod sources;
mod tester;
mod traits;
mod types;
mod utils;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigOverride};
use engine::Engine;
use progress::ProgressSink;
use sources::{CidrSet, RegionMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use types::{FinalResult, GroupBy, IpVersion};

#[derive(Parser)]
#[command(name = "cfselect")]
#[command(about = "Find the fastest Cloudflare edge addresses from your network", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve, probe and speed-test candidates (e.g., cfselect run --json)
    Run(RunArgs),
    /// Print the effective configuration as TOML
    Config {
        /// Config file (defaults to the user config dir)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Config file (defaults to the user config dir)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Newline-separated domain list (defaults to the built-in list)
    #[arg(long)]
    domains: Option<PathBuf>,

    /// Newline-separated CIDR list (defaults to the built-in Cloudflare ranges)
    #[arg(long)]
    ranges: Option<PathBuf>,

    /// JSON colo -> region table
    #[arg(long)]
    locations: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[arg(long)]
    dns_concurrency: Option<i64>,

    #[arg(long)]
    latency_concurrency: Option<i64>,

    #[arg(long)]
    speed_concurrency: Option<i64>,

    /// Latency ceiling in ms
    #[arg(long)]
    max_latency: Option<u64>,

    /// Candidates to speed-test per group
    #[arg(long, short = 'n')]
    top_n: Option<i64>,

    /// ipv4, ipv6 or both
    #[arg(long)]
    ip_version: Option<String>,

    /// region or colo
    #[arg(long)]
    group_by: Option<String>,

    /// Only keep this region (repeatable)
    #[arg(long = "region")]
    regions: Vec<String>,

    /// Only keep this colo (repeatable)
    #[arg(long = "colo")]
    colos: Vec<String>,

    /// Minimum download speed in MB/s
    #[arg(long)]
    min_speed: Option<f64>,

    /// Download rate limit in MB/s (0 = unlimited)
    #[arg(long)]
    rate_limit: Option<f64>,

    /// JSON object of config fields, applied before the flags above
    #[arg(long)]
    set: Option<String>,
}

impl RunArgs {
    fn overrides(&self) -> ConfigOverride {
        ConfigOverride {
            dns_concurrency: self.dns_concurrency,
            latency_test_concurrency: self.latency_concurrency,
            speedtest_concurrency: self.speed_concurrency,
            max_latency: self.max_latency,
            top_n_per_group: self.top_n,
            ip_version: self.ip_version.as_deref().map(parse_ip_version),
            speedtest_rate_limit_mb: self.rate_limit,
            group_by: self.group_by.as_deref().map(parse_group_by),
            filter_regions: (!self.regions.is_empty()).then(|| self.regions.clone()),
            filter_colos: (!self.colos.is_empty()).then(|| self.colos.clone()),
            min_speed: self.min_speed,
            ..ConfigOverride::default()
        }
    }
}

// 与配置文件相同的宽松解析: 无法识别的值回退
fn parse_ip_version(s: &str) -> IpVersion {
    match s.to_lowercase().as_str() {
        "ipv4" => IpVersion::Ipv4,
        "ipv6" => IpVersion::Ipv6,
        _ => IpVersion::Both,
    }
}

fn parse_group_by(s: &str) -> GroupBy {
    if s.eq_ignore_ascii_case("colo") {
        GroupBy::Colo
    } else {
        GroupBy::Region
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => handle_run(args).await?,
        Commands::Config { config } => handle_config(config.as_deref())?,
    }

    Ok(())
}

// --- Handlers ---

fn effective_config(path: Option<&Path>, set: Option<&str>, flags: ConfigOverride) -> Result<Config> {
    let mut config = Config::load(path).context("failed to load configuration")?;
    if let Some(payload) = set {
        let o = ConfigOverride::from_json(payload).context("invalid --set payload")?;
        config.merge(o);
    }
    config.merge(flags);
    Ok(config)
}

async fn handle_run(args: RunArgs) -> Result<()> {
    let config = effective_config(args.config.as_deref(), args.set.as_deref(), args.overrides())?;
    let settings = config.normalized()?;

    let ranges = match &args.ranges {
        Some(path) => CidrSet::load(path)?,
        None => CidrSet::builtin(settings.ip_version)?,
    };
    let regions = match &args.locations {
        Some(path) => RegionMap::load(path)?,
        None => RegionMap::builtin()?,
    };
    let domains = match &args.domains {
        Some(path) => sources::load_domains(path)?,
        None => sources::builtin_domains()?,
    };
    tracing::debug!(ranges = ranges.len(), domains = domains.len(), "inputs loaded");

    let (progress, rx) = ProgressSink::channel();
    let printer = utils::spawn_progress_printer(rx);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, finishing with the results gathered so far...");
                cancel.cancel();
            }
        });
    }

    let engine = Engine::new(settings, Arc::new(ranges), Arc::new(regions));
    let outcome = engine.run(&domains, &cancel, &progress).await;

    // 关闭通道, 等待进度输出结束再打印结果
    drop(progress);
    let _ = printer.await;

    let results = outcome?;
    print!("{}", render_report(&results, args.json)?);
    Ok(())
}

// 结果为空也是正常结束, 不返回错误
fn render_report(results: &[FinalResult], json: bool) -> Result<String> {
    if json {
        return Ok(format!("{}\n", serde_json::to_string_pretty(results)?));
    }
    let Some(best) = results.first() else {
        return Ok("No address passed every stage. Try a higher --max-latency or fewer filters.\n".to_string());
    };

    let mut out = String::from("\n");
    out.push_str(&utils::render_table(results));
    out.push_str(&"-".repeat(60));
    out.push('\n');
    out.push_str(&format!(
        "Recommendation: {} ({}, {:.2}MB/s).\n",
        best.address,
        best.colo,
        best.speed_mb()
    ));
    Ok(out)
}

fn handle_config(path: Option<&Path>) -> Result<()> {
    let config = effective_config(path, None, ConfigOverride::default())?;
    print!("{}", config.to_toml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::io::Write;

    #[test]
    fn test_lenient_flag_values() {
        assert_eq!(parse_ip_version("IPv6"), IpVersion::Ipv6);
        assert_eq!(parse_ip_version("dual"), IpVersion::Both);
        assert_eq!(parse_group_by("COLO"), GroupBy::Colo);
        assert_eq!(parse_group_by("country"), GroupBy::Region);
    }

    #[test]
    fn test_flags_win_over_set_payload() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "top_n_per_group = 3\nmax_latency = 200")?;

        let cli = Cli::try_parse_from([
            "cfselect", "run", "--top-n", "8", "--region", "Europe", "--region", "Asia Pacific",
        ])?;
        let Commands::Run(args) = cli.command else {
            bail!("expected run");
        };

        let config = effective_config(
            Some(file.path()),
            Some(r#"{"top_n_per_group": 4, "min_speed": 2.5}"#),
            args.overrides(),
        )?;
        assert_eq!(config.top_n_per_group, 8);
        assert_eq!(config.max_latency, 200);
        assert_eq!(config.min_speed, 2.5);
        assert_eq!(config.filter_regions, vec!["Europe", "Asia Pacific"]);
        assert!(config.filter_colos.is_empty());
        Ok(())
    }

    #[test]
    fn test_empty_run_is_reported_not_failed() -> Result<()> {
        let text = render_report(&[], false)?;
        assert!(text.starts_with("No address passed every stage"));
        assert_eq!(render_report(&[], true)?.trim(), "[]");
        Ok(())
    }

    #[test]
    fn test_report_recommends_the_fastest() -> Result<()> {
        let best = FinalResult {
            address: "104.16.0.9".to_string(),
            source_domain: "example.com".to_string(),
            delay_ms: 12.0,
            loss_rate: 0.0,
            colo: "FRA".to_string(),
            region: "Europe".to_string(),
            download_speed: 3.0 * 1024.0 * 1024.0,
        };
        let text = render_report(&[best], false)?;
        assert!(text.contains("Recommendation: 104.16.0.9 (FRA, 3.00MB/s)."));
        Ok(())
    }

    #[test]
    fn test_invalid_set_payload_is_an_error() {
        let result = effective_config(None, Some("not json"), ConfigOverride::default());
        assert!(result.is_err());
    }
}
