use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use cloudup::config::{AppConfig, clamp_concurrency};
use cloudup::upload::{SpeedMode, UploadItem, UploadManager, UploadStatus, collect_candidates};
use cloudup_core::CloudClient;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

const USAGE: &str = "Usage: cloudup [--overwrite] [--concurrency N] [--json] <remote-dir> <path>...";

#[derive(Debug, Clone, PartialEq, Eq)]
struct UploadArgs {
    overwrite: bool,
    concurrency: Option<usize>,
    json: bool,
    remote_dir: String,
    paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Upload(UploadArgs),
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut overwrite = false;
    let mut concurrency = None;
    let mut json = false;
    let mut positional = Vec::new();
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliMode::Help),
            "--overwrite" => overwrite = true,
            "--json" => json = true,
            "--concurrency" | "-c" => {
                let value = args.next().context("--concurrency needs a value")?;
                let value: usize = value
                    .parse()
                    .with_context(|| format!("invalid concurrency: {value}"))?;
                concurrency = Some(value);
            }
            other if other.starts_with('-') && other.len() > 1 => {
                anyhow::bail!("unknown argument: {other}")
            }
            _ => positional.push(arg),
        }
    }
    let mut positional = positional.into_iter();
    let remote_dir = positional.next().context(USAGE)?;
    let paths: Vec<PathBuf> = positional.map(PathBuf::from).collect();
    if paths.is_empty() {
        anyhow::bail!("{USAGE}");
    }
    Ok(CliMode::Upload(UploadArgs {
        overwrite,
        concurrency,
        json,
        remote_dir,
        paths,
    }))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let args = match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            println!("{USAGE}");
            println!("  --overwrite        Replace existing remote files instead of stopping on conflicts");
            println!("  --concurrency N    Parallel uploads (1-10)");
            println!("  --json             Print the final summary as JSON");
            return Ok(ExitCode::SUCCESS);
        }
        CliMode::Upload(args) => args,
    };
    init_tracing();

    let mut config = AppConfig::from_env()?;
    if args.overwrite {
        config.engine.overwrite = true;
    }
    if let Some(concurrency) = args.concurrency {
        config.engine.concurrency = clamp_concurrency(concurrency);
    }

    let client = CloudClient::new(&config.base_url, config.token.clone())
        .with_context(|| format!("invalid base url {}", config.base_url))?;
    let manager = UploadManager::new(client, config.engine);

    let recovered = manager
        .load_directory(&args.remote_dir)
        .await
        .with_context(|| format!("failed to list {}", args.remote_dir))?;
    if recovered > 0 {
        info!(recovered, "found unfinished uploads in target directory");
    }

    let candidates = collect_candidates(&args.paths, &args.remote_dir).await?;
    if manager.add_uploads_to_queue(candidates) {
        manager.wait_idle().await;
    }

    let items = manager.items();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&manager.summary())?);
    } else {
        print_table(&items, manager.speed_mode());
    }

    let failed = items
        .iter()
        .any(|item| matches!(item.status, UploadStatus::Error | UploadStatus::Conflict));
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_table(items: &[UploadItem], mode: SpeedMode) {
    let width = items
        .iter()
        .map(|item| item.full_path().len())
        .max()
        .unwrap_or(4)
        .max(4);
    println!(
        "{:<10} {:>12} {:>10}  {:<width$}  DETAIL",
        "STATUS", "BYTES", "KIB/S", "PATH"
    );
    for item in items {
        let status = serde_json::to_value(item.status)
            .ok()
            .and_then(|value| value.as_str().map(str::to_owned))
            .unwrap_or_default();
        println!(
            "{:<10} {:>12} {:>10.1}  {:<width$}  {}",
            status,
            item.size,
            item.display_speed(mode) / 1024.0,
            item.full_path(),
            item.error_message.as_deref().unwrap_or("")
        );
    }
}
