use clap::{Parser, ValueEnum};
use pagebatch::{Batcher, BatcherConfig, ClientConfig};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pagebatch")]
#[command(version)]
#[command(about = "Fetch wiki page sources in coalesced batches", long_about = None)]
struct Cli {
    /// Titles of the pages to fetch
    #[arg(required = true)]
    titles: Vec<String>,

    /// MediaWiki api.php endpoint
    #[arg(long, env = "PAGEBATCH_API_URL")]
    api_url: Option<String>,

    /// Batching and pacing preset
    #[arg(long, value_enum, default_value = "env")]
    preset: Preset,

    /// Maximum titles per request (overrides the preset)
    #[arg(long)]
    cap: Option<usize>,

    /// Maximum requests in flight (overrides the preset)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Print one JSON object per page instead of raw content
    #[arg(long)]
    json: bool,

    /// Log every batch and retry
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    /// Defaults overridden by PAGEBATCH_* variables
    Env,
    /// One request at a time, one second apart
    Polite,
    /// High limits for bot accounts
    Bot,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "pagebatch=debug"
    } else {
        "pagebatch=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut client_config = ClientConfig::from_env();
    if let Some(url) = cli.api_url {
        client_config.api_url = url;
    }

    let mut config = match cli.preset {
        Preset::Env => BatcherConfig::from_env(),
        Preset::Polite => BatcherConfig::polite(),
        Preset::Bot => BatcherConfig::bot(),
    };
    if let Some(cap) = cli.cap {
        config.max_titles_per_request = cap;
    }
    if let Some(n) = cli.concurrency {
        config.max_concurrent = n;
    }

    info!(
        api_url = %client_config.api_url,
        titles = cli.titles.len(),
        cap = config.max_titles_per_request,
        "Fetching pages"
    );

    let batcher = Batcher::open(client_config, config)?;
    let json = cli.json;

    for title in cli.titles {
        let requested = title.clone();
        batcher.register(title, move |result| match result {
            Ok(page) if json => match serde_json::to_string(&page) {
                Ok(line) => println!("{}", line),
                Err(e) => eprintln!("{}: {}", requested, e),
            },
            Ok(page) => {
                println!("--- BEGIN {} ---", page.title);
                println!("{}", page.content);
                println!("--- END {} ---", page.title);
            }
            Err(e) if json => {
                println!(
                    "{}",
                    serde_json::json!({ "requested": requested, "error": e.to_string(), "kind": e.kind() })
                );
            }
            Err(e) => eprintln!("{}: {}", requested, e),
        })?;
    }

    let report = batcher.close().await;
    info!(
        passes = report.passes,
        batches = report.batches,
        found = report.found,
        not_found = report.not_found,
        failed = report.failed,
        "Done"
    );

    if !report.is_clean() {
        anyhow::bail!(
            "{} of {} pages could not be fetched",
            report.continuations - report.found,
            report.continuations
        );
    }

    Ok(())
}
