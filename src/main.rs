use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use feedpipe::config::Config;
use feedpipe::{Feed, FetchError, Fetcher, FormatRegistry};

#[derive(Parser, Debug)]
#[command(
    name = "feedpipe",
    about = "Fetch RSS/Atom feeds concurrently and report what was found"
)]
struct Args {
    /// Config file (default: ~/.config/feedpipe/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Request gzip/deflate transfer compression
    #[arg(long)]
    compress: bool,

    /// Print feeds as JSON
    #[arg(long)]
    json: bool,

    /// Report every URL instead of stopping at the first failure
    #[arg(long)]
    settled: bool,

    /// Feed URLs to fetch
    #[arg(required = true, value_name = "URL")]
    urls: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match args.config.clone().or_else(Config::default_path) {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    tracing::debug!(config = ?config, "Effective configuration");

    let mut options = config.fetch_options();
    options.compress |= args.compress;

    let registry = Arc::new(FormatRegistry::new());
    let fetcher =
        Fetcher::new(registry, options.clone()).context("Failed to build HTTP client")?;

    if args.settled {
        let results = fetcher
            .fetch_many_settled(args.urls.iter().cloned(), &options)
            .await
            .context("Failed to start batch")?;
        report_settled(&args.urls, results, args.json)?;
        return Ok(());
    }

    let feeds = fetcher
        .fetch_many(args.urls.iter().cloned(), &options)
        .await
        .context("Batch aborted")?;
    report(&args.urls, &feeds, args.json)
}

fn report(urls: &[String], feeds: &HashMap<String, Feed>, json: bool) -> Result<()> {
    if json {
        let ordered: Vec<&Feed> = ordered_urls(urls).filter_map(|u| feeds.get(u)).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&ordered).context("Failed to serialize feeds")?
        );
        return Ok(());
    }

    for url in ordered_urls(urls) {
        if let Some(feed) = feeds.get(url) {
            print_summary(url, feed);
        }
    }
    Ok(())
}

fn report_settled(
    urls: &[String],
    results: HashMap<String, Result<Feed, FetchError>>,
    json: bool,
) -> Result<()> {
    if json {
        let entries: Vec<serde_json::Value> = ordered_urls(urls)
            .filter_map(|url| {
                results.get(url).map(|result| match result {
                    Ok(feed) => serde_json::json!({ "url": url, "feed": feed }),
                    Err(e) => serde_json::json!({ "url": url, "error": e.to_string() }),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).context("Failed to serialize results")?
        );
        return Ok(());
    }

    for url in ordered_urls(urls) {
        match results.get(url) {
            Some(Ok(feed)) => print_summary(url, feed),
            Some(Err(e)) => println!("{url}\n  error: {e}\n"),
            None => {}
        }
    }
    Ok(())
}

/// Command-line order with duplicates removed.
fn ordered_urls(urls: &[String]) -> impl Iterator<Item = &String> {
    let mut seen = std::collections::HashSet::new();
    urls.iter().filter(move |u| seen.insert(u.as_str()))
}

fn print_summary(url: &str, feed: &Feed) {
    println!("{url}");
    println!("  title:         {}", feed.title.as_deref().unwrap_or("(untitled)"));
    println!("  format:        {}", feed.format);
    println!("  entries:       {}", feed.entries.len());
    println!("  etag:          {}", feed.etag.as_deref().unwrap_or("-"));
    println!(
        "  last-modified: {}",
        feed.last_modified
            .map(feedpipe::fetch::format_http_date)
            .unwrap_or_else(|| "-".to_string())
    );
    println!();
}
