//! chaintx CLI: stream transactions from an EVM node and manage cursors.
//!
//! Usage:
//! ```bash
//! chaintx watch  config.json           # stream items to stdout as JSON lines
//! chaintx cursor config.json [--reset] # show or delete the saved cursor
//! chaintx info
//! ```

mod config;
mod logging;

use std::env;
use std::io::Write;
use std::process;

use anyhow::{bail, Context};

use chaintx_core::checkpoint::{CheckpointManager, CursorStore, MemoryCursorStore};
use chaintx_core::IngestionLoop;
use chaintx_evm::EvmChainClient;
use chaintx_storage::JsonFileCursorStore;

use crate::config::CliConfig;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "watch" => with_config(&args, |path| run_async(cmd_watch(path))),
        "cursor" => with_config(&args, |path| {
            let reset = args.iter().skip(3).any(|a| a == "--reset");
            run_async(cmd_cursor(path, reset))
        }),
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("chaintx {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn with_config(
    args: &[String],
    f: impl FnOnce(&str) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    match args.get(2) {
        Some(path) => f(path),
        None => bail!("missing <config.json> argument (see `chaintx help`)"),
    }
}

fn run_async<F: std::future::Future<Output = anyhow::Result<()>>>(fut: F) -> anyhow::Result<()> {
    tokio::runtime::Runtime::new()
        .context("cannot start async runtime")?
        .block_on(fut)
}

fn print_usage() {
    println!("chaintx {}", env!("CARGO_PKG_VERSION"));
    println!("Reorg-safe transaction ingestion for EVM chains\n");
    println!("USAGE:");
    println!("    chaintx <COMMAND> [ARGS]\n");
    println!("COMMANDS:");
    println!("    watch <config.json>            Stream transactions as JSON lines until Ctrl-C");
    println!("    cursor <config.json> [--reset] Show or delete the saved cursor");
    println!("    info                           Show defaults");
    println!("    version                        Print version");
    println!("    help                           Print this help");
}

fn cmd_info() {
    let defaults = chaintx_core::IngestConfig::default();
    println!("ChainTx v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default poll interval: {}s", defaults.poll_interval_seconds);
    println!("  Default channel capacity: {} items", defaults.channel_capacity);
    println!("  Default max gap depth: {} blocks", defaults.max_gap_depth);
    println!("  Default max reorg depth: {} blocks", defaults.max_reorg_depth);
    println!(
        "  Default backoff: {}ms doubling to {}ms",
        defaults.backoff_base_ms, defaults.backoff_cap_ms
    );
    println!("  Cursor stores: memory, JSON file (cursorPath)");
    println!("  Chains: EVM JSON-RPC (Ethereum, Arbitrum, Base, Polygon, Optimism, ...)");
}

async fn cmd_watch(path: &str) -> anyhow::Result<()> {
    let cfg = CliConfig::load(path)?;
    logging::init_tracing(&cfg.log);

    let store: Box<dyn CursorStore> = match &cfg.ingest.cursor_path {
        Some(file) => Box::new(JsonFileCursorStore::new(file)),
        None => {
            tracing::warn!("No cursorPath configured; the cursor is kept in memory only");
            Box::new(MemoryCursorStore::new())
        }
    };
    let client = EvmChainClient::from_config(&cfg.ingest)?;
    let (ingest, mut subscription) = IngestionLoop::new(cfg.ingest.clone(), client, store)?;
    let handle = ingest.spawn();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut out = std::io::stdout().lock();

    loop {
        tokio::select! {
            item = subscription.recv() => match item {
                Some(item) => {
                    serde_json::to_writer(&mut out, &item)?;
                    writeln!(out)?;
                    out.flush()?;
                }
                // The loop stopped and every item was drained.
                None => break,
            },
            _ = &mut ctrl_c, if !interrupted => {
                tracing::info!("Interrupt received; stopping");
                interrupted = true;
                handle.cancel();
            }
        }
    }

    handle.join().await.context("ingestion stopped")
}

async fn cmd_cursor(path: &str, reset: bool) -> anyhow::Result<()> {
    let cfg = CliConfig::load(path)?;
    let Some(file) = &cfg.ingest.cursor_path else {
        bail!("cursorPath is not set in {path}; no cursor is persisted");
    };
    let (chain, stream) = (&cfg.ingest.chain, &cfg.ingest.stream_id);
    let store = JsonFileCursorStore::new(file);

    if reset {
        CheckpointManager::new(Box::new(store), chain, stream)
            .reset()
            .await?;
        println!("Cursor for {chain}:{stream} deleted");
        return Ok(());
    }

    match store.load(chain, stream).await? {
        Some(checkpoint) => println!("{}", serde_json::to_string_pretty(&checkpoint)?),
        None => println!("No cursor saved for {chain}:{stream}"),
    }
    Ok(())
}
