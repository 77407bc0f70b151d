use std::sync::Arc;

use resload::{CacheCapacity, ConcurrencyLimit, HttpFetcher, LoadError, Loader, LoaderConfig};

use super::args::*;
use crate::exit_codes::{EXIT_CONFIG_ERROR, EXIT_LOAD_FAILED};

pub mod cache;
pub mod get;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let revalidate = match &cli.cmd {
        Command::Get(args) => !args.no_revalidate,
        _ => false,
    };
    let loader = build_loader(&cli.cache, revalidate)?;

    match cli.cmd {
        Command::Get(args) => get::run(&loader, args).await,
        Command::Inspect(args) => cache::inspect(&loader, args).await,
        Command::Remove(args) => cache::remove(&loader, args).await,
        Command::Clear => cache::clear(&loader).await,
    }
}

/// Loader backed by the disk cache, with flags layered over the environment.
pub(crate) fn build_loader(args: &CacheArgs, revalidate: bool) -> anyhow::Result<Loader> {
    let mut config = LoaderConfig::from_env()
        .with_persist_to_disk(true)
        .with_check_freshness(revalidate);
    if let Some(dir) = &args.cache_dir {
        config = config.with_cache_dir(dir);
    }
    if let Some(bytes) = args.memory_capacity {
        config = config.with_memory_capacity(CacheCapacity::from_bytes(bytes));
    }
    if let Some(count) = args.concurrency {
        config = config.with_max_concurrent_requests(ConcurrencyLimit::from_count(count));
    }

    let loader = Loader::builder()
        .config(config)
        .fetcher(Arc::new(HttpFetcher::from_env()?))
        .build()?;
    Ok(loader)
}

/// Exit code for a failed load.
pub(crate) fn exit_code_for(error: &LoadError) -> i32 {
    match error {
        LoadError::InvalidKey { .. } | LoadError::Config { .. } => EXIT_CONFIG_ERROR,
        _ => EXIT_LOAD_FAILED,
    }
}
