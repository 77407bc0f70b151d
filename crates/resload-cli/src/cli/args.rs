use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "resload",
    version,
    about = "Fetch resources through a coalescing, revalidating on-disk cache"
)]
pub struct Cli {
    #[command(flatten)]
    pub cache: CacheArgs,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load a resource through the cache and write its bytes out
    Get(GetArgs),
    /// Show what the cache holds for a resource
    Inspect(KeyArgs),
    /// Drop a resource from both cache tiers
    Remove(KeyArgs),
    /// Empty the cache
    Clear,
}

#[derive(Args, Debug, Clone)]
pub struct CacheArgs {
    /// Disk cache directory (default: user cache dir)
    #[arg(long, global = true, env = "RESLOAD_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Memory tier capacity in bytes (0 = unlimited)
    #[arg(long, global = true)]
    pub memory_capacity: Option<u64>,

    /// Maximum concurrent fetches (0 = automatic)
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Resource URL
    pub url: String,

    /// Write the bytes here instead of stdout
    #[arg(long, short = 'o')]
    pub out: Option<PathBuf>,

    /// Serve a cached copy without asking the origin
    #[arg(long)]
    pub no_revalidate: bool,
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    /// Resource URL
    pub url: String,
}
