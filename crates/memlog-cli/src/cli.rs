use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "memlog", about = "Inspect and edit memlog stores", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Registry root directory (overrides the config file)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Open stores whose meta file has an unknown version
    #[arg(long, global = true)]
    pub ignore_version_check: bool,

    /// Checkpoint once the log reaches this many bytes
    #[arg(long, global = true)]
    pub checkpoint_bytes: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the value stored under a key
    Get(KeyArgs),
    /// Store a value under a key
    Set(SetArgs),
    /// Remove a key
    Remove(KeyArgs),
    /// List all entries of a store
    List(StoreArgs),
    /// Write a checkpoint and truncate the log
    Checkpoint(StoreArgs),
    /// Show store statistics
    Info(StoreArgs),
}

#[derive(Args, Debug)]
pub struct StoreArgs {
    /// Store name (sub-directory of the root)
    pub store: String,
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    pub store: String,
    pub key: String,
}

#[derive(Args, Debug)]
pub struct SetArgs {
    pub store: String,
    pub key: String,
    /// JSON value; anything that is not valid JSON is stored as a string
    pub value: String,
}
