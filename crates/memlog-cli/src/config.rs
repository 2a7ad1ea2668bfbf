use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use memlog::{CheckpointPredicate, Settings, SyncMode};
use serde::Deserialize;

use crate::cli::Cli;

/// Contents of the optional TOML config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub root: Option<PathBuf>,
    pub file_mode: Option<u32>,
    pub buffer_size: Option<usize>,
    pub checkpoint_bytes: Option<u64>,
    pub ignore_version_check: Option<bool>,
    pub sync: Option<SyncSetting>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSetting {
    EveryWrite,
    OsDefault,
}

impl From<SyncSetting> for SyncMode {
    fn from(s: SyncSetting) -> Self {
        match s {
            SyncSetting::EveryWrite => SyncMode::EveryWrite,
            SyncSetting::OsDefault => SyncMode::OsDefault,
        }
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// Merge the config file (if any) with command-line overrides.
pub fn resolve(cli: &Cli) -> anyhow::Result<Settings> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    merge(file, cli)
}

fn merge(file: FileConfig, cli: &Cli) -> anyhow::Result<Settings> {
    let Some(root) = cli.root.clone().or(file.root) else {
        bail!("no registry root: pass --root or set `root` in the config file");
    };

    let checkpoint = cli
        .checkpoint_bytes
        .or(file.checkpoint_bytes)
        .map(CheckpointPredicate::SizeThreshold);

    Ok(Settings {
        root,
        file_mode: file.file_mode.unwrap_or_default(),
        buffer_size: file.buffer_size.unwrap_or_default(),
        checkpoint,
        ignore_version_check: cli.ignore_version_check
            || file.ignore_version_check.unwrap_or(false),
        sync_mode: file.sync.map(Into::into).unwrap_or_default(),
    })
}
