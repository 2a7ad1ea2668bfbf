use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use colored::Colorize;
use memlog::{Registry, Store};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::cli::*;
use crate::config;

/// Result of a single command, rendered as text or JSON.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Report {
    Value { store: String, key: String, value: Value },
    Set { store: String, key: String, txid: u64 },
    Removed { store: String, key: String, existed: bool },
    Entries { store: String, entries: BTreeMap<String, Value> },
    Checkpointed { store: String, txid: u64 },
    Info(StoreInfo),
}

#[derive(Debug, Serialize, PartialEq)]
pub struct StoreInfo {
    pub store: String,
    pub path: PathBuf,
    pub txid: u64,
    pub entries: usize,
    pub log_bytes: u64,
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let settings = config::resolve(&cli)?;
    let registry = Registry::new(settings).context("opening registry")?;
    debug!(root = %registry.root().display(), command = ?cli.command, "running command");

    let result = execute(&registry, &cli.command);
    registry.close().context("closing registry")?;

    let report = result?;
    match cli.format {
        OutputFormat::Text => print_text(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

pub fn execute(registry: &Registry, command: &Command) -> anyhow::Result<Report> {
    match command {
        Command::Get(args) => with_store(registry, &args.store, |store| cmd_get(store, args)),
        Command::Set(args) => with_store(registry, &args.store, |store| cmd_set(store, args)),
        Command::Remove(args) => with_store(registry, &args.store, |store| cmd_remove(store, args)),
        Command::List(args) => with_store(registry, &args.store, cmd_list),
        Command::Checkpoint(args) => with_store(registry, &args.store, cmd_checkpoint),
        Command::Info(args) => with_store(registry, &args.store, cmd_info),
    }
}

/// Run `f` against the named store and close it whether or not `f` succeeded.
fn with_store<T>(
    registry: &Registry,
    name: &str,
    f: impl FnOnce(&mut Store) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let mut store = registry
        .access(name)
        .with_context(|| format!("opening store {name:?}"))?;
    let result = f(&mut store);
    let closed = store
        .close()
        .with_context(|| format!("closing store {name:?}"));
    let value = result?;
    closed?;
    Ok(value)
}

fn cmd_get(store: &mut Store, args: &KeyArgs) -> anyhow::Result<Report> {
    let value = store
        .get(&args.key)?
        .cloned()
        .ok_or_else(|| anyhow!("key {:?} not found in store {:?}", args.key, args.store))?;
    Ok(Report::Value {
        store: args.store.clone(),
        key: args.key.clone(),
        value,
    })
}

fn cmd_set(store: &mut Store, args: &SetArgs) -> anyhow::Result<Report> {
    let value = parse_value(&args.value);
    store
        .set(&args.key, &value)
        .with_context(|| format!("writing key {:?}", args.key))?;
    Ok(Report::Set {
        store: args.store.clone(),
        key: args.key.clone(),
        txid: store.txid(),
    })
}

fn cmd_remove(store: &mut Store, args: &KeyArgs) -> anyhow::Result<Report> {
    let existed = store
        .remove(&args.key)
        .with_context(|| format!("removing key {:?}", args.key))?;
    Ok(Report::Removed {
        store: args.store.clone(),
        key: args.key.clone(),
        existed,
    })
}

fn cmd_list(store: &mut Store) -> anyhow::Result<Report> {
    let entries = store
        .iter()?
        .map(|(k, v)| (k.to_owned(), v.clone()))
        .collect();
    Ok(Report::Entries {
        store: store.name().to_owned(),
        entries,
    })
}

fn cmd_checkpoint(store: &mut Store) -> anyhow::Result<Report> {
    store.checkpoint().context("writing checkpoint")?;
    Ok(Report::Checkpointed {
        store: store.name().to_owned(),
        txid: store.txid(),
    })
}

fn cmd_info(store: &mut Store) -> anyhow::Result<Report> {
    Ok(Report::Info(StoreInfo {
        store: store.name().to_owned(),
        path: store.path().to_path_buf(),
        txid: store.txid(),
        entries: store.len()?,
        log_bytes: store.log_size(),
    }))
}

/// Values that are not valid JSON are stored as plain strings.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

fn print_text(report: &Report) {
    match report {
        Report::Value { value, .. } => println!("{value}"),
        Report::Set { store, key, txid } => println!(
            "{} Set {}/{} (txid {})",
            "✓".green().bold(),
            store.cyan(),
            key.yellow(),
            txid
        ),
        Report::Removed { store, key, existed: true } => {
            println!("{} Removed {}/{}", "✓".green().bold(), store.cyan(), key.yellow())
        }
        Report::Removed { store, key, existed: false } => {
            println!("{}/{} was not set", store.cyan(), key.yellow())
        }
        Report::Entries { store, entries } => {
            if entries.is_empty() {
                println!("Store {} is empty.", store.cyan());
            }
            for (key, value) in entries {
                println!("{} = {}", key.yellow(), value);
            }
        }
        Report::Checkpointed { store, txid } => println!(
            "{} Checkpointed {} at txid {}",
            "✓".green().bold(),
            store.cyan(),
            txid
        ),
        Report::Info(info) => {
            println!("Store {}", info.store.cyan().bold());
            println!("  Path:      {}", info.path.display());
            println!("  Txid:      {}", info.txid);
            println!("  Entries:   {}", info.entries);
            println!("  Log bytes: {}", info.log_bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memlog::{CheckpointPredicate, Settings};
    use serde_json::json;

    fn registry(root: &std::path::Path) -> Registry {
        Registry::new(Settings::new(root)).unwrap()
    }

    fn set(store: &str, key: &str, value: &str) -> Command {
        Command::Set(SetArgs {
            store: store.into(),
            key: key.into(),
            value: value.into(),
        })
    }

    fn get(store: &str, key: &str) -> Command {
        Command::Get(KeyArgs {
            store: store.into(),
            key: key.into(),
        })
    }

    #[test]
    fn set_then_get_across_registries() {
        let dir = tempfile::tempdir().unwrap();

        let reg = registry(dir.path());
        let report = execute(&reg, &set("offsets", "syslog", r#"{"offset": 42}"#)).unwrap();
        assert_eq!(
            report,
            Report::Set {
                store: "offsets".into(),
                key: "syslog".into(),
                txid: 1
            }
        );
        reg.close().unwrap();

        let reg = registry(dir.path());
        let report = execute(&reg, &get("offsets", "syslog")).unwrap();
        assert_eq!(
            report,
            Report::Value {
                store: "offsets".into(),
                key: "syslog".into(),
                value: json!({"offset": 42}),
            }
        );
        assert_eq!(reg.outstanding(), 0);
        reg.close().unwrap();
    }

    #[test]
    fn non_json_value_is_stored_as_string() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        execute(&reg, &set("s", "k", "plain text")).unwrap();
        let Report::Value { value, .. } = execute(&reg, &get("s", "k")).unwrap() else {
            panic!("expected value");
        };
        assert_eq!(value, json!("plain text"));
    }

    #[test]
    fn missing_key_is_an_error_and_releases_store() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        assert!(execute(&reg, &get("s", "absent")).is_err());
        assert_eq!(reg.outstanding(), 0);
        reg.close().unwrap();
    }

    #[test]
    fn remove_list_and_info() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        execute(&reg, &set("s", "a", "1")).unwrap();
        execute(&reg, &set("s", "b", "2")).unwrap();

        let removed = execute(
            &reg,
            &Command::Remove(KeyArgs {
                store: "s".into(),
                key: "a".into(),
            }),
        )
        .unwrap();
        assert!(matches!(removed, Report::Removed { existed: true, .. }));

        let listed = execute(&reg, &Command::List(StoreArgs { store: "s".into() })).unwrap();
        let Report::Entries { entries, .. } = listed else {
            panic!("expected entries");
        };
        assert_eq!(entries.into_iter().collect::<Vec<_>>(), vec![("b".to_owned(), json!(2))]);

        let Report::Info(info) = execute(&reg, &Command::Info(StoreArgs { store: "s".into() })).unwrap()
        else {
            panic!("expected info");
        };
        assert_eq!(info.entries, 1);
        assert_eq!(info.txid, 3);
        assert!(info.log_bytes > 0);
        assert!(info.path.ends_with("s"));
    }

    #[test]
    fn checkpoint_truncates_log() {
        let dir = tempfile::tempdir().unwrap();
        let reg = Registry::new(Settings {
            checkpoint: Some(CheckpointPredicate::Never),
            ..Settings::new(dir.path())
        })
        .unwrap();
        execute(&reg, &set("s", "k", "true")).unwrap();

        let report = execute(&reg, &Command::Checkpoint(StoreArgs { store: "s".into() })).unwrap();
        assert_eq!(
            report,
            Report::Checkpointed {
                store: "s".into(),
                txid: 1
            }
        );
        let Report::Info(info) = execute(&reg, &Command::Info(StoreArgs { store: "s".into() })).unwrap()
        else {
            panic!("expected info");
        };
        assert_eq!(info.log_bytes, 0);
        assert_eq!(info.entries, 1);
    }

    #[test]
    fn invalid_store_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        assert!(execute(&reg, &get("../escape", "k")).is_err());
    }

    #[test]
    fn json_report_is_tagged() {
        let report = Report::Checkpointed {
            store: "s".into(),
            txid: 7,
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({"result": "checkpointed", "store": "s", "txid": 7})
        );
    }
}
