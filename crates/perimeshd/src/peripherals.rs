//! Built-in peripherals the daemon can attach from config.
//!
//! | type    | methods                          |
//! |---------|----------------------------------|
//! | `clock` | `time`, `epoch`, `uptime`        |
//! | `cell`  | `get`, `set`, `keys`, `clear`    |
//! | `drive` | `list`, `exists`, `size`         |
//! | `modem` | `getNodeId` (never shared)       |

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};
use perimesh_core::config::PeripheralConfig;
use perimesh_core::NodeId;
use perimesh_services::{Peripheral, PeripheralError, TablePeripheral};
use serde_json::{json, Value};

pub fn build(config: &PeripheralConfig, node: NodeId) -> Result<Arc<dyn Peripheral>> {
    let name = config.name.as_str();
    let peripheral = match config.kind.as_str() {
        "clock" => clock(name),
        "cell" => cell(name),
        "drive" => match &config.path {
            Some(root) => drive(name, root.clone()),
            None => bail!("drive '{}' needs a path", name),
        },
        "modem" => modem(name, node),
        other => bail!("unknown peripheral type '{}' for '{}'", other, name),
    };
    Ok(Arc::new(peripheral))
}

/// Everything in `configs` that builds. Bad entries are logged and skipped.
pub fn build_all(configs: &[PeripheralConfig], node: NodeId) -> Vec<Arc<dyn Peripheral>> {
    configs
        .iter()
        .filter_map(|c| match build(c, node) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!(name = %c.name, error = %e, "skipping peripheral");
                None
            }
        })
        .collect()
}

/// What a node gets when the config lists no peripherals.
pub fn defaults(node: NodeId) -> Vec<Arc<dyn Peripheral>> {
    vec![
        Arc::new(clock("clock")) as Arc<dyn Peripheral>,
        Arc::new(cell("cell")),
        Arc::new(modem("link", node)),
    ]
}

fn clock(name: &str) -> TablePeripheral {
    let started = Instant::now();
    TablePeripheral::new(name, "clock")
        .method("epoch", |_| Ok(vec![json!(epoch_millis())]))
        .method("time", |_| {
            let secs_today = (epoch_millis() / 1000) % 86_400;
            Ok(vec![json!(secs_today as f64 / 3600.0)])
        })
        .method("uptime", move |_| Ok(vec![json!(started.elapsed().as_secs_f64())]))
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn cell(name: &str) -> TablePeripheral {
    let store: Arc<Mutex<BTreeMap<String, Value>>> = Arc::default();
    let (get, set, keys, clear) = (store.clone(), store.clone(), store.clone(), store);

    TablePeripheral::new(name, "cell")
        .method("get", move |args| {
            let key = string_arg(args, 0)?;
            let map = get.lock().unwrap_or_else(|e| e.into_inner());
            Ok(vec![map.get(key).cloned().unwrap_or(Value::Null)])
        })
        .method("set", move |args| {
            let key = string_arg(args, 0)?.to_string();
            let value = args.get(1).cloned().unwrap_or(Value::Null);
            let mut map = set.lock().unwrap_or_else(|e| e.into_inner());
            let previous = if value.is_null() {
                map.remove(&key)
            } else {
                map.insert(key, value)
            };
            Ok(vec![previous.unwrap_or(Value::Null)])
        })
        .method("keys", move |_| {
            let map = keys.lock().unwrap_or_else(|e| e.into_inner());
            Ok(vec![json!(map.keys().collect::<Vec<_>>())])
        })
        .method("clear", move |_| {
            let mut map = clear.lock().unwrap_or_else(|e| e.into_inner());
            let removed = map.len();
            map.clear();
            Ok(vec![json!(removed)])
        })
}

/// Read-only view of one directory tree.
fn drive(name: &str, root: PathBuf) -> TablePeripheral {
    let (list_root, exists_root, size_root) = (root.clone(), root.clone(), root);

    TablePeripheral::new(name, "drive")
        .method("list", move |args| {
            let dir = resolve(&list_root, optional_string_arg(args, 0)?)?;
            let mut names: Vec<String> = std::fs::read_dir(&dir)
                .map_err(|e| PeripheralError::Failed(format!("{}: {e}", dir.display())))?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            Ok(vec![json!(names)])
        })
        .method("exists", move |args| {
            let path = resolve(&exists_root, Some(string_arg(args, 0)?))?;
            Ok(vec![json!(path.exists())])
        })
        .method("size", move |args| {
            let path = resolve(&size_root, Some(string_arg(args, 0)?))?;
            let meta = std::fs::metadata(&path)
                .map_err(|e| PeripheralError::Failed(format!("{}: {e}", path.display())))?;
            Ok(vec![json!(meta.len())])
        })
}

fn modem(name: &str, node: NodeId) -> TablePeripheral {
    TablePeripheral::new(name, "modem").method("getNodeId", move |_| Ok(vec![json!(node.0)]))
}

/// Join `relative` onto `root`, refusing anything that could escape it.
fn resolve(root: &Path, relative: Option<&str>) -> Result<PathBuf, PeripheralError> {
    let Some(relative) = relative else {
        return Ok(root.to_path_buf());
    };
    let rel = Path::new(relative);
    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(PeripheralError::BadArguments(format!(
            "path '{relative}' leaves the drive"
        )));
    }
    Ok(root.join(rel))
}

fn string_arg(args: &[Value], index: usize) -> Result<&str, PeripheralError> {
    optional_string_arg(args, index)?
        .ok_or_else(|| PeripheralError::BadArguments(format!("argument {} must be a string", index + 1)))
}

fn optional_string_arg(args: &[Value], index: usize) -> Result<Option<&str>, PeripheralError> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(PeripheralError::BadArguments(format!(
            "argument {} must be a string",
            index + 1
        ))),
    }
}
