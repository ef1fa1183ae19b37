//! Process-local implementations of the terminal's collaborator traits:
//! a file-seedable data service, the OS clipboard, downloads written to
//! the working directory, and a logging navigator.

use crate::service::{Clipboard, DataService, EntityKind, FetchOutcome, FileSink, Navigator};
use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use tracing::{info, warn};

/// Entity data served from a JSON seed file, with built-in sample records
/// when no seed exists. The file holds one array per entity tag, e.g.
/// `{"jobs": [...], "properties": [...]}`.
pub struct LocalDataService {
    collections: Mutex<HashMap<EntityKind, Vec<Value>>>,
}

impl LocalDataService {
    /// Reads `data.json` from the data directory if present, otherwise
    /// falls back to the built-in sample set.
    pub fn load_or_default(data_dir: &Path) -> Self {
        let path = data_dir.join("data.json");
        let collections = match fs::read_to_string(&path) {
            Ok(raw) => match parse_seed(&raw) {
                Ok(map) => {
                    info!("loaded entity data from {}", path.display());
                    map
                }
                Err(err) => {
                    warn!("ignoring malformed {}: {err}", path.display());
                    sample_collections()
                }
            },
            Err(_) => sample_collections(),
        };
        Self {
            collections: Mutex::new(collections),
        }
    }
}

impl DataService for LocalDataService {
    fn fetch(&self, kind: EntityKind) -> FetchOutcome {
        match self.collections.lock() {
            Ok(map) => FetchOutcome::ok(map.get(&kind).cloned().unwrap_or_default()),
            Err(_) => FetchOutcome::err("data store lock poisoned"),
        }
    }
}

fn parse_seed(raw: &str) -> Result<HashMap<EntityKind, Vec<Value>>> {
    let root: Value = serde_json::from_str(raw).context("data.json is not valid JSON")?;
    let obj = root
        .as_object()
        .ok_or_else(|| anyhow!("data.json root must be an object"))?;
    let mut map = HashMap::new();
    for kind in EntityKind::ALL {
        let records = obj
            .get(kind.export_tag())
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        map.insert(kind, records);
    }
    Ok(map)
}

fn sample_collections() -> HashMap<EntityKind, Vec<Value>> {
    let mut map = HashMap::new();
    map.insert(
        EntityKind::Jobs,
        vec![
            json!({
                "id": "9f2c41d7-6a80-4b1e-9e33-0d5a7c812f04",
                "status": "scheduled",
                "properties": {"name": "Harborview Apartments"},
                "template_name": "Quarterly HVAC Service",
                "scheduled_date": "2026-09-04",
                "created_at": "2026-08-20T09:14:00Z"
            }),
            json!({
                "id": "3bd08a12-55f1-4c96-8a7d-41e9b0c6d2aa",
                "status": "in_progress",
                "properties": {"name": "Cedar Ridge Office Park"},
                "template_name": "Roof Inspection",
                "scheduled_date": "2026-08-28",
                "created_at": "2026-08-15T13:40:00Z"
            }),
            json!({
                "id": "7e61f9c3-2b4d-4f08-b1a6-90c2d5e8731b",
                "status": "complete",
                "properties": {"name": "Lakeside Medical Center"},
                "template_name": "Gutter Cleaning",
                "scheduled_date": "2026-08-11",
                "created_at": "2026-08-01T08:02:00Z"
            }),
        ],
    );
    map.insert(
        EntityKind::Properties,
        vec![
            json!({
                "id": "p-1001",
                "name": "Harborview Apartments",
                "address": "18 Harbor Way",
                "city": "Portland",
                "state": "OR",
                "zip": "97209"
            }),
            json!({
                "id": "p-1002",
                "name": "Cedar Ridge Office Park",
                "address": "400 Cedar Ridge Dr",
                "city": "Beaverton",
                "state": "OR",
                "zip": "97005"
            }),
            json!({
                "id": "p-1003",
                "name": "Lakeside Medical Center",
                "address": "77 Lakeside Blvd",
                "city": "Lake Oswego",
                "state": "OR",
                "zip": "97034"
            }),
        ],
    );
    map.insert(
        EntityKind::People,
        vec![
            json!({
                "id": "u-201",
                "first_name": "Maya",
                "last_name": "Lindqvist",
                "email": "maya@harborview.example",
                "phone": "503-555-0117"
            }),
            json!({
                "id": "u-202",
                "first_name": "Devon",
                "last_name": "Okafor",
                "email": "devon@cedarridge.example",
                "phone": "503-555-0142"
            }),
        ],
    );
    map.insert(
        EntityKind::Opportunities,
        vec![
            json!({
                "id": "so-301",
                "workflow_status": "open",
                "property_name": "Harborview Apartments",
                "service_template_name": "Window Washing",
                "due_date": "2026-09-15",
                "created_at": "2026-08-22T10:30:00Z"
            }),
            json!({
                "id": "so-302",
                "workflow_status": "quoted",
                "property_name": "Lakeside Medical Center",
                "service_template_name": "Parking Lot Restriping",
                "due_date": "2026-10-01",
                "created_at": "2026-08-25T16:05:00Z"
            }),
        ],
    );
    map
}

/// OS clipboard via the platform's copy utility, fed over stdin.
pub struct SystemClipboard;

impl SystemClipboard {
    #[cfg(target_os = "macos")]
    const CANDIDATES: &'static [(&'static str, &'static [&'static str])] = &[("pbcopy", &[])];

    #[cfg(not(target_os = "macos"))]
    const CANDIDATES: &'static [(&'static str, &'static [&'static str])] = &[
        ("wl-copy", &[]),
        ("xclip", &["-selection", "clipboard"]),
        ("xsel", &["--clipboard", "--input"]),
    ];
}

impl Clipboard for SystemClipboard {
    fn write_text(&self, text: &str) -> Result<()> {
        for (program, args) in Self::CANDIDATES {
            let spawned = Command::new(program)
                .args(*args)
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn();
            let mut child = match spawned {
                Ok(child) => child,
                Err(_) => continue,
            };
            child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("{program} has no stdin"))?
                .write_all(text.as_bytes())
                .with_context(|| format!("writing to {program}"))?;
            let status = child.wait().with_context(|| format!("waiting for {program}"))?;
            if !status.success() {
                return Err(anyhow!("{program} exited with {status}"));
            }
            return Ok(());
        }
        Err(anyhow!("no clipboard utility found"))
    }
}

/// Writes downloaded files into the current working directory. Failures are
/// logged; the interpreter has already announced the download by the time
/// this runs.
pub struct CwdDownloads;

impl FileSink for CwdDownloads {
    fn deliver(&self, filename: &str, content: &str) {
        // The redirect filename charset already excludes path separators.
        if let Err(err) = fs::write(filename, content) {
            warn!("could not write {filename}: {err}");
        } else {
            info!("wrote {filename} ({} bytes)", content.len());
        }
    }
}

/// Stand-in for an application router: navigation targets are logged so a
/// host embedding the terminal can watch for them.
pub struct LoggingNavigator;

impl Navigator for LoggingNavigator {
    fn navigate(&self, path: &str) {
        info!("navigate to {path}");
    }
}
