//! TOML routes file and its watcher.
//!
//! ```toml
//! [servers.ds1]
//! host = "a.example"
//! downstream-url = "127.0.0.1:8081"
//! ```

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::error::RouteSourceError;
use crate::proxy::RoutingEntry;
use crate::reload::{reload_channel, ReloadReceiver, ReloadSignal, RouteSource};

#[derive(Debug, Default, Deserialize)]
struct RoutesDocument {
    #[serde(default)]
    servers: BTreeMap<String, ServerEntry>,
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    host: String,
    #[serde(rename = "downstream-url")]
    downstream_url: String,
}

/// Routes read from a TOML file on every call.
#[derive(Debug, Clone)]
pub struct RoutesFile {
    path: PathBuf,
}

impl RoutesFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse routes file contents. Entries come back sorted by server name.
    pub fn parse(path: &Path, contents: &str) -> Result<Vec<RoutingEntry>, RouteSourceError> {
        let document: RoutesDocument =
            toml::from_str(contents).map_err(|source| RouteSourceError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mut owners: HashMap<&str, &str> = HashMap::new();
        for (name, server) in &document.servers {
            if let Some(first) = owners.insert(server.host.as_str(), name.as_str()) {
                return Err(RouteSourceError::DuplicateHost {
                    host: server.host.clone(),
                    first: first.to_string(),
                    second: name.clone(),
                });
            }
        }

        Ok(document
            .servers
            .into_values()
            .map(|server| RoutingEntry::new(server.host, server.downstream_url))
            .collect())
    }
}

impl RouteSource for RoutesFile {
    fn current_entries(&self) -> Result<Vec<RoutingEntry>, RouteSourceError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Routes file not found, no routes");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(RouteSourceError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        Self::parse(&self.path, &contents)
    }
}

/// Watches a routes file and emits a [`ReloadSignal`] when it changes.
///
/// The parent directory is watched rather than the file itself, so the file
/// may be created, replaced, or removed after the watcher starts. Watching
/// stops when the handle is dropped.
pub struct RoutesWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl RoutesWatcher {
    /// Start watching `path`. The parent directory must exist.
    pub fn start(path: &Path) -> Result<(Self, ReloadReceiver), notify::Error> {
        let (tx, rx) = reload_channel();

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name: Option<OsString> = path.file_name().map(OsString::from);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let relevant_kind =
                    event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove();
                let touches_file = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(OsString::from) == file_name);
                if relevant_kind && touches_file {
                    debug!(kind = ?event.kind, "Routes file change detected");
                    // Receiver gone means the reload loop has stopped.
                    let _ = tx.send(ReloadSignal);
                }
            }
            Err(e) => error!(error = %e, "Routes watch error"),
        })?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        info!(path = %path.display(), dir = %dir.display(), "Routes watcher started");

        Ok((
            Self {
                path: path.to_path_buf(),
                _watcher: watcher,
            },
            rx,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
