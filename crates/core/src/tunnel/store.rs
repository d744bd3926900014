//! Read-only store of WireGuard peer configurations.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use super::error::StoreError;
use super::types::{TunnelConfig, TunnelId};

/// Holds the configurations the pool may provision.
///
/// Reloading swaps the whole set atomically. Tunnels that are already
/// installed keep the configuration they were provisioned with.
pub struct TunnelConfigStore {
    inline: Vec<TunnelConfig>,
    dir: Option<PathBuf>,
    configs: RwLock<Arc<Vec<TunnelConfig>>>,
}

impl TunnelConfigStore {
    /// Builds a store from inline peers and an optional peer directory.
    pub fn new(inline: Vec<TunnelConfig>, dir: Option<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            inline,
            dir,
            configs: RwLock::new(Arc::new(Vec::new())),
        };
        store.reload()?;
        Ok(store)
    }

    /// Store holding exactly `configs`.
    pub fn from_configs(configs: Vec<TunnelConfig>) -> Result<Self, StoreError> {
        Self::new(configs, None)
    }

    /// Re-reads the peer directory. On error the previous set stays active.
    pub fn reload(&self) -> Result<usize, StoreError> {
        let mut configs = self.inline.clone();
        if let Some(dir) = &self.dir {
            configs.extend(read_peer_dir(dir)?);
        }
        validate_set(&configs)?;

        let count = configs.len();
        match self.configs.write() {
            Ok(mut guard) => *guard = Arc::new(configs),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(configs),
        }
        info!(count, "Loaded tunnel configurations");
        Ok(count)
    }

    /// Current configuration set.
    pub fn all(&self) -> Arc<Vec<TunnelConfig>> {
        match self.configs.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn get(&self, id: &TunnelId) -> Option<TunnelConfig> {
        self.all().iter().find(|c| &c.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.all().len()
    }

    pub fn is_empty(&self) -> bool {
        self.all().is_empty()
    }
}

fn read_peer_dir(dir: &Path) -> Result<Vec<TunnelConfig>, StoreError> {
    let entries = std::fs::read_dir(dir).map_err(|e| StoreError::Read {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("toml"))
        .collect();
    paths.sort();

    let mut configs = Vec::with_capacity(paths.len());
    for path in paths {
        let content = std::fs::read_to_string(&path).map_err(|e| StoreError::Read {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let peer: TunnelConfig = toml::from_str(&content).map_err(|e| StoreError::Parse {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        configs.push(peer);
    }

    if configs.is_empty() {
        warn!(dir = ?dir, "Peer directory contains no *.toml files");
    }
    Ok(configs)
}

pub(crate) fn validate_set(configs: &[TunnelConfig]) -> Result<(), StoreError> {
    let mut ids = HashSet::new();
    let mut interfaces = HashSet::new();
    for config in configs {
        config.validate().map_err(StoreError::Invalid)?;
        if !ids.insert(config.id.clone()) {
            return Err(StoreError::Invalid(format!(
                "duplicate tunnel id '{}'",
                config.id
            )));
        }
        if let Some(name) = &config.interface_name {
            if !interfaces.insert(name.clone()) {
                return Err(StoreError::Invalid(format!(
                    "interface name '{}' used by more than one tunnel",
                    name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const KEY_A: &str = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=";
    const KEY_B: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";

    fn peer_toml(id: &str, range: &str) -> String {
        format!(
            r#"
id = "{}"
private_key = "{}"
peer_public_key = "{}"
endpoint = "vpn.example.net:51820"
allowed_ips = ["{}"]
address = "10.70.0.2/32"
"#,
            id, KEY_A, KEY_B, range
        )
    }

    #[test]
    fn test_load_from_directory_sorted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.toml"), peer_toml("b", "10.2.0.0/16")).unwrap();
        std::fs::write(dir.path().join("a.toml"), peer_toml("a", "10.1.0.0/16")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = TunnelConfigStore::new(Vec::new(), Some(dir.path().to_path_buf())).unwrap();
        let all = store.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id.as_str(), "a");
        assert!(store.get(&TunnelId::from("b")).is_some());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("1.toml"), peer_toml("same", "10.1.0.0/16")).unwrap();
        std::fs::write(dir.path().join("2.toml"), peer_toml("same", "10.2.0.0/16")).unwrap();

        let result = TunnelConfigStore::new(Vec::new(), Some(dir.path().to_path_buf()));
        assert!(matches!(result, Err(StoreError::Invalid(_))));
    }

    #[test]
    fn test_bad_key_reports_path() {
        let dir = TempDir::new().unwrap();
        let broken = peer_toml("x", "10.1.0.0/16").replace(KEY_A, "dG9vc2hvcnQ=");
        std::fs::write(dir.path().join("x.toml"), broken).unwrap();

        match TunnelConfigStore::new(Vec::new(), Some(dir.path().to_path_buf())) {
            Err(StoreError::Parse { path, reason }) => {
                assert!(path.ends_with("x.toml"));
                assert!(reason.contains("32 bytes"));
            }
            other => panic!("unexpected result: {:?}", other.map(|s| s.len())),
        }
    }

    #[test]
    fn test_reload_keeps_previous_set_on_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.toml"), peer_toml("a", "10.1.0.0/16")).unwrap();
        let store = TunnelConfigStore::new(Vec::new(), Some(dir.path().to_path_buf())).unwrap();

        std::fs::write(dir.path().join("b.toml"), "not = [valid").unwrap();
        assert!(store.reload().is_err());
        assert_eq!(store.len(), 1);

        std::fs::write(dir.path().join("b.toml"), peer_toml("b", "10.2.0.0/16")).unwrap();
        assert_eq!(store.reload().unwrap(), 2);
    }
}
