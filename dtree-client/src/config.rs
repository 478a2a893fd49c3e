//! The one client-observable piece of configuration (spec §6): the path
//! to a storage-cluster descriptor file mapping containers to servers.

use std::path::{Path, PathBuf};

use dtree_error::{DtError, DtResult};
use dtree_generic::Cid;

use crate::transport::ServerId;

const GAIACONFIG_ENV: &str = "GAIACONFIG";
const DEFAULT_CONFIG_PATH: &str = "/etc/dtree/gaiaconfig.toml";

/// A single entry of the on-disk descriptor: a half-open range of `Cid`
/// values and the server that owns it.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
struct DescriptorEntry {
    cid_start: u64,
    cid_end: u64,
    server: String,
}

#[derive(Clone, serde::Deserialize, serde::Serialize, Default)]
struct DescriptorFile {
    #[serde(default)]
    servers: Vec<DescriptorEntry>,
}

/// The container-to-server mapping read from the descriptor file.
#[derive(Clone, Default)]
pub struct ClusterDescriptor {
    ranges: Vec<(u64, u64, ServerId)>,
}

impl ClusterDescriptor {
    /// The path this process should read its descriptor from: `GAIACONFIG`
    /// if set, else the compiled-in default.
    pub fn default_path() -> PathBuf {
        std::env::var(GAIACONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn load_default() -> DtResult<Self> {
        Self::load(&Self::default_path())
    }

    pub fn load(path: &Path) -> DtResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DtError::generic(format!("failed to read {}: {}", path.display(), e)))?;
        Self::parse(&contents)
    }

    pub fn parse(toml_text: &str) -> DtResult<Self> {
        let file: DescriptorFile = toml::from_str(toml_text)
            .map_err(|e| DtError::generic(format!("invalid cluster descriptor: {}", e)))?;

        let ranges = file
            .servers
            .into_iter()
            .map(|entry| (entry.cid_start, entry.cid_end, ServerId(entry.server)))
            .collect();

        Ok(Self { ranges })
    }

    /// The server owning `cid`, by the first matching range.
    pub fn server_for(&self, cid: Cid) -> DtResult<&ServerId> {
        let value = cid.as_u64();
        self.ranges
            .iter()
            .find(|(start, end, _)| value >= *start && value < *end)
            .map(|(_, _, server)| server)
            .ok_or_else(|| DtError::generic(format!("no server owns {}", cid)))
    }

    pub fn all_servers(&self) -> impl Iterator<Item = &ServerId> {
        self.ranges.iter().map(|(_, _, server)| server)
    }
}

/// Compile-time toggles of interest (spec §6), read once at process start.
#[derive(Clone, Copy, Debug)]
pub struct FeatureFlags {
    pub split_location_client: bool,
    pub write_on_prepare: bool,
    pub occ: bool,
    pub client_consistent_cache: bool,
    pub optimistic_insert: bool,
    pub direct_seek: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            split_location_client: true,
            write_on_prepare: false,
            occ: false,
            client_consistent_cache: true,
            optimistic_insert: true,
            direct_seek: true,
        }
    }
}

impl FeatureFlags {
    /// Read overrides from the process environment; any variable absent
    /// or unparseable falls back to the default.
    pub fn from_env() -> Self {
        let mut flags = Self::default();
        let mut bit = |var: &str, field: &mut bool| {
            if let Ok(value) = std::env::var(var) {
                *field = value != "0" && !value.eq_ignore_ascii_case("false");
            }
        };
        bit("DTREE_SPLIT_LOCATION_CLIENT", &mut flags.split_location_client);
        bit("GAIA_WRITE_ON_PREPARE", &mut flags.write_on_prepare);
        bit("GAIA_OCC", &mut flags.occ);
        bit("GAIA_CLIENT_CONSISTENT_CACHE", &mut flags.client_consistent_cache);
        bit("DTREE_OPTIMISTIC_INSERT", &mut flags.optimistic_insert);
        bit("DTREE_DIRECT_SEEK", &mut flags.direct_seek);
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_descriptor_and_resolves_server() {
        let toml_text = r#"
            [[servers]]
            cid_start = 0
            cid_end = 100
            server = "storage-a:7000"

            [[servers]]
            cid_start = 100
            cid_end = 200
            server = "storage-b:7000"
        "#;

        let descriptor = ClusterDescriptor::parse(toml_text).unwrap();
        assert_eq!(descriptor.server_for(Cid::new(50)).unwrap().0, "storage-a:7000");
        assert_eq!(descriptor.server_for(Cid::new(150)).unwrap().0, "storage-b:7000");
        assert!(descriptor.server_for(Cid::new(500)).is_err());
    }

    #[test]
    fn default_path_honors_gaiaconfig_env() {
        std::env::set_var(GAIACONFIG_ENV, "/tmp/custom-gaiaconfig.toml");
        assert_eq!(ClusterDescriptor::default_path(), PathBuf::from("/tmp/custom-gaiaconfig.toml"));
        std::env::remove_var(GAIACONFIG_ENV);
    }
}
