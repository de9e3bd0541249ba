//! Configuration management for lux-cli.
//!
//! Settings live in `~/.lux/config.toml` and may be overridden per project by a
//! `.luxconfig.toml` in the working directory. Keys use `section.setting`
//! notation, e.g. `local.numNodes`.

use crate::constants::{BASE_DIR_ENV, BASE_DIR_NAME, CONFIG_FILE_NAME, PROJECT_CONFIG_FILE_NAME};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use toml::Value;

/// Effective CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub local: LocalConfig,
    pub network: NetworkDefaults,
    pub evm: EvmDefaults,
    pub staking: StakingDefaults,
    pub node: NodeDefaults,
    pub mpc: MpcConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LocalConfig {
    pub num_nodes: u32,
    pub auto_track_subnets: bool,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            num_nodes: 5,
            auto_track_subnets: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkDefaults {
    pub default_network: String,
    pub luxd_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub luxd_path: Option<PathBuf>,
}

impl Default for NetworkDefaults {
    fn default() -> Self {
        Self {
            default_network: "local".to_string(),
            luxd_version: "latest".to_string(),
            luxd_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EvmDefaults {
    pub default_token_name: String,
    pub default_token_symbol: String,
    pub default_token_supply: String,
}

impl Default for EvmDefaults {
    fn default() -> Self {
        Self {
            default_token_name: "TEST".to_string(),
            default_token_symbol: "TEST".to_string(),
            default_token_supply: "1000000000000000000000000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StakingDefaults {
    pub bootstrap_validator_balance: f64,
    pub bootstrap_validator_weight: u64,
}

impl Default for StakingDefaults {
    fn default() -> Self {
        Self {
            bootstrap_validator_balance: 1.0,
            bootstrap_validator_weight: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeDefaults {
    pub default_instance_type: String,
    pub default_region: String,
}

impl Default for NodeDefaults {
    fn default() -> Self {
        Self {
            default_instance_type: "t3.medium".to_string(),
            default_region: "us-east-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct MpcConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Int,
    Bool,
    Float,
    Str,
    Path,
}

/// Every settable key and its value type.
const KEYS: &[(&str, Kind)] = &[
    ("local.numNodes", Kind::Int),
    ("local.autoTrackSubnets", Kind::Bool),
    ("network.defaultNetwork", Kind::Str),
    ("network.luxdVersion", Kind::Str),
    ("network.luxdPath", Kind::Path),
    ("evm.defaultTokenName", Kind::Str),
    ("evm.defaultTokenSymbol", Kind::Str),
    ("evm.defaultTokenSupply", Kind::Str),
    ("staking.bootstrapValidatorBalance", Kind::Float),
    ("staking.bootstrapValidatorWeight", Kind::Int),
    ("node.defaultInstanceType", Kind::Str),
    ("node.defaultRegion", Kind::Str),
    ("mpc.binaryPath", Kind::Path),
    ("mpc.dataDir", Kind::Path),
];

/// Where an effective value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Default,
    Global,
    Project,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Global => write!(f, "global"),
            ConfigSource::Project => write!(f, "project"),
        }
    }
}

/// Base directory for all CLI state (`$LUX_HOME` or `~/.lux`).
pub fn base_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(BASE_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let home_dir = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home_dir.join(BASE_DIR_NAME))
}

/// Global and project config files.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    global_path: PathBuf,
    project_path: PathBuf,
}

impl ConfigStore {
    pub fn new(global_path: PathBuf, project_path: PathBuf) -> Self {
        Self {
            global_path,
            project_path,
        }
    }

    /// Store rooted at `base_dir`, with the project file in the working directory.
    pub fn open(base_dir: &Path) -> Result<Self> {
        let cwd = std::env::current_dir().context("Could not determine working directory")?;
        Ok(Self::new(
            base_dir.join(CONFIG_FILE_NAME),
            cwd.join(PROJECT_CONFIG_FILE_NAME),
        ))
    }

    pub fn path(&self, project: bool) -> &Path {
        if project {
            &self.project_path
        } else {
            &self.global_path
        }
    }

    fn read_table(path: &Path) -> Result<toml::Table> {
        if !path.exists() {
            return Ok(toml::Table::new());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let table: toml::Table = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(table)
    }

    /// Effective configuration: defaults, then global, then project.
    pub fn load(&self) -> Result<Config> {
        let mut merged = default_table()?;
        merge(&mut merged, Self::read_table(&self.global_path)?);
        merge(&mut merged, Self::read_table(&self.project_path)?);
        let config: Config = Value::Table(merged)
            .try_into()
            .context("Failed to parse merged configuration")?;
        Ok(config)
    }

    /// Value and source for a `section.setting` key.
    pub fn get(&self, key: &str) -> Result<(String, ConfigSource)> {
        let (section, setting) = lookup_key(key)?;
        for (path, source) in [
            (&self.project_path, ConfigSource::Project),
            (&self.global_path, ConfigSource::Global),
        ] {
            let table = Self::read_table(path)?;
            if let Some(value) = table
                .get(section)
                .and_then(|s| s.get(setting))
            {
                return Ok((display_value(value), source));
            }
        }
        let defaults = default_table()?;
        let value = defaults
            .get(section)
            .and_then(|s| s.get(setting))
            .map(display_value)
            .unwrap_or_default();
        Ok((value, ConfigSource::Default))
    }

    /// Parse `raw` per the key's type and persist it.
    pub fn set(&self, key: &str, raw: &str, project: bool) -> Result<()> {
        let (section, setting) = lookup_key(key)?;
        let kind = KEYS
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, kind)| *kind)
            .unwrap_or(Kind::Str);
        let value = parse_value(key, raw, kind)?;

        let path = self.path(project).to_path_buf();
        let mut table = Self::read_table(&path)?;
        let entry = table
            .entry(section.to_string())
            .or_insert_with(|| Value::Table(toml::Table::new()));
        match entry {
            Value::Table(t) => {
                t.insert(setting.to_string(), value);
            }
            _ => bail!("config section {} is not a table in {}", section, path.display()),
        }
        write_table(&path, &table)
    }

    /// All keys with effective values and sources.
    pub fn list(&self) -> Result<Vec<(String, String, ConfigSource)>> {
        KEYS.iter()
            .map(|(key, _)| {
                let (value, source) = self.get(key)?;
                Ok((key.to_string(), value, source))
            })
            .collect()
    }

    /// Write a config file with defaults. Refuses to overwrite unless `force`.
    pub fn init(&self, project: bool, force: bool) -> Result<PathBuf> {
        let path = self.path(project).to_path_buf();
        if path.exists() && !force {
            bail!(
                "config file {} already exists, use --force to overwrite",
                path.display()
            );
        }
        let table = default_table()?;
        write_table(&path, &table)?;
        Ok(path)
    }
}

fn default_table() -> Result<toml::Table> {
    match Value::try_from(Config::default())? {
        Value::Table(table) => Ok(table),
        _ => bail!("default configuration is not a table"),
    }
}

fn write_table(path: &Path, table: &toml::Table) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }
    let contents = toml::to_string_pretty(table).context("Failed to serialize config")?;
    std::fs::write(path, contents)
        .with_context(|| format!("Failed to write config file {}", path.display()))?;
    Ok(())
}

fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => merge(existing, incoming),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn lookup_key(key: &str) -> Result<(&str, &str)> {
    let Some((section, setting)) = key.split_once('.') else {
        bail!("invalid key format: use section.setting (e.g., local.numNodes)");
    };
    if !KEYS.iter().any(|(k, _)| k.starts_with(&format!("{}.", section))) {
        bail!("unknown section: {}", section);
    }
    if !KEYS.iter().any(|(k, _)| *k == key) {
        bail!("unknown {} setting: {}", section, setting);
    }
    Ok((section, setting))
}

fn parse_value(key: &str, raw: &str, kind: Kind) -> Result<Value> {
    let value = match kind {
        Kind::Int => Value::Integer(
            raw.parse::<i64>()
                .with_context(|| format!("invalid value for {}: expected an integer", key))?,
        ),
        Kind::Bool => Value::Boolean(
            raw.parse::<bool>()
                .with_context(|| format!("invalid value for {}: expected true or false", key))?,
        ),
        Kind::Float => Value::Float(
            raw.parse::<f64>()
                .with_context(|| format!("invalid value for {}: expected a number", key))?,
        ),
        Kind::Str | Kind::Path => Value::String(raw.to_string()),
    };
    Ok(value)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Float(f) => format!("{:.2}", f),
        other => other.to_string(),
    }
}

/// Keys `config lint` accepts without a warning.
const KNOWN_NODE_KEYS: &[&str] = &[
    "network-id",
    "http-host",
    "http-port",
    "staking-port",
    "public-ip",
    "data-dir",
    "db-dir",
    "db-type",
    "log-dir",
    "log-level",
    "plugin-dir",
    "chain-config-dir",
    "subnet-config-dir",
    "track-subnets",
    "bootstrap-ips",
    "bootstrap-ids",
    "staking-tls-cert-file",
    "staking-tls-key-file",
    "staking-signer-key-file",
    "api-admin-enabled",
    "api-metrics-enabled",
    "index-enabled",
    "http-allowed-origins",
    "http-allowed-hosts",
    "sybil-protection-enabled",
];
const PORT_KEYS: &[&str] = &["http-port", "staking-port"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LintReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl LintReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check a luxd node config JSON file for common mistakes.
pub fn lint_node_config(path: &Path) -> Result<LintReport> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read node config {}", path.display()))?;
    let mut report = LintReport::default();
    let config = match serde_json::from_str::<serde_json::Value>(&contents) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(_) => {
            report.errors.push("config must be a JSON object".to_string());
            return Ok(report);
        }
        Err(e) => {
            report.errors.push(format!("invalid JSON: {}", e));
            return Ok(report);
        }
    };

    for (key, value) in &config {
        if PORT_KEYS.contains(&key.as_str()) {
            match value.as_u64() {
                Some(port) if (1..=65535).contains(&port) => {}
                _ => report
                    .errors
                    .push(format!("{} must be a port number between 1 and 65535, got {}", key, value)),
            }
        } else if key == "network-id" {
            if !(value.is_string() || value.is_number()) {
                report
                    .errors
                    .push(format!("network-id must be a string or number, got {}", value));
            }
        } else if key == "track-subnets" {
            match value.as_str() {
                Some(list) => {
                    for id in list.split(',').map(str::trim).filter(|id| !id.is_empty()) {
                        if crate::ids::parse_id(id).is_err() {
                            report
                                .errors
                                .push(format!("track-subnets entry {:?} is not a valid ID", id));
                        }
                    }
                }
                None => report
                    .errors
                    .push("track-subnets must be a comma-separated string".to_string()),
            }
        } else if key == "whitelisted-subnets" {
            report
                .warnings
                .push("whitelisted-subnets is deprecated, use track-subnets".to_string());
        } else if !KNOWN_NODE_KEYS.contains(&key.as_str()) {
            report.warnings.push(format!("unknown key {}", key));
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ConfigStore {
        ConfigStore::new(
            dir.path().join("global").join("config.toml"),
            dir.path().join("project").join(".luxconfig.toml"),
        )
    }

    #[test]
    fn test_defaults_when_no_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert_eq!(store.load().unwrap(), Config::default());
        let (value, source) = store.get("local.numNodes").unwrap();
        assert_eq!(value, "5");
        assert_eq!(source, ConfigSource::Default);
    }

    #[test]
    fn test_project_overrides_global() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.set("evm.defaultTokenName", "GLOBAL", false).unwrap();
        assert_eq!(
            store.get("evm.defaultTokenName").unwrap(),
            ("GLOBAL".to_string(), ConfigSource::Global)
        );

        store.set("evm.defaultTokenName", "PROJ", true).unwrap();
        assert_eq!(
            store.get("evm.defaultTokenName").unwrap(),
            ("PROJ".to_string(), ConfigSource::Project)
        );
        assert_eq!(store.load().unwrap().evm.default_token_name, "PROJ");
    }

    #[test]
    fn test_typed_values() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.set("local.numNodes", "3", false).unwrap();
        store.set("local.autoTrackSubnets", "false", false).unwrap();
        store
            .set("staking.bootstrapValidatorBalance", "2.5", false)
            .unwrap();

        let config = store.load().unwrap();
        assert_eq!(config.local.num_nodes, 3);
        assert!(!config.local.auto_track_subnets);
        assert_eq!(config.staking.bootstrap_validator_balance, 2.5);

        assert!(store.set("local.numNodes", "many", false).is_err());
    }

    #[test]
    fn test_key_errors() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let err = store.get("numNodes").unwrap_err().to_string();
        assert!(err.contains("invalid key format"));
        let err = store.get("bogus.key").unwrap_err().to_string();
        assert_eq!(err, "unknown section: bogus");
        let err = store.get("local.bogus").unwrap_err().to_string();
        assert_eq!(err, "unknown local setting: bogus");
    }

    #[test]
    fn test_init_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let path = store.init(false, false).unwrap();
        assert!(path.exists());
        assert!(store.init(false, false).is_err());
        assert!(store.init(false, true).is_ok());
    }

    #[test]
    fn test_list_covers_all_keys() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let entries = store.list().unwrap();
        assert_eq!(entries.len(), KEYS.len());
        let (_, value, _) = entries
            .iter()
            .find(|(k, _, _)| k == "staking.bootstrapValidatorBalance")
            .unwrap();
        assert_eq!(value, "1.00");
    }

    #[test]
    fn test_lint_node_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node.json");
        let subnet = crate::ids::cb58_encode(&[7u8; 32]);
        std::fs::write(
            &path,
            format!(
                r#"{{"http-port": 9630, "staking-port": 70000, "network-id": true,
                    "track-subnets": "{},bogus", "whitelisted-subnets": "", "mystery": 1}}"#,
                subnet
            ),
        )
        .unwrap();

        let report = lint_node_config(&path).unwrap();
        assert!(!report.is_ok());
        assert_eq!(report.errors.len(), 3);
        assert!(report.errors.iter().any(|e| e.starts_with("staking-port")));
        assert!(report.errors.iter().any(|e| e.contains("\"bogus\"")));
        assert_eq!(report.warnings.len(), 2);

        std::fs::write(&path, "[1, 2]").unwrap();
        assert_eq!(
            lint_node_config(&path).unwrap().errors,
            vec!["config must be a JSON object"]
        );

        std::fs::write(&path, r#"{"network-id": "testnet", "http-port": 9650}"#).unwrap();
        assert_eq!(lint_node_config(&path).unwrap(), LintReport::default());
    }
}
