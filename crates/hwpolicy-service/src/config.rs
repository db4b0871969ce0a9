use std::path::{Path, PathBuf};
use std::time::Duration;

use hwpolicy_core::{
    enforce, DecayPolicy, HardwareCatalog, HardwareSpec, Normalization, PolicyWeights,
    DEFAULT_BASELINE, DEFAULT_DECAY_RATE, DEFAULT_DECAY_THRESHOLD,
};
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_STATE_PATH: &str = "./data/policy-state.json";
pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8791";
pub const DEFAULT_DECAY_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_PERSIST_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    Http,
}

/// Knobs the policy service itself needs, independent of where it is served.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySettings {
    pub baseline: PolicyWeights,
    pub decay: DecayPolicy,
    /// Upper bound on one store call; zero runs the store inline.
    pub persist_timeout: Duration,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            baseline: DEFAULT_BASELINE,
            decay: DecayPolicy::default(),
            persist_timeout: Duration::from_millis(DEFAULT_PERSIST_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub state_path: PathBuf,
    pub catalog: HardwareCatalog,
    pub settings: PolicySettings,
    /// Zero disables the background decay ticker.
    pub decay_interval: Duration,
    pub transport: Transport,
    pub http_addr: String,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let state_path = var("HWPOLICY_STATE_PATH")
            .map_or_else(|| PathBuf::from(DEFAULT_STATE_PATH), PathBuf::from);

        let (catalog, baseline) = match var("HWPOLICY_CATALOG") {
            Some(path) => {
                let (catalog, baseline) = load_catalog_file(Path::new(&path))?;
                (catalog, baseline.unwrap_or(DEFAULT_BASELINE))
            }
            None => (HardwareCatalog::builtin(), DEFAULT_BASELINE),
        };

        let decay = DecayPolicy {
            rate: parse_f64(var("HWPOLICY_DECAY_RATE"), DEFAULT_DECAY_RATE, 0.0, 1.0),
            threshold: parse_f64(
                var("HWPOLICY_DECAY_THRESHOLD"),
                DEFAULT_DECAY_THRESHOLD,
                0.0,
                1.0,
            ),
        };
        let persist_timeout = Duration::from_millis(parse_u64(
            var("HWPOLICY_PERSIST_TIMEOUT_MS"),
            DEFAULT_PERSIST_TIMEOUT_MS,
            0,
            60_000,
        ));
        let decay_interval = Duration::from_secs(parse_u64(
            var("HWPOLICY_DECAY_INTERVAL_SECS"),
            DEFAULT_DECAY_INTERVAL_SECS,
            0,
            86_400,
        ));

        let transport = match var("HWPOLICY_TRANSPORT")
            .map(|v| v.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("stdio") => Transport::Stdio,
            Some("http") => Transport::Http,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    field: "HWPOLICY_TRANSPORT".to_string(),
                    message: format!("must be stdio or http, got {other}"),
                })
            }
        };
        let http_addr = var("HWPOLICY_HTTP_ADDR").unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string());

        Ok(Self {
            state_path,
            catalog,
            settings: PolicySettings {
                baseline,
                decay,
                persist_timeout,
            },
            decay_interval,
            transport,
            http_addr,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    normalization: Normalization,
    #[serde(default)]
    baseline: Option<PolicyWeights>,
    hardware: Vec<HardwareSpec>,
}

pub fn load_catalog_file(
    path: &Path,
) -> Result<(HardwareCatalog, Option<PolicyWeights>), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_catalog_toml(&content, &path.display().to_string())
}

/// Parses a catalog document. A baseline that breaks the weight bounds is
/// repaired rather than rejected.
pub fn parse_catalog_toml(
    content: &str,
    origin: &str,
) -> Result<(HardwareCatalog, Option<PolicyWeights>), ConfigError> {
    let file: CatalogFile = toml::from_str(content).map_err(|e| ConfigError::Parse {
        path: origin.to_string(),
        message: e.to_string(),
    })?;
    let catalog = HardwareCatalog::new(file.hardware, file.normalization)?;
    let baseline = file.baseline.map(|raw| {
        if raw.is_valid() {
            raw
        } else {
            let repaired = enforce(raw);
            tracing::warn!(
                origin,
                ?raw,
                ?repaired,
                "configured baseline violates weight bounds; using repaired weights"
            );
            repaired
        }
    });
    Ok((catalog, baseline))
}

fn parse_f64(raw: Option<String>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

fn parse_u64(raw: Option<String>, default: u64, min: u64, max: u64) -> u64 {
    raw.and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}
