//! Ajustes de la cola y la configuración seccionada clave/valor del sistema que la usa.
//!
//! ```toml
//! [router]
//! threads = 4
//! nickname = "edge-1"
//!
//! [codel]
//! drop_threshold_ms = 5
//! initial_interval_ms = 100
//! delay_basis = "epoch_start"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

/// Punto de referencia contra el que la pasada de drenado mide la demora de cada item.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayBasis {
    /// `epoch_start - stamped`, donde el inicio de época es el tiempo sellado del
    /// primer item admitido desde la pasada anterior. Los items sellados después
    /// del inicio de época, y todos los de una pasada sin inicio de época, dan
    /// una muestra sin cota.
    #[default]
    EpochStart,
    /// `now - stamped`, leído del reloj de la política de tiempo una vez por pasada.
    Now,
}

/// Ajustes de construcción de una cola.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CoDelConfig {
    /// Demora mínima de una pasada por encima de la cual la pasada está congestionada.
    pub drop_threshold: Duration,
    /// Valor inicial del intervalo sugerido de drenado; se restablece en cada
    /// pasada sana.
    pub initial_interval: Duration,
    pub delay_basis: DelayBasis,
}

impl CoDelConfig {
    pub const DEFAULT_DROP_THRESHOLD: Duration = Duration::from_millis(5);
    pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(100);

    /// Constructor sin validación. Para valores que vienen de afuera del programa
    /// conviene [`CoDelConfig::try_new`].
    pub fn new(drop_threshold: Duration, initial_interval: Duration) -> Self {
        Self {
            drop_threshold,
            initial_interval,
            delay_basis: DelayBasis::EpochStart,
        }
    }

    /// Como [`CoDelConfig::new`], pero rechaza un `initial_interval` cero, que
    /// dejaría a un driver sin nada que esperar entre pasadas.
    pub fn try_new(
        drop_threshold: Duration,
        initial_interval: Duration,
    ) -> Result<Self, ConfigError> {
        if initial_interval.is_zero() {
            return Err(ConfigError::Codel(
                "initial_interval must be greater than zero".into(),
            ));
        }
        Ok(Self::new(drop_threshold, initial_interval))
    }

    pub fn with_delay_basis(mut self, basis: DelayBasis) -> Self {
        self.delay_basis = basis;
        self
    }
}

impl Default for CoDelConfig {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_DROP_THRESHOLD,
            Self::DEFAULT_INITIAL_INTERVAL,
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CoDelSection {
    drop_threshold_ms: u64,
    initial_interval_ms: u64,
    delay_basis: DelayBasis,
}

impl Default for CoDelSection {
    fn default() -> Self {
        let config = CoDelConfig::default();
        Self {
            drop_threshold_ms: config.drop_threshold.as_millis() as u64,
            initial_interval_ms: config.initial_interval.as_millis() as u64,
            delay_basis: config.delay_basis,
        }
    }
}

impl TryFrom<CoDelSection> for CoDelConfig {
    type Error = ConfigError;

    fn try_from(section: CoDelSection) -> Result<Self, Self::Error> {
        Ok(CoDelConfig::try_new(
            Duration::from_millis(section.drop_threshold_ms),
            Duration::from_millis(section.initial_interval_ms),
        )?
        .with_delay_basis(section.delay_basis))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("`{0}` must be a table of key/value pairs")]
    NotASection(String),
    #[error("[{section}] {key}: only scalar values are supported")]
    InvalidValue { section: String, key: String },
    #[error("[codel] {0}")]
    Codel(String),
}

pub type Section = BTreeMap<String, String>;

/// Configuración seccionada del sistema que usa la cola.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    pub router: Section,
    pub network: Section,
    pub netdb: Section,
    pub links: Section,
    /// Ajustes de las colas del sistema; `None` si el archivo no trae `[codel]`.
    pub codel: Option<CoDelConfig>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = content.parse::<Config>()?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        match name {
            "router" => Some(&self.router),
            "network" => Some(&self.network),
            "netdb" => Some(&self.netdb),
            "links" => Some(&self.links),
            _ => None,
        }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)
            .and_then(|entries| entries.get(key))
            .map(String::as_str)
    }

    /// Ajustes de la cola, con los valores por defecto si el archivo no los trae.
    pub fn codel_or_default(&self) -> CoDelConfig {
        self.codel.unwrap_or_default()
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let table = content.parse::<toml::Table>()?;
        let mut config = Config::default();
        for (name, value) in table {
            match name.as_str() {
                "router" => config.router = to_section(&name, value)?,
                "network" => config.network = to_section(&name, value)?,
                "netdb" => config.netdb = to_section(&name, value)?,
                "links" => config.links = to_section(&name, value)?,
                "codel" => {
                    let section: CoDelSection = value.try_into()?;
                    config.codel = Some(CoDelConfig::try_from(section)?);
                }
                _ => warn!(section = %name, "ignoring unknown config section"),
            }
        }
        Ok(config)
    }
}

fn to_section(name: &str, value: toml::Value) -> Result<Section, ConfigError> {
    let toml::Value::Table(table) = value else {
        return Err(ConfigError::NotASection(name.to_string()));
    };
    table
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                toml::Value::String(text) => text,
                toml::Value::Integer(number) => number.to_string(),
                toml::Value::Float(number) => number.to_string(),
                toml::Value::Boolean(flag) => flag.to_string(),
                toml::Value::Datetime(at) => at.to_string(),
                toml::Value::Array(_) | toml::Value::Table(_) => {
                    return Err(ConfigError::InvalidValue {
                        section: name.to_string(),
                        key,
                    });
                }
            };
            Ok((key, text))
        })
        .collect()
}
