//! Startup configuration -- parsed from TOML once, validated before the
//! service accepts traffic.
//!
//! Every problem is collected into a single [`ConfigError::Invalid`] report
//! rather than failing on the first, and a signal type without a policy
//! entry aborts startup instead of falling back to a default that would
//! hide a detection gap.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::event::SignalType;

/// Documented default for the warning/critical severity boundary.
pub const DEFAULT_SEVERITY_MULTIPLIER: f64 = 1.5;
/// Documented default idle expiry, as a multiple of each signal's window.
pub const DEFAULT_IDLE_EXPIRY_WINDOWS: u32 = 12;

const DEFAULT_DB_PATH: &str = "data/sigwarden.db";
const DEFAULT_MAX_PAYLOAD_BYTES: usize = 16 * 1024;
const DEFAULT_EVICTION_SWEEP_SECS: u64 = 60;
const DEFAULT_ALERT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Validated detection policy for one signal type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalPolicy {
    pub window_secs: u64,
    pub threshold: u32,
    pub severity_multiplier: f64,
    pub idle_expiry_secs: u64,
}

impl SignalPolicy {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs as i64)
    }

    pub fn idle_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.idle_expiry_secs as i64)
    }
}

/// One policy per [`SignalType`], with infallible lookup.
///
/// The only constructor checks completeness, so `for_signal` never misses.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: Vec<SignalPolicy>,
}

impl PolicyTable {
    fn new(policies: Vec<SignalPolicy>) -> Result<Self, ConfigError> {
        if policies.len() != SignalType::COUNT {
            return Err(ConfigError::Invalid(vec![format!(
                "policy table incomplete: {} of {} signal types covered",
                policies.len(),
                SignalType::COUNT
            )]));
        }
        Ok(Self { policies })
    }

    pub fn for_signal(&self, signal: SignalType) -> &SignalPolicy {
        &self.policies[signal.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (SignalType, &SignalPolicy)> {
        SignalType::ALL.iter().map(move |s| (*s, self.for_signal(*s)))
    }

    /// Same policy for every signal type. Test-only shortcut.
    #[cfg(test)]
    pub(crate) fn uniform(policy: SignalPolicy) -> Self {
        Self {
            policies: vec![policy; SignalType::COUNT],
        }
    }
}

/// Webhook alert settings.
#[derive(Debug, Clone)]
pub struct AlertsConfig {
    pub webhook_url: String,
    pub timeout: Duration,
}

/// The validated runtime configuration. Built exactly once at startup;
/// nothing re-reads configuration keys per request.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub db_path: String,
    pub max_payload_bytes: usize,
    pub eviction_sweep: Duration,
    pub alerts: AlertsConfig,
    pub policies: PolicyTable,
}

impl AppConfig {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text, &path.display().to_string())
    }

    /// Parse and validate configuration from TOML text. `origin` names the
    /// source in error messages.
    pub fn from_toml(text: &str, origin: &str) -> Result<AppConfig, ConfigError> {
        let file: FileConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        file.validate()
    }
}

// Raw file shapes. Everything is optional at the serde level so validation
// can report the complete set of problems in one pass.

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    bind: Option<String>,
    db_path: Option<String>,
    max_payload_bytes: Option<usize>,
    idle_expiry_windows: Option<u32>,
    eviction_sweep_secs: Option<u64>,
    alerts: Option<FileAlerts>,
    #[serde(default)]
    signals: HashMap<String, FileSignalPolicy>,
}

#[derive(Debug, Deserialize)]
struct FileAlerts {
    webhook_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileSignalPolicy {
    window_secs: Option<u64>,
    threshold: Option<u32>,
    severity_multiplier: Option<f64>,
}

impl FileConfig {
    fn validate(self) -> Result<AppConfig, ConfigError> {
        let mut problems = Vec::new();

        let bind = match self.bind.as_deref() {
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                problems.push(format!("bind '{raw}' is not a socket address: {e}"));
                SocketAddr::from(([0, 0, 0, 0], 8080))
            }),
        };

        let max_payload_bytes = self.max_payload_bytes.unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES);
        if max_payload_bytes == 0 {
            problems.push("max_payload_bytes must be at least 1".to_string());
        }

        let idle_expiry_windows = self
            .idle_expiry_windows
            .unwrap_or(DEFAULT_IDLE_EXPIRY_WINDOWS);
        if idle_expiry_windows == 0 {
            // idle expiry must be at least one full window, or eviction
            // could reclaim a key that still holds live timestamps
            problems.push("idle_expiry_windows must be at least 1".to_string());
        }

        let eviction_sweep_secs = self
            .eviction_sweep_secs
            .unwrap_or(DEFAULT_EVICTION_SWEEP_SECS);
        if eviction_sweep_secs == 0 {
            problems.push("eviction_sweep_secs must be at least 1".to_string());
        }

        let alerts = match self.alerts {
            None => {
                problems.push("missing [alerts] section".to_string());
                None
            }
            Some(section) => {
                let timeout_secs = section.timeout_secs.unwrap_or(DEFAULT_ALERT_TIMEOUT_SECS);
                if timeout_secs == 0 {
                    problems.push("[alerts] timeout_secs must be at least 1".to_string());
                }
                match section.webhook_url {
                    None => {
                        problems.push("[alerts] webhook_url is required".to_string());
                        None
                    }
                    Some(url) => {
                        if reqwest::Url::parse(&url).is_err() {
                            problems.push(format!("[alerts] webhook_url '{url}' is not a valid URL"));
                        }
                        Some(AlertsConfig {
                            webhook_url: url,
                            timeout: Duration::from_secs(timeout_secs),
                        })
                    }
                }
            }
        };

        for name in self.signals.keys() {
            if SignalType::parse(name).is_none() {
                problems.push(format!("unknown signal type in [signals]: {name}"));
            }
        }

        let mut policies = Vec::with_capacity(SignalType::COUNT);
        for signal in SignalType::ALL {
            match self.signals.get(signal.as_str()) {
                None => problems.push(format!("missing [signals.{signal}] policy")),
                Some(entry) => {
                    if let Some(policy) =
                        resolve_policy(signal, entry, idle_expiry_windows, &mut problems)
                    {
                        policies.push(policy);
                    }
                }
            }
        }

        if !problems.is_empty() {
            return Err(ConfigError::Invalid(problems));
        }

        // past the bail-out: alerts is Some and every variant pushed a policy
        Ok(AppConfig {
            bind,
            db_path: self.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            max_payload_bytes,
            eviction_sweep: Duration::from_secs(eviction_sweep_secs),
            alerts: alerts.ok_or_else(|| ConfigError::Invalid(vec!["missing [alerts]".into()]))?,
            policies: PolicyTable::new(policies)?,
        })
    }
}

fn resolve_policy(
    signal: SignalType,
    entry: &FileSignalPolicy,
    idle_expiry_windows: u32,
    problems: &mut Vec<String>,
) -> Option<SignalPolicy> {
    let mut ok = true;

    let window_secs = match entry.window_secs {
        Some(w) if w >= 1 => w,
        Some(w) => {
            problems.push(format!("[signals.{signal}] window_secs {w} must be at least 1"));
            ok = false;
            0
        }
        None => {
            problems.push(format!("[signals.{signal}] window_secs is required"));
            ok = false;
            0
        }
    };

    let threshold = match entry.threshold {
        Some(t) if t >= 1 => t,
        Some(t) => {
            problems.push(format!("[signals.{signal}] threshold {t} must be at least 1"));
            ok = false;
            0
        }
        None => {
            problems.push(format!("[signals.{signal}] threshold is required"));
            ok = false;
            0
        }
    };

    let severity_multiplier = entry
        .severity_multiplier
        .unwrap_or(DEFAULT_SEVERITY_MULTIPLIER);
    if severity_multiplier < 1.0 {
        problems.push(format!(
            "[signals.{signal}] severity_multiplier {severity_multiplier} must be at least 1.0"
        ));
        ok = false;
    }

    if !ok {
        return None;
    }

    Some(SignalPolicy {
        window_secs,
        threshold,
        severity_multiplier,
        idle_expiry_secs: window_secs * idle_expiry_windows as u64,
    })
}
