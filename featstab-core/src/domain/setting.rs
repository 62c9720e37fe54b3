//! Hyperparameter settings and grids.
//!
//! A setting is the `(lambda, eta, mu)` triple of regularization weights the
//! solver receives as `-l <lambda> -e <eta> -m <mu>`. Settings key result maps,
//! so equality, hashing and ordering are defined on the exact bit pattern
//! (`f64::total_cmp`), never on approximate float comparison. A setting
//! serializes as its flag string so it can key JSON objects.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One point of the hyperparameter grid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct HyperparameterSetting {
    pub lambda: f64,
    pub eta: f64,
    pub mu: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingParseError {
    #[error("expected flag/value pairs, got dangling token '{0}'")]
    Dangling(String),
    #[error("unknown flag '{0}' (expected -l, -e or -m)")]
    UnknownFlag(String),
    #[error("invalid value '{value}' for flag {flag}")]
    InvalidValue { flag: String, value: String },
    #[error("missing flag {0}")]
    MissingFlag(&'static str),
}

impl HyperparameterSetting {
    pub fn new(lambda: f64, eta: f64, mu: f64) -> Self {
        Self { lambda, eta, mu }
    }

    /// Same setting with the task-coupling weight replaced.
    pub fn with_mu(self, mu: f64) -> Self {
        Self { mu, ..self }
    }

    /// Solver flags: `["-l", lambda, "-e", eta, "-m", mu]`.
    pub fn to_flags(&self) -> Vec<String> {
        vec![
            "-l".to_string(),
            self.lambda.to_string(),
            "-e".to_string(),
            self.eta.to_string(),
            "-m".to_string(),
            self.mu.to_string(),
        ]
    }

    /// Parse the `-l <lambda> -e <eta> -m <mu>` form. Flags may come in any
    /// order; a missing `-m` defaults to 0.
    pub fn from_flags(text: &str) -> Result<Self, SettingParseError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let (mut lambda, mut eta, mut mu) = (None, None, None);

        for pair in tokens.chunks(2) {
            let [flag, value] = pair else {
                return Err(SettingParseError::Dangling(pair[0].to_string()));
            };
            let parsed: f64 = value.parse().map_err(|_| SettingParseError::InvalidValue {
                flag: flag.to_string(),
                value: value.to_string(),
            })?;
            match *flag {
                "-l" => lambda = Some(parsed),
                "-e" => eta = Some(parsed),
                "-m" => mu = Some(parsed),
                other => return Err(SettingParseError::UnknownFlag(other.to_string())),
            }
        }

        Ok(Self {
            lambda: lambda.ok_or(SettingParseError::MissingFlag("-l"))?,
            eta: eta.ok_or(SettingParseError::MissingFlag("-e"))?,
            mu: mu.unwrap_or(0.0),
        })
    }

    fn key(&self) -> [u64; 3] {
        [self.lambda.to_bits(), self.eta.to_bits(), self.mu.to_bits()]
    }
}

impl PartialEq for HyperparameterSetting {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for HyperparameterSetting {}

impl Hash for HyperparameterSetting {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl Ord for HyperparameterSetting {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lambda
            .total_cmp(&other.lambda)
            .then_with(|| self.eta.total_cmp(&other.eta))
            .then_with(|| self.mu.total_cmp(&other.mu))
    }
}

impl PartialOrd for HyperparameterSetting {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for HyperparameterSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-l {} -e {} -m {}", self.lambda, self.eta, self.mu)
    }
}

impl From<HyperparameterSetting> for String {
    fn from(setting: HyperparameterSetting) -> Self {
        setting.to_string()
    }
}

impl TryFrom<String> for HyperparameterSetting {
    type Error = SettingParseError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Self::from_flags(&text)
    }
}

// ─── Grid ────────────────────────────────────────────────────────────

/// Cartesian grid of settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterGrid {
    pub lambdas: Vec<f64>,
    pub etas: Vec<f64>,
    #[serde(default = "default_mus")]
    pub mus: Vec<f64>,
}

fn default_mus() -> Vec<f64> {
    vec![0.0]
}

impl HyperparameterGrid {
    pub fn size(&self) -> usize {
        self.lambdas.len() * self.etas.len() * self.mus.len()
    }

    /// All settings, lambda-major. Duplicates collapse to one entry.
    pub fn settings(&self) -> Vec<HyperparameterSetting> {
        let mut settings = Vec::with_capacity(self.size());
        for &lambda in &self.lambdas {
            for &eta in &self.etas {
                for &mu in &self.mus {
                    let setting = HyperparameterSetting::new(lambda, eta, mu);
                    if !settings.contains(&setting) {
                        settings.push(setting);
                    }
                }
            }
        }
        settings
    }
}
