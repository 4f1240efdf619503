use std::collections::HashMap;
use std::num::NonZeroU64;
use std::str::FromStr;
use std::time::Duration;

use crate::quota::Quota;
use crate::quota::Quotas;

/// Prefix of the variables that carry per-token quota overrides.
pub const TOKEN_LIMIT_PREFIX: &str = "TOKEN_LIMIT_";

const DEFAULT_LIMIT: &str = "IP_REQUESTS_PER_SECOND";
const DEFAULT_BLOCK: &str = "IP_BLOCK_DURATION_MINUTES";

/// Errors raised while loading quota configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid limit {value:?}: expected a positive integer")]
    InvalidLimit { value: String },

    #[error("invalid duration {value:?}: {reason}")]
    InvalidDuration { value: String, reason: String },

    #[error("malformed override {0:?}: expected <limit>,<duration>")]
    MalformedOverride(String),
}

fn parse_limit(value: &str) -> Result<NonZeroU64, ConfigError> {
    value
        .trim()
        .parse::<NonZeroU64>()
        .map_err(|_| ConfigError::InvalidLimit {
            value: value.to_string(),
        })
}

/// A bare integer is a number of minutes. Anything else must be a
/// `humantime` duration such as `500ms` or `2m 30s`.
fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    if let Ok(minutes) = value.parse::<u64>() {
        return minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError::InvalidDuration {
                value: value.to_string(),
                reason: "too large".to_string(),
            });
    }
    humantime::parse_duration(value).map_err(|e| ConfigError::InvalidDuration {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

impl FromStr for Quota {
    type Err = ConfigError;

    /// Parses `<limit>,<duration>`, e.g. `100,5` or `10,500ms`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((limit, block)) = s.split_once(',') else {
            return Err(ConfigError::MalformedOverride(s.to_string()));
        };
        if block.contains(',') {
            return Err(ConfigError::MalformedOverride(s.to_string()));
        }
        Ok(Quota::new(parse_limit(limit)?, parse_duration(block)?))
    }
}

impl Quotas {
    /// Build the quota table from `(name, value)` pairs.
    ///
    /// `IP_REQUESTS_PER_SECOND` and `IP_BLOCK_DURATION_MINUTES` set the default
    /// and are required. Every `TOKEN_LIMIT_<token>` adds an override; a
    /// malformed override is logged and skipped.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut limit = None;
        let mut block = None;
        let mut overrides = HashMap::new();

        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                DEFAULT_LIMIT => limit = Some(parse_limit(value)?),
                DEFAULT_BLOCK => block = Some(parse_duration(value)?),
                _ => {
                    let Some(token) = key.strip_prefix(TOKEN_LIMIT_PREFIX) else {
                        continue;
                    };
                    if token.is_empty() {
                        tracing::warn!(key, "ignoring token override with no token");
                        continue;
                    }
                    match value.parse::<Quota>() {
                        Ok(quota) => {
                            tracing::debug!(
                                token,
                                limit = quota.limit(),
                                block = ?quota.block(),
                                "loaded token quota"
                            );
                            overrides.insert(token.to_string(), quota);
                        }
                        Err(error) => {
                            tracing::warn!(token, %error, "ignoring malformed token quota");
                        }
                    }
                }
            }
        }

        let limit = limit.ok_or(ConfigError::Missing(DEFAULT_LIMIT))?;
        let block = block.ok_or(ConfigError::Missing(DEFAULT_BLOCK))?;

        let mut quotas = Quotas::new(Quota::new(limit, block));
        quotas.extend(overrides);
        Ok(quotas)
    }

    /// Build the quota table from the process environment.
    ///
    /// Variables whose name or value is not valid UTF-8 are ignored.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(
            std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
        )
    }
}
