//! Pool configuration.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::PoolError;

/// Upper bound on attempts executing at the same time.
///
/// Serialized as a positive integer or the string `"unbounded"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ConcurrencyRepr", into = "ConcurrencyRepr")]
pub enum Concurrency {
    Limited(NonZeroUsize),
    Unbounded,
}

impl Concurrency {
    pub fn limited(n: usize) -> Result<Self, PoolError> {
        NonZeroUsize::new(n)
            .map(Concurrency::Limited)
            .ok_or(PoolError::InvalidConcurrency(n))
    }

    /// Can another attempt be admitted while `active` are running?
    pub fn has_capacity(self, active: usize) -> bool {
        match self {
            Concurrency::Limited(limit) => active < limit.get(),
            Concurrency::Unbounded => true,
        }
    }

    pub fn limit(self) -> Option<usize> {
        match self {
            Concurrency::Limited(limit) => Some(limit.get()),
            Concurrency::Unbounded => None,
        }
    }
}

impl Default for Concurrency {
    fn default() -> Self {
        Concurrency::Limited(NonZeroUsize::new(DEFAULT_CONCURRENCY).unwrap_or(NonZeroUsize::MIN))
    }
}

impl fmt::Display for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concurrency::Limited(limit) => write!(f, "{limit}"),
            Concurrency::Unbounded => f.write_str(UNBOUNDED),
        }
    }
}

impl FromStr for Concurrency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let repr = match s.trim().parse::<usize>() {
            Ok(n) => ConcurrencyRepr::Limit(n),
            Err(_) => ConcurrencyRepr::Keyword(s.trim().to_string()),
        };
        Concurrency::try_from(repr)
    }
}

const DEFAULT_CONCURRENCY: usize = 5;
const UNBOUNDED: &str = "unbounded";

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ConcurrencyRepr {
    Limit(usize),
    Keyword(String),
}

impl TryFrom<ConcurrencyRepr> for Concurrency {
    type Error = String;

    fn try_from(repr: ConcurrencyRepr) -> Result<Self, Self::Error> {
        match repr {
            ConcurrencyRepr::Limit(n) => Concurrency::limited(n).map_err(|e| e.to_string()),
            ConcurrencyRepr::Keyword(k) if k.eq_ignore_ascii_case(UNBOUNDED) => {
                Ok(Concurrency::Unbounded)
            }
            ConcurrencyRepr::Keyword(k) => Err(format!(
                "expected a positive integer or \"{UNBOUNDED}\", got {k:?}"
            )),
        }
    }
}

impl From<Concurrency> for ConcurrencyRepr {
    fn from(c: Concurrency) -> Self {
        match c {
            Concurrency::Limited(limit) => ConcurrencyRepr::Limit(limit.get()),
            Concurrency::Unbounded => ConcurrencyRepr::Keyword(UNBOUNDED.to_string()),
        }
    }
}

/// Pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Max attempts executing at once
    #[serde(default)]
    pub concurrency: Concurrency,

    /// Retries used when a submission does not specify its own
    #[serde(default)]
    pub default_retries: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: Concurrency::default(),
            default_retries: 0,
        }
    }
}
