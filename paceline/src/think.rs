use std::{fmt, str::FromStr, time::Duration};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Shape of the think-time delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distribution {
    Uniform,
    /// A name we do not know how to sample. Always yields zero.
    Unknown(String),
}

impl FromStr for Distribution {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "uniform" => Self::Uniform,
            _ => Self::Unknown(s.to_owned()),
        })
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uniform => f.write_str("uniform"),
            Self::Unknown(name) => f.write_str(name),
        }
    }
}

/// Client-side pause between the statements of a transaction, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkTime {
    pub distribution: Distribution,
    pub min: u64,
    pub max: u64,
}

impl ThinkTime {
    pub fn uniform(min: u64, max: u64) -> Self {
        Self {
            distribution: Distribution::Uniform,
            min,
            max,
        }
    }

    pub fn none() -> Self {
        Self::uniform(0, 0)
    }

    /// Workers skip sampling (and sleeping) entirely when this is false.
    pub fn is_enabled(&self) -> bool {
        self.max != 0
    }

    /// Draws a think time in milliseconds, `min..=max` inclusive.
    pub fn sample_ms<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        match self.distribution {
            Distribution::Uniform => rng.gen_range(self.min..=self.max.max(self.min)),
            Distribution::Unknown(_) => 0,
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_millis(self.sample_ms(rng))
    }
}
