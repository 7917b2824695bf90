//! Start-up configuration of the control and identification tasks.
//!
//! Every field has a default matching the board firmware, so an empty TOML document (or
//! [`LoopConfig::default`]) reproduces it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::Strategy;
use crate::identification::prbs::DEFAULT_SEED;
use crate::pole_placement::PolePlacementConfig;
use crate::scheduler::{ms_to_ticks, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("sample_period_ms must be greater than zero")]
    ZeroSamplePeriod,
    #[error("square_period_ms must span at least two sampling periods")]
    SquarePeriodTooShort,
    #[error("reference_high_mv must not be below reference_low_mv")]
    InvertedReference,
    #[error("reference levels must not exceed the {0} mV converter full scale")]
    ReferenceOutOfRange(u16),
    #[error("{0} has non-finite entries")]
    NonFinite(&'static str),
    #[error("identification levels must lie within the converter range")]
    ExcitationOutOfRange,
}

/// Parameters of a control task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub strategy: Strategy,
    pub sample_period_ms: u32,
    /// Full period of the square-wave reference.
    pub square_period_ms: u32,
    pub reference_high_mv: u16,
    pub reference_low_mv: u16,
    /// Gain applied to the reference of the filter loop before the error is formed.
    pub reference_gain: i32,
    pub pole_placement: PolePlacementConfig,
    pub observed: PolePlacementConfig,
    pub identification: IdentificationConfig,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Filter,
            sample_period_ms: 5,
            square_period_ms: 1000,
            reference_high_mv: 2000,
            reference_low_mv: 1000,
            reference_gain: 2,
            pole_placement: PolePlacementConfig::measured_state(),
            observed: PolePlacementConfig::observed(),
            identification: IdentificationConfig::default(),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_period_ms == 0 {
            return Err(ConfigError::ZeroSamplePeriod);
        }

        if self.square_period_ms < 2 * self.sample_period_ms {
            return Err(ConfigError::SquarePeriodTooShort);
        }

        if self.reference_high_mv < self.reference_low_mv {
            return Err(ConfigError::InvertedReference);
        }

        if self.reference_high_mv > crate::analog::FULL_SCALE_MV {
            return Err(ConfigError::ReferenceOutOfRange(crate::analog::FULL_SCALE_MV));
        }

        for (name, gains) in [
            ("pole_placement", &self.pole_placement),
            ("observed", &self.observed),
        ] {
            if !is_finite(gains) {
                return Err(ConfigError::NonFinite(name));
            }
        }

        self.identification.validate()
    }

    pub fn sample_period_ticks(&self) -> Tick {
        ms_to_ticks(self.sample_period_ms)
    }

    /// Samples between two edges of the square-wave reference.
    pub fn half_period_samples(&self) -> u32 {
        (self.square_period_ms / 2) / self.sample_period_ms.max(1)
    }
}

fn is_finite(config: &PolePlacementConfig) -> bool {
    config
        .a
        .iter()
        .flatten()
        .chain(&config.b)
        .chain(&config.c)
        .chain(&config.k)
        .chain(&config.l)
        .chain(core::iter::once(&config.ko))
        .all(|x| x.is_finite())
}

/// Parameters of an identification run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentificationConfig {
    /// LFSR seed of the excitation.
    pub seed: u16,
    /// Excitation level for a one bit, in volts.
    pub high_volts: f64,
    /// Excitation level for a zero bit, in volts.
    pub low_volts: f64,
    /// Wait before the excitation starts.
    pub settle_ms: u32,
    pub sample_period_ms: u32,
}

impl Default for IdentificationConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            high_volts: 1.0,
            low_volts: 0.0,
            settle_ms: 2000,
            sample_period_ms: 5,
        }
    }
}

impl IdentificationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_period_ms == 0 {
            return Err(ConfigError::ZeroSamplePeriod);
        }

        let full_scale = f64::from(crate::analog::FULL_SCALE_MV) / 1000.0;
        let in_range = |v: f64| v.is_finite() && (0.0..=full_scale).contains(&v);
        if !in_range(self.high_volts) || !in_range(self.low_volts) {
            return Err(ConfigError::ExcitationOutOfRange);
        }

        Ok(())
    }

    pub fn sample_period_ticks(&self) -> Tick {
        ms_to_ticks(self.sample_period_ms)
    }

    pub fn settle_ticks(&self) -> Tick {
        ms_to_ticks(self.settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = LoopConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.sample_period_ticks(), 5);
        assert_eq!(config.half_period_samples(), 100);
        assert_eq!(config.identification.settle_ticks(), 2000);
    }

    #[test]
    fn rejects_bad_values() {
        let config = LoopConfig {
            sample_period_ms: 0,
            ..LoopConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroSamplePeriod));

        let config = LoopConfig {
            square_period_ms: 5,
            ..LoopConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::SquarePeriodTooShort));

        let config = LoopConfig {
            reference_high_mv: 500,
            ..LoopConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvertedReference));

        let config = LoopConfig {
            reference_high_mv: 4000,
            ..LoopConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ReferenceOutOfRange(3300)));

        let mut config = LoopConfig::default();
        config.observed.l[1] = f64::NAN;
        assert_eq!(config.validate(), Err(ConfigError::NonFinite("observed")));

        let mut config = LoopConfig::default();
        config.identification.high_volts = 5.0;
        assert_eq!(config.validate(), Err(ConfigError::ExcitationOutOfRange));
    }
}
