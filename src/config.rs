//! Run configuration.
//!
//! Everything the core needs is carried in one explicit [`HomogConfig`] value
//! passed into each component at construction. There is no process-wide
//! singleton and no module-level credential/scale state; a TOML file can
//! override any subset of the defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::Parameter;
use crate::error::HomogError;

/// One value per stellar parameter, in that parameter's natural unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterMap {
    pub teff: f64,
    pub logg: f64,
    pub feh: f64,
    pub xi: f64,
}

impl ParameterMap {
    pub fn get(&self, parameter: Parameter) -> f64 {
        match parameter {
            Parameter::Teff => self.teff,
            Parameter::Logg => self.logg,
            Parameter::Feh => self.feh,
            Parameter::Xi => self.xi,
        }
    }
}

/// MAP stage settings (compass search).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Objective-evaluation budget. Exhausting it without meeting `tol`
    /// is a convergence failure, and the fit is discarded.
    pub max_evaluations: usize,
    /// Convergence: largest step (relative to each coordinate's scale)
    /// at which the search stops.
    pub tol: f64,
    /// Initial step, as a fraction of each coordinate's scale.
    pub initial_step: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            max_evaluations: 2_000_000,
            tol: 1e-5,
            initial_step: 0.5,
        }
    }
}

/// Monte Carlo stage settings (multi-chain random-walk Metropolis).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub chains: usize,
    /// Total iterations per chain (warmup included).
    pub iterations: usize,
    /// Adaptation iterations discarded from each chain.
    pub warmup: usize,
    /// Keep every `thin`-th post-warmup draw.
    pub thin: usize,
    /// Split R-hat threshold on the log-posterior trace; above this the
    /// fit is rejected.
    pub rhat_threshold: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            chains: 4,
            iterations: 20_000,
            warmup: 10_000,
            thin: 100,
            rhat_threshold: 1.2,
        }
    }
}

/// Per-node bias function shape.
///
/// The bias is a polynomial of `order` in (truth - pivot), with independent
/// coefficient sets per regime. Regimes split the truth axis at `regime_knots`
/// (in the parameter's unit); no knots means a single regime. The shape is a
/// per-survey-instrument configuration, not an algorithmic constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasConfig {
    pub regime_knots: Vec<f64>,
    pub order: usize,
}

impl Default for BiasConfig {
    fn default() -> Self {
        BiasConfig {
            regime_knots: Vec::new(),
            order: 1,
        }
    }
}

/// Full configuration for one homogenisation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomogConfig {
    /// Prior magnitude of expected systematic error per parameter
    /// (optimizer seed and regularizing prior scale).
    pub scale: ParameterMap,
    /// Floor below which per-node systematic uncertainty may not shrink
    /// (prevents degenerate zero-variance solutions).
    pub lower_sigma: ParameterMap,
    pub optimizer: OptimizerConfig,
    pub sampler: SamplerConfig,
    pub bias: BiasConfig,
    /// Base RNG seed: init draws and chain streams derive from it.
    pub seed: u64,
}

impl Default for HomogConfig {
    fn default() -> Self {
        HomogConfig {
            scale: ParameterMap {
                teff: 250.0,
                logg: 0.25,
                feh: 0.10,
                xi: 0.25,
            },
            lower_sigma: ParameterMap {
                teff: 10.0,
                logg: 0.01,
                feh: 0.01,
                xi: 0.01,
            },
            optimizer: OptimizerConfig::default(),
            sampler: SamplerConfig::default(),
            bias: BiasConfig::default(),
            seed: 42,
        }
    }
}

impl HomogConfig {
    /// Load a TOML config file; missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<HomogConfig, HomogError> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| HomogError::Config(format!("'{}': {e}", path.display())))
    }

    pub fn validate(&self) -> Result<(), HomogError> {
        for parameter in Parameter::ALL {
            let scale = self.scale.get(parameter);
            let floor = self.lower_sigma.get(parameter);
            if !(scale.is_finite() && scale > 0.0) {
                return Err(HomogError::Config(format!(
                    "scale for '{parameter}' must be finite and positive"
                )));
            }
            if !(floor.is_finite() && floor > 0.0 && floor < scale) {
                return Err(HomogError::Config(format!(
                    "lower_sigma for '{parameter}' must be in (0, scale)"
                )));
            }
        }
        if self.sampler.chains == 0 {
            return Err(HomogError::Config("sampler.chains must be > 0".into()));
        }
        if self.sampler.warmup >= self.sampler.iterations {
            return Err(HomogError::Config(
                "sampler.warmup must be smaller than sampler.iterations".into(),
            ));
        }
        if self.sampler.thin == 0 {
            return Err(HomogError::Config("sampler.thin must be > 0".into()));
        }
        let mut prev = f64::NEG_INFINITY;
        for &knot in &self.bias.regime_knots {
            if !knot.is_finite() || knot <= prev {
                return Err(HomogError::Config(
                    "bias.regime_knots must be finite and strictly increasing".into(),
                ));
            }
            prev = knot;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_and_match_survey_conventions() {
        let config = HomogConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scale.get(Parameter::Teff), 250.0);
        assert_eq!(config.scale.get(Parameter::Feh), 0.10);
        assert_eq!(config.lower_sigma.get(Parameter::Teff), 10.0);
    }

    #[test]
    fn toml_overrides_subset_of_fields() {
        let parsed: HomogConfig = toml::from_str(
            r#"
            seed = 7

            [sampler]
            chains = 2
            iterations = 400
            warmup = 200
            thin = 4

            [scale]
            teff = 300.0
            logg = 0.25
            feh = 0.10
            xi = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(parsed.seed, 7);
        assert_eq!(parsed.sampler.chains, 2);
        assert_eq!(parsed.scale.teff, 300.0);
        // Untouched section keeps defaults.
        assert_eq!(parsed.lower_sigma.teff, 10.0);
        parsed.validate().unwrap();
    }

    #[test]
    fn validate_rejects_floor_above_scale() {
        let mut config = HomogConfig::default();
        config.lower_sigma.feh = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unsorted_knots() {
        let mut config = HomogConfig::default();
        config.bias.regime_knots = vec![5000.0, 4000.0];
        assert!(config.validate().is_err());
    }
}
