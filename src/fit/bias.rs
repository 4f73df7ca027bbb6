//! Per-node bias functions.
//!
//! Each node's bias is a low-order polynomial in (truth - pivot), with an
//! independent coefficient set per regime of the truth axis. Coefficients are
//! held in a strongly-typed table indexed by (node, regime, term) and built by
//! a builder that enumerates regimes and terms explicitly; no string-keyed
//! parameter names anywhere.

use serde::{Deserialize, Serialize};

use crate::config::BiasConfig;

/// Shape of the bias function: regime split points and polynomial order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasSpec {
    /// Regime boundaries on the truth axis, strictly increasing.
    pub regime_knots: Vec<f64>,
    /// Polynomial order within each regime (0 = constant offset).
    pub order: usize,
}

impl BiasSpec {
    pub fn from_config(config: &BiasConfig) -> BiasSpec {
        BiasSpec {
            regime_knots: config.regime_knots.clone(),
            order: config.order,
        }
    }

    pub fn n_regimes(&self) -> usize {
        self.regime_knots.len() + 1
    }

    pub fn terms_per_regime(&self) -> usize {
        self.order + 1
    }

    pub fn coeffs_per_node(&self) -> usize {
        self.n_regimes() * self.terms_per_regime()
    }

    /// Regime containing `truth`. Knots belong to the regime above them.
    pub fn regime_index(&self, truth: f64) -> usize {
        self.regime_knots
            .iter()
            .take_while(|&&knot| truth >= knot)
            .count()
    }

    /// Identifier recorded in model metadata, e.g. `poly1x2regime`.
    pub fn id(&self) -> String {
        format!("poly{}x{}regime", self.order, self.n_regimes())
    }
}

/// Coefficients for every node, laid out (node, regime, term).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasTable {
    pub spec: BiasSpec,
    /// Centering point for the polynomial argument.
    pub pivot: f64,
    n_nodes: usize,
    coeffs: Vec<f64>,
}

impl BiasTable {
    /// Construct from a flat coefficient slice in (node, regime, term) order,
    /// as produced by the parameter packing.
    pub fn from_flat(spec: BiasSpec, pivot: f64, n_nodes: usize, coeffs: &[f64]) -> BiasTable {
        debug_assert_eq!(coeffs.len(), n_nodes * spec.coeffs_per_node());
        BiasTable {
            spec,
            pivot,
            n_nodes,
            coeffs: coeffs.to_vec(),
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    pub fn as_flat(&self) -> &[f64] {
        &self.coeffs
    }

    fn offset(&self, node: usize, regime: usize, term: usize) -> usize {
        (node * self.spec.n_regimes() + regime) * self.spec.terms_per_regime() + term
    }

    pub fn coefficient(&self, node: usize, regime: usize, term: usize) -> f64 {
        self.coeffs[self.offset(node, regime, term)]
    }

    /// Bias of `node` at a given true value.
    pub fn evaluate(&self, node: usize, truth: f64) -> f64 {
        let regime = self.spec.regime_index(truth);
        let x = truth - self.pivot;
        let mut acc = 0.0;
        let mut pow = 1.0;
        for term in 0..self.spec.terms_per_regime() {
            acc += self.coefficient(node, regime, term) * pow;
            pow *= x;
        }
        acc
    }
}

/// Builder enumerating (node, regime, term) explicitly.
#[derive(Debug, Clone)]
pub struct BiasBuilder {
    spec: BiasSpec,
    pivot: f64,
    n_nodes: usize,
    coeffs: Vec<f64>,
}

impl BiasBuilder {
    pub fn new(spec: BiasSpec, pivot: f64, n_nodes: usize) -> BiasBuilder {
        let len = n_nodes * spec.coeffs_per_node();
        BiasBuilder {
            spec,
            pivot,
            n_nodes,
            coeffs: vec![0.0; len],
        }
    }

    pub fn set(&mut self, node: usize, regime: usize, term: usize, value: f64) -> &mut Self {
        let idx = (node * self.spec.n_regimes() + regime) * self.spec.terms_per_regime() + term;
        self.coeffs[idx] = value;
        self
    }

    pub fn build(self) -> BiasTable {
        BiasTable {
            spec: self.spec,
            pivot: self.pivot,
            n_nodes: self.n_nodes,
            coeffs: self.coeffs,
        }
    }
}
