//! Pure cost model: turns token usage into USD.
//!
//! Rates are supplied as configuration, keyed by `(provider, model)`. A table
//! may carry a default rate; when it does, unknown pairs are priced with the
//! default, otherwise pricing an unknown pair is an error. No I/O happens
//! here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::PricingError;

/// USD rates per 1,000 tokens for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRates {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl ModelRates {
    /// Cost of a call in USD.
    pub fn cost_usd(&self, tokens_prompt: u32, tokens_completion: u32) -> f64 {
        (tokens_prompt as f64 / 1000.0) * self.prompt_per_1k
            + (tokens_completion as f64 / 1000.0) * self.completion_per_1k
    }
}

/// Rate lookup table keyed by `(provider, model)`.
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    rates: HashMap<(String, String), ModelRates>,
    default: Option<ModelRates>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure a fallback rate for pairs not present in the table.
    /// Without one, unknown pairs fail with [`PricingError::RateUnknown`].
    pub fn with_default(mut self, rates: ModelRates) -> Self {
        self.default = Some(rates);
        self
    }

    pub fn insert(&mut self, provider: impl Into<String>, model: impl Into<String>, rates: ModelRates) {
        self.rates.insert((provider.into(), model.into()), rates);
    }

    pub fn get(&self, provider: &str, model: &str) -> Option<&ModelRates> {
        self.rates.get(&(provider.to_string(), model.to_string()))
    }

    /// Price one invocation.
    pub fn cost_usd(
        &self,
        provider: &str,
        model: &str,
        tokens_prompt: u32,
        tokens_completion: u32,
    ) -> Result<f64, PricingError> {
        let rates = self
            .get(provider, model)
            .or(self.default.as_ref())
            .ok_or_else(|| PricingError::RateUnknown {
                provider: provider.to_string(),
                model: model.to_string(),
            })?;
        Ok(rates.cost_usd(tokens_prompt, tokens_completion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sonnet_rates() -> ModelRates {
        ModelRates {
            prompt_per_1k: 0.003,
            completion_per_1k: 0.015,
        }
    }

    #[test]
    fn known_model_is_priced() {
        let mut table = RateTable::new();
        table.insert("anthropic", "claude-3-5-sonnet-20241022", sonnet_rates());

        let cost = table
            .cost_usd("anthropic", "claude-3-5-sonnet-20241022", 1000, 500)
            .unwrap();
        assert!((cost - 0.0105).abs() < 1e-12);
    }

    #[test]
    fn zero_usage_costs_nothing() {
        let mut table = RateTable::new();
        table.insert("anthropic", "claude-3-5-sonnet-20241022", sonnet_rates());

        let cost = table
            .cost_usd("anthropic", "claude-3-5-sonnet-20241022", 0, 0)
            .unwrap();
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn unknown_model_fails_without_default() {
        let table = RateTable::new();
        let err = table.cost_usd("anthropic", "mystery-model", 10, 10).unwrap_err();
        assert_eq!(
            err,
            PricingError::RateUnknown {
                provider: "anthropic".to_string(),
                model: "mystery-model".to_string(),
            }
        );
    }

    #[test]
    fn unknown_model_uses_default_when_configured() {
        let table = RateTable::new().with_default(ModelRates {
            prompt_per_1k: 0.001,
            completion_per_1k: 0.002,
        });

        let cost = table.cost_usd("anthropic", "mystery-model", 2000, 1000).unwrap();
        assert!((cost - 0.004).abs() < 1e-12);
    }

    #[test]
    fn explicit_rate_wins_over_default() {
        let mut table = RateTable::new().with_default(ModelRates {
            prompt_per_1k: 1.0,
            completion_per_1k: 1.0,
        });
        table.insert("anthropic", "claude-3-5-sonnet-20241022", sonnet_rates());

        let cost = table
            .cost_usd("anthropic", "claude-3-5-sonnet-20241022", 1000, 0)
            .unwrap();
        assert!((cost - 0.003).abs() < 1e-12);
    }
}
