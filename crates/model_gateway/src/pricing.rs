//! Model pricing for cost estimation and spend accounting.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use aegis_core::config::PricingEntry;
use aegis_core::pattern::{glob_match, is_glob};
use aegis_core::NormalizedResponse;

/// Pricing information for a model (USD per 1K tokens).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Model identifier or glob (e.g. "gpt-4o", "claude-3-5-*").
    pub model: String,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
}

impl ModelPricing {
    pub fn new(model: impl Into<String>, input: f64, output: f64) -> Self {
        Self {
            model: model.into(),
            input_cost_per_1k: input,
            output_cost_per_1k: output,
        }
    }

    /// Cost of a call with the given token counts.
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1000.0) * self.input_cost_per_1k;
        let output_cost = (output_tokens as f64 / 1000.0) * self.output_cost_per_1k;
        input_cost + output_cost
    }
}

impl From<&PricingEntry> for ModelPricing {
    fn from(entry: &PricingEntry) -> Self {
        Self::new(&entry.model, entry.input_cost_per_1k, entry.output_cost_per_1k)
    }
}

/// Registry of model pricing. Exact model ids win over globs; globs are
/// tried in registration order.
#[derive(Debug, Clone, Default)]
pub struct PricingRegistry {
    exact: HashMap<String, ModelPricing>,
    globs: Vec<ModelPricing>,
}

impl PricingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with list prices of common models.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        // OpenAI
        registry.register(ModelPricing::new("gpt-4o-mini", 0.00015, 0.0006));
        registry.register(ModelPricing::new("gpt-4o", 0.0025, 0.01));
        registry.register(ModelPricing::new("gpt-4-turbo", 0.01, 0.03));
        registry.register(ModelPricing::new("gpt-3.5-turbo", 0.0005, 0.0015));
        registry.register(ModelPricing::new("text-embedding-3-small", 0.00002, 0.0));
        registry.register(ModelPricing::new("text-embedding-3-large", 0.00013, 0.0));

        // Anthropic
        registry.register(ModelPricing::new("claude-3-haiku-*", 0.00025, 0.00125));
        registry.register(ModelPricing::new("claude-3-5-sonnet-*", 0.003, 0.015));
        registry.register(ModelPricing::new("claude-3-opus-*", 0.015, 0.075));

        registry
    }

    /// Defaults overlaid with configured entries.
    pub fn from_entries(entries: &[PricingEntry]) -> Self {
        let mut registry = Self::with_defaults();
        for entry in entries {
            registry.register(ModelPricing::from(entry));
        }
        registry
    }

    /// Register a model's pricing, replacing an entry with the same pattern.
    pub fn register(&mut self, pricing: ModelPricing) {
        if is_glob(&pricing.model) {
            match self.globs.iter_mut().find(|p| p.model == pricing.model) {
                Some(existing) => *existing = pricing,
                None => self.globs.push(pricing),
            }
        } else {
            self.exact.insert(pricing.model.clone(), pricing);
        }
    }

    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        self.exact
            .get(model)
            .or_else(|| self.globs.iter().find(|p| glob_match(&p.model, model)))
    }

    /// Estimated cost; unknown models cost nothing.
    pub fn estimate_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        match self.get(model) {
            Some(pricing) => pricing.estimate_cost(input_tokens, output_tokens),
            None => {
                tracing::debug!(model = %model, "No pricing for model, assuming zero cost");
                0.0
            }
        }
    }

    /// Actual cost of a response: the adapter-reported cost when present,
    /// otherwise derived from reported usage.
    pub fn cost_of(&self, requested_model: &str, response: &NormalizedResponse) -> f64 {
        if let Some(cost) = response.cost.filter(|c| c.is_finite() && *c >= 0.0) {
            return cost;
        }
        let model = if self.get(&response.model).is_some() {
            response.model.as_str()
        } else {
            requested_model
        };
        self.estimate_cost(
            model,
            response.usage.prompt_tokens,
            response.usage.completion_tokens,
        )
    }
}
