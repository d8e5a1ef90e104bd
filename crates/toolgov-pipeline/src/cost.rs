//! Per-request cost estimation.
//!
//! Estimates a request's cost in USD from the model name and token
//! estimates. Ships a built-in per-million-token pricing table for common
//! commercial models; unknown and self-hosted models estimate to `None` —
//! there is no standard pricing to apply.

use std::collections::HashMap;

/// Pricing for one model: cost per 1 million input and output tokens.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    /// Cost per 1 million input/prompt tokens in USD.
    pub input_per_million: f64,
    /// Cost per 1 million output/completion tokens in USD.
    pub output_per_million: f64,
}

/// Build the default pricing table for well-known commercial models.
///
/// Keys are lowercase model-name prefixes — lookup tries exact match first,
/// then the longest matching prefix, so `gpt-4o-2024-08-06` resolves to the
/// `gpt-4o` entry.
fn builtin_pricing() -> HashMap<&'static str, ModelPricing> {
    let mut m = HashMap::new();

    // OpenAI
    m.insert(
        "gpt-4o-mini",
        ModelPricing {
            input_per_million: 0.15,
            output_per_million: 0.60,
        },
    );
    m.insert(
        "gpt-4o",
        ModelPricing {
            input_per_million: 2.50,
            output_per_million: 10.0,
        },
    );
    m.insert(
        "gpt-4",
        ModelPricing {
            input_per_million: 30.0,
            output_per_million: 60.0,
        },
    );
    m.insert(
        "gpt-3.5-turbo",
        ModelPricing {
            input_per_million: 0.50,
            output_per_million: 1.50,
        },
    );

    // Anthropic
    m.insert(
        "claude-3-5-sonnet",
        ModelPricing {
            input_per_million: 3.0,
            output_per_million: 15.0,
        },
    );
    m.insert(
        "claude-3-5-haiku",
        ModelPricing {
            input_per_million: 0.80,
            output_per_million: 4.0,
        },
    );
    m.insert(
        "claude-3-opus",
        ModelPricing {
            input_per_million: 15.0,
            output_per_million: 75.0,
        },
    );

    // Google
    m.insert(
        "gemini-1.5-pro",
        ModelPricing {
            input_per_million: 1.25,
            output_per_million: 5.0,
        },
    );
    m.insert(
        "gemini-1.5-flash",
        ModelPricing {
            input_per_million: 0.075,
            output_per_million: 0.30,
        },
    );

    m
}

/// Cost estimator with a built-in pricing table and optional overrides.
pub struct CostEstimator {
    builtin: HashMap<&'static str, ModelPricing>,
    overrides: HashMap<String, ModelPricing>,
}

impl CostEstimator {
    /// Create an estimator with the built-in table only.
    #[must_use]
    pub fn new() -> Self {
        Self {
            builtin: builtin_pricing(),
            overrides: HashMap::new(),
        }
    }

    /// Create an estimator with custom per-model overrides. Override keys
    /// are matched the same way as built-in keys and take precedence.
    #[must_use]
    pub fn with_overrides(overrides: HashMap<String, ModelPricing>) -> Self {
        let overrides = overrides
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        Self {
            builtin: builtin_pricing(),
            overrides,
        }
    }

    /// Resolve pricing for a model name: exact match first, then the
    /// longest matching prefix. Overrides win over the built-in table.
    fn resolve(&self, model: &str) -> Option<ModelPricing> {
        let model = model.to_lowercase();

        if let Some(p) = self.overrides.get(&model) {
            return Some(*p);
        }
        if let Some(p) = self
            .overrides
            .iter()
            .filter(|(k, _)| model.starts_with(k.as_str()))
            .max_by_key(|(k, _)| k.len())
            .map(|(_, p)| *p)
        {
            return Some(p);
        }

        if let Some(p) = self.builtin.get(model.as_str()) {
            return Some(*p);
        }
        self.builtin
            .iter()
            .filter(|(k, _)| model.starts_with(*k))
            .max_by_key(|(k, _)| k.len())
            .map(|(_, p)| *p)
    }

    /// Estimate the USD cost of one request, or `None` for unknown models.
    #[must_use]
    pub fn estimate(&self, model: &str, input_tokens: u32, output_tokens: u32) -> Option<f64> {
        if model.is_empty() {
            return None;
        }
        let pricing = self.resolve(model)?;
        let input_cost = f64::from(input_tokens) / 1_000_000.0 * pricing.input_per_million;
        let output_cost = f64::from(output_tokens) / 1_000_000.0 * pricing.output_per_million;
        Some(input_cost + output_cost)
    }
}

impl Default for CostEstimator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_model_match() {
        let estimator = CostEstimator::new();
        // 1M input + 1M output tokens of gpt-4o-mini: 0.15 + 0.60.
        let cost = estimator.estimate("gpt-4o-mini", 1_000_000, 1_000_000).unwrap();
        assert!((cost - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_prefix_match_prefers_longest() {
        let estimator = CostEstimator::new();
        // Must resolve to gpt-4o-mini, not gpt-4o or gpt-4.
        let versioned = estimator
            .estimate("gpt-4o-mini-2024-07-18", 1_000_000, 0)
            .unwrap();
        assert!((versioned - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_case_insensitive() {
        let estimator = CostEstimator::new();
        assert_eq!(
            estimator.estimate("GPT-4o", 1000, 1000),
            estimator.estimate("gpt-4o", 1000, 1000)
        );
    }

    #[test]
    fn test_unknown_model_is_none() {
        let estimator = CostEstimator::new();
        assert!(estimator.estimate("llama-3-70b-local", 1000, 1000).is_none());
        assert!(estimator.estimate("", 1000, 1000).is_none());
    }

    #[test]
    fn test_override_wins() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "gpt-4o".to_string(),
            ModelPricing {
                input_per_million: 1.0,
                output_per_million: 1.0,
            },
        );
        let estimator = CostEstimator::with_overrides(overrides);
        let cost = estimator.estimate("gpt-4o", 1_000_000, 0).unwrap();
        assert!((cost - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_tokens_is_zero_cost() {
        let estimator = CostEstimator::new();
        assert_eq!(estimator.estimate("gpt-4", 0, 0), Some(0.0));
    }
}
