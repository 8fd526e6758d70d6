use crate::session::TokenUsage;

/// Per-million-token USD rates for one model family.
///
/// Cache rates are optional: most providers publish them as a fraction of
/// the input rate, so unset values fall back to 10% (read) and 125%
/// (write) of `input`.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub model: &'static str,
    pub input: f64,
    pub output: f64,
    pub cache_read: Option<f64>,
    pub cache_write: Option<f64>,
}

/// Known pricing, matched exact-first then by substring in either
/// direction. Rates are USD per million tokens.
const PRICING_TABLE: &[ModelPricing] = &[
    ModelPricing { model: "claude-opus-4", input: 15.0, output: 75.0, cache_read: Some(1.5), cache_write: Some(18.75) },
    ModelPricing { model: "claude-sonnet-4", input: 3.0, output: 15.0, cache_read: Some(0.3), cache_write: Some(3.75) },
    ModelPricing { model: "claude-haiku-4", input: 1.0, output: 5.0, cache_read: Some(0.1), cache_write: Some(1.25) },
    ModelPricing { model: "claude-3-5-sonnet", input: 3.0, output: 15.0, cache_read: Some(0.3), cache_write: Some(3.75) },
    ModelPricing { model: "claude-3-5-haiku", input: 0.8, output: 4.0, cache_read: Some(0.08), cache_write: Some(1.0) },
    ModelPricing { model: "gpt-5-codex", input: 1.25, output: 10.0, cache_read: Some(0.125), cache_write: None },
    ModelPricing { model: "gpt-5-mini", input: 0.25, output: 2.0, cache_read: Some(0.025), cache_write: None },
    ModelPricing { model: "gpt-5", input: 1.25, output: 10.0, cache_read: Some(0.125), cache_write: None },
    ModelPricing { model: "gpt-4o", input: 2.5, output: 10.0, cache_read: Some(1.25), cache_write: None },
    ModelPricing { model: "gpt-4.1", input: 2.0, output: 8.0, cache_read: Some(0.5), cache_write: None },
    ModelPricing { model: "o3", input: 2.0, output: 8.0, cache_read: Some(0.5), cache_write: None },
    ModelPricing { model: "o4-mini", input: 1.1, output: 4.4, cache_read: Some(0.275), cache_write: None },
    ModelPricing { model: "gemini-2.5-pro", input: 1.25, output: 10.0, cache_read: Some(0.31), cache_write: None },
    ModelPricing { model: "gemini-2.5-flash", input: 0.3, output: 2.5, cache_read: Some(0.075), cache_write: None },
    ModelPricing { model: "grok-code-fast", input: 0.2, output: 1.5, cache_read: Some(0.02), cache_write: None },
    ModelPricing { model: "deepseek", input: 0.28, output: 0.42, cache_read: Some(0.028), cache_write: None },
];

/// Generic mid-tier rate used when nothing in the table matches.
const FALLBACK: ModelPricing = ModelPricing {
    model: "fallback",
    input: 3.0,
    output: 15.0,
    cache_read: None,
    cache_write: None,
};

/// Find pricing for a model identifier: exact match, then case-insensitive
/// substring containment in either direction, then the generic fallback.
pub fn lookup(model: &str) -> ModelPricing {
    let needle = model.trim().to_ascii_lowercase();
    if needle.is_empty() {
        return FALLBACK;
    }
    // Provider prefixes like "anthropic/claude-sonnet-4" carry no pricing info.
    let slug = needle.rsplit('/').next().unwrap_or(&needle);

    for entry in PRICING_TABLE {
        if entry.model == slug {
            return *entry;
        }
    }
    for entry in PRICING_TABLE {
        if slug.contains(entry.model) || entry.model.contains(slug) {
            return *entry;
        }
    }
    FALLBACK
}

/// Estimate USD cost for the given usage under the given model.
///
/// Linear in every component; never negative. `total` is intentionally
/// ignored: it may double-count cache components depending on the source.
pub fn estimate_cost(model: &str, usage: &TokenUsage) -> f64 {
    let p = lookup(model);
    let cache_read_rate = p.cache_read.unwrap_or(p.input * 0.10);
    let cache_write_rate = p.cache_write.unwrap_or(p.input * 1.25);

    let per_million = |tokens: u64, rate: f64| (tokens as f64 / 1_000_000.0) * rate.max(0.0);

    per_million(usage.input, p.input)
        + per_million(usage.output + usage.reasoning, p.output)
        + per_million(usage.cache_read, cache_read_rate)
        + per_million(usage.cache_write, cache_write_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u64, output: u64) -> TokenUsage {
        TokenUsage {
            input,
            output,
            ..Default::default()
        }
    }

    #[test]
    fn test_exact_match() {
        let p = lookup("claude-sonnet-4");
        assert_eq!(p.model, "claude-sonnet-4");
    }

    #[test]
    fn test_substring_match_dated_snapshot() {
        // Dated snapshots contain the table key as a substring.
        let p = lookup("claude-sonnet-4-20250514");
        assert_eq!(p.model, "claude-sonnet-4");
    }

    #[test]
    fn test_substring_match_reverse_direction() {
        // A short observed id contained in a longer table key.
        let p = lookup("gemini-2.5");
        assert_eq!(p.input, 1.25);
    }

    #[test]
    fn test_provider_prefix_stripped() {
        let p = lookup("anthropic/claude-opus-4-1");
        assert_eq!(p.model, "claude-opus-4");
    }

    #[test]
    fn test_unknown_model_uses_fallback() {
        let p = lookup("totally-novel-model-xyz");
        assert_eq!(p.model, "fallback");
    }

    #[test]
    fn test_cost_linear() {
        let one = estimate_cost("claude-sonnet-4", &usage(1_000_000, 0));
        assert!((one - 3.0).abs() < 1e-9);
        let two = estimate_cost("claude-sonnet-4", &usage(2_000_000, 0));
        assert!((two - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_cost_monotone_in_each_component() {
        let base = TokenUsage {
            input: 100,
            output: 100,
            reasoning: 100,
            cache_read: 100,
            cache_write: 100,
            total: 500,
        };
        let base_cost = estimate_cost("gpt-5", &base);
        for bump in [
            TokenUsage { input: 200, ..base },
            TokenUsage { output: 200, ..base },
            TokenUsage { reasoning: 200, ..base },
            TokenUsage { cache_read: 200, ..base },
            TokenUsage { cache_write: 200, ..base },
        ] {
            assert!(estimate_cost("gpt-5", &bump) >= base_cost);
        }
    }

    #[test]
    fn test_cache_defaults_derived_from_input_rate() {
        // grok has no cache_write entry: write rate defaults to 125% input.
        let cost = estimate_cost(
            "grok-code-fast",
            &TokenUsage {
                cache_write: 1_000_000,
                ..Default::default()
            },
        );
        assert!((cost - 0.2 * 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_zero_usage_costs_nothing() {
        assert_eq!(estimate_cost("claude-opus-4", &TokenUsage::default()), 0.0);
    }
}
