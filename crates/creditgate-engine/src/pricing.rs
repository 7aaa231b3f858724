//! Chat pricing from token counts.
//!
//! Prices a request from the model name and the input/output token counts
//! against a per-1000-token rate table. Ships with a built-in table for
//! the models the gateway serves and supports:
//!
//! - **External pricing file** (YAML) loaded at startup and reloadable at
//!   runtime via [`PriceTable::reload_pricing_file`].
//! - **Custom rate overrides** via [`PricingConfig`] inline config.
//! - **Default rate fallback** for model names absent from every table.
//!
//! Pure computation: no side effects, no store access. The only failure
//! mode is a negative token count.

use creditgate_core::{MeterError, ModelRateConfig, PricingConfig, Result};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Decimal places costs are rounded to.
const COST_SCALE: u32 = 4;

// ---------------------------------------------------------------------------
// External pricing file schema
// ---------------------------------------------------------------------------

/// On-disk representation of a single model's rates (YAML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRateEntry {
    /// Cost per 1 000 input tokens.
    pub input_per_thousand: f64,
    /// Cost per 1 000 output tokens.
    pub output_per_thousand: f64,
}

/// The pricing file is a flat map: `model_name → FileRateEntry`.
pub type PricingFile = HashMap<String, FileRateEntry>;

/// Load a pricing YAML file from disk.
pub fn load_pricing_file(path: &str) -> std::result::Result<PricingFile, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read pricing file '{path}': {e}"))?;
    serde_yaml::from_str::<PricingFile>(&contents)
        .map_err(|e| format!("failed to parse pricing file '{path}': {e}"))
}

// ---------------------------------------------------------------------------
// Rate table
// ---------------------------------------------------------------------------

/// Per-1000-token rate for a model.
#[derive(Debug, Clone, Copy)]
pub struct Rate {
    /// Cost per 1 000 input tokens.
    pub input_per_thousand: Decimal,
    /// Cost per 1 000 output tokens.
    pub output_per_thousand: Decimal,
}

/// Built-in rate table, keyed by lowercase model name.
fn builtin_rates() -> HashMap<&'static str, Rate> {
    let mut m = HashMap::new();
    m.insert(
        "gpt-3.5-turbo",
        Rate {
            input_per_thousand: dec!(0.0015),
            output_per_thousand: dec!(0.002),
        },
    );
    m.insert(
        "gpt-4",
        Rate {
            input_per_thousand: dec!(0.03),
            output_per_thousand: dec!(0.06),
        },
    );
    m.insert(
        "llama-2",
        Rate {
            input_per_thousand: dec!(0.0005),
            output_per_thousand: dec!(0.0005),
        },
    );
    m.insert(
        "vip-gpt-4",
        Rate {
            input_per_thousand: dec!(0.05),
            output_per_thousand: dec!(0.10),
        },
    );
    m
}

/// Rate applied to model names absent from every table.
fn default_rate() -> Rate {
    Rate {
        input_per_thousand: dec!(0.001),
        output_per_thousand: dec!(0.002),
    }
}

fn convert_rate(model: &str, input: f64, output: f64) -> Option<Rate> {
    match (Decimal::from_f64(input), Decimal::from_f64(output)) {
        (Some(input_per_thousand), Some(output_per_thousand)) => Some(Rate {
            input_per_thousand,
            output_per_thousand,
        }),
        _ => {
            warn!(model, "non-finite pricing rate ignored");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Price table
// ---------------------------------------------------------------------------

/// Prices a chat request in credits from model name and token counts.
///
/// Rate sources are checked in this order (first match wins):
/// 1. Inline `custom_models` from [`PricingConfig`]
/// 2. Entries loaded from the external pricing file
/// 3. Built-in defaults
/// 4. The default rate
pub struct PriceTable {
    /// Whether pricing is enabled. When disabled every request costs zero.
    enabled: bool,
    /// Built-in rates keyed by lowercase model name.
    builtin: HashMap<&'static str, Rate>,
    /// Rates loaded from an external YAML file, keyed by lowercase model name.
    file_rates: HashMap<String, Rate>,
    /// Custom overrides from config, keyed by lowercase model name.
    custom: HashMap<String, Rate>,
    /// Fallback rate for unknown models.
    default_rate: Rate,
    /// Path to the pricing file (for reloads). `None` if not configured.
    pricing_file_path: Option<String>,
}

impl PriceTable {
    /// Create a new price table from the pricing config.
    ///
    /// If `config.pricing_file` is set, attempts to load it. On failure,
    /// logs a warning and falls back to the built-in table.
    pub fn new(config: &PricingConfig) -> Self {
        let custom = config
            .custom_models
            .iter()
            .filter_map(|(name, rate): (&String, &ModelRateConfig)| {
                convert_rate(name, rate.input_per_thousand, rate.output_per_thousand)
                    .map(|r| (name.to_lowercase(), r))
            })
            .collect();

        let file_rates = Self::load_file_rates(config.pricing_file.as_deref());

        Self {
            enabled: config.enabled,
            builtin: builtin_rates(),
            file_rates,
            custom,
            default_rate: default_rate(),
            pricing_file_path: config.pricing_file.clone(),
        }
    }

    /// Attempt to load rates from the configured file path.
    fn load_file_rates(path: Option<&str>) -> HashMap<String, Rate> {
        let Some(path) = path else {
            return HashMap::new();
        };

        if !Path::new(path).exists() {
            warn!(path, "pricing file not found, using built-in rates");
            return HashMap::new();
        }

        match load_pricing_file(path) {
            Ok(entries) => {
                let count = entries.len();
                let map: HashMap<String, Rate> = entries
                    .into_iter()
                    .filter_map(|(name, entry)| {
                        convert_rate(&name, entry.input_per_thousand, entry.output_per_thousand)
                            .map(|r| (name.to_lowercase(), r))
                    })
                    .collect();
                info!(path, models = count, "loaded pricing from external file");
                map
            }
            Err(e) => {
                warn!(path, error = %e, "failed to load pricing file, using built-in rates");
                HashMap::new()
            }
        }
    }

    /// Reload rates from the configured file path.
    ///
    /// Call on config change to pick up updated rates without a restart.
    /// Returns `true` if the file was successfully reloaded; on failure the
    /// existing rates are kept.
    pub fn reload_pricing_file(&mut self) -> bool {
        let path = match &self.pricing_file_path {
            Some(p) => p.clone(),
            None => return false,
        };

        match load_pricing_file(&path) {
            Ok(entries) => {
                let count = entries.len();
                self.file_rates = entries
                    .into_iter()
                    .filter_map(|(name, entry)| {
                        convert_rate(&name, entry.input_per_thousand, entry.output_per_thousand)
                            .map(|r| (name.to_lowercase(), r))
                    })
                    .collect();
                info!(path, models = count, "reloaded pricing from external file");
                true
            }
            Err(e) => {
                warn!(path, error = %e, "failed to reload pricing file, keeping existing rates");
                false
            }
        }
    }

    /// Price a request.
    ///
    /// Deterministic in its inputs; the result is rounded to 4 decimal
    /// places with midpoint-away-from-zero rounding. Fails with
    /// [`MeterError::InvalidTokenCount`] on a negative token count.
    pub fn cost(&self, model: &str, input_tokens: i64, output_tokens: i64) -> Result<Decimal> {
        if input_tokens < 0 {
            return Err(MeterError::InvalidTokenCount(input_tokens));
        }
        if output_tokens < 0 {
            return Err(MeterError::InvalidTokenCount(output_tokens));
        }
        if !self.enabled {
            return Ok(Decimal::ZERO);
        }

        let rate = self.lookup(model);
        let thousand = dec!(1000);
        let input_cost = Decimal::from(input_tokens) / thousand * rate.input_per_thousand;
        let output_cost = Decimal::from(output_tokens) / thousand * rate.output_per_thousand;

        Ok((input_cost + output_cost)
            .round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Look up the effective rate for a model name.
    fn lookup(&self, model: &str) -> Rate {
        let lower = model.to_lowercase();
        if let Some(rate) = self.custom.get(&lower) {
            return *rate;
        }
        if let Some(rate) = self.file_rates.get(&lower) {
            return *rate;
        }
        if let Some(rate) = self.builtin.get(lower.as_str()) {
            return *rate;
        }
        self.default_rate
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::new(&PricingConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
