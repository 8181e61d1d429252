//! Converting a self-assessment into coins.
//!
//! Each slider is scored with the configured formula, scores are summed and
//! divided by the conversion base, then rounded and capped.

use crate::config::RecordSection;
use crate::formula::Formula;
use crate::jar::AddOutcome;

pub const DEFAULT_SLIDER_FORMULA: &str = "value * weight";
pub const DEFAULT_RECORD_TITLE: &str = "今日の成果";

#[derive(Debug, Clone, Copy, PartialEq, uniffi::Record)]
pub struct Slider {
    pub value: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct RecordOutcome {
    pub title: String,
    /// Coins actually deposited, after the free-space cap.
    pub coins: u32,
    pub steps: Vec<AddOutcome>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordConfig {
    pub max_record_coins: u32,
    pub conversion_base: u32,
    pub formula: Formula,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self::from_section(&RecordSection::default())
    }
}

impl RecordConfig {
    /// An invalid formula falls back to `value * weight`.
    pub fn from_section(section: &RecordSection) -> Self {
        let formula = Formula::parse(&section.slider_formula).unwrap_or_else(|err| {
            tracing::warn!(
                formula = %section.slider_formula,
                error = %err,
                "Invalid slider formula; using default"
            );
            Formula::default()
        });
        Self {
            max_record_coins: section.max_record_coins.max(1),
            conversion_base: section.conversion_base.max(1),
            formula,
        }
    }

    /// Sum of slider scores. Non-finite inputs and failed evaluations count
    /// as zero.
    pub fn score(&self, sliders: &[Slider]) -> f64 {
        sliders
            .iter()
            .map(|slider| {
                let value = if slider.value.is_finite() { slider.value } else { 0.0 };
                let weight = if slider.weight.is_finite() { slider.weight } else { 1.0 };
                self.formula.eval(value, weight).unwrap_or_else(|err| {
                    tracing::debug!(value, weight, error = %err, "Slider scored as zero");
                    0.0
                })
            })
            .sum()
    }

    pub fn coins_for(&self, sliders: &[Slider]) -> u32 {
        let raw = (self.score(sliders) / self.conversion_base as f64).round();
        if !raw.is_finite() {
            return 0;
        }
        raw.clamp(0.0, self.max_record_coins as f64) as u32
    }
}

pub fn record_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        DEFAULT_RECORD_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sliders(values: &[(f64, f64)]) -> Vec<Slider> {
        values
            .iter()
            .map(|(value, weight)| Slider {
                value: *value,
                weight: *weight,
            })
            .collect()
    }

    #[test]
    fn converts_score_to_coins() {
        let config = RecordConfig::default();
        // 60*1 + 30*1.5 = 105 -> 105 / 45 = 2.33 -> 2
        assert_eq!(config.coins_for(&sliders(&[(60.0, 1.0), (30.0, 1.5)])), 2);
    }

    #[test]
    fn coins_are_capped() {
        let config = RecordConfig::default();
        assert_eq!(config.coins_for(&sliders(&[(10_000.0, 1.0)])), 15);
        assert_eq!(config.coins_for(&sliders(&[(-500.0, 1.0)])), 0);
        assert_eq!(config.coins_for(&[]), 0);
    }

    #[test]
    fn non_finite_slider_counts_as_zero() {
        let config = RecordConfig::default();
        assert_eq!(config.score(&sliders(&[(f64::NAN, 1.0), (45.0, 1.0)])), 45.0);
    }

    #[test]
    fn invalid_formula_falls_back() {
        let config = RecordConfig::from_section(&RecordSection {
            slider_formula: "value ** 2".to_string(),
            ..RecordSection::default()
        });
        assert_eq!(config.formula.source(), DEFAULT_SLIDER_FORMULA);
    }

    #[test]
    fn deeply_nested_formula_falls_back() {
        let config = RecordConfig::from_section(&RecordSection {
            slider_formula: format!("{}value", "(".repeat(50_000)),
            ..RecordSection::default()
        });
        assert_eq!(config.formula.source(), DEFAULT_SLIDER_FORMULA);
    }

    #[test]
    fn custom_formula_and_limits() {
        let config = RecordConfig::from_section(&RecordSection {
            max_record_coins: 0,
            conversion_base: 0,
            slider_formula: "value + weight".to_string(),
        });
        assert_eq!(config.max_record_coins, 1);
        assert_eq!(config.conversion_base, 1);
        assert_eq!(config.score(&sliders(&[(2.0, 3.0)])), 5.0);
    }

    #[test]
    fn blank_title_gets_default() {
        assert_eq!(record_title("   "), DEFAULT_RECORD_TITLE);
        assert_eq!(record_title(" 勉強 "), "勉強");
    }
}
