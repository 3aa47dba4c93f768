//! Parameter ranges, hints and the per-parameter data model.
//!
//! Every format adapter reports its control ports as raw ranges. At reload time
//! they are repaired and converted into [`Parameter`]s, which the instance keeps
//! for the lifetime of one port layout.
//!
//! # Example
//!
//! ```
//! use consort_plugin::{ParameterHints, ParameterRanges};
//!
//! // Cutoff in Hz, scaled logarithmically for automation
//! let cutoff = ParameterRanges::new(20.0, 20000.0, 1000.0);
//! let normalized = cutoff.normalize_log(632.456);
//! assert!((normalized - 0.5).abs() < 1e-3);
//!
//! // Integer parameters are rounded when set
//! let octave = ParameterRanges::new(-2.0, 2.0, 0.0);
//! assert_eq!(octave.fix_value_with_hints(1.4, ParameterHints::INTEGER), 1.0);
//! ```

use serde::{Deserialize, Serialize};

bitmask! {
    /// Per-parameter flags.
    pub struct ParameterHints {
        const BOOLEAN = 0x001;
        const INTEGER = 0x002;
        const LOGARITHMIC = 0x004;
        const OUTPUT = 0x008;
        const ENABLED = 0x010;
        const AUTOMABLE = 0x020;
        const USES_SAMPLERATE = 0x040;
        const USES_SCALEPOINTS = 0x080;
    }
}

/// Largest unit string accepted by [`split_name_and_unit`].
pub const MAX_UNIT_LEN: usize = 7;

/// Port names that mark the latency-reporting output.
pub const LATENCY_PORT_NAMES: [&str; 2] = ["latency", "_latency"];

/// Port name of the sample-rate output some plugins expose.
pub const SAMPLE_RATE_PORT_NAME: &str = "_sample-rate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParameterType {
    #[default]
    Unknown,
    Input,
    Output,
}

/// Marker for parameters the host consumes itself instead of exposing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParameterSpecial {
    #[default]
    None,
    Latency,
    SampleRate,
}

/// Numeric domain of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterRanges {
    pub def: f32,
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub step_small: f32,
    pub step_large: f32,
}

impl Default for ParameterRanges {
    fn default() -> Self {
        Self {
            def: 0.0,
            min: 0.0,
            max: 1.0,
            step: 0.01,
            step_small: 0.0001,
            step_large: 0.1,
        }
    }
}

impl ParameterRanges {
    /// Range with generic steps. The default is clamped into `[min, max]`.
    pub fn new(min: f32, max: f32, def: f32) -> Self {
        let mut ranges = Self {
            def,
            min,
            max,
            ..Self::default()
        };
        ranges.def = ranges.fix_value(def);
        ranges.derive_steps(ParameterHints::empty());
        ranges
    }

    /// Repair a plugin-reported range in place.
    ///
    /// `min > max` collapses to `max = min`; an empty range is widened to
    /// `min + 0.1`. Returns `true` when the range had to be fixed.
    pub fn repair(&mut self, name: &str) -> bool {
        let mut repaired = false;

        if self.min > self.max {
            tracing::warn!(
                "Parameter '{}' has min {} above max {}, clamping",
                name,
                self.min,
                self.max
            );
            self.max = self.min;
            repaired = true;
        }

        if self.max - self.min == 0.0 {
            tracing::warn!(
                "Parameter '{}' has an empty range at {}, widening by 0.1",
                name,
                self.min
            );
            self.max = self.min + 0.1;
            repaired = true;
        }

        self.def = self.fix_value(self.def);
        repaired
    }

    /// Derive the UI steps from the range and hints.
    pub fn derive_steps(&mut self, hints: ParameterHints) {
        let range = self.max - self.min;

        if hints.contains(ParameterHints::BOOLEAN) {
            self.step = range;
            self.step_small = range;
            self.step_large = range;
        } else if hints.contains(ParameterHints::INTEGER) {
            self.step = 1.0;
            self.step_small = 1.0;
            self.step_large = 10.0;
        } else {
            self.step = range / 100.0;
            self.step_small = range / 1000.0;
            self.step_large = range / 10.0;
        }
    }

    /// Multiply the domain by `rate`, for ports declared in fractions of the sample rate.
    pub fn scaled(&self, rate: f32) -> Self {
        Self {
            def: self.def * rate,
            min: self.min * rate,
            max: self.max * rate,
            ..*self
        }
    }

    /// Clamp into `[min, max]`. NaN maps to `min`.
    #[inline]
    pub fn fix_value(&self, value: f32) -> f32 {
        if value.is_nan() || value <= self.min {
            self.min
        } else if value >= self.max {
            self.max
        } else {
            value
        }
    }

    /// Clamp and quantize a value the way it will be stored.
    #[inline]
    pub fn fix_value_with_hints(&self, value: f32, hints: ParameterHints) -> f32 {
        if hints.contains(ParameterHints::BOOLEAN) {
            let middle = self.min + (self.max - self.min) / 2.0;
            return if value >= middle { self.max } else { self.min };
        }

        let value = if hints.contains(ParameterHints::INTEGER) {
            value.round_ties_even()
        } else {
            value
        };
        self.fix_value(value)
    }

    #[inline]
    pub fn normalize(&self, value: f32) -> f32 {
        let range = self.max - self.min;
        if range <= 0.0 {
            return 0.0;
        }
        ((value - self.min) / range).clamp(0.0, 1.0)
    }

    #[inline]
    pub fn unnormalize(&self, normalized: f32) -> f32 {
        self.min + normalized.clamp(0.0, 1.0) * (self.max - self.min)
    }

    /// Logarithmic normalization, linear when `min <= 0`.
    #[inline]
    pub fn normalize_log(&self, value: f32) -> f32 {
        if self.min <= 0.0 || self.max <= self.min {
            return self.normalize(value);
        }
        let value = self.fix_value(value);
        let log_min = self.min.ln();
        (value.ln() - log_min) / (self.max.ln() - log_min)
    }

    #[inline]
    pub fn unnormalize_log(&self, normalized: f32) -> f32 {
        if self.min <= 0.0 || self.max <= self.min {
            return self.unnormalize(normalized);
        }
        let log_min = self.min.ln();
        (log_min + normalized.clamp(0.0, 1.0) * (self.max.ln() - log_min)).exp()
    }

    /// Convert a normalized controller value to a stored value, honoring hints.
    pub fn unnormalize_with_hints(&self, normalized: f32, hints: ParameterHints) -> f32 {
        if hints.contains(ParameterHints::BOOLEAN) {
            return if normalized < 0.5 { self.min } else { self.max };
        }

        let value = if hints.contains(ParameterHints::LOGARITHMIC) {
            self.unnormalize_log(normalized)
        } else {
            self.unnormalize(normalized)
        };

        if hints.contains(ParameterHints::INTEGER) {
            value.round_ties_even()
        } else {
            value
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalePoint {
    pub value: f32,
    pub label: String,
}

/// Host bookkeeping for one parameter, separate from its display strings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterData {
    pub kind: ParameterType,
    pub special: ParameterSpecial,
    pub hints: ParameterHints,
    /// Host-facing index.
    pub index: u32,
    /// Native port index inside the plugin.
    pub rindex: u32,
    pub midi_channel: u8,
    /// Mapped controller number, `None` when unmapped.
    pub midi_cc: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub data: ParameterData,
    pub name: String,
    pub unit: String,
    pub ranges: ParameterRanges,
    /// Ranges as reported, before sample-rate scaling.
    pub base_ranges: ParameterRanges,
    pub scale_points: Vec<ScalePoint>,
}

impl Parameter {
    #[inline]
    pub fn is_input(&self) -> bool {
        self.data.kind == ParameterType::Input
    }

    #[inline]
    pub fn is_output(&self) -> bool {
        self.data.kind == ParameterType::Output
    }

    #[inline]
    pub fn is_automable_input(&self) -> bool {
        self.is_input() && self.data.hints.contains(ParameterHints::AUTOMABLE)
    }

    #[inline]
    pub fn fix_value(&self, value: f32) -> f32 {
        self.ranges.fix_value_with_hints(value, self.data.hints)
    }

    /// Re-derive the ranges for a new sample rate.
    pub fn apply_sample_rate(&mut self, sample_rate: f32) {
        if self.data.special != ParameterSpecial::None {
            self.ranges.max = sample_rate;
            return;
        }
        if self.data.hints.contains(ParameterHints::USES_SAMPLERATE) {
            let mut ranges = self.base_ranges.scaled(sample_rate);
            ranges.derive_steps(self.data.hints);
            self.ranges = ranges;
        }
    }
}

/// Returns true for output port names that report latency.
pub fn is_latency_port_name(name: &str) -> bool {
    LATENCY_PORT_NAMES.contains(&name)
}

/// Split `"Name [unit]"` or `"Name (unit)"` into name and unit.
///
/// Only a trailing bracket pair counts, square brackets win over parentheses,
/// and units longer than [`MAX_UNIT_LEN`] characters are left in the name.
pub fn split_name_and_unit(text: &str) -> (String, String) {
    split_trailing_unit(text, " [", ']')
        .or_else(|| split_trailing_unit(text, " (", ')'))
        .unwrap_or_else(|| (text.to_string(), String::new()))
}

fn split_trailing_unit(text: &str, open: &str, close: char) -> Option<(String, String)> {
    let trimmed = text.strip_suffix(close)?;
    let start = trimmed.rfind(open)?;
    let unit = &trimmed[start + open.len()..];

    if unit.is_empty() || unit.chars().count() > MAX_UNIT_LEN {
        return None;
    }

    Some((trimmed[..start].to_string(), unit.to_string()))
}
