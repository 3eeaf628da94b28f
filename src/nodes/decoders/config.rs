//! Decoder configuration

use crate::{PdError, Result};

/// Nominal BMC half-cell at 300 kbit/s, in microseconds
pub const DEFAULT_UNIT_INTERVAL_US: f64 = 1_000_000.0 / 600_000.0;

/// Options for one USB-PD line decoder
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderConfig {
    /// Capture sample rate in Hz. Required.
    pub sample_rate: Option<u64>,
    /// Nominal half-cell duration, the UI every `*_ui` option counts in.
    /// A `1` is two of these, a `0` is one double-length cell.
    pub unit_interval_us: f64,
    /// Minimum fraction of start-of-packet symbols that must match
    pub sop_match_tolerance: f64,
    /// Gap, in BMC half-cells (UI), that ends a capture window.
    /// The default of 3.0 is about 5 us at 300 kbit/s.
    pub idle_timeout_ui: f64,
    /// Emit the per-frame text trace annotation
    pub full_text: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            sample_rate: None,
            unit_interval_us: DEFAULT_UNIT_INTERVAL_US,
            sop_match_tolerance: 0.75,
            idle_timeout_ui: 3.0,
            full_text: true,
        }
    }
}

impl DecoderConfig {
    pub fn new(sample_rate: u64) -> Self {
        Self::default().with_sample_rate(sample_rate)
    }

    pub fn with_sample_rate(mut self, sample_rate: u64) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn with_unit_interval_us(mut self, unit_interval_us: f64) -> Self {
        self.unit_interval_us = unit_interval_us;
        self
    }

    pub fn with_sop_match_tolerance(mut self, tolerance: f64) -> Self {
        self.sop_match_tolerance = tolerance;
        self
    }

    pub fn with_idle_timeout_ui(mut self, idle_timeout_ui: f64) -> Self {
        self.idle_timeout_ui = idle_timeout_ui;
        self
    }

    pub fn with_full_text(mut self, full_text: bool) -> Self {
        self.full_text = full_text;
        self
    }

    /// Number of start-of-packet symbols (out of 4) that must match
    pub fn sop_min_matches(&self) -> usize {
        ((self.sop_match_tolerance * 4.0).ceil() as usize).clamp(1, 4)
    }

    /// Validate the options and convert them to sample counts.
    pub fn timing(&self) -> Result<Timing> {
        let sample_rate = self.sample_rate.ok_or(PdError::MissingSampleRate)?;
        if sample_rate == 0 {
            return Err(PdError::MissingSampleRate);
        }
        if !(self.unit_interval_us.is_finite() && self.unit_interval_us > 0.0) {
            return Err(PdError::InvalidConfig(format!(
                "unit interval must be positive, got {} us",
                self.unit_interval_us
            )));
        }
        if !(self.sop_match_tolerance > 0.0 && self.sop_match_tolerance <= 1.0) {
            return Err(PdError::InvalidConfig(format!(
                "SOP match tolerance must be in (0, 1], got {}",
                self.sop_match_tolerance
            )));
        }
        if !(self.idle_timeout_ui.is_finite() && self.idle_timeout_ui > 1.5) {
            return Err(PdError::InvalidConfig(format!(
                "idle timeout must exceed 1.5 UI, got {}",
                self.idle_timeout_ui
            )));
        }

        let ui_samples = self.unit_interval_us * sample_rate as f64 / 1_000_000.0;
        if ui_samples < 2.0 {
            return Err(PdError::InvalidConfig(format!(
                "sample rate {} Hz gives only {:.2} samples per unit interval",
                sample_rate, ui_samples
            )));
        }

        Ok(Timing {
            sample_rate,
            half_cell_min: (ui_samples * 0.5).round() as u64,
            zero_threshold: (ui_samples * 1.5).round() as u64,
            idle_gap: (ui_samples * self.idle_timeout_ui).round() as u64,
        })
    }
}

/// Interval classification bands, in samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub sample_rate: u64,
    /// Shorter intervals are glitches
    pub half_cell_min: u64,
    /// Intervals up to this are half cells, longer ones full `0` cells
    pub zero_threshold: u64,
    /// Longer intervals end the capture window
    pub idle_gap: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing_at_12mhz() {
        let timing = DecoderConfig::new(12_000_000).timing().unwrap();
        assert_eq!(timing.half_cell_min, 10);
        assert_eq!(timing.zero_threshold, 30);
        assert_eq!(timing.idle_gap, 60);
    }

    #[test]
    fn test_idle_timeout_counts_half_cells() {
        // 4 half-cells of 20 samples, not 4 bit times
        let timing = DecoderConfig::new(12_000_000)
            .with_idle_timeout_ui(4.0)
            .timing()
            .unwrap();
        assert_eq!(timing.idle_gap, 80);

        let timing = DecoderConfig::new(24_000_000).timing().unwrap();
        assert_eq!(timing.idle_gap, 3 * 40);
    }

    #[test]
    fn test_missing_sample_rate_is_fatal() {
        let err = DecoderConfig::default().timing().unwrap_err();
        assert!(matches!(err, PdError::MissingSampleRate));
    }

    #[test]
    fn test_rejects_bad_tolerance() {
        let config = DecoderConfig::new(12_000_000).with_sop_match_tolerance(1.5);
        assert!(matches!(config.timing(), Err(PdError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_sample_rate_too_low() {
        assert!(DecoderConfig::new(1_000_000).timing().is_err());
    }

    #[test]
    fn test_sop_min_matches() {
        assert_eq!(DecoderConfig::default().sop_min_matches(), 3);
        let strict = DecoderConfig::default().with_sop_match_tolerance(1.0);
        assert_eq!(strict.sop_min_matches(), 4);
        let loose = DecoderConfig::default().with_sop_match_tolerance(0.5);
        assert_eq!(loose.sop_min_matches(), 2);
    }
}
