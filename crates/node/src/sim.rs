//! Stateful soil moisture simulator for local development.
//!
//! Models the capacitive sensor on the real node:
//! - Temporal coherence via random walk with mean reversion
//! - Gradual drying drift (evaporation)
//! - Per-reading electronic noise and occasional spikes
//! - Closed-loop watering response (moisture rises while the pump runs)
//!
//! Readings are produced in raw ADC units and converted to an integer
//! humidity percentage with the same calibration curve the firmware uses.

use std::fmt;

/// ADC value with the sensor in air (fully dry).
const RAW_DRY: f64 = 4095.0;
/// ADC value with the sensor in water (fully wet).
const RAW_WET: f64 = 1500.0;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

/// Convert a raw ADC reading to an integer humidity percentage, clamped to
/// [0, 100]. Wet soil reads low on the ADC, so the scale is inverted.
pub fn raw_to_humidity(raw: i64) -> i64 {
    let pct = 100.0 - (raw as f64 - RAW_WET) * 100.0 / (RAW_DRY - RAW_WET);
    pct.round().clamp(0.0, 100.0) as i64
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range, slow drift toward dry. Exercises the auto-watering
    /// trigger within a few minutes of sampling.
    Drying,
    /// Hovers near the centre with low noise. Good for watching the API
    /// without triggering watering.
    Stable,
    /// High noise and frequent spikes. Tests averaging robustness.
    Flaky,
    /// Starts near the wet end, very slow drying. The hub should do nothing.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying, // default
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Stateful simulator producing humidity percentages from an evolving raw
/// ADC base value.
pub struct MoistureSim {
    /// Current "true" soil moisture in ADC units. Evolves each tick.
    base: f64,

    // Random walk parameters
    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,

    // Spike parameters
    spike_prob: f32,
    spike_sigma: f64,

    // Watering response
    watering: bool,
    wet_rate: f64,
}

impl MoistureSim {
    pub fn new(scenario: Scenario) -> Self {
        let range = RAW_DRY - RAW_WET;

        let (drift, walk_sigma, mean_rev, noise_sigma, spike_prob, spike_sigma, start_frac) =
            match scenario {
                // start_frac: 0.0 = at RAW_WET (wettest), 1.0 = at RAW_DRY (driest)
                Scenario::Drying => (4.0, 30.0, 0.02, 15.0, 0.03_f32, 400.0, 0.5),
                Scenario::Stable => (0.5, 12.0, 0.05, 8.0, 0.005, 200.0, 0.5),
                Scenario::Flaky => (2.0, 50.0, 0.02, 40.0, 0.10, 600.0, 0.5),
                Scenario::Wet => (0.8, 15.0, 0.02, 10.0, 0.02, 300.0, 0.15),
            };

        Self {
            base: RAW_WET + start_frac * range,
            drift_per_sample: drift,
            walk_sigma,
            mean_reversion: mean_rev,
            noise_sigma,
            spike_prob,
            spike_sigma,
            watering: false,
            wet_rate: -80.0,
        }
    }

    /// Inform the simulator whether the pump is currently running.
    pub fn set_watering(&mut self, active: bool) {
        self.watering = active;
    }

    /// Produce the next humidity reading. The internal base value evolves
    /// with each call, so call frequency matters.
    pub fn sample(&mut self) -> i64 {
        let center = (RAW_DRY + RAW_WET) / 2.0;

        // Mean reversion pulls toward centre; drying drift pushes toward
        // RAW_DRY; watering pulls toward RAW_WET.
        let pull = self.mean_reversion * (center - self.base);
        let walk = gaussian(0.0, self.walk_sigma);
        let wet = if self.watering { self.wet_rate } else { 0.0 };

        self.base = (self.base + self.drift_per_sample + pull + walk + wet)
            .clamp(RAW_WET - 100.0, RAW_DRY + 100.0);

        let noise = gaussian(0.0, self.noise_sigma);
        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };

        let raw = (self.base + noise + spike).round().clamp(0.0, 4095.0) as i64;
        raw_to_humidity(raw)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
