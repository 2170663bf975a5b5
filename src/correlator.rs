//! Learns how configuration changes move metrics.
//!
//! Webhook recipients feed the correlator one round per received report,
//! together with the adjustments they applied in response. Once enough rounds
//! are buffered, recorrelation distills them into per-unit effects: "changing
//! config X by +1 moves metric Y by this much". The inverse query answers a
//! fresh alert report with a suggested adjustment per config.

use std::collections::HashMap;

use crate::api::{MetricReport, NotificationType};
use crate::measurements::{AverageMeasurement, Measurement};

pub type ConfigName = String;
pub type MetricName = String;

/// Scalar change per configuration knob.
pub type Adjustments = HashMap<ConfigName, f64>;

type Measurements = HashMap<MetricName, Measurement>;
type Correlations = HashMap<ConfigName, HashMap<MetricName, Vec<Measurement>>>;

/// Learned per-unit effect of each config on each metric.
pub type AverageCorrelations = HashMap<ConfigName, HashMap<MetricName, AverageMeasurement>>;

/// One observed round: the measurements reported by the controller and the
/// adjustments applied in response.
#[derive(Debug, Clone)]
pub struct AdjustmentRound {
    pub measurements: Measurements,
    pub adjustments: Adjustments,
}

/// Smallest flush cap that yields at least one adjacent round pair. Caps
/// below this disable flushing on [`AdjustmentCorrelator::register`];
/// [`AdjustmentCorrelator::recorrelate`] can still be called manually.
pub const MIN_FLUSH_CAP: usize = 2;

/// Default number of buffered rounds that triggers recorrelation.
pub const DEFAULT_FLUSH_CAP: usize = 3;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    /// Buffered rounds that trigger recorrelation; values below
    /// [`MIN_FLUSH_CAP`] mean manual flushing only.
    pub flush_cap: usize,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        CorrelatorConfig {
            flush_cap: DEFAULT_FLUSH_CAP,
        }
    }
}

#[derive(Debug)]
pub struct AdjustmentCorrelator {
    buffer: Vec<AdjustmentRound>,
    flush_cap: usize,
    average_correlations: AverageCorrelations,
}

impl Default for AdjustmentCorrelator {
    fn default() -> Self {
        AdjustmentCorrelator::new(DEFAULT_FLUSH_CAP)
    }
}

impl AdjustmentCorrelator {
    pub fn new(flush_cap: usize) -> Self {
        AdjustmentCorrelator {
            buffer: Vec::new(),
            flush_cap,
            average_correlations: AverageCorrelations::new(),
        }
    }

    pub fn from_config(config: &CorrelatorConfig) -> Self {
        AdjustmentCorrelator::new(config.flush_cap)
    }

    /// Appends one round built from `report` and the adjustments applied in
    /// response to it, then recorrelates if the buffer reached the flush cap.
    pub fn register(&mut self, report: &MetricReport, adjustments: Adjustments) {
        let mut measurements = Measurements::new();
        for notification in report {
            let value = notification
                .current_average_value
                .as_ref()
                .map(|quantity| quantity.as_f64())
                .unwrap_or(0.0);
            let utilization = notification
                .current_average_utilization
                .map(f64::from)
                .unwrap_or(0.0);

            measurements.insert(
                notification.name.clone(),
                Measurement { value, utilization },
            );
        }

        self.buffer.push(AdjustmentRound {
            measurements,
            adjustments,
        });

        if self.flush_cap >= MIN_FLUSH_CAP && self.buffer.len() >= self.flush_cap {
            self.recorrelate();
        }
    }

    /// Correlates buffered metric changes with the adjustments made in
    /// response, then folds the result into the long-lived averages.
    ///
    /// Works in three stages over adjacent round pairs:
    ///
    /// 1. per pair, the measurement delta per metric (`previous - current`,
    ///    the improvement attributed to the previous round's adjustments);
    /// 2. per `(config, metric)`, the delta scaled by
    ///    `1 / (configs adjusted together * adjustment magnitude)`, so the
    ///    stored coefficient reads as "effect of changing the config by +1";
    /// 3. the per-pair coefficients folded into `average_correlations` via
    ///    [`AverageMeasurement::concat`], integrating new evidence without
    ///    discarding history.
    ///
    /// Pairs whose leading round carries no adjustments (cooldown rounds)
    /// contribute nothing. No-op while the buffer holds fewer rounds than
    /// the flush cap; the buffer is cleared afterwards.
    pub fn recorrelate(&mut self) {
        if self.buffer.len() < self.flush_cap {
            return;
        }

        let mut correlations = Correlations::new();
        for pair in self.buffer.windows(2) {
            let (previous, current) = (&pair[0], &pair[1]);

            let round_adjustments = &previous.adjustments;
            if round_adjustments.is_empty() {
                continue;
            }

            // Stage 1: adjustments -> improvements per metric.
            let mut round_improvements = Measurements::new();
            for (metric, previous_measurement) in &previous.measurements {
                let current_measurement = current
                    .measurements
                    .get(metric)
                    .copied()
                    .unwrap_or_default();
                round_improvements.insert(
                    metric.clone(),
                    Measurement::delta(*previous_measurement, current_measurement),
                );
            }

            // Stage 2: distribute credit across the configs adjusted together
            // and normalize by the adjustment magnitude.
            for (config, adjustment) in round_adjustments {
                let per_config = correlations.entry(config.clone()).or_default();
                for (metric, improvement) in &round_improvements {
                    let scaled =
                        improvement.scale(1.0 / round_adjustments.len() as f64 / adjustment);
                    per_config.entry(metric.clone()).or_default().push(scaled);
                }
            }
        }

        // Stage 3: fold into the long-lived averages.
        for (config, correlation) in correlations {
            let averages = self.average_correlations.entry(config).or_default();
            for (metric, improvements) in correlation {
                let updated = match averages.get(&metric) {
                    Some(existing) => existing.concat(&improvements),
                    None => AverageMeasurement::new(&improvements),
                };
                averages.insert(metric, updated);
            }
        }

        self.buffer.clear();
    }

    /// Suggests, per config, the scalar adjustment that would in expectation
    /// close the gaps reported by `report`'s alert notifications. Returns
    /// `None` when no reported metric needs improvement.
    pub fn suggest_adjustments(&self, report: &MetricReport) -> Option<Adjustments> {
        let mut needed = Measurements::new();
        for notification in report {
            if notification.notification_type != NotificationType::Alert {
                continue;
            }

            let utilization_needed = match (
                notification.current_average_utilization,
                notification.target_average_utilization,
            ) {
                (Some(current), Some(target)) => f64::from(current - target),
                _ => 0.0,
            };

            let value_needed = match &notification.target_average_value {
                Some(target) => {
                    let current = notification
                        .current_average_value
                        .as_ref()
                        .map(|quantity| quantity.as_f64())
                        .unwrap_or(0.0);
                    current - target.as_f64()
                }
                None => 0.0,
            };

            if utilization_needed > 0.0 || value_needed > 0.0 {
                needed.insert(
                    notification.name.clone(),
                    Measurement {
                        value: value_needed,
                        utilization: utilization_needed,
                    },
                );
            }
        }

        if needed.is_empty() {
            return None;
        }

        let mut suggestions = Adjustments::new();
        for (config, correlations) in &self.average_correlations {
            for (metric, improvement) in correlations {
                if let Some(required) = needed.get(metric) {
                    // Scale the needed delta by the inverse per-unit effect,
                    // amortized over the metrics this config influences.
                    suggestions.insert(
                        config.clone(),
                        required.divide(improvement.value) / correlations.len() as f64,
                    );
                }
            }
        }

        Some(suggestions)
    }

    /// Currently learned per-unit effects.
    pub fn correlations(&self) -> &AverageCorrelations {
        &self.average_correlations
    }

    /// Rounds waiting for the next recorrelation.
    pub fn buffered_rounds(&self) -> usize {
        self.buffer.len()
    }
}
