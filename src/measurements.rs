use serde::{Deserialize, Serialize};

use crate::quantity::Quantity;

/// A unitless value/utilization pair observed for one metric.
///
/// Callers convert quantities through [`Quantity::as_f64`] before doing any
/// arithmetic; a metric that exposes only one of the two axes carries zero in
/// the other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: f64,
    pub utilization: f64,
}

impl Measurement {
    pub fn new(value: &Quantity, utilization: Option<i32>) -> Self {
        Measurement {
            value: value.as_f64(),
            utilization: utilization.map(f64::from).unwrap_or(0.0),
        }
    }

    /// Componentwise `previous - current`, the improvement between two rounds.
    pub fn delta(previous: Measurement, current: Measurement) -> Measurement {
        previous.sub(current)
    }

    pub fn sub(self, other: Measurement) -> Measurement {
        Measurement {
            value: self.value - other.value,
            utilization: self.utilization - other.utilization,
        }
    }

    pub fn scale(self, factor: f64) -> Measurement {
        Measurement {
            value: self.value * factor,
            utilization: self.utilization * factor,
        }
    }

    /// The value-axis ratio `self.value / other.value`, or zero when the
    /// divisor is zero.
    pub fn divide(self, other: Measurement) -> f64 {
        if other.value == 0.0 {
            return 0.0;
        }
        self.value / other.value
    }

    /// How many times `self` fits into `other`, reasoning in whichever axis
    /// both measurements expose: the mean of the utilization and value ratios
    /// when both are usable, the usable one otherwise, and zero when neither.
    pub fn goes_into(self, other: Measurement) -> f64 {
        let utilization_times = if self.utilization != 0.0 && other.utilization != 0.0 {
            other.utilization / self.utilization
        } else {
            0.0
        };

        let value_times = if self.value != 0.0 {
            other.value / self.value
        } else {
            0.0
        };

        if utilization_times != 0.0 && value_times != 0.0 {
            (utilization_times + value_times) / 2.0
        } else if utilization_times != 0.0 {
            utilization_times
        } else {
            value_times
        }
    }
}

/// A running mean of measurements together with the number of samples it
/// stands for. `among == 0` means the zero measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AverageMeasurement {
    pub value: Measurement,
    pub among: usize,
}

impl AverageMeasurement {
    pub fn new(measurements: &[Measurement]) -> Self {
        if measurements.is_empty() {
            return AverageMeasurement::default();
        }

        let mut value_sum = 0.0;
        let mut utilization_sum = 0.0;
        for measurement in measurements {
            value_sum += measurement.value;
            utilization_sum += measurement.utilization;
        }

        let count = measurements.len();
        AverageMeasurement {
            value: Measurement {
                value: value_sum / count as f64,
                utilization: utilization_sum / count as f64,
            },
            among: count,
        }
    }

    /// Extends the running mean with more samples.
    ///
    /// The existing history is re-expanded as `among` copies of the current
    /// mean, so repeated concats equal averaging the full history only up to
    /// floating-point error; the original samples are not recoverable.
    pub fn concat(self, measurements: &[Measurement]) -> AverageMeasurement {
        let mut expanded = Vec::with_capacity(self.among + measurements.len());
        expanded.extend_from_slice(measurements);
        expanded.resize(self.among + measurements.len(), self.value);
        AverageMeasurement::new(&expanded)
    }
}
