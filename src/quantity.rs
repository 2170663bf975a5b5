use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{MetricsWebhookError, Result};

/// A resource amount: a decimal number with an optional SI or binary suffix,
/// e.g. `500m`, `2`, `3k`, `100Mi`, `1.5Gi`, `2e3`.
///
/// The original string form is kept for serialization so values round-trip
/// byte-for-byte. Conversion to `f64` goes through a scaled-integer decimal
/// intermediate, which keeps integral byte amounts (`1Gi`, `499Mi`) exact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Quantity {
    repr: String,
    negative: bool,
    unscaled: i128,
    /// Number of decimal fraction digits in the mantissa (divides by 10^scale).
    scale: u32,
    suffix: Suffix,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Suffix {
    /// Power of two: `Ki` = 2^10 .. `Ei` = 2^60.
    Binary(u32),
    /// Power of ten: `k` = 10^3, `m` = 10^-3, exponent notation, or none.
    Decimal(i32),
}

impl Quantity {
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| MetricsWebhookError::InvalidQuantity {
            value: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty string"));
        }

        let (negative, rest) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        let mantissa_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        let (mantissa, suffix_str) = rest.split_at(mantissa_end);
        if mantissa.is_empty() {
            return Err(invalid("missing digits"));
        }

        let mut unscaled: i128 = 0;
        let mut scale: u32 = 0;
        let mut seen_dot = false;
        for ch in mantissa.chars() {
            if ch == '.' {
                if seen_dot {
                    return Err(invalid("multiple decimal points"));
                }
                seen_dot = true;
                continue;
            }
            unscaled = unscaled
                .checked_mul(10)
                .and_then(|v| v.checked_add(i128::from(ch as u8 - b'0')))
                .ok_or_else(|| invalid("mantissa out of range"))?;
            if seen_dot {
                scale += 1;
            }
        }

        let suffix = Self::parse_suffix(suffix_str).ok_or_else(|| invalid("unknown suffix"))?;

        Ok(Quantity {
            repr: trimmed.to_string(),
            negative,
            unscaled,
            scale,
            suffix,
        })
    }

    fn parse_suffix(s: &str) -> Option<Suffix> {
        let suffix = match s {
            "" => Suffix::Decimal(0),
            "n" => Suffix::Decimal(-9),
            "u" => Suffix::Decimal(-6),
            "m" => Suffix::Decimal(-3),
            "k" => Suffix::Decimal(3),
            "M" => Suffix::Decimal(6),
            "G" => Suffix::Decimal(9),
            "T" => Suffix::Decimal(12),
            "P" => Suffix::Decimal(15),
            "E" => Suffix::Decimal(18),
            "Ki" => Suffix::Binary(10),
            "Mi" => Suffix::Binary(20),
            "Gi" => Suffix::Binary(30),
            "Ti" => Suffix::Binary(40),
            "Pi" => Suffix::Binary(50),
            "Ei" => Suffix::Binary(60),
            _ => {
                // Exponent notation, e.g. "2e3" / "1E-2".
                let exp = s.strip_prefix(['e', 'E'])?;
                return exp.parse::<i32>().ok().map(Suffix::Decimal);
            }
        };
        Some(suffix)
    }

    /// The amount as a double, computed from the exact decimal parts.
    pub fn as_f64(&self) -> f64 {
        let magnitude = match self.suffix {
            Suffix::Binary(pow) => {
                match (1i128 << pow).checked_mul(self.unscaled) {
                    Some(numerator) => numerator as f64 / pow10_f64(self.scale as i32),
                    None => self.unscaled as f64 * 2f64.powi(pow as i32) / pow10_f64(self.scale as i32),
                }
            }
            Suffix::Decimal(pow) => {
                let exp = pow - self.scale as i32;
                if exp >= 0 {
                    match pow10_i128(exp).and_then(|p| self.unscaled.checked_mul(p)) {
                        Some(numerator) => numerator as f64,
                        None => self.unscaled as f64 * pow10_f64(exp),
                    }
                } else {
                    self.unscaled as f64 / pow10_f64(-exp)
                }
            }
        };
        if self.negative {
            -magnitude
        } else {
            magnitude
        }
    }

    /// The amount in thousandths of a unit, rounded to nearest.
    pub fn milli_value(&self) -> i64 {
        (self.as_f64() * 1000.0).round() as i64
    }

    /// Builds a quantity from thousandths of a unit, rendered as a whole
    /// number when possible and with the `m` suffix otherwise.
    pub fn from_milli(milli: i64) -> Self {
        if milli % 1000 == 0 {
            let units = milli / 1000;
            Quantity {
                repr: units.to_string(),
                negative: units < 0,
                unscaled: i128::from(units).unsigned_abs() as i128,
                scale: 0,
                suffix: Suffix::Decimal(0),
            }
        } else {
            Quantity {
                repr: format!("{milli}m"),
                negative: milli < 0,
                unscaled: i128::from(milli).unsigned_abs() as i128,
                scale: 0,
                suffix: Suffix::Decimal(-3),
            }
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

impl FromStr for Quantity {
    type Err = MetricsWebhookError;

    fn from_str(s: &str) -> Result<Self> {
        Quantity::parse(s)
    }
}

impl TryFrom<String> for Quantity {
    type Error = MetricsWebhookError;

    fn try_from(value: String) -> Result<Self> {
        Quantity::parse(&value)
    }
}

impl From<Quantity> for String {
    fn from(quantity: Quantity) -> String {
        quantity.repr
    }
}

// Amount comparisons, not string comparisons: "1Gi" == "1024Mi".
impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.as_f64().total_cmp(&other.as_f64()).is_eq()
    }
}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.as_f64().total_cmp(&other.as_f64()))
    }
}

fn pow10_i128(exp: i32) -> Option<i128> {
    10i128.checked_pow(u32::try_from(exp).ok()?)
}

fn pow10_f64(exp: i32) -> f64 {
    10f64.powi(exp)
}
