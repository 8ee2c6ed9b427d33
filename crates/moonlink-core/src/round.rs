// Decimal rounding for telemetry values.

use crate::store::StateValue;

/// Number of decimals a value is rounded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    One,
    Two,
    Three,
}

impl Precision {
    fn factor(self) -> f64 {
        match self {
            Self::One => 10.0,
            Self::Two => 100.0,
            Self::Three => 1000.0,
        }
    }
}

/// Round numbers and numeric-looking text to `precision` decimals.
///
/// Numeric text comes back as a number. Anything that cannot be rounded
/// (booleans, non-numeric text, non-finite results) is returned unchanged.
pub fn round(value: &StateValue, precision: Precision) -> StateValue {
    let number = match value {
        StateValue::Number(n) => *n,
        StateValue::Text(s) => match s.trim().parse::<f64>() {
            Ok(n) => n,
            Err(_) => return value.clone(),
        },
        StateValue::Bool(_) => return value.clone(),
    };

    let factor = precision.factor();
    let rounded = (number * factor).round() / factor;
    if rounded.is_finite() {
        StateValue::Number(rounded)
    } else {
        value.clone()
    }
}
