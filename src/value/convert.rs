// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Numeric conversion helpers (§4.1): lossy-but-defined, C-style
//! round-toward-zero, out-of-range conversions fail with `ConversionFailed`.

use super::{CoreType, Value};
use crate::error::{Error, Result};

/// Truncating float->int conversion; fails if the value doesn't fit in i64.
pub fn float_to_int(f: f64) -> Result<i64> {
    if !f.is_finite() || f >= i64::MAX as f64 || f <= i64::MIN as f64 {
        return Err(Error::ConversionFailed(format!("{f} out of range for int")));
    }
    Ok(f.trunc() as i64)
}

/// Widens `a`/`b` to a common numeric type per the documented widening
/// rules (int -> float) so comparisons and coercion can proceed. Returns
/// `InvalidType` if either side isn't numeric.
pub fn widen_numeric(a: &Value, b: &Value) -> Result<(f64, f64)> {
    let to_f64 = |v: &Value| -> Result<f64> {
        match v {
            Value::Int(i) => Ok(*i as f64),
            Value::Float(f) => Ok(*f),
            Value::Bool(b) => Ok(*b as i64 as f64),
            other => Err(Error::InvalidType(format!(
                "{:?} is not numeric",
                other.core_type()
            ))),
        }
    };
    Ok((to_f64(a)?, to_f64(b)?))
}

/// True if `from` can be implicitly widened to `to` for a property write
/// (§4.3 step 7: "documented numeric widenings").
pub fn is_numeric_widening(from: CoreType, to: CoreType) -> bool {
    matches!(
        (from, to),
        (CoreType::Int, CoreType::Float) | (CoreType::Bool, CoreType::Int) | (CoreType::Bool, CoreType::Float)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_to_int_truncates_toward_zero() {
        assert_eq!(float_to_int(4.9).unwrap(), 4);
        assert_eq!(float_to_int(-4.9).unwrap(), -4);
    }

    #[test]
    fn float_to_int_out_of_range_fails() {
        assert!(float_to_int(1e300).is_err());
    }

    #[test]
    fn widening_table_matches_documented_rules() {
        assert!(is_numeric_widening(CoreType::Int, CoreType::Float));
        assert!(!is_numeric_widening(CoreType::Float, CoreType::Int));
        assert!(!is_numeric_widening(CoreType::String, CoreType::Int));
    }
}
