//! WAD (1e18) and RAY (1e27) scaled integer arithmetic.
//!
//! Every helper is checked: overflow surfaces as [`RewardError::Overflow`]
//! and a zero divisor as [`RewardError::DivisionByZero`]. Division truncates
//! toward zero for both signed and unsigned values.

use ethnum::{I256, U256};

use crate::error::{Result, RewardError};

pub const WAD: U256 = U256::new(1_000_000_000_000_000_000);
pub const RAY: U256 = U256::new(1_000_000_000_000_000_000_000_000_000);
pub const WAD_I: I256 = I256::new(1_000_000_000_000_000_000);
pub const RAY_I: I256 = I256::new(1_000_000_000_000_000_000_000_000_000);

/// `a * b / d` on unsigned values.
pub fn mul_div(a: U256, b: U256, d: U256) -> Result<U256> {
    if d == U256::ZERO {
        return Err(RewardError::DivisionByZero);
    }
    Ok(a.checked_mul(b).ok_or(RewardError::Overflow)? / d)
}

/// `a * b / d` on signed values.
pub fn mul_div_signed(a: I256, b: I256, d: I256) -> Result<I256> {
    if d == I256::ZERO {
        return Err(RewardError::DivisionByZero);
    }
    a.checked_mul(b)
        .ok_or(RewardError::Overflow)?
        .checked_div(d)
        .ok_or(RewardError::Overflow)
}

pub fn add(a: U256, b: U256) -> Result<U256> {
    a.checked_add(b).ok_or(RewardError::Overflow)
}

pub fn sub(a: U256, b: U256) -> Result<U256> {
    a.checked_sub(b).ok_or(RewardError::Overflow)
}

pub fn add_signed(a: I256, b: I256) -> Result<I256> {
    a.checked_add(b).ok_or(RewardError::Overflow)
}

pub fn sub_signed(a: I256, b: I256) -> Result<I256> {
    a.checked_sub(b).ok_or(RewardError::Overflow)
}

/// `|a - b|` without underflow.
pub fn abs_diff(a: U256, b: U256) -> U256 {
    if a >= b {
        a - b
    } else {
        b - a
    }
}

/// Reinterpret an unsigned value as signed, failing if it does not fit.
pub fn to_signed(x: U256) -> Result<I256> {
    if x > I256::MAX.as_u256() {
        return Err(RewardError::Overflow);
    }
    Ok(x.as_i256())
}

/// `x^n` in fixed point with scale `base`, rounding half up at each step.
///
/// Exponentiation by squaring; `rpow(x, 0, base) == base` and
/// `rpow(0, n, base) == 0` for `n > 0`.
pub fn rpow(x: U256, n: u64, base: U256) -> Result<U256> {
    if base == U256::ZERO {
        return Err(RewardError::DivisionByZero);
    }
    if x == U256::ZERO {
        return Ok(if n == 0 { base } else { U256::ZERO });
    }

    let half = base / U256::new(2);
    let mut z = if n % 2 == 0 { base } else { x };
    let mut x = x;
    let mut n = n / 2;

    while n > 0 {
        let xx = x.checked_mul(x).ok_or(RewardError::Overflow)?;
        x = xx.checked_add(half).ok_or(RewardError::Overflow)? / base;
        if n % 2 == 1 {
            let zx = z.checked_mul(x).ok_or(RewardError::Overflow)?;
            z = zx.checked_add(half).ok_or(RewardError::Overflow)? / base;
        }
        n /= 2;
    }

    Ok(z)
}

/// Lossy conversion of a WAD value for reporting.
pub fn wad_to_f64(x: U256) -> f64 {
    x.as_f64() / 1e18
}

pub fn signed_wad_to_f64(x: I256) -> f64 {
    x.as_f64() / 1e18
}

/// Lossy conversion of a float into WAD. Negative and non-finite inputs map to zero.
pub fn wad_from_f64(x: f64) -> U256 {
    if !x.is_finite() || x <= 0.0 {
        return U256::ZERO;
    }
    U256::from((x * 1e18) as u128)
}

pub fn signed_wad_from_f64(x: f64) -> I256 {
    if !x.is_finite() {
        return I256::ZERO;
    }
    I256::new((x * 1e18) as i128)
}

/// Serde adapter writing fixed-point values as decimal strings, since they
/// overflow the integer range of TOML and JSON numbers.
pub mod decimal {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.trim().replace('_', "").parse().map_err(de::Error::custom)
    }
}

/// Like [`decimal`] for a list of values.
pub mod decimal_vec {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::ser::SerializeSeq;
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[allow(clippy::ptr_arg)]
    pub fn serialize<T: Display, S: Serializer>(values: &Vec<T>, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for v in values {
            seq.serialize_element(&v.to_string())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let raw = Vec::<String>::deserialize(deserializer)?;
        raw.iter()
            .map(|s| s.trim().replace('_', "").parse().map_err(de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpow_squares_with_half_up_rounding() {
        let x = RAY - U256::new(1_000_000_000_000_000_000);
        let expected = (x * x + RAY / U256::new(2)) / RAY;
        assert_eq!(rpow(x, 2, RAY).unwrap(), expected);
    }

    #[test]
    fn rpow_tracks_repeated_multiplication() {
        let x = RAY - U256::new(1_000_000_000_000_000_000);
        let mut expected = RAY;
        for _ in 0..5 {
            expected = (expected * x + RAY / U256::new(2)) / RAY;
        }
        let got = rpow(x, 5, RAY).unwrap();
        assert!(abs_diff(got, expected) <= U256::new(10));
    }

    #[test]
    fn rpow_edge_cases() {
        assert_eq!(rpow(U256::ZERO, 0, RAY).unwrap(), RAY);
        assert_eq!(rpow(U256::ZERO, 3, RAY).unwrap(), U256::ZERO);
        assert_eq!(rpow(RAY, 1_000_000, RAY).unwrap(), RAY);
    }
}
