//! Arithmetic on `int`, `bool` and `float`.
//!
//! Integers stay in `i64` until an operation overflows, then continue as
//! `BigInt`; results that fit are normalized back. Division, modulo and
//! shifts follow Python's floor semantics and error messages.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};

use super::value::Value;
use crate::{
    exception::{ExcType, RunResult},
    types::{BinaryOp, UnaryOp},
};

/// Modulus of CPython's numeric hash, `2**61 - 1`.
const HASH_MODULUS: u64 = (1 << 61) - 1;
const HASH_INF: i64 = 314_159;

/// A numeric operand, borrowed out of a `Value`.
#[derive(Debug, Clone)]
enum Num {
    Int(i64),
    Big(BigInt),
    Float(f64),
}

fn num(value: &Value) -> Option<Num> {
    match value {
        Value::Bool(b) => Some(Num::Int(i64::from(*b))),
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Long(b) => Some(Num::Big((**b).clone())),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

/// True for `int`, `bool` and `float` values.
pub(super) fn is_number(value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Int(_) | Value::Long(_) | Value::Float(_))
}

pub(super) fn to_f64(value: &Value) -> RunResult<Option<f64>> {
    Ok(match num(value) {
        Some(Num::Int(i)) => Some(i as f64),
        Some(Num::Big(b)) => Some(big_to_f64(&b)?),
        Some(Num::Float(f)) => Some(f),
        None => None,
    })
}

fn big_to_f64(value: &BigInt) -> RunResult<f64> {
    match value.to_f64() {
        Some(f) if f.is_finite() => Ok(f),
        _ => Err(ExcType::OverflowError.error("int too large to convert to float")),
    }
}

/// `lhs <op> rhs` for two numbers, or `None` if either operand is not a
/// number or the operator does not apply.
pub(super) fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Option<RunResult<Value>> {
    if let (Value::Bool(a), Value::Bool(b)) = (lhs, rhs) {
        match op {
            BinaryOp::And => return Some(Ok(Value::Bool(a & b))),
            BinaryOp::Or => return Some(Ok(Value::Bool(a | b))),
            BinaryOp::Xor => return Some(Ok(Value::Bool(a ^ b))),
            _ => {}
        }
    }
    let (a, b) = (num(lhs)?, num(rhs)?);
    match (a, b) {
        (Num::Int(a), Num::Int(b)) => int_binary(op, a, b),
        (Num::Float(a), Num::Float(b)) => float_binary(op, a, b),
        (Num::Float(a), other) => match other_to_f64(other) {
            Ok(b) => float_binary(op, a, b),
            Err(err) => Some(Err(err)),
        },
        (other, Num::Float(b)) => match other_to_f64(other) {
            Ok(a) => float_binary(op, a, b),
            Err(err) => Some(Err(err)),
        },
        (a, b) => big_binary(op, &to_big(a), &to_big(b)),
    }
}

fn other_to_f64(value: Num) -> RunResult<f64> {
    match value {
        Num::Int(i) => Ok(i as f64),
        Num::Big(b) => big_to_f64(&b),
        Num::Float(f) => Ok(f),
    }
}

fn to_big(value: Num) -> BigInt {
    match value {
        Num::Int(i) => BigInt::from(i),
        Num::Big(b) => b,
        // Callers only pass integer operands.
        Num::Float(f) => BigInt::from_f64(f).unwrap_or_default(),
    }
}

fn int_binary(op: BinaryOp, a: i64, b: i64) -> Option<RunResult<Value>> {
    let fast = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::FloorDiv | BinaryOp::Mod if b == 0 => {
            return Some(Err(ExcType::zero_division("integer division or modulo by zero")));
        }
        BinaryOp::FloorDiv if a == i64::MIN && b == -1 => None,
        BinaryOp::FloorDiv => Some(Integer::div_floor(&a, &b)),
        BinaryOp::Mod if b == -1 => Some(0),
        BinaryOp::Mod => Some(Integer::mod_floor(&a, &b)),
        BinaryOp::TrueDiv => {
            if b == 0 {
                return Some(Err(ExcType::zero_division("division by zero")));
            }
            return Some(Ok(Value::Float(a as f64 / b as f64)));
        }
        BinaryOp::Pow => {
            if b < 0 {
                return float_binary(op, a as f64, b as f64);
            }
            u32::try_from(b).ok().and_then(|exp| a.checked_pow(exp))
        }
        BinaryOp::LShift => {
            if b < 0 {
                return Some(Err(ExcType::ValueError.error("negative shift count")));
            }
            if a == 0 {
                Some(0)
            } else if b < 63 {
                let shifted = a << b;
                (shifted >> b == a).then_some(shifted)
            } else {
                None
            }
        }
        BinaryOp::RShift => {
            if b < 0 {
                return Some(Err(ExcType::ValueError.error("negative shift count")));
            }
            Some(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b })
        }
        BinaryOp::And => Some(a & b),
        BinaryOp::Or => Some(a | b),
        BinaryOp::Xor => Some(a ^ b),
        BinaryOp::MatMul => return None,
    };
    match fast {
        Some(result) => Some(Ok(Value::Int(result))),
        None => big_binary(op, &BigInt::from(a), &BigInt::from(b)),
    }
}

fn big_binary(op: BinaryOp, a: &BigInt, b: &BigInt) -> Option<RunResult<Value>> {
    let zero_division = || Some(Err(ExcType::zero_division("integer division or modulo by zero")));
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::FloorDiv if b.is_zero() => return zero_division(),
        BinaryOp::Mod if b.is_zero() => return zero_division(),
        BinaryOp::FloorDiv => Integer::div_floor(a, b),
        BinaryOp::Mod => Integer::mod_floor(a, b),
        BinaryOp::TrueDiv => {
            if b.is_zero() {
                return Some(Err(ExcType::zero_division("division by zero")));
            }
            return Some(big_to_f64(a).and_then(|a| Ok(Value::Float(a / big_to_f64(b)?))));
        }
        BinaryOp::Pow => {
            if b.is_negative() {
                return Some(
                    big_to_f64(a).and_then(|a| float_binary(op, a, big_to_f64(b)?).unwrap_or(Ok(Value::None))),
                );
            }
            let Some(exp) = b.to_u32() else {
                return Some(Err(ExcType::OverflowError.error("exponent too large")));
            };
            a.pow(exp)
        }
        BinaryOp::LShift | BinaryOp::RShift => {
            if b.is_negative() {
                return Some(Err(ExcType::ValueError.error("negative shift count")));
            }
            let Some(shift) = b.to_usize() else {
                return Some(Err(ExcType::OverflowError.error("too many digits in integer")));
            };
            if op == BinaryOp::LShift { a << shift } else { a >> shift }
        }
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::MatMul => return None,
    };
    Some(Ok(Value::from_bigint(result)))
}

fn float_binary(op: BinaryOp, a: f64, b: f64) -> Option<RunResult<Value>> {
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::TrueDiv => {
            if b == 0.0 {
                return Some(Err(ExcType::zero_division("float division by zero")));
            }
            a / b
        }
        BinaryOp::FloorDiv => {
            if b == 0.0 {
                return Some(Err(ExcType::zero_division("float floor division by zero")));
            }
            float_divmod(a, b).0
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Some(Err(ExcType::zero_division("float modulo")));
            }
            float_divmod(a, b).1
        }
        BinaryOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Some(Err(ExcType::zero_division("0.0 cannot be raised to a negative power")));
            }
            a.powf(b)
        }
        _ => return None,
    };
    Some(Ok(Value::Float(result)))
}

/// Floor division and modulo of floats, sign-adjusted like `float.__divmod__`.
fn float_divmod(a: f64, b: f64) -> (f64, f64) {
    let mut rem = a % b;
    let mut div = (a - rem) / b;
    if rem == 0.0 {
        rem = 0.0_f64.copysign(b);
    } else if (b < 0.0) != (rem < 0.0) {
        rem += b;
        div -= 1.0;
    }
    let floor = if div == 0.0 {
        0.0_f64.copysign(a / b)
    } else {
        let floor = div.floor();
        if div - floor > 0.5 { floor + 1.0 } else { floor }
    };
    (floor, rem)
}

/// Three-way comparison of two numbers. The outer `None` means "not both
/// numbers"; the inner `None` means unordered (a NaN is involved).
pub(super) fn compare(lhs: &Value, rhs: &Value) -> Option<Option<Ordering>> {
    let ordering = match (num(lhs)?, num(rhs)?) {
        (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
        (Num::Float(a), Num::Float(b)) => a.partial_cmp(&b),
        (Num::Float(a), other) => compare_float_int(a, other),
        (other, Num::Float(b)) => compare_float_int(b, other).map(Ordering::reverse),
        (a, b) => Some(to_big(a).cmp(&to_big(b))),
    };
    Some(ordering)
}

fn compare_float_int(f: f64, int: Num) -> Option<Ordering> {
    if f.is_nan() {
        return None;
    }
    if f.is_infinite() {
        return Some(if f > 0.0 { Ordering::Greater } else { Ordering::Less });
    }
    // Compare exactly: the integer part of the float against the int, then
    // the fractional part breaks ties.
    let whole = f.trunc();
    let int = to_big(int);
    let whole_big = BigInt::from_f64(whole)?;
    match whole_big.cmp(&int) {
        Ordering::Equal => (f - whole).partial_cmp(&0.0),
        other => Some(other),
    }
}

/// Unary `-`, `+` and `~` on numbers.
pub(super) fn unary(op: UnaryOp, value: &Value) -> Option<RunResult<Value>> {
    let result = match (op, num(value)?) {
        (UnaryOp::Neg, Num::Int(i)) => i.checked_neg().map_or_else(|| Value::from_bigint(-BigInt::from(i)), Value::Int),
        (UnaryOp::Neg, Num::Big(b)) => Value::from_bigint(-b),
        (UnaryOp::Neg, Num::Float(f)) => Value::Float(-f),
        (UnaryOp::Pos, Num::Int(i)) => Value::Int(i),
        (UnaryOp::Pos, Num::Big(b)) => Value::from_bigint(b),
        (UnaryOp::Pos, Num::Float(f)) => Value::Float(f),
        (UnaryOp::Invert, Num::Int(i)) => Value::Int(!i),
        (UnaryOp::Invert, Num::Big(b)) => Value::from_bigint(-b - 1),
        _ => return None,
    };
    Some(Ok(result))
}

/// `abs()` of a number.
pub(super) fn abs(value: &Value) -> Option<Value> {
    Some(match num(value)? {
        Num::Int(i) => i.checked_abs().map_or_else(|| Value::from_bigint(BigInt::from(i).abs()), Value::Int),
        Num::Big(b) => Value::from_bigint(b.abs()),
        Num::Float(f) => Value::Float(f.abs()),
    })
}

fn fold_hash(negative: bool, magnitude: u64) -> u64 {
    let h = (magnitude % HASH_MODULUS) as i64;
    let h = if negative { -h } else { h };
    (if h == -1 { -2 } else { h }) as u64
}

/// CPython-compatible hash of an integer, so `hash(1) == hash(1.0) == hash(True)`.
pub(super) fn hash_int(value: i64) -> u64 {
    fold_hash(value < 0, value.unsigned_abs())
}

pub(super) fn hash_bigint(value: &BigInt) -> u64 {
    let magnitude = (value.abs() % HASH_MODULUS).to_u64().unwrap_or_default();
    fold_hash(value.is_negative(), magnitude)
}

pub(super) fn hash_float(value: f64) -> u64 {
    if value.is_infinite() {
        return (if value > 0.0 { HASH_INF } else { -HASH_INF }) as u64;
    }
    if value.is_nan() {
        return 0;
    }
    if value.fract() == 0.0 {
        if let Some(small) = value.to_i64() {
            return hash_int(small);
        }
        if let Some(big) = BigInt::from_f64(value) {
            return hash_bigint(&big);
        }
    }
    ahash::RandomState::with_seeds(7, 11, 13, 17).hash_one(value.to_bits())
}

/// Hash of a numeric value, `None` for non-numbers.
pub(super) fn hash(value: &Value) -> Option<u64> {
    Some(match value {
        Value::Bool(b) => hash_int(i64::from(*b)),
        Value::Int(i) => hash_int(*i),
        Value::Long(b) => hash_bigint(b),
        Value::Float(f) => hash_float(*f),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn eval(op: BinaryOp, a: Value, b: Value) -> Value {
        binary(op, &a, &b).unwrap().unwrap()
    }

    #[test]
    fn floor_semantics_for_negative_operands() {
        assert!(matches!(eval(BinaryOp::FloorDiv, Value::Int(-7), Value::Int(2)), Value::Int(-4)));
        assert!(matches!(eval(BinaryOp::Mod, Value::Int(-7), Value::Int(2)), Value::Int(1)));
        assert!(matches!(eval(BinaryOp::Mod, Value::Float(-7.0), Value::Float(2.0)), Value::Float(f) if f == 1.0));
        assert!(matches!(eval(BinaryOp::FloorDiv, Value::Float(7.0), Value::Float(-2.0)), Value::Float(f) if f == -4.0));
    }

    #[test]
    fn overflow_promotes_to_bigint() {
        let big = eval(BinaryOp::Mul, Value::Int(i64::MAX), Value::Int(2));
        assert!(matches!(big, Value::Long(_)));
        let back = eval(BinaryOp::FloorDiv, big, Value::Int(2));
        assert!(matches!(back, Value::Int(i64::MAX)));
        assert!(matches!(eval(BinaryOp::LShift, Value::Int(1), Value::Int(64)), Value::Long(_)));
    }

    #[test]
    fn division_by_zero_messages() {
        let err = binary(BinaryOp::TrueDiv, &Value::Int(1), &Value::Int(0)).unwrap().unwrap_err();
        assert_eq!(err.to_string(), "ZeroDivisionError: division by zero");
        let err = binary(BinaryOp::Mod, &Value::Float(1.0), &Value::Int(0)).unwrap().unwrap_err();
        assert_eq!(err.to_string(), "ZeroDivisionError: float modulo");
    }

    #[test]
    fn mixed_int_and_float_promote_to_float() {
        assert!(matches!(eval(BinaryOp::Add, Value::Int(1), Value::Float(0.5)), Value::Float(f) if f == 1.5));
        assert!(matches!(eval(BinaryOp::Mul, Value::Float(0.5), Value::Int(4)), Value::Float(f) if f == 2.0));
        assert!(matches!(eval(BinaryOp::Sub, Value::Bool(true), Value::Float(0.25)), Value::Float(f) if f == 0.75));
        // No float meaning: left for the caller to raise `TypeError`.
        assert!(binary(BinaryOp::And, &Value::Float(1.0), &Value::Int(1)).is_none());

        let huge = Value::from_bigint(BigInt::from(10).pow(400));
        let err = binary(BinaryOp::Add, &huge, &Value::Float(1.0)).unwrap().unwrap_err();
        assert_eq!(err.to_string(), "OverflowError: int too large to convert to float");
    }

    #[test]
    fn bool_bitwise_stays_bool() {
        assert!(matches!(eval(BinaryOp::And, Value::Bool(true), Value::Bool(false)), Value::Bool(false)));
        assert!(matches!(eval(BinaryOp::Add, Value::Bool(true), Value::Bool(true)), Value::Int(2)));
    }

    #[test]
    fn mixed_comparisons_are_exact() {
        assert_eq!(compare(&Value::Int(1), &Value::Float(1.5)), Some(Some(Ordering::Less)));
        assert_eq!(compare(&Value::Float(2.0), &Value::Int(2)), Some(Some(Ordering::Equal)));
        assert_eq!(compare(&Value::Float(f64::NAN), &Value::Int(2)), Some(None));
        assert_eq!(compare(&Value::Int(1), &Value::from("1")), None);
    }

    #[test]
    fn equal_numbers_hash_equal() {
        assert_eq!(hash_int(1), hash_float(1.0));
        assert_eq!(hash_int(-1), hash_int(-2));
        let big = BigInt::from(2).pow(70);
        assert_eq!(hash_bigint(&big), hash_float(2f64.powi(70)));
    }
}
