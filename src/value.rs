// A SQL-like dynamic value with a deterministic total order and explicit
// arithmetic coercion rules. This is the one place integer widening and
// numeric coercion are allowed to leak out of their match arms; callers
// never see a `widen` function on the public API.

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use uuid::Uuid;

use crate::error::{Result, VdbeError};

/// Days since 2000-01-01.
pub type DateDays = i32;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int64(i64),
    SmallInt(i16),
    Int32(i32),
    BigInt(i64),
    Serial(i32),
    BigSerial(i64),
    Float(f64),
    Text(String),
    Varchar { s: String, max_len: usize },
    Char { s: String, fixed_len: usize },
    Blob(Vec<u8>),
    Guid(Uuid),
    Decimal(Decimal),
    Date(DateDays),
    Time(i64),
    TimeTz { micros: i64, tz_offset_s: i32 },
    Timestamp(i64),
    TimestampTz { micros: i64, tz_offset_s: i32 },
    Interval { months: i32, micros: i64 },
    Json(String),
    Vector(Rc<Vec<f64>>),
}

/// An arbitrary-precision decimal: an integer coefficient scaled by `10^-scale`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decimal {
    pub coefficient: BigInt,
    pub precision: u8,
    pub scale: u8,
}

impl Decimal {
    pub fn new(coefficient: BigInt, precision: u8, scale: u8) -> Result<Self> {
        if precision < 1 {
            return Err(VdbeError::UnsupportedLiteralType(
                "decimal precision must be >= 1".into(),
            ));
        }
        if scale > precision {
            return Err(VdbeError::UnsupportedLiteralType(
                "decimal scale must be <= precision".into(),
            ));
        }
        let digit_count = coefficient.magnitude().to_string().len() as u8;
        let integer_digits = digit_count.saturating_sub(scale).max(1);
        if integer_digits > precision - scale {
            return Err(VdbeError::UnsupportedLiteralType(format!(
                "decimal {}e-{} has more integer digits than precision {} - scale {} allows",
                coefficient, scale, precision, scale
            )));
        }
        Ok(Self {
            coefficient,
            precision,
            scale,
        })
    }

    fn rescaled(&self, scale: u8) -> BigInt {
        if scale >= self.scale {
            self.coefficient.clone() * BigInt::from(10).pow((scale - self.scale) as u32)
        } else {
            self.coefficient.clone() / BigInt::from(10).pow((self.scale - scale) as u32)
        }
    }

    pub fn to_f64(&self) -> f64 {
        let denom = 10f64.powi(self.scale as i32);
        self.coefficient.to_f64().unwrap_or(0.0) / denom
    }

    pub fn add(&self, other: &Decimal) -> Decimal {
        let scale = self.scale.max(other.scale);
        let coefficient = self.rescaled(scale) + other.rescaled(scale);
        let precision = coefficient.magnitude().to_string().len().max(scale as usize + 1) as u8;
        Decimal {
            coefficient,
            precision,
            scale,
        }
    }

    pub fn sub(&self, other: &Decimal) -> Decimal {
        let scale = self.scale.max(other.scale);
        let coefficient = self.rescaled(scale) - other.rescaled(scale);
        let precision = coefficient.magnitude().to_string().len().max(scale as usize + 1) as u8;
        Decimal {
            coefficient,
            precision,
            scale,
        }
    }

    pub fn mul(&self, other: &Decimal) -> Decimal {
        let scale = self.scale + other.scale;
        let coefficient = self.coefficient.clone() * other.coefficient.clone();
        let precision = coefficient.magnitude().to_string().len().max(scale as usize + 1) as u8;
        Decimal {
            coefficient,
            precision,
            scale,
        }
    }
}

/// The ordinal used as a last-resort tiebreak in `compare` when two values of
/// different kinds have no numeric or textual relationship. Not part of the
/// public API: callers compare `Value`s, never tags directly.
fn variant_tag(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Int64(_)
        | Value::SmallInt(_)
        | Value::Int32(_)
        | Value::BigInt(_)
        | Value::Serial(_)
        | Value::BigSerial(_) => 1,
        Value::Float(_) => 2,
        Value::Text(_) | Value::Varchar { .. } | Value::Char { .. } => 3,
        Value::Blob(_) => 4,
        Value::Guid(_) => 5,
        Value::Decimal(_) => 6,
        Value::Date(_) => 7,
        Value::Time(_) => 8,
        Value::TimeTz { .. } => 9,
        Value::Timestamp(_) => 10,
        Value::TimestampTz { .. } => 11,
        Value::Interval { .. } => 12,
        Value::Json(_) => 13,
        Value::Vector(_) => 14,
    }
}

fn widen_int(v: &Value) -> Option<i64> {
    match v {
        Value::Int64(i) => Some(*i),
        Value::SmallInt(i) => Some(*i as i64),
        Value::Int32(i) => Some(*i as i64),
        Value::BigInt(i) => Some(*i),
        Value::Serial(i) => Some(*i as i64),
        Value::BigSerial(i) => Some(*i),
        _ => None,
    }
}

fn as_str(v: &Value) -> Option<&str> {
    match v {
        Value::Text(s) => Some(s),
        Value::Varchar { s, .. } => Some(s),
        Value::Char { s, .. } => Some(s),
        Value::Json(s) => Some(s),
        _ => None,
    }
}

fn as_bytes(v: &Value) -> Option<&[u8]> {
    match v {
        Value::Blob(b) => Some(b),
        Value::Guid(g) => Some(g.as_bytes()),
        _ => None,
    }
}

fn as_instant_micros(v: &Value) -> Option<i64> {
    match v {
        Value::Date(d) => Some(*d as i64 * 86_400_000_000),
        Value::Time(t) => Some(*t),
        Value::TimeTz { micros, .. } => Some(*micros),
        Value::Timestamp(t) => Some(*t),
        Value::TimestampTz { micros, .. } => Some(*micros),
        _ => None,
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn small_int(i: i64) -> Result<Self> {
        if i < i16::MIN as i64 || i > i16::MAX as i64 {
            return Err(VdbeError::UnsupportedLiteralType(format!(
                "{i} out of range for SmallInt"
            )));
        }
        Ok(Value::SmallInt(i as i16))
    }

    pub fn int32(i: i64) -> Result<Self> {
        if i < i32::MIN as i64 || i > i32::MAX as i64 {
            return Err(VdbeError::UnsupportedLiteralType(format!(
                "{i} out of range for Int32"
            )));
        }
        Ok(Value::Int32(i as i32))
    }

    pub fn char(s: &str, fixed_len: usize) -> Self {
        let mut chars: Vec<char> = s.chars().collect();
        chars.truncate(fixed_len);
        while chars.len() < fixed_len {
            chars.push(' ');
        }
        Value::Char {
            s: chars.into_iter().collect(),
            fixed_len,
        }
    }

    pub fn varchar(s: &str, max_len: usize) -> Self {
        let truncated: String = s.chars().take(max_len).collect();
        Value::Varchar {
            s: truncated,
            max_len,
        }
    }

    pub fn blob(bytes: &[u8]) -> Self {
        Value::Blob(bytes.to_vec())
    }

    pub fn vector(values: &[f64]) -> Self {
        Value::Vector(Rc::new(values.to_vec()))
    }

    /// NULL is false; non-zero numbers and non-empty text are true;
    /// everything else is false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Float(f) => *f != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::Varchar { s, .. } | Value::Char { s, .. } => !s.is_empty(),
            other => widen_int(other).map(|i| i != 0).unwrap_or(false),
        }
    }

    /// The deterministic total order: NULL < anything, same-kind values
    /// compare natively, integers widen to i64, integer vs float widens the
    /// integer, and anything else falls back to a stable ordinal-by-variant
    /// tiebreak.
    pub fn compare(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Float(a), Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Decimal(a), Decimal(b)) => {
                let scale = a.scale.max(b.scale);
                a.rescaled(scale).cmp(&b.rescaled(scale))
            }
            (Interval { months: m1, micros: u1 }, Interval { months: m2, micros: u2 }) => {
                (m1, u1).cmp(&(m2, u2))
            }
            _ => {
                if let (Some(a), Some(b)) = (widen_int(self), widen_int(other)) {
                    return a.cmp(&b);
                }
                if let (Value::Float(a), Some(b)) = (self, widen_int(other)) {
                    return a.partial_cmp(&(b as f64)).unwrap_or(Ordering::Equal);
                }
                if let (Some(a), Value::Float(b)) = (widen_int(self), other) {
                    return (a as f64).partial_cmp(b).unwrap_or(Ordering::Equal);
                }
                if let (Some(a), Some(b)) = (as_str(self), as_str(other)) {
                    return a.cmp(b);
                }
                if let (Some(a), Some(b)) = (as_bytes(self), as_bytes(other)) {
                    return a.cmp(b);
                }
                if let (Some(a), Some(b)) = (as_instant_micros(self), as_instant_micros(other)) {
                    return a.cmp(&b);
                }
                variant_tag(self).cmp(&variant_tag(other))
            }
        }
    }

    /// Arithmetic coercion: if either operand is Float both widen to f64;
    /// otherwise both are treated as integers. Non-numeric operands widen
    /// to 0 rather than erroring.
    fn numeric_widen(&self) -> NumericOperand {
        match self {
            Value::Float(f) => NumericOperand::Float(*f),
            Value::Decimal(d) => NumericOperand::Float(d.to_f64()),
            other => {
                if let Some(i) = widen_int(other) {
                    NumericOperand::Int(i)
                } else if let Value::Text(s) = other {
                    NumericOperand::Int(s.parse::<i64>().unwrap_or(0))
                } else {
                    NumericOperand::Int(0)
                }
            }
        }
    }

    pub fn add(&self, other: &Value) -> Value {
        arith(self, other, |a, b| a.wrapping_add(b), |a, b| a + b)
    }

    pub fn subtract(&self, other: &Value) -> Value {
        arith(self, other, |a, b| a.wrapping_sub(b), |a, b| a - b)
    }

    pub fn multiply(&self, other: &Value) -> Value {
        arith(self, other, |a, b| a.wrapping_mul(b), |a, b| a * b)
    }

    /// Integer division by zero and float division by zero both yield `0`,
    /// a deliberate non-SQL-standard choice rather than returning NULL.
    pub fn divide(&self, other: &Value) -> Value {
        match (self.numeric_widen(), other.numeric_widen()) {
            (NumericOperand::Int(_), NumericOperand::Int(0)) => Value::Int64(0),
            (NumericOperand::Int(a), NumericOperand::Int(b)) => Value::Int64(a / b),
            (a, b) => {
                let (a, b) = (a.as_f64(), b.as_f64());
                if b == 0.0 {
                    Value::Float(0.0)
                } else {
                    Value::Float(a / b)
                }
            }
        }
    }

    /// Widens to `i64` only for the integer family; `None` for every other
    /// kind (unlike `numeric_widen`, this never coerces text or floats).
    pub fn as_int(&self) -> Option<i64> {
        widen_int(self)
    }

    /// Widens to an `f64` using the same coercion `numeric_widen` applies to
    /// arithmetic operands. Used by aggregates (`AVG`, float-promoted `SUM`)
    /// that need a plain float view without going through a binary op.
    pub fn as_f64(&self) -> f64 {
        self.numeric_widen().as_f64()
    }

    pub fn negate(&self) -> Value {
        match self.numeric_widen() {
            NumericOperand::Int(i) => Value::Int64(-i),
            NumericOperand::Float(f) => Value::Float(-f),
        }
    }
}

enum NumericOperand {
    Int(i64),
    Float(f64),
}

impl NumericOperand {
    fn as_f64(&self) -> f64 {
        match self {
            NumericOperand::Int(i) => *i as f64,
            NumericOperand::Float(f) => *f,
        }
    }
}

fn arith(
    lhs: &Value,
    rhs: &Value,
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
) -> Value {
    match (lhs.numeric_widen(), rhs.numeric_widen()) {
        (NumericOperand::Int(a), NumericOperand::Int(b)) => Value::Int64(int_op(a, b)),
        (a, b) => Value::Float(float_op(a.as_f64(), b.as_f64())),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) | Value::Varchar { s, .. } | Value::Char { s, .. } => write!(f, "{s}"),
            Value::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
            Value::Guid(g) => write!(f, "{g}"),
            Value::Decimal(d) => write!(f, "{}", d.to_f64()),
            Value::Json(s) => write!(f, "{s}"),
            Value::Vector(v) => write!(f, "<vector dim={}>", v.len()),
            other => {
                if let Some(i) = widen_int(other) {
                    write!(f, "{i}")
                } else {
                    write!(f, "<value>")
                }
            }
        }
    }
}

/// Numeric digit count of an integer-family or decimal value, used by the
/// `LENGTH` scalar for non-string kinds.
pub fn decimal_digit_count(v: &Value) -> Option<usize> {
    match v {
        Value::Decimal(d) => Some(d.coefficient.magnitude().to_string().len()),
        other => widen_int(other).map(|i| {
            if i == 0 {
                1
            } else {
                i.unsigned_abs().to_string().len()
            }
        }),
    }
}

pub fn is_zero_bigint(b: &BigInt) -> bool {
    b.is_zero()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_distinct_and_least() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int64(0).is_null());
        assert_eq!(Value::Null.compare(&Value::Null), Ordering::Equal);
        assert_eq!(Value::Null.compare(&Value::Int64(-1)), Ordering::Less);
        assert_eq!(Value::Int64(-1).compare(&Value::Null), Ordering::Greater);
    }

    #[test]
    fn compare_is_antisymmetric() {
        let pairs = [
            (Value::Int64(3), Value::Int64(5)),
            (Value::Float(1.5), Value::Int64(2)),
            (Value::Text("abc".into()), Value::Text("abd".into())),
            (Value::Null, Value::Int64(7)),
        ];
        for (a, b) in pairs {
            let fwd = a.compare(&b);
            let bwd = b.compare(&a);
            assert_eq!(fwd, bwd.reverse());
        }
    }

    #[test]
    fn integer_kinds_compare_as_widened() {
        let a = Value::SmallInt(10);
        let b = Value::Int32(10);
        assert_eq!(a.compare(&b), Ordering::Equal);
        let c = Value::BigSerial(11);
        assert_eq!(a.compare(&c), Ordering::Less);
    }

    #[test]
    fn int_to_int32_range_checked() {
        assert!(Value::int32(i64::from(i32::MAX) + 1).is_err());
        assert!(Value::small_int(40000).is_err());
        assert!(Value::small_int(100).is_ok());
    }

    #[test]
    fn char_is_padded_to_fixed_len() {
        let v = Value::char("hi", 5);
        match v {
            Value::Char { s, fixed_len } => {
                assert_eq!(fixed_len, 5);
                assert_eq!(s, "hi   ");
            }
            _ => panic!("expected Char"),
        }
    }

    #[test]
    fn divide_by_zero_is_non_trapping() {
        assert_eq!(Value::Int64(10).divide(&Value::Int64(0)), Value::Int64(0));
        assert_eq!(Value::Float(1.0).divide(&Value::Float(0.0)), Value::Float(0.0));
    }

    #[test]
    fn arithmetic_coercion_promotes_to_float() {
        let r = Value::Int64(2).add(&Value::Float(0.5));
        assert_eq!(r, Value::Float(2.5));
        let r = Value::Int64(2).add(&Value::Int64(3));
        assert_eq!(r, Value::Int64(5));
    }

    #[test]
    fn decimal_rejects_bad_scale_precision() {
        assert!(Decimal::new(BigInt::from(1234), 2, 3).is_err());
        assert!(Decimal::new(BigInt::from(1234), 0, 0).is_err());
    }

    #[test]
    fn decimal_addition_normalizes_scale() {
        let a = Decimal::new(BigInt::from(150), 5, 2).unwrap(); // 1.50
        let b = Decimal::new(BigInt::from(25), 5, 1).unwrap(); // 2.5
        let sum = a.add(&b);
        assert!((sum.to_f64() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn truthiness_follows_sql_coercion_rules() {
        assert!(!Value::Null.is_truthy());
        assert!(Value::Int64(1).is_truthy());
        assert!(!Value::Int64(0).is_truthy());
        assert!(Value::Float(0.1).is_truthy());
        assert!(Value::Text("x".into()).is_truthy());
        assert!(!Value::Text("".into()).is_truthy());
    }
}
