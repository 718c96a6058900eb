use std::cmp::Ordering;

use mongodb::bson::{Bson, Document};

use crate::error::{Error, Result};

/// Largest canonical decimal128 coefficient, 10^34 - 1.
const MAX_DECIMAL_COEFFICIENT: u128 = 9_999_999_999_999_999_999_999_999_999_999_999;
const DECIMAL_EXPONENT_BIAS: i32 = 6176;

/// Compare a data document against a range bound, field by field over the bound's fields.
///
/// Fields missing from `doc` compare as null: the shard key index is unique, so a
/// missing field and an explicit null land on the same index entry.
pub fn compare(doc: &Document, bound: &Document) -> Result<Ordering> {
    for (field, bound_value) in bound {
        let value = doc.get(field).unwrap_or(&Bson::Null);
        let ordering = compare_values(field, value, bound_value)?;
        if ordering != Ordering::Equal {
            return Ok(ordering);
        }
    }
    Ok(Ordering::Equal)
}

/// Compare two values of the same shard key field using the server's sort order.
pub fn compare_values(field: &str, a: &Bson, b: &Bson) -> Result<Ordering> {
    let a = KeyValue::classify(field, a)?;
    let b = KeyValue::classify(field, b)?;

    let rank = a.rank().cmp(&b.rank());
    if rank != Ordering::Equal {
        return Ok(rank);
    }

    let ordering = match (a, b) {
        (KeyValue::Number(a), KeyValue::Number(b)) => a.compare(b),
        (KeyValue::String(a), KeyValue::String(b)) => a.as_bytes().cmp(b.as_bytes()),
        // length, then subtype, then content
        (
            KeyValue::Binary {
                subtype: a_subtype,
                bytes: a_bytes,
            },
            KeyValue::Binary {
                subtype: b_subtype,
                bytes: b_bytes,
            },
        ) => a_bytes
            .len()
            .cmp(&b_bytes.len())
            .then(a_subtype.cmp(&b_subtype))
            .then_with(|| a_bytes.cmp(b_bytes)),
        (KeyValue::ObjectId(a), KeyValue::ObjectId(b)) => a.cmp(&b),
        (KeyValue::Boolean(a), KeyValue::Boolean(b)) => a.cmp(&b),
        (KeyValue::DateTime(a), KeyValue::DateTime(b)) => a.cmp(&b),
        (
            KeyValue::Timestamp {
                time: a_time,
                increment: a_increment,
            },
            KeyValue::Timestamp {
                time: b_time,
                increment: b_increment,
            },
        ) => a_time.cmp(&b_time).then(a_increment.cmp(&b_increment)),
        // min key, null and max key each hold a single value
        _ => Ordering::Equal,
    };
    Ok(ordering)
}

/// Sort families, ascending. The server also ranks embedded documents and arrays
/// between string and binary, and regular expressions between timestamp and max key,
/// but none of those can be shard key values so they are rejected before ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    MinKey,
    Null,
    Number,
    String,
    Binary,
    ObjectId,
    Boolean,
    DateTime,
    Timestamp,
    MaxKey,
}

/// A shard key value reduced to what the comparator needs.
#[derive(Debug, Clone, Copy)]
enum KeyValue<'a> {
    MinKey,
    Null,
    Number(Number),
    /// strings and symbols
    String(&'a str),
    Binary {
        subtype: u8,
        bytes: &'a [u8],
    },
    ObjectId([u8; 12]),
    Boolean(bool),
    DateTime(i64),
    Timestamp {
        time: u32,
        increment: u32,
    },
    MaxKey,
}

impl<'a> KeyValue<'a> {
    fn classify(field: &str, value: &'a Bson) -> Result<Self> {
        let key_value = match value {
            Bson::MinKey => KeyValue::MinKey,
            Bson::Null => KeyValue::Null,
            Bson::Int32(v) => KeyValue::Number(Number::Int(i64::from(*v))),
            Bson::Int64(v) => KeyValue::Number(Number::Int(*v)),
            Bson::Double(v) if v.is_nan() => {
                return Err(Error::UnsupportedValue {
                    field: field.to_string(),
                    reason: "NaN has no position in the shard key order".to_string(),
                })
            }
            Bson::Double(v) => KeyValue::Number(Number::Double(*v)),
            Bson::Decimal128(d) => match Decimal::from_bytes(d.bytes()) {
                Decimal::NaN => {
                    return Err(Error::UnsupportedValue {
                        field: field.to_string(),
                        reason: "decimal NaN has no position in the shard key order".to_string(),
                    })
                }
                decimal => KeyValue::Number(Number::Decimal(decimal)),
            },
            Bson::String(s) | Bson::Symbol(s) => KeyValue::String(s),
            Bson::Binary(binary) => KeyValue::Binary {
                subtype: u8::from(binary.subtype),
                bytes: &binary.bytes,
            },
            Bson::ObjectId(oid) => KeyValue::ObjectId(oid.bytes()),
            Bson::Boolean(v) => KeyValue::Boolean(*v),
            Bson::DateTime(dt) => KeyValue::DateTime(dt.timestamp_millis()),
            Bson::Timestamp(ts) => KeyValue::Timestamp {
                time: ts.time,
                increment: ts.increment,
            },
            Bson::MaxKey => KeyValue::MaxKey,
            other => {
                return Err(Error::UnsupportedType {
                    field: field.to_string(),
                    kind: other.element_type(),
                })
            }
        };
        Ok(key_value)
    }

    fn rank(&self) -> Rank {
        match self {
            KeyValue::MinKey => Rank::MinKey,
            KeyValue::Null => Rank::Null,
            KeyValue::Number(_) => Rank::Number,
            KeyValue::String(_) => Rank::String,
            KeyValue::Binary { .. } => Rank::Binary,
            KeyValue::ObjectId(_) => Rank::ObjectId,
            KeyValue::Boolean(_) => Rank::Boolean,
            KeyValue::DateTime(_) => Rank::DateTime,
            KeyValue::Timestamp { .. } => Rank::Timestamp,
            KeyValue::MaxKey => Rank::MaxKey,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    /// never NaN
    Double(f64),
    /// never NaN
    Decimal(Decimal),
}

impl Number {
    fn compare(self, other: Number) -> Ordering {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.cmp(&b),
            (Number::Double(a), Number::Double(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            (Number::Int(a), Number::Double(b)) => compare_int_double(a, b),
            (Number::Double(a), Number::Int(b)) => compare_int_double(b, a).reverse(),
            (a, b) => a.exact().compare(b.exact()),
        }
    }

    fn exact(self) -> Exact {
        match self {
            Number::Int(v) => Exact::finite(v < 0, u128::from(v.unsigned_abs()), 0),
            Number::Double(v) => Exact::from_double(v),
            Number::Decimal(Decimal::Finite {
                negative,
                coefficient,
                exponent,
            }) => Exact::finite(negative, coefficient, exponent),
            Number::Decimal(Decimal::Infinite { negative: true }) => Exact::NegInfinity,
            Number::Decimal(_) => Exact::PosInfinity,
        }
    }
}

/// `a as f64` rounds monotonically, so a strict answer from the float comparison is
/// exact; on a tie `b` is integral and within i64 range give or take one, and i128
/// settles it.
fn compare_int_double(a: i64, b: f64) -> Ordering {
    match (a as f64).partial_cmp(&b) {
        Some(Ordering::Equal) | None => i128::from(a).cmp(&(b as i128)),
        Some(ordering) => ordering,
    }
}

/// IEEE 754-2008 decimal128, binary integer decimal encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decimal {
    NaN,
    Infinite {
        negative: bool,
    },
    Finite {
        negative: bool,
        coefficient: u128,
        exponent: i32,
    },
}

impl Decimal {
    fn from_bytes(bytes: [u8; 16]) -> Self {
        let bits = u128::from_le_bytes(bytes);
        let negative = bits >> 127 == 1;
        match (bits >> 122) & 0x1f {
            0x1f => return Decimal::NaN,
            0x1e => return Decimal::Infinite { negative },
            _ => {}
        }
        let (biased_exponent, coefficient) = if (bits >> 125) & 0b11 == 0b11 {
            // implicit 0b100 prefix pushes the coefficient past 10^34: non-canonical, reads as zero
            ((bits >> 111) & 0x3fff, 0)
        } else {
            ((bits >> 113) & 0x3fff, bits & ((1u128 << 113) - 1))
        };
        let coefficient = if coefficient > MAX_DECIMAL_COEFFICIENT {
            0
        } else {
            coefficient
        };
        Decimal::Finite {
            negative,
            coefficient,
            exponent: biased_exponent as i32 - DECIMAL_EXPONENT_BIAS,
        }
    }
}

/// An exact decimal value, `coefficient * 10^exponent`, with trailing zeros stripped
/// from the coefficient so that 5, 5.0 and 5.00 all share one representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exact {
    NegInfinity,
    Finite {
        negative: bool,
        coefficient: u128,
        exponent: i32,
    },
    PosInfinity,
}

impl Exact {
    fn finite(negative: bool, mut coefficient: u128, mut exponent: i32) -> Self {
        if coefficient == 0 {
            return Exact::Finite {
                negative: false,
                coefficient: 0,
                exponent: 0,
            };
        }
        while coefficient % 10 == 0 {
            coefficient /= 10;
            exponent += 1;
        }
        Exact::Finite {
            negative,
            coefficient,
            exponent,
        }
    }

    /// Goes through the shortest round-trip decimal rendering of the double, the same
    /// digits the server shows for it.
    fn from_double(v: f64) -> Self {
        if v.is_infinite() {
            return if v < 0.0 {
                Exact::NegInfinity
            } else {
                Exact::PosInfinity
            };
        }
        let rendered = format!("{:e}", v.abs());
        let (mantissa, exponent) = rendered.split_once('e').unwrap_or((&rendered, "0"));
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        let coefficient = whole
            .bytes()
            .chain(fraction.bytes())
            .fold(0u128, |acc, digit| acc * 10 + u128::from(digit - b'0'));
        Exact::finite(
            v.is_sign_negative(),
            coefficient,
            exponent - fraction.len() as i32,
        )
    }

    fn compare(self, other: Exact) -> Ordering {
        match (self, other) {
            (Exact::NegInfinity, Exact::NegInfinity) | (Exact::PosInfinity, Exact::PosInfinity) => {
                Ordering::Equal
            }
            (Exact::NegInfinity, _) | (_, Exact::PosInfinity) => Ordering::Less,
            (_, Exact::NegInfinity) | (Exact::PosInfinity, _) => Ordering::Greater,
            (
                Exact::Finite {
                    negative: a_negative,
                    coefficient: a_coefficient,
                    exponent: a_exponent,
                },
                Exact::Finite {
                    negative: b_negative,
                    coefficient: b_coefficient,
                    exponent: b_exponent,
                },
            ) => {
                let a_sign = signum(a_negative, a_coefficient);
                let b_sign = signum(b_negative, b_coefficient);
                if a_sign != b_sign || a_sign == 0 {
                    return a_sign.cmp(&b_sign);
                }
                let magnitude =
                    compare_magnitude(a_coefficient, a_exponent, b_coefficient, b_exponent);
                if a_negative {
                    magnitude.reverse()
                } else {
                    magnitude
                }
            }
        }
    }
}

fn signum(negative: bool, coefficient: u128) -> i8 {
    match (coefficient, negative) {
        (0, _) => 0,
        (_, true) => -1,
        (_, false) => 1,
    }
}

/// Both coefficients are non-zero and hold at most 34 digits.
fn compare_magnitude(a: u128, a_exponent: i32, b: u128, b_exponent: i32) -> Ordering {
    let a_digits = digits(a);
    let b_digits = digits(b);
    let a_adjusted = a_exponent + a_digits as i32;
    let b_adjusted = b_exponent + b_digits as i32;
    if a_adjusted != b_adjusted {
        return a_adjusted.cmp(&b_adjusted);
    }
    // same order of magnitude: line the digits up and compare them
    if a_digits < b_digits {
        (a * 10u128.pow(b_digits - a_digits)).cmp(&b)
    } else {
        a.cmp(&(b * 10u128.pow(a_digits - b_digits)))
    }
}

fn digits(mut v: u128) -> u32 {
    let mut count = 1;
    while v >= 10 {
        v /= 10;
        count += 1;
    }
    count
}
