// Copyright 2025 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bit layout of 64-bit term identifiers.
//!
//! Every RDF term is identified by a `u64` laid out as `[type:4][payload:60]`,
//! most significant bits first. Dictionary-allocated terms (URIs, blank nodes
//! and literals that cannot be inlined) carry a monotonic sequence number in
//! the payload; small numeric literals are encoded entirely inside the payload
//! and never touch the dictionary.

use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use thiserror::Error;

pub const TYPE_BITS: u32 = 4;
pub const PAYLOAD_BITS: u32 = 60;
pub const PAYLOAD_MASK: u64 = (1 << PAYLOAD_BITS) - 1;

/// Largest sequence number a dictionary kind can ever issue.
pub const MAX_SEQUENCE: u64 = PAYLOAD_MASK;

const_assert_eq!(TYPE_BITS + PAYLOAD_BITS, u64::BITS);

const TYPE_URI: u8 = 1;
const TYPE_BLANK_NODE: u8 = 2;
const TYPE_LITERAL: u8 = 3;
const TYPE_INTEGER: u8 = 4;
const TYPE_DECIMAL: u8 = 5;
const TYPE_DATE_TIME: u8 = 6;

/// Inline integers are signed 60-bit two's complement.
pub const INLINE_INT_MIN: i64 = -(1 << (PAYLOAD_BITS - 1));
pub const INLINE_INT_MAX: i64 = (1 << (PAYLOAD_BITS - 1)) - 1;

/// Inline decimal payload is `[sign:1][biased_exponent:11][coefficient:48]`.
pub const DECIMAL_EXP_BIAS: i32 = 1023;
pub const DECIMAL_EXP_MIN: i32 = -DECIMAL_EXP_BIAS;
pub const DECIMAL_EXP_MAX: i32 = 1024;
pub const DECIMAL_COEF_BITS: u32 = 48;
pub const DECIMAL_COEF_MAX: u64 = (1 << DECIMAL_COEF_BITS) - 1;

/// The type nibble of a term id, including the inline and reserved codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermType {
    Uri,
    BlankNode,
    Literal,
    Integer,
    Decimal,
    DateTime,
    Reserved(u8),
}

/// The dictionary-allocated subset of [`TermType`]. Each kind owns its own
/// monotonic sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermKind {
    Uri,
    BlankNode,
    Literal,
}

impl TermKind {
    pub const ALL: [TermKind; 3] = [TermKind::Uri, TermKind::BlankNode, TermKind::Literal];

    pub fn type_code(self) -> u8 {
        match self {
            TermKind::Uri => TYPE_URI,
            TermKind::BlankNode => TYPE_BLANK_NODE,
            TermKind::Literal => TYPE_LITERAL,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TermKind::Uri => "uri",
            TermKind::BlankNode => "bnode",
            TermKind::Literal => "literal",
        }
    }
}

/// A value that does not fit the inline encoding it was offered to.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("value does not fit the inline encoding: {0}")]
pub struct OutOfRange(pub String);

pub fn type_of(id: u64) -> TermType {
    match (id >> PAYLOAD_BITS) as u8 {
        TYPE_URI => TermType::Uri,
        TYPE_BLANK_NODE => TermType::BlankNode,
        TYPE_LITERAL => TermType::Literal,
        TYPE_INTEGER => TermType::Integer,
        TYPE_DECIMAL => TermType::Decimal,
        TYPE_DATE_TIME => TermType::DateTime,
        code => TermType::Reserved(code),
    }
}

pub fn is_inline(id: u64) -> bool {
    matches!(
        type_of(id),
        TermType::Integer | TermType::Decimal | TermType::DateTime
    )
}

/// Assembles a dictionary id from a kind and a sequence number.
pub fn encode_id(kind: TermKind, sequence: u64) -> u64 {
    debug_assert!(sequence <= MAX_SEQUENCE);
    ((kind.type_code() as u64) << PAYLOAD_BITS) | (sequence & PAYLOAD_MASK)
}

/// Splits an id into its type and raw payload.
pub fn decode_id(id: u64) -> (TermType, u64) {
    (type_of(id), id & PAYLOAD_MASK)
}

pub fn encode_integer(value: i64) -> Result<u64, OutOfRange> {
    if !(INLINE_INT_MIN..=INLINE_INT_MAX).contains(&value) {
        return Err(OutOfRange(format!("integer {value}")));
    }
    Ok(((TYPE_INTEGER as u64) << PAYLOAD_BITS) | ((value as u64) & PAYLOAD_MASK))
}

/// Sign-extends the 60-bit payload back to an `i64`.
pub fn decode_integer(id: u64) -> i64 {
    debug_assert_eq!(type_of(id), TermType::Integer);
    (((id & PAYLOAD_MASK) << TYPE_BITS) as i64) >> TYPE_BITS
}

/// An inline `xsd:decimal`: `(-1)^negative * coefficient * 10^exponent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineDecimal {
    pub negative: bool,
    pub coefficient: u64,
    pub exponent: i32,
}

impl InlineDecimal {
    /// Strips trailing zeroes from the coefficient. Zero normalises to
    /// `+0 * 10^0` so that `0`, `0.0` and `-0` share one encoding.
    pub fn normalized(self) -> Self {
        if self.coefficient == 0 {
            return InlineDecimal {
                negative: false,
                coefficient: 0,
                exponent: 0,
            };
        }
        let mut coefficient = self.coefficient;
        let mut exponent = self.exponent;
        while coefficient % 10 == 0 && exponent < DECIMAL_EXP_MAX {
            coefficient /= 10;
            exponent += 1;
        }
        InlineDecimal {
            negative: self.negative,
            coefficient,
            exponent,
        }
    }

    pub fn to_f64(self) -> f64 {
        let magnitude = self.coefficient as f64 * 10f64.powi(self.exponent);
        if self.negative {
            -magnitude
        } else {
            magnitude
        }
    }

    pub fn numerically_eq(self, other: Self) -> bool {
        self.normalized() == other.normalized()
    }
}

pub fn encode_decimal(decimal: InlineDecimal) -> Result<u64, OutOfRange> {
    let decimal = decimal.normalized();
    if decimal.coefficient > DECIMAL_COEF_MAX {
        return Err(OutOfRange(format!(
            "decimal coefficient {}",
            decimal.coefficient
        )));
    }
    if !(DECIMAL_EXP_MIN..=DECIMAL_EXP_MAX).contains(&decimal.exponent) {
        return Err(OutOfRange(format!("decimal exponent {}", decimal.exponent)));
    }
    let biased = (decimal.exponent + DECIMAL_EXP_BIAS) as u64;
    let payload =
        ((decimal.negative as u64) << 59) | (biased << DECIMAL_COEF_BITS) | decimal.coefficient;
    Ok(((TYPE_DECIMAL as u64) << PAYLOAD_BITS) | payload)
}

pub fn decode_decimal(id: u64) -> InlineDecimal {
    debug_assert_eq!(type_of(id), TermType::Decimal);
    let payload = id & PAYLOAD_MASK;
    InlineDecimal {
        negative: (payload >> 59) & 1 == 1,
        coefficient: payload & DECIMAL_COEF_MAX,
        exponent: ((payload >> DECIMAL_COEF_BITS) & 0x7ff) as i32 - DECIMAL_EXP_BIAS,
    }
}

/// Encodes a timestamp in milliseconds since the Unix epoch. Pre-epoch
/// instants are not inlinable.
pub fn encode_datetime(timestamp_millis: i64) -> Result<u64, OutOfRange> {
    if timestamp_millis < 0 || timestamp_millis as u64 > MAX_SEQUENCE {
        return Err(OutOfRange(format!("timestamp {timestamp_millis}ms")));
    }
    Ok(((TYPE_DATE_TIME as u64) << PAYLOAD_BITS) | timestamp_millis as u64)
}

pub fn decode_datetime(id: u64) -> i64 {
    debug_assert_eq!(type_of(id), TermType::DateTime);
    (id & PAYLOAD_MASK) as i64
}

/// The decoded form of an inline id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InlineValue {
    Integer(i64),
    Decimal(InlineDecimal),
    DateTime(i64),
}

impl InlineValue {
    pub fn decode(id: u64) -> Option<InlineValue> {
        match type_of(id) {
            TermType::Integer => Some(InlineValue::Integer(decode_integer(id))),
            TermType::Decimal => Some(InlineValue::Decimal(decode_decimal(id))),
            TermType::DateTime => Some(InlineValue::DateTime(decode_datetime(id))),
            _ => None,
        }
    }

    pub fn encode(self) -> Result<u64, OutOfRange> {
        match self {
            InlineValue::Integer(value) => encode_integer(value),
            InlineValue::Decimal(decimal) => encode_decimal(decimal),
            InlineValue::DateTime(millis) => encode_datetime(millis),
        }
    }

    /// The numeric interpretation used by range histograms. Timestamps map to
    /// their millisecond count.
    pub fn to_f64(self) -> f64 {
        match self {
            InlineValue::Integer(value) => value as f64,
            InlineValue::Decimal(decimal) => decimal.to_f64(),
            InlineValue::DateTime(millis) => millis as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn test_id_layout() {
        let id = encode_id(TermKind::Uri, 42);
        assert_eq!(id, (1 << 60) | 42);
        assert_eq!(type_of(id), TermType::Uri);
        assert_eq!(decode_id(id), (TermType::Uri, 42));
        assert!(!is_inline(id));

        assert_eq!(type_of(0), TermType::Reserved(0));
        assert_eq!(type_of(7 << 60), TermType::Reserved(7));
        assert_eq!(type_of(15 << 60), TermType::Reserved(15));
    }

    #[test]
    fn test_kind_codes_partition_the_space() {
        let uri = encode_id(TermKind::Uri, 7);
        let bnode = encode_id(TermKind::BlankNode, 7);
        let literal = encode_id(TermKind::Literal, 7);
        let inline = encode_integer(7).unwrap();
        let ids = [uri, bnode, literal, inline];
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_integer_round_trip() {
        for value in [
            0,
            1,
            -1,
            42,
            -42,
            INLINE_INT_MIN,
            INLINE_INT_MAX,
            INLINE_INT_MIN + 1,
            INLINE_INT_MAX - 1,
        ] {
            let id = encode_integer(value).unwrap();
            assert!(is_inline(id));
            assert_eq!(decode_integer(id), value, "value {value}");
        }
        assert!(encode_integer(INLINE_INT_MAX + 1).is_err());
        assert!(encode_integer(INLINE_INT_MIN - 1).is_err());
        assert!(encode_integer(i64::MAX).is_err());
        assert!(encode_integer(i64::MIN).is_err());
    }

    #[test]
    fn test_integer_round_trip_randomized() {
        let mut rng = SmallRng::seed_from_u64(0x7269);
        for _ in 0..10_000 {
            let value = rng.gen_range(INLINE_INT_MIN..=INLINE_INT_MAX);
            assert_eq!(decode_integer(encode_integer(value).unwrap()), value);
        }
    }

    #[test]
    fn test_decimal_round_trip() {
        let cases = [
            (false, 0, 0),
            (false, 1, 0),
            (true, 1, 0),
            (false, 12345, -2),
            (true, 999, -3),
            (false, DECIMAL_COEF_MAX, 0),
            (false, 1, DECIMAL_EXP_MIN),
            (false, 1, DECIMAL_EXP_MAX),
        ];
        for (negative, coefficient, exponent) in cases {
            let decimal = InlineDecimal {
                negative,
                coefficient,
                exponent,
            };
            let id = encode_decimal(decimal).unwrap();
            assert!(is_inline(id));
            assert!(
                decode_decimal(id).numerically_eq(decimal),
                "decimal {decimal:?}"
            );
        }
    }

    #[test]
    fn test_decimal_trailing_zero_normalisation() {
        let a = InlineDecimal {
            negative: false,
            coefficient: 1000,
            exponent: -3,
        };
        let b = InlineDecimal {
            negative: false,
            coefficient: 1,
            exponent: 0,
        };
        assert_eq!(encode_decimal(a).unwrap(), encode_decimal(b).unwrap());
        // Negative zero collapses onto zero.
        let zero = InlineDecimal {
            negative: true,
            coefficient: 0,
            exponent: -5,
        };
        assert_eq!(decode_decimal(encode_decimal(zero).unwrap()).coefficient, 0);
        assert!(!decode_decimal(encode_decimal(zero).unwrap()).negative);
    }

    #[test]
    fn test_decimal_out_of_range() {
        assert!(encode_decimal(InlineDecimal {
            negative: false,
            coefficient: DECIMAL_COEF_MAX + 1,
            exponent: 0,
        })
        .is_err());
        assert!(encode_decimal(InlineDecimal {
            negative: false,
            coefficient: 1,
            exponent: DECIMAL_EXP_MIN - 1,
        })
        .is_err());
        assert!(encode_decimal(InlineDecimal {
            negative: false,
            coefficient: 1,
            exponent: DECIMAL_EXP_MAX + 1,
        })
        .is_err());
    }

    #[test]
    fn test_datetime_round_trip() {
        for millis in [0, 1, 1_700_000_000_000, MAX_SEQUENCE as i64] {
            let id = encode_datetime(millis).unwrap();
            assert!(is_inline(id));
            assert_eq!(decode_datetime(id), millis);
        }
        assert!(encode_datetime(-1).is_err());
    }

    #[test]
    fn test_inline_value_dispatch() {
        let id = encode_integer(-5).unwrap();
        assert_eq!(InlineValue::decode(id), Some(InlineValue::Integer(-5)));
        assert_eq!(InlineValue::Integer(-5).to_f64(), -5.0);
        assert_eq!(InlineValue::decode(encode_id(TermKind::Uri, 1)), None);
    }
}
