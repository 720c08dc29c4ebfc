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

//! The RDF term model and its normalisation rules.

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use unicode_normalization::{is_nfc, UnicodeNormalization};

pub mod term_id;

pub use term_id::{InlineDecimal, InlineValue, TermKind, TermType};

/// Well-known XSD datatype IRIs.
pub mod xsd {
    pub const STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
    pub const INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
    pub const DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
    pub const DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";
}

/// Discriminates plain/typed literals from language-tagged ones. A plain
/// literal is a typed literal with the `xsd:string` datatype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LiteralKind {
    /// Datatype IRI.
    Typed(String),
    /// BCP-47 language tag, compared case-insensitively.
    Lang(String),
}

/// An RDF term. Construct through the helpers to get the implicit `xsd:string`
/// datatype for plain literals.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Iri(String),
    BlankNode(String),
    Literal { lexical: String, kind: LiteralKind },
}

impl Term {
    pub fn iri(iri: impl Into<String>) -> Self {
        Term::Iri(iri.into())
    }

    pub fn blank_node(label: impl Into<String>) -> Self {
        Term::BlankNode(label.into())
    }

    pub fn plain_literal(lexical: impl Into<String>) -> Self {
        Term::typed_literal(lexical, xsd::STRING)
    }

    pub fn typed_literal(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            kind: LiteralKind::Typed(datatype.into()),
        }
    }

    pub fn lang_literal(lexical: impl Into<String>, tag: impl Into<String>) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            kind: LiteralKind::Lang(tag.into()),
        }
    }

    /// The dictionary kind this term allocates from, were it not inlined.
    pub fn kind(&self) -> TermKind {
        match self {
            Term::Iri(_) => TermKind::Uri,
            Term::BlankNode(_) => TermKind::BlankNode,
            Term::Literal { .. } => TermKind::Literal,
        }
    }

    /// Applies Unicode NFC to IRI strings (including datatype IRIs) and
    /// lowercases language tags. Borrows when the term is already canonical,
    /// which is the common case on the hot path.
    pub fn normalized(&self) -> Cow<'_, Term> {
        match self {
            Term::Iri(iri) if !is_nfc(iri) => Cow::Owned(Term::Iri(iri.nfc().collect())),
            Term::Literal {
                lexical,
                kind: LiteralKind::Typed(datatype),
            } if !is_nfc(datatype) => Cow::Owned(Term::Literal {
                lexical: lexical.clone(),
                kind: LiteralKind::Typed(datatype.nfc().collect()),
            }),
            Term::Literal {
                lexical,
                kind: LiteralKind::Lang(tag),
            } if tag.bytes().any(|b| b.is_ascii_uppercase()) => Cow::Owned(Term::Literal {
                lexical: lexical.clone(),
                kind: LiteralKind::Lang(tag.to_ascii_lowercase()),
            }),
            _ => Cow::Borrowed(self),
        }
    }

    /// Returns the inline id for literals whose datatype exactly matches one
    /// of the inline-encodable XSD types and whose value fits the 60-bit
    /// payload. Everything else goes through the dictionary.
    pub fn inline_id(&self) -> Option<u64> {
        let Term::Literal {
            lexical,
            kind: LiteralKind::Typed(datatype),
        } = self
        else {
            return None;
        };
        let value = match datatype.as_str() {
            xsd::INTEGER => InlineValue::Integer(parse_integer(lexical)?),
            xsd::DECIMAL => InlineValue::Decimal(parse_decimal(lexical)?),
            xsd::DATE_TIME => InlineValue::DateTime(parse_datetime_millis(lexical)?),
            _ => return None,
        };
        value.encode().ok()
    }

    /// Reconstructs the literal an inline id stands for. Returns `None` for
    /// dictionary and reserved ids.
    pub fn from_inline_id(id: u64) -> Option<Term> {
        let term = match InlineValue::decode(id)? {
            InlineValue::Integer(value) => Term::typed_literal(value.to_string(), xsd::INTEGER),
            InlineValue::Decimal(decimal) => {
                Term::typed_literal(format_decimal(decimal), xsd::DECIMAL)
            }
            InlineValue::DateTime(millis) => {
                let instant = DateTime::<Utc>::from_timestamp_millis(millis)?;
                Term::typed_literal(
                    instant.to_rfc3339_opts(SecondsFormat::Millis, true),
                    xsd::DATE_TIME,
                )
            }
        };
        Some(term)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::BlankNode(label) => write!(f, "_:{label}"),
            Term::Literal {
                lexical,
                kind: LiteralKind::Typed(datatype),
            } => write!(f, "\"{lexical}\"^^<{datatype}>"),
            Term::Literal {
                lexical,
                kind: LiteralKind::Lang(tag),
            } => write!(f, "\"{lexical}\"@{tag}"),
        }
    }
}

fn parse_integer(lexical: &str) -> Option<i64> {
    // `i64::from_str` accepts exactly the xsd:integer grammar (optional sign,
    // digits). Values past 64 bits fall back to the dictionary.
    if lexical.is_empty() {
        return None;
    }
    lexical.parse::<i64>().ok()
}

/// Parses the xsd:decimal grammar `(\+|-)?([0-9]+(\.[0-9]*)?|\.[0-9]+)` into a
/// coefficient/exponent pair, stripping leading and trailing zeroes.
fn parse_decimal(lexical: &str) -> Option<InlineDecimal> {
    let (negative, rest) = match lexical.as_bytes().first()? {
        b'+' => (false, &lexical[1..]),
        b'-' => (true, &lexical[1..]),
        _ => (false, lexical),
    };
    let (int_part, frac_part) = match rest.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (rest, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let digits: Vec<u8> = int_part.bytes().chain(frac_part.bytes()).collect();
    let mut exponent = -(frac_part.len() as i32);
    let Some(start) = digits.iter().position(|&d| d != b'0') else {
        return Some(InlineDecimal {
            negative,
            coefficient: 0,
            exponent: 0,
        });
    };
    let mut end = digits.len();
    while end - 1 > start && digits[end - 1] == b'0' {
        end -= 1;
        exponent += 1;
    }

    let mut coefficient: u64 = 0;
    for &digit in &digits[start..end] {
        coefficient = coefficient
            .checked_mul(10)?
            .checked_add((digit - b'0') as u64)?;
    }
    Some(InlineDecimal {
        negative,
        coefficient,
        exponent,
    })
}

/// Only lexicals with an explicit timezone denote a fixed instant; the rest
/// are dictionary-allocated as opaque literals.
fn parse_datetime_millis(lexical: &str) -> Option<i64> {
    let instant = DateTime::parse_from_rfc3339(lexical).ok()?;
    let millis = instant.timestamp_millis();
    if millis < 0 {
        return None;
    }
    Some(millis)
}

fn format_decimal(decimal: InlineDecimal) -> String {
    let sign = if decimal.negative && decimal.coefficient != 0 {
        "-"
    } else {
        ""
    };
    if decimal.exponent >= 0 {
        let zeros = "0".repeat(decimal.exponent as usize);
        return format!("{sign}{}{zeros}", decimal.coefficient);
    }
    let digits = decimal.coefficient.to_string();
    let frac_len = (-decimal.exponent) as usize;
    if digits.len() > frac_len {
        let split = digits.len() - frac_len;
        format!("{sign}{}.{}", &digits[..split], &digits[split..])
    } else {
        let zeros = "0".repeat(frac_len - digits.len());
        format!("{sign}0.{zeros}{digits}")
    }
}
