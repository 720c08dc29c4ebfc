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

//! Canonical binary encoding of RDF terms, used as the `str2id` dictionary
//! key and the `id2str` value.
//!
//! Layout:
//!
//! ```text
//! URI            0x01 ‖ utf8(iri)
//! Blank node     0x02 ‖ utf8(label)
//! Typed literal  0x03 ‖ 0x01 ‖ utf8(datatype) ‖ 0x00 ‖ utf8(lexical)
//! Lang literal   0x03 ‖ 0x02 ‖ utf8(lang)     ‖ 0x00 ‖ utf8(lexical)
//! ```
//!
//! The encoding is injective modulo term normalisation (NFC IRIs, lowercase
//! language tags), which [`encode_term`] applies itself. IRI strings must not
//! contain NUL bytes since NUL separates the literal fields.

use thiserror::Error;

use crate::types::{LiteralKind, Term};

const TAG_IRI: u8 = 0x01;
const TAG_BLANK_NODE: u8 = 0x02;
const TAG_LITERAL: u8 = 0x03;
const SUBTAG_TYPED: u8 = 0x01;
const SUBTAG_LANG: u8 = 0x02;

/// Hard cap on an encoded term. Anything larger is rejected before it reaches
/// storage.
pub const MAX_TERM_KEY_LEN: usize = 16 * 1024;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TermEncodeError {
    #[error("URI contains a NUL byte")]
    NullByteInUri,
    #[error("encoded term is {0} bytes, exceeding the {MAX_TERM_KEY_LEN} byte limit")]
    TermTooLarge(usize),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid term encoding: {0}")]
pub struct TermDecodeError(pub &'static str);

/// Encodes a term into its canonical dictionary key.
pub fn encode_term(term: &Term) -> Result<Vec<u8>, TermEncodeError> {
    let term = term.normalized();
    let mut buf = Vec::with_capacity(estimated_len(&term));
    match &*term {
        Term::Iri(iri) => {
            check_iri(iri)?;
            buf.push(TAG_IRI);
            buf.extend_from_slice(iri.as_bytes());
        }
        Term::BlankNode(label) => {
            buf.push(TAG_BLANK_NODE);
            buf.extend_from_slice(label.as_bytes());
        }
        Term::Literal { lexical, kind } => {
            buf.push(TAG_LITERAL);
            match kind {
                LiteralKind::Typed(datatype) => {
                    check_iri(datatype)?;
                    buf.push(SUBTAG_TYPED);
                    buf.extend_from_slice(datatype.as_bytes());
                }
                LiteralKind::Lang(tag) => {
                    buf.push(SUBTAG_LANG);
                    buf.extend_from_slice(tag.as_bytes());
                }
            }
            buf.push(0x00);
            buf.extend_from_slice(lexical.as_bytes());
        }
    }
    if buf.len() > MAX_TERM_KEY_LEN {
        return Err(TermEncodeError::TermTooLarge(buf.len()));
    }
    Ok(buf)
}

/// Decodes a canonical dictionary key or `id2str` value back into a term.
pub fn decode_term(bytes: &[u8]) -> Result<Term, TermDecodeError> {
    let (&tag, rest) = bytes
        .split_first()
        .ok_or(TermDecodeError("empty input"))?;
    match tag {
        TAG_IRI => Ok(Term::Iri(utf8(rest)?)),
        TAG_BLANK_NODE => Ok(Term::BlankNode(utf8(rest)?)),
        TAG_LITERAL => {
            let (&subtag, rest) = rest
                .split_first()
                .ok_or(TermDecodeError("literal without subtype"))?;
            let split = rest
                .iter()
                .position(|&b| b == 0x00)
                .ok_or(TermDecodeError("literal without NUL separator"))?;
            let lexical = utf8(&rest[split + 1..])?;
            match subtag {
                SUBTAG_TYPED => Ok(Term::Literal {
                    lexical,
                    kind: LiteralKind::Typed(utf8(&rest[..split])?),
                }),
                SUBTAG_LANG => Ok(Term::Literal {
                    lexical,
                    kind: LiteralKind::Lang(utf8(&rest[..split])?),
                }),
                _ => Err(TermDecodeError("unknown literal subtype")),
            }
        }
        _ => Err(TermDecodeError("unknown term tag")),
    }
}

fn check_iri(iri: &str) -> Result<(), TermEncodeError> {
    if iri.as_bytes().contains(&0x00) {
        return Err(TermEncodeError::NullByteInUri);
    }
    Ok(())
}

fn utf8(bytes: &[u8]) -> Result<String, TermDecodeError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| TermDecodeError("invalid UTF-8"))
}

fn estimated_len(term: &Term) -> usize {
    match term {
        Term::Iri(iri) => 1 + iri.len(),
        Term::BlankNode(label) => 1 + label.len(),
        Term::Literal { lexical, kind } => {
            let kind_len = match kind {
                LiteralKind::Typed(datatype) => datatype.len(),
                LiteralKind::Lang(tag) => tag.len(),
            };
            3 + kind_len + lexical.len()
        }
    }
}
