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

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use trigon_common::encoding::{TermDecodeError, TermEncodeError, MAX_TERM_KEY_LEN};
use trigon_common::types::term_id::OutOfRange;
use trigon_common::types::{TermKind, TermType};

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// The closed error set of the storage core. Backend and I/O failures are
/// wrapped verbatim, never swallowed.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("encoded term is {0} bytes, exceeding the {MAX_TERM_KEY_LEN} byte limit")]
    TermTooLarge(usize),

    #[error("URI contains a NUL byte")]
    NullByteInUri,

    #[error("unsupported term: {0}")]
    UnsupportedTerm(String),

    #[error("invalid term encoding: {0}")]
    InvalidEncoding(&'static str),

    #[error("invalid allocation count: {0}")]
    InvalidCount(u64),

    #[error("operation does not apply to term type {0:?}")]
    InvalidType(TermType),

    #[error("value does not fit the inline encoding: {0}")]
    OutOfRange(String),

    #[error("path escapes the database root: {}", .0.display())]
    PathTraversal(PathBuf),

    #[error("database not found at {}", .0.display())]
    DatabaseNotFound(PathBuf),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("term id {0:#018x} has no dictionary entry")]
    NotFound(u64),

    #[error("expected a {expected:?} id, got {actual:?}")]
    TypeMismatch {
        expected: TermType,
        actual: TermType,
    },

    #[error("snapshot already released")]
    SnapshotReleased,

    #[error("store is closed")]
    AlreadyClosed,

    #[error("sequence space exhausted for kind {}", .0.as_str())]
    SequenceOverflow(TermKind),

    #[error("invalid statistics structure: {0}")]
    InvalidStatsStructure(String),

    #[error("update timed out after {0:?} waiting for the writer slot")]
    UpdateTimeout(Duration),

    #[error("storage backend error: {0}")]
    Backend(#[from] rocksdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<TermEncodeError> for StorageError {
    fn from(error: TermEncodeError) -> Self {
        match error {
            TermEncodeError::NullByteInUri => StorageError::NullByteInUri,
            TermEncodeError::TermTooLarge(len) => StorageError::TermTooLarge(len),
        }
    }
}

impl From<TermDecodeError> for StorageError {
    fn from(error: TermDecodeError) -> Self {
        StorageError::InvalidEncoding(error.0)
    }
}

impl From<OutOfRange> for StorageError {
    fn from(error: OutOfRange) -> Self {
        StorageError::OutOfRange(error.0)
    }
}
