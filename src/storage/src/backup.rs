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

//! The counter-state side file of a backup.
//!
//! A backup of the database files alone would restore sequence counters from
//! whatever happened to be flushed, so the backup pipeline also exports the
//! allocator state into `<backup_root>/.counter_state`. Restore reads it (a
//! missing file is a legacy backup and tolerated) and re-installs the
//! counters with the usual safety margin on top.

use std::io;
use std::path::Path;

use crate::error::{StorageError, StorageResult};
use crate::sequence::CounterState;

pub const COUNTER_STATE_FILE: &str = ".counter_state";

/// Writes the exported allocator state into the backup root.
pub fn write_counter_state(backup_root: &Path, state: &CounterState) -> StorageResult<()> {
    std::fs::create_dir_all(backup_root)?;
    let blob = serde_json::to_vec_pretty(state).map_err(io::Error::from)?;
    std::fs::write(backup_root.join(COUNTER_STATE_FILE), blob)?;
    Ok(())
}

/// Reads the counter state from a backup root. `Ok(None)` means a legacy
/// backup without the side file; a backup root that does not exist at all is
/// an error.
pub fn read_counter_state(backup_root: &Path) -> StorageResult<Option<CounterState>> {
    if !backup_root.is_dir() {
        return Err(StorageError::FileNotFound(backup_root.to_path_buf()));
    }
    let path = backup_root.join(COUNTER_STATE_FILE);
    let blob = match std::fs::read(&path) {
        Ok(blob) => blob,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let state = serde_json::from_slice(&blob).map_err(io::Error::from)?;
    Ok(Some(state))
}
