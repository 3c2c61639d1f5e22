// TailSleuth - core/snapshot_format.rs
//
// On-disk representation of an `AnalysisSnapshot`.
// Core layer: writes to any Write, reads from any Read; the caller owns
// file handling.
//
// Format: pretty-printed JSON, self-describing so template and results
// round-trip losslessly:
//
//   { "format_version": 1, "snapshot": { "template": {..}, "results": [..], "created": ".." } }

use crate::core::model::AnalysisSnapshot;
use crate::util::constants::SNAPSHOT_FORMAT_VERSION;
use crate::util::error::PersistenceError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::{Read, Write};
use std::path::Path;

#[derive(Serialize, Deserialize)]
struct SnapshotFile<'a> {
    format_version: u32,
    snapshot: Cow<'a, AnalysisSnapshot>,
}

/// Serialise `snapshot` to `writer`.  `path` is only used for error context.
pub fn write_snapshot<W: Write>(
    snapshot: &AnalysisSnapshot,
    mut writer: W,
    path: &Path,
) -> Result<(), PersistenceError> {
    let file = SnapshotFile {
        format_version: SNAPSHOT_FORMAT_VERSION,
        snapshot: Cow::Borrowed(snapshot),
    };
    serde_json::to_writer_pretty(&mut writer, &file).map_err(|e| PersistenceError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    writer.flush().map_err(|e| PersistenceError::Io {
        path: path.to_path_buf(),
        operation: "flush",
        source: e,
    })
}

/// Parse a snapshot previously written by `write_snapshot`.
///
/// Files carrying a different `format_version` are rejected rather than
/// guessed at.
pub fn read_snapshot<R: Read>(reader: R, path: &Path) -> Result<AnalysisSnapshot, PersistenceError> {
    let file: SnapshotFile<'static> =
        serde_json::from_reader(reader).map_err(|e| PersistenceError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;

    if file.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(PersistenceError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: file.format_version,
            expected: SNAPSHOT_FORMAT_VERSION,
        });
    }

    Ok(file.snapshot.into_owned())
}
