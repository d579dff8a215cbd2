//! CLI Exit Code Registry
//!
//! Single source of truth for `postindex` exit codes. Scripts and cron
//! jobs rely on them.
//!
//! | Code | Meaning                                              |
//! |------|------------------------------------------------------|
//! | 0    | Success                                              |
//! | 1    | General error (unspecified)                          |
//! | 2    | Usage error (bad arguments, malformed FIELD=VALUE)   |
//! | 3    | Configuration (config file, database path, mapping)  |
//! | 4    | Source file missing, unreadable or unsupported       |
//! | 5    | Storage error (SQLite open, constraint, I/O)         |
//! | 6    | Record not found                                     |

use postindex_recon::SyncError;

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Configuration error: unreadable/invalid config, no database path,
/// source header without the key column.
pub const EXIT_CONFIG: u8 = 3;

/// Source snapshot could not be read.
pub const EXIT_SOURCE: u8 = 4;

/// Storage failure. Chunks committed before the failure stay applied.
pub const EXIT_STORAGE: u8 = 5;

/// `get`/`delete` for a key that does not exist.
pub const EXIT_NOT_FOUND: u8 = 6;

/// Map an engine error to its exit code.
pub fn sync_exit_code(err: &SyncError) -> u8 {
    match err {
        SyncError::InvalidSchema(_) | SyncError::InvalidOptions(_) | SyncError::MissingKeyColumn { .. } => {
            EXIT_CONFIG
        }
        SyncError::EmptySource => EXIT_SOURCE,
        SyncError::MissingKey { .. }
        | SyncError::DuplicateKey(_)
        | SyncError::UnknownField(_)
        | SyncError::InvalidQuery(_) => EXIT_USAGE,
        SyncError::Storage(_) => EXIT_STORAGE,
    }
}
