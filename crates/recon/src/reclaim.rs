//! Orphan removal after the last chunk.
//!
//! Rows flagged `created_manual` are never removed by either policy.

use std::fmt;
use std::str::FromStr;

use log::{info, warn};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::model::RunContext;
use crate::schema::TableSchema;
use crate::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimPolicy {
    /// Delete stored keys the run did not observe.
    #[default]
    Unobserved,
    /// Delete rows whose `checked_at` predates the run start.
    Stale,
}

impl fmt::Display for ReclaimPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unobserved => write!(f, "unobserved"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

impl FromStr for ReclaimPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unobserved" => Ok(Self::Unobserved),
            "stale" => Ok(Self::Stale),
            other => Err(format!("unknown reclaim policy '{other}' (expected 'unobserved' or 'stale')")),
        }
    }
}

/// Remove orphans under `policy`. Returns the number of deleted rows.
pub fn reclaim(
    conn: &Connection,
    schema: &TableSchema,
    ctx: &RunContext,
    policy: ReclaimPolicy,
) -> Result<usize, SyncError> {
    let deleted = match policy {
        ReclaimPolicy::Unobserved => {
            if ctx.observed_count() == 0 {
                warn!("{}: no keys observed, every non-manual row is an orphan", schema.table);
            }
            let stored = store::all_keys(conn, schema)?;
            let orphans: Vec<&str> = stored
                .iter()
                .map(String::as_str)
                .filter(|key| !ctx.was_observed(key))
                .collect();
            if orphans.is_empty() {
                0
            } else {
                store::delete_unprotected(conn, schema, &orphans)?
            }
        }
        ReclaimPolicy::Stale => store::delete_stale(conn, schema, ctx.stamp())?,
    };

    info!("{}: {deleted} orphan rows deleted ({policy})", schema.table);
    Ok(deleted)
}
