use chrono::{Local, NaiveDateTime};
use log::{info, warn};
use rusqlite::Connection;

use crate::applier::apply_batch;
use crate::differ::RowDiffer;
use crate::error::SyncError;
use crate::mapper::{is_blank, ColumnMapping};
use crate::model::{RunContext, SyncReport, TIMESTAMP_FORMAT};
use crate::reclaim::{reclaim, ReclaimPolicy};
use crate::schema::TableSchema;
use crate::usage::log_memory;

pub const DEFAULT_CHUNK_SIZE: usize = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Maximum number of distinct keys per chunk.
    pub chunk_size: usize,
    pub reclaim: ReclaimPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            reclaim: ReclaimPolicy::default(),
        }
    }
}

/// Reconciles one destination table against a source snapshot.
#[derive(Debug, Clone)]
pub struct Reconciler<'s> {
    schema: &'s TableSchema,
    options: SyncOptions,
}

impl<'s> Reconciler<'s> {
    pub fn new(schema: &'s TableSchema, options: SyncOptions) -> Result<Self, SyncError> {
        schema.validate()?;
        if options.chunk_size == 0 {
            return Err(SyncError::InvalidOptions("chunk size must be at least 1".into()));
        }
        Ok(Self { schema, options })
    }

    pub fn schema(&self) -> &TableSchema {
        self.schema
    }

    pub fn options(&self) -> SyncOptions {
        self.options
    }

    /// Run with the current local time as the run timestamp.
    pub fn run<I>(&self, conn: &mut Connection, rows: I) -> Result<SyncReport, SyncError>
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        self.run_at(conn, rows, Local::now().naive_local())
    }

    /// Run with an explicit run timestamp.
    ///
    /// `rows` is the whole source, header included. Each chunk commits in
    /// its own transaction; a failure leaves earlier chunks applied.
    pub fn run_at<I>(&self, conn: &mut Connection, rows: I, started_at: NaiveDateTime) -> Result<SyncReport, SyncError>
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        let schema = self.schema;
        let mut rows = rows.into_iter();

        // Header: first row with any content
        let mut header_row = 0;
        let header = loop {
            let Some(row) = rows.next() else {
                return Err(SyncError::EmptySource);
            };
            header_row += 1;
            if !is_blank(&row) {
                break row;
            }
        };

        let mapping = ColumnMapping::from_header(&header, header_row, schema)?;
        for label in mapping.unmapped_labels() {
            warn!("{}: column '{label}' not found in source header, leaving it untouched", schema.table);
        }

        schema.ensure_tables(conn)?;
        let mut ctx = RunContext::new(started_at);
        ctx.dictionaries.preload(conn, &schema.dictionary_categories())?;
        info!(
            "{}: header at row {header_row}, {} columns mapped, chunks of {}, reclaim {}",
            schema.table,
            mapping.columns.len() + 1,
            self.options.chunk_size,
            self.options.reclaim
        );
        log_memory("dictionary preload");

        let differ = RowDiffer::new(schema, &mapping);
        loop {
            let tx = conn.transaction()?;
            let batch = differ.fill_batch(&tx, &mut rows, &mut ctx, self.options.chunk_size)?;
            if batch.is_empty() {
                tx.commit()?;
                break;
            }
            apply_batch(&tx, schema, &mapping, batch, &mut ctx, self.options.reclaim)?;
            tx.commit()?;

            info!(
                "{}: chunk {} committed ({} rows read)",
                schema.table, ctx.counts.chunks, ctx.counts.rows_read
            );
            log_memory("chunk");
        }

        let tx = conn.transaction()?;
        ctx.counts.deleted = reclaim(&tx, schema, &ctx, self.options.reclaim)?;
        tx.commit()?;

        let report = SyncReport {
            table: schema.table.to_string(),
            reclaim: self.options.reclaim,
            started_at: ctx.stamp().to_string(),
            finished_at: Local::now().naive_local().format(TIMESTAMP_FORMAT).to_string(),
            header_row: mapping.header_row,
            first_data_row: mapping.first_data_row,
            dictionary_entries_added: ctx.dictionaries.added(),
            unmapped_columns: mapping.unmapped_labels().iter().map(|l| l.to_string()).collect(),
            counts: ctx.counts,
        };
        info!("{}: {}", schema.table, report.summary());
        Ok(report)
    }
}
