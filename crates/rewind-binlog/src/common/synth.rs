//! SQL synthesis from row images
//!
//! Forward mode replays each mutation; rollback mode emits its inverse:
//!
//! | event  | forward                          | rollback                         |
//! |--------|----------------------------------|----------------------------------|
//! | insert | `INSERT` after-image             | `DELETE` matching after-image    |
//! | update | `SET` after, `WHERE` before      | `SET` before, `WHERE` after      |
//! | delete | `DELETE` matching before-image   | `INSERT` before-image            |
//!
//! `WHERE` clauses compare every column (`col IS NULL` for nulls) and are
//! limited to one row. Each row image yields its own statement.

use tracing::warn;

use crate::common::{
    DecodedEvent, EventPayload, FlashbackError, Result, RowValue, RowsPayload, SqlType, Statement,
    StatementKind, TableMetadata, TableMetadataResolver,
};

/// Turns kept events into output statements.
#[derive(Debug, Clone, Copy)]
pub struct SqlSynthesizer {
    rollback: bool,
    suppress_markers: bool,
}

impl SqlSynthesizer {
    pub fn new(rollback: bool, suppress_markers: bool) -> Self {
        Self {
            rollback,
            suppress_markers,
        }
    }

    /// Synthesize the statements for one kept event.
    ///
    /// `row_start` is the displayed start offset for row statements (the
    /// enclosing transaction's start). Events with no output, such as table
    /// definitions or suppressed markers, yield an empty list.
    pub fn synthesize(
        &self,
        source_file: &str,
        event: &DecodedEvent,
        row_start: u64,
        resolver: &TableMetadataResolver,
    ) -> Result<Vec<Statement>> {
        let statement = |kind: StatementKind, text: String, start: u64| Statement {
            kind,
            text,
            source_file: source_file.to_string(),
            start_offset: start,
            end_offset: event.log_position,
            timestamp: event.timestamp,
        };
        let own_start = event.start_position();

        let (sql_type, rows) = match &event.payload {
            EventPayload::RowInsert(rows) => (SqlType::Insert, rows),
            EventPayload::RowUpdate(rows) => (SqlType::Update, rows),
            EventPayload::RowDelete(rows) => (SqlType::Delete, rows),
            EventPayload::SchemaChange { query, .. } => {
                return Ok(vec![statement(StatementKind::Ddl, query.clone(), own_start)]);
            }
            EventPayload::TableDefinition { .. } => return Ok(Vec::new()),
            _ if self.suppress_markers => return Ok(Vec::new()),
            EventPayload::TransactionIdentity { gtid } => {
                let text = gtid.clone().unwrap_or_else(|| "Transaction Group".to_string());
                return Ok(vec![statement(StatementKind::Gtid, text, own_start)]);
            }
            EventPayload::TransactionBegin { .. } => {
                return Ok(vec![statement(
                    StatementKind::Begin,
                    "Transaction BEGIN".to_string(),
                    own_start,
                )]);
            }
            EventPayload::TransactionCommit { xid } => {
                let text = match xid {
                    Some(xid) => format!("Transaction COMMIT | xid: {}", xid),
                    None => "Transaction COMMIT".to_string(),
                };
                return Ok(vec![statement(StatementKind::Commit, text, own_start)]);
            }
        };

        let metadata = resolver
            .lookup(rows.table_id)
            .ok_or(FlashbackError::UnresolvedTableReference {
                table_id: rows.table_id,
            })?;
        Ok(self
            .rows_sql(sql_type, rows, &metadata)?
            .into_iter()
            .map(|sql| statement(StatementKind::Row, sql, row_start))
            .collect())
    }

    /// SQL text for every row image of a row event, in event order.
    pub fn rows_sql(
        &self,
        sql_type: SqlType,
        rows: &RowsPayload,
        metadata: &TableMetadata,
    ) -> Result<Vec<String>> {
        rows.rows
            .iter()
            .map(|image| {
                let before = image.before.as_deref();
                let after = image.after.as_deref();
                match (sql_type, self.rollback) {
                    (SqlType::Insert, false) => insert_sql(metadata, required(after, metadata)?),
                    (SqlType::Insert, true) => delete_sql(metadata, required(after, metadata)?),
                    (SqlType::Delete, false) => delete_sql(metadata, required(before, metadata)?),
                    (SqlType::Delete, true) => insert_sql(metadata, required(before, metadata)?),
                    (SqlType::Update, false) => update_sql(
                        metadata,
                        required(after, metadata)?,
                        required(before, metadata)?,
                    ),
                    (SqlType::Update, true) => update_sql(
                        metadata,
                        required(before, metadata)?,
                        required(after, metadata)?,
                    ),
                }
            })
            .collect()
    }
}

fn required<'a>(image: Option<&'a [RowValue]>, metadata: &TableMetadata) -> Result<&'a [RowValue]> {
    image.ok_or_else(|| {
        FlashbackError::decode(format!(
            "row event for `{}`.`{}` is missing a row image",
            metadata.schema, metadata.table
        ))
    })
}

fn check_arity(metadata: &TableMetadata, row: &[RowValue]) -> Result<()> {
    if row.len() != metadata.column_count() {
        return Err(FlashbackError::ArityMismatch {
            schema: metadata.schema.clone(),
            table: metadata.table.clone(),
            expected: metadata.column_count(),
            actual: row.len(),
        });
    }
    Ok(())
}

/// Back-quote an identifier, doubling embedded back-quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn qualified_table(metadata: &TableMetadata) -> String {
    format!(
        "{}.{}",
        quote_identifier(&metadata.schema),
        quote_identifier(&metadata.table)
    )
}

fn literal(metadata: &TableMetadata, column: &str, value: &RowValue) -> String {
    if matches!(value, RowValue::Unsupported) {
        warn!(
            "Column `{}`.`{}`.`{}` holds an unsupported value type; rendered empty",
            metadata.schema, metadata.table, column
        );
    }
    value.to_sql_literal()
}

fn assignments(metadata: &TableMetadata, row: &[RowValue]) -> Vec<String> {
    metadata
        .columns
        .iter()
        .zip(row)
        .map(|(column, value)| {
            format!(
                "{}={}",
                quote_identifier(column),
                literal(metadata, column, value)
            )
        })
        .collect()
}

fn predicates(metadata: &TableMetadata, row: &[RowValue]) -> String {
    metadata
        .columns
        .iter()
        .zip(row)
        .map(|(column, value)| {
            if value.is_null() {
                format!("{} IS NULL", quote_identifier(column))
            } else {
                format!(
                    "{}={}",
                    quote_identifier(column),
                    literal(metadata, column, value)
                )
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `INSERT` re-creating `row`.
pub fn insert_sql(metadata: &TableMetadata, row: &[RowValue]) -> Result<String> {
    check_arity(metadata, row)?;
    let columns = metadata
        .columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    let values = metadata
        .columns
        .iter()
        .zip(row)
        .map(|(column, value)| literal(metadata, column, value))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(
        "INSERT INTO {}({}) VALUES ({});",
        qualified_table(metadata),
        columns,
        values
    ))
}

/// `UPDATE` setting every column from `set`, matching the row `matching`.
pub fn update_sql(metadata: &TableMetadata, set: &[RowValue], matching: &[RowValue]) -> Result<String> {
    check_arity(metadata, set)?;
    check_arity(metadata, matching)?;
    Ok(format!(
        "UPDATE {} SET {} WHERE {} LIMIT 1;",
        qualified_table(metadata),
        assignments(metadata, set).join(", "),
        predicates(metadata, matching)
    ))
}

/// `DELETE` of the single row matching `row`.
pub fn delete_sql(metadata: &TableMetadata, row: &[RowValue]) -> Result<String> {
    check_arity(metadata, row)?;
    Ok(format!(
        "DELETE FROM {} WHERE {} LIMIT 1;",
        qualified_table(metadata),
        predicates(metadata, row)
    ))
}
