use chrono::{DateTime, NaiveDate, NaiveDateTime};
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, Ident, ObjectNamePart, SetExpr,
    Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::parse_month;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertReactor(Reactor),
    UpdateReactor {
        serial_no: String,
        patch: ReactorPatch,
    },
    DeleteReactor {
        serial_no: String,
    },
    InsertBooking(NewBooking),
    BatchInsertBookings(Vec<NewBooking>),
    UpdateBooking {
        id: Ulid,
        patch: BookingPatch,
    },
    DeleteBooking {
        id: Ulid,
    },
    InsertDowntime(NewDowntime),
    UpdateDowntime {
        id: Ulid,
        patch: DowntimePatch,
    },
    /// `DELETE FROM downtime` is a soft cancel.
    CancelDowntime {
        id: Ulid,
    },
    SelectReactors,
    SelectBookings {
        reactor_serial_no: Option<String>,
    },
    SelectDowntime {
        reactor_serial_no: Option<String>,
    },
    SelectConflicts {
        reactor_serial_no: String,
        start: Ms,
        end: Ms,
        exclude_id: Option<Ulid>,
    },
    SelectOccupancy(OccupancyQuery),
    SelectOccupancyExport(OccupancyQuery),
    SelectInsights(OccupancyQuery),
}

/// Window and filters shared by the occupancy-style tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyQuery {
    pub start: Ms,
    pub end: Ms,
    pub plant_name: Option<String>,
    pub block_name: Option<String>,
}

const REACTOR_COLUMNS: &[&str] = &[
    "serial_no",
    "max_capacity_liters",
    "capacity_range",
    "moc",
    "agitator_type",
    "plant_name",
    "block_name",
    "commission_date",
    "notes",
];

const BOOKING_COLUMNS: &[&str] = &[
    "id",
    "reactor_serial_no",
    "team",
    "product_name",
    "stage",
    "batch_number",
    "operation",
    "start",
    "end",
    "status",
    "requested_by_email",
];

const DOWNTIME_COLUMNS: &[&str] = &[
    "id",
    "reactor_serial_no",
    "start",
    "end",
    "type",
    "reason",
    "updated_by_email",
];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection.as_ref()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;

    match table.as_str() {
        "reactors" => {
            let row = single_row("reactors", rows)?;
            let row = Row::bind("reactors", REACTOR_COLUMNS, &insert.columns, row)?;
            Ok(Command::InsertReactor(reactor_from_row(&row)?))
        }
        "bookings" => {
            let mut bookings = Vec::with_capacity(rows.len());
            for (i, values) in rows.iter().enumerate() {
                let row = Row::bind("bookings", BOOKING_COLUMNS, &insert.columns, values)?;
                let booking = booking_from_row(&row).map_err(|e| match rows.len() {
                    1 => e,
                    _ => SqlError::Parse(format!("row {i}: {e}")),
                })?;
                bookings.push(booking);
            }
            if bookings.len() == 1 {
                Ok(Command::InsertBooking(bookings.remove(0)))
            } else {
                Ok(Command::BatchInsertBookings(bookings))
            }
        }
        "downtime" => {
            let row = single_row("downtime", rows)?;
            let row = Row::bind("downtime", DOWNTIME_COLUMNS, &insert.columns, row)?;
            Ok(Command::InsertDowntime(downtime_from_row(&row)?))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn single_row<'a>(table: &'static str, rows: &'a [Vec<Expr>]) -> Result<&'a [Expr], SqlError> {
    match rows {
        [row] => Ok(row.as_slice()),
        _ => Err(SqlError::Unsupported(format!(
            "multi-row INSERT into {table}"
        ))),
    }
}

fn reactor_from_row(row: &Row<'_>) -> Result<Reactor, SqlError> {
    Ok(Reactor {
        serial_no: parse_string(row.required("serial_no")?)?,
        max_capacity_liters: parse_u32(row.required("max_capacity_liters")?)?,
        capacity_range: parse_string(row.required("capacity_range")?)?,
        moc: parse_string(row.required("moc")?)?,
        agitator_type: parse_string(row.required("agitator_type")?)?,
        plant_name: parse_string(row.required("plant_name")?)?,
        block_name: parse_string(row.required("block_name")?)?,
        commission_date: parse_date(row.required("commission_date")?)?,
        notes: match row.get("notes") {
            Some(expr) => parse_string_or_null(expr)?,
            None => None,
        },
    })
}

fn booking_from_row(row: &Row<'_>) -> Result<NewBooking, SqlError> {
    Ok(NewBooking {
        id: parse_ulid(row.required("id")?)?,
        reactor_serial_no: parse_string(row.required("reactor_serial_no")?)?,
        team: parse_team(row.required("team")?)?,
        product_name: parse_string(row.required("product_name")?)?,
        stage: parse_string(row.required("stage")?)?,
        batch_number: parse_string(row.required("batch_number")?)?,
        operation: parse_string(row.required("operation")?)?,
        start: parse_timestamp(row.required("start")?)?,
        end: parse_timestamp(row.required("end")?)?,
        status: match row.get("status") {
            Some(expr) => parse_status(expr)?,
            None => BookingStatus::Proposed,
        },
        requested_by_email: parse_string(row.required("requested_by_email")?)?,
    })
}

fn downtime_from_row(row: &Row<'_>) -> Result<NewDowntime, SqlError> {
    Ok(NewDowntime {
        id: parse_ulid(row.required("id")?)?,
        reactor_serial_no: parse_string(row.required("reactor_serial_no")?)?,
        start: parse_timestamp(row.required("start")?)?,
        end: parse_timestamp(row.required("end")?)?,
        kind: parse_downtime_kind(row.required("type")?)?,
        reason: parse_string(row.required("reason")?)?,
        updated_by_email: parse_string(row.required("updated_by_email")?)?,
    })
}

/// One VALUES row bound to column names, either from the explicit column list
/// or positionally against the table's canonical layout.
struct Row<'a> {
    fields: Vec<(String, &'a Expr)>,
}

impl<'a> Row<'a> {
    fn bind(
        table: &'static str,
        layout: &[&str],
        columns: &[Ident],
        values: &'a [Expr],
    ) -> Result<Self, SqlError> {
        let names: Vec<String> = if columns.is_empty() {
            if values.len() > layout.len() {
                return Err(SqlError::WrongArity(table, layout.len(), values.len()));
            }
            layout.iter().map(|c| c.to_string()).collect()
        } else {
            if columns.len() != values.len() {
                return Err(SqlError::WrongArity(table, columns.len(), values.len()));
            }
            let names: Vec<String> = columns.iter().map(|c| c.value.to_lowercase()).collect();
            if let Some(unknown) = names.iter().find(|n| !layout.contains(&n.as_str())) {
                return Err(SqlError::UnknownColumn(unknown.clone()));
            }
            names
        };
        Ok(Self {
            fields: names.into_iter().zip(values.iter()).collect(),
        })
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, expr)| *expr)
    }

    fn required(&self, column: &str) -> Result<&'a Expr, SqlError> {
        self.get(column)
            .ok_or_else(|| SqlError::MissingColumn(column.to_string()))
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let mut sets = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        sets.push((column, &a.value));
    }
    if sets.is_empty() {
        return Err(SqlError::Parse("UPDATE without SET".into()));
    }

    match table.as_str() {
        "reactors" => {
            let serial_no = parse_string(where_key(selection, "serial_no")?)?;
            let mut patch = ReactorPatch::default();
            for (column, value) in sets {
                match column.as_str() {
                    "max_capacity_liters" => patch.max_capacity_liters = Some(parse_u32(value)?),
                    "capacity_range" => patch.capacity_range = Some(parse_string(value)?),
                    "moc" => patch.moc = Some(parse_string(value)?),
                    "agitator_type" => patch.agitator_type = Some(parse_string(value)?),
                    "plant_name" => patch.plant_name = Some(parse_string(value)?),
                    "block_name" => patch.block_name = Some(parse_string(value)?),
                    "commission_date" => patch.commission_date = Some(parse_date(value)?),
                    "notes" => patch.notes = Some(parse_string_or_null(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateReactor { serial_no, patch })
        }
        "bookings" => {
            let id = parse_ulid(where_key(selection, "id")?)?;
            let mut patch = BookingPatch::default();
            for (column, value) in sets {
                match column.as_str() {
                    "reactor_serial_no" => patch.reactor_serial_no = Some(parse_string(value)?),
                    "team" => patch.team = Some(parse_team(value)?),
                    "product_name" => patch.product_name = Some(parse_string(value)?),
                    "stage" => patch.stage = Some(parse_string(value)?),
                    "batch_number" => patch.batch_number = Some(parse_string(value)?),
                    "operation" => patch.operation = Some(parse_string(value)?),
                    "start" => patch.start = Some(parse_timestamp(value)?),
                    "end" => patch.end = Some(parse_timestamp(value)?),
                    "status" => patch.status = Some(parse_status(value)?),
                    "requested_by_email" => patch.requested_by_email = Some(parse_string(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateBooking { id, patch })
        }
        "downtime" => {
            let id = parse_ulid(where_key(selection, "id")?)?;
            let mut patch = DowntimePatch::default();
            for (column, value) in sets {
                match column.as_str() {
                    "start" => patch.start = Some(parse_timestamp(value)?),
                    "end" => patch.end = Some(parse_timestamp(value)?),
                    "type" => patch.kind = Some(parse_downtime_kind(value)?),
                    "reason" => patch.reason = Some(parse_string(value)?),
                    "updated_by_email" => patch.updated_by_email = Some(parse_string(value)?),
                    "is_cancelled" => patch.is_cancelled = Some(parse_bool(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateDowntime { id, patch })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let selection = delete.selection.as_ref();

    match table.as_str() {
        "reactors" => Ok(Command::DeleteReactor {
            serial_no: parse_string(where_key(selection, "serial_no")?)?,
        }),
        "bookings" => Ok(Command::DeleteBooking {
            id: parse_ulid(where_key(selection, "id")?)?,
        }),
        "downtime" => Ok(Command::CancelDowntime {
            id: parse_ulid(where_key(selection, "id")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }
    let filters = Filters(filters);

    match table.as_str() {
        "reactors" => Ok(Command::SelectReactors),
        "bookings" => Ok(Command::SelectBookings {
            reactor_serial_no: filters.eq("reactor_serial_no").map(parse_string).transpose()?,
        }),
        "downtime" => Ok(Command::SelectDowntime {
            reactor_serial_no: filters.eq("reactor_serial_no").map(parse_string).transpose()?,
        }),
        "conflicts" => {
            let reactor_serial_no = parse_string(
                filters
                    .eq("reactor_serial_no")
                    .ok_or(SqlError::MissingFilter("reactor_serial_no"))?,
            )?;
            let (start, end) = filters.range()?;
            Ok(Command::SelectConflicts {
                reactor_serial_no,
                start: start.ok_or(SqlError::MissingFilter("start"))?,
                end: end.ok_or(SqlError::MissingFilter("end"))?,
                exclude_id: filters.eq("exclude_id").map(parse_ulid).transpose()?,
            })
        }
        "occupancy" => Ok(Command::SelectOccupancy(occupancy_query(&filters)?)),
        "occupancy_export" => Ok(Command::SelectOccupancyExport(occupancy_query(&filters)?)),
        "insights" => Ok(Command::SelectInsights(occupancy_query(&filters)?)),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn occupancy_query(filters: &Filters<'_>) -> Result<OccupancyQuery, SqlError> {
    let (start, end) = match filters.eq("month") {
        Some(expr) => {
            let month = parse_string(expr)?;
            let window = parse_month(&month)
                .ok_or_else(|| SqlError::Parse(format!("bad month '{month}', expected YYYY-MM")))?;
            (window.start, window.end)
        }
        None => {
            let (start, end) = filters.range()?;
            (
                start.ok_or(SqlError::MissingFilter("month or start"))?,
                end.ok_or(SqlError::MissingFilter("end"))?,
            )
        }
    };
    Ok(OccupancyQuery {
        start,
        end,
        plant_name: filters.eq("plant_name").map(parse_string).transpose()?,
        block_name: filters.eq("block_name").map(parse_string).transpose()?,
    })
}

/// A `column <op> value` conjunct from a WHERE clause.
struct Filter<'a> {
    column: String,
    op: &'a BinaryOperator,
    value: &'a Expr,
}

struct Filters<'a>(Vec<Filter<'a>>);

impl<'a> Filters<'a> {
    fn eq(&self, column: &str) -> Option<&'a Expr> {
        self.0
            .iter()
            .find(|f| f.column == column && *f.op == BinaryOperator::Eq)
            .map(|f| f.value)
    }

    /// `start >= x` (or `=`) and `"end" <= y` (or `<`, `=`).
    fn range(&self) -> Result<(Option<Ms>, Option<Ms>), SqlError> {
        let mut start = None;
        let mut end = None;
        for f in &self.0 {
            match (f.column.as_str(), f.op) {
                ("start", BinaryOperator::GtEq | BinaryOperator::Eq) => {
                    start = Some(parse_timestamp(f.value)?)
                }
                ("end", BinaryOperator::LtEq | BinaryOperator::Lt | BinaryOperator::Eq) => {
                    end = Some(parse_timestamp(f.value)?)
                }
                _ => {}
            }
        }
        Ok((start, end))
    }
}

fn collect_filters<'a>(expr: &'a Expr, out: &mut Vec<Filter<'a>>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            out.push(Filter {
                column,
                op,
                value: right,
            });
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn where_key<'a>(selection: Option<&'a Expr>, key: &'static str) -> Result<&'a Expr, SqlError> {
    match selection {
        Some(Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some(key) => Ok(&**right),
        _ => Err(SqlError::MissingFilter(key)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if values.rows.is_empty() => {
            Err(SqlError::Parse("empty VALUES".into()))
        }
        SetExpr::Values(values) => Ok(&values.rows),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        // '2026-02-01T00:00:00Z'::timestamptz and friends
        Expr::Cast { expr, .. } | Expr::Nested(expr) => extract_value(expr),
        _ => None,
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID '{s}': {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer '{s}': {e}"))),
        Some(other) => Err(SqlError::Parse(format!("expected number, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(other) => Err(SqlError::Parse(format!("expected bool, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// Unix milliseconds, as a bare integer or a string holding an integer,
/// an RFC 3339 timestamp, `YYYY-MM-DD HH:MM:SS` (UTC) or `YYYY-MM-DD`
/// (UTC midnight).
fn parse_timestamp(expr: &Expr) -> Result<Ms, SqlError> {
    let s = match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => s.trim(),
        _ => return parse_i64(expr),
    };
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc().timestamp_millis());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        && let Some(dt) = d.and_hms_opt(0, 0, 0)
    {
        return Ok(dt.and_utc().timestamp_millis());
    }
    Err(SqlError::Parse(format!("bad timestamp '{s}'")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date '{s}': {e}")))
}

fn parse_team(expr: &Expr) -> Result<Team, SqlError> {
    let s = parse_string(expr)?;
    Team::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown team '{s}'")))
}

fn parse_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    let s = parse_string(expr)?;
    BookingStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown status '{s}'")))
}

fn parse_downtime_kind(expr: &Expr) -> Result<DowntimeKind, SqlError> {
    let s = parse_string(expr)?;
    DowntimeKind::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown downtime type '{s}'")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    MissingColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::MissingColumn(c) => write!(f, "missing column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
