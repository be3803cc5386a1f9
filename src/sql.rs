use std::str::FromStr;

use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::calendar::CalendarDay;
use crate::model::*;
use crate::service::AvailabilityFilters;

/// A row of `INSERT INTO rooms`: (id, room_type_id, number, status).
pub type RoomRow = (Ulid, Ulid, String, RoomStatus);

/// A row of `INSERT INTO reservations`: (id, room_type_id, check_in, check_out, status).
pub type ReservationRow = (Ulid, Ulid, CalendarDay, CalendarDay, ReservationStatus);

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertProperty {
        id: Ulid,
        name: String,
        active: bool,
    },
    DeleteProperty {
        id: Ulid,
    },
    InsertRoomType {
        id: Ulid,
        property_id: Ulid,
        name: String,
        active: bool,
    },
    DeleteRoomType {
        id: Ulid,
    },
    InsertRooms {
        rooms: Vec<RoomRow>,
    },
    DeleteRoom {
        id: Ulid,
    },
    SetRoomStatus {
        room_id: Ulid,
        status: RoomStatus,
    },
    InsertReservation {
        id: Ulid,
        room_type_id: Ulid,
        check_in: CalendarDay,
        check_out: CalendarDay,
        status: ReservationStatus,
    },
    BatchInsertReservations {
        reservations: Vec<ReservationRow>,
    },
    DeleteReservation {
        id: Ulid,
    },
    SetReservationStatus {
        reservation_id: Ulid,
        status: ReservationStatus,
    },
    SelectProperties,
    SelectRoomTypes {
        property_id: Option<Ulid>,
    },
    SelectRooms {
        room_type_id: Ulid,
    },
    SelectReservations {
        room_type_id: Ulid,
    },
    /// Filters stay raw; the availability service validates them.
    SelectAvailability {
        filters: AvailabilityFilters,
    },
    SelectAvailabilitySummary {
        filters: AvailabilityFilters,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from, if `sql` parses as one. `$n` placeholders are
/// accepted, so this works on unbound extended-protocol statements.
pub fn select_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let Statement::Query(query) = stmts.first()? else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    table_factor_name(&select.from.first()?.relation).ok()
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;

    match table.as_str() {
        "properties" => {
            let values = single_row(&rows, "properties", 2)?;
            Ok(Command::InsertProperty {
                id: parse_ulid(&values[0])?,
                name: parse_text(&values[1])?,
                active: optional(values, 2, parse_bool)?.unwrap_or(true),
            })
        }
        "room_types" => {
            let values = single_row(&rows, "room_types", 3)?;
            Ok(Command::InsertRoomType {
                id: parse_ulid(&values[0])?,
                property_id: parse_ulid(&values[1])?,
                name: parse_text(&values[2])?,
                active: optional(values, 3, parse_bool)?.unwrap_or(true),
            })
        }
        "rooms" => {
            let rooms = each_row(&rows, "rooms", 3, |row| {
                Ok((
                    parse_ulid(&row[0])?,
                    parse_ulid(&row[1])?,
                    parse_text(&row[2])?,
                    optional(row, 3, parse_status)?.unwrap_or(RoomStatus::Available),
                ))
            })?;
            Ok(Command::InsertRooms { rooms })
        }
        "room_status" => {
            let values = single_row(&rows, "room_status", 2)?;
            Ok(Command::SetRoomStatus {
                room_id: parse_ulid(&values[0])?,
                status: parse_status(&values[1])?,
            })
        }
        "reservations" => {
            let mut reservations = each_row(&rows, "reservations", 4, |row| {
                Ok((
                    parse_ulid(&row[0])?,
                    parse_ulid(&row[1])?,
                    parse_day(&row[2])?,
                    parse_day(&row[3])?,
                    optional(row, 4, parse_status)?.unwrap_or(ReservationStatus::Confirmed),
                ))
            })?;
            if reservations.len() == 1 {
                let (id, room_type_id, check_in, check_out, status) = reservations.remove(0);
                Ok(Command::InsertReservation { id, room_type_id, check_in, check_out, status })
            } else {
                Ok(Command::BatchInsertReservations { reservations })
            }
        }
        "reservation_status" => {
            let values = single_row(&rows, "reservation_status", 2)?;
            Ok(Command::SetReservationStatus {
                reservation_id: parse_ulid(&values[0])?,
                status: parse_status(&values[1])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = collect_filters(delete.selection.as_ref())?;
    let id = required_ulid(&filters, "id")?;

    match table.as_str() {
        "properties" => Ok(Command::DeleteProperty { id }),
        "room_types" => Ok(Command::DeleteRoomType { id }),
        "rooms" => Ok(Command::DeleteRoom { id }),
        "reservations" => Ok(Command::DeleteReservation { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = collect_filters(select.selection.as_ref())?;

    match table.as_str() {
        "properties" => Ok(Command::SelectProperties),
        "room_types" => Ok(Command::SelectRoomTypes {
            property_id: lookup(&filters, "property_id").map(parse_ulid_str).transpose()?,
        }),
        "rooms" => Ok(Command::SelectRooms {
            room_type_id: required_ulid(&filters, "room_type_id")?,
        }),
        "reservations" => Ok(Command::SelectReservations {
            room_type_id: required_ulid(&filters, "room_type_id")?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            filters: availability_filters(&filters),
        }),
        "availability_summary" => Ok(Command::SelectAvailabilitySummary {
            filters: availability_filters(&filters),
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn availability_filters(filters: &[(String, Option<String>)]) -> AvailabilityFilters {
    let get = |col: &str| lookup(filters, col).map(str::to_string);
    AvailabilityFilters {
        property_id: get("property_id"),
        room_type_id: get("room_type_id"),
        check_in: get("check_in"),
        check_out: get("check_out"),
    }
}

// ── WHERE clauses ─────────────────────────────────────────────

/// Flatten `col = value AND col = value ...` into (column, text) pairs.
/// `NULL` values become `None`.
fn collect_filters(selection: Option<&Expr>) -> Result<Vec<(String, Option<String>)>, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        collect_eq(expr, &mut out)?;
    }
    Ok(out)
}

fn collect_eq(expr: &Expr, out: &mut Vec<(String, Option<String>)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq(left, out)?;
                collect_eq(right, out)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, expr_text(right)?));
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("operator {op} in WHERE"))),
        },
        _ => Err(SqlError::Unsupported(format!("WHERE {expr}"))),
    }
}

fn lookup<'a>(filters: &'a [(String, Option<String>)], col: &str) -> Option<&'a str> {
    filters
        .iter()
        .rev()
        .find(|(c, _)| c == col)
        .and_then(|(_, v)| v.as_deref())
}

fn required_ulid(filters: &[(String, Option<String>)], col: &'static str) -> Result<Ulid, SqlError> {
    let raw = lookup(filters, col).ok_or(SqlError::MissingFilter(col))?;
    parse_ulid_str(raw)
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
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(&values.rows),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn single_row<'a>(rows: &'a [Vec<Expr>], table: &'static str, min: usize) -> Result<&'a [Expr], SqlError> {
    if rows.len() > 1 {
        return Err(SqlError::Unsupported(format!("multi-row INSERT into {table}")));
    }
    let values = &rows[0];
    if values.len() < min {
        return Err(SqlError::WrongArity(table, min, values.len()));
    }
    Ok(values)
}

fn each_row<T>(
    rows: &[Vec<Expr>],
    table: &'static str,
    min: usize,
    parse: impl Fn(&[Expr]) -> Result<T, SqlError>,
) -> Result<Vec<T>, SqlError> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            if row.len() < min {
                return Err(SqlError::WrongArity(table, min, row.len()));
            }
            parse(row).map_err(|e| match e {
                SqlError::Parse(msg) if rows.len() > 1 => SqlError::Parse(format!("row {i}: {msg}")),
                other => other,
            })
        })
        .collect()
}

/// Parse column `idx` if present and not NULL.
fn optional<T>(
    values: &[Expr],
    idx: usize,
    parse: impl Fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    match values.get(idx) {
        None => Ok(None),
        Some(expr) if matches!(extract_value(expr), Some(Value::Null)) => Ok(None),
        Some(expr) => parse(expr).map(Some),
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
        _ => None,
    }
}

/// Literal as text: strings and numbers verbatim, `NULL` as `None`.
fn expr_text(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr: inner,
    } = expr
    {
        return Ok(expr_text(inner)?.map(|s| format!("-{s}")));
    }
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(Value::Boolean(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(SqlError::Parse(format!("unsupported literal {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    expr_text(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

fn parse_ulid_str(s: &str) -> Result<Ulid, SqlError> {
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID '{s}': {e}")))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    parse_ulid_str(&parse_text(expr)?)
}

fn parse_day(expr: &Expr) -> Result<CalendarDay, SqlError> {
    CalendarDay::parse(&parse_text(expr)?).map_err(|e| SqlError::Parse(e.to_string()))
}

fn parse_status<T>(expr: &Expr) -> Result<T, SqlError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_text(expr)?
        .parse()
        .map_err(|e: T::Err| SqlError::Parse(e.to_string()))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(Value::Boolean(b)) = extract_value(expr) {
        return Ok(*b);
    }
    match parse_text(expr)?.to_lowercase().as_str() {
        "true" | "t" | "1" => Ok(true),
        "false" | "f" | "0" => Ok(false),
        other => Err(SqlError::Parse(format!("bad bool: {other}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected at least {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}
