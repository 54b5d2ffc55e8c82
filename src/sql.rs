use chrono::{NaiveDateTime, NaiveTime};
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;
use uuid::Uuid;

use crate::engine::{ReportQuery, DEFAULT_PAGE, DEFAULT_PAGE_SIZE};
use crate::model::*;

/// Which reservations a SELECT asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationFilter {
    All,
    Id(Ulid),
    Restaurant(Ulid),
    Space(Ulid, Uuid),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// With `id` present the row replaces an existing restaurant.
    InsertRestaurant {
        id: Option<Ulid>,
        draft: RestaurantDraft,
        returning: bool,
    },
    SelectRestaurants {
        id: Option<Ulid>,
    },
    DeleteRestaurant {
        id: Ulid,
    },
    InsertSpace {
        restaurant_id: Ulid,
        draft: SpaceDraft,
        returning: bool,
    },
    SelectSpaces {
        restaurant_id: Ulid,
    },
    DeleteSpace {
        restaurant_id: Ulid,
        id: Uuid,
    },
    InsertReservation {
        draft: ReservationDraft,
        returning: bool,
    },
    SelectReservations {
        filter: ReservationFilter,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectOccupancy {
        restaurant_id: Ulid,
        space_id: Uuid,
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    SelectOccupancyReport {
        query: ReportQuery,
    },
    SelectOccupancySummary {
        query: ReportQuery,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(first) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match first {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── Column/value pairs ─────────────────────────────────────────

/// Column → value pairs from an INSERT row or a WHERE clause.
struct Fields<'a> {
    table: &'static str,
    pairs: Vec<(String, &'a Expr)>,
}

impl<'a> Fields<'a> {
    fn reject_unknown(&self, allowed: &[&str]) -> Result<(), SqlError> {
        match self.pairs.iter().find(|(col, _)| !allowed.contains(&col.as_str())) {
            Some((col, _)) => Err(SqlError::UnknownColumn(self.table, col.clone())),
            None => Ok(()),
        }
    }

    /// `None` when the column is absent or NULL.
    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.pairs
            .iter()
            .find(|(col, _)| col == column)
            .map(|(_, expr)| *expr)
            .filter(|expr| !matches!(extract_value(expr), Some(Value::Null)))
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(self.table, column))
    }

    fn opt<T>(&self, column: &str, parse: fn(&Expr) -> Result<T, SqlError>) -> Result<Option<T>, SqlError> {
        self.get(column).map(parse).transpose()
    }
}

fn insert_fields<'a>(table: &'static str, insert: &'a ast::Insert) -> Result<Fields<'a>, SqlError> {
    if insert.columns.is_empty() {
        return Err(SqlError::Parse(format!("{table}: INSERT needs an explicit column list")));
    }
    let row = extract_insert_values(insert)?;
    if row.len() != insert.columns.len() {
        return Err(SqlError::WrongArity(table, insert.columns.len(), row.len()));
    }
    let pairs = insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .zip(row.iter())
        .collect();
    Ok(Fields { table, pairs })
}

fn where_fields<'a>(table: &'static str, selection: Option<&'a Expr>) -> Result<Fields<'a>, SqlError> {
    let mut pairs = Vec::new();
    if let Some(expr) = selection {
        collect_filters(expr, &mut pairs)?;
    }
    Ok(Fields { table, pairs })
}

/// Flatten an AND chain of equality filters into column/value pairs.
/// A window may also be written `start_time >= x AND end_time <= y`;
/// any other column/operator pairing is refused.
fn collect_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_filters(left, out)?;
                collect_filters(right, out)
            }
            ast::BinaryOperator::Eq | ast::BinaryOperator::GtEq | ast::BinaryOperator::LtEq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                let allowed = match op {
                    ast::BinaryOperator::GtEq => col == "start_time",
                    ast::BinaryOperator::LtEq => col == "end_time",
                    _ => true,
                };
                if !allowed {
                    return Err(SqlError::Unsupported(format!("operator {op} on {col}")));
                }
                out.push((col, right.as_ref()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other} in WHERE"))),
        },
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

// ── Statements ─────────────────────────────────────────────────

const RESTAURANT_COLUMNS: &[&str] = &["id", "name", "address", "cuisine_type", "capacity"];
const SPACE_COLUMNS: &[&str] = &[
    "restaurant_id",
    "name",
    "min_capacity",
    "max_capacity",
    "operating_start",
    "operating_end",
    "slot_minutes",
];
const RESERVATION_COLUMNS: &[&str] = &[
    "restaurant_id",
    "space_id",
    "customer_email",
    "start_time",
    "end_time",
    "party_size",
    "status",
];
const REPORT_FILTERS: &[&str] = &["restaurant_id", "start_time", "end_time", "space_id", "page", "size"];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let returning = insert.returning.is_some();

    match table.as_str() {
        "restaurants" => {
            let f = insert_fields("restaurants", insert)?;
            f.reject_unknown(RESTAURANT_COLUMNS)?;
            Ok(Command::InsertRestaurant {
                id: f.opt("id", parse_ulid)?,
                draft: RestaurantDraft {
                    name: parse_string(f.require("name")?)?,
                    address: f.opt("address", parse_string)?.unwrap_or_default(),
                    cuisine_type: f.opt("cuisine_type", parse_string)?.unwrap_or_default(),
                    capacity: f.opt("capacity", parse_u32)?.unwrap_or(0),
                    spaces: None,
                },
                returning,
            })
        }
        "spaces" => {
            let f = insert_fields("spaces", insert)?;
            f.reject_unknown(SPACE_COLUMNS)?;
            Ok(Command::InsertSpace {
                restaurant_id: parse_ulid(f.require("restaurant_id")?)?,
                draft: SpaceDraft {
                    name: parse_string(f.require("name")?)?,
                    min_capacity: parse_u32(f.require("min_capacity")?)?,
                    max_capacity: parse_u32(f.require("max_capacity")?)?,
                    operating_start: f.opt("operating_start", parse_time)?,
                    operating_end: f.opt("operating_end", parse_time)?,
                    slot_minutes: f.opt("slot_minutes", parse_u32)?,
                },
                returning,
            })
        }
        "reservations" => {
            let f = insert_fields("reservations", insert)?;
            f.reject_unknown(RESERVATION_COLUMNS)?;
            Ok(Command::InsertReservation {
                draft: ReservationDraft {
                    restaurant_id: parse_ulid(f.require("restaurant_id")?)?,
                    space_id: parse_uuid(f.require("space_id")?)?,
                    customer_email: parse_string(f.require("customer_email")?)?,
                    start: parse_date_time_expr(f.require("start_time")?)?,
                    end: parse_date_time_expr(f.require("end_time")?)?,
                    party_size: parse_u32(f.require("party_size")?)?,
                    status: f.opt("status", parse_string)?,
                },
                returning,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        "restaurants" => {
            let f = where_fields("restaurants", delete.selection.as_ref())?;
            f.reject_unknown(&["id"])?;
            Ok(Command::DeleteRestaurant {
                id: parse_ulid(f.get("id").ok_or(SqlError::MissingFilter("id"))?)?,
            })
        }
        "spaces" => {
            let f = where_fields("spaces", delete.selection.as_ref())?;
            f.reject_unknown(&["restaurant_id", "id"])?;
            Ok(Command::DeleteSpace {
                restaurant_id: parse_ulid(f.get("restaurant_id").ok_or(SqlError::MissingFilter("restaurant_id"))?)?,
                id: parse_uuid(f.get("id").ok_or(SqlError::MissingFilter("id"))?)?,
            })
        }
        "reservations" => {
            let f = where_fields("reservations", delete.selection.as_ref())?;
            f.reject_unknown(&["id"])?;
            Ok(Command::DeleteReservation {
                id: parse_ulid(f.get("id").ok_or(SqlError::MissingFilter("id"))?)?,
            })
        }
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
    let selection = select.selection.as_ref();

    match table.as_str() {
        "restaurants" => {
            let f = where_fields("restaurants", selection)?;
            f.reject_unknown(&["id"])?;
            Ok(Command::SelectRestaurants {
                id: f.opt("id", parse_ulid)?,
            })
        }
        "spaces" => {
            let f = where_fields("spaces", selection)?;
            f.reject_unknown(&["restaurant_id"])?;
            Ok(Command::SelectSpaces {
                restaurant_id: parse_ulid(f.get("restaurant_id").ok_or(SqlError::MissingFilter("restaurant_id"))?)?,
            })
        }
        "reservations" => {
            let f = where_fields("reservations", selection)?;
            f.reject_unknown(&["id", "restaurant_id", "space_id"])?;
            let filter = match (
                f.opt("id", parse_ulid)?,
                f.opt("restaurant_id", parse_ulid)?,
                f.opt("space_id", parse_uuid)?,
            ) {
                (Some(id), None, None) => ReservationFilter::Id(id),
                (None, Some(rid), None) => ReservationFilter::Restaurant(rid),
                (None, Some(rid), Some(sid)) => ReservationFilter::Space(rid, sid),
                (None, None, None) => ReservationFilter::All,
                (None, None, Some(_)) => return Err(SqlError::MissingFilter("restaurant_id")),
                _ => return Err(SqlError::Unsupported("combine id with other reservation filters".into())),
            };
            Ok(Command::SelectReservations { filter })
        }
        "occupancy" => {
            let f = where_fields("occupancy", selection)?;
            f.reject_unknown(&["restaurant_id", "space_id", "start_time", "end_time"])?;
            Ok(Command::SelectOccupancy {
                restaurant_id: parse_ulid(f.get("restaurant_id").ok_or(SqlError::MissingFilter("restaurant_id"))?)?,
                space_id: parse_uuid(f.get("space_id").ok_or(SqlError::MissingFilter("space_id"))?)?,
                start: parse_date_time_expr(f.get("start_time").ok_or(SqlError::MissingFilter("start_time"))?)?,
                end: parse_date_time_expr(f.get("end_time").ok_or(SqlError::MissingFilter("end_time"))?)?,
            })
        }
        "occupancy_report" => Ok(Command::SelectOccupancyReport {
            query: report_query(&where_fields("occupancy_report", selection)?)?,
        }),
        "occupancy_summary" => Ok(Command::SelectOccupancySummary {
            query: report_query(&where_fields("occupancy_summary", selection)?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Missing start/end are passed through so the engine reports them as a date-range error.
fn report_query(f: &Fields<'_>) -> Result<ReportQuery, SqlError> {
    f.reject_unknown(REPORT_FILTERS)?;
    Ok(ReportQuery {
        restaurant_id: parse_ulid(f.get("restaurant_id").ok_or(SqlError::MissingFilter("restaurant_id"))?)?,
        start: f.opt("start_time", parse_date_time_expr)?,
        end: f.opt("end_time", parse_date_time_expr)?,
        space_id: f.opt("space_id", parse_uuid)?,
        page: f.opt("page", parse_u32)?.unwrap_or(DEFAULT_PAGE),
        size: f.opt("size", parse_u32)?.unwrap_or(DEFAULT_PAGE_SIZE),
    })
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

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row.as_slice()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
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
        _ => None,
    }
}

/// Text of a literal; numbers are accepted as their digits.
fn literal_text(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s),
        Some(other) => Err(SqlError::Parse(format!("expected literal, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        _ => Err(SqlError::Parse(format!("expected string, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_uuid(expr: &Expr) -> Result<Uuid, SqlError> {
    let s = literal_text(expr)?;
    Uuid::parse_str(s).map_err(|e| SqlError::Parse(format!("bad UUID {s:?}: {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let s = literal_text(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad non-negative integer {s:?}: {e}")))
}

fn parse_date_time_expr(expr: &Expr) -> Result<NaiveDateTime, SqlError> {
    let s = literal_text(expr)?;
    parse_date_time(s).ok_or_else(|| {
        SqlError::Parse(format!(
            "bad date-time {s:?}: expected dd-MM-yyyy HH:mm or YYYY-MM-DD[T ]HH:MM[:SS]"
        ))
    })
}

fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = literal_text(expr)?;
    parse_time_of_day(s).ok_or_else(|| SqlError::Parse(format!("bad time {s:?}: expected HH:MM[:SS]")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "unknown column {c} for {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
