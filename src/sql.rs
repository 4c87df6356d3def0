use std::str::FromStr;

use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::catalog::{SearchParams, VehicleInput};
use crate::engine::{ReservationRequest, ReviewRequest};
use crate::limits::MAX_IN_CLAUSE_IDS;
use crate::model::Money;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// `upsert` is set by `ON CONFLICT`: replace an existing vehicle.
    InsertVehicle {
        input: VehicleInput,
        upsert: bool,
    },
    DeleteVehicle {
        id: Ulid,
    },
    SelectVehicle {
        id: Ulid,
    },
    SearchVehicles {
        params: SearchParams,
    },
    InsertExtra {
        id: Ulid,
        name: String,
        price_per_day: Money,
    },
    /// `None` lists every extra.
    SelectExtras {
        ids: Option<Vec<Ulid>>,
    },
    InsertReservation {
        request: ReservationRequest,
    },
    CancelReservation {
        id: Ulid,
    },
    SetReservationStatus {
        id: Ulid,
        status: String,
    },
    SelectReservations,
    SelectAvailability {
        vehicle_id: Ulid,
    },
    InsertReview {
        request: ReviewRequest,
    },
    SelectReviews {
        vehicle_id: Ulid,
    },
    SelectDashboard,
}

/// Parse one statement. Values are positional, in the documented column order.
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

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let arity = |min: usize| {
        if values.len() < min {
            Err(SqlError::WrongArity(table_label(&table), min, values.len()))
        } else {
            Ok(())
        }
    };

    match table.as_str() {
        "vehicles" | "cars" => {
            arity(9)?;
            let input = VehicleInput {
                id: parse_ulid(&values[0])?,
                brand: parse_text(&values[1])?,
                model: parse_text(&values[2])?,
                year: parse_i64(&values[3])?,
                category: parse_text(&values[4])?,
                transmission: parse_text(&values[5])?,
                fuel: parse_text(&values[6])?,
                seats: parse_i64(&values[7])?,
                daily_price: parse_money(&values[8])?,
                status: values.get(9).map(parse_text_or_null).transpose()?.flatten(),
                mileage: values.get(10).map(parse_i64_or_null).transpose()?.flatten().unwrap_or(0),
                description: values.get(11).map(parse_text_or_null).transpose()?.flatten().unwrap_or_default(),
                images: values.get(12).map(parse_string_list).transpose()?.unwrap_or_default(),
            };
            Ok(Command::InsertVehicle {
                input,
                upsert: insert.on.is_some(),
            })
        }
        "extras" => {
            arity(3)?;
            Ok(Command::InsertExtra {
                id: parse_ulid(&values[0])?,
                name: parse_text(&values[1])?,
                price_per_day: parse_money(&values[2])?,
            })
        }
        "reservations" => {
            arity(6)?;
            let extra_ids = match values.get(7) {
                None => Vec::new(),
                Some(expr) => parse_string_list(expr)?
                    .iter()
                    .map(|s| ulid_from_str(s))
                    .collect::<Result<_, _>>()?,
            };
            Ok(Command::InsertReservation {
                request: ReservationRequest {
                    id: parse_ulid(&values[0])?,
                    vehicle_id: parse_ulid(&values[1])?,
                    start: parse_date(&values[2])?,
                    end: parse_date(&values[3])?,
                    pickup_location: parse_text(&values[4])?,
                    dropoff_location: parse_text(&values[5])?,
                    notes: values.get(6).map(parse_text_or_null).transpose()?.flatten().unwrap_or_default(),
                    extra_ids,
                },
            })
        }
        "reservation_status" => {
            arity(2)?;
            Ok(Command::SetReservationStatus {
                id: parse_ulid(&values[0])?,
                status: parse_text(&values[1])?,
            })
        }
        "reviews" => {
            arity(3)?;
            Ok(Command::InsertReview {
                request: ReviewRequest {
                    id: parse_ulid(&values[0])?,
                    vehicle_id: parse_ulid(&values[1])?,
                    rating: parse_i64(&values[2])?,
                    comment: values.get(3).map(parse_text_or_null).transpose()?.flatten().unwrap_or_default(),
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn table_label(table: &str) -> &'static str {
    match table {
        "vehicles" | "cars" => "vehicles",
        "extras" => "extras",
        "reservations" => "reservations",
        "reservation_status" => "reservation_status",
        "reviews" => "reviews",
        _ => "table",
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_eq(delete.selection.as_ref(), &["id"])?;

    match table.as_str() {
        "vehicles" | "cars" => Ok(Command::DeleteVehicle { id }),
        "reservations" => Ok(Command::CancelReservation { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Lowercased table a SELECT reads from. `None` for anything else,
/// including statements that do not parse. Placeholders are fine here,
/// so this works on unbound extended-protocol statements.
pub fn select_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Query(query) => select_from(query).ok().map(|(_, table)| table),
        _ => None,
    }
}

fn select_from(query: &ast::Query) -> Result<(&ast::Select, String), SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    Ok((select, table_factor_name(&from.relation)?))
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let (select, table) = select_from(query)?;
    let selection = select.selection.as_ref();

    match table.as_str() {
        "vehicles" | "cars" => parse_vehicle_select(selection),
        "extras" => Ok(Command::SelectExtras {
            ids: selection.map(extract_id_list).transpose()?,
        }),
        "reservations" => Ok(Command::SelectReservations),
        "availability" => Ok(Command::SelectAvailability {
            vehicle_id: extract_where_eq(selection, &["vehicle_id", "car_id"])?,
        }),
        "reviews" => Ok(Command::SelectReviews {
            vehicle_id: extract_where_eq(selection, &["vehicle_id", "car_id"])?,
        }),
        "dashboard" => Ok(Command::SelectDashboard),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `id = ..` fetches one vehicle; anything else is a catalog search.
fn parse_vehicle_select(selection: Option<&Expr>) -> Result<Command, SqlError> {
    let mut id = None;
    let mut pairs: Vec<(&'static str, String)> = Vec::new();
    if let Some(expr) = selection {
        collect_search_filters(expr, &mut id, &mut pairs)?;
    }
    if let Some(id) = id {
        return Ok(Command::SelectVehicle { id });
    }
    let params = SearchParams::from_pairs(pairs).map_err(|e| SqlError::Parse(e.to_string()))?;
    Ok(Command::SearchVehicles { params })
}

/// Column equality that passes straight through as a search parameter.
fn equality_param(column: &str) -> Option<&'static str> {
    Some(match column {
        "q" => "q",
        "brand" => "brand",
        "model" => "model",
        "category" => "category",
        "transmission" => "transmission",
        "fuel" => "fuel",
        "status" => "status",
        "page" => "page",
        "limit" => "limit",
        "sort" => "sort",
        _ => return None,
    })
}

/// Range comparison mapped onto a min/max search parameter.
fn range_param(column: &str, op: &ast::BinaryOperator) -> Option<&'static str> {
    use ast::BinaryOperator::{GtEq, LtEq};
    Some(match (column, op) {
        ("daily_price", GtEq) => "minPrice",
        ("daily_price", LtEq) => "maxPrice",
        ("year", GtEq) => "minYear",
        ("year", LtEq) => "maxYear",
        ("mileage", GtEq) => "minMileage",
        ("mileage", LtEq) => "maxMileage",
        ("seats", GtEq) => "seats",
        _ => return None,
    })
}

fn collect_search_filters(
    expr: &Expr,
    id: &mut Option<Ulid>,
    pairs: &mut Vec<(&'static str, String)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_search_filters(inner, id, pairs),
        Expr::BinaryOp { left, op, right } => {
            if *op == ast::BinaryOperator::And {
                collect_search_filters(left, id, pairs)?;
                return collect_search_filters(right, id, pairs);
            }
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            if *op == ast::BinaryOperator::Eq {
                if column == "id" {
                    *id = Some(parse_ulid(right)?);
                    return Ok(());
                }
                if let Some(name) = equality_param(&column) {
                    pairs.push((name, parse_scalar_text(right)?));
                    return Ok(());
                }
            }
            match range_param(&column, op) {
                Some(name) => {
                    pairs.push((name, parse_scalar_text(right)?));
                    Ok(())
                }
                None => Err(SqlError::Unsupported(format!("filter {expr}"))),
            }
        }
        _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
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

/// First VALUES row. Multi-row inserts are refused.
fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// `WHERE <one of columns> = '<ulid>'`, possibly ANDed with nothing else.
fn extract_where_eq(selection: Option<&Expr>, columns: &[&'static str]) -> Result<Ulid, SqlError> {
    let missing = SqlError::MissingFilter(columns[0]);
    let Some(sel) = selection else {
        return Err(missing);
    };
    match sel {
        Expr::Nested(inner) => extract_where_eq(Some(inner), columns),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => match expr_column_name(left) {
            Some(col) if columns.iter().any(|c| *c == col) => parse_ulid(right),
            _ => Err(missing),
        },
        _ => Err(missing),
    }
}

/// `WHERE id IN (...)` or `WHERE id = ..`.
fn extract_id_list(expr: &Expr) -> Result<Vec<Ulid>, SqlError> {
    match expr {
        Expr::InList {
            expr: column,
            list,
            negated: false,
        } if expr_column_name(column).as_deref() == Some("id") => {
            if list.len() > MAX_IN_CLAUSE_IDS {
                return Err(SqlError::Parse(format!(
                    "IN list too long ({} > {MAX_IN_CLAUSE_IDS})",
                    list.len()
                )));
            }
            list.iter().map(parse_ulid).collect()
        }
        _ => Ok(vec![extract_where_eq(Some(expr), &["id"])?]),
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

fn ulid_from_str(s: &str) -> Result<Ulid, SqlError> {
    Ulid::from_string(s.trim()).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => ulid_from_str(s),
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    parse_text_or_null(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// String or number rendered as text, for search parameters.
fn parse_scalar_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected literal, got {value:?}"))),
        None => match expr {
            Expr::UnaryOp {
                op: ast::UnaryOperator::Minus,
                expr,
            } => Ok(format!("-{}", parse_scalar_text(expr)?)),
            _ => Err(SqlError::Parse(format!("expected value, got {expr}"))),
        },
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    let text = parse_scalar_text(expr)?;
    text.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {text:?}: {e}")))
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_i64(expr).map(Some),
    }
}

fn parse_money(expr: &Expr) -> Result<Money, SqlError> {
    let text = parse_scalar_text(expr)?;
    Money::from_str(text.trim()).map_err(|e| SqlError::Parse(format!("bad amount {text:?}: {e}")))
}

/// ISO `YYYY-MM-DD`.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let text = parse_text(expr)?;
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {text:?}: {e}")))
}

/// `ARRAY['a', 'b']`, a comma list `'a,b'` or `'{a,b}'`, or NULL for none.
fn parse_string_list(expr: &Expr) -> Result<Vec<String>, SqlError> {
    if let Expr::Array(ast::Array { elem, .. }) = expr {
        return elem.iter().map(parse_text).collect();
    }
    match parse_text_or_null(expr)? {
        None => Ok(Vec::new()),
        Some(s) => Ok(s
            .trim()
            .trim_start_matches('{')
            .trim_end_matches('}')
            .split(',')
            .map(|part| part.trim().trim_matches('"').to_string())
            .filter(|part| !part.is_empty())
            .collect()),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
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
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const CAR: &str = "01HZX3Q7M0A8ZJ6Y2V9K4T5B1C";

    fn id() -> Ulid {
        Ulid::from_string(ID).unwrap()
    }

    fn car() -> Ulid {
        Ulid::from_string(CAR).unwrap()
    }

    fn search(sql: &str) -> SearchParams {
        match parse_sql(sql).unwrap() {
            Command::SearchVehicles { params } => params,
            other => panic!("expected SearchVehicles, got {other:?}"),
        }
    }

    #[test]
    fn insert_vehicle_full() {
        let sql = format!(
            "INSERT INTO vehicles (id, brand, model, year, category, transmission, fuel, seats, daily_price, status, mileage, description, images) \
             VALUES ('{ID}', 'Toyota', 'Corolla', 2022, 'Sedan', 'automatic', 'hybrid', 5, 49.90, 'available', 12000, 'clean', ARRAY['/a.jpg', '/b.jpg'])"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertVehicle { input, upsert } => {
                assert!(!upsert);
                assert_eq!(input.id, id());
                assert_eq!(input.brand, "Toyota");
                assert_eq!(input.year, 2022);
                assert_eq!(input.category, "Sedan");
                assert_eq!(input.daily_price, Money::new(4990, 2));
                assert_eq!(input.status.as_deref(), Some("available"));
                assert_eq!(input.mileage, 12_000);
                assert_eq!(input.images, vec!["/a.jpg", "/b.jpg"]);
            }
            other => panic!("expected InsertVehicle, got {other:?}"),
        }
    }

    #[test]
    fn insert_vehicle_minimal_defaults() {
        let sql = format!(
            "INSERT INTO vehicles (id, brand, model, year, category, transmission, fuel, seats, daily_price) \
             VALUES ('{ID}', 'Fiat', 'Panda', 2019, 'hatchback', 'manual', 'gasoline', 4, '25')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertVehicle { input, .. } => {
                assert_eq!(input.status, None);
                assert_eq!(input.mileage, 0);
                assert_eq!(input.description, "");
                assert!(input.images.is_empty());
                assert_eq!(input.daily_price, Money::from(25));
            }
            other => panic!("expected InsertVehicle, got {other:?}"),
        }
    }

    #[test]
    fn insert_vehicle_on_conflict_is_upsert() {
        let sql = format!(
            "INSERT INTO vehicles VALUES ('{ID}', 'Fiat', 'Panda', 2019, 'hatchback', 'manual', 'gasoline', 4, 25, NULL, 100, NULL, '{{/p.jpg}}') \
             ON CONFLICT (id) DO NOTHING"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertVehicle { input, upsert } => {
                assert!(upsert);
                assert_eq!(input.status, None);
                assert_eq!(input.images, vec!["/p.jpg"]);
            }
            other => panic!("expected InsertVehicle, got {other:?}"),
        }
    }

    #[test]
    fn insert_vehicle_too_few_values() {
        let sql = format!("INSERT INTO vehicles VALUES ('{ID}', 'Fiat')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::WrongArity("vehicles", 9, 2))
        ));
    }

    #[test]
    fn insert_reservation_with_extras() {
        let sql = format!(
            "INSERT INTO reservations (id, car_id, start_date, end_date, pickup_location, dropoff_location, notes, extra_ids) \
             VALUES ('{ID}', '{CAR}', '2026-01-10', '2026-01-13', 'Airport', 'Station', 'late arrival', ARRAY['{CAR}'])"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { request } => {
                assert_eq!(request.id, id());
                assert_eq!(request.vehicle_id, car());
                assert_eq!(request.start, NaiveDate::from_ymd_opt(2026, 1, 10).unwrap());
                assert_eq!(request.end, NaiveDate::from_ymd_opt(2026, 1, 13).unwrap());
                assert_eq!(request.notes, "late arrival");
                assert_eq!(request.extra_ids, vec![car()]);
            }
            other => panic!("expected InsertReservation, got {other:?}"),
        }
    }

    #[test]
    fn insert_reservation_without_optional_columns() {
        let sql = format!(
            "INSERT INTO reservations VALUES ('{ID}', '{CAR}', '2026-01-10', '2026-01-11', 'A', 'B')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { request } => {
                assert_eq!(request.notes, "");
                assert!(request.extra_ids.is_empty());
            }
            other => panic!("expected InsertReservation, got {other:?}"),
        }
    }

    #[test]
    fn insert_reservation_bad_date() {
        let sql = format!(
            "INSERT INTO reservations VALUES ('{ID}', '{CAR}', '10/01/2026', '2026-01-11', 'A', 'B')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn insert_reservation_status() {
        let sql = format!("INSERT INTO reservation_status (reservation_id, status) VALUES ('{ID}', 'approved')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SetReservationStatus {
                id: id(),
                status: "approved".into()
            }
        );
    }

    #[test]
    fn insert_extra_and_review() {
        let sql = format!("INSERT INTO extras (id, name, price_per_day) VALUES ('{ID}', 'GPS', 7.5)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertExtra {
                id: id(),
                name: "GPS".into(),
                price_per_day: Money::new(75, 1)
            }
        );

        let sql = format!("INSERT INTO reviews (id, vehicle_id, rating, comment) VALUES ('{ID}', '{CAR}', 4, 'smooth')");
        match parse_sql(&sql).unwrap() {
            Command::InsertReview { request } => {
                assert_eq!(request.vehicle_id, car());
                assert_eq!(request.rating, 4);
                assert_eq!(request.comment, "smooth");
            }
            other => panic!("expected InsertReview, got {other:?}"),
        }
    }

    #[test]
    fn deletes() {
        assert_eq!(
            parse_sql(&format!("DELETE FROM vehicles WHERE id = '{ID}'")).unwrap(),
            Command::DeleteVehicle { id: id() }
        );
        assert_eq!(
            parse_sql(&format!("DELETE FROM reservations WHERE id = '{ID}'")).unwrap(),
            Command::CancelReservation { id: id() }
        );
        assert!(matches!(
            parse_sql("DELETE FROM reservations"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn select_vehicle_by_id() {
        assert_eq!(
            parse_sql(&format!("SELECT * FROM vehicles WHERE id = '{ID}'")).unwrap(),
            Command::SelectVehicle { id: id() }
        );
    }

    #[test]
    fn select_vehicles_without_filters() {
        assert_eq!(search("SELECT * FROM vehicles"), SearchParams::default());
    }

    #[test]
    fn select_vehicles_maps_filters() {
        let params = search(
            "SELECT * FROM vehicles WHERE q = 'toy cor' AND category = 'suv' AND daily_price >= 30 \
             AND daily_price <= 90.5 AND year >= 2018 AND mileage <= 50000 AND seats >= 5 \
             AND \"sort\" = 'price_asc' AND page = 2 AND \"limit\" = 10",
        );
        assert_eq!(params.q.as_deref(), Some("toy cor"));
        assert_eq!(params.category.as_deref(), Some("suv"));
        assert_eq!(params.min_price.as_deref(), Some("30"));
        assert_eq!(params.max_price.as_deref(), Some("90.5"));
        assert_eq!(params.min_year.as_deref(), Some("2018"));
        assert_eq!(params.max_mileage.as_deref(), Some("50000"));
        assert_eq!(params.seats.as_deref(), Some("5"));
        assert_eq!(params.sort.as_deref(), Some("price_asc"));
        assert_eq!(params.page.as_deref(), Some("2"));
        assert_eq!(params.limit.as_deref(), Some("10"));
    }

    #[test]
    fn select_vehicles_rejects_unknown_filters() {
        assert!(matches!(
            parse_sql("SELECT * FROM vehicles WHERE colour = 'red'"),
            Err(SqlError::Unsupported(_))
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM vehicles WHERE seats <= 2"),
            Err(SqlError::Unsupported(_))
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM vehicles WHERE brand = 'a' OR brand = 'b'"),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn select_extras() {
        assert_eq!(
            parse_sql("SELECT * FROM extras").unwrap(),
            Command::SelectExtras { ids: None }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM extras WHERE id IN ('{ID}', '{CAR}')")).unwrap(),
            Command::SelectExtras {
                ids: Some(vec![id(), car()])
            }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM extras WHERE id = '{ID}'")).unwrap(),
            Command::SelectExtras { ids: Some(vec![id()]) }
        );
    }

    #[test]
    fn select_per_vehicle_tables() {
        assert_eq!(
            parse_sql(&format!("SELECT * FROM availability WHERE vehicle_id = '{CAR}'")).unwrap(),
            Command::SelectAvailability { vehicle_id: car() }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM reviews WHERE car_id = '{CAR}'")).unwrap(),
            Command::SelectReviews { vehicle_id: car() }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM availability"),
            Err(SqlError::MissingFilter("vehicle_id"))
        ));
    }

    #[test]
    fn select_listing_tables() {
        assert_eq!(parse_sql("SELECT * FROM reservations").unwrap(), Command::SelectReservations);
        assert_eq!(parse_sql("SELECT * FROM dashboard").unwrap(), Command::SelectDashboard);
    }

    #[test]
    fn bad_ulid_errors() {
        assert!(matches!(
            parse_sql("DELETE FROM vehicles WHERE id = 'nope'"),
            Err(SqlError::Parse(_))
        ));
    }

    #[test]
    fn unknown_table_errors() {
        assert!(matches!(
            parse_sql(&format!("INSERT INTO foobar VALUES ('{ID}')")),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn select_table_reads_the_from_clause() {
        assert_eq!(
            select_table("SELECT * FROM cars WHERE brand = 'Dashboard'").as_deref(),
            Some("cars")
        );
        assert_eq!(
            select_table("SELECT * FROM Vehicles WHERE q = 'reviews'").as_deref(),
            Some("vehicles")
        );
        assert_eq!(
            select_table("SELECT * FROM availability WHERE car_id = $1").as_deref(),
            Some("availability")
        );
        assert_eq!(select_table("DELETE FROM reviews WHERE id = $1"), None);
        assert_eq!(select_table("SELECT 1"), None);
        assert_eq!(select_table("not sql"), None);
    }
}
