use sqlparser::ast::{
    self, Assignment, AssignmentTarget, Expr, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::limits::MAX_SQL_LEN;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    CreateHold {
        idempotency_key: String,
        request: CreateHoldRequest,
    },
    /// Ids stay unparsed so the service reports malformed ones itself.
    ConfirmHold {
        hold_id: String,
    },
    CancelHold {
        hold_id: String,
    },
    /// `None` means "as of the server clock".
    ExpireHolds {
        now: Option<Ms>,
    },
    SelectHold {
        hold_id: String,
    },
    SelectRooms {
        hotel_id: String,
    },
}

/// Column order for `INSERT INTO holds` without a column list.
const HOLD_INSERT_COLUMNS: [&str; 6] = [
    "idempotency_key",
    "hotel_id",
    "guest_name",
    "guest_phone",
    "check_in",
    "check_out",
];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    if sql.len() > MAX_SQL_LEN {
        return Err(SqlError::Unsupported("query too long".into()));
    }
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
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "holds" {
        return Err(SqlError::UnknownTable(table));
    }
    let values = extract_insert_values(insert)?;

    let columns: Vec<String> = if insert.columns.is_empty() {
        HOLD_INSERT_COLUMNS.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if columns.len() != values.len() {
        return Err(SqlError::WrongArity("holds", columns.len(), values.len()));
    }
    let column = |name: &'static str| -> Result<&Expr, SqlError> {
        columns
            .iter()
            .position(|c| c == name)
            .map(|i| &values[i])
            .ok_or(SqlError::MissingColumn(name))
    };

    Ok(Command::CreateHold {
        idempotency_key: parse_string(column("idempotency_key")?)?,
        request: CreateHoldRequest {
            hotel_id: parse_string(column("hotel_id")?)?,
            guest_name: parse_string(column("guest_name")?)?,
            guest_phone: parse_string(column("guest_phone")?)?,
            check_in: parse_timestamp(column("check_in")?)?,
            check_out: parse_timestamp(column("check_out")?)?,
        },
    })
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "holds" {
        return Err(SqlError::UnknownTable(table));
    }
    let [assignment] = assignments else {
        return Err(SqlError::Unsupported("UPDATE holds must set only status".into()));
    };
    let target = match &assignment.target {
        AssignmentTarget::ColumnName(name) => object_name_last(name),
        _ => None,
    };
    if target.as_deref() != Some("status") {
        return Err(SqlError::Unsupported("UPDATE holds must set only status".into()));
    }
    let raw = parse_string(&assignment.value)?;
    let status =
        HoldStatus::parse(&raw).ok_or_else(|| SqlError::Parse(format!("unknown status: {raw}")))?;

    match status {
        HoldStatus::Confirmed => Ok(Command::ConfirmHold {
            hold_id: extract_where_eq(selection, "id")?,
        }),
        HoldStatus::Cancelled => Ok(Command::CancelHold {
            hold_id: extract_where_eq(selection, "id")?,
        }),
        HoldStatus::Expired => Ok(Command::ExpireHolds {
            now: selection.map(extract_expires_before).transpose()?,
        }),
        HoldStatus::HoldCreated => Err(SqlError::Unsupported(
            "holds are created with INSERT".into(),
        )),
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
        "holds" => Ok(Command::SelectHold {
            hold_id: extract_where_eq(selection, "id")?,
        }),
        "rooms" => Ok(Command::SelectRooms {
            hotel_id: extract_where_eq(selection, "hotel_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `WHERE expires_at <= t` (or `t >= expires_at`).
fn extract_expires_before(expr: &Expr) -> Result<Ms, SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::LtEq,
            right,
        } if expr_column_name(left).as_deref() == Some("expires_at") => parse_timestamp(right),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::GtEq,
            right,
        } if expr_column_name(right).as_deref() == Some("expires_at") => parse_timestamp(left),
        Expr::Nested(inner) => extract_expires_before(inner),
        _ => Err(SqlError::MissingFilter("expires_at")),
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
            _ => Err(SqlError::Unsupported("one hold per INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// `WHERE <column> = <literal>`, returned as text.
fn extract_where_eq(selection: Option<&Expr>, column: &'static str) -> Result<String, SqlError> {
    match selection {
        Some(Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some(column) => parse_string(right),
        Some(Expr::Nested(inner)) => extract_where_eq(Some(inner), column),
        _ => Err(SqlError::MissingFilter(column)),
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

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64_expr(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// RFC 3339 text or integer unix milliseconds.
fn parse_timestamp(expr: &Expr) -> Result<Ms, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr)
        && let Some(ms) = parse_rfc3339(s)
    {
        return Ok(ms);
    }
    parse_i64_expr(expr).map_err(|_| SqlError::Parse(format!("bad timestamp: {expr}")))
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
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}
