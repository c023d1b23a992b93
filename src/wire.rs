use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;

use crate::auth::RoomholdAuthSource;
use crate::error::HoldError;
use crate::model::*;
use crate::observability::{self, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::service::HoldService;
use crate::sql::{self, Command};

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    service: Arc<HoldService>,
    password: String,
) -> std::io::Result<()> {
    let factory = RoomholdFactory::new(service, password);
    pgwire::tokio::process_socket(socket, None, factory).await
}

pub struct RoomholdHandler {
    service: Arc<HoldService>,
    query_parser: Arc<RoomholdQueryParser>,
}

impl RoomholdHandler {
    pub fn new(service: Arc<HoldService>) -> Self {
        Self {
            service,
            query_parser: Arc::new(RoomholdQueryParser),
        }
    }

    async fn run(&self, sql_text: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql_text).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result.map_err(hold_err)
    }

    async fn execute_command(&self, cmd: Command) -> Result<Response, HoldError> {
        match cmd {
            Command::CreateHold {
                idempotency_key,
                request,
            } => {
                let resp = self.service.create_hold(&idempotency_key, &request).await?;
                hold_rows(&[resp])
            }
            Command::ConfirmHold { hold_id } => {
                let resp = self.service.confirm_hold(&hold_id).await?;
                hold_rows(&[resp])
            }
            Command::CancelHold { hold_id } => {
                let resp = self.service.cancel_hold(&hold_id).await?;
                hold_rows(&[resp])
            }
            Command::ExpireHolds { now } => {
                let now = now.unwrap_or_else(|| self.service.now());
                let expired = self.service.expire_holds(now).await?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(expired)))
            }
            Command::SelectHold { hold_id } => {
                let hold = self.service.get_hold(&hold_id).await?;
                hold_detail_rows(&[hold])
            }
            Command::SelectRooms { hotel_id } => {
                let rooms = self.service.list_rooms(&hotel_id).await?;
                room_rows(&rooms)
            }
        }
    }
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn hold_schema() -> Vec<FieldInfo> {
    ["hold_id", "room_id", "status", "expires_at"]
        .into_iter()
        .map(text_field)
        .collect()
}

fn hold_detail_schema() -> Vec<FieldInfo> {
    [
        "hold_id",
        "hotel_id",
        "room_id",
        "guest_name",
        "guest_phone",
        "check_in",
        "check_out",
        "status",
        "expires_at",
        "created_at",
        "confirmed_at",
        "cancelled_at",
        "expired_at",
        "updated_at",
    ]
    .into_iter()
    .map(text_field)
    .collect()
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        text_field("room_id"),
        text_field("hotel_id"),
        text_field("room_type"),
        FieldInfo::new("active".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

/// Result columns for a statement, judged from its text so it also works
/// before parameters are bound.
fn schema_for(sql_text: &str) -> Vec<FieldInfo> {
    let upper = sql_text.to_uppercase();
    if upper.contains("INSERT") && upper.contains("HOLDS") {
        hold_schema()
    } else if upper.contains("UPDATE") && upper.contains("HOLDS") {
        if upper.contains("EXPIRED") {
            vec![]
        } else {
            hold_schema()
        }
    } else if upper.contains("SELECT") && upper.contains("ROOMS") {
        room_schema()
    } else if upper.contains("SELECT") && upper.contains("HOLDS") {
        hold_detail_schema()
    } else {
        vec![]
    }
}

fn hold_rows(holds: &[HoldResponse]) -> Result<Response, HoldError> {
    let schema = Arc::new(hold_schema());
    let rows: Vec<PgWireResult<_>> = holds
        .iter()
        .map(|h| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&h.hold_id)?;
            encoder.encode_field(&h.room_id)?;
            encoder.encode_field(&h.status.to_string())?;
            encoder.encode_field(&h.expires_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn hold_detail_rows(holds: &[Hold]) -> Result<Response, HoldError> {
    let schema = Arc::new(hold_detail_schema());
    let rows: Vec<PgWireResult<_>> = holds
        .iter()
        .map(|h| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&h.id.to_string())?;
            encoder.encode_field(&h.hotel_id.to_string())?;
            encoder.encode_field(&h.room_id.to_string())?;
            encoder.encode_field(&h.guest_name)?;
            encoder.encode_field(&h.guest_phone)?;
            encoder.encode_field(&format_ms(h.stay.start))?;
            encoder.encode_field(&format_ms(h.stay.end))?;
            encoder.encode_field(&h.status.to_string())?;
            encoder.encode_field(&format_ms(h.expires_at))?;
            encoder.encode_field(&format_ms(h.created_at))?;
            for marker in [h.confirmed_at, h.cancelled_at, h.expired_at, h.updated_at] {
                encoder.encode_field(&marker.map(format_ms))?;
            }
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn room_rows(rooms: &[Room]) -> Result<Response, HoldError> {
    let schema = Arc::new(room_schema());
    let rows: Vec<PgWireResult<_>> = rooms
        .iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.hotel_id.to_string())?;
            encoder.encode_field(&r.room_type)?;
            encoder.encode_field(&r.active)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for RoomholdHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomholdQueryParser;

#[async_trait]
impl QueryParser for RoomholdQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoomholdHandler {
    type Statement = String;
    type QueryParser = RoomholdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql_text = substitute_params(portal);
        self.run(&sql_text).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for(
            &target.statement.statement,
        )))
    }
}

/// `$N` placeholders outside quoted literals, as `(byte range, N)`.
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            // A doubled quote inside a literal toggles twice and stays inside.
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(n) = sql[start..end].parse::<usize>() {
                    found.push((i..end, n));
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// Inline bound text parameters as quoted literals in one left-to-right
/// pass, so text inside a bound value is never treated as a placeholder.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|idx| params.get(idx)) else {
            continue;
        };
        out.push_str(&sql[copied..range.start]);
        match param {
            Some(raw) => {
                let text = String::from_utf8_lossy(raw.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = range.end;
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoomholdFactory {
    handler: Arc<RoomholdHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<RoomholdAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RoomholdFactory {
    pub fn new(service: Arc<HoldService>, password: String) -> Self {
        let auth_source = RoomholdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoomholdHandler::new(service)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomholdFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// SQLSTATE for each hold error.
pub fn sqlstate(e: &HoldError) -> &'static str {
    match e {
        HoldError::InvalidRequest(_) => "22023",
        HoldError::NoAvailability => "23P01",
        HoldError::IdempotencyKeyConflict => "23505",
        HoldError::HoldNotFound(_) => "P0002",
        HoldError::HoldExpired(_) | HoldError::HoldStatusConflict { .. } => "55000",
        HoldError::Storage(_) | HoldError::Catalog(_) | HoldError::Encoding(_) => "XX000",
    }
}

fn hold_err(e: HoldError) -> PgWireError {
    if matches!(e.category(), crate::error::ErrorCategory::Unexpected) {
        tracing::error!("unexpected failure: {e}");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        format!("{}: {e}", e.code()),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
