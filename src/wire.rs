use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::VacancyAuthSource;
use crate::calendar::CalendarDay;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::service::{check_availability, AvailabilityFilters, AvailabilityOutcome, AvailabilityRequest, CheckError};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct VacancyHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<VacancyQueryParser>,
}

impl VacancyHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(VacancyQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertProperty { id, name, active } => {
                engine.create_property(id, name, active).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::DeleteProperty { id } => {
                engine.deactivate_property(id).await.map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::InsertRoomType {
                id,
                property_id,
                name,
                active,
            } => {
                engine
                    .create_room_type(id, property_id, name, active)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::DeleteRoomType { id } => {
                engine.deactivate_room_type(id).await.map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::InsertRooms { rooms } => {
                let count = rooms.len();
                for (id, room_type_id, number, status) in rooms {
                    engine
                        .add_room(id, room_type_id, number, status)
                        .await
                        .map_err(engine_err)?;
                }
                Ok(inserted(count))
            }
            Command::DeleteRoom { id } => {
                engine
                    .set_room_status(id, RoomStatus::Retired)
                    .await
                    .map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::SetRoomStatus { room_id, status } => {
                engine.set_room_status(room_id, status).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertReservation {
                id,
                room_type_id,
                check_in,
                check_out,
                status,
            } => {
                let window = stay(check_in, check_out)?;
                engine
                    .record_reservation(id, room_type_id, window, status)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::BatchInsertReservations { reservations } => {
                let count = reservations.len();
                let batch = reservations
                    .into_iter()
                    .map(|(id, room_type_id, ci, co, status)| -> PgWireResult<_> {
                        Ok((id, room_type_id, stay(ci, co)?, status))
                    })
                    .collect::<PgWireResult<Vec<_>>>()?;
                engine
                    .batch_record_reservations(batch)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(count))
            }
            Command::DeleteReservation { id } => {
                engine
                    .set_reservation_status(id, ReservationStatus::Cancelled)
                    .await
                    .map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::SetReservationStatus { reservation_id, status } => {
                engine
                    .set_reservation_status(reservation_id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::SelectProperties => encode_rows(properties_schema(), engine.list_properties(), |e, p| {
                e.encode_field(&p.id.to_string())?;
                e.encode_field(&p.name)?;
                e.encode_field(&p.active)
            }),
            Command::SelectRoomTypes { property_id } => {
                let room_types = engine.list_room_types(property_id).await;
                encode_rows(room_types_schema(), room_types, |e, rt| {
                    e.encode_field(&rt.id.to_string())?;
                    e.encode_field(&rt.property_id.to_string())?;
                    e.encode_field(&rt.name)?;
                    e.encode_field(&rt.active)
                })
            }
            Command::SelectRooms { room_type_id } => {
                let rooms = engine.list_rooms(room_type_id).await.map_err(engine_err)?;
                encode_rows(rooms_schema(), rooms, |e, r| {
                    e.encode_field(&r.id.to_string())?;
                    e.encode_field(&r.room_type_id.to_string())?;
                    e.encode_field(&r.number)?;
                    e.encode_field(&r.status.to_string())
                })
            }
            Command::SelectReservations { room_type_id } => {
                let reservations = engine.list_reservations(room_type_id).await.map_err(engine_err)?;
                encode_rows(reservations_schema(), reservations, |e, r| {
                    e.encode_field(&r.id.to_string())?;
                    e.encode_field(&r.room_type_id.to_string())?;
                    e.encode_field(&r.window.check_in().to_string())?;
                    e.encode_field(&r.window.check_out().to_string())?;
                    e.encode_field(&r.status.to_string())
                })
            }
            Command::SelectAvailability { filters } => {
                let nights = match availability(engine, &filters).await? {
                    AvailabilityOutcome::Computed(report) => report.result.per_night,
                    AvailabilityOutcome::NoRoomsOfType { .. } => Vec::new(),
                };
                encode_rows(availability_schema(), nights, |e, n| {
                    e.encode_field(&n.date.to_string())?;
                    e.encode_field(&i64::from(n.available_rooms))?;
                    e.encode_field(&i64::from(n.total_rooms))
                })
            }
            Command::SelectAvailabilitySummary { filters } => {
                let outcome = availability(engine, &filters).await?;
                let row = SummaryRow::from_outcome(&outcome)?;
                encode_rows(availability_summary_schema(), vec![row], |e, s| {
                    e.encode_field(&s.property_id)?;
                    e.encode_field(&s.room_type_id)?;
                    e.encode_field(&s.check_in)?;
                    e.encode_field(&s.check_out)?;
                    e.encode_field(&s.nights)?;
                    e.encode_field(&s.total_rooms)?;
                    e.encode_field(&s.min_available_rooms)?;
                    e.encode_field(&s.is_available)?;
                    e.encode_field(&s.outcome)?;
                    e.encode_field(&s.message)?;
                    e.encode_field(&s.per_night)
                })
            }
        }
    }
}

async fn availability(engine: &Engine, filters: &AvailabilityFilters) -> PgWireResult<AvailabilityOutcome> {
    let request = AvailabilityRequest::parse(filters, CalendarDay::today()).map_err(check_err)?;
    check_availability(engine, engine, &request).await.map_err(check_err)
}

fn stay(check_in: CalendarDay, check_out: CalendarDay) -> PgWireResult<StayWindow> {
    StayWindow::new(check_in, check_out).map_err(|e| engine_err(e.into()))
}

fn inserted(rows: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(rows))
}

fn deleted(rows: usize) -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(rows))
}

fn encode_rows<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// The single row of `availability_summary`.
struct SummaryRow {
    property_id: String,
    room_type_id: String,
    check_in: String,
    check_out: String,
    nights: i64,
    total_rooms: i64,
    min_available_rooms: i64,
    is_available: bool,
    outcome: String,
    message: String,
    per_night: String,
}

impl SummaryRow {
    fn from_outcome(outcome: &AvailabilityOutcome) -> PgWireResult<Self> {
        let message = outcome.message();
        let label = outcome.label();
        match outcome {
            AvailabilityOutcome::Computed(report) => Ok(Self {
                property_id: report.property_id.to_string(),
                room_type_id: report.room_type_id.to_string(),
                check_in: report.check_in.to_string(),
                check_out: report.check_out.to_string(),
                nights: i64::from(report.result.nights),
                total_rooms: report
                    .result
                    .per_night
                    .first()
                    .map_or(0, |n| i64::from(n.total_rooms)),
                min_available_rooms: i64::from(report.result.min_available_rooms),
                is_available: report.result.is_available,
                outcome: label.to_string(),
                message,
                per_night: serde_json::to_string(&report.result.per_night)
                    .map_err(|e| PgWireError::ApiError(Box::new(e)))?,
            }),
            AvailabilityOutcome::NoRoomsOfType {
                property_id,
                room_type_id,
                check_in,
                check_out,
            } => Ok(Self {
                property_id: property_id.to_string(),
                room_type_id: room_type_id.to_string(),
                check_in: check_in.to_string(),
                check_out: check_out.to_string(),
                nights: check_in.days_until(*check_out),
                total_rooms: 0,
                min_available_rooms: 0,
                is_available: false,
                outcome: label.to_string(),
                message,
                per_night: "[]".into(),
            }),
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn properties_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("name"), boolean("active")]
}

fn room_types_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("property_id"), text("name"), boolean("active")]
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("room_type_id"), text("number"), text("status")]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("room_type_id"),
        text("check_in"),
        text("check_out"),
        text("status"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![text("date"), int8("available_rooms"), int8("total_rooms")]
}

fn availability_summary_schema() -> Vec<FieldInfo> {
    vec![
        text("property_id"),
        text("room_type_id"),
        text("check_in"),
        text("check_out"),
        int8("nights"),
        int8("total_rooms"),
        int8("min_available_rooms"),
        boolean("is_available"),
        text("outcome"),
        text("message"),
        text("per_night"),
    ]
}

/// Columns a statement returns; empty for writes and unparseable input.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::select_table(sql).as_deref() {
        Some("properties") => properties_schema(),
        Some("room_types") => room_types_schema(),
        Some("rooms") => rooms_schema(),
        Some("reservations") => reservations_schema(),
        Some("availability") => availability_schema(),
        Some("availability_summary") => availability_summary_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for VacancyHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        Ok(vec![self.run(&engine, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct VacancyQueryParser;

#[async_trait]
impl QueryParser for VacancyQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for VacancyHandler {
    type Statement = String;
    type QueryParser = VacancyQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        self.run(&engine, &sql).await
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
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
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
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound parameters as quoted text literals. Highest index first so
/// `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.clone();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Factory ──────────────────────────────────────────────────────

pub struct VacancyFactory {
    handler: Arc<VacancyHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<VacancyAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl VacancyFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(VacancyHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                VacancyAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for VacancyFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = VacancyFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "P0002",
        EngineError::InvalidWindow(_) => "22023",
        _ => "P0001",
    }
}

fn check_sqlstate(e: &CheckError) -> &'static str {
    match e {
        CheckError::InvalidInput(_) => "22023",
        CheckError::PropertyNotFound(_) | CheckError::RoomTypeNotFound(_) => "P0002",
        CheckError::Storage(_) => "P0001",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn check_err(e: CheckError) -> PgWireError {
    user_error(check_sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
