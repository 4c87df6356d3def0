use std::fmt::Debug;
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
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{Actor, AdminList, SharedPasswordAuth};
use crate::engine::{Engine, EngineError, ErrorKind};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};

pub struct FleetHandler {
    engine: Arc<Engine>,
    admins: Arc<AdminList>,
    query_parser: Arc<FleetQueryParser>,
}

impl FleetHandler {
    pub fn new(engine: Arc<Engine>, admins: Arc<AdminList>) -> Self {
        Self {
            engine,
            admins,
            query_parser: Arc::new(FleetQueryParser),
        }
    }

    /// The login name from the startup packet decides who the session acts as.
    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<Actor> {
        let user = client.metadata().get("user").cloned().ok_or_else(|| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "28000".into(),
                "no user in startup packet".into(),
            )))
        })?;
        Ok(self.admins.resolve(&user))
    }

    /// Execute with RED metrics around it.
    async fn run(&self, actor: &Actor, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(actor, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, actor: &Actor, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertVehicle { input, upsert } => {
                if upsert && engine.get_vehicle_state(&input.id).is_some() {
                    engine.update_vehicle(actor, input).await.map_err(engine_err)?;
                } else {
                    engine.create_vehicle(actor, input).await.map_err(engine_err)?;
                }
                Ok(vec![insert_tag()])
            }
            Command::DeleteVehicle { id } => {
                engine.delete_vehicle(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectVehicle { id } => {
                let vehicle = engine.get_vehicle(id).await.map_err(engine_err)?;
                Ok(vec![vehicle_rows(vec![vehicle], 1)])
            }
            Command::SearchVehicles { params } => {
                let query = params
                    .into_query()
                    .map_err(|e| engine_err(EngineError::from(e)))?;
                let result = engine.search_vehicles(&query).await;
                Ok(vec![vehicle_rows(result.items, result.total)])
            }
            Command::InsertExtra {
                id,
                name,
                price_per_day,
            } => {
                let extra = Extra {
                    id,
                    name,
                    price_per_day,
                };
                engine.create_extra(actor, extra).await.map_err(engine_err)?;
                Ok(vec![insert_tag()])
            }
            Command::SelectExtras { ids } => {
                let extras = match ids {
                    Some(ids) => engine.extras_by_ids(&ids),
                    None => engine.list_extras(),
                };
                Ok(vec![extra_rows(extras)])
            }
            Command::InsertReservation { request } => {
                engine
                    .create_reservation(actor, request)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![insert_tag()])
            }
            Command::CancelReservation { id } => {
                engine
                    .cancel_reservation(actor, id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SetReservationStatus { id, status } => {
                engine
                    .set_reservation_status(actor, id, &status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![insert_tag()])
            }
            Command::SelectReservations => {
                let reservations = engine.list_reservations(actor).await;
                Ok(vec![reservation_rows(reservations)])
            }
            Command::SelectAvailability { vehicle_id } => {
                let ranges = engine.blocked_ranges(vehicle_id).await;
                Ok(vec![availability_rows(vehicle_id, ranges)])
            }
            Command::InsertReview { request } => {
                engine.add_review(actor, request).await.map_err(engine_err)?;
                Ok(vec![insert_tag()])
            }
            Command::SelectReviews { vehicle_id } => {
                let summary = engine.reviews(vehicle_id).await.map_err(engine_err)?;
                Ok(vec![review_rows(summary)])
            }
            Command::SelectDashboard => Ok(vec![dashboard_rows(engine.fleet_metrics().await)]),
        }
    }
}

fn insert_tag() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn vehicle_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("brand", Type::VARCHAR),
        text_field("model", Type::VARCHAR),
        text_field("year", Type::INT4),
        text_field("category", Type::VARCHAR),
        text_field("transmission", Type::VARCHAR),
        text_field("fuel", Type::VARCHAR),
        text_field("seats", Type::INT8),
        text_field("daily_price", Type::VARCHAR),
        text_field("status", Type::VARCHAR),
        text_field("mileage", Type::INT8),
        text_field("description", Type::VARCHAR),
        text_field("images", Type::VARCHAR),
        text_field("created_at", Type::INT8),
        text_field("total_count", Type::INT8),
    ]
}

fn extra_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("price_per_day", Type::VARCHAR),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("car_id", Type::VARCHAR),
        text_field("customer_id", Type::VARCHAR),
        text_field("customer_name", Type::VARCHAR),
        text_field("start_date", Type::VARCHAR),
        text_field("end_date", Type::VARCHAR),
        text_field("pickup_location", Type::VARCHAR),
        text_field("dropoff_location", Type::VARCHAR),
        text_field("notes", Type::VARCHAR),
        text_field("status", Type::VARCHAR),
        text_field("total_price", Type::VARCHAR),
        text_field("extras", Type::VARCHAR),
        text_field("created_at", Type::INT8),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("car_id", Type::VARCHAR),
        text_field("start_date", Type::VARCHAR),
        text_field("end_date", Type::VARCHAR),
        text_field("status", Type::VARCHAR),
    ]
}

fn review_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("car_id", Type::VARCHAR),
        text_field("customer_id", Type::VARCHAR),
        text_field("customer_name", Type::VARCHAR),
        text_field("rating", Type::INT4),
        text_field("comment", Type::VARCHAR),
        text_field("created_at", Type::INT8),
        text_field("average_rating", Type::FLOAT8),
        text_field("total_count", Type::INT8),
    ]
}

fn dashboard_schema() -> Vec<FieldInfo> {
    vec![
        text_field("total_cars", Type::INT8),
        text_field("available_cars", Type::INT8),
        text_field("active_rentals", Type::INT8),
        text_field("pending_reservations", Type::INT8),
        text_field("revenue", Type::VARCHAR),
    ]
}

/// Schema a SELECT will produce, judged from the table it reads.
fn schema_for_statement(stmt: &str) -> Vec<FieldInfo> {
    match sql::select_table(stmt).as_deref() {
        Some("vehicles" | "cars") => vehicle_schema(),
        Some("extras") => extra_schema(),
        Some("reservations") => reservation_schema(),
        Some("availability") => availability_schema(),
        Some("reviews") => review_schema(),
        Some("dashboard") => dashboard_schema(),
        _ => vec![],
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn query_response(schema: Vec<FieldInfo>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(Arc::new(schema), stream::iter(rows)))
}

fn as_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn vehicle_rows(vehicles: Vec<Vehicle>, total: usize) -> Response {
    let schema = Arc::new(vehicle_schema());
    let total = as_i64(total);
    let rows = vehicles
        .into_iter()
        .map(|v| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&v.id.to_string())?;
            encoder.encode_field(&v.brand)?;
            encoder.encode_field(&v.model)?;
            encoder.encode_field(&v.year)?;
            encoder.encode_field(&v.category.to_string())?;
            encoder.encode_field(&v.transmission.to_string())?;
            encoder.encode_field(&v.fuel.to_string())?;
            encoder.encode_field(&i64::from(v.seats))?;
            encoder.encode_field(&v.daily_price.to_string())?;
            encoder.encode_field(&v.status.to_string())?;
            encoder.encode_field(&i64::from(v.mileage))?;
            encoder.encode_field(&v.description)?;
            encoder.encode_field(&v.images.join(","))?;
            encoder.encode_field(&v.created_at)?;
            encoder.encode_field(&total)?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(vehicle_schema(), rows)
}

fn extra_rows(extras: Vec<Extra>) -> Response {
    let schema = Arc::new(extra_schema());
    let rows = extras
        .into_iter()
        .map(|e| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&e.id.to_string())?;
            encoder.encode_field(&e.name)?;
            encoder.encode_field(&e.price_per_day.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(extra_schema(), rows)
}

fn reservation_rows(reservations: Vec<Reservation>) -> Response {
    let schema = Arc::new(reservation_schema());
    let rows = reservations
        .into_iter()
        .map(|r| {
            let extras: Vec<&str> = r.extras.iter().map(|e| e.name.as_str()).collect();
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.vehicle_id.to_string())?;
            encoder.encode_field(&r.customer_id)?;
            encoder.encode_field(&r.customer_name)?;
            encoder.encode_field(&r.span.start.to_string())?;
            encoder.encode_field(&r.span.end.to_string())?;
            encoder.encode_field(&r.pickup_location)?;
            encoder.encode_field(&r.dropoff_location)?;
            encoder.encode_field(&r.notes)?;
            encoder.encode_field(&r.status.to_string())?;
            encoder.encode_field(&r.total_price.to_string())?;
            encoder.encode_field(&extras.join(","))?;
            encoder.encode_field(&r.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(reservation_schema(), rows)
}

fn availability_rows(vehicle_id: ulid::Ulid, ranges: Vec<BlockedRange>) -> Response {
    let schema = Arc::new(availability_schema());
    let vid = vehicle_id.to_string();
    let rows = ranges
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&vid)?;
            encoder.encode_field(&b.start.to_string())?;
            encoder.encode_field(&b.end.to_string())?;
            encoder.encode_field(&b.status.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(availability_schema(), rows)
}

/// One row per review; the summary columns repeat on every row.
fn review_rows(summary: ReviewSummary) -> Response {
    let schema = Arc::new(review_schema());
    let total = as_i64(summary.total);
    let average = summary.average_rating;
    let rows = summary
        .items
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.vehicle_id.to_string())?;
            encoder.encode_field(&r.customer_id)?;
            encoder.encode_field(&r.customer_name)?;
            encoder.encode_field(&i32::from(r.rating))?;
            encoder.encode_field(&r.comment)?;
            encoder.encode_field(&r.created_at)?;
            encoder.encode_field(&average)?;
            encoder.encode_field(&total)?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(review_schema(), rows)
}

fn dashboard_rows(m: FleetMetrics) -> Response {
    let row = dashboard_row(&m, Arc::new(dashboard_schema()));
    query_response(dashboard_schema(), vec![row])
}

fn dashboard_row(m: &FleetMetrics, schema: Arc<Vec<FieldInfo>>) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema);
    encoder.encode_field(&as_i64(m.total_vehicles))?;
    encoder.encode_field(&as_i64(m.available_vehicles))?;
    encoder.encode_field(&as_i64(m.active_rentals))?;
    encoder.encode_field(&as_i64(m.pending_reservations))?;
    encoder.encode_field(&m.revenue.to_string())?;
    Ok(encoder.take_row())
}

#[async_trait]
impl SimpleQueryHandler for FleetHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let actor = self.resolve_actor(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run(&actor, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct FleetQueryParser;

#[async_trait]
impl QueryParser for FleetQueryParser {
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
        Ok(schema_for_statement(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for FleetHandler {
    type Statement = String;
    type QueryParser = FleetQueryParser;

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
        let actor = self.resolve_actor(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run(&actor, cmd).await?;
        if responses.is_empty() {
            return Ok(Response::EmptyQuery);
        }
        Ok(responses.remove(0))
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
            schema_for_statement(&target.statement),
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
        Ok(DescribePortalResponse::new(schema_for_statement(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let mut max = 0;
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        rest = &rest[pos + 1..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if let Ok(n) = rest[..digits].parse::<usize>() {
            max = max.max(n);
        }
        rest = &rest[digits..];
    }
    max
}

/// Inline bound text parameters as quoted literals. Highest index first so
/// `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.clone();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let literal = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &literal);
    }
    sql
}

// ── Factory ──────────────────────────────────────────────────────

pub struct FleetFactory {
    handler: Arc<FleetHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SharedPasswordAuth, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl FleetFactory {
    pub fn new(engine: Arc<Engine>, password: String, admins: Arc<AdminList>) -> Self {
        Self {
            handler: Arc::new(FleetHandler::new(engine, admins)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SharedPasswordAuth::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for FleetFactory {
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
    engine: Arc<Engine>,
    password: String,
    admins: Arc<AdminList>,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = FleetFactory::new(engine, password, admins);
    pgwire::tokio::process_socket(socket, tls, Arc::new(factory)).await
}

/// SQLSTATE for an engine failure.
fn sqlstate(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Validation => "22023",
        ErrorKind::Conflict => "23P01",
        ErrorKind::NotFound => "02000",
        ErrorKind::Forbidden => "42501",
        ErrorKind::Internal => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(e.kind()).into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
