use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::StartupHandler;
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat,
    FieldInfo, QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::engine::{Engine, EngineError, ErrorCategory, OccupancyReport};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, ReservationFilter};

pub struct DineSpaceHandler {
    engine: Arc<Engine>,
    query_parser: Arc<DineSpaceQueryParser>,
}

impl DineSpaceHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(DineSpaceQueryParser),
        }
    }

    /// Parse, execute and record one statement.
    async fn run(&self, sql: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertRestaurant {
                id: None,
                draft,
                returning,
            } => {
                let restaurant = engine.create_restaurant(draft).await.map_err(engine_err)?;
                Ok(vec![inserted(returning, restaurant_schema(), || {
                    restaurant_row(&restaurant)
                })?])
            }
            Command::InsertRestaurant {
                id: Some(id),
                draft,
                returning,
            } => {
                let restaurant = engine
                    .replace_restaurant(id, draft)
                    .await
                    .map_err(engine_err)?
                    .ok_or_else(|| engine_err(EngineError::RestaurantNotFound(id)))?;
                Ok(vec![inserted(returning, restaurant_schema(), || {
                    restaurant_row(&restaurant)
                })?])
            }
            Command::SelectRestaurants { id } => {
                let restaurants = match id {
                    Some(id) => vec![engine
                        .get_restaurant(&id)
                        .await
                        .ok_or_else(|| engine_err(EngineError::RestaurantNotFound(id)))?],
                    None => engine.list_restaurants().await,
                };
                let rows = restaurants.iter().map(restaurant_row).collect();
                Ok(vec![query_response(restaurant_schema(), rows)])
            }
            Command::DeleteRestaurant { id } => {
                let deleted = engine.delete_restaurant(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(deleted as usize))])
            }
            Command::InsertSpace {
                restaurant_id,
                draft,
                returning,
            } => {
                let (_, space) = engine
                    .add_space(restaurant_id, draft)
                    .await
                    .map_err(engine_err)?
                    .ok_or_else(|| engine_err(EngineError::RestaurantNotFound(restaurant_id)))?;
                Ok(vec![inserted(returning, space_schema(), || {
                    space_row(engine, &restaurant_id, &space)
                })?])
            }
            Command::SelectSpaces { restaurant_id } => {
                let restaurant = engine
                    .get_restaurant(&restaurant_id)
                    .await
                    .ok_or_else(|| engine_err(EngineError::RestaurantNotFound(restaurant_id)))?;
                let rows = restaurant
                    .spaces
                    .iter()
                    .map(|space| space_row(engine, &restaurant_id, space))
                    .collect();
                Ok(vec![query_response(space_schema(), rows)])
            }
            Command::DeleteSpace { restaurant_id, id } => {
                let removed = engine
                    .remove_space(restaurant_id, id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(
                    Tag::new("DELETE").with_rows(removed.is_some() as usize),
                )])
            }
            Command::InsertReservation { draft, returning } => {
                let reservation = engine.create_reservation(draft).await.map_err(engine_err)?;
                Ok(vec![inserted(returning, reservation_schema(), || {
                    reservation_row(&reservation)
                })?])
            }
            Command::SelectReservations { filter } => {
                let reservations = match filter {
                    ReservationFilter::All => engine.list_reservations().await,
                    ReservationFilter::Id(id) => {
                        vec![engine.require_reservation(&id).await.map_err(engine_err)?]
                    }
                    ReservationFilter::Restaurant(rid) => engine.reservations_for_restaurant(&rid).await,
                    ReservationFilter::Space(rid, sid) => engine.reservations_for_space(&rid, &sid).await,
                };
                let rows = reservations.iter().map(reservation_row).collect();
                Ok(vec![query_response(reservation_schema(), rows)])
            }
            Command::DeleteReservation { id } => {
                let deleted = engine.delete_reservation(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(deleted as usize))])
            }
            Command::SelectOccupancy {
                restaurant_id,
                space_id,
                start,
                end,
            } => {
                let occupancy = engine
                    .calculate_occupancy(&restaurant_id, &space_id, start, end)
                    .await
                    .map_err(engine_err)?;
                let space = engine
                    .get_space(&restaurant_id, &space_id)
                    .await
                    .ok_or_else(|| engine_err(EngineError::SpaceNotFound { restaurant_id, space_id }))?;

                let schema = Arc::new(occupancy_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&restaurant_id.to_string())?;
                encoder.encode_field(&space_id.to_string())?;
                encoder.encode_field(&format_date_time(start))?;
                encoder.encode_field(&format_date_time(end))?;
                encoder.encode_field(&(occupancy as i64))?;
                encoder.encode_field(&(space.max_capacity as i64))?;
                encoder.encode_field(&(space.max_capacity.saturating_sub(occupancy) as i64))?;
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(vec![Ok(encoder.take_row())]),
                ))])
            }
            Command::SelectOccupancyReport { query } => {
                let report = engine.occupancy_report(&query).await.map_err(engine_err)?;
                let rows = report_rows(&report);
                Ok(vec![query_response(report_schema(), rows)])
            }
            Command::SelectOccupancySummary { query } => {
                let report = engine.occupancy_report(&query).await.map_err(engine_err)?;
                Ok(vec![query_response(summary_schema(), vec![summary_row(&report)])])
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

type Row = Vec<Field>;

/// One encodable cell.
enum Field {
    Text(String),
    Int(i64),
    Float(f64),
}

fn text(v: impl ToString) -> Field {
    Field::Text(v.to_string())
}

fn int(v: impl Into<i64>) -> Field {
    Field::Int(v.into())
}

fn column(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn encode_row(schema: &Arc<Vec<FieldInfo>>, row: Row) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    for field in row {
        match field {
            Field::Text(v) => encoder.encode_field(&v)?,
            Field::Int(v) => encoder.encode_field(&v)?,
            Field::Float(v) => encoder.encode_field(&v)?,
        }
    }
    Ok(encoder.take_row())
}

fn query_response(schema: Vec<FieldInfo>, rows: Vec<Row>) -> Response {
    let schema = Arc::new(schema);
    let encoded: Vec<PgWireResult<DataRow>> = rows
        .into_iter()
        .map(|row| encode_row(&schema, row))
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(encoded)))
}

/// `INSERT 0 1`, or the new row when the statement asked for RETURNING.
fn inserted(
    returning: bool,
    schema: Vec<FieldInfo>,
    row: impl FnOnce() -> Row,
) -> PgWireResult<Response> {
    if returning {
        Ok(query_response(schema, vec![row()]))
    } else {
        Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
    }
}

fn restaurant_schema() -> Vec<FieldInfo> {
    vec![
        column("id", Type::VARCHAR),
        column("name", Type::VARCHAR),
        column("address", Type::VARCHAR),
        column("cuisine_type", Type::VARCHAR),
        column("capacity", Type::INT8),
        column("space_count", Type::INT8),
    ]
}

fn restaurant_row(r: &Restaurant) -> Row {
    vec![
        text(r.id),
        text(&r.name),
        text(&r.address),
        text(&r.cuisine_type),
        int(r.capacity),
        int(r.spaces.len() as i64),
    ]
}

fn space_schema() -> Vec<FieldInfo> {
    vec![
        column("restaurant_id", Type::VARCHAR),
        column("id", Type::VARCHAR),
        column("name", Type::VARCHAR),
        column("min_capacity", Type::INT8),
        column("max_capacity", Type::INT8),
        column("operating_start", Type::VARCHAR),
        column("operating_end", Type::VARCHAR),
        column("slot_minutes", Type::INT8),
    ]
}

/// Hours and slot length are reported after defaults are applied.
fn space_row(engine: &Engine, restaurant_id: &ulid::Ulid, space: &Space) -> Row {
    let schedule = engine.effective_schedule(space);
    vec![
        text(restaurant_id),
        text(space.id),
        text(&space.name),
        int(space.min_capacity),
        int(space.max_capacity),
        text(schedule.opens.format("%H:%M")),
        text(schedule.closes.format("%H:%M")),
        int(schedule.slot_minutes),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        column("id", Type::VARCHAR),
        column("restaurant_id", Type::VARCHAR),
        column("space_id", Type::VARCHAR),
        column("customer_email", Type::VARCHAR),
        column("start_time", Type::VARCHAR),
        column("end_time", Type::VARCHAR),
        column("party_size", Type::INT8),
        column("status", Type::VARCHAR),
    ]
}

fn reservation_row(r: &Reservation) -> Row {
    vec![
        text(r.id),
        text(r.restaurant_id),
        text(r.space_id),
        text(&r.customer_email),
        text(format_date_time(r.span.start)),
        text(format_date_time(r.span.end)),
        int(r.party_size),
        text(&r.status),
    ]
}

fn occupancy_schema() -> Vec<FieldInfo> {
    vec![
        column("restaurant_id", Type::VARCHAR),
        column("space_id", Type::VARCHAR),
        column("start_time", Type::VARCHAR),
        column("end_time", Type::VARCHAR),
        column("occupancy", Type::INT8),
        column("max_capacity", Type::INT8),
        column("available", Type::INT8),
    ]
}

fn report_schema() -> Vec<FieldInfo> {
    vec![
        column("space_id", Type::VARCHAR),
        column("space_name", Type::VARCHAR),
        column("max_capacity", Type::INT8),
        column("total_reservations", Type::INT8),
        column("total_guests", Type::INT8),
        column("peak_occupancy", Type::INT8),
        column("average_utilization", Type::FLOAT8),
        column("hourly_breakdown", Type::VARCHAR),
    ]
}

fn report_rows(report: &OccupancyReport) -> Vec<Row> {
    report
        .space_reports
        .iter()
        .map(|s| {
            let breakdown = serde_json::to_string(&s.hourly_breakdown).unwrap_or_default();
            vec![
                text(s.space_id),
                text(&s.space_name),
                int(s.max_capacity),
                int(s.total_reservations as i64),
                int(s.total_guests as i64),
                int(s.peak_occupancy),
                Field::Float(s.average_utilization),
                Field::Text(breakdown),
            ]
        })
        .collect()
}

fn summary_schema() -> Vec<FieldInfo> {
    vec![
        column("restaurant_id", Type::VARCHAR),
        column("report_start_time", Type::VARCHAR),
        column("report_end_time", Type::VARCHAR),
        column("total_reservations", Type::INT8),
        column("total_guests", Type::INT8),
        column("peak_occupancy", Type::INT8),
        column("average_utilization", Type::FLOAT8),
        column("overall_utilization", Type::FLOAT8),
        column("page", Type::INT8),
        column("size", Type::INT8),
        column("total_elements", Type::INT8),
        column("total_pages", Type::INT8),
    ]
}

fn summary_row(report: &OccupancyReport) -> Row {
    let s = &report.summary;
    vec![
        text(report.restaurant_id),
        text(format_date_time(report.report_start_time)),
        text(format_date_time(report.report_end_time)),
        int(s.total_reservations as i64),
        int(s.total_guests as i64),
        int(s.peak_occupancy),
        Field::Float(s.average_utilization),
        Field::Float(s.overall_utilization),
        int(report.page),
        int(report.size),
        int(report.total_elements as i64),
        int(report.total_pages),
    ]
}

/// Result columns for a statement, judged from its text so that prepared
/// statements with unbound parameters can be described.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let is_select = lower.trim_start().starts_with("select");
    if !is_select && !lower.contains("returning") {
        return vec![];
    }
    let table = [
        "occupancy_report",
        "occupancy_summary",
        "occupancy",
        "reservations",
        "spaces",
        "restaurants",
    ]
    .into_iter()
    .find(|t| lower.contains(&format!("from {t}")) || lower.contains(&format!("into {t}")));

    match table {
        Some("occupancy_report") => report_schema(),
        Some("occupancy_summary") => summary_schema(),
        Some("occupancy") => occupancy_schema(),
        Some("reservations") => reservation_schema(),
        Some("spaces") => space_schema(),
        Some("restaurants") => restaurant_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for DineSpaceHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct DineSpaceQueryParser;

#[async_trait]
impl QueryParser for DineSpaceQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for DineSpaceHandler {
    type Statement = String;
    type QueryParser = DineSpaceQueryParser;

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
        let sql = substitute_params(portal);
        let mut responses = self.run(&sql).await?;
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        result = result.replace(&format!("${}", i + 1), &param_literal(param.as_deref()));
    }
    result
}

fn param_literal(param: Option<&[u8]>) -> String {
    match param {
        Some(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            format!("'{}'", text.replace('\'', "''"))
        }
        None => "NULL".to_string(),
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct DineSpaceFactory {
    handler: Arc<DineSpaceHandler>,
    noop: Arc<NoopHandler>,
}

impl DineSpaceFactory {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            handler: Arc::new(DineSpaceHandler::new(engine)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for DineSpaceFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.noop.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, DineSpaceFactory::new(engine)).await
}

fn sqlstate(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::NotFound => "P0002",
        ErrorCategory::Validation => "22023",
        ErrorCategory::Conflict => "23P01",
        ErrorCategory::Internal => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(e.category()).into(),
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
