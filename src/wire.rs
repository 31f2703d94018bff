use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use futures::Sink;
use futures::stream;
use pgwire::api::auth::StartupHandler;
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
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::engine::{Engine, EngineError, ErrorKind};
use crate::export::{EXPORT_COLUMNS, export_rows};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, OccupancyQuery, SqlError};

pub struct ReactoplanHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ReactoplanQueryParser>,
}

impl ReactoplanHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ReactoplanQueryParser),
        }
    }

    /// Parse, execute and record RED metrics for one statement.
    async fn run(&self, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertReactor(reactor) => {
                engine.register_reactor(reactor).await.map_err(engine_err)?;
                Ok(vec![tag("INSERT", 1)])
            }
            Command::UpdateReactor { serial_no, patch } => {
                engine
                    .update_reactor(&serial_no, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![tag("UPDATE", 1)])
            }
            Command::DeleteReactor { serial_no } => {
                engine.remove_reactor(&serial_no).await.map_err(engine_err)?;
                Ok(vec![tag("DELETE", 1)])
            }
            Command::InsertBooking(new) => {
                engine.create_booking(new).await.map_err(engine_err)?;
                Ok(vec![tag("INSERT", 1)])
            }
            Command::BatchInsertBookings(batch) => {
                let committed = engine.create_bookings(batch).await.map_err(engine_err)?;
                Ok(vec![tag("INSERT", committed.len())])
            }
            Command::UpdateBooking { id, patch } => {
                engine.update_booking(id, patch).await.map_err(engine_err)?;
                Ok(vec![tag("UPDATE", 1)])
            }
            Command::DeleteBooking { id } => {
                engine.delete_booking(id).await.map_err(engine_err)?;
                Ok(vec![tag("DELETE", 1)])
            }
            Command::InsertDowntime(new) => {
                engine.create_downtime(new).await.map_err(engine_err)?;
                Ok(vec![tag("INSERT", 1)])
            }
            Command::UpdateDowntime { id, patch } => {
                engine.update_downtime(id, patch).await.map_err(engine_err)?;
                Ok(vec![tag("UPDATE", 1)])
            }
            Command::CancelDowntime { id } => {
                engine.cancel_downtime(id, None).await.map_err(engine_err)?;
                Ok(vec![tag("DELETE", 1)])
            }
            Command::SelectReactors => {
                let reactors = engine.list_reactors().await;
                let schema = Arc::new(reactor_schema());
                let rows = reactors
                    .iter()
                    .map(|r| encode_reactor(&schema, r))
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectBookings { reactor_serial_no } => {
                let bookings = engine
                    .list_bookings(reactor_serial_no.as_deref())
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(booking_schema());
                let rows = bookings
                    .iter()
                    .map(|b| encode_booking(&schema, b))
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectDowntime { reactor_serial_no } => {
                let downtime = engine
                    .list_downtime(reactor_serial_no.as_deref())
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(downtime_schema());
                let rows = downtime
                    .iter()
                    .map(|d| encode_downtime(&schema, d))
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectConflicts {
                reactor_serial_no,
                start,
                end,
                exclude_id,
            } => {
                // Conflicts are the answer here, not a failure. Anything else
                // (unknown reactor, bad window) still errors.
                let message = match engine
                    .validate(&reactor_serial_no, start, end, exclude_id)
                    .await
                {
                    Ok(()) => None,
                    Err(e) if e.is_conflict() => Some(e.to_string()),
                    Err(e) => return Err(engine_err(e)),
                };
                let schema = Arc::new(conflict_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&message.is_none())?;
                encoder.encode_field(&message)?;
                Ok(vec![query_response(schema, vec![Ok(encoder.take_row())])])
            }
            Command::SelectOccupancy(q) => {
                let metrics = self.occupancy(&q).await?;
                let schema = Arc::new(occupancy_schema());
                let rows = metrics
                    .iter()
                    .map(|m| encode_metric(&schema, m))
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectOccupancyExport(q) => {
                let metrics = self.occupancy(&q).await?;
                let schema = Arc::new(export_schema());
                let rows = export_rows(&metrics)
                    .iter()
                    .map(|row| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        for cell in row.cells() {
                            encoder.encode_field(&cell)?;
                        }
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectInsights(q) => {
                let metrics = self.occupancy(&q).await?;
                let text = engine.insights(&metrics).await;
                let schema = Arc::new(insights_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&text)?;
                Ok(vec![query_response(schema, vec![Ok(encoder.take_row())])])
            }
        }
    }

    async fn occupancy(&self, q: &OccupancyQuery) -> PgWireResult<Vec<OccupancyMetric>> {
        self.engine
            .occupancy(
                q.start,
                q.end,
                q.plant_name.as_deref(),
                q.block_name.as_deref(),
            )
            .await
            .map_err(engine_err)
    }
}

fn tag(command: &str, rows: usize) -> Response {
    Response::Execution(Tag::new(command).with_rows(rows))
}

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Render epoch milliseconds as an RFC 3339 UTC timestamp.
fn format_ms(ms: Ms) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn reactor_schema() -> Vec<FieldInfo> {
    vec![
        field("serial_no", Type::VARCHAR),
        field("max_capacity_liters", Type::INT8),
        field("capacity_range", Type::VARCHAR),
        field("moc", Type::VARCHAR),
        field("agitator_type", Type::VARCHAR),
        field("plant_name", Type::VARCHAR),
        field("block_name", Type::VARCHAR),
        field("commission_date", Type::VARCHAR),
        field("notes", Type::VARCHAR),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("reactor_serial_no", Type::VARCHAR),
        field("team", Type::VARCHAR),
        field("product_name", Type::VARCHAR),
        field("stage", Type::VARCHAR),
        field("batch_number", Type::VARCHAR),
        field("operation", Type::VARCHAR),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("requested_by_email", Type::VARCHAR),
        field("created_at", Type::VARCHAR),
        field("updated_at", Type::VARCHAR),
    ]
}

fn downtime_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("reactor_serial_no", Type::VARCHAR),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("type", Type::VARCHAR),
        field("reason", Type::VARCHAR),
        field("updated_by_email", Type::VARCHAR),
        field("updated_at", Type::VARCHAR),
        field("is_cancelled", Type::BOOL),
    ]
}

fn conflict_schema() -> Vec<FieldInfo> {
    vec![field("ok", Type::BOOL), field("message", Type::VARCHAR)]
}

fn occupancy_schema() -> Vec<FieldInfo> {
    vec![
        field("reactor_serial_no", Type::VARCHAR),
        field("plant_name", Type::VARCHAR),
        field("block_name", Type::VARCHAR),
        field("window_start", Type::VARCHAR),
        field("window_end", Type::VARCHAR),
        field("available_hours", Type::FLOAT8),
        field("proposed_hours", Type::FLOAT8),
        field("proposed_percent", Type::FLOAT8),
        field("actual_hours", Type::FLOAT8),
        field("actual_percent", Type::FLOAT8),
        field("downtime_hours", Type::FLOAT8),
    ]
}

fn export_schema() -> Vec<FieldInfo> {
    EXPORT_COLUMNS
        .iter()
        .map(|name| field(name, Type::VARCHAR))
        .collect()
}

fn insights_schema() -> Vec<FieldInfo> {
    vec![field("insight", Type::VARCHAR)]
}

/// Result columns of a statement, decided from the table it selects from.
/// Writes have none.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match select_table(sql).as_deref() {
        Some("reactors") => reactor_schema(),
        Some("bookings") => booking_schema(),
        Some("downtime") => downtime_schema(),
        Some("conflicts") => conflict_schema(),
        Some("occupancy") => occupancy_schema(),
        Some("occupancy_export") => export_schema(),
        Some("insights") => insights_schema(),
        _ => vec![],
    }
}

/// The table named after `FROM` in a SELECT, lowercased and unquoted.
/// Works on statements that still carry `$n` placeholders.
fn select_table(sql: &str) -> Option<String> {
    let mut words = sql.split_whitespace();
    if !words.next()?.eq_ignore_ascii_case("select") {
        return None;
    }
    words
        .skip_while(|w| !w.eq_ignore_ascii_case("from"))
        .nth(1)
        .map(|t| t.trim_matches(|c| c == '"' || c == ';').to_lowercase())
}

// ── Row encoders ─────────────────────────────────────────────────

fn encode_reactor(schema: &Arc<Vec<FieldInfo>>, r: &Reactor) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&r.serial_no)?;
    encoder.encode_field(&i64::from(r.max_capacity_liters))?;
    encoder.encode_field(&r.capacity_range)?;
    encoder.encode_field(&r.moc)?;
    encoder.encode_field(&r.agitator_type)?;
    encoder.encode_field(&r.plant_name)?;
    encoder.encode_field(&r.block_name)?;
    encoder.encode_field(&r.commission_date.to_string())?;
    encoder.encode_field(&r.notes)?;
    Ok(encoder.take_row())
}

fn encode_booking(schema: &Arc<Vec<FieldInfo>>, b: &Booking) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.reactor_serial_no)?;
    encoder.encode_field(&b.team.as_str())?;
    encoder.encode_field(&b.product_name)?;
    encoder.encode_field(&b.stage)?;
    encoder.encode_field(&b.batch_number)?;
    encoder.encode_field(&b.operation)?;
    encoder.encode_field(&format_ms(b.span.start))?;
    encoder.encode_field(&format_ms(b.span.end))?;
    encoder.encode_field(&b.status.as_str())?;
    encoder.encode_field(&b.requested_by_email)?;
    encoder.encode_field(&format_ms(b.created_at))?;
    encoder.encode_field(&format_ms(b.updated_at))?;
    Ok(encoder.take_row())
}

fn encode_downtime(schema: &Arc<Vec<FieldInfo>>, d: &Downtime) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&d.id.to_string())?;
    encoder.encode_field(&d.reactor_serial_no)?;
    encoder.encode_field(&format_ms(d.span.start))?;
    encoder.encode_field(&format_ms(d.span.end))?;
    encoder.encode_field(&d.kind.as_str())?;
    encoder.encode_field(&d.reason)?;
    encoder.encode_field(&d.updated_by_email)?;
    encoder.encode_field(&format_ms(d.updated_at))?;
    encoder.encode_field(&d.is_cancelled)?;
    Ok(encoder.take_row())
}

fn encode_metric(schema: &Arc<Vec<FieldInfo>>, m: &OccupancyMetric) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&m.reactor_serial_no)?;
    encoder.encode_field(&m.plant_name)?;
    encoder.encode_field(&m.block_name)?;
    encoder.encode_field(&format_ms(m.window_start))?;
    encoder.encode_field(&format_ms(m.window_end))?;
    encoder.encode_field(&m.available_hours)?;
    encoder.encode_field(&m.proposed_hours)?;
    encoder.encode_field(&m.proposed_percent)?;
    encoder.encode_field(&m.actual_hours)?;
    encoder.encode_field(&m.actual_percent)?;
    encoder.encode_field(&m.downtime_hours)?;
    Ok(encoder.take_row())
}

#[async_trait]
impl SimpleQueryHandler for ReactoplanHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        debug!("simple query: {query}");
        self.run(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ReactoplanQueryParser;

#[async_trait]
impl QueryParser for ReactoplanQueryParser {
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
impl ExtendedQueryHandler for ReactoplanHandler {
    type Statement = String;
    type QueryParser = ReactoplanQueryParser;

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
        let responses = self.run(&sql).await?;
        responses
            .into_iter()
            .next()
            .ok_or_else(|| sql_err(SqlError::Empty))
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

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first so `$1` never eats the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.clone();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&format!("${}", i + 1), &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ReactoplanFactory {
    handler: Arc<ReactoplanHandler>,
    noop: Arc<NoopHandler>,
}

impl ReactoplanFactory {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            handler: Arc::new(ReactoplanHandler::new(engine)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ReactoplanFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    /// No authentication: every client is accepted.
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
    factory: Arc<ReactoplanFactory>,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Chronology => "22007",
        ErrorKind::BookingConflict | ErrorKind::DowntimeConflict => "23P01",
        ErrorKind::PolicyViolation => "P0001",
        ErrorKind::NotFound => "02000",
        ErrorKind::AlreadyExists => "23505",
        ErrorKind::LimitExceeded => "54000",
        ErrorKind::Timeout => "57014",
        ErrorKind::Wal => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(e.kind()).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
