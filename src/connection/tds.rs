//! Blocking [`SqlExecutor`] over the tiberius TDS driver.
//!
//! tiberius is async; the connection owns a current-thread tokio runtime and
//! blocks on every call, which keeps the public API synchronous. Dropping the
//! connection drops the socket, so it is released on every exit path.

use std::future::Future;
use std::time::Duration;

use log::{debug, error, info, warn};
use tiberius::{Client, ColumnData, Config, Query};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::classify::{classify_connect_error, ConnectFailure};
use super::{ExecutionContext, ResultRow, SqlExecutor};
use crate::error::SqlOpsError;
use crate::sql::{SqlParam, Statement};

/// Type alias for the SQL client
type SqlClient = Client<Compat<TcpStream>>;

/// An open connection to SQL Server
///
/// A statement that runs past the command timeout is cancelled on the server
/// with `KILL` from a side connection. The connection is then unusable until
/// [`SqlExecutor::recover`] reopens it.
pub struct TdsConnection {
    runtime: Runtime,
    client: SqlClient,
    config: Config,
    connection_string: String,
    context: ExecutionContext,
    /// `@@SPID` of `client`, when the server reported one.
    session_id: Option<i16>,
    broken: bool,
}

impl TdsConnection {
    /// Open a connection from an ADO.NET style connection string.
    pub fn open(connection_string: &str, context: &ExecutionContext) -> Result<Self, SqlOpsError> {
        let config = Config::from_ado_string(connection_string).map_err(|e| {
            SqlOpsError::InvalidConnectionString {
                message: e.to_string(),
            }
        })?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| SqlOpsError::Runtime { source })?;

        let mut client = connect(&runtime, connection_string, &config)?;
        let session_id = runtime.block_on(current_session_id(&mut client));

        Ok(Self {
            runtime,
            client,
            config,
            connection_string: connection_string.to_string(),
            context: context.clone(),
            session_id,
            broken: false,
        })
    }

    /// Close the connection gracefully.
    pub fn close(self) -> Result<(), SqlOpsError> {
        let Self {
            runtime, client, ..
        } = self;
        runtime
            .block_on(client.close())
            .map_err(|e| SqlOpsError::Connectivity {
                message: e.to_string(),
                source: Box::new(e),
            })
    }

    fn ensure_usable(&self, statement: &Statement) -> Result<(), SqlOpsError> {
        if self.broken {
            return Err(SqlOpsError::ConnectionBroken {
                statement: statement.sql().to_string(),
            });
        }
        Ok(())
    }

    /// Map the outcome of a statement, abandoning the session on timeout.
    fn settle<T>(
        &mut self,
        statement: &Statement,
        outcome: Option<tiberius::Result<T>>,
    ) -> Result<T, SqlOpsError> {
        let result = finish(statement, self.context.command_timeout, outcome);
        if matches!(result, Err(SqlOpsError::Timeout { .. })) {
            self.abandon();
        }
        result
    }

    /// The client stream is mid-response after a timeout, so nothing more
    /// can be sent on it. Stop the statement on the server as well.
    fn abandon(&mut self) {
        self.broken = true;
        match self.session_id {
            Some(session_id) => {
                if let Err(err) = self.kill_session(session_id) {
                    warn!(
                        "Could not cancel session {} after a timeout, the statement may still be running: {}",
                        session_id, err
                    );
                }
            }
            None => warn!("Session id unknown, the timed out statement may still be running"),
        }
    }

    fn kill_session(&self, session_id: i16) -> Result<(), SqlOpsError> {
        info!("Cancelling server session {}", session_id);
        let mut side = connect(&self.runtime, &self.connection_string, &self.config)?;
        let kill = Statement::new(kill_sql(session_id));
        let timeout = self.context.command_timeout;
        let outcome = self
            .runtime
            .block_on(bounded(timeout, run_execute(&mut side, &kill)));
        finish(&kill, timeout, outcome)?;
        if let Err(err) = self.runtime.block_on(side.close()) {
            debug!("Closing the cancel connection failed: {}", err);
        }
        Ok(())
    }
}

impl SqlExecutor for TdsConnection {
    fn execute(&mut self, statement: &Statement) -> Result<(), SqlOpsError> {
        self.ensure_usable(statement)?;
        debug!("Executing: {}", statement.to_display_sql());
        let outcome = self.runtime.block_on(bounded(
            self.context.command_timeout,
            run_execute(&mut self.client, statement),
        ));
        self.settle(statement, outcome)
    }

    fn query(&mut self, statement: &Statement) -> Result<Vec<ResultRow>, SqlOpsError> {
        self.ensure_usable(statement)?;
        debug!("Querying: {}", statement.to_display_sql());
        let outcome = self.runtime.block_on(bounded(
            self.context.command_timeout,
            run_query(&mut self.client, statement),
        ));
        self.settle(statement, outcome)
    }

    /// Reopen the connection if a timed out statement left it unusable.
    fn recover(&mut self) -> Result<(), SqlOpsError> {
        if !self.broken {
            return Ok(());
        }
        info!("Reopening the connection after a timed out statement");
        self.client = connect(&self.runtime, &self.connection_string, &self.config)?;
        self.session_id = self.runtime.block_on(current_session_id(&mut self.client));
        self.broken = false;
        Ok(())
    }
}

/// Open a TDS client over TCP.
fn connect(
    runtime: &Runtime,
    connection_string: &str,
    config: &Config,
) -> Result<SqlClient, SqlOpsError> {
    let addr = config.get_addr();
    debug!("Connecting to {}", addr);

    runtime
        .block_on(async {
            let tcp = TcpStream::connect(&addr)
                .await
                .map_err(ConnectFailure::Tcp)?;
            tcp.set_nodelay(true).map_err(ConnectFailure::Tcp)?;
            Client::connect(config.clone(), tcp.compat_write())
                .await
                .map_err(ConnectFailure::Driver)
        })
        .map_err(|failure| classify_connect_error(connection_string, failure))
}

async fn current_session_id(client: &mut SqlClient) -> Option<i16> {
    let row = match client.simple_query("SELECT @@SPID AS Spid").await {
        Ok(stream) => stream.into_row().await.ok().flatten(),
        Err(err) => {
            warn!("Could not read the server session id: {}", err);
            None
        }
    };
    row.and_then(|row| row.try_get::<i16, _>(0).ok().flatten())
}

/// `KILL` takes no variables; the session id is a plain integer.
fn kill_sql(session_id: i16) -> String {
    format!("KILL {}", session_id)
}

/// Run a driver future under the optional command timeout. `None` means the
/// limit elapsed.
async fn bounded<T, F>(timeout: Option<Duration>, fut: F) -> Option<tiberius::Result<T>>
where
    F: Future<Output = tiberius::Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Map a driver outcome to the crate error, logging the statement on failure.
fn finish<T>(
    statement: &Statement,
    timeout: Option<Duration>,
    outcome: Option<tiberius::Result<T>>,
) -> Result<T, SqlOpsError> {
    match outcome {
        Some(Ok(value)) => Ok(value),
        Some(Err(source)) => {
            error!(
                "Statement failed: {}\n{}",
                source,
                statement.to_display_sql()
            );
            Err(SqlOpsError::Execution {
                statement: statement.sql().to_string(),
                source,
            })
        }
        None => {
            let timeout = timeout.unwrap_or_default();
            error!(
                "Statement timed out after {:?}\n{}",
                timeout,
                statement.to_display_sql()
            );
            Err(SqlOpsError::Timeout {
                statement: statement.sql().to_string(),
                timeout,
            })
        }
    }
}

fn to_query(statement: &Statement) -> Query<'static> {
    let mut query = Query::new(statement.sql().to_string());
    for param in statement.params() {
        match param {
            SqlParam::Text(s) => query.bind(s.clone()),
            SqlParam::Int(i) => query.bind(*i),
        }
    }
    query
}

async fn run_execute(client: &mut SqlClient, statement: &Statement) -> tiberius::Result<()> {
    if statement.has_params() {
        to_query(statement).execute(client).await?;
    } else {
        // Plain batches may return several result sets; drain them all
        client
            .simple_query(statement.sql())
            .await?
            .into_results()
            .await?;
    }
    Ok(())
}

async fn run_query(
    client: &mut SqlClient,
    statement: &Statement,
) -> tiberius::Result<Vec<ResultRow>> {
    let stream = if statement.has_params() {
        to_query(statement).query(client).await?
    } else {
        client.simple_query(statement.sql()).await?
    };
    let rows = stream.into_first_result().await?;
    Ok(rows.iter().map(convert_row).collect())
}

/// Convert a tiberius Row into a text row.
fn convert_row(row: &tiberius::Row) -> ResultRow {
    let columns = row
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect();
    let values = row
        .cells()
        .enumerate()
        .map(|(i, (_col, data))| match data {
            ColumnData::DateTime(Some(_))
            | ColumnData::SmallDateTime(Some(_))
            | ColumnData::DateTime2(Some(_)) => row
                .try_get::<chrono::NaiveDateTime, _>(i)
                .ok()
                .flatten()
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            ColumnData::DateTimeOffset(Some(_)) => row
                .try_get::<chrono::DateTime<chrono::Utc>, _>(i)
                .ok()
                .flatten()
                .map(|dt| dt.to_rfc3339()),
            _ => column_text(data),
        })
        .collect();
    ResultRow::new(columns, values)
}

/// Render a non-temporal column value as text. NULL and binary give `None`.
fn column_text(data: &ColumnData<'_>) -> Option<String> {
    match data {
        ColumnData::String(Some(s)) => Some(s.to_string()),
        ColumnData::Bit(Some(b)) => Some(if *b { "1" } else { "0" }.to_string()),
        ColumnData::U8(Some(v)) => Some(v.to_string()),
        ColumnData::I16(Some(v)) => Some(v.to_string()),
        ColumnData::I32(Some(v)) => Some(v.to_string()),
        ColumnData::I64(Some(v)) => Some(v.to_string()),
        ColumnData::F32(Some(v)) => Some(v.to_string()),
        ColumnData::F64(Some(v)) => Some(v.to_string()),
        ColumnData::Numeric(Some(n)) => Some(numeric_text(n.value(), n.scale())),
        ColumnData::Guid(Some(g)) => Some(g.to_string()),
        ColumnData::Xml(Some(xml)) => Some(xml.to_string()),
        _ => None,
    }
}

/// Render a scaled decimal without going through floating point.
fn numeric_text(value: i128, scale: u8) -> String {
    if scale == 0 {
        return value.to_string();
    }
    let divisor = 10i128.pow(u32::from(scale));
    let sign = if value < 0 { "-" } else { "" };
    let whole = (value / divisor).abs();
    let frac = (value % divisor).abs();
    format!("{sign}{whole}.{frac:0width$}", width = usize::from(scale))
}
