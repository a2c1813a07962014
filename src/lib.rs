//! stickyroute - Session-scoped master/slave router for relational databases
//!
//! A `Router` serves one logical session (typically one request). Reads go to
//! a replica picked once per session until the first write or transaction,
//! after which the primary is sticky for the rest of the session.
pub mod config;
pub mod core;
pub mod error;
pub mod memory;
pub mod selector;

use crate::core::backend::{BackendHandle, Connector, RowSet};
use crate::core::connection::BackendSlots;
use crate::core::recordset::RecordSet;
use crate::core::session::{OperationKind, RouterSession, TransactionEnd};
use crate::core::{ColumnMeta, Endpoint, FetchMode, Record, Role, Value};
use crate::error::{ConfigError, RouterError, RouterResult};
use crate::selector::{RandomSelector, ReplicaSelector};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Default bound on establishing a backend connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read-only router configuration, shareable between routers
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub primary: Endpoint,
    pub replicas: Vec<Endpoint>,
    pub fetch_mode: FetchMode,
    pub connect_timeout: Duration,
    /// Seed for the replica pick; `None` uses the thread RNG
    pub replica_seed: Option<u64>,
}

impl RouterConfig {
    /// Create a new router configuration with validation
    pub fn new(primary: Endpoint, replicas: Vec<Endpoint>) -> Result<Self, ConfigError> {
        if primary.role != Role::Primary {
            return Err(ConfigError::ValidationError(format!(
                "{} is not a primary endpoint",
                primary
            )));
        }
        if primary.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Primary host cannot be empty".to_string(),
            ));
        }
        if let Some(bad) = replicas
            .iter()
            .find(|r| r.role != Role::Replica || r.host.trim().is_empty())
        {
            return Err(ConfigError::ValidationError(format!(
                "Invalid replica endpoint: {}",
                bad
            )));
        }

        Ok(Self {
            primary,
            replicas,
            fetch_mode: FetchMode::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            replica_seed: None,
        })
    }

    pub fn with_fetch_mode(mut self, fetch_mode: FetchMode) -> Self {
        self.fetch_mode = fetch_mode;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_replica_seed(mut self, seed: u64) -> Self {
        self.replica_seed = Some(seed);
        self
    }

    pub fn has_replicas(&self) -> bool {
        !self.replicas.is_empty()
    }
}

/// Per-router routing counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub replica_reads: u64,
    pub primary_reads: u64,
    pub writes: u64,
    pub connections_opened: u64,
}

/// Master/slave router for one session
///
/// Not meant for concurrent use: every operation takes `&mut self`. Create
/// one router per request; routers share nothing but their configuration.
pub struct Router {
    config: Arc<RouterConfig>,
    session: RouterSession,
    slots: BackendSlots,
    selector: Arc<dyn ReplicaSelector>,
    fetch_mode: FetchMode,
    stats: RouterStats,
    closed: bool,
}

impl Router {
    pub fn new(config: Arc<RouterConfig>, connector: Arc<dyn Connector>) -> Self {
        let selector: Arc<dyn ReplicaSelector> = match config.replica_seed {
            Some(seed) => Arc::new(RandomSelector::with_seed(seed)),
            None => Arc::new(RandomSelector::new()),
        };
        Self::with_selector(config, connector, selector)
    }

    /// Create a router with a custom replica selection algorithm
    pub fn with_selector(
        config: Arc<RouterConfig>,
        connector: Arc<dyn Connector>,
        selector: Arc<dyn ReplicaSelector>,
    ) -> Self {
        let slots = BackendSlots::new(connector, config.connect_timeout);
        Self {
            fetch_mode: config.fetch_mode,
            config,
            session: RouterSession::new(),
            slots,
            selector,
            stats: RouterStats::default(),
            closed: false,
        }
    }

    /// Run a query and return a cursor positioned at the first row
    pub async fn select(&mut self, query: &str, params: &[Value]) -> RouterResult<RecordSet> {
        let (rows, role) = self.read_rows(query, params).await?;
        Ok(RecordSet::new(rows, self.fetch_mode, role))
    }

    /// `select` restricted to `limit` rows after skipping `offset`
    pub async fn select_limit(
        &mut self,
        query: &str,
        params: &[Value],
        limit: Option<usize>,
        offset: usize,
    ) -> RouterResult<RecordSet> {
        Ok(self.select(query, params).await?.window(limit, offset))
    }

    /// All rows as records
    pub async fn get_all(&mut self, query: &str, params: &[Value]) -> RouterResult<Vec<Record>> {
        Ok(self.select(query, params).await?.collect())
    }

    /// First row, or an empty record when there are no rows
    pub async fn get_row(&mut self, query: &str, params: &[Value]) -> RouterResult<Record> {
        Ok(self.select(query, params).await?.fields().unwrap_or_default())
    }

    /// First column of every row
    pub async fn get_col(&mut self, query: &str, params: &[Value]) -> RouterResult<Vec<Value>> {
        let (rows, _) = self.read_rows(query, params).await?;
        Ok(rows
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect())
    }

    /// First column of the first row
    pub async fn get_one(&mut self, query: &str, params: &[Value]) -> RouterResult<Option<Value>> {
        let (rows, _) = self.read_rows(query, params).await?;
        Ok(rows
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next()))
    }

    /// Run a modifying statement on the primary and return the affected row count
    pub async fn execute(&mut self, query: &str, params: &[Value]) -> RouterResult<u64> {
        let handle = self.route(OperationKind::Write).await?;
        let outcome = handle
            .execute(query, params)
            .await
            .map_err(|e| RouterError::from_backend(Role::Primary, query, e))?;
        self.stats.writes += 1;
        Ok(outcome.affected())
    }

    /// Open a transaction on the primary; nested calls share one backend transaction
    pub async fn begin_transaction(&mut self) -> RouterResult<()> {
        let outermost = !self.session.in_transaction();
        let handle = self.route(OperationKind::Write).await?;
        if outermost {
            handle
                .begin()
                .await
                .map_err(|e| RouterError::from_backend(Role::Primary, "BEGIN", e))?;
        }
        self.session.enter_transaction();
        debug!("Transaction depth now {}", self.session.transaction_depth());
        Ok(())
    }

    /// Close one transaction level.
    ///
    /// Only the outermost level commits on the backend, and the depth drops
    /// only once that commit succeeds, so a failed commit can still be rolled
    /// back. After an inner rollback every commit is refused.
    pub async fn commit_transaction(&mut self) -> RouterResult<()> {
        self.route(OperationKind::Write).await?;
        let end = self.session.pending_end();
        if end != TransactionEnd::NotOpen && self.session.is_rollback_only() {
            return Err(RouterError::RollbackOnly {
                depth: self.session.transaction_depth(),
            });
        }

        match end {
            TransactionEnd::Outermost => self
                .primary()
                .await?
                .commit()
                .await
                .map_err(|e| RouterError::from_backend(Role::Primary, "COMMIT", e))?,
            TransactionEnd::Nested => {}
            TransactionEnd::NotOpen => {
                debug!("Commit without an open transaction ignored");
                return Ok(());
            }
        }
        self.session.leave_transaction();
        Ok(())
    }

    /// Roll back one transaction level.
    ///
    /// An inner rollback marks the transaction rollback-only; the outermost
    /// rollback discards the work on the backend.
    pub async fn rollback_transaction(&mut self) -> RouterResult<()> {
        self.route(OperationKind::Write).await?;
        match self.session.pending_end() {
            TransactionEnd::Outermost => self
                .primary()
                .await?
                .rollback()
                .await
                .map_err(|e| RouterError::from_backend(Role::Primary, "ROLLBACK", e))?,
            TransactionEnd::Nested => {
                warn!(
                    "Inner rollback at depth {}; transaction is now rollback-only",
                    self.session.transaction_depth()
                );
                self.session.mark_rollback_only();
            }
            TransactionEnd::NotOpen => {
                debug!("Rollback without an open transaction ignored");
                return Ok(());
            }
        }
        self.session.leave_transaction();
        Ok(())
    }

    /// Describe a table's columns.
    ///
    /// Routed like any read: before the master is picked this reflects the
    /// replica's schema, which may differ from the primary's.
    pub async fn meta_columns(&mut self, table: &str) -> RouterResult<Vec<ColumnMeta>> {
        let handle = self.route(OperationKind::Read).await?;
        let role = handle.role();
        let columns = handle
            .meta_columns(table)
            .await
            .map_err(|e| RouterError::from_backend(role, table, e))?;
        self.count_read(role);
        Ok(columns)
    }

    /// Id generated by the last insert on the primary connection
    pub fn last_insert_id(&self) -> Option<i64> {
        self.slots
            .peek(Role::Primary)
            .and_then(BackendHandle::last_insert_id)
    }

    /// Make the primary sticky without running a statement
    pub fn force_master(&mut self) {
        self.session.force_master();
    }

    pub fn is_master_picked(&self) -> bool {
        self.session.is_master_picked()
    }

    pub fn transaction_depth(&self) -> u32 {
        self.session.transaction_depth()
    }

    pub fn in_transaction(&self) -> bool {
        self.session.in_transaction()
    }

    /// Replica chosen for this session, once a read needed one
    pub fn selected_replica(&self) -> Option<&Endpoint> {
        self.session.selected_replica()
    }

    pub fn fetch_mode(&self) -> FetchMode {
        self.fetch_mode
    }

    pub fn set_fetch_mode(&mut self, fetch_mode: FetchMode) {
        self.fetch_mode = fetch_mode;
    }

    /// Quote a value as an SQL literal
    pub fn quote(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(x) => x.to_string(),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            connections_opened: self.slots.opened(),
            ..self.stats
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close both connections and start a fresh session on the same router
    pub async fn reset(&mut self) {
        self.slots.close_all().await;
        self.session.reset();
        self.closed = false;
        info!("Router reset; routing state cleared");
    }

    /// Release both backend connections. The router cannot be used afterwards.
    pub async fn close_connection(&mut self) {
        if self.closed {
            return;
        }
        if self.session.in_transaction() {
            warn!(
                "Closing router with an open transaction (depth {})",
                self.session.transaction_depth()
            );
        }
        self.slots.close_all().await;
        self.closed = true;
    }

    async fn read_rows(&mut self, query: &str, params: &[Value]) -> RouterResult<(RowSet, Role)> {
        let handle = self.route(OperationKind::Read).await?;
        let role = handle.role();
        let outcome = handle
            .execute(query, params)
            .await
            .map_err(|e| RouterError::from_backend(role, query, e))?;
        self.count_read(role);
        Ok((outcome.into_rows(), role))
    }

    /// Decide the role for an operation and return its (lazily opened) handle
    async fn route(&mut self, kind: OperationKind) -> RouterResult<&mut BackendHandle> {
        if self.closed {
            return Err(RouterError::Closed);
        }

        let endpoint = match self.session.decide(kind) {
            Role::Primary => &self.config.primary,
            Role::Replica => {
                match self
                    .session
                    .resolve_replica(self.selector.as_ref(), &self.config.replicas)
                {
                    Ok(replica) => replica,
                    Err(ConfigError::NoReplicas) => {
                        debug!("No replicas configured; reading from primary");
                        &self.config.primary
                    }
                    Err(e) => {
                        warn!("Replica selection failed ({}); reading from primary", e);
                        &self.config.primary
                    }
                }
            }
        };

        debug!("Routing {:?} to {}", kind, endpoint);
        self.slots.get(endpoint).await
    }

    async fn primary(&mut self) -> RouterResult<&mut BackendHandle> {
        self.slots.get(&self.config.primary).await
    }

    fn count_read(&mut self, role: Role) {
        match role {
            Role::Primary => self.stats.primary_reads += 1,
            Role::Replica => self.stats.replica_reads += 1,
        }
    }
}
