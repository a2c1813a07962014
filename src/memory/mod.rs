/// In-memory backend and cluster
///
/// A `MemoryCluster` holds one primary store and any number of replica
/// stores. Replication is manual: `replicate()` copies the primary's tables
/// onto every replica, and writes made directly to a replica store bypass it.
/// Used by the demo command and the test suites.
pub mod sql;

use crate::core::backend::{Backend, Connector, QueryOutcome, RowSet};
use crate::core::{ColumnMeta, Endpoint, Value};
use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use sql::{Expr, Filter, Statement};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Host name of the primary store inside a cluster
pub const PRIMARY_HOST: &str = "primary";

/// Host name of the replica store at `index`
pub fn replica_host(index: usize) -> String {
    format!("replica-{}", index)
}

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<ColumnMeta>,
    rows: Vec<Vec<Value>>,
    next_id: i64,
}

impl Table {
    fn column_index(&self, name: &str) -> BackendResult<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| BackendError::query(format!("unknown column '{}'", name)))
    }

    fn matching(&self, filter: &[(usize, Value)]) -> Vec<usize> {
        (0..self.rows.len())
            .filter(|&i| {
                filter
                    .iter()
                    .all(|(col, value)| loosely_equal(&self.rows[i][*col], value))
            })
            .collect()
    }
}

type Tables = BTreeMap<String, Table>;

#[derive(Debug)]
struct StoreState {
    tables: Tables,
    available: bool,
}

/// One database's contents, shared by every connection to it
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                tables: Tables::new(),
                available: true,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run a statement directly against this store, outside any router
    pub fn execute(&self, query: &str, params: &[Value]) -> BackendResult<QueryOutcome> {
        let statement = sql::parse(query)?;
        let mut state = self.lock();
        apply(&mut state.tables, statement, params).map(|(outcome, _)| outcome)
    }

    pub fn meta_columns(&self, table: &str) -> BackendResult<Vec<ColumnMeta>> {
        let state = self.lock();
        state
            .tables
            .get(&table.to_lowercase())
            .map(|t| t.columns.clone())
            .ok_or_else(|| BackendError::query(format!("table '{}' doesn't exist", table)))
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock()
            .tables
            .get(&table.to_lowercase())
            .map_or(0, |t| t.rows.len())
    }

    /// Make the store refuse new connections and drop in-flight statements
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    pub fn is_available(&self) -> bool {
        self.lock().available
    }

    fn snapshot(&self) -> Tables {
        self.lock().tables.clone()
    }

    fn restore(&self, tables: Tables) {
        self.lock().tables = tables;
    }
}

/// A primary store plus its replicas
pub struct MemoryCluster {
    primary: MemoryStore,
    replicas: Vec<MemoryStore>,
    connections: Arc<AtomicUsize>,
}

impl MemoryCluster {
    pub fn new(replica_count: usize) -> Self {
        Self {
            primary: MemoryStore::new(),
            replicas: (0..replica_count).map(|_| MemoryStore::new()).collect(),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn primary(&self) -> &MemoryStore {
        &self.primary
    }

    pub fn replica(&self, index: usize) -> Option<&MemoryStore> {
        self.replicas.get(index)
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Host names of the replicas, in index order
    pub fn replica_hosts(&self) -> Vec<String> {
        (0..self.replicas.len()).map(replica_host).collect()
    }

    /// Copy the primary's contents onto every replica
    pub fn replicate(&self) {
        let tables = self.primary.snapshot();
        for replica in &self.replicas {
            replica.restore(tables.clone());
        }
        log::debug!("Replicated primary onto {} replicas", self.replicas.len());
    }

    /// Mark a host as unreachable (or reachable again)
    pub fn set_unavailable(&self, host: &str, unavailable: bool) {
        if let Some(store) = self.store(host) {
            store.set_available(!unavailable);
        }
    }

    /// Connections opened through any connector of this cluster
    pub fn connections_opened(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn connector(&self) -> MemoryConnector {
        let mut stores = HashMap::new();
        stores.insert(PRIMARY_HOST.to_string(), self.primary.clone());
        for (i, replica) in self.replicas.iter().enumerate() {
            stores.insert(replica_host(i), replica.clone());
        }
        MemoryConnector {
            stores,
            connections: Arc::clone(&self.connections),
        }
    }

    fn store(&self, host: &str) -> Option<&MemoryStore> {
        if host == PRIMARY_HOST {
            return Some(&self.primary);
        }
        host.strip_prefix("replica-")
            .and_then(|i| i.parse::<usize>().ok())
            .and_then(|i| self.replicas.get(i))
    }
}

/// Resolves endpoints to cluster stores by host name
#[derive(Clone)]
pub struct MemoryConnector {
    stores: HashMap<String, MemoryStore>,
    connections: Arc<AtomicUsize>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &Endpoint) -> BackendResult<Box<dyn Backend>> {
        let store = self.stores.get(&endpoint.host).ok_or_else(|| {
            BackendError::connection(format!("unknown host '{}'", endpoint.host))
        })?;
        if !store.is_available() {
            return Err(BackendError::connection(format!(
                "connection refused by {}:{}",
                endpoint.host, endpoint.port
            )));
        }

        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryBackend {
            store: store.clone(),
            transaction: None,
            last_insert_id: None,
        }))
    }
}

/// A connection to a `MemoryStore`
pub struct MemoryBackend {
    store: MemoryStore,
    transaction: Option<Tables>,
    last_insert_id: Option<i64>,
}

impl MemoryBackend {
    fn check_link(&self) -> BackendResult<()> {
        if self.store.is_available() {
            Ok(())
        } else {
            Err(BackendError::connection("server has gone away"))
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn execute(&mut self, query: &str, params: &[Value]) -> BackendResult<QueryOutcome> {
        self.check_link()?;
        let statement = sql::parse(query)?;
        let mut state = self.store.lock();
        let (outcome, inserted) = apply(&mut state.tables, statement, params)?;
        if inserted.is_some() {
            self.last_insert_id = inserted;
        }
        Ok(outcome)
    }

    async fn begin(&mut self) -> BackendResult<()> {
        self.check_link()?;
        if self.transaction.is_some() {
            return Err(BackendError::query("a transaction is already active"));
        }
        self.transaction = Some(self.store.snapshot());
        Ok(())
    }

    async fn commit(&mut self) -> BackendResult<()> {
        self.check_link()?;
        self.transaction = None;
        Ok(())
    }

    async fn rollback(&mut self) -> BackendResult<()> {
        self.check_link()?;
        if let Some(tables) = self.transaction.take() {
            self.store.restore(tables);
        }
        Ok(())
    }

    async fn meta_columns(&mut self, table: &str) -> BackendResult<Vec<ColumnMeta>> {
        self.check_link()?;
        self.store.meta_columns(table)
    }

    fn last_insert_id(&self) -> Option<i64> {
        self.last_insert_id
    }

    async fn close(&mut self) {
        // An open transaction is discarded with the connection
        if let Some(tables) = self.transaction.take() {
            self.store.restore(tables);
        }
    }
}

fn apply(
    tables: &mut Tables,
    statement: Statement,
    params: &[Value],
) -> BackendResult<(QueryOutcome, Option<i64>)> {
    match statement {
        Statement::CreateTable { table, columns } => {
            if tables.contains_key(&table) {
                return Err(BackendError::query(format!("table '{}' already exists", table)));
            }
            let columns = columns
                .into_iter()
                .map(|c| ColumnMeta {
                    name: c.name,
                    data_type: c.data_type,
                    nullable: c.nullable,
                })
                .collect();
            tables.insert(
                table,
                Table {
                    columns,
                    rows: Vec::new(),
                    next_id: 1,
                },
            );
            Ok((QueryOutcome::Affected(0), None))
        }
        Statement::AddColumn { table, column } => {
            let t = table_mut(tables, &table)?;
            if t.column_index(&column.name).is_ok() {
                return Err(BackendError::query(format!("duplicate column '{}'", column.name)));
            }
            t.columns.push(ColumnMeta {
                name: column.name,
                data_type: column.data_type,
                nullable: column.nullable,
            });
            for row in &mut t.rows {
                row.push(Value::Null);
            }
            Ok((QueryOutcome::Affected(0), None))
        }
        Statement::Insert {
            table,
            columns,
            values,
        } => {
            let t = table_mut(tables, &table)?;
            let mut row = vec![Value::Null; t.columns.len()];
            for (column, expr) in columns.iter().zip(&values) {
                row[t.column_index(column)?] = expr.eval(params)?;
            }

            let mut inserted = None;
            let mut next_id = t.next_id;
            if let Ok(id_index) = t.column_index("id") {
                match row[id_index].as_i64() {
                    Some(id) => next_id = next_id.max(id.saturating_add(1)),
                    None if row[id_index].is_null() => {
                        row[id_index] = Value::Int(next_id);
                        next_id = next_id.saturating_add(1);
                    }
                    None => {}
                }
                inserted = row[id_index].as_i64();
            }

            for (column, value) in t.columns.iter().zip(&row) {
                if !column.nullable && value.is_null() {
                    return Err(BackendError::query(format!(
                        "column '{}' cannot be null",
                        column.name
                    )));
                }
            }

            // Only a stored row consumes an id
            t.next_id = next_id;
            t.rows.push(row);
            Ok((QueryOutcome::Affected(1), inserted))
        }
        Statement::Update {
            table,
            assignments,
            filter,
        } => {
            let t = table_mut(tables, &table)?;
            let filter = resolve_filter(t, &filter, params)?;
            let mut updates = Vec::with_capacity(assignments.len());
            for (column, expr) in &assignments {
                updates.push((t.column_index(column)?, expr.eval(params)?));
            }

            let matched = t.matching(&filter);
            for &i in &matched {
                for (col, value) in &updates {
                    t.rows[i][*col] = value.clone();
                }
            }
            Ok((QueryOutcome::Affected(matched.len() as u64), None))
        }
        Statement::Delete { table, filter } => {
            let t = table_mut(tables, &table)?;
            let filter = resolve_filter(t, &filter, params)?;
            let matched = t.matching(&filter);
            for &i in matched.iter().rev() {
                t.rows.remove(i);
            }
            Ok((QueryOutcome::Affected(matched.len() as u64), None))
        }
        Statement::Select {
            columns,
            table,
            filter,
            limit,
            offset,
        } => {
            let t = tables
                .get(&table)
                .ok_or_else(|| BackendError::query(format!("table '{}' doesn't exist", table)))?;
            let filter = resolve_filter(t, &filter, params)?;

            let (names, indexes) = match columns {
                Some(names) => {
                    let indexes = names
                        .iter()
                        .map(|n| t.column_index(n))
                        .collect::<BackendResult<Vec<_>>>()?;
                    (names, indexes)
                }
                None => (
                    t.columns.iter().map(|c| c.name.clone()).collect(),
                    (0..t.columns.len()).collect(),
                ),
            };

            let rows: Vec<Vec<Value>> = t
                .matching(&filter)
                .into_iter()
                .skip(offset)
                .take(limit.unwrap_or(usize::MAX))
                .map(|i| indexes.iter().map(|&c| t.rows[i][c].clone()).collect::<Vec<_>>())
                .collect();

            Ok((QueryOutcome::Rows(RowSet::new(names, rows)), None))
        }
    }
}

fn table_mut<'a>(tables: &'a mut Tables, name: &str) -> BackendResult<&'a mut Table> {
    tables
        .get_mut(name)
        .ok_or_else(|| BackendError::query(format!("table '{}' doesn't exist", name)))
}

fn resolve_filter(table: &Table, filter: &Filter, params: &[Value]) -> BackendResult<Vec<(usize, Value)>> {
    filter
        .iter()
        .map(|(column, expr): &(String, Expr)| Ok((table.column_index(column)?, expr.eval(params)?)))
        .collect()
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Float(x), other) | (other, Value::Float(x)) => match other {
            Value::Float(y) => x == y,
            Value::Int(y) => *x == *y as f64,
            _ => false,
        },
        _ => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) if !matches!((a, b), (Value::Text(_), Value::Text(_))) => x == y,
            _ => a == b,
        },
    }
}
