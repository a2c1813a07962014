/// Backend driver abstraction
///
/// The router never speaks a wire protocol itself. A `Connector` opens a
/// `Backend` for an endpoint, and the router wraps it in a `BackendHandle`
/// that it owns exclusively.
use crate::core::{ColumnMeta, Endpoint, Role, Value};
use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;

/// Raw rows as returned by a driver
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Result of executing a statement
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(RowSet),
    Affected(u64),
}

impl QueryOutcome {
    /// Rows of the outcome; statements without a result set yield no rows
    pub fn into_rows(self) -> RowSet {
        match self {
            QueryOutcome::Rows(rows) => rows,
            QueryOutcome::Affected(_) => RowSet::default(),
        }
    }

    pub fn affected(&self) -> u64 {
        match self {
            QueryOutcome::Rows(rows) => rows.rows.len() as u64,
            QueryOutcome::Affected(n) => *n,
        }
    }
}

/// A single open database connection
#[async_trait]
pub trait Backend: Send {
    /// Run a statement with positional parameters
    async fn execute(&mut self, query: &str, params: &[Value]) -> BackendResult<QueryOutcome>;

    async fn begin(&mut self) -> BackendResult<()>;

    async fn commit(&mut self) -> BackendResult<()>;

    async fn rollback(&mut self) -> BackendResult<()>;

    /// Describe the columns of a table
    async fn meta_columns(&mut self, table: &str) -> BackendResult<Vec<ColumnMeta>>;

    /// Id generated by the last insert on this connection
    fn last_insert_id(&self) -> Option<i64> {
        None
    }

    /// Release the connection
    async fn close(&mut self);
}

/// Factory for backend connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> BackendResult<Box<dyn Backend>>;
}

/// An open connection to one endpoint, owned by a router
pub struct BackendHandle {
    endpoint: Endpoint,
    inner: Box<dyn Backend>,
    closed: bool,
}

impl BackendHandle {
    pub fn new(endpoint: Endpoint, inner: Box<dyn Backend>) -> Self {
        Self {
            endpoint,
            inner,
            closed: false,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn role(&self) -> Role {
        self.endpoint.role
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed {
            return Err(BackendError::connection(format!(
                "connection to {} is closed",
                self.endpoint
            )));
        }
        Ok(())
    }

    pub async fn execute(&mut self, query: &str, params: &[Value]) -> BackendResult<QueryOutcome> {
        self.ensure_open()?;
        self.inner.execute(query, params).await
    }

    pub async fn begin(&mut self) -> BackendResult<()> {
        self.ensure_open()?;
        self.inner.begin().await
    }

    pub async fn commit(&mut self) -> BackendResult<()> {
        self.ensure_open()?;
        self.inner.commit().await
    }

    pub async fn rollback(&mut self) -> BackendResult<()> {
        self.ensure_open()?;
        self.inner.rollback().await
    }

    pub async fn meta_columns(&mut self, table: &str) -> BackendResult<Vec<ColumnMeta>> {
        self.ensure_open()?;
        self.inner.meta_columns(table).await
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        if self.closed {
            return None;
        }
        self.inner.last_insert_id()
    }

    /// Idempotent
    pub async fn close(&mut self) {
        if !self.closed {
            self.inner.close().await;
            self.closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingBackend {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Backend for CountingBackend {
        async fn execute(&mut self, _query: &str, _params: &[Value]) -> BackendResult<QueryOutcome> {
            Ok(QueryOutcome::Affected(1))
        }

        async fn begin(&mut self) -> BackendResult<()> {
            Ok(())
        }

        async fn commit(&mut self) -> BackendResult<()> {
            Ok(())
        }

        async fn rollback(&mut self) -> BackendResult<()> {
            Ok(())
        }

        async fn meta_columns(&mut self, _table: &str) -> BackendResult<Vec<ColumnMeta>> {
            Ok(Vec::new())
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn handle(closes: Arc<AtomicUsize>) -> BackendHandle {
        let endpoint = Endpoint::primary("primary", 3306, "shop", "app", "");
        BackendHandle::new(endpoint, Box::new(CountingBackend { closes }))
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut handle = handle(Arc::clone(&closes));

        handle.close().await;
        handle.close().await;

        assert!(handle.is_closed());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_handle_rejects_queries() {
        let mut handle = handle(Arc::new(AtomicUsize::new(0)));
        assert_eq!(
            handle.execute("DELETE FROM t", &[]).await,
            Ok(QueryOutcome::Affected(1))
        );

        handle.close().await;
        let result = handle.execute("DELETE FROM t", &[]).await;
        assert!(matches!(result, Err(BackendError::Connection(_))));
    }

    #[test]
    fn test_outcome_rows() {
        let outcome = QueryOutcome::Affected(3);
        assert_eq!(outcome.affected(), 3);
        assert!(outcome.into_rows().is_empty());
    }
}
