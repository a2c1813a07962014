/// Lazy backend connection slots
///
/// A router holds at most one handle per role. A slot is connected on the
/// first call that needs its role and stays open until the router closes or
/// resets.
use crate::core::backend::{BackendHandle, Connector};
use crate::core::{Endpoint, Role};
use crate::error::{RouterError, RouterResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// State of one role's connection
pub enum Slot {
    Uninitialized,
    Open(BackendHandle),
}

impl Slot {
    fn usable(&self) -> bool {
        matches!(self, Slot::Open(handle) if !handle.is_closed())
    }
}

/// Per-role connection slots owned by a router
pub struct BackendSlots {
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    primary: Slot,
    replica: Slot,
    opened: u64,
}

impl BackendSlots {
    pub fn new(connector: Arc<dyn Connector>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
            primary: Slot::Uninitialized,
            replica: Slot::Uninitialized,
            opened: 0,
        }
    }

    /// Handle for the endpoint's role, connecting on first use
    pub async fn get(&mut self, endpoint: &Endpoint) -> RouterResult<&mut BackendHandle> {
        let role = endpoint.role;
        let slot = match role {
            Role::Primary => &mut self.primary,
            Role::Replica => &mut self.replica,
        };

        if !slot.usable() {
            tracing::debug!(role = %role, endpoint = %endpoint.address(), "Connecting backend");

            let inner = match timeout(self.connect_timeout, self.connector.connect(endpoint)).await {
                Ok(Ok(inner)) => inner,
                Ok(Err(e)) => {
                    log::warn!("Failed to connect to {}: {}", endpoint, e);
                    return Err(RouterError::from_backend(role, "", e));
                }
                Err(_) => {
                    log::warn!("Timeout connecting to {}", endpoint);
                    return Err(RouterError::Timeout { role });
                }
            };

            log::info!("Opened {} connection to {}", role, endpoint.address());
            self.opened += 1;
            *slot = Slot::Open(BackendHandle::new(endpoint.clone(), inner));
        }

        match slot {
            Slot::Open(handle) => Ok(handle),
            Slot::Uninitialized => Err(RouterError::DatabaseUnavailable {
                role,
                message: "connection slot is empty".to_string(),
            }),
        }
    }

    /// Handle for a role if one is open, without connecting
    pub fn peek(&self, role: Role) -> Option<&BackendHandle> {
        match self.slot(role) {
            Slot::Open(handle) if !handle.is_closed() => Some(handle),
            _ => None,
        }
    }

    pub fn is_open(&self, role: Role) -> bool {
        self.slot(role).usable()
    }

    /// Number of connections established so far
    pub fn opened(&self) -> u64 {
        self.opened
    }

    /// Close both handles and return the slots to their initial state
    pub async fn close_all(&mut self) {
        for slot in [&mut self.primary, &mut self.replica] {
            if let Slot::Open(handle) = slot {
                handle.close().await;
                log::info!("Closed {} connection to {}", handle.role(), handle.endpoint().address());
            }
            *slot = Slot::Uninitialized;
        }
    }

    fn slot(&self, role: Role) -> &Slot {
        match role {
            Role::Primary => &self.primary,
            Role::Replica => &self.replica,
        }
    }
}
