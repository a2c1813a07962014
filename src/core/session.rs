/// Routing state for one router instance
///
/// A session tracks whether the master has been picked and how deep the
/// open transaction is. Once the master is picked every later call goes to
/// the master until the session is reset.
use crate::core::{Endpoint, Role};
use crate::error::ConfigError;
use crate::selector::ReplicaSelector;

/// Classification of a router call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// May be served by the replica
    Read,
    /// Always served by the primary and makes the primary sticky
    Write,
}

/// How a transaction end should be applied to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionEnd {
    /// No transaction is open
    NotOpen,
    /// An inner level; the connection-level transaction stays open
    Nested,
    /// The connection-level transaction is finished on the backend
    Outermost,
}

/// Mutable routing state attached to one router
#[derive(Debug, Clone, Default)]
pub struct RouterSession {
    master_picked: bool,
    transaction_depth: u32,
    rollback_only: bool,
    selected_replica: Option<Endpoint>,
}

impl RouterSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide which role serves an operation of the given kind
    pub fn decide(&mut self, kind: OperationKind) -> Role {
        match kind {
            OperationKind::Write => {
                if !self.master_picked {
                    log::info!("Master picked; all further calls in this session use the primary");
                }
                self.master_picked = true;
                Role::Primary
            }
            OperationKind::Read if self.master_picked => Role::Primary,
            OperationKind::Read => Role::Replica,
        }
    }

    /// Replica endpoint for this session, picked once on first use
    pub fn resolve_replica<'a>(
        &'a mut self,
        selector: &dyn ReplicaSelector,
        replicas: &[Endpoint],
    ) -> Result<&'a Endpoint, ConfigError> {
        if self.selected_replica.is_none() {
            if replicas.is_empty() {
                return Err(ConfigError::NoReplicas);
            }
            let index = selector.select(replicas).ok_or(ConfigError::NoReplicas)?;
            let endpoint = replicas.get(index).ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "replica selector returned index {} of {}",
                    index,
                    replicas.len()
                ))
            })?;
            log::debug!("Selected replica {} for this session", endpoint);
            self.selected_replica = Some(endpoint.clone());
        }
        self.selected_replica.as_ref().ok_or(ConfigError::NoReplicas)
    }

    /// Enter a transaction level. Returns true for the outermost level.
    pub fn enter_transaction(&mut self) -> bool {
        self.master_picked = true;
        self.transaction_depth += 1;
        self.transaction_depth == 1
    }

    /// How closing the current level maps onto the backend. Leaves the depth as is.
    pub fn pending_end(&self) -> TransactionEnd {
        match self.transaction_depth {
            0 => TransactionEnd::NotOpen,
            1 => TransactionEnd::Outermost,
            _ => TransactionEnd::Nested,
        }
    }

    /// Close the current level once the backend has accepted it
    pub fn leave_transaction(&mut self) {
        self.transaction_depth = self.transaction_depth.saturating_sub(1);
        if self.transaction_depth == 0 {
            self.rollback_only = false;
        }
    }

    /// An inner level was rolled back; outer levels may only roll back
    pub fn mark_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Pick the master without issuing a statement
    pub fn force_master(&mut self) {
        self.decide(OperationKind::Write);
    }

    pub fn is_master_picked(&self) -> bool {
        self.master_picked
    }

    pub fn transaction_depth(&self) -> u32 {
        self.transaction_depth
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_depth > 0
    }

    pub fn selected_replica(&self) -> Option<&Endpoint> {
        self.selected_replica.as_ref()
    }

    /// Return to the initial state
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{FixedSelector, RandomSelector};

    fn replicas() -> Vec<Endpoint> {
        let primary = Endpoint::primary("primary", 3306, "shop", "app", "");
        vec![
            Endpoint::replica_of(&primary, "replica-0"),
            Endpoint::replica_of(&primary, "replica-1"),
        ]
    }

    #[test]
    fn test_reads_go_to_replica_until_write() {
        let mut session = RouterSession::new();
        assert_eq!(session.decide(OperationKind::Read), Role::Replica);
        assert_eq!(session.decide(OperationKind::Read), Role::Replica);
        assert!(!session.is_master_picked());

        assert_eq!(session.decide(OperationKind::Write), Role::Primary);
        assert_eq!(session.decide(OperationKind::Read), Role::Primary);
        assert!(session.is_master_picked());
    }

    #[test]
    fn test_master_stays_picked_after_transaction_ends() {
        let mut session = RouterSession::new();
        assert!(session.enter_transaction());
        assert!(session.in_transaction());
        assert_eq!(session.pending_end(), TransactionEnd::Outermost);
        session.leave_transaction();

        assert!(!session.in_transaction());
        assert_eq!(session.decide(OperationKind::Read), Role::Primary);
    }

    #[test]
    fn test_nested_transactions() {
        let mut session = RouterSession::new();
        assert_eq!(session.pending_end(), TransactionEnd::NotOpen);
        assert!(session.enter_transaction());
        assert!(!session.enter_transaction());
        assert_eq!(session.transaction_depth(), 2);

        // Looking at the pending end does not close anything
        assert_eq!(session.pending_end(), TransactionEnd::Nested);
        assert_eq!(session.transaction_depth(), 2);

        session.leave_transaction();
        assert_eq!(session.pending_end(), TransactionEnd::Outermost);
        session.leave_transaction();
        assert_eq!(session.pending_end(), TransactionEnd::NotOpen);
        session.leave_transaction();
        assert_eq!(session.transaction_depth(), 0);
    }

    #[test]
    fn test_rollback_only_clears_with_outermost_level() {
        let mut session = RouterSession::new();
        session.enter_transaction();
        session.enter_transaction();
        session.mark_rollback_only();
        session.leave_transaction();
        assert!(session.is_rollback_only());
        assert!(session.in_transaction());

        session.leave_transaction();
        assert!(!session.is_rollback_only());
        assert!(session.is_master_picked());
    }

    #[test]
    fn test_open_transaction_implies_master_picked() {
        let mut session = RouterSession::new();
        session.enter_transaction();
        assert!(session.transaction_depth() > 0 && session.is_master_picked());
    }

    #[test]
    fn test_replica_is_picked_once() {
        let mut session = RouterSession::new();
        let replicas = replicas();

        let first = session
            .resolve_replica(&FixedSelector::new(1), &replicas)
            .unwrap()
            .clone();
        assert_eq!(first.host, "replica-1");

        // A different selector must not re-roll the pick
        let again = session
            .resolve_replica(&FixedSelector::new(0), &replicas)
            .unwrap();
        assert_eq!(again.host, "replica-1");

        let selector = RandomSelector::new();
        for _ in 0..10 {
            let pick = session.resolve_replica(&selector, &replicas).unwrap();
            assert_eq!(pick.host, "replica-1");
        }
    }

    #[test]
    fn test_empty_replica_set() {
        let mut session = RouterSession::new();
        let result = session.resolve_replica(&RandomSelector::new(), &[]);
        assert!(matches!(result, Err(ConfigError::NoReplicas)));
        assert!(session.selected_replica().is_none());
    }

    #[test]
    fn test_reset() {
        let mut session = RouterSession::new();
        session.resolve_replica(&FixedSelector::new(0), &replicas()).unwrap();
        session.enter_transaction();
        session.mark_rollback_only();
        session.reset();

        assert!(!session.is_master_picked());
        assert!(!session.is_rollback_only());
        assert_eq!(session.transaction_depth(), 0);
        assert!(session.selected_replica().is_none());
        assert_eq!(session.decide(OperationKind::Read), Role::Replica);
    }
}
