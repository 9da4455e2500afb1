//! First-time registration and convergence to the initial assignment
//! (§4.7). Registration is a 3-state story keyed on what the local data
//! directory looks like; after registering, `reach_initial_state` drives
//! the first FSM transition synchronously so create-time failures surface
//! to the operator immediately instead of hiding inside a background loop.

use thiserror::Error;
use tracing::{info, instrument};

use crate::client::retry::RetryPolicy;
use crate::client::{ClusterClient, NodeIdentity, RegisterRequest};
use crate::config::Config;
use crate::fsm::{self, TransitionContext};
use crate::pg::controller::LocalDbController;
use crate::roles::NodeRole;
use crate::state::{InitProgress, KeeperState, StateStore};

#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Client(#[from] crate::client::error::ClientError),

    #[error(transparent)]
    State(#[from] crate::state::error::StateError),

    #[error(transparent)]
    Db(#[from] crate::pg::error::PgControllerError),

    #[error(transparent)]
    Transition(#[from] crate::fsm::error::TransitionError),
}

/// Chooses the registration story for the current data directory, per §4.7:
/// 1. directory exists and DB running as primary -> register as `Single`.
/// 2. directory does not exist -> register as `Init`.
/// 3. directory exists but DB not running -> register with the control
///    file's system identifier, letting the coordinator accept/reject it.
#[instrument(skip(db))]
fn desired_initial_role(db: &mut LocalDbController) -> Result<(NodeRole, u64), InitError> {
    if db.data_directory_is_empty()? {
        return Ok((NodeRole::Init, 0));
    }
    if db.is_running().then(|| db.is_primary()).transpose()?.unwrap_or(false) {
        return Ok((NodeRole::Single, db.read_control()?.system_identifier));
    }
    let control = db.read_control()?;
    Ok((NodeRole::Init, control.system_identifier))
}

/// Registers the node (or resumes a prior, interrupted registration) and
/// drives it synchronously to its initial assignment.
pub struct InitProtocol<'a> {
    pub db: &'a mut LocalDbController,
    pub client: &'a mut ClusterClient,
    pub config: &'a Config,
    pub store: &'a StateStore,
}

impl<'a> InitProtocol<'a> {
    #[instrument(skip(self))]
    pub fn create(&mut self, mut node: NodeIdentity) -> Result<KeeperState, InitError> {
        if self.store.init_in_progress() {
            info!("resuming interrupted create");
            return self.resume(node);
        }

        let (desired_role, system_identifier) = desired_initial_role(self.db)?;
        node.system_identifier = system_identifier;

        // §4.3's "interactive variant" retry policy: a `create` has an
        // operator waiting on it, so transient network errors are retried
        // with backoff up to an overall deadline rather than surfaced
        // immediately, while a protocol error (e.g. a mismatched system
        // identifier) fails fast.
        let retry = RetryPolicy::new(self.config.rpc_init_deadline);
        let req = RegisterRequest {
            formation: self.config.formation.clone(),
            group: self.config.group,
            desired_role,
            name: node.name.clone(),
            hostname: node.hostname.clone(),
            port: node.port,
            system_identifier,
        };
        let assigned = retry.retry(|| self.client.register(&req))?;
        node.node_id = assigned.node_id;
        node.group_id = assigned.group_id;

        self.store
            .write_init(&InitProgress::new(desired_role))?;

        let mut state = KeeperState::new(node.node_id, node.group_id, desired_role);
        state.assigned_role = assigned.assigned_role;
        state.system_identifier = system_identifier;
        self.store.store(&state)?;

        self.reach_initial_state(&node, &mut state)?;
        Ok(state)
    }

    /// A `create` that finds the init file resumes from the recorded
    /// `preInitState` instead of re-registering from scratch.
    #[instrument(skip(self, node))]
    fn resume(&mut self, mut node: NodeIdentity) -> Result<KeeperState, InitError> {
        let progress = self.store.read_init()?;
        let mut state = self.store.load()?;
        node.node_id = state.current_node_id;
        node.group_id = state.current_group;
        state.current_role = progress.pre_init_state;

        self.reach_initial_state(&node, &mut state)?;
        Ok(state)
    }

    /// Drives the first FSM transition synchronously; removes the init
    /// file only once it fully succeeds (Invariant: init file never exists
    /// after a successful `reach_initial_state`).
    fn reach_initial_state(
        &mut self,
        node: &NodeIdentity,
        state: &mut KeeperState,
    ) -> Result<(), InitError> {
        let mut ctx = TransitionContext {
            db: &mut *self.db,
            client: &mut *self.client,
            config: self.config,
            node,
        };

        let reached = fsm::transition(state.current_role, state.assigned_role, &mut ctx)?;
        state.current_role = reached;
        self.store.store(state)?;
        self.store.remove_init()?;
        info!(role = %reached, "initial assignment reached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desired_initial_role_for_missing_directory_is_init() {
        let mut db = LocalDbController::new(
            Default::default(),
            std::path::PathBuf::from("/does/not/exist"),
            5432,
        );
        let (role, sysid) = desired_initial_role(&mut db).unwrap();
        assert_eq!(role, NodeRole::Init);
        assert_eq!(sysid, 0);
    }
}
