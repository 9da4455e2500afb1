//! The control loop (§4.6): one iteration per tick, reporting local facts
//! to the coordinator via `node_active` and reconciling `currentRole`
//! towards whatever it assigns back. Every error path still persists
//! whatever state was already updated before returning, so a crash mid-tick
//! never loses the last successfully observed fact.

use tracing::{info, instrument, warn};

use crate::client::{ClusterClient, NodeActiveRequest, NodeIdentity};
use crate::config::Config;
use crate::context::Context;
use crate::error::KeeperError;
use crate::fsm::{self, TransitionContext};
use crate::pg::controller::LocalDbController;
use crate::roles::NodeRole;
use crate::state::{now_epoch, StateStore};
use crate::supervisor::restart::{Backoff, RestartPolicy};

/// What the caller (the supervisor's run loop) should do after one tick.
pub enum Tick {
    /// Sleep the configured tick interval, then call again.
    Continue,
    /// A transition just ran; call again immediately rather than sleeping,
    /// so a multi-step convergence (e.g. `CatchingUp -> Secondary ->
    /// PreparePromotion -> ...`) doesn't pay the full sleep between every
    /// intermediate step.
    JustTransitioned,
    /// Cancellation was requested from elsewhere (shutdown escalation);
    /// the loop has nothing left to do and the process should exit cleanly.
    Cancelled,
    /// `Dropped` was reached; the loop has nothing left to do, and the
    /// process must exit with the distinct "dropped" code (Invariant 4)
    /// rather than a clean shutdown code.
    Dropped,
}

pub struct ControlLoop {
    node: NodeIdentity,
    config: Config,
    config_path: std::path::PathBuf,
    db: LocalDbController,
    client: ClusterClient,
    store: StateStore,
    cancel: Context<bool>,
    db_restart_policy: RestartPolicy,
    db_backoff: Backoff,
}

impl ControlLoop {
    pub fn new(
        node: NodeIdentity,
        config: Config,
        db: LocalDbController,
        client: ClusterClient,
        store: StateStore,
        cancel: Context<bool>,
    ) -> Self {
        let config_path = config.paths().config_file();
        Self {
            node,
            config,
            config_path,
            db,
            client,
            store,
            cancel,
            db_restart_policy: RestartPolicy::Permanent,
            db_backoff: Backoff::default(),
        }
    }

    /// Runs the control-loop iteration described in §4.6:
    /// 1. if a reload was requested, re-read the config file and reconcile
    ///    any database settings that changed (restarting if needed);
    /// 2. bail out early if cancellation was requested;
    /// 3. reload state from disk (another process may have edited it, e.g.
    ///    `pg_autoctl enable maintenance`);
    /// 4. refresh local database facts (is it running, current LSN);
    /// 5. report those facts to the coordinator via `node_active`;
    /// 6. on a transient coordinator failure past the partition timeout
    ///    while write-capable, self-demote instead of waiting forever;
    /// 7. ensure current state: a role that expects the database running
    ///    gets it restarted (restart-policy-permanent, §4.2) before anything
    ///    else happens this tick;
    /// 8. if `currentRole == assignedRole`, nothing left to do;
    /// 9. otherwise run the FSM transition;
    /// 10. persist state unconditionally, success or retryable failure;
    /// 11. tell the caller whether to sleep before the next tick.
    #[instrument(skip(self))]
    pub fn tick(&mut self, reload_requested: bool) -> Result<Tick, KeeperError> {
        if reload_requested {
            self.reload()?;
        }

        if self.cancel.is_cancelled() {
            return Ok(Tick::Cancelled);
        }

        let mut state = self.store.load()?;
        let now = now_epoch();
        let mut pg_is_running = self.db.is_running();

        // Invariant 2's partition check depends on lastSecondaryContactEpoch
        // being refreshed independently of the coordinator: a write-capable
        // node with a streaming standby is not partitioned even if the
        // coordinator itself is unreachable.
        if pg_is_running
            && state.current_role.is_write_capable()
            && matches!(self.db.connected_standby_count(), Ok(n) if n > 0)
        {
            state.last_secondary_contact_epoch = now;
        }

        let report = self.build_report(&state, pg_is_running)?;

        let assigned = match self.client.node_active(&report) {
            Ok(assigned) => {
                state.last_monitor_contact_epoch = now;
                assigned.assigned_role
            }
            Err(err) if partition_demotion_needed(
                &err,
                state.current_role,
                state.partition_suspected(now, self.config.partition_detection.as_secs()),
            ) =>
            {
                warn!("coordinator unreachable past partition timeout, self-demoting");
                NodeRole::DemoteTimeout
            }
            Err(err) if err.is_transient() => {
                self.store.store(&state)?;
                return Ok(Tick::Continue);
            }
            Err(err) => return Err(err.into()),
        };
        state.assigned_role = assigned;

        // Ensure current state (§4.6 step 7): prime the invariants a
        // transition depends on, independent of whether one runs this tick —
        // a crashed `Primary` with currentRole == assignedRole never reaches
        // the transition call below, so this is the only place that notices.
        pg_is_running = self.ensure_current_state(state.current_role, pg_is_running);

        if state.current_role == assigned {
            self.store.store(&state)?;
            return Ok(Tick::Continue);
        }

        let mut ctx = TransitionContext {
            db: &mut self.db,
            client: &mut self.client,
            config: &self.config,
            node: &self.node,
        };

        match fsm::transition(state.current_role, assigned, &mut ctx) {
            Ok(reached) => {
                info!(from = %state.current_role, to = %reached, "transitioned");
                state.current_role = reached;
                self.store.store(&state)?;
                if reached.is_terminal() {
                    Ok(Tick::Dropped)
                } else {
                    Ok(Tick::JustTransitioned)
                }
            }
            Err(err) if err.is_retryable() => {
                warn!(error = %err, "transition did not complete, retrying next tick");
                self.store.store(&state)?;
                Ok(Tick::Continue)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Re-reads `<name>.cfg` on a reload request (SIGHUP / `pg_autoctl
    /// reload`, §4.6 step 1) and restarts the local database if a setting
    /// that only takes effect at startup changed.
    fn reload(&mut self) -> Result<(), KeeperError> {
        let reloaded = Config::load(&self.config_path)?;
        let restart_needed = reloaded.pgport != self.config.pgport
            || reloaded.auth_method != self.config.auth_method
            || reloaded.ssl_mode != self.config.ssl_mode;
        self.config = reloaded;

        if restart_needed && self.db.is_running() {
            info!("configuration changed, restarting local database to apply it");
            self.db.restart()?;
        }
        Ok(())
    }

    /// A role that expects the database running but finds it isn't gets it
    /// restarted under the restart policy and backoff configured for it
    /// (§4.1's "classify by restart policy, and either restart or broadcast
    /// terminate"; §4.2's restart-policy-permanent guarantee for the local
    /// controller). Failures here are logged and retried next tick rather
    /// than treated as fatal — a transiently-unready database is not an
    /// error condition for the control loop.
    fn ensure_current_state(&mut self, role: NodeRole, pg_is_running: bool) -> bool {
        if pg_is_running || !role.expects_db_running() {
            return pg_is_running;
        }
        if !self.db_restart_policy.should_restart(None) {
            return false;
        }

        let delay = self.db_backoff.next_delay();
        warn!(?delay, %role, "local database is not running, restarting after backoff");
        std::thread::sleep(delay);

        match self.db.start() {
            Ok(_) => {
                self.db_backoff.note_start();
                true
            }
            Err(err) => {
                warn!(error = %err, "restart attempt failed, will retry next tick");
                false
            }
        }
    }

    fn build_report(
        &mut self,
        state: &crate::state::KeeperState,
        pg_is_running: bool,
    ) -> Result<NodeActiveRequest, KeeperError> {
        let current_lsn = if pg_is_running {
            self.db
                .connect()
                .ok()
                .and_then(|mut c| {
                    c.query_one("SELECT pg_current_wal_lsn()::text", &[])
                        .ok()
                        .map(|row| row.get::<_, String>(0))
                })
                .unwrap_or_default()
        } else {
            String::new()
        };

        Ok(NodeActiveRequest {
            formation: self.config.formation.clone(),
            node_id: self.node.node_id,
            group: self.config.group,
            current_role: state.current_role,
            pg_is_running,
            timeline_id: 0,
            current_lsn,
            sync_state: None,
        })
    }

}

/// Invariant 2: a write-capable node that can no longer reach the
/// coordinator or any standby for longer than `partition_detection` must
/// stop accepting writes on its own, rather than wait for a coordinator
/// decision it cannot receive.
fn partition_demotion_needed(
    err: &crate::client::error::ClientError,
    current_role: NodeRole,
    partition_suspected: bool,
) -> bool {
    err.is_transient() && current_role.is_write_capable() && partition_suspected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::error::ClientError;

    fn transient_error() -> ClientError {
        ClientError::DeadlineExceeded(std::time::Duration::from_secs(30))
    }

    #[test]
    fn primary_self_demotes_once_partitioned() {
        assert!(partition_demotion_needed(
            &transient_error(),
            NodeRole::Primary,
            true,
        ));
    }

    #[test]
    fn primary_does_not_self_demote_before_the_timeout() {
        assert!(!partition_demotion_needed(
            &transient_error(),
            NodeRole::Primary,
            false,
        ));
    }

    #[test]
    fn a_standby_never_self_demotes() {
        assert!(!partition_demotion_needed(
            &transient_error(),
            NodeRole::Secondary,
            true,
        ));
    }

    #[test]
    fn a_protocol_error_never_triggers_self_demotion() {
        assert!(!partition_demotion_needed(
            &ClientError::Rejected("bad request".to_string()),
            NodeRole::Primary,
            true,
        ));
    }
}
