//! Typed RPCs to the coordinator (§4.3 "Cluster Client"). The wire protocol
//! is the coordinator's native SQL function surface — we never reimplement
//! its state machine, only call it — so this module is a thin, strongly
//! typed wrapper over a `postgres::Client` command session plus a second,
//! dedicated session for the `LISTEN`/`NOTIFY` notification channel.

pub mod error;
pub mod retry;

use std::time::Duration;

use postgres::{Client, NoTls};
use tracing::{info, instrument, warn};

use self::error::ClientError;
use crate::roles::NodeRole;

/// `{nodeId, groupId, name, hostname, port, systemIdentifier}` per §3.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub node_id: i64,
    pub group_id: i32,
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub system_identifier: u64,
}

/// What the coordinator hands back after `register`/`node_active`: the
/// role it wants this node in, plus anything the node needs to act on it.
#[derive(Debug, Clone)]
pub struct AssignedState {
    pub node_id: i64,
    pub group_id: i32,
    pub assigned_role: NodeRole,
    pub replication_slot_name: Option<String>,
    pub primary_host: Option<String>,
    pub primary_port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub formation: String,
    pub group: i32,
    pub desired_role: NodeRole,
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub system_identifier: u64,
}

#[derive(Debug, Clone)]
pub struct NodeActiveRequest {
    pub formation: String,
    pub node_id: i64,
    pub group: i32,
    pub current_role: NodeRole,
    pub pg_is_running: bool,
    pub timeline_id: u32,
    pub current_lsn: String,
    pub sync_state: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct NodeRow {
    pub node_id: i64,
    pub group_id: i32,
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub role: NodeRole,
}

pub struct ClusterClient {
    uri: String,
    command: Client,
    notify: Option<Client>,
    rpc_timeout: Duration,
}

impl ClusterClient {
    #[instrument(skip(uri))]
    pub fn connect(uri: &str, rpc_timeout: Duration) -> Result<Self, ClientError> {
        let command = Client::connect(uri, NoTls).map_err(ClientError::Connect)?;
        Ok(Self {
            uri: uri.to_string(),
            command,
            notify: None,
            rpc_timeout,
        })
    }

    /// Registers a node for the first time. Returns the assigned state and
    /// the `nodeId`/`groupId` the coordinator issued.
    #[instrument(skip(self, req), fields(formation = %req.formation, name = %req.name))]
    pub fn register(&mut self, req: &RegisterRequest) -> Result<AssignedState, ClientError> {
        let row = self
            .command
            .query_one(
                "SELECT node_id, group_id, assigned_role, replication_slot_name, \
                 primary_host, primary_port \
                 FROM pgautofailover.register_node($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &req.formation,
                    &req.group,
                    &req.name,
                    &req.hostname,
                    &(req.port as i32),
                    &(req.system_identifier as i64),
                    &i32::from(req.desired_role),
                ],
            )
            .map_err(|source| ClientError::Rpc {
                call: "register_node",
                source,
            })?;

        row_to_assigned_state(&row)
    }

    /// Reports the current role and facts to the coordinator, returns the
    /// assigned state. This is the call the control loop makes every tick.
    #[instrument(skip(self, req), fields(node_id = req.node_id))]
    pub fn node_active(&mut self, req: &NodeActiveRequest) -> Result<AssignedState, ClientError> {
        let row = self
            .command
            .query_one(
                "SELECT node_id, group_id, assigned_role, replication_slot_name, \
                 primary_host, primary_port \
                 FROM pgautofailover.node_active($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &req.formation,
                    &req.node_id,
                    &req.group,
                    &i32::from(req.current_role),
                    &req.pg_is_running,
                    &(req.timeline_id as i32),
                    &req.current_lsn,
                    &req.sync_state,
                ],
            )
            .map_err(|source| ClientError::Rpc {
                call: "node_active",
                source,
            })?;

        row_to_assigned_state(&row)
    }

    /// Blocks on the notification channel (opening it lazily) for up to
    /// `timeout`. Returns `true` if the group state changed; a timeout is
    /// not an error per §4.3.
    #[instrument(skip(self))]
    pub fn wait_for_state_change(
        &mut self,
        formation: &str,
        group: i32,
        node_id: i64,
        timeout: Duration,
    ) -> Result<bool, ClientError> {
        let channel = format!("state_changed_{formation}_{group}");
        let notify = self.ensure_notify_session(&channel)?;

        match notify.notifications().timeout_iter(timeout).next() {
            Some(Ok(_)) => {
                info!(node_id, %channel, "coordinator signaled a state change");
                Ok(true)
            }
            Some(Err(source)) => {
                self.notify = None;
                Err(ClientError::Rpc {
                    call: "wait_for_state_change",
                    source,
                })
            }
            None => Ok(false),
        }
    }

    /// Idle sessions are closed between waits to avoid half-open
    /// connections lingering across control-loop iterations.
    pub fn close_notification_channel(&mut self) {
        self.notify = None;
    }

    fn ensure_notify_session(&mut self, channel: &str) -> Result<&mut Client, ClientError> {
        if self.notify.is_none() {
            let mut client = Client::connect(&self.uri, NoTls).map_err(ClientError::Connect)?;
            client
                .batch_execute(&format!("LISTEN {channel}"))
                .map_err(|source| ClientError::Rpc {
                    call: "listen",
                    source,
                })?;
            self.notify = Some(client);
        }
        Ok(self.notify.as_mut().expect("just set"))
    }

    #[instrument(skip(self))]
    pub fn remove_by_name(
        &mut self,
        name: &str,
        hostname: &str,
        force: bool,
    ) -> Result<(i64, i32), ClientError> {
        let row = self
            .command
            .query_opt(
                "SELECT node_id, group_id FROM pgautofailover.remove_node($1, $2, $3)",
                &[&name, &hostname, &force],
            )
            .map_err(|source| ClientError::Rpc {
                call: "remove_node",
                source,
            })?;

        match row {
            Some(row) => Ok((row.get(0), row.get(1))),
            None => Err(ClientError::NotFound {
                name: name.to_string(),
                hostname: hostname.to_string(),
            }),
        }
    }

    #[instrument(skip(self))]
    pub fn get_state(&mut self, formation: &str, group: i32) -> Result<Vec<NodeRow>, ClientError> {
        self.get_nodes(formation, group)
    }

    #[instrument(skip(self))]
    pub fn get_nodes(&mut self, formation: &str, group: i32) -> Result<Vec<NodeRow>, ClientError> {
        let rows = self
            .command
            .query(
                "SELECT node_id, group_id, node_name, node_host, node_port, reported_state \
                 FROM pgautofailover.get_nodes($1, $2)",
                &[&formation, &group],
            )
            .map_err(|source| ClientError::Rpc {
                call: "get_nodes",
                source,
            })?;

        rows.iter()
            .map(|row| {
                let role: i32 = row.get(5);
                Ok(NodeRow {
                    node_id: row.get(0),
                    group_id: row.get(1),
                    name: row.get(2),
                    hostname: row.get(3),
                    port: row.get::<_, i32>(4) as u16,
                    role: NodeRole::try_from(role)?,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    pub fn get_coordinator(&mut self, formation: &str) -> Result<Option<NodeRow>, ClientError> {
        Ok(self
            .get_nodes(formation, 0)?
            .into_iter()
            .find(|n| n.role.is_write_capable()))
    }

    /// `synchronous_standby_names` is feature-detected: older coordinators
    /// expose it with a different argument arity. We try the modern
    /// signature first and fall back rather than pinning to one version,
    /// per §9's open question on feature-detecting coordinator signatures.
    #[instrument(skip(self))]
    pub fn synchronous_standby_names(
        &mut self,
        formation: &str,
        group: i32,
    ) -> Result<String, ClientError> {
        let modern = self.command.query_one(
            "SELECT pgautofailover.synchronous_standby_names($1, $2)",
            &[&formation, &group],
        );
        match modern {
            Ok(row) => Ok(row.get(0)),
            Err(_) => {
                warn!("falling back to legacy synchronous_standby_names signature");
                let row = self
                    .command
                    .query_one(
                        "SELECT pgautofailover.synchronous_standby_names($1)",
                        &[&formation],
                    )
                    .map_err(|source| ClientError::Rpc {
                        call: "synchronous_standby_names",
                        source,
                    })?;
                Ok(row.get(0))
            }
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    /// Deterministic two-phase-commit transaction name for a cluster-metadata
    /// update scoped to `group_id` (§4.5, §9). Deriving the name purely from
    /// `group_id` is what lets a retry after a crash recognize and resolve
    /// its own prior, in-flight attempt instead of leaving it dangling.
    pub fn metadata_update_tx_name(group_id: i32) -> String {
        format!("pg_autoctl_group_{group_id}")
    }

    /// Resolves any prepared transaction left over from a previous attempt
    /// at the same `group_id`'s metadata update, before starting a new one.
    /// A crash between `PREPARE TRANSACTION` and its resolution is the one
    /// window a plain `node_active` call can't observe on its own; checking
    /// `pg_prepared_xacts` first is what makes this idempotent across
    /// retries (P5).
    #[instrument(skip(self))]
    pub fn resolve_dangling_metadata_update(
        &mut self,
        group_id: i32,
        commit: bool,
    ) -> Result<(), ClientError> {
        let name = Self::metadata_update_tx_name(group_id);
        let exists: bool = self
            .command
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM pg_prepared_xacts WHERE gid = $1)",
                &[&name],
            )
            .map_err(|source| ClientError::Rpc {
                call: "pg_prepared_xacts",
                source,
            })?
            .get(0);

        if !exists {
            return Ok(());
        }

        let verb = if commit { "COMMIT" } else { "ROLLBACK" };
        warn!(%name, verb, "resolving dangling prepared metadata update from a prior attempt");
        self.command
            .batch_execute(&format!("{verb} PREPARED '{name}'"))
            .map_err(|source| ClientError::Rpc {
                call: "resolve_prepared",
                source,
            })
    }

    /// Runs `body` inside a transaction, prepares it under the deterministic
    /// name for `group_id`, then immediately commits it. Splitting prepare
    /// from commit (rather than a plain `COMMIT`) is what gives a crash
    /// between the two a recognizable, resolvable artefact on the next
    /// attempt instead of silently losing or double-applying the update.
    /// `BEGIN`/`PREPARE TRANSACTION` are issued directly on the command
    /// session rather than through `postgres::Transaction`, since that
    /// wrapper's `Drop` issues a `ROLLBACK` that no longer applies once the
    /// transaction has been prepared and handed off.
    #[instrument(skip(self, body))]
    pub fn commit_metadata_update(
        &mut self,
        group_id: i32,
        body: impl FnOnce(&mut Client) -> Result<(), postgres::Error>,
    ) -> Result<(), ClientError> {
        self.resolve_dangling_metadata_update(group_id, true)?;

        let name = Self::metadata_update_tx_name(group_id);
        self.command
            .batch_execute("BEGIN")
            .map_err(|source| ClientError::Rpc { call: "begin", source })?;

        if let Err(source) = body(&mut self.command) {
            self.command.batch_execute("ROLLBACK").ok();
            return Err(ClientError::Rpc {
                call: "metadata_update_body",
                source,
            });
        }

        self.command
            .batch_execute(&format!("PREPARE TRANSACTION '{name}'"))
            .map_err(|source| ClientError::Rpc {
                call: "prepare_transaction",
                source,
            })?;

        self.command
            .batch_execute(&format!("COMMIT PREPARED '{name}'"))
            .map_err(|source| ClientError::Rpc {
                call: "commit_prepared",
                source,
            })
    }

    /// Submits this node's current replay LSN for fast-forward arbitration
    /// during a promotion sequence (§4.5 "ReportLSN/FastForward exchange").
    #[instrument(skip(self))]
    pub fn report_lsn(
        &mut self,
        formation: &str,
        group: i32,
        node_id: i64,
        lsn: &str,
    ) -> Result<(), ClientError> {
        self.command
            .execute(
                "SELECT pgautofailover.report_lsn($1, $2, $3, $4)",
                &[&formation, &group, &node_id, &lsn],
            )
            .map_err(|source| ClientError::Rpc {
                call: "report_lsn",
                source,
            })?;
        Ok(())
    }

    /// The LSNs every other node in the group most recently reported via
    /// `report_lsn`, for the promoting standby to arbitrate a fast-forward
    /// source from (§4.5: "greatest received LSN across reporting standbys;
    /// ties broken by lowest nodeId").
    #[instrument(skip(self))]
    pub fn reported_lsns(
        &mut self,
        formation: &str,
        group: i32,
    ) -> Result<Vec<(i64, String)>, ClientError> {
        let rows = self
            .command
            .query(
                "SELECT node_id, reported_lsn FROM pgautofailover.group_reported_lsns($1, $2)",
                &[&formation, &group],
            )
            .map_err(|source| ClientError::Rpc {
                call: "group_reported_lsns",
                source,
            })?;

        Ok(rows.iter().map(|row| (row.get(0), row.get(1))).collect())
    }

    /// Optional sharded-extension capability (§9 open question): delegates
    /// "worker group membership" to a coordinator extension when present.
    /// Feature-detected rather than assumed, since the standalone path is
    /// the one this agent implements faithfully; a coordinator without the
    /// extension simply yields `None` rather than an error.
    #[instrument(skip(self))]
    pub fn worker_group_membership(
        &mut self,
        formation: &str,
        group: i32,
    ) -> Result<Option<Vec<NodeRow>>, ClientError> {
        match self.command.query(
            "SELECT node_id, group_id, node_name, node_host, node_port, reported_state \
             FROM pgautofailover.get_worker_group_members($1, $2)",
            &[&formation, &group],
        ) {
            Ok(rows) => rows
                .iter()
                .map(|row| {
                    let role: i32 = row.get(5);
                    Ok(NodeRow {
                        node_id: row.get(0),
                        group_id: row.get(1),
                        name: row.get(2),
                        hostname: row.get(3),
                        port: row.get::<_, i32>(4) as u16,
                        role: NodeRole::try_from(role)?,
                    })
                })
                .collect::<Result<Vec<_>, ClientError>>()
                .map(Some),
            Err(source) if source.as_db_error().is_none() => Err(ClientError::Rpc {
                call: "worker_group_membership",
                source,
            }),
            Err(_) => {
                // Function does not exist on this coordinator: standalone
                // mode, not a sharded formation. Not an error.
                Ok(None)
            }
        }
    }
}

fn row_to_assigned_state(row: &postgres::Row) -> Result<AssignedState, ClientError> {
    let role: i32 = row.get(2);
    Ok(AssignedState {
        node_id: row.get(0),
        group_id: row.get(1),
        assigned_role: NodeRole::try_from(role)?,
        replication_slot_name: row.get(3),
        primary_host: row.get(4),
        primary_port: row.get::<_, Option<i32>>(5).map(|p| p as u16),
    })
}
