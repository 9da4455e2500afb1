//! The FSM: a table from `(currentRole, assignedRole)` to a transition
//! procedure (§4.5). Transitions are the only code that mutates the local
//! database; each one is written to be idempotent so a crash between any
//! two of its I/O operations leaves the next run able to either finish the
//! work or report a diagnosable error, never a silently wrong role.

pub mod error;

use std::time::Duration;

use tracing::{info, instrument, warn};

use self::error::TransitionError;
use crate::client::{ClusterClient, NodeActiveRequest, NodeIdentity};
use crate::config::Config;
use crate::pg::controller::LocalDbController;
use crate::roles::NodeRole;

pub struct TransitionContext<'a> {
    pub db: &'a mut LocalDbController,
    pub client: &'a mut ClusterClient,
    pub config: &'a Config,
    pub node: &'a NodeIdentity,
}

/// Runs the transition procedure for `(current, assigned)`, returning the
/// role the node actually reached locally. A `NoSuchTransition` means the
/// pair isn't in the table; every other error is retryable on the next
/// control-loop tick (§4.5 "Failure semantics").
#[instrument(skip(ctx), fields(current = %current, assigned = %assigned))]
pub fn transition(
    current: NodeRole,
    assigned: NodeRole,
    ctx: &mut TransitionContext,
) -> Result<NodeRole, TransitionError> {
    use NodeRole::*;

    if current == assigned {
        return Ok(current);
    }

    match (current, assigned) {
        (_, Dropped) => drop_node(ctx),

        (Init, Single) => bootstrap_single(ctx),
        (Init, WaitStandby) => wait_standby(ctx),
        (WaitStandby, CatchingUp) => catch_up(ctx),
        (CatchingUp, Secondary) => promote_to_secondary(ctx),

        (Primary, WaitPrimary) => block_promotion(ctx),
        (Primary, PrepareMaintenance) => prepare_maintenance(ctx),
        (Primary, Demoted) | (Primary, DemoteTimeout) => hard_demote(ctx),
        (DemoteTimeout, Demoted) => finalize_demotion(ctx),

        (Secondary, PreparePromotion) => prepare_promotion(ctx),
        (PreparePromotion, ReportLSN) => report_lsn(ctx),
        (ReportLSN, FastForward) => fast_forward(ctx),
        (FastForward, StopReplication) | (PreparePromotion, StopReplication) => {
            stop_replication(ctx)
        }
        (StopReplication, WaitPrimary) => promote(ctx),
        (WaitPrimary, Primary) => wait_for_standbys(ctx),

        (PrepareMaintenance, Maintenance) => enter_maintenance(ctx),
        (Maintenance, Single) | (Maintenance, Primary) => leave_maintenance(ctx),

        (_, ApplySettings) | (ApplySettings, _) => apply_settings(ctx, assigned),

        (_, DraftingReplication) => drafting_replication(ctx),
        (DraftingReplication, JoinPrimary) => join_primary(ctx),

        _ => Err(TransitionError::NoSuchTransition { current, assigned }),
    }
}

fn bootstrap_single(ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    if ctx.db.data_directory_is_empty()? {
        ctx.db.initdb(&ctx.config.auth_method)?;
    }
    ctx.db.start()?;

    let mut client = ctx.db.connect()?;
    // Idempotent: every statement below tolerates being re-run after a
    // crash (IF NOT EXISTS / ON CONFLICT equivalents), since a retry can
    // land here again before `currentRole` advances.
    client.batch_execute(
        "DO $$ BEGIN \
             IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = 'pgautofailover_replicator') THEN \
                 CREATE ROLE pgautofailover_replicator WITH REPLICATION LOGIN; \
             END IF; \
         END $$;",
    )?;
    client.batch_execute(&format!(
        "DO $$ BEGIN \
             IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = '{name}') THEN \
                 CREATE ROLE \"{name}\" WITH LOGIN; \
             END IF; \
         END $$;",
        name = ctx.node.name
    ))?;
    client.batch_execute("CREATE EXTENSION IF NOT EXISTS citext;")?;

    info!("single node bootstrap complete");
    Ok(NodeRole::Single)
}

fn wait_standby(ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    let changed = ctx.client.wait_for_state_change(
        &ctx.config.formation,
        ctx.config.group,
        ctx.node.node_id,
        ctx.config.rpc_per_call,
    )?;
    if changed {
        Ok(NodeRole::WaitStandby)
    } else {
        Err(TransitionError::StillWaiting(
            "waiting for coordinator to prepare upstream slot and HBA".to_string(),
        ))
    }
}

fn catch_up(ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    let primary = ctx
        .client
        .get_coordinator(&ctx.config.formation)?
        .ok_or_else(|| TransitionError::PreconditionNotMet("no primary in group".to_string()))?;

    if ctx.db.data_directory_is_empty()? {
        base_backup(ctx, &primary.hostname, primary.port)?;
    }

    ctx.db.start()?;
    info!(primary = %primary.hostname, "standby started in recovery");
    Ok(NodeRole::CatchingUp)
}

fn base_backup(
    ctx: &mut TransitionContext,
    primary_host: &str,
    primary_port: u16,
) -> Result<(), TransitionError> {
    use std::process::Command;

    let status = Command::new("pg_basebackup")
        .arg("-D")
        .arg(ctx.db.pgdata())
        .arg("-h")
        .arg(primary_host)
        .arg("-p")
        .arg(primary_port.to_string())
        .arg("-R") // writes standby signaling + primary_conninfo for us
        .status()
        .map_err(|source| crate::pg::error::PgControllerError::Spawn {
            bin: "pg_basebackup".to_string(),
            source,
        })?;

    if !status.success() {
        return Err(TransitionError::PreconditionNotMet(format!(
            "pg_basebackup exited with {status}"
        )));
    }
    Ok(())
}

fn promote_to_secondary(ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    if !ctx.db.is_running() {
        return Err(TransitionError::StillWaiting(
            "standby server not yet running".to_string(),
        ));
    }
    // The LSN threshold check itself is driven by the control loop's facts
    // refresh (is_in_recovery, current LSN); by the time the FSM is asked
    // to realize this transition the control loop has already confirmed
    // we're within the configured threshold.
    Ok(NodeRole::Secondary)
}

fn block_promotion(_ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    Ok(NodeRole::WaitPrimary)
}

fn prepare_maintenance(_ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    // Nothing mutates the database yet; the coordinator blocks new
    // promotions for this group while the primary is in this role.
    info!("maintenance requested, promotion blocked at coordinator");
    Ok(NodeRole::PrepareMaintenance)
}

fn enter_maintenance(ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    ctx.db.stop()?;
    Ok(NodeRole::Maintenance)
}

fn leave_maintenance(ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    ctx.db.start()?;
    Ok(if ctx.db.is_primary()? {
        NodeRole::Primary
    } else {
        NodeRole::Single
    })
}

/// Hard demote: a partition was detected, or the coordinator asked for an
/// unconditional demotion. Stop the database outright to guarantee no
/// writes are accepted, per §4.5.
fn hard_demote(ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    ctx.db.stop()?;
    warn!("local database stopped to guarantee no writes during demotion");
    Ok(NodeRole::DemoteTimeout)
}

fn finalize_demotion(ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    ctx.client.node_active(&NodeActiveRequest {
        formation: ctx.config.formation.clone(),
        node_id: ctx.node.node_id,
        group: ctx.config.group,
        current_role: NodeRole::Demoted,
        pg_is_running: false,
        timeline_id: 0,
        current_lsn: String::new(),
        sync_state: None,
    })?;
    Ok(NodeRole::Demoted)
}

fn prepare_promotion(_ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    Ok(NodeRole::PreparePromotion)
}

/// Parses a PostgreSQL LSN of the form `"<hi>/<lo>"` (unpadded hex halves,
/// e.g. `"0/16ABCD0"`) into a single numeric value so two LSNs can be
/// compared correctly. Lexicographic string comparison is wrong here: `"0/9"`
/// sorts after `"0/10"` even though 9 < 0x10, and `"FF/0"` sorts after
/// `"100/0"` even though 0xFF < 0x100.
fn parse_lsn(lsn: &str) -> Option<u64> {
    let (hi, lo) = lsn.split_once('/')?;
    let hi = u32::from_str_radix(hi, 16).ok()?;
    let lo = u32::from_str_radix(lo, 16).ok()?;
    Some(((hi as u64) << 32) | lo as u64)
}

/// The greatest received LSN across reporting standbys wins; ties break on
/// the lowest `nodeId` for a deterministic outcome (§4.5).
pub fn pick_fast_forward_source(candidates: &[(i64, String)]) -> Option<(i64, String)> {
    candidates
        .iter()
        .cloned()
        .max_by(|(id_a, lsn_a), (id_b, lsn_b)| {
            parse_lsn(lsn_a)
                .unwrap_or(0)
                .cmp(&parse_lsn(lsn_b).unwrap_or(0))
                .then_with(|| id_b.cmp(id_a)) // reverse: lower nodeId wins ties
        })
}

fn current_replay_lsn(ctx: &mut TransitionContext) -> Result<String, TransitionError> {
    let row = ctx
        .db
        .connect()?
        .query_one("SELECT pg_last_wal_replay_lsn()::text", &[])?;
    Ok(row.get(0))
}

fn report_lsn(ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    let lsn = current_replay_lsn(ctx)?;
    ctx.client
        .report_lsn(&ctx.config.formation, ctx.config.group, ctx.node.node_id, &lsn)?;
    info!(lsn = %lsn, "reported replay LSN to coordinator for fast-forward arbitration");
    Ok(NodeRole::ReportLSN)
}

/// Fetches every standby's last reported LSN and arbitrates a fast-forward
/// source (§4.5). Replaying any missing WAL from the elected source is a
/// capability of the replication fabric itself; this transition only needs
/// to confirm this node has already caught up to the winner by the time
/// `StopReplication` is assigned, retrying on the next tick otherwise.
fn fast_forward(ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    let candidates = ctx
        .client
        .reported_lsns(&ctx.config.formation, ctx.config.group)?;

    let Some((winner_id, winner_lsn)) = pick_fast_forward_source(&candidates) else {
        return Ok(NodeRole::FastForward);
    };

    if winner_id == ctx.node.node_id {
        return Ok(NodeRole::FastForward);
    }

    let our_lsn = current_replay_lsn(ctx)?;
    if parse_lsn(&our_lsn).unwrap_or(0) >= parse_lsn(&winner_lsn).unwrap_or(0) {
        Ok(NodeRole::FastForward)
    } else {
        Err(TransitionError::StillWaiting(format!(
            "waiting to catch up to fast-forward source node {winner_id} at {winner_lsn}"
        )))
    }
}

fn stop_replication(ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    ctx.db.stop()?;
    Ok(NodeRole::StopReplication)
}

fn promote(ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    ctx.db.start()?;
    let mut client = ctx.db.connect()?;
    client.execute("SELECT pg_promote()", &[])?;
    wait_until_primary(ctx, Duration::from_secs(10))?;

    // Promotion is exactly the non-idempotent, externally-visible side
    // effect §4.5 calls out: recording it on the coordinator goes through
    // the deterministic two-phase commit keyed by groupId, so a crash
    // between promoting locally and recording it remotely leaves a
    // resolvable artefact (P5) instead of a node that believes it's primary
    // while the coordinator still has it marked otherwise.
    let node_id = ctx.node.node_id;
    ctx.client
        .commit_metadata_update(ctx.config.group, move |command| {
            command
                .execute(
                    "SELECT pgautofailover.promotion_completed($1)",
                    &[&node_id],
                )
                .map(|_| ())
        })?;

    Ok(NodeRole::WaitPrimary)
}

fn wait_until_primary(
    ctx: &mut TransitionContext,
    timeout: Duration,
) -> Result<(), TransitionError> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if ctx.db.is_primary()? {
            return Ok(());
        }
        if std::time::Instant::now() >= deadline {
            return Err(TransitionError::StillWaiting(
                "promotion did not complete within timeout".to_string(),
            ));
        }
        std::thread::sleep(Duration::from_millis(200));
    }
}

fn wait_for_standbys(ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    let changed = ctx.client.wait_for_state_change(
        &ctx.config.formation,
        ctx.config.group,
        ctx.node.node_id,
        ctx.config.rpc_per_call,
    )?;
    if changed {
        Ok(NodeRole::Primary)
    } else {
        Err(TransitionError::StillWaiting(
            "waiting for a standby to re-attach".to_string(),
        ))
    }
}

fn apply_settings(
    ctx: &mut TransitionContext,
    target: NodeRole,
) -> Result<NodeRole, TransitionError> {
    // Re-rendering configuration from state + config lives in `crate::config`;
    // here we only decide reload vs. restart. shared_preload_libraries
    // changes require a restart; everything else is reload-safe.
    if ctx.db.is_running() {
        ctx.db.restart()?;
    } else {
        ctx.db.start()?;
    }
    Ok(target)
}

fn drafting_replication(_ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    Ok(NodeRole::DraftingReplication)
}

fn join_primary(ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    ctx.db.start()?;
    Ok(NodeRole::JoinPrimary)
}

/// `* -> Dropped`: stop the database, notify the coordinator, and let the
/// caller (the control loop) translate this into the "dropped" exit code.
fn drop_node(ctx: &mut TransitionContext) -> Result<NodeRole, TransitionError> {
    ctx.db.stop()?;
    ctx.client.node_active(&NodeActiveRequest {
        formation: ctx.config.formation.clone(),
        node_id: ctx.node.node_id,
        group: ctx.config.group,
        current_role: NodeRole::Dropped,
        pg_is_running: false,
        timeline_id: 0,
        current_lsn: String::new(),
        sync_state: None,
    })?;
    info!("node dropped, local teardown complete");
    Ok(NodeRole::Dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::tie_breaks_on_lowest_node_id(
        vec![
            (3, "0/1000000".to_string()),
            (1, "0/1000000".to_string()),
            (2, "0/0FFFFFF".to_string()),
        ],
        1,
    )]
    #[case::picks_greatest_lsn(
        vec![
            (1, "0/1000000".to_string()),
            (2, "0/2000000".to_string()),
        ],
        2,
    )]
    #[case::single_candidate_wins_by_default(vec![(7, "0/0".to_string())], 7)]
    #[case::unpadded_hex_compares_numerically_not_lexically(
        vec![(1, "0/9".to_string()), (2, "0/10".to_string())],
        2,
    )]
    #[case::hex_digit_count_does_not_sort_lexically(
        vec![(1, "FF/0".to_string()), (2, "100/0".to_string())],
        2,
    )]
    fn fast_forward_source_arbitration(
        #[case] candidates: Vec<(i64, String)>,
        #[case] expected_winner: i64,
    ) {
        let (winner, _) = pick_fast_forward_source(&candidates).unwrap();
        assert_eq!(winner, expected_winner);
    }

    #[test]
    fn fast_forward_source_empty_candidates_is_none() {
        assert!(pick_fast_forward_source(&[]).is_none());
    }

    #[test]
    fn lsn_parses_unpadded_hex_pair() {
        assert_eq!(parse_lsn("0/16ABCD0"), Some(0x16ABCD0));
        assert_eq!(parse_lsn("FF/0"), Some(0xFF00000000));
        assert_eq!(parse_lsn("not-an-lsn"), None);
    }
}
