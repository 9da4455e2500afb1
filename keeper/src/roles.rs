//! The node role enumeration shared by the state store, the FSM and the
//! cluster client. Every role is valid both as a "current" and as a "goal".

use std::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeRole {
    Init,
    Single,
    WaitPrimary,
    Primary,
    WaitStandby,
    CatchingUp,
    Secondary,
    PrepareMaintenance,
    Maintenance,
    PreparePromotion,
    StopReplication,
    DemoteTimeout,
    Demoted,
    DraftingReplication,
    JoinPrimary,
    ApplySettings,
    ReportLSN,
    FastForward,
    Dropped,
}

#[derive(Debug, Error)]
#[error("unknown role tag: {0}")]
pub struct UnknownRole(pub i32);

impl NodeRole {
    pub const ALL: &'static [NodeRole] = &[
        NodeRole::Init,
        NodeRole::Single,
        NodeRole::WaitPrimary,
        NodeRole::Primary,
        NodeRole::WaitStandby,
        NodeRole::CatchingUp,
        NodeRole::Secondary,
        NodeRole::PrepareMaintenance,
        NodeRole::Maintenance,
        NodeRole::PreparePromotion,
        NodeRole::StopReplication,
        NodeRole::DemoteTimeout,
        NodeRole::Demoted,
        NodeRole::DraftingReplication,
        NodeRole::JoinPrimary,
        NodeRole::ApplySettings,
        NodeRole::ReportLSN,
        NodeRole::FastForward,
        NodeRole::Dropped,
    ];

    /// Roles in which the node is expected to accept client writes.
    pub fn is_write_capable(self) -> bool {
        matches!(self, NodeRole::Single | NodeRole::Primary)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NodeRole::Dropped)
    }

    /// Roles in which a running local postgres is an invariant the control
    /// loop must keep holding, independent of whether a transition is due
    /// this tick (§4.6 step 6, "ensure current state"). Roles that stop the
    /// database on purpose (`Maintenance`, `Demoted`/`DemoteTimeout`,
    /// `StopReplication` mid-promotion, `WaitStandby` pre-basebackup,
    /// `Dropped`) are excluded.
    pub fn expects_db_running(self) -> bool {
        use NodeRole::*;
        matches!(
            self,
            Single
                | WaitPrimary
                | Primary
                | CatchingUp
                | Secondary
                | PrepareMaintenance
                | PreparePromotion
                | JoinPrimary
                | ApplySettings
                | ReportLSN
                | FastForward
        )
    }
}

// Tag assignment mirrors the coordinator's own integer encoding for roles;
// we only need to agree on the integer, never reimplement its SQL surface.
impl From<NodeRole> for i32 {
    fn from(role: NodeRole) -> i32 {
        NodeRole::ALL
            .iter()
            .position(|r| *r == role)
            .expect("NodeRole::ALL must list every variant") as i32
    }
}

impl TryFrom<i32> for NodeRole {
    type Error = UnknownRole;

    fn try_from(tag: i32) -> Result<Self, Self::Error> {
        NodeRole::ALL
            .get(tag as usize)
            .copied()
            .ok_or(UnknownRole(tag))
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_tag_round_trips() {
        for role in NodeRole::ALL {
            let tag: i32 = (*role).into();
            assert_eq!(NodeRole::try_from(tag).unwrap(), *role);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = NodeRole::try_from(9999).unwrap_err();
        assert_eq!(err.0, 9999);
    }

    #[test]
    fn maintenance_and_dropped_do_not_expect_a_running_database() {
        assert!(!NodeRole::Maintenance.expects_db_running());
        assert!(!NodeRole::Demoted.expects_db_running());
        assert!(!NodeRole::DemoteTimeout.expects_db_running());
        assert!(!NodeRole::Dropped.expects_db_running());
        assert!(!NodeRole::WaitStandby.expects_db_running());
        assert!(!NodeRole::Init.expects_db_running());
    }

    #[test]
    fn primary_and_secondary_expect_a_running_database() {
        assert!(NodeRole::Primary.expects_db_running());
        assert!(NodeRole::Single.expects_db_running());
        assert!(NodeRole::Secondary.expects_db_running());
    }
}
