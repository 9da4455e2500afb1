//! `pg-auto-keeper`: the per-node agent described in the design (see
//! `README.md`/design notes) — the supervisor tree, control loop, FSM and
//! init protocol that drive a local PostgreSQL instance through the role
//! transitions a coordinator assigns.

pub mod cli;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod fsm;
pub mod init;
pub mod logging;
pub mod node_active;
pub mod pg;
pub mod roles;
pub mod state;
pub mod supervisor;
