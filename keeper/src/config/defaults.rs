//! Semantic timeout defaults from the concurrency & resource model. All are
//! configurable in `<name>.cfg`; these are the values used when a key is
//! absent.

use std::time::Duration;

pub const DB_READINESS: Duration = Duration::from_secs(10);
pub const GRACEFUL_STOP: Duration = Duration::from_secs(30);
pub const PARTITION_DETECTION: Duration = Duration::from_secs(20);
pub const RPC_PER_CALL: Duration = Duration::from_secs(30);
pub const RPC_INIT_DEADLINE: Duration = Duration::from_secs(60);
pub const SLEEP_TICK: Duration = Duration::from_secs(5);
pub const NOTIFICATION_WAIT_TICK: Duration = Duration::from_secs(1);
pub const SHUTDOWN_ESCALATION: Duration = Duration::from_secs(5);
pub const SHUTDOWN_INTERRUPT: Duration = Duration::from_secs(10);
