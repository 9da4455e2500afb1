//! Command line surface (§4.8, §6). `Cli::parse()` resolves into a small
//! enum of subcommands; each dispatch function only wires CLI arguments
//! into the library modules below — `init`, `node_active`, `supervisor`,
//! `client` — none of the state-machine logic lives here, matching the
//! teacher's split between `cli.rs` argument parsing and its runtime.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::client::{ClusterClient, NodeActiveRequest, NodeIdentity};
use crate::config::{defaults, Config};
use crate::context::Context;
use crate::error::KeeperError;
use crate::init::InitProtocol;
use crate::node_active::{ControlLoop, Tick as LoopTick};
use crate::pg::controller::{LocalDbController, PgBinaries};
use crate::roles::NodeRole;
use crate::state::StateStore;
use crate::supervisor::pidfile::ServiceEntry;
use crate::supervisor::{Supervisor, Tick as SupervisorTick};

#[derive(Parser, Debug)]
#[command(name = "pg_autoctl", author, about, long_about = None)]
pub struct Cli {
    /// Data directory of the local PostgreSQL instance; every other
    /// on-disk artefact (`<name>.cfg`, `.state`, `.init`, `.pid`) is a
    /// sibling of this path.
    #[arg(long, global = true)]
    pub pgdata: Option<PathBuf>,

    /// Node name; resolves `<name>.cfg` directly instead of scanning
    /// `--pgdata`'s parent directory for the one config file present.
    #[arg(long, global = true)]
    pub name: Option<String>,

    /// Emit machine-readable JSON instead of human-readable text, for
    /// `show` subcommands.
    #[arg(long, global = true)]
    pub json: bool,

    #[arg(long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register a new node and bring it to its initial assigned role.
    Create {
        #[command(subcommand)]
        target: CreateTarget,
    },
    /// Run the supervisor and control loop in the foreground.
    Run,
    /// Signal a running agent to shut down gracefully.
    Stop,
    /// Signal a running agent to reload its configuration.
    Reload,
    Drop {
        #[command(subcommand)]
        target: DropTarget,
    },
    Enable {
        #[command(subcommand)]
        feature: MaintenanceFeature,
    },
    Disable {
        #[command(subcommand)]
        feature: MaintenanceFeature,
    },
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },
    Perform {
        #[command(subcommand)]
        action: PerformAction,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum CreateTarget {
    Postgres {
        #[arg(long)]
        name: String,
        #[arg(long)]
        hostname: String,
        #[arg(long)]
        pgport: u16,
        #[arg(long)]
        formation: Option<String>,
        #[arg(long)]
        group: Option<i32>,
        #[arg(long)]
        monitor: String,
        #[arg(long, default_value = "trust")]
        auth: String,
        #[arg(long = "ssl-mode", default_value = "prefer")]
        ssl_mode: String,
    },
    Monitor {
        #[arg(long)]
        hostname: String,
        #[arg(long)]
        pgport: u16,
    },
}

#[derive(Subcommand, Debug)]
pub enum DropTarget {
    Node {
        #[arg(long)]
        destroy: bool,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        wait: Option<u64>,
    },
    Monitor {
        #[arg(long)]
        destroy: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum MaintenanceFeature {
    Maintenance,
}

#[derive(Subcommand, Debug)]
pub enum ShowTarget {
    State,
    Events,
    Nodes,
    Uri,
    File,
    StandbyNames,
}

#[derive(Subcommand, Debug)]
pub enum PerformAction {
    Failover,
    Promotion,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
}

impl Cli {
    /// Resolves the `<name>.cfg` path for every subcommand except `create`,
    /// which builds its `Config` directly from CLI arguments instead.
    fn pgdata(&self) -> Result<PathBuf, KeeperError> {
        self.pgdata
            .clone()
            .ok_or_else(|| KeeperError::BadArgs("--pgdata is required".to_string()))
    }

    fn load_config(&self) -> Result<Config, KeeperError> {
        let pgdata = self.pgdata()?;
        let parent = pgdata.parent().ok_or_else(|| {
            KeeperError::BadArgs(format!("`{}` has no parent directory", pgdata.display()))
        })?;

        let cfg_path = match &self.name {
            Some(name) => parent.join(format!("{name}.cfg")),
            // Without --name, the single-node-per-pgdata invariant spec.md
            // assumes lets us find the one `*.cfg` sibling by scanning.
            None => std::fs::read_dir(parent)
                .map_err(|_| KeeperError::BadArgs(format!("cannot read `{}`", parent.display())))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .find(|p| p.extension().map(|e| e == "cfg").unwrap_or(false))
                .ok_or_else(|| {
                    KeeperError::BadArgs("no `<name>.cfg` found next to --pgdata".to_string())
                })?,
        };
        Ok(Config::load(&cfg_path)?)
    }
}

pub fn dispatch(cli: Cli) -> Result<(), KeeperError> {
    match &cli.command {
        Command::Create { target } => create(&cli, target),
        Command::Run => run(&cli),
        Command::Stop => stop(&cli),
        Command::Reload => reload(&cli),
        Command::Drop { target } => drop_cmd(&cli, target),
        Command::Enable { feature } => set_maintenance(&cli, feature, true),
        Command::Disable { feature } => set_maintenance(&cli, feature, false),
        Command::Show { what } => show(&cli, what),
        Command::Perform { action } => perform(&cli, action),
        Command::Config { action } => config_cmd(&cli, action),
    }
}

fn create(cli: &Cli, target: &CreateTarget) -> Result<(), KeeperError> {
    let pgdata = cli.pgdata()?;
    match target {
        CreateTarget::Postgres {
            name,
            hostname,
            pgport,
            formation,
            group,
            monitor,
            auth,
            ssl_mode,
        } => {
            let mut config = Config::from_create_args(
                name.clone(),
                hostname.clone(),
                pgdata.clone(),
                *pgport,
                formation.clone().unwrap_or_else(|| "default".to_string()),
                group.unwrap_or(0),
                Some(monitor.clone()),
            );
            config.auth_method = auth.clone();
            config.ssl_mode = ssl_mode.clone();
            config.persist(&config.paths().config_file())?;

            let store = StateStore::new(config.paths());
            let mut db = LocalDbController::new(PgBinaries::default(), pgdata, *pgport)
                .with_db_readiness(config.db_readiness)
                .with_graceful_stop(config.graceful_stop);
            let mut client = ClusterClient::connect(monitor, config.rpc_init_deadline)?;

            let node = NodeIdentity {
                node_id: 0,
                group_id: config.group,
                name: config.name.clone(),
                hostname: config.hostname.clone(),
                port: config.pgport,
                system_identifier: 0,
            };

            let mut protocol = InitProtocol {
                db: &mut db,
                client: &mut client,
                config: &config,
                store: &store,
            };
            let state = protocol.create(node)?;
            info!(role = %state.current_role, "node created");
            Ok(())
        }
        CreateTarget::Monitor { hostname, pgport } => {
            // The monitor/coordinator itself is out of scope for this
            // agent (it is a plain PostgreSQL instance plus the
            // `pgautofailover` extension's SQL surface); `create monitor`
            // only provisions the local database this agent will run.
            let mut db = LocalDbController::new(PgBinaries::default(), pgdata.clone(), *pgport);
            if db.data_directory_is_empty()? {
                db.initdb("trust")?;
            }
            db.start()?;
            info!(%hostname, pgport, "monitor database initialized");
            Ok(())
        }
    }
}

fn run(cli: &Cli) -> Result<(), KeeperError> {
    let config = cli.load_config()?;
    let paths = config.paths();
    let store = StateStore::new(paths.clone());

    let mut db = LocalDbController::new(PgBinaries::default(), config.pgdata.clone(), config.pgport)
        .with_db_readiness(config.db_readiness)
        .with_graceful_stop(config.graceful_stop);
    let client = ClusterClient::connect(
        config.monitor_uri.as_deref().unwrap_or_default(),
        config.rpc_per_call,
    )?;

    let state = store.load()?;
    let node = NodeIdentity {
        node_id: state.current_node_id,
        group_id: state.current_group,
        name: config.name.clone(),
        hostname: config.hostname.clone(),
        port: config.pgport,
        system_identifier: state.system_identifier,
    };

    if !db.is_running() && state.current_role.is_write_capable() {
        db.start()?;
    }

    let supervisor = Supervisor::new(paths.pid_file(), paths.pid_file().with_extension("logsem"))?;
    let cancel: Context<bool> = supervisor.cancellation();

    let mut control_loop = ControlLoop::new(node, config, db, client, store, cancel);
    let services = [ServiceEntry {
        pid: std::process::id() as i32,
        name: "postgres".to_string(),
    }];

    // `Tick::Dropped` and `Tick::Cancelled` both stop the supervisor's run
    // loop, but only the former must surface as `KeeperError::Dropped` so
    // `main` exits with the distinct "dropped" code (Invariant 4) instead of
    // a clean shutdown. The closure can only return `SupervisorTick::Stop`
    // for both, so the distinction is recorded here and checked afterwards.
    let dropped = std::cell::Cell::new(false);

    supervisor
        .run(&services, &[], |reload| match control_loop.tick(reload) {
            Ok(LoopTick::Continue) => {
                std::thread::sleep(defaults::SLEEP_TICK);
                Ok(SupervisorTick::Continue)
            }
            Ok(LoopTick::JustTransitioned) => Ok(SupervisorTick::Continue),
            Ok(LoopTick::Cancelled) => Ok(SupervisorTick::Stop),
            Ok(LoopTick::Dropped) => {
                dropped.set(true);
                Ok(SupervisorTick::Stop)
            }
            Err(err) => Err(crate::supervisor::error::SupervisorError::Fatal(
                err.to_string(),
            )),
        })
        .map_err(KeeperError::from)?;

    if dropped.get() {
        return Err(KeeperError::Dropped);
    }
    Ok(())
}

fn stop(cli: &Cli) -> Result<(), KeeperError> {
    let config = cli.load_config()?;
    let pidfile = crate::supervisor::pidfile::Pidfile::new(config.paths().pid_file());
    let parsed = pidfile.read().map_err(KeeperError::from)?;
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(parsed.agent_pid),
        nix::sys::signal::Signal::SIGTERM,
    )
    .ok();
    Ok(())
}

fn reload(cli: &Cli) -> Result<(), KeeperError> {
    let config = cli.load_config()?;
    let pidfile = crate::supervisor::pidfile::Pidfile::new(config.paths().pid_file());
    let parsed = pidfile.read().map_err(KeeperError::from)?;
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(parsed.agent_pid),
        nix::sys::signal::Signal::SIGHUP,
    )
    .ok();
    Ok(())
}

fn drop_cmd(cli: &Cli, target: &DropTarget) -> Result<(), KeeperError> {
    let config = cli.load_config()?;
    match target {
        DropTarget::Node {
            force,
            wait,
            destroy,
        } => {
            let mut client = ClusterClient::connect(
                config.monitor_uri.as_deref().unwrap_or_default(),
                config.rpc_per_call,
            )?;
            let retry = crate::client::retry::RetryPolicy::new(config.rpc_init_deadline);
            retry.retry(|| client.remove_by_name(&config.name, &config.hostname, *force))?;
            if let Some(secs) = wait {
                std::thread::sleep(Duration::from_secs(*secs));
            }
            if *destroy {
                destroy_local_node(&config)?;
            }
            Ok(())
        }
        DropTarget::Monitor { destroy } => {
            if *destroy {
                destroy_local_node(&config)?;
            }
            Ok(())
        }
    }
}

/// `--destroy`: the stop-then-rm ordering is fixed so a failed stop aborts
/// destruction rather than leaving a half-torn-down data directory behind
/// that a later `create` could mistake for a usable one.
fn destroy_local_node(config: &Config) -> Result<(), KeeperError> {
    use fs::directory_manager::{DirectoryManager, DirectoryManagerFs};

    let mut db = LocalDbController::new(
        PgBinaries::default(),
        config.pgdata.clone(),
        config.pgport,
    );
    if db.is_running() {
        db.stop()?;
    }

    let paths = config.paths();
    DirectoryManagerFs
        .delete(paths.data_directory())
        .map_err(|source| {
            KeeperError::Internal(format!(
                "could not remove data directory `{}`: {source}",
                paths.data_directory().display()
            ))
        })?;

    for sibling in [
        paths.config_file(),
        paths.state_file(),
        paths.init_file(),
        paths.pid_file(),
    ] {
        std::fs::remove_file(&sibling).ok();
    }

    info!(pgdata = %paths.data_directory().display(), "node destroyed");
    Ok(())
}

fn set_maintenance(
    cli: &Cli,
    _feature: &MaintenanceFeature,
    enable: bool,
) -> Result<(), KeeperError> {
    let config = cli.load_config()?;
    let store = StateStore::new(config.paths());
    let mut client = ClusterClient::connect(
        config.monitor_uri.as_deref().unwrap_or_default(),
        config.rpc_per_call,
    )?;

    let mut state = store.load()?;
    let target_role = if enable {
        NodeRole::PrepareMaintenance
    } else {
        NodeRole::Single
    };
    let assigned = client.node_active(&NodeActiveRequest {
        formation: config.formation.clone(),
        node_id: state.current_node_id,
        group: config.group,
        current_role: state.current_role,
        pg_is_running: true,
        timeline_id: 0,
        current_lsn: String::new(),
        sync_state: None,
    })?;
    state.assigned_role = if enable { target_role } else { assigned.assigned_role };
    store.store(&state)?;
    Ok(())
}

fn show(cli: &Cli, what: &ShowTarget) -> Result<(), KeeperError> {
    let config = cli.load_config()?;
    let store = StateStore::new(config.paths());

    match what {
        ShowTarget::State => {
            let state = store.load()?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&state)
                        .map_err(|e| KeeperError::Internal(e.to_string()))?
                );
            } else {
                println!("{:?}", state);
            }
        }
        ShowTarget::File => {
            println!("{}", config.paths().state_file().display());
        }
        ShowTarget::Uri => {
            println!("{}", config.monitor_uri.as_deref().unwrap_or(""));
        }
        ShowTarget::Nodes | ShowTarget::Events => {
            let mut client = ClusterClient::connect(
                config.monitor_uri.as_deref().unwrap_or_default(),
                config.rpc_per_call,
            )?;
            let nodes = client.get_nodes(&config.formation, config.group)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&nodes)
                        .map_err(|e| KeeperError::Internal(e.to_string()))?
                );
            } else {
                for node in &nodes {
                    println!(
                        "{} {} {}:{} {}",
                        node.node_id, node.name, node.hostname, node.port, node.role
                    );
                }
            }
        }
        ShowTarget::StandbyNames => {
            let mut client = ClusterClient::connect(
                config.monitor_uri.as_deref().unwrap_or_default(),
                config.rpc_per_call,
            )?;
            let names = client.synchronous_standby_names(&config.formation, config.group)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "synchronous_standby_names": names })
                );
            } else {
                println!("{names}");
            }
        }
    }
    Ok(())
}

fn perform(cli: &Cli, action: &PerformAction) -> Result<(), KeeperError> {
    let config = cli.load_config()?;
    let store = StateStore::new(config.paths());
    let mut client = ClusterClient::connect(
        config.monitor_uri.as_deref().unwrap_or_default(),
        config.rpc_per_call,
    )?;

    let mut state = store.load()?;
    let requested_role = match action {
        PerformAction::Failover => NodeRole::PreparePromotion,
        PerformAction::Promotion => NodeRole::PreparePromotion,
    };
    let assigned = client.node_active(&NodeActiveRequest {
        formation: config.formation.clone(),
        node_id: state.current_node_id,
        group: config.group,
        current_role: state.current_role,
        pg_is_running: true,
        timeline_id: 0,
        current_lsn: String::new(),
        sync_state: None,
    })?;
    state.assigned_role = if assigned.assigned_role == requested_role {
        requested_role
    } else {
        assigned.assigned_role
    };
    store.store(&state)?;
    Ok(())
}

fn config_cmd(cli: &Cli, action: &ConfigAction) -> Result<(), KeeperError> {
    let mut config = cli.load_config()?;
    match action {
        ConfigAction::Get { key } => {
            match config.get(key) {
                Some(value) => println!("{value}"),
                None => return Err(KeeperError::BadArgs(format!("unknown key `{key}`"))),
            }
            Ok(())
        }
        ConfigAction::Set { key, value } => {
            config.set(key, value.clone())?;
            let path = config.paths().config_file();
            config.persist(&path)?;
            Ok(())
        }
    }
}
