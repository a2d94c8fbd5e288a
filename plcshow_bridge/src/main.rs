//! # plcshow Bridge Binary
//!
//! Polls a PLC data block and drives a presentation engine from its control
//! bits. Operator commands are read from stdin.
//!
//! # Usage
//!
//! ```bash
//! # Connect with plcshow.toml (created with defaults if missing)
//! plcshow
//!
//! # In-memory PLC; raise requests with `start N` / `next`
//! plcshow --simulate -v
//!
//! # Override the controller address and data block
//! plcshow --config /etc/plcshow/line4.toml --host 10.0.4.20 --db 12
//! ```

use clap::Parser;
use crossbeam::channel::{self, select};
use plcshow_bridge::console::{self, HELP, OperatorCommand};
use plcshow_bridge::drivers::simulation::SimulatedPlc;
use plcshow_bridge::presentation::{self, Presenter};
use plcshow_bridge::{
    ControlHandle, ControlMessage, Dispatcher, DriverRegistry, IndexMapping, MappingTable,
    MonitorLoop, MonitorSettings, MonitorState, PlcSession,
};
use plcshow_common::bits::ControlBits;
use plcshow_common::config::{BridgeConfig, LogLevel};
use plcshow_common::consts::{DEFAULT_CONFIG_PATH, SIM_BLOCK_LEN};
use plcshow_common::link::PlcConnector;
use plcshow_common::status::{StatusEvent, StatusPublisher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{Level, debug, error, info, info_span, warn};
use tracing_subscriber::EnvFilter;

/// plcshow - PLC-driven presentation bridge
#[derive(Parser, Debug)]
#[command(name = "plcshow")]
#[command(version)]
#[command(about = "Drives a presentation engine from PLC control bits")]
#[command(long_about = None)]
struct Args {
    /// Path to the configuration file. Created with defaults if missing.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use the in-memory simulated PLC instead of the configured driver
    #[arg(short = 's', long)]
    simulate: bool,

    /// Override the configured driver
    #[arg(short, long)]
    driver: Option<String>,

    /// Override the controller address
    #[arg(long)]
    host: Option<String>,

    /// Override the data block number
    #[arg(long)]
    db: Option<u16>,

    /// Do not connect and start monitoring on startup
    #[arg(long)]
    no_connect: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("plcshow startup failed: {}", e);
        eprintln!("plcshow: {e}");
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let (mut config, created) = BridgeConfig::load_or_create(&args.config)?;
    setup_tracing(&args, config.shared.log_level);

    let span = info_span!("service", name = %config.shared.service_name);
    let _enter = span.enter();
    info!("plcshow v{} starting...", env!("CARGO_PKG_VERSION"));
    if created {
        info!("Wrote default configuration to {}", args.config.display());
    }

    if let Some(host) = args.host.clone() {
        config.plc.host = host;
    }
    if let Some(db) = args.db {
        config.plc.db_number = db;
    }
    if let Some(driver) = args.driver.clone() {
        config.plc.driver = driver;
    }
    if args.simulate {
        info!("Simulation mode enabled");
        config.plc.driver = "simulation".to_string();
    }
    config.validate()?;

    let (status, status_rx) = StatusPublisher::channel();

    // The simulator handle must share memory with the link the session opens.
    let (connector, simulator): (Box<dyn PlcConnector>, Option<SimulatedPlc>) =
        if config.plc.driver == "simulation" {
            let plc = SimulatedPlc::new();
            (Box::new(plc.clone()), Some(plc))
        } else {
            let registry = DriverRegistry::with_builtin_drivers();
            debug!("Available drivers: {:?}", registry.list_drivers());
            (registry.create_connector(&config.plc.driver)?, None)
        };
    let session = Arc::new(PlcSession::new(connector, status.clone()));

    let (control, control_rx) = ControlHandle::channel();
    let monitor = MonitorLoop::new(
        Arc::clone(&session),
        control,
        status.clone(),
        MonitorSettings::from_config(&config),
    );

    let mapping = MappingTable::from_config(&config)?;
    info!("{} presentations mapped", mapping.len());
    for (index, path) in mapping.entries() {
        if mapping.lookup(index).is_none() {
            warn!("Index {}: {} does not exist", index, path.display());
        }
    }
    let dispatcher = Dispatcher::new(
        presentation::from_config(&config.presentation),
        mapping,
        status,
    );

    let (cmd_tx, cmd_rx) = channel::unbounded();
    let signal_tx = cmd_tx.clone();
    let stop = monitor.stop_handle();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        stop.stop();
        let _ = signal_tx.send(OperatorCommand::Quit);
    })?;
    console::spawn_stdin_reader(cmd_tx)?;

    let mut app = App {
        config,
        config_path: args.config.clone(),
        session,
        monitor,
        dispatcher,
        simulator,
    };
    if !args.no_connect {
        app.execute(OperatorCommand::Connect);
        if app.session.is_connected() {
            app.execute(OperatorCommand::MonitorStart);
        }
    }
    info!("Type 'help' for operator commands");

    // Control context: presenter, mapping and selection are only touched here.
    loop {
        select! {
            recv(control_rx) -> message => match message {
                Ok(ControlMessage::Event(event)) => app.dispatcher.handle(event),
                Ok(ControlMessage::Shutdown) | Err(_) => break,
            },
            recv(cmd_rx) -> command => match command {
                Ok(OperatorCommand::Quit) | Err(_) => break,
                Ok(command) => app.execute(command),
            },
            recv(status_rx) -> event => {
                if let Ok(event) = event {
                    report_status(&event);
                }
            },
        }
    }

    app.shutdown();
    info!("plcshow shutdown complete");
    Ok(())
}

/// Everything the control context owns.
struct App {
    config: BridgeConfig,
    config_path: PathBuf,
    session: Arc<PlcSession>,
    monitor: MonitorLoop,
    dispatcher: Dispatcher<Box<dyn Presenter>, MappingTable>,
    simulator: Option<SimulatedPlc>,
}

impl App {
    fn execute(&mut self, command: OperatorCommand) {
        debug!("Operator command {:?}", command);
        match command {
            OperatorCommand::Connect => {
                if self.session.is_connected() {
                    info!("Already connected");
                    return;
                }
                if let Err(e) = self.session.connect(&self.config.plc.endpoint()) {
                    error!("Connection failed: {}", e);
                }
            }
            OperatorCommand::Disconnect => {
                self.monitor.stop();
                self.session.disconnect();
            }
            OperatorCommand::MonitorStart => {
                if !self.session.is_connected() {
                    warn!("Not connected; polling waits until 'connect'");
                }
                if let Err(e) = self.monitor.start() {
                    error!("Failed to start monitoring: {}", e);
                }
            }
            OperatorCommand::MonitorStop => self.monitor.stop(),
            OperatorCommand::SimulateStart(index) => {
                self.simulate_request(ControlBits::START, Some(index));
            }
            OperatorCommand::SimulateAdvance => self.simulate_request(ControlBits::ADVANCE, None),
            OperatorCommand::Map { index, path } => {
                match self.dispatcher.mapping_mut().insert(index, &path) {
                    Ok(Some(previous)) => {
                        info!(
                            "Index {} -> {} (was {})",
                            index,
                            path.display(),
                            previous.display()
                        );
                        self.save_mapping();
                    }
                    Ok(None) => {
                        info!("Index {} -> {}", index, path.display());
                        self.save_mapping();
                    }
                    Err(e) => warn!("Cannot map index {}: {}", index, e),
                }
            }
            OperatorCommand::Unmap(index) => match self.dispatcher.mapping_mut().remove(index) {
                Ok(path) => {
                    info!("Index {} unmapped ({})", index, path.display());
                    self.save_mapping();
                }
                Err(e) => warn!("{}", e),
            },
            OperatorCommand::Mappings => self.print_mappings(),
            OperatorCommand::Status => self.print_status(),
            OperatorCommand::Help => println!("{HELP}"),
            OperatorCommand::Quit => {}
        }
    }

    /// Raise `bits` in the simulated block and release them after a hold
    /// long enough for two polls to see the level.
    fn simulate_request(&self, bits: ControlBits, index: Option<u8>) {
        let Some(plc) = self.simulator.clone() else {
            warn!("'start' and 'next' are only available with --simulate");
            return;
        };
        if self.monitor.state() != MonitorState::Running {
            warn!("Monitor is stopped; the request is seen once monitoring starts");
        }

        let block = self.config.plc.db_number;
        let offset = self.config.plc.control_offset;
        if usize::from(offset) + 2 > SIM_BLOCK_LEN {
            warn!("Control offset {} lies outside the simulated block", offset);
            return;
        }
        if let Some(index) = index {
            plc.poke(block, offset + 1, &[index]);
        }
        plc.raise(block, offset, bits);
        info!("Simulated {:?} (index {:?})", bits, index);

        let hold = self.config.timing.poll_interval() * 2 + Duration::from_millis(50);
        let release = thread::Builder::new()
            .name("plcshow-sim-release".to_string())
            .spawn(move || {
                thread::sleep(hold);
                plc.lower(block, offset, bits);
            });
        if let Err(e) = release {
            warn!("Cannot schedule release of {:?}: {}", bits, e);
        }
    }

    /// Persist operator edits; the in-memory table stays authoritative on failure.
    fn save_mapping(&self) {
        let path: &Path = &self.config_path;
        match self.dispatcher.mapping().save(path) {
            Ok(()) => debug!("Mappings saved to {}", path.display()),
            Err(e) => warn!("Mappings not saved to {}: {}", path.display(), e),
        }
    }

    fn print_mappings(&self) {
        let mapping = self.dispatcher.mapping();
        if mapping.is_empty() {
            println!("no mappings");
            return;
        }
        for (index, path) in mapping.entries() {
            let marker = if mapping.lookup(index).is_some() {
                ""
            } else {
                "  (missing)"
            };
            println!("{index:>3}  {}{marker}", path.display());
        }
    }

    fn print_status(&self) {
        let stats = self.monitor.stats();
        println!(
            "link:      {} ({} {}:{} DB{})",
            if self.session.is_connected() {
                "connected"
            } else {
                "disconnected"
            },
            self.session.driver_name(),
            self.config.plc.host,
            self.config.plc.port,
            self.config.plc.db_number
        );
        println!("monitor:   {:?}", self.monitor.state());
        println!(
            "selection: {}",
            match self.dispatcher.current_index() {
                Some(index) => index.to_string(),
                None => "none".to_string(),
            }
        );
        println!("playing:   {}", self.dispatcher.presenter().is_active());
        println!(
            "polls:     {} ticks, {} read failures, {} events, {} pulses",
            stats.ticks, stats.read_failures, stats.events, stats.pulses
        );
    }

    fn shutdown(&mut self) {
        self.monitor.stop();
        self.session.disconnect();
    }
}

fn report_status(event: &StatusEvent) {
    match event {
        StatusEvent::Connected { driver } => info!("Status: connected ({})", driver),
        StatusEvent::Disconnected => info!("Status: disconnected"),
        StatusEvent::MonitorStarted => info!("Status: monitoring"),
        StatusEvent::MonitorStopped => info!("Status: monitoring stopped"),
        StatusEvent::IndexChanged(index) => info!("Status: PLC index {}", index),
        StatusEvent::MappingMissing(index) => warn!("Status: no presentation for index {}", index),
        StatusEvent::PresentationOpened { index, locator } => {
            info!("Status: current presentation {} ({})", locator.display(), index)
        }
        StatusEvent::PresentationFailed { operation, reason } => {
            warn!("Status: {} failed: {}", operation, reason)
        }
        StatusEvent::AdvanceFailed(reason) => warn!("Status: advance failed: {}", reason),
    }
}

/// Setup tracing subscriber based on CLI arguments and `[shared]`.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        configured.into()
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
