//! Print controller
//!
//! Provides a high-level interface for serial-attached G-code devices.
//!
//! General workflow:
//! - Connect to a port with [`Controller::connect`]; the firmware dialect
//!   is auto-detected during the handshake
//! - Send commands ([`Controller::push_command`], [`Controller::print`], ...)
//! - Observe effects through [`Controller::subscribe`]
//! - [`Controller::disconnect`] when done
//!
//! All operations are fire-and-forget: they enqueue or immediately
//! transmit, never block for a device reply. The flow-control engine sends
//! the next queued command only after the firmware plugin has classified a
//! readiness signal for the previous one, so the device's small receive
//! buffer can never be overrun.
//!
//! A device that stops responding after detection stalls the queue
//! indefinitely; that is deliberate. There is no per-command timeout, and
//! recovery is an operator decision via [`Controller::stop`] or
//! [`Controller::emergency_stop`].

pub mod job;
pub mod queue;

pub use job::PrintJob;
pub use queue::{CommandQueue, QueuedCommand};

use crate::firmware::{FirmwarePlugin, FirmwareRegistry, ResponseClass};
use crate::transport::serial::{list_ports, SerialTransport};
use crate::transport::{ConnectionParams, NoOpTransport, Transport};
use parking_lot::Mutex;
use printkit_core::{
    Axis, AxisMask, ConnectionError, ControllerError, ControllerEvent, ControllerState,
    EventDispatcher, FirmwareError, GCommand, MCommand, Temperature, Units,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const DEFAULT_DETECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Context captured while a print job is paused
///
/// Created on pause, consumed and discarded on resume.
#[derive(Debug)]
struct PauseContext {
    /// Head position reported by the device after the pause query
    position: Option<(f32, f32, f32)>,
    /// Commands to replay immediately on resume, in order
    actions: Vec<String>,
}

/// Mutable controller state
///
/// One mutex around this struct serializes response processing, timer
/// callbacks, and public operations: each runs to completion before the
/// next starts.
struct Inner {
    transport: Box<dyn Transport>,
    registry: Arc<FirmwareRegistry>,
    state: ControllerState,
    plugin: Option<Box<dyn FirmwarePlugin>>,
    queue: CommandQueue,
    /// Commands allowed to flow while the job queue is held back (the
    /// pause position query, the resume restore move, pause actions).
    /// Always drained ahead of the job queue.
    side_queue: VecDeque<String>,
    in_flight: Option<QueuedCommand>,
    temperature: Temperature,
    job: Option<PrintJob>,
    pause: Option<PauseContext>,
    detection_deadline: Option<Instant>,
    detection_timeout: Duration,
    probe_interval: Duration,
    last_probe: Instant,
    extruder_count: u32,
}

impl Inner {
    fn new(transport: Box<dyn Transport>, registry: Arc<FirmwareRegistry>) -> Self {
        Self {
            transport,
            registry,
            state: ControllerState::Disconnected,
            plugin: None,
            queue: CommandQueue::new(),
            side_queue: VecDeque::new(),
            in_flight: None,
            temperature: Temperature::default(),
            job: None,
            pause: None,
            detection_deadline: None,
            detection_timeout: DEFAULT_DETECTION_TIMEOUT,
            probe_interval: Duration::ZERO,
            last_probe: Instant::now(),
            extruder_count: 1,
        }
    }

    fn set_state(&mut self, state: ControllerState, events: &EventDispatcher) {
        if self.state != state {
            tracing::debug!("State {} -> {}", self.state, state);
            self.state = state;
            let _ = events.publish(ControllerEvent::StateChanged(state));
        }
    }

    /// Write bytes to the device; a failed write lands the controller in
    /// `Error` and surfaces the message once.
    fn write_raw(&mut self, bytes: &[u8], events: &EventDispatcher) -> bool {
        match self.transport.send(bytes) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Write to device failed: {}", e);
                self.set_state(ControllerState::Error, events);
                let _ = events.publish(ControllerEvent::Error(e.to_string()));
                false
            }
        }
    }

    /// Send one command and occupy the in-flight slot
    fn transmit(&mut self, command: QueuedCommand, events: &EventDispatcher) {
        debug_assert!(self.in_flight.is_none());
        let Some(plugin) = self.plugin.as_ref() else {
            return;
        };

        let bytes = plugin.translate(&command.text);
        tracing::debug!("TX {}", command.text);
        if self.write_raw(&bytes, events) {
            let starts_job = command.job && self.state == ControllerState::StartingPrint;
            self.in_flight = Some(command);
            if starts_job {
                self.set_state(ControllerState::Busy, events);
            }
        }
    }

    /// Process one complete received line
    fn handle_line(&mut self, line: &str, events: &EventDispatcher) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        if self.state == ControllerState::Connecting {
            self.try_detect(line, events);
            let _ = events.publish(ControllerEvent::MessageReceived(line.to_string()));
            return;
        }

        let class = match self.plugin.as_ref() {
            Some(plugin) => plugin.classify(line),
            None => {
                let _ = events.publish(ControllerEvent::MessageReceived(line.to_string()));
                return;
            }
        };

        match class {
            ResponseClass::TemperatureReport(temp) => {
                self.temperature = temp;
                let _ = events.publish(ControllerEvent::TemperatureChanged(temp));
            }
            ResponseClass::Accepted | ResponseClass::Busy => self.on_ready(events),
            ResponseClass::Unrecognized => {
                if self.state == ControllerState::Paused {
                    self.capture_pause_position(line);
                }
            }
        }

        let _ = events.publish(ControllerEvent::MessageReceived(line.to_string()));
    }

    /// A readiness signal arrived: account the in-flight command and
    /// advance the queue
    fn on_ready(&mut self, events: &EventDispatcher) {
        if let Some(done) = self.in_flight.take() {
            if done.job {
                let mut progress = None;
                if let Some(job) = self.job.as_mut() {
                    let pct = job.acknowledge();
                    progress = Some((pct, job.is_complete()));
                }
                if let Some((pct, complete)) = progress {
                    if complete {
                        tracing::info!("Print job finished");
                        self.job = None;
                        self.set_state(ControllerState::FinishedPrint, events);
                        self.set_state(ControllerState::Idle, events);
                    }
                    let _ = events.publish(ControllerEvent::PrintProgressChanged(pct));
                }
            }
        }
        self.advance(events);
    }

    /// Transmit the next command if the in-flight slot is free
    ///
    /// The side channel always drains first; the job queue is held back
    /// while paused.
    fn advance(&mut self, events: &EventDispatcher) {
        if self.in_flight.is_some() {
            return;
        }
        if matches!(
            self.state,
            ControllerState::Disconnected | ControllerState::Connecting | ControllerState::Error
        ) {
            return;
        }

        if let Some(text) = self.side_queue.pop_front() {
            self.transmit(QueuedCommand::new(text), events);
            return;
        }

        if self.state == ControllerState::Paused {
            return;
        }

        if let Some(command) = self.queue.pop_next() {
            self.transmit(command, events);
        } else if self.state == ControllerState::Busy && self.job.is_none() {
            self.set_state(ControllerState::Idle, events);
        }
    }

    /// Scan a line received during detection for a registered firmware name
    fn try_detect(&mut self, line: &str, events: &EventDispatcher) {
        for token in line.split_whitespace() {
            if let Some(value) = token.strip_prefix("EXTRUDER_COUNT:") {
                if let Ok(count) = value.parse() {
                    self.extruder_count = count;
                }
            }
        }

        if let Some(name) = self.registry.match_line(line).map(str::to_string) {
            if let Some(plugin) = self.registry.create(&name) {
                tracing::info!("Detected {} firmware", name);
                self.plugin = Some(plugin);
                self.detection_deadline = None;
                self.set_state(ControllerState::Idle, events);
            }
        }
    }

    /// Send the firmware-info request, bypassing the queue, and arm the
    /// detection deadline
    fn begin_detection(&mut self, events: &EventDispatcher) {
        self.plugin = None;
        let request = format!("{}\n", MCommand::M115.to_command(None, None));
        if self.write_raw(request.as_bytes(), events) {
            self.detection_deadline = Some(Instant::now() + self.detection_timeout);
        }
    }

    /// Timer phase: detection deadline and temperature probe
    fn tick(&mut self, events: &EventDispatcher) {
        if self.state == ControllerState::Connecting {
            if let Some(deadline) = self.detection_deadline {
                if Instant::now() >= deadline {
                    self.detection_deadline = None;
                    let timeout_ms = self.detection_timeout.as_millis() as u64;
                    tracing::warn!("Firmware detection timed out after {}ms", timeout_ms);
                    self.set_state(ControllerState::Error, events);
                    let _ = events.publish(ControllerEvent::Error(
                        FirmwareError::DetectionTimeout { timeout_ms }.to_string(),
                    ));
                }
            }
            return;
        }

        if self.probe_interval.is_zero()
            || self.plugin.is_none()
            || matches!(
                self.state,
                ControllerState::Disconnected | ControllerState::Error
            )
        {
            return;
        }

        if self.last_probe.elapsed() >= self.probe_interval {
            self.last_probe = Instant::now();
            self.probe_temperature();
        }
    }

    /// Enqueue one temperature query unless one is already outstanding
    fn probe_temperature(&mut self) {
        let query = MCommand::M105.to_command(None, None);
        let outstanding = self.queue.contains(&query)
            || self.side_queue.iter().any(|text| text == &query)
            || self
                .in_flight
                .as_ref()
                .is_some_and(|command| command.text == query);

        if !outstanding {
            self.queue.push(QueuedCommand::new(query));
        }
    }

    /// While paused, remember the first position report the device sends
    fn capture_pause_position(&mut self, line: &str) {
        let Some(ctx) = self.pause.as_mut() else {
            return;
        };
        if ctx.position.is_none() {
            ctx.position = parse_position(line);
        }
    }

    // Public-operation bodies. Guards return ControllerError so callers can
    // surface them; everything else is fire-and-forget.

    fn start_job(&mut self, job: PrintJob, events: &EventDispatcher) -> Result<(), ControllerError> {
        if self.state != ControllerState::Idle {
            return Err(ControllerError::InvalidState {
                current: self.state.to_string(),
                operation: "start a print".to_string(),
            });
        }

        tracing::info!("Printing {} ({} commands)", job.file_name(), job.total());
        for command in job.commands() {
            self.queue.push(QueuedCommand::job(command.clone()));
        }
        self.job = Some(job);
        self.set_state(ControllerState::StartingPrint, events);
        let _ = events.publish(ControllerEvent::PrintProgressChanged(0.0));
        Ok(())
    }

    fn pause(&mut self, pause_actions: &str, events: &EventDispatcher) -> Result<(), ControllerError> {
        if !matches!(
            self.state,
            ControllerState::Busy | ControllerState::StartingPrint
        ) {
            return Err(ControllerError::InvalidState {
                current: self.state.to_string(),
                operation: "pause".to_string(),
            });
        }

        let actions = pause_actions
            .split(',')
            .map(str::trim)
            .filter(|action| !action.is_empty())
            .map(String::from)
            .collect();
        self.pause = Some(PauseContext {
            position: None,
            actions,
        });

        // Ask where the head stopped so resume can return to it.
        self.side_queue
            .push_back(MCommand::M114.to_command(None, None));
        self.set_state(ControllerState::Paused, events);
        Ok(())
    }

    fn resume(&mut self, events: &EventDispatcher) -> Result<(), ControllerError> {
        if self.state != ControllerState::Paused {
            return Err(ControllerError::InvalidState {
                current: self.state.to_string(),
                operation: "resume".to_string(),
            });
        }

        if let Some(ctx) = self.pause.take() {
            if let Some((x, y, z)) = ctx.position {
                let restore = format!("X{:.2} Y{:.2} Z{:.2}", x, y, z);
                self.side_queue
                    .push_back(GCommand::G0.to_command(Some(&restore)));
            }
            for action in ctx.actions {
                self.side_queue.push_back(action);
            }
        }

        self.set_state(ControllerState::Busy, events);
        Ok(())
    }

    fn stop(&mut self, events: &EventDispatcher) {
        if matches!(
            self.state,
            ControllerState::Disconnected | ControllerState::Connecting | ControllerState::Error
        ) {
            self.clear_work();
            return;
        }

        self.set_state(ControllerState::Stopping, events);
        self.clear_work();
        self.set_state(ControllerState::Idle, events);
    }

    fn emergency_stop(&mut self, events: &EventDispatcher) {
        if !self.transport.is_open() {
            return;
        }

        let halt = MCommand::M112.to_command(None, None);
        let bytes = match self.plugin.as_ref() {
            Some(plugin) => plugin.translate(&halt),
            None => format!("{}\n", halt).into_bytes(),
        };

        // Bypasses the queue and the in-flight gate entirely.
        tracing::warn!("Emergency stop");
        let _ = self.transport.send(&bytes);
        self.clear_work();

        // M112 halts the firmware; the device needs a reset before it will
        // accept further work.
        self.set_state(ControllerState::Error, events);
    }

    fn clear_work(&mut self) {
        self.queue.clear();
        self.side_queue.clear();
        self.in_flight = None;
        self.job = None;
        self.pause = None;
    }
}

/// Parse a position report of the form `X:<f> Y:<f> Z:<f> ...`
///
/// The first occurrence of each axis wins, so the duplicate stepper counts
/// Marlin appends after `Count` are ignored.
fn parse_position(line: &str) -> Option<(f32, f32, f32)> {
    let mut x = None;
    let mut y = None;
    let mut z = None;

    for token in line.split_whitespace() {
        if let Some(value) = token.strip_prefix("X:") {
            if x.is_none() {
                x = value.parse().ok();
            }
        } else if let Some(value) = token.strip_prefix("Y:") {
            if y.is_none() {
                y = value.parse().ok();
            }
        } else if let Some(value) = token.strip_prefix("Z:") {
            if z.is_none() {
                z = value.parse().ok();
            }
        }
    }

    Some((x?, y?, z?))
}

/// High-level controller for a serial-attached G-code device
///
/// Owns the command queue, the active firmware plugin, and the connection
/// state. Effects of every operation are observable through the event
/// stream returned by [`Controller::subscribe`].
pub struct Controller {
    inner: Arc<Mutex<Inner>>,
    events: EventDispatcher,
    io_task: Option<JoinHandle<()>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    port_watch_task: Option<JoinHandle<()>>,
}

impl Controller {
    /// Create a new controller over the given firmware registry
    pub fn new(registry: FirmwareRegistry) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new(
                Box::new(NoOpTransport::new()),
                Arc::new(registry),
            ))),
            events: EventDispatcher::default(),
            io_task: None,
            shutdown_tx: None,
            port_watch_task: None,
        }
    }

    /// Library version
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Subscribe to controller events
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Connect to a serial port and start firmware detection
    pub fn connect(&mut self, port: &str, baud_rate: u32) -> anyhow::Result<()> {
        self.connect_with(
            Box::new(SerialTransport::new()),
            ConnectionParams::new(port, baud_rate),
        )
    }

    /// Connect over an already-constructed transport
    ///
    /// Opens the transport, transmits the firmware-info request, and starts
    /// the I/O loop. The controller reaches `Idle` once a registered
    /// firmware name appears in a response line, or `Error` if the
    /// detection deadline expires first.
    pub fn connect_with(
        &mut self,
        mut transport: Box<dyn Transport>,
        params: ConnectionParams,
    ) -> anyhow::Result<()> {
        {
            let inner = self.inner.lock();
            if !matches!(
                inner.state,
                ControllerState::Disconnected | ControllerState::Error
            ) {
                return Err(ControllerError::InvalidState {
                    current: inner.state.to_string(),
                    operation: "connect".to_string(),
                }
                .into());
            }
        }

        if let Err(e) = transport.open(&params) {
            let mut inner = self.inner.lock();
            inner.set_state(ControllerState::Error, &self.events);
            let _ = self.events.publish(ControllerEvent::Error(e.to_string()));
            return Err(e.into());
        }

        {
            let mut inner = self.inner.lock();
            inner.transport = transport;
            inner.set_state(ControllerState::Connecting, &self.events);
            inner.begin_detection(&self.events);
        }

        self.start_io_loop();
        Ok(())
    }

    /// Close the connection and reset controller state
    pub fn disconnect(&mut self) -> anyhow::Result<()> {
        self.stop_io_loop();

        let mut inner = self.inner.lock();
        let _ = inner.transport.close();
        inner.plugin = None;
        inner.detection_deadline = None;
        inner.clear_work();
        inner.set_state(ControllerState::Disconnected, &self.events);
        Ok(())
    }

    /// Restart firmware detection, unbinding the current plugin first
    pub fn detect_firmware(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        if !inner.transport.is_open() {
            return Err(ConnectionError::NotConnected.into());
        }
        inner.set_state(ControllerState::Connecting, &self.events);
        inner.begin_detection(&self.events);
        Ok(())
    }

    /// Bind a firmware plugin by name, skipping detection
    pub fn load_firmware_plugin(&self, name: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let plugin = inner
            .registry
            .create(name)
            .ok_or_else(|| FirmwareError::UnknownPlugin {
                name: name.to_string(),
            })?;

        tracing::info!("Loaded {} firmware plugin", plugin.name());
        inner.plugin = Some(plugin);
        inner.detection_deadline = None;
        if inner.state == ControllerState::Connecting {
            inner.set_state(ControllerState::Idle, &self.events);
        }
        Ok(())
    }

    /// Names of the registered firmware plugins
    pub fn available_firmware_plugins(&self) -> Vec<String> {
        self.inner.lock().registry.names()
    }

    /// Name of the currently bound firmware plugin, if any
    pub fn firmware_plugin_name(&self) -> Option<String> {
        self.inner
            .lock()
            .plugin
            .as_ref()
            .map(|plugin| plugin.name().to_string())
    }

    /// Push a raw command onto the queue
    pub fn push_command(&self, command: impl Into<String>) {
        self.inner.lock().queue.push(QueuedCommand::new(command.into()));
    }

    /// Start printing a G-code file
    pub fn print(&self, file: impl AsRef<Path>) -> anyhow::Result<()> {
        let job = PrintJob::from_file(file)?;
        self.inner.lock().start_job(job, &self.events)?;
        Ok(())
    }

    /// Stop the print: empty the queue and return to `Idle`
    ///
    /// The connection stays open. Safe to call from any non-terminal state.
    pub fn stop(&self) {
        self.inner.lock().stop(&self.events);
    }

    /// Halt the device immediately via M112
    ///
    /// Transmits even while another command is in flight, then resets all
    /// queued work. The controller lands in `Error`: the device needs a
    /// reset before it will accept further commands.
    pub fn emergency_stop(&self) {
        self.inner.lock().emergency_stop(&self.events);
    }

    /// Pause an in-progress print
    ///
    /// Queries the head position so [`Controller::resume`] can return to
    /// it. `pause_actions` is a comma-separated list of commands to run on
    /// resume, before the job continues (e.g. retract, park, lower bed).
    pub fn pause(&self, pause_actions: &str) -> anyhow::Result<()> {
        self.inner.lock().pause(pause_actions, &self.events)?;
        Ok(())
    }

    /// Resume a paused print
    ///
    /// Replays the restore move and the captured pause actions in order,
    /// then continues the job from where it left off.
    pub fn resume(&self) -> anyhow::Result<()> {
        self.inner.lock().resume(&self.events)?;
        Ok(())
    }

    /// Home the given axes
    pub fn home(&self, axes: AxisMask) {
        let command = if axes.is_empty() {
            GCommand::G28.to_command(None)
        } else {
            GCommand::G28.to_command(Some(&axes.letters()))
        };
        self.push_command(command);
    }

    /// Home all axes
    pub fn home_all(&self) {
        self.push_command(GCommand::G28.to_command(None));
    }

    /// Move one axis by `distance` (or to `distance` in absolute mode)
    pub fn move_axis(&self, axis: Axis, distance: f32) {
        let arg = format!("{}{:.2}", axis.letter(), distance);
        self.push_command(GCommand::G1.to_command(Some(&arg)));
    }

    /// Set the extruder temperature
    pub fn set_extruder_temperature(&self, temperature: u32, extruder: u32, and_wait: bool) {
        let code = if and_wait {
            MCommand::M109
        } else {
            MCommand::M104
        };
        let temp = temperature.to_string();
        let index = (extruder > 0).then(|| extruder.to_string());
        self.push_command(code.to_command(Some(&temp), index.as_deref()));
    }

    /// Set the bed temperature
    pub fn set_bed_temperature(&self, temperature: u32, and_wait: bool) {
        let code = if and_wait {
            MCommand::M190
        } else {
            MCommand::M140
        };
        self.push_command(code.to_command(Some(&temperature.to_string()), None));
    }

    /// Set a fan's speed (0–255)
    pub fn set_fan_speed(&self, speed: u32, fan: u32) {
        self.push_command(
            MCommand::M106.to_command(Some(&speed.to_string()), Some(&fan.to_string())),
        );
    }

    /// Switch the device to absolute positioning
    pub fn set_absolute_position(&self) {
        self.push_command(GCommand::G90.to_command(None));
    }

    /// Switch the device to relative positioning
    pub fn set_relative_position(&self) {
        self.push_command(GCommand::G91.to_command(None));
    }

    /// Release idle hold of the motors after `seconds` (0 = immediately)
    pub fn set_idle_hold(&self, seconds: u32) {
        let command = if seconds > 0 {
            MCommand::M84.to_command(Some(&seconds.to_string()), None)
        } else {
            MCommand::M84.to_command(None, None)
        };
        self.push_command(command);
    }

    /// Set the printer speed factor in percent
    pub fn set_printer_speed(&self, percent: u32) {
        self.push_command(MCommand::M220.to_command(Some(&percent.to_string()), None));
    }

    /// Set the extruder flow rate in percent
    pub fn set_flow_rate(&self, percent: u32) {
        self.push_command(MCommand::M221.to_command(Some(&percent.to_string()), None));
    }

    /// Show a message on the device's LCD
    pub fn show_message(&self, message: &str) {
        self.push_command(MCommand::M117.to_command(Some(message), None));
    }

    /// Set the measurement units the device works in
    pub fn set_units(&self, units: Units) {
        let command = match units {
            Units::Metric => GCommand::G21.to_command(None),
            Units::Imperial => GCommand::G20.to_command(None),
        };
        self.push_command(command);
    }

    /// Set the periodic temperature-probe interval (0 disables)
    ///
    /// While enabled, the controller keeps one temperature query flowing so
    /// observers receive updates even during otherwise idle periods. At
    /// most one query is outstanding at a time.
    pub fn set_temperature_interval(&self, interval_ms: u64) {
        let mut inner = self.inner.lock();
        inner.probe_interval = Duration::from_millis(interval_ms);
        inner.last_probe = Instant::now();
    }

    /// Set the detection handshake deadline
    pub fn set_detection_timeout(&self, timeout: Duration) {
        self.inner.lock().detection_timeout = timeout;
    }

    /// Periodically re-enumerate serial ports (0 disables)
    ///
    /// Emits [`ControllerEvent::PortsChanged`] whenever the set of
    /// available ports differs from the previous scan.
    pub fn set_port_scan_interval(&mut self, interval_ms: u64) {
        if let Some(handle) = self.port_watch_task.take() {
            handle.abort();
        }
        if interval_ms == 0 {
            return;
        }

        let events = self.events.clone();
        self.port_watch_task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            let mut last: Option<Vec<String>> = None;
            loop {
                interval.tick().await;
                let ports: Vec<String> = match list_ports() {
                    Ok(infos) => infos.into_iter().map(|info| info.port_name).collect(),
                    Err(_) => continue,
                };
                if last.as_ref() != Some(&ports) {
                    last = Some(ports.clone());
                    let _ = events.publish(ControllerEvent::PortsChanged(ports));
                }
            }
        }));
    }

    /// Current controller state
    pub fn state(&self) -> ControllerState {
        self.inner.lock().state
    }

    /// Last temperature report from the device
    pub fn temperature(&self) -> Temperature {
        self.inner.lock().temperature
    }

    /// The port the controller is connected to, if any
    pub fn connected_port(&self) -> Option<String> {
        self.inner.lock().transport.port_name().map(String::from)
    }

    /// Progress of the active print job, 0–100
    pub fn percentage_printed(&self) -> f32 {
        self.inner
            .lock()
            .job
            .as_ref()
            .map(|job| job.percent_complete())
            .unwrap_or(0.0)
    }

    /// Number of extruders reported during detection (default 1)
    pub fn extruder_count(&self) -> u32 {
        self.inner.lock().extruder_count
    }

    /// Number of commands waiting in the queue
    pub fn queued_command_count(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Start the I/O loop task
    ///
    /// One task drains the transport, processes each complete line to
    /// completion, then runs the timer phase, all under the state lock.
    fn start_io_loop(&mut self) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let inner = self.inner.clone();
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            let mut buffer = String::new();
            let loop_delay = Duration::from_millis(10);

            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                {
                    let mut guard = inner.lock();
                    match guard.transport.receive() {
                        Ok(data) if !data.is_empty() => {
                            buffer.push_str(&String::from_utf8_lossy(&data));
                            while let Some(pos) = buffer.find('\n') {
                                let line = buffer[..pos].to_string();
                                buffer.drain(..=pos);
                                guard.handle_line(&line, &events);
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("Read from device failed: {}", e);
                        }
                    }

                    guard.tick(&events);
                }

                tokio::time::sleep(loop_delay).await;
            }
        });

        self.io_task = Some(handle);
    }

    /// Stop the I/O loop task
    fn stop_io_loop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.io_task.take() {
            handle.abort();
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop_io_loop();
        if let Some(handle) = self.port_watch_task.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::marlin::MarlinPlugin;
    use proptest::prelude::*;

    struct MockTransport {
        open: bool,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl MockTransport {
        fn new(sent: Arc<Mutex<Vec<String>>>) -> Self {
            Self { open: false, sent }
        }
    }

    impl Transport for MockTransport {
        fn open(&mut self, _params: &ConnectionParams) -> printkit_core::Result<()> {
            self.open = true;
            Ok(())
        }

        fn close(&mut self) -> printkit_core::Result<()> {
            self.open = false;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn send(&mut self, data: &[u8]) -> printkit_core::Result<usize> {
            if !self.open {
                return Err(ConnectionError::NotConnected.into());
            }
            self.sent
                .lock()
                .push(String::from_utf8_lossy(data).into_owned());
            Ok(data.len())
        }

        fn receive(&mut self) -> printkit_core::Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn port_name(&self) -> Option<&str> {
            self.open.then_some("/dev/mock")
        }
    }

    fn connected_inner() -> (Inner, EventDispatcher, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut transport = MockTransport::new(sent.clone());
        transport.open(&ConnectionParams::default()).unwrap();

        let mut inner = Inner::new(
            Box::new(transport),
            Arc::new(FirmwareRegistry::with_defaults()),
        );
        inner.plugin = Some(Box::new(MarlinPlugin::new()));
        inner.state = ControllerState::Idle;
        (inner, EventDispatcher::default(), sent)
    }

    fn drain(rx: &mut broadcast::Receiver<ControllerEvent>) -> Vec<ControllerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn commands_flow_only_on_readiness_signals() {
        let (mut inner, events, sent) = connected_inner();

        for i in 0..5 {
            inner.queue.push(QueuedCommand::new(format!("G1 X{}", i)));
        }
        assert!(sent.lock().is_empty());

        for _ in 0..5 {
            inner.handle_line("ok", &events);
        }
        let sent = sent.lock();
        assert_eq!(sent.len(), 5);
        assert_eq!(sent[0], "G1 X0\n");
        assert_eq!(sent[4], "G1 X4\n");
    }

    #[test]
    fn short_of_signals_short_of_transmissions() {
        let (mut inner, events, sent) = connected_inner();

        for i in 0..5 {
            inner.queue.push(QueuedCommand::new(format!("G1 X{}", i)));
        }
        for _ in 0..4 {
            inner.handle_line("ok", &events);
        }
        assert_eq!(sent.lock().len(), 4);
        assert!(inner.in_flight.is_some());
        assert_eq!(inner.queue.len(), 1);
    }

    proptest! {
        #[test]
        fn transmissions_never_exceed_signals(n in 1usize..20, k in 0usize..25) {
            let (mut inner, events, sent) = connected_inner();
            for i in 0..n {
                inner.queue.push(QueuedCommand::new(format!("G1 X{}", i)));
            }
            for _ in 0..k {
                inner.handle_line("ok", &events);
            }
            prop_assert_eq!(sent.lock().len(), n.min(k));
        }
    }

    #[test]
    fn wait_also_advances_the_queue() {
        let (mut inner, events, sent) = connected_inner();
        inner.queue.push(QueuedCommand::new("M105"));
        inner.handle_line("wait", &events);
        assert_eq!(sent.lock().as_slice(), ["M105\n"]);
    }

    #[test]
    fn temperature_report_updates_state_without_advancing() {
        let (mut inner, events, sent) = connected_inner();
        inner.queue.push(QueuedCommand::new("G28"));

        inner.handle_line("T:185.4 /185.0 B:60.5 /60.0", &events);
        assert!(sent.lock().is_empty());
        assert_eq!(inner.temperature.extruder, 185.4);
        assert_eq!(inner.temperature.bed_target, 60.0);
    }

    #[test]
    fn malformed_temperature_leaves_state_unchanged() {
        let (mut inner, events, _sent) = connected_inner();
        inner.handle_line("T:200.0 /200.0 B:60.0 /60.0", &events);
        inner.handle_line("T:185.4 B:60.5", &events);
        assert_eq!(inner.temperature.extruder, 200.0);
    }

    #[test]
    fn events_fire_in_order_within_one_step() {
        let (mut inner, events, _sent) = connected_inner();
        let mut rx = events.subscribe();

        inner.handle_line("T:190.0 /200.0 B:55.0 /60.0", &events);
        let received = drain(&mut rx);
        assert_eq!(received.len(), 2);
        assert!(matches!(received[0], ControllerEvent::TemperatureChanged(_)));
        assert!(matches!(received[1], ControllerEvent::MessageReceived(_)));
    }

    #[test]
    fn print_job_runs_to_completion() {
        let (mut inner, events, sent) = connected_inner();
        let mut rx = events.subscribe();

        let job = PrintJob::from_lines("cube.gcode", ["G28", "G1 X10", "M84"]);
        inner.start_job(job, &events).unwrap();
        assert_eq!(inner.state, ControllerState::StartingPrint);

        inner.handle_line("ok", &events);
        assert_eq!(inner.state, ControllerState::Busy);

        inner.handle_line("ok", &events);
        inner.handle_line("ok", &events);
        inner.handle_line("ok", &events);

        assert_eq!(inner.state, ControllerState::Idle);
        assert!(inner.job.is_none());
        assert_eq!(
            sent.lock().as_slice(),
            ["G28\n", "G1 X10\n", "M84\n"]
        );

        let states: Vec<ControllerState> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                ControllerEvent::StateChanged(state) => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            [
                ControllerState::StartingPrint,
                ControllerState::Busy,
                ControllerState::FinishedPrint,
                ControllerState::Idle,
            ]
        );
    }

    #[test]
    fn progress_is_reported_per_acknowledged_job_command() {
        let (mut inner, events, _sent) = connected_inner();
        let mut rx = events.subscribe();

        let job = PrintJob::from_lines("strip.gcode", ["G1 X1", "G1 X2"]);
        inner.start_job(job, &events).unwrap();

        inner.handle_line("ok", &events); // transmits first command
        inner.handle_line("ok", &events); // acks first, transmits second
        inner.handle_line("ok", &events); // acks second, job complete

        let progress: Vec<f32> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                ControllerEvent::PrintProgressChanged(pct) => Some(pct),
                _ => None,
            })
            .collect();
        assert_eq!(progress, [0.0, 50.0, 100.0]);
    }

    #[test]
    fn pause_actions_replay_before_remaining_job_commands() {
        let (mut inner, events, sent) = connected_inner();

        let job = PrintJob::from_lines("part.gcode", ["G1 X1", "G1 X2", "G1 X3"]);
        inner.start_job(job, &events).unwrap();
        inner.handle_line("ok", &events); // G1 X1 in flight

        inner.pause("M107, M84", &events).unwrap();
        assert_eq!(inner.state, ControllerState::Paused);

        // Ack of G1 X1; only the side channel may flow while paused.
        inner.handle_line("ok", &events);
        assert_eq!(sent.lock().last().unwrap(), "M114\n");

        // Position reply captured for the restore move.
        inner.handle_line("X:10.00 Y:20.00 Z:0.30 E:1.20 Count X:800", &events);

        inner.resume(&events).unwrap();
        assert_eq!(inner.state, ControllerState::Busy);

        for _ in 0..4 {
            inner.handle_line("ok", &events);
        }

        let sent = sent.lock();
        assert_eq!(
            sent.as_slice(),
            [
                "G1 X1\n",
                "M114\n",
                "G0 X10.00 Y20.00 Z0.30\n",
                "M107\n",
                "M84\n",
                "G1 X2\n",
            ]
        );
    }

    #[test]
    fn resume_without_position_skips_the_restore_move() {
        let (mut inner, events, sent) = connected_inner();

        let job = PrintJob::from_lines("part.gcode", ["G1 X1", "G1 X2"]);
        inner.start_job(job, &events).unwrap();
        inner.handle_line("ok", &events);

        inner.pause("M107", &events).unwrap();
        inner.resume(&events).unwrap();

        inner.handle_line("ok", &events); // acks G1 X1, sends M114
        inner.handle_line("ok", &events); // sends M107
        inner.handle_line("ok", &events); // sends G1 X2

        let sent = sent.lock();
        assert_eq!(
            sent.as_slice(),
            ["G1 X1\n", "M114\n", "M107\n", "G1 X2\n"]
        );
    }

    #[test]
    fn job_queue_is_held_back_while_paused() {
        let (mut inner, events, sent) = connected_inner();

        let job = PrintJob::from_lines("part.gcode", ["G1 X1", "G1 X2"]);
        inner.start_job(job, &events).unwrap();
        inner.handle_line("ok", &events);
        inner.pause("", &events).unwrap();

        // Readiness drains the side channel (M114), then nothing more.
        inner.handle_line("ok", &events);
        inner.handle_line("ok", &events);
        inner.handle_line("ok", &events);

        let sent = sent.lock();
        assert_eq!(sent.as_slice(), ["G1 X1\n", "M114\n"]);
    }

    #[test]
    fn stop_clears_the_queue_through_stopping() {
        let (mut inner, events, sent) = connected_inner();
        let mut rx = events.subscribe();

        for i in 0..5 {
            inner.queue.push(QueuedCommand::new(format!("G1 X{}", i)));
        }
        inner.stop(&events);

        assert!(inner.queue.is_empty());
        assert_eq!(inner.state, ControllerState::Idle);
        assert!(sent.lock().is_empty());

        let states: Vec<ControllerState> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                ControllerEvent::StateChanged(state) => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(states, [ControllerState::Stopping, ControllerState::Idle]);
    }

    #[test]
    fn stop_abandons_a_running_job() {
        let (mut inner, events, _sent) = connected_inner();
        let job = PrintJob::from_lines("part.gcode", ["G1 X1", "G1 X2"]);
        inner.start_job(job, &events).unwrap();
        inner.handle_line("ok", &events);

        inner.stop(&events);
        assert_eq!(inner.state, ControllerState::Idle);
        assert!(inner.job.is_none());
        assert!(inner.queue.is_empty());
        assert!(inner.in_flight.is_none());
    }

    #[test]
    fn emergency_stop_bypasses_the_in_flight_gate() {
        let (mut inner, events, sent) = connected_inner();

        inner.queue.push(QueuedCommand::new("G1 X1"));
        inner.queue.push(QueuedCommand::new("G1 X2"));
        inner.handle_line("ok", &events);
        assert!(inner.in_flight.is_some());

        inner.emergency_stop(&events);

        let sent = sent.lock();
        assert_eq!(sent.last().unwrap(), "M112\n");
        assert_eq!(inner.state, ControllerState::Error);
        assert!(inner.queue.is_empty());
        assert!(inner.in_flight.is_none());
    }

    #[test]
    fn temperature_probe_never_queues_a_duplicate() {
        let (mut inner, _events, _sent) = connected_inner();

        inner.probe_temperature();
        inner.probe_temperature();
        assert_eq!(inner.queue.len(), 1);
        assert!(inner.queue.contains("M105"));

        // An in-flight query also counts as outstanding.
        inner.queue.clear();
        inner.in_flight = Some(QueuedCommand::new("M105"));
        inner.probe_temperature();
        assert!(inner.queue.is_empty());
    }

    #[test]
    fn detection_binds_the_matching_plugin() {
        let (mut inner, events, _sent) = connected_inner();
        let mut rx = events.subscribe();
        inner.plugin = None;
        inner.state = ControllerState::Connecting;

        inner.handle_line(
            "FIRMWARE_NAME:Marlin 2.1.2 EXTRUDER_COUNT:2 UUID:cede2a2f",
            &events,
        );

        assert_eq!(inner.state, ControllerState::Idle);
        assert_eq!(inner.plugin.as_ref().unwrap().name(), "Marlin");
        assert_eq!(inner.extruder_count, 2);

        // State change precedes the diagnostic echo.
        let received = drain(&mut rx);
        assert!(matches!(
            received[0],
            ControllerEvent::StateChanged(ControllerState::Idle)
        ));
        assert!(matches!(received[1], ControllerEvent::MessageReceived(_)));
    }

    #[test]
    fn unmatched_lines_leave_detection_running() {
        let (mut inner, events, _sent) = connected_inner();
        inner.plugin = None;
        inner.state = ControllerState::Connecting;

        inner.handle_line("start", &events);
        inner.handle_line("echo:SD card ok", &events);
        assert_eq!(inner.state, ControllerState::Connecting);
        assert!(inner.plugin.is_none());
    }

    #[test]
    fn detection_deadline_expires_to_error() {
        let (mut inner, events, _sent) = connected_inner();
        inner.plugin = None;
        inner.state = ControllerState::Connecting;
        inner.detection_deadline = Some(Instant::now());

        inner.tick(&events);
        assert_eq!(inner.state, ControllerState::Error);
        assert!(inner.detection_deadline.is_none());
    }

    #[test]
    fn lines_without_a_plugin_are_echoed_only() {
        let (mut inner, events, sent) = connected_inner();
        let mut rx = events.subscribe();
        inner.plugin = None;
        inner.queue.push(QueuedCommand::new("G28"));

        inner.handle_line("ok", &events);
        assert!(sent.lock().is_empty());
        let received = drain(&mut rx);
        assert_eq!(received.len(), 1);
        assert!(matches!(received[0], ControllerEvent::MessageReceived(_)));
    }

    #[test]
    fn parse_position_reads_the_first_axis_words() {
        assert_eq!(
            parse_position("X:10.00 Y:20.00 Z:0.30 E:1.20 Count X:800 Y:1600 Z:120"),
            Some((10.0, 20.0, 0.3))
        );
        assert_eq!(parse_position("X:10.00 Y:20.00"), None);
        assert_eq!(parse_position("ok"), None);
    }
}
