//! Poll engine
//!
//! Drives all reads on the RS-485 bus from four sources, in priority order
//! per tick: hardware trigger edges, bootstrap reads for freshly enabled
//! ports, the periodic refresh, and manual reads from the operator. At
//! most one transaction is dispatched per tick and at most one request is
//! outstanding per port; trigger edges that arrive while a port is busy
//! stay latched and collapse into a single follow-up read.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{FlowCache, PortIndex, MAX_PORTS};
use crate::config::{PortConfig, SharedConfig};
use crate::error::Result;
use crate::protocol::constants::{
    FC_FULL_READ_COUNT, FC_START_ADDRESS, FC_TEMP_PRESSURE_ADDRESS, FC_TEMP_PRESSURE_COUNT,
};
use crate::rtu::{RtuCompletion, RtuRead, RtuTransactionQueue};

use super::trigger::{Edge, EdgeDetector, TriggerInput};

/// Operator-facing commands accepted while the engine runs
#[derive(Debug)]
pub enum EngineCommand {
    /// Read the full register block of one port now
    ManualRead(PortIndex),
    /// A port's configuration changed; re-evaluate its cache entry
    PortConfigured {
        port: PortIndex,
        settings: PortConfig,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadKind {
    Full,
    Live,
}

pub struct PollEngine {
    cache: Arc<FlowCache>,
    config: SharedConfig,
    queue: Arc<dyn RtuTransactionQueue>,
    trigger: Arc<dyn TriggerInput>,
    completion_rx: mpsc::Receiver<RtuCompletion>,
    command_rx: mpsc::Receiver<EngineCommand>,
    edges: EdgeDetector,
    trigger_flags: [bool; MAX_PORTS],
    periodic_due: [bool; MAX_PORTS],
    in_flight: [Option<ReadKind>; MAX_PORTS],
    periodic_cursor: usize,
}

impl PollEngine {
    pub fn new(
        cache: Arc<FlowCache>,
        config: SharedConfig,
        queue: Arc<dyn RtuTransactionQueue>,
        trigger: Arc<dyn TriggerInput>,
        completion_rx: mpsc::Receiver<RtuCompletion>,
        command_rx: mpsc::Receiver<EngineCommand>,
    ) -> Self {
        Self {
            cache,
            config,
            queue,
            trigger,
            completion_rx,
            command_rx,
            edges: EdgeDetector::new(),
            trigger_flags: [false; MAX_PORTS],
            periodic_due: [false; MAX_PORTS],
            in_flight: [None; MAX_PORTS],
            periodic_cursor: 0,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let polling = self.config.read().await.polling.clone();
        let mut trigger_tick = interval(Duration::from_millis(polling.trigger_check_ms));
        let mut periodic_tick = interval(Duration::from_millis(polling.periodic_poll_ms));
        let mut sweep_tick = interval(Duration::from_millis(polling.pending_sweep_ms));
        trigger_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        periodic_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            trigger_ms = polling.trigger_check_ms,
            periodic_ms = polling.periodic_poll_ms,
            sweep_ms = polling.pending_sweep_ms,
            "poll engine started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("poll engine stopping");
                    return Ok(());
                }
                Some(completion) = self.completion_rx.recv() => {
                    self.handle_completion(completion).await?;
                }
                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command).await?;
                }
                _ = trigger_tick.tick() => {
                    self.check_triggers().await?;
                }
                _ = sweep_tick.tick() => {
                    self.pending_sweep().await?;
                }
                _ = periodic_tick.tick() => {
                    self.periodic_poll().await?;
                }
            }
        }
    }

    /// Sample the trigger lines of enabled ports and latch falling edges,
    /// then spend this tick's dispatch slot: trigger flags first, leftover
    /// periodic refreshes second.
    pub async fn check_triggers(&mut self) -> Result<()> {
        let (enabled, lines) = {
            let config = self.config.read().await;
            let mut enabled = [false; MAX_PORTS];
            let mut lines = [0u16; MAX_PORTS];
            for (i, port) in config.ports.iter().enumerate().take(MAX_PORTS) {
                enabled[i] = port.enabled;
                lines[i] = port.trigger_input;
            }
            (enabled, lines)
        };
        for port in PortIndex::all() {
            if !enabled[port.get()] {
                continue;
            }
            let level = self.trigger.level(lines[port.get()]);
            match self.edges.update(port, level) {
                Some(Edge::Falling) => {
                    debug!(port = %port, "trigger edge");
                    self.trigger_flags[port.get()] = true;
                }
                Some(Edge::Rising) => debug!(port = %port, "trigger released"),
                None => {}
            }
        }
        if !self.process_trigger_flags(&enabled).await? {
            self.drain_periodic_due(&enabled).await?;
        }
        Ok(())
    }

    /// Serve the first latched trigger flag whose port has no request
    /// outstanding. Flags on ports that are mid-request stay latched and
    /// collapse into one follow-up read. Returns whether the tick's
    /// dispatch slot was used.
    async fn process_trigger_flags(&mut self, enabled: &[bool; MAX_PORTS]) -> Result<bool> {
        for port in PortIndex::all() {
            if !self.trigger_flags[port.get()] {
                continue;
            }
            if !enabled[port.get()] {
                self.trigger_flags[port.get()] = false;
                continue;
            }
            if self.cache.read(port).await.request_pending {
                continue;
            }
            self.trigger_flags[port.get()] = false;
            self.dispatch(port, ReadKind::Full).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Mark every enabled port due for a refresh and serve the first one.
    /// The rest drain one per fast tick through `check_triggers`.
    pub async fn periodic_poll(&mut self) -> Result<()> {
        let enabled = self.enabled_mask().await;
        for (index, &on) in enabled.iter().enumerate() {
            if on {
                self.periodic_due[index] = true;
            }
        }
        self.drain_periodic_due(&enabled).await?;
        Ok(())
    }

    /// Dispatch one due refresh, round robin. Never-connected ports get
    /// a full read, connected ones the 4-register live read.
    async fn drain_periodic_due(&mut self, enabled: &[bool; MAX_PORTS]) -> Result<bool> {
        for offset in 0..MAX_PORTS {
            let index = (self.periodic_cursor + offset) % MAX_PORTS;
            if !self.periodic_due[index] {
                continue;
            }
            if !enabled[index] {
                self.periodic_due[index] = false;
                continue;
            }
            let Some(port) = PortIndex::new(index) else {
                continue;
            };
            let entry = self.cache.read(port).await;
            if entry.request_pending {
                continue;
            }
            self.periodic_due[index] = false;
            let kind = if entry.data_valid {
                ReadKind::Live
            } else {
                ReadKind::Full
            };
            self.dispatch(port, kind).await?;
            self.periodic_cursor = (index + 1) % MAX_PORTS;
            return Ok(true);
        }
        Ok(false)
    }

    /// Serve the bootstrap read of the first freshly configured port
    pub async fn pending_sweep(&mut self) -> Result<()> {
        let enabled = self.enabled_mask().await;
        for port in PortIndex::all() {
            if !enabled[port.get()] {
                continue;
            }
            let entry = self.cache.read(port).await;
            if !entry.pending_initial_read || entry.request_pending {
                continue;
            }
            self.dispatch(port, ReadKind::Full).await?;
            return Ok(());
        }
        Ok(())
    }

    pub async fn handle_completion(&mut self, completion: RtuCompletion) -> Result<()> {
        let port = completion.port;
        let Some(kind) = self.in_flight[port.get()].take() else {
            warn!(port = %port, "completion for a port with no request in flight");
            return Ok(());
        };

        match completion.result {
            Ok(registers) => match kind {
                ReadKind::Full => {
                    match self.cache.apply_full_read(port, &registers).await {
                        Ok(true) => {
                            let entry = self.cache.read(port).await;
                            info!(port = %port, unit_id = entry.unit_id_str(), "counter online");
                        }
                        Ok(false) => debug!(port = %port, "full read complete"),
                        Err(e) => {
                            warn!(port = %port, "discarding malformed response: {e}");
                            self.cache.mark_failed(port).await;
                        }
                    }
                    self.cache.set_pending_initial(port, false).await;
                }
                ReadKind::Live => match self.cache.apply_periodic_read(port, &registers).await {
                    Ok(true) => info!(port = %port, "counter recovered"),
                    Ok(false) => {}
                    Err(e) => {
                        warn!(port = %port, "discarding malformed response: {e}");
                        self.cache.mark_failed(port).await;
                    }
                },
            },
            Err(e) => {
                warn!(port = %port, "read failed: {e}");
                self.cache.mark_failed(port).await;
                // The bootstrap flag is consumed either way; the periodic
                // refresh retries unanswered ports with full reads.
                self.cache.set_pending_initial(port, false).await;
            }
        }
        Ok(())
    }

    pub async fn handle_command(&mut self, command: EngineCommand) -> Result<()> {
        match command {
            EngineCommand::ManualRead(port) => {
                let enabled = self.enabled_mask().await;
                if !enabled[port.get()] {
                    warn!(port = %port, "manual read of a disabled port ignored");
                    return Ok(());
                }
                // Identical to a trigger edge: latch and coalesce
                self.trigger_flags[port.get()] = true;
                self.process_trigger_flags(&enabled).await?;
            }
            EngineCommand::PortConfigured { port, settings } => {
                let enabled = settings.enabled;
                {
                    // Operator input must never stop the engine: roll the
                    // previous settings back and drop invalid commands.
                    let mut config = self.config.write().await;
                    let previous = std::mem::replace(&mut config.ports[port.get()], settings);
                    if let Err(e) = config.validate() {
                        config.ports[port.get()] = previous;
                        warn!(port = %port, "rejecting port configuration: {e}");
                        return Ok(());
                    }
                }
                if enabled {
                    info!(port = %port, "port enabled, scheduling bootstrap read");
                    self.cache.set_pending_initial(port, true).await;
                } else {
                    info!(port = %port, "port disabled, clearing cache entry");
                    self.cache.reset_port(port).await;
                    self.trigger_flags[port.get()] = false;
                    self.periodic_due[port.get()] = false;
                    self.in_flight[port.get()] = None;
                }
            }
        }
        Ok(())
    }

    /// Submit a read for the port. A rejected submission is an immediate
    /// failure for the port; this layer never retries it.
    async fn dispatch(&mut self, port: PortIndex, kind: ReadKind) -> Result<bool> {
        let Some(slave_id) = self.config.read().await.slave_for_port(port.get()) else {
            return Ok(false);
        };
        let (start_address, quantity) = match kind {
            ReadKind::Full => (FC_START_ADDRESS, FC_FULL_READ_COUNT),
            ReadKind::Live => (FC_TEMP_PRESSURE_ADDRESS, FC_TEMP_PRESSURE_COUNT),
        };
        let submitted = self
            .queue
            .try_submit(RtuRead {
                port,
                slave_id,
                start_address,
                quantity,
            })
            .await?;
        if submitted {
            self.cache.mark_pending(port).await;
            self.in_flight[port.get()] = Some(kind);
            debug!(port = %port, slave = slave_id, ?kind, "read dispatched");
        } else {
            warn!(port = %port, slave = slave_id, "transaction rejected, marking port failed");
            self.cache.mark_failed(port).await;
            self.cache.set_pending_initial(port, false).await;
        }
        Ok(submitted)
    }

    async fn enabled_mask(&self) -> [bool; MAX_PORTS] {
        let config = self.config.read().await;
        let mut mask = [false; MAX_PORTS];
        for (i, port) in config.ports.iter().enumerate().take(MAX_PORTS) {
            mask[i] = port.enabled;
        }
        mask
    }
}
