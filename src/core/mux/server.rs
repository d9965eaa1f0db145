use crate::core::mux::buffer::Enqueue;
use crate::core::mux::connection::{ClientConnection, ClientId, ReadOutcome};
use crate::core::mux::registry::{HandleRegistry, Owner};
use crate::core::mux::state::{
    LoopState, RemovalReason, ServerStats, ShutdownReport, ShutdownStep,
};
use crate::domain::config::{BroadcastConfig, MuxConfig, CHUNK_SIZE, LISTEN_BACKLOG, POLL_TIMEOUT};
use crate::domain::error::{MuxError, MuxResult};
use crate::infrastructure::poll::{Event, EventSource, Handle, Interest, Poller};
use crate::infrastructure::serial::SerialLine;
use crate::infrastructure::tcp::bind_listener;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Bridges one serial line to any number of TCP clients.
///
/// Everything runs on the caller's thread: [`run`](Self::run) repeatedly waits
/// on the event source and dispatches ready handles. Serial output is queued
/// to every client in accept order; client input is written to the line as
/// soon as it is read.
pub struct MuxServer<L: SerialLine, E: EventSource = Poller> {
    registry: HandleRegistry<E>,
    clients: Vec<ClientConnection>,
    serial: Option<L>,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    broadcast: BroadcastConfig,
    state: LoopState,
    next_client_id: u64,
    stats: ServerStats,
    interrupt: Arc<AtomicBool>,
    retired: HashSet<Handle>,
    shutdown_report: Option<ShutdownReport>,
    last_removal: Option<(ClientId, RemovalReason)>,
}

impl<L: SerialLine> MuxServer<L, Poller> {
    /// Start up against `serial` using the `poll(2)` event source.
    pub fn bind(config: &MuxConfig, serial: L) -> MuxResult<Self> {
        Self::with_event_source(config, serial, Poller::new())
    }
}

impl<L: SerialLine, E: EventSource> MuxServer<L, E> {
    /// Flush and register the line, then bind and register the listener.
    pub fn with_event_source(config: &MuxConfig, mut serial: L, source: E) -> MuxResult<Self> {
        let mut registry = HandleRegistry::new(source);

        serial.flush_input_and_output()?;
        registry.register(serial.handle(), Owner::Serial)?;
        info!("Serial port: {} @ {}", serial.name(), config.serial.baud_rate);

        let listener = bind_listener(&config.listen.host, config.listen.port, LISTEN_BACKLOG)?;
        let local_addr = listener.local_addr()?;
        registry.register(listener.as_raw_fd(), Owner::Listener)?;
        info!("Server: {}", local_addr);

        Ok(Self {
            registry,
            clients: Vec::new(),
            serial: Some(serial),
            listener: Some(listener),
            local_addr,
            broadcast: config.broadcast.clone(),
            state: LoopState::Running,
            next_client_id: 1,
            stats: ServerStats::default(),
            interrupt: Arc::new(AtomicBool::new(false)),
            retired: HashSet::new(),
            shutdown_report: None,
            last_removal: None,
        })
    }

    /// Run until interrupted or a fatal fault, then shut down.
    ///
    /// Interrupts return `Ok`; fatal faults are returned after shutdown.
    pub fn run(&mut self) -> MuxResult<()> {
        info!("Use ctrl+c to stop...");

        let outcome = self.run_loop();
        match &outcome {
            Ok(()) => info!("Interrupted, closing"),
            Err(e) => error!("Fatal error: {}. Closing...", e),
        }

        self.close();
        outcome
    }

    fn run_loop(&mut self) -> MuxResult<()> {
        while self.state == LoopState::Running {
            if self.interrupt.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.turn(POLL_TIMEOUT)?;
        }
        Ok(())
    }

    /// One loop iteration: wait up to `timeout`, then dispatch every ready handle.
    ///
    /// Returns the number of events handled. A fatal fault moves the loop
    /// to [`LoopState::Closing`].
    pub fn turn(&mut self, timeout: Duration) -> MuxResult<usize> {
        if self.state != LoopState::Running {
            return Ok(0);
        }

        let result = self.dispatch_ready(timeout);
        if result.is_err() {
            self.state = LoopState::Closing;
        }
        result
    }

    fn dispatch_ready(&mut self, timeout: Duration) -> MuxResult<usize> {
        let events = self.registry.wait(timeout)?;
        self.retired.clear();

        let mut handled = 0;
        for event in events {
            // Closed earlier in this batch; the descriptor may even be reused.
            if self.retired.contains(&event.handle) {
                trace!("Skipping stale event for handle {}", event.handle);
                continue;
            }
            match self.dispatch(event) {
                Ok(()) => handled += 1,
                Err(e) if !e.is_fatal() => {
                    warn!("Ignoring event for handle {}: {}", event.handle, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(handled)
    }

    fn dispatch(&mut self, event: Event) -> MuxResult<()> {
        let readiness = event.readiness;

        match self.registry.resolve(event.handle)? {
            Owner::Client(id) => {
                if readiness.hangup {
                    self.remove_client(id, RemovalReason::Hangup);
                } else if readiness.error {
                    self.remove_client(id, RemovalReason::Error);
                } else {
                    if readiness.writable {
                        self.flush_client(id);
                    }
                    if readiness.readable {
                        self.read_client(id)?;
                    }
                }
            }
            Owner::Listener => {
                if readiness.hangup || readiness.error {
                    return Err(MuxError::listener(format!(
                        "listening socket {} reported {}",
                        self.local_addr,
                        if readiness.hangup { "hangup" } else { "an error" }
                    )));
                }
                if readiness.readable {
                    self.accept_one()?;
                }
            }
            Owner::Serial => {
                if readiness.hangup || readiness.error {
                    return Err(MuxError::transport(format!(
                        "{} reported {}",
                        self.serial_name(),
                        if readiness.hangup { "hangup" } else { "an error" }
                    )));
                }
                if readiness.readable {
                    self.read_serial()?;
                }
            }
        }
        Ok(())
    }

    /// Accept a single pending connection. Others wait for the next iteration.
    fn accept_one(&mut self) -> MuxResult<()> {
        let accepted = match self.listener.as_ref() {
            Some(listener) => listener.accept(),
            None => return Ok(()),
        };

        match accepted {
            Ok((stream, _)) => {
                self.add_client(stream);
                Ok(())
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::ConnectionAborted
                ) =>
            {
                debug!("Nothing to accept: {}", e);
                Ok(())
            }
            Err(e) => Err(MuxError::listener(format!("accept failed: {}", e))),
        }
    }

    /// Make `stream` a client, eligible for the next poll.
    ///
    /// Returns `None` when the socket could not be prepared or registered;
    /// that only affects this client.
    pub fn add_client(&mut self, stream: TcpStream) -> Option<ClientId> {
        let id = ClientId(self.next_client_id);
        self.next_client_id += 1;

        let connection = match ClientConnection::new(id, stream, self.broadcast.outbound_capacity) {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Dropping new connection ({}): {}", id, e);
                return None;
            }
        };

        if let Err(e) = self.registry.register(connection.handle(), Owner::Client(id)) {
            warn!("Dropping new connection from {}: {}", connection.label(), e);
            return None;
        }
        info!("New connection from {}", connection.label());
        self.clients.push(connection);
        self.stats.clients_accepted += 1;
        Some(id)
    }

    /// Remove a client. Returns `false` if it was already gone.
    pub fn remove_client(&mut self, id: ClientId, reason: RemovalReason) -> bool {
        let Some(index) = self.clients.iter().position(|client| client.id() == id) else {
            debug!("{} already removed", id);
            return false;
        };

        let mut client = self.clients.remove(index);
        let label = client.label();
        info!(
            "Closing {} after {:.1}s ({} bytes in, {} bytes out): {}",
            label,
            client.uptime().as_secs_f64(),
            client.bytes_received(),
            client.bytes_sent(),
            reason
        );

        let handle = client.handle();
        if let Err(e) = self.registry.unregister(handle) {
            warn!("Failed to unregister {}: {}", label, e);
        }
        self.retired.insert(handle);
        client.close();
        self.stats.clients_removed += 1;
        self.last_removal = Some((id, reason));
        true
    }

    fn read_serial(&mut self) -> MuxResult<()> {
        let data = match self.serial.as_mut() {
            Some(serial) => serial.read(CHUNK_SIZE)?,
            None => return Ok(()),
        };
        if data.is_empty() {
            return Ok(());
        }

        self.stats.bytes_from_serial += data.len() as u64;
        trace!(
            payload = %hex::encode(&data),
            "Serial -> {} clients",
            self.clients.len()
        );
        self.broadcast(&data);
        Ok(())
    }

    /// Queue `data` to every client, then try to send it without blocking.
    fn broadcast(&mut self, data: &[u8]) {
        let policy = self.broadcast.overflow;
        let mut doomed = Vec::new();

        for client in self.clients.iter_mut() {
            match client.queue(data, policy) {
                Enqueue::Queued => {}
                Enqueue::DroppedOldest(n) => {
                    warn!("{} is falling behind, dropped {} bytes", client.label(), n);
                    self.stats.bytes_dropped += n as u64;
                }
                Enqueue::Overflow => {
                    doomed.push((client.id(), RemovalReason::Overflow));
                    continue;
                }
            }

            match client.flush() {
                Ok(n) => self.stats.bytes_to_clients += n as u64,
                Err(e) => {
                    debug!("Send to {} failed: {}", client.label(), e);
                    doomed.push((client.id(), RemovalReason::SendFailed));
                    continue;
                }
            }

            if let Err(e) = sync_write_interest(&mut self.registry, client) {
                warn!("Failed to update interest for {}: {}", client.label(), e);
                doomed.push((client.id(), RemovalReason::Error));
            }
        }

        for (id, reason) in doomed {
            self.remove_client(id, reason);
        }
    }

    fn flush_client(&mut self, id: ClientId) {
        let Some(client) = self.clients.iter_mut().find(|client| client.id() == id) else {
            return;
        };

        let outcome = client
            .flush()
            .map_err(MuxError::from)
            .and_then(|n| {
                self.stats.bytes_to_clients += n as u64;
                sync_write_interest(&mut self.registry, client)
            });

        if let Err(e) = outcome {
            debug!("Send to {} failed: {}", id, e);
            self.remove_client(id, RemovalReason::SendFailed);
        }
    }

    fn read_client(&mut self, id: ClientId) -> MuxResult<()> {
        let outcome = match self.clients.iter_mut().find(|client| client.id() == id) {
            Some(client) => client.read_chunk(CHUNK_SIZE),
            None => return Ok(()),
        };

        match outcome {
            Ok(ReadOutcome::Data(data)) => {
                trace!(payload = %hex::encode(&data), "{} -> serial", id);
                if let Some(serial) = self.serial.as_mut() {
                    let written = serial.write(&data)?;
                    self.stats.bytes_to_serial += written as u64;
                }
            }
            Ok(ReadOutcome::Closed) => {
                self.remove_client(id, RemovalReason::NoData);
            }
            Ok(ReadOutcome::Nothing) => {}
            Err(e) => {
                debug!("Read from {} failed: {}", id, e);
                self.remove_client(id, RemovalReason::Error);
            }
        }
        Ok(())
    }

    /// Release every client, then the line, then the listener.
    ///
    /// Safe to call any number of times; only the first call releases
    /// anything, later calls return an empty report.
    pub fn close(&mut self) -> ShutdownReport {
        if self.state == LoopState::Closed {
            return ShutdownReport::default();
        }
        self.state = LoopState::Closing;
        info!("Closing...");

        let mut report = ShutdownReport::default();

        for id in self.client_ids() {
            if self.remove_client(id, RemovalReason::Shutdown) {
                report.steps.push(ShutdownStep::from(id));
            }
        }

        if let Some(serial) = self.serial.take() {
            if let Err(e) = self.registry.unregister(serial.handle()) {
                warn!("Failed to unregister {}: {}", serial.name(), e);
            }
            drop(serial);
            report.steps.push(ShutdownStep::Serial);
        }

        if let Some(listener) = self.listener.take() {
            if let Err(e) = self.registry.unregister(listener.as_raw_fd()) {
                warn!("Failed to unregister listener: {}", e);
            }
            drop(listener);
            report.steps.push(ShutdownStep::Listener);
        }

        self.state = LoopState::Closed;
        self.shutdown_report = Some(report.clone());
        info!("Done!");
        report
    }

    /// Flag that stops [`run`](Self::run) at the next poll boundary.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Active clients in accept order.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.iter().map(ClientConnection::id).collect()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            clients_active: self.clients.len(),
            ..self.stats.clone()
        }
    }

    /// Most recent client removal and its reason.
    pub fn last_removal(&self) -> Option<(ClientId, RemovalReason)> {
        self.last_removal
    }

    /// Report of the shutdown that actually released resources, once it has run.
    pub fn shutdown_report(&self) -> Option<&ShutdownReport> {
        self.shutdown_report.as_ref()
    }

    fn serial_name(&self) -> String {
        self.serial
            .as_ref()
            .map(|serial| serial.name().to_string())
            .unwrap_or_else(|| "serial line".to_string())
    }
}

impl<L: SerialLine, E: EventSource> Drop for MuxServer<L, E> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Watch for writability only while the client has queued bytes.
fn sync_write_interest<E: EventSource>(
    registry: &mut HandleRegistry<E>,
    client: &mut ClientConnection,
) -> MuxResult<()> {
    let wants_write = client.has_pending();
    if wants_write != client.write_armed() {
        let interest = if wants_write {
            Interest::READ_WRITE
        } else {
            Interest::READABLE
        };
        registry.set_interest(client.handle(), interest)?;
        client.set_write_armed(wants_write);
    }
    Ok(())
}
