//! The connection lifecycle controller.
//!
//! [`BleLink`] owns every piece of protocol state for one device: the
//! connection phase, the bound characteristics, the negotiated MTU, the
//! text buffer and the file transfer session. All of it sits behind a
//! single lock. Notification payloads and platform disconnect signals are
//! handled by background tasks that take that lock before touching state,
//! and events are broadcast while it is held, so subscribers observe them
//! in processing order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::ble::characteristics::{resolve_roles, CharacteristicDescriptor, CharacteristicRoles};
use crate::ble::connection::ConnectionState;
use crate::ble::platform::PlatformTransport;
use crate::ble::transport::{DeviceInfo, DisconnectStream, NotificationStream, Transport};
use crate::config::LinkConfig;
use crate::data::{CharacteristicsInfo, ConnectionStatus, DebugStats};
use crate::error::{Error, Result};
use crate::events::{CallbackHandle, LinkEvent};
use crate::protocol::chunker::OutboundFrame;
use crate::protocol::demux::InboundDemultiplexer;
use crate::protocol::file::{FileChunk, FileReceiveStatus, ReceivedFile};
use crate::protocol::mtu::{self, MtuInfo};

/// Command the firmware answers with its base information.
pub const TEST_COMMAND: &str = "BASE_INFO";

/// Characteristics bound for the current connection.
#[derive(Debug)]
struct Bindings {
    roles: CharacteristicRoles,
    discovered: Vec<CharacteristicDescriptor>,
    notifications_enabled: bool,
}

/// Everything guarded by the link lock.
struct LinkState {
    phase: ConnectionState,
    /// Bumped on every attempt and every teardown; tasks of older
    /// generations drop their work.
    generation: u64,
    /// Generation of the most recently started connection attempt.
    latest_attempt: u64,
    /// An abandoned attempt is closing its adapter connection.
    closing: bool,
    /// Last selected device, kept across disconnects for `reconnect`.
    device: Option<DeviceInfo>,
    bindings: Option<Bindings>,
    mtu: MtuInfo,
    inbound: InboundDemultiplexer,
    pump: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
}

impl LinkState {
    fn new(config: &LinkConfig) -> Self {
        Self {
            phase: ConnectionState::Disconnected,
            generation: 0,
            latest_attempt: 0,
            closing: false,
            device: None,
            bindings: None,
            mtu: MtuInfo::default(),
            inbound: InboundDemultiplexer::new(config.orphan_file_chunks),
            pump: None,
            watcher: None,
        }
    }

    /// Move to Disconnected and drop all per-connection state.
    fn enter_disconnected(&mut self, events: &broadcast::Sender<LinkEvent>, reason: &str) {
        let previous = self.phase;

        self.phase = ConnectionState::Disconnected;
        self.generation += 1;
        self.bindings = None;
        self.mtu = MtuInfo::default();
        self.inbound.reset();
        self.abort_tasks();

        if previous != ConnectionState::Disconnected {
            info!("Link {} -> Disconnected ({})", previous, reason);
            let _ = events.send(LinkEvent::ConnectionChanged {
                connected: false,
                device_name: String::new(),
                device_id: String::new(),
            });
        }
    }

    fn abort_tasks(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }

    /// Device and bindings of a live connection.
    fn connected(&self) -> Result<(&DeviceInfo, &Bindings)> {
        if !self.phase.is_connected() {
            return Err(Error::NotConnected);
        }
        match (&self.device, &self.bindings) {
            (Some(device), Some(bindings)) => Ok((device, bindings)),
            _ => Err(Error::NotConnected),
        }
    }
}

enum Attempt {
    AlreadyConnected(DeviceInfo),
    Started(u64),
}

/// A text and file link to one DYJ device.
pub struct BleLink<T = PlatformTransport> {
    transport: Arc<T>,
    config: LinkConfig,
    state: Arc<Mutex<LinkState>>,
    event_tx: broadcast::Sender<LinkEvent>,
    callback_counter: AtomicU64,
}

impl BleLink<PlatformTransport> {
    /// Create a link over the host's first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportUnsupported`] if Bluetooth is not available,
    /// or [`Error::InvalidConfig`] if the configuration is rejected.
    pub async fn platform(config: LinkConfig) -> Result<Self> {
        config.validate()?;
        let transport = PlatformTransport::new().await?;
        Self::new(transport, config)
    }
}

impl<T> BleLink<T>
where
    T: Transport + Send + Sync + 'static,
{
    /// Create a link over a transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is rejected.
    pub fn new(transport: T, config: LinkConfig) -> Result<Self> {
        Self::with_transport(Arc::new(transport), config)
    }

    /// Create a link over a shared transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is rejected.
    pub fn with_transport(transport: Arc<T>, config: LinkConfig) -> Result<Self> {
        config.validate()?;

        let (event_tx, _) = broadcast::channel(config.event_capacity);
        let state = LinkState::new(&config);

        Ok(Self {
            transport,
            config,
            state: Arc::new(Mutex::new(state)),
            event_tx,
            callback_counter: AtomicU64::new(0),
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    // === Lifecycle ===

    /// Find a device and bring the link up.
    ///
    /// Resolves characteristic roles, enables telemetry notifications and
    /// negotiates the MTU. Returns the selected device. If the link is
    /// already connected this is a no-op.
    ///
    /// # Errors
    ///
    /// Any failure leaves the link Disconnected and is returned as-is.
    pub async fn connect(&self) -> Result<DeviceInfo> {
        let generation = match self.begin(ConnectionState::Connecting)? {
            Attempt::AlreadyConnected(device) => return Ok(device),
            Attempt::Started(generation) => generation,
        };

        let filter = self.config.device_filter();
        let result = async {
            let device = self.transport.request_device(&filter).await?;
            {
                let mut state = self.state.lock();
                if state.generation != generation {
                    return Err(superseded());
                }
                state.device = Some(device.clone());
            }
            self.establish(&device, generation).await?;
            Ok::<_, Error>(device)
        }
        .await;

        self.finish(generation, result)
    }

    /// Bring the link up again with the last selected device.
    ///
    /// A live link is torn down first, followed by the configured reconnect
    /// delay. No device search is performed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRememberedDevice`] if no device was ever selected.
    /// Any other failure leaves the link Disconnected.
    pub async fn reconnect(&self) -> Result<DeviceInfo> {
        let (device, was_connected) = {
            let state = self.state.lock();
            let device = state.device.clone().ok_or(Error::NoRememberedDevice)?;
            (device, state.phase.is_connected())
        };

        if was_connected {
            self.disconnect().await?;
            tokio::time::sleep(self.config.reconnect_delay()).await;
        }

        let generation = match self.begin(ConnectionState::Reconnecting)? {
            Attempt::AlreadyConnected(device) => return Ok(device),
            Attempt::Started(generation) => generation,
        };

        info!("Reconnecting to {} ({})", device.name, device.id);
        let result = self
            .establish(&device, generation)
            .await
            .map(|_| device);

        self.finish(generation, result)
    }

    /// Tear the link down.
    ///
    /// Buffers, bindings and the file transfer are reset before the
    /// transport is asked to disconnect; a failing transport call is logged
    /// and otherwise ignored.
    pub async fn disconnect(&self) -> Result<()> {
        let device = {
            let mut state = self.state.lock();
            if state.phase == ConnectionState::Disconnected {
                debug!("Already disconnected");
                return Ok(());
            }
            state.enter_disconnected(&self.event_tx, "disconnect requested");
            state.device.clone()
        };

        if let Some(device) = device {
            if let Err(e) = self.transport.disconnect(&device).await {
                error!("Failed to disconnect from {}: {}", device.id, e);
            }
        }

        Ok(())
    }

    /// Get the current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().phase
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// The last selected device, if any.
    pub fn remembered_device(&self) -> Option<DeviceInfo> {
        self.state.lock().device.clone()
    }

    /// Whether the link is up and to which device.
    pub fn connection_status(&self) -> ConnectionStatus {
        let state = self.state.lock();
        let (device_name, device_id) = state
            .device
            .as_ref()
            .map(|d| (d.name.clone(), d.id.clone()))
            .unwrap_or_default();

        ConnectionStatus {
            connected: state.phase.is_connected(),
            device_name,
            device_id,
        }
    }

    // === MTU ===

    /// Current link parameters.
    pub fn mtu_info(&self) -> MtuInfo {
        self.state.lock().mtu
    }

    /// Query the MTU again and update the chunk size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] unless the link is connected.
    pub async fn renegotiate_mtu(&self) -> Result<MtuInfo> {
        let (device, generation) = {
            let state = self.state.lock();
            let (device, _) = state.connected()?;
            (device.clone(), state.generation)
        };

        let info = mtu::negotiate(&*self.transport, &device, self.config.chunk_size_floor).await;

        let mut state = self.state.lock();
        if state.generation != generation {
            return Err(Error::NotConnected);
        }
        state.mtu = info;
        info!(
            "MTU renegotiated: mtu={}, max_chunk_size={}",
            info.mtu, info.max_chunk_size
        );
        Ok(info)
    }

    // === Outbound ===

    /// Send one text message.
    ///
    /// The message is terminated with `\n` and written in chunks of at most
    /// the negotiated chunk size, with the configured pause between chunks.
    /// Nothing is acknowledged; a write failure aborts the remaining chunks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] unless the link is connected, or the
    /// transport's write error.
    pub async fn send(&self, message: &str) -> Result<()> {
        let (device, command, chunk_size) = {
            let state = self.state.lock();
            let (device, bindings) = state.connected()?;
            (
                device.clone(),
                bindings.roles.command.clone(),
                state.mtu.max_chunk_size,
            )
        };

        let frame = OutboundFrame::new(message);
        let total = frame.chunk_count(chunk_size);
        let pacing = self.config.chunk_pacing();

        debug!(
            "Sending {:?}: {} bytes in {} chunk(s) of up to {}",
            message,
            frame.len(),
            total,
            chunk_size
        );

        for (index, chunk) in frame.chunks(chunk_size).enumerate() {
            self.transport.write(&device, &command, chunk).await?;
            trace!("Sent chunk {}/{}: {} bytes", index + 1, total, chunk.len());

            if index + 1 < total {
                tokio::time::sleep(pacing).await;
            }
        }

        Ok(())
    }

    /// Send the firmware's base-information command.
    pub async fn send_test_command(&self) -> Result<()> {
        self.send(TEST_COMMAND).await
    }

    // === Notifications ===

    /// Disable and re-enable telemetry notifications.
    ///
    /// Pending text and the file transfer are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] unless the link is connected, or the
    /// transport's error.
    pub async fn restart_notifications(&self) -> Result<()> {
        let (device, telemetry, generation) = {
            let state = self.state.lock();
            let (device, bindings) = state.connected()?;
            (
                device.clone(),
                bindings.roles.telemetry.clone(),
                state.generation,
            )
        };

        self.transport.unsubscribe(&device, &telemetry).await?;
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return Err(Error::NotConnected);
            }
            if let Some(pump) = state.pump.take() {
                pump.abort();
            }
            if let Some(bindings) = state.bindings.as_mut() {
                bindings.notifications_enabled = false;
            }
        }

        tokio::time::sleep(self.config.notification_restart_delay()).await;

        let notifications = self.transport.subscribe(&device, &telemetry).await?;

        let mut state = self.state.lock();
        if state.generation != generation {
            return Err(Error::NotConnected);
        }
        if let Some(bindings) = state.bindings.as_mut() {
            bindings.notifications_enabled = true;
        }
        state.pump = Some(self.spawn_pump(generation, notifications));

        info!("Notifications restarted on {}", telemetry.uuid);
        Ok(())
    }

    // === File transfer ===

    /// Begin accumulating file chunks under a name.
    pub fn start_file_receive(&self, name: &str) {
        self.state.lock().inbound.start_file(name);
    }

    /// Finish the file transfer and return what was accumulated.
    pub fn end_file_receive(&self) -> ReceivedFile {
        self.state.lock().inbound.finish_file()
    }

    /// Progress of the file transfer.
    pub fn file_receive_status(&self) -> FileReceiveStatus {
        self.state.lock().inbound.file_status()
    }

    // === Diagnostics ===

    /// Bound characteristics and link parameters, if discovery has run.
    pub fn characteristics_info(&self) -> Option<CharacteristicsInfo> {
        let state = self.state.lock();
        let bindings = state.bindings.as_ref()?;

        Some(CharacteristicsInfo {
            command: bindings.roles.command.clone(),
            telemetry: bindings.roles.telemetry.clone(),
            all_characteristics: bindings.discovered.clone(),
            notifications_enabled: bindings.notifications_enabled,
            receive_buffer_length: state.inbound.pending_text_len(),
            stats: state.inbound.stats().clone(),
            mtu: state.mtu,
        })
    }

    /// Condensed diagnostics.
    pub fn debug_stats(&self) -> DebugStats {
        let state = self.state.lock();
        let stats = state.inbound.stats();

        DebugStats {
            is_connected: state.phase.is_connected(),
            device_name: state.device.as_ref().map(|d| d.name.clone()),
            device_id: state.device.as_ref().map(|d| d.id.clone()),
            receive_count: stats.receive_count,
            last_receive_time: stats.last_receive_time,
            receive_buffer_length: state.inbound.pending_text_len(),
            has_characteristics: state.bindings.is_some(),
            characteristics_count: state
                .bindings
                .as_ref()
                .map(|b| b.discovered.len())
                .unwrap_or(0),
        }
    }

    /// Drop pending text and zero the receive counters.
    pub fn clear_receive_buffer(&self) {
        self.state.lock().inbound.clear_text();
        debug!("Receive buffer and counters cleared");
    }

    // === Events ===

    /// Subscribe to all link events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback for connection changes: `(connected, device_name)`.
    pub fn on_connection_change<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(bool, &str) + Send + Sync + 'static,
    {
        self.register(move |event| {
            if let LinkEvent::ConnectionChanged {
                connected,
                device_name,
                ..
            } = event
            {
                callback(connected, &device_name);
            }
        })
    }

    /// Register a callback for complete text messages.
    pub fn on_message<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.register(move |event| {
            if let LinkEvent::Message(message) = event {
                callback(&message);
            }
        })
    }

    /// Register a callback for file chunks.
    pub fn on_file_chunk<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&FileChunk) + Send + Sync + 'static,
    {
        self.register(move |event| {
            if let LinkEvent::FileChunk(chunk) = event {
                callback(&chunk);
            }
        })
    }

    /// Register a callback for non-fatal inbound errors.
    pub fn on_error<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.register(move |event| {
            if let LinkEvent::Error { context } = event {
                callback(&context);
            }
        })
    }

    // === Internal ===

    /// Claim the link for a connection attempt.
    fn begin(&self, phase: ConnectionState) -> Result<Attempt> {
        let mut state = self.state.lock();

        if state.phase.is_connected() {
            debug!("Already connected");
            if let Some(device) = state.device.clone() {
                return Ok(Attempt::AlreadyConnected(device));
            }
        }

        if state.phase.is_transitioning() {
            return Err(Error::ConnectionFailed {
                reason: "Connection already in progress".to_string(),
            });
        }

        if state.closing {
            return Err(Error::ConnectionFailed {
                reason: "Previous connection attempt still closing".to_string(),
            });
        }

        debug!("Link {} -> {}", state.phase, phase);
        state.phase = phase;
        state.generation += 1;
        state.latest_attempt = state.generation;
        Ok(Attempt::Started(state.generation))
    }

    /// Settle a connection attempt.
    fn finish(&self, generation: u64, result: Result<DeviceInfo>) -> Result<DeviceInfo> {
        if let Err(ref e) = result {
            warn!("Connection attempt failed: {}", e);
            let mut state = self.state.lock();
            if state.generation == generation {
                state.enter_disconnected(&self.event_tx, "connection attempt failed");
            }
        }
        result
    }

    /// Open the GATT connection and bind it; close it again if binding fails.
    ///
    /// The adapter connection is only closed while no newer attempt has
    /// started, since a newer attempt shares the same peripheral.
    async fn establish(&self, device: &DeviceInfo, generation: u64) -> Result<()> {
        info!("Connecting to {} ({})", device.name, device.id);
        self.transport.connect(device).await?;

        let result = match self.ensure_current(generation) {
            Ok(()) => self.bind(device, generation).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            let cleanup = {
                let mut state = self.state.lock();
                let owns_link = state.latest_attempt == generation;
                if owns_link {
                    state.closing = true;
                }
                owns_link
            };

            if cleanup {
                if let Err(de) = self.transport.disconnect(device).await {
                    debug!("Cleanup disconnect failed: {}", de);
                }
                self.state.lock().closing = false;
            } else {
                debug!("Skipping cleanup disconnect, a newer attempt owns the link");
            }
            return Err(e);
        }

        Ok(())
    }

    fn ensure_current(&self, generation: u64) -> Result<()> {
        if self.state.lock().generation != generation {
            return Err(superseded());
        }
        Ok(())
    }

    async fn bind(&self, device: &DeviceInfo, generation: u64) -> Result<()> {
        let discovered = self
            .transport
            .characteristics(device, self.config.service_uuid)
            .await?;
        debug!("Discovered {} characteristics", discovered.len());

        let roles = resolve_roles(&discovered)?;
        let notifications = self.transport.subscribe(device, &roles.telemetry).await?;
        let disconnects = self.transport.disconnect_events().await?;
        let mtu = mtu::negotiate(&*self.transport, device, self.config.chunk_size_floor).await;

        let mut state = self.state.lock();
        if state.generation != generation {
            return Err(superseded());
        }

        state.bindings = Some(Bindings {
            roles,
            discovered,
            notifications_enabled: true,
        });
        state.mtu = mtu;
        state.phase = ConnectionState::Connected;
        state.pump = Some(self.spawn_pump(generation, notifications));
        state.watcher = Some(self.spawn_watcher(generation, disconnects, device.id.clone()));

        info!(
            "Connected to {} (mtu={}, max_chunk_size={})",
            device.name, mtu.mtu, mtu.max_chunk_size
        );
        let _ = self.event_tx.send(LinkEvent::ConnectionChanged {
            connected: true,
            device_name: device.name.clone(),
            device_id: device.id.clone(),
        });

        Ok(())
    }

    /// Feed notifications of one connection generation into the demultiplexer.
    fn spawn_pump(&self, generation: u64, mut notifications: NotificationStream) -> JoinHandle<()> {
        let state = self.state.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            debug!("Notification pump started (generation {})", generation);

            while let Some(payload) = notifications.next().await {
                let mut state = state.lock();
                if state.generation != generation {
                    break;
                }
                for event in state.inbound.process(&payload, Utc::now()) {
                    let _ = event_tx.send(event);
                }
            }

            debug!("Notification pump stopped (generation {})", generation);
        })
    }

    /// Turn a platform disconnect of our device into a teardown.
    fn spawn_watcher(
        &self,
        generation: u64,
        mut disconnects: DisconnectStream,
        device_id: String,
    ) -> JoinHandle<()> {
        let state = self.state.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            while let Some(id) = disconnects.next().await {
                if id != device_id {
                    continue;
                }

                info!("Device {} disconnected", id);
                let mut state = state.lock();
                if state.generation == generation {
                    state.enter_disconnected(&event_tx, "device disconnected");
                }
                break;
            }
        })
    }

    fn register<F>(&self, handler: F) -> CallbackHandle
    where
        F: Fn(LinkEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Callback {} lagged, {} events skipped", callback_id, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }
}

fn superseded() -> Error {
    Error::ConnectionFailed {
        reason: "Connection attempt superseded".to_string(),
    }
}

impl<T> Drop for BleLink<T> {
    fn drop(&mut self) {
        self.state.lock().abort_tasks();
    }
}

impl<T> std::fmt::Debug for BleLink<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BleLink")
            .field("state", &state.phase)
            .field("device", &state.device)
            .field("mtu", &state.mtu)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::characteristics::CharacteristicProperties;
    use crate::ble::transport::DeviceFilter;
    use crate::ble::uuids::{UART_RX_UUID, UART_SERVICE_UUID, UART_TX_UUID};
    use crate::protocol::file::OrphanChunkPolicy;
    use async_trait::async_trait;
    use futures::stream;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;
    use tokio::sync::{mpsc, Notify};

    const DEVICE_ID: &str = "AA:BB:CC:DD:EE:FF";
    const DEVICE_NAME: &str = "DYJ-V2";

    /// Channel-backed transport standing in for the radio.
    struct FakeTransport {
        descriptors: Vec<CharacteristicDescriptor>,
        mtu: Option<u16>,
        fail_connect: AtomicBool,
        /// Holds the next `connect` call until notified.
        connect_gate: parking_lot::Mutex<Option<Arc<Notify>>>,
        connect_calls: AtomicUsize,
        writes: parking_lot::Mutex<Vec<Vec<u8>>>,
        notify_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
        disconnect_tx: broadcast::Sender<String>,
        requests: AtomicUsize,
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        unsubscribes: AtomicUsize,
    }

    impl FakeTransport {
        fn new(descriptors: Vec<CharacteristicDescriptor>, mtu: Option<u16>) -> Arc<Self> {
            let (disconnect_tx, _) = broadcast::channel(8);
            Arc::new(Self {
                descriptors,
                mtu,
                fail_connect: AtomicBool::new(false),
                connect_gate: parking_lot::Mutex::new(None),
                connect_calls: AtomicUsize::new(0),
                writes: parking_lot::Mutex::new(Vec::new()),
                notify_tx: parking_lot::Mutex::new(None),
                disconnect_tx,
                requests: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
                unsubscribes: AtomicUsize::new(0),
            })
        }

        fn uart(mtu: Option<u16>) -> Arc<Self> {
            Self::new(vec![rx_descriptor(), tx_descriptor()], mtu)
        }

        fn notify(&self, payload: &[u8]) {
            if let Some(tx) = self.notify_tx.lock().as_ref() {
                let _ = tx.send(payload.to_vec());
            }
        }

        fn drop_link(&self) {
            let _ = self.disconnect_tx.send(DEVICE_ID.to_string());
        }

        fn writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn request_device(&self, _filter: &DeviceFilter) -> Result<DeviceInfo> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(DeviceInfo::new(DEVICE_ID, DEVICE_NAME))
        }

        async fn connect(&self, _device: &DeviceInfo) -> Result<()> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.connect_gate.lock().take();
            if let Some(gate) = gate {
                gate.notified().await;
            }

            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(Error::ConnectionFailed {
                    reason: "out of range".to_string(),
                });
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn characteristics(
            &self,
            _device: &DeviceInfo,
            _service: uuid::Uuid,
        ) -> Result<Vec<CharacteristicDescriptor>> {
            Ok(self.descriptors.clone())
        }

        async fn write(
            &self,
            _device: &DeviceInfo,
            _characteristic: &CharacteristicDescriptor,
            data: &[u8],
        ) -> Result<()> {
            self.writes.lock().push(data.to_vec());
            Ok(())
        }

        async fn subscribe(
            &self,
            _device: &DeviceInfo,
            _characteristic: &CharacteristicDescriptor,
        ) -> Result<NotificationStream> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.notify_tx.lock() = Some(tx);
            Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|payload| (payload, rx))
            })))
        }

        async fn unsubscribe(
            &self,
            _device: &DeviceInfo,
            _characteristic: &CharacteristicDescriptor,
        ) -> Result<()> {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
            *self.notify_tx.lock() = None;
            Ok(())
        }

        async fn mtu(&self, _device: &DeviceInfo) -> Result<Option<u16>> {
            Ok(self.mtu)
        }

        async fn disconnect(&self, _device: &DeviceInfo) -> Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect_events(&self) -> Result<DisconnectStream> {
            let rx = self.disconnect_tx.subscribe();
            Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                loop {
                    match rx.recv().await {
                        Ok(id) => return Some((id, rx)),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => return None,
                    }
                }
            })))
        }
    }

    fn rx_descriptor() -> CharacteristicDescriptor {
        CharacteristicDescriptor::new(
            UART_RX_UUID,
            UART_SERVICE_UUID,
            CharacteristicProperties {
                write: true,
                write_without_response: true,
                ..Default::default()
            },
        )
    }

    fn tx_descriptor() -> CharacteristicDescriptor {
        CharacteristicDescriptor::new(
            UART_TX_UUID,
            UART_SERVICE_UUID,
            CharacteristicProperties {
                notify: true,
                ..Default::default()
            },
        )
    }

    fn test_config() -> LinkConfig {
        LinkConfig::default()
            .with_chunk_pacing(Duration::from_millis(1))
            .with_reconnect_delay(Duration::from_millis(1))
            .with_notification_restart_delay(Duration::from_millis(1))
    }

    fn link(transport: &Arc<FakeTransport>) -> BleLink<FakeTransport> {
        BleLink::with_transport(transport.clone(), test_config()).unwrap()
    }

    async fn next_event(rx: &mut broadcast::Receiver<LinkEvent>) -> LinkEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    fn connected_event() -> LinkEvent {
        LinkEvent::ConnectionChanged {
            connected: true,
            device_name: DEVICE_NAME.to_string(),
            device_id: DEVICE_ID.to_string(),
        }
    }

    fn disconnected_event() -> LinkEvent {
        LinkEvent::ConnectionChanged {
            connected: false,
            device_name: String::new(),
            device_id: String::new(),
        }
    }

    #[tokio::test]
    async fn test_connect_binds_roles_and_negotiates() {
        let transport = FakeTransport::uart(Some(100));
        let link = link(&transport);
        let mut events = link.subscribe();

        let device = link.connect().await.unwrap();

        assert_eq!(device, DeviceInfo::new(DEVICE_ID, DEVICE_NAME));
        assert_eq!(next_event(&mut events).await, connected_event());
        assert_eq!(link.connection_state(), ConnectionState::Connected);
        assert_eq!(
            link.mtu_info(),
            MtuInfo {
                mtu: 100,
                max_chunk_size: 240,
                negotiated: true
            }
        );
        assert_eq!(
            link.connection_status(),
            ConnectionStatus {
                connected: true,
                device_name: DEVICE_NAME.to_string(),
                device_id: DEVICE_ID.to_string(),
            }
        );

        let info = link.characteristics_info().unwrap();
        assert_eq!(info.command, rx_descriptor());
        assert_eq!(info.telemetry, tx_descriptor());
        assert_eq!(info.all_characteristics.len(), 2);
        assert!(info.notifications_enabled);
    }

    #[tokio::test]
    async fn test_connect_twice_is_noop() {
        let transport = FakeTransport::uart(None);
        let link = link(&transport);

        link.connect().await.unwrap();
        link.connect().await.unwrap();

        assert_eq!(transport.requests.load(Ordering::SeqCst), 1);
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_without_telemetry_fails_cleanly() {
        let transport = FakeTransport::new(vec![rx_descriptor()], None);
        let link = link(&transport);
        let mut events = link.subscribe();

        let err = link.connect().await.unwrap_err();

        assert!(matches!(err, Error::CharacteristicNotFound { role: "telemetry" }));
        assert_eq!(link.connection_state(), ConnectionState::Disconnected);
        assert_eq!(next_event(&mut events).await, disconnected_event());
        assert!(link.characteristics_info().is_none());
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_disconnected() {
        let transport = FakeTransport::uart(None);
        transport.fail_connect.store(true, Ordering::SeqCst);
        let link = link(&transport);

        assert!(matches!(
            link.connect().await,
            Err(Error::ConnectionFailed { .. })
        ));
        assert!(!link.is_connected());
        assert_eq!(link.remembered_device().unwrap().id, DEVICE_ID);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let transport = FakeTransport::uart(None);
        let link = link(&transport);

        assert!(matches!(link.send("BASE_INFO").await, Err(Error::NotConnected)));
        assert!(transport.writes().is_empty());
    }

    #[tokio::test]
    async fn test_send_chunks_message() {
        let transport = FakeTransport::uart(None);
        let link = link(&transport);
        link.connect().await.unwrap();

        let message = "x".repeat(500);
        link.send(&message).await.unwrap();

        let writes = transport.writes();
        assert_eq!(writes.len(), 3);
        assert!(writes.iter().all(|w| w.len() <= 240));
        assert_eq!(writes.concat(), format!("{}\n", message).into_bytes());
    }

    #[tokio::test]
    async fn test_send_with_lowered_floor_uses_mtu() {
        let transport = FakeTransport::uart(Some(23));
        let link = BleLink::with_transport(
            transport.clone(),
            test_config().with_chunk_size_floor(20),
        )
        .unwrap();
        link.connect().await.unwrap();

        link.send_test_command().await.unwrap();
        link.send("0123456789012345678901234").await.unwrap();

        let writes = transport.writes();
        assert_eq!(writes[0], b"BASE_INFO\n".to_vec());
        assert_eq!(writes[1].len(), 20);
        assert_eq!(writes[2], b"01234\n".to_vec());
    }

    #[tokio::test]
    async fn test_inbound_messages_and_file_chunks_in_order() {
        let transport = FakeTransport::uart(None);
        let link = link(&transport);
        let mut events = link.subscribe();
        link.connect().await.unwrap();
        assert_eq!(next_event(&mut events).await, connected_event());

        link.start_file_receive("log.bin");
        transport.notify(b"TEMP:2");
        transport.notify(&[0x00, 0x01, 0x02]);
        transport.notify(b"1.5\r\nOK\n");
        transport.notify(&[0x00, 0x03, 0x04]);

        match next_event(&mut events).await {
            LinkEvent::FileChunk(chunk) => {
                assert_eq!(chunk.name, "log.bin");
                assert_eq!(chunk.total_length, 2);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(next_event(&mut events).await, LinkEvent::Message("TEMP:21.5".to_string()));
        assert_eq!(next_event(&mut events).await, LinkEvent::Message("OK".to_string()));
        match next_event(&mut events).await {
            LinkEvent::FileChunk(chunk) => assert_eq!(chunk.total_length, 4),
            other => panic!("unexpected event: {:?}", other),
        }

        let file = link.end_file_receive();
        assert_eq!(file.name, "log.bin");
        assert_eq!(&file.data[..], &[0x01, 0x02, 0x03, 0x04]);
        assert!(!link.file_receive_status().is_receiving);

        let stats = link.debug_stats();
        assert_eq!(stats.receive_count, 4);
        assert!(stats.has_characteristics);
        assert_eq!(stats.characteristics_count, 2);
    }

    #[tokio::test]
    async fn test_unsolicited_disconnect_resets_everything() {
        let transport = FakeTransport::uart(Some(300));
        let link = link(&transport);
        let mut events = link.subscribe();
        link.connect().await.unwrap();
        assert_eq!(next_event(&mut events).await, connected_event());

        link.start_file_receive("photo.jpg");
        transport.notify(b"half a li");
        transport.notify(&[0x00, 0xFF]);
        assert!(matches!(next_event(&mut events).await, LinkEvent::FileChunk(_)));
        assert_eq!(link.debug_stats().receive_buffer_length, 9);

        transport.drop_link();

        assert_eq!(next_event(&mut events).await, disconnected_event());
        assert_eq!(link.connection_state(), ConnectionState::Disconnected);
        assert_eq!(link.debug_stats().receive_buffer_length, 0);
        assert_eq!(link.file_receive_status(), FileReceiveStatus::default());
        assert_eq!(link.mtu_info(), MtuInfo::default());
        assert!(link.characteristics_info().is_none());
        assert!(matches!(link.send("x").await, Err(Error::NotConnected)));
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_best_effort_and_idempotent() {
        let transport = FakeTransport::uart(None);
        let link = link(&transport);
        let mut events = link.subscribe();
        link.connect().await.unwrap();
        assert_eq!(next_event(&mut events).await, connected_event());

        transport.notify(b"pending");
        link.disconnect().await.unwrap();
        link.disconnect().await.unwrap();

        assert_eq!(next_event(&mut events).await, disconnected_event());
        assert!(events.try_recv().is_err());
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(link.debug_stats().receive_buffer_length, 0);
        assert!(link.connection_status().device_name == DEVICE_NAME);
    }

    #[tokio::test]
    async fn test_reconnect_requires_remembered_device() {
        let transport = FakeTransport::uart(None);
        let link = link(&transport);

        assert!(matches!(
            link.reconnect().await,
            Err(Error::NoRememberedDevice)
        ));
        assert_eq!(transport.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reconnect_after_drop_skips_device_search() {
        let transport = FakeTransport::uart(None);
        let link = link(&transport);
        let mut events = link.subscribe();
        link.connect().await.unwrap();
        assert_eq!(next_event(&mut events).await, connected_event());

        transport.drop_link();
        assert_eq!(next_event(&mut events).await, disconnected_event());

        let device = link.reconnect().await.unwrap();

        assert_eq!(device.id, DEVICE_ID);
        assert_eq!(next_event(&mut events).await, connected_event());
        assert_eq!(transport.requests.load(Ordering::SeqCst), 1);
        assert_eq!(transport.connects.load(Ordering::SeqCst), 2);

        transport.notify(b"back\n");
        assert_eq!(next_event(&mut events).await, LinkEvent::Message("back".to_string()));
    }

    #[tokio::test]
    async fn test_reconnect_while_connected_cycles_link() {
        let transport = FakeTransport::uart(None);
        let link = link(&transport);
        let mut events = link.subscribe();
        link.connect().await.unwrap();
        assert_eq!(next_event(&mut events).await, connected_event());

        link.reconnect().await.unwrap();

        assert_eq!(next_event(&mut events).await, disconnected_event());
        assert_eq!(next_event(&mut events).await, connected_event());
        assert!(link.is_connected());
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_renegotiate_requires_connection() {
        let transport = FakeTransport::uart(Some(517));
        let link = link(&transport);

        assert!(matches!(
            link.renegotiate_mtu().await,
            Err(Error::NotConnected)
        ));

        link.connect().await.unwrap();
        let info = link.renegotiate_mtu().await.unwrap();
        assert_eq!(info.max_chunk_size, 514);
        assert_eq!(link.mtu_info(), info);
    }

    #[tokio::test]
    async fn test_restart_notifications() {
        let transport = FakeTransport::uart(None);
        let link = link(&transport);
        let mut events = link.subscribe();

        assert!(matches!(
            link.restart_notifications().await,
            Err(Error::NotConnected)
        ));

        link.connect().await.unwrap();
        assert_eq!(next_event(&mut events).await, connected_event());

        link.restart_notifications().await.unwrap();

        assert_eq!(transport.unsubscribes.load(Ordering::SeqCst), 1);
        assert!(link.characteristics_info().unwrap().notifications_enabled);

        transport.notify(b"after restart\n");
        assert_eq!(
            next_event(&mut events).await,
            LinkEvent::Message("after restart".to_string())
        );
    }

    #[tokio::test]
    async fn test_clear_receive_buffer() {
        let transport = FakeTransport::uart(None);
        let link = link(&transport);
        let mut events = link.subscribe();
        link.connect().await.unwrap();
        assert_eq!(next_event(&mut events).await, connected_event());

        transport.notify(b"stale");
        transport.notify(&[0x00, 0x01]);
        assert!(matches!(next_event(&mut events).await, LinkEvent::FileChunk(_)));

        link.clear_receive_buffer();
        transport.notify(b"fresh\n");

        assert_eq!(next_event(&mut events).await, LinkEvent::Message("fresh".to_string()));
        assert_eq!(link.debug_stats().receive_count, 1);
    }

    #[tokio::test]
    async fn test_discard_policy_reports_orphan_chunks() {
        let transport = FakeTransport::uart(None);
        let link = BleLink::with_transport(
            transport.clone(),
            test_config().with_orphan_file_chunks(OrphanChunkPolicy::Discard),
        )
        .unwrap();
        let mut errors = Vec::new();
        let mut events = link.subscribe();
        link.connect().await.unwrap();
        assert_eq!(next_event(&mut events).await, connected_event());

        transport.notify(&[0x00, 0x01]);
        if let LinkEvent::Error { context } = next_event(&mut events).await {
            errors.push(context);
        }

        assert_eq!(errors.len(), 1);
        assert_eq!(link.file_receive_status().bytes_received, 0);
    }

    #[tokio::test]
    async fn test_callbacks() {
        let transport = FakeTransport::uart(None);
        let link = link(&transport);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let message_tx = tx.clone();
        let _messages = link.on_message(move |m| {
            let _ = message_tx.send(format!("message:{}", m));
        });
        let _connections = link.on_connection_change(move |connected, name| {
            let _ = tx.send(format!("connected:{}:{}", connected, name));
        });

        link.connect().await.unwrap();
        transport.notify(b"hello\n");

        let mut seen = Vec::new();
        for _ in 0..2 {
            let item = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(item);
        }
        seen.sort();

        assert_eq!(seen, vec!["connected:true:DYJ-V2", "message:hello"]);
    }

    fn gate_next_connect(transport: &FakeTransport) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *transport.connect_gate.lock() = Some(gate.clone());
        gate
    }

    async fn wait_for_connect_call(transport: &FakeTransport) {
        while transport.connect_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_disconnect_during_connect_abandons_attempt() {
        let transport = FakeTransport::uart(None);
        let gate = gate_next_connect(&transport);
        let link = Arc::new(link(&transport));
        let mut events = link.subscribe();

        let attempt = tokio::spawn({
            let link = link.clone();
            async move { link.connect().await }
        });
        wait_for_connect_call(&transport).await;
        assert_eq!(link.connection_state(), ConnectionState::Connecting);

        link.disconnect().await.unwrap();
        assert_eq!(next_event(&mut events).await, disconnected_event());

        gate.notify_one();
        let result = attempt.await.unwrap();

        assert!(matches!(result, Err(Error::ConnectionFailed { .. })));
        assert_eq!(link.connection_state(), ConnectionState::Disconnected);
        assert!(events.try_recv().is_err());
        assert!(link.characteristics_info().is_none());
        // One from `disconnect`, one closing the abandoned adapter connection.
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 2);

        link.connect().await.unwrap();
        assert_eq!(next_event(&mut events).await, connected_event());
        assert!(link.is_connected());
    }

    #[tokio::test]
    async fn test_abandoned_attempt_leaves_newer_connection_alone() {
        let transport = FakeTransport::uart(None);
        let gate = gate_next_connect(&transport);
        let link = Arc::new(link(&transport));
        let mut events = link.subscribe();

        let stale = tokio::spawn({
            let link = link.clone();
            async move { link.connect().await }
        });
        wait_for_connect_call(&transport).await;

        link.disconnect().await.unwrap();
        assert_eq!(next_event(&mut events).await, disconnected_event());

        link.connect().await.unwrap();
        assert_eq!(next_event(&mut events).await, connected_event());

        gate.notify_one();
        assert!(matches!(
            stale.await.unwrap(),
            Err(Error::ConnectionFailed { .. })
        ));

        assert!(link.is_connected());
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(link.remembered_device().unwrap().id, DEVICE_ID);
        assert!(link.characteristics_info().is_some());

        transport.notify(b"still here\n");
        assert_eq!(
            next_event(&mut events).await,
            LinkEvent::Message("still here".to_string())
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_paces_between_chunks_only() {
        let transport = FakeTransport::uart(None);
        let link = BleLink::with_transport(
            transport.clone(),
            test_config().with_chunk_pacing(Duration::from_millis(10)),
        )
        .unwrap();
        link.connect().await.unwrap();

        let start = tokio::time::Instant::now();
        link.send(&"x".repeat(500)).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(20));
        assert_eq!(transport.writes().len(), 3);

        let start = tokio::time::Instant::now();
        link.send_test_command().await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(transport.writes().len(), 4);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let transport = FakeTransport::uart(None);
        let config = LinkConfig::default().with_chunk_size_floor(0);

        assert!(matches!(
            BleLink::with_transport(transport, config),
            Err(Error::InvalidConfig { .. })
        ));
    }
}
