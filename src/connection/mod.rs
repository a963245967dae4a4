//! The connection to a V5 device.
//!
//! A [`Connection`] owns the serial port. A background task reads frames
//! off it and hands each one to the oldest pending request that accepts
//! it. Replies carry no request id, so concurrent requests for the same
//! reply type resolve in the order they were sent.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use crate::commands::simple::{Query1, Query1Reply, SystemVersion, SystemVersionReply};
use crate::commands::system::{GetSystemStatus, SystemStatusReply};
use crate::commands::Command;
use crate::config::ConnectionConfig;
use crate::errors::{DeviceError, VexAckType};
use crate::io::{BoxedReader, BoxedWriter, EndpointInfo, SerialBackend, SerialEndpoint};
use crate::responses::{HostFrame, PacketCodec, ReplyFilter, Response};

mod pending;
mod reader;

use pending::PendingQueue;

/// How long a reconnect candidate gets to answer its status query
const RECONNECT_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Lifecycle of a [`Connection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
    Closing,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

/// Formats bytes as hex for the logs, cut off after 100 bytes
pub(crate) fn hex(bytes: &[u8]) -> String {
    let mut out = bytes
        .iter()
        .take(100)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ");
    if bytes.len() > 100 {
        out.push_str(" ...");
    }
    out
}

pub(crate) struct Shared {
    backend: Arc<dyn SerialBackend>,
    codec: PacketCodec,
    pub(crate) config: ConnectionConfig,
    pending: Mutex<PendingQueue>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    endpoint: Mutex<Option<Arc<dyn SerialEndpoint>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    /// Bumped every time a port is attached or the connection is closed
    session: AtomicU64,
    /// Set by `close` to stop a running reconnect
    shutdown: AtomicBool,
    unique_id: Mutex<Option<u32>>,
    reconnect_lock: tokio::sync::Mutex<()>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, PendingQueue> {
        lock(&self.pending)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Resolves the request a frame belongs to
    pub(crate) fn dispatch(&self, frame: HostFrame) {
        trace!("Frame {}: {}", frame.id(), hex(frame.data()));

        let entry = self.pending().take_match(&frame);
        match entry {
            Some(entry) => {
                let response = self.codec.resolve(frame, entry.filter);
                entry.resolve(response);
            }
            None => warn!("No request is waiting for frame {}, dropping it", frame.id()),
        }
    }

    /// Resolves the oldest request with a timeout.
    ///
    /// This is not necessarily the request whose timer fired. The expired
    /// request's own timer stays armed and expires the next oldest one.
    fn expire_oldest(&self) {
        let entry = self.pending().pop_oldest();
        if let Some(entry) = entry {
            debug!("Request {} timed out", entry.id);
            entry.expire();
        }
    }

    /// Tears down after the port failed under a request, reconnecting
    /// when configured to
    async fn transport_failed(self: &Arc<Self>) {
        let was_open = self.teardown(true).await;
        if was_open && self.config.auto_reconnect && !self.shutdown.load(Ordering::SeqCst) {
            info!("Connection lost, reconnecting");
            spawn_reconnect(Connection {
                shared: self.clone(),
            });
        }
    }

    /// Installs freshly opened port halves and starts reading
    async fn attach(
        self: &Arc<Self>,
        endpoint: Arc<dyn SerialEndpoint>,
        reader: BoxedReader,
        writer: BoxedWriter,
    ) {
        let session = self.session.fetch_add(1, Ordering::SeqCst) + 1;

        *self.writer.lock().await = Some(writer);
        *lock(&self.endpoint) = Some(endpoint);

        let task = tokio::spawn(reader::read_loop(reader, self.clone(), session));
        *lock(&self.reader_task) = Some(task);
    }

    /// Releases the port and fails every queued request.
    ///
    /// Every step runs even when an earlier one fails. Returns true when
    /// the connection was open.
    async fn teardown(&self, abort_reader: bool) -> bool {
        let was_open = self.state() == ConnectionState::Open;
        if was_open {
            self.set_state(ConnectionState::Closing);
        }

        let task = lock(&self.reader_task).take();
        if abort_reader {
            // The aborted loop must not tear down whatever comes next
            self.session.fetch_add(1, Ordering::SeqCst);
            if let Some(task) = task {
                task.abort();
            }
        }

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(err) = writer.shutdown().await {
                debug!("Failed to shut down the writer: {}", err);
            }
        }

        let endpoint = lock(&self.endpoint).take();
        if let Some(endpoint) = endpoint {
            if let Err(err) = endpoint.close().await {
                warn!("Failed to close {}: {}", endpoint.info(), err);
            }
        }

        let pending = self.pending().drain();
        if !pending.is_empty() {
            debug!("Failing {} queued requests", pending.len());
        }
        for entry in pending {
            entry.resolve(Response::Ack(VexAckType::ConnectionClosed));
        }

        self.set_state(ConnectionState::Closed);
        if was_open {
            info!("Disconnected");
            let _ = self.events.send(ConnectionEvent::Disconnected);
        }
        was_open
    }

    /// Called by the read loop once the stream is gone
    pub(crate) async fn reader_finished(shared: Arc<Shared>, session: u64) {
        // A newer session or an explicit close owns the port now
        if shared.session.load(Ordering::SeqCst) != session {
            return;
        }

        let was_open = shared.teardown(false).await;
        if was_open
            && shared.config.auto_reconnect
            && !shared.shutdown.load(Ordering::SeqCst)
        {
            info!("Connection lost, reconnecting");
            spawn_reconnect(Connection { shared });
        }
    }
}

fn spawn_reconnect(connection: Connection) {
    tokio::spawn(async move {
        if let Err(err) = connection.reconnect(None).await {
            warn!("Reconnect failed: {}", err);
        }
    });
}

/// A handle to the connection. Clones share the same port.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    pub fn new(backend: Arc<dyn SerialBackend>, config: ConnectionConfig) -> Self {
        Self::with_codec(backend, config, PacketCodec::new())
    }

    /// Uses `codec` to decode replies instead of the built in one
    pub fn with_codec(
        backend: Arc<dyn SerialBackend>,
        config: ConnectionConfig,
        codec: PacketCodec,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        let (events, _) = broadcast::channel(16);

        Connection {
            shared: Arc::new(Shared {
                backend,
                codec,
                config,
                pending: Mutex::new(PendingQueue::new()),
                writer: tokio::sync::Mutex::new(None),
                endpoint: Mutex::new(None),
                reader_task: Mutex::new(None),
                session: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
                unique_id: Mutex::new(None),
                reconnect_lock: tokio::sync::Mutex::new(()),
                state,
                events,
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Connection events from now on
    pub fn subscribe(&self) -> BroadcastStream<ConnectionEvent> {
        BroadcastStream::new(self.shared.events.subscribe())
    }

    /// The endpoint the connection is using, if any
    pub fn endpoint_info(&self) -> Option<EndpointInfo> {
        lock(&self.shared.endpoint).as_ref().map(|e| e.info())
    }

    /// The unique id of the last brain a system status was read from
    pub fn unique_id(&self) -> Option<u32> {
        *lock(&self.shared.unique_id)
    }

    /// Finds a device and opens it.
    ///
    /// Every known endpoint that matches the configured filters and is not
    /// claimed gets opened and probed in turn. When none answers and
    /// `ask_user` is set, the backend is asked for one more endpoint.
    pub async fn connect(&self, ask_user: bool) -> Result<(), DeviceError> {
        if self.is_connected() {
            return Err(DeviceError::AlreadyConnected);
        }
        self.shared.shutdown.store(false, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Opening);

        let candidates = match self.shared.backend.list_endpoints().await {
            Ok(endpoints) => endpoints,
            Err(err) => {
                self.shared.set_state(ConnectionState::Closed);
                return Err(err);
            }
        };

        for endpoint in candidates {
            if !self.accepts(endpoint.as_ref()) {
                continue;
            }
            if self.try_endpoint(endpoint).await {
                return Ok(());
            }
        }

        if ask_user {
            let authorized = self
                .shared
                .backend
                .request_authorization(&self.shared.config.filters)
                .await;
            match authorized {
                Ok(Some(endpoint)) => {
                    if self.try_endpoint(endpoint).await {
                        return Ok(());
                    }
                }
                Ok(None) => debug!("No endpoint was authorized"),
                Err(err) => warn!("Authorization failed: {}", err),
            }
        }

        self.shared.set_state(ConnectionState::Closed);
        Err(DeviceError::NoDevice)
    }

    fn accepts(&self, endpoint: &dyn SerialEndpoint) -> bool {
        let info = endpoint.info();
        let wanted = self.shared.config.filters.iter().any(|f| f.matches(&info));
        if wanted && endpoint.is_claimed() {
            debug!("Skipping {}, it is in use", info);
            return false;
        }
        wanted
    }

    /// Opens an endpoint and keeps it when it answers a Query1
    async fn try_endpoint(&self, endpoint: Arc<dyn SerialEndpoint>) -> bool {
        let info = endpoint.info();
        if !self.open_endpoint(endpoint).await {
            return false;
        }

        let probe = self
            .send(&Query1, self.shared.config.probe_timeout())
            .await
            .ok()
            .and_then(|r| r.into_reply::<Query1Reply>());

        match probe {
            Some(_) => {
                self.mark_open(&info);
                true
            }
            None => {
                debug!("{} did not answer the probe", info);
                self.shared.teardown(true).await;
                self.shared.set_state(ConnectionState::Opening);
                false
            }
        }
    }

    async fn open_endpoint(&self, endpoint: Arc<dyn SerialEndpoint>) -> bool {
        match endpoint.open(self.shared.config.baud_rate).await {
            Ok((reader, writer)) => {
                self.shared.attach(endpoint, reader, writer).await;
                true
            }
            Err(err) => {
                debug!("Failed to open {}: {}", endpoint.info(), err);
                false
            }
        }
    }

    fn mark_open(&self, info: &EndpointInfo) {
        info!("Connected to {}", info);
        self.shared.set_state(ConnectionState::Open);
        let _ = self.shared.events.send(ConnectionEvent::Connected);
    }

    /// Closes the port. Queued requests resolve with
    /// [`VexAckType::ConnectionClosed`].
    pub async fn close(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.teardown(true).await;
    }

    /// Reopens the device after it went away.
    ///
    /// Polls the endpoints once every reconnect interval until one answers
    /// with the unique id of the last brain seen, or with any id when none
    /// was seen yet. A second call while one is running waits for it and
    /// returns its result. Returns false when `timeout` runs out first or
    /// the connection is closed.
    pub async fn reconnect(&self, timeout: Option<Duration>) -> Result<bool, DeviceError> {
        let _guard = self.shared.reconnect_lock.lock().await;
        if self.is_connected() {
            return Ok(true);
        }

        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        self.shared.set_state(ConnectionState::Reconnecting);

        loop {
            if self.shared.shutdown.load(Ordering::SeqCst) {
                self.shared.set_state(ConnectionState::Closed);
                return Ok(false);
            }

            match self.reconnect_once().await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(err) => debug!("Listing endpoints failed: {}", err),
            }

            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    self.shared.set_state(ConnectionState::Closed);
                    return Ok(false);
                }
            }
            tokio::time::sleep(self.shared.config.reconnect_interval()).await;
        }
    }

    async fn reconnect_once(&self) -> Result<bool, DeviceError> {
        let expected = self.unique_id();

        for endpoint in self.shared.backend.list_endpoints().await? {
            if !self.accepts(endpoint.as_ref()) {
                continue;
            }

            let info = endpoint.info();
            if !self.open_endpoint(endpoint).await {
                continue;
            }

            let status = self
                .send(&GetSystemStatus, RECONNECT_PROBE_TIMEOUT)
                .await
                .ok()
                .and_then(|r| r.into_reply::<SystemStatusReply>());

            let same_device = match (&status, expected) {
                (Some(_), None) => true,
                (Some(status), Some(id)) => status.unique_id == Some(id),
                (None, _) => false,
            };

            if same_device {
                self.mark_open(&info);
                return Ok(true);
            }

            self.shared.teardown(true).await;
            self.shared.set_state(ConnectionState::Reconnecting);
        }

        Ok(false)
    }

    /// Sends a command and waits for the reply to it
    pub async fn send<C: Command>(
        &self,
        command: &C,
        timeout: Duration,
    ) -> Result<Response, DeviceError> {
        self.send_raw(command.encode_request(), ReplyFilter::of::<C>(), timeout)
            .await
    }

    /// Writes an encoded packet and waits for the first frame `filter`
    /// accepts.
    ///
    /// Fails only when there is no port to write to. Everything that goes
    /// wrong after that is reported through the [`Response`]. A failed
    /// write also closes the connection.
    pub async fn send_raw(
        &self,
        packet: Vec<u8>,
        filter: ReplyFilter,
        timeout: Duration,
    ) -> Result<Response, DeviceError> {
        let (responder, response) = oneshot::channel();

        let write_failed = {
            // Holding the writer keeps writes and queue order in step
            let mut writer = self.shared.writer.lock().await;
            let writer = writer.as_mut().ok_or(DeviceError::NotConnected)?;

            let id = self.shared.pending().push(filter, responder);

            let weak = Arc::downgrade(&self.shared);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(shared) = weak.upgrade() {
                    shared.expire_oldest();
                }
            });
            self.shared.pending().set_timer(id, timer);

            trace!("Writing {} bytes: {}", packet.len(), hex(&packet));
            let written = match writer.write_all(&packet).await {
                Ok(()) => writer.flush().await,
                Err(err) => Err(err),
            };

            match written {
                Ok(()) => false,
                Err(err) => {
                    warn!("Failed to write to the serial port: {}", err);
                    let entry = self.shared.pending().remove(id);
                    if let Some(entry) = entry {
                        entry.resolve(Response::Ack(VexAckType::WriteError));
                    }
                    true
                }
            }
        };

        // The writer lock is released, teardown needs it
        if write_failed {
            self.shared.transport_failed().await;
        }

        Ok(response
            .await
            .unwrap_or(Response::Ack(VexAckType::ConnectionClosed)))
    }

    /// Sends a command with the default timeout and returns its typed
    /// reply, or `None` when the round trip failed
    pub async fn request<C: Command>(&self, command: &C) -> Result<Option<C::Reply>, DeviceError> {
        self.request_with_timeout(command, self.shared.config.default_timeout())
            .await
    }

    pub async fn request_with_timeout<C: Command>(
        &self,
        command: &C,
        timeout: Duration,
    ) -> Result<Option<C::Reply>, DeviceError> {
        Ok(self.send(command, timeout).await?.into_reply())
    }

    pub async fn query1(&self) -> Result<Option<Query1Reply>, DeviceError> {
        self.request(&Query1).await
    }

    pub async fn system_version(&self) -> Result<Option<SystemVersionReply>, DeviceError> {
        self.request(&SystemVersion).await
    }

    /// Reads the system status and remembers the brain's unique id for
    /// reconnecting
    pub async fn system_status(&self) -> Result<Option<SystemStatusReply>, DeviceError> {
        let status = self.request(&GetSystemStatus).await?;
        if let Some(id) = status.as_ref().and_then(|s| s.unique_id) {
            *lock(&self.shared.unique_id) = Some(id);
        }
        Ok(status)
    }

    /// Number of requests waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.shared.pending().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_is_truncated() {
        assert_eq!(hex(&[0xAA, 0x55, 0x01]), "aa 55 01");

        let long = vec![0u8; 150];
        let formatted = hex(&long);
        assert!(formatted.ends_with(" ..."));
        assert_eq!(formatted.matches("00").count(), 100);
    }
}
