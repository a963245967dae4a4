//! A fake V5 brain behind an in-memory serial port
#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, WriteHalf};
use tokio::task::JoinHandle;

use vexv5_link::checks::crc16;
use vexv5_link::config::ConnectionConfig;
use vexv5_link::connection::Connection;
use vexv5_link::errors::DeviceError;
use vexv5_link::io::{
    BoxedReader, BoxedWriter, EndpointInfo, PortFilter, SerialBackend, SerialEndpoint,
    VexPortType,
};

/// A packet the host sent to the fake brain
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceRequest {
    pub command: u8,
    pub extended: Option<u8>,
    pub payload: Vec<u8>,
}

impl DeviceRequest {
    /// The name field of a file init request
    pub fn init_name(&self) -> String {
        nul_terminated(&self.payload[28..52])
    }

    /// The name field of a vendor, option, name request
    pub fn vendor_name(&self) -> String {
        nul_terminated(&self.payload[2..26])
    }

    pub fn u32_at(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.payload[offset],
            self.payload[offset + 1],
            self.payload[offset + 2],
            self.payload[offset + 3],
        ])
    }
}

fn nul_terminated(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| *b as char)
        .collect()
}

/// Answers a request with the byte chunks to write back
pub type Handler = Box<dyn FnMut(&DeviceRequest) -> Vec<Vec<u8>> + Send>;

/// Cuts the first device-bound packet off `buf`
fn parse_request(buf: &[u8]) -> Option<(DeviceRequest, usize)> {
    if buf.len() < 5 {
        return None;
    }
    assert_eq!(&buf[..4], &[0xC9, 0x36, 0xB8, 0x47], "bad device header");

    let command = buf[4];
    if command != 0x56 && command != 0x58 {
        let request = DeviceRequest {
            command,
            extended: None,
            payload: Vec::new(),
        };
        return Some((request, 5));
    }

    if buf.len() < 7 {
        return None;
    }
    let extended = buf[5];
    let (length, start) = if buf[6] & 0x80 != 0 {
        if buf.len() < 8 {
            return None;
        }
        ((((buf[6] & 0x7F) as usize) << 8) | buf[7] as usize, 8)
    } else {
        (buf[6] as usize, 7)
    };

    let total = start + length + 2;
    if buf.len() < total {
        return None;
    }
    assert_eq!(crc16(&buf[..total], 0), 0, "bad device CRC");

    let request = DeviceRequest {
        command,
        extended: Some(extended),
        payload: buf[start..start + length].to_vec(),
    };
    Some((request, total))
}

/// Runs the fake brain on its end of the port. Query1 probes are always
/// answered, everything else goes to the handler.
async fn run_device(
    mut stream: DuplexStream,
    handler: Arc<Mutex<Handler>>,
    log: Arc<Mutex<Vec<DeviceRequest>>>,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);

        while let Some((request, used)) = parse_request(&buf) {
            buf.drain(..used);

            let replies = if request.command == 0x21 {
                vec![query1_reply()]
            } else {
                let mut handler = handler.lock().unwrap();
                (*handler)(&request)
            };
            log.lock().unwrap().push(request);

            for reply in replies {
                if stream.write_all(&reply).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// The host's half of the port, which can be made to fail every write
struct HostWriter {
    inner: WriteHalf<DuplexStream>,
    broken: Arc<AtomicBool>,
}

impl AsyncWrite for HostWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.broken.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

pub struct MockEndpoint {
    info: EndpointInfo,
    claimed: AtomicBool,
    silent: AtomicBool,
    broken: Arc<AtomicBool>,
    handler: Arc<Mutex<Handler>>,
    log: Arc<Mutex<Vec<DeviceRequest>>>,
    device: Mutex<Option<JoinHandle<()>>>,
}

impl MockEndpoint {
    pub fn new(handler: Handler) -> Arc<Self> {
        Self::with_info(brain_info(), handler)
    }

    pub fn with_info(info: EndpointInfo, handler: Handler) -> Arc<Self> {
        Arc::new(MockEndpoint {
            info,
            claimed: AtomicBool::new(false),
            silent: AtomicBool::new(false),
            broken: Arc::new(AtomicBool::new(false)),
            handler: Arc::new(Mutex::new(handler)),
            log: Arc::new(Mutex::new(Vec::new())),
            device: Mutex::new(None),
        })
    }

    /// An endpoint that opens but never says anything
    pub fn silent() -> Arc<Self> {
        let endpoint = Self::new(Box::new(|_| Vec::new()));
        endpoint.silent.store(true, Ordering::SeqCst);
        endpoint
    }

    pub fn set_handler(&self, handler: Handler) {
        *self.handler.lock().unwrap() = handler;
    }

    /// Every request received so far, probes included
    pub fn requests(&self) -> Vec<DeviceRequest> {
        self.log.lock().unwrap().clone()
    }

    /// Requests with the given extended id
    pub fn requests_for(&self, extended: u8) -> Vec<DeviceRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.extended == Some(extended))
            .collect()
    }

    /// Makes every following write to the port fail
    pub fn break_writer(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Pulls the cable: the brain's end of the port goes away
    pub fn unplug(&self) {
        if let Some(device) = self.device.lock().unwrap().take() {
            device.abort();
        }
    }
}

#[async_trait]
impl SerialEndpoint for MockEndpoint {
    fn info(&self) -> EndpointInfo {
        self.info.clone()
    }

    fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }

    async fn open(&self, _baud_rate: u32) -> Result<(BoxedReader, BoxedWriter), DeviceError> {
        let (host, device) = tokio::io::duplex(64 * 1024);

        let task = if self.silent.load(Ordering::SeqCst) {
            tokio::spawn(async move {
                let mut device = device;
                let mut sink = [0u8; 1024];
                while let Ok(n) = device.read(&mut sink).await {
                    if n == 0 {
                        break;
                    }
                }
            })
        } else {
            tokio::spawn(run_device(device, self.handler.clone(), self.log.clone()))
        };
        *self.device.lock().unwrap() = Some(task);
        self.claimed.store(true, Ordering::SeqCst);

        let (reader, writer) = tokio::io::split(host);
        let writer = HostWriter {
            inner: writer,
            broken: self.broken.clone(),
        };
        Ok((Box::pin(reader), Box::pin(writer)))
    }

    async fn close(&self) -> Result<(), DeviceError> {
        self.claimed.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockBackend {
    endpoints: Vec<Arc<MockEndpoint>>,
}

impl MockBackend {
    pub fn new(endpoints: Vec<Arc<MockEndpoint>>) -> Arc<Self> {
        Arc::new(MockBackend { endpoints })
    }
}

#[async_trait]
impl SerialBackend for MockBackend {
    async fn list_endpoints(&self) -> Result<Vec<Arc<dyn SerialEndpoint>>, DeviceError> {
        Ok(self
            .endpoints
            .iter()
            .map(|e| e.clone() as Arc<dyn SerialEndpoint>)
            .collect())
    }

    async fn request_authorization(
        &self,
        _filters: &[PortFilter],
    ) -> Result<Option<Arc<dyn SerialEndpoint>>, DeviceError> {
        Ok(None)
    }
}

pub fn brain_info() -> EndpointInfo {
    EndpointInfo {
        name: "mock-brain".to_string(),
        vendor_id: Some(0x2888),
        product_id: Some(0x0501),
        port_type: VexPortType::System,
    }
}

pub fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        auto_reconnect: false,
        reconnect_interval: 10,
        ..ConnectionConfig::default()
    }
}

/// Connects to a single fake brain driven by `handler`
pub async fn connect(handler: Handler) -> (Connection, Arc<MockEndpoint>) {
    connect_with(test_config(), handler).await
}

pub async fn connect_with(
    config: ConnectionConfig,
    handler: Handler,
) -> (Connection, Arc<MockEndpoint>) {
    let endpoint = MockEndpoint::new(handler);
    let connection = Connection::new(MockBackend::new(vec![endpoint.clone()]), config);
    connection.connect(false).await.unwrap();
    (connection, endpoint)
}

/// Waits until `check` holds, failing the test after a second
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

pub fn query1_reply() -> Vec<u8> {
    vec![0xAA, 0x55, 0x21, 0x08, 0, 0, 0x10, 0, 0, 0, 0, 0]
}

pub fn system_version_reply() -> Vec<u8> {
    vec![0xAA, 0x55, 0xA4, 0x05, 1, 1, 34, 0x10, 0]
}

/// A host-bound CDC2 frame around `body`, which starts at the extended id
pub fn cdc2_frame(body: &[u8]) -> Vec<u8> {
    frame_with(0x56, body)
}

pub fn frame_with(command: u8, body: &[u8]) -> Vec<u8> {
    let mut data = vec![0xAA, 0x55, command];
    let size = body.len() + 2;
    if size > 0x7F {
        data.push(((size >> 8) as u8) | 0x80);
    }
    data.push((size & 0xFF) as u8);
    data.extend_from_slice(body);
    let crc = crc16(&data, 0);
    data.extend(crc.to_be_bytes());
    data
}

/// An ACK of `extended` followed by `fields`
pub fn ack(extended: u8, fields: &[u8]) -> Vec<u8> {
    let mut body = vec![extended, 0x76];
    body.extend_from_slice(fields);
    cdc2_frame(&body)
}

pub fn nack(extended: u8, code: u8) -> Vec<u8> {
    cdc2_frame(&[extended, code])
}

/// Reply to a file init: window size, file size and CRC
pub fn init_reply(window: u16, file_size: u32) -> Vec<u8> {
    let mut fields = window.to_le_bytes().to_vec();
    fields.extend(file_size.to_le_bytes());
    fields.extend(0u32.to_le_bytes());
    ack(0x11, &fields)
}

/// A short system status reply, without a unique id
pub fn system_status_reply() -> Vec<u8> {
    let mut fields = vec![0u8];
    fields.extend([1, 1, 34, 0]);
    fields.extend([1, 0, 0, 0]);
    fields.extend([1, 0, 0, 0]);
    fields.extend([0, 1, 0, 0]);
    ack(0x22, &fields)
}

/// A directory entry reply
pub fn entry_reply(index: u8, name: &str, size: u32, timestamp: u32) -> Vec<u8> {
    let mut fields = vec![index];
    fields.extend(size.to_le_bytes());
    fields.extend(0x03800000u32.to_le_bytes());
    fields.extend(0u32.to_le_bytes());
    let ext = name.rsplit('.').next().unwrap_or("");
    let mut file_type = [0u8; 4];
    file_type[..ext.len().min(4)].copy_from_slice(&ext.as_bytes()[..ext.len().min(4)]);
    fields.extend(file_type);
    fields.extend(timestamp.to_le_bytes());
    fields.extend([1, 0, 0, 0]);
    let mut field = [0u8; 32];
    field[..name.len()].copy_from_slice(name.as_bytes());
    fields.extend(field);
    ack(0x17, &fields)
}

/// A brain that accepts every upload, link, exit, channel switch and
/// status request
pub fn accepting_brain() -> Handler {
    Box::new(|request| match request.extended {
        Some(0x11) => vec![init_reply(4096, 0)],
        Some(ext @ (0x10 | 0x12 | 0x13 | 0x15)) => vec![ack(ext, &[])],
        Some(0x22) => vec![system_status_reply()],
        _ => Vec::new(),
    })
}
