//! The transport boundary. Everything platform specific about serial
//! ports lives behind these traits.
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::errors::DeviceError;
use crate::v5::meta::VexProduct;
use crate::v5::VEX_VID;

pub trait Read: AsyncRead + Unpin + Send {}
impl<T: AsyncRead + Unpin + Send> Read for T {}

pub trait Write: AsyncWrite + Unpin + Send {}
impl<T: AsyncWrite + Unpin + Send> Write for T {}

pub type BoxedReader = Pin<Box<dyn Read>>;
pub type BoxedWriter = Pin<Box<dyn Write>>;

/// A USB vendor and product id pair that endpoints are filtered on
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PortFilter {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl PortFilter {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        PortFilter {
            vendor_id,
            product_id,
        }
    }

    /// The filter for one VEX product
    pub fn vex(product: VexProduct) -> Self {
        PortFilter::new(VEX_VID, product.product_id())
    }

    pub fn matches(&self, info: &EndpointInfo) -> bool {
        info.vendor_id == Some(self.vendor_id) && info.product_id == Some(self.product_id)
    }
}

/// What a V5 serial port is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VexPortType {
    /// Talks to VEXos. Commands are sent over this port.
    System,
    /// Talks straight to the user program
    User,
    /// The only port of a controller
    Controller,
    /// Not a V5 port, or one that could not be told apart
    Unknown,
}

/// Describes an endpoint without opening it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub name: String,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub port_type: VexPortType,
}

impl EndpointInfo {
    /// The VEX product behind this endpoint, if it is one
    pub fn product(&self) -> Option<VexProduct> {
        match self.vendor_id {
            Some(VEX_VID) => self.product_id.and_then(VexProduct::from_product_id),
            _ => None,
        }
    }

    pub fn is_controller(&self) -> bool {
        self.product() == Some(VexProduct::V5Controller)
    }
}

impl fmt::Display for EndpointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.vendor_id, self.product_id) {
            (Some(vid), Some(pid)) => write!(f, "{} ({:04x}:{:04x})", self.name, vid, pid),
            _ => f.write_str(&self.name),
        }
    }
}

/// A port that can be opened into a pair of byte streams
#[async_trait]
pub trait SerialEndpoint: Send + Sync {
    fn info(&self) -> EndpointInfo;

    /// True when another consumer already holds the port open
    fn is_claimed(&self) -> bool;

    /// Opens the port at `baud_rate`, splitting it into a reader and a writer
    async fn open(&self, baud_rate: u32) -> Result<(BoxedReader, BoxedWriter), DeviceError>;

    /// Releases the port. Closing a port that is not open does nothing.
    async fn close(&self) -> Result<(), DeviceError>;
}

/// Lists and authorizes endpoints
#[async_trait]
pub trait SerialBackend: Send + Sync {
    /// Endpoints the user already allowed access to
    async fn list_endpoints(&self) -> Result<Vec<Arc<dyn SerialEndpoint>>, DeviceError>;

    /// Asks the user to pick a port matching one of `filters`.
    ///
    /// Backends without a way to ask return `Ok(None)`.
    async fn request_authorization(
        &self,
        filters: &[PortFilter],
    ) -> Result<Option<Arc<dyn SerialEndpoint>>, DeviceError>;
}
