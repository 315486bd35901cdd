#![deny(unsafe_code)]
#![warn(missing_docs)]

//! A production-oriented, blocking IPMI v2.0 RMCP+ client library.
//!
//! The crate implements:
//! - cipher-suite and authentication-capability discovery
//! - RMCP+ Open Session handshake and RAKP 1-4 key exchange, driven by an
//!   explicit state machine
//! - the RAKP-HMAC-{none,SHA1,MD5,SHA256} authentication families with
//!   their matching integrity (HMAC-SHA1-96, HMAC-MD5-128, HMAC-SHA256-128)
//!   and confidentiality (AES-CBC-128) algorithms
//! - tag-based request sequencing with timeout/retry over lossy UDP
//! - reservation-based chunked retrieval of SDR and FRU repositories
//!
//! It exposes a small public API (`Client`, `ClientBuilder`, the typed
//! commands, and a few types) while keeping protocol and transport details
//! internal.

mod algo;
mod client;
pub mod commands;
mod codec;
mod crypto;
mod debug;
mod dispatch;
mod error;
mod handshake;
mod observe;
mod protocol;
mod retrieval;
mod session;
mod transport;
mod types;

pub use crate::algo::{
    AuthenticationAlgorithm, CipherSuite, ConfidentialityAlgorithm, IntegrityAlgorithm,
};
pub use crate::client::blocking::{AppService, ChassisService, Client, ClientBuilder, StorageService};
pub use crate::dispatch::ResponseListener;
pub use crate::error::{Error, Result};
pub use crate::protocol::CipherSuiteRecord;
pub use crate::retrieval::SdrRecord;
pub use crate::types::{
    ChannelAuthCapabilities, ChassisControl, ChassisStatus, DeviceId, FrontPanelControls,
    FruInventoryInfo, LastPowerEvent, PowerRestorePolicy, PrivilegeLevel, RawResponse, SdrChunk,
    SelfTestDeviceError, SelfTestResult, SensorReading, SystemGuid,
};
