use std::time::Duration;

use crate::error::Result;

/// A datagram transport for RMCP+/IPMI traffic.
///
/// Sending and receiving are split so a background receiver loop can own the
/// read side while callers transmit concurrently.
pub(crate) trait Transport: Send + Sync {
    /// Transmit one datagram.
    fn send(&self, datagram: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for one datagram; `Ok(None)` on timeout.
    fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>>;
}

pub(crate) mod blocking;
