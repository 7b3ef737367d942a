use thiserror::Error;

use crate::transport::TransportError;

/// Failures surfaced by the core, plus the conditions transport discovery
/// layers report when no usable port could be produced in the first place.
#[derive(Debug, Error)]
pub enum Error {
    /// No supported hardware adapter is attached to the host.
    #[error("no supported hardware adapter found")]
    DeviceNotFound,
    /// An adapter is attached, but it exposes no JTAG-capable port.
    #[error("adapter does not support jtag")]
    UnsupportedConnection,
    /// The scan chain enumerated zero devices; the board is likely unpowered.
    #[error("scan chain is empty; target may be unpowered")]
    PowerOff,
    #[error(transparent)]
    Transport(#[from] TransportError),
}
