//! The primitive capability a USB JTAG adapter supplies to the core.

use thiserror::Error;

/// TDI operand for a [`Transport::transmit`] burst: a constant level held
/// for every clock, or packed bits shifted out LSB-first.
#[derive(Clone, Copy, Debug)]
pub enum Tdi<'a> {
    Constant(bool),
    Bits(&'a [u8]),
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The adapter reported a failed bulk or control transfer.
    #[error("adapter transfer failed: {0}")]
    Transfer(String),
    /// The adapter captured a different number of bits than requested.
    #[error("adapter returned {got} response bits, expected {expected}")]
    ShortResponse { expected: usize, got: usize },
}

/// Bit-level access to an enabled JTAG port.
///
/// A `Transport` value *is* an enabled port handle: constructing one enables
/// the port and dropping it must disable the port again, on every exit path.
/// Both calls block until the adapter has clocked every bit; `overlapped` is
/// a pipelining hint that implementations are free to ignore.
pub trait Transport {
    /// Clock `bits` TCK cycles with TMS held at `tms`, driving TDI from
    /// `tdi`. Returns the captured TDO response, packed LSB-first.
    fn transmit(
        &mut self,
        tms: bool,
        tdi: Tdi<'_>,
        bits: usize,
        overlapped: bool,
    ) -> Result<Vec<u8>, TransportError>;

    /// Clock `cycles` TCK cycles with constant TMS/TDI levels, no capture.
    fn tick(
        &mut self,
        tms: bool,
        tdi: bool,
        cycles: usize,
        overlapped: bool,
    ) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn transmit(
        &mut self,
        tms: bool,
        tdi: Tdi<'_>,
        bits: usize,
        overlapped: bool,
    ) -> Result<Vec<u8>, TransportError> {
        (**self).transmit(tms, tdi, bits, overlapped)
    }

    fn tick(
        &mut self,
        tms: bool,
        tdi: bool,
        cycles: usize,
        overlapped: bool,
    ) -> Result<(), TransportError> {
        (**self).tick(tms, tdi, cycles, overlapped)
    }
}
