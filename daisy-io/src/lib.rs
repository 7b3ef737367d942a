mod connection;
pub mod devices;
mod error;
pub mod jtag;
pub mod mock;
mod transport;
mod units;
mod utils;

pub use crate::{
    connection::Connection,
    error::Error,
    transport::{Tdi, Transport, TransportError},
    units::Bits,
    utils::{Hex, ShortHex},
};
