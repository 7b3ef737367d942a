//! Scripted transport for exercising the pipeline without an adapter.

use crate::{
    jtag::{self, TapState},
    transport::{Tdi, Transport, TransportError},
};

/// One recorded TCK cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cycle {
    pub tms: bool,
    pub tdi: bool,
}

/// A software TAP: every clocked bit is applied to the state graph and
/// recorded, and a canned TDO stream plays back while the controller sits
/// in ShiftDR. Past the end of the stream the line floats high, the way an
/// unpowered chain reads.
#[derive(Debug)]
pub struct MockTransport {
    state: TapState,
    cycles: Vec<Cycle>,
    tdo: Vec<u8>,
    cursor: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::starting_in(TapState::RunTestIdle)
    }

    /// A mock whose TAP begins in an arbitrary state, as real hardware does
    /// before the first reset.
    pub fn starting_in(state: TapState) -> Self {
        Self {
            state,
            cycles: Vec::new(),
            tdo: Vec::new(),
            cursor: 0,
        }
    }

    /// Simulate a powered chain. `idcodes` are in physical order, the first
    /// entry nearest the adapter's data-in line; capture order is the
    /// reverse, exactly as the devices would stream their words out.
    pub fn with_chain(idcodes: &[u32]) -> Self {
        let mut mock = Self::new();
        for idcode in idcodes.iter().rev() {
            mock.tdo.extend_from_slice(&idcode.to_le_bytes());
        }
        mock
    }

    /// Raw TDO script, bits LSB-first per byte.
    pub fn with_tdo(tdo: Vec<u8>) -> Self {
        Self { tdo, ..Self::new() }
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    pub fn cycles(&self) -> &[Cycle] {
        &self.cycles
    }

    fn clock(&mut self, tms: bool, tdi: bool) -> bool {
        let sampled = if self.state == TapState::ShiftDR {
            let bit = match self.tdo.get(self.cursor / 8) {
                Some(byte) => byte >> (self.cursor % 8) & 1 == 1,
                None => true,
            };
            self.cursor += 1;
            bit
        } else {
            false
        };
        self.cycles.push(Cycle { tms, tdi });
        self.state = jtag::next(self.state, tms);
        sampled
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn transmit(
        &mut self,
        tms: bool,
        tdi: Tdi<'_>,
        bits: usize,
        _overlapped: bool,
    ) -> Result<Vec<u8>, TransportError> {
        let mut response = vec![0u8; bits.div_ceil(8)];
        for index in 0..bits {
            let level = match tdi {
                Tdi::Constant(level) => level,
                Tdi::Bits(bytes) => bytes[index / 8] >> (index % 8) & 1 == 1,
            };
            if self.clock(tms, level) {
                response[index / 8] |= 1 << (index % 8);
            }
        }
        Ok(response)
    }

    fn tick(
        &mut self,
        tms: bool,
        tdi: bool,
        cycles: usize,
        _overlapped: bool,
    ) -> Result<(), TransportError> {
        for _ in 0..cycles {
            self.clock(tms, tdi);
        }
        Ok(())
    }
}
