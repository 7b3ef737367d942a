use tracing::{debug, info};

use crate::{
    devices::{ChainDevice, Registry},
    error::Error,
    jtag::{self, TapState, TmsPath},
    transport::{Tdi, Transport, TransportError},
    utils::Hex,
};

/// An exclusive session against one adapter port.
///
/// The tracked [`TapState`] mirrors the hardware controller after every
/// operation; that equivalence is what makes route computation sound, and
/// it is re-established at construction by forcing TestLogicReset. A failed
/// transport call leaves the physical chain in an unknown state, so after
/// any [`Error::Transport`] the only legal next operation is
/// [`Connection::reset_target`].
#[derive(Debug)]
pub struct Connection<T> {
    transport: T,
    tap_state: TapState,
    devices: Vec<ChainDevice>,
    chain_bits: usize,
}

impl<T: Transport> Connection<T> {
    /// Take ownership of an enabled port and synchronize with the hardware.
    pub fn new(transport: T) -> Result<Self, Error> {
        let mut conn = Self {
            transport,
            tap_state: TapState::TestLogicReset,
            devices: Vec::new(),
            chain_bits: 0,
        };
        conn.reset_target()?;
        Ok(conn)
    }

    /// [`Connection::new`] followed by a chain scan. An empty chain is
    /// reported as [`Error::PowerOff`]: the port works but nothing answered.
    pub fn open(transport: T, registry: &Registry) -> Result<Self, Error> {
        let mut conn = Self::new(transport)?;
        conn.scan_chain(registry)?;
        if conn.devices.is_empty() {
            return Err(Error::PowerOff);
        }
        Ok(conn)
    }

    /// Enumerated devices, nearest-data-in first.
    pub fn devices(&self) -> &[ChainDevice] {
        &self.devices
    }

    /// Total instruction-register bits across the enumerated chain.
    pub fn chain_bits(&self) -> usize {
        self.chain_bits
    }

    pub fn tap_state(&self) -> TapState {
        self.tap_state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Force TestLogicReset with five TMS-high clocks. Works from any
    /// starting state, including one the tracker has lost after a transport
    /// failure, and is the only way this crate ever reaches TestLogicReset.
    pub fn reset_target(&mut self) -> Result<(), Error> {
        self.transport.tick(true, false, TmsPath::RESET.len(), false)?;
        self.tap_state = TapState::TestLogicReset;
        Ok(())
    }

    /// Park in RunTestIdle and issue `ticks` idle clocks.
    pub fn run_test(&mut self, ticks: usize) -> Result<(), Error> {
        self.move_to(TapState::RunTestIdle)?;
        self.transport.tick(false, false, ticks, false)?;
        Ok(())
    }

    /// Shift `bits` instruction bits (LSB-first from `ir`) through ShiftIR.
    ///
    /// `prefix_ones` BYPASS opcodes go out ahead of the payload and, with
    /// `pad_to_chain`, trailing ones fill the rest of the chain's
    /// instruction length, so exactly one device latches the payload.
    /// Leaves the controller in Exit1IR unless `hold` keeps it shifting.
    pub fn shift_instruction(
        &mut self,
        ir: &[u8],
        bits: usize,
        pad_to_chain: bool,
        prefix_ones: usize,
        hold: bool,
    ) -> Result<(), Error> {
        debug_assert!(bits >= 1 && bits <= ir.len() * 8);
        self.move_to(TapState::ShiftIR)?;
        let suffix = if pad_to_chain {
            self.chain_bits.saturating_sub(prefix_ones + bits)
        } else {
            0
        };
        if prefix_ones > 0 {
            self.shift_out(Tdi::Constant(true), prefix_ones, false, false)?;
        }
        if suffix > 0 {
            self.shift_out(Tdi::Bits(ir), bits, false, false)?;
            self.shift_out(Tdi::Constant(true), suffix, !hold, false)?;
        } else {
            self.shift_out(Tdi::Bits(ir), bits, !hold, false)?;
        }
        Ok(())
    }

    /// Shift `bits` data bits (LSB-first from `data`) through ShiftDR.
    ///
    /// Data-register padding is counted in devices, not bits: every
    /// bypassed device contributes exactly one bit, so `prefix_zeroes` is
    /// the number of devices between the target and data-in, and
    /// `pad_to_chain` appends one zero per device on the far side.
    pub fn shift_data(
        &mut self,
        data: &[u8],
        bits: usize,
        pad_to_chain: bool,
        prefix_zeroes: usize,
        hold: bool,
    ) -> Result<(), Error> {
        debug_assert!(bits >= 1 && bits <= data.len() * 8);
        self.move_to(TapState::ShiftDR)?;
        let suffix = if pad_to_chain {
            self.devices.len().saturating_sub(prefix_zeroes + 1)
        } else {
            0
        };
        if prefix_zeroes > 0 {
            self.shift_out(Tdi::Constant(false), prefix_zeroes, false, false)?;
        }
        if suffix > 0 {
            self.shift_out(Tdi::Bits(data), bits, false, true)?;
            self.shift_out(Tdi::Constant(false), suffix, !hold, false)?;
        } else {
            self.shift_out(Tdi::Bits(data), bits, !hold, true)?;
        }
        Ok(())
    }

    /// Capture `bits` bits from the data register, LSB-first.
    pub fn receive(&mut self, bits: usize, hold: bool) -> Result<Vec<u8>, Error> {
        self.move_to(TapState::ShiftDR)?;
        self.shift_out(Tdi::Constant(true), bits, !hold, false)
    }

    /// Enumerate the chain: reset, then pull 32-bit identification words out
    /// of the data register until the all-zeroes or all-ones end marker.
    /// The first word out belongs to the device nearest data-out, so the
    /// stored order is the reverse of capture order.
    pub fn scan_chain(&mut self, registry: &Registry) -> Result<&[ChainDevice], Error> {
        self.reset_target()?;
        let mut found = Vec::new();
        let mut chain_bits = 0;
        loop {
            let raw = self.receive(32, true)?;
            let ([word], []) = raw.as_chunks() else {
                return Err(TransportError::ShortResponse {
                    expected: 32,
                    got: raw.len() * 8,
                }
                .into());
            };
            let idcode = u32::from_le_bytes(*word);
            // unpowered or floating chains read back a constant level
            if idcode == 0 || idcode == u32::MAX {
                break;
            }
            let profile = registry.resolve(idcode);
            debug!(
                idcode = %Hex(idcode),
                name = profile.name,
                irlen = profile.irlen.0,
                "device answered"
            );
            found.push(ChainDevice {
                idcode,
                profile,
                ordinal: 0,
                scan_offset: chain_bits,
            });
            chain_bits += profile.irlen.0 as usize;
        }
        found.reverse();
        for (ordinal, device) in found.iter_mut().enumerate() {
            device.ordinal = ordinal;
        }
        info!(devices = found.len(), chain_bits, "scan complete");
        self.devices = found;
        self.chain_bits = chain_bits;
        Ok(&self.devices)
    }

    fn move_to(&mut self, target: TapState) -> Result<(), Error> {
        if target == TapState::TestLogicReset {
            // reset must survive an unknown starting state, so it never
            // routes through the graph
            return self.reset_target();
        }
        let path = jtag::path_to(self.tap_state, target);
        let mut hops = path.into_iter().peekable();
        while let Some(tms) = hops.next() {
            let mut run = 1;
            while hops.peek() == Some(&tms) {
                hops.next();
                run += 1;
            }
            self.transport.tick(tms, false, run, false)?;
            for _ in 0..run {
                self.tap_state = jtag::next(self.tap_state, tms);
            }
        }
        Ok(())
    }

    /// Clock out `count` bits of `tdi` with TMS low. When `exit` is set the
    /// final bit instead rides the TMS-high edge that leaves the shift
    /// state: data and transition must share that one clock, or every
    /// bypassed device slips a bit.
    fn shift_out(
        &mut self,
        tdi: Tdi<'_>,
        count: usize,
        exit: bool,
        overlapped: bool,
    ) -> Result<Vec<u8>, Error> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if !exit {
            return self.checked_transmit(false, tdi, count, overlapped);
        }
        let last = bit_at(tdi, count - 1);
        let mut response = if count > 1 {
            self.checked_transmit(false, tdi, count - 1, overlapped)?
        } else {
            Vec::new()
        };
        let tail = self.checked_transmit(true, Tdi::Constant(last), 1, false)?;
        set_bit(&mut response, count - 1, tail[0] & 1 == 1);
        Ok(response)
    }

    fn checked_transmit(
        &mut self,
        tms: bool,
        tdi: Tdi<'_>,
        bits: usize,
        overlapped: bool,
    ) -> Result<Vec<u8>, Error> {
        let response = self.transport.transmit(tms, tdi, bits, overlapped)?;
        if response.len() != bits.div_ceil(8) {
            return Err(TransportError::ShortResponse {
                expected: bits,
                got: response.len() * 8,
            }
            .into());
        }
        // a constant TMS level settles the controller within a few edges
        for _ in 0..bits.min(8) {
            self.tap_state = jtag::next(self.tap_state, tms);
        }
        Ok(response)
    }
}

fn bit_at(tdi: Tdi<'_>, index: usize) -> bool {
    match tdi {
        Tdi::Constant(level) => level,
        Tdi::Bits(bytes) => bytes[index / 8] >> (index % 8) & 1 == 1,
    }
}

fn set_bit(bytes: &mut Vec<u8>, index: usize, value: bool) {
    let need = index / 8 + 1;
    if bytes.len() < need {
        bytes.resize(need, 0);
    }
    if value {
        bytes[index / 8] |= 1 << (index % 8);
    }
}

#[cfg(test)]
mod tests {
    use strum::VariantArray;

    use super::*;
    use crate::{devices::Role, mock::MockTransport};

    const XC3S250E: u32 = 0x01C1A093;
    const XCF01S: u32 = 0x05044093;
    const XCF02S: u32 = 0x05045093;

    #[test]
    fn open_enumerates_in_physical_order() {
        let mock = MockTransport::with_chain(&[XCF02S, XC3S250E]);
        let conn = Connection::open(mock, &Registry::builtin()).unwrap();
        let devices = conn.devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].idcode, XCF02S);
        assert_eq!(devices[0].profile.name, "XCF02S");
        assert_eq!(devices[0].ordinal, 0);
        assert_eq!(devices[0].scan_offset, 6);
        assert_eq!(devices[1].idcode, XC3S250E);
        assert_eq!(devices[1].profile.name, "XC3S250E");
        assert_eq!(devices[1].ordinal, 1);
        assert_eq!(devices[1].scan_offset, 0);
        assert_eq!(conn.chain_bits(), 8 + 6);
    }

    #[test]
    fn zero_word_ends_the_scan() {
        let mock = MockTransport::with_tdo(vec![0, 0, 0, 0]);
        let mut conn = Connection::new(mock).unwrap();
        let devices = conn.scan_chain(&Registry::builtin()).unwrap();
        assert!(devices.is_empty());
        assert_eq!(conn.chain_bits(), 0);
    }

    #[test]
    fn floating_chain_reports_power_off() {
        // no scripted TDO at all: the line floats high
        let mock = MockTransport::new();
        let err = Connection::open(mock, &Registry::builtin()).unwrap_err();
        assert!(matches!(err, Error::PowerOff));
    }

    #[test]
    fn unknown_part_is_counted_as_one_bypass_bit() {
        let mock = MockTransport::with_chain(&[0x0BAD_C0D1]);
        let conn = Connection::open(mock, &Registry::builtin()).unwrap();
        assert_eq!(conn.devices()[0].profile.role, Role::Unknown);
        assert_eq!(conn.devices()[0].irlen(), 1);
        assert_eq!(conn.chain_bits(), 1);
    }

    #[test]
    fn construction_resets_from_any_starting_state() {
        for &start in TapState::VARIANTS {
            let conn = Connection::new(MockTransport::starting_in(start)).unwrap();
            assert_eq!(conn.transport().state(), TapState::TestLogicReset);
            assert_eq!(conn.tap_state(), TapState::TestLogicReset);
            let cycles = conn.transport().cycles();
            assert_eq!(cycles.len(), 5);
            assert!(cycles.iter().all(|c| c.tms));
        }
    }

    #[test]
    fn last_instruction_bit_rides_the_exit_edge() {
        let mut conn = Connection::new(MockTransport::new()).unwrap();
        let before = conn.transport().cycles().len();
        conn.shift_instruction(&[0b10_1101], 6, false, 0, false).unwrap();
        let cycles = &conn.transport().cycles()[before..];
        let shifted = &cycles[cycles.len() - 6..];
        let tdi: Vec<bool> = shifted.iter().map(|c| c.tdi).collect();
        assert_eq!(tdi, [true, false, true, true, false, true]);
        let tms: Vec<bool> = shifted.iter().map(|c| c.tms).collect();
        assert_eq!(tms, [false, false, false, false, false, true]);
        assert_eq!(conn.tap_state(), TapState::Exit1IR);
        assert_eq!(conn.transport().state(), TapState::Exit1IR);
    }

    #[test]
    fn prefix_ones_cover_upstream_instruction_registers() {
        let mock = MockTransport::with_chain(&[XCF02S, XC3S250E]);
        let mut conn = Connection::open(mock, &Registry::builtin()).unwrap();
        let before = conn.transport().cycles().len();
        conn.shift_instruction(&[0x05], 6, true, 8, false).unwrap();
        let cycles = &conn.transport().cycles()[before..];
        // chain is 14 instruction bits: 8 bypass ones, then the payload
        let shifted = &cycles[cycles.len() - 14..];
        assert!(shifted[..8].iter().all(|c| c.tdi && !c.tms));
        let payload: Vec<bool> = shifted[8..].iter().map(|c| c.tdi).collect();
        assert_eq!(payload, [true, false, true, false, false, false]);
        assert!(shifted[..13].iter().all(|c| !c.tms));
        assert!(shifted[13].tms);
        assert_eq!(conn.tap_state(), TapState::Exit1IR);
    }

    #[test]
    fn trailing_pad_carries_the_exit_bit() {
        let mock = MockTransport::with_chain(&[XCF02S, XC3S250E]);
        let mut conn = Connection::open(mock, &Registry::builtin()).unwrap();
        let before = conn.transport().cycles().len();
        conn.shift_instruction(&[0xFF], 8, true, 0, false).unwrap();
        let cycles = &conn.transport().cycles()[before..];
        let shifted = &cycles[cycles.len() - 14..];
        assert!(shifted[..13].iter().all(|c| !c.tms));
        assert!(shifted[8..].iter().all(|c| c.tdi));
        assert!(shifted[13].tms && shifted[13].tdi);
    }

    #[test]
    fn data_padding_is_counted_in_devices() {
        let mock = MockTransport::with_chain(&[XCF02S, XC3S250E, XCF01S]);
        let mut conn = Connection::open(mock, &Registry::builtin()).unwrap();
        let before = conn.transport().cycles().len();
        conn.shift_data(&[0xA5, 0x01], 9, true, 1, false).unwrap();
        let cycles = &conn.transport().cycles()[before..];
        // one bypass bit ahead of the payload, one behind it
        let shifted = &cycles[cycles.len() - 11..];
        assert!(!shifted[0].tdi && !shifted[0].tms);
        let payload: Vec<bool> = shifted[1..10].iter().map(|c| c.tdi).collect();
        assert_eq!(
            payload,
            [true, false, true, false, false, true, false, true, true],
        );
        assert!(!shifted[10].tdi && shifted[10].tms);
        assert_eq!(conn.tap_state(), TapState::Exit1DR);
    }

    #[test]
    fn receive_hold_stays_in_shift_dr() {
        let mut conn = Connection::new(MockTransport::with_tdo(vec![0x5A])).unwrap();
        let bits = conn.receive(8, true).unwrap();
        assert_eq!(bits, [0x5A]);
        assert_eq!(conn.tap_state(), TapState::ShiftDR);
        // stream exhausted: the line floats high
        let bits = conn.receive(4, false).unwrap();
        assert_eq!(bits, [0x0F]);
        assert_eq!(conn.tap_state(), TapState::Exit1DR);
    }

    #[test]
    fn run_test_parks_in_idle() {
        let mut conn = Connection::new(MockTransport::new()).unwrap();
        conn.run_test(3).unwrap();
        assert_eq!(conn.tap_state(), TapState::RunTestIdle);
        assert_eq!(conn.transport().state(), TapState::RunTestIdle);
    }
}
