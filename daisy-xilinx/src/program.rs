use daisy_io::{Connection, ShortHex, Transport, devices::Role};
use tracing::info;

use crate::bit::Bitstream;

#[derive(Debug, thiserror::Error)]
pub enum ConfigureError {
    /// The chain holds no device that accepts configuration.
    #[error("no configurable fpga on the scan chain")]
    NoFpga,
    #[error(transparent)]
    Jtag(#[from] daisy_io::Error),
}

/// Program the first FPGA on the chain with a decoded bitstream.
///
/// Every other device is parked in BYPASS: ones ahead of the opcode cover
/// the instruction registers between the target and data-in, and
/// pad-to-chain covers the far side, so exactly one part latches the
/// configuration instruction. The payload then goes out in wire order with
/// one leading zero per bypassed device.
pub fn configure<T: Transport>(
    conn: &mut Connection<T>,
    bit: &Bitstream,
) -> Result<(), ConfigureError> {
    let Some(target) = conn.devices().iter().find(|device| device.profile.is_fpga()) else {
        return Err(ConfigureError::NoFpga);
    };
    let Role::Fpga { program } = target.profile.role else {
        return Err(ConfigureError::NoFpga);
    };
    let name = target.profile.name;
    let ordinal = target.ordinal;
    let irlen = target.irlen();
    let prefix_ones: usize = conn.devices()[..ordinal]
        .iter()
        .map(|device| device.irlen())
        .sum();

    info!(
        device = name,
        part = %bit.part,
        payload = %ShortHex(&bit.wire_data),
        bytes = bit.wire_data.len(),
        "configuring"
    );

    let opcode = u32::from(program).to_le_bytes();
    conn.shift_instruction(&opcode, irlen, true, prefix_ones, false)?;
    conn.shift_data(&bit.wire_data, bit.wire_data.len() * 8, true, ordinal, false)?;
    Ok(())
}
