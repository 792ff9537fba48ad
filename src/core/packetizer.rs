//! MTU-aware packetization.
//! Splits outgoing payloads into frames that fit a negotiated MTU and
//! joins received frames back together.

use crate::core::bluetooth::{ATT_HEADER_SIZE, BleError, BleResult};

/// Bytes of application data one ATT packet carries at `mtu`.
pub fn payload_size_for_mtu(mtu: u16) -> usize {
    usize::from(mtu).saturating_sub(ATT_HEADER_SIZE)
}

/// Splits `data` into chunks of at most `mtu - header_size` bytes.
///
/// Empty input yields no packets at all rather than a single empty one.
pub fn split(data: &[u8], mtu: usize, header_size: usize) -> BleResult<Vec<Vec<u8>>> {
    let payload = mtu.checked_sub(header_size).filter(|p| *p > 0).ok_or_else(|| {
        BleError::InvalidArgument(format!(
            "mtu {} leaves no payload after a {} byte header",
            mtu, header_size
        ))
    })?;
    Ok(data.chunks(payload).map(<[u8]>::to_vec).collect())
}

/// Concatenates packets in the order given.
pub fn reassemble<P: AsRef<[u8]>>(packets: &[P]) -> Vec<u8> {
    let total = packets.iter().map(|p| p.as_ref().len()).sum();
    let mut out = Vec::with_capacity(total);
    for packet in packets {
        out.extend_from_slice(packet.as_ref());
    }
    out
}
