//! BACnet Virtual Link Control (BVLL) header codec, Annex J.
//!
//! Every BACnet/IP datagram starts with a four-octet BVLC header: the
//! type octet 0x81, a function octet, and a big-endian length that
//! covers the whole datagram including the header itself. The core
//! provides the codec so IP transports outside this crate agree on the
//! framing; socket handling stays with the transport.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::encoding::{CodecError, Result};

/// BVLL type octet for BACnet/IP (Annex J).
pub const BVLC_TYPE_BIP: u8 = 0x81;

/// Size of the fixed BVLC header.
pub const BVLC_HEADER_SIZE: usize = 4;

/// BVLC functions of Annex J (and their BVLC6 analogues by value).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BvlcFunction {
    Result = 0x00,
    WriteBroadcastDistributionTable = 0x01,
    ReadBroadcastDistributionTable = 0x02,
    ReadBroadcastDistributionTableAck = 0x03,
    ForwardedNpdu = 0x04,
    RegisterForeignDevice = 0x05,
    ReadForeignDeviceTable = 0x06,
    ReadForeignDeviceTableAck = 0x07,
    DeleteForeignDeviceTableEntry = 0x08,
    DistributeBroadcastToNetwork = 0x09,
    OriginalUnicastNpdu = 0x0A,
    OriginalBroadcastNpdu = 0x0B,
    SecureBvll = 0x0C,
}

impl TryFrom<u8> for BvlcFunction {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::Result),
            0x01 => Ok(Self::WriteBroadcastDistributionTable),
            0x02 => Ok(Self::ReadBroadcastDistributionTable),
            0x03 => Ok(Self::ReadBroadcastDistributionTableAck),
            0x04 => Ok(Self::ForwardedNpdu),
            0x05 => Ok(Self::RegisterForeignDevice),
            0x06 => Ok(Self::ReadForeignDeviceTable),
            0x07 => Ok(Self::ReadForeignDeviceTableAck),
            0x08 => Ok(Self::DeleteForeignDeviceTableEntry),
            0x09 => Ok(Self::DistributeBroadcastToNetwork),
            0x0A => Ok(Self::OriginalUnicastNpdu),
            0x0B => Ok(Self::OriginalBroadcastNpdu),
            0x0C => Ok(Self::SecureBvll),
            _ => Err(CodecError::InvalidTag),
        }
    }
}

/// Result codes carried by the BVLC-Result function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BvlcResultCode {
    Success = 0x0000,
    WriteBroadcastDistributionTableNak = 0x0010,
    ReadBroadcastDistributionTableNak = 0x0020,
    RegisterForeignDeviceNak = 0x0030,
    ReadForeignDeviceTableNak = 0x0040,
    DeleteForeignDeviceTableEntryNak = 0x0050,
    DistributeBroadcastToNetworkNak = 0x0060,
}

impl TryFrom<u16> for BvlcResultCode {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0x0000 => Ok(Self::Success),
            0x0010 => Ok(Self::WriteBroadcastDistributionTableNak),
            0x0020 => Ok(Self::ReadBroadcastDistributionTableNak),
            0x0030 => Ok(Self::RegisterForeignDeviceNak),
            0x0040 => Ok(Self::ReadForeignDeviceTableNak),
            0x0050 => Ok(Self::DeleteForeignDeviceTableEntryNak),
            0x0060 => Ok(Self::DistributeBroadcastToNetworkNak),
            _ => Err(CodecError::OutOfRange),
        }
    }
}

/// Prepend a BVLC header for `function` around `payload`; returns octets
/// written.
pub fn encode_bvlc(buffer: &mut Vec<u8>, function: BvlcFunction, payload: &[u8]) -> usize {
    let start = buffer.len();
    let length = (BVLC_HEADER_SIZE + payload.len()) as u16;
    buffer.push(BVLC_TYPE_BIP);
    buffer.push(function as u8);
    buffer.extend_from_slice(&length.to_be_bytes());
    buffer.extend_from_slice(payload);
    buffer.len() - start
}

/// Wrap an NPDU for unicast transmission.
pub fn encode_original_unicast(buffer: &mut Vec<u8>, npdu: &[u8]) -> usize {
    encode_bvlc(buffer, BvlcFunction::OriginalUnicastNpdu, npdu)
}

/// Wrap an NPDU for local broadcast.
pub fn encode_original_broadcast(buffer: &mut Vec<u8>, npdu: &[u8]) -> usize {
    encode_bvlc(buffer, BvlcFunction::OriginalBroadcastNpdu, npdu)
}

/// Wrap an NPDU a BBMD forwards on behalf of `origin` (4-octet IPv4
/// address plus 2-octet UDP port, network order).
pub fn encode_forwarded_npdu(buffer: &mut Vec<u8>, origin: &[u8; 6], npdu: &[u8]) -> usize {
    let start = buffer.len();
    let length = (BVLC_HEADER_SIZE + origin.len() + npdu.len()) as u16;
    buffer.push(BVLC_TYPE_BIP);
    buffer.push(BvlcFunction::ForwardedNpdu as u8);
    buffer.extend_from_slice(&length.to_be_bytes());
    buffer.extend_from_slice(origin);
    buffer.extend_from_slice(npdu);
    buffer.len() - start
}

/// Foreign-device registration with a BBMD, with the requested
/// time-to-live in seconds.
pub fn encode_register_foreign_device(buffer: &mut Vec<u8>, ttl_seconds: u16) -> usize {
    encode_bvlc(
        buffer,
        BvlcFunction::RegisterForeignDevice,
        &ttl_seconds.to_be_bytes(),
    )
}

/// Ask a BBMD to rebroadcast an NPDU on its local network.
pub fn encode_distribute_broadcast(buffer: &mut Vec<u8>, npdu: &[u8]) -> usize {
    encode_bvlc(buffer, BvlcFunction::DistributeBroadcastToNetwork, npdu)
}

/// A BVLC-Result reply.
pub fn encode_result(buffer: &mut Vec<u8>, code: BvlcResultCode) -> usize {
    encode_bvlc(buffer, BvlcFunction::Result, &(code as u16).to_be_bytes())
}

/// Decode a BVLC header, returning the function and the payload slice.
///
/// The declared length must cover the whole datagram exactly; short or
/// padded datagrams are rejected.
pub fn decode_bvlc(data: &[u8]) -> Result<(BvlcFunction, &[u8])> {
    if data.len() < BVLC_HEADER_SIZE {
        return Err(CodecError::Truncated);
    }
    if data[0] != BVLC_TYPE_BIP {
        return Err(CodecError::InvalidTag);
    }
    let function = BvlcFunction::try_from(data[1])?;
    let length = usize::from(u16::from_be_bytes([data[2], data[3]]));
    if length < BVLC_HEADER_SIZE || length != data.len() {
        return Err(CodecError::InvalidLength);
    }
    Ok((function, &data[BVLC_HEADER_SIZE..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "std"))]
    use alloc::vec::Vec;

    #[test]
    fn original_broadcast_literal() {
        // A broadcast Who-Is as it appears on the wire
        let npdu = [0x01, 0x20, 0xFF, 0xFF, 0x00, 0xFF, 0x10, 0x08];
        let mut buf = Vec::new();
        encode_original_broadcast(&mut buf, &npdu);
        assert_eq!(
            buf,
            [0x81, 0x0B, 0x00, 0x0C, 0x01, 0x20, 0xFF, 0xFF, 0x00, 0xFF, 0x10, 0x08]
        );
        let (function, payload) = decode_bvlc(&buf).unwrap();
        assert_eq!(function, BvlcFunction::OriginalBroadcastNpdu);
        assert_eq!(payload, npdu);
    }

    #[test]
    fn forwarded_npdu_carries_origin() {
        let origin = [192, 168, 1, 10, 0xBA, 0xC0];
        let npdu = [0x01, 0x00, 0x10, 0x08];
        let mut buf = Vec::new();
        encode_forwarded_npdu(&mut buf, &origin, &npdu);
        let (function, payload) = decode_bvlc(&buf).unwrap();
        assert_eq!(function, BvlcFunction::ForwardedNpdu);
        assert_eq!(&payload[..6], origin);
        assert_eq!(&payload[6..], npdu);
    }

    #[test]
    fn register_foreign_device_literal() {
        let mut buf = Vec::new();
        encode_register_foreign_device(&mut buf, 900);
        assert_eq!(buf, [0x81, 0x05, 0x00, 0x06, 0x03, 0x84]);
    }

    #[test]
    fn result_codes_round_trip() {
        let mut buf = Vec::new();
        encode_result(&mut buf, BvlcResultCode::RegisterForeignDeviceNak);
        let (function, payload) = decode_bvlc(&buf).unwrap();
        assert_eq!(function, BvlcFunction::Result);
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        assert_eq!(
            BvlcResultCode::try_from(code).unwrap(),
            BvlcResultCode::RegisterForeignDeviceNak
        );
    }

    #[test]
    fn malformed_headers_rejected() {
        assert_eq!(decode_bvlc(&[0x81, 0x0A]), Err(CodecError::Truncated));
        assert_eq!(
            decode_bvlc(&[0x82, 0x0A, 0x00, 0x04]),
            Err(CodecError::InvalidTag)
        );
        assert_eq!(
            decode_bvlc(&[0x81, 0xFE, 0x00, 0x04]),
            Err(CodecError::InvalidTag)
        );
        // Declared length disagrees with the datagram
        assert_eq!(
            decode_bvlc(&[0x81, 0x0A, 0x00, 0x08, 0x01]),
            Err(CodecError::InvalidLength)
        );
    }
}
