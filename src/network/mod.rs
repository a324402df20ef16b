//! BACnet network layer: the NPDU header and the addresses it routes.
//!
//! Every APDU travels inside an NPDU whose control octet selects which
//! header fields follow: an optional destination specifier (DNET/DLEN/
//! DADR), an optional source specifier (SNET/SLEN/SADR), a hop count when
//! a destination is present, and a network-layer message type when the
//! payload is addressed to the network layer itself rather than to the
//! application.
//!
//! The core is not a router: packets whose destination is a foreign
//! network are counted and dropped by the stack, and network-layer
//! messages are handed to an optional registered handler instead of the
//! APDU parser.
//!
//! # Wire format
//!
//! ```text
//! version (0x01) | control | [DNET u16, DLEN u8, DADR..] |
//! [SNET u16, SLEN u8, SADR..] | [hop count] | [message type, [vendor id]]
//! ```
//!
//! Control bits: 7 = network-layer message, 5 = destination present,
//! 3 = source present, 2 = data expecting reply, 1..0 = priority.

#[cfg(feature = "std")]
use std::error::Error;

#[cfg(feature = "std")]
use std::fmt;

#[cfg(not(feature = "std"))]
use core::fmt;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use bitflags::bitflags;

use crate::generate_custom_enum;
use crate::{BACNET_BROADCAST_NETWORK, BACNET_LOCAL_NETWORK, BACNET_PROTOCOL_VERSION};

/// Result type for network-layer operations
#[cfg(feature = "std")]
pub type Result<T> = std::result::Result<T, NetworkError>;

#[cfg(not(feature = "std"))]
pub type Result<T> = core::result::Result<T, NetworkError>;

/// Errors raised while decoding an NPDU header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    /// Protocol version octet was not 1
    UnsupportedVersion(u8),
    /// Header ended before an announced field did
    Truncated,
    /// A specifier carried an address longer than any link supports
    InvalidAddress,
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::UnsupportedVersion(version) => {
                write!(f, "Unsupported NPDU version: {}", version)
            }
            NetworkError::Truncated => write!(f, "NPDU header truncated"),
            NetworkError::InvalidAddress => write!(f, "Invalid network address"),
        }
    }
}

#[cfg(feature = "std")]
impl Error for NetworkError {}

/// A directly reachable BACnet endpoint.
///
/// `mac` is the link-layer address the local datalink transmits to; for a
/// routed destination, `net`/`adr` name the remote network and the station
/// on it, while `mac` holds the router's link address once known. Two
/// addresses are equal iff all three tuples match byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Address {
    /// Network number; 0 = local network, 65535 = global broadcast
    pub net: u16,
    /// Link-layer address on the directly attached network
    pub mac: Vec<u8>,
    /// Station address on the remote network (empty when local)
    pub adr: Vec<u8>,
}

impl Address {
    /// An endpoint on the directly attached network.
    pub fn local(mac: &[u8]) -> Self {
        Self {
            net: BACNET_LOCAL_NETWORK,
            mac: mac.to_vec(),
            adr: Vec::new(),
        }
    }

    /// A station on a remote network, reached through the router at `mac`.
    pub fn remote(net: u16, adr: &[u8], mac: &[u8]) -> Self {
        Self {
            net,
            mac: mac.to_vec(),
            adr: adr.to_vec(),
        }
    }

    /// The global broadcast address (every network, every station).
    pub fn global_broadcast() -> Self {
        Self {
            net: BACNET_BROADCAST_NETWORK,
            mac: Vec::new(),
            adr: Vec::new(),
        }
    }

    /// Broadcast on the directly attached network.
    pub fn local_broadcast() -> Self {
        Self {
            net: BACNET_LOCAL_NETWORK,
            mac: Vec::new(),
            adr: Vec::new(),
        }
    }

    /// True when the address names the directly attached network.
    pub fn is_local(&self) -> bool {
        self.net == BACNET_LOCAL_NETWORK
    }

    /// True for the global broadcast network number.
    pub fn is_global_broadcast(&self) -> bool {
        self.net == BACNET_BROADCAST_NETWORK
    }

    /// True when no link-layer address is present (a broadcast).
    pub fn is_broadcast(&self) -> bool {
        self.is_global_broadcast() || (self.mac.is_empty() && self.adr.is_empty())
    }
}

/// Network priority carried in the low two control bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MessagePriority {
    #[default]
    Normal = 0,
    Urgent = 1,
    CriticalEquipment = 2,
    LifeSafety = 3,
}

impl From<u8> for MessagePriority {
    fn from(bits: u8) -> Self {
        match bits & 0x03 {
            0 => MessagePriority::Normal,
            1 => MessagePriority::Urgent,
            2 => MessagePriority::CriticalEquipment,
            _ => MessagePriority::LifeSafety,
        }
    }
}

generate_custom_enum! {
    /// Network-layer message types of clause 6.2.4. Types 0x80..=0xFF are
    /// vendor proprietary and carry a vendor identifier after the type.
    NetworkMessageType {
        WhoIsRouterToNetwork = 0x00,
        IAmRouterToNetwork = 0x01,
        ICouldBeRouterToNetwork = 0x02,
        RejectMessageToNetwork = 0x03,
        RouterBusyToNetwork = 0x04,
        RouterAvailableToNetwork = 0x05,
        InitializeRoutingTable = 0x06,
        InitializeRoutingTableAck = 0x07,
        EstablishConnectionToNetwork = 0x08,
        DisconnectConnectionToNetwork = 0x09,
        WhatIsNetworkNumber = 0x12,
        NetworkNumberIs = 0x13,
    },
    u8,
    0x80..=0xFF
}

impl NetworkMessageType {
    /// Proprietary message types carry a vendor identifier on the wire.
    pub fn is_proprietary(&self) -> bool {
        u8::from(*self) >= 0x80
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Control: u8 {
        const NETWORK_MESSAGE = 0b1000_0000;
        const DESTINATION = 0b0010_0000;
        const SOURCE = 0b0000_1000;
        const EXPECTING_REPLY = 0b0000_0100;
    }
}

/// Per-packet metadata carried by the NPDU control octet and trailer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NpduData {
    pub priority: MessagePriority,
    /// Set on confirmed requests so half-duplex links can hold the line
    pub data_expecting_reply: bool,
    /// Present when the payload is a network-layer message, not an APDU
    pub message_type: Option<NetworkMessageType>,
    /// Vendor identifier, present for proprietary network messages
    pub vendor_id: Option<u16>,
    /// Decremented by each router; only present with a destination
    pub hop_count: Option<u8>,
}

impl NpduData {
    /// Metadata for an ordinary application request.
    pub fn application(expecting_reply: bool) -> Self {
        Self {
            data_expecting_reply: expecting_reply,
            ..Self::default()
        }
    }

    /// True when the payload belongs to the network layer.
    pub fn is_network_message(&self) -> bool {
        self.message_type.is_some()
    }
}

/// Default hop count on freshly originated routed packets.
pub const HOP_COUNT_DEFAULT: u8 = 255;

/// A decoded NPDU header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Npdu {
    /// Destination specifier; present on routed and broadcast packets
    pub destination: Option<Address>,
    /// Source specifier, filled in by the first router on the path
    pub source: Option<Address>,
    pub data: NpduData,
}

impl Npdu {
    /// Header for a locally delivered APDU.
    pub fn local(expecting_reply: bool) -> Self {
        Self {
            destination: None,
            source: None,
            data: NpduData::application(expecting_reply),
        }
    }

    /// Header for a global broadcast (DNET 0xFFFF, hop count 255).
    pub fn global_broadcast() -> Self {
        Self {
            destination: Some(Address::global_broadcast()),
            source: None,
            data: NpduData {
                hop_count: Some(HOP_COUNT_DEFAULT),
                ..NpduData::default()
            },
        }
    }

    /// Header addressed to `dest`, adding a destination specifier and hop
    /// count only when the address is remote or broadcast.
    pub fn for_destination(dest: &Address, expecting_reply: bool) -> Self {
        let mut npdu = Npdu::local(expecting_reply);
        if !dest.is_local() {
            npdu.destination = Some(dest.clone());
            npdu.data.hop_count = Some(HOP_COUNT_DEFAULT);
        }
        npdu
    }

    /// Encode the header; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> usize {
        let start = buffer.len();

        buffer.push(BACNET_PROTOCOL_VERSION);

        let mut control = Control::empty();
        if self.data.is_network_message() {
            control |= Control::NETWORK_MESSAGE;
        }
        if self.destination.is_some() {
            control |= Control::DESTINATION;
        }
        if self.source.is_some() {
            control |= Control::SOURCE;
        }
        if self.data.data_expecting_reply {
            control |= Control::EXPECTING_REPLY;
        }
        buffer.push(control.bits() | self.data.priority as u8);

        if let Some(ref dest) = self.destination {
            buffer.extend_from_slice(&dest.net.to_be_bytes());
            buffer.push(dest.adr.len() as u8);
            buffer.extend_from_slice(&dest.adr);
        }

        if let Some(ref src) = self.source {
            buffer.extend_from_slice(&src.net.to_be_bytes());
            buffer.push(src.adr.len() as u8);
            buffer.extend_from_slice(&src.adr);
        }

        if self.destination.is_some() {
            buffer.push(self.data.hop_count.unwrap_or(HOP_COUNT_DEFAULT));
        }

        if let Some(message_type) = self.data.message_type {
            buffer.push(u8::from(message_type));
            if message_type.is_proprietary() {
                buffer.extend_from_slice(&self.data.vendor_id.unwrap_or(0).to_be_bytes());
            }
        }

        buffer.len() - start
    }

    /// Decode a header, returning it and the offset at which the payload
    /// (APDU or network-message parameters) begins.
    pub fn decode(data: &[u8]) -> Result<(Npdu, usize)> {
        if data.len() < 2 {
            return Err(NetworkError::Truncated);
        }

        let version = data[0];
        if version != BACNET_PROTOCOL_VERSION {
            return Err(NetworkError::UnsupportedVersion(version));
        }

        let control = Control::from_bits_truncate(data[1]);
        let priority = MessagePriority::from(data[1]);
        let mut pos = 2usize;

        let destination = if control.contains(Control::DESTINATION) {
            let (addr, consumed) = decode_specifier(&data[pos..])?;
            pos += consumed;
            Some(addr)
        } else {
            None
        };

        let source = if control.contains(Control::SOURCE) {
            let (addr, consumed) = decode_specifier(&data[pos..])?;
            pos += consumed;
            Some(addr)
        } else {
            None
        };

        let hop_count = if destination.is_some() {
            if pos >= data.len() {
                return Err(NetworkError::Truncated);
            }
            let hop = data[pos];
            pos += 1;
            Some(hop)
        } else {
            None
        };

        let (message_type, vendor_id) = if control.contains(Control::NETWORK_MESSAGE) {
            if pos >= data.len() {
                return Err(NetworkError::Truncated);
            }
            let message_type = NetworkMessageType::from(data[pos]);
            pos += 1;
            let vendor_id = if message_type.is_proprietary() {
                if pos + 2 > data.len() {
                    return Err(NetworkError::Truncated);
                }
                let vendor = u16::from_be_bytes([data[pos], data[pos + 1]]);
                pos += 2;
                Some(vendor)
            } else {
                None
            };
            (Some(message_type), vendor_id)
        } else {
            (None, None)
        };

        Ok((
            Npdu {
                destination,
                source,
                data: NpduData {
                    priority,
                    data_expecting_reply: control.contains(Control::EXPECTING_REPLY),
                    message_type,
                    vendor_id,
                    hop_count,
                },
            },
            pos,
        ))
    }

    /// Should the payload be delivered to this (non-routing) node?
    pub fn is_for_local_delivery(&self) -> bool {
        match &self.destination {
            None => true,
            Some(dest) => dest.is_local() || dest.is_global_broadcast(),
        }
    }
}

fn decode_specifier(data: &[u8]) -> Result<(Address, usize)> {
    if data.len() < 3 {
        return Err(NetworkError::Truncated);
    }
    let net = u16::from_be_bytes([data[0], data[1]]);
    let len = data[2] as usize;
    if len > crate::MAX_MAC_LEN {
        return Err(NetworkError::InvalidAddress);
    }
    if data.len() < 3 + len {
        return Err(NetworkError::Truncated);
    }
    Ok((
        Address {
            net,
            mac: Vec::new(),
            adr: data[3..3 + len].to_vec(),
        },
        3 + len,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_npdu_round_trip() {
        let npdu = Npdu::local(true);
        let mut buf = Vec::new();
        npdu.encode(&mut buf);
        assert_eq!(buf, [0x01, 0x04]);
        let (decoded, offset) = Npdu::decode(&buf).unwrap();
        assert_eq!(decoded, npdu);
        assert_eq!(offset, 2);
    }

    #[test]
    fn global_broadcast_header() {
        let npdu = Npdu::global_broadcast();
        let mut buf = Vec::new();
        npdu.encode(&mut buf);
        assert_eq!(buf, [0x01, 0x20, 0xFF, 0xFF, 0x00, 0xFF]);
        let (decoded, offset) = Npdu::decode(&buf).unwrap();
        assert_eq!(offset, 6);
        assert!(decoded.is_for_local_delivery());
        assert_eq!(decoded.data.hop_count, Some(255));
    }

    #[test]
    fn routed_npdu_round_trip() {
        let npdu = Npdu {
            destination: Some(Address::remote(5, &[0x0A], &[])),
            source: Some(Address::remote(2, &[0x01, 0x02], &[])),
            data: NpduData {
                priority: MessagePriority::Urgent,
                data_expecting_reply: true,
                message_type: None,
                vendor_id: None,
                hop_count: Some(42),
            },
        };
        let mut buf = Vec::new();
        npdu.encode(&mut buf);
        let (decoded, offset) = Npdu::decode(&buf).unwrap();
        assert_eq!(decoded, npdu);
        assert_eq!(offset, buf.len());
        assert!(!decoded.is_for_local_delivery());
    }

    #[test]
    fn npdu_followed_by_apdu_recovers_exact_slice() {
        let npdu = Npdu::for_destination(&Address::remote(9, &[0x30], &[]), false);
        let apdu = [0x10, 0x08];
        let mut buf = Vec::new();
        npdu.encode(&mut buf);
        buf.extend_from_slice(&apdu);
        let (decoded, offset) = Npdu::decode(&buf).unwrap();
        assert_eq!(decoded, npdu);
        assert_eq!(&buf[offset..], apdu);
    }

    #[test]
    fn network_message_with_vendor_id() {
        let npdu = Npdu {
            destination: None,
            source: None,
            data: NpduData {
                message_type: Some(NetworkMessageType::from(0x90u8)),
                vendor_id: Some(260),
                ..NpduData::default()
            },
        };
        let mut buf = Vec::new();
        npdu.encode(&mut buf);
        assert_eq!(buf, [0x01, 0x80, 0x90, 0x01, 0x04]);
        let (decoded, offset) = Npdu::decode(&buf).unwrap();
        assert_eq!(decoded.data.vendor_id, Some(260));
        assert_eq!(offset, 5);
    }

    #[test]
    fn what_is_network_number_is_not_proprietary() {
        let npdu = Npdu {
            data: NpduData {
                message_type: Some(NetworkMessageType::WhatIsNetworkNumber),
                ..NpduData::default()
            },
            ..Npdu::default()
        };
        let mut buf = Vec::new();
        npdu.encode(&mut buf);
        assert_eq!(buf, [0x01, 0x80, 0x12]);
    }

    #[test]
    fn truncated_headers_fail() {
        assert_eq!(Npdu::decode(&[0x01]), Err(NetworkError::Truncated));
        // Destination announced but missing
        assert_eq!(Npdu::decode(&[0x01, 0x20]), Err(NetworkError::Truncated));
        // DADR length runs past the end
        assert_eq!(
            Npdu::decode(&[0x01, 0x20, 0x00, 0x05, 0x03, 0x0A]),
            Err(NetworkError::Truncated)
        );
        // Hop count missing after a complete destination
        assert_eq!(
            Npdu::decode(&[0x01, 0x20, 0x00, 0x05, 0x01, 0x0A]),
            Err(NetworkError::Truncated)
        );
    }

    #[test]
    fn version_checked() {
        assert_eq!(
            Npdu::decode(&[0x02, 0x00]),
            Err(NetworkError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn oversized_specifier_rejected() {
        let buf = [0x01, 0x20, 0x00, 0x05, 0x0A, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF];
        assert_eq!(Npdu::decode(&buf), Err(NetworkError::InvalidAddress));
    }

    #[test]
    fn address_predicates() {
        assert!(Address::global_broadcast().is_global_broadcast());
        assert!(Address::local(&[0x05]).is_local());
        assert!(Address::local_broadcast().is_broadcast());
        assert!(!Address::local(&[0x05]).is_broadcast());
    }
}
