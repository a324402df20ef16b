#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

pub mod address;
pub mod apdu;
pub mod datalink;
pub mod dispatch;
pub mod encoding;
pub mod mstp;
pub mod network;
pub mod ringbuf;
pub mod service;
pub mod stack;
pub mod tsm;
pub mod util;

// Re-export main types without glob imports to avoid conflicts
pub use apdu::{Apdu, MaxApduSize, MaxSegments, PduType};
pub use datalink::DataLink;
pub use encoding::{ApplicationTag, ApplicationValue, CodecError, ObjectIdentifier, ObjectType};
pub use network::{Address, MessagePriority, Npdu, NpduData};
pub use service::{ConfirmedServiceChoice, UnconfirmedServiceChoice};
pub use stack::{DeviceConfig, Stack, StackEvent};

#[cfg(feature = "std")]
extern crate std;

#[cfg(not(feature = "std"))]
extern crate alloc;

/// Protocol version carried in every NPDU.
pub const BACNET_PROTOCOL_VERSION: u8 = 1;

/// Largest APDU any BACnet datalink can carry.
pub const BACNET_MAX_APDU: usize = 1476;

/// Largest NPDU+APDU a transport must be able to buffer.
pub const BACNET_MAX_MPDU: usize = 1497;

/// Network number meaning "directly attached network".
pub const BACNET_LOCAL_NETWORK: u16 = 0;

/// Network number meaning "every network" (global broadcast).
pub const BACNET_BROADCAST_NETWORK: u16 = 0xFFFF;

/// Largest link-layer address the stack carries. Sized for a 6-byte
/// Ethernet MAC or a 4-byte IPv4 address plus UDP port.
pub const MAX_MAC_LEN: usize = 7;
