//! The uniform datalink contract every BACnet transport implements.
//!
//! The core never references transport-specific types: BACnet/IP,
//! BACnet/IPv6, Ethernet 802.2, MS/TP, ARCNET, and BACnet/SC ports all
//! present the same send/receive surface through [`DataLink`]. Transport
//! construction and configuration stay with the concrete type; the core
//! only ever holds `&mut dyn DataLink`.
//!
//! The BACnet/IP outer framing (BVLL) lives in [`bvlc`] so IP transports
//! outside this crate share one wire codec.

#[cfg(feature = "std")]
use std::error::Error;

#[cfg(feature = "std")]
use std::fmt;

#[cfg(not(feature = "std"))]
use core::fmt;

#[cfg(not(feature = "std"))]
use alloc::{collections::VecDeque, vec::Vec};

#[cfg(feature = "std")]
use std::collections::VecDeque;

use core::time::Duration;

use crate::network::{Address, NpduData};

pub mod bvlc;

/// Result type for datalink operations
#[cfg(feature = "std")]
pub type Result<T> = std::result::Result<T, DataLinkError>;

#[cfg(not(feature = "std"))]
pub type Result<T> = core::result::Result<T, DataLinkError>;

/// Errors surfaced by a transport. CRC and framing problems additionally
/// update transport counters; they never reach the application as
/// callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLinkError {
    /// The frame could not be transmitted
    SendFailed,
    /// The physical medium is unusable (line fault, port gone)
    BusFault,
    /// A received frame failed its checksum
    FrameCrc,
    /// `receive` reached its timeout with nothing to deliver
    Timeout,
    /// The PDU exceeds what this link can carry
    TooLong,
}

impl fmt::Display for DataLinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataLinkError::SendFailed => write!(f, "Frame transmission failed"),
            DataLinkError::BusFault => write!(f, "Bus fault"),
            DataLinkError::FrameCrc => write!(f, "Frame CRC error"),
            DataLinkError::Timeout => write!(f, "Receive timeout"),
            DataLinkError::TooLong => write!(f, "PDU too long for this link"),
        }
    }
}

#[cfg(feature = "std")]
impl Error for DataLinkError {}

/// A BACnet datalink port.
///
/// `pdu` is always the fully encoded NPDU (header plus APDU); the
/// transport adds and strips its own framing. The `npdu` metadata rides
/// along so half-duplex links can pick the right frame type
/// (data-expecting-reply versus not).
pub trait DataLink: Send {
    /// Transmit a PDU to `dest`; returns the octet count handed to the
    /// medium.
    fn send_pdu(&mut self, dest: &Address, npdu: &NpduData, pdu: &[u8]) -> Result<usize>;

    /// Wait up to `timeout` for a PDU; returns its length in `buffer`
    /// and the source address, or [`DataLinkError::Timeout`].
    fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<(usize, Address)>;

    /// This port's own address.
    fn my_address(&self) -> Address;

    /// The broadcast address of this port's network.
    fn broadcast_address(&self) -> Address {
        Address::local_broadcast()
    }

    /// Largest APDU this link can carry.
    fn max_apdu(&self) -> usize {
        crate::BACNET_MAX_APDU
    }

    /// Release transport resources; called once at shutdown.
    fn cleanup(&mut self) {}
}

/// An in-memory link: sent PDUs are recorded, received PDUs are whatever
/// the test injected. Used by the stack's own tests and useful for
/// exercising application handlers without hardware.
#[derive(Debug, Default)]
pub struct LoopbackLink {
    address: Address,
    /// PDUs handed to `send_pdu`, most recent last
    pub sent: Vec<(Address, Vec<u8>)>,
    inbound: VecDeque<(Address, Vec<u8>)>,
}

impl LoopbackLink {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            sent: Vec::new(),
            inbound: VecDeque::new(),
        }
    }

    /// Queue a PDU for the next `receive` call.
    pub fn inject(&mut self, src: Address, pdu: &[u8]) {
        self.inbound.push_back((src, pdu.to_vec()));
    }

    /// The last transmitted PDU, if any.
    pub fn last_sent(&self) -> Option<&(Address, Vec<u8>)> {
        self.sent.last()
    }
}

impl DataLink for LoopbackLink {
    fn send_pdu(&mut self, dest: &Address, _npdu: &NpduData, pdu: &[u8]) -> Result<usize> {
        self.sent.push((dest.clone(), pdu.to_vec()));
        Ok(pdu.len())
    }

    fn receive(&mut self, buffer: &mut [u8], _timeout: Duration) -> Result<(usize, Address)> {
        match self.inbound.pop_front() {
            Some((src, pdu)) => {
                if pdu.len() > buffer.len() {
                    return Err(DataLinkError::TooLong);
                }
                buffer[..pdu.len()].copy_from_slice(&pdu);
                Ok((pdu.len(), src))
            }
            None => Err(DataLinkError::Timeout),
        }
    }

    fn my_address(&self) -> Address {
        self.address.clone()
    }
}
