//! MS/TP (Master-Slave/Token-Passing) datalink state machines.
//!
//! MS/TP arbitrates a half-duplex EIA-485 bus by passing a token among
//! master nodes (addresses 0..=127). This module holds the pieces that
//! are portable across serial drivers:
//!
//! - the frame model and its header/data CRCs ([`crc`]),
//! - the byte-stream receive state machine ([`receive::ReceiveFsm`]),
//! - the clause 9.5.3 master-node state machine ([`master::MasterFsm`]).
//!
//! The port driver owns the serial hardware: it feeds received bytes to
//! the receive FSM, forwards validated frames and measured silence to the
//! master FSM, and transmits the frames the master FSM emits.
//!
//! # Frame format
//!
//! ```text
//! 0x55 0xFF | frame type | destination | source | length hi | length lo |
//! header CRC | [data .. length] | [data CRC lo, data CRC hi]
//! ```
//!
//! Frames with length 0 omit the data and data CRC.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use bytes::Bytes;
use core::time::Duration;

use crate::generate_custom_enum;

pub mod crc;
pub mod master;
pub mod receive;

pub use master::{Action, MasterFsm, MstpConfig, PendingTx};
pub use receive::{ReceiveCounters, ReceiveFsm};

/// First preamble octet.
pub const PREAMBLE_55: u8 = 0x55;
/// Second preamble octet.
pub const PREAMBLE_FF: u8 = 0xFF;

/// MS/TP broadcast station address.
pub const MSTP_BROADCAST: u8 = 255;

/// Largest data payload a frame may carry.
pub const MAX_FRAME_DATA: usize = 501;

/// Highest master-node address.
pub const MAX_MASTER: u8 = 127;

/// Silence that aborts an in-progress frame reception.
pub const T_FRAME_ABORT: Duration = Duration::from_millis(60);

/// Bus silence after which the token is declared lost.
pub const T_NO_TOKEN: Duration = Duration::from_millis(500);

/// Wait for a station to use a token or answer a poll.
pub const T_USAGE_TIMEOUT: Duration = Duration::from_millis(20);

/// Wait for a reply to a data-expecting-reply frame.
pub const T_REPLY_TIMEOUT: Duration = Duration::from_millis(255);

/// Budget for producing a reply before postponing it.
pub const T_REPLY_DELAY: Duration = Duration::from_millis(250);

/// Slot time used to stagger token-claim attempts by station number.
pub const T_SLOT: Duration = Duration::from_millis(10);

/// Tokens a master may hold before polling for new masters.
pub const N_POLL: u8 = 50;

/// Token-pass retries before hunting for a new successor.
pub const N_RETRY_TOKEN: u8 = 1;

/// Default and maximum info frames per token tenure.
pub const N_MAX_INFO_FRAMES: u8 = 1;

generate_custom_enum! {
    /// MS/TP frame types. 128..=255 is the vendor-proprietary range and
    /// passes through the receive FSM transparently.
    FrameType {
        Token = 0,
        PollForMaster = 1,
        ReplyToPollForMaster = 2,
        TestRequest = 3,
        TestResponse = 4,
        BacnetDataExpectingReply = 5,
        BacnetDataNotExpectingReply = 6,
        ReplyPostponed = 7,
    },
    u8,
    128..=255
}

impl FrameType {
    /// Does this frame type carry a data payload the peer must answer?
    pub fn expects_reply(&self) -> bool {
        matches!(self, FrameType::BacnetDataExpectingReply | FrameType::TestRequest)
    }
}

/// A validated MS/TP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub destination: u8,
    pub source: u8,
    pub data: Bytes,
}

impl Frame {
    /// Build a frame, truncation-checked against [`MAX_FRAME_DATA`].
    pub fn new(frame_type: FrameType, destination: u8, source: u8, data: Bytes) -> Option<Self> {
        if data.len() > MAX_FRAME_DATA {
            return None;
        }
        Some(Self {
            frame_type,
            destination,
            source,
            data,
        })
    }

    /// A token frame.
    pub fn token(destination: u8, source: u8) -> Self {
        Self {
            frame_type: FrameType::Token,
            destination,
            source,
            data: Bytes::new(),
        }
    }

    /// A poll-for-master frame.
    pub fn poll_for_master(destination: u8, source: u8) -> Self {
        Self {
            frame_type: FrameType::PollForMaster,
            destination,
            source,
            data: Bytes::new(),
        }
    }

    /// A reply to a poll-for-master frame.
    pub fn reply_to_poll_for_master(destination: u8, source: u8) -> Self {
        Self {
            frame_type: FrameType::ReplyToPollForMaster,
            destination,
            source,
            data: Bytes::new(),
        }
    }

    /// A reply-postponed frame.
    pub fn reply_postponed(destination: u8, source: u8) -> Self {
        Self {
            frame_type: FrameType::ReplyPostponed,
            destination,
            source,
            data: Bytes::new(),
        }
    }

    /// A data frame carrying an NPDU.
    pub fn bacnet_data(
        destination: u8,
        source: u8,
        data: Bytes,
        expecting_reply: bool,
    ) -> Option<Self> {
        let frame_type = if expecting_reply {
            FrameType::BacnetDataExpectingReply
        } else {
            FrameType::BacnetDataNotExpectingReply
        };
        Self::new(frame_type, destination, source, data)
    }

    /// Is this frame addressed to `station` (directly or broadcast)?
    pub fn is_for(&self, station: u8) -> bool {
        self.destination == station || self.destination == MSTP_BROADCAST
    }

    /// Serialise to wire octets, preamble through data CRC.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> usize {
        let start = buffer.len();
        let length = self.data.len() as u16;

        buffer.push(PREAMBLE_55);
        buffer.push(PREAMBLE_FF);

        let header = [
            u8::from(self.frame_type),
            self.destination,
            self.source,
            (length >> 8) as u8,
            (length & 0xFF) as u8,
        ];
        buffer.extend_from_slice(&header);
        buffer.push(crc::header_crc(&header));

        if !self.data.is_empty() {
            buffer.extend_from_slice(&self.data);
            let data_crc = crc::data_crc(&self.data);
            buffer.push((data_crc & 0xFF) as u8);
            buffer.push((data_crc >> 8) as u8);
        }

        buffer.len() - start
    }
}

/// Is `address` a master node (token-eligible)?
pub fn is_master_address(address: u8) -> bool {
    address <= MAX_MASTER
}

/// Is `address` a slave node?
pub fn is_slave_address(address: u8) -> bool {
    (128..=254).contains(&address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "std"))]
    use alloc::vec;

    #[test]
    fn token_frame_wire_format() {
        let mut buf = Vec::new();
        let frame = Frame::token(5, 3);
        frame.encode(&mut buf);
        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[..7], [0x55, 0xFF, 0x00, 0x05, 0x03, 0x00, 0x00]);
        assert_eq!(buf[7], crc::header_crc(&[0x00, 0x05, 0x03, 0x00, 0x00]));
    }

    #[test]
    fn data_frame_carries_crc16() {
        let payload = Bytes::from_static(&[0x01, 0x22, 0x30]);
        let frame = Frame::bacnet_data(10, 20, payload.clone(), true).unwrap();
        let mut buf = Vec::new();
        frame.encode(&mut buf);
        assert_eq!(buf.len(), 8 + 3 + 2);
        let crc = crc::data_crc(&payload);
        assert_eq!(buf[11], (crc & 0xFF) as u8);
        assert_eq!(buf[12], (crc >> 8) as u8);
    }

    #[test]
    fn oversized_payload_refused() {
        let data = Bytes::from(vec![0u8; MAX_FRAME_DATA + 1]);
        assert!(Frame::new(FrameType::BacnetDataNotExpectingReply, 1, 2, data).is_none());
    }

    #[test]
    fn proprietary_frame_types_pass_through() {
        assert!(matches!(FrameType::from(200u8), FrameType::Custom(_)));
        assert!(matches!(FrameType::from(64u8), FrameType::Reserved(_)));
        assert_eq!(u8::from(FrameType::from(200u8)), 200);
    }

    #[test]
    fn address_classes() {
        assert!(is_master_address(0));
        assert!(is_master_address(127));
        assert!(!is_master_address(128));
        assert!(is_slave_address(128));
        assert!(is_slave_address(254));
        assert!(!is_slave_address(255));
    }
}
