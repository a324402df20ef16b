//! MS/TP receive state machine: frame synchronisation from a raw byte
//! stream.
//!
//! The driver feeds every received octet to [`ReceiveFsm::feed`] and
//! reports measured bus silence to [`ReceiveFsm::on_silence`]. Validated
//! frames come back from `feed`; everything else (bad CRCs, oversized
//! lengths, preamble garbage, inter-octet timeouts) updates a counter and
//! resynchronises on the next preamble. CRC and framing errors never
//! surface beyond the counters.

use bytes::{Bytes, BytesMut};
use core::time::Duration;

use log::trace;

use super::crc::{crc_calc_data, crc_calc_header, DATA_CRC_RESIDUE, HEADER_CRC_RESIDUE};
use super::{Frame, FrameType, MAX_FRAME_DATA, PREAMBLE_55, PREAMBLE_FF, T_FRAME_ABORT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiveState {
    Idle,
    Preamble,
    Header,
    HeaderCrc,
    Data,
    DataCrc,
}

/// Receive-side diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveCounters {
    /// Frames delivered with valid CRCs
    pub valid_frames: u64,
    /// Header or data CRC mismatches and length violations
    pub invalid_frames: u64,
    /// Receptions abandoned by the inter-octet timeout
    pub aborted_frames: u64,
}

/// The byte-at-a-time frame assembler.
#[derive(Debug)]
pub struct ReceiveFsm {
    state: ReceiveState,
    header: [u8; 5],
    header_index: usize,
    header_accumulator: u8,
    expected_length: usize,
    data: BytesMut,
    data_accumulator: u16,
    data_crc_octets: u8,
    silence: Duration,
    counters: ReceiveCounters,
}

impl Default for ReceiveFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveFsm {
    pub fn new() -> Self {
        Self {
            state: ReceiveState::Idle,
            header: [0; 5],
            header_index: 0,
            header_accumulator: 0xFF,
            expected_length: 0,
            data: BytesMut::new(),
            data_accumulator: 0xFFFF,
            data_crc_octets: 0,
            silence: Duration::ZERO,
            counters: ReceiveCounters::default(),
        }
    }

    /// Diagnostic counters, cumulative since construction.
    pub fn counters(&self) -> ReceiveCounters {
        self.counters
    }

    /// Report elapsed bus silence. A gap longer than [`T_FRAME_ABORT`]
    /// inside a frame abandons it.
    pub fn on_silence(&mut self, elapsed: Duration) {
        self.silence += elapsed;
        if self.state != ReceiveState::Idle && self.silence >= T_FRAME_ABORT {
            trace!("mstp rx: frame aborted by silence");
            self.counters.aborted_frames += 1;
            self.reset();
        }
    }

    /// Consume one received octet; returns a frame when one completes.
    pub fn feed(&mut self, octet: u8) -> Option<Frame> {
        self.silence = Duration::ZERO;

        match self.state {
            ReceiveState::Idle => {
                if octet == PREAMBLE_55 {
                    self.state = ReceiveState::Preamble;
                }
                None
            }
            ReceiveState::Preamble => {
                if octet == PREAMBLE_FF {
                    self.header_index = 0;
                    self.header_accumulator = 0xFF;
                    self.state = ReceiveState::Header;
                } else if octet != PREAMBLE_55 {
                    // Repeated 0x55 keeps us waiting for the 0xFF
                    self.state = ReceiveState::Idle;
                }
                None
            }
            ReceiveState::Header => {
                self.header[self.header_index] = octet;
                self.header_index += 1;
                self.header_accumulator = crc_calc_header(octet, self.header_accumulator);
                if self.header_index == 5 {
                    self.state = ReceiveState::HeaderCrc;
                }
                None
            }
            ReceiveState::HeaderCrc => {
                self.header_accumulator = crc_calc_header(octet, self.header_accumulator);
                if self.header_accumulator != HEADER_CRC_RESIDUE {
                    trace!("mstp rx: header crc mismatch");
                    self.counters.invalid_frames += 1;
                    self.reset();
                    return None;
                }

                let length =
                    usize::from(self.header[3]) << 8 | usize::from(self.header[4]);
                if length > MAX_FRAME_DATA {
                    self.counters.invalid_frames += 1;
                    self.reset();
                    return None;
                }

                if length == 0 {
                    let frame = self.complete(Bytes::new());
                    self.reset();
                    return Some(frame);
                }

                self.expected_length = length;
                self.data = BytesMut::with_capacity(length);
                self.data_accumulator = 0xFFFF;
                self.state = ReceiveState::Data;
                None
            }
            ReceiveState::Data => {
                self.data.extend_from_slice(&[octet]);
                self.data_accumulator = crc_calc_data(octet, self.data_accumulator);
                if self.data.len() == self.expected_length {
                    self.data_crc_octets = 0;
                    self.state = ReceiveState::DataCrc;
                }
                None
            }
            ReceiveState::DataCrc => {
                self.data_accumulator = crc_calc_data(octet, self.data_accumulator);
                self.data_crc_octets += 1;
                if self.data_crc_octets < 2 {
                    return None;
                }
                if self.data_accumulator != DATA_CRC_RESIDUE {
                    trace!("mstp rx: data crc mismatch");
                    self.counters.invalid_frames += 1;
                    self.reset();
                    return None;
                }
                let payload = core::mem::take(&mut self.data).freeze();
                let frame = self.complete(payload);
                self.reset();
                Some(frame)
            }
        }
    }

    fn complete(&mut self, data: Bytes) -> Frame {
        self.counters.valid_frames += 1;
        Frame {
            frame_type: FrameType::from(self.header[0]),
            destination: self.header[1],
            source: self.header[2],
            data,
        }
    }

    fn reset(&mut self) {
        self.state = ReceiveState::Idle;
        self.header_index = 0;
        self.header_accumulator = 0xFF;
        self.expected_length = 0;
        self.data = BytesMut::new();
        self.data_accumulator = 0xFFFF;
        self.data_crc_octets = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "std"))]
    use alloc::vec::Vec;

    fn feed_all(fsm: &mut ReceiveFsm, octets: &[u8]) -> Vec<Frame> {
        octets.iter().filter_map(|&b| fsm.feed(b)).collect()
    }

    #[test]
    fn token_frame_received() {
        let mut fsm = ReceiveFsm::new();
        let mut wire = Vec::new();
        Frame::token(5, 3).encode(&mut wire);
        let frames = feed_all(&mut fsm, &wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FrameType::Token);
        assert_eq!(frames[0].destination, 5);
        assert_eq!(frames[0].source, 3);
        assert!(frames[0].data.is_empty());
        assert_eq!(fsm.counters().valid_frames, 1);
    }

    #[test]
    fn data_frame_received() {
        let mut fsm = ReceiveFsm::new();
        let payload = Bytes::from_static(&[0x01, 0x20, 0xFF, 0xFF, 0x00, 0xFF, 0x10, 0x08]);
        let frame = Frame::bacnet_data(255, 7, payload.clone(), false).unwrap();
        let mut wire = Vec::new();
        frame.encode(&mut wire);
        let frames = feed_all(&mut fsm, &wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, payload);
    }

    #[test]
    fn leading_noise_is_skipped() {
        let mut fsm = ReceiveFsm::new();
        let mut wire = Vec::new();
        wire.extend_from_slice(&[0x00, 0x12, 0x55, 0x99]); // noise, false preamble start
        Frame::token(1, 2).encode(&mut wire);
        let frames = feed_all(&mut fsm, &wire);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn repeated_preamble_octets_tolerated() {
        let mut fsm = ReceiveFsm::new();
        let mut wire = Vec::new();
        wire.extend_from_slice(&[0x55, 0x55, 0x55]);
        // The encoder emits its own 0x55 0xFF after our stutter
        Frame::token(1, 2).encode(&mut wire);
        let frames = feed_all(&mut fsm, &wire);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn header_crc_error_counted_and_resynchronised() {
        let mut fsm = ReceiveFsm::new();
        let mut wire = Vec::new();
        Frame::token(5, 3).encode(&mut wire);
        wire[3] ^= 0x01; // corrupt the destination octet
        assert!(feed_all(&mut fsm, &wire).is_empty());
        assert_eq!(fsm.counters().invalid_frames, 1);

        // The stream recovers on the next clean frame
        let mut clean = Vec::new();
        Frame::token(5, 3).encode(&mut clean);
        assert_eq!(feed_all(&mut fsm, &clean).len(), 1);
    }

    #[test]
    fn data_crc_error_counted() {
        let mut fsm = ReceiveFsm::new();
        let frame =
            Frame::bacnet_data(1, 2, Bytes::from_static(&[0xAA, 0xBB]), false).unwrap();
        let mut wire = Vec::new();
        frame.encode(&mut wire);
        let data_start = 8;
        wire[data_start] ^= 0x40;
        assert!(feed_all(&mut fsm, &wire).is_empty());
        assert_eq!(fsm.counters().invalid_frames, 1);
    }

    #[test]
    fn oversized_length_rejected() {
        let mut fsm = ReceiveFsm::new();
        let wire = alloc_wire();
        assert!(feed_all(&mut fsm, &wire).is_empty());
        assert_eq!(fsm.counters().invalid_frames, 1);
    }

    fn alloc_wire() -> Vec<u8> {
        // Hand-built header announcing 502 data octets
        let header = [0x06, 0x01, 0x02, 0x01, 0xF6];
        let mut wire = Vec::new();
        wire.push(PREAMBLE_55);
        wire.push(PREAMBLE_FF);
        wire.extend_from_slice(&header);
        wire.push(super::super::crc::header_crc(&header));
        wire
    }

    #[test]
    fn silence_aborts_partial_frame() {
        let mut fsm = ReceiveFsm::new();
        let mut wire = Vec::new();
        Frame::token(5, 3).encode(&mut wire);

        // Half the frame arrives, then the line goes quiet
        for &octet in &wire[..4] {
            fsm.feed(octet);
        }
        fsm.on_silence(Duration::from_millis(60));
        assert_eq!(fsm.counters().aborted_frames, 1);

        // A fresh frame afterwards parses normally
        assert_eq!(feed_all(&mut fsm, &wire).len(), 1);
    }

    #[test]
    fn short_silence_does_not_abort() {
        let mut fsm = ReceiveFsm::new();
        let mut wire = Vec::new();
        Frame::token(5, 3).encode(&mut wire);
        for &octet in &wire[..4] {
            fsm.feed(octet);
        }
        fsm.on_silence(Duration::from_millis(10));
        for &octet in &wire[4..] {
            if let Some(frame) = fsm.feed(octet) {
                assert_eq!(frame.frame_type, FrameType::Token);
                return;
            }
        }
        panic!("frame not completed");
    }

    #[test]
    fn proprietary_frame_type_passes_through() {
        let data = Bytes::from_static(&[0x01, 0x02]);
        let frame = Frame::new(FrameType::from(200u8), 3, 4, data).unwrap();
        let mut wire = Vec::new();
        frame.encode(&mut wire);
        let mut fsm = ReceiveFsm::new();
        let frames = feed_all(&mut fsm, &wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(u8::from(frames[0].frame_type), 200);
    }

    #[test]
    fn back_to_back_frames() {
        let mut fsm = ReceiveFsm::new();
        let mut wire = Vec::new();
        Frame::token(1, 2).encode(&mut wire);
        Frame::token(2, 1).encode(&mut wire);
        Frame::bacnet_data(3, 1, Bytes::from_static(&[0x55]), false)
            .unwrap()
            .encode(&mut wire);
        let frames = feed_all(&mut fsm, &wire);
        assert_eq!(frames.len(), 3);
        assert_eq!(fsm.counters().valid_frames, 3);
    }
}
