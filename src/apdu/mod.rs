//! APDU header encoding and decoding.
//!
//! The first octet of every APDU carries the PDU type in its high nibble
//! and per-type flag bits in the low nibble. This module decodes the eight
//! PDU types of clause 20.1 into discriminated records carrying the
//! invoke-id, service choice, segmentation fields, and the service
//! parameter slice, and encodes them back byte-exactly.
//!
//! Service parameters themselves are opaque at this layer; the per-service
//! codecs live in [`crate::service`].

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::encoding::{
    decode_application_enumerated, encode_application_enumerated, CodecError, Result,
};
use crate::generate_custom_enum;

/// PDU types, from the high nibble of the first APDU octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PduType {
    ConfirmedRequest = 0,
    UnconfirmedRequest = 1,
    SimpleAck = 2,
    ComplexAck = 3,
    SegmentAck = 4,
    Error = 5,
    Reject = 6,
    Abort = 7,
}

impl TryFrom<u8> for PduType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PduType::ConfirmedRequest),
            1 => Ok(PduType::UnconfirmedRequest),
            2 => Ok(PduType::SimpleAck),
            3 => Ok(PduType::ComplexAck),
            4 => Ok(PduType::SegmentAck),
            5 => Ok(PduType::Error),
            6 => Ok(PduType::Reject),
            7 => Ok(PduType::Abort),
            _ => Err(CodecError::InvalidTag),
        }
    }
}

/// Maximum segments accepted, from the high nibble of the confirmed
/// request's second octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MaxSegments {
    #[default]
    Unspecified = 0,
    Two = 1,
    Four = 2,
    Eight = 3,
    Sixteen = 4,
    ThirtyTwo = 5,
    SixtyFour = 6,
    GreaterThan64 = 7,
}

impl MaxSegments {
    fn from_nibble(nibble: u8) -> Self {
        match nibble & 0x07 {
            0 => MaxSegments::Unspecified,
            1 => MaxSegments::Two,
            2 => MaxSegments::Four,
            3 => MaxSegments::Eight,
            4 => MaxSegments::Sixteen,
            5 => MaxSegments::ThirtyTwo,
            6 => MaxSegments::SixtyFour,
            _ => MaxSegments::GreaterThan64,
        }
    }
}

/// Maximum APDU length accepted, from the low nibble of the confirmed
/// request's second octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MaxApduSize {
    Octets50 = 0,
    Octets128 = 1,
    Octets206 = 2,
    Octets480 = 3,
    Octets1024 = 4,
    #[default]
    Octets1476 = 5,
}

impl MaxApduSize {
    /// Decoded octet budget.
    pub fn size(self) -> usize {
        match self {
            MaxApduSize::Octets50 => 50,
            MaxApduSize::Octets128 => 128,
            MaxApduSize::Octets206 => 206,
            MaxApduSize::Octets480 => 480,
            MaxApduSize::Octets1024 => 1024,
            MaxApduSize::Octets1476 => 1476,
        }
    }

    /// Largest encodable size not exceeding `size`.
    pub fn from_size(size: u16) -> Self {
        match size {
            0..=127 => MaxApduSize::Octets50,
            128..=205 => MaxApduSize::Octets128,
            206..=479 => MaxApduSize::Octets206,
            480..=1023 => MaxApduSize::Octets480,
            1024..=1475 => MaxApduSize::Octets1024,
            _ => MaxApduSize::Octets1476,
        }
    }

    fn from_nibble(nibble: u8) -> Result<Self> {
        match nibble & 0x0F {
            0 => Ok(MaxApduSize::Octets50),
            1 => Ok(MaxApduSize::Octets128),
            2 => Ok(MaxApduSize::Octets206),
            3 => Ok(MaxApduSize::Octets480),
            4 => Ok(MaxApduSize::Octets1024),
            5 => Ok(MaxApduSize::Octets1476),
            _ => Err(CodecError::OutOfRange),
        }
    }
}

/// Segmentation support advertised in I-Am.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Segmentation {
    Both = 0,
    Transmit = 1,
    Receive = 2,
    #[default]
    None = 3,
}

impl TryFrom<u32> for Segmentation {
    type Error = CodecError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Segmentation::Both),
            1 => Ok(Segmentation::Transmit),
            2 => Ok(Segmentation::Receive),
            3 => Ok(Segmentation::None),
            _ => Err(CodecError::OutOfRange),
        }
    }
}

generate_custom_enum! {
    /// Reject reasons of clause 18.8; 64..=255 is the vendor range.
    RejectReason {
        Other = 0,
        BufferOverflow = 1,
        InconsistentParameters = 2,
        InvalidParameterDataType = 3,
        InvalidTag = 4,
        MissingRequiredParameter = 5,
        ParameterOutOfRange = 6,
        TooManyArguments = 7,
        UndefinedEnumeration = 8,
        UnrecognizedService = 9,
    },
    u8,
    64..=255
}

generate_custom_enum! {
    /// Abort reasons of clause 18.9; 64..=255 is the vendor range.
    AbortReason {
        Other = 0,
        BufferOverflow = 1,
        InvalidApduInThisState = 2,
        PreemptedByHigherPriorityTask = 3,
        SegmentationNotSupported = 4,
        SecurityError = 5,
        InsufficientSecurity = 6,
        WindowSizeOutOfRange = 7,
        ApplicationExceededReplyTime = 8,
        OutOfResources = 9,
        TsmTimeout = 10,
        ApduTooLong = 11,
    },
    u8,
    64..=255
}

generate_custom_enum! {
    /// Error classes of clause 18; 64..=65535 is the vendor range.
    ErrorClass {
        Device = 0,
        Object = 1,
        Property = 2,
        Resources = 3,
        Security = 4,
        Services = 5,
        Vt = 6,
        Communication = 7,
    },
    u32,
    64..=65_535
}

generate_custom_enum! {
    /// Error codes of clause 18 (the subset the core raises or inspects);
    /// 256..=65535 is the vendor range.
    ErrorCode {
        Other = 0,
        ConfigurationInProgress = 2,
        DeviceBusy = 3,
        FileAccessDenied = 5,
        InconsistentParameters = 7,
        InvalidDataType = 9,
        InvalidFileAccessMethod = 10,
        InvalidFileStartPosition = 11,
        InvalidParameterDataType = 13,
        MissingRequiredParameter = 16,
        NoSpaceToWriteProperty = 20,
        OperationalProblem = 25,
        PasswordFailure = 26,
        ReadAccessDenied = 27,
        ServiceRequestDenied = 29,
        Timeout = 30,
        UnknownObject = 31,
        UnknownProperty = 32,
        ValueOutOfRange = 37,
        WriteAccessDenied = 40,
        InvalidArrayIndex = 42,
        CommunicationDisabled = 83,
    },
    u32,
    256..=65_535
}

/// The class/code pair carried by Error PDUs for ordinary services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorClassCode {
    pub class: ErrorClass,
    pub code: ErrorCode,
}

impl ErrorClassCode {
    pub fn new(class: ErrorClass, code: ErrorCode) -> Self {
        Self { class, code }
    }

    /// Encode as the two application-tagged enumerations of clause 18.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> usize {
        let start = buffer.len();
        encode_application_enumerated(buffer, u32::from(self.class));
        encode_application_enumerated(buffer, u32::from(self.code));
        buffer.len() - start
    }

    /// Decode from the start of an Error PDU's service body.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let (class, used) = decode_application_enumerated(data)?;
        let (code, used2) = decode_application_enumerated(&data[used..])?;
        Ok((
            Self {
                class: ErrorClass::from(class),
                code: ErrorCode::from(code),
            },
            used + used2,
        ))
    }
}

/// A confirmed service request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedRequest {
    pub segmented: bool,
    pub more_follows: bool,
    /// SA flag: the client accepts a segmented answer
    pub segmented_response_accepted: bool,
    pub max_segments: MaxSegments,
    pub max_apdu: MaxApduSize,
    pub invoke_id: u8,
    /// Present iff `segmented`
    pub sequence_number: Option<u8>,
    /// Present iff `segmented`
    pub proposed_window_size: Option<u8>,
    pub service_choice: u8,
    pub service_data: Vec<u8>,
}

impl ConfirmedRequest {
    /// An unsegmented request with the defaults a simple client sends.
    pub fn new(invoke_id: u8, service_choice: u8, service_data: Vec<u8>) -> Self {
        Self {
            segmented: false,
            more_follows: false,
            segmented_response_accepted: false,
            max_segments: MaxSegments::Unspecified,
            max_apdu: MaxApduSize::Octets1476,
            invoke_id,
            sequence_number: None,
            proposed_window_size: None,
            service_choice,
            service_data,
        }
    }
}

/// A complex (data-carrying) acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexAck {
    pub segmented: bool,
    pub more_follows: bool,
    pub invoke_id: u8,
    pub sequence_number: Option<u8>,
    pub proposed_window_size: Option<u8>,
    pub service_choice: u8,
    pub service_data: Vec<u8>,
}

impl ComplexAck {
    /// An unsegmented acknowledgement.
    pub fn new(invoke_id: u8, service_choice: u8, service_data: Vec<u8>) -> Self {
        Self {
            segmented: false,
            more_follows: false,
            invoke_id,
            sequence_number: None,
            proposed_window_size: None,
            service_choice,
            service_data,
        }
    }
}

/// A decoded APDU, discriminated by PDU type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Apdu {
    ConfirmedRequest(ConfirmedRequest),
    UnconfirmedRequest {
        service_choice: u8,
        service_data: Vec<u8>,
    },
    SimpleAck {
        invoke_id: u8,
        service_choice: u8,
    },
    ComplexAck(ComplexAck),
    SegmentAck {
        negative_ack: bool,
        /// Set when the acknowledging party is the server
        server: bool,
        invoke_id: u8,
        sequence_number: u8,
        actual_window_size: u8,
    },
    Error {
        invoke_id: u8,
        service_choice: u8,
        /// Raw error body; [`ErrorClassCode::decode`] parses the common
        /// shape, private-transfer errors carry their own structure
        error_data: Vec<u8>,
    },
    Reject {
        invoke_id: u8,
        reason: RejectReason,
    },
    Abort {
        /// Set when the aborting party is the server
        server: bool,
        invoke_id: u8,
        reason: AbortReason,
    },
}

const PDU_FLAG_SEGMENTED: u8 = 0x08;
const PDU_FLAG_MORE_FOLLOWS: u8 = 0x04;
const PDU_FLAG_SEGMENTED_RESPONSE_ACCEPTED: u8 = 0x02;
const PDU_FLAG_NEGATIVE_ACK: u8 = 0x02;
const PDU_FLAG_SERVER: u8 = 0x01;

impl Apdu {
    /// PDU type of this APDU.
    pub fn pdu_type(&self) -> PduType {
        match self {
            Apdu::ConfirmedRequest(_) => PduType::ConfirmedRequest,
            Apdu::UnconfirmedRequest { .. } => PduType::UnconfirmedRequest,
            Apdu::SimpleAck { .. } => PduType::SimpleAck,
            Apdu::ComplexAck(_) => PduType::ComplexAck,
            Apdu::SegmentAck { .. } => PduType::SegmentAck,
            Apdu::Error { .. } => PduType::Error,
            Apdu::Reject { .. } => PduType::Reject,
            Apdu::Abort { .. } => PduType::Abort,
        }
    }

    /// Invoke-id, for the PDU types that correlate to a transaction.
    pub fn invoke_id(&self) -> Option<u8> {
        match self {
            Apdu::ConfirmedRequest(req) => Some(req.invoke_id),
            Apdu::UnconfirmedRequest { .. } => None,
            Apdu::SimpleAck { invoke_id, .. }
            | Apdu::SegmentAck { invoke_id, .. }
            | Apdu::Error { invoke_id, .. }
            | Apdu::Reject { invoke_id, .. }
            | Apdu::Abort { invoke_id, .. } => Some(*invoke_id),
            Apdu::ComplexAck(ack) => Some(ack.invoke_id),
        }
    }

    /// Encode to wire form; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> usize {
        let start = buffer.len();
        match self {
            Apdu::ConfirmedRequest(req) => {
                let mut first = (PduType::ConfirmedRequest as u8) << 4;
                if req.segmented {
                    first |= PDU_FLAG_SEGMENTED;
                }
                if req.more_follows {
                    first |= PDU_FLAG_MORE_FOLLOWS;
                }
                if req.segmented_response_accepted {
                    first |= PDU_FLAG_SEGMENTED_RESPONSE_ACCEPTED;
                }
                buffer.push(first);
                buffer.push(((req.max_segments as u8) << 4) | req.max_apdu as u8);
                buffer.push(req.invoke_id);
                if req.segmented {
                    buffer.push(req.sequence_number.unwrap_or(0));
                    buffer.push(req.proposed_window_size.unwrap_or(1));
                }
                buffer.push(req.service_choice);
                buffer.extend_from_slice(&req.service_data);
            }
            Apdu::UnconfirmedRequest {
                service_choice,
                service_data,
            } => {
                buffer.push((PduType::UnconfirmedRequest as u8) << 4);
                buffer.push(*service_choice);
                buffer.extend_from_slice(service_data);
            }
            Apdu::SimpleAck {
                invoke_id,
                service_choice,
            } => {
                buffer.push((PduType::SimpleAck as u8) << 4);
                buffer.push(*invoke_id);
                buffer.push(*service_choice);
            }
            Apdu::ComplexAck(ack) => {
                let mut first = (PduType::ComplexAck as u8) << 4;
                if ack.segmented {
                    first |= PDU_FLAG_SEGMENTED;
                }
                if ack.more_follows {
                    first |= PDU_FLAG_MORE_FOLLOWS;
                }
                buffer.push(first);
                buffer.push(ack.invoke_id);
                if ack.segmented {
                    buffer.push(ack.sequence_number.unwrap_or(0));
                    buffer.push(ack.proposed_window_size.unwrap_or(1));
                }
                buffer.push(ack.service_choice);
                buffer.extend_from_slice(&ack.service_data);
            }
            Apdu::SegmentAck {
                negative_ack,
                server,
                invoke_id,
                sequence_number,
                actual_window_size,
            } => {
                let mut first = (PduType::SegmentAck as u8) << 4;
                if *negative_ack {
                    first |= PDU_FLAG_NEGATIVE_ACK;
                }
                if *server {
                    first |= PDU_FLAG_SERVER;
                }
                buffer.push(first);
                buffer.push(*invoke_id);
                buffer.push(*sequence_number);
                buffer.push(*actual_window_size);
            }
            Apdu::Error {
                invoke_id,
                service_choice,
                error_data,
            } => {
                buffer.push((PduType::Error as u8) << 4);
                buffer.push(*invoke_id);
                buffer.push(*service_choice);
                buffer.extend_from_slice(error_data);
            }
            Apdu::Reject { invoke_id, reason } => {
                buffer.push((PduType::Reject as u8) << 4);
                buffer.push(*invoke_id);
                buffer.push(u8::from(*reason));
            }
            Apdu::Abort {
                server,
                invoke_id,
                reason,
            } => {
                let mut first = (PduType::Abort as u8) << 4;
                if *server {
                    first |= PDU_FLAG_SERVER;
                }
                buffer.push(first);
                buffer.push(*invoke_id);
                buffer.push(u8::from(*reason));
            }
        }
        buffer.len() - start
    }

    /// Decode a complete APDU. The service data extends to the end of the
    /// slice, so the whole input is consumed.
    pub fn decode(data: &[u8]) -> Result<Apdu> {
        if data.is_empty() {
            return Err(CodecError::Truncated);
        }

        let first = data[0];
        let pdu_type = PduType::try_from(first >> 4)?;

        match pdu_type {
            PduType::ConfirmedRequest => {
                if data.len() < 4 {
                    return Err(CodecError::Truncated);
                }
                let segmented = first & PDU_FLAG_SEGMENTED != 0;
                let max_segments = MaxSegments::from_nibble(data[1] >> 4);
                let max_apdu = MaxApduSize::from_nibble(data[1])?;
                let invoke_id = data[2];
                let mut pos = 3;
                let (sequence_number, proposed_window_size) = if segmented {
                    if data.len() < 6 {
                        return Err(CodecError::Truncated);
                    }
                    let seq = data[3];
                    let window = data[4];
                    pos = 5;
                    (Some(seq), Some(window))
                } else {
                    (None, None)
                };
                let service_choice = data[pos];
                pos += 1;
                Ok(Apdu::ConfirmedRequest(ConfirmedRequest {
                    segmented,
                    more_follows: first & PDU_FLAG_MORE_FOLLOWS != 0,
                    segmented_response_accepted: first & PDU_FLAG_SEGMENTED_RESPONSE_ACCEPTED
                        != 0,
                    max_segments,
                    max_apdu,
                    invoke_id,
                    sequence_number,
                    proposed_window_size,
                    service_choice,
                    service_data: data[pos..].to_vec(),
                }))
            }
            PduType::UnconfirmedRequest => {
                if data.len() < 2 {
                    return Err(CodecError::Truncated);
                }
                Ok(Apdu::UnconfirmedRequest {
                    service_choice: data[1],
                    service_data: data[2..].to_vec(),
                })
            }
            PduType::SimpleAck => {
                if data.len() < 3 {
                    return Err(CodecError::Truncated);
                }
                Ok(Apdu::SimpleAck {
                    invoke_id: data[1],
                    service_choice: data[2],
                })
            }
            PduType::ComplexAck => {
                if data.len() < 3 {
                    return Err(CodecError::Truncated);
                }
                let segmented = first & PDU_FLAG_SEGMENTED != 0;
                let invoke_id = data[1];
                let mut pos = 2;
                let (sequence_number, proposed_window_size) = if segmented {
                    if data.len() < 5 {
                        return Err(CodecError::Truncated);
                    }
                    let seq = data[2];
                    let window = data[3];
                    pos = 4;
                    (Some(seq), Some(window))
                } else {
                    (None, None)
                };
                let service_choice = data[pos];
                pos += 1;
                Ok(Apdu::ComplexAck(ComplexAck {
                    segmented,
                    more_follows: first & PDU_FLAG_MORE_FOLLOWS != 0,
                    invoke_id,
                    sequence_number,
                    proposed_window_size,
                    service_choice,
                    service_data: data[pos..].to_vec(),
                }))
            }
            PduType::SegmentAck => {
                if data.len() < 4 {
                    return Err(CodecError::Truncated);
                }
                Ok(Apdu::SegmentAck {
                    negative_ack: first & PDU_FLAG_NEGATIVE_ACK != 0,
                    server: first & PDU_FLAG_SERVER != 0,
                    invoke_id: data[1],
                    sequence_number: data[2],
                    actual_window_size: data[3],
                })
            }
            PduType::Error => {
                if data.len() < 3 {
                    return Err(CodecError::Truncated);
                }
                Ok(Apdu::Error {
                    invoke_id: data[1],
                    service_choice: data[2],
                    error_data: data[3..].to_vec(),
                })
            }
            PduType::Reject => {
                if data.len() < 3 {
                    return Err(CodecError::Truncated);
                }
                Ok(Apdu::Reject {
                    invoke_id: data[1],
                    reason: RejectReason::from(data[2]),
                })
            }
            PduType::Abort => {
                if data.len() < 3 {
                    return Err(CodecError::Truncated);
                }
                Ok(Apdu::Abort {
                    server: first & PDU_FLAG_SERVER != 0,
                    invoke_id: data[1],
                    reason: AbortReason::from(data[2]),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "std"))]
    use alloc::{vec, vec::Vec};

    fn round_trip(apdu: Apdu) -> Vec<u8> {
        let mut buf = Vec::new();
        apdu.encode(&mut buf);
        let decoded = Apdu::decode(&buf).unwrap();
        assert_eq!(decoded, apdu);
        // Re-encoding the decoded form reproduces the input exactly
        let mut again = Vec::new();
        decoded.encode(&mut again);
        assert_eq!(again, buf);
        buf
    }

    #[test]
    fn who_is_apdu_literal() {
        let buf = round_trip(Apdu::UnconfirmedRequest {
            service_choice: 8,
            service_data: Vec::new(),
        });
        assert_eq!(buf, [0x10, 0x08]);
    }

    #[test]
    fn confirmed_request_header() {
        let buf = round_trip(Apdu::ConfirmedRequest(ConfirmedRequest::new(
            1,
            12,
            vec![0x0C, 0x02, 0x00, 0x01, 0x04, 0x19, 0x4D],
        )));
        assert_eq!(buf[0], 0x00);
        assert_eq!(buf[1], 0x05); // unspecified segments, 1476 octets
        assert_eq!(buf[2], 0x01); // invoke id
        assert_eq!(&buf[3..], [0x0C, 0x0C, 0x02, 0x00, 0x01, 0x04, 0x19, 0x4D]);
    }

    #[test]
    fn segmented_confirmed_request_carries_window() {
        let mut req = ConfirmedRequest::new(7, 12, vec![0xAA]);
        req.segmented = true;
        req.more_follows = true;
        req.sequence_number = Some(2);
        req.proposed_window_size = Some(16);
        let buf = round_trip(Apdu::ConfirmedRequest(req));
        assert_eq!(buf[0], 0x0C); // segmented + more follows
        assert_eq!(buf[3], 2);
        assert_eq!(buf[4], 16);
    }

    #[test]
    fn simple_ack_literal() {
        let buf = round_trip(Apdu::SimpleAck {
            invoke_id: 5,
            service_choice: 15,
        });
        assert_eq!(buf, [0x20, 0x05, 0x0F]);
    }

    #[test]
    fn complex_ack_round_trip() {
        round_trip(Apdu::ComplexAck(ComplexAck::new(
            3,
            12,
            vec![0x0C, 0x02, 0x00, 0x01, 0x04],
        )));
        let mut segmented = ComplexAck::new(3, 12, vec![0x01]);
        segmented.segmented = true;
        segmented.sequence_number = Some(0);
        segmented.proposed_window_size = Some(4);
        round_trip(Apdu::ComplexAck(segmented));
    }

    #[test]
    fn segment_ack_flags() {
        let buf = round_trip(Apdu::SegmentAck {
            negative_ack: true,
            server: true,
            invoke_id: 9,
            sequence_number: 4,
            actual_window_size: 8,
        });
        assert_eq!(buf, [0x43, 0x09, 0x04, 0x08]);
    }

    #[test]
    fn error_pdu_round_trip() {
        let mut error_data = Vec::new();
        ErrorClassCode::new(ErrorClass::Property, ErrorCode::UnknownProperty)
            .encode(&mut error_data);
        let buf = round_trip(Apdu::Error {
            invoke_id: 2,
            service_choice: 12,
            error_data: error_data.clone(),
        });
        assert_eq!(buf, [0x50, 0x02, 0x0C, 0x91, 0x02, 0x91, 0x20]);

        let (parsed, used) = ErrorClassCode::decode(&error_data).unwrap();
        assert_eq!(parsed.class, ErrorClass::Property);
        assert_eq!(parsed.code, ErrorCode::UnknownProperty);
        assert_eq!(used, error_data.len());
    }

    #[test]
    fn reject_and_abort_literals() {
        let buf = round_trip(Apdu::Reject {
            invoke_id: 1,
            reason: RejectReason::MissingRequiredParameter,
        });
        assert_eq!(buf, [0x60, 0x01, 0x05]);

        let buf = round_trip(Apdu::Abort {
            server: true,
            invoke_id: 1,
            reason: AbortReason::SegmentationNotSupported,
        });
        assert_eq!(buf, [0x71, 0x01, 0x04]);
    }

    #[test]
    fn vendor_reject_reason_survives() {
        let buf = [0x60, 0x01, 0xC8];
        let decoded = Apdu::decode(&buf).unwrap();
        match decoded {
            Apdu::Reject { reason, .. } => assert_eq!(u8::from(reason), 0xC8),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn truncated_apdus_fail() {
        assert_eq!(Apdu::decode(&[]), Err(CodecError::Truncated));
        assert_eq!(Apdu::decode(&[0x00, 0x05]), Err(CodecError::Truncated));
        assert_eq!(Apdu::decode(&[0x20, 0x01]), Err(CodecError::Truncated));
        // Segmented request without sequence/window octets
        assert_eq!(
            Apdu::decode(&[0x08, 0x05, 0x01, 0x00]),
            Err(CodecError::Truncated)
        );
    }

    #[test]
    fn max_apdu_size_table() {
        assert_eq!(MaxApduSize::from_size(480), MaxApduSize::Octets480);
        assert_eq!(MaxApduSize::from_size(1476), MaxApduSize::Octets1476);
        assert_eq!(MaxApduSize::from_size(50), MaxApduSize::Octets50);
        assert_eq!(MaxApduSize::Octets206.size(), 206);
    }
}
