//! Per-service request and acknowledgement codecs.
//!
//! Each BACnet service is a struct with `encode`/`decode` over its service
//! parameter bytes (the portion of the APDU after the service choice).
//! Parameters are positional; optional context-tagged parameters are
//! emitted in ascending tag order, and decoders reject duplicate tags
//! unless the service schema declares repetition.
//!
//! Unconfirmed services live in [`unconfirmed`], confirmed services in
//! [`confirmed`]. Types shared by both (COV property values, private
//! transfer) live here.
//!
//! # Example
//!
//! ```
//! use bacnet_core::service::unconfirmed::WhoIsRequest;
//!
//! let mut buf = Vec::new();
//! WhoIsRequest::for_range(100, 199).encode(&mut buf).unwrap();
//! let decoded = WhoIsRequest::decode(&buf).unwrap();
//! assert!(decoded.matches(150));
//! assert!(!decoded.matches(200));
//! ```

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::encoding::{
    decode_context_enumerated, decode_context_unsigned, decode_is_closing_tag_number,
    decode_is_context_tag, decode_is_opening_tag_number, encode_closing_tag,
    encode_context_enumerated, encode_context_unsigned, encode_opening_tag, skip_value,
    CodecError, Result,
};

pub mod confirmed;
pub mod unconfirmed;

pub use confirmed::{
    AtomicReadFileAck, AtomicReadFileRequest, AtomicWriteFileAck, AtomicWriteFileRequest,
    DeleteObjectRequest, DeviceCommunicationControlRequest, LifeSafetyOperationRequest,
    ReadPropertyAck, ReadPropertyMultipleAck, ReadPropertyMultipleRequest, ReadPropertyRequest,
    ReinitializeDeviceRequest, SubscribeCovRequest, WritePropertyMultipleRequest,
    WritePropertyRequest,
};
pub use unconfirmed::{
    CovNotificationRequest, IAmRequest, IHaveRequest, TimeSynchronizationRequest, WhoAmIRequest,
    WhoHasRequest, WhoIsRequest, YouAreRequest,
};

/// Confirmed service choices of clause 21.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConfirmedServiceChoice {
    AcknowledgeAlarm = 0,
    ConfirmedCovNotification = 1,
    ConfirmedEventNotification = 2,
    GetAlarmSummary = 3,
    GetEnrollmentSummary = 4,
    SubscribeCov = 5,
    AtomicReadFile = 6,
    AtomicWriteFile = 7,
    AddListElement = 8,
    RemoveListElement = 9,
    CreateObject = 10,
    DeleteObject = 11,
    ReadProperty = 12,
    ReadPropertyConditional = 13,
    ReadPropertyMultiple = 14,
    WriteProperty = 15,
    WritePropertyMultiple = 16,
    DeviceCommunicationControl = 17,
    ConfirmedPrivateTransfer = 18,
    ConfirmedTextMessage = 19,
    ReinitializeDevice = 20,
    VtOpen = 21,
    VtClose = 22,
    VtData = 23,
    Authenticate = 24,
    RequestKey = 25,
    ReadRange = 26,
    LifeSafetyOperation = 27,
    SubscribeCovProperty = 28,
    GetEventInformation = 29,
}

impl TryFrom<u8> for ConfirmedServiceChoice {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::AcknowledgeAlarm),
            1 => Ok(Self::ConfirmedCovNotification),
            2 => Ok(Self::ConfirmedEventNotification),
            3 => Ok(Self::GetAlarmSummary),
            4 => Ok(Self::GetEnrollmentSummary),
            5 => Ok(Self::SubscribeCov),
            6 => Ok(Self::AtomicReadFile),
            7 => Ok(Self::AtomicWriteFile),
            8 => Ok(Self::AddListElement),
            9 => Ok(Self::RemoveListElement),
            10 => Ok(Self::CreateObject),
            11 => Ok(Self::DeleteObject),
            12 => Ok(Self::ReadProperty),
            13 => Ok(Self::ReadPropertyConditional),
            14 => Ok(Self::ReadPropertyMultiple),
            15 => Ok(Self::WriteProperty),
            16 => Ok(Self::WritePropertyMultiple),
            17 => Ok(Self::DeviceCommunicationControl),
            18 => Ok(Self::ConfirmedPrivateTransfer),
            19 => Ok(Self::ConfirmedTextMessage),
            20 => Ok(Self::ReinitializeDevice),
            21 => Ok(Self::VtOpen),
            22 => Ok(Self::VtClose),
            23 => Ok(Self::VtData),
            24 => Ok(Self::Authenticate),
            25 => Ok(Self::RequestKey),
            26 => Ok(Self::ReadRange),
            27 => Ok(Self::LifeSafetyOperation),
            28 => Ok(Self::SubscribeCovProperty),
            29 => Ok(Self::GetEventInformation),
            _ => Err(CodecError::InvalidTag),
        }
    }
}

/// Unconfirmed service choices of clause 21, including the Who-Am-I /
/// You-Are pair added by the 135-2020 addenda.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnconfirmedServiceChoice {
    IAm = 0,
    IHave = 1,
    UnconfirmedCovNotification = 2,
    UnconfirmedEventNotification = 3,
    UnconfirmedPrivateTransfer = 4,
    UnconfirmedTextMessage = 5,
    TimeSynchronization = 6,
    WhoHas = 7,
    WhoIs = 8,
    UtcTimeSynchronization = 9,
    WriteGroup = 10,
    UnconfirmedCovNotificationMultiple = 11,
    AuditNotification = 12,
    WhoAmI = 13,
    YouAre = 14,
}

impl TryFrom<u8> for UnconfirmedServiceChoice {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::IAm),
            1 => Ok(Self::IHave),
            2 => Ok(Self::UnconfirmedCovNotification),
            3 => Ok(Self::UnconfirmedEventNotification),
            4 => Ok(Self::UnconfirmedPrivateTransfer),
            5 => Ok(Self::UnconfirmedTextMessage),
            6 => Ok(Self::TimeSynchronization),
            7 => Ok(Self::WhoHas),
            8 => Ok(Self::WhoIs),
            9 => Ok(Self::UtcTimeSynchronization),
            10 => Ok(Self::WriteGroup),
            11 => Ok(Self::UnconfirmedCovNotificationMultiple),
            12 => Ok(Self::AuditNotification),
            13 => Ok(Self::WhoAmI),
            14 => Ok(Self::YouAre),
            _ => Err(CodecError::InvalidTag),
        }
    }
}

/// Object-name property identifier, the one property the core itself
/// references in tests and examples.
pub const PROPERTY_OBJECT_NAME: u32 = 77;

/// Present-value property identifier.
pub const PROPERTY_PRESENT_VALUE: u32 = 85;

/// A property identifier with an optional array index, a value, and an
/// optional write priority. Shared by COV notifications and
/// WritePropertyMultiple.
///
/// The value is kept as raw application-encoded bytes so constructed
/// values survive round trips; [`crate::encoding::ApplicationValue::decode`]
/// parses the common primitive case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyValue {
    pub property_id: u32,
    pub array_index: Option<u32>,
    /// Application-encoded value octets
    pub value: Vec<u8>,
    /// Write priority 1..=16
    pub priority: Option<u8>,
}

impl PropertyValue {
    /// A plain property value without index or priority.
    pub fn new(property_id: u32, value: Vec<u8>) -> Self {
        Self {
            property_id,
            array_index: None,
            value,
            priority: None,
        }
    }

    pub(crate) fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        encode_context_enumerated(buffer, 0, self.property_id);
        if let Some(index) = self.array_index {
            encode_context_unsigned(buffer, 1, index);
        }
        encode_opening_tag(buffer, 2);
        buffer.extend_from_slice(&self.value);
        encode_closing_tag(buffer, 2);
        if let Some(priority) = self.priority {
            if !(1..=16).contains(&priority) {
                return Err(CodecError::OutOfRange);
            }
            encode_context_unsigned(buffer, 3, u32::from(priority));
        }
        Ok(buffer.len() - start)
    }

    pub(crate) fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let mut pos = 0usize;
        let (property_id, used) = decode_context_enumerated(&data[pos..], 0)?;
        pos += used;

        let array_index = if decode_is_context_tag(&data[pos..], 1) {
            let (index, used) = decode_context_unsigned(&data[pos..], 1)?;
            pos += used;
            Some(index)
        } else {
            None
        };

        if !decode_is_opening_tag_number(&data[pos..], 2) {
            return Err(CodecError::InvalidTag);
        }
        pos += 1;
        let value_start = pos;
        while !decode_is_closing_tag_number(&data[pos..], 2) {
            pos += skip_value(&data[pos..])?;
        }
        let value = data[value_start..pos].to_vec();
        pos += 1;

        let priority = if decode_is_context_tag(&data[pos..], 3) {
            let (priority, used) = decode_context_unsigned(&data[pos..], 3)?;
            pos += used;
            if !(1..=16).contains(&priority) {
                return Err(CodecError::OutOfRange);
            }
            Some(priority as u8)
        } else {
            None
        };

        Ok((
            Self {
                property_id,
                array_index,
                value,
                priority,
            },
            pos,
        ))
    }
}

/// A Confirmed- or Unconfirmed-PrivateTransfer request. The service
/// parameter block is opaque to the core and forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateTransferRequest {
    pub vendor_id: u16,
    pub service_number: u32,
    pub service_parameters: Vec<u8>,
}

impl PrivateTransferRequest {
    pub fn new(vendor_id: u16, service_number: u32, service_parameters: Vec<u8>) -> Self {
        Self {
            vendor_id,
            service_number,
            service_parameters,
        }
    }

    /// Encode the service parameters; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        encode_context_unsigned(buffer, 0, u32::from(self.vendor_id));
        encode_context_unsigned(buffer, 1, self.service_number);
        if !self.service_parameters.is_empty() {
            encode_opening_tag(buffer, 2);
            buffer.extend_from_slice(&self.service_parameters);
            encode_closing_tag(buffer, 2);
        }
        Ok(buffer.len() - start)
    }

    /// Decode from the service parameter bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let (vendor_id, used) = decode_context_unsigned(&data[pos..], 0)?;
        pos += used;
        if vendor_id > u32::from(u16::MAX) {
            return Err(CodecError::OutOfRange);
        }
        let (service_number, used) = decode_context_unsigned(&data[pos..], 1)?;
        pos += used;

        let service_parameters = if pos < data.len() {
            if !decode_is_opening_tag_number(&data[pos..], 2) {
                return Err(CodecError::InvalidTag);
            }
            pos += 1;
            let body_start = pos;
            while !decode_is_closing_tag_number(&data[pos..], 2) {
                pos += skip_value(&data[pos..])?;
            }
            let body = data[body_start..pos].to_vec();
            pos += 1;
            body
        } else {
            Vec::new()
        };

        if pos != data.len() {
            return Err(CodecError::InvalidLength);
        }

        Ok(Self {
            vendor_id: vendor_id as u16,
            service_number,
            service_parameters,
        })
    }
}

/// A ConfirmedPrivateTransfer acknowledgement: the same header with an
/// optional opaque result block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateTransferAck {
    pub vendor_id: u16,
    pub service_number: u32,
    pub result_block: Vec<u8>,
}

impl PrivateTransferAck {
    /// Encode the acknowledgement body; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        encode_context_unsigned(buffer, 0, u32::from(self.vendor_id));
        encode_context_unsigned(buffer, 1, self.service_number);
        if !self.result_block.is_empty() {
            encode_opening_tag(buffer, 2);
            buffer.extend_from_slice(&self.result_block);
            encode_closing_tag(buffer, 2);
        }
        Ok(buffer.len() - start)
    }

    /// Decode the acknowledgement body. The wire shape is identical to the
    /// request; only the field meaning differs.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let request = PrivateTransferRequest::decode(data)?;
        Ok(Self {
            vendor_id: request.vendor_id,
            service_number: request.service_number,
            result_block: request.service_parameters,
        })
    }
}
