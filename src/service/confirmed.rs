//! Confirmed service codecs: property access, COV subscription, file
//! access, device management, and life-safety operation.

#[cfg(not(feature = "std"))]
use alloc::{vec::Vec, vec};

use crate::apdu::ErrorClassCode;
use crate::encoding::{
    decode_application_boolean, decode_application_octet_string, decode_application_signed,
    decode_application_unsigned, decode_context_character_string, decode_context_enumerated,
    decode_context_object_id, decode_context_signed, decode_context_unsigned,
    decode_is_closing_tag_number, decode_is_context_tag, decode_is_opening_tag_number,
    encode_application_boolean,
    encode_application_object_id, encode_application_octet_string, encode_application_signed,
    encode_application_unsigned, encode_closing_tag, encode_context_character_string,
    encode_context_enumerated, encode_context_object_id, encode_context_signed,
    encode_context_unsigned, encode_opening_tag, skip_value, CharacterString, CodecError,
    ObjectIdentifier, Result,
};

use super::PropertyValue;

/// ReadProperty request: one property of one object, with an optional
/// array index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPropertyRequest {
    pub object_id: ObjectIdentifier,
    pub property_id: u32,
    pub array_index: Option<u32>,
}

impl ReadPropertyRequest {
    pub fn new(object_id: ObjectIdentifier, property_id: u32) -> Self {
        Self {
            object_id,
            property_id,
            array_index: None,
        }
    }

    pub fn with_array_index(object_id: ObjectIdentifier, property_id: u32, index: u32) -> Self {
        Self {
            object_id,
            property_id,
            array_index: Some(index),
        }
    }

    /// Encode the service parameters; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        encode_context_object_id(buffer, 0, self.object_id);
        encode_context_enumerated(buffer, 1, self.property_id);
        if let Some(index) = self.array_index {
            encode_context_unsigned(buffer, 2, index);
        }
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let (object_id, used) = decode_context_object_id(data, 0)?;
        pos += used;
        let (property_id, used) = decode_context_enumerated(&data[pos..], 1)?;
        pos += used;
        let array_index = if pos < data.len() {
            let (index, used) = decode_context_unsigned(&data[pos..], 2)?;
            pos += used;
            Some(index)
        } else {
            None
        };
        if pos != data.len() {
            return Err(CodecError::InvalidLength);
        }
        Ok(Self {
            object_id,
            property_id,
            array_index,
        })
    }
}

/// ReadProperty acknowledgement: the request echo plus the value inside
/// context tag 3. The value stays application-encoded so arrays and
/// constructed values survive untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPropertyAck {
    pub object_id: ObjectIdentifier,
    pub property_id: u32,
    pub array_index: Option<u32>,
    pub value: Vec<u8>,
}

impl ReadPropertyAck {
    /// Encode the acknowledgement body; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        encode_context_object_id(buffer, 0, self.object_id);
        encode_context_enumerated(buffer, 1, self.property_id);
        if let Some(index) = self.array_index {
            encode_context_unsigned(buffer, 2, index);
        }
        encode_opening_tag(buffer, 3);
        buffer.extend_from_slice(&self.value);
        encode_closing_tag(buffer, 3);
        Ok(buffer.len() - start)
    }

    /// Decode the acknowledgement body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let (object_id, used) = decode_context_object_id(data, 0)?;
        pos += used;
        let (property_id, used) = decode_context_enumerated(&data[pos..], 1)?;
        pos += used;
        let array_index = if decode_is_context_tag(&data[pos..], 2) {
            let (index, used) = decode_context_unsigned(&data[pos..], 2)?;
            pos += used;
            Some(index)
        } else {
            None
        };

        if !decode_is_opening_tag_number(&data[pos..], 3) {
            return Err(CodecError::InvalidTag);
        }
        pos += 1;
        let value_start = pos;
        while !decode_is_closing_tag_number(&data[pos..], 3) {
            pos += skip_value(&data[pos..])?;
        }
        let value = data[value_start..pos].to_vec();
        pos += 1;

        if pos != data.len() {
            return Err(CodecError::InvalidLength);
        }

        Ok(Self {
            object_id,
            property_id,
            array_index,
            value,
        })
    }
}

/// WriteProperty request: ReadProperty plus a value and an optional
/// command priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePropertyRequest {
    pub object_id: ObjectIdentifier,
    pub property_id: u32,
    pub array_index: Option<u32>,
    /// Application-encoded value octets
    pub value: Vec<u8>,
    /// Command priority 1..=16
    pub priority: Option<u8>,
}

impl WritePropertyRequest {
    pub fn new(object_id: ObjectIdentifier, property_id: u32, value: Vec<u8>) -> Self {
        Self {
            object_id,
            property_id,
            array_index: None,
            value,
            priority: None,
        }
    }

    /// Encode the service parameters; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        encode_context_object_id(buffer, 0, self.object_id);
        encode_context_enumerated(buffer, 1, self.property_id);
        if let Some(index) = self.array_index {
            encode_context_unsigned(buffer, 2, index);
        }
        encode_opening_tag(buffer, 3);
        buffer.extend_from_slice(&self.value);
        encode_closing_tag(buffer, 3);
        if let Some(priority) = self.priority {
            if !(1..=16).contains(&priority) {
                return Err(CodecError::OutOfRange);
            }
            encode_context_unsigned(buffer, 4, u32::from(priority));
        }
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let (object_id, used) = decode_context_object_id(data, 0)?;
        pos += used;
        let (property_id, used) = decode_context_enumerated(&data[pos..], 1)?;
        pos += used;
        let array_index = if decode_is_context_tag(&data[pos..], 2) {
            let (index, used) = decode_context_unsigned(&data[pos..], 2)?;
            pos += used;
            Some(index)
        } else {
            None
        };

        if !decode_is_opening_tag_number(&data[pos..], 3) {
            return Err(CodecError::InvalidTag);
        }
        pos += 1;
        let value_start = pos;
        while !decode_is_closing_tag_number(&data[pos..], 3) {
            pos += skip_value(&data[pos..])?;
        }
        let value = data[value_start..pos].to_vec();
        pos += 1;

        let priority = if pos < data.len() {
            let (priority, used) = decode_context_unsigned(&data[pos..], 4)?;
            pos += used;
            if !(1..=16).contains(&priority) {
                return Err(CodecError::OutOfRange);
            }
            Some(priority as u8)
        } else {
            None
        };

        if pos != data.len() {
            return Err(CodecError::InvalidLength);
        }

        Ok(Self {
            object_id,
            property_id,
            array_index,
            value,
            priority,
        })
    }
}

/// One property reference inside a ReadPropertyMultiple specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyReference {
    pub property_id: u32,
    pub array_index: Option<u32>,
}

impl PropertyReference {
    pub fn new(property_id: u32) -> Self {
        Self {
            property_id,
            array_index: None,
        }
    }

    fn encode(&self, buffer: &mut Vec<u8>) {
        encode_context_enumerated(buffer, 0, self.property_id);
        if let Some(index) = self.array_index {
            encode_context_unsigned(buffer, 1, index);
        }
    }

    fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let mut pos = 0usize;
        let (property_id, used) = decode_context_enumerated(data, 0)?;
        pos += used;
        let array_index = if decode_is_context_tag(&data[pos..], 1) {
            let (index, used) = decode_context_unsigned(&data[pos..], 1)?;
            pos += used;
            Some(index)
        } else {
            None
        };
        Ok((
            Self {
                property_id,
                array_index,
            },
            pos,
        ))
    }
}

/// One object's property list inside a ReadPropertyMultiple request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadAccessSpecification {
    pub object_id: ObjectIdentifier,
    pub properties: Vec<PropertyReference>,
}

impl ReadAccessSpecification {
    pub fn new(object_id: ObjectIdentifier, properties: Vec<PropertyReference>) -> Self {
        Self {
            object_id,
            properties,
        }
    }
}

/// ReadPropertyMultiple request: a list of read-access specifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPropertyMultipleRequest {
    pub specifications: Vec<ReadAccessSpecification>,
}

impl ReadPropertyMultipleRequest {
    pub fn new(specifications: Vec<ReadAccessSpecification>) -> Self {
        Self { specifications }
    }

    /// Encode the service parameters; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        if self.specifications.is_empty() {
            return Err(CodecError::OutOfRange);
        }
        let start = buffer.len();
        for spec in &self.specifications {
            encode_context_object_id(buffer, 0, spec.object_id);
            encode_opening_tag(buffer, 1);
            for property in &spec.properties {
                property.encode(buffer);
            }
            encode_closing_tag(buffer, 1);
        }
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let mut specifications = Vec::new();
        while pos < data.len() {
            let (object_id, used) = decode_context_object_id(&data[pos..], 0)?;
            pos += used;
            if !decode_is_opening_tag_number(&data[pos..], 1) {
                return Err(CodecError::InvalidTag);
            }
            pos += 1;
            let mut properties = Vec::new();
            while !decode_is_closing_tag_number(&data[pos..], 1) {
                let (property, used) = PropertyReference::decode(&data[pos..])?;
                pos += used;
                properties.push(property);
            }
            pos += 1;
            specifications.push(ReadAccessSpecification {
                object_id,
                properties,
            });
        }
        if specifications.is_empty() {
            return Err(CodecError::Truncated);
        }
        Ok(Self { specifications })
    }
}

/// Value or error for one property in a ReadPropertyMultiple result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    /// Application-encoded value octets, from context tag 4
    Value(Vec<u8>),
    /// Error class/code pair, from context tag 5
    Error(ErrorClassCode),
}

/// One property's outcome inside a ReadPropertyMultiple acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyAccessResult {
    pub property_id: u32,
    pub array_index: Option<u32>,
    pub result: ReadResult,
}

/// One object's results inside a ReadPropertyMultiple acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadAccessResult {
    pub object_id: ObjectIdentifier,
    pub results: Vec<PropertyAccessResult>,
}

/// ReadPropertyMultiple acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPropertyMultipleAck {
    pub results: Vec<ReadAccessResult>,
}

impl ReadPropertyMultipleAck {
    /// Encode the acknowledgement body; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        for access in &self.results {
            encode_context_object_id(buffer, 0, access.object_id);
            encode_opening_tag(buffer, 1);
            for item in &access.results {
                encode_context_enumerated(buffer, 2, item.property_id);
                if let Some(index) = item.array_index {
                    encode_context_unsigned(buffer, 3, index);
                }
                match &item.result {
                    ReadResult::Value(value) => {
                        encode_opening_tag(buffer, 4);
                        buffer.extend_from_slice(value);
                        encode_closing_tag(buffer, 4);
                    }
                    ReadResult::Error(error) => {
                        encode_opening_tag(buffer, 5);
                        error.encode(buffer);
                        encode_closing_tag(buffer, 5);
                    }
                }
            }
            encode_closing_tag(buffer, 1);
        }
        Ok(buffer.len() - start)
    }

    /// Decode the acknowledgement body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let mut results = Vec::new();
        while pos < data.len() {
            let (object_id, used) = decode_context_object_id(&data[pos..], 0)?;
            pos += used;
            if !decode_is_opening_tag_number(&data[pos..], 1) {
                return Err(CodecError::InvalidTag);
            }
            pos += 1;
            let mut items = Vec::new();
            while !decode_is_closing_tag_number(&data[pos..], 1) {
                let (property_id, used) = decode_context_enumerated(&data[pos..], 2)?;
                pos += used;
                let array_index = if decode_is_context_tag(&data[pos..], 3) {
                    let (index, used) = decode_context_unsigned(&data[pos..], 3)?;
                    pos += used;
                    Some(index)
                } else {
                    None
                };
                let result = if decode_is_opening_tag_number(&data[pos..], 4) {
                    pos += 1;
                    let value_start = pos;
                    while !decode_is_closing_tag_number(&data[pos..], 4) {
                        pos += skip_value(&data[pos..])?;
                    }
                    let value = data[value_start..pos].to_vec();
                    pos += 1;
                    ReadResult::Value(value)
                } else if decode_is_opening_tag_number(&data[pos..], 5) {
                    pos += 1;
                    let (error, used) = ErrorClassCode::decode(&data[pos..])?;
                    pos += used;
                    if !decode_is_closing_tag_number(&data[pos..], 5) {
                        return Err(CodecError::InvalidTag);
                    }
                    pos += 1;
                    ReadResult::Error(error)
                } else {
                    return Err(CodecError::InvalidTag);
                };
                items.push(PropertyAccessResult {
                    property_id,
                    array_index,
                    result,
                });
            }
            pos += 1;
            results.push(ReadAccessResult {
                object_id,
                results: items,
            });
        }
        if results.is_empty() {
            return Err(CodecError::Truncated);
        }
        Ok(Self { results })
    }
}

/// One object's write list inside a WritePropertyMultiple request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAccessSpecification {
    pub object_id: ObjectIdentifier,
    pub values: Vec<PropertyValue>,
}

/// WritePropertyMultiple request: a list of write-access specifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePropertyMultipleRequest {
    pub specifications: Vec<WriteAccessSpecification>,
}

impl WritePropertyMultipleRequest {
    pub fn new(specifications: Vec<WriteAccessSpecification>) -> Self {
        Self { specifications }
    }

    /// Encode the service parameters; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        if self.specifications.is_empty() {
            return Err(CodecError::OutOfRange);
        }
        let start = buffer.len();
        for spec in &self.specifications {
            encode_context_object_id(buffer, 0, spec.object_id);
            encode_opening_tag(buffer, 1);
            for value in &spec.values {
                value.encode(buffer)?;
            }
            encode_closing_tag(buffer, 1);
        }
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let mut specifications = Vec::new();
        while pos < data.len() {
            let (object_id, used) = decode_context_object_id(&data[pos..], 0)?;
            pos += used;
            if !decode_is_opening_tag_number(&data[pos..], 1) {
                return Err(CodecError::InvalidTag);
            }
            pos += 1;
            let mut values = Vec::new();
            while !decode_is_closing_tag_number(&data[pos..], 1) {
                let (value, used) = PropertyValue::decode(&data[pos..])?;
                pos += used;
                values.push(value);
            }
            pos += 1;
            specifications.push(WriteAccessSpecification { object_id, values });
        }
        if specifications.is_empty() {
            return Err(CodecError::Truncated);
        }
        Ok(Self { specifications })
    }
}

/// SubscribeCOV request. Omitting both the confirmed flag and the
/// lifetime cancels the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeCovRequest {
    pub process_id: u32,
    pub object_id: ObjectIdentifier,
    pub issue_confirmed: Option<bool>,
    pub lifetime_seconds: Option<u32>,
}

impl SubscribeCovRequest {
    pub fn new(
        process_id: u32,
        object_id: ObjectIdentifier,
        issue_confirmed: bool,
        lifetime_seconds: u32,
    ) -> Self {
        Self {
            process_id,
            object_id,
            issue_confirmed: Some(issue_confirmed),
            lifetime_seconds: Some(lifetime_seconds),
        }
    }

    /// A cancellation for an existing subscription.
    pub fn cancellation(process_id: u32, object_id: ObjectIdentifier) -> Self {
        Self {
            process_id,
            object_id,
            issue_confirmed: None,
            lifetime_seconds: None,
        }
    }

    /// True when this request cancels rather than (re-)subscribes.
    pub fn is_cancellation(&self) -> bool {
        self.issue_confirmed.is_none() && self.lifetime_seconds.is_none()
    }

    /// Encode the service parameters; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        encode_context_unsigned(buffer, 0, self.process_id);
        encode_context_object_id(buffer, 1, self.object_id);
        if let Some(confirmed) = self.issue_confirmed {
            crate::encoding::encode_context_boolean(buffer, 2, confirmed);
        }
        if let Some(lifetime) = self.lifetime_seconds {
            encode_context_unsigned(buffer, 3, lifetime);
        }
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let (process_id, used) = decode_context_unsigned(data, 0)?;
        pos += used;
        let (object_id, used) = decode_context_object_id(&data[pos..], 1)?;
        pos += used;
        let issue_confirmed = if decode_is_context_tag(&data[pos..], 2) {
            let (confirmed, used) = crate::encoding::decode_context_boolean(&data[pos..], 2)?;
            pos += used;
            Some(confirmed)
        } else {
            None
        };
        let lifetime_seconds = if pos < data.len() {
            let (lifetime, used) = decode_context_unsigned(&data[pos..], 3)?;
            pos += used;
            Some(lifetime)
        } else {
            None
        };
        if pos != data.len() {
            return Err(CodecError::InvalidLength);
        }
        Ok(Self {
            process_id,
            object_id,
            issue_confirmed,
            lifetime_seconds,
        })
    }
}

/// ReinitializeDevice states of clause 16.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReinitializedState {
    Coldstart = 0,
    Warmstart = 1,
    StartBackup = 2,
    EndBackup = 3,
    StartRestore = 4,
    EndRestore = 5,
    AbortRestore = 6,
}

impl TryFrom<u32> for ReinitializedState {
    type Error = CodecError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Coldstart),
            1 => Ok(Self::Warmstart),
            2 => Ok(Self::StartBackup),
            3 => Ok(Self::EndBackup),
            4 => Ok(Self::StartRestore),
            5 => Ok(Self::EndRestore),
            6 => Ok(Self::AbortRestore),
            _ => Err(CodecError::OutOfRange),
        }
    }
}

/// ReinitializeDevice request with its optional password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReinitializeDeviceRequest {
    pub state: ReinitializedState,
    pub password: Option<CharacterString>,
}

impl ReinitializeDeviceRequest {
    pub fn new(state: ReinitializedState) -> Self {
        Self {
            state,
            password: None,
        }
    }

    /// Encode the service parameters. Passwords are limited to 20
    /// characters by clause 16.4.1.1.2.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        encode_context_enumerated(buffer, 0, self.state as u32);
        if let Some(ref password) = self.password {
            if password.is_empty() || password.len() > 20 {
                return Err(CodecError::OutOfRange);
            }
            encode_context_character_string(buffer, 1, password);
        }
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let (state, used) = decode_context_enumerated(data, 0)?;
        pos += used;
        let password = if pos < data.len() {
            let (password, used) = decode_context_character_string(&data[pos..], 1)?;
            pos += used;
            Some(password)
        } else {
            None
        };
        if pos != data.len() {
            return Err(CodecError::InvalidLength);
        }
        Ok(Self {
            state: ReinitializedState::try_from(state)?,
            password,
        })
    }
}

/// DeviceCommunicationControl enable/disable states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnableDisable {
    Enable = 0,
    Disable = 1,
    /// Stop initiating traffic but keep answering
    DisableInitiation = 2,
}

impl TryFrom<u32> for EnableDisable {
    type Error = CodecError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Enable),
            1 => Ok(Self::Disable),
            2 => Ok(Self::DisableInitiation),
            _ => Err(CodecError::OutOfRange),
        }
    }
}

/// DeviceCommunicationControl request: gate a device's communication,
/// optionally for a bounded number of minutes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommunicationControlRequest {
    pub time_duration_minutes: Option<u16>,
    pub state: EnableDisable,
    pub password: Option<CharacterString>,
}

impl DeviceCommunicationControlRequest {
    pub fn new(state: EnableDisable) -> Self {
        Self {
            time_duration_minutes: None,
            state,
            password: None,
        }
    }

    /// Encode the service parameters; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        if let Some(minutes) = self.time_duration_minutes {
            encode_context_unsigned(buffer, 0, u32::from(minutes));
        }
        encode_context_enumerated(buffer, 1, self.state as u32);
        if let Some(ref password) = self.password {
            if password.is_empty() || password.len() > 20 {
                return Err(CodecError::OutOfRange);
            }
            encode_context_character_string(buffer, 2, password);
        }
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let time_duration_minutes = if decode_is_context_tag(data, 0) {
            let (minutes, used) = decode_context_unsigned(data, 0)?;
            pos += used;
            if minutes > u32::from(u16::MAX) {
                return Err(CodecError::OutOfRange);
            }
            Some(minutes as u16)
        } else {
            None
        };
        let (state, used) = decode_context_enumerated(&data[pos..], 1)?;
        pos += used;
        let password = if pos < data.len() {
            let (password, used) = decode_context_character_string(&data[pos..], 2)?;
            pos += used;
            Some(password)
        } else {
            None
        };
        if pos != data.len() {
            return Err(CodecError::InvalidLength);
        }
        Ok(Self {
            time_duration_minutes,
            state: EnableDisable::try_from(state)?,
            password,
        })
    }
}

/// LifeSafetyOperation request: a silence/reset/unsilence command from an
/// operator process, optionally scoped to one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifeSafetyOperationRequest {
    pub process_id: u32,
    pub requesting_source: CharacterString,
    /// BACnetLifeSafetyOperation enumeration value
    pub operation: u32,
    pub object_id: Option<ObjectIdentifier>,
}

impl LifeSafetyOperationRequest {
    /// Encode the service parameters; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        encode_context_unsigned(buffer, 0, self.process_id);
        encode_context_character_string(buffer, 1, &self.requesting_source);
        encode_context_enumerated(buffer, 2, self.operation);
        if let Some(object_id) = self.object_id {
            encode_context_object_id(buffer, 3, object_id);
        }
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let (process_id, used) = decode_context_unsigned(data, 0)?;
        pos += used;
        let (requesting_source, used) = decode_context_character_string(&data[pos..], 1)?;
        pos += used;
        let (operation, used) = decode_context_enumerated(&data[pos..], 2)?;
        pos += used;
        let object_id = if pos < data.len() {
            let (object_id, used) = decode_context_object_id(&data[pos..], 3)?;
            pos += used;
            Some(object_id)
        } else {
            None
        };
        if pos != data.len() {
            return Err(CodecError::InvalidLength);
        }
        Ok(Self {
            process_id,
            requesting_source,
            operation,
            object_id,
        })
    }
}

/// Stream or record access selector for AtomicReadFile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    /// Octet-stream access: start position and octet count
    Stream { start: i32, count: u32 },
    /// Record access: start record and record count
    Record { start: i32, count: u32 },
}

/// AtomicReadFile request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicReadFileRequest {
    pub file_id: ObjectIdentifier,
    pub access: FileAccess,
}

impl AtomicReadFileRequest {
    /// Encode the service parameters; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        encode_application_object_id(buffer, self.file_id);
        let (tag, file_start, count) = match self.access {
            FileAccess::Stream { start, count } => (0u8, start, count),
            FileAccess::Record { start, count } => (1u8, start, count),
        };
        encode_opening_tag(buffer, tag);
        encode_application_signed(buffer, file_start);
        encode_application_unsigned(buffer, count);
        encode_closing_tag(buffer, tag);
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let (file_id, used) = crate::encoding::decode_application_object_id(data)?;
        pos += used;
        let stream = decode_is_opening_tag_number(&data[pos..], 0);
        let tag = if stream { 0 } else { 1 };
        if !stream && !decode_is_opening_tag_number(&data[pos..], 1) {
            return Err(CodecError::InvalidTag);
        }
        pos += 1;
        let (start, used) = decode_application_signed(&data[pos..])?;
        pos += used;
        let (count, used) = decode_application_unsigned(&data[pos..])?;
        pos += used;
        if !decode_is_closing_tag_number(&data[pos..], tag) {
            return Err(CodecError::InvalidTag);
        }
        pos += 1;
        if pos != data.len() {
            return Err(CodecError::InvalidLength);
        }
        let access = if stream {
            FileAccess::Stream { start, count }
        } else {
            FileAccess::Record { start, count }
        };
        Ok(Self { file_id, access })
    }
}

/// Data returned by AtomicReadFile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileReadData {
    /// Stream access: start position and the octets read
    Stream { start: i32, data: Vec<u8> },
    /// Record access: start record and the records read
    Record { start: i32, records: Vec<Vec<u8>> },
}

/// AtomicReadFile acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicReadFileAck {
    /// True when the read reached the end of the file
    pub end_of_file: bool,
    pub data: FileReadData,
}

impl AtomicReadFileAck {
    /// Encode the acknowledgement body; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        encode_application_boolean(buffer, self.end_of_file);
        match &self.data {
            FileReadData::Stream { start: pos, data } => {
                encode_opening_tag(buffer, 0);
                encode_application_signed(buffer, *pos);
                encode_application_octet_string(buffer, data);
                encode_closing_tag(buffer, 0);
            }
            FileReadData::Record { start: pos, records } => {
                encode_opening_tag(buffer, 1);
                encode_application_signed(buffer, *pos);
                encode_application_unsigned(buffer, records.len() as u32);
                for record in records {
                    encode_application_octet_string(buffer, record);
                }
                encode_closing_tag(buffer, 1);
            }
        }
        Ok(buffer.len() - start)
    }

    /// Decode the acknowledgement body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let (end_of_file, used) = decode_application_boolean(data)?;
        pos += used;
        let stream = decode_is_opening_tag_number(&data[pos..], 0);
        if !stream && !decode_is_opening_tag_number(&data[pos..], 1) {
            return Err(CodecError::InvalidTag);
        }
        pos += 1;
        let (start, used) = decode_application_signed(&data[pos..])?;
        pos += used;
        let file_data = if stream {
            let (octets, used) = decode_application_octet_string(&data[pos..])?;
            pos += used;
            if !decode_is_closing_tag_number(&data[pos..], 0) {
                return Err(CodecError::InvalidTag);
            }
            pos += 1;
            FileReadData::Stream {
                start,
                data: octets,
            }
        } else {
            let (count, used) = decode_application_unsigned(&data[pos..])?;
            pos += used;
            let mut records = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (record, used) = decode_application_octet_string(&data[pos..])?;
                pos += used;
                records.push(record);
            }
            if !decode_is_closing_tag_number(&data[pos..], 1) {
                return Err(CodecError::InvalidTag);
            }
            pos += 1;
            FileReadData::Record { start, records }
        };
        if pos != data.len() {
            return Err(CodecError::InvalidLength);
        }
        Ok(Self {
            end_of_file,
            data: file_data,
        })
    }
}

/// AtomicWriteFile request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicWriteFileRequest {
    pub file_id: ObjectIdentifier,
    pub data: FileReadData,
}

impl AtomicWriteFileRequest {
    /// Encode the service parameters; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        encode_application_object_id(buffer, self.file_id);
        match &self.data {
            FileReadData::Stream { start: pos, data } => {
                encode_opening_tag(buffer, 0);
                encode_application_signed(buffer, *pos);
                encode_application_octet_string(buffer, data);
                encode_closing_tag(buffer, 0);
            }
            FileReadData::Record { start: pos, records } => {
                encode_opening_tag(buffer, 1);
                encode_application_signed(buffer, *pos);
                encode_application_unsigned(buffer, records.len() as u32);
                for record in records {
                    encode_application_octet_string(buffer, record);
                }
                encode_closing_tag(buffer, 1);
            }
        }
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (file_id, used) = crate::encoding::decode_application_object_id(data)?;
        // The remainder is shaped exactly like the read acknowledgement
        // minus the leading EOF flag; reuse its parser by prepending one.
        let mut shaped = vec![0x10];
        shaped.extend_from_slice(&data[used..]);
        let ack = AtomicReadFileAck::decode(&shaped)?;
        Ok(Self {
            file_id,
            data: ack.data,
        })
    }
}

/// File position echoed by AtomicWriteFile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStart {
    Stream(i32),
    Record(i32),
}

/// AtomicWriteFile acknowledgement: where the write landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicWriteFileAck {
    pub start: FileStart,
}

impl AtomicWriteFileAck {
    /// Encode the acknowledgement body; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        match self.start {
            FileStart::Stream(pos) => encode_context_signed(buffer, 0, pos),
            FileStart::Record(pos) => encode_context_signed(buffer, 1, pos),
        };
        Ok(buffer.len() - start)
    }

    /// Decode the acknowledgement body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (start, used) = if decode_is_context_tag(data, 0) {
            let (pos, used) = decode_context_signed(data, 0)?;
            (FileStart::Stream(pos), used)
        } else {
            let (pos, used) = decode_context_signed(data, 1)?;
            (FileStart::Record(pos), used)
        };
        if used != data.len() {
            return Err(CodecError::InvalidLength);
        }
        Ok(Self { start })
    }
}

/// DeleteObject request: a single object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteObjectRequest {
    pub object_id: ObjectIdentifier,
}

impl DeleteObjectRequest {
    pub fn new(object_id: ObjectIdentifier) -> Self {
        Self { object_id }
    }

    /// Encode the service parameters; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        encode_application_object_id(buffer, self.object_id);
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (object_id, used) = crate::encoding::decode_application_object_id(data)?;
        if used != data.len() {
            return Err(CodecError::InvalidLength);
        }
        Ok(Self { object_id })
    }
}

/// ConfirmedPrivateTransfer error body: the class/code pair wrapped in
/// context tag 0, the transfer header, and optional vendor error
/// parameters in context tag 3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateTransferError {
    pub error: ErrorClassCode,
    pub vendor_id: u16,
    pub service_number: u32,
    pub error_parameters: Vec<u8>,
}

impl PrivateTransferError {
    /// Encode the error body; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        encode_opening_tag(buffer, 0);
        self.error.encode(buffer);
        encode_closing_tag(buffer, 0);
        encode_context_unsigned(buffer, 1, u32::from(self.vendor_id));
        encode_context_unsigned(buffer, 2, self.service_number);
        if !self.error_parameters.is_empty() {
            encode_opening_tag(buffer, 3);
            buffer.extend_from_slice(&self.error_parameters);
            encode_closing_tag(buffer, 3);
        }
        Ok(buffer.len() - start)
    }

    /// Decode the error body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        if !decode_is_opening_tag_number(data, 0) {
            return Err(CodecError::InvalidTag);
        }
        pos += 1;
        let (error, used) = ErrorClassCode::decode(&data[pos..])?;
        pos += used;
        if !decode_is_closing_tag_number(&data[pos..], 0) {
            return Err(CodecError::InvalidTag);
        }
        pos += 1;
        let (vendor_id, used) = decode_context_unsigned(&data[pos..], 1)?;
        pos += used;
        if vendor_id > u32::from(u16::MAX) {
            return Err(CodecError::OutOfRange);
        }
        let (service_number, used) = decode_context_unsigned(&data[pos..], 2)?;
        pos += used;
        let error_parameters = if pos < data.len() {
            if !decode_is_opening_tag_number(&data[pos..], 3) {
                return Err(CodecError::InvalidTag);
            }
            pos += 1;
            let body_start = pos;
            while !decode_is_closing_tag_number(&data[pos..], 3) {
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
            error,
            vendor_id: vendor_id as u16,
            service_number,
            error_parameters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "std"))]
    use alloc::vec;

    use crate::apdu::{ErrorClass, ErrorCode};
    use crate::encoding::{
        encode_application_character_string, encode_application_real, ApplicationValue,
        CharacterString, ObjectType,
    };

    fn device_260() -> ObjectIdentifier {
        ObjectIdentifier::device(260).unwrap()
    }

    #[test]
    fn read_property_literal() {
        let request = ReadPropertyRequest::new(device_260(), 77);
        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();
        assert_eq!(buf, [0x0C, 0x02, 0x00, 0x01, 0x04, 0x19, 0x4D]);
        assert_eq!(ReadPropertyRequest::decode(&buf).unwrap(), request);
    }

    #[test]
    fn read_property_with_index_round_trip() {
        let request = ReadPropertyRequest::with_array_index(device_260(), 76, 3);
        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();
        assert_eq!(ReadPropertyRequest::decode(&buf).unwrap(), request);
    }

    #[test]
    fn read_property_ack_sample_device_literal() {
        let mut value = Vec::new();
        encode_application_character_string(
            &mut value,
            &CharacterString::from_utf8("SampleDevice"),
        );
        let ack = ReadPropertyAck {
            object_id: device_260(),
            property_id: 77,
            array_index: None,
            value,
        };
        let mut buf = Vec::new();
        ack.encode(&mut buf).unwrap();
        assert_eq!(
            buf,
            [
                0x0C, 0x02, 0x00, 0x01, 0x04, 0x19, 0x4D, 0x3E, 0x75, 0x0D, 0x00, 0x53, 0x61,
                0x6D, 0x70, 0x6C, 0x65, 0x44, 0x65, 0x76, 0x69, 0x63, 0x65, 0x3F
            ]
        );
        let decoded = ReadPropertyAck::decode(&buf).unwrap();
        assert_eq!(decoded, ack);
        let (value, _) = ApplicationValue::decode(&decoded.value).unwrap();
        match value {
            ApplicationValue::CharacterString(s) => assert_eq!(s.as_utf8(), Some("SampleDevice")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn write_property_round_trip() {
        let mut value = Vec::new();
        encode_application_real(&mut value, 72.0);
        let request = WritePropertyRequest {
            object_id: ObjectIdentifier::new(ObjectType::AnalogValue, 1).unwrap(),
            property_id: 85,
            array_index: None,
            value,
            priority: Some(16),
        };
        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();
        assert_eq!(WritePropertyRequest::decode(&buf).unwrap(), request);
    }

    #[test]
    fn write_property_priority_validated() {
        let request = WritePropertyRequest {
            object_id: ObjectIdentifier::new(ObjectType::AnalogValue, 1).unwrap(),
            property_id: 85,
            array_index: None,
            value: vec![0x00],
            priority: Some(0),
        };
        let mut buf = Vec::new();
        assert_eq!(request.encode(&mut buf), Err(CodecError::OutOfRange));
    }

    #[test]
    fn rpm_request_round_trip() {
        let request = ReadPropertyMultipleRequest::new(vec![
            ReadAccessSpecification::new(
                device_260(),
                vec![PropertyReference::new(77), PropertyReference::new(28)],
            ),
            ReadAccessSpecification::new(
                ObjectIdentifier::new(ObjectType::AnalogInput, 1).unwrap(),
                vec![PropertyReference {
                    property_id: 85,
                    array_index: Some(1),
                }],
            ),
        ]);
        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();
        assert_eq!(ReadPropertyMultipleRequest::decode(&buf).unwrap(), request);
    }

    #[test]
    fn rpm_ack_mixed_results_round_trip() {
        let mut value = Vec::new();
        encode_application_real(&mut value, 20.7);
        let ack = ReadPropertyMultipleAck {
            results: vec![ReadAccessResult {
                object_id: ObjectIdentifier::new(ObjectType::AnalogInput, 1).unwrap(),
                results: vec![
                    PropertyAccessResult {
                        property_id: 85,
                        array_index: None,
                        result: ReadResult::Value(value),
                    },
                    PropertyAccessResult {
                        property_id: 1000,
                        array_index: None,
                        result: ReadResult::Error(ErrorClassCode::new(
                            ErrorClass::Property,
                            ErrorCode::UnknownProperty,
                        )),
                    },
                ],
            }],
        };
        let mut buf = Vec::new();
        ack.encode(&mut buf).unwrap();
        assert_eq!(ReadPropertyMultipleAck::decode(&buf).unwrap(), ack);
    }

    #[test]
    fn wpm_round_trip() {
        let mut value = Vec::new();
        encode_application_real(&mut value, 55.0);
        let request = WritePropertyMultipleRequest::new(vec![WriteAccessSpecification {
            object_id: ObjectIdentifier::new(ObjectType::AnalogValue, 2).unwrap(),
            values: vec![PropertyValue {
                property_id: 85,
                array_index: None,
                value,
                priority: Some(10),
            }],
        }]);
        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();
        assert_eq!(WritePropertyMultipleRequest::decode(&buf).unwrap(), request);
    }

    #[test]
    fn subscribe_cov_round_trip() {
        let request = SubscribeCovRequest::new(
            18,
            ObjectIdentifier::new(ObjectType::BinaryInput, 4).unwrap(),
            true,
            300,
        );
        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();
        assert_eq!(SubscribeCovRequest::decode(&buf).unwrap(), request);

        let cancel = SubscribeCovRequest::cancellation(
            18,
            ObjectIdentifier::new(ObjectType::BinaryInput, 4).unwrap(),
        );
        assert!(cancel.is_cancellation());
        buf.clear();
        cancel.encode(&mut buf).unwrap();
        assert_eq!(SubscribeCovRequest::decode(&buf).unwrap(), cancel);
    }

    #[test]
    fn reinitialize_device_round_trip() {
        let request = ReinitializeDeviceRequest {
            state: ReinitializedState::Warmstart,
            password: Some(CharacterString::from_utf8("hunter2")),
        };
        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();
        assert_eq!(ReinitializeDeviceRequest::decode(&buf).unwrap(), request);
    }

    #[test]
    fn reinitialize_password_length_enforced() {
        let request = ReinitializeDeviceRequest {
            state: ReinitializedState::Coldstart,
            password: Some(CharacterString::from_utf8(
                "this-password-is-way-too-long",
            )),
        };
        let mut buf = Vec::new();
        assert_eq!(request.encode(&mut buf), Err(CodecError::OutOfRange));
    }

    #[test]
    fn dcc_round_trip() {
        let request = DeviceCommunicationControlRequest {
            time_duration_minutes: Some(60),
            state: EnableDisable::Disable,
            password: Some(CharacterString::from_utf8("secret")),
        };
        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();
        assert_eq!(
            DeviceCommunicationControlRequest::decode(&buf).unwrap(),
            request
        );

        let bare = DeviceCommunicationControlRequest::new(EnableDisable::Enable);
        buf.clear();
        bare.encode(&mut buf).unwrap();
        assert_eq!(
            DeviceCommunicationControlRequest::decode(&buf).unwrap(),
            bare
        );
    }

    #[test]
    fn life_safety_operation_round_trip() {
        let request = LifeSafetyOperationRequest {
            process_id: 1,
            requesting_source: CharacterString::from_utf8("fire-panel-2"),
            operation: 4, // reset
            object_id: Some(ObjectIdentifier::new(ObjectType::LifeSafetyPoint, 9).unwrap()),
        };
        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();
        assert_eq!(LifeSafetyOperationRequest::decode(&buf).unwrap(), request);
    }

    #[test]
    fn atomic_read_file_round_trip() {
        let file = ObjectIdentifier::new(ObjectType::File, 1).unwrap();
        for access in [
            FileAccess::Stream {
                start: 0,
                count: 440,
            },
            FileAccess::Record { start: 14, count: 4 },
        ] {
            let request = AtomicReadFileRequest {
                file_id: file,
                access,
            };
            let mut buf = Vec::new();
            request.encode(&mut buf).unwrap();
            assert_eq!(AtomicReadFileRequest::decode(&buf).unwrap(), request);
        }
    }

    #[test]
    fn atomic_read_file_ack_round_trip() {
        let stream = AtomicReadFileAck {
            end_of_file: false,
            data: FileReadData::Stream {
                start: 0,
                data: vec![0x01, 0x02, 0x03],
            },
        };
        let mut buf = Vec::new();
        stream.encode(&mut buf).unwrap();
        assert_eq!(AtomicReadFileAck::decode(&buf).unwrap(), stream);

        let record = AtomicReadFileAck {
            end_of_file: true,
            data: FileReadData::Record {
                start: 2,
                records: vec![vec![0xAA], vec![0xBB, 0xCC]],
            },
        };
        buf.clear();
        record.encode(&mut buf).unwrap();
        assert_eq!(AtomicReadFileAck::decode(&buf).unwrap(), record);
    }

    #[test]
    fn atomic_write_file_round_trip() {
        let request = AtomicWriteFileRequest {
            file_id: ObjectIdentifier::new(ObjectType::File, 1).unwrap(),
            data: FileReadData::Stream {
                start: -1, // append
                data: vec![0x10, 0x20],
            },
        };
        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();
        assert_eq!(AtomicWriteFileRequest::decode(&buf).unwrap(), request);

        let ack = AtomicWriteFileAck {
            start: FileStart::Stream(128),
        };
        buf.clear();
        ack.encode(&mut buf).unwrap();
        assert_eq!(AtomicWriteFileAck::decode(&buf).unwrap(), ack);
    }

    #[test]
    fn delete_object_round_trip() {
        let request =
            DeleteObjectRequest::new(ObjectIdentifier::new(ObjectType::Schedule, 3).unwrap());
        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();
        assert_eq!(DeleteObjectRequest::decode(&buf).unwrap(), request);
    }

    #[test]
    fn private_transfer_error_round_trip() {
        let error = PrivateTransferError {
            error: ErrorClassCode::new(ErrorClass::Services, ErrorCode::ServiceRequestDenied),
            vendor_id: 260,
            service_number: 7,
            error_parameters: vec![0x21, 0x05],
        };
        let mut buf = Vec::new();
        error.encode(&mut buf).unwrap();
        assert_eq!(PrivateTransferError::decode(&buf).unwrap(), error);
    }
}
