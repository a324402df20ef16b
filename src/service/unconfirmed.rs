//! Unconfirmed service codecs: device discovery (Who-Is/I-Am,
//! Who-Has/I-Have, Who-Am-I/You-Are), COV notification, and time
//! synchronisation.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::apdu::Segmentation;
use crate::encoding::{
    decode_application_character_string, decode_application_enumerated,
    decode_application_object_id, decode_application_octet_string, decode_application_unsigned,
    decode_context_object_id, decode_context_unsigned, decode_is_closing_tag_number,
    decode_is_context_tag, decode_is_opening_tag_number, encode_application_character_string,
    encode_application_date,
    encode_application_enumerated, encode_application_object_id,
    encode_application_octet_string, encode_application_time, encode_application_unsigned,
    encode_closing_tag, encode_context_character_string, encode_context_object_id,
    encode_context_unsigned, encode_opening_tag, CharacterString, CodecError, Date,
    ObjectIdentifier, ObjectType, Result, Time, MAX_INSTANCE,
};

use super::PropertyValue;

/// Who-Is: ask devices (optionally within an instance range) to announce
/// themselves with I-Am. The two limits appear together or not at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WhoIsRequest {
    pub low_limit: Option<u32>,
    pub high_limit: Option<u32>,
}

impl WhoIsRequest {
    /// Who-Is for every device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Who-Is for a single device instance.
    pub fn for_device(instance: u32) -> Self {
        Self {
            low_limit: Some(instance),
            high_limit: Some(instance),
        }
    }

    /// Who-Is for an inclusive instance range.
    pub fn for_range(low: u32, high: u32) -> Self {
        Self {
            low_limit: Some(low),
            high_limit: Some(high),
        }
    }

    /// Encode the service parameters; an unlimited Who-Is has none.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        match (self.low_limit, self.high_limit) {
            (None, None) => {}
            (Some(low), Some(high)) => {
                if low > MAX_INSTANCE || high > MAX_INSTANCE || low > high {
                    return Err(CodecError::OutOfRange);
                }
                encode_context_unsigned(buffer, 0, low);
                encode_context_unsigned(buffer, 1, high);
            }
            _ => return Err(CodecError::OutOfRange),
        }
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Ok(Self::new());
        }
        let (low, used) = decode_context_unsigned(data, 0)?;
        let (high, used2) = decode_context_unsigned(&data[used..], 1)?;
        if used + used2 != data.len() {
            return Err(CodecError::InvalidLength);
        }
        if low > MAX_INSTANCE || high > MAX_INSTANCE || low > high {
            return Err(CodecError::OutOfRange);
        }
        Ok(Self {
            low_limit: Some(low),
            high_limit: Some(high),
        })
    }

    /// Should a device with this instance respond?
    pub fn matches(&self, instance: u32) -> bool {
        match (self.low_limit, self.high_limit) {
            (Some(low), Some(high)) => (low..=high).contains(&instance),
            _ => true,
        }
    }
}

/// I-Am: a device's announcement of its identity and APDU capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IAmRequest {
    pub device_id: ObjectIdentifier,
    pub max_apdu: u16,
    pub segmentation: Segmentation,
    pub vendor_id: u16,
}

impl IAmRequest {
    pub fn new(
        device_id: ObjectIdentifier,
        max_apdu: u16,
        segmentation: Segmentation,
        vendor_id: u16,
    ) -> Self {
        Self {
            device_id,
            max_apdu,
            segmentation,
            vendor_id,
        }
    }

    /// Encode the service parameters; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        if self.device_id.object_type != ObjectType::Device {
            return Err(CodecError::OutOfRange);
        }
        let start = buffer.len();
        encode_application_object_id(buffer, self.device_id);
        encode_application_unsigned(buffer, u32::from(self.max_apdu));
        encode_application_enumerated(buffer, self.segmentation as u32);
        encode_application_unsigned(buffer, u32::from(self.vendor_id));
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let (device_id, used) = decode_application_object_id(data)?;
        pos += used;
        if device_id.object_type != ObjectType::Device {
            return Err(CodecError::OutOfRange);
        }
        let (max_apdu, used) = decode_application_unsigned(&data[pos..])?;
        pos += used;
        if max_apdu > u32::from(u16::MAX) {
            return Err(CodecError::OutOfRange);
        }
        let (segmentation, used) = decode_application_enumerated(&data[pos..])?;
        pos += used;
        let (vendor_id, used) = decode_application_unsigned(&data[pos..])?;
        pos += used;
        if vendor_id > u32::from(u16::MAX) || pos != data.len() {
            return Err(CodecError::OutOfRange);
        }
        Ok(Self {
            device_id,
            max_apdu: max_apdu as u16,
            segmentation: Segmentation::try_from(segmentation)?,
            vendor_id: vendor_id as u16,
        })
    }
}

/// The object selector of a Who-Has request: exactly one of identifier or
/// name is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhoHasObject {
    Id(ObjectIdentifier),
    Name(CharacterString),
}

/// Who-Has: ask which device hosts a given object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoHasRequest {
    pub low_limit: Option<u32>,
    pub high_limit: Option<u32>,
    pub object: WhoHasObject,
}

impl WhoHasRequest {
    /// Who-Has by object identifier, no device range.
    pub fn for_object(id: ObjectIdentifier) -> Self {
        Self {
            low_limit: None,
            high_limit: None,
            object: WhoHasObject::Id(id),
        }
    }

    /// Who-Has by object name, no device range.
    pub fn for_name(name: CharacterString) -> Self {
        Self {
            low_limit: None,
            high_limit: None,
            object: WhoHasObject::Name(name),
        }
    }

    /// Encode the service parameters; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        match (self.low_limit, self.high_limit) {
            (None, None) => {}
            (Some(low), Some(high)) => {
                if low > MAX_INSTANCE || high > MAX_INSTANCE || low > high {
                    return Err(CodecError::OutOfRange);
                }
                encode_context_unsigned(buffer, 0, low);
                encode_context_unsigned(buffer, 1, high);
            }
            _ => return Err(CodecError::OutOfRange),
        }
        match &self.object {
            WhoHasObject::Id(id) => {
                encode_context_object_id(buffer, 2, *id);
            }
            WhoHasObject::Name(name) => {
                encode_context_character_string(buffer, 3, name);
            }
        }
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters, enforcing that exactly one selector
    /// is present.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let (low_limit, high_limit) = if decode_is_context_tag(data, 0) {
            let (low, used) = decode_context_unsigned(data, 0)?;
            pos += used;
            let (high, used) = decode_context_unsigned(&data[pos..], 1)?;
            pos += used;
            if low > MAX_INSTANCE || high > MAX_INSTANCE || low > high {
                return Err(CodecError::OutOfRange);
            }
            (Some(low), Some(high))
        } else {
            (None, None)
        };

        let object = if decode_is_context_tag(&data[pos..], 2) {
            let (id, used) = decode_context_object_id(&data[pos..], 2)?;
            pos += used;
            WhoHasObject::Id(id)
        } else {
            let (name, used) =
                crate::encoding::decode_context_character_string(&data[pos..], 3)?;
            pos += used;
            WhoHasObject::Name(name)
        };

        if pos != data.len() {
            return Err(CodecError::InvalidLength);
        }

        Ok(Self {
            low_limit,
            high_limit,
            object,
        })
    }
}

/// I-Have: the answer to Who-Has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IHaveRequest {
    pub device_id: ObjectIdentifier,
    pub object_id: ObjectIdentifier,
    pub object_name: CharacterString,
}

impl IHaveRequest {
    /// Encode the service parameters; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        if self.device_id.object_type != ObjectType::Device {
            return Err(CodecError::OutOfRange);
        }
        let start = buffer.len();
        encode_application_object_id(buffer, self.device_id);
        encode_application_object_id(buffer, self.object_id);
        encode_application_character_string(buffer, &self.object_name);
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (device_id, used) = decode_application_object_id(data)?;
        let (object_id, used2) = decode_application_object_id(&data[used..])?;
        let (object_name, used3) =
            decode_application_character_string(&data[used + used2..])?;
        if used + used2 + used3 != data.len() {
            return Err(CodecError::InvalidLength);
        }
        if device_id.object_type != ObjectType::Device {
            return Err(CodecError::OutOfRange);
        }
        Ok(Self {
            device_id,
            object_id,
            object_name,
        })
    }
}

/// COV notification, used both confirmed (choice 1) and unconfirmed
/// (choice 2); the wire shape is identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CovNotificationRequest {
    /// The subscriber's process identifier
    pub process_id: u32,
    pub device_id: ObjectIdentifier,
    pub object_id: ObjectIdentifier,
    /// Seconds left on the subscription
    pub time_remaining: u32,
    pub values: Vec<PropertyValue>,
}

impl CovNotificationRequest {
    /// Encode the service parameters; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        encode_context_unsigned(buffer, 0, self.process_id);
        encode_context_object_id(buffer, 1, self.device_id);
        encode_context_object_id(buffer, 2, self.object_id);
        encode_context_unsigned(buffer, 3, self.time_remaining);
        encode_opening_tag(buffer, 4);
        for value in &self.values {
            value.encode(buffer)?;
        }
        encode_closing_tag(buffer, 4);
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let (process_id, used) = decode_context_unsigned(data, 0)?;
        pos += used;
        let (device_id, used) = decode_context_object_id(&data[pos..], 1)?;
        pos += used;
        let (object_id, used) = decode_context_object_id(&data[pos..], 2)?;
        pos += used;
        let (time_remaining, used) = decode_context_unsigned(&data[pos..], 3)?;
        pos += used;

        if !decode_is_opening_tag_number(&data[pos..], 4) {
            return Err(CodecError::InvalidTag);
        }
        pos += 1;
        let mut values = Vec::new();
        while !decode_is_closing_tag_number(&data[pos..], 4) {
            let (value, used) = PropertyValue::decode(&data[pos..])?;
            pos += used;
            values.push(value);
        }
        pos += 1;

        if pos != data.len() {
            return Err(CodecError::InvalidLength);
        }

        Ok(Self {
            process_id,
            device_id,
            object_id,
            time_remaining,
            values,
        })
    }
}

/// Time-Synchronization and UTC-Time-Synchronization payload: a date and
/// a time, application tagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSynchronizationRequest {
    pub date: Date,
    pub time: Time,
}

impl TimeSynchronizationRequest {
    pub fn new(date: Date, time: Time) -> Self {
        Self { date, time }
    }

    /// Current local wall-clock time, for the Time-Synchronization choice.
    #[cfg(feature = "std")]
    pub fn local_now() -> Self {
        let now = chrono::Local::now().naive_local();
        Self {
            date: now.date().into(),
            time: now.time().into(),
        }
    }

    /// Current UTC time, for the UTC-Time-Synchronization choice.
    #[cfg(feature = "std")]
    pub fn utc_now() -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            date: now.date().into(),
            time: now.time().into(),
        }
    }

    /// Encode the service parameters; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        encode_application_date(buffer, &self.date);
        encode_application_time(buffer, &self.time);
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (date, used) = crate::encoding::decode_application_date(data)?;
        let (time, used2) = crate::encoding::decode_application_time(&data[used..])?;
        if used + used2 != data.len() {
            return Err(CodecError::InvalidLength);
        }
        Ok(Self { date, time })
    }
}

/// Who-Am-I (135-2020): an unconfigured device asks to be assigned an
/// identity, naming its vendor, model, and serial number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoAmIRequest {
    pub vendor_id: u16,
    pub model_name: CharacterString,
    pub serial_number: CharacterString,
}

impl WhoAmIRequest {
    /// Encode the service parameters; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        encode_application_unsigned(buffer, u32::from(self.vendor_id));
        encode_application_character_string(buffer, &self.model_name);
        encode_application_character_string(buffer, &self.serial_number);
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (vendor_id, used) = decode_application_unsigned(data)?;
        if vendor_id > u32::from(u16::MAX) {
            return Err(CodecError::OutOfRange);
        }
        let (model_name, used2) = decode_application_character_string(&data[used..])?;
        let (serial_number, used3) =
            decode_application_character_string(&data[used + used2..])?;
        if used + used2 + used3 != data.len() {
            return Err(CodecError::InvalidLength);
        }
        Ok(Self {
            vendor_id: vendor_id as u16,
            model_name,
            serial_number,
        })
    }
}

/// You-Are (135-2020): assigns a device identity (and optionally a MAC
/// address) to the device matching vendor, model, and serial number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YouAreRequest {
    pub vendor_id: u16,
    pub model_name: CharacterString,
    pub serial_number: CharacterString,
    pub device_id: Option<ObjectIdentifier>,
    pub mac_address: Option<Vec<u8>>,
}

impl YouAreRequest {
    /// Encode the service parameters; returns octets written.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let start = buffer.len();
        encode_application_unsigned(buffer, u32::from(self.vendor_id));
        encode_application_character_string(buffer, &self.model_name);
        encode_application_character_string(buffer, &self.serial_number);
        if let Some(device_id) = self.device_id {
            encode_application_object_id(buffer, device_id);
        }
        if let Some(ref mac) = self.mac_address {
            encode_application_octet_string(buffer, mac);
        }
        Ok(buffer.len() - start)
    }

    /// Decode the service parameters.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let (vendor_id, used) = decode_application_unsigned(data)?;
        pos += used;
        if vendor_id > u32::from(u16::MAX) {
            return Err(CodecError::OutOfRange);
        }
        let (model_name, used) = decode_application_character_string(&data[pos..])?;
        pos += used;
        let (serial_number, used) = decode_application_character_string(&data[pos..])?;
        pos += used;

        let device_id = if pos < data.len() {
            match decode_application_object_id(&data[pos..]) {
                Ok((id, used)) => {
                    pos += used;
                    Some(id)
                }
                Err(_) => None,
            }
        } else {
            None
        };

        let mac_address = if pos < data.len() {
            let (mac, used) = decode_application_octet_string(&data[pos..])?;
            pos += used;
            Some(mac)
        } else {
            None
        };

        if pos != data.len() {
            return Err(CodecError::InvalidLength);
        }

        Ok(Self {
            vendor_id: vendor_id as u16,
            model_name,
            serial_number,
            device_id,
            mac_address,
        })
    }
}
