//! Application value types: the closed sum over BACnet primitives plus the
//! composite date, time, string, and object-identifier types they carry.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

#[cfg(feature = "std")]
use std::borrow::Cow;

#[cfg(not(feature = "std"))]
use alloc::borrow::Cow;

use super::{
    decode_bit_string_body, decode_character_string_body, decode_date_body, decode_double_body,
    decode_object_id_body, decode_real_body, decode_tag_number_and_value, decode_time_body,
    decode_unsigned, encode_application_bit_string, encode_application_boolean,
    encode_application_character_string, encode_application_date, encode_application_double,
    encode_application_enumerated, encode_application_null, encode_application_object_id,
    encode_application_octet_string, encode_application_real, encode_application_signed,
    encode_application_time, encode_application_unsigned, ApplicationTag, CodecError, Result,
    TagForm,
};
use crate::generate_custom_enum;

/// Octet value meaning "unspecified" in date and time fields.
pub const DATE_TIME_UNSPECIFIED: u8 = 0xFF;

/// Day-of-month pattern: last day of the month.
pub const DATE_DAY_LAST: u8 = 32;
/// Day-of-month pattern: odd days only.
pub const DATE_DAY_ODD: u8 = 33;
/// Day-of-month pattern: even days only.
pub const DATE_DAY_EVEN: u8 = 34;
/// Month pattern: odd months only.
pub const DATE_MONTH_ODD: u8 = 13;
/// Month pattern: even months only.
pub const DATE_MONTH_EVEN: u8 = 14;

generate_custom_enum! {
    /// BACnet object types. Standard types are named; 128..=1023 is the
    /// vendor-proprietary range of the 10-bit type field.
    ObjectType {
        AnalogInput = 0,
        AnalogOutput = 1,
        AnalogValue = 2,
        BinaryInput = 3,
        BinaryOutput = 4,
        BinaryValue = 5,
        Calendar = 6,
        Command = 7,
        Device = 8,
        EventEnrollment = 9,
        File = 10,
        Group = 11,
        Loop = 12,
        MultiStateInput = 13,
        MultiStateOutput = 14,
        NotificationClass = 15,
        Program = 16,
        Schedule = 17,
        Averaging = 18,
        MultiStateValue = 19,
        TrendLog = 20,
        LifeSafetyPoint = 21,
        LifeSafetyZone = 22,
        Accumulator = 23,
        PulseConverter = 24,
        EventLog = 25,
        TrendLogMultiple = 27,
        LoadControl = 28,
        StructuredView = 29,
        AccessDoor = 30,
        NetworkPort = 56,
    },
    u16,
    128..=1023
}

/// A 32-bit BACnet object identifier: 10-bit type, 22-bit instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectIdentifier {
    pub object_type: ObjectType,
    pub instance: u32,
}

/// Largest legal object instance number (22 bits).
pub const MAX_INSTANCE: u32 = 0x3F_FFFF;

impl ObjectIdentifier {
    /// Construct an identifier, rejecting instances beyond 22 bits and
    /// type codes beyond 10 bits.
    pub fn new(object_type: ObjectType, instance: u32) -> Result<Self> {
        if instance > MAX_INSTANCE || u16::from(object_type) > 0x3FF {
            return Err(CodecError::OutOfRange);
        }
        Ok(Self {
            object_type,
            instance,
        })
    }

    /// The identifier used by a Device object with the given instance.
    pub fn device(instance: u32) -> Result<Self> {
        Self::new(ObjectType::Device, instance)
    }
}

impl From<ObjectIdentifier> for u32 {
    fn from(id: ObjectIdentifier) -> u32 {
        (u32::from(u16::from(id.object_type)) << 22) | (id.instance & MAX_INSTANCE)
    }
}

impl From<u32> for ObjectIdentifier {
    fn from(raw: u32) -> Self {
        Self {
            object_type: ObjectType::from((raw >> 22) as u16),
            instance: raw & MAX_INSTANCE,
        }
    }
}

/// Character set codes a character string may declare.
///
/// The stack carries the declared set end-to-end and never transcodes;
/// [`CharacterString::to_text`] offers a best-effort conversion for the
/// sets Rust can represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterSet {
    Utf8,
    Dbcs,
    JisX0208,
    Ucs4,
    Ucs2,
    Iso8859_1,
    Unknown(u8),
}

impl CharacterSet {
    /// Wire code of this character set.
    pub fn code(self) -> u8 {
        match self {
            CharacterSet::Utf8 => 0,
            CharacterSet::Dbcs => 1,
            CharacterSet::JisX0208 => 3,
            CharacterSet::Ucs4 => 4,
            CharacterSet::Ucs2 => 5,
            CharacterSet::Iso8859_1 => 6,
            CharacterSet::Unknown(code) => code,
        }
    }

    /// Total conversion from the wire code; unassigned codes are preserved
    /// as [`CharacterSet::Unknown`].
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => CharacterSet::Utf8,
            1 => CharacterSet::Dbcs,
            3 => CharacterSet::JisX0208,
            4 => CharacterSet::Ucs4,
            5 => CharacterSet::Ucs2,
            6 => CharacterSet::Iso8859_1,
            other => CharacterSet::Unknown(other),
        }
    }
}

/// A character string with its declared character set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterString {
    pub encoding: CharacterSet,
    pub data: Vec<u8>,
}

impl CharacterString {
    /// Build a UTF-8 string value.
    pub fn from_utf8(text: &str) -> Self {
        Self {
            encoding: CharacterSet::Utf8,
            data: text.as_bytes().to_vec(),
        }
    }

    /// Borrow the payload as UTF-8 text, if it is declared and valid UTF-8.
    pub fn as_utf8(&self) -> Option<&str> {
        if self.encoding == CharacterSet::Utf8 {
            core::str::from_utf8(&self.data).ok()
        } else {
            None
        }
    }

    /// Best-effort conversion to text for the sets Rust can represent
    /// (UTF-8, ISO 8859-1, UCS-2 big-endian). Returns `None` for DBCS,
    /// JIS X 0208, UCS-4, and unknown sets.
    pub fn to_text(&self) -> Option<Cow<'_, str>> {
        match self.encoding {
            CharacterSet::Utf8 => core::str::from_utf8(&self.data).ok().map(Cow::Borrowed),
            CharacterSet::Iso8859_1 => Some(encoding_rs::mem::decode_latin1(&self.data)),
            CharacterSet::Ucs2 => {
                let (text, _, had_errors) = encoding_rs::UTF_16BE.decode(&self.data);
                if had_errors {
                    None
                } else {
                    Some(text)
                }
            }
            _ => None,
        }
    }

    /// Payload length in octets (excluding the character-set octet).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A bit string: bits packed MSB-first with a trailing unused-bit count.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitString {
    /// Unused trailing bits in the final data octet (0..=7)
    pub unused_bits: u8,
    pub data: Vec<u8>,
}

impl BitString {
    /// Pack a bit slice MSB-first.
    pub fn from_bits(bits: &[bool]) -> Self {
        let mut data = Vec::with_capacity(bits.len().div_ceil(8));
        let mut current = 0u8;
        let mut filled = 0u8;
        for &bit in bits {
            if bit {
                current |= 1 << (7 - filled);
            }
            filled += 1;
            if filled == 8 {
                data.push(current);
                current = 0;
                filled = 0;
            }
        }
        let unused_bits = if filled == 0 {
            0
        } else {
            data.push(current);
            8 - filled
        };
        Self { unused_bits, data }
    }

    /// Build from raw octets, validating the unused-bit count.
    pub fn from_octets(unused_bits: u8, data: Vec<u8>) -> Result<Self> {
        if unused_bits > 7 || (data.is_empty() && unused_bits != 0) {
            return Err(CodecError::OutOfRange);
        }
        Ok(Self { unused_bits, data })
    }

    /// Number of significant bits.
    pub fn len(&self) -> usize {
        self.data.len() * 8 - self.unused_bits as usize
    }

    /// True when no bits are present.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read bit `index` (0 = first transmitted bit).
    pub fn bit(&self, index: usize) -> Option<bool> {
        if index >= self.len() {
            return None;
        }
        let octet = self.data[index / 8];
        Some(octet & (1 << (7 - (index % 8))) != 0)
    }
}

/// A BACnet date, stored in wire form. `year` is the offset from 1900;
/// 0xFF in any field means "unspecified". Month accepts the odd/even
/// patterns 13 and 14, day the last/odd/even patterns 32..=34.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Date {
    pub year: u8,
    pub month: u8,
    pub day: u8,
    /// 1 = Monday .. 7 = Sunday
    pub weekday: u8,
}

impl Date {
    /// A fully unspecified date (matches everything).
    pub const ANY: Date = Date {
        year: DATE_TIME_UNSPECIFIED,
        month: DATE_TIME_UNSPECIFIED,
        day: DATE_TIME_UNSPECIFIED,
        weekday: DATE_TIME_UNSPECIFIED,
    };

    /// Build a concrete date from a calendar year.
    pub fn from_ymd(year: u16, month: u8, day: u8, weekday: u8) -> Result<Self> {
        if !(1900..=2154).contains(&year) {
            return Err(CodecError::OutOfRange);
        }
        Ok(Self {
            year: (year - 1900) as u8,
            month,
            day,
            weekday,
        })
    }

    /// Calendar year, or `None` when unspecified.
    pub fn year(&self) -> Option<u16> {
        if self.year == DATE_TIME_UNSPECIFIED {
            None
        } else {
            Some(1900 + u16::from(self.year))
        }
    }

    /// Does this (possibly wildcarded) date match a concrete date?
    pub fn matches(&self, concrete: &Date) -> bool {
        let year_ok = self.year == DATE_TIME_UNSPECIFIED || self.year == concrete.year;
        let month_ok = match self.month {
            DATE_TIME_UNSPECIFIED => true,
            DATE_MONTH_ODD => concrete.month % 2 == 1,
            DATE_MONTH_EVEN => concrete.month % 2 == 0,
            m => m == concrete.month,
        };
        let day_ok = match self.day {
            DATE_TIME_UNSPECIFIED => true,
            DATE_DAY_ODD => concrete.day % 2 == 1,
            DATE_DAY_EVEN => concrete.day % 2 == 0,
            DATE_DAY_LAST => match (concrete.year(), concrete.month) {
                (Some(year), month @ 1..=12) => concrete.day == days_in_month(year, month),
                _ => false,
            },
            d => d == concrete.day,
        };
        let weekday_ok =
            self.weekday == DATE_TIME_UNSPECIFIED || self.weekday == concrete.weekday;
        year_ok && month_ok && day_ok && weekday_ok
    }
}

impl From<chrono::NaiveDate> for Date {
    fn from(date: chrono::NaiveDate) -> Self {
        use chrono::Datelike;
        let year = date.year().clamp(1900, 2154);
        Self {
            year: (year - 1900) as u8,
            month: date.month() as u8,
            day: date.day() as u8,
            weekday: date.weekday().number_from_monday() as u8,
        }
    }
}

fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
            if leap {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

/// A BACnet time of day in wire form; 0xFF in any field means
/// "unspecified". `hundredths` counts 1/100 s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub hundredths: u8,
}

impl Time {
    /// A fully unspecified time (matches everything).
    pub const ANY: Time = Time {
        hour: DATE_TIME_UNSPECIFIED,
        minute: DATE_TIME_UNSPECIFIED,
        second: DATE_TIME_UNSPECIFIED,
        hundredths: DATE_TIME_UNSPECIFIED,
    };

    /// Build a fully specified time.
    pub fn from_hms(hour: u8, minute: u8, second: u8, hundredths: u8) -> Result<Self> {
        if hour > 23 || minute > 59 || second > 59 || hundredths > 99 {
            return Err(CodecError::OutOfRange);
        }
        Ok(Self {
            hour,
            minute,
            second,
            hundredths,
        })
    }

    /// Does this (possibly wildcarded) time match a concrete time?
    pub fn matches(&self, concrete: &Time) -> bool {
        let field = |pattern: u8, value: u8| pattern == DATE_TIME_UNSPECIFIED || pattern == value;
        field(self.hour, concrete.hour)
            && field(self.minute, concrete.minute)
            && field(self.second, concrete.second)
            && field(self.hundredths, concrete.hundredths)
    }
}

impl From<chrono::NaiveTime> for Time {
    fn from(time: chrono::NaiveTime) -> Self {
        use chrono::Timelike;
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
            second: time.second() as u8,
            hundredths: (time.nanosecond() / 10_000_000).min(99) as u8,
        }
    }
}

/// The closed sum of BACnet application primitive values.
///
/// This is the type that flows through WriteProperty values and COV
/// notifications; [`ApplicationValue::decode`] dispatches on the
/// application tag of the next value in a buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplicationValue {
    Null,
    Boolean(bool),
    Unsigned(u32),
    Signed(i32),
    Real(f32),
    Double(f64),
    OctetString(Vec<u8>),
    CharacterString(CharacterString),
    BitString(BitString),
    Enumerated(u32),
    Date(Date),
    Time(Time),
    ObjectId(ObjectIdentifier),
}

impl ApplicationValue {
    /// Decode one application-tagged value.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let (tag, consumed) = decode_tag_number_and_value(data)?;
        if tag.context {
            return Err(CodecError::InvalidTag);
        }
        if matches!(tag.form, TagForm::Closing) {
            return Err(CodecError::UnexpectedEndOfFrame);
        }
        let app_tag = ApplicationTag::try_from(tag.number)?;
        let len = tag.value_len()?;
        let body = &data[consumed.min(data.len())..];

        let (value, body_len) = match app_tag {
            ApplicationTag::Null => {
                if len != 0 {
                    return Err(CodecError::InvalidLength);
                }
                (ApplicationValue::Null, 0)
            }
            ApplicationTag::Boolean => {
                // The value lives in the LVT field, not the body
                match len {
                    0 => (ApplicationValue::Boolean(false), 0),
                    1 => (ApplicationValue::Boolean(true), 0),
                    _ => return Err(CodecError::InvalidLength),
                }
            }
            ApplicationTag::UnsignedInt => {
                let (v, n) = decode_unsigned(body, len)?;
                (ApplicationValue::Unsigned(v), n)
            }
            ApplicationTag::SignedInt => {
                let (v, n) = super::decode_signed(body, len)?;
                (ApplicationValue::Signed(v), n)
            }
            ApplicationTag::Real => {
                if len != 4 {
                    return Err(CodecError::InvalidLength);
                }
                let (v, n) = decode_real_body(body)?;
                (ApplicationValue::Real(v), n)
            }
            ApplicationTag::Double => {
                if len != 8 {
                    return Err(CodecError::InvalidLength);
                }
                let (v, n) = decode_double_body(body)?;
                (ApplicationValue::Double(v), n)
            }
            ApplicationTag::OctetString => {
                if body.len() < len {
                    return Err(CodecError::Truncated);
                }
                (ApplicationValue::OctetString(body[..len].to_vec()), len)
            }
            ApplicationTag::CharacterString => {
                let (v, n) = decode_character_string_body(body, len)?;
                (ApplicationValue::CharacterString(v), n)
            }
            ApplicationTag::BitString => {
                let (v, n) = decode_bit_string_body(body, len)?;
                (ApplicationValue::BitString(v), n)
            }
            ApplicationTag::Enumerated => {
                let (v, n) = decode_unsigned(body, len)?;
                (ApplicationValue::Enumerated(v), n)
            }
            ApplicationTag::Date => {
                if len != 4 {
                    return Err(CodecError::InvalidLength);
                }
                let (v, n) = decode_date_body(body)?;
                (ApplicationValue::Date(v), n)
            }
            ApplicationTag::Time => {
                if len != 4 {
                    return Err(CodecError::InvalidLength);
                }
                let (v, n) = decode_time_body(body)?;
                (ApplicationValue::Time(v), n)
            }
            ApplicationTag::ObjectIdentifier => {
                if len != 4 {
                    return Err(CodecError::InvalidLength);
                }
                let (v, n) = decode_object_id_body(body)?;
                (ApplicationValue::ObjectId(v), n)
            }
        };

        Ok((value, consumed + body_len))
    }

    /// Encode with the matching application tag; returns octets written.
    pub fn encode_application(&self, buffer: &mut Vec<u8>) -> usize {
        match self {
            ApplicationValue::Null => encode_application_null(buffer),
            ApplicationValue::Boolean(v) => encode_application_boolean(buffer, *v),
            ApplicationValue::Unsigned(v) => encode_application_unsigned(buffer, *v),
            ApplicationValue::Signed(v) => encode_application_signed(buffer, *v),
            ApplicationValue::Real(v) => encode_application_real(buffer, *v),
            ApplicationValue::Double(v) => encode_application_double(buffer, *v),
            ApplicationValue::OctetString(v) => encode_application_octet_string(buffer, v),
            ApplicationValue::CharacterString(v) => {
                encode_application_character_string(buffer, v)
            }
            ApplicationValue::BitString(v) => encode_application_bit_string(buffer, v),
            ApplicationValue::Enumerated(v) => encode_application_enumerated(buffer, *v),
            ApplicationValue::Date(v) => encode_application_date(buffer, v),
            ApplicationValue::Time(v) => encode_application_time(buffer, v),
            ApplicationValue::ObjectId(v) => encode_application_object_id(buffer, *v),
        }
    }

    /// Application tag of this value.
    pub fn tag(&self) -> ApplicationTag {
        match self {
            ApplicationValue::Null => ApplicationTag::Null,
            ApplicationValue::Boolean(_) => ApplicationTag::Boolean,
            ApplicationValue::Unsigned(_) => ApplicationTag::UnsignedInt,
            ApplicationValue::Signed(_) => ApplicationTag::SignedInt,
            ApplicationValue::Real(_) => ApplicationTag::Real,
            ApplicationValue::Double(_) => ApplicationTag::Double,
            ApplicationValue::OctetString(_) => ApplicationTag::OctetString,
            ApplicationValue::CharacterString(_) => ApplicationTag::CharacterString,
            ApplicationValue::BitString(_) => ApplicationTag::BitString,
            ApplicationValue::Enumerated(_) => ApplicationTag::Enumerated,
            ApplicationValue::Date(_) => ApplicationTag::Date,
            ApplicationValue::Time(_) => ApplicationTag::Time,
            ApplicationValue::ObjectId(_) => ApplicationTag::ObjectIdentifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "std"))]
    use alloc::vec;
    #[cfg(not(feature = "std"))]
    use alloc::vec::Vec;

    #[test]
    fn object_type_vendor_range() {
        assert_eq!(ObjectType::from(8u16), ObjectType::Device);
        assert!(matches!(ObjectType::from(200u16), ObjectType::Custom(_)));
        assert!(matches!(ObjectType::from(1023u16), ObjectType::Custom(_)));
        assert!(matches!(ObjectType::from(26u16), ObjectType::Reserved(_)));
    }

    #[test]
    fn charset_codes_round_trip() {
        for code in 0u8..=10 {
            assert_eq!(CharacterSet::from_code(code).code(), code);
        }
    }

    #[test]
    fn latin1_text_conversion() {
        let s = CharacterString {
            encoding: CharacterSet::Iso8859_1,
            data: vec![0x47, 0x72, 0xFC, 0x6E],
        };
        assert_eq!(s.to_text().unwrap(), "Grün");
        assert_eq!(s.as_utf8(), None);
    }

    #[test]
    fn ucs2_text_conversion() {
        let s = CharacterString {
            encoding: CharacterSet::Ucs2,
            data: vec![0x00, 0x41, 0x00, 0x42],
        };
        assert_eq!(s.to_text().unwrap(), "AB");
    }

    #[test]
    fn date_wildcard_matching() {
        let pattern = Date {
            year: DATE_TIME_UNSPECIFIED,
            month: DATE_MONTH_ODD,
            day: DATE_DAY_LAST,
            weekday: DATE_TIME_UNSPECIFIED,
        };
        let jan31 = Date::from_ymd(2024, 1, 31, 3).unwrap();
        let jan30 = Date::from_ymd(2024, 1, 30, 2).unwrap();
        let feb29 = Date::from_ymd(2024, 2, 29, 4).unwrap();
        assert!(pattern.matches(&jan31));
        assert!(!pattern.matches(&jan30));
        // February is even, fails the month pattern even though 29 is last
        assert!(!pattern.matches(&feb29));
        assert!(Date::ANY.matches(&jan30));
    }

    #[test]
    fn time_wildcard_matching() {
        let pattern = Time {
            hour: 12,
            minute: DATE_TIME_UNSPECIFIED,
            second: DATE_TIME_UNSPECIFIED,
            hundredths: DATE_TIME_UNSPECIFIED,
        };
        assert!(pattern.matches(&Time::from_hms(12, 30, 1, 0).unwrap()));
        assert!(!pattern.matches(&Time::from_hms(13, 30, 1, 0).unwrap()));
    }

    #[test]
    fn chrono_conversions() {
        let date: Date = chrono::NaiveDate::from_ymd_opt(2024, 7, 15).unwrap().into();
        assert_eq!(date.year(), Some(2024));
        assert_eq!(date.month, 7);
        assert_eq!(date.day, 15);
        assert_eq!(date.weekday, 1); // a Monday

        let time: Time = chrono::NaiveTime::from_hms_milli_opt(8, 45, 30, 250)
            .unwrap()
            .into();
        assert_eq!(
            time,
            Time {
                hour: 8,
                minute: 45,
                second: 30,
                hundredths: 25
            }
        );
    }

    #[test]
    fn application_value_round_trip() {
        let values = [
            ApplicationValue::Null,
            ApplicationValue::Boolean(true),
            ApplicationValue::Unsigned(4_200_000),
            ApplicationValue::Signed(-77),
            ApplicationValue::Real(72.5),
            ApplicationValue::Double(-1.5e12),
            ApplicationValue::OctetString(vec![0xDE, 0xAD, 0xBE, 0xEF]),
            ApplicationValue::CharacterString(CharacterString::from_utf8("lobby")),
            ApplicationValue::BitString(BitString::from_bits(&[true, true, false])),
            ApplicationValue::Enumerated(3),
            ApplicationValue::Date(Date::from_ymd(2026, 8, 1, 6).unwrap()),
            ApplicationValue::Time(Time::from_hms(23, 59, 59, 99).unwrap()),
            ApplicationValue::ObjectId(
                ObjectIdentifier::new(ObjectType::AnalogInput, 42).unwrap(),
            ),
        ];

        for value in values {
            let mut buf = Vec::new();
            let written = value.encode_application(&mut buf);
            assert_eq!(written, buf.len());
            let (decoded, consumed) = ApplicationValue::decode(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn decode_rejects_context_tag() {
        let buf = [0x19, 0x4D];
        assert_eq!(
            ApplicationValue::decode(&buf),
            Err(CodecError::InvalidTag)
        );
    }
}
