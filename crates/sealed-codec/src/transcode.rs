use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;

/// Conversion between a typed value and the plaintext bytes that get sealed
/// or indexed.
pub trait Transcode: Sized {
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError>;

    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError>;
}

impl Transcode for String {
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(self.as_bytes().to_vec())
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        String::from_utf8(bytes.to_vec())
            .map_err(|error| CodecError::Transcode(format!("invalid utf8: {error}")))
    }
}

impl Transcode for Vec<u8> {
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(self.clone())
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(bytes.to_vec())
    }
}

impl Transcode for i64 {
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(self.to_le_bytes().to_vec())
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(i64::from_le_bytes(fixed::<8>(bytes, "i64")?))
    }
}

impl Transcode for f64 {
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(self.to_le_bytes().to_vec())
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(f64::from_le_bytes(fixed::<8>(bytes, "f64")?))
    }
}

impl Transcode for bool {
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(vec![u8::from(*self)])
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        match bytes {
            [0] => Ok(false),
            [1] => Ok(true),
            other => Err(CodecError::Transcode(format!(
                "invalid bool encoding {other:?}"
            ))),
        }
    }
}

const TIME_ENCODING_VERSION: u8 = 0x01;

/// `0x01 || unix seconds (i64 BE) || subsecond nanos (u32 BE)`
impl Transcode for DateTime<Utc> {
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(13);
        out.push(TIME_ENCODING_VERSION);
        out.extend_from_slice(&self.timestamp().to_be_bytes());
        out.extend_from_slice(&self.timestamp_subsec_nanos().to_be_bytes());
        Ok(out)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let raw = fixed::<13>(bytes, "time")?;
        let (version, rest) = raw.split_at(1);
        if version != [TIME_ENCODING_VERSION] {
            return Err(CodecError::Transcode(format!(
                "unsupported time encoding version {version:?}"
            )));
        }
        let (secs, nanos) = rest.split_at(8);
        let secs = i64::from_be_bytes(fixed::<8>(secs, "time seconds")?);
        let nanos = u32::from_be_bytes(fixed::<4>(nanos, "time nanos")?);
        DateTime::from_timestamp(secs, nanos)
            .ok_or_else(|| CodecError::Transcode(format!("time out of range: {secs}.{nanos}")))
    }
}

/// Wrapper that seals any serde value as a self-describing CBOR frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<T>(pub T);

impl<T> Transcode for Record<T>
where
    T: Serialize + DeserializeOwned,
{
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        ciborium::into_writer(&self.0, &mut out)
            .map_err(|error| CodecError::Transcode(format!("cbor encode: {error}")))?;
        Ok(out)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        ciborium::from_reader(bytes)
            .map(Record)
            .map_err(|error| CodecError::Transcode(format!("cbor decode: {error}")))
    }
}

fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N], CodecError> {
    bytes.try_into().map_err(|_| {
        CodecError::Transcode(format!(
            "{what}: expected {N} bytes, got {}",
            bytes.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde::{Deserialize, Serialize};

    use super::{Record, Transcode};
    use crate::CodecError;

    #[test]
    fn scalars_use_fixed_little_endian_layouts() {
        assert_eq!(42i64.to_bytes().expect("i64"), 42i64.to_le_bytes().to_vec());
        assert_eq!(1.5f64.to_bytes().expect("f64"), 1.5f64.to_le_bytes().to_vec());
        assert_eq!(true.to_bytes().expect("bool"), vec![1]);
        assert_eq!(false.to_bytes().expect("bool"), vec![0]);
    }

    #[test]
    fn bool_rejects_non_canonical_bytes() {
        assert!(matches!(
            bool::from_bytes(&[2]),
            Err(CodecError::Transcode(_))
        ));
    }

    #[test]
    fn time_keeps_nanosecond_precision() {
        let dob = Utc
            .with_ymd_and_hms(1987, 6, 5, 4, 3, 2)
            .single()
            .expect("valid date")
            + chrono::Duration::nanoseconds(123_456_789);
        let bytes = dob.to_bytes().expect("encode");
        assert_eq!(bytes.len(), 13);
        assert_eq!(
            chrono::DateTime::<Utc>::from_bytes(&bytes).expect("decode"),
            dob
        );
    }

    #[test]
    fn truncated_integer_is_rejected() {
        assert!(matches!(
            i64::from_bytes(&[1, 2, 3]),
            Err(CodecError::Transcode(message)) if message.contains("expected 8 bytes")
        ));
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Address {
        street: String,
        number: u32,
    }

    #[test]
    fn records_use_self_describing_frames() {
        let record = Record(Address {
            street: "Main".to_string(),
            number: 7,
        });
        let bytes = record.to_bytes().expect("encode");
        let decoded = Record::<Address>::from_bytes(&bytes).expect("decode");
        assert_eq!(decoded.0, record.0);
        assert!(Record::<Address>::from_bytes(b"\xff").is_err());
    }
}
