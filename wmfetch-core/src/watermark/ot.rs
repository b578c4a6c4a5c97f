use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;

/// Size of an encoded [OTValue], offset followed by watermark.
pub const OT_VALUE_LEN: usize = 16;

/// OTValue is the value stored in the OT bucket by a processor for every watermark it publishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OTValue {
    pub offset: i64,
    pub watermark: i64,
}

/// Decodes the little-endian `offset, watermark` layout. Trailing bytes are ignored.
impl TryFrom<Bytes> for OTValue {
    type Error = Error;

    fn try_from(mut bytes: Bytes) -> Result<Self, Self::Error> {
        if bytes.remaining() < OT_VALUE_LEN {
            return Err(Error::Decode(format!(
                "OT value needs {} bytes, got {}",
                OT_VALUE_LEN,
                bytes.remaining()
            )));
        }

        let offset = bytes.get_i64_le();
        let watermark = bytes.get_i64_le();
        Ok(OTValue { offset, watermark })
    }
}

impl From<OTValue> for Bytes {
    fn from(value: OTValue) -> Self {
        let mut bytes = BytesMut::with_capacity(OT_VALUE_LEN);
        bytes.put_i64_le(value.offset);
        bytes.put_i64_le(value.watermark);
        bytes.freeze()
    }
}
