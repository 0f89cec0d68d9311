//! The `valLen`/`valRaw` value encoding shared by change-op and doc-op
//! columns: a length/type-tagged column paired with a raw-bytes column.

use smol_str::SmolStr;

use super::encoding::{
    lebsize, ulebsize, DecodeError, RawDecoder, RawEncoder, RleDecoder, RleEncoder,
};
use crate::types::ScalarValue;

const TAG_NULL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_ULEB: u8 = 3;
const TAG_SLEB: u8 = 4;
const TAG_FLOAT: u8 = 5;
const TAG_STR: u8 = 6;
const TAG_BYTES: u8 = 7;
const TAG_COUNTER: u8 = 8;
const TAG_TIMESTAMP: u8 = 9;

fn f64_fits_f32(v: f64) -> bool {
    (v as f32) as f64 == v
}

/// Encodes one scalar's raw bytes and returns its type tag. Used to build
/// both the `valLen` entry (`byteLength << 4 | tag`) and the `valRaw` bytes.
fn encode_raw(value: &ScalarValue) -> (u8, Vec<u8>) {
    match value {
        ScalarValue::Null => (TAG_NULL, vec![]),
        ScalarValue::Bool(false) => (TAG_FALSE, vec![]),
        ScalarValue::Bool(true) => (TAG_TRUE, vec![]),
        ScalarValue::Uint(u) => {
            let mut buf = Vec::with_capacity(ulebsize(*u) as usize);
            leb128::write::unsigned(&mut buf, *u).expect("write to Vec cannot fail");
            (TAG_ULEB, buf)
        }
        ScalarValue::Int(i) => {
            let mut buf = Vec::with_capacity(lebsize(*i) as usize);
            leb128::write::signed(&mut buf, *i).expect("write to Vec cannot fail");
            (TAG_SLEB, buf)
        }
        ScalarValue::Counter(i) => {
            let mut buf = Vec::new();
            leb128::write::signed(&mut buf, *i).expect("write to Vec cannot fail");
            (TAG_COUNTER, buf)
        }
        ScalarValue::Timestamp(i) => {
            let mut buf = Vec::new();
            leb128::write::signed(&mut buf, *i).expect("write to Vec cannot fail");
            (TAG_TIMESTAMP, buf)
        }
        ScalarValue::F64(f) => {
            if f64_fits_f32(*f) {
                (TAG_FLOAT, (*f as f32).to_le_bytes().to_vec())
            } else {
                (TAG_FLOAT, f.to_le_bytes().to_vec())
            }
        }
        ScalarValue::Str(s) => (TAG_STR, s.as_bytes().to_vec()),
        ScalarValue::Bytes(b) => (TAG_BYTES, b.clone()),
        ScalarValue::Unknown { type_tag, bytes } => (*type_tag, bytes.clone()),
    }
}

fn decode_raw(tag: u8, bytes: &[u8]) -> Result<ScalarValue, DecodeError> {
    match tag {
        TAG_NULL => Ok(ScalarValue::Null),
        TAG_FALSE => Ok(ScalarValue::Bool(false)),
        TAG_TRUE => Ok(ScalarValue::Bool(true)),
        TAG_ULEB => {
            let mut cursor = bytes;
            leb128::read::unsigned(&mut cursor)
                .map(ScalarValue::Uint)
                .map_err(|_| DecodeError::InvalidVarint)
        }
        TAG_SLEB => {
            let mut cursor = bytes;
            leb128::read::signed(&mut cursor)
                .map(ScalarValue::Int)
                .map_err(|_| DecodeError::InvalidVarint)
        }
        TAG_COUNTER => {
            let mut cursor = bytes;
            leb128::read::signed(&mut cursor)
                .map(ScalarValue::Counter)
                .map_err(|_| DecodeError::InvalidVarint)
        }
        TAG_TIMESTAMP => {
            let mut cursor = bytes;
            leb128::read::signed(&mut cursor)
                .map(ScalarValue::Timestamp)
                .map_err(|_| DecodeError::InvalidVarint)
        }
        TAG_FLOAT => match bytes.len() {
            4 => {
                let mut arr = [0u8; 4];
                arr.copy_from_slice(bytes);
                Ok(ScalarValue::F64(f32::from_le_bytes(arr) as f64))
            }
            8 => {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(bytes);
                Ok(ScalarValue::F64(f64::from_le_bytes(arr)))
            }
            _ => Err(DecodeError::InvalidValueTag(tag)),
        },
        TAG_STR => std::str::from_utf8(bytes)
            .map(|s| ScalarValue::Str(SmolStr::from(s)))
            .map_err(|_| DecodeError::InvalidUtf8),
        TAG_BYTES => Ok(ScalarValue::Bytes(bytes.to_vec())),
        10..=15 => Ok(ScalarValue::Unknown {
            type_tag: tag,
            bytes: bytes.to_vec(),
        }),
        other => Err(DecodeError::InvalidValueTag(other)),
    }
}

/// Writes the `valLen`/`valRaw` column pair.
pub(crate) struct ValueWriter {
    val_len: RleEncoder<u64>,
    val_raw: RawEncoder,
}

impl ValueWriter {
    pub(crate) fn new() -> Self {
        ValueWriter {
            val_len: RleEncoder::new(),
            val_raw: RawEncoder::new(),
        }
    }

    pub(crate) fn append(&mut self, value: &ScalarValue) {
        let (tag, raw) = encode_raw(value);
        let meta = ((raw.len() as u64) << 4) | (tag as u64);
        self.val_len.append_value(meta);
        self.val_raw.append(&raw);
    }

    pub(crate) fn only_nulls(&self) -> bool {
        self.val_len.only_nulls()
    }

    pub(crate) fn finish(self) -> (Vec<u8>, Vec<u8>) {
        (self.val_len.finish(), self.val_raw.finish())
    }
}

/// Reads the `valLen`/`valRaw` column pair.
pub(crate) struct ValueReader<'a> {
    val_len: RleDecoder<'a, u64>,
    val_raw: RawDecoder<'a>,
}

impl<'a> ValueReader<'a> {
    pub(crate) fn new(val_len: &'a [u8], val_raw: &'a [u8]) -> Self {
        ValueReader {
            val_len: RleDecoder::new(val_len),
            val_raw: RawDecoder::new(val_raw),
        }
    }

    pub(crate) fn read_value(&mut self) -> Result<ScalarValue, DecodeError> {
        let meta = self.val_len.read_value()?.unwrap_or(0);
        let tag = (meta & 0xf) as u8;
        let len = (meta >> 4) as usize;
        let raw = self.val_raw.read_value(len)?;
        decode_raw(tag, raw)
    }

    pub(crate) fn skip_value(&mut self) -> Result<(), DecodeError> {
        let meta = self.val_len.read_value()?.unwrap_or(0);
        let len = (meta >> 4) as usize;
        self.val_raw.skip_values(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(values: &[ScalarValue]) -> Vec<ScalarValue> {
        let mut w = ValueWriter::new();
        for v in values {
            w.append(v);
        }
        let (len_col, raw_col) = w.finish();
        let mut r = ValueReader::new(&len_col, &raw_col);
        values.iter().map(|_| r.read_value().unwrap()).collect()
    }

    #[test]
    fn scalars_round_trip() {
        let values = vec![
            ScalarValue::Null,
            ScalarValue::Bool(true),
            ScalarValue::Bool(false),
            ScalarValue::Uint(42),
            ScalarValue::Int(-17),
            ScalarValue::F64(1.5),
            ScalarValue::Str(SmolStr::from("hello")),
            ScalarValue::Bytes(vec![1, 2, 3]),
            ScalarValue::Counter(7),
            ScalarValue::Timestamp(1_600_000_000),
        ];
        assert_eq!(round_trip(&values), values);
    }

    #[test]
    fn reserved_tag_round_trips_raw_bytes() {
        let values = vec![ScalarValue::Unknown {
            type_tag: 12,
            bytes: vec![9, 8, 7],
        }];
        assert_eq!(round_trip(&values), values);
    }

    #[test]
    fn float_prefers_f32_when_no_precision_lost() {
        let mut w = ValueWriter::new();
        w.append(&ScalarValue::F64(2.0));
        let (len_col, _) = w.finish();
        let mut dec = super::super::encoding::RleDecoder::<u64>::new(&len_col);
        let meta = dec.read_value().unwrap().unwrap();
        assert_eq!(meta >> 4, 4); // 4-byte f32 encoding
    }

    #[test]
    fn float_falls_back_to_f64_when_precision_would_be_lost() {
        let v = 0.1f64 + 0.2f64;
        let mut w = ValueWriter::new();
        w.append(&ScalarValue::F64(v));
        let (len_col, _) = w.finish();
        let mut dec = super::super::encoding::RleDecoder::<u64>::new(&len_col);
        let meta = dec.read_value().unwrap().unwrap();
        assert_eq!(meta >> 4, 8); // 8-byte f64 encoding
    }
}
