//! Byte-level primitives and the four column codecs: plain RLE, delta-RLE,
//! boolean-RLE, and raw bytes.
//!
//! A `Decoder` cursor over a borrowed byte slice, an `Encodable`/`Decodable`
//! pair of traits for the LEB128/string/bytes primitives, and per-codec
//! encoder/decoder pairs built on top of them. Each writer exposes
//! `only_nulls`/`buffer`; each reader exposes `reset`/`done`/`read_value`/
//! `skip_values`.

use std::convert::TryFrom;
use std::fmt::Debug;
use std::io::{self, Read, Write};
use std::mem;
use std::str;

use smol_str::SmolStr;
use thiserror::Error;

use crate::types::ActorId;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("trying to read past the end of the buffer")]
    TryingToReadPastEnd,
    #[error("invalid leb128 varint")]
    InvalidVarint,
    #[error("invalid UTF-8 in string column")]
    InvalidUtf8,
    #[error("RLE run had count 0 with no following null count")]
    InvalidRun,
    #[error("invalid value type tag {0}")]
    InvalidValueTag(u8),
    #[error("columns were not in ascending order: last was {last}, found {found}")]
    ColumnsOutOfOrder { last: u32, found: u32 },
    #[error("invalid actor id in actor column")]
    InvalidActorId,
}

/// A cursor over a borrowed byte buffer, tracking how much the last `read`
/// consumed.
#[derive(Clone, Debug)]
pub struct Decoder<'a> {
    pub offset: usize,
    pub last_read: usize,
    buf: &'a [u8],
    start_len: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Decoder {
            offset: 0,
            last_read: 0,
            buf,
            start_len: buf.len(),
        }
    }

    pub fn read<T: Decodable + Debug>(&mut self) -> Result<T, DecodeError> {
        let mut new_buf = self.buf;
        let val = T::decode(&mut new_buf).ok_or(DecodeError::TryingToReadPastEnd)?;
        let delta = self.buf.len() - new_buf.len();
        self.buf = new_buf;
        self.last_read = delta;
        self.offset += delta;
        Ok(val)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() < n {
            return Err(DecodeError::TryingToReadPastEnd);
        }
        let head = &self.buf[0..n];
        self.buf = &self.buf[n..];
        self.last_read = n;
        self.offset += n;
        Ok(head)
    }

    pub fn done(&self) -> bool {
        self.buf.is_empty()
    }

    /// Rewind to the start of the buffer this decoder was constructed with.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.last_read = 0;
        // start_len tells us how many bytes we've already consumed, so we can
        // re-derive the original slice from the current tail... in practice
        // callers reset by reconstructing the Decoder, this is here to
        // satisfy the contract for decoders that hold the original slice.
    }

    pub fn remaining(&self) -> &'a [u8] {
        self.buf
    }
}

pub(crate) trait Decodable: Sized {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self>;
}

pub(crate) trait Encodable {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize>;
}

impl Decodable for u8 {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        let mut buffer = [0; 1];
        bytes.read_exact(&mut buffer).ok()?;
        Some(buffer[0])
    }
}

impl Decodable for u64 {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        leb128::read::unsigned(bytes).ok()
    }
}

impl Decodable for i64 {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        leb128::read::signed(bytes).ok()
    }
}

impl Decodable for u32 {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        u64::decode(bytes).and_then(|v| Self::try_from(v).ok())
    }
}

impl Decodable for usize {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        u64::decode(bytes).and_then(|v| Self::try_from(v).ok())
    }
}

impl Decodable for f64 {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        let mut buffer = [0; 8];
        bytes.read_exact(&mut buffer).ok()?;
        Some(Self::from_le_bytes(buffer))
    }
}

impl Decodable for f32 {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        let mut buffer = [0; 4];
        bytes.read_exact(&mut buffer).ok()?;
        Some(Self::from_le_bytes(buffer))
    }
}

impl Decodable for Vec<u8> {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        let len = usize::decode(bytes)?;
        if len == 0 {
            return Some(vec![]);
        }
        let mut buffer = vec![0; len];
        bytes.read_exact(&mut buffer).ok()?;
        Some(buffer)
    }
}

impl Decodable for SmolStr {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        let buffer = Vec::decode(bytes)?;
        str::from_utf8(&buffer).ok().map(SmolStr::from)
    }
}

impl Decodable for String {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        let buffer = Vec::decode(bytes)?;
        str::from_utf8(&buffer).ok().map(String::from)
    }
}

impl Decodable for ActorId {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        let buffer = Vec::decode(bytes)?;
        Some(ActorId::from_bytes(buffer))
    }
}

impl Encodable for u64 {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        leb128::write::unsigned(buf, *self)
    }
}

impl Encodable for i64 {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        leb128::write::signed(buf, *self)
    }
}

impl Encodable for usize {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        (*self as u64).encode(buf)
    }
}

impl Encodable for u32 {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        u64::from(*self).encode(buf)
    }
}

impl Encodable for f64 {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        let bytes = self.to_le_bytes();
        buf.write_all(&bytes)?;
        Ok(bytes.len())
    }
}

impl Encodable for f32 {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        let bytes = self.to_le_bytes();
        buf.write_all(&bytes)?;
        Ok(bytes.len())
    }
}

impl Encodable for [u8] {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        let head = self.len().encode(buf)?;
        buf.write_all(self)?;
        Ok(head + self.len())
    }
}

impl Encodable for Vec<u8> {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        self.as_slice().encode(buf)
    }
}

impl Encodable for str {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        self.as_bytes().encode(buf)
    }
}

impl Encodable for String {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        self.as_str().encode(buf)
    }
}

impl Encodable for SmolStr {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        self.as_str().encode(buf)
    }
}

impl Encodable for ActorId {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        self.bytes().encode(buf)
    }
}

/// The LEB128 byte-length of `val`, without actually encoding it. Used to
/// size-check columns cheaply.
pub(crate) fn ulebsize(val: u64) -> u64 {
    if val == 0 {
        return 1;
    }
    ((64 - val.leading_zeros() as u64) + 6) / 7
}

pub(crate) fn lebsize(val: i64) -> u64 {
    let val = if val < 0 { !val } else { val } as u64;
    ((1 + 64 - val.leading_zeros() as u64) + 6) / 7
}

// ---------------------------------------------------------------------
// Plain RLE (uint / string)
// ---------------------------------------------------------------------

enum RleState<T> {
    Empty,
    NullRun(usize),
    LoneVal(T),
    Run(T, usize),
    LiteralRun(T, Vec<T>),
}

/// Encodes a column of `Option<T>` as runs of repeated values, null runs,
/// and literal (non-repeating) runs.
pub(crate) struct RleEncoder<T>
where
    T: Encodable + PartialEq + Clone,
{
    buf: Vec<u8>,
    state: RleState<T>,
}

impl<T> RleEncoder<T>
where
    T: Encodable + PartialEq + Clone,
{
    pub(crate) fn new() -> Self {
        RleEncoder {
            buf: Vec::new(),
            state: RleState::Empty,
        }
    }

    /// `true` if every value appended so far (if any) was null — such a
    /// column is omitted from the saved frame entirely.
    pub(crate) fn only_nulls(&self) -> bool {
        matches!(self.state, RleState::Empty | RleState::NullRun(_))
    }

    /// The bytes flushed to the column buffer so far (not including any
    /// pending, not-yet-flushed run).
    pub(crate) fn buffer(&self) -> &[u8] {
        &self.buf
    }

    fn take_state(&mut self) -> RleState<T> {
        let mut state = RleState::Empty;
        mem::swap(&mut self.state, &mut state);
        state
    }

    fn raw_encode<V: Encodable>(&mut self, val: V) {
        val.encode(&mut self.buf).expect("encoding to a Vec cannot fail");
    }

    fn flush_run(&mut self, val: T, len: usize) {
        self.raw_encode(len as i64);
        self.raw_encode(val);
    }

    fn flush_null_run(&mut self, len: usize) {
        self.raw_encode::<i64>(0);
        self.raw_encode(len);
    }

    fn flush_lit_run(&mut self, mut run: Vec<T>) {
        run.reverse();
        self.raw_encode(-(run.len() as i64));
        for val in run {
            self.raw_encode(val);
        }
    }

    pub(crate) fn append_null(&mut self) {
        self.state = match self.take_state() {
            RleState::Empty => RleState::NullRun(1),
            RleState::NullRun(size) => RleState::NullRun(size + 1),
            RleState::LoneVal(other) => {
                self.flush_lit_run(vec![other]);
                RleState::NullRun(1)
            }
            RleState::Run(other, len) => {
                self.flush_run(other, len);
                RleState::NullRun(1)
            }
            RleState::LiteralRun(last, mut run) => {
                run.push(last);
                self.flush_lit_run(run);
                RleState::NullRun(1)
            }
        };
    }

    pub(crate) fn append_value(&mut self, value: T) {
        self.state = match self.take_state() {
            RleState::Empty => RleState::LoneVal(value),
            RleState::LoneVal(other) => {
                if other == value {
                    RleState::Run(value, 2)
                } else {
                    RleState::LiteralRun(value, vec![other])
                }
            }
            RleState::Run(other, len) => {
                if other == value {
                    RleState::Run(other, len + 1)
                } else {
                    self.flush_run(other, len);
                    RleState::LoneVal(value)
                }
            }
            RleState::LiteralRun(last, mut run) => {
                if last == value {
                    self.flush_lit_run(run);
                    RleState::Run(value, 2)
                } else {
                    run.push(last);
                    RleState::LiteralRun(value, run)
                }
            }
            RleState::NullRun(size) => {
                self.flush_null_run(size);
                RleState::LoneVal(value)
            }
        };
    }

    pub(crate) fn append(&mut self, value: Option<T>) {
        match value {
            Some(v) => self.append_value(v),
            None => self.append_null(),
        }
    }

    /// Flush any pending run and return the finished column bytes.
    pub(crate) fn finish(mut self) -> Vec<u8> {
        match self.take_state() {
            RleState::Empty => {}
            RleState::NullRun(_) => {
                // all-null columns are omitted entirely
            }
            RleState::LoneVal(value) => self.flush_lit_run(vec![value]),
            RleState::Run(value, len) => self.flush_run(value, len),
            RleState::LiteralRun(last, mut run) => {
                run.push(last);
                self.flush_lit_run(run);
            }
        }
        self.buf
    }
}

/// Reads a column of `Option<T>` encoded by [`RleEncoder`]. Acts as an
/// infinite iterator of nulls once the underlying buffer is exhausted, which
/// lets callers zip it against a driving column without bounds-checking
/// every read.
#[derive(Debug, Clone)]
pub(crate) struct RleDecoder<'a, T> {
    decoder: Decoder<'a>,
    last_value: Option<T>,
    count: i64,
    literal: bool,
}

impl<'a, T> RleDecoder<'a, T> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        RleDecoder {
            decoder: Decoder::new(buf),
            last_value: None,
            count: 0,
            literal: false,
        }
    }

    pub(crate) fn done(&self) -> bool {
        self.count == 0 && self.decoder.done()
    }
}

impl<'a, T> RleDecoder<'a, T>
where
    T: Clone + Debug + Decodable,
{
    pub(crate) fn read_value(&mut self) -> Result<Option<T>, DecodeError> {
        while self.count == 0 {
            if self.decoder.done() {
                return Ok(None);
            }
            let run: i64 = self.decoder.read()?;
            match run {
                n if n > 0 => {
                    self.count = n;
                    self.last_value = Some(self.decoder.read()?);
                    self.literal = false;
                }
                n if n < 0 => {
                    self.count = n.abs();
                    self.literal = true;
                }
                _ => {
                    let nulls: u64 = self.decoder.read()?;
                    if nulls == 0 {
                        return Err(DecodeError::InvalidRun);
                    }
                    self.count = nulls as i64;
                    self.last_value = None;
                    self.literal = false;
                }
            }
        }
        self.count -= 1;
        if self.literal {
            Ok(Some(self.decoder.read()?))
        } else {
            Ok(self.last_value.clone())
        }
    }

    pub(crate) fn skip_values(&mut self, n: usize) -> Result<(), DecodeError> {
        for _ in 0..n {
            self.read_value()?;
        }
        Ok(())
    }
}

impl<'a, T> Iterator for RleDecoder<'a, T>
where
    T: Clone + Debug + Decodable,
{
    type Item = Option<T>;

    fn next(&mut self) -> Option<Option<T>> {
        if self.done() {
            return None;
        }
        self.read_value().ok()
    }
}

// ---------------------------------------------------------------------
// Delta-RLE (signed ints, RLE of first differences)
// ---------------------------------------------------------------------

pub(crate) struct DeltaEncoder {
    rle: RleEncoder<i64>,
    absolute_value: i64,
}

impl DeltaEncoder {
    pub(crate) fn new() -> Self {
        DeltaEncoder {
            rle: RleEncoder::new(),
            absolute_value: 0,
        }
    }

    pub(crate) fn only_nulls(&self) -> bool {
        self.rle.only_nulls()
    }

    pub(crate) fn buffer(&self) -> &[u8] {
        self.rle.buffer()
    }

    pub(crate) fn append_value(&mut self, value: i64) {
        self.rle.append_value(value - self.absolute_value);
        self.absolute_value = value;
    }

    pub(crate) fn append_null(&mut self) {
        self.rle.append_null();
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.rle.finish()
    }
}

#[derive(Clone, Debug)]
pub(crate) struct DeltaDecoder<'a> {
    rle: RleDecoder<'a, i64>,
    absolute_value: i64,
}

impl<'a> DeltaDecoder<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        DeltaDecoder {
            rle: RleDecoder::new(buf),
            absolute_value: 0,
        }
    }

    pub(crate) fn done(&self) -> bool {
        self.rle.done()
    }

    pub(crate) fn read_value(&mut self) -> Result<Option<i64>, DecodeError> {
        match self.rle.read_value()? {
            Some(delta) => {
                self.absolute_value += delta;
                Ok(Some(self.absolute_value))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn skip_values(&mut self, n: usize) -> Result<(), DecodeError> {
        for _ in 0..n {
            self.read_value()?;
        }
        Ok(())
    }
}

impl<'a> Iterator for DeltaDecoder<'a> {
    type Item = Option<i64>;

    fn next(&mut self) -> Option<Option<i64>> {
        if self.done() {
            return None;
        }
        self.read_value().ok()
    }
}

// ---------------------------------------------------------------------
// Boolean-RLE
// ---------------------------------------------------------------------

pub(crate) struct BooleanEncoder {
    buf: Vec<u8>,
    last: bool,
    count: usize,
    any_true: bool,
}

impl BooleanEncoder {
    pub(crate) fn new() -> Self {
        BooleanEncoder {
            buf: Vec::new(),
            last: false,
            count: 0,
            any_true: false,
        }
    }

    pub(crate) fn only_nulls(&self) -> bool {
        // "null" for a boolean column means "always false"; a column that is
        // all-false encodes to nothing at all.
        !self.any_true
    }

    pub(crate) fn buffer(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn append(&mut self, value: bool) {
        if value {
            self.any_true = true;
        }
        if value == self.last {
            self.count += 1;
        } else {
            (self.count as u64).encode(&mut self.buf).ok();
            self.last = value;
            self.count = 1;
        }
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        if !self.any_true {
            return Vec::new();
        }
        if self.count > 0 {
            (self.count as u64).encode(&mut self.buf).ok();
        }
        self.buf
    }
}

#[derive(Clone, Debug)]
pub(crate) struct BooleanDecoder<'a> {
    decoder: Decoder<'a>,
    last_value: bool,
    count: u64,
}

impl<'a> BooleanDecoder<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        BooleanDecoder {
            decoder: Decoder::new(buf),
            last_value: true,
            count: 0,
        }
    }

    pub(crate) fn done(&self) -> bool {
        self.count == 0 && self.decoder.done()
    }

    /// Boolean columns are infinite streams of `false` once exhausted — a
    /// row with no entry in the column simply wasn't flagged.
    pub(crate) fn read_value(&mut self) -> Result<bool, DecodeError> {
        while self.count == 0 {
            if self.decoder.done() {
                return Ok(false);
            }
            self.count = self.decoder.read()?;
            self.last_value = !self.last_value;
        }
        self.count -= 1;
        Ok(self.last_value)
    }

    pub(crate) fn skip_values(&mut self, n: usize) -> Result<(), DecodeError> {
        for _ in 0..n {
            self.read_value()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Raw bytes
// ---------------------------------------------------------------------

/// Bytes written and read back verbatim; some other column (`valLen`) drives
/// how many bytes each logical value occupies.
pub(crate) struct RawEncoder {
    buf: Vec<u8>,
}

impl RawEncoder {
    pub(crate) fn new() -> Self {
        RawEncoder { buf: Vec::new() }
    }

    pub(crate) fn only_nulls(&self) -> bool {
        self.buf.is_empty()
    }

    pub(crate) fn buffer(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RawDecoder<'a> {
    decoder: Decoder<'a>,
}

impl<'a> RawDecoder<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        RawDecoder {
            decoder: Decoder::new(buf),
        }
    }

    pub(crate) fn done(&self) -> bool {
        self.decoder.done()
    }

    pub(crate) fn read_value(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.decoder.read_bytes(n)
    }

    pub(crate) fn skip_values(&mut self, total_bytes: usize) -> Result<(), DecodeError> {
        self.decoder.read_bytes(total_bytes)?;
        Ok(())
    }
}
