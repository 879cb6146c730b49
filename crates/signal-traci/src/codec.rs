//! TraCI wire encoding.
//!
//! All integers are big-endian. A message is a `u32` total length
//! (counting the length field itself) followed by one or more commands.
//! A command starts with a one-byte length covering the length byte, the
//! command id, and the content. Commands longer than 255 bytes write a
//! zero length byte followed by a `u32` length instead.

use crate::constants::{
    TYPE_COMPOUND, TYPE_DOUBLE, TYPE_INTEGER, TYPE_POLYGON, TYPE_STRING, TYPE_STRINGLIST,
};
use crate::error::TraciError;

/// Bytes taken by the message length prefix.
pub const MESSAGE_HEADER_LEN: usize = 4;

/// Length byte plus command id.
const SHORT_HEADER_LEN: usize = 2;

/// Zero marker, `u32` length, and command id.
const LONG_HEADER_LEN: usize = 6;

fn add(a: usize, b: usize) -> Result<usize, TraciError> {
    a.checked_add(b)
        .ok_or_else(|| TraciError::malformed("length overflow"))
}

/// Convert a host length to its `u32` wire form.
pub fn wire_len(len: usize) -> Result<u32, TraciError> {
    u32::try_from(len).map_err(|source| TraciError::TooLarge { len, source })
}

/// Convert a wire count to a host count, rejecting negatives.
pub fn count(value: i32) -> Result<usize, TraciError> {
    usize::try_from(value).map_err(|source| TraciError::Count {
        value: i64::from(value),
        source,
    })
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Growable buffer for command content.
#[derive(Debug, Clone, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Empty writer.
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append one byte.
    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Append a signed 32-bit integer.
    pub fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Append an unsigned 32-bit integer.
    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Append a 64-bit float.
    pub fn put_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn put_string(&mut self, value: &str) -> Result<(), TraciError> {
        self.put_u32(wire_len(value.len())?);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the writer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Wrap content in a command header.
pub fn encode_command(id: u8, content: &[u8]) -> Result<Vec<u8>, TraciError> {
    let short = add(content.len(), SHORT_HEADER_LEN)?;
    let mut out = Vec::with_capacity(add(content.len(), LONG_HEADER_LEN)?);
    if let Ok(len) = u8::try_from(short) {
        out.push(len);
    } else {
        out.push(0);
        out.extend_from_slice(&wire_len(add(content.len(), LONG_HEADER_LEN)?)?.to_be_bytes());
    }
    out.push(id);
    out.extend_from_slice(content);
    Ok(out)
}

/// Prefix encoded commands with the message length.
pub fn frame_message(commands: &[Vec<u8>]) -> Result<Vec<u8>, TraciError> {
    let total = commands
        .iter()
        .try_fold(MESSAGE_HEADER_LEN, |acc, command| add(acc, command.len()))?;
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&wire_len(total)?.to_be_bytes());
    for command in commands {
        out.extend_from_slice(command);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Status block that opens every response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Command id the status answers.
    pub command: u8,
    /// Result code; zero is success.
    pub result: u8,
    /// Simulator-supplied description (usually empty on success).
    pub description: String,
}

/// Cursor over a received message body.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Start reading at the beginning of `buf`.
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub const fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Unconsumed tail of the buffer.
    pub fn rest(&self) -> &'a [u8] {
        self.buf.get(self.pos..).unwrap_or_default()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TraciError> {
        let truncated = || TraciError::Truncated {
            needed: n,
            available: self.remaining(),
        };
        let end = self.pos.checked_add(n).ok_or_else(truncated)?;
        let bytes = self.buf.get(self.pos..end).ok_or_else(truncated)?;
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], TraciError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read one byte.
    pub fn u8(&mut self) -> Result<u8, TraciError> {
        let [byte] = self.array::<1>()?;
        Ok(byte)
    }

    /// Read a signed 32-bit integer.
    pub fn i32(&mut self) -> Result<i32, TraciError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    /// Read an unsigned 32-bit integer.
    pub fn u32(&mut self) -> Result<u32, TraciError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    /// Read a 64-bit float.
    pub fn f64(&mut self) -> Result<f64, TraciError> {
        Ok(f64::from_be_bytes(self.array()?))
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn string(&mut self) -> Result<String, TraciError> {
        let len = self.u32()?;
        let len = usize::try_from(len).map_err(|source| TraciError::Count {
            value: i64::from(len),
            source,
        })?;
        Ok(String::from_utf8(self.take(len)?.to_vec())?)
    }

    /// Read a count-prefixed list of strings.
    pub fn string_list(&mut self) -> Result<Vec<String>, TraciError> {
        let n = count(self.i32()?)?;
        (0..n).map(|_| self.string()).collect()
    }

    /// Read a type tag and check it.
    pub fn expect_type(&mut self, expected: u8) -> Result<(), TraciError> {
        let actual = self.u8()?;
        if actual == expected {
            Ok(())
        } else {
            Err(TraciError::UnexpectedType { expected, actual })
        }
    }

    /// Read a typed integer.
    pub fn typed_i32(&mut self) -> Result<i32, TraciError> {
        self.expect_type(TYPE_INTEGER)?;
        self.i32()
    }

    /// Read a typed float.
    pub fn typed_f64(&mut self) -> Result<f64, TraciError> {
        self.expect_type(TYPE_DOUBLE)?;
        self.f64()
    }

    /// Read a typed string.
    pub fn typed_string(&mut self) -> Result<String, TraciError> {
        self.expect_type(TYPE_STRING)?;
        self.string()
    }

    /// Read a typed string list.
    pub fn typed_string_list(&mut self) -> Result<Vec<String>, TraciError> {
        self.expect_type(TYPE_STRINGLIST)?;
        self.string_list()
    }

    /// Read a typed compound header and return its item count.
    pub fn typed_compound(&mut self) -> Result<usize, TraciError> {
        self.expect_type(TYPE_COMPOUND)?;
        count(self.i32()?)
    }

    /// Read a typed polygon.
    ///
    /// The point count is one byte; polygons with more than 255 points
    /// write a zero byte followed by a 32-bit count.
    pub fn typed_polygon(&mut self) -> Result<Vec<(f64, f64)>, TraciError> {
        self.expect_type(TYPE_POLYGON)?;
        let short = self.u8()?;
        let n = if short == 0 {
            count(self.i32()?)?
        } else {
            usize::from(short)
        };
        (0..n)
            .map(|_| -> Result<(f64, f64), TraciError> { Ok((self.f64()?, self.f64()?)) })
            .collect()
    }

    /// Read a command header and return `(content_len, command_id)`.
    pub fn command_header(&mut self) -> Result<(usize, u8), TraciError> {
        let short = self.u8()?;
        let content_len = if short == 0 {
            let long = self.u32()?;
            usize::try_from(long)
                .ok()
                .and_then(|len| len.checked_sub(LONG_HEADER_LEN))
                .ok_or_else(|| TraciError::malformed(format!("command length {long}")))?
        } else {
            usize::from(short)
                .checked_sub(SHORT_HEADER_LEN)
                .ok_or_else(|| TraciError::malformed(format!("command length {short}")))?
        };
        let id = self.u8()?;
        Ok((content_len, id))
    }

    /// Read the status block at the start of a response.
    pub fn status(&mut self) -> Result<Status, TraciError> {
        let (_, command) = self.command_header()?;
        let result = self.u8()?;
        let description = self.string()?;
        Ok(Status {
            command,
            result,
            description,
        })
    }
}

/// Phase count of the first program in a complete signal definition.
///
/// The definition is a compound of programs; each program is a compound of
/// program id, type, current phase index, and a compound of phases. Only
/// the phase compound's item count is needed.
pub fn parse_phase_count(value: &[u8]) -> Result<usize, TraciError> {
    let mut reader = Reader::new(value);
    if reader.typed_compound()? == 0 {
        return Err(TraciError::malformed("signal definition has no programs"));
    }
    reader.typed_compound()?;
    reader.typed_string()?;
    reader.typed_i32()?;
    reader.typed_i32()?;
    reader.typed_compound()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn short_command_length_counts_header() {
        let command = encode_command(0x02, &[1, 2, 3]).unwrap();
        assert_eq!(command, vec![5, 0x02, 1, 2, 3]);
    }

    #[test]
    fn long_command_uses_extended_length() {
        let content = vec![7u8; 300];
        let command = encode_command(0xa3, &content).unwrap();
        assert_eq!(command.first(), Some(&0));
        assert_eq!(command.get(1..5).unwrap(), &306u32.to_be_bytes());
        assert_eq!(command.get(5), Some(&0xa3));
        assert_eq!(command.len(), 306);

        let mut reader = Reader::new(&command);
        assert_eq!(reader.command_header().unwrap(), (300, 0xa3));
    }

    #[test]
    fn message_length_includes_prefix() {
        let a = encode_command(0x7F, &[]).unwrap();
        let b = encode_command(0x00, &[]).unwrap();
        let message = frame_message(&[a, b]).unwrap();
        assert_eq!(message.get(0..4).unwrap(), &8u32.to_be_bytes());
        assert_eq!(message.len(), 8);
    }

    #[test]
    fn reads_status_and_typed_values() {
        let mut w = Writer::new();
        // status: len, id, result, description
        w.put_u8(2 + 1 + 4 + 4);
        w.put_u8(0xa3);
        w.put_u8(0xFF);
        w.put_string("nope").unwrap();
        w.put_u8(TYPE_DOUBLE);
        w.put_f64(12.5);
        w.put_u8(TYPE_STRINGLIST);
        w.put_i32(2);
        w.put_string("veh0").unwrap();
        w.put_string("veh1").unwrap();
        let bytes = w.into_bytes();

        let mut reader = Reader::new(&bytes);
        let status = reader.status().unwrap();
        assert_eq!(status.command, 0xa3);
        assert_eq!(status.result, 0xFF);
        assert_eq!(status.description, "nope");
        assert!(approx(reader.typed_f64().unwrap(), 12.5));
        assert_eq!(reader.typed_string_list().unwrap(), vec!["veh0", "veh1"]);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn polygon_reads_point_pairs() {
        let mut w = Writer::new();
        w.put_u8(TYPE_POLYGON);
        w.put_u8(2);
        for v in [0.0, 1.0, 250.0, 1.0] {
            w.put_f64(v);
        }
        let bytes = w.into_bytes();
        let shape = Reader::new(&bytes).typed_polygon().unwrap();
        assert_eq!(shape.len(), 2);
        let (x, y) = shape.get(1).copied().unwrap();
        assert!(approx(x, 250.0) && approx(y, 1.0));
    }

    #[test]
    fn wrong_type_tag_is_reported() {
        let bytes = [TYPE_STRING, 0, 0, 0, 0];
        let err = Reader::new(&bytes).typed_i32().unwrap_err();
        assert!(matches!(
            err,
            TraciError::UnexpectedType {
                expected: TYPE_INTEGER,
                actual: TYPE_STRING
            }
        ));
    }

    #[test]
    fn truncated_value_is_an_error() {
        let bytes = [TYPE_DOUBLE, 0, 0];
        let err = Reader::new(&bytes).typed_f64().unwrap_err();
        assert!(matches!(err, TraciError::Truncated { needed: 8, .. }));
    }

    #[test]
    fn negative_list_count_is_rejected() {
        let mut w = Writer::new();
        w.put_u8(TYPE_STRINGLIST);
        w.put_i32(-1);
        let bytes = w.into_bytes();
        assert!(matches!(
            Reader::new(&bytes).typed_string_list(),
            Err(TraciError::Count { value: -1, .. })
        ));
    }

    fn definition(programs: i32, phases: i32) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u8(TYPE_COMPOUND);
        w.put_i32(programs);
        if programs > 0 {
            w.put_u8(TYPE_COMPOUND);
            w.put_i32(5);
            w.put_u8(TYPE_STRING);
            w.put_string("0").unwrap();
            w.put_u8(TYPE_INTEGER);
            w.put_i32(0);
            w.put_u8(TYPE_INTEGER);
            w.put_i32(3);
            w.put_u8(TYPE_COMPOUND);
            w.put_i32(phases);
        }
        w.into_bytes()
    }

    #[test]
    fn phase_count_from_definition() {
        assert_eq!(parse_phase_count(&definition(1, 8)).unwrap(), 8);
        assert_eq!(parse_phase_count(&definition(2, 4)).unwrap(), 4);
    }

    #[test]
    fn definition_without_programs_fails() {
        assert!(matches!(
            parse_phase_count(&definition(0, 0)),
            Err(TraciError::Malformed { .. })
        ));
    }
}
