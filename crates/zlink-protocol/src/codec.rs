//! Command (de)serialization driven by the command table.
//!
//! ```text
//! +----+-----+--------+--------+--------+------------------------+
//! | id | seq | status | len_lo | len_hi | fields per layout ...  |
//! +----+-----+--------+--------+--------+------------------------+
//! ```
//!
//! The stored length covers the whole buffer, header included. The
//! acknowledgment command is header only.

use bytes::BufMut;

use crate::commands::{Command, CommandTable, Field, Value, Width};
use crate::constants::*;
use crate::error::{EncodeError, ParseError};

/// Bounds-checked little-endian reader over a command buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(ParseError::ReadOverflow { offset: self.pos })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn scalar(&mut self, width: Width) -> Result<u64, ParseError> {
        let bytes = self.take(width.bytes())?;
        let mut raw = [0u8; 8];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }
}

fn scalar_value(width: Width, raw: u64) -> Value {
    match width {
        Width::U8 => Value::U8(raw as u8),
        Width::U16 => Value::U16(raw as u16),
        Width::U32 => Value::U32(raw as u32),
        Width::U64 => Value::U64(raw),
    }
}

impl CommandTable {
    /// Decode a command buffer.
    pub fn decode(&self, buf: &[u8]) -> Result<Command, ParseError> {
        let len = buf.len();
        if len < HEADER_SIZE {
            return Err(ParseError::BufferTooSmall {
                expected: HEADER_SIZE,
                actual: len,
            });
        }

        let (id, seq, status) = (buf[0], buf[1], buf[2]);
        let spec = self.get(id).ok_or(ParseError::UnknownCommand(id))?;
        let fields = spec.fields.as_deref().ok_or(ParseError::NoFields(id))?;

        let mut reader = Reader {
            buf,
            pos: HEADER_SIZE,
        };
        if len >= HEADER_WITH_LENGTH_SIZE {
            let stored = usize::from(u16::from_le_bytes([buf[3], buf[4]]));
            if stored != len {
                return Err(ParseError::WrongStoredLength {
                    stored,
                    actual: len,
                });
            }
            reader.pos = HEADER_WITH_LENGTH_SIZE;
        }

        let mut values = Vec::with_capacity(fields.len());
        for (index, &field) in fields.iter().enumerate() {
            let value = match field {
                Field::Scalar(width) => {
                    if reader.remaining() < width.bytes() {
                        // Older firmware sends status reports without the
                        // trailing fields.
                        if id != CMD_STATUS {
                            return Err(ParseError::CharFieldOverflow { index });
                        }
                        reader.pos = len;
                        Value::zero(field)
                    } else {
                        scalar_value(width, reader.scalar(width)?)
                    }
                }
                Field::CString => {
                    let rest = &buf[reader.pos.min(len)..];
                    let nul = rest
                        .iter()
                        .position(|&b| b == 0)
                        .ok_or(ParseError::ReadOverflow { offset: len })?;
                    // Lossy: firmware strings are expected to be ASCII.
                    let text = String::from_utf8_lossy(&rest[..nul]).into_owned();
                    reader.take(nul + 1)?;
                    Value::Str(text)
                }
                Field::Repeated(width) => {
                    let count = reader.scalar(Width::U8)? as usize;
                    let mut items = Vec::with_capacity(count);
                    for _ in 0..count {
                        items.push(reader.scalar(width)?);
                    }
                    Value::List(items)
                }
                Field::Buffer => {
                    if reader.remaining() < 2 {
                        return Err(ParseError::DbufIncomplete);
                    }
                    let data_len = reader.scalar(Width::U16)? as usize;
                    let remaining = reader.remaining();
                    if data_len > remaining {
                        return Err(ParseError::DbufLenLargerData {
                            len: data_len,
                            remaining,
                        });
                    }
                    if data_len > MAX_BUFFER_LEN {
                        return Err(ParseError::DbufLenTooLarge {
                            len: data_len,
                            max: MAX_BUFFER_LEN,
                        });
                    }
                    Value::Bytes(reader.take(data_len)?.to_vec())
                }
            };
            values.push(value);
        }

        Ok(Command {
            id,
            seq,
            status,
            values,
        })
    }

    /// Encode a command into at most `max_len` bytes.
    ///
    /// The stored length is 16 bits wide, so `max_len` is capped at
    /// `u16::MAX`.
    pub fn encode(&self, command: &Command, max_len: usize) -> Result<Vec<u8>, EncodeError> {
        let max_len = max_len.min(usize::from(u16::MAX));
        if max_len < HEADER_SIZE {
            return Err(EncodeError::HeaderOverflow { max_len });
        }
        let spec = self
            .get(command.id)
            .ok_or(EncodeError::UnknownCommand(command.id))?;

        let mut out = Vec::with_capacity(max_len.min(MAX_COMMAND_SIZE));
        out.put_u8(command.id);
        out.put_u8(command.seq);
        out.put_u8(command.status);
        if command.id == CMD_ACK {
            return Ok(out);
        }

        if max_len < HEADER_WITH_LENGTH_SIZE {
            return Err(EncodeError::HeaderOverflow { max_len });
        }
        out.put_u16_le(0);

        let fields = spec.fields.as_deref().unwrap_or(&[]);
        if command.values.len() != fields.len() {
            return Err(EncodeError::LayoutMismatch {
                index: command.values.len().min(fields.len()),
            });
        }

        for (index, (&field, value)) in fields.iter().zip(&command.values).enumerate() {
            if !value.matches(field) {
                return Err(EncodeError::LayoutMismatch { index });
            }
            let needed = match (field, value) {
                (Field::Scalar(width), _) => width.bytes(),
                (Field::CString, Value::Str(s)) => {
                    if s.as_bytes().contains(&0) {
                        return Err(EncodeError::InteriorNul { index });
                    }
                    s.len() + 1
                }
                (Field::Repeated(width), Value::List(items)) => {
                    if items.len() > usize::from(u8::MAX) {
                        return Err(EncodeError::ListTooLong {
                            index,
                            len: items.len(),
                        });
                    }
                    if let Some(&value) = items.iter().find(|&&v| v > width.max()) {
                        return Err(EncodeError::ValueOutOfRange { index, value });
                    }
                    1 + items.len() * width.bytes()
                }
                (Field::Buffer, Value::Bytes(data)) => {
                    if data.len() > MAX_BUFFER_LEN {
                        return Err(EncodeError::BufferTooLarge {
                            len: data.len(),
                            max: MAX_BUFFER_LEN,
                        });
                    }
                    2 + data.len()
                }
                _ => return Err(EncodeError::LayoutMismatch { index }),
            };
            if out.len() + needed > max_len {
                return Err(EncodeError::FieldOverflow { index, max_len });
            }

            match (field, value) {
                (Field::Scalar(width), v) => {
                    let raw = v.as_u64().unwrap_or_default().to_le_bytes();
                    out.put_slice(&raw[..width.bytes()]);
                }
                (Field::CString, Value::Str(s)) => {
                    out.put_slice(s.as_bytes());
                    out.put_u8(0);
                }
                (Field::Repeated(width), Value::List(items)) => {
                    out.put_u8(items.len() as u8);
                    for item in items {
                        out.put_slice(&item.to_le_bytes()[..width.bytes()]);
                    }
                }
                (Field::Buffer, Value::Bytes(data)) => {
                    out.put_u16_le(data.len() as u16);
                    out.put_slice(data);
                }
                _ => return Err(EncodeError::LayoutMismatch { index }),
            }
        }

        let total = (out.len() as u16).to_le_bytes();
        out[3..HEADER_WITH_LENGTH_SIZE].copy_from_slice(&total);
        Ok(out)
    }

    /// Encode into `out`, returning the number of bytes written or zero if
    /// the command could not be encoded.
    pub fn encode_into(&self, command: &Command, out: &mut [u8]) -> usize {
        match self.encode(command, out.len()) {
            Ok(bytes) => {
                out[..bytes.len()].copy_from_slice(&bytes);
                bytes.len()
            }
            Err(e) => {
                log::debug!("encode of 0x{:02X} failed: {}", command.id, e);
                0
            }
        }
    }
}

/// Decode a command buffer with the built-in table.
pub fn decode(buf: &[u8]) -> Result<Command, ParseError> {
    CommandTable::builtin().decode(buf)
}

/// Encode a command with the built-in table.
pub fn encode(command: &Command, max_len: usize) -> Result<Vec<u8>, EncodeError> {
    CommandTable::builtin().encode(command, max_len)
}

/// Encode into `out` with the built-in table; zero on failure.
pub fn encode_into(command: &Command, out: &mut [u8]) -> usize {
    CommandTable::builtin().encode_into(command, out)
}
