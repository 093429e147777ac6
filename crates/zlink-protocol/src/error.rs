//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding a command buffer or parsing a field descriptor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Input is shorter than the command header.
    #[error("buffer too small: expected at least {expected} bytes, got {actual}")]
    BufferTooSmall {
        /// Minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Command id is not in the command table.
    #[error("unknown command id: 0x{0:02X}")]
    UnknownCommand(u8),

    /// The command is known but has no payload layout.
    #[error("command 0x{0:02X} has no field layout")]
    NoFields(u8),

    /// Stored length field disagrees with the buffer length.
    #[error("stored length {stored} does not match buffer length {actual}")]
    WrongStoredLength {
        /// Value of the stored length field.
        stored: usize,
        /// Actual buffer length.
        actual: usize,
    },

    /// A scalar field extends past the end of the input.
    #[error("scalar field {index} overflows the input")]
    CharFieldOverflow {
        /// Field index in the layout.
        index: usize,
    },

    /// Fewer than two bytes remain for a raw buffer length.
    #[error("raw buffer length field incomplete")]
    DbufIncomplete,

    /// Raw buffer length exceeds the remaining input.
    #[error("raw buffer length {len} exceeds remaining {remaining} bytes")]
    DbufLenLargerData {
        /// Declared length.
        len: usize,
        /// Bytes left in the input.
        remaining: usize,
    },

    /// Raw buffer length exceeds the fixed buffer capacity.
    #[error("raw buffer length {len} exceeds capacity {max}")]
    DbufLenTooLarge {
        /// Declared length.
        len: usize,
        /// Capacity.
        max: usize,
    },

    /// The read cursor moved past the end of the input.
    #[error("read past end of input at offset {offset}")]
    ReadOverflow {
        /// Offset of the failing read.
        offset: usize,
    },

    /// Unrecognized field-type character in a descriptor.
    #[error("unknown field type {0:?}")]
    UnknownField(char),

    /// A descriptor declares more than one raw buffer field.
    #[error("layout declares more than one raw buffer field")]
    DuplicateBuffer,

    /// Command id already present in the table.
    #[error("command id 0x{0:02X} already registered")]
    DuplicateCommand(u8),
}

/// Errors raised while encoding a command.
///
/// Every variant corresponds to a zero-length result in the legacy
/// [`encode_into`](crate::encode_into) interface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Command id is not in the command table.
    #[error("unknown command id: 0x{0:02X}")]
    UnknownCommand(u8),

    /// The header does not fit in the output.
    #[error("header does not fit in {max_len} bytes")]
    HeaderOverflow {
        /// Output capacity.
        max_len: usize,
    },

    /// Writing a field would exceed the output capacity.
    #[error("field {index} does not fit in {max_len} bytes")]
    FieldOverflow {
        /// Field index in the layout.
        index: usize,
        /// Output capacity.
        max_len: usize,
    },

    /// Raw buffer value exceeds the fixed buffer capacity.
    #[error("raw buffer of {len} bytes exceeds capacity {max}")]
    BufferTooLarge {
        /// Length of the value.
        len: usize,
        /// Capacity.
        max: usize,
    },

    /// Values do not match the command layout.
    #[error("value {index} does not match the command layout")]
    LayoutMismatch {
        /// Index of the first mismatching value.
        index: usize,
    },

    /// A string value contains an interior NUL.
    #[error("string value {index} contains NUL")]
    InteriorNul {
        /// Field index in the layout.
        index: usize,
    },

    /// An element of a repeated field does not fit the field width.
    #[error("repeated field {index} element {value} exceeds the field width")]
    ValueOutOfRange {
        /// Field index in the layout.
        index: usize,
        /// The offending element.
        value: u64,
    },

    /// A repeated field holds more elements than its count byte can express.
    #[error("repeated field {index} holds {len} elements")]
    ListTooLong {
        /// Field index in the layout.
        index: usize,
        /// Number of elements.
        len: usize,
    },
}
