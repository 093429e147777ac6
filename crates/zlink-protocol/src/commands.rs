//! Command records and the command table.
//!
//! The payload shape of every command is determined by its id alone. The
//! [`CommandTable`] maps ids to a [`CommandSpec`] holding a static layout of
//! [`Field`] descriptors; [`CommandTable::encode`] and [`CommandTable::decode`]
//! walk that layout to turn a [`Command`] into bytes and back.

use std::borrow::Cow;
use std::sync::OnceLock;

use crate::constants::*;
use crate::error::ParseError;
use crate::types::StatusUpdate;

/// Width of a scalar field in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    /// 1 byte.
    U8,
    /// 2 bytes, little-endian.
    U16,
    /// 4 bytes, little-endian.
    U32,
    /// 8 bytes, little-endian.
    U64,
}

impl Width {
    /// Number of bytes occupied on the wire.
    pub const fn bytes(self) -> usize {
        match self {
            Width::U8 => 1,
            Width::U16 => 2,
            Width::U32 => 4,
            Width::U64 => 8,
        }
    }

    /// Largest value the field can carry.
    pub const fn max(self) -> u64 {
        match self {
            Width::U8 => u8::MAX as u64,
            Width::U16 => u16::MAX as u64,
            Width::U32 => u32::MAX as u64,
            Width::U64 => u64::MAX,
        }
    }
}

/// One entry of a command layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// Fixed-width unsigned scalar.
    Scalar(Width),
    /// NUL-terminated string.
    CString,
    /// Count-prefixed run of scalars (u8 count).
    Repeated(Width),
    /// Length-prefixed raw buffer (u16 length), at most [`MAX_BUFFER_LEN`].
    Buffer,
}

impl Field {
    /// Parse one descriptor character.
    pub fn from_char(c: char) -> Result<Field, ParseError> {
        Ok(match c {
            'B' => Field::Scalar(Width::U8),
            'W' => Field::Scalar(Width::U16),
            'L' => Field::Scalar(Width::U32),
            'Q' => Field::Scalar(Width::U64),
            'S' => Field::CString,
            'b' => Field::Repeated(Width::U8),
            'w' => Field::Repeated(Width::U16),
            'l' => Field::Repeated(Width::U32),
            'q' => Field::Repeated(Width::U64),
            'D' => Field::Buffer,
            other => return Err(ParseError::UnknownField(other)),
        })
    }

    /// Descriptor character for this field.
    pub const fn as_char(self) -> char {
        match self {
            Field::Scalar(Width::U8) => 'B',
            Field::Scalar(Width::U16) => 'W',
            Field::Scalar(Width::U32) => 'L',
            Field::Scalar(Width::U64) => 'Q',
            Field::CString => 'S',
            Field::Repeated(Width::U8) => 'b',
            Field::Repeated(Width::U16) => 'w',
            Field::Repeated(Width::U32) => 'l',
            Field::Repeated(Width::U64) => 'q',
            Field::Buffer => 'D',
        }
    }
}

/// Parse a descriptor string such as `"BWD"` into a layout.
pub fn parse_descriptor(descriptor: &str) -> Result<Vec<Field>, ParseError> {
    let fields = descriptor
        .chars()
        .map(Field::from_char)
        .collect::<Result<Vec<_>, _>>()?;
    if fields.iter().filter(|f| **f == Field::Buffer).count() > 1 {
        return Err(ParseError::DuplicateBuffer);
    }
    Ok(fields)
}

/// Render a layout back into its descriptor string.
pub fn descriptor_string(fields: &[Field]) -> String {
    fields.iter().map(|f| f.as_char()).collect()
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// `B` field.
    U8(u8),
    /// `W` field.
    U16(u16),
    /// `L` field.
    U32(u32),
    /// `Q` field.
    U64(u64),
    /// `S` field. Bytes that are not valid UTF-8 are replaced with
    /// U+FFFD on decode, so such strings do not survive a round trip.
    Str(String),
    /// `b`/`w`/`l`/`q` field; elements widened to u64.
    List(Vec<u64>),
    /// `D` field.
    Bytes(Vec<u8>),
}

impl Value {
    /// The zero value of a field, as used for fetch requests and for the
    /// zero-filled status fields of short status reports.
    pub fn zero(field: Field) -> Value {
        match field {
            Field::Scalar(Width::U8) => Value::U8(0),
            Field::Scalar(Width::U16) => Value::U16(0),
            Field::Scalar(Width::U32) => Value::U32(0),
            Field::Scalar(Width::U64) => Value::U64(0),
            Field::CString => Value::Str(String::new()),
            Field::Repeated(_) => Value::List(Vec::new()),
            Field::Buffer => Value::Bytes(Vec::new()),
        }
    }

    /// Whether this value can be written as `field`.
    pub fn matches(&self, field: Field) -> bool {
        matches!(
            (self, field),
            (Value::U8(_), Field::Scalar(Width::U8))
                | (Value::U16(_), Field::Scalar(Width::U16))
                | (Value::U32(_), Field::Scalar(Width::U32))
                | (Value::U64(_), Field::Scalar(Width::U64))
                | (Value::Str(_), Field::CString)
                | (Value::List(_), Field::Repeated(_))
                | (Value::Bytes(_), Field::Buffer)
        )
    }

    /// Scalar value widened to u64.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::U8(v) => Some(u64::from(v)),
            Value::U16(v) => Some(u64::from(v)),
            Value::U32(v) => Some(u64::from(v)),
            Value::U64(v) => Some(v),
            _ => None,
        }
    }

    /// `B` value.
    pub fn as_u8(&self) -> Option<u8> {
        match *self {
            Value::U8(v) => Some(v),
            _ => None,
        }
    }

    /// `S` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// `D` value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// One decoded application-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command id.
    pub id: u8,
    /// Sequence number. Together with `id` it matches confirms to requests.
    pub seq: u8,
    /// Status byte of the header.
    pub status: u8,
    /// Field values in layout order.
    pub values: Vec<Value>,
}

impl Command {
    /// Create a command with sequence and status zero.
    pub fn new(id: u8, values: Vec<Value>) -> Self {
        Command {
            id,
            seq: 0,
            status: 0,
            values,
        }
    }

    /// Create a request whose fields are all zero, following the built-in
    /// layout of `id`. Returns `None` for ids without a layout.
    pub fn request(id: u8) -> Option<Self> {
        CommandTable::builtin().zeroed(id)
    }

    /// Set the sequence number.
    pub fn with_seq(mut self, seq: u8) -> Self {
        self.seq = seq;
        self
    }

    /// Set the header status byte.
    pub fn with_status(mut self, status: u8) -> Self {
        self.status = status;
        self
    }

    /// Field value at `index`.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Scalar field at `index` widened to u64.
    pub fn scalar(&self, index: usize) -> Option<u64> {
        self.value(index).and_then(Value::as_u64)
    }
}

/// Table entry describing one command id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Command id.
    pub id: u8,
    /// Display name.
    pub name: Cow<'static, str>,
    /// Payload layout; `None` for header-only commands.
    pub fields: Option<Cow<'static, [Field]>>,
    /// Whether the first field is the device state byte.
    pub carries_status: bool,
}

use self::Field::{Buffer as D, CString as S, Repeated, Scalar};
const B: Field = Scalar(Width::U8);
const W: Field = Scalar(Width::U16);
const L: Field = Scalar(Width::U32);
const Q: Field = Scalar(Width::U64);
const LIST_W: Field = Repeated(Width::U16);

/// Built-in command table entries: (id, name, layout, carries status).
const BUILTIN: &[(u8, &str, Option<&[Field]>, bool)] = &[
    (CMD_ACK, "ACK", None, false),
    (
        CMD_APS_DATA_CONFIRM,
        "APS_DATA_CONFIRM",
        Some(&[B, B, B, W, B, B, B]),
        true,
    ),
    (CMD_STATUS, "STATUS", Some(&[B, B]), true),
    (CMD_CHANGE_NETWORK_STATE, "CHANGE_NETWORK_STATE", Some(&[B]), false),
    (CMD_READ_PARAMETER, "READ_PARAMETER", Some(&[B, D]), false),
    (CMD_WRITE_PARAMETER, "WRITE_PARAMETER", Some(&[B, D]), false),
    (CMD_VERSION, "VERSION", Some(&[L]), false),
    (CMD_STATUS_CHANGED, "STATUS_CHANGED", Some(&[B, B]), true),
    (
        CMD_APS_DATA_REQUEST,
        "APS_DATA_REQUEST",
        Some(&[B, B, B, W, B, W, W, B, D, B, B]),
        true,
    ),
    (
        CMD_APS_DATA_INDICATION,
        "APS_DATA_INDICATION",
        Some(&[B, B, W, B, B, W, W, D, B, B]),
        true,
    ),
    (CMD_MAC_POLL, "MAC_POLL", Some(&[B, W, B, B]), false),
    (CMD_UPDATE_NEIGHBOR, "UPDATE_NEIGHBOR", Some(&[B, W, Q, B]), false),
    (CMD_BEACON_INDICATION, "BEACON_INDICATION", Some(&[W, W, B, B, B]), false),
    (CMD_UPDATE_BOOTLOADER, "UPDATE_BOOTLOADER", Some(&[L]), false),
    (CMD_NEIGHBOR_LIST, "NEIGHBOR_LIST", Some(&[B, LIST_W]), false),
    (CMD_DEBUG_LOG, "DEBUG_LOG", Some(&[B, S]), false),
];

/// Maps command ids to their layouts.
#[derive(Debug, Clone)]
pub struct CommandTable {
    entries: Vec<Option<CommandSpec>>,
}

impl Default for CommandTable {
    fn default() -> Self {
        let mut entries = vec![None; 256];
        for &(id, name, fields, carries_status) in BUILTIN {
            entries[usize::from(id)] = Some(CommandSpec {
                id,
                name: Cow::Borrowed(name),
                fields: fields.map(Cow::Borrowed),
                carries_status,
            });
        }
        CommandTable { entries }
    }
}

impl CommandTable {
    /// Shared instance of the built-in table.
    pub fn builtin() -> &'static CommandTable {
        static TABLE: OnceLock<CommandTable> = OnceLock::new();
        TABLE.get_or_init(CommandTable::default)
    }

    /// Look up a command id.
    pub fn get(&self, id: u8) -> Option<&CommandSpec> {
        self.entries[usize::from(id)].as_ref()
    }

    /// Display name of a command id, or `"UNKNOWN"`.
    pub fn name(&self, id: u8) -> &str {
        self.get(id).map(|s| s.name.as_ref()).unwrap_or("UNKNOWN")
    }

    /// Iterate over registered entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.entries.iter().flatten()
    }

    /// Register an extension command from a descriptor string.
    ///
    /// An empty descriptor registers a header-only command.
    pub fn register(
        &mut self,
        id: u8,
        name: impl Into<String>,
        descriptor: &str,
        carries_status: bool,
    ) -> Result<(), ParseError> {
        if self.entries[usize::from(id)].is_some() {
            return Err(ParseError::DuplicateCommand(id));
        }
        let fields = parse_descriptor(descriptor)?;
        self.entries[usize::from(id)] = Some(CommandSpec {
            id,
            name: Cow::Owned(name.into()),
            fields: if fields.is_empty() {
                None
            } else {
                Some(Cow::Owned(fields))
            },
            carries_status,
        });
        Ok(())
    }

    /// Build a command of `id` whose fields are all zero.
    pub fn zeroed(&self, id: u8) -> Option<Command> {
        let fields = self.get(id)?.fields.as_deref()?;
        Some(Command::new(id, fields.iter().map(|&f| Value::zero(f)).collect()))
    }

    /// Extract the device status carried by an inbound command, if any.
    pub fn status_update(&self, command: &Command) -> Option<StatusUpdate> {
        let spec = self.get(command.id)?;
        if !spec.carries_status {
            return None;
        }
        let state = command.value(0)?.as_u8()?;
        let ext = match command.id {
            CMD_STATUS | CMD_STATUS_CHANGED => command.value(1).and_then(Value::as_u8),
            _ => None,
        };
        Some(StatusUpdate { state, ext })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let table = CommandTable::builtin();
        assert_eq!(table.name(CMD_STATUS), "STATUS");
        assert_eq!(table.name(0xEE), "UNKNOWN");
        assert!(table.get(CMD_ACK).unwrap().fields.is_none());
        assert_eq!(
            descriptor_string(table.get(CMD_APS_DATA_REQUEST).unwrap().fields.as_deref().unwrap()),
            "BBBWBWWBDBB"
        );
    }

    #[test]
    fn test_no_builtin_layout_has_two_buffers() {
        for spec in CommandTable::builtin().iter() {
            if let Some(fields) = spec.fields.as_deref() {
                let round = parse_descriptor(&descriptor_string(fields)).expect("valid layout");
                assert_eq!(round.as_slice(), fields, "{}", spec.name);
            }
        }
    }

    #[test]
    fn test_parse_descriptor_errors() {
        assert_eq!(parse_descriptor("BX"), Err(ParseError::UnknownField('X')));
        assert_eq!(parse_descriptor("DBD"), Err(ParseError::DuplicateBuffer));
        assert_eq!(parse_descriptor("").unwrap(), Vec::<Field>::new());
    }

    #[test]
    fn test_register_extension() {
        let mut table = CommandTable::default();
        table.register(0x40, "CUSTOM", "BwS", false).expect("registers");
        assert_eq!(table.name(0x40), "CUSTOM");
        assert_eq!(
            table.register(0x40, "AGAIN", "B", false),
            Err(ParseError::DuplicateCommand(0x40))
        );
        assert_eq!(
            table.register(CMD_STATUS, "STATUS2", "B", true),
            Err(ParseError::DuplicateCommand(CMD_STATUS))
        );
        // The shared table is untouched.
        assert!(CommandTable::builtin().get(0x40).is_none());
    }

    #[test]
    fn test_zeroed_request() {
        let cmd = Command::request(CMD_APS_DATA_CONFIRM).expect("has layout");
        assert_eq!(cmd.values.len(), 7);
        assert_eq!(cmd.values[3], Value::U16(0));
        assert!(Command::request(CMD_ACK).is_none());
    }

    #[test]
    fn test_status_update_extraction() {
        let table = CommandTable::builtin();
        let status = Command::new(CMD_STATUS, vec![Value::U8(0x26), Value::U8(0x01)]);
        let update = table.status_update(&status).unwrap();
        assert_eq!(update.state, 0x26);
        assert_eq!(update.ext, Some(0x01));

        let mut confirm = Command::request(CMD_APS_DATA_CONFIRM).unwrap();
        confirm.values[0] = Value::U8(0x22);
        let update = table.status_update(&confirm).unwrap();
        assert_eq!(update.state, 0x22);
        assert_eq!(update.ext, None);

        let version = Command::new(CMD_VERSION, vec![Value::U32(1)]);
        assert!(table.status_update(&version).is_none());
    }
}
