use crate::types::{Encode, ObjectPath, Signature, Value};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, ops};

/// Message flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// The caller does not want a reply.
    pub const NO_REPLY_EXPECTED: Flags = Flags(0x1);
    /// The bus must not launch an owner for the destination name.
    pub const NO_AUTO_START: Flags = Flags(0x2);
    pub const ALLOW_INTERACTIVE_AUTHORIZATION: Flags = Flags(0x4);

    pub const fn from_bits(bits: u8) -> Self {
        Flags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl ops::BitAnd for Flags {
    type Output = Flags;

    fn bitand(self, rhs: Flags) -> Flags {
        Flags(self.0 & rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum MessageType {
    MethodCall,
    MethodReturn,
    Error,
    Signal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// Header field codes, ordered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum HeaderField {
    Path = 1,
    Interface = 2,
    Member = 3,
    ErrorName = 4,
    ReplySerial = 5,
    Destination = 6,
    Sender = 7,
    Signature = 8,
}

/// A header value. Header fields are always carried as variants.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Variant(Value);

impl Variant {
    pub fn new<T: Encode>(val: T) -> Self {
        Variant(T::encode(val))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }
}

/// Splits a dotted method name on its last `.` into interface and member.
///
/// Without a dot the interface is `None` and the whole name is the member.
pub fn split_method(method: &str) -> (Option<&str>, &str) {
    match method.rfind('.') {
        Some(i) => (Some(&method[..i]), &method[i + 1..]),
        None => (None, method),
    }
}

/// An addressed message: fixed header, header fields and body.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Message {
    pub order: ByteOrder,
    pub kind: MessageType,
    pub flags: Flags,
    pub serial: u32,
    pub headers: BTreeMap<HeaderField, Variant>,
    pub body: Vec<Value>,
}

impl Message {
    fn new(kind: MessageType, mut headers: BTreeMap<HeaderField, Variant>, body: Vec<Value>) -> Self {
        if !body.is_empty() {
            headers.insert(HeaderField::Signature, Variant::new(Signature::of(&body)));
        }
        Self {
            order: ByteOrder::LittleEndian,
            kind,
            flags: Flags::NONE,
            serial: 0,
            headers,
            body,
        }
    }

    /// Builds a method call to `method` on `path` at `destination`.
    ///
    /// The serial and flags are left unset for the sender to fill in.
    pub fn method_call(destination: &str, path: &ObjectPath, method: &str, args: Vec<Value>) -> Self {
        let (interface, member) = split_method(method);
        let mut headers = BTreeMap::new();
        headers.insert(HeaderField::Path, Variant::new(path.clone()));
        headers.insert(HeaderField::Destination, Variant::new(destination));
        headers.insert(HeaderField::Member, Variant::new(member));
        // An empty interface (leading dot) is treated like no interface at all.
        if let Some(interface) = interface.filter(|i| !i.is_empty()) {
            headers.insert(HeaderField::Interface, Variant::new(interface));
        }
        Self::new(MessageType::MethodCall, headers, args)
    }

    /// Builds a successful reply to the call with serial `reply_serial`.
    pub fn method_return(reply_serial: u32, body: Vec<Value>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(HeaderField::ReplySerial, Variant::new(reply_serial));
        Self::new(MessageType::MethodReturn, headers, body)
    }

    /// Builds an error reply named `name` to the call with serial `reply_serial`.
    pub fn error(reply_serial: u32, name: &str, body: Vec<Value>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(HeaderField::ReplySerial, Variant::new(reply_serial));
        headers.insert(HeaderField::ErrorName, Variant::new(name));
        Self::new(MessageType::Error, headers, body)
    }

    pub fn header(&self, field: HeaderField) -> Option<&Value> {
        self.headers.get(&field).map(Variant::value)
    }

    pub fn header_str(&self, field: HeaderField) -> Option<&str> {
        self.header(field).and_then(Value::as_str)
    }

    pub fn reply_serial(&self) -> Option<u32> {
        match self.header(HeaderField::ReplySerial) {
            Some(Value::UInt32(serial)) => Some(*serial),
            _ => None,
        }
    }

    pub fn signature(&self) -> Option<&str> {
        self.header_str(HeaderField::Signature)
    }
}
