use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};
use thiserror::Error;

/// The wire type of a [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum Type {
    Byte,
    Boolean,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    String,
    ObjectPath,
    Signature,
    Array(Box<Type>),
    Struct(Vec<Type>),
    Dict(Box<Type>, Box<Type>),
    Variant,
}

impl Type {
    fn write_signature(&self, out: &mut String) {
        match self {
            Type::Byte => out.push('y'),
            Type::Boolean => out.push('b'),
            Type::Int16 => out.push('n'),
            Type::UInt16 => out.push('q'),
            Type::Int32 => out.push('i'),
            Type::UInt32 => out.push('u'),
            Type::Int64 => out.push('x'),
            Type::UInt64 => out.push('t'),
            Type::Double => out.push('d'),
            Type::String => out.push('s'),
            Type::ObjectPath => out.push('o'),
            Type::Signature => out.push('g'),
            Type::Array(elem) => {
                out.push('a');
                elem.write_signature(out);
            }
            Type::Struct(fields) => {
                out.push('(');
                fields.iter().for_each(|f| f.write_signature(out));
                out.push(')');
            }
            Type::Dict(key, value) => {
                out.push_str("a{");
                key.write_signature(out);
                value.write_signature(out);
                out.push('}');
            }
            Type::Variant => out.push('v'),
        }
    }

    pub fn signature(&self) -> Signature {
        let mut sig = String::new();
        self.write_signature(&mut sig);
        Signature(sig)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.signature().as_str())
    }
}

/// A dynamically typed value as carried in a message body or header.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum Value {
    Byte(u8),
    Boolean(bool),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(String),
    ObjectPath(ObjectPath),
    Signature(Signature),
    Array { elem: Type, items: Vec<Value> },
    Struct(Vec<Value>),
    Dict {
        key: Type,
        value: Type,
        entries: Vec<(Value, Value)>,
    },
    Variant(Box<Value>),
}

impl Value {
    /// Wraps `val` in a variant.
    pub fn variant(val: impl Into<Value>) -> Self {
        Value::Variant(Box::new(val.into()))
    }

    pub fn value_type(&self) -> Type {
        match self {
            Value::Byte(_) => Type::Byte,
            Value::Boolean(_) => Type::Boolean,
            Value::Int16(_) => Type::Int16,
            Value::UInt16(_) => Type::UInt16,
            Value::Int32(_) => Type::Int32,
            Value::UInt32(_) => Type::UInt32,
            Value::Int64(_) => Type::Int64,
            Value::UInt64(_) => Type::UInt64,
            Value::Double(_) => Type::Double,
            Value::String(_) => Type::String,
            Value::ObjectPath(_) => Type::ObjectPath,
            Value::Signature(_) => Type::Signature,
            Value::Array { elem, .. } => Type::Array(Box::new(elem.clone())),
            Value::Struct(fields) => Type::Struct(fields.iter().map(Value::value_type).collect()),
            Value::Dict { key, value, .. } => {
                Type::Dict(Box::new(key.clone()), Box::new(value.clone()))
            }
            Value::Variant(_) => Type::Variant,
        }
    }

    /// Borrows the string payload of `String`, `ObjectPath` and `Signature` values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::ObjectPath(p) => Some(p.as_str()),
            Value::Signature(g) => Some(g.as_str()),
            Value::Variant(inner) => inner.as_str(),
            _ => None,
        }
    }
}

/// The type signature of a list of values, e.g. `"sua{sv}"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Signature(String);

impl Signature {
    /// Computes the signature of an argument list.
    pub fn of(values: &[Value]) -> Self {
        let mut sig = String::new();
        for val in values {
            val.value_type().write_signature(&mut sig);
        }
        Signature(sig)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid object path {0:?}")]
pub struct ObjectPathError(String);

/// The path of an object on the remote side, e.g. `/org/freedesktop/DBus`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Validates `path`: either `/`, or `/`-separated non-empty elements of
    /// `[A-Za-z0-9_]` with no trailing `/`.
    pub fn new(path: impl Into<String>) -> Result<Self, ObjectPathError> {
        let path = path.into();
        let valid = match path.strip_prefix('/') {
            Some("") => true,
            Some(rest) => rest.split('/').all(|elem| {
                !elem.is_empty() && elem.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
            }),
            None => false,
        };
        if valid {
            Ok(ObjectPath(path))
        } else {
            Err(ObjectPathError(path))
        }
    }

    pub fn root() -> Self {
        ObjectPath("/".to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for ObjectPath {
    type Error = ObjectPathError;

    fn try_from(path: &str) -> Result<Self, Self::Error> {
        ObjectPath::new(path)
    }
}

#[derive(Debug, Clone, PartialEq, Error, Deserialize, Serialize)]
#[error("value {value:?} does not match type {expected}")]
pub struct TypeMismatch {
    value: Value,
    expected: Type,
}

impl TypeMismatch {
    pub(crate) fn new(value: Value, expected: Type) -> Self {
        Self { value, expected }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn expected(&self) -> &Type {
        &self.expected
    }
}

pub trait Typed {
    fn rpc_type() -> Type;
}

pub trait Encode: Typed {
    fn encode(val: Self) -> Value;
}

/// Conversion out of a [`Value`]. Variants are unwrapped transparently.
pub trait Decode: Typed + Sized {
    fn decode(val: Value) -> Result<Self, TypeMismatch>;
}

macro_rules! impl_encode_decode {
    ($rust_type:ty, $rpc_type:expr, $encode_name:pat => $encode_expr:expr, $($from_rpc_arm:tt)*) => {
        impl Typed for $rust_type {
            fn rpc_type() -> Type {
                $rpc_type
            }
        }

        impl Encode for $rust_type {
            fn encode($encode_name: $rust_type) -> Value {
                $encode_expr
            }
        }

        impl Decode for $rust_type {
            fn decode(val: Value) -> Result<Self, TypeMismatch> {
                Ok(match val {
                    Value::Variant(inner) => return Self::decode(*inner),
                    $($from_rpc_arm)*,
                    _ => return Err(TypeMismatch::new(val, <Self as Typed>::rpc_type()))
                })
            }
        }

        impl From<$rust_type> for Value {
            fn from(val: $rust_type) -> Value {
                <$rust_type as Encode>::encode(val)
            }
        }
    };
}

impl_encode_decode!(u8, Type::Byte, n => Value::Byte(n), Value::Byte(n) => n);
impl_encode_decode!(bool, Type::Boolean, b => Value::Boolean(b), Value::Boolean(b) => b);
impl_encode_decode!(i16, Type::Int16, n => Value::Int16(n), Value::Int16(n) => n);
impl_encode_decode!(u16, Type::UInt16, n => Value::UInt16(n), Value::UInt16(n) => n);
impl_encode_decode!(i32, Type::Int32, n => Value::Int32(n), Value::Int32(n) => n);
impl_encode_decode!(u32, Type::UInt32, n => Value::UInt32(n), Value::UInt32(n) => n);
impl_encode_decode!(i64, Type::Int64, n => Value::Int64(n), Value::Int64(n) => n);
impl_encode_decode!(u64, Type::UInt64, n => Value::UInt64(n), Value::UInt64(n) => n);
impl_encode_decode!(f64, Type::Double, d => Value::Double(d), Value::Double(d) => d);
impl_encode_decode!(String, Type::String, s => Value::String(s), Value::String(s) => s);
impl_encode_decode!(ObjectPath, Type::ObjectPath, p => Value::ObjectPath(p), Value::ObjectPath(p) => p);
impl_encode_decode!(Signature, Type::Signature, g => Value::Signature(g), Value::Signature(g) => g);

impl<'a> Typed for &'a str {
    fn rpc_type() -> Type {
        Type::String
    }
}

impl<'a> Encode for &'a str {
    fn encode(val: &'a str) -> Value {
        Value::String(val.to_owned())
    }
}

impl<'a> From<&'a str> for Value {
    fn from(val: &'a str) -> Value {
        <&str as Encode>::encode(val)
    }
}

impl<T: Typed> Typed for Vec<T> {
    fn rpc_type() -> Type {
        Type::Array(Box::new(T::rpc_type()))
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(val: Self) -> Value {
        Value::Array {
            elem: T::rpc_type(),
            items: val.into_iter().map(T::encode).collect(),
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(val: Value) -> Result<Self, TypeMismatch> {
        match val {
            Value::Variant(inner) => Self::decode(*inner),
            Value::Array { items, .. } => items.into_iter().map(T::decode).collect(),
            other => Err(TypeMismatch::new(other, Self::rpc_type())),
        }
    }
}

impl<T: Encode> From<Vec<T>> for Value {
    fn from(val: Vec<T>) -> Value {
        Vec::<T>::encode(val)
    }
}

impl<K: Typed, V: Typed> Typed for BTreeMap<K, V> {
    fn rpc_type() -> Type {
        Type::Dict(Box::new(K::rpc_type()), Box::new(V::rpc_type()))
    }
}

impl<K: Encode, V: Encode> Encode for BTreeMap<K, V> {
    fn encode(val: Self) -> Value {
        Value::Dict {
            key: K::rpc_type(),
            value: V::rpc_type(),
            entries: val
                .into_iter()
                .map(|(k, v)| (K::encode(k), V::encode(v)))
                .collect(),
        }
    }
}

impl<K: Decode + Ord, V: Decode> Decode for BTreeMap<K, V> {
    fn decode(val: Value) -> Result<Self, TypeMismatch> {
        match val {
            Value::Variant(inner) => Self::decode(*inner),
            Value::Dict { entries, .. } => entries
                .into_iter()
                .map(|(k, v)| Ok((K::decode(k)?, V::decode(v)?)))
                .collect(),
            other => Err(TypeMismatch::new(other, Self::rpc_type())),
        }
    }
}

impl<K: Encode, V: Encode> From<BTreeMap<K, V>> for Value {
    fn from(val: BTreeMap<K, V>) -> Value {
        BTreeMap::<K, V>::encode(val)
    }
}

// A `Value` destination accepts anything, so it reads as a variant.
impl Typed for Value {
    fn rpc_type() -> Type {
        Type::Variant
    }
}

// Encoding wraps the value in a variant, unless it already is one.
impl Encode for Value {
    fn encode(val: Self) -> Value {
        match val {
            Value::Variant(_) => val,
            other => Value::Variant(Box::new(other)),
        }
    }
}

impl Decode for Value {
    fn decode(val: Value) -> Result<Self, TypeMismatch> {
        Ok(val)
    }
}

/// Decodes a whole message body at once.
///
/// Tuples match the body element by element and fail if the arity differs.
/// Decoding builds a fresh value, so nothing is written on failure.
pub trait FromBody: Sized {
    fn from_body(body: &[Value]) -> Result<Self, TypeMismatch>;
}

impl FromBody for Vec<Value> {
    fn from_body(body: &[Value]) -> Result<Self, TypeMismatch> {
        Ok(body.to_vec())
    }
}

macro_rules! impl_from_body {
    ($($name:ident $val:ident),*) => {
        impl<$($name: Decode),*> FromBody for ($($name,)*) {
            fn from_body(body: &[Value]) -> Result<Self, TypeMismatch> {
                match body {
                    [$($val),*] => Ok(($($name::decode($val.clone())?,)*)),
                    _ => Err(TypeMismatch::new(
                        Value::Struct(body.to_vec()),
                        Type::Struct(vec![$(<$name as Typed>::rpc_type()),*]),
                    )),
                }
            }
        }
    };
}

impl_from_body!();
impl_from_body!(A a);
impl_from_body!(A a, B b);
impl_from_body!(A a, B b, C c);
impl_from_body!(A a, B b, C c, D d);
impl_from_body!(A a, B b, C c, D d, E e);
impl_from_body!(A a, B b, C c, D d, E e, F f);
