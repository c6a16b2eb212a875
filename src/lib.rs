//! Asynchronous method calls on remote objects over a message bus connection.
//!
//! A [`Conn`] owns the table of calls waiting for a reply. [`Object`]s created
//! from it send method calls with [`Object::go`] or [`Object::call`], and the
//! connection's reply path resolves them.

mod calling;
mod conn;
mod macros;
mod message;
pub mod net;
mod object;
pub mod types;

pub use calling::{done_channel, Call, CallError, Dispatch, DoneReceiver, DoneSender};
pub use conn::{Conn, ConnConfig};
pub use message::{split_method, ByteOrder, Flags, HeaderField, Message, MessageType, Variant};
pub use object::Object;
pub use types::{
    Decode, Encode, FromBody, ObjectPath, ObjectPathError, Signature, Type, TypeMismatch, Typed,
    Value,
};
