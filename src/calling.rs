use crate::types::{FromBody, ObjectPath, TypeMismatch, Value};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::{
    runtime::Handle,
    sync::mpsc::{self, error::TrySendError},
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    #[error("mismatched signature: {0}")]
    SignatureMismatch(#[from] TypeMismatch),

    /// An error reply from the remote side.
    #[error("{name}: {message}")]
    Remote {
        name: String,
        message: String,
        body: Vec<Value>,
    },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("call has not completed yet")]
    NotCompleted,
}

impl CallError {
    /// Builds a remote error; the message is the first string in the body, if any.
    pub(crate) fn remote(name: &str, body: Vec<Value>) -> Self {
        let message = body
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        CallError::Remote {
            name: name.to_owned(),
            message,
            body,
        }
    }
}

/// Creates a notification slot that can buffer `capacity` completed calls.
///
/// A zero capacity describes an unbuffered slot. Such a slot could make the
/// resolver wait on the consumer, so [`Object::go`](crate::Object::go) refuses it.
pub fn done_channel(capacity: usize) -> (DoneSender, DoneReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (DoneSender { tx, capacity }, DoneReceiver { rx })
}

/// Producer half of a notification slot. Clone it to share one slot between calls.
#[derive(Debug, Clone)]
pub struct DoneSender {
    tx: mpsc::Sender<Arc<Call>>,
    capacity: usize,
}

impl DoneSender {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hands `call` to the consumer without ever waiting on it.
    fn deliver(&self, call: Arc<Call>) {
        match self.tx.try_send(call) {
            Ok(()) => {}
            Err(TrySendError::Full(call)) => {
                tracing::warn!(serial = call.serial, "notification slot full");
                match Handle::try_current() {
                    Ok(handle) => {
                        let tx = self.tx.clone();
                        handle.spawn(async move {
                            _ = tx.send(call).await;
                        });
                    }
                    // Resolved from a plain thread: wait for room off this thread.
                    Err(_) => {
                        let tx = self.tx.clone();
                        std::thread::spawn(move || {
                            _ = tx.blocking_send(call);
                        });
                    }
                }
            }
            Err(TrySendError::Closed(call)) => {
                tracing::trace!(serial = call.serial, "nobody waiting for completed call");
            }
        }
    }
}

/// Consumer half of a notification slot.
#[derive(Debug)]
pub struct DoneReceiver {
    rx: mpsc::Receiver<Arc<Call>>,
}

impl DoneReceiver {
    /// Waits for the next completed call.
    pub async fn recv(&mut self) -> Option<Arc<Call>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<Call>> {
        self.rx.try_recv().ok()
    }
}

/// A pending or completed method call.
///
/// The outcome is written once, by whoever resolves the call, and the call is
/// then delivered once to its notification slot.
#[derive(Debug)]
pub struct Call {
    destination: String,
    path: ObjectPath,
    interface: Option<String>,
    method: String,
    args: Vec<Value>,
    serial: u32,
    done: DoneSender,
    result: OnceLock<Result<Vec<Value>, CallError>>,
}

impl Call {
    pub(crate) fn new(
        destination: String,
        path: ObjectPath,
        interface: Option<String>,
        method: String,
        args: Vec<Value>,
        serial: u32,
        done: DoneSender,
    ) -> Self {
        Self {
            destination,
            path,
            interface,
            method,
            args,
            serial,
            done,
            result: OnceLock::new(),
        }
    }

    /// Records the outcome and notifies the slot. Later outcomes are ignored.
    pub(crate) fn complete(self: &Arc<Self>, result: Result<Vec<Value>, CallError>) -> bool {
        if self.result.set(result).is_err() {
            return false;
        }
        tracing::trace!(serial = self.serial, "call completed");
        self.done.deliver(Arc::clone(self));
        true
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// The member name, without the interface.
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn is_completed(&self) -> bool {
        self.result.get().is_some()
    }

    pub fn err(&self) -> Option<&CallError> {
        self.result.get().and_then(|r| r.as_ref().err())
    }

    pub fn body(&self) -> Option<&[Value]> {
        self.result
            .get()
            .and_then(|r| r.as_ref().ok())
            .map(Vec::as_slice)
    }

    /// Decodes the reply body as `T`.
    ///
    /// An error outcome is returned as is, without looking at the body.
    pub fn reply<T: FromBody>(&self) -> Result<T, CallError> {
        match self.result.get() {
            None => Err(CallError::NotCompleted),
            Some(Err(err)) => Err(err.clone()),
            Some(Ok(body)) => Ok(T::from_body(body)?),
        }
    }

    /// Decodes the reply body into `dest`, which is left alone on any error.
    pub fn store<T: FromBody>(&self, dest: &mut T) -> Result<(), CallError> {
        *dest = self.reply()?;
        Ok(())
    }
}

/// The outcome of dispatching a method call.
#[derive(Debug)]
pub enum Dispatch {
    /// A reply is expected.
    Pending {
        call: Arc<Call>,
        /// Receiver of the slot allocated for the call, or `None` when the
        /// caller supplied its own slot.
        done: Option<DoneReceiver>,
    },
    /// Sent without expecting a reply.
    Fired,
}

impl Dispatch {
    pub fn call(&self) -> Option<&Arc<Call>> {
        match self {
            Dispatch::Pending { call, .. } => Some(call),
            Dispatch::Fired => None,
        }
    }

    pub fn is_fired(&self) -> bool {
        matches!(self, Dispatch::Fired)
    }
}
