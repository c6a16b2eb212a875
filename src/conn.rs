use crate::{
    calling::{Call, CallError},
    message::{HeaderField, Message, MessageType},
    object::Object,
    types::ObjectPath,
};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::{mpsc, Notify};

/// Error name used when an error reply does not carry one.
const UNNAMED_ERROR: &str = "org.freedesktop.DBus.Error.Failed";

#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// Messages that may queue on the outbound path before senders wait.
    pub outbound_capacity: usize,
    /// Capacity of the notification slot allocated when a caller brings none.
    pub default_done_capacity: usize,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 64,
            default_done_capacity: 10,
        }
    }
}

impl ConnConfig {
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    pub fn with_default_done_capacity(mut self, capacity: usize) -> Self {
        self.default_done_capacity = capacity.max(1);
        self
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hands out non-zero serials, skipping any that are still in use.
#[derive(Debug, Default)]
struct SerialSource {
    state: Mutex<SerialState>,
}

#[derive(Debug, Default)]
struct SerialState {
    last: u32,
    in_use: HashSet<u32>,
}

impl SerialSource {
    fn next(&self) -> u32 {
        let mut state = lock(&self.state);
        loop {
            state.last = state.last.wrapping_add(1);
            let candidate = state.last;
            if candidate != 0 && state.in_use.insert(candidate) {
                return candidate;
            }
        }
    }

    fn release(&self, serial: u32) {
        lock(&self.state).in_use.remove(&serial);
    }
}

#[derive(Debug, Default)]
struct PendingTable {
    calls: HashMap<u32, Arc<Call>>,
    closed: bool,
}

/// Calls waiting for a reply, keyed by serial.
#[derive(Debug, Default)]
struct PendingCalls {
    table: Mutex<PendingTable>,
}

impl PendingCalls {
    /// Fails once the table has been closed.
    fn insert(&self, call: Arc<Call>) -> Result<(), Arc<Call>> {
        let mut table = lock(&self.table);
        if table.closed {
            return Err(call);
        }
        let prev = table.calls.insert(call.serial(), call);
        debug_assert!(prev.is_none(), "serial registered twice");
        Ok(())
    }

    fn remove(&self, serial: u32) -> Option<Arc<Call>> {
        lock(&self.table).calls.remove(&serial)
    }

    fn close(&self) -> Vec<Arc<Call>> {
        let mut table = lock(&self.table);
        table.closed = true;
        table.calls.drain().map(|(_, call)| call).collect()
    }

    fn is_closed(&self) -> bool {
        lock(&self.table).closed
    }

    fn len(&self) -> usize {
        lock(&self.table).calls.len()
    }
}

#[derive(Debug)]
struct ConnInner {
    config: ConnConfig,
    serials: SerialSource,
    pending: PendingCalls,
    out: Mutex<Option<mpsc::Sender<Message>>>,
    shutdown: Notify,
}

/// A connection to the bus, shared by every [`Object`] created from it.
///
/// Cloning is cheap; all clones refer to the same connection.
#[derive(Debug, Clone)]
pub struct Conn {
    inner: Arc<ConnInner>,
}

impl Conn {
    /// Creates a connection whose outbound messages come out of the returned receiver.
    pub fn new(config: ConnConfig) -> (Conn, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(config.outbound_capacity.max(1));
        let inner = ConnInner {
            config,
            serials: SerialSource::default(),
            pending: PendingCalls::default(),
            out: Mutex::new(Some(tx)),
            shutdown: Notify::new(),
        };
        (
            Conn {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// A proxy for the object at `path` owned by `destination`.
    pub fn object(&self, destination: impl Into<String>, path: ObjectPath) -> Object {
        Object::new(self.clone(), destination.into(), path)
    }

    pub fn config(&self) -> &ConnConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pending.is_closed()
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    pub(crate) fn next_serial(&self) -> u32 {
        self.inner.serials.next()
    }

    pub(crate) fn release_serial(&self, serial: u32) {
        self.inner.serials.release(serial);
    }

    /// Adds `call` to the pending table, or resolves it at once if the
    /// connection is already closed.
    pub(crate) fn register(&self, call: &Arc<Call>) -> bool {
        match self.inner.pending.insert(Arc::clone(call)) {
            Ok(()) => true,
            Err(call) => {
                tracing::warn!(serial = call.serial(), "dispatch on closed connection");
                self.release_serial(call.serial());
                call.complete(Err(CallError::ConnectionClosed));
                false
            }
        }
    }

    /// Resolves a registered call with `ConnectionClosed` if it is still pending.
    pub(crate) fn abandon(&self, serial: u32) {
        if let Some(call) = self.inner.pending.remove(serial) {
            self.release_serial(serial);
            call.complete(Err(CallError::ConnectionClosed));
        }
    }

    /// Queues `msg` on the outbound path, waiting while it is full.
    pub(crate) async fn submit(&self, msg: Message) -> bool {
        let out = lock(&self.inner.out).clone();
        match out {
            Some(out) => out.send(msg).await.is_ok(),
            None => false,
        }
    }

    pub(crate) async fn shutdown_requested(&self) {
        self.inner.shutdown.notified().await
    }

    /// Resolves the pending call `msg` replies to.
    ///
    /// Returns false when `msg` is not a reply or matches no pending call.
    pub fn handle_reply(&self, msg: Message) -> bool {
        let Some(serial) = msg.reply_serial() else {
            tracing::debug!(kind = ?msg.kind, "ignoring message without reply serial");
            return false;
        };
        let result = match msg.kind {
            MessageType::MethodReturn => Ok(msg.body),
            MessageType::Error => {
                let name = msg
                    .header_str(HeaderField::ErrorName)
                    .unwrap_or(UNNAMED_ERROR)
                    .to_owned();
                Err(CallError::remote(&name, msg.body))
            }
            kind => {
                tracing::debug!(?kind, serial, "ignoring non-reply message");
                return false;
            }
        };
        let Some(call) = self.inner.pending.remove(serial) else {
            tracing::debug!(serial, "reply to unknown serial");
            return false;
        };
        self.release_serial(serial);
        call.complete(result)
    }

    /// Closes the connection and resolves every pending call with
    /// [`CallError::ConnectionClosed`]. Calling it again does nothing.
    pub fn close(&self) {
        let calls = self.inner.pending.close();
        lock(&self.inner.out).take();
        self.inner.shutdown.notify_one();
        if !calls.is_empty() {
            tracing::debug!(pending = calls.len(), "flushing pending calls");
        }
        for call in calls {
            self.release_serial(call.serial());
            call.complete(Err(CallError::ConnectionClosed));
        }
    }
}
