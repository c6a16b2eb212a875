use crate::{
    calling::{done_channel, Call, Dispatch, DoneSender},
    conn::Conn,
    message::{split_method, Flags, Message},
    types::{ObjectPath, Value},
};
use std::sync::Arc;

/// A remote object on which methods can be invoked.
#[derive(Debug, Clone)]
pub struct Object {
    conn: Conn,
    dest: String,
    path: ObjectPath,
}

impl Object {
    pub(crate) fn new(conn: Conn, dest: String, path: ObjectPath) -> Self {
        Self { conn, dest, path }
    }

    /// The destination that calls on this object are sent to.
    pub fn destination(&self) -> &str {
        &self.dest
    }

    /// The path that calls on this object are sent to.
    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// The connection this proxy dispatches on.
    pub fn conn(&self) -> &Conn {
        &self.conn
    }

    /// Calls a method with [`go`](Self::go) and waits for its reply.
    ///
    /// Returns `None` if `flags` include [`Flags::NO_REPLY_EXPECTED`].
    /// There is no timeout; wrap the future in one if needed.
    pub async fn call(&self, method: &str, flags: Flags, args: Vec<Value>) -> Option<Arc<Call>> {
        let (tx, mut rx) = done_channel(1);
        match self.go(method, flags, Some(tx), args).await {
            Dispatch::Fired => None,
            Dispatch::Pending { call, .. } => Some(rx.recv().await.unwrap_or(call)),
        }
    }

    /// Sends a method call without waiting for its reply.
    ///
    /// If `method` contains a `.`, the part before the last one names the
    /// interface. Only [`Flags::NO_AUTO_START`] and [`Flags::NO_REPLY_EXPECTED`]
    /// are passed on.
    ///
    /// When a reply is expected the completed call is delivered to `done`, or
    /// to a fresh slot returned in [`Dispatch::Pending`] if `done` is `None`.
    /// With `NO_REPLY_EXPECTED` the message is sent, `done` is ignored and
    /// [`Dispatch::Fired`] is returned.
    ///
    /// Failures never surface here: they are recorded on the returned call.
    ///
    /// # Panics
    ///
    /// If a reply is expected and `done` has zero capacity.
    pub async fn go(
        &self,
        method: &str,
        flags: Flags,
        done: Option<DoneSender>,
        args: Vec<Value>,
    ) -> Dispatch {
        let flags = flags & (Flags::NO_AUTO_START | Flags::NO_REPLY_EXPECTED);
        let expects_reply = !flags.contains(Flags::NO_REPLY_EXPECTED);

        let slot = if expects_reply {
            Some(match done {
                Some(done) => {
                    assert!(
                        done.capacity() > 0,
                        "Object::go: unbuffered notification slot"
                    );
                    (done, None)
                }
                None => {
                    let (tx, rx) = done_channel(self.conn.config().default_done_capacity);
                    (tx, Some(rx))
                }
            })
        } else {
            None
        };

        let (interface, member) = split_method(method);
        let mut msg = Message::method_call(&self.dest, &self.path, method, args.clone());
        let serial = self.conn.next_serial();
        msg.serial = serial;
        msg.flags = flags;

        tracing::debug!(
            serial,
            destination = %self.dest,
            path = %self.path,
            interface,
            member,
            expects_reply,
            "dispatching method call"
        );

        let Some((done, receiver)) = slot else {
            if !self.conn.submit(msg).await {
                tracing::warn!(serial, "outbound path closed, dropping message");
            }
            self.conn.release_serial(serial);
            return Dispatch::Fired;
        };

        let call = Arc::new(Call::new(
            self.dest.clone(),
            self.path.clone(),
            interface.filter(|i| !i.is_empty()).map(str::to_owned),
            member.to_owned(),
            args,
            serial,
            done,
        ));
        if self.conn.register(&call) && !self.conn.submit(msg).await {
            tracing::warn!(serial, "outbound path closed");
            self.conn.abandon(serial);
        }
        Dispatch::Pending {
            call,
            done: receiver,
        }
    }
}
