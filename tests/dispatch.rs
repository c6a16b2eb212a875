use buscall::{
    args, done_channel, CallError, Conn, ConnConfig, Dispatch, Flags, HeaderField, Message,
    Object, ObjectPath, Value,
};
use futures::FutureExt;
use rand::seq::SliceRandom;
use std::{collections::HashSet, panic::AssertUnwindSafe, time::Duration};
use tokio::{sync::mpsc, time::timeout};

fn init_tracing() {
    _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup() -> (Conn, mpsc::Receiver<Message>, Object) {
    init_tracing();
    let (conn, out) = Conn::new(ConnConfig::default());
    let bus = conn.object(
        "org.freedesktop.DBus",
        ObjectPath::new("/org/freedesktop/DBus").unwrap(),
    );
    (conn, out, bus)
}

#[tokio::test]
async fn introspect_registers_one_call() {
    let (conn, mut out, bus) = setup();
    assert_eq!(bus.destination(), "org.freedesktop.DBus");
    assert_eq!(bus.path().as_str(), "/org/freedesktop/DBus");

    let dispatch = bus
        .go("org.freedesktop.DBus.Introspect", Flags::NONE, None, args![])
        .await;
    let Dispatch::Pending { call, done } = dispatch else {
        panic!("expected a pending call");
    };
    assert!(done.is_some());
    assert_eq!(conn.pending_calls(), 1);
    assert_eq!(call.interface(), Some("org.freedesktop.DBus"));
    assert_eq!(call.method(), "Introspect");
    assert_eq!(call.destination(), "org.freedesktop.DBus");

    let msg = out.try_recv().unwrap();
    assert_eq!(msg.serial, call.serial());
    assert_ne!(msg.serial, 0);
    assert_eq!(
        msg.header_str(HeaderField::Interface),
        Some("org.freedesktop.DBus")
    );
    assert_eq!(msg.header_str(HeaderField::Member), Some("Introspect"));
    assert_eq!(
        msg.header_str(HeaderField::Destination),
        Some("org.freedesktop.DBus")
    );
    assert_eq!(
        msg.header_str(HeaderField::Path),
        Some("/org/freedesktop/DBus")
    );
    assert!(msg.header(HeaderField::Signature).is_none());
    assert!(out.try_recv().is_err());
}

#[tokio::test]
async fn method_without_dot_has_no_interface() {
    let (_conn, mut out, bus) = setup();
    let dispatch = bus.go("Ping", Flags::NONE, None, args![]).await;
    assert_eq!(dispatch.call().unwrap().interface(), None);

    let msg = out.try_recv().unwrap();
    assert!(msg.header(HeaderField::Interface).is_none());
    assert_eq!(msg.header_str(HeaderField::Member), Some("Ping"));
}

#[tokio::test]
async fn signature_header_matches_arguments() {
    let (_conn, mut out, bus) = setup();
    bus.go(
        "org.freedesktop.DBus.RequestName",
        Flags::NONE,
        None,
        args!["com.example.Name", 4u32],
    )
    .await;
    let msg = out.try_recv().unwrap();
    assert_eq!(msg.signature(), Some("su"));
    assert_eq!(msg.body, args!["com.example.Name", 4u32]);
}

#[tokio::test]
async fn no_reply_expected_fires_and_forgets() {
    let (conn, mut out, bus) = setup();
    let (tx, mut rx) = done_channel(1);
    let dispatch = bus
        .go("Notify", Flags::NO_REPLY_EXPECTED, Some(tx), args!["hello"])
        .await;
    assert!(dispatch.is_fired());
    assert!(dispatch.call().is_none());
    assert_eq!(conn.pending_calls(), 0);

    let msg = out.try_recv().unwrap();
    assert!(msg.flags.contains(Flags::NO_REPLY_EXPECTED));
    assert_eq!(msg.signature(), Some("s"));
    assert!(out.try_recv().is_err());
    assert!(rx.try_recv().is_none());

    assert!(bus
        .call("Notify", Flags::NO_REPLY_EXPECTED, args!["again"])
        .await
        .is_none());
    assert!(out.try_recv().is_ok());
}

#[tokio::test]
async fn unknown_flags_are_dropped() {
    let (_conn, mut out, bus) = setup();
    let flags = Flags::NO_AUTO_START
        | Flags::ALLOW_INTERACTIVE_AUTHORIZATION
        | Flags::from_bits(0x80);
    bus.go("Ping", flags, None, args![]).await;
    assert_eq!(out.try_recv().unwrap().flags, Flags::NO_AUTO_START);
}

#[tokio::test]
async fn unbuffered_slot_panics_before_sending() {
    let (conn, mut out, bus) = setup();
    let (tx, _rx) = done_channel(0);
    let result = AssertUnwindSafe(bus.go("Ping", Flags::NONE, Some(tx), args![]))
        .catch_unwind()
        .await;
    assert!(result.is_err());
    assert!(out.try_recv().is_err());
    assert_eq!(conn.pending_calls(), 0);

    // ignored when no reply is expected
    let (tx, _rx) = done_channel(0);
    assert!(bus
        .go("Ping", Flags::NO_REPLY_EXPECTED, Some(tx), args![])
        .await
        .is_fired());
}

#[tokio::test]
async fn default_slot_receives_the_reply() {
    let (conn, mut out, bus) = setup();
    let Dispatch::Pending { call, done } = bus.go("GetId", Flags::NONE, None, args![]).await
    else {
        panic!("expected a pending call");
    };
    let msg = out.recv().await.unwrap();
    assert!(conn.handle_reply(Message::method_return(msg.serial, args!["abc123"])));

    let delivered = done.unwrap().recv().await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&delivered, &call));
    let mut dest = (String::new(),);
    delivered.store(&mut dest).unwrap();
    assert_eq!(dest.0, "abc123");
}

#[tokio::test]
async fn shared_slot_delivers_in_completion_order() {
    let (conn, mut out, bus) = setup();
    let (tx, mut rx) = done_channel(2);
    let first = bus.go("First", Flags::NONE, Some(tx.clone()), args![]).await;
    let second = bus.go("Second", Flags::NONE, Some(tx), args![]).await;
    assert!(matches!(first, Dispatch::Pending { done: None, .. }));
    assert!(matches!(second, Dispatch::Pending { done: None, .. }));
    assert_eq!(bus.conn().pending_calls(), 2);
    let first_serial = out.recv().await.unwrap().serial;
    let second_serial = out.recv().await.unwrap().serial;
    assert_ne!(first_serial, second_serial);

    conn.handle_reply(Message::method_return(second_serial, args![]));
    conn.handle_reply(Message::method_return(first_serial, args![]));

    let a = rx.recv().await.unwrap();
    let b = rx.recv().await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&a, second.call().unwrap()));
    assert!(std::sync::Arc::ptr_eq(&b, first.call().unwrap()));
    assert!(rx.try_recv().is_none());
}

#[tokio::test]
async fn replies_resolved_off_runtime_reach_a_full_slot() {
    let (_conn, mut out, bus) = setup();
    let (tx, mut rx) = done_channel(1);
    let first = bus.go("First", Flags::NONE, Some(tx.clone()), args![]).await;
    let second = bus.go("Second", Flags::NONE, Some(tx), args![]).await;
    let serials = [out.recv().await.unwrap().serial, out.recv().await.unwrap().serial];

    let conn = bus.conn().clone();
    let resolver = std::thread::spawn(move || {
        for serial in serials {
            assert!(conn.handle_reply(Message::method_return(serial, args![])));
        }
    });
    tokio::task::spawn_blocking(move || resolver.join().unwrap())
        .await
        .unwrap();
    assert_eq!(bus.conn().pending_calls(), 0);

    let wait = Duration::from_secs(5);
    let a = timeout(wait, rx.recv()).await.unwrap().unwrap();
    let b = timeout(wait, rx.recv()).await.unwrap().unwrap();
    assert!(std::sync::Arc::ptr_eq(&a, first.call().unwrap()));
    assert!(std::sync::Arc::ptr_eq(&b, second.call().unwrap()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_get_their_own_replies() {
    const N: u32 = 100;
    let (conn, mut out, _bus) = setup();
    let echo = conn.object("com.example.Echo", ObjectPath::new("/com/example/Echo").unwrap());

    let callers: Vec<_> = (0..N)
        .map(|i| {
            let echo = echo.clone();
            tokio::spawn(async move {
                echo.call("com.example.Echo.Echo", Flags::NONE, args![i])
                    .await
            })
        })
        .collect();

    let mut requests = Vec::new();
    while requests.len() < N as usize {
        requests.push(out.recv().await.unwrap());
    }
    let serials: HashSet<u32> = requests.iter().map(|m| m.serial).collect();
    assert_eq!(serials.len(), N as usize);

    requests.shuffle(&mut rand::thread_rng());
    for req in requests {
        assert!(conn.handle_reply(Message::method_return(req.serial, req.body)));
    }

    for (i, caller) in callers.into_iter().enumerate() {
        let call = caller.await.unwrap().unwrap();
        let (echoed,): (u32,) = call.reply().unwrap();
        assert_eq!(echoed, i as u32);
        assert_eq!(call.args(), &[Value::from(i as u32)]);
    }
    assert_eq!(conn.pending_calls(), 0);
}

#[tokio::test]
async fn remote_error_takes_precedence() {
    let (conn, mut out, bus) = setup();
    let responder = tokio::spawn(async move {
        let msg = out.recv().await.unwrap();
        conn.handle_reply(Message::error(
            msg.serial,
            "org.freedesktop.DBus.Error.ServiceUnknown",
            args!["The name is not activatable", 1u32],
        ));
    });

    let call = bus
        .call("org.freedesktop.DBus.StartServiceByName", Flags::NONE, args!["x", 0u32])
        .await
        .unwrap();
    responder.await.unwrap();

    let mut dest = (0u32,);
    match call.store(&mut dest) {
        Err(CallError::Remote { name, message, .. }) => {
            assert_eq!(name, "org.freedesktop.DBus.Error.ServiceUnknown");
            assert_eq!(message, "The name is not activatable");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(dest, (0,));
}

#[tokio::test]
async fn mismatched_reply_leaves_destinations() {
    let (conn, mut out, bus) = setup();
    let responder = tokio::spawn(async move {
        let msg = out.recv().await.unwrap();
        conn.handle_reply(Message::method_return(msg.serial, args!["one", "two"]));
    });
    let call = bus.call("ListNames", Flags::NONE, args![]).await.unwrap();
    responder.await.unwrap();

    let mut dest = (String::from("keep"),);
    let err = call.store(&mut dest).unwrap_err();
    assert!(matches!(err, CallError::SignatureMismatch(_)));
    assert_eq!(dest.0, "keep");
}

#[tokio::test]
async fn close_resolves_waiting_callers() {
    let (conn, mut out, bus) = setup();
    let waiter = tokio::spawn(async move { bus.call("Hang", Flags::NONE, args![]).await });
    out.recv().await.unwrap();
    conn.close();

    let call = waiter.await.unwrap().unwrap();
    assert_eq!(call.err(), Some(&CallError::ConnectionClosed));
    assert_eq!(conn.pending_calls(), 0);
}

#[tokio::test]
async fn dispatch_after_close_fails_through_the_call() {
    let (conn, mut out, bus) = setup();
    conn.close();

    let call = bus.call("Ping", Flags::NONE, args![]).await.unwrap();
    assert_eq!(call.reply::<()>().unwrap_err(), CallError::ConnectionClosed);
    assert!(bus
        .go("Notify", Flags::NO_REPLY_EXPECTED, None, args![])
        .await
        .is_fired());
    assert!(out.try_recv().is_err());
}

#[tokio::test]
async fn dropped_outbound_path_fails_the_call() {
    let (conn, out, bus) = setup();
    drop(out);

    let call = bus.call("Ping", Flags::NONE, args![]).await.unwrap();
    assert_eq!(call.err(), Some(&CallError::ConnectionClosed));
    assert_eq!(conn.pending_calls(), 0);
}
