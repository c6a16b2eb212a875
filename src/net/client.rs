use crate::{
    conn::{Conn, ConnConfig},
    message::Message,
};
use async_bincode::{tokio::AsyncBincodeStream, AsyncDestination};
use futures::{SinkExt, StreamExt};
use std::io;
use tokio::{
    io::{AsyncRead, AsyncWrite, BufStream},
    net::{TcpStream, ToSocketAddrs},
};

/// Runs a connection over `stream`, framing messages with bincode.
///
/// A writer task drains the outbound queue and a reader task resolves
/// incoming replies. The connection is closed once the stream ends or fails,
/// which resolves every pending call.
pub fn connect<S>(stream: S, config: ConnConfig) -> Conn
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (conn, mut outbound) = Conn::new(config);
    let framed: AsyncBincodeStream<S, Message, Message, AsyncDestination> =
        AsyncBincodeStream::from(stream).for_async();
    let (mut sink, mut source) = framed.split();

    let writer_conn = conn.clone();
    tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let serial = msg.serial;
            if let Err(err) = sink.send(msg).await {
                tracing::warn!(%err, serial, "writing message failed");
                // The lost message's call, and every other pending one, fail here.
                writer_conn.close();
                break;
            }
        }
        tracing::debug!("writer finished");
    });

    let reader_conn = conn.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = reader_conn.shutdown_requested() => break,
                next = source.next() => match next {
                    Some(Ok(msg)) => {
                        reader_conn.handle_reply(msg);
                    }
                    Some(Err(err)) => {
                        tracing::warn!(%err, "reading message failed");
                        break;
                    }
                    None => {
                        tracing::debug!("stream closed by peer");
                        break;
                    }
                },
            }
        }
        reader_conn.close();
    });

    conn
}

/// Connects to a bus listening on `addr`.
pub async fn connect_tcp(addr: impl ToSocketAddrs, config: ConnConfig) -> io::Result<Conn> {
    let sock = TcpStream::connect(addr).await?;
    Ok(connect(BufStream::new(sock), config))
}
