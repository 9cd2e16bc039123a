//! Bidirectional exec/attach runner over a channel-framed WebSocket.
use std::future::Future;

use bytes::Bytes;
use futures::{
    channel::{mpsc, oneshot},
    future::{
        select,
        Either::{Left, Right},
    },
    FutureExt, SinkExt, Stream, StreamExt,
};
use kubedyn_core::{params::ConnectParams, Status};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio_tungstenite::{tungstenite as ws, WebSocketStream};

use crate::{Client, Error, Operation, Result, Verb};

// Channel tags of the v4 binary subprotocol; the first byte of every frame.
const STDIN_CHANNEL: u8 = 0;
const STDOUT_CHANNEL: u8 = 1;
const STDERR_CHANNEL: u8 = 2;
// status channel receives a `Status` object on exit.
const STATUS_CHANNEL: u8 = 3;

const MAX_BUF_SIZE: usize = 1024;
const EVENT_CHANNEL_SIZE: usize = 16;

/// A demultiplexed message from a connect stream
#[derive(Debug)]
pub enum ChannelMessage {
    /// Output written by the remote process to its stdout
    Stdout(Bytes),
    /// Output written by the remote process to its stderr
    Stderr(Bytes),
    /// The terminal `Status` object from the error channel
    Status(Box<Status>),
    /// A frame from a channel this client does not interpret (e.g. resize)
    Other(u8, Bytes),
}

/// Represents a connected process in a container, from exec or attach.
///
/// Provides a writer to `stdin`, a pull-based stream of demultiplexed
/// [`ChannelMessage`]s, and a one-shot future resolving with the process
/// `Status`. Dropping everything (or calling [`abort`](Self::abort)) closes
/// the underlying socket and stops the pump task.
pub struct ConnectedProcess {
    stdin_writer: Option<DuplexStream>,
    events: Option<mpsc::Receiver<Result<ChannelMessage>>>,
    status_rx: Option<oneshot::Receiver<Status>>,
    task: tokio::task::JoinHandle<Result<()>>,
}

impl ConnectedProcess {
    pub(crate) fn new<S>(stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Sized + Send + 'static,
    {
        // Always create a pipe for stdin; the caller only gets the handle if
        // they asked the server for the stdin channel.
        let (stdin_writer, stdin_reader) = tokio::io::duplex(MAX_BUF_SIZE);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (status_tx, status_rx) = oneshot::channel();

        let task = tokio::spawn(start_message_loop(stream, stdin_reader, events_tx, status_tx));

        ConnectedProcess {
            stdin_writer: Some(stdin_writer),
            events: Some(events_rx),
            status_rx: Some(status_rx),
            task,
        }
    }

    /// Async writer to stdin; frames are channel-tagged and forwarded as written.
    ///
    /// Returns `None` if called more than once.
    pub fn stdin(&mut self) -> Option<impl AsyncWrite + Unpin> {
        self.stdin_writer.take()
    }

    /// The stream of demultiplexed channel messages.
    ///
    /// Ends after a close frame with code 1000 or when the server hangs up.
    /// Returns `None` if called more than once.
    pub fn events(&mut self) -> Option<impl Stream<Item = Result<ChannelMessage>>> {
        self.events.take()
    }

    /// Take a future that resolves with the status object or when the sender is dropped.
    ///
    /// Returns `None` if called more than once.
    pub fn take_status(&mut self) -> Option<impl Future<Output = Option<Status>>> {
        self.status_rx.take().map(|recv| recv.map(|res| res.ok()))
    }

    /// Abort the pump task, closing the remote connection.
    #[inline]
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Waits for the connection to terminate.
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .unwrap_or_else(|e| Err(Error::Service(Box::new(e))))
    }
}

impl Client {
    /// Open the bidirectional stream a connect operation describes.
    ///
    /// Upgrades to a WebSocket speaking `v4.channel.k8s.io` carrying the same
    /// authentication material as plain requests. Only the exec/attach family
    /// connects this way; log following is served over plain HTTP via
    /// [`Client::run_stream`].
    pub async fn connect(&self, op: &Operation) -> Result<ConnectedProcess> {
        if op.verb != Verb::Connect {
            return Err(Error::BuildRequest(kubedyn_core::Error::Validation(format!(
                "connect requires the connect verb, got {}",
                op.verb
            ))));
        }
        if let Some(ConnectParams::Log(_)) = op.connect_params {
            return Err(Error::BuildRequest(kubedyn_core::Error::Validation(
                "log streaming is plain http, use run_stream".into(),
            )));
        }
        let request = self.build_request(op).await?;
        let stream = self.connect_upgrade(request).await?;
        Ok(ConnectedProcess::new(stream))
    }
}

async fn start_message_loop<S>(
    stream: WebSocketStream<S>,
    stdin: impl AsyncRead + Unpin,
    mut events: mpsc::Sender<Result<ChannelMessage>>,
    status_tx: oneshot::Sender<Status>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Sized + Send + 'static,
{
    let mut stdin_stream = tokio_util::io::ReaderStream::new(stdin);
    let (mut server_send, mut server_recv) = stream.split();
    let mut server_msg = server_recv.next();
    let mut next_stdin = stdin_stream.next();
    let mut status_tx = Some(status_tx);

    loop {
        match select(server_msg, next_stdin).await {
            // from server
            Left((Some(message), p_next_stdin)) => {
                match message {
                    Ok(ws::Message::Binary(bin)) => {
                        if let Some(decoded) = decode_frame(bin) {
                            let terminal = matches!(&decoded, Ok(ChannelMessage::Status(_)));
                            if let Ok(ChannelMessage::Status(status)) = &decoded {
                                if let Some(tx) = status_tx.take() {
                                    // the consumer may not care about the exit signal
                                    let _ = tx.send((**status).clone());
                                }
                            }
                            if events.send(decoded).await.is_err() {
                                // consumer dropped the stream; close the socket
                                break;
                            }
                            if terminal {
                                break;
                            }
                        }
                    }

                    Ok(ws::Message::Close(frame)) => {
                        let normal = frame
                            .as_ref()
                            .map(|f| {
                                f.code == ws::protocol::frame::coding::CloseCode::Normal
                                    && f.reason.is_empty()
                            })
                            .unwrap_or(true);
                        if !normal {
                            let reason = frame
                                .map(|f| format!("{}: {}", u16::from(f.code), f.reason))
                                .unwrap_or_default();
                            let _ = events
                                .send(Err(Error::StreamInterrupted { retries: 0, reason }))
                                .await;
                        }
                        break;
                    }

                    // pings are answered by tungstenite, text frames are not
                    // part of the protocol
                    Ok(_) => {}

                    Err(err) => {
                        let _ = events
                            .send(Err(Error::StreamInterrupted {
                                retries: 0,
                                reason: err.to_string(),
                            }))
                            .await;
                        break;
                    }
                }
                server_msg = server_recv.next();
                next_stdin = p_next_stdin;
            }

            Left((None, _)) => {
                // Connection closed properly
                break;
            }

            // from stdin
            Right((Some(Ok(bytes)), p_server_msg)) => {
                if !bytes.is_empty() {
                    let mut vec = Vec::with_capacity(bytes.len() + 1);
                    vec.push(STDIN_CHANNEL);
                    vec.extend_from_slice(&bytes[..]);
                    server_send
                        .send(ws::Message::binary(vec))
                        .await
                        .map_err(|e| Error::Service(Box::new(e)))?;
                }
                server_msg = p_server_msg;
                next_stdin = stdin_stream.next();
            }

            Right((Some(Err(err)), _)) => {
                return Err(Error::ReadEvents(err));
            }

            Right((None, _)) => {
                // Stdin closed (writer half dropped).
                // Let the server know and disconnect.
                server_send.close().await.map_err(|e| Error::Service(Box::new(e)))?;
                break;
            }
        }
    }

    Ok(())
}

// Demultiplex one binary frame by its channel tag.
//
// A frame of size 1 (only the channel number) is sent on connection and
// carries nothing; stdin (0) is never received from the server.
fn decode_frame(bin: Bytes) -> Option<Result<ChannelMessage>> {
    if bin.len() <= 1 {
        return None;
    }
    let payload = bin.slice(1..);
    match bin[0] {
        STDOUT_CHANNEL => Some(Ok(ChannelMessage::Stdout(payload))),
        STDERR_CHANNEL => Some(Ok(ChannelMessage::Stderr(payload))),
        STATUS_CHANNEL => match serde_json::from_slice::<Status>(&payload) {
            Ok(status) => Some(Ok(ChannelMessage::Status(Box::new(status)))),
            Err(e) => Some(Err(Error::SerdeError(e))),
        },
        STDIN_CHANNEL => None,
        other => Some(Ok(ChannelMessage::Other(other, payload))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::pin_mut;
    use tokio_tungstenite::tungstenite::protocol::{
        frame::coding::CloseCode, frame::CloseFrame, Role,
    };

    #[test]
    fn frames_demultiplex_by_channel_tag() {
        let stdout = decode_frame(Bytes::from_static(b"\x01hello")).unwrap().unwrap();
        assert!(matches!(stdout, ChannelMessage::Stdout(b) if &b[..] == b"hello"));

        let stderr = decode_frame(Bytes::from_static(b"\x02oops")).unwrap().unwrap();
        assert!(matches!(stderr, ChannelMessage::Stderr(b) if &b[..] == b"oops"));

        let status_json = br#"{"status":"Success","metadata":{}}"#;
        let mut frame = vec![3u8];
        frame.extend_from_slice(status_json);
        let status = decode_frame(Bytes::from(frame)).unwrap().unwrap();
        assert!(matches!(status, ChannelMessage::Status(s) if s.status == "Success"));

        // resize-style unknown channels are passed through raw
        let other = decode_frame(Bytes::from_static(b"\x04raw")).unwrap().unwrap();
        assert!(matches!(other, ChannelMessage::Other(4, b) if &b[..] == b"raw"));

        // channel-only frames sent on connection carry nothing
        assert!(decode_frame(Bytes::from_static(b"\x01")).is_none());
        // stdin is never received
        assert!(decode_frame(Bytes::from_static(b"\x00x")).is_none());
    }

    async fn ws_pair() -> (
        WebSocketStream<tokio::io::DuplexStream>,
        WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        (client, server)
    }

    #[tokio::test]
    async fn stdout_then_normal_close_completes_the_stream() {
        let (client_ws, mut server_ws) = ws_pair().await;

        let server = tokio::spawn(async move {
            let mut frame = vec![STDOUT_CHANNEL];
            frame.extend_from_slice(b"Fri Apr 17 23:55:24 UTC 2020\n");
            server_ws.send(ws::Message::binary(frame)).await.unwrap();
            server_ws
                .send(ws::Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                })))
                .await
                .unwrap();
        });

        let mut process = ConnectedProcess::new(client_ws);
        let events = process.events().unwrap();
        pin_mut!(events);

        let first = events.next().await.unwrap().unwrap();
        assert!(
            matches!(first, ChannelMessage::Stdout(b) if &b[..] == b"Fri Apr 17 23:55:24 UTC 2020\n")
        );
        assert!(events.next().await.is_none());

        server.await.unwrap();
        process.join().await.unwrap();
    }

    #[tokio::test]
    async fn status_frame_resolves_the_exit_future() {
        let (client_ws, mut server_ws) = ws_pair().await;

        let server = tokio::spawn(async move {
            let status = serde_json::json!({
                "status": "Failure",
                "message": "command terminated with exit code 1",
                "reason": "NonZeroExitCode"
            });
            let mut frame = vec![STATUS_CHANNEL];
            frame.extend_from_slice(&serde_json::to_vec(&status).unwrap());
            server_ws.send(ws::Message::binary(frame)).await.unwrap();
        });

        let mut process = ConnectedProcess::new(client_ws);
        let status_fut = process.take_status().unwrap();
        let events = process.events().unwrap();
        pin_mut!(events);

        let first = events.next().await.unwrap().unwrap();
        assert!(matches!(first, ChannelMessage::Status(s) if s.reason == "NonZeroExitCode"));
        assert!(events.next().await.is_none());
        let status = status_fut.await.expect("status was sent");
        assert_eq!(status.message, "command terminated with exit code 1");

        server.await.unwrap();
        process.join().await.unwrap();
    }

    #[tokio::test]
    async fn stdin_frames_are_channel_tagged() {
        let (client_ws, mut server_ws) = ws_pair().await;
        let mut process = ConnectedProcess::new(client_ws);
        let mut stdin = process.stdin().unwrap();

        tokio::io::AsyncWriteExt::write_all(&mut stdin, b"date\n").await.unwrap();
        drop(stdin);

        match server_ws.next().await.unwrap().unwrap() {
            ws::Message::Binary(bin) => {
                assert_eq!(bin[0], STDIN_CHANNEL);
                assert_eq!(&bin[1..], b"date\n");
            }
            other => panic!("unexpected message {other:?}"),
        }
        process.abort();
    }
}
