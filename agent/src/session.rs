use std::{future::Future, pin::Pin, time::Duration};

use lib::protocol::{AdapterKey, FrameBuffer, Message, ProtocolError, decode_frame, write_frame};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, split},
    task::{JoinError, JoinSet},
    time::timeout,
};
use tracing::{debug, error, info, warn};

use crate::{
    commands::{CommandHandler, Outcome},
    error::BoxError,
};

const READ_CHUNK_BYTES: usize = 4096;

/// How long in-flight commands may keep running once shutdown has begun.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Inbound side of one controller connection: owns the receive buffer.
pub struct Session {
    buffer: FrameBuffer,
    key: AdapterKey,
}

impl Session {
    pub fn new(key: AdapterKey) -> Self {
        Self {
            buffer: FrameBuffer::new(),
            key,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.push(data);
    }

    /// Decodes the next complete frame, in arrival order.
    ///
    /// An error means the stream can no longer be trusted and the connection
    /// must be dropped; frames before it have already been handed out.
    pub fn next_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        let Some(frame) = self.buffer.next_frame()? else {
            return Ok(None);
        };
        let message = decode_frame(&frame, &self.key)?;
        debug!("message from controller: {:?}", message);
        Ok(Some(message))
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.pending_len()
    }
}

/// Why [`serve`] returned.
#[derive(Debug)]
pub enum SessionEnd {
    Closed,
    Failed(BoxError),
    Shutdown,
}

/// Runs one controller connection until it closes, fails, or `shutdown` resolves.
///
/// Commands run concurrently; each reply is written as soon as its command
/// finishes, so replies may leave in a different order than requests arrived.
/// Commands received before a shutdown or a fatal frame still get
/// [`SHUTDOWN_GRACE`] to answer before the socket is closed.
pub async fn serve<S, F>(
    stream: S,
    key: &AdapterKey,
    handler: &CommandHandler,
    mut shutdown: Pin<&mut F>,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite,
    F: Future<Output = ()>,
{
    let (mut reader, mut writer) = split(stream);
    let mut session = Session::new(key.clone());
    let mut inflight: JoinSet<Outcome> = JoinSet::new();
    let mut chunk = [0u8; READ_CHUNK_BYTES];

    let end = loop {
        tokio::select! {
            _ = &mut shutdown => break SessionEnd::Shutdown,
            read_result = reader.read(&mut chunk) => {
                let n = match read_result {
                    Ok(0) => break SessionEnd::Closed,
                    Ok(n) => n,
                    Err(err) => break SessionEnd::Failed(Box::new(err)),
                };
                session.push(&chunk[..n]);
                let failure = loop {
                    match session.next_message() {
                        Ok(Some(message)) => {
                            let handler = handler.clone();
                            inflight.spawn(async move { handler.dispatch(message).await });
                        }
                        Ok(None) => break None,
                        Err(err) => break Some(err),
                    }
                };
                if let Some(err) = failure {
                    warn!("decrypt of controller data failed: {}", err);
                    break SessionEnd::Failed(Box::new(err));
                }
            }
            Some(joined) = inflight.join_next() => {
                deliver(&mut writer, key, joined).await;
            }
        }
    };

    if !matches!(end, SessionEnd::Closed) && !inflight.is_empty() {
        info!("waiting for {} in-flight commands", inflight.len());
        let drained = timeout(SHUTDOWN_GRACE, async {
            while let Some(joined) = inflight.join_next().await {
                deliver(&mut writer, key, joined).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("abandoning {} in-flight commands", inflight.len());
        }
    }
    inflight.abort_all();

    if let Err(err) = writer.shutdown().await {
        debug!("closing controller socket: {}", err);
    }
    end
}

async fn deliver<W>(writer: &mut W, key: &AdapterKey, joined: Result<Outcome, JoinError>)
where
    W: AsyncWrite + Unpin,
{
    match joined {
        Ok(Outcome::Reply(message)) => {
            debug!("send to controller: {:?}", message);
            if let Err(err) = write_frame(writer, &message, key).await {
                warn!("sending {} reply failed: {}", message.cmd(), err);
            }
        }
        Ok(Outcome::NoReply) => {}
        Ok(Outcome::Failed(err)) => warn!("searching for sensors failed: {}", err),
        Err(err) => error!("command task failed: {}", err),
    }
}
