//! Load-generating client driver.
//!
//! Each simulated client opens its own connection, streams an alternating
//! ADD/SUBTRACT sequence followed by TERMINATE, and waits for the single
//! COUNTER_REPLY the server sends before closing.

use crate::protocol::{FrameError, Message};
use crate::report::Reporter;
use crate::runtime::FrameBuffer;
use bytes::BytesMut;
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Command-line arguments for the client driver
#[derive(Parser, Debug, Clone)]
#[command(name = "client")]
#[command(version = "0.1.0")]
#[command(about = "Drive concurrent sessions against the counter server", long_about = None)]
pub struct ClientArgs {
    /// Number of simulated clients (one connection each)
    pub clients: usize,

    /// Server hostname
    pub host: String,

    /// Server port
    pub port: u16,

    /// Operations each client sends before terminating
    pub messages: usize,

    /// Operand of every ADD
    #[arg(allow_negative_numbers = true)]
    pub add: i64,

    /// Operand of every SUBTRACT
    #[arg(allow_negative_numbers = true)]
    pub sub: i64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

impl ClientArgs {
    pub fn workload(&self) -> Workload {
        Workload {
            messages: self.messages,
            add: self.add,
            sub: self.sub,
        }
    }
}

/// The fixed operation sequence every simulated client sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    pub messages: usize,
    pub add: i64,
    pub sub: i64,
}

impl Workload {
    /// ADD on even indices, SUBTRACT on odd ones.
    pub fn operations(&self) -> impl Iterator<Item = Message> {
        let Workload { messages, add, sub } = *self;
        (0..messages).map(move |i| {
            if i % 2 == 0 {
                Message::Add(add)
            } else {
                Message::Subtract(sub)
            }
        })
    }

    /// Net change one session applies to the counter.
    pub fn net_effect(&self) -> i64 {
        let adds = self.messages.div_ceil(2) as i64;
        let subs = (self.messages / 2) as i64;
        adds.wrapping_mul(self.add)
            .wrapping_sub(subs.wrapping_mul(self.sub))
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    #[error("server closed the connection without replying")]
    NoReply,

    #[error("expected a counter reply, got {0:?}")]
    UnexpectedReply(Message),
}

/// Send `operations` followed by TERMINATE and return the counter reply.
pub async fn exchange<S, I>(stream: &mut S, operations: I) -> Result<i64, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    I: IntoIterator<Item = Message>,
{
    let mut out = BytesMut::new();
    for message in operations {
        message.encode_into(&mut out);
    }
    Message::Terminate.encode_into(&mut out);

    stream.write_all(&out).await?;
    stream.flush().await?;

    let mut frames = FrameBuffer::default();
    let mut chunk = [0u8; 64];
    loop {
        if let Some(message) = frames.try_extract_frame()? {
            return match message {
                Message::CounterReply(value) => Ok(value),
                other => Err(ClientError::UnexpectedReply(other)),
            };
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ClientError::NoReply);
        }
        frames.feed(&chunk[..n]);
    }
}

/// Run one simulated client's session over an established stream.
pub async fn run_session<S>(stream: &mut S, workload: &Workload) -> Result<i64, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    exchange(stream, workload.operations()).await
}

/// Outcome of a whole client run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClientSummary {
    pub completed: usize,
    pub failed: usize,
}

/// Spawn every simulated client and report each counter value as it arrives.
pub async fn run<W>(args: &ClientArgs, reporter: Arc<Reporter<W>>) -> ClientSummary
where
    W: Write + Send + 'static,
{
    let workload = args.workload();
    let addr = format!("{}:{}", args.host, args.port);

    let tasks: Vec<_> = (0..args.clients)
        .map(|id| {
            let addr = addr.clone();
            let reporter = Arc::clone(&reporter);
            tokio::spawn(async move {
                let mut stream = TcpStream::connect(&addr)
                    .await
                    .map_err(|source| ClientError::Connect { addr, source })?;
                let value = run_session(&mut stream, &workload).await?;
                debug!(client = id, value, "Session complete");
                reporter.report(value)?;
                Ok::<_, ClientError>(value)
            })
        })
        .collect();

    let mut summary = ClientSummary::default();
    for (id, task) in tasks.into_iter().enumerate() {
        match task.await {
            Ok(Ok(_)) => summary.completed += 1,
            Ok(Err(e)) => {
                warn!(client = id, error = %e, "Session failed");
                summary.failed += 1;
            }
            Err(e) => {
                warn!(client = id, error = %e, "Session task panicked");
                summary.failed += 1;
            }
        }
    }
    summary
}
