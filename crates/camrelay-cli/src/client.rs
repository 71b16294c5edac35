//! Line-oriented client for the remote-control endpoint.

use anyhow::{bail, Context, Result};
use camrelay_core::{Request, Response};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// How many times the reply is polled for, and how long each poll waits.
pub const REPLY_POLLS: u32 = 5;
pub const REPLY_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct RemoteClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    polls: u32,
    poll_interval: Duration,
}

impl RemoteClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = tokio::time::timeout(
            REPLY_POLL_INTERVAL * REPLY_POLLS,
            TcpStream::connect(addr),
        )
        .await
        .with_context(|| format!("timed out connecting to {addr}"))?
        .with_context(|| format!("cannot connect to {addr}"))?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer,
            polls: REPLY_POLLS,
            poll_interval: REPLY_POLL_INTERVAL,
        })
    }

    pub fn with_reply_wait(mut self, polls: u32, interval: Duration) -> Self {
        self.polls = polls.max(1);
        self.poll_interval = interval;
        self
    }

    /// Send one request and wait for its reply.
    pub async fn request(&mut self, request: &Request) -> Result<Response> {
        let mut line = request.encode();
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .context("sending request")?;

        let mut reply = String::new();
        for poll in 1..=self.polls {
            match tokio::time::timeout(self.poll_interval, self.reader.read_line(&mut reply)).await
            {
                Ok(Ok(0)) => bail!("server closed the connection"),
                Ok(Ok(_)) => {
                    return Response::decode(reply.trim_end())
                        .with_context(|| format!("unexpected reply {:?}", reply.trim_end()));
                }
                Ok(Err(e)) => return Err(e).context("reading reply"),
                Err(_) => tracing::debug!(poll, "waiting for reply"),
            }
        }
        bail!(
            "no reply after {} x {:?}",
            self.polls,
            self.poll_interval
        )
    }
}

/// Human-readable form of a reply.
pub fn render(response: &Response) -> String {
    match response {
        Response::Ok => "OK".into(),
        Response::Invalid => "INVALID".into(),
        Response::Fault => "FAULT".into(),
        Response::Snapshot(snapshot) if snapshot.is_empty() => "(no features known)".into(),
        Response::Snapshot(snapshot) => snapshot
            .iter()
            .map(|(key, value)| format!("{:<16}{value}", key.wire_name()))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
