// MessageChannel: newline-delimited JSON over the two byte streams shared
// with the parent process.
//
// Wire format: one JSON document per line. The worker sends
// `{"event": ..., "content": ...}` and bare `{"response": "OK"}`; the parent
// sends `{"response": ...}` replies and job configurations.
//
// Every line is written with a single `write_all` followed by a flush. The
// channel neither retries nor buffers: any I/O failure is reported as
// `ChannelError::LostConnection`.

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::constants::{RESPONSE_OK, UNSERIALIZABLE_PLACEHOLDER};
use crate::error::ChannelError;

type Result<T> = std::result::Result<T, ChannelError>;

const READ_STREAM: &str = "read_pipe";
const WRITE_STREAM: &str = "write_pipe";

/// Bidirectional JSON-line channel between the worker and its parent.
pub struct MessageChannel {
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    writer: Box<dyn AsyncWrite + Unpin + Send>,
    /// Echo every line to the debug log.
    echo: bool,
    pid: u32,
}

impl MessageChannel {
    /// Build a channel from any pair of async streams.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            reader: Box::new(BufReader::new(reader)),
            writer: Box::new(writer),
            echo: false,
            pid: std::process::id(),
        }
    }

    /// Build a channel from the two descriptors the parent passed on the
    /// command line.
    ///
    /// Both descriptors are checked to be open before the channel takes
    /// ownership of them.
    #[cfg(unix)]
    pub fn from_raw_fds(
        read_fd: std::os::unix::io::RawFd,
        write_fd: std::os::unix::io::RawFd,
    ) -> std::io::Result<Self> {
        use nix::fcntl::{fcntl, FcntlArg};
        use std::os::unix::io::FromRawFd;

        for fd in [read_fd, write_fd] {
            fcntl(fd, FcntlArg::F_GETFD).map_err(|errno| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("file descriptor {fd} is not open: {errno}"),
                )
            })?;
        }
        if read_fd == write_fd {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "the read and write descriptors must be different",
            ));
        }

        // SAFETY: both descriptors were verified to be open, are distinct, and
        // are handed over to this process by the parent for its exclusive use.
        let read_file = unsafe { std::fs::File::from_raw_fd(read_fd) };
        let write_file = unsafe { std::fs::File::from_raw_fd(write_fd) };

        Ok(Self::new(
            tokio::fs::File::from_std(read_file),
            tokio::fs::File::from_std(write_file),
        ))
    }

    /// Turn on echoing of every message to the debug log.
    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    pub fn echo(&self) -> bool {
        self.echo
    }

    fn print_debug(&self, what: &str, line: &str) {
        if self.echo {
            tracing::debug!("WORKER {} {} {}", self.pid, what, line);
        }
    }

    /// Serialize `{event, content}` and send it as one line.
    ///
    /// Content that cannot be serialized is replaced by a placeholder string
    /// rather than aborting the send.
    pub async fn send_message<T: Serialize + ?Sized>(
        &mut self,
        event: &str,
        content: &T,
    ) -> Result<()> {
        let content = serde_json::to_value(content).unwrap_or_else(|e| {
            tracing::warn!("Cannot serialize the content of {} in JSON: {}", event, e);
            Value::String(UNSERIALIZABLE_PLACEHOLDER.to_string())
        });
        let line = json!({ "event": event, "content": content }).to_string();
        self.print_debug("send_message:", &line);
        self.write_line(line).await
    }

    /// Send a bare `{"response": ...}` line.
    pub async fn send_response(&mut self, response: &str) -> Result<()> {
        let line = json!({ "response": response }).to_string();
        self.print_debug("send_response:", &line);
        self.write_line(line).await
    }

    async fn write_line(&mut self, mut line: String) -> Result<()> {
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ChannelError::lost(WRITE_STREAM, e))?;
        self.writer
            .flush()
            .await
            .map_err(|e| ChannelError::lost(WRITE_STREAM, e))
    }

    /// Block until the parent sends one line, and parse it.
    ///
    /// A line that is not valid UTF-8 is malformed, like any other
    /// undecodable line; the stream itself is still usable.
    pub async fn read_message(&mut self) -> Result<Value> {
        let mut line = Vec::new();
        let read = self
            .reader
            .read_until(b'\n', &mut line)
            .await
            .map_err(|e| ChannelError::lost(READ_STREAM, e))?;
        if read == 0 {
            return Err(ChannelError::lost(
                READ_STREAM,
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "the parent closed the stream",
                ),
            ));
        }

        let end = line
            .iter()
            .rposition(|b| *b != b'\n' && *b != b'\r')
            .map_or(0, |i| i + 1);
        let trimmed = &line[..end];
        if self.echo {
            self.print_debug("read_message ->", &String::from_utf8_lossy(trimmed));
        }
        serde_json::from_slice(trimmed).map_err(|source| ChannelError::MalformedMessage {
            line: String::from_utf8_lossy(trimmed).into_owned(),
            source,
        })
    }

    /// Read a `{"response": ...}` reply and return the response value.
    pub async fn read_response(&mut self) -> Result<Value> {
        let mut message = self.read_message().await?;
        match message.get_mut("response") {
            Some(response) => Ok(response.take()),
            None => Err(ChannelError::UnexpectedResponse(message)),
        }
    }

    /// Send a message and require the parent to acknowledge it with OK.
    pub async fn send_message_and_wait_for_ok<T: Serialize + ?Sized>(
        &mut self,
        event: &str,
        content: &T,
    ) -> Result<()> {
        self.send_message(event, content).await?;
        let message = self.read_message().await?;
        if message.get("response").and_then(Value::as_str) == Some(RESPONSE_OK) {
            Ok(())
        } else {
            Err(ChannelError::UnexpectedResponse(message))
        }
    }
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("echo", &self.echo)
            .field("pid", &self.pid)
            .finish()
    }
}
