use std::io;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Tag carried by a message fanned out to every session except the sender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BroadcastTag {
    Message,
    ClientConnect,
    ClientExit,
    ClientRename,
    UpdateFile,
}

impl BroadcastTag {
    /// Tag as it appears on the wire, also echoed in `return-cmd`.
    pub fn as_str(self) -> &'static str {
        match self {
            BroadcastTag::Message => "message",
            BroadcastTag::ClientConnect => "client-connect",
            BroadcastTag::ClientExit => "client-exit",
            BroadcastTag::ClientRename => "client-rename",
            BroadcastTag::UpdateFile => "update-file",
        }
    }
}

/// Message relayed to every session other than the originator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub cmd: BroadcastTag,
    pub from: String,
    pub payload: String,
}

/// Constant tag on every status response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResponseTag {
    #[serde(rename = "return-status")]
    ReturnStatus,
}

/// Status reply returned only to the session that issued a command.
///
/// `payload` is empty for every command except connect, which carries the
/// full shared document so a new session starts from the current content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientResponse {
    pub cmd: ResponseTag,
    #[serde(rename = "return-cmd")]
    pub return_cmd: String,
    pub status: bool,
    pub payload: String,
}

/// Incremental reader for back-to-back JSON values on a byte stream.
///
/// The wire carries no delimiters; a frame ends wherever its JSON value
/// balances. Bytes past the decoded value stay buffered for the next call.
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Decode the next JSON value off the stream.
    ///
    /// Returns `None` on a clean end of stream. A stream that ends inside a
    /// value yields `UnexpectedEof`; bytes that are not valid JSON yield
    /// `InvalidData`.
    pub async fn read_frame<T>(&mut self) -> io::Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        loop {
            let mut values = serde_json::Deserializer::from_slice(&self.buf).into_iter::<T>();
            match values.next() {
                Some(Ok(value)) => {
                    let consumed = values.byte_offset();
                    self.buf.drain(..consumed);
                    return Ok(Some(value));
                }
                // Incomplete value so far; pull more bytes off the socket.
                Some(Err(err)) if err.is_eof() => {}
                Some(Err(err)) => return Err(to_io_error(err)),
                None => {}
            }

            let mut chunk = [0u8; 4096];
            let read = self.reader.read(&mut chunk).await?;
            if read == 0 {
                return if self.buf.iter().all(u8::is_ascii_whitespace) {
                    Ok(None)
                } else {
                    Err(io::ErrorKind::UnexpectedEof.into())
                };
            }
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }
}

/// Encode one value as a JSON frame and flush it so peers get timely updates.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
