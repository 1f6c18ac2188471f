use std::io;

use anyhow::Result;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::query::QueryRunner;
use crate::wire;

/// Longest request line accepted on the stream.
const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// One framed input line.
#[derive(Debug, PartialEq, Eq)]
enum Request {
    Line(String),
    /// A line that could not be read as text: invalid UTF-8 or too long.
    Unreadable(String),
}

/// [`LinesCodec`] that reports undecodable lines as frames instead of
/// failing the stream. Only I/O errors end it.
struct RequestCodec {
    lines: LinesCodec,
}

impl RequestCodec {
    fn new(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
        }
    }

    fn recover(
        decoded: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Request>, LinesCodecError> {
        match decoded {
            Ok(line) => Ok(line.map(Request::Line)),
            // The codec skips the rest of the line on its next call.
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Ok(Some(Request::Unreadable("line exceeds the length limit".to_string())))
            }
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(Request::Unreadable(e.to_string())))
            }
            Err(e) => Err(e),
        }
    }
}

impl Decoder for RequestCodec {
    type Item = Request;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Request>, LinesCodecError> {
        Self::recover(self.lines.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Request>, LinesCodecError> {
        Self::recover(self.lines.decode_eof(buf))
    }
}

/// Serves newline-delimited JSON requests until `input` closes. Every request
/// gets exactly one reply line. Returns the number of requests handled.
pub async fn serve<R, W>(runner: &mut QueryRunner, input: R, mut output: W) -> Result<usize>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = FramedRead::new(input, RequestCodec::new(MAX_LINE_BYTES));
    let mut handled = 0;

    while let Some(request) = lines.next().await {
        let (success, reply) = match request? {
            Request::Line(line) if line.trim().is_empty() => continue,
            Request::Line(line) => runner.query(&line),
            Request::Unreadable(reason) => {
                warn!(%reason, "unreadable request line");
                (false, wire::unparseable().to_string())
            }
        };
        debug!(success, "request handled");
        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
        handled += 1;
    }

    info!(handled, "input closed");
    Ok(handled)
}

/// [`serve`] bound to the process stdin and stdout.
pub async fn serve_stdio(runner: &mut QueryRunner) -> Result<usize> {
    serve(runner, tokio::io::stdin(), tokio::io::stdout()).await
}
