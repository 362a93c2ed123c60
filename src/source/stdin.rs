use crate::source::line::SourceKind;
use crate::source::reader::{LineSource, RawLine, SourceError};
use async_trait::async_trait;
use std::io::BufRead;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

/// Lines buffered between the reader thread and the source task.
const THREAD_CHANNEL_CAPACITY: usize = 64;

/// Reads newline-delimited text from any async reader until it closes.
/// End of input is normal termination.
pub struct PipeSource<R> {
    source_id: String,
    label: String,
    reader: BufReader<R>,
    buf: Vec<u8>,
    bytes_read: u64,
}

/// Line source fed by a dedicated OS thread doing blocking reads.
///
/// Used for process stdin: a read on tokio's blocking pool cannot be
/// interrupted, so a terminal waiting for input would hold up runtime
/// shutdown. The thread is left behind at exit instead.
pub struct StdinSource {
    source_id: String,
    label: String,
    reader: Option<Box<dyn BufRead + Send>>,
    lines: Option<mpsc::Receiver<std::io::Result<Vec<u8>>>>,
    bytes_read: u64,
}

impl StdinSource {
    pub fn stdin(source_id: impl Into<String>) -> Self {
        Self::from_blocking(
            source_id,
            "<stdin>",
            std::io::BufReader::new(std::io::stdin()),
        )
    }

    pub fn from_blocking(
        source_id: impl Into<String>,
        label: impl Into<String>,
        reader: impl BufRead + Send + 'static,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            label: label.into(),
            reader: Some(Box::new(reader)),
            lines: None,
            bytes_read: 0,
        }
    }
}

fn read_lines(mut reader: Box<dyn BufRead + Send>, tx: mpsc::Sender<std::io::Result<Vec<u8>>>) {
    loop {
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if tx.blocking_send(Ok(buf)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                break;
            }
        }
    }
}

#[async_trait]
impl LineSource for StdinSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Stdin
    }

    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };
        let (tx, rx) = mpsc::channel(THREAD_CHANNEL_CAPACITY);
        std::thread::Builder::new()
            .name(format!("hawkeye-{}", self.source_id))
            .spawn(move || read_lines(reader, tx))
            .map_err(|source| SourceError::Io {
                source_id: self.source_id.clone(),
                position: Some(0),
                source,
            })?;
        debug!(source_id = %self.source_id, "stdin reader thread started");
        self.lines = Some(rx);
        Ok(())
    }

    async fn next_raw(&mut self) -> Result<Option<RawLine>, SourceError> {
        let Some(lines) = self.lines.as_mut() else {
            return Ok(None);
        };
        // `recv` is cancel-safe, so a dropped call loses nothing
        match lines.recv().await {
            None => Ok(None),
            Some(Ok(bytes)) => {
                self.bytes_read += bytes.len() as u64;
                Ok(Some(decode_line(&bytes)))
            }
            Some(Err(source)) => Err(SourceError::Io {
                source_id: self.source_id.clone(),
                position: Some(self.bytes_read),
                source,
            }),
        }
    }
}

fn decode_line(bytes: &[u8]) -> RawLine {
    let text = String::from_utf8_lossy(bytes);
    RawLine::text(text.trim_end_matches(['\n', '\r']))
}

impl<R: AsyncRead + Unpin + Send> PipeSource<R> {
    pub fn from_reader(source_id: impl Into<String>, label: impl Into<String>, reader: R) -> Self {
        Self {
            source_id: source_id.into(),
            label: label.into(),
            reader: BufReader::new(reader),
            buf: Vec::new(),
            bytes_read: 0,
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> LineSource for PipeSource<R> {
    fn kind(&self) -> SourceKind {
        SourceKind::Stdin
    }

    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn next_raw(&mut self) -> Result<Option<RawLine>, SourceError> {
        // `read_until` appends to `buf`, so a cancelled read keeps what it got
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(0) if self.buf.is_empty() => Ok(None),
            Ok(_) => {
                let bytes = std::mem::take(&mut self.buf);
                self.bytes_read += bytes.len() as u64;
                Ok(Some(decode_line(&bytes)))
            }
            Err(source) => Err(SourceError::Io {
                source_id: self.source_id.clone(),
                position: Some(self.bytes_read),
                source,
            }),
        }
    }
}
