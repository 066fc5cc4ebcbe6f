use std::sync::Arc;

use crate::error::CaptureError;
use crate::publish::LineSink;
use crate::record::{LogRecord, LogStream};

/// Line-splitting writer for one output stream of one job.
///
/// Complete lines go to the sink as they arrive; the unterminated tail waits
/// for more input or for `flush()`. A line whose sink call fails stays at the
/// front of the buffer, so calling `flush()` again retries it.
pub struct LogWriter {
    job_id: String,
    stream: LogStream,
    sink: Arc<dyn LineSink>,
    buf: Vec<u8>,
    emitted: u64,
}

impl LogWriter {
    pub fn new(job_id: impl Into<String>, stream: LogStream, sink: Arc<dyn LineSink>) -> Self {
        Self {
            job_id: job_id.into(),
            stream,
            sink,
            buf: Vec::with_capacity(8 * 1024),
            emitted: 0,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn stream(&self) -> LogStream {
        self.stream
    }

    /// Records handed to the sink so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Move the buffered bytes into a new writer for the same stream,
    /// leaving this one empty.
    pub fn detach(&mut self) -> LogWriter {
        LogWriter {
            job_id: self.job_id.clone(),
            stream: self.stream,
            sink: self.sink.clone(),
            buf: std::mem::take(&mut self.buf),
            emitted: 0,
        }
    }

    pub async fn write(&mut self, chunk: &str) -> Result<(), CaptureError> {
        self.write_bytes(chunk.as_bytes()).await
    }

    pub async fn write_bytes(&mut self, chunk: &[u8]) -> Result<(), CaptureError> {
        self.buf.extend_from_slice(chunk);
        self.drain_lines().await
    }

    /// Emit any complete lines, then whatever is left as a final record.
    pub async fn flush(&mut self) -> Result<(), CaptureError> {
        self.drain_lines().await?;
        if self.buf.is_empty() {
            return Ok(());
        }
        let line = decode_line(&self.buf);
        if !line.is_empty() {
            self.emit(&line).await?;
        }
        self.buf.clear();
        Ok(())
    }

    async fn drain_lines(&mut self) -> Result<(), CaptureError> {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = decode_line(&self.buf[..pos]);
            if !line.is_empty() {
                self.emit(&line).await?;
            }
            self.buf.drain(..=pos);
        }
        Ok(())
    }

    async fn emit(&mut self, line: &str) -> Result<LogRecord, CaptureError> {
        let record = self
            .sink
            .emit(&self.job_id, self.stream, line)
            .await
            .map_err(|source| CaptureError::Store {
                stream: self.stream.as_str(),
                source,
            })?;
        self.emitted += 1;
        Ok(record)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
