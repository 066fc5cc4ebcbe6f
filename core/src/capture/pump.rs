use tokio::io::{AsyncRead, AsyncReadExt};

use super::LogWriter;
use crate::error::CaptureError;

/// Copy a child pipe into `writer` until EOF, then flush the last partial
/// line. Returns the number of bytes read.
///
/// Only a failed read ends the pump. Store failures are logged and the lines
/// stay buffered in `writer`; later writes and the owner's final flush retry
/// them.
pub async fn pump_into<R>(mut rd: R, writer: &mut LogWriter) -> Result<u64, CaptureError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut buf = vec![0u8; 16 * 1024];
    let mut total = 0u64;

    loop {
        let n = rd
            .read(&mut buf)
            .await
            .map_err(|e| CaptureError::StreamIo {
                stream: writer.stream().as_str(),
                source: e,
            })?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if let Err(e) = writer.write_bytes(&buf[..n]).await {
            log_sink_error(writer, &e);
        }
    }

    if let Err(e) = writer.flush().await {
        log_sink_error(writer, &e);
    }
    Ok(total)
}

fn log_sink_error(writer: &LogWriter, e: &CaptureError) {
    tracing::error!(
        task_id = %writer.job_id(),
        stream = %writer.stream(),
        error = %e,
        "captured output not stored, kept for retry"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::writer::tests::VecSink;
    use crate::record::LogStream;
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn flushes_last_line_without_newline_on_eof() {
        let (mut wr, rd) = tokio::io::duplex(1024);
        let sink = Arc::new(VecSink::default());
        let mut writer = LogWriter::new("job", LogStream::Stdout, sink.clone());

        let feeder = tokio::spawn(async move {
            wr.write_all(b"one\ntwo\nthr").await.unwrap();
            wr.write_all(b"ee").await.unwrap();
        });

        let total = pump_into(rd, &mut writer).await.unwrap();
        feeder.await.unwrap();

        assert_eq!(total, 13);
        assert_eq!(sink.messages(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn store_failure_keeps_pumping_and_retries() {
        let sink = Arc::new(VecSink::default());
        sink.fail_next.store(1, std::sync::atomic::Ordering::SeqCst);
        let mut writer = LogWriter::new("job", LogStream::Stdout, sink.clone());
        let rd = tokio_test::io::Builder::new()
            .read(b"first\n")
            .read(b"second\nthird")
            .build();

        let total = pump_into(rd, &mut writer).await.unwrap();
        assert_eq!(total, 18);
        assert_eq!(sink.messages(), vec!["first", "second", "third"]);
        assert!(!writer.has_pending());
    }

    #[tokio::test]
    async fn read_error_names_the_stream() {
        let rd = tokio_test::io::Builder::new()
            .read(b"partial \xe2\x9c")
            .read(b"\x93 ok\n")
            .read_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let sink = Arc::new(VecSink::default());
        let mut writer = LogWriter::new("job", LogStream::Stderr, sink.clone());

        let err = pump_into(rd, &mut writer).await.unwrap_err();
        assert!(matches!(err, CaptureError::StreamIo { stream: "stderr", .. }));
        // the multi-byte char split across reads is decoded intact
        assert_eq!(sink.messages(), vec!["partial \u{2713} ok"]);
    }
}
