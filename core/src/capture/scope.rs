use std::sync::Arc;

use super::LogWriter;
use crate::error::CaptureError;
use crate::publish::LineSink;
use crate::record::LogStream;

/// The stdout/stderr writer pair for one job run.
///
/// Call `finish()` on the normal path. If the scope is dropped instead
/// (error unwinding, a panic, or the owning task being cancelled) whatever is
/// still buffered is flushed from a detached task on the current runtime.
pub struct CaptureScope {
    job_id: String,
    stdout: LogWriter,
    stderr: LogWriter,
}

impl CaptureScope {
    pub fn new(job_id: impl Into<String>, sink: Arc<dyn LineSink>) -> Self {
        let job_id = job_id.into();
        Self {
            stdout: LogWriter::new(job_id.clone(), LogStream::Stdout, sink.clone()),
            stderr: LogWriter::new(job_id.clone(), LogStream::Stderr, sink),
            job_id,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn stdout(&mut self) -> &mut LogWriter {
        &mut self.stdout
    }

    pub fn stderr(&mut self) -> &mut LogWriter {
        &mut self.stderr
    }

    /// Both writers at once, for pumping two pipes concurrently.
    pub fn split(&mut self) -> (&mut LogWriter, &mut LogWriter) {
        (&mut self.stdout, &mut self.stderr)
    }

    /// Flush both streams. Both are attempted even if the first fails; on
    /// failure the buffers are kept so `flush` can be retried.
    pub async fn flush(&mut self) -> Result<(), CaptureError> {
        let out_res = self.stdout.flush().await;
        let err_res = self.stderr.flush().await;
        out_res.and(err_res)
    }

    pub async fn finish(mut self) -> Result<(), CaptureError> {
        self.flush().await
    }
}

impl Drop for CaptureScope {
    fn drop(&mut self) {
        let pending: Vec<LogWriter> = [&mut self.stdout, &mut self.stderr]
            .into_iter()
            .filter(|w| w.has_pending())
            .map(LogWriter::detach)
            .collect();
        if pending.is_empty() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for mut writer in pending {
                        if let Err(e) = writer.flush().await {
                            tracing::error!(
                                task_id = %writer.job_id(),
                                error = %e,
                                "final flush of captured output failed"
                            );
                        }
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    task_id = %self.job_id,
                    "capture scope dropped outside a runtime, buffered output lost"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::writer::tests::VecSink;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn streams_keep_separate_buffers() {
        let sink = Arc::new(VecSink::default());
        let mut scope = CaptureScope::new("job", sink.clone());

        scope.stdout().write("out-par").await.unwrap();
        scope.stderr().write("err line\n").await.unwrap();
        scope.stdout().write("tial\n").await.unwrap();
        scope.finish().await.unwrap();

        let lines = sink.lines.lock().unwrap().clone();
        assert_eq!(
            lines,
            vec![
                (LogStream::Stderr, "err line".to_string()),
                (LogStream::Stdout, "out-partial".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn finish_flushes_both_streams() {
        let sink = Arc::new(VecSink::default());
        let mut scope = CaptureScope::new("job", sink.clone());
        scope.stdout().write("hello").await.unwrap();
        scope.stderr().write("oops").await.unwrap();
        scope.finish().await.unwrap();
        assert_eq!(sink.messages(), vec!["hello", "oops"]);
    }

    #[tokio::test]
    async fn dropping_without_finish_still_flushes() {
        let sink = Arc::new(VecSink::default());
        {
            let mut scope = CaptureScope::new("job", sink.clone());
            scope.stdout().write("left behind").await.unwrap();
        }
        for _ in 0..10 {
            if !sink.messages().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(sink.messages(), vec!["left behind"]);
    }

    #[tokio::test]
    async fn cancelled_task_flushes_its_scope() {
        let sink = Arc::new(VecSink::default());
        let task_sink = sink.clone();
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

        let task = tokio::spawn(async move {
            let mut scope = CaptureScope::new("job", task_sink);
            scope.stderr().write("interrupted").await.unwrap();
            let _ = ready_tx.send(());
            std::future::pending::<()>().await;
            scope.finish().await
        });

        ready_rx.await.unwrap();
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        for _ in 0..10 {
            if !sink.messages().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(sink.messages(), vec!["interrupted"]);
    }
}
