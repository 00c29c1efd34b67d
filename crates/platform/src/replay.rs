use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::sync::Mutex;

use crate::runner::{NotificationTransport, TransportError};

/// Replays a recorded notification log, one JSON frame per line. Blank lines
/// and lines starting with `#` are skipped.
pub struct ReplayTransport {
    path: PathBuf,
    lines: Mutex<Option<Lines<BufReader<File>>>>,
}

impl ReplayTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lines: Mutex::new(None) }
    }
}

#[async_trait]
impl NotificationTransport for ReplayTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let file = File::open(&self.path).await.map_err(|error| {
            TransportError::Connect(format!("{}: {error}", self.path.display()))
        })?;
        *self.lines.lock().await = Some(BufReader::new(file).lines());
        Ok(())
    }

    async fn next_frame(&self) -> Result<Option<String>, TransportError> {
        let mut guard = self.lines.lock().await;
        let Some(lines) = guard.as_mut() else {
            return Err(TransportError::Receive("replay log is not open".to_owned()));
        };

        loop {
            let line = lines
                .next_line()
                .await
                .map_err(|error| TransportError::Receive(error.to_string()))?;
            match line {
                Some(line) if line.trim().is_empty() || line.trim_start().starts_with('#') => {}
                Some(line) => return Ok(Some(line)),
                None => return Ok(None),
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.lines.lock().await.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::ReplayTransport;
    use crate::runner::{NotificationTransport, TransportError};

    #[tokio::test]
    async fn yields_frames_and_skips_comments_and_blank_lines() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("session.jsonl");
        fs::write(&path, "# recorded session\n{\"kind\":\"connected\"}\n\n{\"kind\":\"x\"}\n")
            .expect("write log");

        let transport = ReplayTransport::new(&path);
        transport.connect().await.expect("connect");

        assert_eq!(
            transport.next_frame().await.expect("frame").as_deref(),
            Some(r#"{"kind":"connected"}"#)
        );
        assert_eq!(
            transport.next_frame().await.expect("frame").as_deref(),
            Some(r#"{"kind":"x"}"#)
        );
        assert_eq!(transport.next_frame().await.expect("end"), None);
        transport.disconnect().await.expect("disconnect");
    }

    #[tokio::test]
    async fn missing_log_fails_to_connect() {
        let transport = ReplayTransport::new("/definitely/not/here.jsonl");
        let error = transport.connect().await.expect_err("missing file");
        assert!(matches!(error, TransportError::Connect(_)));
    }

    #[tokio::test]
    async fn reading_before_connect_is_a_receive_error() {
        let transport = ReplayTransport::new("unused.jsonl");
        let error = transport.next_frame().await.expect_err("not connected");
        assert!(matches!(error, TransportError::Receive(_)));
    }
}
