//! Line-oriented file transport. One record per line.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::debug;

use super::{EndpointContext, InputEndpoint, OutputEndpoint, Transport};
use crate::config::{bool_param, required_param, ParamKind, ParamSpec, Params};
use crate::error::ConnectorError;

const INPUT_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("path", ParamKind::String, "file to read"),
    ParamSpec::optional("follow", ParamKind::Bool, "keep reading lines appended to the file"),
];

const OUTPUT_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("path", ParamKind::String, "file to write"),
    ParamSpec::optional("append", ParamKind::Bool, "append instead of truncating"),
];

const FOLLOW_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
pub struct FileTransport;

#[async_trait]
impl Transport for FileTransport {
    fn name(&self) -> &'static str {
        "file"
    }

    fn input_params(&self) -> &'static [ParamSpec] {
        INPUT_PARAMS
    }

    fn output_params(&self) -> &'static [ParamSpec] {
        OUTPUT_PARAMS
    }

    fn supports_binary(&self) -> bool {
        false
    }

    async fn open_input(
        &self,
        ctx: &EndpointContext,
        params: &Params,
    ) -> Result<Box<dyn InputEndpoint>, ConnectorError> {
        let path = required_param(self.name(), params, "path")?;
        let file = File::open(path)
            .await
            .map_err(|e| ConnectorError::Connect(format!("open {path}: {e}")))?;
        debug!(table = %ctx.table, path, "opened file input");
        Ok(Box::new(FileInput {
            reader: BufReader::new(file),
            follow: bool_param(params, "follow", false),
            pending: Vec::new(),
        }))
    }

    async fn open_output(
        &self,
        ctx: &EndpointContext,
        params: &Params,
    ) -> Result<Box<dyn OutputEndpoint>, ConnectorError> {
        let path = required_param(self.name(), params, "path")?;
        let append = bool_param(params, "append", false);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .await
            .map_err(|e| ConnectorError::Connect(format!("open {path}: {e}")))?;
        debug!(view = %ctx.table, path, append, "opened file output");
        Ok(Box::new(FileOutput {
            writer: BufWriter::new(file),
        }))
    }
}

struct FileInput {
    reader: BufReader<File>,
    follow: bool,
    /// Bytes of a line whose newline has not been read yet.
    pending: Vec<u8>,
}

impl FileInput {
    fn take_line(&mut self) -> Option<Bytes> {
        let mut line = std::mem::take(&mut self.pending);
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        if line.is_empty() {
            None
        } else {
            Some(Bytes::from(line))
        }
    }
}

#[async_trait]
impl InputEndpoint for FileInput {
    async fn poll_batch(&mut self, max: usize) -> Result<Option<Vec<Bytes>>, ConnectorError> {
        let mut batch = Vec::new();
        while batch.len() < max.max(1) {
            let read = self.reader.read_until(b'\n', &mut self.pending).await?;
            let complete = self.pending.last() == Some(&b'\n');
            if complete {
                batch.extend(self.take_line());
                continue;
            }
            if read > 0 {
                // Partial line; more may follow.
                continue;
            }
            // EOF.
            if self.follow {
                if batch.is_empty() {
                    tokio::time::sleep(FOLLOW_INTERVAL).await;
                }
                return Ok(Some(batch));
            }
            batch.extend(self.take_line());
            if batch.is_empty() {
                return Ok(None);
            }
            return Ok(Some(batch));
        }
        Ok(Some(batch))
    }
}

struct FileOutput {
    writer: BufWriter<File>,
}

#[async_trait]
impl OutputEndpoint for FileOutput {
    async fn write_batch(&mut self, records: Vec<Bytes>) -> Result<(), ConnectorError> {
        for record in records {
            self.writer.write_all(&record).await?;
            self.writer.write_all(b"\n").await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ConnectorError> {
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectorHandle;

    fn ctx() -> EndpointContext {
        EndpointContext {
            pipeline: "p".into(),
            table: "t".into(),
            connector: ConnectorHandle::new(),
        }
    }

    fn path_params(path: &std::path::Path) -> Params {
        let mut params = Params::new();
        params.insert("path".into(), path.display().to_string());
        params
    }

    #[tokio::test]
    async fn reads_lines_in_batches_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.csv");
        std::fs::write(&path, "1,a\r\n\n2,b\n3,c").unwrap();

        let mut input = FileTransport
            .open_input(&ctx(), &path_params(&path))
            .await
            .unwrap();
        let first = input.poll_batch(2).await.unwrap().unwrap();
        assert_eq!(first, vec![Bytes::from("1,a"), Bytes::from("2,b")]);
        let second = input.poll_batch(2).await.unwrap().unwrap();
        assert_eq!(second, vec![Bytes::from("3,c")]);
        assert!(input.poll_batch(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn follow_mode_sees_appended_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.csv");
        std::fs::write(&path, "1\n").unwrap();
        let mut params = path_params(&path);
        params.insert("follow".into(), "true".into());

        let mut input = FileTransport.open_input(&ctx(), &params).await.unwrap();
        assert_eq!(input.poll_batch(10).await.unwrap().unwrap().len(), 1);
        assert_eq!(input.poll_batch(10).await.unwrap(), Some(Vec::new()));

        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| std::io::Write::write_all(&mut f, b"2\n"))
            .unwrap();
        assert_eq!(input.poll_batch(10).await.unwrap().unwrap(), vec![Bytes::from("2")]);
    }

    #[tokio::test]
    async fn output_writes_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "stale\n").unwrap();

        let mut output = FileTransport
            .open_output(&ctx(), &path_params(&path))
            .await
            .unwrap();
        output
            .write_batch(vec![Bytes::from("a"), Bytes::from("b")])
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");
    }

    #[tokio::test]
    async fn missing_file_is_a_connect_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileTransport
            .open_input(&ctx(), &path_params(&dir.path().join("nope")))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectorError::Connect(_)));
    }
}
