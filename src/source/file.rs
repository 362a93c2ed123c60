use crate::config::types::{PipelineConfig, ReadConfig, ReadStart, RetryConfig};
use crate::source::backoff::Backoff;
use crate::source::line::SourceKind;
use crate::source::reader::{LineSource, RawLine, SourceError};
use async_trait::async_trait;
use std::fs::{File, Metadata};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rotation {
    /// A different file now lives at the path.
    Replaced,
    /// Same file, shorter than what has already been read.
    Truncated,
    /// Same file and not shorter, but its first bytes changed.
    Rewritten,
}

/// Leading bytes remembered per file to spot an in-place rewrite.
const HEAD_BYTES: usize = 64;

/// Tail-following file source.
///
/// After EOF, and before reading again, rotation is detected by an inode
/// change at the path, by the file shrinking below the current read offset,
/// or by its first bytes no longer matching what was read. The new content is
/// then read from its start. A trailing partial line is held back until its
/// newline arrives (or until EOF when not following).
pub struct FileSource {
    source_id: String,
    path: PathBuf,
    read: ReadConfig,
    poll_interval: Duration,
    retry: RetryConfig,

    file: Option<BufReader<File>>,
    inode: Option<u64>,
    /// Up to `HEAD_BYTES` from the start of the current file.
    head: Vec<u8>,
    /// Bytes consumed from the current file, including any held partial line.
    offset: u64,
    partial: Vec<u8>,
    partial_start: u64,
    caught_up: bool,
}

impl FileSource {
    pub fn new(
        source_id: impl Into<String>,
        path: impl Into<PathBuf>,
        read: ReadConfig,
        pipeline: &PipelineConfig,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            path: path.into(),
            read,
            poll_interval: pipeline.poll_interval,
            retry: pipeline.retry,
            file: None,
            inode: None,
            head: Vec::new(),
            offset: 0,
            partial: Vec::new(),
            partial_start: 0,
            caught_up: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SourceError {
        SourceError::Io {
            source_id: self.source_id.clone(),
            position: Some(self.emitted_offset()),
            source,
        }
    }

    fn emitted_offset(&self) -> u64 {
        self.offset - self.partial.len() as u64
    }

    fn open_at(&mut self, start: SeekFrom) -> Result<(), SourceError> {
        let file = File::open(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SourceError::NotFound {
                    source_id: self.source_id.clone(),
                    path: self.path.clone(),
                }
            } else {
                self.io_error(e)
            }
        })?;
        let metadata = file.metadata().map_err(|e| self.io_error(e))?;
        let mut head = Vec::with_capacity(HEAD_BYTES);
        (&file)
            .take(HEAD_BYTES as u64)
            .read_to_end(&mut head)
            .map_err(|e| self.io_error(e))?;
        let mut buf_reader = BufReader::new(file);
        let offset = buf_reader.seek(start).map_err(|e| self.io_error(e))?;

        self.inode = Some(get_inode(&metadata));
        self.head = head;
        self.offset = offset;
        self.partial.clear();
        self.file = Some(buf_reader);
        Ok(())
    }

    fn initial_seek(&self, len: u64) -> SeekFrom {
        match self.read.offset {
            Some(offset) if offset <= len => SeekFrom::Start(offset),
            Some(offset) => {
                warn!(
                    source_id = %self.source_id,
                    offset,
                    len,
                    "stored offset is past end of file, reading from start"
                );
                SeekFrom::Start(0)
            }
            None => match self.read.start {
                ReadStart::Beginning => SeekFrom::Start(0),
                ReadStart::End => SeekFrom::End(0),
            },
        }
    }

    fn check_rotation(&self) -> Result<Option<Rotation>, SourceError> {
        match std::fs::metadata(&self.path) {
            Ok(metadata) => {
                if self.inode.is_some_and(|inode| inode != get_inode(&metadata)) {
                    Ok(Some(Rotation::Replaced))
                } else if metadata.len() < self.offset {
                    Ok(Some(Rotation::Truncated))
                } else if self.head_changed()? {
                    Ok(Some(Rotation::Rewritten))
                } else {
                    Ok(None)
                }
            }
            // Moved away and not yet recreated: keep draining the old handle
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Truncate-then-rewrite past the old offset keeps inode and size
    /// plausible; only the leading bytes give it away.
    fn head_changed(&self) -> Result<bool, SourceError> {
        if self.head.is_empty() {
            return Ok(false);
        }
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(self.io_error(e)),
        };
        let mut current = Vec::with_capacity(self.head.len());
        file.take(self.head.len() as u64)
            .read_to_end(&mut current)
            .map_err(|e| self.io_error(e))?;
        Ok(current != self.head)
    }

    /// Grow `head` while reading the first bytes of a file that was shorter
    /// than `HEAD_BYTES` when opened.
    fn extend_head(&mut self, start: u64, bytes: &[u8]) {
        let have = self.head.len();
        let end = start + bytes.len() as u64;
        if have >= HEAD_BYTES || start > have as u64 || end <= have as u64 {
            return;
        }
        let from = have - start as usize;
        let take = (HEAD_BYTES - have).min(bytes.len() - from);
        self.head.extend_from_slice(&bytes[from..from + take]);
    }

    fn take_partial(&mut self) -> Option<RawLine> {
        if self.partial.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.partial);
        Some(self.make_line(&bytes, self.partial_start))
    }

    fn make_line(&self, bytes: &[u8], start: u64) -> RawLine {
        let text = String::from_utf8_lossy(bytes);
        RawLine {
            text: text.trim_end_matches(['\n', '\r']).to_string(),
            observed_at: None,
            position: Some(start),
        }
    }
}

#[async_trait]
impl LineSource for FileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        let len = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound {
                    source_id: self.source_id.clone(),
                    path: self.path.clone(),
                });
            }
            Err(e) => return Err(self.io_error(e)),
        };
        let start = self.initial_seek(len);
        self.open_at(start)
    }

    async fn next_raw(&mut self) -> Result<Option<RawLine>, SourceError> {
        let mut backoff = Backoff::new(&self.retry);

        loop {
            if self.file.is_none() {
                match self.open_at(SeekFrom::Start(0)) {
                    Ok(()) => info!(source_id = %self.source_id, "reopened rotated file"),
                    Err(SourceError::NotFound { .. }) => {
                        sleep(self.poll_interval).await;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            // Rotation is only looked for after EOF, right before reading again
            if self.read.follow && self.caught_up {
                if let Some(rotation) = self.check_rotation()? {
                    info!(
                        source_id = %self.source_id,
                        rotation = ?rotation,
                        offset = self.offset,
                        "file rotated"
                    );
                    let pending = self.take_partial();
                    self.file = None;
                    self.offset = 0;
                    self.caught_up = false;
                    if pending.is_some() {
                        return Ok(pending);
                    }
                    continue;
                }
            }

            let mut buf = Vec::new();
            let result = match self.file.as_mut() {
                Some(file) => file.read_until(b'\n', &mut buf),
                None => continue,
            };

            let bytes_read = match result {
                Ok(n) => n,
                Err(e) => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            source_id = %self.source_id,
                            attempt = backoff.attempts(),
                            delay = ?delay,
                            error = %e,
                            "read failed, retrying"
                        );
                        sleep(delay).await;
                        continue;
                    }
                    None => return Err(self.io_error(e)),
                },
            };
            backoff.reset();

            if bytes_read == 0 {
                if !self.read.follow {
                    return Ok(self.take_partial());
                }

                self.caught_up = true;
                sleep(self.poll_interval).await;
                continue;
            }

            self.caught_up = false;
            let line_start = self.offset;
            self.offset += bytes_read as u64;
            self.extend_head(line_start, &buf);

            if buf.last() != Some(&b'\n') {
                if self.partial.is_empty() {
                    self.partial_start = line_start;
                }
                self.partial.extend_from_slice(&buf);
                debug!(source_id = %self.source_id, held = self.partial.len(), "holding partial line");
                continue;
            }

            if self.partial.is_empty() {
                return Ok(Some(self.make_line(&buf, line_start)));
            }
            let mut bytes = std::mem::take(&mut self.partial);
            bytes.extend_from_slice(&buf);
            return Ok(Some(self.make_line(&bytes, self.partial_start)));
        }
    }

    fn position(&self) -> Option<u64> {
        Some(self.emitted_offset())
    }

    fn caught_up(&self) -> bool {
        self.caught_up
    }
}

// Platform-specific inode retrieval
#[cfg(unix)]
fn get_inode(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
fn get_inode(metadata: &Metadata) -> u64 {
    // Creation time stands in for an inode; zero when the platform has none
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    if let Ok(created) = metadata.created() {
        created.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};
    use tokio::time::timeout;

    fn pipeline() -> PipelineConfig {
        PipelineConfig {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    fn read_config(start: ReadStart, follow: bool) -> ReadConfig {
        ReadConfig {
            start,
            follow,
            offset: None,
        }
    }

    async fn next_text(source: &mut FileSource) -> String {
        timeout(Duration::from_secs(5), source.next_raw())
            .await
            .expect("timed out waiting for line")
            .unwrap()
            .unwrap()
            .text
    }

    #[tokio::test]
    async fn test_reads_from_beginning_without_follow() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "first line").unwrap();
        writeln!(temp_file, "second line").unwrap();
        temp_file.flush().unwrap();

        let mut source = FileSource::new(
            "app",
            temp_file.path(),
            read_config(ReadStart::Beginning, false),
            &pipeline(),
        );
        source.open().await.unwrap();

        let first = source.next_raw().await.unwrap().unwrap();
        assert_eq!(first.text, "first line");
        assert_eq!(first.position, Some(0));

        let second = source.next_raw().await.unwrap().unwrap();
        assert_eq!(second.text, "second line");
        assert_eq!(second.position, Some(11));

        assert!(source.next_raw().await.unwrap().is_none());
        assert_eq!(source.position(), Some(23));
    }

    #[tokio::test]
    async fn test_start_at_end_skips_existing_content() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "old line").unwrap();
        temp_file.flush().unwrap();

        let mut source = FileSource::new(
            "app",
            temp_file.path(),
            read_config(ReadStart::End, true),
            &pipeline(),
        );
        source.open().await.unwrap();

        writeln!(temp_file, "new line").unwrap();
        temp_file.flush().unwrap();

        assert_eq!(next_text(&mut source).await, "new line");
    }

    #[tokio::test]
    async fn test_crlf_and_invalid_utf8_are_normalized() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"windows line\r\n").unwrap();
        temp_file.write_all(b"bad \xff byte\n").unwrap();
        temp_file.flush().unwrap();

        let mut source = FileSource::new(
            "app",
            temp_file.path(),
            read_config(ReadStart::Beginning, false),
            &pipeline(),
        );
        source.open().await.unwrap();

        assert_eq!(next_text(&mut source).await, "windows line");
        assert_eq!(next_text(&mut source).await, "bad \u{fffd} byte");
    }

    #[tokio::test]
    async fn test_partial_line_held_until_newline() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let mut source = FileSource::new(
            "app",
            temp_file.path(),
            read_config(ReadStart::Beginning, true),
            &pipeline(),
        );
        source.open().await.unwrap();

        write!(temp_file, "par").unwrap();
        temp_file.flush().unwrap();
        assert!(timeout(Duration::from_millis(100), source.next_raw())
            .await
            .is_err());

        writeln!(temp_file, "tial").unwrap();
        temp_file.flush().unwrap();
        let line = timeout(Duration::from_secs(5), source.next_raw())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(line.text, "partial");
        assert_eq!(line.position, Some(0));
    }

    #[tokio::test]
    async fn test_unterminated_last_line_emitted_at_eof() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "a\nno newline").unwrap();
        temp_file.flush().unwrap();

        let mut source = FileSource::new(
            "app",
            temp_file.path(),
            read_config(ReadStart::Beginning, false),
            &pipeline(),
        );
        source.open().await.unwrap();

        assert_eq!(next_text(&mut source).await, "a");
        assert_eq!(next_text(&mut source).await, "no newline");
        assert!(source.next_raw().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncation_resumes_from_start() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "2025-01-01 a fairly long first line").unwrap();
        writeln!(temp_file, "2025-01-01 a fairly long second line").unwrap();
        temp_file.flush().unwrap();

        let mut source = FileSource::new(
            "app",
            temp_file.path(),
            read_config(ReadStart::Beginning, true),
            &pipeline(),
        );
        source.open().await.unwrap();
        next_text(&mut source).await;
        next_text(&mut source).await;

        temp_file.as_file().set_len(0).unwrap();
        temp_file.seek(SeekFrom::Start(0)).unwrap();
        writeln!(temp_file, "short").unwrap();
        temp_file.flush().unwrap();

        assert_eq!(next_text(&mut source).await, "short");
    }

    #[tokio::test]
    async fn test_append_after_eof_is_not_rotation() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "a").unwrap();
        temp_file.flush().unwrap();

        let mut source = FileSource::new(
            "app",
            temp_file.path(),
            read_config(ReadStart::Beginning, true),
            &pipeline(),
        );
        source.open().await.unwrap();
        assert_eq!(next_text(&mut source).await, "a");
        assert!(timeout(Duration::from_millis(50), source.next_raw())
            .await
            .is_err());

        writeln!(temp_file, "b").unwrap();
        temp_file.flush().unwrap();
        let line = timeout(Duration::from_secs(5), source.next_raw())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(line.text, "b");
        assert_eq!(line.position, Some(2));
    }

    #[tokio::test]
    async fn test_rewrite_longer_than_old_content_is_detected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "old line one").unwrap();
        temp_file.flush().unwrap();

        let mut source = FileSource::new(
            "app",
            temp_file.path(),
            read_config(ReadStart::Beginning, true),
            &pipeline(),
        );
        source.open().await.unwrap();
        assert_eq!(next_text(&mut source).await, "old line one");
        assert!(timeout(Duration::from_millis(50), source.next_raw())
            .await
            .is_err());
        assert!(source.caught_up());

        // Grows past the old offset before the reader polls again
        temp_file.as_file().set_len(0).unwrap();
        temp_file.seek(SeekFrom::Start(0)).unwrap();
        writeln!(temp_file, "ERROR new first line after rotation").unwrap();
        writeln!(temp_file, "second").unwrap();
        temp_file.flush().unwrap();

        assert_eq!(
            next_text(&mut source).await,
            "ERROR new first line after rotation"
        );
        assert_eq!(next_text(&mut source).await, "second");
    }

    #[tokio::test]
    async fn test_rotation_by_rename_reads_new_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "before rotation\n").unwrap();

        let mut source = FileSource::new(
            "app",
            &path,
            read_config(ReadStart::Beginning, true),
            &pipeline(),
        );
        source.open().await.unwrap();
        assert_eq!(next_text(&mut source).await, "before rotation");

        std::fs::rename(&path, dir.path().join("app.log.1")).unwrap();
        std::fs::write(&path, "after rotation\n").unwrap();

        assert_eq!(next_text(&mut source).await, "after rotation");
        assert_eq!(source.position(), Some(15));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut source = FileSource::new(
            "app",
            dir.path().join("nope.log"),
            read_config(ReadStart::Beginning, true),
            &pipeline(),
        );
        let err = source.open().await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound { .. }));
        assert_eq!(err.source_id(), "app");
    }

    #[tokio::test]
    async fn test_resume_from_offset() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "seen").unwrap();
        writeln!(temp_file, "unseen").unwrap();
        temp_file.flush().unwrap();

        let read = ReadConfig {
            start: ReadStart::End,
            follow: false,
            offset: Some(5),
        };
        let mut source = FileSource::new("app", temp_file.path(), read, &pipeline());
        source.open().await.unwrap();
        assert_eq!(next_text(&mut source).await, "unseen");

        let read = ReadConfig {
            start: ReadStart::End,
            follow: false,
            offset: Some(10_000),
        };
        let mut source = FileSource::new("app", temp_file.path(), read, &pipeline());
        source.open().await.unwrap();
        assert_eq!(next_text(&mut source).await, "seen");
    }
}
