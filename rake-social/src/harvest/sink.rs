use crate::pushshift::{NormalizedRecord, ResourceKind};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("cannot create {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sink expects {expected} records, got {got}")]
    KindMismatch {
        expected: ResourceKind,
        got: ResourceKind,
    },
}

/// Destination for finished batches.
pub trait RecordSink: Send {
    fn write_batch(&mut self, records: &[NormalizedRecord]) -> Result<(), SinkError>;

    /// Called once after the last batch of a successful run.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl RecordSink for Vec<NormalizedRecord> {
    fn write_batch(&mut self, records: &[NormalizedRecord]) -> Result<(), SinkError> {
        self.extend_from_slice(records);
        Ok(())
    }
}

/// UTF-8 CSV with a header row, `\n` line endings, one row per record.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    kind: ResourceKind,
    rows: usize,
}

impl CsvSink<File> {
    /// Create (or truncate) `path` and write the header for `kind`.
    pub fn create(path: impl AsRef<Path>, kind: ResourceKind) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| SinkError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_writer(file, kind)
    }
}

impl<W: Write + Send> CsvSink<W> {
    pub fn from_writer(inner: W, kind: ResourceKind) -> Result<Self, SinkError> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(inner);
        writer.write_record(kind.columns())?;
        Ok(Self {
            writer,
            kind,
            rows: 0,
        })
    }

    /// Data rows written so far, header excluded.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))
    }
}

impl<W: Write + Send> RecordSink for CsvSink<W> {
    fn write_batch(&mut self, records: &[NormalizedRecord]) -> Result<(), SinkError> {
        for record in records {
            if record.kind() != self.kind {
                return Err(SinkError::KindMismatch {
                    expected: self.kind,
                    got: record.kind(),
                });
            }
            self.writer.write_record(record.row())?;
            self.rows += 1;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}
