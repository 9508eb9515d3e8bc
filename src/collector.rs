//! Job producer interface
//!
//! Collectors (scrapers, directory listings, hand-written lists) hand their jobs to a
//! [`JobSink`] instead of accumulating them in shared state. The manifest format is
//! JSON lines: one [`Job`] object per line, with blank lines and `#` comments ignored.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::Job;

/// Append-only destination for produced jobs
pub trait JobSink {
    /// Append one job
    fn push(&mut self, job: Job) -> Result<()>;
}

impl JobSink for Vec<Job> {
    fn push(&mut self, job: Job) -> Result<()> {
        Vec::push(self, job);
        Ok(())
    }
}

impl<S: JobSink + ?Sized> JobSink for &mut S {
    fn push(&mut self, job: Job) -> Result<()> {
        (**self).push(job)
    }
}

/// [`JobSink`] that streams jobs into a manifest
pub struct ManifestSink<W: Write> {
    writer: BufWriter<W>,
    written: usize,
}

impl ManifestSink<File> {
    /// Create (or truncate) a manifest file
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create manifest '{}': {}", path.display(), e),
            ))
        })?;
        Ok(Self::new(file))
    }
}

impl<W: Write> ManifestSink<W> {
    /// Wrap any writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            written: 0,
        }
    }

    /// Flush buffered lines and return how many jobs were written
    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush()?;
        Ok(self.written)
    }
}

impl<W: Write> JobSink for ManifestSink<W> {
    fn push(&mut self, job: Job) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &job)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }
}

/// Parse manifest text from any reader
///
/// Every job is validated; the first bad line aborts with its 1-based line number.
pub fn parse_manifest<R: BufRead>(reader: R) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = index + 1;
        let text = line.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }

        let job: Job = serde_json::from_str(text).map_err(|e| Error::Manifest {
            line: line_no,
            reason: e.to_string(),
        })?;
        job.validate().map_err(|reason| Error::Manifest {
            line: line_no,
            reason,
        })?;
        jobs.push(job);
    }
    Ok(jobs)
}

/// Read a manifest file
pub fn read_manifest(path: &Path) -> Result<Vec<Job>> {
    let file = File::open(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to open manifest '{}': {}", path.display(), e),
        ))
    })?;
    let jobs = parse_manifest(BufReader::new(file))?;
    tracing::info!(path = %path.display(), jobs = jobs.len(), "Loaded manifest");
    Ok(jobs)
}

/// Write `jobs` to a manifest file, replacing it
pub fn write_manifest(path: &Path, jobs: &[Job]) -> Result<()> {
    let mut sink = ManifestSink::create(path)?;
    for job in jobs {
        sink.push(job.clone())?;
    }
    sink.finish()?;
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Job> {
        vec![
            Job::new("a.mid", "/data/vgmusic/nes", "https://www.vgmusic.com/music/a.mid"),
            Job::new("b.zip", "/data/myrient", "https://myrient.erista.me/files/b.zip"),
        ]
    }

    /// Stand-in for a scraper that produces into whatever sink it is given
    fn produce(sink: &mut impl JobSink) -> Result<()> {
        for job in sample() {
            sink.push(job)?;
        }
        Ok(())
    }

    #[test]
    fn vec_sink_collects_in_order() {
        let mut jobs: Vec<Job> = Vec::new();
        produce(&mut jobs).unwrap();
        assert_eq!(jobs, sample());
    }

    #[test]
    fn manifest_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.jsonl");

        write_manifest(&path, &sample()).unwrap();
        assert_eq!(read_manifest(&path).unwrap(), sample());
    }

    #[test]
    fn manifest_sink_streams_and_counts() {
        let mut buf = Vec::new();
        let mut sink = ManifestSink::new(&mut buf);
        produce(&mut sink).unwrap();
        assert_eq!(sink.finish().unwrap(), 2);

        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn parse_skips_blank_lines_and_comments() {
        let text = "# scraped 2024-01-01\n\n{\"name\":\"a.mid\",\"directory\":\"/d\",\"url\":\"http://h/a.mid\"}\n   \n";
        let jobs = parse_manifest(text.as_bytes()).unwrap();
        assert_eq!(jobs, vec![Job::new("a.mid", "/d", "http://h/a.mid")]);
    }

    #[test]
    fn parse_reports_line_of_bad_json() {
        let text = "{\"name\":\"a.mid\",\"directory\":\"/d\",\"url\":\"http://h/a\"}\nnot json\n";
        match parse_manifest(text.as_bytes()) {
            Err(Error::Manifest { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected manifest error, got {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_invalid_jobs() {
        let text = "\n{\"name\":\"../x\",\"directory\":\"/d\",\"url\":\"http://h/x\"}\n";
        match parse_manifest(text.as_bytes()) {
            Err(Error::Manifest { line, reason }) => {
                assert_eq!(line, 2);
                assert!(reason.contains("plain file name"));
            }
            other => panic!("expected manifest error, got {other:?}"),
        }
    }

    #[test]
    fn missing_manifest_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_manifest(&dir.path().join("nope.jsonl")),
            Err(Error::Io(_))
        ));
    }
}
