// dumptool/src/backup/sink.rs
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

enum Output {
    Plain(BufWriter<File>),
    Gzip(BufWriter<GzEncoder<File>>),
}

/// Destination file for one dump, optionally gzip-compressed.
pub struct ArtifactSink {
    path: PathBuf,
    out: Output,
}

impl ArtifactSink {
    pub fn create(path: &Path, compress: bool) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        let out = if compress {
            Output::Gzip(BufWriter::new(GzEncoder::new(file, Compression::default())))
        } else {
            Output::Plain(BufWriter::new(file))
        };
        Ok(ArtifactSink { path: path.to_path_buf(), out })
    }

    /// Flushes buffers, writes the gzip trailer, syncs and closes the file,
    /// then returns its size as seen on disk. Only a finished sink is a
    /// valid artifact.
    pub fn finish(self) -> io::Result<u64> {
        let file = match self.out {
            Output::Plain(writer) => writer.into_inner().map_err(|e| e.into_error())?,
            Output::Gzip(writer) => {
                let encoder = writer.into_inner().map_err(|e| e.into_error())?;
                encoder.finish()?
            }
        };
        file.sync_all()?;
        drop(file);
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

impl Write for ArtifactSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.out {
            Output::Plain(w) => w.write(buf),
            Output::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.out {
            Output::Plain(w) => w.flush(),
            Output::Gzip(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn test_plain_sink_reports_size() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("a.sql");
        let mut sink = ArtifactSink::create(&path, false)?;
        sink.write_all(b"SELECT 1;\n")?;
        let size = sink.finish()?;
        assert_eq!(size, 10);
        assert_eq!(std::fs::read_to_string(&path)?, "SELECT 1;\n");
        Ok(())
    }

    #[test]
    fn test_gzip_sink_is_complete_after_finish() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("a.sql.gz");
        let mut sink = ArtifactSink::create(&path, true)?;
        let body = "INSERT INTO `t` (`id`) VALUES\n(1);\n".repeat(100);
        sink.write_all(body.as_bytes())?;
        let size = sink.finish()?;
        assert_eq!(size, std::fs::metadata(&path)?.len());

        let mut decoded = String::new();
        GzDecoder::new(File::open(&path)?).read_to_string(&mut decoded)?;
        assert_eq!(decoded, body);
        Ok(())
    }

    #[test]
    fn test_finish_measures_the_closed_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("b.sql.gz");
        let mut sink = ArtifactSink::create(&path, true)?;
        sink.write_all(b"SELECT 1;\n")?;
        // Before finish the trailer is missing, so the file is shorter.
        sink.flush()?;
        let partial = std::fs::metadata(&path)?.len();

        let size = sink.finish()?;
        assert!(size > partial);
        assert_eq!(size, std::fs::metadata(&path)?.len());
        Ok(())
    }
}
