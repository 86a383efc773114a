//! Recorder backends: where validated feature records actually land.
//!
//! The write pipeline produces `(pos0, feature, context)` triples that are
//! already quoted and truncated; a [`FeatureSink`] turns them into durable
//! records. The file sink is the canonical backend; an SQL backend is just
//! another implementation of this trait with a `GROUP BY` histogram
//! strategy. The sink is chosen once, at recorder-set construction, and
//! hidden behind the recorder interface.
//!
//! Records written before shutdown are durable by shutdown; that is the
//! whole durability contract.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use crate::histogram::{HistogramDef, HistogramEntry};
use crate::pos0::Pos0;

/// Backend for one feature recorder.
pub trait FeatureSink: Send {
    /// Appends one feature record.
    ///
    /// `context` is `None` for recorders with `no_context` (the second tab
    /// is omitted entirely), and `Some` — possibly empty — otherwise.
    fn write_record(&mut self, pos0: &Pos0, feature: &str, context: Option<&str>)
        -> io::Result<()>;

    /// Materializes one histogram report.
    fn flush_histogram(&mut self, def: &HistogramDef, entries: &[HistogramEntry])
        -> io::Result<()>;

    /// Flushes buffered records to durable storage.
    fn flush(&mut self) -> io::Result<()>;
}

/// Tab-separated text files: `{outdir}/{name}.txt` plus
/// `{outdir}/{name}_{suffix}.txt` per histogram.
///
/// The feature file is opened lazily on the first record, so recorders that
/// never fire leave no file behind.
pub struct FileSink {
    outdir: PathBuf,
    name: String,
    out: Option<BufWriter<File>>,
}

impl FileSink {
    pub fn new(outdir: PathBuf, name: impl Into<String>) -> Self {
        Self { outdir, name: name.into(), out: None }
    }

    fn out(&mut self) -> io::Result<&mut BufWriter<File>> {
        if self.out.is_none() {
            let path = self.outdir.join(format!("{}.txt", self.name));
            let file = File::options().create(true).append(true).open(path)?;
            self.out = Some(BufWriter::new(file));
        }
        Ok(self.out.as_mut().unwrap())
    }
}

impl FeatureSink for FileSink {
    fn write_record(
        &mut self,
        pos0: &Pos0,
        feature: &str,
        context: Option<&str>,
    ) -> io::Result<()> {
        let out = self.out()?;
        match context {
            Some(context) => writeln!(out, "{pos0}\t{feature}\t{context}"),
            None => writeln!(out, "{pos0}\t{feature}"),
        }
    }

    fn flush_histogram(
        &mut self,
        def: &HistogramDef,
        entries: &[HistogramEntry],
    ) -> io::Result<()> {
        let path = self.outdir.join(format!("{}_{}.txt", self.name, def.suffix));
        let mut out = BufWriter::new(File::create(path)?);
        for entry in entries {
            writeln!(out, "{}\t{}", entry.count, entry.feature)?;
        }
        out.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.out.as_mut() {
            Some(out) => out.flush(),
            None => Ok(()),
        }
    }
}

/// Discards everything. Used when the whole set runs under `NO_OUTDIR`.
pub struct NullSink;

impl FeatureSink for NullSink {
    fn write_record(&mut self, _: &Pos0, _: &str, _: Option<&str>) -> io::Result<()> {
        Ok(())
    }

    fn flush_histogram(&mut self, _: &HistogramDef, _: &[HistogramEntry]) -> io::Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
