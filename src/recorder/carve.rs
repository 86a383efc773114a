//! Carving: writing a byte range out as a standalone artifact.
//!
//! Carve targets land under `{outdir}/{recorder}/{NNN}/{pos0}{ext}`, where
//! `NNN` is the carve sequence number divided by 1000, zero-padded to three
//! digits, and the base name is the sanitized forensic path of the carved
//! data. Each distinct content hash is written at most once per recorder;
//! repeat carves record a `CACHED` feature and touch no files.
//!
//! Target files are opened with exclusive-create and written through the
//! kept descriptor, so two racing carvers of different content can never
//! silently overwrite each other.

use std::fs::File;
use std::io::Write;
use std::time::{Duration, SystemTime};

use tracing::debug;

use super::FeatureRecorder;
use crate::errors::RecorderError;

/// When a recorder carves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CarveMode {
    /// Never carve.
    None,
    /// Carve only content that was decoded out of some encoding — i.e. the
    /// data's path is non-empty and its innermost stage is not the
    /// recorder's `do_not_carve_encoding`.
    ///
    /// This is what lets a ZIP scanner carve XOR-obfuscated ZIPs found
    /// inside hibernation files without also carving every plain ZIP member
    /// it decodes.
    #[default]
    Encoded,
    /// Always carve.
    All,
}

/// Result of a carve request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CarveOutcome {
    /// Policy said no: disabled set, `CarveMode::None`, or unencoded data
    /// under `CarveMode::Encoded`.
    NotCarved,
    /// Identical content was already carved; a `CACHED` feature was
    /// recorded and no file written.
    Cached,
    /// A file was written at this path, relative to the output directory.
    Carved(String),
}

/// Feature value recorded for a cache-hit carve.
pub(crate) const CACHED_FEATURE: &str = "CACHED";

impl FeatureRecorder {
    /// Carves `header` followed by `data` into a new artifact file.
    ///
    /// The carve decision follows the recorder's [`CarveMode`]; the content
    /// hash of `data` keys the at-most-once cache. A positive `mtime` (Unix
    /// seconds) is stamped onto the created file. Every carve — cached or
    /// not — records a feature whose context is an XML `fileobject` blob.
    ///
    /// I/O failures are returned as errors and are fatal to the scan: a
    /// carve that cannot be written is unrecoverable evidence loss.
    pub fn carve(
        &self,
        header: &crate::sbuf::SBuf,
        data: &crate::sbuf::SBuf,
        ext: &str,
        mtime: i64,
    ) -> Result<CarveOutcome, RecorderError> {
        let core = self.core();
        if core.disabled {
            return Ok(CarveOutcome::NotCarved);
        }
        let (mode, do_not_carve_encoding) = self.carve_settings();
        match mode {
            CarveMode::None => return Ok(CarveOutcome::NotCarved),
            CarveMode::Encoded => {
                if data.pos0().path().is_empty() {
                    return Ok(CarveOutcome::NotCarved);
                }
                if !do_not_carve_encoding.is_empty()
                    && data.pos0().alpha_part() == do_not_carve_encoding
                {
                    return Ok(CarveOutcome::NotCarved);
                }
            }
            CarveMode::All => {}
        }
        let Some(outdir) = core.outdir.as_ref() else {
            return Ok(CarveOutcome::NotCarved);
        };

        let hash = data.hash_with(&core.hasher).to_string();
        let total_len = header.len() + data.len();

        if self.carve_cache().check_and_insert(&hash) {
            let xml = format!(
                "<fileobject><filesize>{total_len}</filesize>\
                 <hashdigest type='{}'>{hash}</hashdigest></fileobject>",
                core.hasher.name()
            );
            self.write(data.pos0(), CACHED_FEATURE.as_bytes(), xml.as_bytes())?;
            return Ok(CarveOutcome::Cached);
        }

        let seq = self.next_carve_number();
        let bin = format!("{:03}", seq / 1000);
        let dir = outdir.join(self.name()).join(&bin);
        std::fs::create_dir_all(&dir)?;

        let base = super::valid_dosname(&format!("{}{ext}", data.pos0()));
        let target = dir.join(&base);
        let relpath = format!("{}/{bin}/{base}", self.name());
        debug!(recorder = %self.name(), path = %relpath, bytes = total_len, "carving");

        let mut file = File::options().write(true).create_new(true).open(&target)?;
        file.write_all(header.bytes())?;
        file.write_all(data.bytes())?;
        if mtime > 0 {
            let when = SystemTime::UNIX_EPOCH + Duration::from_secs(mtime as u64);
            file.set_modified(when)?;
        }
        drop(file);

        let xml = format!(
            "<fileobject><filename>{relpath}</filename><filesize>{total_len}</filesize>\
             <hashdigest type='{}'>{hash}</hashdigest></fileobject>",
            core.hasher.name()
        );
        self.write(data.pos0(), relpath.as_bytes(), xml.as_bytes())?;
        Ok(CarveOutcome::Carved(relpath))
    }
}
