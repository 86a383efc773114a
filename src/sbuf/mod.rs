//! Safer buffers: bounded, position-tagged views over binary evidence.
//!
//! An [`SBuf`] is an immutable window onto bytes that came from a mapped
//! file, an owned allocation, or a decode of another buffer. Every view
//! carries the [`Pos0`] of its first byte, so anything found inside it can be
//! reported with full provenance. Views never copy: a child produced by
//! [`SBuf::child`] or [`SBuf::child_range`] shares the root's storage.
//!
//! # Page and margin
//! The first `pagesize` bytes are the *page*: the region this view is
//! authoritative for. Bytes in `[pagesize, bufsize)` are the *margin*, kept
//! so features straddling a page boundary can be completed; emission from the
//! margin is suppressed by the recorders because the adjacent page will scan
//! those bytes again.
//!
//! # Ownership
//! Root storage lives in an `Arc`; child views hold a strong handle, so the
//! bytes outlive every view no matter the drop order. The root additionally
//! keeps an atomic count of live descendant views. The dispatch loop checks
//! that count after running the scanners: a nonzero count means a scanner
//! stashed a child view somewhere it should not have. That is reported as a
//! bug, never a crash — the `Arc` keeps the memory valid regardless.
//!
//! # Invariants
//! - `pagesize <= bufsize` always.
//! - All typed reads fail with [`SbufError::Range`] when `offset + width`
//!   exceeds `bufsize`; they never touch memory out of range.
//! - `children()` on the root counts all live descendant views, however
//!   deeply nested their construction was.

mod read;

pub use read::{ByteOrder, Lines};

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use memmap2::Mmap;
use tracing::error;

use crate::errors::SbufError;
use crate::hasher::Hasher;
use crate::pos0::Pos0;

/// Root byte storage, with its release action encoded in the variant.
///
/// Dropping the root unmaps, frees, or does nothing, respectively; the
/// mapped file's descriptor closes with the `File` kept alive by the map.
enum Storage {
    Mapped(Mmap),
    Owned(Vec<u8>),
    Static(&'static [u8]),
}

impl Storage {
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Mapped(map) => map,
            Storage::Owned(vec) => vec,
            Storage::Static(bytes) => bytes,
        }
    }
}

/// Shared root of a view family: the storage plus the live-descendant count.
struct Root {
    storage: Storage,
    children: AtomicU64,
}

/// A bounded view over binary data.
///
/// See the module docs for the page/margin and ownership model. `SBuf` is
/// deliberately not `Clone`: views are created through the explicit child
/// constructors so the descendant count stays meaningful.
pub struct SBuf {
    pos0: Pos0,
    root: Arc<Root>,
    /// Start of this view within the root storage.
    off: usize,
    bufsize: usize,
    pagesize: usize,
    /// Whether this view counts in `root.children` (false for the root).
    counted: bool,
    hash_hex: OnceLock<String>,
}

impl SBuf {
    fn from_storage(pos0: Pos0, storage: Storage, pagesize: Option<usize>) -> Self {
        let bufsize = storage.bytes().len();
        let pagesize = pagesize.map_or(bufsize, |p| p.min(bufsize));
        Self {
            pos0,
            root: Arc::new(Root { storage, children: AtomicU64::new(0) }),
            off: 0,
            bufsize,
            pagesize,
            counted: false,
            hash_hex: OnceLock::new(),
        }
    }

    /// Maps a file into memory and wraps it as a root buffer at `Pos0::at(0)`.
    pub fn map_file(path: impl AsRef<Path>) -> Result<Self, SbufError> {
        let file = File::open(path)?;
        Self::map_file_opened(file)
    }

    /// Wraps an already-opened file as a mapped root buffer.
    ///
    /// The mapping keeps the descriptor alive; it is released when the last
    /// view drops.
    pub fn map_file_opened(file: File) -> Result<Self, SbufError> {
        // SAFETY: the map is read-only and the File is owned by the mapping
        // for its whole lifetime. Mutation of the underlying file by another
        // process is outside this crate's contract, as with any mmap.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self::from_storage(Pos0::at(0), Storage::Mapped(map), None))
    }

    /// Wraps an owned byte vector; the page covers the whole buffer.
    pub fn from_vec(pos0: Pos0, bytes: Vec<u8>) -> Self {
        Self::from_storage(pos0, Storage::Owned(bytes), None)
    }

    /// Wraps an owned byte vector with an explicit page size.
    ///
    /// `pagesize` is clamped to the buffer length.
    pub fn from_vec_paged(pos0: Pos0, bytes: Vec<u8>, pagesize: usize) -> Self {
        Self::from_storage(pos0, Storage::Owned(bytes), Some(pagesize))
    }

    /// Wraps borrowed static bytes (no release action).
    pub fn from_static(pos0: Pos0, bytes: &'static [u8]) -> Self {
        Self::from_storage(pos0, Storage::Static(bytes), None)
    }

    /// Builds a buffer from a string. Mostly for tests.
    pub fn from_str(s: &str) -> Self {
        Self::from_vec(Pos0::at(0), s.as_bytes().to_vec())
    }

    fn make_child(&self, pos0: Pos0, off: usize, bufsize: usize, pagesize: usize) -> SBuf {
        self.root.children.fetch_add(1, Ordering::AcqRel);
        SBuf {
            pos0,
            root: Arc::clone(&self.root),
            off: self.off + off,
            bufsize,
            pagesize,
            counted: true,
            hash_hex: OnceLock::new(),
        }
    }

    /// A view `off` bytes in, and therefore `off` bytes smaller.
    ///
    /// The page shrinks with the view; if `off >= pagesize` the child's page
    /// is empty and only margin remains (margin bytes are never promoted to
    /// page data by slicing).
    pub fn child(&self, off: usize) -> SBuf {
        self.make_child(
            &self.pos0 + off as u64,
            off.min(self.bufsize),
            self.bufsize.saturating_sub(off),
            self.pagesize.saturating_sub(off),
        )
    }

    /// A view of `len` bytes starting at `off`, clamped to the buffer end.
    ///
    /// The child's page covers its entire extent.
    pub fn child_range(&self, off: usize, len: usize) -> SBuf {
        let off = off.min(self.bufsize);
        let len = len.min(self.bufsize - off);
        self.make_child(&self.pos0 + off as u64, off, len, len)
    }

    /// The same bytes under a different position.
    ///
    /// Used by recursive scanners that decode in place: the decoded child
    /// gets a path like `1000-ZIP-0` while sharing this buffer's storage.
    pub fn with_pos0(&self, pos0: Pos0) -> SBuf {
        self.make_child(pos0, 0, self.bufsize, self.pagesize)
    }

    /// Position of byte 0 of this view.
    pub fn pos0(&self) -> &Pos0 {
        &self.pos0
    }

    /// Recursion depth: the number of decode stages in `pos0`.
    pub fn depth(&self) -> u32 {
        self.pos0.depth()
    }

    /// Total view length in bytes.
    pub fn len(&self) -> usize {
        self.bufsize
    }

    /// Returns whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.bufsize == 0
    }

    /// Length of the page portion; bytes past it are margin.
    pub fn pagesize(&self) -> usize {
        self.pagesize
    }

    /// Bytes remaining at and after offset `n`.
    pub fn left(&self, n: usize) -> usize {
        self.bufsize.saturating_sub(n)
    }

    /// The view's bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.root.storage.bytes()[self.off..self.off + self.bufsize]
    }

    /// Number of live descendant views sharing this buffer's storage.
    pub fn children(&self) -> u64 {
        self.root.children.load(Ordering::Acquire)
    }

    /// Content hash of the whole view, memoized on first call.
    ///
    /// The first caller's algorithm wins; in practice every caller passes the
    /// recorder set's configured hasher.
    pub fn hash_with(&self, hasher: &Hasher) -> &str {
        self.hash_hex.get_or_init(|| hasher.hex(self.bytes()))
    }

    /// Smallest `k <= max_ngram` such that the entire buffer repeats with
    /// period `k`, or 0 if there is none.
    ///
    /// A buffer of 1024 `A`s has ngram size 1; `ABABAB` has 2. Buffers no
    /// longer than `k` are not considered `k`-periodic.
    pub fn find_ngram_size(&self, max_ngram: usize) -> usize {
        let bytes = self.bytes();
        for k in 1..=max_ngram {
            if k >= bytes.len() {
                break;
            }
            if bytes[k..].iter().zip(&bytes[..bytes.len() - k]).all(|(a, b)| a == b) {
                return k;
            }
        }
        0
    }

    /// Writes `len` bytes starting at `off` to `w`, returning the count.
    pub fn write_to(&self, w: &mut dyn Write, off: usize, len: usize) -> Result<usize, SbufError> {
        let slice = self.substr(off, len)?;
        w.write_all(slice)?;
        Ok(slice.len())
    }

    /// Dumps `len` bytes starting at `off` to a new file at `path`.
    ///
    /// The file is opened with exclusive-create and written through the kept
    /// descriptor; an existing file is an error, never silently reused.
    pub fn write_to_path(
        &self,
        path: impl AsRef<Path>,
        off: usize,
        len: usize,
    ) -> Result<(), SbufError> {
        let path = path.as_ref();
        let mut file = File::options()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::AlreadyExists => SbufError::TargetExists(path.to_path_buf()),
                _ => SbufError::Io(err),
            })?;
        self.write_to(&mut file, off, len)?;
        Ok(())
    }

    /// Hex-dumps the view to `w`, 16 bytes per line with an ASCII gutter.
    pub fn hex_dump(&self, w: &mut dyn Write) -> std::io::Result<()> {
        for (i, row) in self.bytes().chunks(16).enumerate() {
            write!(w, "{:08x}  ", i * 16)?;
            for j in 0..16 {
                match row.get(j) {
                    Some(b) => write!(w, "{b:02x} ")?,
                    None => write!(w, "   ")?,
                }
                if j == 7 {
                    write!(w, " ")?;
                }
            }
            write!(w, " |")?;
            for b in row {
                let c = if b.is_ascii_graphic() || *b == b' ' { *b as char } else { '.' };
                write!(w, "{c}")?;
            }
            writeln!(w, "|")?;
        }
        Ok(())
    }
}

impl std::ops::Add<usize> for &SBuf {
    type Output = SBuf;

    fn add(self, off: usize) -> SBuf {
        self.child(off)
    }
}

impl Drop for SBuf {
    fn drop(&mut self) {
        if self.counted {
            self.root.children.fetch_sub(1, Ordering::AcqRel);
        } else {
            let live = self.root.children.load(Ordering::Acquire);
            if live != 0 {
                // The Arc keeps the storage alive for the stragglers; this is
                // a leak report, not a safety hazard.
                error!(children = live, pos0 = %self.pos0, "root sbuf dropped with live child views");
            }
        }
    }
}

impl fmt::Display for SBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sbuf(pos0={} bufsize={} pagesize={})",
            self.pos0, self.bufsize, self.pagesize
        )
    }
}

impl fmt::Debug for SBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SBuf")
            .field("pos0", &self.pos0)
            .field("bufsize", &self.bufsize)
            .field("pagesize", &self.pagesize)
            .field("children", &self.children())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_tracks_descendants_on_root() {
        let root = SBuf::from_str("hello margin world");
        assert_eq!(root.children(), 0);
        {
            let a = root.child(6);
            assert_eq!(root.children(), 1);
            let b = a.child(7);
            assert_eq!(root.children(), 2);
            assert_eq!(b.bytes(), b"world");
            drop(a);
            assert_eq!(root.children(), 1);
        }
        assert_eq!(root.children(), 0);
    }

    #[test]
    fn child_shrinks_page_and_keeps_margin() {
        let buf = SBuf::from_vec_paged(Pos0::at(0), b"0123456789abcdef".to_vec(), 10);
        assert_eq!(buf.pagesize(), 10);

        let inside = buf.child(4);
        assert_eq!(inside.len(), 12);
        assert_eq!(inside.pagesize(), 6);
        assert_eq!(inside.pos0().offset(), 4);

        // Slicing past the page leaves only margin: empty page, data intact.
        let margin_only = buf.child(12);
        assert_eq!(margin_only.pagesize(), 0);
        assert_eq!(margin_only.len(), 4);
        assert_eq!(margin_only.bytes(), b"cdef");
    }

    #[test]
    fn child_range_clamps_len() {
        let buf = SBuf::from_str("0123456789");
        let mid = buf.child_range(4, 100);
        assert_eq!(mid.bytes(), b"456789");
        assert_eq!(mid.pagesize(), 6);
    }

    #[test]
    fn ngram_detection() {
        let ones = SBuf::from_vec(Pos0::at(0), vec![0x41; 1024]);
        assert_eq!(ones.find_ngram_size(10), 1);

        let abab = SBuf::from_str("abababab");
        assert_eq!(abab.find_ngram_size(10), 2);

        let text = SBuf::from_str("no repetition here at all");
        assert_eq!(text.find_ngram_size(10), 0);

        // A buffer no longer than the candidate period is not periodic.
        let tiny = SBuf::from_str("ab");
        assert_eq!(tiny.find_ngram_size(10), 0);
    }

    #[test]
    fn hash_is_memoized() {
        let buf = SBuf::from_str("stable bytes");
        let first = buf.hash_with(&Hasher::sha1()).to_string();
        // A different hasher on the second call must not change the answer.
        let second = buf.hash_with(&Hasher::md5());
        assert_eq!(first, second);
        assert_eq!(first.len(), 40);
    }

    #[test]
    fn write_to_path_refuses_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("carved.bin");
        let buf = SBuf::from_str("payload");
        buf.write_to_path(&target, 0, 7).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"payload");

        match buf.write_to_path(&target, 0, 7) {
            Err(SbufError::TargetExists(p)) => assert_eq!(p, target),
            other => panic!("expected TargetExists, got {other:?}"),
        }
    }
}
