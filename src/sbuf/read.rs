//! Bounds-checked readers and searches over an [`SBuf`].
//!
//! Every typed reader validates `offset + width <= bufsize` before touching
//! memory and fails with [`SbufError::Range`] otherwise. The one deliberate
//! exception is [`SBuf::get`], which returns 0 for out-of-range offsets:
//! scanners doing speculative look-ahead read past the end constantly, and a
//! zero is both safe and cheaper than a `Result` in those loops.
//!
//! Searches (`find_byte`, `find`) only consider start positions inside the
//! page; a match may extend into the margin. Line iteration is page-confined
//! for the same reason: the margin's lines belong to the next page.

use memchr::memmem;

use super::SBuf;
use crate::errors::SbufError;

/// Runtime byte-order selector for the `*_bo` readers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

macro_rules! int_readers {
    ($le:ident, $be:ident, $bo:ident, $ty:ty) => {
        /// Little-endian read at `i`; fails past the end of the buffer.
        pub fn $le(&self, i: usize) -> Result<$ty, SbufError> {
            Ok(<$ty>::from_le_bytes(*self.array_at(i)?))
        }

        /// Big-endian read at `i`; fails past the end of the buffer.
        pub fn $be(&self, i: usize) -> Result<$ty, SbufError> {
            Ok(<$ty>::from_be_bytes(*self.array_at(i)?))
        }

        /// Read at `i` in the byte order selected at runtime.
        pub fn $bo(&self, i: usize, bo: ByteOrder) -> Result<$ty, SbufError> {
            match bo {
                ByteOrder::Little => self.$le(i),
                ByteOrder::Big => self.$be(i),
            }
        }
    };
}

impl SBuf {
    /// Central bounds check: a borrowed `N`-byte array at `i`.
    ///
    /// This is also the public analog of a checked struct overlay — decode
    /// fixed-layout headers by destructuring the array.
    pub fn array_at<const N: usize>(&self, i: usize) -> Result<&[u8; N], SbufError> {
        self.bytes()
            .get(i..i + N)
            .and_then(|s| s.try_into().ok())
            .ok_or(SbufError::Range { offset: i, len: N, bufsize: self.len() })
    }

    /// Like [`array_at`](Self::array_at) but `None` instead of an error, for
    /// headers that are simply absent near the buffer end.
    pub fn get_array<const N: usize>(&self, i: usize) -> Option<&[u8; N]> {
        self.array_at(i).ok()
    }

    int_readers!(get_u8, get_u8_be, get_u8_bo, u8);
    int_readers!(get_u16, get_u16_be, get_u16_bo, u16);
    int_readers!(get_u32, get_u32_be, get_u32_bo, u32);
    int_readers!(get_u64, get_u64_be, get_u64_bo, u64);
    int_readers!(get_i8, get_i8_be, get_i8_bo, i8);
    int_readers!(get_i16, get_i16_be, get_i16_bo, i16);
    int_readers!(get_i32, get_i32_be, get_i32_bo, i32);
    int_readers!(get_i64, get_i64_be, get_i64_bo, i64);

    /// The byte at `i`, or 0 when `i` is out of range.
    ///
    /// Explicit design choice: no failure path, so look-ahead loops stay
    /// branchless. Use [`get_u8`](Self::get_u8) when absence must be seen.
    pub fn get(&self, i: usize) -> u8 {
        self.bytes().get(i).copied().unwrap_or(0)
    }

    /// Offset of the next `ch` at or after `start`, confined to the page.
    pub fn find_byte(&self, ch: u8, start: usize) -> Option<usize> {
        if start >= self.pagesize() {
            return None;
        }
        memchr::memchr(ch, &self.bytes()[start..self.pagesize()]).map(|i| start + i)
    }

    /// Offset of the next occurrence of `needle` starting at or after
    /// `start`.
    ///
    /// The match must *begin* within the page; it may run into the margin.
    /// Empty needles match nothing.
    pub fn find(&self, needle: &[u8], start: usize) -> Option<usize> {
        if needle.is_empty() || start >= self.pagesize() {
            return None;
        }
        memmem::find(&self.bytes()[start..], needle)
            .map(|i| start + i)
            .filter(|&at| at < self.pagesize())
    }

    /// A borrowed slice of `len` bytes at `off`; fails if out of range.
    pub fn substr(&self, off: usize, len: usize) -> Result<&[u8], SbufError> {
        self.bytes()
            .get(off..off + len)
            .ok_or(SbufError::Range { offset: off, len, bufsize: self.len() })
    }

    /// Whether every byte in `[off, off+len)` equals `ch`.
    ///
    /// Out-of-range tails are treated as non-matching.
    pub fn is_constant(&self, off: usize, len: usize, ch: u8) -> bool {
        match self.substr(off, len) {
            Ok(slice) => slice.iter().all(|b| *b == ch),
            Err(_) => false,
        }
    }

    /// Whether the whole page consists of `ch`.
    pub fn is_constant_page(&self, ch: u8) -> bool {
        self.is_constant(0, self.pagesize(), ch)
    }

    /// Iterates newline-delimited lines within the page.
    ///
    /// A line starts at offset 0 or after a `\n`, and excludes its
    /// terminator. A final unterminated segment is yielded as a line.
    pub fn lines(&self) -> Lines<'_> {
        Lines { page: &self.bytes()[..self.pagesize()], pos: 0 }
    }
}

/// Iterator over `(offset, line_bytes)` pairs in an sbuf's page.
pub struct Lines<'a> {
    page: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Lines<'a> {
    type Item = (usize, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.page.len() {
            return None;
        }
        let start = self.pos;
        let rest = &self.page[start..];
        match memchr::memchr(b'\n', rest) {
            Some(nl) => {
                self.pos = start + nl + 1;
                Some((start, &rest[..nl]))
            }
            None => {
                self.pos = self.page.len();
                Some((start, rest))
            }
        }
    }
}
