//! Compact List Encoding
//!
//! A list stored as one contiguous byte buffer instead of a linked structure.
//! Small lists are by far the most common case, and keeping every element in a
//! single allocation makes them cheap to hold and cheap to scan.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────┬──────────┬─────────┬─────────┬─────────┬─────┬──────┐
//! │ total(4) │ tail(4)  │ count(2)│ entry 0 │ entry 1 │ ... │ 0xFF │
//! └──────────┴──────────┴─────────┴─────────┴─────────┴─────┴──────┘
//!
//! entry: ┌────────────┬────────┬─────────────┐
//!        │ prevlen(4) │ len(2) │ payload ... │
//!        └────────────┴────────┴─────────────┘
//! ```
//!
//! All header fields are big-endian. `total` counts every byte including the
//! end marker, `tail` is the offset of the last entry (or of the end marker
//! when the list is empty), and `prevlen` is the full byte size of the entry
//! before it (0 for the first entry), which is what makes backward traversal
//! possible.
//!
//! Lists that outgrow this encoding would normally be converted to a different
//! representation. That conversion is not implemented; the hard limits below
//! are enforced with [`ListError`] instead.

use bytes::Bytes;
use thiserror::Error;

/// Size of the fixed header (total + tail + count).
pub const HEADER_SIZE: usize = 10;

/// Per-entry overhead (prevlen + payload length).
pub const ENTRY_HEADER_SIZE: usize = 6;

/// Marker byte terminating the buffer.
pub const END_MARKER: u8 = 0xFF;

/// Size of an empty list (header + end marker).
const EMPTY_SIZE: usize = HEADER_SIZE + 1;

/// Largest payload a single entry can hold.
pub const MAX_ENTRY_SIZE: usize = u16::MAX as usize;

/// Largest number of entries the count field can represent.
pub const MAX_ENTRIES: usize = u16::MAX as usize;

/// Spare capacity above which a pop gives memory back.
const SHRINK_SLACK: usize = 1024;

/// Errors raised when a write would not fit the encoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ListError {
    #[error("list element of {0} bytes exceeds the {max} byte limit", max = MAX_ENTRY_SIZE)]
    ValueTooLarge(usize),

    #[error("list is full ({max} elements)", max = MAX_ENTRIES)]
    ListFull,

    #[error("list would exceed 4 GB")]
    BufferTooLarge,
}

/// A list of byte strings packed into a single buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct CompactList {
    data: Vec<u8>,
}

impl CompactList {
    /// Creates an empty list.
    pub fn new() -> Self {
        let mut data = Vec::with_capacity(EMPTY_SIZE);
        data.resize(EMPTY_SIZE, 0);
        let mut list = Self { data };
        list.reset();
        list
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        u16::from_be_bytes([self.data[8], self.data[9]]) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total encoded size in bytes, as recorded in the header.
    #[inline]
    pub fn blob_len(&self) -> usize {
        read_u32(&self.data, 0) as usize
    }

    /// Raw encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    fn tail_offset(&self) -> usize {
        read_u32(&self.data, 4) as usize
    }

    fn set_header(&mut self, total: usize, tail: usize, count: usize) {
        self.data[0..4].copy_from_slice(&(total as u32).to_be_bytes());
        self.data[4..8].copy_from_slice(&(tail as u32).to_be_bytes());
        self.data[8..10].copy_from_slice(&(count as u16).to_be_bytes());
    }

    fn reset(&mut self) {
        self.data.truncate(EMPTY_SIZE);
        self.data[HEADER_SIZE] = END_MARKER;
        self.set_header(EMPTY_SIZE, HEADER_SIZE, 0);
    }

    /// Full byte size of the entry starting at `pos`.
    #[inline]
    fn entry_size_at(&self, pos: usize) -> usize {
        ENTRY_HEADER_SIZE + u16::from_be_bytes([self.data[pos + 4], self.data[pos + 5]]) as usize
    }

    #[inline]
    fn payload_at(&self, pos: usize) -> &[u8] {
        let len = u16::from_be_bytes([self.data[pos + 4], self.data[pos + 5]]) as usize;
        &self.data[pos + ENTRY_HEADER_SIZE..pos + ENTRY_HEADER_SIZE + len]
    }

    fn check_insert(&self, value: &[u8]) -> Result<usize, ListError> {
        if value.len() > MAX_ENTRY_SIZE {
            return Err(ListError::ValueTooLarge(value.len()));
        }
        if self.len() >= MAX_ENTRIES {
            return Err(ListError::ListFull);
        }
        let entry_size = ENTRY_HEADER_SIZE + value.len();
        if self.blob_len() + entry_size > u32::MAX as usize {
            return Err(ListError::BufferTooLarge);
        }
        Ok(entry_size)
    }

    /// Checks that every value in `values` would fit, without modifying the
    /// list. A batch that passes can be pushed without any push failing.
    pub fn check_batch<V: AsRef<[u8]>>(&self, values: &[V]) -> Result<(), ListError> {
        if let Some(value) = values.iter().find(|v| v.as_ref().len() > MAX_ENTRY_SIZE) {
            return Err(ListError::ValueTooLarge(value.as_ref().len()));
        }
        if self.len() + values.len() > MAX_ENTRIES {
            return Err(ListError::ListFull);
        }
        let added: usize = values
            .iter()
            .map(|v| ENTRY_HEADER_SIZE + v.as_ref().len())
            .sum();
        if self.blob_len() + added > u32::MAX as usize {
            return Err(ListError::BufferTooLarge);
        }
        Ok(())
    }

    /// Appends `value` after the last entry.
    pub fn push_tail(&mut self, value: &[u8]) -> Result<(), ListError> {
        let entry_size = self.check_insert(value)?;
        let count = self.len();
        let total = self.blob_len();

        // The new entry takes the end marker's place.
        let write_pos = total - 1;
        let prevlen = if count == 0 {
            0
        } else {
            write_pos - self.tail_offset()
        };

        self.data.reserve(entry_size);
        self.data.truncate(write_pos);
        self.data.extend_from_slice(&(prevlen as u32).to_be_bytes());
        self.data.extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.data.extend_from_slice(value);
        self.data.push(END_MARKER);

        self.set_header(total + entry_size, write_pos, count + 1);
        Ok(())
    }

    /// Inserts `value` before the first entry. Shifts every existing entry.
    pub fn push_head(&mut self, value: &[u8]) -> Result<(), ListError> {
        let entry_size = self.check_insert(value)?;
        let count = self.len();
        let total = self.blob_len();
        let tail = self.tail_offset();

        let mut entry = Vec::with_capacity(entry_size);
        entry.extend_from_slice(&0u32.to_be_bytes());
        entry.extend_from_slice(&(value.len() as u16).to_be_bytes());
        entry.extend_from_slice(value);
        self.data.splice(HEADER_SIZE..HEADER_SIZE, entry);

        let new_tail = if count == 0 {
            HEADER_SIZE
        } else {
            // the old head now has a predecessor
            let old_head = HEADER_SIZE + entry_size;
            self.data[old_head..old_head + 4].copy_from_slice(&(entry_size as u32).to_be_bytes());
            tail + entry_size
        };

        self.set_header(total + entry_size, new_tail, count + 1);
        Ok(())
    }

    /// Removes and returns the last entry.
    pub fn pop_tail(&mut self) -> Option<Bytes> {
        let count = self.len();
        if count == 0 {
            return None;
        }

        let tail = self.tail_offset();
        let value = Bytes::copy_from_slice(self.payload_at(tail));

        if count == 1 {
            self.reset();
        } else {
            let prevlen = read_u32(&self.data, tail) as usize;
            self.data.truncate(tail);
            self.data.push(END_MARKER);
            self.set_header(tail + 1, tail - prevlen, count - 1);
        }

        self.maybe_shrink();
        Some(value)
    }

    /// Removes and returns the first entry.
    pub fn pop_head(&mut self) -> Option<Bytes> {
        let count = self.len();
        if count == 0 {
            return None;
        }

        let head_size = self.entry_size_at(HEADER_SIZE);
        let value = Bytes::copy_from_slice(self.payload_at(HEADER_SIZE));

        if count == 1 {
            self.reset();
        } else {
            let total = self.blob_len();
            let tail = self.tail_offset();
            self.data.drain(HEADER_SIZE..HEADER_SIZE + head_size);
            self.data[HEADER_SIZE..HEADER_SIZE + 4].copy_from_slice(&0u32.to_be_bytes());
            self.set_header(total - head_size, tail - head_size, count - 1);
        }

        self.maybe_shrink();
        Some(value)
    }

    fn maybe_shrink(&mut self) {
        if self.data.capacity() > self.data.len() + SHRINK_SLACK {
            self.data.shrink_to_fit();
        }
    }

    /// Returns the entry `index` hops back from the tail (0 is the last entry).
    pub fn get_from_tail(&self, index: usize) -> Option<&[u8]> {
        if index >= self.len() {
            return None;
        }

        let mut pos = self.tail_offset();
        for _ in 0..index {
            let prevlen = read_u32(&self.data, pos) as usize;
            if prevlen == 0 {
                break;
            }
            pos -= prevlen;
        }
        Some(self.payload_at(pos))
    }

    /// Returns the entry at `index`. Negative indices count from the tail.
    pub fn get(&self, index: i64) -> Option<&[u8]> {
        if index < 0 {
            let back = index.unsigned_abs() as usize;
            return self.get_from_tail(back - 1);
        }
        self.iter().nth(index as usize)
    }

    /// Returns entries `start..=end` with Redis-style index normalization.
    pub fn range(&self, start: i64, end: i64) -> Vec<Bytes> {
        let len = self.len() as i64;
        if len == 0 {
            return Vec::new();
        }

        let start = if start < 0 { len + start } else { start }.max(0);
        let end = if end < 0 { len + end } else { end }.min(len - 1);
        if start > end {
            return Vec::new();
        }

        self.iter()
            .skip(start as usize)
            .take((end - start + 1) as usize)
            .map(Bytes::copy_from_slice)
            .collect()
    }

    /// Iterates from head to tail.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            pos: HEADER_SIZE,
        }
    }
}

impl Default for CompactList {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompactList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.iter().map(String::from_utf8_lossy))
            .finish()
    }
}

/// Forward iterator over a [`CompactList`].
pub struct Iter<'a> {
    list: &'a CompactList,
    pos: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        // the end marker is the last byte
        if self.pos + 1 >= self.list.data.len() {
            return None;
        }
        let pos = self.pos;
        self.pos += self.list.entry_size_at(pos);
        Some(self.list.payload_at(pos))
    }
}

#[inline]
fn read_u32(data: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}
