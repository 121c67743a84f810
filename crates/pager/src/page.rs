use crate::{BlockId, BLOCK_SIZE, INT_SIZE, PAGE_HEADER_SIZE};
use byteorder::{ByteOrder, LittleEndian};
use common::{DbError, DbResult};

/// A buffer page holding one block's bytes plus access metadata.
///
/// The block layout is a header, then a series of records, then free space.
/// Header bytes 0..4 hold the header size, bytes 4..8 the offset of the
/// beginning of the unused space (`free_pos`). The page keeps `free_pos`
/// mirrored in memory and a `current_pos` cursor for sequential access.
#[derive(Debug)]
pub struct Page {
    buf: [u8; BLOCK_SIZE],
    pub(crate) block: Option<BlockId>,
    pub(crate) pinned: bool,
    pub(crate) dirty: bool,
    free_pos: usize,
    current_pos: usize,
}

impl Page {
    pub(crate) fn new() -> Self {
        let mut page = Self {
            buf: [0; BLOCK_SIZE],
            block: None,
            pinned: false,
            dirty: false,
            free_pos: PAGE_HEADER_SIZE,
            current_pos: PAGE_HEADER_SIZE,
        };
        page.reset();
        page
    }

    /// Return the page to its unused state: zeroed content, fresh header,
    /// cursor right after the header, no block, clean and unpinned.
    pub(crate) fn reset(&mut self) {
        self.buf = [0; BLOCK_SIZE];
        LittleEndian::write_i32(&mut self.buf[0..INT_SIZE], PAGE_HEADER_SIZE as i32);
        LittleEndian::write_i32(
            &mut self.buf[INT_SIZE..2 * INT_SIZE],
            PAGE_HEADER_SIZE as i32,
        );
        self.block = None;
        self.pinned = false;
        self.dirty = false;
        self.free_pos = PAGE_HEADER_SIZE;
        self.current_pos = PAGE_HEADER_SIZE;
    }

    pub(crate) fn buf(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Offset of the first unused byte in the page.
    pub fn free_pos(&self) -> usize {
        self.free_pos
    }

    /// Cursor for the next sequential access.
    pub fn current_pos(&self) -> usize {
        self.current_pos
    }

    pub fn set_current_pos(&mut self, pos: usize) {
        self.current_pos = pos;
    }

    /// Move the cursor right after the header.
    pub fn set_pos_begin(&mut self) {
        self.current_pos = PAGE_HEADER_SIZE;
    }

    /// True when the cursor reached the end of the used part of the page.
    pub fn eop(&self) -> bool {
        self.current_pos >= self.free_pos
    }

    /// Whether `offset` is valid for getting a value.
    pub fn valid_pos_for_get(&self, offset: usize) -> bool {
        (PAGE_HEADER_SIZE..self.free_pos).contains(&offset)
    }

    /// Whether `offset` is valid for putting a value of `len` bytes.
    pub fn valid_pos_for_put(&self, offset: usize, len: usize) -> bool {
        offset >= PAGE_HEADER_SIZE && offset <= self.free_pos && offset + len <= BLOCK_SIZE
    }

    /// Retrieve the int at the cursor and advance it.
    pub fn get_int(&mut self) -> DbResult<i32> {
        let val = self.read_int(self.current_pos)?;
        self.current_pos += INT_SIZE;
        Ok(val)
    }

    /// Retrieve the int at `offset`. The cursor advances by one int.
    pub fn get_int_at(&mut self, offset: usize) -> DbResult<i32> {
        let val = self.read_int(offset)?;
        self.current_pos += INT_SIZE;
        Ok(val)
    }

    /// Put an int at the cursor, advancing it past the value.
    pub fn put_int(&mut self, val: i32) -> DbResult<()> {
        self.write_int(self.current_pos, val)
    }

    /// Put an int at `offset`; the cursor moves right after the value.
    pub fn put_int_at(&mut self, offset: usize, val: i32) -> DbResult<()> {
        self.write_int(offset, val)
    }

    /// Retrieve a string of `len` field bytes at the cursor and advance it.
    pub fn get_str(&mut self, len: usize) -> DbResult<String> {
        let val = self.read_str(self.current_pos, len)?;
        self.current_pos += len;
        Ok(val)
    }

    /// Retrieve a string of `len` field bytes at `offset`. The cursor
    /// advances by `len`.
    pub fn get_str_at(&mut self, offset: usize, len: usize) -> DbResult<String> {
        let val = self.read_str(offset, len)?;
        self.current_pos += len;
        Ok(val)
    }

    /// Put a string into a `len`-byte field at the cursor, zero-padding the
    /// remainder. `len` includes the terminator, so the value must be
    /// strictly shorter.
    pub fn put_str(&mut self, val: &str, len: usize) -> DbResult<()> {
        self.write_str(self.current_pos, val, len)
    }

    /// Put a string into a `len`-byte field at `offset`.
    pub fn put_str_at(&mut self, offset: usize, val: &str, len: usize) -> DbResult<()> {
        self.write_str(offset, val, len)
    }

    fn read_int(&self, offset: usize) -> DbResult<i32> {
        self.check_get(offset, INT_SIZE)?;
        Ok(LittleEndian::read_i32(&self.buf[offset..offset + INT_SIZE]))
    }

    fn write_int(&mut self, offset: usize, val: i32) -> DbResult<()> {
        self.check_put(offset, INT_SIZE)?;
        LittleEndian::write_i32(&mut self.buf[offset..offset + INT_SIZE], val);
        self.dirty = true;
        self.advance_after_put(offset + INT_SIZE);
        Ok(())
    }

    fn read_str(&self, offset: usize, len: usize) -> DbResult<String> {
        self.check_get(offset, len)?;
        let field = &self.buf[offset..offset + len];
        let end = field.iter().position(|&b| b == 0).unwrap_or(len);
        Ok(String::from_utf8_lossy(&field[..end]).into_owned())
    }

    fn write_str(&mut self, offset: usize, val: &str, len: usize) -> DbResult<()> {
        let bytes = val.as_bytes();
        if bytes.len() >= len {
            return Err(DbError::Storage(format!(
                "string of {} bytes does not fit a field of {} bytes",
                bytes.len(),
                len
            )));
        }
        self.check_put(offset, len)?;
        self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.buf[offset + bytes.len()..offset + len].fill(0);
        self.dirty = true;
        self.advance_after_put(offset + len);
        Ok(())
    }

    fn check_get(&self, offset: usize, len: usize) -> DbResult<()> {
        if !self.valid_pos_for_get(offset) {
            return Err(DbError::Storage(format!(
                "get at offset {} out of range [{}, {})",
                offset, PAGE_HEADER_SIZE, self.free_pos
            )));
        }
        if offset + len > BLOCK_SIZE {
            return Err(DbError::Storage(format!(
                "get of {} bytes at offset {} reads past the block",
                len, offset
            )));
        }
        Ok(())
    }

    fn check_put(&self, offset: usize, len: usize) -> DbResult<()> {
        if !self.valid_pos_for_put(offset, len) {
            return Err(DbError::Storage(format!(
                "put of {} bytes at offset {} out of range [{}, {}]",
                len, offset, PAGE_HEADER_SIZE, self.free_pos
            )));
        }
        Ok(())
    }

    /// A successful put leaves the cursor right after the value and pushes
    /// `free_pos` (and its header mirror) forward when the write extended the
    /// used area.
    fn advance_after_put(&mut self, new_pos: usize) {
        if new_pos > self.free_pos {
            self.set_free_pos(new_pos);
        }
        self.current_pos = new_pos;
    }

    /// Update `free_pos` together with its mirror in header bytes 4..8.
    pub(crate) fn set_free_pos(&mut self, pos: usize) {
        self.free_pos = pos;
        LittleEndian::write_i32(&mut self.buf[INT_SIZE..2 * INT_SIZE], pos as i32);
        self.dirty = true;
    }

    /// Validate the header-size marker of a block read from disk.
    pub(crate) fn check_header_marker(&self) -> DbResult<()> {
        let marker = LittleEndian::read_i32(&self.buf[0..INT_SIZE]);
        if marker != PAGE_HEADER_SIZE as i32 {
            return Err(DbError::Storage(format!(
                "header size of block is {}, incompatible with {} of current system",
                marker, PAGE_HEADER_SIZE
            )));
        }
        Ok(())
    }

    /// Mirror `free_pos` from header bytes 4..8 of a block read from disk.
    pub(crate) fn load_free_pos_from_header(&mut self) -> DbResult<()> {
        let pos = LittleEndian::read_i32(&self.buf[INT_SIZE..2 * INT_SIZE]);
        if pos < PAGE_HEADER_SIZE as i32 || pos > BLOCK_SIZE as i32 {
            return Err(DbError::Storage(format!(
                "block header carries free_pos {} outside [{}, {}]",
                pos, PAGE_HEADER_SIZE, BLOCK_SIZE
            )));
        }
        self.free_pos = pos as usize;
        Ok(())
    }
}
