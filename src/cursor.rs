use nom::number::complete::{be_i32, be_u32, be_u64, le_i32, le_u32, le_u64};

use crate::error::{Error, Result};
use crate::machofile::ByteOrder;

/// Sequential, bounds-checked reader over the raw image bytes.
///
/// One cursor parses one structure; cursors are never shared between
/// tasks. Every read past the end of the slice fails with
/// [`Error::ShortRead`] carrying the offending offset.
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8], offset: usize, order: ByteOrder) -> Self {
        ByteCursor {
            data,
            pos: offset,
            order,
        }
    }

    pub fn tell(&self) -> usize {
        self.pos
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n)?;
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => {
                let bytes = &self.data[self.pos..end];
                self.pos = end;
                Ok(bytes)
            }
            None => Err(Error::ShortRead {
                offset: self.pos,
                needed: n,
            }),
        }
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let offset = self.pos;
        let bytes = self.take(4)?;
        let parsed = match self.order {
            ByteOrder::Little => le_u32::<_, ()>(bytes),
            ByteOrder::Big => be_u32::<_, ()>(bytes),
        };
        let (_, value) = parsed.map_err(|_| Error::ShortRead { offset, needed: 4 })?;
        Ok(value)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let offset = self.pos;
        let bytes = self.take(4)?;
        let parsed = match self.order {
            ByteOrder::Little => le_i32::<_, ()>(bytes),
            ByteOrder::Big => be_i32::<_, ()>(bytes),
        };
        let (_, value) = parsed.map_err(|_| Error::ShortRead { offset, needed: 4 })?;
        Ok(value)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let offset = self.pos;
        let bytes = self.take(8)?;
        let parsed = match self.order {
            ByteOrder::Little => le_u64::<_, ()>(bytes),
            ByteOrder::Big => be_u64::<_, ()>(bytes),
        };
        let (_, value) = parsed.map_err(|_| Error::ShortRead { offset, needed: 8 })?;
        Ok(value)
    }

    /// Reads one pointer-sized word, zero-extending on 32-bit images.
    pub fn read_ptr(&mut self, is_64_bit: bool) -> Result<u64> {
        if is_64_bit {
            self.read_u64()
        } else {
            Ok(self.read_u32()? as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_both_endiannesses() {
        let data = [0x01u8, 0x02, 0x03, 0x04];
        let mut le = ByteCursor::new(&data, 0, ByteOrder::Little);
        assert_eq!(le.read_u32().unwrap(), 0x04030201);
        let mut be = ByteCursor::new(&data, 0, ByteOrder::Big);
        assert_eq!(be.read_u32().unwrap(), 0x01020304);
    }

    #[test]
    fn widens_32_bit_pointers() {
        let data = 0xfffffffeu32.to_le_bytes();
        let mut cur = ByteCursor::new(&data, 0, ByteOrder::Little);
        assert_eq!(cur.read_ptr(false).unwrap(), 0xfffffffe);
    }

    #[test]
    fn short_read_reports_offset() {
        let data = [0u8; 6];
        let mut cur = ByteCursor::new(&data, 0, ByteOrder::Little);
        cur.read_u32().unwrap();
        match cur.read_u64() {
            Err(Error::ShortRead { offset, needed }) => {
                assert_eq!(offset, 4);
                assert_eq!(needed, 8);
            }
            other => panic!("expected ShortRead, got {:?}", other.map(|_| ())),
        }
        // A failed read does not advance the cursor.
        assert_eq!(cur.tell(), 4);
    }

    #[test]
    fn skip_is_bounds_checked() {
        let data = [0u8; 4];
        let mut cur = ByteCursor::new(&data, 0, ByteOrder::Little);
        cur.skip(4).unwrap();
        assert!(cur.skip(1).is_err());
    }
}
