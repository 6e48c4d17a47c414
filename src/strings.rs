use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::translate::AddressTranslator;

/// Cache of NUL-terminated strings keyed by virtual address.
///
/// Lives for one `process()` run. The miss path translates the address,
/// scans forward to the next NUL and validates UTF-8; both unmapped
/// addresses and invalid UTF-8 cache as `None` rather than erroring.
/// Racing misses on the same address insert the same value, so the
/// last-writer-wins overwrite is harmless.
#[derive(Debug, Default)]
pub struct StringTable {
    cache: Mutex<HashMap<u64, Option<String>>>,
}

impl StringTable {
    pub fn new() -> Self {
        StringTable::default()
    }

    pub fn read(&self, data: &[u8], translator: &AddressTranslator, vaddr: u64) -> Option<String> {
        if vaddr == 0 {
            return None;
        }
        if let Some(cached) = self.cache.lock().get(&vaddr) {
            return cached.clone();
        }

        let read = Self::read_uncached(data, translator, vaddr).ok();
        self.cache.lock().insert(vaddr, read.clone());
        read
    }

    fn read_uncached(data: &[u8], translator: &AddressTranslator, vaddr: u64) -> Result<String> {
        let offset = translator
            .file_offset(vaddr)
            .ok_or(Error::InvalidAddress(vaddr))?;
        let tail = data.get(offset..).ok_or(Error::InvalidAddress(vaddr))?;
        let len = tail
            .iter()
            .position(|byte| *byte == 0)
            .ok_or(Error::ShortRead {
                offset: data.len(),
                needed: 1,
            })?;
        let value = std::str::from_utf8(&tail[..len]).map_err(|_| Error::InvalidUtf8)?;
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machofile::Segment;

    fn identity_translator(size: u64) -> AddressTranslator {
        AddressTranslator::new(&[Segment {
            segname: "__TEXT".to_string(),
            vmaddr: 0,
            vmsize: size,
            fileoff: 0,
            filesize: size,
            sections: Vec::new(),
        }])
    }

    #[test]
    fn reads_and_caches_strings() {
        let data = b"hello\0world\0".to_vec();
        let translator = identity_translator(data.len() as u64);
        let strings = StringTable::new();
        assert_eq!(strings.read(&data, &translator, 0x6).as_deref(), Some("world"));
        assert_eq!(strings.read(&data, &translator, 0x6).as_deref(), Some("world"));
    }

    #[test]
    fn invalid_utf8_is_absent_not_fatal() {
        let data = vec![0xff, 0xfe, 0x00];
        let translator = identity_translator(data.len() as u64);
        let strings = StringTable::new();
        assert_eq!(strings.read(&data, &translator, 0x0), None);
    }

    #[test]
    fn unmapped_and_unterminated_reads_are_absent() {
        let data = b"abc".to_vec();
        let translator = identity_translator(data.len() as u64);
        let strings = StringTable::new();
        // No NUL before the end of the image.
        assert_eq!(strings.read(&data, &translator, 0x0), None);
        assert_eq!(strings.read(&data, &translator, 0x4000), None);
        assert_eq!(strings.read(&data, &translator, 0), None);
    }
}
