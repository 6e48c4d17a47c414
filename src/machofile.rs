use std::collections::HashSet;

use crate::pointer::ChainedFixups;
use crate::swift::SwiftMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone)]
pub struct Section {
    pub sectname: String,
    pub addr: u64,
    pub size: u64,
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub segname: String,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub sections: Vec<Section>,
}

impl Segment {
    pub fn file_offset(&self, vaddr: u64) -> Option<u64> {
        if vaddr < self.vmaddr || vaddr - self.vmaddr >= self.vmsize {
            return None;
        }
        let delta = vaddr - self.vmaddr;
        if delta < self.filesize {
            Some(self.fileoff + delta)
        } else {
            None
        }
    }

    pub fn section(&self, sectname: &str) -> Option<&Section> {
        self.sections.iter().find(|sect| sect.sectname == sectname)
    }
}

/// A parsed Mach-O image, as handed over by the load-command layer.
///
/// Load-command parsing itself happens upstream; this crate only consumes
/// the raw bytes, the segment table, and the optional chained-fixups and
/// Swift side tables.
#[derive(Debug)]
pub struct MachOFile {
    pub data: Vec<u8>,
    pub segments: Vec<Segment>,
    pub byte_order: ByteOrder,
    pub is_64_bit: bool,
    pub chained_fixups: Option<ChainedFixups>,
    pub swift: Option<SwiftMetadata>,
    /// Names of the classes exported from the image, with the
    /// `OBJC_CLASS_$_` symbol prefix already stripped. `None` means the
    /// export list was not extracted; every class is then assumed exported.
    pub exported_classes: Option<HashSet<String>>,
}

impl MachOFile {
    pub fn section(&self, segname: &str, sectname: &str) -> Option<&Section> {
        self.segments
            .iter()
            .find(|seg| seg.segname == segname)
            .and_then(|seg| seg.section(sectname))
    }

    /// Looks an ObjC metadata section up in `__DATA`, then `__DATA_CONST`.
    pub fn objc_section(&self, sectname: &str) -> Option<&Section> {
        self.section("__DATA", sectname)
            .or_else(|| self.section("__DATA_CONST", sectname))
    }

    pub fn pointer_size(&self) -> u64 {
        if self.is_64_bit {
            8
        } else {
            4
        }
    }
}
