use crate::machofile::Segment;

#[derive(Debug, Clone, Copy)]
struct Mapping {
    vmaddr: u64,
    vmsize: u64,
    fileoff: u64,
    filesize: u64,
    order: usize,
}

/// Maps virtual addresses to file offsets through the segment table.
///
/// Built once per `process()` run and queried concurrently. Lookup is a
/// binary search over segments sorted by `vmaddr`; where segments overlap,
/// the first one in load-command order wins. Zero-page mappings
/// (`filesize == 0`) and vm-only tails past `filesize` translate to `None`.
#[derive(Debug)]
pub struct AddressTranslator {
    mappings: Vec<Mapping>,
    max_vmsize: u64,
}

impl AddressTranslator {
    pub fn new(segments: &[Segment]) -> Self {
        let mut mappings: Vec<Mapping> = segments
            .iter()
            .enumerate()
            .filter(|(_, seg)| seg.vmsize > 0)
            .map(|(order, seg)| Mapping {
                vmaddr: seg.vmaddr,
                vmsize: seg.vmsize,
                fileoff: seg.fileoff,
                filesize: seg.filesize,
                order,
            })
            .collect();
        mappings.sort_by_key(|m| m.vmaddr);
        let max_vmsize = mappings.iter().map(|m| m.vmsize).max().unwrap_or(0);
        AddressTranslator {
            mappings,
            max_vmsize,
        }
    }

    pub fn file_offset(&self, vaddr: u64) -> Option<usize> {
        let upper = self.mappings.partition_point(|m| m.vmaddr <= vaddr);
        // Every candidate satisfies vmaddr > vaddr - max_vmsize, so the
        // reverse scan ends after one step unless segments overlap.
        let hit = self.mappings[..upper]
            .iter()
            .rev()
            .take_while(|m| m.vmaddr.saturating_add(self.max_vmsize) > vaddr)
            .filter(|m| vaddr - m.vmaddr < m.vmsize)
            .min_by_key(|m| m.order)?;

        let delta = vaddr - hit.vmaddr;
        if hit.filesize > 0 && delta < hit.filesize {
            usize::try_from(hit.fileoff + delta).ok()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machofile::Segment;

    fn seg(segname: &str, vmaddr: u64, vmsize: u64, fileoff: u64, filesize: u64) -> Segment {
        Segment {
            segname: segname.to_string(),
            vmaddr,
            vmsize,
            fileoff,
            filesize,
            sections: Vec::new(),
        }
    }

    #[test]
    fn translates_within_segment_bounds() {
        let translator = AddressTranslator::new(&[
            seg("__TEXT", 0x0, 0x4000, 0x0, 0x4000),
            seg("__DATA", 0x4000, 0x2000, 0x4000, 0x1000),
        ]);
        assert_eq!(translator.file_offset(0x10), Some(0x10));
        assert_eq!(translator.file_offset(0x4abc), Some(0x4abc));
        assert_eq!(translator.file_offset(0x4fff), Some(0x4fff));
        // Mapped in vm, not backed by file bytes.
        assert_eq!(translator.file_offset(0x5000), None);
        assert_eq!(translator.file_offset(0x6000), None);
    }

    #[test]
    fn zero_page_is_unmapped() {
        let translator = AddressTranslator::new(&[
            seg("__PAGEZERO", 0x0, 0x1_0000_0000, 0, 0),
            seg("__TEXT", 0x1_0000_0000, 0x4000, 0, 0x4000),
        ]);
        assert_eq!(translator.file_offset(0x1000), None);
        assert_eq!(translator.file_offset(0x1_0000_0100), Some(0x100));
    }

    #[test]
    fn overlap_resolves_to_first_segment() {
        let translator = AddressTranslator::new(&[
            seg("__A", 0x1000, 0x1000, 0x0, 0x1000),
            seg("__B", 0x1000, 0x2000, 0x8000, 0x2000),
        ]);
        assert_eq!(translator.file_offset(0x1800), Some(0x800));
        // Only __B covers the second page.
        assert_eq!(translator.file_offset(0x2800), Some(0x9800));
    }
}
