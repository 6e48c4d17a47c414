use std::sync::atomic::{AtomicU32, Ordering};

use bitfield::bitfield;
use log::warn;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

bitfield! {
    pub struct DyldChainedPtr64RebaseBF(u64);
    impl Debug;
    pub target, set_target: 35, 0;
    pub high8, set_high8: 43, 36;
    pub reserved, set_reserved: 50, 44;
    pub next, set_next: 62, 51;
    pub bind, set_bind: 63;
}

bitfield! {
    pub struct DyldChainedPtr64BindBF(u64);
    impl Debug;
    pub ordinal, set_ordinal: 23, 0;
    pub addend, set_addend: 31, 24;
    pub reserved, set_reserved: 50, 32;
    pub next, set_next: 62, 51;
    pub bind, set_bind: 63;
}

bitfield! {
    pub struct DyldChainedPtrArm64eBindBF(u64);
    impl Debug;
    pub ordinal, set_ordinal: 15, 0;
    pub zero, set_zero: 31, 16;
    pub addend, set_addend: 50, 32;
    pub next, set_next: 61, 51;
    pub bind, set_bind: 62;
    pub auth, set_auth: 63;
}

bitfield! {
    pub struct DyldChainedPtrArm64eBind24BF(u64);
    impl Debug;
    pub ordinal, set_ordinal: 23, 0;
    pub zero, set_zero: 31, 24;
    pub addend, set_addend: 50, 32;
    pub next, set_next: 61, 51;
    pub bind, set_bind: 62;
    pub auth, set_auth: 63;
}

#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq)]
pub enum ChainedPointerFormat {
    Arm64e = 1,
    Ptr64 = 2,
    Ptr64Offset = 6,
    Arm64eUserland = 9,
    Arm64eUserland24 = 12,
}

#[derive(Debug, Clone)]
pub struct ChainedImport {
    pub lib_ordinal: i32,
    pub weak_import: bool,
    pub name: String,
}

/// The import table carried by `LC_DYLD_CHAINED_FIXUPS`, already parsed by
/// the load-command layer. Only the ordinal-to-symbol view matters here.
#[derive(Debug, Clone)]
pub struct ChainedFixups {
    pub pointer_format: u16,
    pub imports: Vec<ChainedImport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fixup {
    Rebase(u64),
    Bind { ordinal: u32, addend: u64 },
    NotFixup,
}

impl ChainedFixups {
    pub fn decode_pointer(&self, raw: u64) -> Fixup {
        if raw >> 36 == 0 {
            return Fixup::NotFixup;
        }

        match ChainedPointerFormat::from_u16(self.pointer_format) {
            Some(ChainedPointerFormat::Arm64e) | Some(ChainedPointerFormat::Arm64eUserland) => {
                if (raw >> 62) & 1 == 1 {
                    let bf = DyldChainedPtrArm64eBindBF(raw);
                    Fixup::Bind {
                        ordinal: bf.ordinal() as u32,
                        addend: bf.addend(),
                    }
                } else {
                    Fixup::Rebase(rebase_target(raw))
                }
            }
            Some(ChainedPointerFormat::Arm64eUserland24) => {
                if (raw >> 62) & 1 == 1 {
                    let bf = DyldChainedPtrArm64eBind24BF(raw);
                    Fixup::Bind {
                        ordinal: bf.ordinal() as u32,
                        addend: bf.addend(),
                    }
                } else {
                    Fixup::Rebase(rebase_target(raw))
                }
            }
            // DYLD_CHAINED_PTR_64 layouts, also the fallback when the
            // format value is one this reader does not know.
            _ => {
                if raw >> 63 == 1 {
                    let bf = DyldChainedPtr64BindBF(raw);
                    Fixup::Bind {
                        ordinal: bf.ordinal() as u32,
                        addend: bf.addend(),
                    }
                } else {
                    Fixup::Rebase(rebase_target(raw))
                }
            }
        }
    }

    pub fn symbol_name(&self, ordinal: u32) -> Option<&str> {
        self.imports
            .get(ordinal as usize)
            .map(|import| import.name.as_str())
    }
}

/// Unpacks a `DYLD_CHAINED_PTR_64` rebase: the 36-bit target with the
/// `high8` byte OR'd into bits 56..63. Values below `1 << 36` pass through
/// unchanged.
pub fn decode_chained_rebase(raw: u64) -> u64 {
    if raw >> 36 == 0 {
        return raw;
    }
    rebase_target(raw)
}

fn rebase_target(raw: u64) -> u64 {
    let bf = DyldChainedPtr64RebaseBF(raw);
    if bf.high8() != 0 {
        warn!(
            "chained rebase {:#x} carries non-zero high8 {:#x}",
            raw,
            bf.high8()
        );
    }
    bf.target() | bf.high8() << 56
}

/// A raw pointer-sized word, resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pointer {
    Address(u64),
    BindSymbol(String),
    BindOrdinal(u32),
}

impl Pointer {
    /// The internal address, zero for binds. Callers that only care about
    /// in-image targets use this and drop the bind cases at the zero check.
    pub fn address(&self) -> u64 {
        match self {
            Pointer::Address(addr) => *addr,
            Pointer::BindSymbol(_) | Pointer::BindOrdinal(_) => 0,
        }
    }
}

/// Resolves raw 64-bit words into addresses or external symbols.
///
/// When the image carries a chained-fixups table, it decides between
/// rebase and bind; otherwise the `DYLD_CHAINED_PTR_64` bit rule is
/// applied directly: zero high bits mean a plain pointer, bit 63 marks a
/// bind, anything else is a chained rebase.
///
/// Low-bit tag flags inside specific records (the Swift bit on a class's
/// `data` field, for one) survive decoding untouched; masking them off is
/// the caller's job.
#[derive(Debug)]
pub struct PointerDecoder<'a> {
    fixups: Option<&'a ChainedFixups>,
    odd_high8: AtomicU32,
}

impl<'a> PointerDecoder<'a> {
    pub fn new(fixups: Option<&'a ChainedFixups>) -> Self {
        PointerDecoder {
            fixups,
            odd_high8: AtomicU32::new(0),
        }
    }

    pub fn decode(&self, raw: u64) -> Pointer {
        if raw >> 36 == 0 {
            return Pointer::Address(raw);
        }
        if (raw >> 36) & 0xff != 0 && raw >> 63 == 0 {
            self.odd_high8.fetch_add(1, Ordering::Relaxed);
        }

        match self.fixups {
            Some(fixups) => match fixups.decode_pointer(raw) {
                Fixup::Rebase(target) => Pointer::Address(target),
                Fixup::Bind { ordinal, .. } => match fixups.symbol_name(ordinal) {
                    Some(name) => Pointer::BindSymbol(name.to_string()),
                    None => Pointer::BindOrdinal(ordinal),
                },
                Fixup::NotFixup => Pointer::Address(raw),
            },
            None => {
                if raw >> 63 == 1 {
                    Pointer::BindOrdinal(DyldChainedPtr64BindBF(raw).ordinal() as u32)
                } else {
                    Pointer::Address(rebase_target(raw))
                }
            }
        }
    }

    /// How many rebases decoded so far carried a non-zero `high8`.
    pub fn odd_high8_count(&self) -> u32 {
        self.odd_high8.load(Ordering::Relaxed)
    }
}

/// Strips the class-object symbol prefix from a bind target, so
/// `_OBJC_CLASS_$_NSObject` and `OBJC_CLASS_$_NSObject` both become
/// `NSObject`. Non-class symbols pass through unchanged.
pub fn strip_class_symbol_prefix(name: &str) -> &str {
    let trimmed = name.strip_prefix('_').unwrap_or(name);
    trimmed
        .strip_prefix("OBJC_CLASS_$_")
        .or_else(|| trimmed.strip_prefix("OBJC_METACLASS_$_"))
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_pointers_pass_through() {
        for raw in [0u64, 0x4000, (1 << 36) - 1] {
            assert_eq!(decode_chained_rebase(raw), raw);
            let decoder = PointerDecoder::new(None);
            assert_eq!(decoder.decode(raw), Pointer::Address(raw));
        }
    }

    #[test]
    fn chained_rebase_reassembles_high8() {
        let mut bf = DyldChainedPtr64RebaseBF(0);
        bf.set_target(0x4000);
        bf.set_high8(0x80);
        bf.set_next(3);
        assert_eq!(decode_chained_rebase(bf.0), 0x8000_0000_0000_4000);
    }

    #[test]
    fn rebase_with_next_link_still_targets() {
        // S3 shape: next-link bits set above the 36-bit target.
        let raw = 0x0010_0000_0000_4000u64;
        let decoder = PointerDecoder::new(None);
        assert_eq!(decoder.decode(raw), Pointer::Address(0x4000));
    }

    #[test]
    fn bind_without_table_yields_ordinal() {
        let mut bf = DyldChainedPtr64BindBF(0);
        bf.set_bind(true);
        bf.set_ordinal(7);
        let decoder = PointerDecoder::new(None);
        assert_eq!(decoder.decode(bf.0), Pointer::BindOrdinal(7));
    }

    #[test]
    fn bind_with_table_yields_symbol() {
        let fixups = ChainedFixups {
            pointer_format: ChainedPointerFormat::Ptr64 as u16,
            imports: vec![ChainedImport {
                lib_ordinal: 1,
                weak_import: false,
                name: "_OBJC_CLASS_$_NSObject".to_string(),
            }],
        };
        let mut bf = DyldChainedPtr64BindBF(0);
        bf.set_bind(true);
        bf.set_ordinal(0);
        let decoder = PointerDecoder::new(Some(&fixups));
        assert_eq!(
            decoder.decode(bf.0),
            Pointer::BindSymbol("_OBJC_CLASS_$_NSObject".to_string())
        );
    }

    #[test]
    fn class_symbol_prefix_stripping() {
        assert_eq!(strip_class_symbol_prefix("_OBJC_CLASS_$_NSObject"), "NSObject");
        assert_eq!(strip_class_symbol_prefix("OBJC_CLASS_$_NSView"), "NSView");
        assert_eq!(
            strip_class_symbol_prefix("_OBJC_METACLASS_$_NSObject"),
            "NSObject"
        );
        assert_eq!(strip_class_symbol_prefix("_dispatch_main_q"), "_dispatch_main_q");
    }
}
