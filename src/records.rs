use bitflags::bitflags;

use crate::cursor::ByteCursor;
use crate::error::Result;

bitflags! {
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    pub struct MethodListFlags: u32 {
        const UNIQUED = 1 << 0;
        const SORTED = 1 << 1;
        const SMALL_METHOD_LIST = 0x8000_0000;
        const RELATIVE_SELECTORS_ARE_DIRECT = 0x4000_0000;
    }
}

/// The `{entsize, count}` header in front of every method, ivar and
/// property list. The top two bits of `entsize` select the small-method
/// format and direct relative selectors; the low two bits are per-entry
/// flags. The remaining bits are the true entry stride.
#[derive(Debug, Clone, Copy)]
pub struct ListHeader {
    pub entsize: u32,
    pub count: u32,
}

impl ListHeader {
    pub const SIZE: u64 = 8;
    const FLAGS_BITMASK: u32 = 0xC000_0003;

    pub fn read(cur: &mut ByteCursor) -> Result<Self> {
        let entsize = cur.read_u32()?;
        let count = cur.read_u32()?;
        Ok(ListHeader { entsize, count })
    }

    pub fn flags(&self) -> MethodListFlags {
        MethodListFlags::from_bits_truncate(self.entsize & Self::FLAGS_BITMASK)
    }

    pub fn entry_size(&self) -> u32 {
        self.entsize & !Self::FLAGS_BITMASK
    }

    pub fn uses_small_methods(&self) -> bool {
        self.flags().contains(MethodListFlags::SMALL_METHOD_LIST)
    }

    pub fn uses_direct_selectors(&self) -> bool {
        self.flags()
            .contains(MethodListFlags::RELATIVE_SELECTORS_ARE_DIRECT)
    }
}

/// `objc_class`: eight pointer-sized fields, of which the reserved tail
/// never matters to a reader.
#[derive(Debug, Clone, Copy)]
pub struct ClassRecord {
    pub isa: u64,
    pub superclass: u64,
    pub cache: u64,
    pub vtable: u64,
    pub data: u64,
}

impl ClassRecord {
    pub fn read(cur: &mut ByteCursor, is_64_bit: bool) -> Result<Self> {
        Ok(ClassRecord {
            isa: cur.read_ptr(is_64_bit)?,
            superclass: cur.read_ptr(is_64_bit)?,
            cache: cur.read_ptr(is_64_bit)?,
            vtable: cur.read_ptr(is_64_bit)?,
            data: cur.read_ptr(is_64_bit)?,
        })
    }
}

/// `class_ro_t`, the read-only half a class's `data` field points at once
/// its low tag bits are masked off.
#[derive(Debug, Clone, Copy)]
pub struct ClassRoRecord {
    pub flags: u32,
    pub instance_start: u32,
    pub instance_size: u32,
    pub ivar_layout: u64,
    pub name: u64,
    pub base_methods: u64,
    pub base_protocols: u64,
    pub ivars: u64,
    pub weak_ivar_layout: u64,
    pub base_properties: u64,
}

impl ClassRoRecord {
    pub fn read(cur: &mut ByteCursor, is_64_bit: bool) -> Result<Self> {
        let flags = cur.read_u32()?;
        let instance_start = cur.read_u32()?;
        let instance_size = cur.read_u32()?;
        if is_64_bit {
            cur.skip(4)?;
        }
        Ok(ClassRoRecord {
            flags,
            instance_start,
            instance_size,
            ivar_layout: cur.read_ptr(is_64_bit)?,
            name: cur.read_ptr(is_64_bit)?,
            base_methods: cur.read_ptr(is_64_bit)?,
            base_protocols: cur.read_ptr(is_64_bit)?,
            ivars: cur.read_ptr(is_64_bit)?,
            weak_ivar_layout: cur.read_ptr(is_64_bit)?,
            base_properties: cur.read_ptr(is_64_bit)?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MethodRecord {
    pub name: u64,
    pub types: u64,
    pub imp: u64,
}

impl MethodRecord {
    pub fn read(cur: &mut ByteCursor, is_64_bit: bool) -> Result<Self> {
        Ok(MethodRecord {
            name: cur.read_ptr(is_64_bit)?,
            types: cur.read_ptr(is_64_bit)?,
            imp: cur.read_ptr(is_64_bit)?,
        })
    }
}

/// The 12-byte relative method entry: three signed deltas, each taken
/// from its own field's VM address.
#[derive(Debug, Clone, Copy)]
pub struct SmallMethodRecord {
    pub name_offset: i32,
    pub types_offset: i32,
    pub imp_offset: i32,
}

impl SmallMethodRecord {
    pub const SIZE: u64 = 12;

    pub fn read(cur: &mut ByteCursor) -> Result<Self> {
        Ok(SmallMethodRecord {
            name_offset: cur.read_i32()?,
            types_offset: cur.read_i32()?,
            imp_offset: cur.read_i32()?,
        })
    }
}

/// `ivar_t`. The first field is not the offset itself but a pointer to
/// the 32-bit slot holding it.
#[derive(Debug, Clone, Copy)]
pub struct IvarRecord {
    pub offset_ptr: u64,
    pub name: u64,
    pub type_: u64,
    pub alignment: u32,
    pub size: u32,
}

impl IvarRecord {
    pub fn read(cur: &mut ByteCursor, is_64_bit: bool) -> Result<Self> {
        Ok(IvarRecord {
            offset_ptr: cur.read_ptr(is_64_bit)?,
            name: cur.read_ptr(is_64_bit)?,
            type_: cur.read_ptr(is_64_bit)?,
            alignment: cur.read_u32()?,
            size: cur.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PropertyRecord {
    pub name: u64,
    pub attributes: u64,
}

impl PropertyRecord {
    pub fn read(cur: &mut ByteCursor, is_64_bit: bool) -> Result<Self> {
        Ok(PropertyRecord {
            name: cur.read_ptr(is_64_bit)?,
            attributes: cur.read_ptr(is_64_bit)?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProtocolRecord {
    pub isa: u64,
    pub name: u64,
    pub protocols: u64,
    pub instance_methods: u64,
    pub class_methods: u64,
    pub optional_instance_methods: u64,
    pub optional_class_methods: u64,
    pub instance_properties: u64,
    pub size: u32,
    pub flags: u32,
    pub extended_method_types: u64,
}

impl ProtocolRecord {
    pub fn read(cur: &mut ByteCursor, is_64_bit: bool) -> Result<Self> {
        let isa = cur.read_ptr(is_64_bit)?;
        let name = cur.read_ptr(is_64_bit)?;
        let protocols = cur.read_ptr(is_64_bit)?;
        let instance_methods = cur.read_ptr(is_64_bit)?;
        let class_methods = cur.read_ptr(is_64_bit)?;
        let optional_instance_methods = cur.read_ptr(is_64_bit)?;
        let optional_class_methods = cur.read_ptr(is_64_bit)?;
        let instance_properties = cur.read_ptr(is_64_bit)?;
        let size = cur.read_u32()?;
        let flags = cur.read_u32()?;

        // extendedMethodTypes only exists when the on-disk size covers it.
        let ptr_size = if is_64_bit { 8 } else { 4 };
        let extended_method_types = if u64::from(size) > 8 * ptr_size + 8 {
            cur.read_ptr(is_64_bit)?
        } else {
            0
        };

        Ok(ProtocolRecord {
            isa,
            name,
            protocols,
            instance_methods,
            class_methods,
            optional_instance_methods,
            optional_class_methods,
            instance_properties,
            size,
            flags,
            extended_method_types,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CategoryRecord {
    pub name: u64,
    pub cls: u64,
    pub instance_methods: u64,
    pub class_methods: u64,
    pub protocols: u64,
    pub instance_properties: u64,
    pub v7: u64,
    pub v8: u64,
}

impl CategoryRecord {
    pub fn read(cur: &mut ByteCursor, is_64_bit: bool) -> Result<Self> {
        Ok(CategoryRecord {
            name: cur.read_ptr(is_64_bit)?,
            cls: cur.read_ptr(is_64_bit)?,
            instance_methods: cur.read_ptr(is_64_bit)?,
            class_methods: cur.read_ptr(is_64_bit)?,
            protocols: cur.read_ptr(is_64_bit)?,
            instance_properties: cur.read_ptr(is_64_bit)?,
            v7: cur.read_ptr(is_64_bit)?,
            v8: cur.read_ptr(is_64_bit)?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageInfoRecord {
    pub version: u32,
    pub flags: u32,
}

impl ImageInfoRecord {
    pub fn read(cur: &mut ByteCursor) -> Result<Self> {
        Ok(ImageInfoRecord {
            version: cur.read_u32()?,
            flags: cur.read_u32()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machofile::ByteOrder;

    #[test]
    fn list_header_splits_flags_from_stride() {
        let header = ListHeader {
            entsize: 0x8000_000c,
            count: 2,
        };
        assert!(header.uses_small_methods());
        assert!(!header.uses_direct_selectors());
        assert_eq!(header.entry_size(), 12);

        let regular = ListHeader {
            entsize: 24 | 3,
            count: 1,
        };
        assert!(!regular.uses_small_methods());
        assert_eq!(regular.entry_size(), 24);
        assert_eq!(
            regular.flags(),
            MethodListFlags::UNIQUED | MethodListFlags::SORTED
        );
    }

    #[test]
    fn class_ro_skips_the_64_bit_pad() {
        let mut bytes = Vec::new();
        for word in [1u32, 2, 3, 0xdead] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        for ptr in [0x10u64, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70] {
            bytes.extend_from_slice(&ptr.to_le_bytes());
        }
        let mut cur = ByteCursor::new(&bytes, 0, ByteOrder::Little);
        let ro = ClassRoRecord::read(&mut cur, true).unwrap();
        assert_eq!(ro.flags, 1);
        assert_eq!(ro.instance_size, 3);
        assert_eq!(ro.name, 0x20);
        assert_eq!(ro.base_properties, 0x70);
    }

    #[test]
    fn protocol_without_extended_types_stops_at_flags() {
        let mut bytes = Vec::new();
        for ptr in [0u64, 0x100, 0, 0, 0, 0, 0, 0] {
            bytes.extend_from_slice(&ptr.to_le_bytes());
        }
        bytes.extend_from_slice(&72u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        let mut cur = ByteCursor::new(&bytes, 0, ByteOrder::Little);
        let proto = ProtocolRecord::read(&mut cur, true).unwrap();
        assert_eq!(proto.name, 0x100);
        assert_eq!(proto.extended_method_types, 0);

        let mut with_ext = bytes.clone();
        with_ext[64..68].copy_from_slice(&80u32.to_le_bytes());
        with_ext.extend_from_slice(&0xabcu64.to_le_bytes());
        let mut cur = ByteCursor::new(&with_ext, 0, ByteOrder::Little);
        let proto = ProtocolRecord::read(&mut cur, true).unwrap();
        assert_eq!(proto.extended_method_types, 0xabc);
    }

    #[test]
    fn records_widen_32_bit_pointers() {
        let mut bytes = Vec::new();
        for ptr in [0x1000u32, 0x1100, 0x9000] {
            bytes.extend_from_slice(&ptr.to_le_bytes());
        }
        let mut cur = ByteCursor::new(&bytes, 0, ByteOrder::Little);
        let method = MethodRecord::read(&mut cur, false).unwrap();
        assert_eq!(method.name, 0x1000);
        assert_eq!(method.imp, 0x9000);
        assert_eq!(cur.tell(), 12);
    }
}
