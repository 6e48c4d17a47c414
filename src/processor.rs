use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use log::{debug, warn};

use crate::arena::{ClassId, EntityArena, ProtocolId, Reserve};
use crate::cursor::ByteCursor;
use crate::error::{Error, Result};
use crate::machofile::MachOFile;
use crate::metadata::{
    Category, Class, ClassRef, ImageInfo, Ivar, Metadata, Method, MethodSignatureRegistry,
    ProcessStats, Property, Protocol, StructureRegistry,
};
use crate::pointer::{strip_class_symbol_prefix, Pointer, PointerDecoder};
use crate::records::{
    CategoryRecord, ClassRecord, ClassRoRecord, ImageInfoRecord, IvarRecord, ListHeader,
    MethodRecord, PropertyRecord, ProtocolRecord, SmallMethodRecord,
};
use crate::strings::StringTable;
use crate::swift::{Demangler, IdentityDemangler, SwiftFieldIndex};
use crate::translate::AddressTranslator;

/// Collaborators wired in from outside the metadata layer.
pub struct ProcessOptions {
    pub demangler: Arc<dyn Demangler>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        ProcessOptions {
            demangler: Arc::new(IdentityDemangler),
        }
    }
}

/// Reconstructs the image's ObjC declarations.
///
/// Phases run strictly in order: image info, then all protocols, then all
/// classes, then categories, then the encoding registries. Protocol and
/// class seeds are loaded by a task group; a single corrupt entity is
/// dropped (and counted) without failing the run.
pub fn process(file: &MachOFile, options: &ProcessOptions) -> Result<Metadata> {
    let processor = Processor::new(file, &*options.demangler);
    Ok(processor.run())
}

#[derive(Default)]
struct Stats {
    dropped_protocols: AtomicU32,
    dropped_classes: AtomicU32,
    dropped_categories: AtomicU32,
    unreadable_strings: AtomicU32,
}

impl Stats {
    fn bump(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct Processor<'a> {
    file: &'a MachOFile,
    translator: AddressTranslator,
    strings: StringTable,
    decoder: PointerDecoder<'a>,
    arena: EntityArena,
    swift_index: Option<SwiftFieldIndex<'a>>,
    demangler: &'a dyn Demangler,
    stats: Stats,
}

impl<'a> Processor<'a> {
    fn new(file: &'a MachOFile, demangler: &'a dyn Demangler) -> Self {
        let swift_index = file
            .swift
            .as_ref()
            .map(|swift| SwiftFieldIndex::new(swift, demangler));
        Processor {
            file,
            translator: AddressTranslator::new(&file.segments),
            strings: StringTable::new(),
            decoder: PointerDecoder::new(file.chained_fixups.as_ref()),
            arena: EntityArena::new(),
            swift_index,
            demangler,
            stats: Stats::default(),
        }
    }

    fn run(self) -> Metadata {
        let image_info = self.load_image_info();

        let protocol_seeds = self.seed_addresses("__objc_protolist");
        self.in_parallel(&protocol_seeds, |this, addr| {
            let _ = this.load_protocol_at(addr);
        });

        let class_seeds = self.seed_addresses("__objc_classlist");
        self.in_parallel(&class_seeds, |this, addr| {
            let _ = this.load_class_at(addr);
        });

        let mut seen_categories = HashSet::new();
        let categories: Vec<Category> = self
            .seed_addresses("__objc_catlist")
            .into_iter()
            .filter(|addr| seen_categories.insert(*addr))
            .filter_map(|addr| self.load_category_at(addr))
            .collect();

        let stats = ProcessStats {
            dropped_protocols: self.stats.dropped_protocols.load(Ordering::Relaxed),
            dropped_classes: self.stats.dropped_classes.load(Ordering::Relaxed),
            dropped_categories: self.stats.dropped_categories.load(Ordering::Relaxed),
            unreadable_strings: self.stats.unreadable_strings.load(Ordering::Relaxed),
            odd_high8_fixups: self.decoder.odd_high8_count(),
        };
        if stats != ProcessStats::default() {
            debug!("dropped entities while processing: {:?}", stats);
        }

        let (protocols, classes, protocols_by_address, classes_by_address) =
            self.arena.into_parts();
        let (structures, method_signatures) =
            build_registries(&protocols, &classes, &categories);

        Metadata::new(
            image_info,
            protocols,
            classes,
            protocols_by_address,
            classes_by_address,
            categories,
            structures,
            method_signatures,
            stats,
        )
    }

    /// Runs `op` over the addresses on a scoped worker group. Used for
    /// the protocol and class phases; everything `op` touches is behind
    /// the per-run locks.
    fn in_parallel(&self, addrs: &[u64], op: impl Fn(&Self, u64) + Sync) {
        if addrs.is_empty() {
            return;
        }
        let workers = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
            .min(addrs.len());
        if workers <= 1 {
            for addr in addrs {
                op(self, *addr);
            }
            return;
        }

        let per_worker = addrs.len().div_ceil(workers);
        let op = &op;
        thread::scope(|scope| {
            for chunk in addrs.chunks(per_worker) {
                scope.spawn(move || {
                    for addr in chunk {
                        op(self, *addr);
                    }
                });
            }
        });
    }

    fn cursor_at(&self, vaddr: u64) -> Option<ByteCursor<'_>> {
        let offset = self.translator.file_offset(vaddr)?;
        if offset >= self.file.data.len() {
            return None;
        }
        Some(ByteCursor::new(
            &self.file.data,
            offset,
            self.file.byte_order,
        ))
    }

    fn string_at(&self, vaddr: u64) -> Option<String> {
        self.strings.read(&self.file.data, &self.translator, vaddr)
    }

    fn string_at_pointer(&self, raw: u64) -> Option<String> {
        match self.decoder.decode(raw) {
            Pointer::Address(addr) => self.string_at(addr),
            Pointer::BindSymbol(_) | Pointer::BindOrdinal(_) => None,
        }
    }

    /// Reads the pointer words out of a seed section (`__objc_classlist`
    /// and friends), decoding each through the fixup rules.
    fn seed_addresses(&self, sectname: &str) -> Vec<u64> {
        let Some(sect) = self.file.objc_section(sectname) else {
            return Vec::new();
        };
        let ptr_size = self.file.pointer_size();
        let mut cur = ByteCursor::new(
            &self.file.data,
            sect.offset as usize,
            self.file.byte_order,
        );
        let mut addrs = Vec::new();
        for _ in 0..sect.size / ptr_size {
            let Ok(raw) = cur.read_ptr(self.file.is_64_bit) else {
                break;
            };
            let addr = self.decoder.decode(raw).address();
            if addr != 0 {
                addrs.push(addr);
            }
        }
        addrs
    }

    fn load_image_info(&self) -> Option<ImageInfo> {
        let sect = self.file.objc_section("__objc_imageinfo")?;
        let mut cur = ByteCursor::new(
            &self.file.data,
            sect.offset as usize,
            self.file.byte_order,
        );
        let rec = ImageInfoRecord::read(&mut cur).ok()?;
        Some(ImageInfo {
            version: rec.version,
            flags: rec.flags,
        })
    }

    fn load_protocol_at(&self, addr: u64) -> Option<ProtocolId> {
        if addr == 0 {
            return None;
        }
        if let Some(id) = self.arena.protocol_id(addr) {
            return Some(id);
        }

        let is_64_bit = self.file.is_64_bit;
        let rec = self
            .cursor_at(addr)
            .and_then(|mut cur| ProtocolRecord::read(&mut cur, is_64_bit).ok());
        let Some(rec) = rec else {
            Stats::bump(&self.stats.dropped_protocols);
            return None;
        };
        let Some(name) = self.string_at_pointer(rec.name) else {
            Stats::bump(&self.stats.unreadable_strings);
            Stats::bump(&self.stats.dropped_protocols);
            warn!("dropping protocol at {:#x}: unreadable name", addr);
            return None;
        };

        // Into the cache before any children load, so adoption cycles
        // resolve to this same slot.
        let id = match self.arena.reserve_protocol(addr, &name) {
            Reserve::New(id) => id,
            Reserve::Existing(id) => return Some(id),
        };

        let adopted = self.load_protocol_refs(rec.protocols);
        let extended_types = self.decoder.decode(rec.extended_method_types).address();
        let required_instance_methods = self.load_methods(rec.instance_methods, extended_types);
        let required_class_methods = self.load_methods(rec.class_methods, extended_types);
        let optional_instance_methods = self.load_methods(rec.optional_instance_methods, 0);
        let optional_class_methods = self.load_methods(rec.optional_class_methods, 0);
        let properties = self.load_properties(rec.instance_properties);

        self.arena.fill_protocol(id, |proto| {
            proto.adopted = adopted;
            proto.required_instance_methods = required_instance_methods;
            proto.required_class_methods = required_class_methods;
            proto.optional_instance_methods = optional_instance_methods;
            proto.optional_class_methods = optional_class_methods;
            proto.properties = properties;
        });
        Some(id)
    }

    fn load_class_at(&self, addr: u64) -> Option<ClassId> {
        if addr == 0 {
            return None;
        }
        if let Some(id) = self.arena.class_id(addr) {
            return Some(id);
        }

        let is_64_bit = self.file.is_64_bit;
        let rec = self
            .cursor_at(addr)
            .and_then(|mut cur| ClassRecord::read(&mut cur, is_64_bit).ok());
        let Some(rec) = rec else {
            Stats::bump(&self.stats.dropped_classes);
            return None;
        };

        // The low three bits of `data` are tag flags, not address bits.
        let raw_data = self.decoder.decode(rec.data).address();
        let ro_addr = raw_data & !7;
        if ro_addr == 0 {
            Stats::bump(&self.stats.dropped_classes);
            warn!("dropping class at {:#x}: no class_ro data", addr);
            return None;
        }
        let ro = self
            .cursor_at(ro_addr)
            .and_then(|mut cur| ClassRoRecord::read(&mut cur, is_64_bit).ok());
        let Some(ro) = ro else {
            Stats::bump(&self.stats.dropped_classes);
            return None;
        };
        let Some(name) = self.string_at_pointer(ro.name) else {
            Stats::bump(&self.stats.unreadable_strings);
            Stats::bump(&self.stats.dropped_classes);
            warn!("dropping class at {:#x}: unreadable name", addr);
            return None;
        };

        let id = match self.arena.reserve_class(addr, &name) {
            Reserve::New(id) => id,
            Reserve::Existing(id) => return Some(id),
        };

        let is_swift = raw_data & 1 != 0;
        let superclass = self.resolve_class_ref(rec.superclass);
        let instance_methods = self.load_methods(ro.base_methods, 0);
        let (metaclass_address, class_methods) = self.load_metaclass_methods(rec.isa);
        let ivars = self.load_ivars(ro.ivars, &name, is_swift);
        let adopted = self.load_protocol_refs(ro.base_protocols);
        let swift_conformances = if is_swift {
            self.swift_conformances(&name)
        } else {
            Vec::new()
        };
        let properties = self.load_properties(ro.base_properties);
        let is_exported = match &self.file.exported_classes {
            Some(exported) => exported.contains(&name),
            None => true,
        };

        self.arena.fill_class(id, |class| {
            class.superclass = superclass;
            class.is_swift = is_swift;
            class.is_exported = is_exported;
            class.class_data_address = ro_addr;
            class.metaclass_address = metaclass_address;
            class.adopted = adopted;
            class.swift_conformances = swift_conformances;
            class.ivars = ivars;
            class.instance_methods = instance_methods;
            class.class_methods = class_methods;
            class.properties = properties;
        });
        Some(id)
    }

    fn load_category_at(&self, addr: u64) -> Option<Category> {
        if addr == 0 {
            return None;
        }
        let is_64_bit = self.file.is_64_bit;
        let rec = self
            .cursor_at(addr)
            .and_then(|mut cur| CategoryRecord::read(&mut cur, is_64_bit).ok());
        let Some(rec) = rec else {
            Stats::bump(&self.stats.dropped_categories);
            return None;
        };
        let Some(name) = self.string_at_pointer(rec.name) else {
            Stats::bump(&self.stats.unreadable_strings);
            Stats::bump(&self.stats.dropped_categories);
            warn!("dropping category at {:#x}: unreadable name", addr);
            return None;
        };

        Some(Category {
            name,
            address: addr,
            class: self.resolve_class_ref(rec.cls),
            adopted: self.load_protocol_refs(rec.protocols),
            instance_methods: self.load_methods(rec.instance_methods, 0),
            class_methods: self.load_methods(rec.class_methods, 0),
            properties: self.load_properties(rec.instance_properties),
        })
    }

    /// Resolves a class-pointer word into an in-image class (loading it
    /// if need be) or an external name-only reference.
    fn resolve_class_ref(&self, raw: u64) -> Option<ClassRef> {
        match self.decoder.decode(raw) {
            Pointer::Address(0) => None,
            Pointer::Address(addr) => {
                let id = self.load_class_at(addr)?;
                Some(ClassRef {
                    name: self.arena.class_name(id),
                    class: Some(id),
                })
            }
            Pointer::BindSymbol(symbol) => Some(ClassRef {
                name: strip_class_symbol_prefix(&symbol).to_string(),
                class: None,
            }),
            Pointer::BindOrdinal(ordinal) => Some(ClassRef {
                name: format!("/* bind ordinal {} */", ordinal),
                class: None,
            }),
        }
    }

    /// Class methods live on the metaclass: follow `isa`, mask its
    /// `data` tags and read the metaclass's base method list.
    fn load_metaclass_methods(&self, isa_raw: u64) -> (u64, Vec<Method>) {
        let is_64_bit = self.file.is_64_bit;
        match self.decoder.decode(isa_raw) {
            Pointer::Address(addr) if addr != 0 => {
                let methods = (|| {
                    let mut cur = self.cursor_at(addr)?;
                    let meta = ClassRecord::read(&mut cur, is_64_bit).ok()?;
                    let meta_ro_addr = self.decoder.decode(meta.data).address() & !7;
                    if meta_ro_addr == 0 {
                        return None;
                    }
                    let mut ro_cur = self.cursor_at(meta_ro_addr)?;
                    let ro = ClassRoRecord::read(&mut ro_cur, is_64_bit).ok()?;
                    Some(self.load_methods(ro.base_methods, 0))
                })()
                .unwrap_or_default();
                (addr, methods)
            }
            _ => (0, Vec::new()),
        }
    }

    /// Reads and sanity-checks an entsize/count list header. The error is
    /// always recovered by the caller; the offending list just comes back
    /// empty.
    fn read_list_header(&self, list_vaddr: u64, kind: &'static str) -> Result<ListHeader> {
        let mut cur = self
            .cursor_at(list_vaddr)
            .ok_or(Error::InvalidAddress(list_vaddr))?;
        let header = ListHeader::read(&mut cur)?;
        let entry_size = u64::from(header.entry_size());
        let span = u64::from(header.count) * entry_size;
        if entry_size == 0 || cur.tell() as u64 + span > self.file.data.len() as u64 {
            return Err(Error::MalformedRecord(kind));
        }
        Ok(header)
    }

    /// Loads one method list. The result is the on-disk order reversed,
    /// which is the order this kind of tool has always printed.
    fn load_methods(&self, raw: u64, extended_types: u64) -> Vec<Method> {
        let list_vaddr = self.decoder.decode(raw).address();
        if list_vaddr == 0 {
            return Vec::new();
        }
        let header = match self.read_list_header(list_vaddr, "method list") {
            Ok(header) => header,
            Err(err) => {
                warn!("skipping method list at {:#x}: {}", list_vaddr, err);
                return Vec::new();
            }
        };

        let mut methods = if header.uses_small_methods() {
            self.read_small_methods(&header, list_vaddr)
        } else {
            self.read_regular_methods(&header, list_vaddr, extended_types)
        };
        methods.reverse();
        methods
    }

    fn read_regular_methods(
        &self,
        header: &ListHeader,
        list_vaddr: u64,
        extended_types: u64,
    ) -> Vec<Method> {
        let is_64_bit = self.file.is_64_bit;
        let entry_size = u64::from(header.entry_size());
        let mut ext_cur = if extended_types != 0 {
            self.cursor_at(extended_types)
        } else {
            None
        };

        let mut methods = Vec::new();
        for i in 0..u64::from(header.count) {
            let entry_vaddr = list_vaddr + ListHeader::SIZE + i * entry_size;
            let Some(mut cur) = self.cursor_at(entry_vaddr) else {
                break;
            };
            let Ok(rec) = MethodRecord::read(&mut cur, is_64_bit) else {
                break;
            };

            // One extended-types pointer per method, consumed whether or
            // not this entry survives.
            let extended = ext_cur.as_mut().and_then(|ext| {
                let raw = ext.read_ptr(is_64_bit).ok()?;
                self.string_at_pointer(raw)
            });

            let Some(selector) = self.string_at_pointer(rec.name) else {
                Stats::bump(&self.stats.unreadable_strings);
                continue;
            };
            let type_encoding = extended
                .or_else(|| self.string_at_pointer(rec.types))
                .unwrap_or_default();
            methods.push(Method {
                selector,
                type_encoding,
                // Raw on purpose: tools print the word as it sits on disk.
                implementation_address: rec.imp,
            });
        }
        methods
    }

    fn read_small_methods(&self, header: &ListHeader, list_vaddr: u64) -> Vec<Method> {
        let mut methods = Vec::new();
        for i in 0..u64::from(header.count) {
            let entry_vaddr = list_vaddr + ListHeader::SIZE + i * SmallMethodRecord::SIZE;
            let Some(mut cur) = self.cursor_at(entry_vaddr) else {
                break;
            };
            let Ok(rec) = SmallMethodRecord::read(&mut cur) else {
                break;
            };

            // Each delta is relative to its own field's VM address.
            let selector_ref = (entry_vaddr as i64 + i64::from(rec.name_offset)) as u64;
            let types_vaddr = (entry_vaddr as i64 + 4 + i64::from(rec.types_offset)) as u64;
            let imp_vaddr = (entry_vaddr as i64 + 8 + i64::from(rec.imp_offset)) as u64;

            let selector = if header.uses_direct_selectors() {
                self.string_at(selector_ref)
            } else {
                self.read_selector_ref(selector_ref)
                    .or_else(|| self.string_at(selector_ref))
            };
            let Some(selector) = selector else {
                Stats::bump(&self.stats.unreadable_strings);
                continue;
            };

            methods.push(Method {
                selector,
                type_encoding: self.string_at(types_vaddr).unwrap_or_default(),
                implementation_address: imp_vaddr,
            });
        }
        methods
    }

    /// `__objc_selrefs` indirection: the entry points at a cell that in
    /// turn points at the selector string.
    fn read_selector_ref(&self, selector_ref_vaddr: u64) -> Option<String> {
        let mut cur = self.cursor_at(selector_ref_vaddr)?;
        let raw = cur.read_ptr(self.file.is_64_bit).ok()?;
        self.string_at_pointer(raw)
    }

    fn load_ivars(&self, raw: u64, class_name: &str, is_swift: bool) -> Vec<Ivar> {
        let is_64_bit = self.file.is_64_bit;
        let list_vaddr = self.decoder.decode(raw).address();
        if list_vaddr == 0 {
            return Vec::new();
        }
        let header = match self.read_list_header(list_vaddr, "ivar list") {
            Ok(header) => header,
            Err(err) => {
                warn!("skipping ivar list at {:#x}: {}", list_vaddr, err);
                return Vec::new();
            }
        };

        let swift_owner =
            is_swift || class_name.starts_with("_Tt") || class_name.starts_with("_$s");
        let entry_size = u64::from(header.entry_size());
        let mut ivars = Vec::new();
        for i in 0..u64::from(header.count) {
            let entry_vaddr = list_vaddr + ListHeader::SIZE + i * entry_size;
            let Some(mut cur) = self.cursor_at(entry_vaddr) else {
                break;
            };
            let Ok(rec) = IvarRecord::read(&mut cur, is_64_bit) else {
                break;
            };
            let Some(name) = self.string_at_pointer(rec.name) else {
                Stats::bump(&self.stats.unreadable_strings);
                continue;
            };
            let type_encoding = self.string_at_pointer(rec.type_).unwrap_or_default();

            // `offset_ptr` points at the 32-bit slot holding the offset.
            let offset = match self.decoder.decode(rec.offset_ptr) {
                Pointer::Address(slot) if slot != 0 => self.read_ivar_offset(slot),
                _ => 0,
            };

            let swift_type = if swift_owner {
                self.swift_index
                    .as_ref()
                    .and_then(|index| index.resolve_ivar_type(class_name, &name))
                    .filter(|resolved| !resolved.is_empty())
            } else {
                None
            };

            ivars.push(Ivar {
                name,
                type_encoding,
                swift_type,
                offset,
                size: rec.size,
                alignment: rec.alignment,
            });
        }
        ivars
    }

    fn read_ivar_offset(&self, slot_vaddr: u64) -> u32 {
        let Some(mut cur) = self.cursor_at(slot_vaddr) else {
            return 0;
        };
        cur.read_ptr(self.file.is_64_bit).unwrap_or(0) as u32
    }

    fn load_properties(&self, raw: u64) -> Vec<Property> {
        let is_64_bit = self.file.is_64_bit;
        let list_vaddr = self.decoder.decode(raw).address();
        if list_vaddr == 0 {
            return Vec::new();
        }
        let header = match self.read_list_header(list_vaddr, "property list") {
            Ok(header) => header,
            Err(err) => {
                warn!("skipping property list at {:#x}: {}", list_vaddr, err);
                return Vec::new();
            }
        };

        let entry_size = u64::from(header.entry_size());
        let mut properties = Vec::new();
        for i in 0..u64::from(header.count) {
            let entry_vaddr = list_vaddr + ListHeader::SIZE + i * entry_size;
            let Some(mut cur) = self.cursor_at(entry_vaddr) else {
                break;
            };
            let Ok(rec) = PropertyRecord::read(&mut cur, is_64_bit) else {
                break;
            };
            let Some(name) = self.string_at_pointer(rec.name) else {
                Stats::bump(&self.stats.unreadable_strings);
                continue;
            };
            properties.push(Property {
                name,
                attributes: self.string_at_pointer(rec.attributes).unwrap_or_default(),
            });
        }
        properties
    }

    /// Adopted-protocol list: a pointer-sized count, then that many
    /// protocol pointers. Zero entries and external binds are dropped.
    fn load_protocol_refs(&self, raw: u64) -> Vec<ProtocolId> {
        let is_64_bit = self.file.is_64_bit;
        let list_vaddr = self.decoder.decode(raw).address();
        if list_vaddr == 0 {
            return Vec::new();
        }
        let Some(mut cur) = self.cursor_at(list_vaddr) else {
            return Vec::new();
        };
        let Ok(count) = cur.read_ptr(is_64_bit) else {
            return Vec::new();
        };
        let span = count.saturating_mul(self.file.pointer_size());
        if cur.tell() as u64 + span > self.file.data.len() as u64 {
            warn!("protocol list at {:#x} overruns the image", list_vaddr);
            return Vec::new();
        }

        let mut adopted = Vec::new();
        for _ in 0..count {
            let Ok(word) = cur.read_ptr(is_64_bit) else {
                break;
            };
            let addr = self.decoder.decode(word).address();
            if addr == 0 {
                continue;
            }
            if let Some(id) = self.load_protocol_at(addr) {
                adopted.push(id);
            }
        }
        adopted
    }

    fn swift_conformances(&self, class_name: &str) -> Vec<String> {
        let Some(swift) = &self.file.swift else {
            return Vec::new();
        };
        let mut keys = vec![class_name.to_string()];
        let demangled = self.demangler.demangle(class_name);
        if demangled != class_name {
            keys.push(demangled);
        }
        if let Some((module, name)) = self.demangler.demangle_class_name(class_name) {
            keys.push(format!("{}.{}", module, name));
            keys.push(name);
        }
        swift
            .conformances_for(keys.iter().map(|key| key.as_str()))
            .map(|conformances| conformances.to_vec())
            .unwrap_or_default()
    }
}

fn build_registries(
    protocols: &[Protocol],
    classes: &[Class],
    categories: &[Category],
) -> (StructureRegistry, MethodSignatureRegistry) {
    let mut structures = StructureRegistry::default();
    let mut signatures = MethodSignatureRegistry::default();

    let mut observe_methods = |methods: &[Method]| {
        for method in methods {
            signatures.observe(&method.type_encoding);
            structures.observe(&method.type_encoding);
        }
    };

    for proto in protocols {
        observe_methods(&proto.required_instance_methods);
        observe_methods(&proto.required_class_methods);
        observe_methods(&proto.optional_instance_methods);
        observe_methods(&proto.optional_class_methods);
    }
    for class in classes {
        observe_methods(&class.instance_methods);
        observe_methods(&class.class_methods);
    }
    for category in categories {
        observe_methods(&category.instance_methods);
        observe_methods(&category.class_methods);
    }

    for proto in protocols {
        for prop in &proto.properties {
            structures.observe(prop.type_encoding());
        }
    }
    for class in classes {
        for ivar in &class.ivars {
            structures.observe(&ivar.type_encoding);
        }
        for prop in &class.properties {
            structures.observe(prop.type_encoding());
        }
    }
    for category in categories {
        for prop in &category.properties {
            structures.observe(prop.type_encoding());
        }
    }

    (structures, signatures)
}
