use std::collections::HashMap;

use bitflags::bitflags;
use indexmap::IndexSet;

use crate::arena::{ClassId, ProtocolId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ImageInfoFlags: u32 {
        const IS_REPLACEMENT = 1 << 0;
        const SUPPORTS_GC = 1 << 1;
        const REQUIRES_GC = 1 << 2;
        const OPTIMIZED_BY_DYLD = 1 << 3;
        const CORRECTED_SYNTHESIZE = 1 << 4;
        const IS_SIMULATED = 1 << 5;
        const HAS_CATEGORY_CLASS_PROPERTIES = 1 << 6;
        const OPTIMIZED_BY_DYLD_CLOSURE = 1 << 7;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub version: u32,
    pub flags: u32,
}

impl ImageInfo {
    pub const SWIFT_VERSION_MASK: u32 = 0xff << 8;

    pub fn swift_version(&self) -> u32 {
        (self.flags & Self::SWIFT_VERSION_MASK) >> 8
    }

    pub fn flag_bits(&self) -> ImageInfoFlags {
        ImageInfoFlags::from_bits_truncate(self.flags)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub selector: String,
    pub type_encoding: String,
    /// Raw `imp` word as it sits in the file, never run through the
    /// pointer decoder, so tools can print what the binary says.
    pub implementation_address: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ivar {
    pub name: String,
    pub type_encoding: String,
    /// Resolved Swift type for ivars of Swift classes, when the field
    /// descriptor index could supply one.
    pub swift_type: Option<String>,
    pub offset: u32,
    pub size: u32,
    pub alignment: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    /// Raw attribute encoding (`T…,&,N,V_backing`), passed through for
    /// consumers to parse.
    pub attributes: String,
}

impl Property {
    fn attribute(&self, key: char) -> Option<&str> {
        self.attributes
            .split(',')
            .find_map(|attr| attr.strip_prefix(key))
    }

    /// The declared type encoding, i.e. the payload of the `T` attribute.
    pub fn type_encoding(&self) -> &str {
        self.attribute('T').unwrap_or("")
    }

    pub fn is_readonly(&self) -> bool {
        self.attributes.split(',').any(|attr| attr == "R")
    }

    /// The getter selector: the `G` attribute when present, else the
    /// property name.
    pub fn getter(&self) -> &str {
        match self.attribute('G') {
            Some(getter) if !getter.is_empty() => getter,
            _ => &self.name,
        }
    }

    /// The setter selector, `None` for readonly properties.
    pub fn setter(&self) -> Option<String> {
        if self.is_readonly() {
            return None;
        }
        match self.attribute('S') {
            Some(setter) if !setter.is_empty() => Some(setter.to_string()),
            _ => {
                let mut chars = self.name.chars();
                let head = chars.next()?;
                Some(format!(
                    "set{}{}:",
                    head.to_uppercase(),
                    chars.as_str()
                ))
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Protocol {
    pub name: String,
    pub address: u64,
    pub adopted: Vec<ProtocolId>,
    pub required_instance_methods: Vec<Method>,
    pub required_class_methods: Vec<Method>,
    pub optional_instance_methods: Vec<Method>,
    pub optional_class_methods: Vec<Method>,
    pub properties: Vec<Property>,
}

impl Protocol {
    pub fn has_optional_methods(&self) -> bool {
        !self.optional_instance_methods.is_empty() || !self.optional_class_methods.is_empty()
    }
}

/// A reference to another class, either inside this image (`class` holds
/// its id) or bound in from another one (`class` is `None` and the name
/// is all there is; such references print with address 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRef {
    pub name: String,
    pub class: Option<ClassId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Class {
    pub name: String,
    pub address: u64,
    pub superclass: Option<ClassRef>,
    pub is_swift: bool,
    pub is_exported: bool,
    pub class_data_address: u64,
    pub metaclass_address: u64,
    pub adopted: Vec<ProtocolId>,
    pub swift_conformances: Vec<String>,
    pub ivars: Vec<Ivar>,
    pub instance_methods: Vec<Method>,
    pub class_methods: Vec<Method>,
    pub properties: Vec<Property>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub name: String,
    pub address: u64,
    pub class: Option<ClassRef>,
    pub adopted: Vec<ProtocolId>,
    pub instance_methods: Vec<Method>,
    pub class_methods: Vec<Method>,
    pub properties: Vec<Property>,
}

/// Distinct type encodings that mention a struct or union, in the order
/// they were first observed. Downstream formatters parse them; this crate
/// only collects.
#[derive(Debug, Default)]
pub struct StructureRegistry {
    encodings: IndexSet<String>,
}

impl StructureRegistry {
    pub fn observe(&mut self, encoding: &str) {
        if encoding.contains('{') || encoding.contains('(') {
            self.encodings.insert(encoding.to_string());
        }
    }

    pub fn encodings(&self) -> impl Iterator<Item = &str> {
        self.encodings.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.encodings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encodings.is_empty()
    }
}

/// Every distinct method type encoding observed, in first-observation
/// order.
#[derive(Debug, Default)]
pub struct MethodSignatureRegistry {
    signatures: IndexSet<String>,
}

impl MethodSignatureRegistry {
    pub fn observe(&mut self, encoding: &str) {
        if !encoding.is_empty() {
            self.signatures.insert(encoding.to_string());
        }
    }

    pub fn signatures(&self) -> impl Iterator<Item = &str> {
        self.signatures.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

/// Informational counters for entities the processor had to drop.
/// Not part of the success/failure contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStats {
    pub dropped_protocols: u32,
    pub dropped_classes: u32,
    pub dropped_categories: u32,
    pub unreadable_strings: u32,
    pub odd_high8_fixups: u32,
}

/// Everything `process()` reconstructed from one image. Immutable; any
/// number of visitors may walk it.
#[derive(Debug)]
pub struct Metadata {
    pub image_info: Option<ImageInfo>,
    pub categories: Vec<Category>,
    pub structures: StructureRegistry,
    pub method_signatures: MethodSignatureRegistry,
    pub stats: ProcessStats,
    protocols: Vec<Protocol>,
    classes: Vec<Class>,
    protocols_by_address: HashMap<u64, ProtocolId>,
    classes_by_address: HashMap<u64, ClassId>,
}

impl Metadata {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        image_info: Option<ImageInfo>,
        protocols: Vec<Protocol>,
        classes: Vec<Class>,
        protocols_by_address: HashMap<u64, ProtocolId>,
        classes_by_address: HashMap<u64, ClassId>,
        categories: Vec<Category>,
        structures: StructureRegistry,
        method_signatures: MethodSignatureRegistry,
        stats: ProcessStats,
    ) -> Self {
        Metadata {
            image_info,
            categories,
            structures,
            method_signatures,
            stats,
            protocols,
            classes,
            protocols_by_address,
            classes_by_address,
        }
    }

    pub fn protocol(&self, id: ProtocolId) -> &Protocol {
        &self.protocols[id.index()]
    }

    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.index()]
    }

    pub fn protocols(&self) -> impl Iterator<Item = (ProtocolId, &Protocol)> {
        self.protocols
            .iter()
            .enumerate()
            .map(|(i, proto)| (ProtocolId::from_index(i), proto))
    }

    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &Class)> {
        self.classes
            .iter()
            .enumerate()
            .map(|(i, class)| (ClassId::from_index(i), class))
    }

    pub fn protocol_by_address(&self, address: u64) -> Option<ProtocolId> {
        self.protocols_by_address.get(&address).copied()
    }

    pub fn class_by_address(&self, address: u64) -> Option<ClassId> {
        self.classes_by_address.get(&address).copied()
    }

    /// Length of the superclass chain within this image. External
    /// superclasses contribute nothing.
    pub fn inheritance_depth(&self, id: ClassId) -> usize {
        let mut depth = 0;
        let mut current = id;
        while let Some(superclass) = self
            .class(current)
            .superclass
            .as_ref()
            .and_then(|super_ref| super_ref.class)
        {
            // A malformed superclass loop would otherwise spin forever.
            if depth > self.classes.len() {
                break;
            }
            depth += 1;
            current = superclass;
        }
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn property(name: &str, attributes: &str) -> Property {
        Property {
            name: name.to_string(),
            attributes: attributes.to_string(),
        }
    }

    #[test]
    fn property_accessors_default_to_name_forms() {
        let prop = property("name", "T@\"NSString\",&,N,V_name");
        assert_eq!(prop.getter(), "name");
        assert_eq!(prop.setter().as_deref(), Some("setName:"));
        assert_eq!(prop.type_encoding(), "@\"NSString\"");
    }

    #[test]
    fn property_accessors_honor_custom_and_readonly() {
        let custom = property("enabled", "Tc,GisEnabled,SsetOn:,N,V_enabled");
        assert_eq!(custom.getter(), "isEnabled");
        assert_eq!(custom.setter().as_deref(), Some("setOn:"));

        let readonly = property("count", "Tq,R,N,V_count");
        assert_eq!(readonly.getter(), "count");
        assert_eq!(readonly.setter(), None);
        assert!(readonly.is_readonly());
    }

    #[test]
    fn structure_registry_only_keeps_aggregates() {
        let mut registry = StructureRegistry::default();
        registry.observe("{CGRect=\"origin\"{CGPoint}}");
        registry.observe("v16@0:8");
        registry.observe("(union_u=i f)");
        registry.observe("{CGRect=\"origin\"{CGPoint}}");
        let collected: Vec<&str> = registry.encodings().collect();
        assert_eq!(
            collected,
            vec!["{CGRect=\"origin\"{CGPoint}}", "(union_u=i f)"]
        );
    }

    #[test]
    fn image_info_swift_version() {
        let info = ImageInfo {
            version: 0,
            flags: (5 << 8) | 0x40,
        };
        assert_eq!(info.swift_version(), 5);
        assert!(info
            .flag_bits()
            .contains(ImageInfoFlags::HAS_CATEGORY_CLASS_PROPERTIES));
    }
}
