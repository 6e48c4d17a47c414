use std::collections::HashMap;

/// The Swift demangler this crate consumes. Implementations usually wrap
/// a real demangler library; every method is total and returns its input
/// (or nothing) when it cannot do better.
pub trait Demangler: Send + Sync {
    fn demangle(&self, mangled: &str) -> String;

    /// `(module, name)` for a simple `_TtC`/`_TtGC` class mangling.
    fn demangle_class_name(&self, mangled: &str) -> Option<(String, String)>;

    /// The nested-name chain for `_TtCC`/`_TtCCC` manglings, outermost
    /// first. Empty when the input is not a nested class name.
    fn demangle_nested_class_name(&self, mangled: &str) -> Vec<String>;

    fn extract_type_name(&self, mangled: &str) -> String;

    /// Demangles a mangled-name blob that may carry embedded symbolic
    /// references. The default cannot resolve those and yields nothing.
    fn demangle_symbolic(&self, _data: &[u8]) -> String {
        String::new()
    }
}

/// Demangler for consumers without a Swift toolchain: names pass through
/// untouched.
#[derive(Debug, Default)]
pub struct IdentityDemangler;

impl Demangler for IdentityDemangler {
    fn demangle(&self, mangled: &str) -> String {
        mangled.to_string()
    }

    fn demangle_class_name(&self, _mangled: &str) -> Option<(String, String)> {
        None
    }

    fn demangle_nested_class_name(&self, _mangled: &str) -> Vec<String> {
        Vec::new()
    }

    fn extract_type_name(&self, mangled: &str) -> String {
        mangled.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct FieldRecord {
    pub name: String,
    pub mangled_type_name: String,
    /// The raw mangled-name bytes, which may embed symbolic references
    /// the plain string form has lost.
    pub mangled_type_data: Vec<u8>,
    pub source_offset: u64,
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub address: u64,
    pub mangled_type_name: String,
    pub records: Vec<FieldRecord>,
}

#[derive(Debug, Clone)]
pub struct SwiftType {
    pub address: u64,
    pub name: String,
    pub full_name: String,
}

/// Swift reflection metadata extracted upstream: field descriptors, the
/// type list they join against, and protocol conformances keyed by type
/// name.
#[derive(Debug, Clone, Default)]
pub struct SwiftMetadata {
    pub field_descriptors: Vec<FieldDescriptor>,
    pub types: Vec<SwiftType>,
    pub conformances: HashMap<String, Vec<String>>,
}

impl SwiftMetadata {
    /// Conformances for any of the given name forms, first hit wins. The
    /// exact key the extractor used is not pinned down, so callers pass
    /// the mangled, demangled and module-qualified spellings.
    pub fn conformances_for<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a str>,
    ) -> Option<&[String]> {
        keys.into_iter()
            .find_map(|key| self.conformances.get(key))
            .map(|list| list.as_slice())
    }
}

/// Multi-variant name index over the field descriptors, answering "what
/// is the Swift type of this ivar of this class".
///
/// Built in one pass; read-only afterwards, so lookups are safe from any
/// number of tasks at once.
pub struct SwiftFieldIndex<'a> {
    by_mangled_name: HashMap<&'a str, &'a FieldDescriptor>,
    by_variant: HashMap<String, &'a FieldDescriptor>,
    demangled_cache: HashMap<&'a str, String>,
    demangler: &'a dyn Demangler,
}

impl<'a> SwiftFieldIndex<'a> {
    pub fn new(metadata: &'a SwiftMetadata, demangler: &'a dyn Demangler) -> Self {
        let types_by_address: HashMap<u64, &SwiftType> = metadata
            .types
            .iter()
            .map(|ty| (ty.address, ty))
            .collect();

        let mut by_mangled_name = HashMap::new();
        let mut by_variant: HashMap<String, &FieldDescriptor> = HashMap::new();
        let mut demangled_cache = HashMap::new();

        for descriptor in &metadata.field_descriptors {
            by_mangled_name.insert(descriptor.mangled_type_name.as_str(), descriptor);

            let mut variants: Vec<String> = Vec::new();
            match types_by_address.get(&descriptor.address) {
                Some(ty) => {
                    variants.push(ty.name.clone());
                    variants.push(ty.full_name.clone());
                    demangled_cache.insert(descriptor.mangled_type_name.as_str(), ty.name.clone());
                }
                None => {
                    demangled_cache.insert(
                        descriptor.mangled_type_name.as_str(),
                        demangler.extract_type_name(&descriptor.mangled_type_name),
                    );
                }
            }
            let demangled = demangler.demangle(&descriptor.mangled_type_name);
            if !demangled.is_empty() {
                variants.push(demangled);
            }

            // Later descriptors overwrite earlier ones for the same
            // variant; the last binding wins.
            for variant in variants {
                for suffix in dotted_suffixes(&variant) {
                    by_variant.insert(suffix.to_string(), descriptor);
                }
                by_variant.insert(variant, descriptor);
            }
        }

        SwiftFieldIndex {
            by_mangled_name,
            by_variant,
            demangled_cache,
            demangler,
        }
    }

    /// The Swift-side type of `ivar_name` on the class named
    /// `class_name` (an ObjC-Swift mangled name, usually `_TtC…`).
    pub fn resolve_ivar_type(&self, class_name: &str, ivar_name: &str) -> Option<String> {
        let candidates = self.class_name_candidates(class_name);

        for candidate in &candidates {
            if let Some(descriptor) = self.by_variant.get(candidate.as_str()) {
                if let Some(resolved) = self.resolve_in_descriptor(descriptor, ivar_name) {
                    return Some(resolved);
                }
            }
        }

        // Slow path: nothing bound under any candidate variant; match
        // descriptors by their own demangled names instead.
        for (mangled, descriptor) in &self.by_mangled_name {
            let simple = self.demangled_cache.get(mangled);
            let matches = candidates.iter().any(|candidate| {
                simple.is_some_and(|name| name == candidate)
                    || **mangled == **candidate
            });
            if matches {
                if let Some(resolved) = self.resolve_in_descriptor(descriptor, ivar_name) {
                    return Some(resolved);
                }
            }
        }

        None
    }

    fn class_name_candidates(&self, class_name: &str) -> Vec<String> {
        let mut candidates = Vec::new();
        if class_name.starts_with("_TtCC") {
            let nested = self.demangler.demangle_nested_class_name(class_name);
            if let Some(innermost) = nested.last() {
                candidates.push(innermost.clone());
            }
            if nested.len() > 1 {
                candidates.push(nested.join("."));
            }
        } else if class_name.starts_with("_TtC") || class_name.starts_with("_TtGC") {
            if let Some((module, name)) = self.demangler.demangle_class_name(class_name) {
                candidates.push(name.clone());
                candidates.push(format!("{}.{}", module, name));
            }
        }
        if candidates.is_empty() {
            candidates.push(class_name.to_string());
        }
        candidates
    }

    fn resolve_in_descriptor(
        &self,
        descriptor: &FieldDescriptor,
        ivar_name: &str,
    ) -> Option<String> {
        let record = descriptor
            .records
            .iter()
            .find(|record| field_names_match(&record.name, ivar_name))?;

        // The symbolic form can resolve embedded references the plain
        // string cannot; prefer it when it produced a real name.
        if !record.mangled_type_data.is_empty() {
            let symbolic = self.demangler.demangle_symbolic(&record.mangled_type_data);
            if !symbolic.is_empty()
                && !symbolic.starts_with("/*")
                && symbolic != record.mangled_type_name
            {
                return Some(symbolic);
            }
        }

        let demangled = self.demangler.demangle(&record.mangled_type_name);
        if demangled.is_empty() {
            None
        } else {
            Some(demangled)
        }
    }
}

fn canonical_field_name(name: &str) -> &str {
    let name = name.strip_prefix("$__lazy_storage_$_").unwrap_or(name);
    name.strip_prefix("_$s").unwrap_or(name)
}

fn field_names_match(record_name: &str, ivar_name: &str) -> bool {
    let record = canonical_field_name(record_name);
    let ivar = canonical_field_name(ivar_name);
    if record == ivar {
        return true;
    }
    // One side may carry a storage-name sigil the other lost.
    record.trim_start_matches(['_', '$']) == ivar.trim_start_matches(['_', '$'])
}

/// `A.B.C` → `B.C`, `C`.
fn dotted_suffixes(name: &str) -> Vec<&str> {
    let mut suffixes = Vec::new();
    let mut rest = name;
    while let Some(dot) = rest.find('.') {
        rest = &rest[dot + 1..];
        if !rest.is_empty() {
            suffixes.push(rest);
        }
    }
    suffixes
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Canned demangler for the fixtures, standing in for a real Swift
    /// demangler.
    pub(crate) struct FixtureDemangler;

    impl Demangler for FixtureDemangler {
        fn demangle(&self, mangled: &str) -> String {
            match mangled {
                "Si" => "Swift.Int".to_string(),
                "SS" => "Swift.String".to_string(),
                "6Module5ThingC" => "Module.Thing".to_string(),
                other => other.to_string(),
            }
        }

        fn demangle_class_name(&self, mangled: &str) -> Option<(String, String)> {
            match mangled {
                "_TtC6Module5Thing" => Some(("Module".to_string(), "Thing".to_string())),
                _ => None,
            }
        }

        fn demangle_nested_class_name(&self, mangled: &str) -> Vec<String> {
            match mangled {
                "_TtCC6Module5Outer5Inner" => vec![
                    "Module".to_string(),
                    "Outer".to_string(),
                    "Inner".to_string(),
                ],
                _ => Vec::new(),
            }
        }

        fn extract_type_name(&self, mangled: &str) -> String {
            self.demangle(mangled)
                .rsplit('.')
                .next()
                .unwrap_or(mangled)
                .to_string()
        }
    }

    fn thing_metadata() -> SwiftMetadata {
        SwiftMetadata {
            field_descriptors: vec![FieldDescriptor {
                address: 0x100,
                mangled_type_name: "6Module5ThingC".to_string(),
                records: vec![
                    FieldRecord {
                        name: "value".to_string(),
                        mangled_type_name: "Si".to_string(),
                        mangled_type_data: Vec::new(),
                        source_offset: 0,
                    },
                    FieldRecord {
                        name: "$__lazy_storage_$_label".to_string(),
                        mangled_type_name: "SS".to_string(),
                        mangled_type_data: Vec::new(),
                        source_offset: 4,
                    },
                ],
            }],
            types: vec![SwiftType {
                address: 0x100,
                name: "Thing".to_string(),
                full_name: "Module.Thing".to_string(),
            }],
            conformances: HashMap::new(),
        }
    }

    #[test]
    fn resolves_through_mangled_class_name() {
        let metadata = thing_metadata();
        let demangler = FixtureDemangler;
        let index = SwiftFieldIndex::new(&metadata, &demangler);
        assert_eq!(
            index.resolve_ivar_type("_TtC6Module5Thing", "value"),
            Some("Swift.Int".to_string())
        );
    }

    #[test]
    fn resolves_lazy_storage_fields() {
        let metadata = thing_metadata();
        let demangler = FixtureDemangler;
        let index = SwiftFieldIndex::new(&metadata, &demangler);
        assert_eq!(
            index.resolve_ivar_type("_TtC6Module5Thing", "label"),
            Some("Swift.String".to_string())
        );
    }

    #[test]
    fn unknown_classes_and_fields_resolve_to_none() {
        let metadata = thing_metadata();
        let demangler = FixtureDemangler;
        let index = SwiftFieldIndex::new(&metadata, &demangler);
        assert_eq!(index.resolve_ivar_type("_TtC6Module5Other", "value"), None);
        assert_eq!(index.resolve_ivar_type("_TtC6Module5Thing", "missing"), None);
    }

    #[test]
    fn variant_bindings_prefer_the_last_descriptor() {
        let mut metadata = thing_metadata();
        metadata.field_descriptors.push(FieldDescriptor {
            address: 0x200,
            mangled_type_name: "shadow".to_string(),
            records: vec![FieldRecord {
                name: "value".to_string(),
                mangled_type_name: "SS".to_string(),
                mangled_type_data: Vec::new(),
                source_offset: 0,
            }],
        });
        metadata.types.push(SwiftType {
            address: 0x200,
            name: "Thing".to_string(),
            full_name: "Other.Thing".to_string(),
        });
        let demangler = FixtureDemangler;
        let index = SwiftFieldIndex::new(&metadata, &demangler);
        // Bare "Thing" now binds to the later descriptor; the qualified
        // name still reaches the first one.
        assert_eq!(
            index.resolve_ivar_type("Thing", "value"),
            Some("Swift.String".to_string())
        );
        assert_eq!(
            index.resolve_ivar_type("Module.Thing", "value"),
            Some("Swift.Int".to_string())
        );
    }

    #[test]
    fn dotted_suffixes_walk_inward() {
        assert_eq!(dotted_suffixes("A.B.C"), vec!["B.C", "C"]);
        assert!(dotted_suffixes("Plain").is_empty());
    }

    #[test]
    fn conformances_try_every_key_form() {
        let mut metadata = thing_metadata();
        metadata.conformances.insert(
            "Module.Thing".to_string(),
            vec!["Hashable".to_string()],
        );
        let found = metadata
            .conformances_for(["_TtC6Module5Thing", "Thing", "Module.Thing"])
            .unwrap();
        assert_eq!(found, ["Hashable".to_string()]);
        assert!(metadata.conformances_for(["Nope"]).is_none());
    }
}
