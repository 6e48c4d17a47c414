use std::cmp::Ordering;

use regex::Regex;

use crate::metadata::{Category, Class, ImageInfo, Ivar, Metadata, Method, Property, Protocol};

/// Run-level facts handed to the processor hooks.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorInfo<'a> {
    pub image_info: Option<&'a ImageInfo>,
    pub protocol_count: usize,
    pub class_count: usize,
    pub category_count: usize,
}

/// A sink over the materialized graph. The traversal driver owns the
/// walk order; implementations override whichever hooks they care about
/// and emit output from them.
#[allow(unused_variables)]
pub trait Visitor {
    fn will_begin(&mut self) {}
    fn did_end(&mut self) {}

    fn will_visit_processor(&mut self, info: &ProcessorInfo) {}
    fn visit_processor(&mut self, info: &ProcessorInfo) {}
    fn did_visit_processor(&mut self, info: &ProcessorInfo) {}

    fn will_visit_protocol(&mut self, proto: &Protocol) {}
    fn did_visit_protocol(&mut self, proto: &Protocol) {}
    fn will_visit_class(&mut self, class: &Class) {}
    fn did_visit_class(&mut self, class: &Class) {}
    fn will_visit_category(&mut self, category: &Category) {}
    fn did_visit_category(&mut self, category: &Category) {}

    fn visit_class_method(&mut self, method: &Method) {}
    fn visit_instance_method(&mut self, method: &Method, properties: &mut PropertyState) {}
    fn visit_ivar(&mut self, ivar: &Ivar) {}
    fn visit_property(&mut self, property: &Property) {}
    fn visit_remaining_properties(&mut self, properties: &mut PropertyState) {}

    fn will_visit_optional_methods(&mut self) {}
    fn did_visit_optional_methods(&mut self) {}
    fn will_visit_ivars_of_class(&mut self, class: &Class) {}
    fn did_visit_ivars_of_class(&mut self, class: &Class) {}
    fn will_visit_properties_of_class(&mut self, class: &Class) {}
    fn did_visit_properties_of_class(&mut self, class: &Class) {}
    fn will_visit_properties_of_protocol(&mut self, proto: &Protocol) {}
    fn did_visit_properties_of_protocol(&mut self, proto: &Protocol) {}
    fn will_visit_properties_of_category(&mut self, category: &Category) {}
    fn did_visit_properties_of_category(&mut self, category: &Category) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    /// Completion order, exactly as `process()` left it.
    #[default]
    None,
    Name,
    /// Superclass-chain depth within this image, ties broken by name.
    InheritanceDepth,
}

#[derive(Debug, Default)]
pub struct TraversalOptions {
    pub sort: SortBy,
    /// Entities whose name does not match are skipped before their
    /// `will_visit_*` hook.
    pub filter: Option<Regex>,
    pub hide_protocols: bool,
}

impl TraversalOptions {
    fn admits(&self, name: &str) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |filter| filter.is_match(name))
    }

    fn sorts(&self) -> bool {
        self.sort != SortBy::None
    }
}

/// Tracks which properties of the current container have already been
/// spoken for. An instance method matching a property's getter or setter
/// is suppressed, since the property declaration supplants it.
pub struct PropertyState<'a> {
    properties: Vec<&'a Property>,
    used: Vec<bool>,
}

impl<'a> PropertyState<'a> {
    pub fn new(properties: &'a [Property]) -> Self {
        PropertyState {
            properties: properties.iter().collect(),
            used: vec![false; properties.len()],
        }
    }

    pub fn property_for_accessor(&self, selector: &str) -> Option<&'a Property> {
        self.properties
            .iter()
            .find(|prop| {
                prop.getter() == selector || prop.setter().as_deref() == Some(selector)
            })
            .copied()
    }

    pub fn mark_used(&mut self, property: &Property) {
        if let Some(index) = self
            .properties
            .iter()
            .position(|prop| prop.name == property.name)
        {
            self.used[index] = true;
        }
    }

    /// The properties no accessor referenced, sorted by name.
    pub fn remaining_properties(&self) -> Vec<&'a Property> {
        let mut remaining: Vec<&Property> = self
            .properties
            .iter()
            .zip(&self.used)
            .filter(|(_, used)| !**used)
            .map(|(prop, _)| *prop)
            .collect();
        remaining.sort_by(|a, b| compare_names(&a.name, &b.name));
        remaining
    }
}

/// Walks the metadata once, in the fixed order: processor info, then
/// protocols, classes and categories, each container's members in
/// declaration groups.
pub fn traverse<V: Visitor + ?Sized>(
    metadata: &Metadata,
    visitor: &mut V,
    options: &TraversalOptions,
) {
    visitor.will_begin();

    let info = ProcessorInfo {
        image_info: metadata.image_info.as_ref(),
        protocol_count: metadata.protocols().count(),
        class_count: metadata.classes().count(),
        category_count: metadata.categories.len(),
    };
    visitor.will_visit_processor(&info);
    visitor.visit_processor(&info);
    visitor.did_visit_processor(&info);

    if !options.hide_protocols {
        let mut protocols: Vec<&Protocol> = metadata
            .protocols()
            .map(|(_, proto)| proto)
            .filter(|proto| options.admits(&proto.name))
            .collect();
        if options.sorts() {
            protocols.sort_by(|a, b| compare_names(&a.name, &b.name));
        }
        for proto in protocols {
            visit_protocol(proto, visitor, options);
        }
    }

    let mut classes: Vec<_> = metadata
        .classes()
        .filter(|(_, class)| options.admits(&class.name))
        .collect();
    match options.sort {
        SortBy::None => {}
        SortBy::Name => classes.sort_by(|(_, a), (_, b)| compare_names(&a.name, &b.name)),
        SortBy::InheritanceDepth => classes.sort_by(|(a_id, a), (b_id, b)| {
            metadata
                .inheritance_depth(*a_id)
                .cmp(&metadata.inheritance_depth(*b_id))
                .then_with(|| compare_names(&a.name, &b.name))
        }),
    }
    for (_, class) in classes {
        visit_class(class, visitor, options);
    }

    let mut categories: Vec<&Category> = metadata
        .categories
        .iter()
        .filter(|category| options.admits(&category.name))
        .collect();
    if options.sorts() {
        categories.sort_by(|a, b| compare_names(&a.name, &b.name));
    }
    for category in categories {
        visit_category(category, visitor, options);
    }

    visitor.did_end();
}

fn visit_protocol<V: Visitor + ?Sized>(proto: &Protocol, visitor: &mut V, options: &TraversalOptions) {
    visitor.will_visit_protocol(proto);

    visitor.will_visit_properties_of_protocol(proto);
    for property in &proto.properties {
        visitor.visit_property(property);
    }
    visitor.did_visit_properties_of_protocol(proto);

    let mut state = PropertyState::new(&proto.properties);
    for method in method_order(&proto.required_class_methods, options) {
        visitor.visit_class_method(method);
    }
    for method in method_order(&proto.required_instance_methods, options) {
        deliver_instance_method(method, &mut state, visitor);
    }

    if proto.has_optional_methods() {
        visitor.will_visit_optional_methods();
        for method in method_order(&proto.optional_class_methods, options) {
            visitor.visit_class_method(method);
        }
        for method in method_order(&proto.optional_instance_methods, options) {
            deliver_instance_method(method, &mut state, visitor);
        }
        visitor.did_visit_optional_methods();
    }

    visitor.visit_remaining_properties(&mut state);
    visitor.did_visit_protocol(proto);
}

fn visit_class<V: Visitor + ?Sized>(class: &Class, visitor: &mut V, options: &TraversalOptions) {
    visitor.will_visit_class(class);

    if !class.ivars.is_empty() {
        visitor.will_visit_ivars_of_class(class);
        for ivar in &class.ivars {
            visitor.visit_ivar(ivar);
        }
        visitor.did_visit_ivars_of_class(class);
    }

    visitor.will_visit_properties_of_class(class);
    for property in &class.properties {
        visitor.visit_property(property);
    }
    visitor.did_visit_properties_of_class(class);

    let mut state = PropertyState::new(&class.properties);
    for method in method_order(&class.class_methods, options) {
        visitor.visit_class_method(method);
    }
    for method in method_order(&class.instance_methods, options) {
        deliver_instance_method(method, &mut state, visitor);
    }

    visitor.visit_remaining_properties(&mut state);
    visitor.did_visit_class(class);
}

fn visit_category<V: Visitor + ?Sized>(
    category: &Category,
    visitor: &mut V,
    options: &TraversalOptions,
) {
    visitor.will_visit_category(category);

    visitor.will_visit_properties_of_category(category);
    for property in &category.properties {
        visitor.visit_property(property);
    }
    visitor.did_visit_properties_of_category(category);

    let mut state = PropertyState::new(&category.properties);
    for method in method_order(&category.class_methods, options) {
        visitor.visit_class_method(method);
    }
    for method in method_order(&category.instance_methods, options) {
        deliver_instance_method(method, &mut state, visitor);
    }

    visitor.visit_remaining_properties(&mut state);
    visitor.did_visit_category(category);
}

fn deliver_instance_method<V: Visitor + ?Sized>(
    method: &Method,
    state: &mut PropertyState,
    visitor: &mut V,
) {
    // Property accessors never reach the visitor; the property
    // declaration already covers them.
    match state.property_for_accessor(&method.selector) {
        Some(property) => state.mark_used(property),
        None => visitor.visit_instance_method(method, state),
    }
}

fn method_order<'m>(methods: &'m [Method], options: &TraversalOptions) -> Vec<&'m Method> {
    let mut ordered: Vec<&Method> = methods.iter().collect();
    if options.sorts() {
        ordered.sort_by(|a, b| compare_names(&a.selector, &b.selector));
    }
    ordered
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Method, Property};

    fn method(selector: &str) -> Method {
        Method {
            selector: selector.to_string(),
            type_encoding: "v16@0:8".to_string(),
            implementation_address: 0,
        }
    }

    fn property(name: &str, attributes: &str) -> Property {
        Property {
            name: name.to_string(),
            attributes: attributes.to_string(),
        }
    }

    #[test]
    fn accessor_lookup_covers_getter_and_setter() {
        let properties = vec![property("name", "T@\"NSString\",&,N,V_name")];
        let state = PropertyState::new(&properties);
        assert!(state.property_for_accessor("name").is_some());
        assert!(state.property_for_accessor("setName:").is_some());
        assert!(state.property_for_accessor("setname:").is_none());
        assert!(state.property_for_accessor("length").is_none());
    }

    #[test]
    fn remaining_properties_exclude_used_and_sort() {
        let properties = vec![
            property("zeta", "Ti,N,V_zeta"),
            property("Alpha", "Ti,N,V_Alpha"),
            property("mid", "Ti,N,V_mid"),
        ];
        let mut state = PropertyState::new(&properties);
        let used = state.property_for_accessor("mid").unwrap().clone();
        state.mark_used(&used);
        let names: Vec<&str> = state
            .remaining_properties()
            .iter()
            .map(|prop| prop.name.as_str())
            .collect();
        assert_eq!(names, vec!["Alpha", "zeta"]);
    }

    #[test]
    fn suppressed_accessors_never_reach_the_visitor() {
        struct Recorder {
            instance_methods: Vec<String>,
            remaining: Vec<String>,
        }
        impl Visitor for Recorder {
            fn visit_instance_method(&mut self, method: &Method, _state: &mut PropertyState) {
                self.instance_methods.push(method.selector.clone());
            }
            fn visit_remaining_properties(&mut self, state: &mut PropertyState) {
                self.remaining = state
                    .remaining_properties()
                    .iter()
                    .map(|prop| prop.name.clone())
                    .collect();
            }
        }

        let properties = vec![property("name", "T@\"NSString\",&,N,V_name")];
        let mut state = PropertyState::new(&properties);
        let mut recorder = Recorder {
            instance_methods: Vec::new(),
            remaining: Vec::new(),
        };
        for m in [method("name"), method("setName:"), method("length")] {
            deliver_instance_method(&m, &mut state, &mut recorder);
        }
        recorder.visit_remaining_properties(&mut state);

        assert_eq!(recorder.instance_methods, vec!["length"]);
        assert!(recorder.remaining.is_empty());
    }

    #[test]
    fn name_comparison_is_case_insensitive_and_total() {
        assert_eq!(compare_names("alpha", "Beta"), Ordering::Less);
        assert_eq!(compare_names("Gamma", "gamma"), Ordering::Less);
        assert_eq!(compare_names("same", "same"), Ordering::Equal);
    }
}
