use std::collections::HashMap;

use parking_lot::Mutex;

use crate::metadata::{Class, Protocol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

impl ProtocolId {
    pub(crate) fn from_index(index: usize) -> Self {
        ProtocolId(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl ClassId {
    pub(crate) fn from_index(index: usize) -> Self {
        ClassId(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Outcome of a reservation: either this caller owns the slot and must
/// fill it, or another loader got there first and the existing id is
/// returned as-is.
pub(crate) enum Reserve<I> {
    New(I),
    Existing(I),
}

#[derive(Default)]
struct ArenaInner {
    protocols: Vec<Protocol>,
    protocols_by_address: HashMap<u64, ProtocolId>,
    classes: Vec<Class>,
    classes_by_address: HashMap<u64, ClassId>,
}

/// Address-keyed arenas for the two entity kinds that can refer to each
/// other cyclically.
///
/// The load protocol is insert-before-fill: a loader reserves the slot
/// with just a name and address, loads the entity's children (possibly
/// recursing back into the arena and finding its own in-flight slot),
/// then fills the remaining fields. The lock is only ever held for the
/// reserve, fill and lookup themselves, never across child loads, and
/// the first reservation for an address wins.
#[derive(Default)]
pub(crate) struct EntityArena {
    inner: Mutex<ArenaInner>,
}

impl EntityArena {
    pub fn new() -> Self {
        EntityArena::default()
    }

    pub fn protocol_id(&self, address: u64) -> Option<ProtocolId> {
        self.inner.lock().protocols_by_address.get(&address).copied()
    }

    pub fn class_id(&self, address: u64) -> Option<ClassId> {
        self.inner.lock().classes_by_address.get(&address).copied()
    }

    pub fn class_name(&self, id: ClassId) -> String {
        self.inner.lock().classes[id.index()].name.clone()
    }

    pub fn reserve_protocol(&self, address: u64, name: &str) -> Reserve<ProtocolId> {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.protocols_by_address.get(&address) {
            return Reserve::Existing(*id);
        }
        let id = ProtocolId::from_index(inner.protocols.len());
        inner.protocols.push(Protocol {
            name: name.to_string(),
            address,
            ..Protocol::default()
        });
        inner.protocols_by_address.insert(address, id);
        Reserve::New(id)
    }

    pub fn fill_protocol(&self, id: ProtocolId, fill: impl FnOnce(&mut Protocol)) {
        let mut inner = self.inner.lock();
        fill(&mut inner.protocols[id.index()]);
    }

    pub fn reserve_class(&self, address: u64, name: &str) -> Reserve<ClassId> {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.classes_by_address.get(&address) {
            return Reserve::Existing(*id);
        }
        let id = ClassId::from_index(inner.classes.len());
        inner.classes.push(Class {
            name: name.to_string(),
            address,
            ..Class::default()
        });
        inner.classes_by_address.insert(address, id);
        Reserve::New(id)
    }

    pub fn fill_class(&self, id: ClassId, fill: impl FnOnce(&mut Class)) {
        let mut inner = self.inner.lock();
        fill(&mut inner.classes[id.index()]);
    }

    #[allow(clippy::type_complexity)]
    pub fn into_parts(
        self,
    ) -> (
        Vec<Protocol>,
        Vec<Class>,
        HashMap<u64, ProtocolId>,
        HashMap<u64, ClassId>,
    ) {
        let inner = self.inner.into_inner();
        (
            inner.protocols,
            inner.classes,
            inner.protocols_by_address,
            inner.classes_by_address,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reservation_wins() {
        let arena = EntityArena::new();
        let first = match arena.reserve_protocol(0x7000, "A") {
            Reserve::New(id) => id,
            Reserve::Existing(_) => panic!("fresh address must reserve"),
        };
        match arena.reserve_protocol(0x7000, "A-racer") {
            Reserve::Existing(id) => assert_eq!(id, first),
            Reserve::New(_) => panic!("second reservation must observe the first"),
        }
        assert_eq!(arena.protocol_id(0x7000), Some(first));
    }

    #[test]
    fn in_flight_entities_have_stable_identity() {
        let arena = EntityArena::new();
        let id = match arena.reserve_class(0x4000, "Foo") {
            Reserve::New(id) => id,
            Reserve::Existing(_) => unreachable!(),
        };
        // Visible before fill, by name and address only.
        assert_eq!(arena.class_name(id), "Foo");
        arena.fill_class(id, |class| class.is_swift = true);
        let (_, classes, _, by_addr) = arena.into_parts();
        assert_eq!(by_addr[&0x4000], id);
        assert!(classes[id.index()].is_swift);
        assert_eq!(classes[id.index()].name, "Foo");
    }
}
