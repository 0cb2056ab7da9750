use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::quantities::{Priority, Tick};

/// Name of a device in the switch's registry. Config files key devices and
/// send-rate tables by these.
#[derive(Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> DeviceId {
        DeviceId(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> DeviceId {
        DeviceId(id.to_owned())
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketId(u64);

/// Index into the [`ClassTable`] shared by every device on a switch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(usize);

impl ClassId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// One configured traffic class: how many packets of it each device
/// originates per peer per tick, and the priority and size they carry.
#[derive(Clone, Debug)]
pub struct PacketClass {
    pub name: String,
    pub frequency: u32,
    pub priority: Priority,
    pub size: f64,
}

#[derive(Clone, Debug, Default)]
pub struct ClassTable {
    classes: Vec<PacketClass>,
}

impl ClassTable {
    #[must_use]
    pub fn new(classes: impl IntoIterator<Item = PacketClass>) -> ClassTable {
        ClassTable {
            classes: classes.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    #[must_use]
    pub fn get(&self, class: ClassId) -> &PacketClass {
        &self.classes[class.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClassId, &PacketClass)> {
        self.classes
            .iter()
            .enumerate()
            .map(|(index, class)| (ClassId(index), class))
    }
}

/// One transmission unit. Immutable after minting; whichever buffer holds it
/// owns it, and ownership moves on every enqueue/dequeue.
#[derive(Debug)]
pub struct Packet {
    id: PacketId,
    class: ClassId,
    priority: Priority,
    size: f64,
    source: DeviceId,
    destination: DeviceId,
    created: Tick,
}

impl Packet {
    #[must_use]
    pub const fn id(&self) -> PacketId {
        self.id
    }

    #[must_use]
    pub const fn class(&self) -> ClassId {
        self.class
    }

    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    #[must_use]
    pub const fn size(&self) -> f64 {
        self.size
    }

    #[must_use]
    pub const fn source(&self) -> &DeviceId {
        &self.source
    }

    #[must_use]
    pub const fn destination(&self) -> &DeviceId {
        &self.destination
    }

    #[must_use]
    pub const fn created(&self) -> Tick {
        self.created
    }
}

/// Mints packets with ids that are unique and strictly increasing for the
/// lifetime of one simulation session. Owned by the driver rather than
/// ambient, so independent sessions in one process never share a counter.
#[derive(Debug, Default)]
pub struct PacketFactory {
    next_id: u64,
}

impl PacketFactory {
    #[must_use]
    pub const fn new() -> PacketFactory {
        PacketFactory { next_id: 0 }
    }

    pub fn mint(
        &mut self,
        class_id: ClassId,
        class: &PacketClass,
        source: DeviceId,
        destination: DeviceId,
        created: Tick,
    ) -> Packet {
        let id = PacketId(self.next_id);
        self.next_id += 1;
        Packet {
            id,
            class: class_id,
            priority: class.priority,
            size: class.size,
            source,
            destination,
            created,
        }
    }

    /// Number of packets minted so far.
    #[must_use]
    pub const fn minted(&self) -> u64 {
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use crate::quantities::{Priority, Tick};

    use super::{ClassTable, DeviceId, PacketClass, PacketFactory};

    fn test_class() -> PacketClass {
        PacketClass {
            name: "bulk".to_owned(),
            frequency: 1,
            priority: Priority::new(0),
            size: 0.5,
        }
    }

    #[test]
    fn ids_are_strictly_increasing() {
        let table = ClassTable::new([test_class()]);
        let (class_id, class) = table.iter().next().unwrap();
        let mut factory = PacketFactory::new();
        let a = factory.mint(
            class_id,
            class,
            DeviceId::from("a"),
            DeviceId::from("b"),
            Tick::ZERO,
        );
        let b = factory.mint(
            class_id,
            class,
            DeviceId::from("b"),
            DeviceId::from("a"),
            Tick::ZERO,
        );
        assert!(b.id() > a.id());
        assert_eq!(factory.minted(), 2);
    }

    #[test]
    fn independent_factories_do_not_share_a_counter() {
        let table = ClassTable::new([test_class()]);
        let (class_id, class) = table.iter().next().unwrap();
        let mut first = PacketFactory::new();
        let mut second = PacketFactory::new();
        let a = first.mint(
            class_id,
            class,
            DeviceId::from("a"),
            DeviceId::from("b"),
            Tick::ZERO,
        );
        let b = second.mint(
            class_id,
            class,
            DeviceId::from("a"),
            DeviceId::from("b"),
            Tick::ZERO,
        );
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn minted_packets_carry_class_parameters() {
        let table = ClassTable::new([test_class()]);
        let (class_id, class) = table.iter().next().unwrap();
        let mut factory = PacketFactory::new();
        let packet = factory.mint(
            class_id,
            class,
            DeviceId::from("a"),
            DeviceId::from("b"),
            Tick::new(3),
        );
        assert_eq!(packet.class(), class_id);
        assert_eq!(packet.priority(), Priority::new(0));
        assert_eq!(packet.created(), Tick::new(3));
        assert_eq!(packet.source(), &DeviceId::from("a"));
        assert_eq!(packet.destination(), &DeviceId::from("b"));
    }
}
