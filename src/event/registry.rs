use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::EventError;

use super::{short_type_name, AnyEvent, DomainEvent, EventMap, SharedEvent};

pub(crate) type DecodeFn = fn(EventMap) -> Result<SharedEvent, EventError>;

pub(crate) fn decode_as<E: DomainEvent>(map: EventMap) -> Result<SharedEvent, EventError> {
    Ok(Arc::new(E::from_map(map)?))
}

/// A registered event type: its stable name plus how to rebuild it.
#[derive(Clone)]
pub struct EventType {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    decode: DecodeFn,
}

impl EventType {
    fn of<E: DomainEvent>(name: String) -> Self {
        Self {
            name,
            type_id: TypeId::of::<E>(),
            type_name: short_type_name::<E>(),
            decode: decode_as::<E>,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<E: DomainEvent>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }

    /// Rebuild a typed event from its map form.
    pub fn decode(&self, map: EventMap) -> Result<SharedEvent, EventError> {
        (self.decode)(map)
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventType")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Collects event types at startup. Call [`build`](Self::build) once every
/// type the module produces or consumes has been added.
#[derive(Default)]
pub struct EventRegistryBuilder {
    entries: Vec<EventType>,
}

impl EventRegistryBuilder {
    /// Register `E` under its type name.
    pub fn register<E: DomainEvent>(self) -> Self {
        let name = short_type_name::<E>().to_string();
        self.register_as::<E>(name)
    }

    /// Register `E` under an explicit name.
    pub fn register_as<E: DomainEvent>(mut self, name: impl Into<String>) -> Self {
        self.entries.push(EventType::of::<E>(name.into()));
        self
    }

    /// Freeze the registry.
    ///
    /// Re-registering the same type under the same name is a no-op. Two
    /// different types sharing one name is a [`EventError::NameConflict`].
    pub fn build(self) -> Result<EventRegistry, EventError> {
        let mut by_name: HashMap<String, EventType> = HashMap::new();
        let mut by_type: HashMap<TypeId, String> = HashMap::new();

        for entry in self.entries {
            if let Some(existing) = by_name.get(&entry.name) {
                if existing.type_id != entry.type_id {
                    return Err(EventError::NameConflict {
                        name: entry.name,
                        existing: existing.type_name,
                        conflicting: entry.type_name,
                    });
                }
                continue;
            }
            by_type.entry(entry.type_id).or_insert_with(|| entry.name.clone());
            by_name.insert(entry.name.clone(), entry);
        }

        Ok(EventRegistry { by_name, by_type })
    }
}

/// Bidirectional mapping between event types and their stable names.
///
/// Built once at startup and shared read-only (usually as
/// `Arc<EventRegistry>`) by the unit of work, the outbox processor and the
/// broker bridge.
#[derive(Debug, Default)]
pub struct EventRegistry {
    by_name: HashMap<String, EventType>,
    by_type: HashMap<TypeId, String>,
}

impl EventRegistry {
    pub fn builder() -> EventRegistryBuilder {
        EventRegistryBuilder::default()
    }

    /// Registered name of `E`, or its type name when unregistered.
    pub fn name_of<E: DomainEvent>(&self) -> String {
        self.by_type
            .get(&TypeId::of::<E>())
            .cloned()
            .unwrap_or_else(|| short_type_name::<E>().to_string())
    }

    /// Registered name of an erased event, or its type name when unregistered.
    pub fn name_of_event(&self, event: &dyn AnyEvent) -> String {
        self.by_type
            .get(&event.event_type_id())
            .cloned()
            .unwrap_or_else(|| event.type_name().to_string())
    }

    /// Look up a type by name. Unknown names are an error, never a silent drop.
    pub fn type_of(&self, name: &str) -> Result<&EventType, EventError> {
        self.by_name
            .get(name)
            .ok_or_else(|| EventError::Reconstruction {
                name: name.to_string(),
            })
    }

    /// Resolve `name` and rebuild the event from `map`.
    pub fn decode(&self, name: &str, map: EventMap) -> Result<SharedEvent, EventError> {
        self.type_of(name)?.decode(map)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
