//! Events - typed facts and their map form.
//!
//! A [`DomainEvent`] is a plain serde struct. Its map form (`EventMap`) is
//! what gets stored in outbox rows and sent as broker message bodies, and the
//! [`EventRegistry`] maps between event types and the stable names stored
//! next to that map.
//!
//! ## Example
//!
//! ```
//! use event_relay::{DomainEvent, EventRegistry};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct AccountRegistered {
//!     account_id: String,
//!     email: String,
//! }
//!
//! impl DomainEvent for AccountRegistered {}
//!
//! let registry = EventRegistry::builder()
//!     .register::<AccountRegistered>()
//!     .build()
//!     .unwrap();
//!
//! let event = AccountRegistered { account_id: "a-1".into(), email: "a@example.com".into() };
//! let name = registry.name_of::<AccountRegistered>();
//! let decoded = registry.decode(&name, event.to_map().unwrap()).unwrap();
//! assert_eq!(decoded.downcast_ref::<AccountRegistered>(), Some(&event));
//! ```

mod registry;

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::EventError;

pub(crate) use registry::{decode_as, DecodeFn};
pub use registry::{EventRegistry, EventRegistryBuilder, EventType};

/// Generic string-keyed form of an event.
pub type EventMap = serde_json::Map<String, Value>;

/// Type-erased event shared between the outbox, the bus and handlers.
pub type SharedEvent = Arc<dyn AnyEvent>;

/// An immutable fact about something that happened inside a module.
///
/// The map conversions default to serde; implement them by hand only when
/// the stored shape must differ from the struct.
pub trait DomainEvent: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    fn to_map(&self) -> Result<EventMap, EventError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(EventError::Serialization {
                name: short_type_name::<Self>().to_string(),
                source: <serde_json::Error as serde::ser::Error>::custom(format!(
                    "expected a JSON object, got {other}"
                )),
            }),
            Err(source) => Err(EventError::Serialization {
                name: short_type_name::<Self>().to_string(),
                source,
            }),
        }
    }

    fn from_map(map: EventMap) -> Result<Self, EventError> {
        serde_json::from_value(Value::Object(map)).map_err(|source| {
            EventError::Deserialization {
                name: short_type_name::<Self>().to_string(),
                source,
            }
        })
    }
}

/// A domain event that also travels across process boundaries.
pub trait IntegrationEvent: DomainEvent {
    /// Topic the event is published to by default.
    const TOPIC: &'static str;
}

/// Object-safe view of any [`DomainEvent`].
pub trait AnyEvent: fmt::Debug + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;

    fn event_type_id(&self) -> TypeId;

    fn type_name(&self) -> &'static str;

    fn encode(&self) -> Result<EventMap, EventError>;
}

impl<E: DomainEvent> AnyEvent for E {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn event_type_id(&self) -> TypeId {
        TypeId::of::<E>()
    }

    fn type_name(&self) -> &'static str {
        short_type_name::<E>()
    }

    fn encode(&self) -> Result<EventMap, EventError> {
        self.to_map()
    }
}

impl dyn AnyEvent {
    pub fn downcast_ref<E: DomainEvent>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }

    pub fn is<E: DomainEvent>(&self) -> bool {
        self.event_type_id() == TypeId::of::<E>()
    }
}

/// The type's own name without its module path or generic arguments.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
