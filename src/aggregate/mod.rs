//! Aggregates - entities that stage domain events during a unit of work.
//!
//! An aggregate never publishes its own events. It records them in its
//! [`PendingEvents`] and the [`UnitOfWork`](crate::UnitOfWork) turns them into
//! outbox rows when the surrounding transaction commits.
//!
//! ## Example
//!
//! ```
//! use event_relay::{impl_aggregate, Aggregate, DomainEvent, PendingEvents};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct AccountRegistered { account_id: String }
//! impl DomainEvent for AccountRegistered {}
//!
//! #[derive(Default)]
//! struct Account { id: String, events: PendingEvents }
//!
//! impl Account {
//!     fn register(id: &str) -> Self {
//!         let mut account = Account { id: id.into(), ..Default::default() };
//!         account.record(AccountRegistered { account_id: id.into() });
//!         account
//!     }
//! }
//!
//! impl_aggregate!(Account, id, events);
//!
//! let mut account = Account::register("acc-1");
//! assert_eq!(account.drain_events().len(), 1);
//! assert!(account.drain_events().is_empty());
//! ```

mod pending;

pub use pending::PendingEvents;
pub(crate) use pending::StagedEvents;

use crate::event::{DomainEvent, SharedEvent};

/// Trait for entities with a stable identity that stage domain events.
pub trait Aggregate {
    fn aggregate_id(&self) -> String;

    fn pending_events(&self) -> &PendingEvents;

    /// Stage an event caused by this aggregate.
    fn record<E: DomainEvent>(&mut self, event: E)
    where
        Self: Sized,
    {
        self.pending_events().push(event);
    }

    /// Return and clear every staged event. Drained events are gone for good.
    fn drain_events(&mut self) -> Vec<SharedEvent> {
        self.pending_events().drain()
    }

    fn has_pending_events(&self) -> bool {
        !self.pending_events().is_empty()
    }
}

#[macro_export]
macro_rules! impl_aggregate {
    ($ty:ty, $id:ident, $events:ident) => {
        impl $crate::Aggregate for $ty {
            fn aggregate_id(&self) -> String {
                self.$id.to_string()
            }

            fn pending_events(&self) -> &$crate::PendingEvents {
                &self.$events
            }
        }
    };
}
