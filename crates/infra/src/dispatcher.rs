//! Command execution for snapshot-stored aggregates.
//!
//! ```text
//! load snapshot -> handle (pure) -> apply events -> insert or versioned save
//! ```
//!
//! A command that yields no events writes nothing. Writes compare against the
//! version that was loaded, so a concurrent writer loses with
//! [`LifecycleError::PersistenceConflict`] instead of overwriting.

use std::sync::Arc;

use tracing::debug;

use inflow_core::{Aggregate, AggregateRoot, DomainError, ExpectedVersion};

use crate::error::{LifecycleError, LifecycleResult};
use crate::store::{Record, RecordStore};

/// Aggregate state after a command, plus the events that produced it.
#[derive(Debug, Clone)]
pub struct Outcome<R: Aggregate> {
    pub aggregate: R,
    pub events: Vec<R::Event>,
}

impl<R: Aggregate> Outcome<R> {
    pub fn changed(&self) -> bool {
        !self.events.is_empty()
    }
}

pub struct Dispatcher<R: Record> {
    store: Arc<dyn RecordStore<R>>,
}

impl<R: Record> Clone for Dispatcher<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<R: Record> core::fmt::Debug for Dispatcher<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher").field("kind", &R::KIND).finish_non_exhaustive()
    }
}

impl<R> Dispatcher<R>
where
    R: Record + Aggregate<Error = DomainError>,
{
    pub fn new(store: Arc<dyn RecordStore<R>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore<R>> {
        &self.store
    }

    pub async fn find(&self, id: &R::Id) -> LifecycleResult<Option<R>> {
        Ok(self.store.load(id).await?)
    }

    pub async fn load(&self, id: &R::Id) -> LifecycleResult<R> {
        self.store.load(id).await?.ok_or(LifecycleError::NotFound)
    }

    /// Loads `id` (or starts from `empty` when absent) and executes `command`.
    pub async fn execute(
        &self,
        id: &R::Id,
        command: &R::Command,
        empty: impl FnOnce() -> R,
    ) -> LifecycleResult<Outcome<R>> {
        let aggregate = match self.store.load(id).await? {
            Some(existing) => existing,
            None => empty(),
        };
        self.execute_on(aggregate, command).await
    }

    /// Executes `command` against an already loaded snapshot.
    pub async fn execute_on(
        &self,
        mut aggregate: R,
        command: &R::Command,
    ) -> LifecycleResult<Outcome<R>> {
        let loaded_version = aggregate.version();
        let events = aggregate.handle(command)?;
        if events.is_empty() {
            return Ok(Outcome {
                aggregate,
                events,
            });
        }

        for event in &events {
            aggregate.apply(event);
        }

        if loaded_version == 0 {
            self.store.insert(&aggregate).await?;
        } else {
            self.store
                .save(&aggregate, ExpectedVersion::Exact(loaded_version))
                .await?;
        }
        debug!(
            kind = R::KIND,
            id = %aggregate.record_key(),
            events = events.len(),
            version = aggregate.version(),
            "command persisted"
        );

        Ok(Outcome { aggregate, events })
    }
}
