// ============================================================================
// Unitwork Library
// ============================================================================

//! Unit-of-Work engine with identity-map caching, optimistic concurrency,
//! and pluggable entity stores.
//!
//! All entity access goes through a [`UnitOfWork`]: entities are created or
//! fetched into its identity map, mutated through [`Entity`] handles, and
//! flushed as one atomic batch on [`UnitOfWork::complete`]. A unit of work
//! differs from a transaction in that it holds no storage resource - it can
//! stay open arbitrarily long, and a completion that fails on a concurrency
//! conflict leaves it open so the caller can reconcile and retry.
//!
//! Persistence is behind the [`EntityStore`] SPI: any backend that can load
//! states and atomically apply a prepared batch plugs in. [`MemoryEntityStore`]
//! and the snapshot-persisted [`FileEntityStore`] ship in-crate.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use unitwork::{
//!     EntityTypeDescriptor, EntityTypeRegistry, MemoryEntityStore, UnitOfWorkFactory,
//! };
//!
//! # fn main() -> Result<(), unitwork::UowError> {
//! # tokio_test::block_on(async {
//! let registry = Arc::new(EntityTypeRegistry::new());
//! registry.register(EntityTypeDescriptor::new("Person"));
//!
//! let factory = UnitOfWorkFactory::new(Arc::new(MemoryEntityStore::new()), registry);
//!
//! let uow = factory.new_unit_of_work();
//! let person = uow.new_entity_with_identity("Person", "p-1").await?;
//! person.set_property("name", "Alice".into())?;
//! uow.complete().await?;
//!
//! let uow = factory.new_unit_of_work();
//! let person = uow.get("Person", "p-1").await?;
//! assert_eq!(person.property("name")?, Some("Alice".into()));
//! uow.discard().await?;
//! # Ok(())
//! # })
//! # }
//! ```

pub mod composite;
pub mod core;
pub mod entity;
pub mod store;
pub mod uow;

// Re-export main types for convenience
pub use composite::{
    CompositeContext, Entity, EntityLifecycle, EntityTypeDescriptor, EntityTypeRegistry,
    FragmentFactory, HandleFragmentFactory, Visibility,
};
pub use crate::core::{MetaInfo, Result, Usecase, UsecaseBuilder, UowError, Value};
pub use entity::{
    EntityReference, EntityState, EntityStatus, IdentityGenerator, SequenceIdentityGenerator,
    UuidIdentityGenerator, VersionToken,
};
pub use store::{
    CommitReceipt, EntityStore, FileEntityStore, MemoryEntityStore, StateBatch, StoreCommit,
};
pub use uow::{
    CompletionStatus, ContextStack, EntityBuilder, UnitOfWork, UnitOfWorkCallback,
    UnitOfWorkFactory, UnitOfWorkFactoryBuilder, UnitOfWorkInfo, UowId, UowStatus,
};
