//! Unit-of-work lifecycle tests: identity map coherence, completion,
//! discard, removal, and staged creation.

use std::sync::Arc;
use unitwork::{
    Entity, EntityLifecycle, EntityTypeDescriptor, EntityTypeRegistry, MemoryEntityStore,
    SequenceIdentityGenerator, UnitOfWorkFactory, UowError, Value, Visibility,
};

fn assemble(store: Arc<MemoryEntityStore>) -> UnitOfWorkFactory {
    let registry = Arc::new(EntityTypeRegistry::new());
    registry.register(EntityTypeDescriptor::new("Person"));
    registry.register(EntityTypeDescriptor::new("Order"));
    UnitOfWorkFactory::builder(store)
        .registry(registry)
        .identity_generator(Arc::new(SequenceIdentityGenerator::default()))
        .build()
}

fn fixture() -> (UnitOfWorkFactory, Arc<MemoryEntityStore>) {
    let store = Arc::new(MemoryEntityStore::new());
    (assemble(Arc::clone(&store)), store)
}

#[tokio::test]
async fn test_identity_map_returns_same_instance() {
    let (factory, _store) = fixture();
    let uow = factory.new_unit_of_work();

    let created = uow.new_entity_with_identity("Person", "p-1").await.unwrap();
    let fetched = uow.get("Person", "p-1").await.unwrap();

    assert!(Entity::same_instance(&created, &fetched));
    uow.discard().await.unwrap();
}

#[tokio::test]
async fn test_round_trip_through_store() {
    let (factory, _store) = fixture();

    let uow = factory.new_unit_of_work();
    let person = uow.new_entity_with_identity("Person", "p-1").await.unwrap();
    person.set_property("name", "Alice".into()).unwrap();
    person.set_property("age", 30.into()).unwrap();
    uow.complete().await.unwrap();

    let uow = factory.new_unit_of_work();
    let person = uow.get("Person", "p-1").await.unwrap();
    assert_eq!(person.property("name").unwrap(), Some("Alice".into()));
    assert_eq!(person.property("age").unwrap(), Some(Value::Integer(30)));
    assert!(person.version().unwrap().is_some());
    uow.discard().await.unwrap();
}

#[tokio::test]
async fn test_association_round_trip() {
    let (factory, _store) = fixture();

    let uow = factory.new_unit_of_work();
    let person = uow.new_entity_with_identity("Person", "p-1").await.unwrap();
    let order = uow.new_entity_with_identity("Order", "o-1").await.unwrap();
    let second = uow.new_entity_with_identity("Order", "o-2").await.unwrap();
    person
        .set_association("latest", Some(order.reference().clone()))
        .unwrap();
    person
        .add_association("orders", order.reference().clone())
        .unwrap();
    person
        .add_association("orders", second.reference().clone())
        .unwrap();
    uow.complete().await.unwrap();

    let uow = factory.new_unit_of_work();
    let person = uow.get("Person", "p-1").await.unwrap();
    assert_eq!(
        person.association("latest").unwrap().as_ref().map(|r| r.identity().to_string()),
        Some("o-1".to_string())
    );
    assert_eq!(person.many_association("orders").unwrap().len(), 2);
    uow.discard().await.unwrap();
}

#[tokio::test]
async fn test_discard_closes_without_store_interaction() {
    let (factory, store) = fixture();
    let uow = factory.new_unit_of_work();

    let person = uow.new_entity_with_identity("Person", "p-1").await.unwrap();
    person.set_property("name", "Alice".into()).unwrap();
    uow.discard().await.unwrap();

    assert_eq!(store.entity_count().await, 0);
    assert!(matches!(
        uow.get("Person", "p-1").await,
        Err(UowError::IllegalState(_))
    ));
    assert!(matches!(
        uow.new_entity("Person").await,
        Err(UowError::IllegalState(_))
    ));
    assert!(matches!(uow.discard().await, Err(UowError::IllegalState(_))));
    // Outstanding handles are detached as well.
    assert!(matches!(
        person.property("name"),
        Err(UowError::IllegalState(_))
    ));
}

#[tokio::test]
async fn test_complete_closes_the_unit_of_work() {
    let (factory, _store) = fixture();
    let uow = factory.new_unit_of_work();
    uow.new_entity_with_identity("Person", "p-1").await.unwrap();
    uow.complete().await.unwrap();

    assert!(matches!(uow.complete().await, Err(UowError::IllegalState(_))));
    assert!(matches!(
        uow.get("Person", "p-1").await,
        Err(UowError::IllegalState(_))
    ));
}

#[tokio::test]
async fn test_remove_persists_at_completion() {
    let (factory, store) = fixture();

    let uow = factory.new_unit_of_work();
    uow.new_entity_with_identity("Person", "p-1").await.unwrap();
    uow.complete().await.unwrap();

    let uow = factory.new_unit_of_work();
    let person = uow.get("Person", "p-1").await.unwrap();
    uow.remove(&person).await.unwrap();
    // Removed entities are gone for this unit of work before commit.
    assert!(matches!(
        uow.get("Person", "p-1").await,
        Err(UowError::NoSuchEntity(_))
    ));
    uow.complete().await.unwrap();

    assert!(!store.contains(&unitwork::EntityReference::new("Person", "p-1")).await);
}

#[tokio::test]
async fn test_created_then_removed_never_reaches_store() {
    let (factory, store) = fixture();
    let uow = factory.new_unit_of_work();

    let person = uow.new_entity_with_identity("Person", "p-1").await.unwrap();
    uow.remove(&person).await.unwrap();
    uow.complete().await.unwrap();

    assert_eq!(store.entity_count().await, 0);
}

#[tokio::test]
async fn test_mutation_after_remove_fails() {
    let (factory, _store) = fixture();
    let uow = factory.new_unit_of_work();

    let person = uow.new_entity_with_identity("Person", "p-1").await.unwrap();
    person.set_property("name", "Alice".into()).unwrap();
    uow.remove(&person).await.unwrap();

    assert!(matches!(
        person.set_property("name", "Bob".into()),
        Err(UowError::EntityState(_))
    ));
    // Second removal fails on the same entity state.
    assert!(matches!(
        uow.remove(&person).await,
        Err(UowError::EntityState(_))
    ));
    uow.discard().await.unwrap();
}

#[tokio::test]
async fn test_apply_keeps_open_and_flushes_incrementally() {
    let (factory, store) = fixture();
    let uow = factory.new_unit_of_work();

    let person = uow.new_entity_with_identity("Person", "p-1").await.unwrap();
    uow.new_entity_with_identity("Person", "p-2").await.unwrap();
    person.set_property("name", "Alice".into()).unwrap();
    uow.apply().await.unwrap();

    assert!(uow.is_open().await);
    let bystander_version = store
        .version_of(&unitwork::EntityReference::new("Person", "p-2"))
        .await
        .unwrap();

    // Only the entity touched after apply() is flushed again.
    person.set_property("name", "Alicia".into()).unwrap();
    uow.complete().await.unwrap();

    assert_eq!(
        store
            .version_of(&unitwork::EntityReference::new("Person", "p-2"))
            .await
            .unwrap(),
        bystander_version
    );
    let uow = factory.new_unit_of_work();
    let person = uow.get("Person", "p-1").await.unwrap();
    assert_eq!(person.property("name").unwrap(), Some("Alicia".into()));
    uow.discard().await.unwrap();
}

#[tokio::test]
async fn test_get_missing_entity_is_no_such_entity() {
    let (factory, _store) = fixture();
    let uow = factory.new_unit_of_work();

    assert!(matches!(
        uow.get("Person", "ghost").await,
        Err(UowError::NoSuchEntity(_))
    ));
    uow.discard().await.unwrap();
}

#[tokio::test]
async fn test_unregistered_type_is_rejected() {
    let (factory, _store) = fixture();
    let uow = factory.new_unit_of_work();

    assert!(matches!(
        uow.new_entity("Invoice").await,
        Err(UowError::EntityTypeNotFound(_))
    ));
    assert!(matches!(
        uow.get("Invoice", "i-1").await,
        Err(UowError::EntityTypeNotFound(_))
    ));
    uow.discard().await.unwrap();
}

#[tokio::test]
async fn test_ambiguous_type_is_rejected() {
    let store = Arc::new(MemoryEntityStore::new());
    let registry = Arc::new(EntityTypeRegistry::new());
    registry.register(EntityTypeDescriptor::new("Person").with_visibility(Visibility::Layer));
    registry.register(EntityTypeDescriptor::new("Person").with_visibility(Visibility::Layer));
    let factory = UnitOfWorkFactory::builder(store).registry(registry).build();

    let uow = factory.new_unit_of_work();
    assert!(matches!(
        uow.new_entity("Person").await,
        Err(UowError::AmbiguousType(_, 2))
    ));
    uow.discard().await.unwrap();
}

#[tokio::test]
async fn test_rebind_from_foreign_unit_of_work() {
    let (factory, _store) = fixture();

    let uow = factory.new_unit_of_work();
    let person = uow.new_entity_with_identity("Person", "p-1").await.unwrap();
    person.set_property("name", "Alice".into()).unwrap();
    uow.complete().await.unwrap();

    let first = factory.new_unit_of_work();
    let original = first.get("Person", "p-1").await.unwrap();

    let second = factory.new_unit_of_work();
    let rebound = second.get_entity(&original).await.unwrap();

    assert_eq!(rebound.reference(), original.reference());
    assert!(!Entity::same_instance(&rebound, &original));
    second.discard().await.unwrap();
    first.discard().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_identity_in_one_unit_of_work_fails() {
    let (factory, _store) = fixture();
    let uow = factory.new_unit_of_work();

    uow.new_entity_with_identity("Person", "p-1").await.unwrap();
    assert!(matches!(
        uow.new_entity_with_identity("Person", "p-1").await,
        Err(UowError::EntityState(_))
    ));
    uow.discard().await.unwrap();
}

#[tokio::test]
async fn test_entity_builder_primes_before_joining() {
    let (factory, _store) = fixture();
    let uow = factory.new_unit_of_work();

    let builder = uow.new_entity_builder_with_identity("Person", "p-1").await.unwrap();
    builder.instance().set_property("name", "Alice".into()).unwrap();

    // Not visible until the instance joins the identity map.
    assert!(matches!(
        uow.get("Person", "p-1").await,
        Err(UowError::NoSuchEntity(_))
    ));

    let person = builder.new_instance().await.unwrap();
    let fetched = uow.get("Person", "p-1").await.unwrap();
    assert!(Entity::same_instance(&person, &fetched));
    assert_eq!(fetched.property("name").unwrap(), Some("Alice".into()));
    uow.complete().await.unwrap();
}

#[tokio::test]
async fn test_generated_identities_are_assigned_once() {
    let (factory, _store) = fixture();
    let uow = factory.new_unit_of_work();

    let a = uow.new_entity("Person").await.unwrap();
    let b = uow.new_entity("Person").await.unwrap();

    assert_ne!(a.identity(), b.identity());
    uow.discard().await.unwrap();
}

struct RejectingLifecycle;

impl EntityLifecycle for RejectingLifecycle {
    fn create(&self, entity: &Entity) -> unitwork::Result<()> {
        Err(UowError::Lifecycle(format!(
            "creation of '{}' rejected",
            entity.reference()
        )))
    }

    fn remove(&self, entity: &Entity) -> unitwork::Result<()> {
        Err(UowError::Lifecycle(format!(
            "removal of '{}' rejected",
            entity.reference()
        )))
    }
}

#[tokio::test]
async fn test_failing_create_hook_rolls_back_identity_map() {
    let store = Arc::new(MemoryEntityStore::new());
    let registry = Arc::new(EntityTypeRegistry::new());
    registry.register(
        EntityTypeDescriptor::new("Audited").with_lifecycle(Arc::new(RejectingLifecycle)),
    );
    let factory = UnitOfWorkFactory::builder(Arc::clone(&store) as Arc<dyn unitwork::EntityStore>)
        .registry(registry)
        .build();

    let uow = factory.new_unit_of_work();
    assert!(matches!(
        uow.new_entity_with_identity("Audited", "a-1").await,
        Err(UowError::Lifecycle(_))
    ));

    // Rolled back: nothing to flush.
    uow.complete().await.unwrap();
    assert_eq!(store.entity_count().await, 0);
}

struct GuardedRemoval;

impl EntityLifecycle for GuardedRemoval {
    fn remove(&self, _entity: &Entity) -> unitwork::Result<()> {
        Err(UowError::Lifecycle("protected entity".to_string()))
    }
}

#[tokio::test]
async fn test_failing_remove_hook_leaves_state_untouched() {
    let store = Arc::new(MemoryEntityStore::new());
    let registry = Arc::new(EntityTypeRegistry::new());
    registry.register(
        EntityTypeDescriptor::new("Guarded").with_lifecycle(Arc::new(GuardedRemoval)),
    );
    let factory = UnitOfWorkFactory::builder(Arc::clone(&store) as Arc<dyn unitwork::EntityStore>)
        .registry(registry)
        .build();

    let uow = factory.new_unit_of_work();
    let entity = uow.new_entity_with_identity("Guarded", "g-1").await.unwrap();

    assert!(matches!(
        uow.remove(&entity).await,
        Err(UowError::Lifecycle(_))
    ));
    assert!(!entity.is_removed().unwrap());
    uow.complete().await.unwrap();
    assert_eq!(store.entity_count().await, 1);
}
