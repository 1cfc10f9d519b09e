pub mod entity;
pub mod fragment;
pub mod registry;

pub use entity::{Entity, EntityLifecycle};
pub use fragment::{CompositeContext, FragmentFactory, HandleFragmentFactory};
pub use registry::{EntityTypeDescriptor, EntityTypeRegistry, Visibility};
