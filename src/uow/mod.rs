pub mod callback;
pub mod factory;
pub mod unit;

pub use callback::{CompletionStatus, UnitOfWorkCallback};
pub use factory::{ContextStack, UnitOfWorkFactory, UnitOfWorkFactoryBuilder};
pub use unit::{EntityBuilder, UnitOfWork, UnitOfWorkInfo, UowId, UowStatus};
