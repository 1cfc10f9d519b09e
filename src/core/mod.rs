pub mod error;
pub mod meta;
pub mod usecase;
pub mod value;

pub use error::{Result, UowError};
pub use meta::MetaInfo;
pub use usecase::{Usecase, UsecaseBuilder};
pub use value::Value;
