pub mod actor;
pub mod error;
pub mod field;
pub mod reference;
pub mod registry;
pub mod schema;

pub use actor::*;
pub use error::*;
pub use field::*;
pub use reference::*;
pub use registry::*;
pub use schema::*;
