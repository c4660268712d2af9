pub mod builder;
pub mod statement;

pub use builder::*;
pub use statement::*;
