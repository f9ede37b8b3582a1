pub mod types;
pub mod loader;
pub mod validator;
pub mod merge;

pub use types::*;
pub use loader::*;
pub use validator::*;
pub use merge::*;
