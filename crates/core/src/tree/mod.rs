#![forbid(unsafe_code)]

mod cascade;
mod events;
mod reduce;
mod store;
mod types;
mod validate;

pub use cascade::*;
pub use events::*;
pub use reduce::*;
pub use store::*;
pub use types::*;
pub use validate::*;
