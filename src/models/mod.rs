//! Data models shared by the API, the repository and the email pipeline.

mod campaign;
mod content_type;
mod datastore;
mod event;
mod generation;
mod knowledge;
mod template;

pub use campaign::*;
pub use content_type::*;
pub use datastore::*;
pub use event::*;
pub use generation::*;
pub use knowledge::*;
pub use template::*;
