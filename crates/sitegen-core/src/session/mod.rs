//! Sessions: identifiers and the catalog of sessions found on disk.
//!
//! A session exists once its directory does. There is no explicit create or
//! delete; the first prompt creates it and nothing ever removes it.

mod catalog;
pub mod id;

pub use catalog::SessionCatalog;
pub use id::{SessionId, SessionIdError};
