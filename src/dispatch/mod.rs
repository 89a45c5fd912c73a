//! Role-dependent listing dispatch.
//!
//! A logical listing ("students", "degrees") is resolved to the backend call
//! that serves the actor's role, then normalized to one [`Page`] envelope.

pub mod infinite;
pub mod paginated;
pub mod table;

pub use infinite::{InfinitePage, InfiniteQuery, PageToken};
pub use paginated::{ListRequest, Page, PageMeta, PaginatedDispatcher, Sort, SortDirection};
pub use table::{DispatchTable, Endpoint, ListOperation, PageBase};
