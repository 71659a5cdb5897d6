//! Database access: driver seam, PostgreSQL driver and the per-request context.

mod context;
mod driver;
pub mod postgres;

#[cfg(test)]
pub(crate) mod fake;

pub use context::{ConnectionScope, DbContext, TransactionScope};
pub use driver::{Connector, Engine, RawConnection, Row};
