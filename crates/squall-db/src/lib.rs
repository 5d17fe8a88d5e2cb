//! Database layer for the squall services.
//!
//! Provides PostgreSQL connection pooling (via `sqlx`), raw-SQL execution,
//! and the row materialization that turns driver values into the JSON the
//! wire protocol carries. Workers hold exactly one pool for their whole
//! lifetime and share it across requests.
//!
//! # Design decisions
//!
//! - **PostgreSQL with `sqlx`**: the services are configured with a URI
//!   connection string and execute SQL that is only known at runtime, so
//!   the driver must prepare statements dynamically rather than at compile
//!   time. `sqlx::query` does exactly that, and its pool handles bounded
//!   connection reuse.
//! - **`QueryGateway` trait seam**: HTTP handlers depend on the capability
//!   to execute SQL, not on the pool type. Tests substitute a scripted
//!   gateway and never open a database connection.
//! - **Tagged [`SqlValue`]**: column values pass through one enum that
//!   names the engine type they came from before flattening to JSON,
//!   keeping the decode rules in a single match.

mod gateway;
mod value;

pub use gateway::{create_pool, DbRuntimeSettings, GatewayError, PgGateway, PoolError, QueryGateway};
pub use value::SqlValue;
