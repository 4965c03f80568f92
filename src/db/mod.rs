//! Database access layer.
//!
//! - `pool`: the gateway's single pooled database handle
//! - `session`: the statement-runner seam and its pooled implementation
//! - `executor`: single-statement and transactional batch execution
//! - `types`: row to JSON decoding

pub mod executor;
pub mod pool;
pub mod session;
pub mod types;

pub use executor::{QueryExecutor, execute_batch, returns_rows};
pub use pool::{Database, DbPool, DbTransaction};
pub use session::{PooledSession, StatementRunner};
