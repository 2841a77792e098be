//! Database abstraction layer
//!
//! Trait-based link abstraction, the tokio-postgres implementation, and the
//! value types that flow back from the server.

pub mod link;
pub mod postgres;
pub mod schema;
pub mod types;
pub mod version;

// Re-export main types
pub use link::{Connector, Link, LinkError, LinkEvent, LinkParts, Notification};
pub use postgres::PostgresConnector;
pub use types::{CellValue, ColumnDef, DataType, QueryResults, Row};
pub use version::{ServerVersion, VersionProbe};
