//! Core abstractions: schema metadata, database access and the dialect
//! strategy seam.

pub mod connection;
pub mod schema;
pub mod traits;

pub use connection::{RecordingConnection, SpatialConnection, SqlScalar};
pub use schema::{spatial_index_name, Column, ColumnType, DdlScope, Index, ReflectedColumn, Table};
pub use traits::{BindValue, DialectStrategy};
