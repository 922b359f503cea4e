//! # geo-ddl
//!
//! Spatial column lifecycle management for SQL schema tooling.
//!
//! Spatial backends do not treat geometry columns as plain columns:
//! PostGIS registers them through `AddGeometryColumn`, SpatiaLite wants
//! a dummy type in CREATE TABLE followed by `RecoverGeometryColumn`,
//! GeoPackage maintains bookkeeping tables and rtree shadow tables, and
//! MySQL indexes them with `ADD SPATIAL INDEX`. This crate wraps the
//! generic CREATE/DROP TABLE statements with per-dialect hooks so table
//! metadata can stay backend-agnostic:
//!
//! - **Type descriptors** for geometry, geography and raster columns
//! - **DDL hooks** that strip, substitute and restore spatial columns
//!   around generic statements
//! - **Reflection** turning backend catalogs back into descriptors
//! - **Bind-value encoding** per dialect, including WKB demotion to WKT
//!   through an optional bridge to the geo ecosystem
//! - **Migration operations** with reversal, rewriting and rendering
//!
//! ## Example
//!
//! ```rust,no_run
//! use geo_ddl::core::{Column, Table};
//! use geo_ddl::types::{GeometryKind, SpatialType};
//!
//! fn main() -> geo_ddl::error::Result<()> {
//!     let ty = SpatialType::geometry()
//!         .geometry_type(GeometryKind::Point)
//!         .srid(4326)
//!         .build()?;
//!     let mut table = Table::new("lake");
//!     table.add_column(Column::plain("id", "integer").primary_key());
//!     table.add_column(Column::spatial("geom", ty));
//!     println!("{}", table.create_sql(geo_ddl::dialects::DialectKind::Postgres));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod dialects;
pub mod elements;
pub mod error;
pub mod events;
pub mod migrate;
pub mod shape;
pub mod types;

// Re-exports for convenient access
pub use config::{EngineOptions, SpatialiteInitOptions};
pub use core::{BindValue, Column, ColumnType, Index, SpatialConnection, Table};
pub use dialects::{select_strategy, DialectKind};
pub use elements::{RasterElement, WkbElement, WktElement, NO_SRID};
pub use error::{GeoDdlError, Result};
pub use events::SpatialDdl;
pub use migrate::MigrationOp;
pub use types::{GeometryKind, SpatialBase, SpatialType};
