//! The dialect strategy seam.
//!
//! Each backend family implements [`DialectStrategy`]: the lifecycle
//! hooks around generic CREATE/DROP TABLE, reflection of spatial
//! columns, bind-parameter encoding and spatial index management.

use async_trait::async_trait;

use crate::core::connection::SpatialConnection;
use crate::core::schema::{Column, ReflectedColumn, Table};
use crate::dialects::DialectKind;
use crate::elements::{RasterElement, WkbElement, WktElement};
use crate::error::Result;
use crate::shape::GeometryBridge;
use crate::types::SpatialType;

/// A value bound to (or produced for) a spatial parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Wkt(WktElement),
    Wkb(WkbElement),
    Raster(RasterElement),
    Text(String),
    Bytes(Vec<u8>),
}

impl BindValue {
    /// SRID carried by the value, if it is a spatial element.
    pub fn srid(&self) -> Option<i32> {
        match self {
            BindValue::Wkt(e) => Some(e.srid()),
            BindValue::Wkb(e) => Some(e.srid()),
            BindValue::Raster(e) => Some(e.srid()),
            BindValue::Text(_) | BindValue::Bytes(_) => None,
        }
    }
}

/// Backend-specific behavior of the spatial DDL lifecycle.
///
/// The orchestrator calls the hooks in a fixed order around the generic
/// DDL statements:
///
/// ```text
/// before_create -> CREATE TABLE (+ declared indexes) -> after_create
/// before_drop   -> DROP TABLE                        -> after_drop
/// ```
///
/// `before_*` hooks open a [`crate::core::schema::DdlScope`] on the
/// table when they need to strip or substitute columns; `after_*` hooks
/// consume it. The orchestrator restores the scope if any step fails.
#[async_trait]
pub trait DialectStrategy: Send + Sync {
    /// The dialect family this strategy serves.
    fn kind(&self) -> DialectKind;

    /// Whether a column of this type is registered through backend
    /// bookkeeping calls instead of plain CREATE TABLE syntax.
    fn is_managed(&self, ty: &SpatialType) -> bool;

    async fn before_create(&self, table: &mut Table, conn: &dyn SpatialConnection) -> Result<()>;

    async fn after_create(&self, table: &mut Table, conn: &dyn SpatialConnection) -> Result<()>;

    async fn before_drop(&self, table: &mut Table, conn: &dyn SpatialConnection) -> Result<()>;

    async fn after_drop(&self, table: &mut Table, conn: &dyn SpatialConnection) -> Result<()>;

    /// Fill in the spatial part of a reflected column description.
    async fn reflect_column(
        &self,
        conn: &dyn SpatialConnection,
        table: &Table,
        info: &mut ReflectedColumn,
    ) -> Result<()>;

    /// Encode a bind value the way this backend's "from text" / "from
    /// binary" entry point expects it.
    fn encode_bind_value(
        &self,
        ty: &SpatialType,
        value: BindValue,
        bridge: &dyn GeometryBridge,
    ) -> Result<BindValue>;

    /// Create the spatial index for a column, idempotently.
    async fn create_spatial_index(
        &self,
        conn: &dyn SpatialConnection,
        table: &Table,
        column: &Column,
    ) -> Result<()>;

    /// Drop the spatial index of a column if it exists.
    async fn drop_spatial_index(
        &self,
        conn: &dyn SpatialConnection,
        table: &Table,
        column_name: &str,
    ) -> Result<()>;
}
