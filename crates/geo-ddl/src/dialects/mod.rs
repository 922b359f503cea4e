//! Backend-specific DDL strategies.
//!
//! Each backend family implements the
//! [`DialectStrategy`](crate::core::traits::DialectStrategy) trait:
//!
//! - [`postgres`]: PostGIS (check-constraint columns via `AddGeometryColumn`)
//! - [`sqlite`]: SpatiaLite (dummy-type substitution, `RecoverGeometryColumn`)
//! - [`geopackage`]: GeoPackage bookkeeping tables and rtree indexes
//! - [`mysql`]: MySQL and MariaDB (`ALTER TABLE ... ADD SPATIAL INDEX`)
//! - [`common`]: fallback that leaves everything to generic DDL
//!
//! # Static dispatch
//!
//! [`StrategyImpl`] uses a manual enum dispatch instead of
//! `Box<dyn DialectStrategy>`: the compiler generates a match statement
//! rather than a vtable lookup, and the set of supported backends is a
//! closed enum resolved once per connection.

pub mod common;
pub mod geopackage;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use common::CommonStrategy;
pub use geopackage::GeopackageStrategy;
pub use mysql::MysqlStrategy;
pub use postgres::PostgresStrategy;
pub use sqlite::SqliteStrategy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::connection::SpatialConnection;
use crate::core::schema::{Column, ReflectedColumn, Table};
use crate::core::traits::{BindValue, DialectStrategy};
use crate::error::Result;
use crate::shape::GeometryBridge;
use crate::types::SpatialType;

/// The backend families the spatial DDL machinery knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DialectKind {
    Postgres,
    Sqlite,
    Geopackage,
    Mysql,
    Mariadb,
    /// Anything else: spatial columns are left to generic DDL.
    Other,
}

impl DialectKind {
    /// Resolve a dialect name as it appears in connection URLs.
    pub fn from_name(name: &str) -> DialectKind {
        match name.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => DialectKind::Postgres,
            "sqlite" => DialectKind::Sqlite,
            "geopackage" | "gpkg" => DialectKind::Geopackage,
            "mysql" => DialectKind::Mysql,
            "mariadb" => DialectKind::Mariadb,
            _ => DialectKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DialectKind::Postgres => "postgresql",
            DialectKind::Sqlite => "sqlite",
            DialectKind::Geopackage => "geopackage",
            DialectKind::Mysql => "mysql",
            DialectKind::Mariadb => "mariadb",
            DialectKind::Other => "other",
        }
    }

    pub fn is_mysql_family(&self) -> bool {
        matches!(self, DialectKind::Mysql | DialectKind::Mariadb)
    }

    pub fn is_sqlite_family(&self) -> bool {
        matches!(self, DialectKind::Sqlite | DialectKind::Geopackage)
    }

    /// Quote an identifier the way this backend expects.
    pub fn quote_ident(&self, ident: &str) -> String {
        if self.is_mysql_family() {
            format!("`{}`", ident.replace('`', "``"))
        } else {
            format!("\"{}\"", ident.replace('"', "\"\""))
        }
    }
}

/// Enum-based static dispatch for dialect strategies.
#[derive(Debug, Clone)]
pub enum StrategyImpl {
    Postgres(PostgresStrategy),
    Sqlite(SqliteStrategy),
    Geopackage(GeopackageStrategy),
    Mysql(MysqlStrategy),
    Common(CommonStrategy),
}

impl StrategyImpl {
    /// Select the strategy serving a dialect family.
    pub fn for_kind(kind: DialectKind) -> StrategyImpl {
        match kind {
            DialectKind::Postgres => StrategyImpl::Postgres(PostgresStrategy::new()),
            DialectKind::Sqlite => StrategyImpl::Sqlite(SqliteStrategy::new()),
            DialectKind::Geopackage => StrategyImpl::Geopackage(GeopackageStrategy::new()),
            DialectKind::Mysql => StrategyImpl::Mysql(MysqlStrategy::new(DialectKind::Mysql)),
            DialectKind::Mariadb => StrategyImpl::Mysql(MysqlStrategy::new(DialectKind::Mariadb)),
            DialectKind::Other => StrategyImpl::Common(CommonStrategy::new(kind)),
        }
    }
}

/// Select the strategy serving a dialect family.
pub fn select_strategy(kind: DialectKind) -> StrategyImpl {
    StrategyImpl::for_kind(kind)
}

#[async_trait]
impl DialectStrategy for StrategyImpl {
    fn kind(&self) -> DialectKind {
        match self {
            StrategyImpl::Postgres(s) => s.kind(),
            StrategyImpl::Sqlite(s) => s.kind(),
            StrategyImpl::Geopackage(s) => s.kind(),
            StrategyImpl::Mysql(s) => s.kind(),
            StrategyImpl::Common(s) => s.kind(),
        }
    }

    fn is_managed(&self, ty: &SpatialType) -> bool {
        match self {
            StrategyImpl::Postgres(s) => s.is_managed(ty),
            StrategyImpl::Sqlite(s) => s.is_managed(ty),
            StrategyImpl::Geopackage(s) => s.is_managed(ty),
            StrategyImpl::Mysql(s) => s.is_managed(ty),
            StrategyImpl::Common(s) => s.is_managed(ty),
        }
    }

    async fn before_create(&self, table: &mut Table, conn: &dyn SpatialConnection) -> Result<()> {
        match self {
            StrategyImpl::Postgres(s) => s.before_create(table, conn).await,
            StrategyImpl::Sqlite(s) => s.before_create(table, conn).await,
            StrategyImpl::Geopackage(s) => s.before_create(table, conn).await,
            StrategyImpl::Mysql(s) => s.before_create(table, conn).await,
            StrategyImpl::Common(s) => s.before_create(table, conn).await,
        }
    }

    async fn after_create(&self, table: &mut Table, conn: &dyn SpatialConnection) -> Result<()> {
        match self {
            StrategyImpl::Postgres(s) => s.after_create(table, conn).await,
            StrategyImpl::Sqlite(s) => s.after_create(table, conn).await,
            StrategyImpl::Geopackage(s) => s.after_create(table, conn).await,
            StrategyImpl::Mysql(s) => s.after_create(table, conn).await,
            StrategyImpl::Common(s) => s.after_create(table, conn).await,
        }
    }

    async fn before_drop(&self, table: &mut Table, conn: &dyn SpatialConnection) -> Result<()> {
        match self {
            StrategyImpl::Postgres(s) => s.before_drop(table, conn).await,
            StrategyImpl::Sqlite(s) => s.before_drop(table, conn).await,
            StrategyImpl::Geopackage(s) => s.before_drop(table, conn).await,
            StrategyImpl::Mysql(s) => s.before_drop(table, conn).await,
            StrategyImpl::Common(s) => s.before_drop(table, conn).await,
        }
    }

    async fn after_drop(&self, table: &mut Table, conn: &dyn SpatialConnection) -> Result<()> {
        match self {
            StrategyImpl::Postgres(s) => s.after_drop(table, conn).await,
            StrategyImpl::Sqlite(s) => s.after_drop(table, conn).await,
            StrategyImpl::Geopackage(s) => s.after_drop(table, conn).await,
            StrategyImpl::Mysql(s) => s.after_drop(table, conn).await,
            StrategyImpl::Common(s) => s.after_drop(table, conn).await,
        }
    }

    async fn reflect_column(
        &self,
        conn: &dyn SpatialConnection,
        table: &Table,
        info: &mut ReflectedColumn,
    ) -> Result<()> {
        match self {
            StrategyImpl::Postgres(s) => s.reflect_column(conn, table, info).await,
            StrategyImpl::Sqlite(s) => s.reflect_column(conn, table, info).await,
            StrategyImpl::Geopackage(s) => s.reflect_column(conn, table, info).await,
            StrategyImpl::Mysql(s) => s.reflect_column(conn, table, info).await,
            StrategyImpl::Common(s) => s.reflect_column(conn, table, info).await,
        }
    }

    fn encode_bind_value(
        &self,
        ty: &SpatialType,
        value: BindValue,
        bridge: &dyn GeometryBridge,
    ) -> Result<BindValue> {
        match self {
            StrategyImpl::Postgres(s) => s.encode_bind_value(ty, value, bridge),
            StrategyImpl::Sqlite(s) => s.encode_bind_value(ty, value, bridge),
            StrategyImpl::Geopackage(s) => s.encode_bind_value(ty, value, bridge),
            StrategyImpl::Mysql(s) => s.encode_bind_value(ty, value, bridge),
            StrategyImpl::Common(s) => s.encode_bind_value(ty, value, bridge),
        }
    }

    async fn create_spatial_index(
        &self,
        conn: &dyn SpatialConnection,
        table: &Table,
        column: &Column,
    ) -> Result<()> {
        match self {
            StrategyImpl::Postgres(s) => s.create_spatial_index(conn, table, column).await,
            StrategyImpl::Sqlite(s) => s.create_spatial_index(conn, table, column).await,
            StrategyImpl::Geopackage(s) => s.create_spatial_index(conn, table, column).await,
            StrategyImpl::Mysql(s) => s.create_spatial_index(conn, table, column).await,
            StrategyImpl::Common(s) => s.create_spatial_index(conn, table, column).await,
        }
    }

    async fn drop_spatial_index(
        &self,
        conn: &dyn SpatialConnection,
        table: &Table,
        column_name: &str,
    ) -> Result<()> {
        match self {
            StrategyImpl::Postgres(s) => s.drop_spatial_index(conn, table, column_name).await,
            StrategyImpl::Sqlite(s) => s.drop_spatial_index(conn, table, column_name).await,
            StrategyImpl::Geopackage(s) => s.drop_spatial_index(conn, table, column_name).await,
            StrategyImpl::Mysql(s) => s.drop_spatial_index(conn, table, column_name).await,
            StrategyImpl::Common(s) => s.drop_spatial_index(conn, table, column_name).await,
        }
    }
}
