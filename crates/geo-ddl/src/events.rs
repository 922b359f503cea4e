//! DDL event wiring.
//!
//! [`SpatialDdl`] drives the dialect hooks around the generic CREATE
//! and DROP TABLE statements. If any step fails while a [`DdlScope`]
//! is open, the table's declared columns and indexes are restored
//! before the error is returned, so metadata never leaks a stripped or
//! dummy-typed column.
//!
//! [`DdlScope`]: crate::core::schema::DdlScope

use std::sync::Arc;

use tracing::debug;

use crate::core::connection::SpatialConnection;
use crate::core::schema::{ReflectedColumn, Table};
use crate::core::traits::{BindValue, DialectStrategy};
use crate::dialects::{select_strategy, DialectKind, StrategyImpl};
use crate::error::Result;
use crate::shape::{default_bridge, GeometryBridge};
use crate::types::SpatialType;

pub struct SpatialDdl {
    bridge: Arc<dyn GeometryBridge>,
}

impl SpatialDdl {
    pub fn new(bridge: Arc<dyn GeometryBridge>) -> Self {
        SpatialDdl { bridge }
    }

    /// Create the table and register its spatial columns and indexes.
    pub async fn create_table(
        &self,
        table: &mut Table,
        conn: &dyn SpatialConnection,
    ) -> Result<()> {
        let strategy = select_strategy(conn.dialect());
        debug!(
            table = %table.name,
            dialect = strategy.kind().as_str(),
            "creating table"
        );
        let result = self.run_create(&strategy, table, conn).await;
        if result.is_err() {
            table.restore_scope();
        }
        result
    }

    async fn run_create(
        &self,
        strategy: &StrategyImpl,
        table: &mut Table,
        conn: &dyn SpatialConnection,
    ) -> Result<()> {
        strategy.before_create(table, conn).await?;
        conn.execute(&table.create_sql(strategy.kind())).await?;
        // Index entries that survived deferral reference only columns
        // present in the generic statement.
        for index in table.indexes.clone() {
            conn.execute(&index.create_sql(table, strategy.kind()))
                .await?;
        }
        strategy.after_create(table, conn).await
    }

    /// Drop the table after unregistering its spatial columns.
    pub async fn drop_table(&self, table: &mut Table, conn: &dyn SpatialConnection) -> Result<()> {
        let strategy = select_strategy(conn.dialect());
        debug!(
            table = %table.name,
            dialect = strategy.kind().as_str(),
            "dropping table"
        );
        let result = self.run_drop(&strategy, table, conn).await;
        if result.is_err() {
            table.restore_scope();
        }
        result
    }

    async fn run_drop(
        &self,
        strategy: &StrategyImpl,
        table: &mut Table,
        conn: &dyn SpatialConnection,
    ) -> Result<()> {
        strategy.before_drop(table, conn).await?;
        conn.execute(&table.drop_sql(strategy.kind())).await?;
        strategy.after_drop(table, conn).await
    }

    /// Fill in the spatial part of a reflected column description.
    pub async fn reflect_column(
        &self,
        conn: &dyn SpatialConnection,
        table: &Table,
        info: &mut ReflectedColumn,
    ) -> Result<()> {
        select_strategy(conn.dialect())
            .reflect_column(conn, table, info)
            .await
    }

    /// Encode a bind value for the given dialect, routing binary
    /// demotion through the configured bridge.
    pub fn encode_bind_value(
        &self,
        kind: DialectKind,
        ty: &SpatialType,
        value: BindValue,
    ) -> Result<BindValue> {
        select_strategy(kind).encode_bind_value(ty, value, self.bridge.as_ref())
    }
}

impl Default for SpatialDdl {
    fn default() -> Self {
        SpatialDdl::new(default_bridge())
    }
}
