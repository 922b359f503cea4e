//! Machinery shared by the dialect strategies, plus the fallback
//! strategy for backends without spatial support.

use async_trait::async_trait;

use crate::core::connection::SpatialConnection;
use crate::core::schema::{
    spatial_index_name, Column, ColumnType, DdlScope, Index, ReflectedColumn, Table,
};
use crate::core::traits::{BindValue, DialectStrategy};
use crate::dialects::DialectKind;
use crate::error::Result;
use crate::shape::GeometryBridge;
use crate::types::SpatialType;

/// How managed spatial columns are presented to the generic CREATE
/// TABLE statement while the scope is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StripMode {
    /// Remove the columns; the backend adds them afterwards
    /// (PostGIS `AddGeometryColumn`).
    Remove,
    /// Declare them with a bare `GEOMETRY` type and recover them
    /// afterwards (SpatiaLite).
    DummyGeneric,
    /// Declare them with their kind name, dimension suffix stripped
    /// (GeoPackage).
    DummyBaseKind,
    /// Leave the column list untouched; only index entries are deferred
    /// (MySQL family).
    Keep,
}

/// Kind name without any `Z`/`M`/`ZM` dimension suffix.
pub(crate) fn base_kind_name(ty: &SpatialType) -> String {
    ty.geometry_type
        .as_deref()
        .unwrap_or("GEOMETRY")
        .trim_end_matches(['Z', 'M', 'z', 'm'])
        .to_string()
}

/// Open a [`DdlScope`] on the table ahead of generic DDL.
///
/// Index entries covering a managed column are removed from the table
/// metadata: they cannot be created while the column is absent. The
/// canonical entry of an index-requesting column is recreated by the
/// strategy itself afterwards; every other removed entry is deferred
/// and re-added once the columns exist.
///
/// Returns the managed columns as declared.
pub(crate) fn open_ddl_scope(
    table: &mut Table,
    is_managed: &dyn Fn(&Column) -> bool,
    mode: StripMode,
) -> Vec<Column> {
    let saved_columns = table.columns.clone();
    let saved_indexes = table.indexes.clone();
    let managed: Vec<Column> = saved_columns
        .iter()
        .filter(|c| is_managed(c))
        .cloned()
        .collect();

    let mut deferred_indexes = Vec::new();
    table.indexes.retain(|idx| {
        let covering = managed.iter().find(|col| idx.covers(&col.name));
        match covering {
            Some(col) => {
                let canonical = idx.name == spatial_index_name(&table.name, &col.name);
                let requested = col
                    .spatial_type()
                    .map(|t| t.spatial_index)
                    .unwrap_or(false);
                if !canonical || !requested {
                    deferred_indexes.push(idx.clone());
                }
                false
            }
            None => true,
        }
    });

    match mode {
        StripMode::Remove => {
            table.columns.retain(|c| !is_managed(c));
        }
        StripMode::DummyGeneric => {
            for col in table.columns.iter_mut().filter(|c| is_managed(c)) {
                col.ty = ColumnType::Plain("GEOMETRY".to_string());
            }
        }
        StripMode::DummyBaseKind => {
            for col in table.columns.iter_mut().filter(|c| is_managed(c)) {
                if let Some(ty) = col.spatial_type() {
                    col.ty = ColumnType::Plain(base_kind_name(ty));
                }
            }
        }
        StripMode::Keep => {}
    }

    table.begin_scope(DdlScope {
        saved_columns,
        saved_indexes,
        deferred_indexes,
    });
    managed
}

/// Close the scope after successful generic DDL: the declared columns
/// come back, and the deferred index entries are handed to the caller.
pub(crate) fn close_ddl_scope(table: &mut Table) -> Vec<Index> {
    match table.take_scope() {
        Some(scope) => {
            table.columns = scope.saved_columns;
            scope.deferred_indexes
        }
        None => Vec::new(),
    }
}

/// Fallback strategy: no column is managed and every hook is a no-op,
/// so spatial columns go through generic DDL untouched.
#[derive(Debug, Clone)]
pub struct CommonStrategy {
    kind: DialectKind,
}

impl CommonStrategy {
    pub fn new(kind: DialectKind) -> Self {
        CommonStrategy { kind }
    }
}

#[async_trait]
impl DialectStrategy for CommonStrategy {
    fn kind(&self) -> DialectKind {
        self.kind
    }

    fn is_managed(&self, _ty: &SpatialType) -> bool {
        false
    }

    async fn before_create(&self, _table: &mut Table, _conn: &dyn SpatialConnection) -> Result<()> {
        Ok(())
    }

    async fn after_create(&self, _table: &mut Table, _conn: &dyn SpatialConnection) -> Result<()> {
        Ok(())
    }

    async fn before_drop(&self, _table: &mut Table, _conn: &dyn SpatialConnection) -> Result<()> {
        Ok(())
    }

    async fn after_drop(&self, _table: &mut Table, _conn: &dyn SpatialConnection) -> Result<()> {
        Ok(())
    }

    async fn reflect_column(
        &self,
        _conn: &dyn SpatialConnection,
        _table: &Table,
        _info: &mut ReflectedColumn,
    ) -> Result<()> {
        Ok(())
    }

    fn encode_bind_value(
        &self,
        _ty: &SpatialType,
        value: BindValue,
        _bridge: &dyn GeometryBridge,
    ) -> Result<BindValue> {
        Ok(value)
    }

    async fn create_spatial_index(
        &self,
        conn: &dyn SpatialConnection,
        table: &Table,
        column: &Column,
    ) -> Result<()> {
        let index = Index::new(
            spatial_index_name(&table.name, &column.name),
            vec![column.name.clone()],
        );
        conn.execute(&index.create_sql(table, self.kind)).await?;
        Ok(())
    }

    async fn drop_spatial_index(
        &self,
        conn: &dyn SpatialConnection,
        table: &Table,
        column_name: &str,
    ) -> Result<()> {
        let name = spatial_index_name(&table.name, column_name);
        conn.execute(&format!(
            "DROP INDEX IF EXISTS {}",
            self.kind.quote_ident(&name)
        ))
        .await?;
        Ok(())
    }
}
