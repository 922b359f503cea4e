//! PostGIS strategy.
//!
//! PostGIS declares most spatial columns through type modifiers, so
//! they survive generic CREATE TABLE untouched. Columns asking for
//! check-constraint management (`use_typmod = Some(false)`) are
//! stripped first and registered with `AddGeometryColumn` afterwards;
//! those are the "managed" columns here. Raster and geography columns
//! are never managed.

use async_trait::async_trait;

use crate::core::connection::SpatialConnection;
use crate::core::schema::{spatial_index_name, Column, ReflectedColumn, Table};
use crate::core::traits::{BindValue, DialectStrategy};
use crate::dialects::common::{close_ddl_scope, open_ddl_scope, StripMode};
use crate::dialects::DialectKind;
use crate::error::{GeoDdlError, Result};
use crate::shape::GeometryBridge;
use crate::types::{SpatialBase, SpatialType};

#[derive(Debug, Clone, Default)]
pub struct PostgresStrategy;

impl PostgresStrategy {
    pub fn new() -> Self {
        PostgresStrategy
    }

    fn managed_column(&self, column: &Column) -> bool {
        column
            .spatial_type()
            .map(|t| self.is_managed(t))
            .unwrap_or(false)
    }

    fn add_geometry_column_sql(&self, table: &Table, column: &Column, ty: &SpatialType) -> String {
        let mut args = Vec::new();
        if let Some(schema) = &table.schema {
            args.push(format!("'{schema}'"));
        }
        args.push(format!("'{}'", table.name));
        args.push(format!("'{}'", column.name));
        args.push(ty.srid.to_string());
        args.push(format!(
            "'{}'",
            ty.geometry_type.as_deref().unwrap_or("GEOMETRY")
        ));
        args.push(ty.dimension.unwrap_or(2).to_string());
        if let Some(use_typmod) = ty.use_typmod {
            args.push(use_typmod.to_string());
        }
        format!("SELECT AddGeometryColumn({})", args.join(", "))
    }

    fn spatial_index_sql(&self, table: &Table, column: &Column, ty: &SpatialType) -> String {
        let kind = DialectKind::Postgres;
        let name = spatial_index_name(&table.name, &column.name);
        let target = if ty.base == SpatialBase::Raster {
            format!("ST_ConvexHull({})", kind.quote_ident(&column.name))
        } else if ty.use_nd_index {
            format!("{} gist_geometry_ops_nd", kind.quote_ident(&column.name))
        } else {
            kind.quote_ident(&column.name)
        };
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING gist ({})",
            kind.quote_ident(&name),
            table.qualified_name(kind),
            target
        )
    }
}

#[async_trait]
impl DialectStrategy for PostgresStrategy {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn is_managed(&self, ty: &SpatialType) -> bool {
        ty.base == SpatialBase::Geometry && ty.use_typmod == Some(false)
    }

    async fn before_create(&self, table: &mut Table, _conn: &dyn SpatialConnection) -> Result<()> {
        open_ddl_scope(table, &|c: &Column| self.managed_column(c), StripMode::Remove);
        Ok(())
    }

    async fn after_create(&self, table: &mut Table, conn: &dyn SpatialConnection) -> Result<()> {
        let deferred = close_ddl_scope(table);

        for column in table.columns.clone() {
            let Some(ty) = column.spatial_type() else {
                continue;
            };
            if self.is_managed(ty) {
                conn.query_scalar(&self.add_geometry_column_sql(table, &column, ty))
                    .await?;
            }
            let declared = table.indexes.iter().any(|i| i.covers(&column.name));
            if ty.spatial_index && !declared && self.is_managed(ty) {
                self.create_spatial_index(conn, table, &column).await?;
            }
        }

        for index in deferred {
            conn.execute(&index.create_sql(table, self.kind())).await?;
            table.indexes.push(index);
        }
        Ok(())
    }

    async fn before_drop(&self, table: &mut Table, conn: &dyn SpatialConnection) -> Result<()> {
        let managed = open_ddl_scope(table, &|c: &Column| self.managed_column(c), StripMode::Remove);
        for column in managed {
            // Raster columns go down with the table itself.
            if column
                .spatial_type()
                .map(|t| t.base == SpatialBase::Raster)
                .unwrap_or(true)
            {
                continue;
            }
            let mut args = Vec::new();
            if let Some(schema) = &table.schema {
                args.push(format!("'{schema}'"));
            }
            args.push(format!("'{}'", table.name));
            args.push(format!("'{}'", column.name));
            conn.query_scalar(&format!("SELECT DropGeometryColumn({})", args.join(", ")))
                .await?;
        }
        Ok(())
    }

    async fn after_drop(&self, table: &mut Table, _conn: &dyn SpatialConnection) -> Result<()> {
        close_ddl_scope(table);
        Ok(())
    }

    async fn reflect_column(
        &self,
        conn: &dyn SpatialConnection,
        table: &Table,
        info: &mut ReflectedColumn,
    ) -> Result<()> {
        let Some(spatial) = info.spatial.as_mut() else {
            return Ok(());
        };

        if spatial.base != SpatialBase::Raster {
            // The kind suffix wins over whatever dimension was stored.
            if let Some(kind) = &spatial.geometry_type {
                if kind.ends_with("ZM") {
                    spatial.dimension = Some(4);
                } else if kind.ends_with('Z') || kind.ends_with('M') {
                    spatial.dimension = Some(3);
                }
            }
        }

        let schema_part = match &table.schema {
            Some(schema) => format!(" AND nspname = '{schema}'"),
            None => String::new(),
        };
        // The regex arm catches functional indexes (e.g. raster convex
        // hulls) that do not reference the column directly.
        let has_index_query = format!(
            "SELECT EXISTS (
        SELECT 1
        FROM pg_class t
        JOIN pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_index ix ON t.oid = ix.indrelid
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_am am ON i.relam = am.oid
        WHERE
            t.relname = '{table_name}'{schema_part}
            AND am.amname = 'gist'
            AND (
                EXISTS (
                    SELECT 1
                    FROM pg_attribute a
                    WHERE a.attrelid = t.oid
                    AND a.attnum = ANY(ix.indkey)
                    AND a.attname = '{col_name}'
                )
                OR pg_get_indexdef(
                    ix.indexrelid
                ) ~ '(^|[^a-zA-Z0-9_])(\"?{col_name}\"?)($|[^a-zA-Z0-9_])'
            )
    )",
            table_name = table.name,
            col_name = info.name,
        );
        let has_index = conn
            .query_scalar(&has_index_query)
            .await?
            .map(|v| v.is_truthy())
            .unwrap_or(false);

        spatial.spatial_index = has_index;
        spatial.spatial_index_reflected = Some(true);
        Ok(())
    }

    fn encode_bind_value(
        &self,
        _ty: &SpatialType,
        value: BindValue,
        bridge: &dyn GeometryBridge,
    ) -> Result<BindValue> {
        match value {
            BindValue::Wkt(e) => {
                if e.extended() {
                    Ok(BindValue::Text(e.desc().to_string()))
                } else {
                    Ok(BindValue::Text(format!("SRID={};{}", e.srid(), e.desc())))
                }
            }
            BindValue::Wkb(e) => {
                if e.extended() {
                    // ST_GeomFromEWKT accepts EWKB hex directly.
                    Ok(BindValue::Text(e.desc()))
                } else {
                    let wkt = bridge.wkb_to_wkt(&e)?;
                    Ok(BindValue::Text(format!("SRID={};{}", e.srid(), wkt)))
                }
            }
            BindValue::Raster(e) => Ok(BindValue::Text(e.desc().to_string())),
            other => Ok(other),
        }
    }

    async fn create_spatial_index(
        &self,
        conn: &dyn SpatialConnection,
        table: &Table,
        column: &Column,
    ) -> Result<()> {
        let ty = column.spatial_type().ok_or_else(|| {
            GeoDdlError::argument(format!("column {} is not spatial", column.name))
        })?;
        conn.execute(&self.spatial_index_sql(table, column, ty))
            .await?;
        Ok(())
    }

    async fn drop_spatial_index(
        &self,
        conn: &dyn SpatialConnection,
        table: &Table,
        column_name: &str,
    ) -> Result<()> {
        let kind = self.kind();
        let name = spatial_index_name(&table.name, column_name);
        let qualified = match &table.schema {
            Some(schema) => format!("{}.{}", kind.quote_ident(schema), kind.quote_ident(&name)),
            None => kind.quote_ident(&name),
        };
        conn.execute(&format!("DROP INDEX IF EXISTS {qualified}"))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::RecordingConnection;
    use crate::elements::{WkbElement, WktElement};
    use crate::shape::UnavailableBridge;
    use crate::types::GeometryKind;

    fn make_test_type(use_typmod: Option<bool>) -> SpatialType {
        let mut builder = SpatialType::geometry()
            .geometry_type(GeometryKind::Point)
            .srid(4326);
        if let Some(v) = use_typmod {
            builder = builder.use_typmod(v);
        }
        builder.build().unwrap()
    }

    fn make_test_table(use_typmod: Option<bool>) -> Table {
        let mut table = Table::new("lake");
        table.add_column(Column::plain("id", "integer").primary_key());
        table.add_column(Column::spatial("geom", make_test_type(use_typmod)));
        table
    }

    #[test]
    fn test_managed_only_without_typmod() {
        let s = PostgresStrategy::new();
        assert!(!s.is_managed(&make_test_type(None)));
        assert!(!s.is_managed(&make_test_type(Some(true))));
        assert!(s.is_managed(&make_test_type(Some(false))));
        assert!(!s.is_managed(&SpatialType::raster().build().unwrap()));
    }

    #[tokio::test]
    async fn test_managed_lifecycle_emits_add_geometry_column() {
        let s = PostgresStrategy::new();
        let conn = RecordingConnection::new(DialectKind::Postgres);
        let mut table = make_test_table(Some(false));

        s.before_create(&mut table, &conn).await.unwrap();
        // Managed column stripped while the scope is open.
        assert_eq!(table.columns.len(), 1);
        s.after_create(&mut table, &conn).await.unwrap();
        assert_eq!(table.columns.len(), 2);

        let stmts = conn.statements();
        assert_eq!(
            stmts[0],
            "SELECT AddGeometryColumn('lake', 'geom', 4326, 'POINT', 2, false)"
        );
        assert_eq!(
            stmts[1],
            "CREATE INDEX IF NOT EXISTS \"idx_lake_geom\" ON \"lake\" USING gist (\"geom\")"
        );
    }

    #[tokio::test]
    async fn test_unmanaged_lifecycle_is_quiet() {
        let s = PostgresStrategy::new();
        let conn = RecordingConnection::new(DialectKind::Postgres);
        let mut table = make_test_table(None);

        s.before_create(&mut table, &conn).await.unwrap();
        // Typmod column survives generic DDL; canonical index entry stays declared.
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.indexes.len(), 1);
        s.after_create(&mut table, &conn).await.unwrap();
        assert!(conn.statements().is_empty());
    }

    #[tokio::test]
    async fn test_create_spatial_index_is_idempotent_sql() {
        let s = PostgresStrategy::new();
        let conn = RecordingConnection::new(DialectKind::Postgres);
        let table = make_test_table(None);
        let column = table.column("geom").unwrap().clone();
        s.create_spatial_index(&conn, &table, &column).await.unwrap();
        s.create_spatial_index(&conn, &table, &column).await.unwrap();
        let stmts = conn.statements();
        assert_eq!(stmts.len(), 2);
        assert!(stmts.iter().all(|s| s.contains("IF NOT EXISTS")));
    }

    #[tokio::test]
    async fn test_before_drop_drops_managed_columns() {
        let s = PostgresStrategy::new();
        let conn = RecordingConnection::new(DialectKind::Postgres);
        let mut table = make_test_table(Some(false));
        table.schema = Some("gis".to_string());

        s.before_drop(&mut table, &conn).await.unwrap();
        assert_eq!(
            conn.statements(),
            vec!["SELECT DropGeometryColumn('gis', 'lake', 'geom')"]
        );
        s.after_drop(&mut table, &conn).await.unwrap();
        assert_eq!(table.columns.len(), 2);
    }

    #[tokio::test]
    async fn test_reflect_sets_index_flag() {
        use crate::core::connection::SqlScalar;

        let s = PostgresStrategy::new();
        let conn = RecordingConnection::new(DialectKind::Postgres);
        conn.push_scalar(Some(SqlScalar::Bool(true)));
        let table = Table::new("lake");
        let mut info = ReflectedColumn::new("geom", "geometry");
        info.spatial = Some(
            SpatialType::geometry()
                .geometry_type_name("POINTZ")
                .spatial_index(false)
                .build()
                .unwrap(),
        );
        s.reflect_column(&conn, &table, &mut info).await.unwrap();
        let spatial = info.spatial.unwrap();
        assert!(spatial.spatial_index);
        assert_eq!(spatial.dimension, Some(3));
        assert_eq!(spatial.spatial_index_reflected, Some(true));
    }

    #[test]
    fn test_encode_wkt_bind_values() {
        let s = PostgresStrategy::new();
        let ty = make_test_type(None);
        let plain = WktElement::new("POINT(1 2)", 4326, None).unwrap();
        let out = s
            .encode_bind_value(&ty, BindValue::Wkt(plain), &UnavailableBridge)
            .unwrap();
        assert_eq!(out, BindValue::Text("SRID=4326;POINT(1 2)".to_string()));

        let extended = WktElement::new("SRID=4326;POINT(1 2)", -1, None).unwrap();
        let out = s
            .encode_bind_value(&ty, BindValue::Wkt(extended), &UnavailableBridge)
            .unwrap();
        assert_eq!(out, BindValue::Text("SRID=4326;POINT(1 2)".to_string()));
    }

    #[test]
    fn test_encode_ewkb_passes_hex() {
        let s = PostgresStrategy::new();
        let ty = make_test_type(None);
        let hex = "0101000020e6100000000000000000f03f0000000000000040";
        let e = WkbElement::from_hex(hex, -1, None).unwrap();
        let out = s
            .encode_bind_value(&ty, BindValue::Wkb(e), &UnavailableBridge)
            .unwrap();
        assert_eq!(out, BindValue::Text(hex.to_string()));
    }

    #[cfg(not(feature = "geo-bridge"))]
    #[test]
    fn test_encode_plain_wkb_requires_bridge() {
        let s = PostgresStrategy::new();
        let ty = make_test_type(None);
        let e = WkbElement::from_hex("0101000000000000000000f03f0000000000000040", 4326, None)
            .unwrap();
        let err = s
            .encode_bind_value(&ty, BindValue::Wkb(e), &UnavailableBridge)
            .unwrap_err();
        assert!(matches!(err, GeoDdlError::MissingDependency { .. }));
    }
}
