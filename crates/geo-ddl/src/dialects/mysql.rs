//! MySQL and MariaDB strategy.
//!
//! Both backends accept geometry columns in plain CREATE TABLE syntax,
//! so no column is ever managed and the lifecycle only reroutes spatial
//! index entries through `ALTER TABLE ... ADD SPATIAL INDEX`. MariaDB
//! differs in bind encoding (no raw binary parameters, no stored SRS
//! id) and in reflection, where the SRID is not available.

use async_trait::async_trait;

use crate::core::connection::SpatialConnection;
use crate::core::schema::{spatial_index_name, Column, ReflectedColumn, Table};
use crate::core::traits::{BindValue, DialectStrategy};
use crate::dialects::common::{close_ddl_scope, open_ddl_scope, StripMode};
use crate::dialects::DialectKind;
use crate::elements::{WktElement, NO_SRID};
use crate::error::{GeoDdlError, Result};
use crate::shape::GeometryBridge;
use crate::types::{SpatialBase, SpatialType};

const REFLECTABLE_TYPES: [&str; 8] = [
    "geometry",
    "point",
    "linestring",
    "polygon",
    "multipoint",
    "multilinestring",
    "multipolygon",
    "geometrycollection",
];

fn srid_mismatch(value_srid: i32, column_srid: i32) -> GeoDdlError {
    GeoDdlError::argument(format!(
        "the SRID ({value_srid}) of the supplied value is different \
         from the one of the column ({column_srid})"
    ))
}

#[derive(Debug, Clone)]
pub struct MysqlStrategy {
    kind: DialectKind,
}

impl MysqlStrategy {
    pub fn new(kind: DialectKind) -> Self {
        MysqlStrategy { kind }
    }

    fn spatial_geometry(&self, column: &Column) -> bool {
        column
            .spatial_type()
            .map(|t| t.base == SpatialBase::Geometry)
            .unwrap_or(false)
    }

    /// MariaDB always rebases non-positive SRIDs; MySQL keeps 0 as a
    /// valid Cartesian SRID.
    fn needs_rebase(&self, srid: i32) -> bool {
        if self.kind == DialectKind::Mariadb {
            srid <= 0
        } else {
            srid == NO_SRID
        }
    }
}

#[async_trait]
impl DialectStrategy for MysqlStrategy {
    fn kind(&self) -> DialectKind {
        self.kind
    }

    fn is_managed(&self, _ty: &SpatialType) -> bool {
        false
    }

    async fn before_create(&self, table: &mut Table, _conn: &dyn SpatialConnection) -> Result<()> {
        // Columns stay in place; only index entries are deferred.
        open_ddl_scope(
            table,
            &|c: &Column| self.spatial_geometry(c),
            StripMode::Keep,
        );
        Ok(())
    }

    async fn after_create(&self, table: &mut Table, conn: &dyn SpatialConnection) -> Result<()> {
        let deferred = close_ddl_scope(table);

        for column in table.columns.clone() {
            let Some(ty) = column.spatial_type() else {
                continue;
            };
            let declared = table.indexes.iter().any(|i| i.covers(&column.name));
            if ty.base != SpatialBase::Raster && ty.spatial_index && !declared {
                self.create_spatial_index(conn, table, &column).await?;
            }
        }

        for index in deferred {
            conn.execute(&index.create_sql(table, self.kind())).await?;
            table.indexes.push(index);
        }
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
        conn: &dyn SpatialConnection,
        table: &Table,
        info: &mut ReflectedColumn,
    ) -> Result<()> {
        let select_srid = if self.kind == DialectKind::Mariadb {
            // MariaDB stores no SRS id in the information schema.
            "-1"
        } else {
            "SRS_ID"
        };
        let schema_part = match &table.schema {
            Some(schema) => format!(" and table_schema = '{schema}'"),
            None => String::new(),
        };
        let row = conn
            .query_row(&format!(
                "SELECT DATA_TYPE, {select_srid}, IS_NULLABLE \
                 FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_NAME = '{}' and COLUMN_NAME = '{}'{schema_part}",
                table.name, info.name
            ))
            .await?;
        let Some(row) = row else {
            return Ok(());
        };
        if row.len() < 3 {
            return Err(GeoDdlError::database(
                "INFORMATION_SCHEMA.COLUMNS row has too few fields",
            ));
        }

        let data_type = row[0]
            .as_text()
            .map(str::to_lowercase)
            .unwrap_or_default();
        if !REFLECTABLE_TYPES.contains(&data_type.as_str()) {
            return Ok(());
        }
        let srid = row[1].as_int().unwrap_or(NO_SRID as i64) as i32;
        let nullable = row[2]
            .as_text()
            .map(|s| s.eq_ignore_ascii_case("yes"))
            .unwrap_or(false);

        let index_type = conn
            .query_scalar(&format!(
                "SELECT DISTINCT INDEX_TYPE \
                 FROM INFORMATION_SCHEMA.STATISTICS \
                 WHERE TABLE_NAME = '{}' and COLUMN_NAME = '{}'{schema_part}",
                table.name, info.name
            ))
            .await?;
        let spatial_index = index_type
            .as_ref()
            .and_then(|v| v.as_text())
            .map(|s| s.eq_ignore_ascii_case("spatial"))
            .unwrap_or(false);

        // The generic type name may not have resolved to a spatial
        // type yet; the information schema is authoritative here.
        let mut spatial = match info.spatial.take() {
            Some(s) => s,
            None => SpatialType::geometry().no_geometry_type().build()?,
        };
        spatial.geometry_type = Some(data_type.to_uppercase());
        spatial.srid = srid;
        spatial.nullable = nullable;
        spatial.spatial_index = spatial_index;
        spatial.spatial_index_reflected = Some(true);
        info.spatial = Some(spatial);
        info.nullable = nullable;
        Ok(())
    }

    fn encode_bind_value(
        &self,
        ty: &SpatialType,
        value: BindValue,
        bridge: &dyn GeometryBridge,
    ) -> Result<BindValue> {
        match value {
            BindValue::Text(s) => {
                let parsed = WktElement::new(s, NO_SRID, None)?;
                if parsed.extended() && parsed.srid() != ty.srid {
                    return Err(srid_mismatch(parsed.srid(), ty.srid));
                }
                Ok(BindValue::Text(parsed.as_wkt().desc().to_string()))
            }
            BindValue::Wkt(e) => {
                if e.srid() != NO_SRID && e.srid() != ty.srid {
                    return Err(srid_mismatch(e.srid(), ty.srid));
                }
                let mut e = e.as_wkt();
                if self.needs_rebase(e.srid()) {
                    e = e.with_srid(ty.srid);
                }
                Ok(BindValue::Wkt(e))
            }
            BindValue::Wkb(e) => {
                if e.srid() != NO_SRID && e.srid() != ty.srid {
                    return Err(srid_mismatch(e.srid(), ty.srid));
                }
                if !ty.from_text_fn().to_lowercase().contains("wkb") {
                    let wkt = bridge.wkb_to_wkt(&e)?;
                    return Ok(BindValue::Text(wkt));
                }
                if self.kind == DialectKind::Mariadb {
                    // MariaDB rejects raw binary parameters.
                    Ok(BindValue::Text(e.desc()))
                } else {
                    Ok(BindValue::Wkb(e))
                }
            }
            BindValue::Bytes(b) => {
                if self.kind == DialectKind::Mariadb {
                    Ok(BindValue::Text(hex::encode(b)))
                } else {
                    Ok(BindValue::Bytes(b))
                }
            }
            other => Ok(other),
        }
    }

    async fn create_spatial_index(
        &self,
        conn: &dyn SpatialConnection,
        table: &Table,
        column: &Column,
    ) -> Result<()> {
        conn.execute(&format!(
            "ALTER TABLE {} ADD SPATIAL INDEX({})",
            table.name, column.name
        ))
        .await?;
        Ok(())
    }

    async fn drop_spatial_index(
        &self,
        conn: &dyn SpatialConnection,
        table: &Table,
        column_name: &str,
    ) -> Result<()> {
        conn.execute(&format!(
            "ALTER TABLE {} DROP INDEX {}",
            table.name,
            spatial_index_name(&table.name, column_name)
        ))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::{RecordingConnection, SqlScalar};
    use crate::elements::WkbElement;
    use crate::shape::UnavailableBridge;
    use crate::types::GeometryKind;

    fn make_test_table() -> Table {
        let mut table = Table::new("lake");
        table.add_column(Column::plain("id", "integer").primary_key());
        table.add_column(Column::spatial(
            "geom",
            SpatialType::geometry()
                .geometry_type(GeometryKind::Point)
                .srid(4326)
                .build()
                .unwrap(),
        ));
        table
    }

    #[tokio::test]
    async fn test_columns_left_in_place_and_index_added_by_alter() {
        let s = MysqlStrategy::new(DialectKind::Mysql);
        let conn = RecordingConnection::new(DialectKind::Mysql);
        let mut table = make_test_table();

        s.before_create(&mut table, &conn).await.unwrap();
        assert!(table.columns[1].is_spatial());
        assert!(table.indexes.is_empty());
        s.after_create(&mut table, &conn).await.unwrap();

        assert_eq!(
            conn.statements(),
            vec!["ALTER TABLE lake ADD SPATIAL INDEX(geom)"]
        );
    }

    #[tokio::test]
    async fn test_drop_hooks_are_quiet() {
        let s = MysqlStrategy::new(DialectKind::Mariadb);
        let conn = RecordingConnection::new(DialectKind::Mariadb);
        let mut table = make_test_table();
        s.before_drop(&mut table, &conn).await.unwrap();
        s.after_drop(&mut table, &conn).await.unwrap();
        assert!(conn.statements().is_empty());
    }

    #[tokio::test]
    async fn test_reflect_reads_information_schema() {
        let s = MysqlStrategy::new(DialectKind::Mysql);
        let conn = RecordingConnection::new(DialectKind::Mysql);
        conn.push_row(Some(vec![
            SqlScalar::Text("point".to_string()),
            SqlScalar::Int(4326),
            SqlScalar::Text("YES".to_string()),
        ]));
        conn.push_scalar(Some(SqlScalar::Text("SPATIAL".to_string())));
        let table = Table::new("lake");
        let mut info = ReflectedColumn::new("geom", "point");
        s.reflect_column(&conn, &table, &mut info).await.unwrap();
        let spatial = info.spatial.unwrap();
        assert_eq!(spatial.geometry_type.as_deref(), Some("POINT"));
        assert_eq!(spatial.srid, 4326);
        assert!(spatial.nullable);
        assert!(spatial.spatial_index);
        assert_eq!(spatial.spatial_index_reflected, Some(true));
        assert!(conn.statements()[0].contains("SRS_ID"));
    }

    #[tokio::test]
    async fn test_mariadb_reflect_has_no_srs_id() {
        let s = MysqlStrategy::new(DialectKind::Mariadb);
        let conn = RecordingConnection::new(DialectKind::Mariadb);
        conn.push_row(Some(vec![
            SqlScalar::Text("geometry".to_string()),
            SqlScalar::Int(-1),
            SqlScalar::Text("NO".to_string()),
        ]));
        conn.push_scalar(None);
        let table = Table::new("lake");
        let mut info = ReflectedColumn::new("geom", "geometry");
        s.reflect_column(&conn, &table, &mut info).await.unwrap();
        let spatial = info.spatial.unwrap();
        assert_eq!(spatial.srid, -1);
        assert!(!spatial.spatial_index);
        assert!(conn.statements()[0].contains("SELECT DATA_TYPE, -1, IS_NULLABLE"));
    }

    #[test]
    fn test_encode_text_strips_matching_srid_prefix() {
        let s = MysqlStrategy::new(DialectKind::Mysql);
        let ty = SpatialType::geometry().srid(4326).build().unwrap();
        let out = s
            .encode_bind_value(
                &ty,
                BindValue::Text("SRID=4326;POINT(1 2)".to_string()),
                &UnavailableBridge,
            )
            .unwrap();
        assert_eq!(out, BindValue::Text("POINT(1 2)".to_string()));
    }

    #[test]
    fn test_encode_rejects_srid_mismatch() {
        let s = MysqlStrategy::new(DialectKind::Mysql);
        let ty = SpatialType::geometry().srid(4326).build().unwrap();
        let err = s
            .encode_bind_value(
                &ty,
                BindValue::Text("SRID=2154;POINT(1 2)".to_string()),
                &UnavailableBridge,
            )
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("2154"));
        assert!(msg.contains("4326"));

        let e = WktElement::new("POINT(1 2)", 2154, None).unwrap();
        assert!(s
            .encode_bind_value(&ty, BindValue::Wkt(e), &UnavailableBridge)
            .is_err());
    }

    #[test]
    fn test_encode_wkt_rebases_missing_srid() {
        let s = MysqlStrategy::new(DialectKind::Mysql);
        let ty = SpatialType::geometry().srid(4326).build().unwrap();
        let e = WktElement::new("POINT(1 2)", -1, None).unwrap();
        let out = s
            .encode_bind_value(&ty, BindValue::Wkt(e), &UnavailableBridge)
            .unwrap();
        match out {
            BindValue::Wkt(e) => assert_eq!(e.srid(), 4326),
            other => panic!("unexpected bind value: {other:?}"),
        }
    }

    #[test]
    fn test_mariadb_encodes_wkb_as_hex() {
        let s = MysqlStrategy::new(DialectKind::Mariadb);
        let ty = SpatialType::geometry()
            .srid(4326)
            .from_text("ST_GeomFromWKB")
            .build()
            .unwrap();
        let hex = "0101000000000000000000f03f0000000000000040";
        let e = WkbElement::from_hex(hex, 4326, Some(false)).unwrap();
        let out = s
            .encode_bind_value(&ty, BindValue::Wkb(e), &UnavailableBridge)
            .unwrap();
        assert_eq!(out, BindValue::Text(hex.to_string()));

        let out = s
            .encode_bind_value(&ty, BindValue::Bytes(vec![1, 2, 255]), &UnavailableBridge)
            .unwrap();
        assert_eq!(out, BindValue::Text("0102ff".to_string()));
    }
}
