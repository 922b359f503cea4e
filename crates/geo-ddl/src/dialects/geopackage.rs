//! GeoPackage strategy.
//!
//! GeoPackage stores geometry metadata in the `gpkg_contents` and
//! `gpkg_geometry_columns` tables and only allows one geometry column
//! per feature table. Spatial indexes are SpatiaLite rtree shadow
//! tables registered through `gpkg_extensions`.

use async_trait::async_trait;

use crate::core::connection::SpatialConnection;
use crate::core::schema::{Column, ReflectedColumn, Table};
use crate::core::traits::{BindValue, DialectStrategy};
use crate::dialects::common::{close_ddl_scope, open_ddl_scope, StripMode};
use crate::dialects::sqlite::load_spatialite_driver;
use crate::dialects::DialectKind;
use crate::error::{GeoDdlError, Result};
use crate::shape::GeometryBridge;
use crate::types::{SpatialBase, SpatialType};

/// Load the SpatiaLite extension on a GeoPackage connection and enable
/// its GeoPackage support.
///
/// No EPSG SRID is loaded into `gpkg_spatial_ref_sys` at this point;
/// SRIDs of newly created tables are inserted on demand.
pub async fn load_spatialite_gpkg(conn: &dyn SpatialConnection) -> Result<()> {
    load_spatialite_driver(conn).await?;

    let has_metadata = conn
        .query_scalar("SELECT CheckGeoPackageMetaData();")
        .await?
        .map(|v| v.is_truthy())
        .unwrap_or(false);
    if !has_metadata {
        // Only works on the main database.
        conn.execute("SELECT gpkgCreateBaseTables();").await?;
    }

    conn.execute("SELECT AutoGpkgStart();").await?;
    conn.execute("SELECT EnableGpkgAmphibiousMode();").await?;
    Ok(())
}

/// Create a `spatial_ref_sys` table mirroring `gpkg_spatial_ref_sys`.
///
/// Usually only needed to run `ST_Transform` on GeoPackage data.
pub async fn populate_spatial_ref_sys(conn: &dyn SpatialConnection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS spatial_ref_sys (\n\
         \x20 srid       INTEGER NOT NULL PRIMARY KEY,\n\
         \x20 auth_name  VARCHAR(256),\n\
         \x20 auth_srid  INTEGER,\n\
         \x20 srtext     VARCHAR(2048),\n\
         \x20 proj4text  VARCHAR(2048)\n\
         )",
    )
    .await?;
    conn.execute(
        "INSERT INTO spatial_ref_sys \
         SELECT srs_id AS srid, organization AS auth_name, \
         organization_coordsys_id AS auth_srid, definition AS srtext, NULL \
         FROM gpkg_spatial_ref_sys AS A \
         WHERE NOT EXISTS (SELECT srid FROM spatial_ref_sys WHERE srid = A.srs_id)",
    )
    .await?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct GeopackageStrategy;

impl GeopackageStrategy {
    pub fn new() -> Self {
        GeopackageStrategy
    }

    fn managed_column(&self, column: &Column) -> bool {
        column
            .spatial_type()
            .map(|t| self.is_managed(t))
            .unwrap_or(false)
    }
}

#[async_trait]
impl DialectStrategy for GeopackageStrategy {
    fn kind(&self) -> DialectKind {
        DialectKind::Geopackage
    }

    fn is_managed(&self, ty: &SpatialType) -> bool {
        ty.base == SpatialBase::Geometry
    }

    async fn before_create(&self, table: &mut Table, conn: &dyn SpatialConnection) -> Result<()> {
        let managed = table
            .columns
            .iter()
            .filter(|c| self.managed_column(c))
            .cloned()
            .collect::<Vec<_>>();
        if managed.len() > 1 {
            return Err(GeoDdlError::argument(format!(
                "only one geometry column is allowed for table '{}' stored in a GeoPackage",
                table.name
            )));
        }

        if let Some(column) = managed.first() {
            // Unwrap is safe: managed columns are spatial by construction.
            let srid = column.spatial_type().map(|t| t.srid).unwrap_or(-1);
            let known = conn
                .query_scalar(&format!(
                    "SELECT COUNT(*) FROM gpkg_spatial_ref_sys WHERE srs_id = {srid}"
                ))
                .await?
                .and_then(|v| v.as_int())
                .unwrap_or(0);
            if known == 0 {
                conn.query_scalar(&format!("SELECT gpkgInsertEpsgSRID({srid})"))
                    .await?;
            }
        }

        for column in table.columns.iter_mut() {
            if let Some(ty) = column.spatial_type_mut() {
                if ty.base == SpatialBase::Geometry && ty.geometry_type.is_none() {
                    ty.geometry_type = Some("GEOMETRY".to_string());
                }
            }
        }

        open_ddl_scope(
            table,
            &|c: &Column| self.managed_column(c),
            StripMode::DummyBaseKind,
        );
        Ok(())
    }

    async fn after_create(&self, table: &mut Table, conn: &dyn SpatialConnection) -> Result<()> {
        let deferred = close_ddl_scope(table);

        for column in table.columns.clone() {
            let Some(ty) = column.spatial_type() else {
                continue;
            };
            if self.is_managed(ty) {
                let dimension = ty.dimension_code();
                let has_z = dimension.contains('Z') as u8;
                let has_m = dimension.contains('M') as u8;
                conn.execute(&format!(
                    "INSERT INTO gpkg_contents VALUES ('{0}', 'features', '{0}', '', \
                     strftime('%Y-%m-%dT%H:%M:%fZ', CURRENT_TIMESTAMP), \
                     NULL, NULL, NULL, NULL, {1})",
                    table.name, ty.srid
                ))
                .await?;
                conn.execute(&format!(
                    "INSERT INTO gpkg_geometry_columns \
                     VALUES ('{}', '{}', '{}', {}, {}, {})",
                    table.name,
                    column.name,
                    ty.geometry_type.as_deref().unwrap_or("GEOMETRY"),
                    ty.srid,
                    has_z,
                    has_m
                ))
                .await?;
                conn.query_scalar(&format!(
                    "SELECT gpkgAddGeometryTriggers('{}', '{}')",
                    table.name, column.name
                ))
                .await?;
            }
        }

        for column in table.columns.clone() {
            let Some(ty) = column.spatial_type() else {
                continue;
            };
            if ty.base != SpatialBase::Raster && ty.spatial_index {
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
        let managed = open_ddl_scope(
            table,
            &|c: &Column| self.managed_column(c),
            StripMode::Keep,
        );
        for column in managed {
            self.drop_spatial_index(conn, table, &column.name).await?;
            conn.execute(&format!(
                "DELETE FROM gpkg_extensions \
                 WHERE LOWER(table_name) = LOWER('{}') AND column_name = '{}'",
                table.name, column.name
            ))
            .await?;
            conn.execute(&format!(
                "DELETE FROM gpkg_geometry_columns \
                 WHERE LOWER(table_name) = LOWER('{}') AND column_name = '{}'",
                table.name, column.name
            ))
            .await?;
            conn.execute(&format!(
                "DELETE FROM gpkg_contents WHERE LOWER(table_name) = LOWER('{}')",
                table.name
            ))
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
        if spatial.base != SpatialBase::Geometry {
            return Ok(());
        }
        let row = conn
            .query_row(&format!(
                "SELECT A.geometry_type_name, A.srs_id, A.z, A.m, \
                 IFNULL(B.has_index, 0) AS has_index \
                 FROM gpkg_geometry_columns AS A \
                 LEFT JOIN (\
                 SELECT table_name, column_name, COUNT(*) AS has_index \
                 FROM gpkg_extensions \
                 WHERE LOWER(table_name) = LOWER('{0}') \
                 AND column_name = '{1}' \
                 AND extension_name = 'gpkg_rtree_index'\
                 ) AS B \
                 ON LOWER(A.table_name) = LOWER(B.table_name) \
                 AND A.column_name = B.column_name \
                 WHERE LOWER(A.table_name) = LOWER('{0}') \
                 AND A.column_name = '{1}'",
                table.name, info.name
            ))
            .await?;
        // Columns not registered in the GeoPackage metadata are ignored.
        let Some(row) = row else {
            return Ok(());
        };
        if row.len() < 5 {
            return Err(GeoDdlError::database(
                "gpkg_geometry_columns row has too few fields",
            ));
        }

        let geometry_type = row[0]
            .as_text()
            .ok_or_else(|| GeoDdlError::decode("geometry_type_name is not text"))?
            .to_string();
        let has_z = row[2].is_truthy();
        let has_m = row[3].is_truthy();
        let dimension = match (has_z, has_m) {
            (false, false) => 2,
            (true, true) => 4,
            _ => 3,
        };

        spatial.geometry_type = Some(geometry_type);
        spatial.dimension = Some(dimension);
        if let Some(srid) = row[1].as_int() {
            spatial.srid = srid as i32;
        }
        spatial.spatial_index = row[4].is_truthy();
        spatial.spatial_index_reflected = Some(false);
        Ok(())
    }

    fn encode_bind_value(
        &self,
        ty: &SpatialType,
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
                let e = if e.srid() == crate::elements::NO_SRID {
                    e.with_srid(ty.srid)
                } else {
                    e
                };
                let wkt = bridge.wkb_to_wkt(&e)?;
                Ok(BindValue::Text(format!("SRID={};{}", e.srid(), wkt)))
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
        conn.query_scalar(&format!(
            "SELECT gpkgAddSpatialIndex('{}', '{}')",
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
        for suffix in ["", "_node", "_parent", "_rowid"] {
            conn.execute(&format!(
                "DROP TABLE IF EXISTS rtree_{}_{}{}",
                table.name, column_name, suffix
            ))
            .await?;
        }
        conn.execute(&format!(
            "DELETE FROM gpkg_extensions \
             WHERE LOWER(table_name) = LOWER('{}') AND column_name = '{}' \
             AND extension_name = 'gpkg_rtree_index'",
            table.name, column_name
        ))
        .await?;
        Ok(())
    }
}
