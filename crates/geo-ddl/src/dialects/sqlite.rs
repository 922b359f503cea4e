//! SpatiaLite strategy.
//!
//! SQLite cannot declare a geometry column directly: the column is
//! created with a dummy `GEOMETRY` type and then registered with
//! `RecoverGeometryColumn`. All geometry columns are managed here.
//!
//! This module also carries the connection-time administration
//! helpers: loading the SpatiaLite extension (which requires the
//! `SPATIALITE_LIBRARY_PATH` environment variable) and initializing its
//! metadata tables.

use async_trait::async_trait;

use crate::config::SpatialiteInitOptions;
use crate::core::connection::{SpatialConnection, SqlScalar};
use crate::core::schema::{spatial_index_name, Column, ReflectedColumn, Table};
use crate::core::traits::{BindValue, DialectStrategy};
use crate::dialects::common::{close_ddl_scope, open_ddl_scope, StripMode};
use crate::dialects::DialectKind;
use crate::error::{GeoDdlError, Result};
use crate::shape::GeometryBridge;
use crate::types::{SpatialBase, SpatialType};

/// Load the SpatiaLite extension on a connection.
///
/// The module path is taken from the `SPATIALITE_LIBRARY_PATH`
/// environment variable.
pub async fn load_spatialite_driver(conn: &dyn SpatialConnection) -> Result<()> {
    let path = std::env::var("SPATIALITE_LIBRARY_PATH").map_err(|_| {
        GeoDdlError::Environment(
            "the SPATIALITE_LIBRARY_PATH environment variable is not set".to_string(),
        )
    })?;
    conn.execute(&format!("SELECT load_extension('{path}')"))
        .await?;
    Ok(())
}

/// Initialize the SpatiaLite metadata tables if they are missing.
///
/// `InitSpatialMetaData` can take minutes with the full EPSG set;
/// [`SpatialiteInitOptions`] controls transaction wrapping, the SRID
/// subset to load and a temporary journal mode. The original journal
/// mode is restored afterwards.
pub async fn init_spatialite(
    conn: &dyn SpatialConnection,
    options: &SpatialiteInitOptions,
) -> Result<()> {
    let already = conn
        .query_scalar("SELECT CheckSpatialMetaData();")
        .await?
        .and_then(|v| v.as_int())
        .unwrap_or(0);
    if already >= 1 {
        return Ok(());
    }

    let mut previous_journal = None;
    if let Some(mode) = options.journal_mode {
        previous_journal = conn
            .query_scalar("PRAGMA journal_mode")
            .await?
            .and_then(|v| v.as_text().map(str::to_string));
        conn.execute(&format!("PRAGMA journal_mode = {}", mode.as_str()))
            .await?;
    }

    let mut args = vec![if options.transaction { "1" } else { "0" }.to_string()];
    if let Some(init_mode) = options.init_mode {
        args.push(format!("'{}'", init_mode.as_str()));
    }
    conn.execute(&format!("SELECT InitSpatialMetaData({});", args.join(", ")))
        .await?;

    if let Some(previous) = previous_journal {
        conn.execute(&format!("PRAGMA journal_mode = {previous}"))
            .await?;
    }
    Ok(())
}

/// Load the SpatiaLite extension and initialize its metadata tables.
pub async fn load_spatialite(
    conn: &dyn SpatialConnection,
    options: &SpatialiteInitOptions,
) -> Result<()> {
    load_spatialite_driver(conn).await?;
    init_spatialite(conn, options).await
}

/// Version of the currently loaded SpatiaLite extension.
pub async fn get_spatialite_version(conn: &dyn SpatialConnection) -> Result<String> {
    let version = conn
        .query_scalar("SELECT spatialite_version();")
        .await?
        .and_then(|v| v.as_text().map(str::to_string))
        .ok_or_else(|| GeoDdlError::database("spatialite_version() returned nothing"))?;
    Ok(version)
}

/// Decode a SpatiaLite integer geometry code into a kind name with its
/// dimension suffix, e.g. `1001` -> `POINTZ`.
fn decode_geometry_code(code: i64) -> Result<String> {
    let code_str = code.to_string();
    let (has_z, has_m) = if code >= 1000 {
        let first = &code_str[..1];
        (first == "1" || first == "3", first == "2" || first == "3")
    } else {
        (false, false)
    };
    let base = match code_str.as_bytes()[code_str.len() - 1] - b'0' {
        0 => "GEOMETRY",
        1 => "POINT",
        2 => "LINESTRING",
        3 => "POLYGON",
        4 => "MULTIPOINT",
        5 => "MULTILINESTRING",
        6 => "MULTIPOLYGON",
        7 => "GEOMETRYCOLLECTION",
        other => {
            return Err(GeoDdlError::decode(format!(
                "unknown geometry code {code} (class digit {other})"
            )));
        }
    };
    let mut name = base.to_string();
    if has_z {
        name.push('Z');
    }
    if has_m {
        name.push('M');
    }
    Ok(name)
}

fn dimension_from_code(code: &str) -> Option<u8> {
    match code {
        "XY" => Some(2),
        "XYZ" | "XYM" => Some(3),
        "XYZM" => Some(4),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqliteStrategy;

impl SqliteStrategy {
    pub fn new() -> Self {
        SqliteStrategy
    }

    fn managed_column(&self, column: &Column) -> bool {
        column
            .spatial_type()
            .map(|t| self.is_managed(t))
            .unwrap_or(false)
    }
}

#[async_trait]
impl DialectStrategy for SqliteStrategy {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn is_managed(&self, ty: &SpatialType) -> bool {
        ty.base == SpatialBase::Geometry
    }

    async fn before_create(&self, table: &mut Table, _conn: &dyn SpatialConnection) -> Result<()> {
        open_ddl_scope(
            table,
            &|c: &Column| self.managed_column(c),
            StripMode::DummyGeneric,
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
                conn.query_scalar(&format!(
                    "SELECT RecoverGeometryColumn('{}', '{}', {}, '{}', '{}')",
                    table.name,
                    column.name,
                    ty.srid,
                    ty.geometry_type.as_deref().unwrap_or("GEOMETRY"),
                    ty.dimension_code(),
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
            StripMode::Remove,
        );
        for column in managed {
            self.drop_spatial_index(conn, table, &column.name).await?;
            conn.query_scalar(&format!(
                "SELECT DiscardGeometryColumn('{}', '{}')",
                table.name, column.name
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
                "SELECT geometry_type, coord_dimension, srid, spatial_index_enabled \
                 FROM geometry_columns \
                 WHERE LOWER(f_table_name) = LOWER('{}') \
                 AND LOWER(f_geometry_column) = LOWER('{}')",
                table.name, info.name
            ))
            .await?;
        // Columns not registered with SpatiaLite are left alone.
        let Some(row) = row else {
            return Ok(());
        };
        if row.len() < 4 {
            return Err(GeoDdlError::database(
                "geometry_columns row has too few fields",
            ));
        }

        let mut geometry_type = match &row[0] {
            SqlScalar::Int(code) => decode_geometry_code(*code)?,
            SqlScalar::Text(name) => name.clone(),
            other => {
                return Err(GeoDdlError::decode(format!(
                    "unexpected geometry_type value: {other:?}"
                )));
            }
        };
        let dimension = match &row[1] {
            SqlScalar::Int(d) => Some(*d as u8),
            SqlScalar::Text(code) => {
                // Older metadata stores the dimension as a code and the
                // kind without its suffix.
                let suffix: String = geometry_type
                    .chars()
                    .rev()
                    .take(2)
                    .collect::<String>()
                    .chars()
                    .rev()
                    .collect();
                if code.contains('Z') && !suffix.contains('Z') {
                    geometry_type.push('Z');
                }
                if code.contains('M') && !suffix.contains('M') {
                    geometry_type.push('M');
                }
                dimension_from_code(code)
            }
            _ => None,
        };

        spatial.geometry_type = Some(geometry_type);
        spatial.dimension = dimension;
        if let Some(srid) = row[2].as_int() {
            spatial.srid = srid as i32;
        }
        spatial.spatial_index = row[3].is_truthy();
        // SQLite does not reflect indexes into table metadata.
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
                // SpatiaLite has no binary entry point; go through WKT.
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
        // CreateSpatialIndex is not idempotent; probe first.
        let existing = conn
            .query_scalar(&format!(
                "SELECT CheckSpatialIndex('{}', '{}')",
                table.name, column.name
            ))
            .await?;
        if existing.map(|v| v.is_truthy()).unwrap_or(false) {
            return Ok(());
        }
        conn.query_scalar(&format!(
            "SELECT CreateSpatialIndex('{}', '{}')",
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
        let existing = conn
            .query_scalar(&format!(
                "SELECT CheckSpatialIndex('{}', '{}')",
                table.name, column_name
            ))
            .await?;
        if existing.is_none() || existing == Some(SqlScalar::Null) {
            return Ok(());
        }
        conn.query_scalar(&format!(
            "SELECT DisableSpatialIndex('{}', '{}')",
            table.name, column_name
        ))
        .await?;
        conn.execute(&format!(
            "DROP TABLE IF EXISTS {}",
            spatial_index_name(&table.name, column_name)
        ))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InitMode;
    use crate::core::connection::RecordingConnection;
    use crate::core::schema::ColumnType;
    use crate::elements::WktElement;
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
    async fn test_create_lifecycle_recovers_column() {
        let s = SqliteStrategy::new();
        let conn = RecordingConnection::new(DialectKind::Sqlite);
        let mut table = make_test_table();

        s.before_create(&mut table, &conn).await.unwrap();
        assert_eq!(
            table.columns[1].ty,
            ColumnType::Plain("GEOMETRY".to_string())
        );
        // CheckSpatialIndex probe answers "no index yet".
        conn.push_scalar(None);
        conn.push_scalar(None);
        s.after_create(&mut table, &conn).await.unwrap();
        assert!(table.columns[1].is_spatial());

        let stmts = conn.statements();
        assert_eq!(
            stmts[0],
            "SELECT RecoverGeometryColumn('lake', 'geom', 4326, 'POINT', 'XY')"
        );
        assert!(stmts.contains(&"SELECT CreateSpatialIndex('lake', 'geom')".to_string()));
    }

    #[tokio::test]
    async fn test_create_spatial_index_skips_existing() {
        let s = SqliteStrategy::new();
        let conn = RecordingConnection::new(DialectKind::Sqlite);
        let table = make_test_table();
        let column = table.column("geom").unwrap().clone();
        conn.push_scalar(Some(SqlScalar::Int(1)));
        s.create_spatial_index(&conn, &table, &column).await.unwrap();
        let stmts = conn.statements();
        assert_eq!(stmts, vec!["SELECT CheckSpatialIndex('lake', 'geom')"]);
    }

    #[tokio::test]
    async fn test_drop_lifecycle_discards_column() {
        let s = SqliteStrategy::new();
        let conn = RecordingConnection::new(DialectKind::Sqlite);
        let mut table = make_test_table();
        // Index exists; disable it before discarding.
        conn.push_scalar(Some(SqlScalar::Int(1)));
        conn.push_scalar(Some(SqlScalar::Int(1)));

        s.before_drop(&mut table, &conn).await.unwrap();
        let stmts = conn.statements();
        assert_eq!(
            stmts,
            vec![
                "SELECT CheckSpatialIndex('lake', 'geom')",
                "SELECT DisableSpatialIndex('lake', 'geom')",
                "DROP TABLE IF EXISTS idx_lake_geom",
                "SELECT DiscardGeometryColumn('lake', 'geom')",
            ]
        );
        s.after_drop(&mut table, &conn).await.unwrap();
        assert_eq!(table.columns.len(), 2);
    }

    #[tokio::test]
    async fn test_reflect_decodes_integer_geometry_code() {
        let s = SqliteStrategy::new();
        let conn = RecordingConnection::new(DialectKind::Sqlite);
        conn.push_row(Some(vec![
            SqlScalar::Int(1001),
            SqlScalar::Int(3),
            SqlScalar::Int(2154),
            SqlScalar::Int(1),
        ]));
        let table = Table::new("lake");
        let mut info = ReflectedColumn::new("geom", "geometry");
        info.spatial = Some(SpatialType::geometry().build().unwrap());
        s.reflect_column(&conn, &table, &mut info).await.unwrap();
        let spatial = info.spatial.unwrap();
        assert_eq!(spatial.geometry_type.as_deref(), Some("POINTZ"));
        assert_eq!(spatial.dimension, Some(3));
        assert_eq!(spatial.srid, 2154);
        assert!(spatial.spatial_index);
        assert_eq!(spatial.spatial_index_reflected, Some(false));
    }

    #[test]
    fn test_decode_geometry_codes() {
        assert_eq!(decode_geometry_code(0).unwrap(), "GEOMETRY");
        assert_eq!(decode_geometry_code(6).unwrap(), "MULTIPOLYGON");
        assert_eq!(decode_geometry_code(2002).unwrap(), "LINESTRINGM");
        assert_eq!(decode_geometry_code(3007).unwrap(), "GEOMETRYCOLLECTIONZM");
        assert!(decode_geometry_code(9).is_err());
    }

    #[test]
    fn test_encode_wkt() {
        let s = SqliteStrategy::new();
        let ty = SpatialType::geometry().srid(4326).build().unwrap();
        let out = s
            .encode_bind_value(
                &ty,
                BindValue::Wkt(WktElement::new("POINT(1 2)", 4326, None).unwrap()),
                &UnavailableBridge,
            )
            .unwrap();
        assert_eq!(out, BindValue::Text("SRID=4326;POINT(1 2)".to_string()));
    }

    #[tokio::test]
    async fn test_init_spatialite_skips_when_initialized() {
        let conn = RecordingConnection::new(DialectKind::Sqlite);
        conn.push_scalar(Some(SqlScalar::Int(3)));
        init_spatialite(&conn, &SpatialiteInitOptions::default())
            .await
            .unwrap();
        assert_eq!(conn.statements(), vec!["SELECT CheckSpatialMetaData();"]);
    }

    #[tokio::test]
    async fn test_init_spatialite_with_options() {
        let conn = RecordingConnection::new(DialectKind::Sqlite);
        conn.push_scalar(Some(SqlScalar::Int(0)));
        conn.push_scalar(Some(SqlScalar::Text("delete".to_string())));
        let options = SpatialiteInitOptions {
            transaction: true,
            init_mode: Some(InitMode::Wgs84),
            journal_mode: Some(crate::config::JournalMode::Memory),
        };
        init_spatialite(&conn, &options).await.unwrap();
        assert_eq!(
            conn.statements(),
            vec![
                "SELECT CheckSpatialMetaData();",
                "PRAGMA journal_mode",
                "PRAGMA journal_mode = MEMORY",
                "SELECT InitSpatialMetaData(1, 'WGS84');",
                "PRAGMA journal_mode = delete",
            ]
        );
    }

    #[tokio::test]
    async fn test_load_spatialite_driver_requires_env() {
        let conn = RecordingConnection::new(DialectKind::Sqlite);
        std::env::remove_var("SPATIALITE_LIBRARY_PATH");
        let err = load_spatialite_driver(&conn).await.unwrap_err();
        assert!(matches!(err, GeoDdlError::Environment(_)));
    }
}
