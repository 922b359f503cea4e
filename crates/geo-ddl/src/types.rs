//! Spatial column type descriptors.
//!
//! [`SpatialType`] describes a geometry, geography or raster column:
//! its geometry kind, SRID, dimension and index/registration options.
//! Descriptors are built through [`SpatialType::geometry`],
//! [`SpatialType::geography`] and [`SpatialType::raster`], which
//! validate argument combinations before any SQL is emitted.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::connection::SqlScalar;
use crate::dialects::DialectKind;
use crate::elements::{RasterElement, SpatialValue, WkbData, WkbElement, NO_SRID};
use crate::error::{GeoDdlError, Result};

/// Well-known geometry kind names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    Geometry,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
    Curve,
}

impl GeometryKind {
    /// Uppercase SQL spelling of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryKind::Geometry => "GEOMETRY",
            GeometryKind::Point => "POINT",
            GeometryKind::LineString => "LINESTRING",
            GeometryKind::Polygon => "POLYGON",
            GeometryKind::MultiPoint => "MULTIPOINT",
            GeometryKind::MultiLineString => "MULTILINESTRING",
            GeometryKind::MultiPolygon => "MULTIPOLYGON",
            GeometryKind::GeometryCollection => "GEOMETRYCOLLECTION",
            GeometryKind::Curve => "CURVE",
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three spatial column families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpatialBase {
    Geometry,
    Geography,
    Raster,
}

impl SpatialBase {
    /// Default SQL type name in CREATE TABLE statements.
    pub fn type_name(&self) -> &'static str {
        match self {
            SpatialBase::Geometry => "geometry",
            SpatialBase::Geography => "geography",
            SpatialBase::Raster => "raster",
        }
    }

    fn default_from_text(&self) -> &'static str {
        match self {
            SpatialBase::Geometry => "ST_GeomFromEWKT",
            SpatialBase::Geography => "ST_GeogFromText",
            SpatialBase::Raster => "raster",
        }
    }

    fn default_as_binary(&self) -> &'static str {
        match self {
            SpatialBase::Geometry => "ST_AsEWKB",
            SpatialBase::Geography => "ST_AsBinary",
            SpatialBase::Raster => "raster",
        }
    }
}

/// Descriptor for a spatial column.
///
/// The `geometry_type` is kept as its uppercase SQL spelling (possibly
/// carrying a `Z`/`M`/`ZM` suffix); `None` means no geometry-kind
/// constraint is attached to the column declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialType {
    pub base: SpatialBase,
    pub geometry_type: Option<String>,
    pub srid: i32,
    pub dimension: Option<u8>,
    pub spatial_index: bool,
    pub use_nd_index: bool,
    /// PostGIS-only: `Some(false)` asks for check-constraint management
    /// through `AddGeometryColumn` instead of type modifiers.
    pub use_typmod: Option<bool>,
    pub nullable: bool,
    /// Override for the "from text" conversion function.
    pub from_text: Option<String>,
    /// Override for the SQL type name.
    pub type_name: Option<String>,
    /// Set during reflection once index presence has been looked up.
    pub spatial_index_reflected: Option<bool>,
}

impl SpatialType {
    /// Start building a geometry column descriptor.
    pub fn geometry() -> SpatialTypeBuilder {
        SpatialTypeBuilder::new(SpatialBase::Geometry)
    }

    /// Start building a geography column descriptor.
    pub fn geography() -> SpatialTypeBuilder {
        SpatialTypeBuilder::new(SpatialBase::Geography)
    }

    /// Start building a raster column descriptor.
    pub fn raster() -> SpatialTypeBuilder {
        SpatialTypeBuilder::new(SpatialBase::Raster)
    }

    /// SQL type name for this column.
    pub fn type_name(&self) -> &str {
        self.type_name
            .as_deref()
            .unwrap_or_else(|| self.base.type_name())
    }

    /// Name of the "from text" conversion function.
    pub fn from_text_fn(&self) -> &str {
        self.from_text
            .as_deref()
            .unwrap_or_else(|| self.base.default_from_text())
    }

    /// Name of the "as binary" conversion function.
    pub fn as_binary_fn(&self) -> &str {
        self.base.default_as_binary()
    }

    /// Whether values of this type travel in the extended (SRID-carrying)
    /// format. `None` for raster, which has no plain form.
    pub fn extended(&self) -> Option<bool> {
        match self.base {
            SpatialBase::Raster => None,
            _ => Some(self.as_binary_fn() == "ST_AsEWKB"),
        }
    }

    /// Column specification for CREATE TABLE on typmod-style backends,
    /// e.g. `geometry(POINT,4326)`.
    pub fn col_spec(&self) -> String {
        match &self.geometry_type {
            Some(kind) => format!("{}({},{})", self.type_name(), kind, self.srid),
            None => self.type_name().to_string(),
        }
    }

    /// Column specification used where only the bare kind is declared
    /// (SQLite and GeoPackage dummy rendering).
    pub fn dummy_col_spec(&self) -> String {
        self.geometry_type
            .clone()
            .unwrap_or_else(|| "GEOMETRY".to_string())
    }

    /// Column specification for the MySQL family. Nullability and SRID
    /// ride along with the type there.
    pub fn mysql_col_spec(&self, kind: DialectKind) -> String {
        let mut spec = self.dummy_col_spec();
        if !self.nullable || self.spatial_index {
            spec.push_str(" NOT NULL");
        }
        if self.srid > 0 && kind != DialectKind::Mariadb {
            spec.push_str(&format!(" SRID {}", self.srid));
        }
        spec
    }

    /// SELECT-list expression reading this column back as a spatial
    /// element, e.g. `ST_AsEWKB("geom")`. Function names are rewritten
    /// to the backend's spelling.
    pub fn column_read_expression(&self, column: &str, dialect: DialectKind) -> String {
        let func = match self.as_binary_fn() {
            "ST_AsEWKB" if dialect.is_sqlite_family() => "AsEWKB",
            "ST_AsBinary" if dialect.is_sqlite_family() => "AsBinary",
            "ST_AsEWKB" if dialect.is_mysql_family() => "ST_AsBinary",
            other => other,
        };
        format!("{func}({column})")
    }

    /// Bind-parameter expression writing a value into this column,
    /// e.g. `ST_GeomFromEWKT(?)`. The MySQL family takes the SRID as a
    /// second argument instead of an EWKT prefix.
    pub fn column_write_expression(&self, dialect: DialectKind) -> String {
        if dialect.is_mysql_family() {
            let func = match self.from_text_fn() {
                "ST_GeomFromEWKT" => "ST_GeomFromText",
                "ST_GeomFromEWKB" => "ST_GeomFromWKB",
                other => other,
            };
            if self.srid > 0 {
                return format!("{func}(?, {})", self.srid);
            }
            return format!("{func}(?)");
        }
        let func = match self.from_text_fn() {
            "ST_GeomFromEWKT" if dialect.is_sqlite_family() => "GeomFromEWKT",
            "ST_GeomFromEWKB" if dialect.is_sqlite_family() => "GeomFromEWKB",
            other => other,
        };
        format!("{func}(?)")
    }

    /// Parse a typmod-style column specification back into a descriptor,
    /// e.g. `geometry(POINT,4326)` or a bare `raster`.
    pub fn parse_col_spec(spec: &str) -> Result<SpatialType> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"^(?i)(geometry|geography|raster)(?:\(([A-Za-z]+),\s*(-?[0-9]+)\))?$")
                .unwrap()
        });
        let caps = re
            .captures(spec.trim())
            .ok_or_else(|| GeoDdlError::argument(format!("unparseable column spec {spec:?}")))?;
        let base = match caps[1].to_lowercase().as_str() {
            "geometry" => SpatialBase::Geometry,
            "geography" => SpatialBase::Geography,
            _ => SpatialBase::Raster,
        };
        let mut builder = SpatialTypeBuilder::new(base);
        match caps.get(2) {
            Some(kind) => {
                builder = builder.geometry_type_name(kind.as_str());
                if let Some(srid) = caps.get(3) {
                    let srid = srid
                        .as_str()
                        .parse::<i32>()
                        .map_err(|_| GeoDdlError::argument("srid must be an integer"))?;
                    builder = builder.srid(srid);
                }
            }
            None => builder = builder.no_geometry_type(),
        }
        builder.build()
    }

    /// Dimension code used by SpatiaLite and GeoPackage registration
    /// functions. A 3-D column with an `M` suffix is measured, not 3-D.
    pub fn dimension_code(&self) -> &'static str {
        match self.dimension {
            Some(4) => "XYZM",
            Some(3) => {
                let measured = self
                    .geometry_type
                    .as_deref()
                    .map(|t| t.ends_with('M'))
                    .unwrap_or(false);
                if measured {
                    "XYM"
                } else {
                    "XYZ"
                }
            }
            _ => "XY",
        }
    }

    /// Convert a raw value read from the database into a spatial element.
    ///
    /// Geometry and geography columns yield [`WkbElement`]; raster
    /// columns yield [`RasterElement`]. A configured column SRID takes
    /// precedence over whatever the payload carries. The MySQL family
    /// returns plain WKB, so extendedness is detected from the payload
    /// there.
    pub fn decode_result(
        &self,
        raw: Option<SqlScalar>,
        dialect: DialectKind,
    ) -> Result<Option<SpatialValue>> {
        let raw = match raw {
            None | Some(SqlScalar::Null) => return Ok(None),
            Some(raw) => raw,
        };
        if self.base == SpatialBase::Raster {
            let element = match raw {
                SqlScalar::Text(s) => RasterElement::from_hex(s)?,
                SqlScalar::Bytes(b) => RasterElement::from_bytes(&b)?,
                other => {
                    return Err(GeoDdlError::decode(format!(
                        "unexpected raster result value: {other:?}"
                    )));
                }
            };
            return Ok(Some(SpatialValue::Raster(element)));
        }
        let srid = if self.srid > 0 { self.srid } else { NO_SRID };
        let extended = if dialect.is_mysql_family() {
            None
        } else {
            self.extended()
        };
        let data = match raw {
            SqlScalar::Text(s) => WkbData::Hex(s),
            SqlScalar::Bytes(b) => WkbData::Bytes(b),
            other => {
                return Err(GeoDdlError::decode(format!(
                    "unexpected geometry result value: {other:?}"
                )));
            }
        };
        Ok(Some(SpatialValue::Wkb(WkbElement::new(
            data, srid, extended,
        )?)))
    }
}

/// Builder for [`SpatialType`]; [`SpatialTypeBuilder::build`] validates
/// argument combinations.
#[derive(Debug, Clone)]
pub struct SpatialTypeBuilder {
    base: SpatialBase,
    geometry_type: Option<String>,
    srid: i32,
    dimension: Option<u8>,
    spatial_index: bool,
    use_nd_index: bool,
    use_typmod: Option<bool>,
    nullable: bool,
    from_text: Option<String>,
    type_name: Option<String>,
}

impl SpatialTypeBuilder {
    fn new(base: SpatialBase) -> Self {
        SpatialTypeBuilder {
            base,
            geometry_type: Some("GEOMETRY".to_string()),
            srid: NO_SRID,
            dimension: None,
            spatial_index: true,
            use_nd_index: false,
            use_typmod: None,
            nullable: true,
            from_text: None,
            type_name: None,
        }
    }

    /// Constrain the column to a well-known geometry kind.
    pub fn geometry_type(self, kind: GeometryKind) -> Self {
        self.geometry_type_name(kind.as_str())
    }

    /// Constrain the column to a geometry kind given by name, possibly
    /// with a `Z`/`M`/`ZM` dimension suffix.
    pub fn geometry_type_name(mut self, name: impl Into<String>) -> Self {
        self.geometry_type = Some(name.into());
        self
    }

    /// Attach no geometry-kind constraint to the column declaration.
    pub fn no_geometry_type(mut self) -> Self {
        self.geometry_type = None;
        self
    }

    pub fn srid(mut self, srid: i32) -> Self {
        self.srid = srid;
        self
    }

    pub fn dimension(mut self, dimension: u8) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn spatial_index(mut self, spatial_index: bool) -> Self {
        self.spatial_index = spatial_index;
        self
    }

    pub fn use_nd_index(mut self, use_nd_index: bool) -> Self {
        self.use_nd_index = use_nd_index;
        self
    }

    pub fn use_typmod(mut self, use_typmod: bool) -> Self {
        self.use_typmod = Some(use_typmod);
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn from_text(mut self, from_text: impl Into<String>) -> Self {
        self.from_text = Some(from_text.into());
        self
    }

    pub fn type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Validate the collected arguments and produce the descriptor.
    pub fn build(self) -> Result<SpatialType> {
        if self.base == SpatialBase::Raster {
            // Raster columns have no kind, SRID constraint or typmod.
            return Ok(SpatialType {
                base: self.base,
                geometry_type: None,
                srid: NO_SRID,
                dimension: None,
                spatial_index: self.spatial_index,
                use_nd_index: false,
                use_typmod: Some(false),
                nullable: self.nullable,
                from_text: self.from_text,
                type_name: self.type_name,
                spatial_index_reflected: None,
            });
        }

        if self.use_typmod.is_some() && !self.nullable {
            return Err(GeoDdlError::argument(
                "the \"nullable\" and \"use_typmod\" arguments can not be used together",
            ));
        }
        if self.use_nd_index && !self.spatial_index {
            return Err(GeoDdlError::argument(
                "use_nd_index requires spatial_index",
            ));
        }
        if !matches!(self.dimension, None | Some(2) | Some(3) | Some(4)) {
            return Err(GeoDdlError::argument(format!(
                "dimension must be one of [2, 3, 4] but got {:?}",
                self.dimension
            )));
        }

        let geometry_type = self.geometry_type.map(|t| t.to_uppercase());
        let dimension = match &geometry_type {
            Some(kind) if kind.ends_with("ZM") => {
                if !matches!(self.dimension, None | Some(4)) {
                    return Err(GeoDdlError::argument(
                        "dimension must be 4 when the geometry type ends with 'ZM'",
                    ));
                }
                Some(4)
            }
            Some(kind) if kind.ends_with('Z') || kind.ends_with('M') => {
                if !matches!(self.dimension, None | Some(3)) {
                    return Err(GeoDdlError::argument(
                        "dimension must be 3 when the geometry type ends with 'Z' or 'M'",
                    ));
                }
                Some(3)
            }
            Some(_) => Some(self.dimension.unwrap_or(2)),
            None => {
                if self.srid > 0 {
                    tracing::warn!(srid = self.srid, "srid not enforced when geometry_type is unset");
                }
                self.dimension
            }
        };

        Ok(SpatialType {
            base: self.base,
            geometry_type,
            srid: self.srid,
            dimension,
            spatial_index: self.spatial_index,
            use_nd_index: self.use_nd_index,
            use_typmod: self.use_typmod,
            nullable: self.nullable,
            from_text: self.from_text,
            type_name: self.type_name,
            spatial_index_reflected: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_defaults() {
        let t = SpatialType::geometry().build().unwrap();
        assert_eq!(t.geometry_type.as_deref(), Some("GEOMETRY"));
        assert_eq!(t.srid, -1);
        assert_eq!(t.dimension, Some(2));
        assert!(t.spatial_index);
        assert_eq!(t.extended(), Some(true));
        assert_eq!(t.from_text_fn(), "ST_GeomFromEWKT");
        assert_eq!(t.as_binary_fn(), "ST_AsEWKB");
    }

    #[test]
    fn test_geography_defaults() {
        let t = SpatialType::geography()
            .geometry_type(GeometryKind::Point)
            .srid(4326)
            .build()
            .unwrap();
        assert_eq!(t.type_name(), "geography");
        assert_eq!(t.extended(), Some(false));
        assert_eq!(t.from_text_fn(), "ST_GeogFromText");
        assert_eq!(t.col_spec(), "geography(POINT,4326)");
    }

    #[test]
    fn test_raster_forces_defaults() {
        let t = SpatialType::raster().srid(4326).build().unwrap();
        assert_eq!(t.geometry_type, None);
        assert_eq!(t.srid, -1);
        assert_eq!(t.use_typmod, Some(false));
        assert_eq!(t.extended(), None);
        assert_eq!(t.col_spec(), "raster");
    }

    #[test]
    fn test_typmod_not_null_conflict() {
        let err = SpatialType::geometry()
            .use_typmod(true)
            .nullable(false)
            .build()
            .unwrap_err();
        assert!(matches!(err, GeoDdlError::Argument(_)));
    }

    #[test]
    fn test_nd_index_requires_spatial_index() {
        let err = SpatialType::geometry()
            .use_nd_index(true)
            .spatial_index(false)
            .build()
            .unwrap_err();
        assert!(matches!(err, GeoDdlError::Argument(_)));
    }

    #[test]
    fn test_dimension_from_suffix() {
        let t = SpatialType::geometry()
            .geometry_type_name("pointz")
            .build()
            .unwrap();
        assert_eq!(t.geometry_type.as_deref(), Some("POINTZ"));
        assert_eq!(t.dimension, Some(3));
        assert_eq!(t.dimension_code(), "XYZ");

        let t = SpatialType::geometry()
            .geometry_type_name("POINTZM")
            .build()
            .unwrap();
        assert_eq!(t.dimension, Some(4));
        assert_eq!(t.dimension_code(), "XYZM");

        let err = SpatialType::geometry()
            .geometry_type_name("POINTZM")
            .dimension(2)
            .build()
            .unwrap_err();
        assert!(matches!(err, GeoDdlError::Argument(_)));
    }

    #[test]
    fn test_invalid_dimension() {
        let err = SpatialType::geometry().dimension(5).build().unwrap_err();
        assert!(matches!(err, GeoDdlError::Argument(_)));
    }

    #[test]
    fn test_col_spec_round_trip() {
        for (kind, srid, dimension) in [
            (GeometryKind::Point, 4326, None),
            (GeometryKind::MultiPolygon, 3857, None),
            (GeometryKind::Geometry, -1, None),
            (GeometryKind::LineString, 2154, Some(2)),
        ] {
            let mut builder = SpatialType::geometry().geometry_type(kind).srid(srid);
            if let Some(d) = dimension {
                builder = builder.dimension(d);
            }
            let t = builder.build().unwrap();
            let parsed = SpatialType::parse_col_spec(&t.col_spec()).unwrap();
            assert_eq!(parsed.base, t.base);
            assert_eq!(parsed.geometry_type, t.geometry_type);
            assert_eq!(parsed.srid, t.srid);
        }
    }

    #[test]
    fn test_parse_col_spec_bare_names() {
        let t = SpatialType::parse_col_spec("raster").unwrap();
        assert_eq!(t.base, SpatialBase::Raster);
        let t = SpatialType::parse_col_spec("geometry").unwrap();
        assert_eq!(t.base, SpatialBase::Geometry);
        assert_eq!(t.geometry_type, None);
        assert!(SpatialType::parse_col_spec("integer").is_err());
    }

    #[test]
    fn test_mysql_col_spec() {
        let t = SpatialType::geometry()
            .geometry_type(GeometryKind::Point)
            .srid(4326)
            .build()
            .unwrap();
        assert_eq!(
            t.mysql_col_spec(DialectKind::Mysql),
            "POINT NOT NULL SRID 4326"
        );
        // MariaDB has no SRID clause.
        assert_eq!(t.mysql_col_spec(DialectKind::Mariadb), "POINT NOT NULL");

        let t = SpatialType::geometry()
            .geometry_type(GeometryKind::Point)
            .spatial_index(false)
            .build()
            .unwrap();
        assert_eq!(t.mysql_col_spec(DialectKind::Mysql), "POINT");
    }

    #[test]
    fn test_column_expressions_per_dialect() {
        let t = SpatialType::geometry().srid(4326).build().unwrap();
        assert_eq!(
            t.column_read_expression("geom", DialectKind::Postgres),
            "ST_AsEWKB(geom)"
        );
        assert_eq!(
            t.column_read_expression("geom", DialectKind::Sqlite),
            "AsEWKB(geom)"
        );
        assert_eq!(
            t.column_read_expression("geom", DialectKind::Mysql),
            "ST_AsBinary(geom)"
        );
        assert_eq!(
            t.column_write_expression(DialectKind::Postgres),
            "ST_GeomFromEWKT(?)"
        );
        assert_eq!(
            t.column_write_expression(DialectKind::Geopackage),
            "GeomFromEWKT(?)"
        );
        assert_eq!(
            t.column_write_expression(DialectKind::Mysql),
            "ST_GeomFromText(?, 4326)"
        );

        let g = SpatialType::geography().srid(4326).build().unwrap();
        assert_eq!(
            g.column_read_expression("geog", DialectKind::Postgres),
            "ST_AsBinary(geog)"
        );
        assert_eq!(
            g.column_write_expression(DialectKind::Postgres),
            "ST_GeogFromText(?)"
        );

        let r = SpatialType::raster().build().unwrap();
        assert_eq!(
            r.column_read_expression("rast", DialectKind::Postgres),
            "raster(rast)"
        );
        assert_eq!(
            r.column_write_expression(DialectKind::Postgres),
            "raster(?)"
        );
    }

    #[test]
    fn test_decode_result_null() {
        let t = SpatialType::geometry().build().unwrap();
        assert!(t
            .decode_result(Some(SqlScalar::Null), DialectKind::Postgres)
            .unwrap()
            .is_none());
        assert!(t.decode_result(None, DialectKind::Postgres).unwrap().is_none());
    }

    #[test]
    fn test_decode_result_wkb() {
        let t = SpatialType::geometry().srid(4326).build().unwrap();
        let hex = "0101000020e6100000000000000000f03f0000000000000040";
        let value = t
            .decode_result(Some(SqlScalar::Text(hex.to_string())), DialectKind::Postgres)
            .unwrap()
            .unwrap();
        match value {
            SpatialValue::Wkb(wkb) => {
                assert_eq!(wkb.srid(), 4326);
                assert!(wkb.extended());
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn test_decode_result_mysql_plain_wkb() {
        let t = SpatialType::geometry().srid(4326).build().unwrap();
        let bytes = hex::decode("0101000000000000000000f03f0000000000000040").unwrap();
        let value = t
            .decode_result(Some(SqlScalar::Bytes(bytes)), DialectKind::Mysql)
            .unwrap()
            .unwrap();
        match value {
            SpatialValue::Wkb(wkb) => {
                assert!(!wkb.extended());
                assert_eq!(wkb.srid(), 4326);
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn test_decode_result_raster() {
        let t = SpatialType::raster().build().unwrap();
        let mut raster = vec![0u8; 61];
        raster[0] = 1;
        raster[53..57].copy_from_slice(&4326u32.to_le_bytes());
        let value = t
            .decode_result(
                Some(SqlScalar::Text(hex::encode(&raster))),
                DialectKind::Postgres,
            )
            .unwrap()
            .unwrap();
        match value {
            SpatialValue::Raster(r) => assert_eq!(r.srid(), 4326),
            other => panic!("unexpected value: {other:?}"),
        }
    }
}
