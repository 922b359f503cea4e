//! Spatial value wrappers: WKT/EWKT, WKB/EWKB and raster payloads.
//!
//! Values read from a database are wrapped in these types, and bind
//! parameters are encoded from them. The extended formats (EWKT/EWKB)
//! carry the SRID inside the payload; the plain formats do not.
//!
//! EWKB layout (see the PostGIS ZMSgeoms notes):
//!
//! ```text
//! byte    byteOrder;   // 0 = big endian, 1 = little endian
//! uint32  wkbType;     // bit 0x20000000 set when an SRID word follows
//! uint32  SRID;        // only present in the extended format
//! ...     geometry;
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GeoDdlError, Result};

/// SRID presence bit in the EWKB type word.
pub const EWKB_SRID_FLAG: u32 = 0x2000_0000;

/// SRID value meaning "no/unknown spatial reference system".
pub const NO_SRID: i32 = -1;

fn srid_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^SRID=([0-9]+); ?").unwrap())
}

/// WKB payload storage.
///
/// SpatiaLite returns geometry as hex text while other backends return
/// raw bytes; both forms are kept as-is so the value round-trips
/// without re-encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WkbData {
    /// Raw binary payload.
    Bytes(Vec<u8>),
    /// Hex-encoded payload (SpatiaLite convention).
    Hex(String),
}

impl WkbData {
    /// Decoded header prefix: at most the first `n` bytes of the payload.
    fn header_prefix(&self, n: usize) -> Result<Vec<u8>> {
        match self {
            WkbData::Bytes(b) => Ok(b[..b.len().min(n)].to_vec()),
            WkbData::Hex(s) => {
                let end = s.len().min(n * 2);
                let head = s
                    .get(..end)
                    .ok_or_else(|| GeoDdlError::decode("non-ASCII character in hex WKB"))?;
                hex::decode(head)
                    .map_err(|e| GeoDdlError::decode(format!("invalid hex WKB header: {e}")))
            }
        }
    }
}

struct WkbHeader {
    little_endian: bool,
    type_word: u32,
    srid: Option<u32>,
}

fn parse_wkb_header(data: &WkbData) -> Result<WkbHeader> {
    let head = data.header_prefix(9)?;
    if head.is_empty() {
        return Err(GeoDdlError::decode("empty WKB payload"));
    }
    let little_endian = head[0] != 0;
    let word = |range: std::ops::Range<usize>| -> Option<u32> {
        let bytes: [u8; 4] = head.get(range)?.try_into().ok()?;
        Some(if little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    };
    Ok(WkbHeader {
        little_endian,
        type_word: word(1..5).unwrap_or(0),
        srid: word(5..9),
    })
}

fn encode_word(value: u32, little_endian: bool) -> [u8; 4] {
    if little_endian {
        value.to_le_bytes()
    } else {
        value.to_be_bytes()
    }
}

/// A WKB or EWKB geometry value.
///
/// If `extended` is left unspecified at construction time it is detected
/// from the SRID bit of the type word, and an unspecified SRID is read
/// from the EWKB header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WkbElement {
    data: WkbData,
    srid: i32,
    extended: bool,
}

impl WkbElement {
    /// Wrap a WKB payload, reading SRID and extendedness from the header
    /// where they are not given.
    pub fn new(data: WkbData, srid: i32, extended: Option<bool>) -> Result<Self> {
        let mut srid = srid;
        let extended = if srid == NO_SRID || extended != Some(false) {
            let header = parse_wkb_header(&data)?;
            let extended = match extended {
                Some(e) => e,
                None => header.type_word != 0 && header.type_word & EWKB_SRID_FLAG != 0,
            };
            if extended && srid == NO_SRID {
                let word = header.srid.ok_or_else(|| {
                    GeoDdlError::decode("EWKB payload too short to carry an SRID")
                })?;
                srid = word as i32;
            }
            extended
        } else {
            false
        };
        Ok(WkbElement {
            data,
            srid,
            extended,
        })
    }

    /// Wrap a raw binary payload.
    pub fn from_bytes(bytes: Vec<u8>, srid: i32, extended: Option<bool>) -> Result<Self> {
        Self::new(WkbData::Bytes(bytes), srid, extended)
    }

    /// Wrap a hex-encoded payload.
    pub fn from_hex(hex: impl Into<String>, srid: i32, extended: Option<bool>) -> Result<Self> {
        Self::new(WkbData::Hex(hex.into()), srid, extended)
    }

    pub fn srid(&self) -> i32 {
        self.srid
    }

    /// Re-tag a plain value with a different SRID. The payload is not
    /// touched; extended values keep theirs.
    pub fn with_srid(mut self, srid: i32) -> Self {
        if !self.extended {
            self.srid = srid;
        }
        self
    }

    pub fn extended(&self) -> bool {
        self.extended
    }

    pub fn data(&self) -> &WkbData {
        &self.data
    }

    /// Lowercase hex description of the payload.
    pub fn desc(&self) -> String {
        match &self.data {
            WkbData::Bytes(b) => hex::encode(b),
            WkbData::Hex(s) => s.to_lowercase(),
        }
    }

    /// Plain-WKB view: the SRID bit is cleared and the SRID word removed.
    /// The wrapper keeps its `srid` field either way.
    pub fn as_wkb(&self) -> Result<WkbElement> {
        if !self.extended {
            return Ok(self.clone());
        }
        let header = parse_wkb_header(&self.data)?;
        let type_word = header.type_word & !EWKB_SRID_FLAG;
        let type_bytes = encode_word(type_word, header.little_endian);
        let data = match &self.data {
            WkbData::Hex(s) => {
                let rest = s.get(18..).unwrap_or("");
                WkbData::Hex(format!("{}{}{}", &s[..2], hex::encode(type_bytes), rest))
            }
            WkbData::Bytes(b) => {
                let mut out = Vec::with_capacity(b.len().saturating_sub(4));
                out.push(b[0]);
                out.extend_from_slice(&type_bytes);
                out.extend_from_slice(b.get(9..).unwrap_or(&[]));
                WkbData::Bytes(out)
            }
        };
        Ok(WkbElement {
            data,
            srid: self.srid,
            extended: false,
        })
    }

    /// Extended-WKB view: the SRID bit is set and the wrapper's SRID is
    /// spliced into the payload. A value without an SRID is returned
    /// unchanged.
    pub fn as_ewkb(&self) -> Result<WkbElement> {
        if self.extended || self.srid == NO_SRID {
            return Ok(self.clone());
        }
        let header = parse_wkb_header(&self.data)?;
        let type_word = header.type_word | EWKB_SRID_FLAG;
        let type_bytes = encode_word(type_word, header.little_endian);
        let srid_bytes = encode_word(self.srid as u32, header.little_endian);
        let data = match &self.data {
            WkbData::Hex(s) => {
                let rest = s.get(10..).unwrap_or("");
                WkbData::Hex(format!(
                    "{}{}{}{}",
                    &s[..2],
                    hex::encode(type_bytes),
                    hex::encode(srid_bytes),
                    rest
                ))
            }
            WkbData::Bytes(b) => {
                let mut out = Vec::with_capacity(b.len() + 4);
                out.push(b[0]);
                out.extend_from_slice(&type_bytes);
                out.extend_from_slice(&srid_bytes);
                out.extend_from_slice(b.get(5..).unwrap_or(&[]));
                WkbData::Bytes(out)
            }
        };
        Ok(WkbElement {
            data,
            srid: self.srid,
            extended: true,
        })
    }
}

impl PartialEq for WkbElement {
    fn eq(&self, other: &Self) -> bool {
        self.extended == other.extended && self.srid == other.srid && self.desc() == other.desc()
    }
}

impl Eq for WkbElement {}

impl Hash for WkbElement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.desc().hash(state);
        self.srid.hash(state);
        self.extended.hash(state);
    }
}

impl fmt::Display for WkbElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.desc())
    }
}

/// A WKT or EWKT geometry value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WktElement {
    data: String,
    srid: i32,
    extended: bool,
}

impl WktElement {
    /// Wrap a WKT or EWKT string. Extendedness defaults to whether the
    /// string starts with `SRID=`; an unspecified SRID is read from the
    /// EWKT prefix.
    pub fn new(data: impl Into<String>, srid: i32, extended: Option<bool>) -> Result<Self> {
        let data = data.into();
        let extended = extended.unwrap_or_else(|| data.starts_with("SRID="));
        let mut srid = srid;
        if extended && srid == NO_SRID {
            let mut parts = data.splitn(2, ';');
            let header = parts.next().unwrap_or("");
            let body = parts.next();
            let parsed = header
                .strip_prefix("SRID=")
                .and_then(|s| s.parse::<i32>().ok());
            srid = match (parsed, body) {
                (Some(srid), Some(_)) => srid,
                _ => {
                    return Err(GeoDdlError::decode(format!("invalid EWKT string {data}")));
                }
            };
        }
        Ok(WktElement {
            data,
            srid,
            extended,
        })
    }

    pub fn srid(&self) -> i32 {
        self.srid
    }

    /// Re-tag a plain value with a different SRID. The payload is not
    /// touched; extended values keep theirs.
    pub fn with_srid(mut self, srid: i32) -> Self {
        if !self.extended {
            self.srid = srid;
        }
        self
    }

    pub fn extended(&self) -> bool {
        self.extended
    }

    /// The wrapped WKT/EWKT string.
    pub fn desc(&self) -> &str {
        &self.data
    }

    /// Plain-WKT view with the `SRID=n;` prefix stripped. The wrapper
    /// keeps its `srid` field either way.
    pub fn as_wkt(&self) -> WktElement {
        if self.extended {
            let body = srid_prefix_re().replace(&self.data, "");
            return WktElement {
                data: body.into_owned(),
                srid: self.srid,
                extended: false,
            };
        }
        self.clone()
    }

    /// Extended-WKT view with an `SRID=n;` prefix. A value without an
    /// SRID is returned unchanged.
    pub fn as_ewkt(&self) -> WktElement {
        if !self.extended && self.srid != NO_SRID {
            return WktElement {
                data: format!("SRID={};{}", self.srid, self.data),
                srid: self.srid,
                extended: true,
            };
        }
        self.clone()
    }
}

impl PartialEq for WktElement {
    fn eq(&self, other: &Self) -> bool {
        self.extended == other.extended && self.srid == other.srid && self.data == other.data
    }
}

impl Eq for WktElement {}

impl Hash for WktElement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.data.hash(state);
        self.srid.hash(state);
        self.extended.hash(state);
    }
}

impl fmt::Display for WktElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.data)
    }
}

/// A PostGIS `raster` value, stored as hex text.
///
/// The SRID lives at byte offset 53 of the binary form, in the
/// endianness named by byte 0 (RFC2-WellKnownBinaryFormat in the
/// PostGIS sources). Raster values are always extended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterElement {
    data: String,
    srid: i32,
}

impl RasterElement {
    /// Wrap a hex-encoded raster payload, reading the SRID from its header.
    pub fn from_hex(data: impl Into<String>) -> Result<Self> {
        let data = data.into();
        let end = data.len().min(114);
        let head = data
            .get(..end)
            .ok_or_else(|| GeoDdlError::decode("non-ASCII character in hex raster"))?;
        let bin = hex::decode(head)
            .map_err(|e| GeoDdlError::decode(format!("invalid hex raster header: {e}")))?;
        let srid = Self::srid_from_binary(&bin)?;
        Ok(RasterElement { data, srid })
    }

    /// Wrap a binary raster payload; it is kept as hex text.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let srid = Self::srid_from_binary(data)?;
        Ok(RasterElement {
            data: hex::encode(data),
            srid,
        })
    }

    fn srid_from_binary(bin: &[u8]) -> Result<i32> {
        let bytes: [u8; 4] = bin
            .get(53..57)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| GeoDdlError::decode("raster payload too short to carry an SRID"))?;
        let srid = if bin[0] != 0 {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        };
        Ok(srid as i32)
    }

    pub fn srid(&self) -> i32 {
        self.srid
    }

    /// Raster values always carry their SRID in-band.
    pub fn extended(&self) -> bool {
        true
    }

    /// Hex description of the payload.
    pub fn desc(&self) -> &str {
        &self.data
    }
}

impl PartialEq for RasterElement {
    fn eq(&self, other: &Self) -> bool {
        self.srid == other.srid && self.data == other.data
    }
}

impl Eq for RasterElement {}

impl Hash for RasterElement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.data.hash(state);
        self.srid.hash(state);
    }
}

impl fmt::Display for RasterElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.data)
    }
}

/// Any spatial value read from or bound to the database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpatialValue {
    Wkt(WktElement),
    Wkb(WkbElement),
    Raster(RasterElement),
}

impl SpatialValue {
    pub fn srid(&self) -> i32 {
        match self {
            SpatialValue::Wkt(e) => e.srid(),
            SpatialValue::Wkb(e) => e.srid(),
            SpatialValue::Raster(e) => e.srid(),
        }
    }

    pub fn desc(&self) -> String {
        match self {
            SpatialValue::Wkt(e) => e.desc().to_string(),
            SpatialValue::Wkb(e) => e.desc(),
            SpatialValue::Raster(e) => e.desc().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // POINT(1 2), little endian, SRID=4326, with the SRID flag set.
    const EWKB_POINT_HEX: &str = "0101000020e6100000000000000000f03f0000000000000040";
    // Same point without the SRID word.
    const WKB_POINT_HEX: &str = "0101000000000000000000f03f0000000000000040";

    fn ewkb_point_bytes() -> Vec<u8> {
        hex::decode(EWKB_POINT_HEX).unwrap()
    }

    #[test]
    fn test_wkt_plain() {
        let e = WktElement::new("POINT(5 45)", 4326, None).unwrap();
        assert!(!e.extended());
        assert_eq!(e.srid(), 4326);
        assert_eq!(e.desc(), "POINT(5 45)");
    }

    #[test]
    fn test_wkt_detects_ewkt_prefix() {
        let e = WktElement::new("SRID=4326;POINT(5 45)", -1, None).unwrap();
        assert!(e.extended());
        assert_eq!(e.srid(), 4326);
    }

    #[test]
    fn test_wkt_invalid_ewkt() {
        let err = WktElement::new("SRID=4326 POINT(5 45)", -1, Some(true)).unwrap_err();
        assert!(matches!(err, GeoDdlError::Decode(_)));
        let err = WktElement::new("SRID=abc;POINT(5 45)", -1, Some(true)).unwrap_err();
        assert!(matches!(err, GeoDdlError::Decode(_)));
    }

    #[test]
    fn test_wkt_as_wkt_strips_prefix() {
        let e = WktElement::new("SRID=4326;POINT(5 45)", -1, None).unwrap();
        let plain = e.as_wkt();
        assert!(!plain.extended());
        assert_eq!(plain.desc(), "POINT(5 45)");
        assert_eq!(plain.srid(), 4326);
    }

    #[test]
    fn test_wkt_as_ewkt_adds_prefix() {
        let e = WktElement::new("POINT(5 45)", 4326, None).unwrap();
        let ext = e.as_ewkt();
        assert!(ext.extended());
        assert_eq!(ext.desc(), "SRID=4326;POINT(5 45)");
        // No SRID means nothing to add.
        let bare = WktElement::new("POINT(5 45)", -1, None).unwrap();
        assert_eq!(bare.as_ewkt(), bare);
    }

    #[test]
    fn test_wkb_reads_srid_from_header() {
        let e = WkbElement::from_bytes(ewkb_point_bytes(), -1, None).unwrap();
        assert!(e.extended());
        assert_eq!(e.srid(), 4326);
        assert_eq!(e.desc(), EWKB_POINT_HEX);
    }

    #[test]
    fn test_wkb_hex_reads_srid_from_header() {
        let e = WkbElement::from_hex(EWKB_POINT_HEX, -1, None).unwrap();
        assert!(e.extended());
        assert_eq!(e.srid(), 4326);
    }

    #[test]
    fn test_wkb_plain_not_extended() {
        let e = WkbElement::from_hex(WKB_POINT_HEX, 4326, None).unwrap();
        assert!(!e.extended());
        assert_eq!(e.srid(), 4326);
    }

    #[test]
    fn test_wkb_as_wkb_removes_srid_word() {
        let e = WkbElement::from_bytes(ewkb_point_bytes(), -1, None).unwrap();
        let plain = e.as_wkb().unwrap();
        assert!(!plain.extended());
        assert_eq!(plain.desc(), WKB_POINT_HEX);
        assert_eq!(plain.srid(), 4326);
    }

    #[test]
    fn test_wkb_as_ewkb_inserts_srid_word() {
        let e = WkbElement::from_hex(WKB_POINT_HEX, 4326, None).unwrap();
        let ext = e.as_ewkb().unwrap();
        assert!(ext.extended());
        assert_eq!(ext.desc(), EWKB_POINT_HEX);
    }

    #[test]
    fn test_wkb_hex_round_trip() {
        let e = WkbElement::from_hex(EWKB_POINT_HEX, -1, None).unwrap();
        let back = e.as_wkb().unwrap().as_ewkb().unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_wkb_equality_ignores_storage_form() {
        let a = WkbElement::from_bytes(ewkb_point_bytes(), -1, None).unwrap();
        let b = WkbElement::from_hex(EWKB_POINT_HEX.to_uppercase(), -1, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wkb_truncated_payload() {
        let err = WkbElement::from_bytes(vec![0x01, 0x01, 0x00, 0x00, 0x20], -1, Some(true))
            .unwrap_err();
        assert!(matches!(err, GeoDdlError::Decode(_)));
        let err = WkbElement::from_bytes(Vec::new(), -1, None).unwrap_err();
        assert!(matches!(err, GeoDdlError::Decode(_)));
    }

    #[test]
    fn test_raster_srid() {
        // Minimal header: version 0, littleEndian, srid at bytes 53..57.
        let mut raster = vec![0u8; 61];
        raster[0] = 1;
        raster[53..57].copy_from_slice(&3857u32.to_le_bytes());
        let e = RasterElement::from_bytes(&raster).unwrap();
        assert_eq!(e.srid(), 3857);
        assert!(e.extended());

        let from_hex = RasterElement::from_hex(hex::encode(&raster)).unwrap();
        assert_eq!(from_hex, e);
    }

    #[test]
    fn test_raster_truncated() {
        let err = RasterElement::from_bytes(&[1u8; 10]).unwrap_err();
        assert!(matches!(err, GeoDdlError::Decode(_)));
    }
}
