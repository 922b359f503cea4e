//! Bridge to the geo ecosystem for WKB -> WKT demotion.
//!
//! Some backends (SpatiaLite without a binary entry point, GeoPackage)
//! only accept text geometry input, so binding a [`WkbElement`] there
//! requires converting it to WKT. That conversion needs a geometry
//! parser, which is an optional dependency: the default build ships an
//! [`UnavailableBridge`] that fails with an installation hint, and the
//! `geo-bridge` cargo feature swaps in a real implementation built on
//! the `wkb` and `wkt` crates.

use std::sync::Arc;

use crate::elements::WkbElement;
use crate::error::{GeoDdlError, Result};

/// Converts WKB payloads to WKT text.
///
/// Injected into the DDL orchestrator so tests and embedders can
/// substitute their own conversion.
pub trait GeometryBridge: Send + Sync {
    /// Render the geometry carried by `value` as plain WKT (no SRID prefix).
    fn wkb_to_wkt(&self, value: &WkbElement) -> Result<String>;
}

/// Bridge used when no geometry parser is compiled in. Every call fails
/// with a hint naming the cargo feature to enable.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBridge;

impl GeometryBridge for UnavailableBridge {
    fn wkb_to_wkt(&self, _value: &WkbElement) -> Result<String> {
        Err(GeoDdlError::missing_dependency(
            "geo-bridge",
            "binding WKB values on this backend requires WKT conversion; \
             enable the `geo-bridge` cargo feature of geo-ddl",
        ))
    }
}

/// Bridge backed by the `wkb` reader and the `wkt` writer.
#[cfg(feature = "geo-bridge")]
#[derive(Debug, Default, Clone, Copy)]
pub struct WkbWktBridge;

#[cfg(feature = "geo-bridge")]
impl GeometryBridge for WkbWktBridge {
    fn wkb_to_wkt(&self, value: &WkbElement) -> Result<String> {
        use crate::elements::WkbData;

        // The wkb reader takes ISO WKB, so demote the payload first.
        let plain = value.as_wkb()?;
        let bytes = match plain.data() {
            WkbData::Bytes(b) => b.clone(),
            WkbData::Hex(s) => hex::decode(s)
                .map_err(|e| GeoDdlError::decode(format!("invalid hex WKB payload: {e}")))?,
        };
        let geom = wkb::reader::read_wkb(&bytes)
            .map_err(|e| GeoDdlError::decode(format!("unreadable WKB payload: {e}")))?;
        let mut out = String::new();
        wkt::to_wkt::write_geometry(&mut out, &geom)
            .map_err(|e| GeoDdlError::decode(format!("WKT rendering failed: {e}")))?;
        Ok(out)
    }
}

/// The bridge a plain build gets: real conversion when the `geo-bridge`
/// feature is on, a hint-raising stub otherwise.
pub fn default_bridge() -> Arc<dyn GeometryBridge> {
    #[cfg(feature = "geo-bridge")]
    {
        Arc::new(WkbWktBridge)
    }
    #[cfg(not(feature = "geo-bridge"))]
    {
        Arc::new(UnavailableBridge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_bridge_names_feature() {
        let value =
            WkbElement::from_hex("0101000000000000000000f03f0000000000000040", 4326, None)
                .unwrap();
        let err = UnavailableBridge.wkb_to_wkt(&value).unwrap_err();
        match err {
            GeoDdlError::MissingDependency { name, hint } => {
                assert_eq!(name, "geo-bridge");
                assert!(hint.contains("geo-bridge"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(feature = "geo-bridge")]
    #[test]
    fn test_wkb_wkt_bridge_renders_point() {
        let value = WkbElement::from_hex(
            "0101000020e6100000000000000000f03f0000000000000040",
            -1,
            None,
        )
        .unwrap();
        let wkt = WkbWktBridge.wkb_to_wkt(&value).unwrap();
        assert!(wkt.starts_with("POINT"));
        assert!(!wkt.contains("SRID"));
    }
}
