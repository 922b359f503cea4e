//! Connection-URL options.
//!
//! Spatial backends take a few knobs at connect time (SpatiaLite
//! metadata initialization, MySQL parameter conversion). They ride on
//! the connection URL as `geoddl_*` query parameters and are consumed
//! here, leaving a clean URL for the driver.

use serde::{Deserialize, Serialize};

use crate::error::{GeoDdlError, Result};

/// Which SRID set `InitSpatialMetaData` loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitMode {
    /// Only the WGS84 SRIDs. Much faster than the full EPSG set.
    Wgs84,
    /// No SRID at all.
    Empty,
}

impl InitMode {
    pub fn from_name(name: &str) -> Result<InitMode> {
        match name.to_uppercase().as_str() {
            "WGS84" => Ok(InitMode::Wgs84),
            "EMPTY" => Ok(InitMode::Empty),
            _ => Err(GeoDdlError::Config(format!(
                "invalid init mode {name:?}, expected WGS84 or EMPTY"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InitMode::Wgs84 => "WGS84",
            InitMode::Empty => "EMPTY",
        }
    }
}

/// SQLite journal modes accepted for the metadata initialization step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    Wal,
    Off,
}

impl JournalMode {
    pub fn from_name(name: &str) -> Result<JournalMode> {
        match name.to_uppercase().as_str() {
            "DELETE" => Ok(JournalMode::Delete),
            "TRUNCATE" => Ok(JournalMode::Truncate),
            "PERSIST" => Ok(JournalMode::Persist),
            "MEMORY" => Ok(JournalMode::Memory),
            "WAL" => Ok(JournalMode::Wal),
            "OFF" => Ok(JournalMode::Off),
            _ => Err(GeoDdlError::Config(format!(
                "invalid journal mode {name:?}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Persist => "PERSIST",
            JournalMode::Memory => "MEMORY",
            JournalMode::Wal => "WAL",
            JournalMode::Off => "OFF",
        }
    }
}

/// Options for [`init_spatialite`](crate::dialects::sqlite::init_spatialite).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialiteInitOptions {
    /// Wrap `InitSpatialMetaData` in a single transaction.
    pub transaction: bool,
    pub init_mode: Option<InitMode>,
    /// Temporary journal mode while the metadata tables are created;
    /// the previous mode is restored afterwards.
    pub journal_mode: Option<JournalMode>,
}

/// All per-connection options carried by `geoddl_*` URL parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    pub sqlite: SpatialiteInitOptions,
    /// MySQL: convert memoryview-like binary parameters before execute.
    pub mysql_convert: bool,
    pub mariadb_convert: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            sqlite: SpatialiteInitOptions::default(),
            mysql_convert: true,
            mariadb_convert: true,
        }
    }
}

/// Strict boolean parser for URL parameters.
pub fn parse_bool(raw: &str) -> Result<bool> {
    match raw.to_lowercase().as_str() {
        "yes" | "y" | "true" | "t" | "1" | "enable" | "on" => Ok(true),
        "no" | "n" | "false" | "f" | "0" | "disable" | "off" => Ok(false),
        _ => Err(GeoDdlError::Config(format!(
            "invalid boolean value {raw:?}"
        ))),
    }
}

impl EngineOptions {
    /// Parse the `geoddl_*` query parameters out of a connection URL.
    ///
    /// Returns the options and the URL with those parameters removed;
    /// unrelated query parameters are kept as-is.
    pub fn from_url(url: &str) -> Result<(EngineOptions, String)> {
        let mut options = EngineOptions::default();
        let (base, query) = match url.split_once('?') {
            Some((base, query)) => (base, query),
            None => return Ok((options, url.to_string())),
        };

        let mut kept = Vec::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "geoddl_connect_sqlite_transaction" => {
                    options.sqlite.transaction = parse_bool(value)?;
                }
                "geoddl_connect_sqlite_init_mode" => {
                    options.sqlite.init_mode = Some(InitMode::from_name(value)?);
                }
                "geoddl_connect_sqlite_journal_mode" => {
                    options.sqlite.journal_mode = Some(JournalMode::from_name(value)?);
                }
                "geoddl_before_cursor_execute_mysql_convert" => {
                    options.mysql_convert = parse_bool(value)?;
                }
                "geoddl_before_cursor_execute_mariadb_convert" => {
                    options.mariadb_convert = parse_bool(value)?;
                }
                _ => kept.push(pair),
            }
        }

        let cleaned = if kept.is_empty() {
            base.to_string()
        } else {
            format!("{base}?{}", kept.join("&"))
        };
        Ok((options, cleaned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_accepted_spellings() {
        for raw in ["yes", "Y", "true", "T", "1", "enable", "ON"] {
            assert!(parse_bool(raw).unwrap(), "{raw}");
        }
        for raw in ["no", "N", "false", "F", "0", "disable", "OFF"] {
            assert!(!parse_bool(raw).unwrap(), "{raw}");
        }
        assert!(matches!(parse_bool("maybe"), Err(GeoDdlError::Config(_))));
        assert!(matches!(parse_bool(""), Err(GeoDdlError::Config(_))));
    }

    #[test]
    fn test_from_url_consumes_params() {
        let url = "sqlite:///tmp/test_db.sqlite?geoddl_connect_sqlite_init_mode=WGS84\
                   &geoddl_connect_sqlite_transaction=yes&mode=rwc";
        let (options, cleaned) = EngineOptions::from_url(url).unwrap();
        assert_eq!(options.sqlite.init_mode, Some(InitMode::Wgs84));
        assert!(options.sqlite.transaction);
        assert_eq!(cleaned, "sqlite:///tmp/test_db.sqlite?mode=rwc");
    }

    #[test]
    fn test_from_url_without_query() {
        let (options, cleaned) = EngineOptions::from_url("postgresql://gis@localhost/gis").unwrap();
        assert_eq!(options, EngineOptions::default());
        assert_eq!(cleaned, "postgresql://gis@localhost/gis");
    }

    #[test]
    fn test_from_url_strips_empty_query() {
        let (options, cleaned) = EngineOptions::from_url(
            "mysql://gis@localhost/gis?geoddl_before_cursor_execute_mysql_convert=off",
        )
        .unwrap();
        assert!(!options.mysql_convert);
        assert!(options.mariadb_convert);
        assert_eq!(cleaned, "mysql://gis@localhost/gis");
    }

    #[test]
    fn test_from_url_rejects_bad_values() {
        assert!(EngineOptions::from_url(
            "sqlite://db?geoddl_connect_sqlite_journal_mode=SOMETIMES"
        )
        .is_err());
        assert!(
            EngineOptions::from_url("sqlite://db?geoddl_connect_sqlite_transaction=maybe").is_err()
        );
    }

    #[test]
    fn test_journal_mode_round_trip() {
        for mode in [
            JournalMode::Delete,
            JournalMode::Truncate,
            JournalMode::Persist,
            JournalMode::Memory,
            JournalMode::Wal,
            JournalMode::Off,
        ] {
            assert_eq!(JournalMode::from_name(mode.as_str()).unwrap(), mode);
        }
    }
}
