//! Measurement units known to the vendored meter library
//!
//! The table is read from the library's `units.h`. Its `LIST_OF_UNITS`
//! X-macro holds one `X(cname,lcname,hrname,quantity,explanation)` entry per
//! line, up to the first blank line. Only entries up to `bar` name units a
//! meter field can end with.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// File name of the unit list inside the component directory
pub const UNITS_HEADER: &str = "units.h";

const LIST_MARKER: &str = "LIST_OF_UNITS";
const LAST_UNIT: &str = "bar";

pub(crate) static NO_UNITS: UnitTable = UnitTable::empty();

#[derive(Error, Debug)]
pub enum UnitsError {
    #[error("Failed to read unit list {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("No LIST_OF_UNITS in {path}")]
    MissingList { path: PathBuf },
}

/// Lowercase unit names mapped to their human readable form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitTable {
    units: BTreeMap<String, String>,
}

impl UnitTable {
    pub const fn empty() -> Self {
        Self {
            units: BTreeMap::new(),
        }
    }

    /// Read the unit list from a `units.h` header
    pub fn load(path: &Path) -> Result<Self, UnitsError> {
        let content = std::fs::read_to_string(path).map_err(|source| UnitsError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::parse(&content).ok_or_else(|| UnitsError::MissingList {
            path: path.to_path_buf(),
        })?;
        info!(path = %path.display(), units = table.len(), "Loaded unit list");
        Ok(table)
    }

    /// Parse the `LIST_OF_UNITS` macro, `None` if the header has none
    pub fn parse(header: &str) -> Option<Self> {
        let mut lines = header.lines();
        lines.find(|line| line.contains(LIST_MARKER))?;

        let mut units = BTreeMap::new();
        for line in lines {
            if line.trim().is_empty() {
                break;
            }
            let entry = line.trim_matches(|c: char| c.is_whitespace() || c == '\\');
            let entry = entry.strip_prefix("X(").unwrap_or(entry);
            let entry = entry.strip_suffix(')').unwrap_or(entry);

            // Explanations containing commas are skipped
            let parts: Vec<&str> = entry.split(',').collect();
            let [_, name, readable, _, _] = parts.as_slice() else {
                continue;
            };
            let name = name.trim();
            units.insert(name.to_string(), readable.trim().trim_matches('"').to_string());
            if name == LAST_UNIT {
                break;
            }
        }
        Some(Self { units })
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Human readable form of `unit`
    ///
    /// Lookup is case-insensitive. Unknown units are returned as given and an
    /// empty unit becomes `?`.
    pub fn human_readable(&self, unit: &str) -> String {
        match self.units.get(&unit.to_lowercase()) {
            Some(readable) => readable.clone(),
            None if unit.is_empty() => "?".to_string(),
            None => unit.to_string(),
        }
    }

    /// Unit implied by a meter field name such as `total_m3`
    pub fn for_field(&self, field: &str) -> String {
        let suffix = field.rsplit('_').next().unwrap_or_default();
        self.human_readable(suffix)
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_HEADER: &str = r#"#ifndef UNITS_H
#define UNITS_H

#define LIST_OF_UNITS \
    X(KWH,kwh,"kWh",Energy,"kilo Watt hour") \
    X(M3,m3,"m³",Volume,"cubic meter") \
    X(C,c,"°C",Temperature,"celsius") \
    X(TXT,txt,"txt",Text,"text, free form") \
    X(BAR,bar,"bar",Pressure,"bar") \
    X(PA,pa,"pa",Pressure,"pascal") \

enum class Unit { };
#endif
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> UnitTable {
        UnitTable::parse(SAMPLE_HEADER).unwrap()
    }

    #[test]
    fn test_known_units() {
        let units = sample();
        assert_eq!(units.human_readable("kwh"), "kWh");
        assert_eq!(units.human_readable("M3"), "m³");
        assert_eq!(units.human_readable("c"), "°C");
    }

    #[test]
    fn test_list_stops_at_bar() {
        let units = sample();
        assert_eq!(units.human_readable("bar"), "bar");
        // After the last field unit, and entries with commas in the explanation
        assert_eq!(units.len(), 4);
        assert_eq!(units.human_readable("PA"), "PA");
        assert_eq!(units.human_readable("txt"), "txt");
    }

    #[test]
    fn test_unknown_and_empty() {
        let units = sample();
        assert_eq!(units.human_readable("furlongs"), "furlongs");
        assert_eq!(units.human_readable(""), "?");
        assert_eq!(UnitTable::empty().human_readable("m3"), "m3");
    }

    #[test]
    fn test_unit_from_field_suffix() {
        let units = sample();
        assert_eq!(units.for_field("total_m3"), "m³");
        assert_eq!(units.for_field("flow_temperature_c"), "°C");
        assert_eq!(units.for_field("current_status"), "status");
        assert_eq!(units.for_field("total_"), "?");
    }

    #[test]
    fn test_load_from_component_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(UNITS_HEADER);
        std::fs::write(&path, SAMPLE_HEADER).unwrap();
        assert_eq!(UnitTable::load(&path).unwrap(), sample());

        std::fs::write(&path, "#define NOTHING_HERE\n").unwrap();
        assert!(matches!(
            UnitTable::load(&path),
            Err(UnitsError::MissingList { .. })
        ));
        assert!(matches!(
            UnitTable::load(&dir.path().join("missing.h")),
            Err(UnitsError::Unreadable { .. })
        ));
    }
}
