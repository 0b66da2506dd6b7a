//! Recompiler settings, loaded from a JSON file.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Address, RecompError};

/// An explicitly known function, both bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionBounds {
    pub start: Address,
    pub end: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecompilerConfig {
    /// Branch distance in bytes beyond which a `b` followed by padding is a tail call
    pub tail_call_threshold: u32,
    /// Seed function bounds from the image's `.pdata` table
    pub use_bounds_table: bool,
    /// Extra function bounds seeded next to the `.pdata` table
    pub functions: Vec<FunctionBounds>,
    /// Resolve jump tables
    pub jump_tables: bool,
    /// Emit functions on the rayon thread pool
    pub parallel_emission: bool,
    /// Write the debug map next to the module
    pub emit_debug_map: bool,
}

impl Default for RecompilerConfig {
    fn default() -> Self {
        Self {
            tail_call_threshold: 0x10000,
            use_bounds_table: true,
            functions: Vec::new(),
            jump_tables: true,
            parallel_emission: true,
            emit_debug_map: true,
        }
    }
}

impl RecompilerConfig {
    pub fn from_json(text: &str) -> Result<Self, RecompError> {
        let config: Self = serde_json::from_str(text).map_err(|e| RecompError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RecompError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        log::debug!("loading configuration from {}", path.display());
        Self::from_json(&text)
    }

    fn validate(&self) -> Result<(), RecompError> {
        for bounds in &self.functions {
            if bounds.end < bounds.start || bounds.start % 4 != 0 || bounds.end % 4 != 0 {
                return Err(RecompError::Config(format!(
                    "bad function bounds [0x{:08x}, 0x{:08x}]",
                    bounds.start, bounds.end
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = RecompilerConfig::from_json(r#"{ "jump_tables": false }"#).unwrap();
        assert!(!config.jump_tables);
        assert_eq!(config.tail_call_threshold, 0x10000);
        assert!(config.use_bounds_table);
        assert!(config.functions.is_empty());
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!(matches!(RecompilerConfig::from_json("{ not json"), Err(RecompError::Config(_))));
        assert!(matches!(RecompilerConfig::from_json(r#"{ "bogus": 1 }"#), Err(RecompError::Config(_))));
        let inverted = r#"{ "functions": [ { "start": 2181038096, "end": 2181038080 } ] }"#;
        assert!(matches!(RecompilerConfig::from_json(inverted), Err(RecompError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "tail_call_threshold": 4096, "functions": [ {{ "start": 2181038080, "end": 2181038096 }} ] }}"#
        )
        .unwrap();
        let config = RecompilerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.tail_call_threshold, 4096);
        assert_eq!(config.functions, vec![FunctionBounds { start: 0x8200_0000, end: 0x8200_0010 }]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RecompilerConfig::from_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, RecompError::Io(_)));
    }
}
