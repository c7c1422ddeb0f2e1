// Coordinate directory - read-only cell key -> tower position lookup
//
// The authoritative tower database lives outside the engine. CellDatabase is
// the in-memory form, loadable from the JSON layout used by the collectors:
//   { "214-07-100-200": { "lat": 40.41, "lon": -3.70 }, ... }

use std::collections::HashMap;
use std::path::Path;

use crate::cell::{CellCoordinate, CellKey};
use crate::error::DirectoryError;
use crate::geodesy;

/// Lookup of known tower coordinates. A miss is a normal outcome.
pub trait CoordinateDirectory: Send + Sync {
    fn lookup(&self, key: &CellKey) -> Option<CellCoordinate>;
}

/// In-memory tower database. The default value is empty.
#[derive(Debug, Clone, Default)]
pub struct CellDatabase {
    cells: HashMap<CellKey, CellCoordinate>,
}

impl CellDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the JSON object layout. Any malformed entry fails the whole load.
    pub fn from_json_str(json: &str) -> Result<Self, DirectoryError> {
        let raw: HashMap<String, CellCoordinate> = serde_json::from_str(json)?;
        let mut db = CellDatabase::new();
        for (text, coordinate) in raw {
            let key: CellKey = text
                .parse()
                .map_err(|_| DirectoryError::InvalidKey(text.clone()))?;
            if !geodesy::is_valid_position(coordinate.latitude, coordinate.longitude)
                || !(-180.0..=180.0).contains(&coordinate.longitude)
            {
                return Err(DirectoryError::InvalidCoordinate {
                    key: text,
                    lat: coordinate.latitude,
                    lon: coordinate.longitude,
                });
            }
            db.cells.insert(key, coordinate);
        }
        Ok(db)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| DirectoryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn insert(&mut self, key: CellKey, coordinate: CellCoordinate) {
        self.cells.insert(key, coordinate);
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl CoordinateDirectory for CellDatabase {
    fn lookup(&self, key: &CellKey) -> Option<CellCoordinate> {
        self.cells.get(key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_directory_misses() {
        let db = CellDatabase::default();
        assert!(db.is_empty());
        assert!(db.lookup(&CellKey::new("214", "07", "100", "200")).is_none());
    }

    #[test]
    fn test_from_json_str() {
        let db = CellDatabase::from_json_str(
            r#"{
                "214-07-100-200": {"lat": 40.4168, "lon": -3.7038},
                "214-07-100-201": {"lat": 40.4200, "lon": -3.7000}
            }"#,
        )
        .unwrap();

        assert_eq!(db.len(), 2);
        let coord = db.lookup(&CellKey::new("214", "07", "100", "201")).unwrap();
        assert!((coord.latitude - 40.42).abs() < 1e-12);
        assert!((coord.longitude + 3.7).abs() < 1e-12);
        assert!(db.lookup(&CellKey::new("214", "07", "100", "999")).is_none());
    }

    #[test]
    fn test_rejects_bad_key() {
        let err = CellDatabase::from_json_str(r#"{"214-07-100": {"lat": 1.0, "lon": 2.0}}"#)
            .unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidKey(_)));
    }

    #[test]
    fn test_rejects_out_of_range_coordinate() {
        let err = CellDatabase::from_json_str(r#"{"214-07-100-200": {"lat": 95.0, "lon": 2.0}}"#)
            .unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidCoordinate { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"310-260-1-2": {{"lat": 47.6, "lon": -122.3}}}}"#).unwrap();

        let db = CellDatabase::load(file.path()).unwrap();
        assert_eq!(db.len(), 1);

        let missing = CellDatabase::load("/nonexistent/cells.json");
        assert!(matches!(missing, Err(DirectoryError::Io { .. })));
    }
}
