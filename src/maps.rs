//! Map Loading
//!
//! Where round arenas come from. The scheduler only sees [`MapLoader`];
//! the server reads `*.map` files from a directory, tests and benches keep
//! maps in memory.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::core::rng::GameRng;
use crate::game::map::{Grid, MapError};

/// Map file extension.
pub const MAP_EXTENSION: &str = "map";

/// Source of round arenas.
pub trait MapLoader: Send {
    /// Load one of the available maps, chosen with `rng`.
    fn load_random_map(&mut self, rng: &mut GameRng) -> Result<Grid, MapError>;

    /// Load a specific map file.
    fn load_map(&mut self, path: &Path, rng: &mut GameRng) -> Result<Grid, MapError>;
}

/// Grid parameters shared by every loader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapShape {
    /// Rows per map.
    pub rows: usize,
    /// Columns per map.
    pub columns: usize,
    /// Obstacle seeding chance in percent.
    pub obstacle_probability: u8,
}

impl MapShape {
    fn parse(&self, text: &str, rng: &mut GameRng) -> Result<Grid, MapError> {
        Grid::parse(text, self.rows, self.columns, self.obstacle_probability, rng)
    }
}

// =============================================================================
// FILE LOADER
// =============================================================================

/// Loads `*.map` files from a directory, or always the same file.
#[derive(Clone, Debug)]
pub struct FileMapLoader {
    maps_dir: PathBuf,
    forced_map: Option<PathBuf>,
    shape: MapShape,
}

impl FileMapLoader {
    /// Pick maps at random from `maps_dir`, unless `forced_map` is set.
    pub fn new(maps_dir: PathBuf, forced_map: Option<PathBuf>, shape: MapShape) -> Self {
        Self {
            maps_dir,
            forced_map,
            shape,
        }
    }

    /// Map files in the directory, sorted by name.
    pub fn available_maps(&self) -> Result<Vec<PathBuf>, MapError> {
        let io_error = |source| MapError::Io {
            path: self.maps_dir.clone(),
            source,
        };

        let mut maps = Vec::new();
        for entry in std::fs::read_dir(&self.maps_dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == MAP_EXTENSION) {
                maps.push(path);
            }
        }
        maps.sort();
        Ok(maps)
    }
}

impl MapLoader for FileMapLoader {
    fn load_random_map(&mut self, rng: &mut GameRng) -> Result<Grid, MapError> {
        if let Some(path) = self.forced_map.clone() {
            return self.load_map(&path, rng);
        }

        let maps = self.available_maps()?;
        let path = rng
            .choose(&maps)
            .cloned()
            .ok_or_else(|| MapError::NoMapsConfigured(self.maps_dir.clone()))?;
        self.load_map(&path, rng)
    }

    fn load_map(&mut self, path: &Path, rng: &mut GameRng) -> Result<Grid, MapError> {
        info!(map = %path.display(), "Loading map");
        let text = std::fs::read_to_string(path).map_err(|source| MapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let grid = self.shape.parse(&text, rng)?;
        debug!(spawn_points = grid.spawn_point_count(), "Map loaded");
        Ok(grid)
    }
}

// =============================================================================
// MEMORY LOADER
// =============================================================================

/// Serves maps held in memory. `load_map` looks maps up by name.
#[derive(Clone, Debug)]
pub struct MemoryMapLoader {
    maps: Vec<(String, String)>,
    shape: MapShape,
}

impl MemoryMapLoader {
    /// Loader over `(name, text)` pairs.
    pub fn new(maps: Vec<(String, String)>, shape: MapShape) -> Self {
        Self { maps, shape }
    }

    /// Loader serving a single map.
    pub fn single(text: &str, shape: MapShape) -> Self {
        Self::new(vec![("memory".to_string(), text.to_string())], shape)
    }
}

impl MapLoader for MemoryMapLoader {
    fn load_random_map(&mut self, rng: &mut GameRng) -> Result<Grid, MapError> {
        let (_, text) = rng
            .choose(&self.maps)
            .ok_or_else(|| MapError::NoMapsConfigured(PathBuf::from("<memory>")))?;
        let text = text.clone();
        self.shape.parse(&text, rng)
    }

    fn load_map(&mut self, path: &Path, rng: &mut GameRng) -> Result<Grid, MapError> {
        let text = self
            .maps
            .iter()
            .find(|(name, _)| Path::new(name) == path)
            .map(|(_, text)| text.clone())
            .ok_or_else(|| MapError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })?;
        self.shape.parse(&text, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPE: MapShape = MapShape {
        rows: 15,
        columns: 20,
        obstacle_probability: 35,
    };

    fn bundled_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("maps")
    }

    #[test]
    fn test_bundled_maps_load() {
        let mut loader = FileMapLoader::new(bundled_dir(), None, SHAPE);
        let mut rng = GameRng::new(5);

        let maps = loader.available_maps().unwrap();
        assert!(maps.len() >= 2);

        for path in maps {
            let grid = loader.load_map(&path, &mut rng).unwrap();
            assert!(grid.spawn_point_count() >= 4, "{} has too few spawn points", path.display());
        }
        assert!(loader.load_random_map(&mut rng).is_ok());
    }

    #[test]
    fn test_forced_map() {
        let forced = bundled_dir().join("classic.map");
        let mut loader = FileMapLoader::new(PathBuf::from("/nonexistent"), Some(forced), SHAPE);
        let mut rng = GameRng::new(5);
        assert!(loader.load_random_map(&mut rng).is_ok());
    }

    #[test]
    fn test_missing_directory() {
        let mut loader = FileMapLoader::new(PathBuf::from("/nonexistent/maps"), None, SHAPE);
        let mut rng = GameRng::new(5);
        assert!(matches!(loader.load_random_map(&mut rng), Err(MapError::Io { .. })));
    }

    #[test]
    fn test_memory_loader() {
        let shape = MapShape { rows: 1, columns: 3, obstacle_probability: 0 };
        let mut loader = MemoryMapLoader::single("SWS", shape);
        let mut rng = GameRng::new(5);

        let grid = loader.load_random_map(&mut rng).unwrap();
        assert_eq!(grid.spawn_points(), &[(0, 0), (0, 2)]);
        assert!(loader.load_map(Path::new("memory"), &mut rng).is_ok());
        assert!(loader.load_map(Path::new("other"), &mut rng).is_err());

        let mut empty = MemoryMapLoader::new(Vec::new(), shape);
        assert!(matches!(
            empty.load_random_map(&mut rng),
            Err(MapError::NoMapsConfigured(_))
        ));
    }
}
