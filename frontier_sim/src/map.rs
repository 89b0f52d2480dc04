// Terrain: which tiles are land and which are water.
//
// Maps are generated procedurally from `(GameMapType, GameMapSize)` so that
// every client derives the identical grid without shipping terrain files.
// Generation is coarse value noise: the grid is divided into 6x6 cells, each
// cell's land probability comes from a SplitMix64 hash of the map seed and
// cell coordinates, and each tile then rolls against it with its own hash.
// The outermost ring is always water so every landmass has a coast.
//
// Tiles are addressed by `TileRef` (`y * width + x`), the same index the
// wire protocol uses for `spawn`, `boat` and `build_unit`.

use frontier_protocol::{GameMapSize, GameMapType};

pub type TileRef = u32;

const CELL: u32 = 6;

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn mix(seed: u64, a: u32, b: u32) -> u64 {
    splitmix64(seed ^ (u64::from(a) << 32 | u64::from(b)))
}

/// Base dimensions (width, height) at `GameMapSize::Normal`, and the
/// percentage of land the generator aims for.
fn map_profile(map: GameMapType) -> (u32, u32, u64) {
    match map {
        GameMapType::World => (96, 48, 55),
        GameMapType::Europe => (64, 48, 60),
        GameMapType::Asia => (80, 48, 70),
        GameMapType::Africa => (56, 56, 75),
        GameMapType::NorthAmerica => (64, 48, 65),
        GameMapType::SouthAmerica => (48, 64, 65),
        GameMapType::Oceania => (72, 40, 40),
        GameMapType::Mars => (64, 64, 85),
        GameMapType::Britannia => (40, 56, 50),
        GameMapType::Iceland => (48, 32, 60),
    }
}

#[derive(Clone, Debug)]
pub struct TerrainMap {
    width: u32,
    height: u32,
    land: Vec<bool>,
    land_count: u32,
}

impl TerrainMap {
    pub fn generate(map: GameMapType, size: GameMapSize) -> Self {
        let (base_w, base_h, land_pct) = map_profile(map);
        let (width, height) = match size {
            GameMapSize::Normal => (base_w, base_h),
            GameMapSize::Compact => (base_w / 2, base_h / 2),
        };
        let seed = splitmix64(map as u64 + 1);
        let mut land = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let edge = x == 0 || y == 0 || x == width - 1 || y == height - 1;
                let is_land = !edge && {
                    let cell_pct = mix(seed, x / CELL, y / CELL) % 100;
                    // Cells far below the target are oceans, far above are
                    // solid continents; the middle band is broken coast.
                    let cell_bias = if cell_pct + 25 < land_pct {
                        95
                    } else if cell_pct > land_pct + 25 {
                        5
                    } else {
                        land_pct
                    };
                    mix(seed.rotate_left(17), x, y) % 100 < cell_bias
                };
                land.push(is_land);
            }
        }
        let land_count = land.iter().filter(|l| **l).count() as u32;
        Self {
            width,
            height,
            land,
            land_count,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tile_count(&self) -> u32 {
        self.width * self.height
    }

    pub fn land_count(&self) -> u32 {
        self.land_count
    }

    pub fn in_bounds(&self, tile: TileRef) -> bool {
        tile < self.tile_count()
    }

    pub fn is_land(&self, tile: TileRef) -> bool {
        self.land.get(tile as usize).copied().unwrap_or(false)
    }

    pub fn x(&self, tile: TileRef) -> u32 {
        tile % self.width
    }

    pub fn y(&self, tile: TileRef) -> u32 {
        tile / self.width
    }

    pub fn tile_at(&self, x: u32, y: u32) -> Option<TileRef> {
        (x < self.width && y < self.height).then(|| y * self.width + x)
    }

    /// Orthogonal neighbours inside the grid.
    pub fn neighbors(&self, tile: TileRef) -> impl Iterator<Item = TileRef> + use<> {
        let (x, y) = (self.x(tile), self.y(tile));
        let (w, h) = (self.width, self.height);
        [
            (x > 0).then(|| tile - 1),
            (x + 1 < w).then(|| tile + 1),
            (y > 0).then(|| tile - w),
            (y + 1 < h).then(|| tile + w),
        ]
        .into_iter()
        .flatten()
    }

    /// Land tile touching water.
    pub fn is_shore(&self, tile: TileRef) -> bool {
        self.is_land(tile) && self.neighbors(tile).any(|n| !self.is_land(n))
    }

    /// Every tile within Chebyshev distance `radius` of `center`.
    pub fn tiles_within(&self, center: TileRef, radius: u32) -> Vec<TileRef> {
        let (cx, cy) = (self.x(center), self.y(center));
        let mut out = Vec::new();
        for y in cy.saturating_sub(radius)..=(cy + radius).min(self.height - 1) {
            for x in cx.saturating_sub(radius)..=(cx + radius).min(self.width - 1) {
                out.push(y * self.width + x);
            }
        }
        out
    }

    /// The first land tile at or after `from`, wrapping around the grid.
    pub fn land_tile_from(&self, from: TileRef) -> Option<TileRef> {
        let n = self.tile_count();
        (0..n)
            .map(|offset| (from % n + offset) % n)
            .find(|t| self.is_land(*t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic() {
        let a = TerrainMap::generate(GameMapType::Europe, GameMapSize::Normal);
        let b = TerrainMap::generate(GameMapType::Europe, GameMapSize::Normal);
        assert_eq!(a.land, b.land);
    }

    #[test]
    fn maps_differ_by_type() {
        let a = TerrainMap::generate(GameMapType::Europe, GameMapSize::Compact);
        let b = TerrainMap::generate(GameMapType::Iceland, GameMapSize::Compact);
        assert_ne!(a.land, b.land);
    }

    #[test]
    fn compact_halves_dimensions_and_edges_are_water() {
        let map = TerrainMap::generate(GameMapType::World, GameMapSize::Compact);
        assert_eq!((map.width(), map.height()), (48, 24));
        for x in 0..map.width() {
            assert!(!map.is_land(map.tile_at(x, 0).unwrap()));
            assert!(!map.is_land(map.tile_at(x, map.height() - 1).unwrap()));
        }
        assert!(map.land_count() > 0);
    }

    #[test]
    fn every_map_has_a_reasonable_amount_of_land() {
        for map_type in [
            GameMapType::World,
            GameMapType::Oceania,
            GameMapType::Mars,
            GameMapType::Britannia,
        ] {
            let map = TerrainMap::generate(map_type, GameMapSize::Compact);
            let share = map.land_count() * 100 / map.tile_count();
            assert!((10..=95).contains(&share), "{map_type:?}: {share}% land");
        }
    }

    #[test]
    fn neighbors_stay_in_grid() {
        let map = TerrainMap::generate(GameMapType::Mars, GameMapSize::Compact);
        assert_eq!(map.neighbors(0).count(), 2);
        let center = map.tile_at(5, 5).unwrap();
        assert_eq!(map.neighbors(center).count(), 4);
        assert_eq!(map.tiles_within(center, 1).len(), 9);
        assert_eq!(map.tiles_within(0, 2).len(), 9);
    }

    #[test]
    fn land_search_finds_land() {
        let map = TerrainMap::generate(GameMapType::World, GameMapSize::Compact);
        let tile = map.land_tile_from(0).unwrap();
        assert!(map.is_land(tile));
    }
}
