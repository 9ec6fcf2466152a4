//! Packed room terrain, two bits per tile.

use crate::position::ROOM_SIZE;

pub const TERRAIN_MASK_WALL: u8 = 1;
pub const TERRAIN_MASK_SWAMP: u8 = 2;

const TILES: usize = ROOM_SIZE as usize * ROOM_SIZE as usize;
pub const TERRAIN_BYTES: usize = TILES / 4 + if TILES % 4 == 0 { 0 } else { 1 };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerrainType {
    Plain,
    Wall,
    Swamp,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("terrain blob has {len} bytes, expected {expected}", expected = TERRAIN_BYTES)]
pub struct TerrainError {
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terrain {
    bits: Vec<u8>,
}

impl Default for Terrain {
    fn default() -> Self {
        Self::plain()
    }
}

impl Terrain {
    pub fn plain() -> Self {
        Self {
            bits: vec![0; TERRAIN_BYTES],
        }
    }

    pub fn from_bytes(bits: Vec<u8>) -> Result<Self, TerrainError> {
        if bits.len() != TERRAIN_BYTES {
            return Err(TerrainError { len: bits.len() });
        }
        Ok(Self { bits })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    fn slot(x: u8, y: u8) -> Option<(usize, u32)> {
        if x >= ROOM_SIZE || y >= ROOM_SIZE {
            return None;
        }
        let index = usize::from(y) * usize::from(ROOM_SIZE) + usize::from(x);
        Some((index / 4, (index % 4) as u32 * 2))
    }

    /// Raw mask at a tile; out-of-room tiles read as walls.
    pub fn mask(&self, x: u8, y: u8) -> u8 {
        match Self::slot(x, y) {
            Some((byte, shift)) => (self.bits[byte] >> shift) & 0b11,
            None => TERRAIN_MASK_WALL,
        }
    }

    pub fn get(&self, x: u8, y: u8) -> TerrainType {
        let mask = self.mask(x, y);
        if mask & TERRAIN_MASK_WALL != 0 {
            TerrainType::Wall
        } else if mask & TERRAIN_MASK_SWAMP != 0 {
            TerrainType::Swamp
        } else {
            TerrainType::Plain
        }
    }

    pub fn set(&mut self, x: u8, y: u8, terrain: TerrainType) {
        let Some((byte, shift)) = Self::slot(x, y) else {
            return;
        };
        let mask = match terrain {
            TerrainType::Plain => 0,
            TerrainType::Wall => TERRAIN_MASK_WALL,
            TerrainType::Swamp => TERRAIN_MASK_SWAMP,
        };
        self.bits[byte] = (self.bits[byte] & !(0b11 << shift)) | (mask << shift);
    }

    pub fn with(mut self, x: u8, y: u8, terrain: TerrainType) -> Self {
        self.set(x, y, terrain);
        self
    }

    pub fn is_walkable(&self, x: u8, y: u8) -> bool {
        self.get(x, y) != TerrainType::Wall
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiles_are_independent() {
        let terrain = Terrain::plain()
            .with(0, 0, TerrainType::Wall)
            .with(1, 0, TerrainType::Swamp)
            .with(49, 49, TerrainType::Swamp);
        assert_eq!(terrain.get(0, 0), TerrainType::Wall);
        assert_eq!(terrain.get(1, 0), TerrainType::Swamp);
        assert_eq!(terrain.get(2, 0), TerrainType::Plain);
        assert_eq!(terrain.get(49, 49), TerrainType::Swamp);
        assert!(!terrain.is_walkable(0, 0));
        assert!(!terrain.is_walkable(50, 0));
    }

    #[test]
    fn overwriting_a_tile_clears_previous_mask() {
        let mut terrain = Terrain::plain().with(5, 5, TerrainType::Wall);
        terrain.set(5, 5, TerrainType::Swamp);
        assert_eq!(terrain.mask(5, 5), TERRAIN_MASK_SWAMP);
    }

    #[test]
    fn blob_length_is_checked() {
        assert!(Terrain::from_bytes(vec![0; 3]).is_err());
        let terrain = Terrain::plain().with(3, 4, TerrainType::Wall);
        let copy = Terrain::from_bytes(terrain.as_bytes().to_vec()).unwrap();
        assert_eq!(copy, terrain);
    }
}
