//! Battleship side game: ships on a square grid, moved, scanned and shot
//! at by turns earned while riding.
//!
//! Everything here is synchronous and deterministic given its inputs; the
//! only randomness is fleet placement, which takes the RNG as a parameter.
//!
//! Turn resolution:
//!
//! ```text
//! MOVE  ─► translate ship, clamp footprint into [0, n_grid) ─► displacement
//! RADAR ─► record each square in radar history ─► ship present per square
//! SHOOT ─► 3×3 shotgun around target, clipped to grid
//!           every cell → shot history; every ship on a cell → damaged
//!           result = last ship processed (x outer, y inner)
//! PASS  ─► nothing
//! ```

pub mod map;
pub mod ship;
pub mod turn;
pub mod wire;

pub use map::BattleshipGameMap;
pub use ship::{Ship, ShipType};
pub use turn::{
    CellCoords, MoveParams, MoveResult, RadarParams, RadarResult, ShotResult, Turn, TurnResult,
    TurnType,
};
pub use wire::{
    BattleshipApplyMove, BattleshipGameMeta, BattleshipMapCreate, BattleshipMapCreateResponse,
    BattleshipMessage, NotifyNewPlayer,
};

use thiserror::Error;

/// Grid size used when a game doesn't specify one.
pub const DEFAULT_GRID_SIZE: i32 = 11;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BattleshipError {
    #[error("No ship of type {0:?} on this map")]
    UnknownShip(ShipType),

    #[error("Unrecognized move type: {0}")]
    UnrecognizedMove(i64),

    #[error("Unknown ship type: {0}")]
    UnknownShipType(i64),

    #[error("Invalid turn parameters: {0}")]
    InvalidParams(String),

    #[error("{0:?} does not fit on the grid")]
    InvalidPlacement(ShipType),

    #[error("{0:?} overlaps {1:?}")]
    OverlappingShips(ShipType, ShipType),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for BattleshipError {
    fn from(e: serde_json::Error) -> Self {
        BattleshipError::Serialization(e.to_string())
    }
}

/// History key for a cell, `"col|row"`.
pub fn cell_key(col: i32, row: i32) -> String {
    format!("{}|{}", col, row)
}

/// Inverse of `cell_key`.
pub fn parse_cell_key(key: &str) -> Result<(i32, i32), BattleshipError> {
    let malformed = || BattleshipError::InvalidParams(format!("bad cell key {:?}", key));
    let (col, row) = key.split_once('|').ok_or_else(malformed)?;
    let col = col.trim().parse().map_err(|_| malformed())?;
    let row = row.trim().parse().map_err(|_| malformed())?;
    Ok((col, row))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_keys() {
        assert_eq!(cell_key(3, 10), "3|10");
        assert_eq!(parse_cell_key("3|10").unwrap(), (3, 10));
        assert!(parse_cell_key("3,10").is_err());
        assert!(parse_cell_key("a|1").is_err());
    }
}
