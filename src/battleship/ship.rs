//! Ships: type, footprint, damage.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::turn::{CellCoords, MoveParams, MoveResult, ShotResult};
use super::BattleshipError;

/// Ship classes. Serialized as their numeric index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum ShipType {
    Patrol,
    Sub,
    Cruiser,
    Battleship,
    Carrier,
    Unknown,
}

impl ShipType {
    /// The standard fleet, smallest first.
    pub const FLEET: [ShipType; 5] = [
        ShipType::Patrol,
        ShipType::Sub,
        ShipType::Cruiser,
        ShipType::Battleship,
        ShipType::Carrier,
    ];

    pub fn length(self) -> i32 {
        match self {
            ShipType::Patrol => 2,
            ShipType::Sub => 3,
            ShipType::Cruiser => 4,
            ShipType::Battleship | ShipType::Carrier => 5,
            ShipType::Unknown => 1,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ShipType::Patrol => "Patrol Boat (2)",
            ShipType::Sub => "Sub (3)",
            ShipType::Cruiser => "Cruiser (4)",
            ShipType::Battleship => "Battleship (5)",
            ShipType::Carrier => "Carrier (5)",
            ShipType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ShipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl TryFrom<i64> for ShipType {
    type Error = BattleshipError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ShipType::Patrol),
            1 => Ok(ShipType::Sub),
            2 => Ok(ShipType::Cruiser),
            3 => Ok(ShipType::Battleship),
            4 => Ok(ShipType::Carrier),
            5 => Ok(ShipType::Unknown),
            other => Err(BattleshipError::UnknownShipType(other)),
        }
    }
}

impl From<ShipType> for i64 {
    fn from(ship: ShipType) -> i64 {
        ship as i64
    }
}

/// A ship on the grid. Occupies `length` cells from its top-left corner,
/// down if vertical, right otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "ShipRepr")]
pub struct Ship {
    ship_type: ShipType,
    ix_top_left_col: i32,
    ix_top_left_row: i32,
    is_vertical: bool,
    n_grid: i32,
    name: String,
    damaged: Vec<bool>,
}

/// Wire form. `name` is derived from the type and ignored on input; a
/// missing `damaged` list means undamaged.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShipRepr {
    ship_type: ShipType,
    ix_top_left_col: i32,
    ix_top_left_row: i32,
    is_vertical: bool,
    #[serde(default = "default_grid")]
    n_grid: i32,
    #[serde(default)]
    damaged: Option<Vec<bool>>,
}

fn default_grid() -> i32 {
    super::DEFAULT_GRID_SIZE
}

impl TryFrom<ShipRepr> for Ship {
    type Error = BattleshipError;

    fn try_from(repr: ShipRepr) -> Result<Self, Self::Error> {
        let mut ship = Ship::new(
            repr.ship_type,
            repr.ix_top_left_col,
            repr.ix_top_left_row,
            repr.is_vertical,
            repr.n_grid,
        );
        if let Some(damaged) = repr.damaged {
            if damaged.len() != ship.damaged.len() {
                return Err(BattleshipError::InvalidParams(format!(
                    "{} has {} cells but {} damage flags",
                    ship.name,
                    ship.damaged.len(),
                    damaged.len()
                )));
            }
            ship.damaged = damaged;
        }
        Ok(ship)
    }
}

impl Ship {
    pub fn new(ship_type: ShipType, col: i32, row: i32, vertical: bool, n_grid: i32) -> Self {
        Self {
            ship_type,
            ix_top_left_col: col,
            ix_top_left_row: row,
            is_vertical: vertical,
            n_grid,
            name: ship_type.display_name().to_string(),
            damaged: vec![false; ship_type.length() as usize],
        }
    }

    pub fn ship_type(&self) -> ShipType {
        self.ship_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn top_left(&self) -> (i32, i32) {
        (self.ix_top_left_col, self.ix_top_left_row)
    }

    pub fn is_vertical(&self) -> bool {
        self.is_vertical
    }

    pub fn n_grid(&self) -> i32 {
        self.n_grid
    }

    pub(crate) fn set_grid(&mut self, n_grid: i32) {
        self.n_grid = n_grid;
    }

    pub fn length(&self) -> i32 {
        self.ship_type.length()
    }

    pub fn width(&self) -> i32 {
        if self.is_vertical {
            1
        } else {
            self.length()
        }
    }

    pub fn height(&self) -> i32 {
        if self.is_vertical {
            self.length()
        } else {
            1
        }
    }

    /// Occupied cells as (col, row), in offset order.
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        (0..self.length()).map(move |offset| {
            if self.is_vertical {
                (self.ix_top_left_col, self.ix_top_left_row.saturating_add(offset))
            } else {
                (self.ix_top_left_col.saturating_add(offset), self.ix_top_left_row)
            }
        })
    }

    pub fn is_valid_placement(&self) -> bool {
        self.cells()
            .all(|(col, row)| col >= 0 && col < self.n_grid && row >= 0 && row < self.n_grid)
    }

    pub fn intersects(&self, other: &Ship) -> bool {
        self.cells()
            .any(|(col, row)| other.is_ship_present(col, row))
    }

    pub fn is_ship_present(&self, col: i32, row: i32) -> bool {
        self.offset_of(col, row).is_some()
    }

    /// Index into the ship of a cell, or `None` if the ship isn't there.
    pub fn offset_of(&self, col: i32, row: i32) -> Option<usize> {
        let (along, across, start, fixed) = if self.is_vertical {
            (row, col, self.ix_top_left_row, self.ix_top_left_col)
        } else {
            (col, row, self.ix_top_left_col, self.ix_top_left_row)
        };
        let end = i64::from(start) + i64::from(self.length());
        if across != fixed || along < start || i64::from(along) >= end {
            return None;
        }
        usize::try_from(along - start).ok()
    }

    pub fn is_damaged_at(&self, col: i32, row: i32) -> bool {
        self.offset_of(col, row)
            .and_then(|offset| self.damaged.get(offset).copied())
            .unwrap_or(false)
    }

    pub fn damage(&self) -> &[bool] {
        &self.damaged
    }

    pub fn is_sunk(&self) -> bool {
        self.damaged.iter().all(|&d| d)
    }

    /// Translate the ship, clamping so the whole footprint stays on the
    /// grid. Returns the displacement actually applied.
    pub fn apply_move(&mut self, params: &MoveParams) -> MoveResult {
        let (start_col, start_row) = self.top_left();

        let col = start_col
            .saturating_add(params.ix_cols)
            .max(0)
            .min(self.n_grid - self.width());
        let row = start_row
            .saturating_add(params.ix_rows)
            .max(0)
            .min(self.n_grid - self.height());
        self.ix_top_left_col = col;
        self.ix_top_left_row = row;

        MoveResult {
            ix_cols_moved: col - start_col,
            ix_rows_moved: row - start_row,
        }
    }

    /// Damage the ship at `shot` if it is there. `newly_sunk` is true only
    /// for the shot that completes the damage.
    pub fn apply_shot(&mut self, shot: CellCoords) -> ShotResult {
        let Some(offset) = self.offset_of(shot.ix_col, shot.ix_row) else {
            return ShotResult::miss();
        };
        let sunk_before = self.is_sunk();
        if let Some(cell) = self.damaged.get_mut(offset) {
            *cell = true;
        }
        let sunk = self.is_sunk();
        ShotResult {
            hit: true,
            sunk,
            newly_sunk: sunk && !sunk_before,
        }
    }
}
