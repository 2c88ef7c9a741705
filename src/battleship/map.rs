//! One player's board: fleet, shot history, radar history.

use std::collections::BTreeSet;

use rand::Rng;

use super::ship::{Ship, ShipType};
use super::turn::{CellCoords, MoveResult, RadarParams, RadarResult, ShotResult, Turn, TurnResult};
use super::wire::BattleshipMapCreate;
use super::{cell_key, parse_cell_key, BattleshipError};

/// Placement attempts per ship before `random_fleet` gives up.
const MAX_PLACEMENT_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct BattleshipGameMap {
    map_id: String,
    n_grid: i32,
    ships: Vec<Ship>,
    shot_history: BTreeSet<(i32, i32)>,
    radar_history: BTreeSet<(i32, i32)>,
}

impl BattleshipGameMap {
    /// Build a map, checking every ship is on the grid and no two overlap.
    pub fn new(
        map_id: impl Into<String>,
        n_grid: i32,
        mut ships: Vec<Ship>,
    ) -> Result<Self, BattleshipError> {
        if n_grid <= 0 {
            return Err(BattleshipError::InvalidParams(format!(
                "grid size must be positive, got {}",
                n_grid
            )));
        }
        for ship in ships.iter_mut() {
            ship.set_grid(n_grid);
        }
        for (i, ship) in ships.iter().enumerate() {
            if !ship.is_valid_placement() {
                return Err(BattleshipError::InvalidPlacement(ship.ship_type()));
            }
            if let Some(other) = ships[..i].iter().find(|other| other.intersects(ship)) {
                return Err(BattleshipError::OverlappingShips(
                    other.ship_type(),
                    ship.ship_type(),
                ));
            }
        }

        Ok(Self {
            map_id: map_id.into(),
            n_grid,
            ships,
            shot_history: BTreeSet::new(),
            radar_history: BTreeSet::new(),
        })
    }

    /// Place the standard fleet at random, non-overlapping positions.
    pub fn random_fleet<R: Rng>(
        map_id: impl Into<String>,
        n_grid: i32,
        rng: &mut R,
    ) -> Result<Self, BattleshipError> {
        let mut ships: Vec<Ship> = Vec::with_capacity(ShipType::FLEET.len());

        for ship_type in ShipType::FLEET {
            let placed = (0..MAX_PLACEMENT_ATTEMPTS).find_map(|_| {
                let vertical = rng.gen_bool(0.5);
                let (span_cols, span_rows) = if vertical {
                    (n_grid, n_grid - ship_type.length() + 1)
                } else {
                    (n_grid - ship_type.length() + 1, n_grid)
                };
                if span_cols <= 0 || span_rows <= 0 {
                    return None;
                }
                let candidate = Ship::new(
                    ship_type,
                    rng.gen_range(0..span_cols),
                    rng.gen_range(0..span_rows),
                    vertical,
                    n_grid,
                );
                (!ships.iter().any(|s| s.intersects(&candidate))).then_some(candidate)
            });

            match placed {
                Some(ship) => ships.push(ship),
                None => {
                    log::warn!("Could not place {} on a {}x{} grid", ship_type, n_grid, n_grid);
                    return Err(BattleshipError::InvalidPlacement(ship_type));
                }
            }
        }

        Self::new(map_id, n_grid, ships)
    }

    pub fn map_id(&self) -> &str {
        &self.map_id
    }

    pub fn n_grid(&self) -> i32 {
        self.n_grid
    }

    pub fn ships(&self) -> &[Ship] {
        &self.ships
    }

    pub fn ship(&self, ship_type: ShipType) -> Option<&Ship> {
        self.ships.iter().find(|s| s.ship_type() == ship_type)
    }

    /// The first ship covering a cell.
    pub fn ship_at(&self, col: i32, row: i32) -> Option<&Ship> {
        self.ships.iter().find(|s| s.is_ship_present(col, row))
    }

    pub fn is_ship_present(&self, col: i32, row: i32) -> bool {
        self.ship_at(col, row).is_some()
    }

    pub fn shot_at(&self, col: i32, row: i32) -> bool {
        self.shot_history.contains(&(col, row))
    }

    pub fn radar_at(&self, col: i32, row: i32) -> bool {
        self.radar_history.contains(&(col, row))
    }

    pub fn live_ships(&self) -> impl Iterator<Item = &Ship> {
        self.ships.iter().filter(|s| !s.is_sunk())
    }

    pub fn all_sunk(&self) -> bool {
        self.ships.iter().all(|s| s.is_sunk())
    }

    fn in_grid(&self, col: i32, row: i32) -> bool {
        (0..self.n_grid).contains(&col) && (0..self.n_grid).contains(&row)
    }

    /// Resolve a turn against this map.
    pub fn apply_move(&mut self, turn: &Turn) -> Result<TurnResult, BattleshipError> {
        let result = match turn {
            Turn::Move(params) => {
                let ship = self
                    .ships
                    .iter_mut()
                    .find(|s| s.ship_type() == params.ship)
                    .ok_or(BattleshipError::UnknownShip(params.ship))?;
                let moved: MoveResult = ship.apply_move(params);
                log::debug!(
                    "{}: {} moved by ({}, {})",
                    self.map_id,
                    params.ship,
                    moved.ix_cols_moved,
                    moved.ix_rows_moved
                );
                TurnResult::Move(moved)
            }
            Turn::Radar(params) => TurnResult::Radar(self.scan(params)),
            Turn::Shoot(target) => TurnResult::Shoot(self.shotgun(*target)),
            Turn::Pass => TurnResult::Pass,
        };
        Ok(result)
    }

    /// Parse and resolve a wire turn.
    pub fn apply_json_move(&mut self, json: &str) -> Result<TurnResult, BattleshipError> {
        let turn = Turn::from_json(json)?;
        self.apply_move(&turn)
    }

    fn scan(&mut self, params: &RadarParams) -> RadarResult {
        let mut result = RadarResult::default();
        for square in &params.squares {
            self.radar_history.insert((square.ix_col, square.ix_row));
            result.ix_col_scanned.push(square.ix_col);
            result.ix_row_scanned.push(square.ix_row);
            result
                .ship_present
                .push(self.is_ship_present(square.ix_col, square.ix_row));
        }
        result
    }

    /// 3×3 blast centred on `target`. Every in-grid cell is recorded; the
    /// result is that of the last ship hit, in column-major order.
    fn shotgun(&mut self, target: CellCoords) -> ShotResult {
        let mut result = ShotResult::miss();
        for dx in -1..=1 {
            for dy in -1..=1 {
                let (Some(col), Some(row)) =
                    (target.ix_col.checked_add(dx), target.ix_row.checked_add(dy))
                else {
                    continue;
                };
                if !self.in_grid(col, row) {
                    continue;
                }
                self.shot_history.insert((col, row));

                let cell = CellCoords::new(col, row);
                for ship in self.ships.iter_mut().filter(|s| s.is_ship_present(col, row)) {
                    result = ship.apply_shot(cell);
                    if result.newly_sunk {
                        log::info!("{}: {} sunk", self.map_id, ship.name());
                    }
                }
            }
        }
        result
    }

    /// Snapshot for the wire. Ship damage is included.
    pub fn to_map_create(&self) -> BattleshipMapCreate {
        BattleshipMapCreate {
            n_grid: self.n_grid,
            ships: self.ships.clone(),
            map_id: self.map_id.clone(),
            shot_history: self.shot_history.iter().map(|&(c, r)| cell_key(c, r)).collect(),
            radar_history: self
                .radar_history
                .iter()
                .map(|&(c, r)| cell_key(c, r))
                .collect(),
        }
    }

    /// Rebuild a map from a snapshot.
    pub fn inflate(create: BattleshipMapCreate) -> Result<Self, BattleshipError> {
        let mut map = Self::new(create.map_id, create.n_grid, create.ships)?;
        map.shot_history = create
            .shot_history
            .iter()
            .map(|key| parse_cell_key(key))
            .collect::<Result<_, _>>()?;
        map.radar_history = create
            .radar_history
            .iter()
            .map(|key| parse_cell_key(key))
            .collect::<Result<_, _>>()?;
        Ok(map)
    }
}
