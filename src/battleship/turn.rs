//! Turns and their results.
//!
//! On the wire a turn is `{"type": <0..3>, "params": {...}}`, with the
//! params shape selected by the numeric type. Results carry no tag; their
//! shape identifies them.

use serde::{Deserialize, Serialize};

use super::ship::ShipType;
use super::BattleshipError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnType {
    Move = 0,
    Radar = 1,
    Shoot = 2,
    Pass = 3,
}

impl TryFrom<i64> for TurnType {
    type Error = BattleshipError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TurnType::Move),
            1 => Ok(TurnType::Radar),
            2 => Ok(TurnType::Shoot),
            3 => Ok(TurnType::Pass),
            other => Err(BattleshipError::UnrecognizedMove(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellCoords {
    pub ix_col: i32,
    pub ix_row: i32,
}

impl CellCoords {
    pub fn new(ix_col: i32, ix_row: i32) -> Self {
        Self { ix_col, ix_row }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveParams {
    pub ship: ShipType,
    pub ix_cols: i32,
    pub ix_rows: i32,
    /// Carried for clients that award push moves; it doesn't change how
    /// the move resolves.
    #[serde(default)]
    pub push: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarParams {
    pub squares: Vec<CellCoords>,
    #[serde(default)]
    pub stealth: bool,
}

/// A decoded turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireTurn", into = "WireTurn")]
pub enum Turn {
    Move(MoveParams),
    Radar(RadarParams),
    Shoot(CellCoords),
    Pass,
}

/// A turn as it appears on the wire, before its params are interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireTurn {
    #[serde(rename = "type")]
    pub turn_type: i64,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl TryFrom<WireTurn> for Turn {
    type Error = BattleshipError;

    fn try_from(wire: WireTurn) -> Result<Self, Self::Error> {
        let params = wire.params;
        let invalid = |e: serde_json::Error| BattleshipError::InvalidParams(e.to_string());
        Ok(match TurnType::try_from(wire.turn_type)? {
            TurnType::Move => Turn::Move(serde_json::from_value(params).map_err(invalid)?),
            TurnType::Radar => Turn::Radar(serde_json::from_value(params).map_err(invalid)?),
            TurnType::Shoot => Turn::Shoot(serde_json::from_value(params).map_err(invalid)?),
            TurnType::Pass => Turn::Pass,
        })
    }
}

impl From<Turn> for WireTurn {
    fn from(turn: Turn) -> Self {
        let turn_type = turn.turn_type() as i64;
        let params = match turn {
            Turn::Move(p) => serde_json::to_value(p),
            Turn::Radar(p) => serde_json::to_value(p),
            Turn::Shoot(p) => serde_json::to_value(p),
            Turn::Pass => Ok(serde_json::Value::Null),
        };
        WireTurn {
            turn_type,
            // Plain structs with string keys always serialize.
            params: params.unwrap_or_default(),
        }
    }
}

impl Turn {
    pub fn turn_type(&self) -> TurnType {
        match self {
            Turn::Move(_) => TurnType::Move,
            Turn::Radar(_) => TurnType::Radar,
            Turn::Shoot(_) => TurnType::Shoot,
            Turn::Pass => TurnType::Pass,
        }
    }

    /// Parse a wire turn, keeping the distinction between an unknown turn
    /// type and malformed params.
    pub fn from_json(json: &str) -> Result<Turn, BattleshipError> {
        let wire: WireTurn = serde_json::from_str(json)?;
        Turn::try_from(wire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveResult {
    pub ix_cols_moved: i32,
    pub ix_rows_moved: i32,
}

/// Parallel lists, one entry per scanned square.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarResult {
    pub ix_col_scanned: Vec<i32>,
    pub ix_row_scanned: Vec<i32>,
    pub ship_present: Vec<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShotResult {
    pub hit: bool,
    pub sunk: bool,
    #[serde(rename = "newlysunk")]
    pub newly_sunk: bool,
}

impl ShotResult {
    pub fn miss() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnResult {
    Move(MoveResult),
    Radar(RadarResult),
    Shoot(ShotResult),
    Pass,
}
