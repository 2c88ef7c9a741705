//! Messages exchanged between battleship clients and the game server.
//!
//! Envelopes use a numeric `type` with a `payload` whose shape depends on
//! it, the same convention as turns.

use serde::{Deserialize, Serialize};

use super::ship::Ship;
use super::turn::Turn;
use super::BattleshipError;

/// A map as sent to the server when a player joins, and as snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleshipMapCreate {
    pub n_grid: i32,
    pub ships: Vec<Ship>,
    pub map_id: String,
    #[serde(default)]
    pub shot_history: Vec<String>,
    #[serde(default)]
    pub radar_history: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleshipMapCreateResponse {
    pub map_id: String,
    pub create: BattleshipMapCreate,
}

/// A turn by one map against another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleshipApplyMove {
    pub shot_by_map_id: String,
    pub target_map_id: String,
    #[serde(rename = "move")]
    pub turn: Turn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyNewPlayer {
    pub new_map_id: String,
    pub waiting_players_now: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Envelope", into = "Envelope")]
pub enum BattleshipGameMeta {
    /// Client announces its map id.
    Identify(String),
    NotifyNewPlayer(NotifyNewPlayer),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Envelope", into = "Envelope")]
pub enum BattleshipMessage {
    Turn(BattleshipApplyMove),
    Meta(BattleshipGameMeta),
}

/// `{"type": n, "payload": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: i64,
    #[serde(default)]
    payload: serde_json::Value,
}

impl Envelope {
    fn wrap<T: Serialize>(kind: i64, payload: T) -> Self {
        Envelope {
            kind,
            // Payload types are plain structs and strings.
            payload: serde_json::to_value(payload).unwrap_or_default(),
        }
    }

    fn open<T: for<'de> Deserialize<'de>>(self) -> Result<T, BattleshipError> {
        serde_json::from_value(self.payload).map_err(|e| BattleshipError::InvalidParams(e.to_string()))
    }

    fn unknown(self, what: &str) -> BattleshipError {
        BattleshipError::InvalidParams(format!("unknown {} type {}", what, self.kind))
    }
}

impl TryFrom<Envelope> for BattleshipGameMeta {
    type Error = BattleshipError;

    fn try_from(env: Envelope) -> Result<Self, Self::Error> {
        match env.kind {
            0 => Ok(BattleshipGameMeta::Identify(env.open()?)),
            1 => Ok(BattleshipGameMeta::NotifyNewPlayer(env.open()?)),
            _ => Err(env.unknown("meta")),
        }
    }
}

impl From<BattleshipGameMeta> for Envelope {
    fn from(meta: BattleshipGameMeta) -> Self {
        match meta {
            BattleshipGameMeta::Identify(map_id) => Envelope::wrap(0, map_id),
            BattleshipGameMeta::NotifyNewPlayer(notify) => Envelope::wrap(1, notify),
        }
    }
}

impl TryFrom<Envelope> for BattleshipMessage {
    type Error = BattleshipError;

    fn try_from(env: Envelope) -> Result<Self, Self::Error> {
        match env.kind {
            0 => Ok(BattleshipMessage::Turn(env.open()?)),
            1 => Ok(BattleshipMessage::Meta(env.open()?)),
            _ => Err(env.unknown("message")),
        }
    }
}

impl From<BattleshipMessage> for Envelope {
    fn from(msg: BattleshipMessage) -> Self {
        match msg {
            BattleshipMessage::Turn(apply) => Envelope::wrap(0, apply),
            BattleshipMessage::Meta(meta) => Envelope::wrap(1, meta),
        }
    }
}
