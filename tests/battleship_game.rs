//! Battleship game integration test
//!
//! Two players exchange turns as wire messages. Each message is serialized,
//! routed to the target map by id and resolved there, the way the game
//! server relays turns between clients.
//!
//! Run with:
//!   cargo test --test battleship_game

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::SeedableRng;

use tourjs::battleship::{
    BattleshipApplyMove, BattleshipError, BattleshipGameMap, BattleshipGameMeta,
    BattleshipMapCreate, BattleshipMessage, CellCoords, MoveParams, RadarParams, Ship, ShipType,
    Turn, TurnResult,
};

/// Relay one wire message to the map it targets.
fn relay(
    maps: &mut HashMap<String, BattleshipGameMap>,
    wire: &str,
) -> Result<Option<TurnResult>, BattleshipError> {
    let message: BattleshipMessage = serde_json::from_str(wire)?;
    match message {
        BattleshipMessage::Turn(apply) => {
            let target = maps
                .get_mut(&apply.target_map_id)
                .ok_or_else(|| BattleshipError::InvalidParams(apply.target_map_id.clone()))?;
            target.apply_move(&apply.turn).map(Some)
        }
        BattleshipMessage::Meta(_) => Ok(None),
    }
}

fn turn_message(from: &str, to: &str, turn: Turn) -> String {
    serde_json::to_string(&BattleshipMessage::Turn(BattleshipApplyMove {
        shot_by_map_id: from.to_string(),
        target_map_id: to.to_string(),
        turn,
    }))
    .unwrap()
}

#[test]
fn test_sweeping_shotgun_sinks_whole_fleet() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut maps = HashMap::new();
    maps.insert(
        "alice".to_string(),
        BattleshipGameMap::random_fleet("alice", 11, &mut rng).unwrap(),
    );
    maps.insert(
        "bob".to_string(),
        BattleshipGameMap::random_fleet("bob", 11, &mut rng).unwrap(),
    );

    // Blasts centred on every third cell from 1 cover the 11×11 grid.
    for col in (1..11).step_by(3) {
        for row in (1..11).step_by(3) {
            let wire = turn_message("alice", "bob", Turn::Shoot(CellCoords::new(col, row)));
            let result = relay(&mut maps, &wire).unwrap();
            assert!(matches!(result, Some(TurnResult::Shoot(_))));
        }
    }

    let bob = &maps["bob"];
    assert!(bob.all_sunk());
    assert_eq!(bob.live_ships().count(), 0);
    assert!((0..11).all(|c| (0..11).all(|r| bob.shot_at(c, r))));
    assert!(!maps["alice"].shot_at(0, 0));
}

#[test]
fn test_move_radar_and_snapshot_over_the_wire() {
    let ships = vec![
        Ship::new(ShipType::Patrol, 0, 0, false, 11),
        Ship::new(ShipType::Sub, 5, 5, true, 11),
    ];
    let mut maps = HashMap::new();
    maps.insert(
        "target".to_string(),
        BattleshipGameMap::new("target", 11, ships).unwrap(),
    );

    let wire = turn_message(
        "target",
        "target",
        Turn::Move(MoveParams {
            ship: ShipType::Sub,
            ix_cols: 20,
            ix_rows: 20,
            push: false,
        }),
    );
    let moved = relay(&mut maps, &wire).unwrap();
    assert_eq!(
        serde_json::to_value(moved).unwrap(),
        serde_json::json!({"ixColsMoved": 5, "ixRowsMoved": 3})
    );

    let wire = turn_message(
        "hunter",
        "target",
        Turn::Radar(RadarParams {
            squares: vec![CellCoords::new(10, 8), CellCoords::new(5, 5)],
            stealth: false,
        }),
    );
    match relay(&mut maps, &wire).unwrap() {
        Some(TurnResult::Radar(radar)) => assert_eq!(radar.ship_present, vec![true, false]),
        other => panic!("expected radar result, got {:?}", other),
    }

    let wire = turn_message("hunter", "target", Turn::Shoot(CellCoords::new(1, 1)));
    relay(&mut maps, &wire).unwrap();

    // A restored snapshot is indistinguishable from the live map.
    let snapshot = serde_json::to_string(&maps["target"].to_map_create()).unwrap();
    let create: BattleshipMapCreate = serde_json::from_str(&snapshot).unwrap();
    let restored = BattleshipGameMap::inflate(create).unwrap();
    assert_eq!(&restored, &maps["target"]);
    assert!(restored.ship(ShipType::Patrol).unwrap().is_sunk());
    assert!(restored.radar_at(10, 8));
    assert_eq!(restored.ship(ShipType::Sub).unwrap().top_left(), (10, 8));
}

#[test]
fn test_bad_messages() {
    let mut maps = HashMap::new();
    maps.insert(
        "m".to_string(),
        BattleshipGameMap::new("m", 11, vec![Ship::new(ShipType::Patrol, 0, 0, true, 11)])
            .unwrap(),
    );

    let unknown_turn =
        r#"{"type":0,"payload":{"shotByMapId":"x","targetMapId":"m","move":{"type":4,"params":{}}}}"#;
    assert!(relay(&mut maps, unknown_turn).is_err());

    let missing_ship = turn_message(
        "x",
        "m",
        Turn::Move(MoveParams {
            ship: ShipType::Carrier,
            ix_cols: 1,
            ix_rows: 1,
            push: true,
        }),
    );
    assert_eq!(
        relay(&mut maps, &missing_ship),
        Err(BattleshipError::UnknownShip(ShipType::Carrier))
    );

    let identify = serde_json::to_string(&BattleshipMessage::Meta(BattleshipGameMeta::Identify(
        "m".into(),
    )))
    .unwrap();
    assert_eq!(relay(&mut maps, &identify), Ok(None));
}
