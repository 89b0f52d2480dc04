// Two independent simulations fed the same turns must agree on every hash,
// whatever the intents are (legal or not).

use frontier_protocol::{
    ClientId, EmbargoAction, GameConfig, GameId, GameStartInfo, Intent, Player, Turn, UnitType,
};
use frontier_sim::GameState;
use proptest::prelude::*;

fn players() -> Vec<ClientId> {
    ["PLAYER00", "PLAYER01", "PLAYER02"]
        .iter()
        .map(|id| ClientId::new(*id).unwrap())
        .collect()
}

fn start_info() -> GameStartInfo {
    GameStartInfo {
        game_id: GameId::new("DetGame1").unwrap(),
        lobby_created_at: 0,
        config: GameConfig {
            infinite_gold: true,
            ..GameConfig::default()
        },
        players: players()
            .into_iter()
            .enumerate()
            .map(|(i, client_id)| Player {
                client_id,
                username: format!("player{i}"),
                cosmetics: None,
                is_lobby_creator: (i == 0).then_some(true),
            })
            .collect(),
    }
}

fn intent_from(kind: u8, actor: usize, other: usize, tile: u32, amount: u32) -> Intent {
    let ids = players();
    let client_id = ids[actor % ids.len()].clone();
    let target = ids[other % ids.len()].clone();
    match kind % 8 {
        0 => Intent::Spawn { client_id, tile },
        1 => Intent::Attack {
            client_id,
            target_id: (amount % 2 == 0).then_some(target),
            troops: Some(f64::from(amount)),
        },
        2 => Intent::Boat {
            client_id,
            troops: f64::from(amount),
            dst: tile,
        },
        3 => Intent::AllianceRequest {
            client_id,
            recipient: target,
        },
        4 => Intent::BuildUnit {
            client_id,
            unit: UnitType::City,
            tile,
            rocket_direction_up: None,
        },
        5 => Intent::DonateTroops {
            client_id,
            recipient: target,
            troops: None,
        },
        6 => Intent::Embargo {
            client_id,
            target_id: target,
            action: EmbargoAction::Start,
        },
        _ => Intent::BreakAlliance {
            client_id,
            recipient: target,
        },
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn identical_turns_give_identical_hashes(
        script in prop::collection::vec(
            prop::collection::vec((any::<u8>(), 0usize..3, 0usize..3, 0u32..1200, 0u32..3000), 0..4),
            40..80,
        )
    ) {
        let info = start_info();
        let mut a = GameState::new(&info).unwrap();
        let mut b = GameState::new(&info).unwrap();
        for (n, raw) in script.into_iter().enumerate() {
            let turn = Turn {
                turn_number: n as u64,
                intents: raw
                    .into_iter()
                    .map(|(kind, actor, other, tile, amount)| {
                        intent_from(kind, actor, other, tile, amount)
                    })
                    .collect(),
                hash: None,
            };
            let ua = a.execute_turn(&turn).unwrap();
            let ub = b.execute_turn(&turn).unwrap();
            prop_assert_eq!(&ua.hashes, &ub.hashes);
            prop_assert_eq!(&ua.tiles, &ub.tiles);
        }
        prop_assert_eq!(a.state_hash(), b.state_hash());
    }
}

#[test]
fn different_histories_diverge() {
    let info = start_info();
    let mut a = GameState::new(&info).unwrap();
    let mut b = GameState::new(&info).unwrap();
    let tile = a.map().land_tile_from(a.map().width() * 10).unwrap();
    let spawn = Turn {
        turn_number: 0,
        intents: vec![Intent::Spawn {
            client_id: players()[0].clone(),
            tile,
        }],
        hash: None,
    };
    let ha = a.execute_turn(&spawn).unwrap().hashes[0].hash;
    let hb = b.execute_turn(&Turn::empty(0)).unwrap().hashes[0].hash;
    assert_ne!(ha, hb);
}
