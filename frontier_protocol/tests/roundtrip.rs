// Property tests: every message that passes validation survives
// encode -> frame -> unframe -> decode unchanged.
//
// The strategies only build values the schema accepts (valid identifiers,
// bounded config numbers, finite non-negative troop and gold amounts), but
// otherwise range over every variant and every optional field.

use std::collections::BTreeMap;
use std::io::Cursor;

use frontier_protocol::config::{Difficulty, MAX_BOTS, MAX_STARTING_GOLD, MAX_TIMER_MINUTES};
use frontier_protocol::intent::QUICK_CHAT_CATEGORIES;
use frontier_protocol::{
    ClientId, ClientMessage, EMOJI_TABLE, EmbargoAction, EmojiRecipient, GameConfig,
    GameConfigPatch, GameId, GameMapSize, GameMapType, GameMode, GameStartInfo, GameType, Intent,
    LogSeverity, Player, PlayerCosmetics, PlayerStats, PlayerTeams, PublicGameModifiers,
    RankedType, ServerMessage, TeamPreset, Turn, UnitType, Winner, decode_client_message,
    decode_server_message, encode_client_message, encode_server_message, read_frame, write_frame,
};
use proptest::prelude::*;

fn client_id() -> impl Strategy<Value = ClientId> {
    "[A-Za-z0-9]{8}".prop_map(|s| ClientId::new(s).unwrap())
}

fn game_id() -> impl Strategy<Value = GameId> {
    "[A-Za-z0-9]{8}".prop_map(|s| GameId::new(s).unwrap())
}

/// Any finite, non-negative double, subnormals and huge values included.
fn amount() -> impl Strategy<Value = f64> {
    any::<f64>()
        .prop_filter("finite", |v| v.is_finite())
        .prop_map(f64::abs)
}

fn text() -> impl Strategy<Value = String> {
    "[ -~äöüßé漢字]{0,40}"
}

fn username() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_ .üÜ\\[\\]]{3,27}"
}

fn token() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<u128>().prop_map(|n| uuid::Uuid::from_u128(n).to_string()),
        "[A-Za-z0-9_-]{1,20}\\.[A-Za-z0-9_-]{1,40}\\.[A-Za-z0-9_-]{0,20}",
    ]
}

fn unit_type() -> impl Strategy<Value = UnitType> {
    prop::sample::select(vec![
        UnitType::TransportShip,
        UnitType::Warship,
        UnitType::Port,
        UnitType::City,
        UnitType::DefensePost,
        UnitType::MissileSilo,
        UnitType::SamLauncher,
        UnitType::AtomBomb,
        UnitType::HydrogenBomb,
        UnitType::Factory,
    ])
}

fn map_type() -> impl Strategy<Value = GameMapType> {
    prop::sample::select(vec![
        GameMapType::World,
        GameMapType::Europe,
        GameMapType::Asia,
        GameMapType::Africa,
        GameMapType::NorthAmerica,
        GameMapType::SouthAmerica,
        GameMapType::Oceania,
        GameMapType::Mars,
        GameMapType::Britannia,
        GameMapType::Iceland,
    ])
}

fn map_size() -> impl Strategy<Value = GameMapSize> {
    prop::sample::select(vec![GameMapSize::Normal, GameMapSize::Compact])
}

fn difficulty() -> impl Strategy<Value = Difficulty> {
    prop::sample::select(vec![
        Difficulty::Easy,
        Difficulty::Medium,
        Difficulty::Hard,
        Difficulty::Impossible,
    ])
}

fn game_mode() -> impl Strategy<Value = GameMode> {
    prop::sample::select(vec![GameMode::FreeForAll, GameMode::Team])
}

fn player_teams() -> impl Strategy<Value = PlayerTeams> {
    prop_oneof![
        (0u32..64).prop_map(PlayerTeams::Count),
        prop::sample::select(vec![
            TeamPreset::Duos,
            TeamPreset::Trios,
            TeamPreset::Quads,
            TeamPreset::HumansVsNations,
        ])
        .prop_map(PlayerTeams::Preset),
    ]
}

fn gold_multiplier() -> impl Strategy<Value = f64> {
    0.1f64..=1000.0
}

fn starting_gold() -> impl Strategy<Value = f64> {
    0.0f64..=MAX_STARTING_GOLD
}

fn config() -> impl Strategy<Value = GameConfig> {
    let head = (
        map_type(),
        difficulty(),
        any::<[bool; 8]>(),
        prop::sample::select(vec![
            GameType::Singleplayer,
            GameType::Public,
            GameType::Private,
        ]),
        game_mode(),
        prop::option::of(Just(RankedType::OneVsOne)),
        map_size(),
        prop::option::of(
            (any::<[bool; 3]>(), prop::option::of(amount())).prop_map(|(flags, gold)| {
                PublicGameModifiers {
                    is_compact: flags[0],
                    is_random_spawn: flags[1],
                    is_crowded: flags[2],
                    starting_gold: gold,
                }
            }),
        ),
        0..=MAX_BOTS,
    );
    let tail = (
        prop::option::of(any::<bool>()),
        prop::option::of(any::<u32>()),
        prop::option::of(1..=MAX_TIMER_MINUTES),
        prop::option::of(any::<u64>()),
        prop::option::of(prop::collection::vec(unit_type(), 0..4)),
        prop::option::of(player_teams()),
        prop::option::of(gold_multiplier()),
        prop::option::of(starting_gold()),
    );
    (head, tail).prop_map(
        |(
            (game_map, difficulty, flags, game_type, game_mode, ranked_type, size, modifiers, bots),
            (
                disable_nav_mesh,
                max_players,
                max_timer_value,
                spawn_immunity_duration,
                disabled_units,
                player_teams,
                gold_multiplier,
                starting_gold,
            ),
        )| GameConfig {
            game_map,
            difficulty,
            donate_gold: flags[0],
            donate_troops: flags[1],
            game_type,
            game_mode,
            ranked_type,
            game_map_size: size,
            public_game_modifiers: modifiers,
            disable_nations: flags[2],
            bots,
            infinite_gold: flags[3],
            infinite_troops: flags[4],
            instant_build: flags[5],
            disable_nav_mesh,
            random_spawn: flags[6],
            max_players,
            max_timer_value,
            spawn_immunity_duration,
            disabled_units,
            player_teams,
            gold_multiplier,
            starting_gold,
        },
    )
}

fn config_patch() -> impl Strategy<Value = GameConfigPatch> {
    let head = (
        prop::option::of(map_type()),
        prop::option::of(difficulty()),
        prop::option::of(any::<bool>()),
        prop::option::of(any::<bool>()),
        prop::option::of(game_mode()),
        prop::option::of(map_size()),
        prop::option::of(any::<bool>()),
        prop::option::of(0..=MAX_BOTS),
        prop::option::of(any::<[bool; 4]>()),
    );
    let tail = (
        prop::option::of(any::<u32>()),
        prop::option::of(1..=MAX_TIMER_MINUTES),
        prop::option::of(any::<u64>()),
        prop::option::of(prop::collection::vec(unit_type(), 0..4)),
        prop::option::of(player_teams()),
        prop::option::of(gold_multiplier()),
        prop::option::of(starting_gold()),
    );
    (head, tail).prop_map(
        |(
            (game_map, difficulty, donate_gold, donate_troops, game_mode, size, nations, bots, flags),
            (
                max_players,
                max_timer_value,
                spawn_immunity_duration,
                disabled_units,
                player_teams,
                gold_multiplier,
                starting_gold,
            ),
        )| GameConfigPatch {
            game_map,
            difficulty,
            donate_gold,
            donate_troops,
            game_mode,
            game_map_size: size,
            disable_nations: nations,
            bots,
            infinite_gold: flags.map(|f| f[0]),
            infinite_troops: flags.map(|f| f[1]),
            instant_build: flags.map(|f| f[2]),
            random_spawn: flags.map(|f| f[3]),
            max_players,
            max_timer_value,
            spawn_immunity_duration,
            disabled_units,
            player_teams,
            gold_multiplier,
            starting_gold,
        },
    )
}

fn embargo_action() -> impl Strategy<Value = EmbargoAction> {
    prop::sample::select(vec![EmbargoAction::Start, EmbargoAction::Stop])
}

fn quick_chat_key() -> impl Strategy<Value = String> {
    (prop::sample::select(QUICK_CHAT_CATEGORIES), "[a-z_]{1,16}")
        .prop_map(|(category, name)| format!("{category}.{name}"))
}

fn intent() -> impl Strategy<Value = Intent> {
    let id = client_id;
    prop_oneof![
        (id(), prop::option::of(id()), prop::option::of(amount())).prop_map(
            |(client_id, target_id, troops)| Intent::Attack {
                client_id,
                target_id,
                troops,
            }
        ),
        (id(), "[A-Za-z0-9-]{1,64}")
            .prop_map(|(client_id, attack_id)| Intent::CancelAttack { client_id, attack_id }),
        (id(), any::<u32>()).prop_map(|(client_id, tile)| Intent::Spawn { client_id, tile }),
        (id(), any::<bool>()).prop_map(|(client_id, is_disconnected)| {
            Intent::MarkDisconnected {
                client_id,
                is_disconnected,
            }
        }),
        (id(), amount(), any::<u32>()).prop_map(|(client_id, troops, dst)| Intent::Boat {
            client_id,
            troops,
            dst,
        }),
        (id(), any::<u32>())
            .prop_map(|(client_id, unit_id)| Intent::CancelBoat { client_id, unit_id }),
        (id(), id()).prop_map(|(client_id, recipient)| Intent::AllianceRequest {
            client_id,
            recipient,
        }),
        (id(), id(), any::<bool>()).prop_map(|(client_id, requestor, accept)| {
            Intent::AllianceRequestReply {
                client_id,
                requestor,
                accept,
            }
        }),
        (id(), id()).prop_map(|(client_id, recipient)| Intent::BreakAlliance {
            client_id,
            recipient,
        }),
        (id(), id()).prop_map(|(client_id, target)| Intent::TargetPlayer { client_id, target }),
        (
            id(),
            prop_oneof![
                Just(EmojiRecipient::AllPlayers),
                id().prop_map(EmojiRecipient::Player),
            ],
            0..EMOJI_TABLE.len() as u32,
        )
            .prop_map(|(client_id, recipient, emoji)| Intent::Emoji {
                client_id,
                recipient,
                emoji,
            }),
        (id(), id(), prop::option::of(amount())).prop_map(|(client_id, recipient, gold)| {
            Intent::DonateGold {
                client_id,
                recipient,
                gold,
            }
        }),
        (id(), id(), prop::option::of(amount())).prop_map(|(client_id, recipient, troops)| {
            Intent::DonateTroops {
                client_id,
                recipient,
                troops,
            }
        }),
        (id(), unit_type(), any::<u32>(), prop::option::of(any::<bool>())).prop_map(
            |(client_id, unit, tile, rocket_direction_up)| Intent::BuildUnit {
                client_id,
                unit,
                tile,
                rocket_direction_up,
            }
        ),
        (id(), unit_type(), any::<u32>()).prop_map(|(client_id, unit, unit_id)| {
            Intent::UpgradeStructure {
                client_id,
                unit,
                unit_id,
            }
        }),
        (id(), id(), embargo_action()).prop_map(|(client_id, target_id, action)| {
            Intent::Embargo {
                client_id,
                target_id,
                action,
            }
        }),
        (id(), embargo_action())
            .prop_map(|(client_id, action)| Intent::EmbargoAll { client_id, action }),
        (id(), any::<u32>(), any::<u32>()).prop_map(|(client_id, unit_id, tile)| {
            Intent::MoveWarship {
                client_id,
                unit_id,
                tile,
            }
        }),
        (id(), id(), quick_chat_key(), prop::option::of(id())).prop_map(
            |(client_id, recipient, quick_chat_key, target)| Intent::QuickChat {
                client_id,
                recipient,
                quick_chat_key,
                target,
            }
        ),
        (id(), id()).prop_map(|(client_id, recipient)| Intent::AllianceExtension {
            client_id,
            recipient,
        }),
        (id(), any::<u32>())
            .prop_map(|(client_id, unit_id)| Intent::DeleteUnit { client_id, unit_id }),
        (id(), id()).prop_map(|(client_id, target)| Intent::KickPlayer { client_id, target }),
        (id(), any::<bool>())
            .prop_map(|(client_id, paused)| Intent::TogglePause { client_id, paused }),
        (id(), config_patch())
            .prop_map(|(client_id, config)| Intent::UpdateGameConfig { client_id, config }),
    ]
}

fn turn() -> impl Strategy<Value = Turn> {
    (
        any::<u64>(),
        prop::collection::vec(intent(), 0..6),
        prop::option::of(any::<i64>()),
    )
        .prop_map(|(turn_number, intents, hash)| Turn {
            turn_number,
            intents,
            hash,
        })
}

fn cosmetics() -> impl Strategy<Value = PlayerCosmetics> {
    (
        prop::option::of(prop_oneof![
            Just(String::new()),
            "[A-Za-z]{2}",
            "![a-z0-9_]{0,40}",
        ]),
        prop::option::of("#[0-9a-fA-F]{6}"),
        prop::option::of("[a-z_]{1,30}"),
    )
        .prop_map(|(flag, color, pattern_name)| PlayerCosmetics {
            flag,
            color,
            pattern_name,
        })
}

fn start_info() -> impl Strategy<Value = GameStartInfo> {
    (
        game_id(),
        any::<u64>(),
        config(),
        prop::collection::btree_map(
            client_id(),
            (username(), prop::option::of(cosmetics()), prop::option::of(any::<bool>())),
            1..5,
        ),
    )
        .prop_map(|(game_id, lobby_created_at, config, seats)| GameStartInfo {
            game_id,
            lobby_created_at,
            config,
            players: seats
                .into_iter()
                .map(|(client_id, (username, cosmetics, is_lobby_creator))| Player {
                    client_id,
                    username,
                    cosmetics,
                    is_lobby_creator,
                })
                .collect(),
        })
}

fn winner() -> impl Strategy<Value = Winner> {
    let ids = || prop::collection::vec(client_id(), 0..4);
    prop_oneof![
        (client_id(), ids()).prop_map(|(client_id, others)| Winner::Player { client_id, others }),
        (text(), ids()).prop_map(|(name, members)| Winner::Team { name, members }),
        (text(), ids()).prop_map(|(name, members)| Winner::Nation { name, members }),
    ]
}

fn stats() -> impl Strategy<Value = BTreeMap<ClientId, PlayerStats>> {
    prop::collection::btree_map(
        client_id(),
        any::<[u64; 7]>().prop_map(|n| PlayerStats {
            attacks: n[0],
            conquests: n[1],
            betrayals: n[2],
            boats: n[3],
            units_built: n[4],
            gold_donated: n[5],
            troops_donated: n[6],
        }),
        0..4,
    )
}

fn client_message() -> impl Strategy<Value = ClientMessage> {
    prop_oneof![
        (
            client_id(),
            token(),
            game_id(),
            username(),
            prop::option::of(cosmetics()),
            prop::option::of("[A-Za-z0-9._-]{1,80}"),
        )
            .prop_map(
                |(client_id, token, game_id, username, cosmetics, turnstile_token)| {
                    ClientMessage::Join {
                        client_id,
                        token,
                        game_id,
                        username,
                        cosmetics,
                        turnstile_token,
                    }
                }
            ),
        (game_id(), client_id(), any::<u64>(), token()).prop_map(
            |(game_id, client_id, last_turn, token)| ClientMessage::Rejoin {
                game_id,
                client_id,
                last_turn,
                token,
            }
        ),
        intent().prop_map(|intent| ClientMessage::Intent { intent }),
        (any::<i64>(), any::<u64>())
            .prop_map(|(hash, turn_number)| ClientMessage::Hash { hash, turn_number }),
        (prop::option::of(winner()), stats()).prop_map(|(winner, all_players_stats)| {
            ClientMessage::Winner {
                winner,
                all_players_stats,
            }
        }),
        (
            prop::sample::select(vec![
                LogSeverity::Debug,
                LogSeverity::Info,
                LogSeverity::Warn,
                LogSeverity::Error,
                LogSeverity::Fatal,
            ]),
            text(),
        )
            .prop_map(|(severity, log)| ClientMessage::Log { severity, log }),
        Just(ClientMessage::Ping),
    ]
}

fn server_message() -> impl Strategy<Value = ServerMessage> {
    prop_oneof![
        (map_type(), map_size()).prop_map(|(game_map, game_map_size)| ServerMessage::Prestart {
            game_map,
            game_map_size,
        }),
        (prop::collection::vec(turn(), 0..4), start_info(), any::<u64>()).prop_map(
            |(turns, game_start_info, lobby_created_at)| ServerMessage::Start {
                turns,
                game_start_info,
                lobby_created_at,
            }
        ),
        turn().prop_map(|turn| ServerMessage::Turn { turn }),
        (
            any::<u64>(),
            prop::option::of(any::<i64>()),
            any::<u32>(),
            any::<u32>(),
            prop::option::of(any::<i64>()),
        )
            .prop_map(
                |(turn, correct_hash, clients_with_correct_hash, total_active_clients, your_hash)| {
                    ServerMessage::Desync {
                        turn,
                        correct_hash,
                        clients_with_correct_hash,
                        total_active_clients,
                        your_hash,
                    }
                }
            ),
        (text(), prop::option::of(text()))
            .prop_map(|(error, message)| ServerMessage::Error { error, message }),
        Just(ServerMessage::Ping),
    ]
}

/// Push bytes through the length-prefixed framing and back.
fn reframe(json: &[u8]) -> Vec<u8> {
    let mut wire = Vec::new();
    write_frame(&mut wire, json).unwrap();
    read_frame(&mut Cursor::new(wire)).unwrap().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn client_messages_survive_the_wire(msg in client_message()) {
        let json = encode_client_message(&msg).unwrap();
        let decoded = decode_client_message(&reframe(&json)).unwrap();
        prop_assert_eq!(decoded, msg);
    }

    #[test]
    fn server_messages_survive_the_wire(msg in server_message()) {
        let json = encode_server_message(&msg).unwrap();
        let decoded = decode_server_message(&reframe(&json)).unwrap();
        prop_assert_eq!(decoded, msg);
    }

    /// Doubles take the shortest decimal form on the wire and must still
    /// come back bit for bit.
    #[test]
    fn boat_troops_are_exact(troops in amount()) {
        let msg = ClientMessage::Intent {
            intent: Intent::Boat {
                client_id: ClientId::new("BOATER01").unwrap(),
                troops,
                dst: 7,
            },
        };
        let decoded = decode_client_message(&encode_client_message(&msg).unwrap()).unwrap();
        match decoded {
            ClientMessage::Intent { intent: Intent::Boat { troops: back, .. } } => {
                prop_assert_eq!(back.to_bits(), troops.to_bits());
            }
            other => prop_assert!(false, "decoded into {:?}", other),
        }
    }
}

#[test]
fn repeating_fractions_round_trip() {
    for n in (1..200_000u32).step_by(7) {
        let troops = f64::from(n) / 997.0 * 1e4;
        let msg = ClientMessage::Intent {
            intent: Intent::Boat {
                client_id: ClientId::new("BOATER01").unwrap(),
                troops,
                dst: 0,
            },
        };
        let decoded = decode_client_message(&encode_client_message(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg, "troops {troops}");
    }
}
