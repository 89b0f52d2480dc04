// Player intents: the only way anything changes inside a running game.
//
// An `Intent` is an immutable record of one player action, stamped with the
// acting client's ID. Clients send intents to the relay one at a time; the
// relay batches them into `Turn`s in arrival order; every client applies the
// same turns in the same order. The simulation decides whether an intent is
// legal when it executes. This module only guarantees the intent is well
// formed.
//
// Field names on the wire are the browser client's (`targetID`, `unitId`,
// `quickChatKey`, ...), hence the explicit renames.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{GameConfigPatch, UnitType};
use crate::types::ClientId;
use crate::validate::{SchemaError, Validate, check_non_negative};

/// Emoji palette indexed by `emoji` intents.
pub const EMOJI_TABLE: &[&str] = &[
    "😀", "😊", "🥰", "😇", "😎", "😞", "🥺", "😭", "😱", "😡", "😈", "🤡", "🖕", "🥱", "🫡",
    "🤝", "👍", "👎", "👏", "🙏", "💪", "👀", "🏳️", "🔥", "💀", "⚔️", "🛡️", "⛵", "💰", "🎉",
];

/// Categories accepted in `quick_chat` keys (`category.key`).
pub const QUICK_CHAT_CATEGORIES: &[&str] = &["help", "attack", "defend", "greet", "misc", "warnings"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbargoAction {
    Start,
    Stop,
}

/// Recipient of an emoji: one player or everyone.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EmojiRecipient {
    AllPlayers,
    Player(ClientId),
}

const ALL_PLAYERS: &str = "AllPlayers";

impl TryFrom<String> for EmojiRecipient {
    type Error = SchemaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s == ALL_PLAYERS {
            Ok(Self::AllPlayers)
        } else {
            ClientId::new(s).map(Self::Player)
        }
    }
}

impl From<EmojiRecipient> for String {
    fn from(recipient: EmojiRecipient) -> String {
        match recipient {
            EmojiRecipient::AllPlayers => ALL_PLAYERS.to_string(),
            EmojiRecipient::Player(id) => id.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", deny_unknown_fields)]
pub enum Intent {
    /// Send troops against a neighbour, or into unclaimed land when
    /// `target_id` is null. Null troops means "the default share".
    #[serde(rename = "attack")]
    Attack {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        #[serde(rename = "targetID")]
        target_id: Option<ClientId>,
        troops: Option<f64>,
    },
    #[serde(rename = "cancel_attack")]
    CancelAttack {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        #[serde(rename = "attackID")]
        attack_id: String,
    },
    #[serde(rename = "spawn")]
    Spawn {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        tile: u32,
    },
    /// Injected by the relay when a client drops or returns.
    #[serde(rename = "mark_disconnected")]
    MarkDisconnected {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        #[serde(rename = "isDisconnected")]
        is_disconnected: bool,
    },
    #[serde(rename = "boat")]
    Boat {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        troops: f64,
        dst: u32,
    },
    #[serde(rename = "cancel_boat")]
    CancelBoat {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        #[serde(rename = "unitID")]
        unit_id: u32,
    },
    #[serde(rename = "allianceRequest")]
    AllianceRequest {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        recipient: ClientId,
    },
    #[serde(rename = "allianceRequestReply")]
    AllianceRequestReply {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        requestor: ClientId,
        accept: bool,
    },
    #[serde(rename = "breakAlliance")]
    BreakAlliance {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        recipient: ClientId,
    },
    #[serde(rename = "targetPlayer")]
    TargetPlayer {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        target: ClientId,
    },
    #[serde(rename = "emoji")]
    Emoji {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        recipient: EmojiRecipient,
        emoji: u32,
    },
    #[serde(rename = "donate_gold")]
    DonateGold {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        recipient: ClientId,
        gold: Option<f64>,
    },
    #[serde(rename = "donate_troops")]
    DonateTroops {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        recipient: ClientId,
        troops: Option<f64>,
    },
    #[serde(rename = "build_unit")]
    BuildUnit {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        unit: UnitType,
        tile: u32,
        #[serde(
            rename = "rocketDirectionUp",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        rocket_direction_up: Option<bool>,
    },
    #[serde(rename = "upgrade_structure")]
    UpgradeStructure {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        unit: UnitType,
        #[serde(rename = "unitId")]
        unit_id: u32,
    },
    #[serde(rename = "embargo")]
    Embargo {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        #[serde(rename = "targetID")]
        target_id: ClientId,
        action: EmbargoAction,
    },
    #[serde(rename = "embargo_all")]
    EmbargoAll {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        action: EmbargoAction,
    },
    #[serde(rename = "move_warship")]
    MoveWarship {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        #[serde(rename = "unitId")]
        unit_id: u32,
        tile: u32,
    },
    #[serde(rename = "quick_chat")]
    QuickChat {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        recipient: ClientId,
        #[serde(rename = "quickChatKey")]
        quick_chat_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ClientId>,
    },
    #[serde(rename = "allianceExtension")]
    AllianceExtension {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        recipient: ClientId,
    },
    #[serde(rename = "delete_unit")]
    DeleteUnit {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        #[serde(rename = "unitId")]
        unit_id: u32,
    },
    #[serde(rename = "kick_player")]
    KickPlayer {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        target: ClientId,
    },
    #[serde(rename = "toggle_pause")]
    TogglePause {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        #[serde(default)]
        paused: bool,
    },
    #[serde(rename = "update_game_config")]
    UpdateGameConfig {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        config: GameConfigPatch,
    },
}

impl Intent {
    /// The client that authored this intent.
    pub fn client_id(&self) -> &ClientId {
        match self {
            Self::Attack { client_id, .. }
            | Self::CancelAttack { client_id, .. }
            | Self::Spawn { client_id, .. }
            | Self::MarkDisconnected { client_id, .. }
            | Self::Boat { client_id, .. }
            | Self::CancelBoat { client_id, .. }
            | Self::AllianceRequest { client_id, .. }
            | Self::AllianceRequestReply { client_id, .. }
            | Self::BreakAlliance { client_id, .. }
            | Self::TargetPlayer { client_id, .. }
            | Self::Emoji { client_id, .. }
            | Self::DonateGold { client_id, .. }
            | Self::DonateTroops { client_id, .. }
            | Self::BuildUnit { client_id, .. }
            | Self::UpgradeStructure { client_id, .. }
            | Self::Embargo { client_id, .. }
            | Self::EmbargoAll { client_id, .. }
            | Self::MoveWarship { client_id, .. }
            | Self::QuickChat { client_id, .. }
            | Self::AllianceExtension { client_id, .. }
            | Self::DeleteUnit { client_id, .. }
            | Self::KickPlayer { client_id, .. }
            | Self::TogglePause { client_id, .. }
            | Self::UpdateGameConfig { client_id, .. } => client_id,
        }
    }

    pub fn is_toggle_pause(&self) -> bool {
        matches!(self, Self::TogglePause { .. })
    }

    /// The wire discriminator, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Attack { .. } => "attack",
            Self::CancelAttack { .. } => "cancel_attack",
            Self::Spawn { .. } => "spawn",
            Self::MarkDisconnected { .. } => "mark_disconnected",
            Self::Boat { .. } => "boat",
            Self::CancelBoat { .. } => "cancel_boat",
            Self::AllianceRequest { .. } => "allianceRequest",
            Self::AllianceRequestReply { .. } => "allianceRequestReply",
            Self::BreakAlliance { .. } => "breakAlliance",
            Self::TargetPlayer { .. } => "targetPlayer",
            Self::Emoji { .. } => "emoji",
            Self::DonateGold { .. } => "donate_gold",
            Self::DonateTroops { .. } => "donate_troops",
            Self::BuildUnit { .. } => "build_unit",
            Self::UpgradeStructure { .. } => "upgrade_structure",
            Self::Embargo { .. } => "embargo",
            Self::EmbargoAll { .. } => "embargo_all",
            Self::MoveWarship { .. } => "move_warship",
            Self::QuickChat { .. } => "quick_chat",
            Self::AllianceExtension { .. } => "allianceExtension",
            Self::DeleteUnit { .. } => "delete_unit",
            Self::KickPlayer { .. } => "kick_player",
            Self::TogglePause { .. } => "toggle_pause",
            Self::UpdateGameConfig { .. } => "update_game_config",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} by {}", self.kind(), self.client_id())
    }
}

fn check_quick_chat_key(key: &str) -> Result<(), SchemaError> {
    let valid = key.split_once('.').is_some_and(|(category, name)| {
        QUICK_CHAT_CATEGORIES.contains(&category)
            && !name.is_empty()
            && name.bytes().all(|b| b.is_ascii_lowercase() || b == b'_')
    });
    if valid {
        Ok(())
    } else {
        Err(SchemaError::invalid(
            "intent.quickChatKey",
            format!("{key:?} is not a known category.key"),
        ))
    }
}

impl Validate for Intent {
    fn validate(&self) -> Result<(), SchemaError> {
        match self {
            Self::Attack {
                troops: Some(troops),
                ..
            }
            | Self::DonateTroops {
                troops: Some(troops),
                ..
            }
            | Self::Boat { troops, .. } => check_non_negative("intent.troops", *troops),
            Self::DonateGold {
                gold: Some(gold), ..
            } => check_non_negative("intent.gold", *gold),
            Self::Emoji { emoji, .. } => {
                if (*emoji as usize) < EMOJI_TABLE.len() {
                    Ok(())
                } else {
                    Err(SchemaError::invalid(
                        "intent.emoji",
                        format!("index {emoji} outside the emoji table"),
                    ))
                }
            }
            Self::QuickChat { quick_chat_key, .. } => check_quick_chat_key(quick_chat_key),
            Self::CancelAttack { attack_id, .. } => {
                if attack_id.is_empty() || attack_id.len() > 64 {
                    Err(SchemaError::invalid("intent.attackID", "must be 1-64 characters"))
                } else {
                    Ok(())
                }
            }
            Self::UpdateGameConfig { config, .. } => config.validate(),
            _ => Ok(()),
        }
    }
}
