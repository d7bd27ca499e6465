use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;

/// Event frame pushed by a game server over its ingress socket.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct GameEventPayload {
    /// `message` for chat-like events, `notice` for the rest.
    #[serde(default)]
    pub post_type: String,
    /// `join`, `quit`, `death`, `chat`, `achievement` or `player_command`.
    pub sub_type: String,
    /// Server name as reported in the frame body.
    #[serde(default)]
    pub server_name: Option<String>,
    /// Player the event is about.
    #[serde(default)]
    pub player: Option<PlayerPayload>,
    /// Chat text, death message or command line depending on `sub_type`.
    #[serde(default)]
    pub message: Option<String>,
    /// Present on achievement frames.
    #[serde(default)]
    pub advancement: Option<AdvancementPayload>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
/// Player block of an event frame.
pub struct PlayerPayload {
    /// In-game name.
    #[serde(default)]
    pub nickname: String,
    /// Unique player id.
    #[serde(default)]
    pub uuid: Option<String>,
    /// Operator flag.
    #[serde(default)]
    pub is_op: bool,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
/// Advancement block of an achievement frame.
pub struct AdvancementPayload {
    /// Fallback advancement text.
    #[serde(default)]
    pub text: Option<String>,
    /// Display block carrying the title.
    #[serde(default)]
    pub display: Option<AdvancementDisplay>,
    /// String, list or map of criteria names, depending on the server plugin.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub criteria: Option<Value>,
}

/// Display block of an advancement.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct AdvancementDisplay {
    /// Advancement title.
    #[serde(default)]
    pub title: Option<String>,
}

impl AdvancementPayload {
    /// Human readable title, if the advancement has one.
    pub fn title(&self) -> Option<&str> {
        self.display
            .as_ref()
            .and_then(|display| display.title.as_deref())
            .filter(|title| !title.is_empty())
    }

    /// Fallback text, if non-empty.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|text| !text.is_empty())
    }

    /// Whether any criterion name contains `needle`.
    pub fn has_criterion(&self, needle: &str) -> bool {
        match &self.criteria {
            Some(Value::String(criteria)) => criteria.contains(needle),
            Some(Value::Array(items)) => items
                .iter()
                .any(|item| item.as_str().is_some_and(|item| item.contains(needle))),
            Some(Value::Object(map)) => map.keys().any(|key| key.contains(needle)),
            _ => false,
        }
    }
}
