//! Side-effect-free predicates over incoming messages.

use crate::bot::message::{BotIdentity, IncomingMessage};

/// Channel ids for public and group channels start with this marker.
pub const CHANNEL_MARKER: char = 'C';
/// Channel ids for one-to-one conversations start with this marker.
pub const DIRECT_MARKER: char = 'D';

/// Phrase that triggers a joke regardless of the bot's name.
pub const TRIGGER_PHRASE: &str = "chuck norris";

pub fn is_chat_message(msg: &IncomingMessage) -> bool {
    msg.kind == "message" && msg.text.as_deref().is_some_and(|t| !t.is_empty())
}

pub fn is_channel_conversation(msg: &IncomingMessage) -> bool {
    msg.channel().starts_with(CHANNEL_MARKER)
}

pub fn is_direct_conversation(msg: &IncomingMessage) -> bool {
    msg.channel().starts_with(DIRECT_MARKER)
}

/// Without a resolved identity nothing is considered our own.
pub fn is_from_self(msg: &IncomingMessage, identity: Option<&BotIdentity>) -> bool {
    match (identity, msg.user.as_deref()) {
        (Some(me), Some(user)) => !me.id.is_empty() && me.id == user,
        _ => false,
    }
}

pub fn mentions_trigger(msg: &IncomingMessage, bot_name: &str) -> bool {
    let text = msg.text().to_lowercase();
    let name = bot_name.to_lowercase();
    text.contains(TRIGGER_PHRASE) || (!name.is_empty() && text.contains(&name))
}

/// Which dispatch branches a message qualifies for. Both may be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classification {
    pub joke: bool,
    pub direct: bool,
}

pub fn classify(msg: &IncomingMessage, identity: Option<&BotIdentity>, bot_name: &str) -> Classification {
    if !is_chat_message(msg) || is_from_self(msg, identity) {
        return Classification::default();
    }
    Classification {
        joke: is_channel_conversation(msg) && mentions_trigger(msg, bot_name),
        direct: is_direct_conversation(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(channel: &str, user: &str, text: &str) -> IncomingMessage {
        IncomingMessage {
            kind: "message".to_string(),
            text: Some(text.to_string()),
            channel: Some(channel.to_string()),
            user: Some(user.to_string()),
        }
    }

    fn me() -> BotIdentity {
        BotIdentity { id: "UBOT".to_string(), name: "jarvisbot".to_string() }
    }

    #[test]
    fn test_chat_message_requires_text() {
        assert!(is_chat_message(&msg("C1", "U1", "hi")));
        assert!(!is_chat_message(&msg("C1", "U1", "")));

        let mut no_text = msg("C1", "U1", "hi");
        no_text.text = None;
        assert!(!is_chat_message(&no_text));

        let mut typing = msg("C1", "U1", "hi");
        typing.kind = "user_typing".to_string();
        assert!(!is_chat_message(&typing));
    }

    #[test]
    fn test_channel_markers_are_exclusive() {
        for id in ["C024BE91L", "CABC", "C"] {
            let m = msg(id, "U1", "x");
            assert!(is_channel_conversation(&m));
            assert!(!is_direct_conversation(&m));
        }
        for id in ["D024BE91L", "DXYZ", "D"] {
            let m = msg(id, "U1", "x");
            assert!(is_direct_conversation(&m));
            assert!(!is_channel_conversation(&m));
        }
        let group = msg("G123", "U1", "x");
        assert!(!is_channel_conversation(&group));
        assert!(!is_direct_conversation(&group));
    }

    #[test]
    fn test_missing_channel_is_neither() {
        let mut m = msg("C1", "U1", "x");
        m.channel = None;
        assert!(!is_channel_conversation(&m));
        assert!(!is_direct_conversation(&m));
    }

    #[test]
    fn test_from_self() {
        let identity = me();
        assert!(is_from_self(&msg("C1", "UBOT", "x"), Some(&identity)));
        assert!(!is_from_self(&msg("C1", "U1", "x"), Some(&identity)));
        assert!(!is_from_self(&msg("C1", "UBOT", "x"), None));

        let mut anonymous = msg("C1", "", "x");
        anonymous.user = None;
        assert!(!is_from_self(&anonymous, Some(&identity)));
    }

    #[test]
    fn test_mentions_trigger_case_insensitive() {
        assert!(mentions_trigger(&msg("C1", "U1", "Tell me about CHUCK Norris"), "JarvisBot"));
        assert!(mentions_trigger(&msg("C1", "U1", "hey jarvisbot!"), "JarvisBot"));
        assert!(mentions_trigger(&msg("C1", "U1", "HEY JARVISBOT"), "jarvisbot"));
        assert!(!mentions_trigger(&msg("C1", "U1", "chuck is here"), "JarvisBot"));
        assert!(!mentions_trigger(&msg("C1", "U1", "anything"), ""));
    }

    #[test]
    fn test_classify_branches() {
        let identity = me();
        let joke = classify(&msg("C1", "U1", "chuck norris please"), Some(&identity), "JarvisBot");
        assert_eq!(joke, Classification { joke: true, direct: false });

        let direct = classify(&msg("D1", "U1", "I am expecting Bob at 3PM"), Some(&identity), "JarvisBot");
        assert_eq!(direct, Classification { joke: false, direct: true });

        let quiet = classify(&msg("C1", "U1", "lunch?"), Some(&identity), "JarvisBot");
        assert_eq!(quiet, Classification::default());
    }

    #[test]
    fn test_classify_ignores_own_messages() {
        let identity = me();
        for channel in ["C1", "D1"] {
            let c = classify(&msg(channel, "UBOT", "chuck norris jarvisbot"), Some(&identity), "JarvisBot");
            assert_eq!(c, Classification::default());
        }
    }
}
