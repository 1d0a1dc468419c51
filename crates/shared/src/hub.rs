//! Closed enumerations of the hubs, the methods they accept and the events
//! they push.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One logical channel on the hub server. Each is a separate persistent
/// connection at `{hub_base}/{path}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HubName {
    Chat,
    Group,
    Search,
    Notification,
}

impl HubName {
    pub const ALL: [HubName; 4] = [
        HubName::Chat,
        HubName::Group,
        HubName::Search,
        HubName::Notification,
    ];

    /// Path suffix on the hub base URL
    pub fn path(self) -> &'static str {
        match self {
            HubName::Chat => "chat",
            HubName::Group => "group",
            HubName::Search => "search",
            HubName::Notification => "notification",
        }
    }
}

impl fmt::Display for HubName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl FromStr for HubName {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HubName::ALL
            .into_iter()
            .find(|hub| hub.path().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownName(s.to_string()))
    }
}

/// A hub, method or event name outside the known set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown name: {0}")]
pub struct UnknownName(pub String);

/// Remote-invokable hub methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HubMethod {
    JoinChatRoom,
    LeaveChatRoom,
    SendMessage,
    SendGroupMessage,
    BroadcastMessage,
    GetChatMessages,
    GetGroupChatMessages,
    GetPreviousBroadcasts,
    SendTypingNotification,
    SendGroupTypingNotification,
    SearchForFriend,
    GetFriendsOnlineStatus,
    MarkPrivateAsRead,
    MarkGroupAsRead,
}

impl HubMethod {
    pub const ALL: [HubMethod; 14] = [
        HubMethod::JoinChatRoom,
        HubMethod::LeaveChatRoom,
        HubMethod::SendMessage,
        HubMethod::SendGroupMessage,
        HubMethod::BroadcastMessage,
        HubMethod::GetChatMessages,
        HubMethod::GetGroupChatMessages,
        HubMethod::GetPreviousBroadcasts,
        HubMethod::SendTypingNotification,
        HubMethod::SendGroupTypingNotification,
        HubMethod::SearchForFriend,
        HubMethod::GetFriendsOnlineStatus,
        HubMethod::MarkPrivateAsRead,
        HubMethod::MarkGroupAsRead,
    ];

    /// Target name on the wire
    pub fn name(self) -> &'static str {
        match self {
            HubMethod::JoinChatRoom => "JoinChatRoom",
            HubMethod::LeaveChatRoom => "LeaveChatRoom",
            HubMethod::SendMessage => "SendMessage",
            HubMethod::SendGroupMessage => "SendGroupMessage",
            HubMethod::BroadcastMessage => "BroadcastMessage",
            HubMethod::GetChatMessages => "GetChatMessages",
            HubMethod::GetGroupChatMessages => "GetGroupChatMessages",
            HubMethod::GetPreviousBroadcasts => "GetPreviousBroadcasts",
            HubMethod::SendTypingNotification => "SendTypingNotification",
            HubMethod::SendGroupTypingNotification => "SendGroupTypingNotification",
            HubMethod::SearchForFriend => "SearchForFriend",
            HubMethod::GetFriendsOnlineStatus => "GetFriendsOnlineStatus",
            HubMethod::MarkPrivateAsRead => "MarkPrivateAsRead",
            HubMethod::MarkGroupAsRead => "MarkGroupAsRead",
        }
    }

    /// Hubs that expose this method
    pub fn hubs(self) -> &'static [HubName] {
        match self {
            HubMethod::JoinChatRoom | HubMethod::LeaveChatRoom => &[HubName::Chat, HubName::Group],
            HubMethod::SendMessage
            | HubMethod::BroadcastMessage
            | HubMethod::GetChatMessages
            | HubMethod::GetPreviousBroadcasts
            | HubMethod::SendTypingNotification
            | HubMethod::MarkPrivateAsRead => &[HubName::Chat],
            HubMethod::SendGroupMessage
            | HubMethod::GetGroupChatMessages
            | HubMethod::SendGroupTypingNotification
            | HubMethod::MarkGroupAsRead => &[HubName::Group],
            HubMethod::SearchForFriend => &[HubName::Search],
            HubMethod::GetFriendsOnlineStatus => &[HubName::Notification],
        }
    }

    pub fn is_available_on(self, hub: HubName) -> bool {
        self.hubs().contains(&hub)
    }

    /// Message-send operations are buffered while their hub is down instead
    /// of failing.
    pub fn is_queueable(self) -> bool {
        matches!(self, HubMethod::SendMessage | HubMethod::SendGroupMessage)
    }
}

impl fmt::Display for HubMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HubMethod {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HubMethod::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| UnknownName(s.to_string()))
    }
}

/// Server-pushed event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HubEventKind {
    ReceiveMessage,
    ReceivePreviousMessages,
    ReceiveErrorMessage,
    ReceiveGroupMessage,
    ReceivePreviousGroupMessages,
    ReceiveGroupErrorMessage,
    ReceiveBroadcast,
    ReceivePreviousBroadcasts,
    ReceiveOnlineStatus,
    ReceiveFriendsOnlineStatus,
    ReceiveTypingNotification,
    ReceiveGroupTypingNotification,
    ReceiveSearchResults,
    ReceivePrivateMessageRead,
    ReceiveGroupMessageRead,
}

impl HubEventKind {
    pub const ALL: [HubEventKind; 15] = [
        HubEventKind::ReceiveMessage,
        HubEventKind::ReceivePreviousMessages,
        HubEventKind::ReceiveErrorMessage,
        HubEventKind::ReceiveGroupMessage,
        HubEventKind::ReceivePreviousGroupMessages,
        HubEventKind::ReceiveGroupErrorMessage,
        HubEventKind::ReceiveBroadcast,
        HubEventKind::ReceivePreviousBroadcasts,
        HubEventKind::ReceiveOnlineStatus,
        HubEventKind::ReceiveFriendsOnlineStatus,
        HubEventKind::ReceiveTypingNotification,
        HubEventKind::ReceiveGroupTypingNotification,
        HubEventKind::ReceiveSearchResults,
        HubEventKind::ReceivePrivateMessageRead,
        HubEventKind::ReceiveGroupMessageRead,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HubEventKind::ReceiveMessage => "ReceiveMessage",
            HubEventKind::ReceivePreviousMessages => "ReceivePreviousMessages",
            HubEventKind::ReceiveErrorMessage => "ReceiveErrorMessage",
            HubEventKind::ReceiveGroupMessage => "ReceiveGroupMessage",
            HubEventKind::ReceivePreviousGroupMessages => "ReceivePreviousGroupMessages",
            HubEventKind::ReceiveGroupErrorMessage => "ReceiveGroupErrorMessage",
            HubEventKind::ReceiveBroadcast => "ReceiveBroadcast",
            HubEventKind::ReceivePreviousBroadcasts => "ReceivePreviousBroadcasts",
            HubEventKind::ReceiveOnlineStatus => "ReceiveOnlineStatus",
            HubEventKind::ReceiveFriendsOnlineStatus => "ReceiveFriendsOnlineStatus",
            HubEventKind::ReceiveTypingNotification => "ReceiveTypingNotification",
            HubEventKind::ReceiveGroupTypingNotification => "ReceiveGroupTypingNotification",
            HubEventKind::ReceiveSearchResults => "ReceiveSearchResults",
            HubEventKind::ReceivePrivateMessageRead => "ReceivePrivateMessageRead",
            HubEventKind::ReceiveGroupMessageRead => "ReceiveGroupMessageRead",
        }
    }

    /// Hubs this event may arrive on
    pub fn hubs(self) -> &'static [HubName] {
        match self {
            HubEventKind::ReceiveMessage
            | HubEventKind::ReceivePreviousMessages
            | HubEventKind::ReceiveErrorMessage
            | HubEventKind::ReceiveBroadcast
            | HubEventKind::ReceivePreviousBroadcasts
            | HubEventKind::ReceiveTypingNotification
            | HubEventKind::ReceivePrivateMessageRead => &[HubName::Chat],
            HubEventKind::ReceiveGroupMessage
            | HubEventKind::ReceivePreviousGroupMessages
            | HubEventKind::ReceiveGroupErrorMessage
            | HubEventKind::ReceiveGroupTypingNotification
            | HubEventKind::ReceiveGroupMessageRead => &[HubName::Group],
            HubEventKind::ReceiveSearchResults => &[HubName::Search],
            HubEventKind::ReceiveOnlineStatus => &[HubName::Chat, HubName::Notification],
            HubEventKind::ReceiveFriendsOnlineStatus => &[HubName::Notification],
        }
    }

    pub fn arrives_on(self, hub: HubName) -> bool {
        self.hubs().contains(&hub)
    }
}

impl fmt::Display for HubEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HubEventKind {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HubEventKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| UnknownName(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_parse_back() {
        for method in HubMethod::ALL {
            assert_eq!(method.name().parse::<HubMethod>(), Ok(method));
            assert!(!method.hubs().is_empty());
        }
        assert!("sendMessage".parse::<HubMethod>().is_err());
    }

    #[test]
    fn event_names_parse_back() {
        for kind in HubEventKind::ALL {
            assert_eq!(kind.name().parse::<HubEventKind>(), Ok(kind));
        }
        assert_eq!(
            "ReceiveMesage".parse::<HubEventKind>(),
            Err(UnknownName("ReceiveMesage".into()))
        );
    }

    #[test]
    fn room_methods_exist_on_chat_and_group() {
        assert!(HubMethod::JoinChatRoom.is_available_on(HubName::Chat));
        assert!(HubMethod::JoinChatRoom.is_available_on(HubName::Group));
        assert!(!HubMethod::JoinChatRoom.is_available_on(HubName::Search));
        assert!(!HubMethod::SendGroupMessage.is_available_on(HubName::Chat));
    }

    #[test]
    fn only_message_sends_are_queueable() {
        let queueable: Vec<_> = HubMethod::ALL
            .into_iter()
            .filter(|m| m.is_queueable())
            .collect();
        assert_eq!(queueable, vec![HubMethod::SendMessage, HubMethod::SendGroupMessage]);
    }

    #[test]
    fn hub_names_round_trip_through_paths() {
        for hub in HubName::ALL {
            assert_eq!(hub.path().parse::<HubName>(), Ok(hub));
        }
        assert_eq!("Chat".parse::<HubName>(), Ok(HubName::Chat));
    }
}
