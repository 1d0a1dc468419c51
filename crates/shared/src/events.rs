//! Typed server-pushed events.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{ChatMessage, HubEventKind, OnlineStatus};

/// A decoded hub event. Payloads the client does not interpret (broadcasts,
/// search results, read receipts) stay as raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    ReceiveMessage(ChatMessage),
    ReceivePreviousMessages(Vec<ChatMessage>),
    ReceiveErrorMessage(String),
    ReceiveGroupMessage(ChatMessage),
    ReceivePreviousGroupMessages(Vec<ChatMessage>),
    ReceiveGroupErrorMessage(String),
    ReceiveBroadcast(Value),
    ReceivePreviousBroadcasts(Vec<Value>),
    ReceiveOnlineStatus(OnlineStatus),
    ReceiveFriendsOnlineStatus(Vec<OnlineStatus>),
    /// Id of the user who is typing
    ReceiveTypingNotification(String),
    ReceiveGroupTypingNotification(String),
    ReceiveSearchResults(Value),
    ReceivePrivateMessageRead(Value),
    ReceiveGroupMessageRead(Value),
}

impl HubEvent {
    pub fn kind(&self) -> HubEventKind {
        match self {
            HubEvent::ReceiveMessage(_) => HubEventKind::ReceiveMessage,
            HubEvent::ReceivePreviousMessages(_) => HubEventKind::ReceivePreviousMessages,
            HubEvent::ReceiveErrorMessage(_) => HubEventKind::ReceiveErrorMessage,
            HubEvent::ReceiveGroupMessage(_) => HubEventKind::ReceiveGroupMessage,
            HubEvent::ReceivePreviousGroupMessages(_) => HubEventKind::ReceivePreviousGroupMessages,
            HubEvent::ReceiveGroupErrorMessage(_) => HubEventKind::ReceiveGroupErrorMessage,
            HubEvent::ReceiveBroadcast(_) => HubEventKind::ReceiveBroadcast,
            HubEvent::ReceivePreviousBroadcasts(_) => HubEventKind::ReceivePreviousBroadcasts,
            HubEvent::ReceiveOnlineStatus(_) => HubEventKind::ReceiveOnlineStatus,
            HubEvent::ReceiveFriendsOnlineStatus(_) => HubEventKind::ReceiveFriendsOnlineStatus,
            HubEvent::ReceiveTypingNotification(_) => HubEventKind::ReceiveTypingNotification,
            HubEvent::ReceiveGroupTypingNotification(_) => {
                HubEventKind::ReceiveGroupTypingNotification
            }
            HubEvent::ReceiveSearchResults(_) => HubEventKind::ReceiveSearchResults,
            HubEvent::ReceivePrivateMessageRead(_) => HubEventKind::ReceivePrivateMessageRead,
            HubEvent::ReceiveGroupMessageRead(_) => HubEventKind::ReceiveGroupMessageRead,
        }
    }

    /// Decode the invocation arguments of a pushed event. The payload is the
    /// first argument; a missing argument decodes as JSON `null`.
    pub fn decode(kind: HubEventKind, arguments: Vec<Value>) -> Result<Self, serde_json::Error> {
        let payload = arguments.into_iter().next().unwrap_or(Value::Null);
        Ok(match kind {
            HubEventKind::ReceiveMessage => HubEvent::ReceiveMessage(from(payload)?),
            HubEventKind::ReceivePreviousMessages => {
                HubEvent::ReceivePreviousMessages(from(payload)?)
            }
            HubEventKind::ReceiveErrorMessage => HubEvent::ReceiveErrorMessage(from(payload)?),
            HubEventKind::ReceiveGroupMessage => HubEvent::ReceiveGroupMessage(from(payload)?),
            HubEventKind::ReceivePreviousGroupMessages => {
                HubEvent::ReceivePreviousGroupMessages(from(payload)?)
            }
            HubEventKind::ReceiveGroupErrorMessage => {
                HubEvent::ReceiveGroupErrorMessage(from(payload)?)
            }
            HubEventKind::ReceiveBroadcast => HubEvent::ReceiveBroadcast(payload),
            HubEventKind::ReceivePreviousBroadcasts => {
                HubEvent::ReceivePreviousBroadcasts(from(payload)?)
            }
            HubEventKind::ReceiveOnlineStatus => HubEvent::ReceiveOnlineStatus(from(payload)?),
            HubEventKind::ReceiveFriendsOnlineStatus => {
                HubEvent::ReceiveFriendsOnlineStatus(from(payload)?)
            }
            HubEventKind::ReceiveTypingNotification => {
                HubEvent::ReceiveTypingNotification(from(payload)?)
            }
            HubEventKind::ReceiveGroupTypingNotification => {
                HubEvent::ReceiveGroupTypingNotification(from(payload)?)
            }
            HubEventKind::ReceiveSearchResults => HubEvent::ReceiveSearchResults(payload),
            HubEventKind::ReceivePrivateMessageRead => HubEvent::ReceivePrivateMessageRead(payload),
            HubEventKind::ReceiveGroupMessageRead => HubEvent::ReceiveGroupMessageRead(payload),
        })
    }
}

fn from<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_typed_payload_from_first_argument() {
        let event = HubEvent::decode(
            HubEventKind::ReceiveOnlineStatus,
            vec![json!({"userId": "u1", "isOnline": true}), json!("ignored")],
        )
        .unwrap();
        assert_eq!(
            event,
            HubEvent::ReceiveOnlineStatus(OnlineStatus {
                user_id: "u1".into(),
                is_online: true
            })
        );
        assert_eq!(event.kind(), HubEventKind::ReceiveOnlineStatus);
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let err = HubEvent::decode(HubEventKind::ReceiveTypingNotification, vec![json!({"a": 1})]);
        assert!(err.is_err());
    }

    #[test]
    fn raw_payloads_pass_through_untouched() {
        let payload = json!({"results": [{"id": "x"}], "anything": null});
        let event =
            HubEvent::decode(HubEventKind::ReceiveSearchResults, vec![payload.clone()]).unwrap();
        assert_eq!(event, HubEvent::ReceiveSearchResults(payload));
    }

    #[test]
    fn every_kind_maps_back_to_itself() {
        for kind in HubEventKind::ALL {
            let sample = match kind {
                HubEventKind::ReceiveMessage | HubEventKind::ReceiveGroupMessage => {
                    json!({"content": "x"})
                }
                HubEventKind::ReceivePreviousMessages
                | HubEventKind::ReceivePreviousGroupMessages
                | HubEventKind::ReceivePreviousBroadcasts
                | HubEventKind::ReceiveFriendsOnlineStatus => json!([]),
                HubEventKind::ReceiveOnlineStatus => json!({"userId": "u", "isOnline": false}),
                _ => json!("text"),
            };
            let event = HubEvent::decode(kind, vec![sample]).unwrap();
            assert_eq!(event.kind(), kind);
        }
    }
}
