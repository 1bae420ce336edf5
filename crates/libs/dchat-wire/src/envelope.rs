//! The JSON envelope dchat clients put on the relay.
//!
//! There is no version field. Unknown fields are ignored and missing
//! optional fields read as absent; only `id` and `contentType` are required.

use serde::{Deserialize, Deserializer, Serialize};

/// Envelope `contentType`.
///
/// Control types steer client state (receipts, contacts, subscriptions) and
/// never reach the application. Displayable types carry user content.
/// Anything else is kept verbatim in [`ContentType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContentType {
    Text,
    TextExtension,
    Image,
    Audio,
    Video,
    File,
    Ipfs,
    Receipt,
    Read,
    Contact,
    ContactOptions,
    TopicSubscribe,
    TopicUnsubscribe,
    TopicInvitation,
    TopicKickOut,
    PrivateGroupInvitation,
    PrivateGroupAccept,
    PrivateGroupSubscribe,
    PrivateGroupQuit,
    PrivateGroupOptionRequest,
    PrivateGroupOptionResponse,
    PrivateGroupMemberRequest,
    PrivateGroupMemberResponse,
    DeviceRequest,
    DeviceInfo,
    DiscoveryBroadcast,
    Other(String),
}

impl ContentType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::TextExtension => "textExtension",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::File => "file",
            Self::Ipfs => "ipfs",
            Self::Receipt => "receipt",
            Self::Read => "read",
            Self::Contact => "contact",
            Self::ContactOptions => "contactOptions",
            Self::TopicSubscribe => "topic:subscribe",
            Self::TopicUnsubscribe => "topic:unsubscribe",
            Self::TopicInvitation => "topic:invitation",
            Self::TopicKickOut => "topic:kickOut",
            Self::PrivateGroupInvitation => "privateGroup:invitation",
            Self::PrivateGroupAccept => "privateGroup:accept",
            Self::PrivateGroupSubscribe => "privateGroup:subscribe",
            Self::PrivateGroupQuit => "privateGroup:quit",
            Self::PrivateGroupOptionRequest => "privateGroup:optionRequest",
            Self::PrivateGroupOptionResponse => "privateGroup:optionResponse",
            Self::PrivateGroupMemberRequest => "privateGroup:memberRequest",
            Self::PrivateGroupMemberResponse => "privateGroup:memberResponse",
            Self::DeviceRequest => "device:request",
            Self::DeviceInfo => "device:info",
            Self::DiscoveryBroadcast => "discovery:broadcast",
            Self::Other(raw) => raw,
        }
    }

    /// Content the application layer should see.
    pub fn is_displayable(&self) -> bool {
        matches!(
            self,
            Self::Text
                | Self::TextExtension
                | Self::Image
                | Self::Audio
                | Self::Video
                | Self::File
                | Self::Ipfs
        )
    }

    /// Known client-state traffic. Unknown types are neither control nor
    /// displayable.
    pub fn is_control(&self) -> bool {
        !self.is_displayable() && !matches!(self, Self::Other(_))
    }
}

impl From<String> for ContentType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "text" => Self::Text,
            "textExtension" => Self::TextExtension,
            "image" => Self::Image,
            "audio" => Self::Audio,
            "video" => Self::Video,
            "file" => Self::File,
            "ipfs" => Self::Ipfs,
            "receipt" => Self::Receipt,
            "read" => Self::Read,
            "contact" => Self::Contact,
            "contactOptions" => Self::ContactOptions,
            "topic:subscribe" => Self::TopicSubscribe,
            "topic:unsubscribe" => Self::TopicUnsubscribe,
            "topic:invitation" => Self::TopicInvitation,
            "topic:kickOut" => Self::TopicKickOut,
            "privateGroup:invitation" => Self::PrivateGroupInvitation,
            "privateGroup:accept" => Self::PrivateGroupAccept,
            "privateGroup:subscribe" => Self::PrivateGroupSubscribe,
            "privateGroup:quit" => Self::PrivateGroupQuit,
            "privateGroup:optionRequest" => Self::PrivateGroupOptionRequest,
            "privateGroup:optionResponse" => Self::PrivateGroupOptionResponse,
            "privateGroup:memberRequest" => Self::PrivateGroupMemberRequest,
            "privateGroup:memberResponse" => Self::PrivateGroupMemberResponse,
            "device:request" => Self::DeviceRequest,
            "device:info" => Self::DeviceInfo,
            "discovery:broadcast" => Self::DiscoveryBroadcast,
            _ => Self::Other(raw),
        }
    }
}

impl From<ContentType> for String {
    fn from(content_type: ContentType) -> Self {
        match content_type {
            ContentType::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

/// Media subtype of an `ipfs` envelope.
///
/// dchat clients send numeric codes; some send the name instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    File,
    Image,
    Audio,
    Video,
    Unknown,
}

impl<'de> Deserialize<'de> for MediaKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::Number(code) => match code.as_i64() {
                Some(0) => Self::File,
                Some(1) => Self::Image,
                Some(2) => Self::Audio,
                Some(3) => Self::Video,
                _ => Self::Unknown,
            },
            serde_json::Value::String(name) => match name.as_str() {
                "file" => Self::File,
                "image" => Self::Image,
                "audio" => Self::Audio,
                "video" => Self::Video,
                _ => Self::Unknown,
            },
            _ => Self::Unknown,
        })
    }
}

/// `options` block of an envelope. Only the fields the bridge reads are
/// modelled; everything else is dropped on decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<MediaKind>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "string_or_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "string_or_none")]
    pub file_ext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "string_or_none")]
    pub file_mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "string_or_none")]
    pub ipfs_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_duration: Option<f64>,
}

/// One relay frame's JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: String,
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "string_or_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "options_or_none")]
    pub options: Option<MediaOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "string_or_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "string_or_none")]
    pub group_id: Option<String>,
    #[serde(
        default,
        alias = "targetID",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "string_or_none"
    )]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "strings_or_none")]
    pub read_ids: Option<Vec<String>>,
    #[serde(default, deserialize_with = "timestamp_or_zero")]
    pub timestamp: i64,
}

impl Envelope {
    /// Topic or group id, whichever addresses this envelope to many.
    pub fn is_group(&self) -> bool {
        self.topic.is_some() || self.group_id.is_some()
    }
}

// Third-party clients put objects into `content` (contact cards) or nulls
// anywhere; those read as absent instead of failing the whole envelope.
fn string_or_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(value) => Some(value),
        _ => None,
    })
}

fn strings_or_none<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Vec<String>>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

// Floats are truncated; anything that is not a number reads as 0.
fn timestamp_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|value| value.is_finite()).map(|value| value as i64))
            .unwrap_or(0),
        _ => 0,
    })
}

fn options_or_none<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<MediaOptions>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    if !value.is_object() {
        return Ok(None);
    }
    Ok(serde_json::from_value(value).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_roundtrips_known_names() {
        for name in ["text", "topic:subscribe", "privateGroup:invitation", "discovery:broadcast"] {
            let parsed = ContentType::from(name.to_string());
            assert!(!matches!(parsed, ContentType::Other(_)), "{name}");
            assert_eq!(parsed.as_str(), name);
        }
    }

    #[test]
    fn unknown_content_type_is_neither_control_nor_displayable() {
        let parsed = ContentType::from("nft:transfer".to_string());
        assert_eq!(parsed, ContentType::Other("nft:transfer".into()));
        assert!(!parsed.is_displayable());
        assert!(!parsed.is_control());
        assert_eq!(String::from(parsed), "nft:transfer");
    }

    #[test]
    fn control_and_displayable_are_disjoint() {
        assert!(ContentType::Receipt.is_control());
        assert!(ContentType::Contact.is_control());
        assert!(ContentType::DiscoveryBroadcast.is_control());
        assert!(ContentType::Ipfs.is_displayable());
        assert!(!ContentType::Ipfs.is_control());
    }

    #[test]
    fn media_kind_accepts_codes_and_names() {
        let options: MediaOptions =
            serde_json::from_str(r#"{"fileType": 2, "fileName": "a.ogg"}"#).expect("options");
        assert_eq!(options.file_type, Some(MediaKind::Audio));
        let options: MediaOptions =
            serde_json::from_str(r#"{"fileType": "file"}"#).expect("options");
        assert_eq!(options.file_type, Some(MediaKind::File));
        let options: MediaOptions = serde_json::from_str(r#"{"fileType": 42}"#).expect("options");
        assert_eq!(options.file_type, Some(MediaKind::Unknown));
    }

    #[test]
    fn object_content_reads_as_absent() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"id":"x","contentType":"contact","content":{"name":"bob"},"options":7}"#,
        )
        .expect("envelope");
        assert_eq!(envelope.content, None);
        assert_eq!(envelope.options, None);
        assert_eq!(envelope.timestamp, 0);
    }

    #[test]
    fn loose_timestamps_never_reject_the_envelope() {
        let parse = |json: &str| serde_json::from_str::<Envelope>(json).expect("envelope");

        assert_eq!(parse(r#"{"id":"a","contentType":"text","timestamp":null}"#).timestamp, 0);
        assert_eq!(
            parse(r#"{"id":"b","contentType":"text","timestamp":1700000000123.9}"#).timestamp,
            1_700_000_000_123
        );
        assert_eq!(parse(r#"{"id":"c","contentType":"text","timestamp":"soon"}"#).timestamp, 0);
        assert_eq!(parse(r#"{"id":"d","contentType":"text"}"#).timestamp, 0);
        assert_eq!(parse(r#"{"id":"e","contentType":"text","timestamp":42}"#).timestamp, 42);
    }

    #[test]
    fn malformed_read_ids_read_as_absent() {
        let parse = |json: &str| serde_json::from_str::<Envelope>(json).expect("envelope");

        let envelope = parse(r#"{"id":"r","contentType":"read","readIds":["m1","m2"]}"#);
        assert_eq!(envelope.read_ids, Some(vec!["m1".to_string(), "m2".to_string()]));
        assert_eq!(parse(r#"{"id":"r","contentType":"read","readIds":"m1"}"#).read_ids, None);
        assert_eq!(parse(r#"{"id":"r","contentType":"read","readIds":[1,2]}"#).read_ids, None);
        assert_eq!(parse(r#"{"id":"r","contentType":"read","readIds":null}"#).read_ids, None);
    }

    #[test]
    fn receipt_target_accepts_both_spellings() {
        let legacy: Envelope =
            serde_json::from_str(r#"{"id":"r","contentType":"receipt","targetID":"m1"}"#)
                .expect("envelope");
        assert_eq!(legacy.target_id.as_deref(), Some("m1"));

        let encoded = serde_json::to_value(&legacy).expect("encode");
        assert_eq!(encoded["targetId"], "m1");
        assert!(encoded.get("content").is_none());
    }
}
