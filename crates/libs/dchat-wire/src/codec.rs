//! Envelope <-> message translation.
//!
//! Everything here is pure: no network, no stored state. Input comes from an
//! open relay network where third-party clients send whatever they like, so
//! malformed frames are a value ([`Decoded::Malformed`]), not an error.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::envelope::{ContentType, Envelope, MediaKind, MediaOptions};
use crate::session::{SessionKey, SessionTarget};

/// Longest sender address shown verbatim as a display name.
const DISPLAY_NAME_MAX: usize = 16;
/// Characters kept when a display name is shortened.
const DISPLAY_NAME_PREFIX: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatType {
    Direct,
    Group,
}

/// A displayable inbound message in the bridge's normalized form.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub message_id: String,
    pub body: String,
    pub chat_type: ChatType,
    pub session_key: String,
    /// Normalized sender address; the identifier used for policy checks.
    pub sender_id: String,
    /// Cosmetic short form of `sender_id`. Never use it as an identifier.
    pub sender_name: String,
    /// Topic name or group id for group chats.
    pub group_subject: Option<String>,
    pub media_hash: Option<String>,
    pub media_options: Option<MediaOptions>,
    pub timestamp: i64,
}

/// Result of classifying one inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// User content for the application layer.
    Displayable(InboundMessage),
    /// Client-state traffic, unknown content types and our own echoes.
    Control,
    /// Not an envelope at all.
    Malformed,
}

/// Routing fields for an outbound envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundTarget {
    pub topic: Option<String>,
    pub group_id: Option<String>,
}

/// Strip the `__N__.` sub-link tag the relay prepends to sender addresses.
pub fn normalize_address(address: &str) -> &str {
    let Some(rest) = address.strip_prefix("__") else {
        return address;
    };
    let Some((digits, tail)) = rest.split_once("__.") else {
        return address;
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return address;
    }
    tail
}

/// Parse raw frame text into an envelope.
///
/// Returns `None` for invalid JSON, non-object values and objects without a
/// string `id` and `contentType`.
pub fn parse_envelope(raw: &str) -> Option<Envelope> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    if !object.get("id").is_some_and(serde_json::Value::is_string)
        || !object.get("contentType").is_some_and(serde_json::Value::is_string)
    {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// Parse and decode in one step.
pub fn classify(
    sender: &str,
    raw: &str,
    self_address: &str,
    account_id: Option<&str>,
) -> Decoded {
    match parse_envelope(raw) {
        Some(envelope) => decode_inbound(sender, &envelope, self_address, account_id),
        None => Decoded::Malformed,
    }
}

/// Decode an envelope received from `sender` on the account `account_id`.
pub fn decode_inbound(
    sender: &str,
    envelope: &Envelope,
    self_address: &str,
    account_id: Option<&str>,
) -> Decoded {
    if !envelope.content_type.is_displayable() {
        return Decoded::Control;
    }

    let sender_id = normalize_address(sender);
    if !self_address.is_empty() && sender_id == normalize_address(self_address) {
        return Decoded::Control;
    }

    let target = if let Some(topic) = &envelope.topic {
        SessionTarget::Topic(topic.clone())
    } else if let Some(group_id) = &envelope.group_id {
        SessionTarget::Group(group_id.clone())
    } else {
        SessionTarget::Direct(sender_id.to_string())
    };
    let (chat_type, group_subject) = match &target {
        SessionTarget::Direct(_) => (ChatType::Direct, None),
        SessionTarget::Topic(subject) | SessionTarget::Group(subject) => {
            (ChatType::Group, Some(subject.clone()))
        }
    };

    let media_hash = match envelope.content_type {
        ContentType::Ipfs => envelope
            .options
            .as_ref()
            .and_then(|options| options.ipfs_hash.clone())
            .or_else(|| envelope.content.clone()),
        _ => None,
    };

    Decoded::Displayable(InboundMessage {
        message_id: envelope.id.clone(),
        body: body_of(envelope),
        chat_type,
        session_key: SessionKey::new(account_id, target).to_string(),
        sender_id: sender_id.to_string(),
        sender_name: display_name(sender_id),
        group_subject,
        media_hash,
        media_options: envelope.options.clone(),
        timestamp: envelope.timestamp,
    })
}

fn body_of(envelope: &Envelope) -> String {
    let raw = || envelope.content.clone().unwrap_or_default();
    match envelope.content_type {
        ContentType::Text | ContentType::TextExtension => raw(),
        ContentType::Ipfs => {
            let options = envelope.options.as_ref();
            // TODO: confirm with dchat client authors whether an ipfs frame
            // without fileType really means image or is an older client gap.
            match options.and_then(|options| options.file_type) {
                None | Some(MediaKind::Image) => "[Image]".to_string(),
                Some(MediaKind::Audio) => "[Audio]".to_string(),
                Some(MediaKind::File) => match options.and_then(|o| o.file_name.as_deref()) {
                    Some(name) => format!("[File: {name}]"),
                    None => "[File]".to_string(),
                },
                Some(MediaKind::Video | MediaKind::Unknown) => "[IPFS content]".to_string(),
            }
        }
        ContentType::Audio => "[Voice Message]".to_string(),
        ContentType::Image => "[Image]".to_string(),
        ContentType::Video => "[Video]".to_string(),
        ContentType::File => "[File]".to_string(),
        _ => raw(),
    }
}

fn display_name(address: &str) -> String {
    if address.chars().count() <= DISPLAY_NAME_MAX {
        return address.to_string();
    }
    let prefix: String = address.chars().take(DISPLAY_NAME_PREFIX).collect();
    format!("{prefix}...")
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

fn fresh_envelope(content_type: ContentType) -> Envelope {
    Envelope {
        id: uuid::Uuid::new_v4().to_string(),
        content_type,
        content: None,
        options: None,
        topic: None,
        group_id: None,
        target_id: None,
        read_ids: None,
        timestamp: now_millis(),
    }
}

/// Text envelope with a fresh id and the current timestamp.
pub fn encode_outbound_text(text: &str, target: &OutboundTarget) -> Envelope {
    let mut envelope = fresh_envelope(ContentType::Text);
    envelope.content = Some(text.to_string());
    envelope.topic = target.topic.clone();
    envelope.group_id = target.group_id.clone();
    envelope
}

/// Delivery receipt for the message `target_id`.
pub fn encode_receipt(target_id: &str) -> Envelope {
    let mut envelope = fresh_envelope(ContentType::Receipt);
    envelope.target_id = Some(target_id.to_string());
    envelope
}
