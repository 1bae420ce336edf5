use dchat_wire::{
    codec, dm_address_of, gen_topic_hash, group_id_of, topic_of, ChatType, Decoded, DedupCache,
    OutboundTarget, SessionKey,
};

fn displayable(decoded: Decoded) -> dchat_wire::InboundMessage {
    match decoded {
        Decoded::Displayable(message) => message,
        other => panic!("expected displayable, got {other:?}"),
    }
}

#[test]
fn outbound_text_survives_the_wire() {
    let envelope = codec::encode_outbound_text("hello", &OutboundTarget::default());
    let raw = serde_json::to_string(&envelope).expect("serialize");
    let parsed = codec::parse_envelope(&raw).expect("parse");

    let message = displayable(codec::decode_inbound("peer.addr", &parsed, "self.addr", None));
    assert_eq!(message.body, "hello");
    assert_eq!(message.chat_type, ChatType::Direct);
    assert_eq!(message.session_key, "dchat:dm:peer.addr");
    assert_eq!(message.message_id, envelope.id);
}

#[test]
fn outbound_wire_uses_camel_case_fields() {
    let target = OutboundTarget { topic: None, group_id: Some("g1".into()) };
    let envelope = codec::encode_outbound_text("hi", &target);
    let value = serde_json::to_value(&envelope).expect("serialize");
    assert_eq!(value["contentType"], "text");
    assert_eq!(value["groupId"], "g1");
    assert!(value.get("topic").is_none());
    assert!(value["timestamp"].as_i64().is_some());
}

#[test]
fn ipfs_file_on_default_account() {
    let raw = r#"{
        "id": "f-1",
        "contentType": "ipfs",
        "content": "QmReport",
        "options": {"fileType": 0, "fileName": "report.pdf", "fileExt": "pdf"},
        "timestamp": 1700000000000
    }"#;
    let message = displayable(codec::classify("__3__.alice", raw, "bot", Some("default")));
    assert_eq!(message.body, "[File: report.pdf]");
    assert_eq!(message.session_key, "dchat:dm:alice");
    assert_eq!(message.media_hash.as_deref(), Some("QmReport"));
    assert_eq!(
        message.media_options.and_then(|options| options.file_name).as_deref(),
        Some("report.pdf")
    );
}

#[test]
fn receipt_is_never_displayable() {
    let receipt = codec::encode_receipt("m1");
    let raw = serde_json::to_string(&receipt).expect("serialize");
    assert_eq!(codec::classify("peer", &raw, "self", None), Decoded::Control);
}

#[test]
fn extractors_invert_key_builders() {
    for topic in ["general", "", "a:b:c", "#hash"] {
        assert_eq!(topic_of(&format!("dchat:topic:{topic}")).as_deref(), Some(topic));
        assert_eq!(topic_of(&SessionKey::topic(topic).to_string()).as_deref(), Some(topic));
    }
    for address in ["peer", "bot.03ab", "0123456789abcdef0123"] {
        for account in [None, Some("default"), Some("work")] {
            let key = SessionKey::direct(account, address).to_string();
            assert_eq!(dm_address_of(&key).as_deref(), Some(address), "{key}");
            assert_eq!(topic_of(&key), None);
            assert_eq!(group_id_of(&key), None);
        }
    }
    assert_eq!(group_id_of(&SessionKey::group("g-7").to_string()).as_deref(), Some("g-7"));
}

#[test]
fn topic_hash_ignores_leading_hashes_only() {
    assert_eq!(gen_topic_hash("general"), gen_topic_hash("#general"));
    assert_eq!(gen_topic_hash("general"), gen_topic_hash("##general"));
    assert_ne!(gen_topic_hash("alpha"), gen_topic_hash("beta"));
}

#[test]
fn fan_out_copies_pass_the_gate_once() {
    let cache = DedupCache::default();
    let envelope = codec::encode_outbound_text("once", &OutboundTarget::default());
    let raw = serde_json::to_string(&envelope).expect("serialize");

    let mut delivered = 0;
    for sublink in 0..4 {
        let sender = format!("__{sublink}__.peer");
        let Some(parsed) = codec::parse_envelope(&raw) else {
            continue;
        };
        if cache.check_and_mark(&parsed.id) {
            continue;
        }
        if let Decoded::Displayable(message) =
            codec::decode_inbound(&sender, &parsed, "self", None)
        {
            assert_eq!(message.sender_id, "peer");
            delivered += 1;
        }
    }
    assert_eq!(delivered, 1);
}
