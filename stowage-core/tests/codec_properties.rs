/*!
Round-trip and error properties of the codec managers.
*/

use bytes::Bytes;
use chrono::{TimeZone, Utc};
use stowage_core::compression::CompressionKind;
use stowage_core::encryption::EncryptionKind;
use stowage_core::serialization::SerializerKind;
use stowage_core::{
    CompressionManager, EncryptionManager, SerializerManager, StowageError, Value,
};

fn text_corpus() -> Vec<String> {
    vec![
        String::new(),
        "a".to_string(),
        "The quick brown fox jumps over the lazy dog".to_string(),
        "ünïcödé ✓ 日本語 🚀 \u{1} \u{0}".to_string(),
        "abcabcabcabcabcabcabcabcabcabc".repeat(20),
        serde_json::json!({
            "jobs": (0..50).map(|i| serde_json::json!({"id": i, "title": "Backend engineer", "remote": i % 2 == 0})).collect::<Vec<_>>()
        })
        .to_string(),
    ]
}

fn graph() -> Value {
    let at = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap();
    let shared = Value::shared(Value::object([("name", Value::from("shared"))]));
    Value::object([
        ("empty", Value::object::<&str, _>([])),
        ("at", Value::date(at)),
        ("pattern", Value::regexp("^job-\\d+$", "i")),
        (
            "index",
            Value::Map(vec![
                (Value::from(1i64), Value::from("one")),
                (Value::date(at), Value::Set(vec![Value::from(true), Value::Null])),
            ]),
        ),
        ("raw", Value::Bytes(Bytes::from_static(&[0, 159, 255]))),
        ("first", shared.clone()),
        ("second", shared),
        ("text", Value::from("ünïcödé")),
    ])
}

#[test]
fn test_every_compressor_round_trips_corpus() {
    let manager = CompressionManager::new().with_threshold(0);
    for kind in manager.get_all_compressors() {
        for text in text_corpus() {
            let result = manager.compress(&text, Some(&kind)).unwrap();
            assert_eq!(
                manager.decompress(&result).unwrap(),
                text,
                "{kind} failed to round trip {} bytes",
                text.len()
            );
        }
    }
}

#[test]
fn test_every_cipher_round_trips_corpus() {
    let manager = EncryptionManager::new();
    for kind in manager.get_all_algorithms() {
        let key = manager.generate_key(Some(&kind)).unwrap();
        assert!(manager.validate_key(&key, Some(&kind)).unwrap());
        for text in text_corpus() {
            let result = manager.encrypt(&text, &key, Some(&kind)).unwrap();
            assert_eq!(manager.decrypt(&result, &key).unwrap(), text, "{kind}");
        }
    }
}

#[test]
fn test_composite_serializer_keeps_special_types() {
    let manager = SerializerManager::new();
    let value = graph();
    let result = manager
        .serialize(&value, Some(&SerializerKind::Composite))
        .unwrap();
    assert_eq!(result.kind, SerializerKind::Composite);
    assert_eq!(manager.deserialize(&result).unwrap(), value);
}

#[test]
fn test_leaf_serializers_round_trip() {
    let manager = SerializerManager::new();
    let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
    let cases = vec![
        (SerializerKind::Date, Value::date(at)),
        (SerializerKind::RegExp, Value::regexp("a|b", "g")),
        (SerializerKind::ArrayBuffer, Value::Bytes(Bytes::from_static(b"\x00\x01"))),
        (SerializerKind::String, Value::from("")),
        (SerializerKind::Number, Value::from(-12.5)),
        (SerializerKind::Boolean, Value::from(false)),
        (SerializerKind::Json, Value::from(serde_json::json!({"a": [1, null]}))),
        (SerializerKind::Binary, Value::from("binary ✓")),
    ];
    for (kind, value) in cases {
        let result = manager.serialize(&value, Some(&kind)).unwrap();
        assert_eq!(manager.deserialize(&result).unwrap(), value, "{kind}");
    }
}

#[test]
fn test_short_input_is_stored_uncompressed() {
    let manager = CompressionManager::new();
    let result = manager.compress("0123456789", None).unwrap();
    assert_eq!(result.ratio, 1.0);
    assert_eq!(result.compressed, "0123456789");
    assert_eq!(manager.decompress(&result).unwrap(), "0123456789");
}

#[test]
fn test_best_compression_shrinks_repetitive_input() {
    let manager = CompressionManager::new();
    let data = "aaaaaaaaaabbbbbbbbbb".repeat(50);
    let best = manager.find_best_compression(&data);
    assert!(best.compressed_size < best.original_size);
    assert_eq!(manager.decompress(&best).unwrap(), data);
    assert_eq!(
        manager.get_all_compression_results(&data).len(),
        CompressionKind::builtin().len()
    );
}

#[test]
fn test_wrong_key_is_an_encryption_error() {
    let manager = EncryptionManager::new();
    for kind in EncryptionKind::builtin() {
        let result = manager.encrypt("secret", "k1", Some(&kind)).unwrap();
        let err = manager.decrypt(&result, "k2").unwrap_err();
        assert!(
            matches!(err, StowageError::Encryption { .. }),
            "{kind}: expected Encryption error, got {err:?}"
        );
    }
}

#[test]
fn test_corrupt_payloads_raise_typed_errors() {
    let manager = CompressionManager::new().with_threshold(0);
    let text = "corrupt me please ".repeat(20);
    for kind in [CompressionKind::Huffman, CompressionKind::Gzip] {
        let mut result = manager.compress(&text, Some(&kind)).unwrap();
        result.compressed.truncate(result.compressed.len() / 3);
        let err = manager.decompress(&result).unwrap_err();
        assert_eq!(err.code(), "COMPRESSION_ERROR", "{kind}");
    }
}
