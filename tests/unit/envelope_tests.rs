//! Unit tests for bridge envelope parsing and answer encoding.

use serde_json::{json, Value};

use worker_bridge::bridge::{encode_answer, log_preview, parse_frame, LOG_PREVIEW_BYTES};
use worker_bridge::AppError;

fn protocol_error(text: &str) -> String {
    match parse_frame(text) {
        Err(AppError::Protocol(msg)) => msg,
        other => panic!("expected protocol error for {text:?}, got {other:?}"),
    }
}

#[test]
fn well_formed_request_parses() {
    let request =
        parse_frame(r#"{"type":"query","data":{},"echo":"abc"}"#).expect("valid frame");
    assert_eq!(request.kind, "query");
    assert_eq!(request.data, json!({}));
    assert_eq!(request.echo, Some(json!("abc")));
}

#[test]
fn echo_is_optional() {
    let request = parse_frame(r#"{"type":"query","data":[1,2]}"#).expect("valid frame");
    assert!(request.echo.is_none());
    assert_eq!(request.data, json!([1, 2]));
}

#[test]
fn null_data_counts_as_present() {
    let request = parse_frame(r#"{"type":"ping","data":null}"#).expect("valid frame");
    assert_eq!(request.data, Value::Null);
}

#[test]
fn non_json_is_malformed() {
    assert!(protocol_error("not json").starts_with("malformed json"));
}

#[test]
fn missing_type_is_invalid() {
    assert_eq!(
        protocol_error(r#"{"data":{}}"#),
        "invalid message: missing `type`"
    );
}

#[test]
fn missing_data_is_invalid() {
    assert_eq!(
        protocol_error(r#"{"type":"query"}"#),
        "invalid message: missing `data`"
    );
}

#[test]
fn non_string_type_is_invalid() {
    assert_eq!(
        protocol_error(r#"{"type":7,"data":{}}"#),
        "invalid message: `type` must be a string"
    );
}

#[test]
fn non_object_is_invalid() {
    assert_eq!(protocol_error("[1,2,3]"), "invalid message: not an object");
}

#[test]
fn answer_copies_echo_verbatim() {
    let echo = json!({"seq": 4, "tag": "q"});
    let text = encode_answer(&json!({"ok": true}), Some(&echo)).expect("encodes");
    let value: Value = serde_json::from_str(&text).expect("json");
    assert_eq!(value, json!({"data": {"ok": true}, "echo": {"seq": 4, "tag": "q"}}));
}

#[test]
fn answer_without_echo_omits_field() {
    let text = encode_answer(&json!(1), None).expect("encodes");
    let value: Value = serde_json::from_str(&text).expect("json");
    assert_eq!(value, json!({"data": 1}));
}

#[test]
fn explicit_null_echo_round_trips_as_null() {
    let request = parse_frame(r#"{"type":"query","data":{},"echo":null}"#).expect("valid");
    assert_eq!(request.echo, Some(Value::Null));

    let text = encode_answer(&json!({}), request.echo.as_ref()).expect("encodes");
    let value: Value = serde_json::from_str(&text).expect("json");
    assert_eq!(value.get("echo"), Some(&Value::Null));
}

#[test]
fn log_preview_caps_long_frames_on_char_boundary() {
    assert_eq!(log_preview("short"), "short");

    let ascii = "x".repeat(LOG_PREVIEW_BYTES * 4);
    assert_eq!(log_preview(&ascii).len(), LOG_PREVIEW_BYTES);

    // 3-byte chars never land exactly on the cap.
    let wide = "\u{3042}".repeat(LOG_PREVIEW_BYTES);
    let preview = log_preview(&wide);
    assert!(preview.len() <= LOG_PREVIEW_BYTES);
    assert!(preview.len() > LOG_PREVIEW_BYTES - 3);
    assert!(wide.starts_with(preview));
}
