//! Wire-shape tests for the capture payload the browser extension
//! submits and the responses it consumes.

use markvault_core::CapturePayload;

#[test]
fn test_minimal_v1_capture() {
    // V1: images already inlined, no separate image list.
    let json = r#"{
        "html": "<html><img src=\"data:image/png;base64,AAAA\"></html>",
        "title": "A page",
        "source_url": "https://example.com/page"
    }"#;
    let payload: CapturePayload = serde_json::from_str(json).unwrap();
    assert!(payload.images.is_none());
    assert!(!payload.force);
    assert_eq!(payload.title.as_deref(), Some("A page"));
}

#[test]
fn test_v2_capture_with_extracted_images() {
    let json = r#"{
        "html": "<html><img src=\"markvault-img://blake3:abc\"></html>",
        "images": [
            {"hash": "blake3:abc", "data": "aGVsbG8=", "mime_type": "image/png"},
            {"hash": "blake3:def", "data": "d29ybGQ=", "mime_type": "image/jpeg"}
        ],
        "force": false
    }"#;
    let payload: CapturePayload = serde_json::from_str(json).unwrap();
    let images = payload.images.unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0].hash, "blake3:abc");
    assert_eq!(images[1].mime_type, "image/jpeg");
}

#[test]
fn test_missing_html_is_rejected() {
    let json = r#"{"title": "no html"}"#;
    let result: Result<CapturePayload, _> = serde_json::from_str(json);
    assert!(result.is_err());
}

#[test]
fn test_unknown_fields_are_tolerated() {
    // Older extensions may send fields this server no longer reads.
    let json = r#"{"html": "<html></html>", "capture_version": 2}"#;
    let payload: CapturePayload = serde_json::from_str(json).unwrap();
    assert_eq!(payload.html, "<html></html>");
}

#[test]
fn test_force_flag_roundtrip() {
    let json = r#"{"html": "<html></html>", "force": true}"#;
    let payload: CapturePayload = serde_json::from_str(json).unwrap();
    assert!(payload.force);
}
