use presto_lib::PrestoError;

#[test]
fn config_error_display_includes_message() {
    let err = PrestoError::Config("missing output_dir".to_string());

    assert_eq!(format!("{}", err), "Configuration error: missing output_dir");
}

#[test]
fn io_error_display_wraps_source() {
    let io_err = std::io::Error::other("disk full");
    let err: PrestoError = io_err.into();
    let rendered = format!("{}", err);

    assert!(rendered.starts_with("IO error: "));
    assert!(rendered.contains("disk full"));
}

#[test]
fn backend_helper_includes_status_and_message() {
    let err = PrestoError::backend(Some(reqwest::StatusCode::NOT_FOUND), "not found");

    assert_eq!(
        format!("{}", err),
        "Backend error (status: Some(404)): not found"
    );
}

#[test]
fn backend_helper_handles_missing_status() {
    let err = PrestoError::backend(None, "connection reset");

    assert_eq!(
        format!("{}", err),
        "Backend error (status: None): connection reset"
    );
}

#[test]
fn platform_helper_uses_message() {
    let err = PrestoError::platform("NotAllowedError");

    assert_eq!(format!("{}", err), "Platform error: NotAllowedError");
}

#[test]
fn target_not_found_names_selector() {
    let err = PrestoError::TargetNotFound("#presupuesto".to_string());

    assert_eq!(format!("{}", err), "Capture target not found: #presupuesto");
}

#[test]
fn payload_serializes_for_the_ui() {
    let payload = PrestoError::PermissionDenied { blocked: true }.to_payload();
    let json = serde_json::to_value(&payload).expect("serialize payload");

    assert_eq!(json["category"], "permission");
    assert!(json["message"].as_str().unwrap_or_default().contains("blocked: true"));
    assert!(json["remediation"]
        .as_str()
        .unwrap_or_default()
        .contains("site settings"));
}
