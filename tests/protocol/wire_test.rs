//! Wire format snapshots.
//!
//! Controllers and workers built from different checkouts must agree on
//! these bytes, so any change here is a protocol change.

use insta::assert_snapshot;
use serde_json::json;
use warden::protocol::operations::{FindElementsParams, SetRangeValueParams};
use warden::protocol::{
    ErrorCategory, OperationParams, OperationRequest, OperationResult, Parameters, WorkerFrame,
};
use warden::transport::encode_frame;

fn wire<T: serde::Serialize>(frame: &T) -> String {
    let bytes = encode_frame(frame).unwrap();
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.ends_with('\n'));
    assert_eq!(text.matches('\n').count(), 1, "frame spans lines: {text:?}");
    text.trim_end().to_string()
}

fn request(name: &str, parameters: serde_json::Value) -> OperationRequest {
    let parameters: Parameters = serde_json::from_value(parameters).unwrap();
    OperationRequest {
        operation_name: name.to_string(),
        parameters,
        timeout_seconds: 5,
        correlation_id: "c-1".to_string(),
    }
}

#[test]
fn request_frame() {
    let frame = WorkerFrame::Request(request(
        "SetValue",
        json!({"value": "hello", "elementId": "txt1"}),
    ));
    assert_snapshot!(wire(&frame), @r#"{"kind":"request","operationName":"SetValue","parameters":{"elementId":"txt1","value":"hello"},"timeoutSeconds":5,"correlationId":"c-1"}"#);
}

#[test]
fn request_frame_escapes_newlines() {
    let frame = WorkerFrame::Request(request(
        "SetValue",
        json!({"elementId": "txt1", "value": "line one\nline two"}),
    ));
    assert_snapshot!(wire(&frame), @r#"{"kind":"request","operationName":"SetValue","parameters":{"elementId":"txt1","value":"line one\nline two"},"timeoutSeconds":5,"correlationId":"c-1"}"#);
}

#[test]
fn ping_frame() {
    let frame = WorkerFrame::Ping {
        correlation_id: "p-1".to_string(),
    };
    assert_snapshot!(wire(&frame), @r#"{"kind":"ping","correlationId":"p-1"}"#);
}

#[test]
fn shutdown_frame() {
    assert_snapshot!(wire(&WorkerFrame::Shutdown), @r#"{"kind":"shutdown"}"#);
}

#[test]
fn success_result() {
    let result = OperationResult::success("c-1", "Element invoked successfully");
    assert_snapshot!(wire(&result), @r#"{"success":true,"data":"Element invoked successfully","errorMessage":null,"errorCategory":"None","correlationId":"c-1"}"#);
}

#[test]
fn failure_result() {
    let result = OperationResult::failure(
        "c-2",
        ErrorCategory::ElementNotFound,
        "element not found: ghost",
    );
    assert_snapshot!(wire(&result), @r#"{"success":false,"data":null,"errorMessage":"element not found: ghost","errorCategory":"ElementNotFound","correlationId":"c-2"}"#);
}

#[test]
fn typed_parameters() {
    let params = SetRangeValueParams {
        element_id: "slider1".to_string(),
        value: 75.0,
    };
    let parameters = params.to_parameters().unwrap();
    assert_snapshot!(serde_json::to_string(&parameters).unwrap(), @r#"{"elementId":"slider1","value":75.0}"#);

    let criteria = FindElementsParams {
        control_type: Some("Button".to_string()),
        ..FindElementsParams::default()
    };
    let parameters = criteria.to_parameters().unwrap();
    assert_snapshot!(serde_json::to_string(&parameters).unwrap(), @r#"{"controlType":"Button"}"#);
}

#[test]
fn result_with_omitted_optional_fields_decodes() {
    let result: OperationResult =
        serde_json::from_str(r#"{"success":true,"data":42,"correlationId":"c-3"}"#).unwrap();
    assert!(result.is_success());
    assert_eq!(result.data, Some(json!(42)));
    assert_eq!(result.error_category, ErrorCategory::None);
    assert!(result.error_message.is_none());
}

#[test]
fn request_without_parameters_decodes() {
    let frame: WorkerFrame = serde_json::from_str(
        r#"{"kind":"request","operationName":"FindElements","timeoutSeconds":3,"correlationId":"c-4"}"#,
    )
    .unwrap();
    match frame {
        WorkerFrame::Request(request) => {
            assert_eq!(request.operation_name, "FindElements");
            assert!(request.parameters.is_empty());
        }
        other => panic!("expected request, got {other:?}"),
    }
}

#[test]
fn unknown_frame_kind_is_rejected() {
    let err = serde_json::from_str::<WorkerFrame>(r#"{"kind":"teleport","correlationId":"c-5"}"#);
    assert!(err.is_err());
}
