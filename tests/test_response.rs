use relay::http::request::Version;
use relay::http::response::{Response, ResponseBuilder, StatusCode};
use relay::http::writer::{ResponseWriter, serialize_response};

#[test]
fn test_status_code_as_u16() {
    assert_eq!(StatusCode::SwitchingProtocols.as_u16(), 101);
    assert_eq!(StatusCode::Ok.as_u16(), 200);
    assert_eq!(StatusCode::NoContent.as_u16(), 204);
    assert_eq!(StatusCode::BadRequest.as_u16(), 400);
    assert_eq!(StatusCode::Unauthorized.as_u16(), 401);
    assert_eq!(StatusCode::Forbidden.as_u16(), 403);
    assert_eq!(StatusCode::NotFound.as_u16(), 404);
    assert_eq!(StatusCode::PayloadTooLarge.as_u16(), 413);
    assert_eq!(StatusCode::InternalServerError.as_u16(), 500);
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(
        StatusCode::SwitchingProtocols.reason_phrase(),
        "Switching Protocols"
    );
    assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    assert_eq!(StatusCode::Forbidden.reason_phrase(), "Forbidden");
    assert_eq!(StatusCode::NotFound.reason_phrase(), "Not Found");
    assert_eq!(StatusCode::PayloadTooLarge.reason_phrase(), "Payload Too Large");
    assert_eq!(
        StatusCode::InternalServerError.reason_phrase(),
        "Internal Server Error"
    );
}

#[test]
fn test_response_default_is_200_ok() {
    let response = Response::default();

    assert_eq!(response.version, Version::Http11);
    assert_eq!(response.status, StatusCode::Ok);
    assert!(response.headers.is_empty());
    assert!(response.body.is_empty());
}

#[test]
fn test_response_builder_with_headers() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/plain")
        .header("X-Custom", "value")
        .body(b"test".to_vec())
        .build();

    assert_eq!(response.headers.get("Content-Type").unwrap(), "text/plain");
    assert_eq!(response.headers.get("X-Custom").unwrap(), "value");
    assert_eq!(response.headers.get("Content-Length").unwrap(), "4");
}

#[test]
fn test_response_builder_preserves_custom_content_length() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Length", "999")
        .body(b"test".to_vec())
        .build();

    assert_eq!(response.headers.get("Content-Length").unwrap(), "999");
}

#[test]
fn test_response_not_found_helper() {
    let response = Response::not_found();

    assert_eq!(response.status, StatusCode::NotFound);
    assert_eq!(response.body, b"404 Not Found".to_vec());
}

#[test]
fn test_response_set_error_replaces_body() {
    let mut response = Response::ok(b"old body, quite long".to_vec());
    response.set_error(StatusCode::Forbidden);

    assert_eq!(response.status, StatusCode::Forbidden);
    assert_eq!(response.body, b"403 Forbidden".to_vec());
    assert_eq!(response.headers.get("Content-Type").unwrap(), "text/plain");

    let wire = String::from_utf8(serialize_response(&response)).unwrap();
    assert!(wire.contains("Content-Length: 13\r\n"));
}

#[test]
fn test_serialize_response_layout() {
    let mut response = Response::default();
    response.set_header("Content-Type", "text/html");
    response.set_body("<p>hi</p>");

    let wire = String::from_utf8(serialize_response(&response)).unwrap();

    assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(wire.contains("Content-Type: text/html\r\n"));
    assert!(wire.contains("Content-Length: 9\r\n"));
    assert!(wire.ends_with("\r\n\r\n<p>hi</p>"));
}

#[test]
fn test_serialize_switching_protocols_has_no_content_length() {
    let mut response = Response::default();
    response.set_status(StatusCode::SwitchingProtocols);
    response.set_header("Upgrade", "websocket");

    let wire = String::from_utf8(serialize_response(&response)).unwrap();

    assert!(wire.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(!wire.contains("Content-Length"));
}

#[test]
fn test_serialize_echoes_request_version() {
    let response = Response {
        version: Version::Http10,
        ..Response::default()
    };

    let wire = serialize_response(&response);
    assert!(wire.starts_with(b"HTTP/1.0 200 OK\r\n"));
}

#[test]
fn test_response_writer_writes_everything() {
    let response = Response::ok(b"payload".to_vec());
    let mut writer = ResponseWriter::new(&response);
    let mut sink = Vec::new();

    writer.write_to(&mut sink).unwrap();

    assert_eq!(writer.remaining(), 0);
    assert_eq!(sink, serialize_response(&response));
}
