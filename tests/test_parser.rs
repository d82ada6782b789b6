use std::collections::HashMap;

use relay::http::parser::{Limits, ParseError, parse_http_request, parse_http_request_with_limits};
use relay::http::request::{Method, RequestBuilder, Version};
use relay::http::writer::serialize_request;

#[test]
fn test_parse_simple_get_request() {
    let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let (parsed, consumed) = parse_http_request(req).unwrap();

    assert_eq!(parsed.method, Method::GET);
    assert_eq!(parsed.path, "/");
    assert_eq!(parsed.version, Version::Http11);
    assert_eq!(parsed.headers.get("Host").unwrap(), "example.com");
    assert_eq!(consumed, req.len());
}

#[test]
fn test_parse_post_request_with_body() {
    let req = b"POST /login HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
    let (parsed, consumed) = parse_http_request(req).unwrap();

    assert_eq!(parsed.method, Method::POST);
    assert_eq!(parsed.path, "/login");
    assert_eq!(parsed.body, b"hello".to_vec());
    assert_eq!(consumed, req.len());
}

#[test]
fn test_parse_leaves_following_bytes_unconsumed() {
    let req = b"GET / HTTP/1.1\r\n\r\nGET /next HTTP/1.1\r\n";
    let (_, consumed) = parse_http_request(req).unwrap();

    assert_eq!(&req[consumed..], b"GET /next HTTP/1.1\r\n");
}

#[test]
fn test_parse_query_string_is_split_and_decoded() {
    let req = b"GET /upgrade?username=bob%20smith&room=a+b HTTP/1.1\r\n\r\n";
    let (parsed, _) = parse_http_request(req).unwrap();

    assert_eq!(parsed.path, "/upgrade");
    assert_eq!(parsed.query_param("username"), Some("bob smith"));
    assert_eq!(parsed.query_param("room"), Some("a b"));
}

#[test]
fn test_parse_repeated_query_key_keeps_last() {
    let req = b"GET /?a=1&a=2 HTTP/1.1\r\n\r\n";
    let (parsed, _) = parse_http_request(req).unwrap();

    assert_eq!(parsed.query_param("a"), Some("2"));
}

#[test]
fn test_parse_repeated_header_keeps_last() {
    let req = b"GET / HTTP/1.1\r\nX-Tag: one\r\nX-Tag: two\r\n\r\n";
    let (parsed, _) = parse_http_request(req).unwrap();

    assert_eq!(parsed.header("X-Tag"), Some("two"));
}

#[test]
fn test_parse_header_value_may_contain_colon() {
    let req = b"GET / HTTP/1.1\r\nHost: localhost:8080\r\n\r\n";
    let (parsed, _) = parse_http_request(req).unwrap();

    assert_eq!(parsed.header("Host"), Some("localhost:8080"));
}

#[test]
fn test_parse_incomplete_request_missing_blank_line() {
    let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n";
    let result = parse_http_request(req);

    assert!(matches!(result, Err(ParseError::Incomplete)));
}

#[test]
fn test_parse_incomplete_request_partial_body() {
    let req = b"POST /api HTTP/1.1\r\nContent-Length: 10\r\n\r\nhello";
    let result = parse_http_request(req);

    assert!(matches!(result, Err(ParseError::Incomplete)));
}

#[test]
fn test_parse_invalid_http_method() {
    let req = b"INVALID / HTTP/1.1\r\n\r\n";
    let result = parse_http_request(req);

    assert_eq!(result, Err(ParseError::InvalidMethod("INVALID".to_string())));
}

#[test]
fn test_parse_invalid_http_version() {
    let req = b"GET / HTTP/9.9\r\n\r\n";
    let result = parse_http_request(req);

    assert_eq!(result, Err(ParseError::InvalidVersion("HTTP/9.9".to_string())));
}

#[test]
fn test_parse_truncated_request_line() {
    let req = b"GET /\r\n\r\n";

    assert!(matches!(parse_http_request(req), Err(ParseError::InvalidRequest)));
}

#[test]
fn test_parse_malformed_header() {
    let req = b"GET / HTTP/1.1\r\nBrokenHeader\r\n\r\n";
    let result = parse_http_request(req);

    assert!(matches!(result, Err(ParseError::InvalidHeader)));
}

#[test]
fn test_parse_invalid_content_length() {
    let req = b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n";

    assert!(matches!(
        parse_http_request(req),
        Err(ParseError::InvalidContentLength)
    ));
}

#[test]
fn test_parse_header_block_limit() {
    let req = b"GET / HTTP/1.1\r\nX-Long: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    assert!(matches!(
        parse_http_request_with_limits(
            req,
            Limits {
                max_header_bytes: 16,
                ..Limits::default()
            }
        ),
        Err(ParseError::HeadersTooLarge(16))
    ));
}

#[test]
fn test_parse_body_limit_checked_before_body_arrives() {
    let limits = Limits {
        max_body_bytes: 8,
        ..Limits::default()
    };

    // Only the head has arrived; the announced length alone is enough to reject
    let req = b"POST /login HTTP/1.1\r\nContent-Length: 9\r\n\r\n";
    assert_eq!(
        parse_http_request_with_limits(req, limits),
        Err(ParseError::BodyTooLarge(8))
    );

    let req = b"POST /login HTTP/1.1\r\nContent-Length: 8\r\n\r\n12345678";
    let (parsed, _) = parse_http_request_with_limits(req, limits).unwrap();
    assert_eq!(parsed.body, b"12345678");
}

#[test]
fn test_parse_various_http_methods() {
    let methods = vec![
        ("GET", Method::GET),
        ("POST", Method::POST),
        ("PUT", Method::PUT),
        ("DELETE", Method::DELETE),
        ("HEAD", Method::HEAD),
        ("OPTIONS", Method::OPTIONS),
        ("PATCH", Method::PATCH),
    ];

    for (method_str, expected_method) in methods {
        let req = format!("{} / HTTP/1.1\r\n\r\n", method_str);
        let (parsed, _) = parse_http_request(req.as_bytes()).unwrap();
        assert_eq!(parsed.method, expected_method);
    }
}

#[test]
fn test_parse_versions() {
    for (text, version) in [
        ("HTTP/1.0", Version::Http10),
        ("HTTP/1.1", Version::Http11),
        ("HTTP/2.0", Version::Http20),
    ] {
        let req = format!("GET / {}\r\n\r\n", text);
        let (parsed, _) = parse_http_request(req.as_bytes()).unwrap();
        assert_eq!(parsed.version, version);
    }
}

#[test]
fn test_parse_request_with_binary_body() {
    let req = b"POST /upload HTTP/1.1\r\nContent-Length: 4\r\n\r\n\x00\x01\x02\x03";
    let (parsed, _) = parse_http_request(req).unwrap();

    assert_eq!(parsed.body, vec![0, 1, 2, 3]);
}

#[test]
fn test_serialized_request_parses_back() {
    let cases: Vec<(Method, Version, &str, Vec<(&str, &str)>, Vec<(&str, &str)>, Vec<u8>)> = vec![
        (Method::GET, Version::Http11, "/", vec![], vec![("Host", "localhost")], vec![]),
        (
            Method::POST,
            Version::Http11,
            "/login",
            vec![("next", "/dashboard")],
            vec![("Host", "localhost"), ("Content-Type", "application/json")],
            br#"{"username":"bob"}"#.to_vec(),
        ),
        (
            Method::PUT,
            Version::Http10,
            "/files/a.txt",
            vec![("name", "a b&c"), ("mode", "100%")],
            vec![("X-Trace", "abc:def"), ("Connection", "keep-alive")],
            vec![0, 1, 2, 255],
        ),
        (
            Method::DELETE,
            Version::Http20,
            "/items",
            vec![("id", "7")],
            vec![("Content-Length", "3")],
            b"xyz".to_vec(),
        ),
        (Method::OPTIONS, Version::Http11, "/upgrade", vec![("username", "\u{e9}ve")], vec![], vec![]),
    ];

    for (method, version, path, query, headers, body) in cases {
        let mut builder = RequestBuilder::new()
            .method(method)
            .path(path)
            .version(version)
            .body(body.clone());
        for (k, v) in &query {
            builder = builder.query(*k, *v);
        }
        for (k, v) in &headers {
            builder = builder.header(*k, *v);
        }
        let original = builder.build().unwrap();

        let bytes = serialize_request(&original);
        let (parsed, consumed) = parse_http_request(&bytes).unwrap();

        let mut expected_headers: HashMap<String, String> = original.headers.clone();
        if !body.is_empty() {
            expected_headers
                .entry("Content-Length".to_string())
                .or_insert_with(|| body.len().to_string());
        }

        assert_eq!(consumed, bytes.len(), "{} {}", method.as_str(), path);
        assert_eq!(parsed.method, original.method);
        assert_eq!(parsed.path, original.path);
        assert_eq!(parsed.query, original.query);
        assert_eq!(parsed.version, original.version);
        assert_eq!(parsed.headers, expected_headers);
        assert_eq!(parsed.body, original.body);
    }
}
