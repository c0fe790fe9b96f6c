use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, EchoReport, FormReport, PartReport, BOM_JSON};
use tower::ServiceExt;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn request(method: &str, uri: &str, content_type: &str, body: impl Into<String>) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, content_type)
        .body(body.into())
        .unwrap()
}

// --- echo ---

#[tokio::test]
async fn echo_reports_query_pairs_in_order() {
    let resp = app()
        .oneshot(
            Request::builder()
                .uri("/echo?b=2&a=1&tags%5B0%5D=x&q=a+b")
                .header("x-probe", "yes")
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let report: EchoReport = body_json(resp).await;
    assert_eq!(report.method, "GET");
    assert_eq!(report.path, "/echo");
    assert_eq!(
        report.query,
        vec![
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
            ("tags[0]".to_string(), "x".to_string()),
            ("q".to_string(), "a b".to_string()),
        ]
    );
    assert_eq!(report.headers["x-probe"], "yes");
}

#[tokio::test]
async fn echo_accepts_any_method() {
    let resp = app()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/echo")
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();

    let report: EchoReport = body_json(resp).await;
    assert_eq!(report.method, "DELETE");
    assert!(report.query.is_empty());
}

// --- form ---

#[tokio::test]
async fn form_decodes_urlencoded_body() {
    let resp = app()
        .oneshot(request(
            "POST",
            "/form",
            "application/x-www-form-urlencoded; charset=UTF-8",
            "name=Java&langs%5B0%5D=Java&langs%5B1%5D=C",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let report: FormReport = body_json(resp).await;
    assert_eq!(
        report.content_type.as_deref(),
        Some("application/x-www-form-urlencoded; charset=UTF-8")
    );
    assert_eq!(report.pairs.len(), 3);
    assert_eq!(report.pairs[1], ("langs[0]".to_string(), "Java".to_string()));
}

// --- multipart ---

#[tokio::test]
async fn multipart_lists_every_part() {
    let body = "--XyZ\r\n\
        Content-Disposition: form-data; name=\"title\"\r\n\
        \r\n\
        hello\r\n\
        --XyZ\r\n\
        Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
        Content-Type: text/plain\r\n\
        \r\n\
        file body\r\n\
        --XyZ--\r\n";
    let resp = app()
        .oneshot(request("POST", "/multipart", "multipart/form-data; boundary=XyZ", body))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let parts: Vec<PartReport> = body_json(resp).await;
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].name.as_deref(), Some("title"));
    assert_eq!(parts[0].text.as_deref(), Some("hello"));
    assert_eq!(parts[1].file_name.as_deref(), Some("a.txt"));
    assert_eq!(parts[1].size, 9);
}

#[tokio::test]
async fn multipart_rejects_missing_boundary() {
    let resp = app()
        .oneshot(request("POST", "/multipart", "multipart/form-data", "junk"))
        .await
        .unwrap();

    assert!(resp.status().is_client_error());
}

// --- json ---

#[tokio::test]
async fn json_echoes_document() {
    let resp = app()
        .oneshot(request("PUT", "/json", "application/json", r#"{"user":{"age":30}}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let value: serde_json::Value = body_json(resp).await;
    assert_eq!(value["user"]["age"], 30);
}

// --- canned responses ---

#[tokio::test]
async fn status_route_returns_requested_code() {
    let resp = app()
        .oneshot(Request::builder().uri("/status/418").body(String::new()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(body_bytes(resp).await, "status 418");
}

#[tokio::test]
async fn bom_route_serves_prefixed_json() {
    let resp = app()
        .oneshot(Request::builder().uri("/bom").body(String::new()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.headers()[http::header::CONTENT_TYPE], "application/json");
    assert_eq!(body_bytes(resp).await, BOM_JSON.as_bytes());
}

#[tokio::test]
async fn bytes_route_serves_requested_length() {
    let resp = app()
        .oneshot(Request::builder().uri("/bytes/2048").body(String::new()).unwrap())
        .await
        .unwrap();

    assert_eq!(body_bytes(resp).await.len(), 2048);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let resp = app()
        .oneshot(Request::builder().uri("/nope").body(String::new()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
