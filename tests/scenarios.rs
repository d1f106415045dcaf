//! End-to-end request/response scenarios against a live server.

use hyper::Method;
use serde_json::{json, Value};
use std::io::Write;
use std::time::{Duration, Instant};
use stub_server::{
    RequestPredicate, ResponseBody, ResponseDefinition, ServerConfig, StubServer,
};

async fn server() -> StubServer {
    StubServer::start(ServerConfig::default()).await.unwrap()
}

const MERGE_TEMPLATE: &str = "{{val request.body assign='currentBody'}}\n\
    {{#assign 'newId'}}\n{\"id\": 1}\n{{/assign}}\n\
    {{jsonMerge currentBody newId}}";

#[tokio::test]
async fn test_static_json_response() {
    let server = server().await;
    let body = json!({"id": "8c1a9a8e-3c1f-4c52-a4b1-0d3f1b6e2a11", "field": "responseFromServer"});
    server
        .registry()
        .register(
            RequestPredicate::exact(Method::GET, "/test"),
            ResponseDefinition::ok_for_json(body.clone()),
        )
        .await;

    let response = reqwest::get(format!("{}/test", server.base_url()))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "application/json"
    );
    assert_eq!(
        response.text().await.unwrap(),
        r#"{"id":"8c1a9a8e-3c1f-4c52-a4b1-0d3f1b6e2a11","field":"responseFromServer"}"#
    );
}

#[tokio::test]
async fn test_echo_request_body() {
    let server = server().await;
    server
        .registry()
        .register(
            RequestPredicate::exact(Method::POST, "/test"),
            ResponseDefinition::new(202)
                .with_text("{{request.body}}")
                .templated(),
        )
        .await;

    let sent = r#"{"id":null,"field":"responseFromServer"}"#;
    let response = reqwest::Client::new()
        .post(format!("{}/test", server.base_url()))
        .body(sent)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    let echoed: Value = response.json().await.unwrap();
    assert_eq!(echoed, serde_json::from_str::<Value>(sent).unwrap());
}

#[tokio::test]
async fn test_assign_and_merge() {
    let server = server().await;
    server
        .registry()
        .register(
            RequestPredicate::exact(Method::POST, "/test"),
            ResponseDefinition::new(200)
                .with_text(MERGE_TEMPLATE)
                .templated(),
        )
        .await;

    let response = reqwest::Client::new()
        .post(format!("{}/test", server.base_url()))
        .body(r#"{"id":null,"field":"x"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let merged: Value = response.json().await.unwrap();
    assert_eq!(merged, json!({"id": 1, "field": "x"}));
}

#[tokio::test]
async fn test_merge_with_compact_format() {
    let server = server().await;
    let template = "{{val request.body assign='currentBody'}}\n\
        {{#assign 'newId'}}\n{\"id\":  1,  \"field\": \"response\"}\n{{/assign}}\n\
        {{#assign 'extended'}}\n  {{jsonMerge currentBody newId}}\n{{/assign}}\n\
        {{~formatJson extended format='compact'~}}\n";
    server
        .registry()
        .register(
            RequestPredicate::exact(Method::POST, "/test"),
            ResponseDefinition::new(200).with_text(template).templated(),
        )
        .await;

    let response = reqwest::Client::new()
        .post(format!("{}/test", server.base_url()))
        .body(r#"{"id": null, "field": "request"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let text = response.text().await.unwrap();
    assert_eq!(text.trim(), r#"{"id":1,"field":"response"}"#);
    assert!(text.ends_with('}'));
}

#[tokio::test]
async fn test_unmatched_request_is_404() {
    let server = server().await;
    let response = reqwest::Client::new()
        .delete(format!("{}/nope", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
    assert_eq!(body["method"], "DELETE");
    assert_eq!(body["path"], "/nope");
}

#[tokio::test]
async fn test_template_error_is_500_and_server_stays_usable() {
    let server = server().await;
    server
        .registry()
        .register(
            RequestPredicate::exact(Method::POST, "/broken"),
            ResponseDefinition::new(200)
                .with_text("{{jsonMerge missing request.body}}")
                .templated(),
        )
        .await;
    server
        .registry()
        .register(
            RequestPredicate::exact(Method::GET, "/ok"),
            ResponseDefinition::new(200).with_text("fine"),
        )
        .await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/broken", server.base_url()))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "template_error");

    let response = client
        .get(format!("{}/ok", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "fine");
    assert_eq!(server.registry().len().await, 2);
}

#[tokio::test]
async fn test_non_template_body_is_byte_identical() {
    let server = server().await;
    let raw = "{{request.body}} stays literal";
    server
        .registry()
        .register(
            RequestPredicate::exact(Method::POST, "/raw"),
            ResponseDefinition::new(200).with_text(raw),
        )
        .await;

    let response = reqwest::Client::new()
        .post(format!("{}/raw", server.base_url()))
        .body("ignored")
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["content-type"], "text/plain");
    assert_eq!(response.text().await.unwrap(), raw);
}

#[tokio::test]
async fn test_binary_body() {
    let server = server().await;
    server
        .registry()
        .register(
            RequestPredicate::exact(Method::GET, "/bin"),
            ResponseDefinition::new(200).with_body(ResponseBody::Base64 {
                content: "AAEC/w==".to_string(),
            }),
        )
        .await;

    let response = reqwest::get(format!("{}/bin", server.base_url()))
        .await
        .unwrap();
    assert_eq!(
        response.headers()["content-type"],
        "application/octet-stream"
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), &[0u8, 1, 2, 255]);
}

#[tokio::test]
async fn test_first_registered_stub_wins() {
    let server = server().await;
    server
        .registry()
        .register(
            RequestPredicate::regex(Method::GET, "^/api/.*").unwrap(),
            ResponseDefinition::new(200).with_text("broad"),
        )
        .await;
    server
        .registry()
        .register(
            RequestPredicate::exact(Method::GET, "/api/users"),
            ResponseDefinition::new(200).with_text("specific"),
        )
        .await;

    let response = reqwest::get(format!("{}/api/users", server.base_url()))
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "broad");
}

#[tokio::test]
async fn test_request_fields_in_template() {
    let server = server().await;
    let config = ServerConfig::from_yaml(
        r#"
stubs:
  - request:
      method: [GET]
      path:
        type: template
        template: /users/{id}
    response:
      status: 200
      template: true
      body:
        type: json
        content:
          id: "{{request.pathParams.id}}"
          page: "{{default request.query.page '1'}}"
          agent: "{{request.headers.x-client}}"
"#,
    )
    .unwrap();
    for stub in config.stubs {
        server.registry().register_definition(stub).await.unwrap();
    }

    let response = reqwest::Client::new()
        .get(format!("{}/users/42?page=3", server.base_url()))
        .header("X-Client", "tests")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"id": "42", "page": "3", "agent": "tests"}));
}

#[tokio::test]
async fn test_config_file_stubs_with_delay_and_faults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
stubs:
  - id: slow
    request:
      path:
        type: exact
        value: /slow
    response:
      status: 200
    delay:
      fixed_ms: 150
  - id: down
    request:
      path:
        type: exact
        value: /down
    response:
      status: 200
    fault:
      type: error
      status: 503
      message: unavailable
  - id: hang
    request:
      path:
        type: exact
        value: /hang
    response:
      status: 200
    fault:
      type: timeout
      duration_ms: 50
default_response:
  status: 410
  body:
    type: text
    content: gone
"#
    )
    .unwrap();

    let config = ServerConfig::from_file(file.path()).unwrap();
    let server = StubServer::start(config).await.unwrap();
    let client = reqwest::Client::new();

    let started = Instant::now();
    let response = client
        .get(format!("{}/slow", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(started.elapsed() >= Duration::from_millis(150));

    let response = client
        .get(format!("{}/down", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
    assert_eq!(response.text().await.unwrap(), "unavailable");

    let response = client
        .get(format!("{}/hang", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 504);

    let response = client
        .get(format!("{}/elsewhere", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 410);
    assert_eq!(response.text().await.unwrap(), "gone");

    server.shutdown().await;
}

#[tokio::test]
async fn test_servers_are_isolated() {
    let first = server().await;
    let second = server().await;
    first
        .registry()
        .register(
            RequestPredicate::exact(Method::GET, "/only-first"),
            ResponseDefinition::new(200),
        )
        .await;

    let response = reqwest::get(format!("{}/only-first", first.base_url()))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let response = reqwest::get(format!("{}/only-first", second.base_url()))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let server = server().await;
    let address = server.address();
    server.shutdown().await;

    let result = tokio::net::TcpStream::connect(address).await;
    assert!(result.is_err());
}
