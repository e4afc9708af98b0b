// Handlebars views rendered through the runtime

use std::fs;
use tempfile::TempDir;
use trellis_core::cache::SharedBuffer;
use trellis_core::prelude::*;
use trellis_handlebars::{HandlebarsConfig, HandlebarsViewRenderer};

fn templates() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("pages")).unwrap();
    fs::write(
        dir.path().join("pages").join("welcome.hbs"),
        "<h1>Welcome {{name}}</h1>{{#if admin}}<p>admin</p>{{/if}}",
    )
    .unwrap();
    dir
}

fn runtime(dir: &TempDir) -> Runtime {
    let renderer = HandlebarsViewRenderer::new(HandlebarsConfig::new(dir.path())).unwrap();

    let mut builder = RuntimeBuilder::default();
    builder.register_view("/pages/.*", renderer).unwrap();
    builder
        .register_handler("ViewError".into(), StatusHandler::new(500).expose_message(true))
        .unwrap();
    builder.build().unwrap()
}

#[tokio::test]
async fn renders_page_through_runtime() {
    let dir = templates();
    let runtime = runtime(&dir);
    let transport = SharedBuffer::new();
    let mut scope = runtime.begin_request(
        HttpRequest::new("GET", "/welcome"),
        Box::new(transport.clone()),
    );

    let mut model = Model::new();
    model.insert("name".to_string(), serde_json::json!("Ada"));
    model.insert("admin".to_string(), serde_json::json!(true));

    let completion = runtime
        .complete(&mut scope, Outcome::view("/pages/welcome", model))
        .await
        .unwrap();

    assert_eq!(completion.status(), Some(200));
    assert_eq!(
        String::from_utf8(transport.contents()).unwrap(),
        "<h1>Welcome Ada</h1><p>admin</p>"
    );
    assert_eq!(
        scope.response().headers.get("Content-Type"),
        Some(&"text/html; charset=utf-8".to_string())
    );
}

#[tokio::test]
async fn missing_template_is_a_rendering_failure() {
    let dir = templates();
    let runtime = runtime(&dir);
    let transport = SharedBuffer::new();
    let mut scope = runtime.begin_request(
        HttpRequest::new("GET", "/missing"),
        Box::new(transport.clone()),
    );

    let completion = runtime
        .complete(&mut scope, Outcome::view("/pages/missing", Model::new()))
        .await
        .unwrap();

    assert_eq!(completion.status(), Some(500));
    let body: serde_json::Value = serde_json::from_slice(&transport.contents()).unwrap();
    assert_eq!(body["error"], "RenderingFailure");
}
