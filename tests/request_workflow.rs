// End-to-end request handling through the public facade

use std::collections::HashMap;
use trellis::cache::SharedBuffer;
use trellis::prelude::*;
use trellis::ArgumentBinder;

#[derive(Debug, Clone, PartialEq)]
struct UserId(u64);

fn runtime() -> Runtime {
    let mut types = TypeGraph::with_builtins();
    types.declare("UserId", &[]).unwrap();
    types.declare("UserNotFound", &["Exception"]).unwrap();

    let mut builder = RuntimeBuilder::new(types);
    builder
        .register_converter(
            "UserId".into(),
            FnConverter::new(|input: &str, target: &TypeDescriptor| {
                input
                    .parse::<u64>()
                    .map(|id| Value::object(UserId(id)))
                    .map_err(|e| Error::InvalidValue {
                        target: target.to_string(),
                        input: input.to_string(),
                        reason: e.to_string(),
                    })
            }),
            false,
        )
        .unwrap()
        .register_handler("ConversionError".into(), StatusHandler::new(400))
        .unwrap()
        .register_handler("UserNotFound".into(), StatusHandler::new(404).expose_message(true))
        .unwrap();
    builder.build().unwrap()
}

fn show_user() -> MethodDescriptor {
    MethodDescriptor::new("UserController::show")
        .with_path_variables(["id"])
        .with_parameter(ParameterDescriptor::path("id", "UserId".into()))
        .with_parameter(ParameterDescriptor::query("verbose", TypeDescriptor::boolean()))
}

/// Stand-in for a controller method: known users are 1 and 2.
fn controller(binder: &ArgumentBinder, raw: &RawValues) -> Outcome {
    let args = match binder.bind(raw) {
        Ok(args) => args,
        Err(error) => return Outcome::failure(error),
    };
    let Some(UserId(id)) = args[0].downcast_ref::<UserId>().cloned() else {
        return Outcome::failure(Failure::new("Exception", "unexpected argument"));
    };
    if id > 2 {
        return Outcome::failure(Failure::new("UserNotFound", format!("user {}", id)));
    }

    let mut model = Model::new();
    model.insert("id".to_string(), serde_json::json!(id));
    model.insert("verbose".to_string(), serde_json::json!(args[1].as_bool()));
    Outcome::view("users/show.json", model)
}

async fn dispatch(runtime: &Runtime, id: &str, query: &str) -> (Completion, SharedBuffer) {
    let request = HttpRequest::new("GET", format!("/users/{}", id)).with_query("verbose", query);
    let raw = RawValues::from_request(&request, HashMap::from([("id".to_string(), id.into())]));
    let binder = runtime.prepare(&show_user()).unwrap();

    let transport = SharedBuffer::new();
    let mut scope = runtime.begin_request(request, Box::new(transport.clone()));
    scope.cache_request(None).await.unwrap();

    let completion = runtime
        .complete(&mut scope, controller(&binder, &raw))
        .await
        .unwrap();
    (completion, transport)
}

#[tokio::test]
async fn successful_request_renders_json_view() {
    let runtime = runtime();
    let (completion, transport) = dispatch(&runtime, "2", "true").await;

    assert_eq!(completion.status(), Some(200));
    let body: serde_json::Value = serde_json::from_slice(&transport.contents()).unwrap();
    assert_eq!(body, serde_json::json!({"id": 2, "verbose": true}));
}

#[tokio::test]
async fn successful_request_is_cached() {
    let runtime = runtime();
    dispatch(&runtime, "1", "false").await;

    let request = HttpRequest::new("GET", "/users/1").with_query("verbose", "false");
    let cached = runtime.response_store().lookup(&request).unwrap();
    assert_eq!(cached.status, 200);
    assert_eq!(cached.headers.get("X-Cache"), Some(&"HIT".to_string()));
}

#[tokio::test]
async fn bad_argument_is_a_client_error() {
    let runtime = runtime();
    let (completion, transport) = dispatch(&runtime, "abc", "true").await;

    assert_eq!(completion.status(), Some(400));
    assert_eq!(completion.handled_by(), Some("StatusHandler(400)"));
    let body: serde_json::Value = serde_json::from_slice(&transport.contents()).unwrap();
    assert_eq!(body["error"], "InvalidValue");
}

#[tokio::test]
async fn application_failure_uses_its_handler() {
    let runtime = runtime();
    let (completion, transport) = dispatch(&runtime, "9", "true").await;

    assert_eq!(completion.status(), Some(404));
    let body: serde_json::Value = serde_json::from_slice(&transport.contents()).unwrap();
    assert_eq!(body["message"], "user 9");

    // 404 is a cacheable status, so the handled response is replayed too
    let request = HttpRequest::new("GET", "/users/9").with_query("verbose", "true");
    let cached = runtime.response_store().lookup(&request).unwrap();
    assert_eq!(cached.status, 404);
}

#[tokio::test]
async fn unhandled_failure_is_left_to_the_caller() {
    let runtime = runtime();
    let transport = SharedBuffer::new();
    let mut scope = runtime.begin_request(HttpRequest::new("GET", "/"), Box::new(transport.clone()));

    let completion = runtime
        .complete(&mut scope, Outcome::failure(Failure::new("Exception", "boom")))
        .await
        .unwrap();
    assert!(matches!(completion, Completion::Propagated(_)));

    *scope.response_mut() = HttpResponse::new(500).with_body(b"internal".to_vec());
    scope.finish().await.unwrap();
    assert_eq!(transport.contents(), b"internal");
}
