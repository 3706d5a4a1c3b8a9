use super::*;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode as HttpStatus};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Form, Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const TOKEN: &str = "tok-123";

#[derive(Default)]
struct Recorded {
    bodies: Vec<(String, Value)>,
    deleted: Vec<String>,
}

type Shared = Arc<Mutex<Recorded>>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == format!("Bearer {TOKEN}"))
}

fn not_authenticated() -> Response {
    (
        HttpStatus::UNAUTHORIZED,
        Json(json!({"detail": "Not authenticated"})),
    )
        .into_response()
}

async fn login(Form(form): Form<HashMap<String, String>>) -> Response {
    let username = form.get("username").map(String::as_str);
    let password = form.get("password").map(String::as_str);
    if username == Some("admin") && password == Some("secret") {
        Json(json!({"access_token": TOKEN, "token_type": "bearer"})).into_response()
    } else {
        (
            HttpStatus::UNAUTHORIZED,
            Json(json!({"detail": "Incorrect username or password"})),
        )
            .into_response()
    }
}

async fn signup(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    if body.get("username").and_then(Value::as_str) == Some("taken") {
        return (
            HttpStatus::BAD_REQUEST,
            Json(json!({"detail": "Username already registered"})),
        )
            .into_response();
    }
    state.lock().unwrap().bodies.push(("signup".to_string(), body));
    (HttpStatus::CREATED, Json(json!({"message": "created"}))).into_response()
}

async fn list_modules(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return not_authenticated();
    }
    Json(json!([
        {"id": 1, "name": "Inventory"},
        {"id": "HR", "name": "People"}
    ]))
    .into_response()
}

async fn create_module(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return not_authenticated();
    }
    state
        .lock()
        .unwrap()
        .bodies
        .push(("create_module".to_string(), body));
    (HttpStatus::CREATED, Json(json!({"message": "ok"}))).into_response()
}

async fn update_module(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    state
        .lock()
        .unwrap()
        .bodies
        .push((format!("update_module:{id}"), body));
    Json(json!({"message": "updated"})).into_response()
}

async fn delete_module(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    if id == "ghost" {
        return (
            HttpStatus::NOT_FOUND,
            Json(json!({"detail": "Module not found"})),
        )
            .into_response();
    }
    state.lock().unwrap().deleted.push(id);
    Json(json!({"message": "deleted"})).into_response()
}

async fn module_detail(Path(id): Path<String>) -> Response {
    if id == "broken" {
        return malformed().await;
    }
    Json(json!({"id": id, "name": "Inventory"})).into_response()
}

async fn update_user(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    state
        .lock()
        .unwrap()
        .bodies
        .push((format!("update_user:{id}"), body));
    Json(json!({"message": "updated"})).into_response()
}

async fn delete_user(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    state.lock().unwrap().deleted.push(format!("user:{id}"));
    Json(json!({"message": "deleted"})).into_response()
}

async fn list_submodules(Path(module_id): Path<String>) -> Response {
    Json(json!([
        {"id": 10, "name": "Item List", "module_id": module_id},
        {"id": "EQ", "name": "Equipment", "module_id": module_id}
    ]))
    .into_response()
}

async fn submodule_detail(Path(id): Path<String>) -> Response {
    Json(json!({"id": id, "name": "Item List", "module_id": 1})).into_response()
}

async fn list_users() -> Response {
    Json(json!([
        {"id": 1, "username": "ana", "email": "ana@example.com", "role_id": 1, "is_active": true},
        {"id": 2, "username": "bo", "email": "bo@example.com", "role_id": "2", "is_active": "false"}
    ]))
    .into_response()
}

async fn list_roles() -> Response {
    Json(json!([{"id": 1, "name": "admin"}, {"id": 2, "name": "viewer"}])).into_response()
}

async fn broken() -> Response {
    (HttpStatus::INTERNAL_SERVER_ERROR, "oops").into_response()
}

async fn malformed() -> Response {
    Json(json!({"not": "a list"})).into_response()
}

async fn spawn_server() -> (String, Shared) {
    let state: Shared = Arc::new(Mutex::new(Recorded::default()));
    let app = Router::new()
        .route("/login", post(login))
        .route("/signup", post(signup))
        .route("/logout", post(|| async { Json(json!({"message": "bye"})) }))
        .route("/modules", get(list_modules).post(create_module))
        .route(
            "/modules/:id",
            get(module_detail).put(update_module).delete(delete_module),
        )
        .route("/submodules/:module_id", get(list_submodules))
        .route("/submodules/detail/:id", get(submodule_detail))
        .route("/users", get(list_users).post(broken))
        .route("/roles", get(list_roles))
        .route("/users/:id", put(update_user).delete(delete_user))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (format!("http://{addr}/"), state)
}

fn client(base_url: &str) -> ApiClient {
    ApiClient::new(ApiClientConfig::new(base_url).with_timeout(5)).expect("client")
}

fn credential() -> SessionCredential {
    SessionCredential::new(TOKEN).expect("credential")
}

#[test]
fn base_url_is_validated_and_normalized() {
    assert_eq!(
        normalize_base_url(" http://localhost:8000/ ").unwrap(),
        "http://localhost:8000"
    );
    for bad in ["", "localhost:8000", "ftp://example.com", "not a url"] {
        assert!(matches!(
            normalize_base_url(bad),
            Err(ConfigError::InvalidBaseUrl(_))
        ));
    }
    assert!(ApiClient::new(ApiClientConfig::new("nope")).is_err());
}

#[test]
fn detail_extraction_handles_strings_lists_and_noise() {
    assert_eq!(
        extract_detail(r#"{"detail": "Bad things"}"#).as_deref(),
        Some("Bad things")
    );
    assert_eq!(
        extract_detail(r#"{"detail": [{"msg": "field required"}]}"#).as_deref(),
        Some(r#"[{"msg":"field required"}]"#)
    );
    assert_eq!(extract_detail(r#"{"detail": ""}"#), None);
    assert_eq!(extract_detail("plain text"), None);
}

#[test]
fn endpoint_encodes_each_segment() {
    let base = Url::parse("http://localhost:8000").expect("url");
    assert_eq!(
        endpoint(&base, &["modules"]).expect("url").as_str(),
        "http://localhost:8000/modules"
    );
    assert_eq!(
        endpoint(&base, &["modules", "INV/1?x=2#top"]).expect("url").as_str(),
        "http://localhost:8000/modules/INV%2F1%3Fx=2%23top"
    );

    let prefixed = Url::parse("http://localhost:8000/api").expect("url");
    assert_eq!(
        endpoint(&prefixed, &["users", "7"]).expect("url").as_str(),
        "http://localhost:8000/api/users/7"
    );

    for bad in ["", " ", ".", ".."] {
        assert!(matches!(
            endpoint(&base, &["modules", bad]),
            Err(ResourceError::InvalidPath(_))
        ));
    }
}

#[tokio::test]
async fn ids_with_separators_stay_in_one_segment() {
    let (base, state) = spawn_server().await;
    let api = client(&base).with_credential(&credential());
    let odd = "INV/1?x=2";

    api.update_module(odd, &ModulePayload {
        id: odd.to_string(),
        name: "Odd".to_string(),
    })
    .await
    .expect("update");
    api.delete_module(odd).await.expect("delete");
    let detail = api.get_module(odd).await.expect("detail");
    assert_eq!(detail.id, odd);

    let recorded = state.lock().unwrap();
    assert_eq!(recorded.bodies[0].0, format!("update_module:{odd}"));
    assert_eq!(recorded.deleted, vec![odd.to_string()]);
}

#[tokio::test]
async fn dot_segment_ids_are_refused_before_sending() {
    let (base, state) = spawn_server().await;
    let api = client(&base).with_credential(&credential());
    let err = api.delete_module("..").await.expect_err("refused");
    assert!(matches!(err, ResourceError::InvalidPath(_)));
    assert!(state.lock().unwrap().deleted.is_empty());
}

#[tokio::test]
async fn user_mutations_hit_user_routes() {
    let (base, state) = spawn_server().await;
    let api = client(&base).with_credential(&credential());
    let payload = UserPayload {
        username: "bo".to_string(),
        email: "bo@example.com".to_string(),
        password: None,
        role_id: 2,
        is_active: false,
    };

    api.update_user("7", &payload).await.expect("update");
    api.delete_user("7").await.expect("delete");

    let recorded = state.lock().unwrap();
    assert_eq!(recorded.bodies[0].0, "update_user:7");
    assert_eq!(
        recorded.bodies[0].1,
        json!({"username": "bo", "email": "bo@example.com", "role_id": 2, "is_active": false})
    );
    assert_eq!(recorded.deleted, vec!["user:7".to_string()]);
}

#[tokio::test]
async fn login_posts_form_and_returns_token() {
    let (base, _) = spawn_server().await;
    let api = client(&base);

    let login = api.login("admin", "secret").await.expect("login");
    assert_eq!(login.access_token, TOKEN);
    assert_eq!(login.token_type, "bearer");
}

#[tokio::test]
async fn rejected_login_surfaces_detail_not_session_expiry() {
    let (base, _) = spawn_server().await;
    let err = client(&base)
        .login("admin", "wrong")
        .await
        .expect_err("login should fail");
    assert_eq!(
        err,
        ResourceError::Status {
            status: 401,
            detail: "Incorrect username or password".to_string(),
        }
    );
    assert!(!err.is_auth_expired());
}

#[tokio::test]
async fn register_sends_json_and_reports_conflicts() {
    let (base, state) = spawn_server().await;
    let api = client(&base);

    api.register(&RegisterRequest {
        username: "new".to_string(),
        email: "new@example.com".to_string(),
        password: "pw".to_string(),
    })
    .await
    .expect("register");
    let recorded = state.lock().unwrap().bodies.clone();
    assert_eq!(recorded[0].1["email"], "new@example.com");

    let err = api
        .register(&RegisterRequest {
            username: "taken".to_string(),
            email: "t@example.com".to_string(),
            password: "pw".to_string(),
        })
        .await
        .expect_err("duplicate");
    assert!(matches!(err, ResourceError::Status { status: 400, ref detail } if detail == "Username already registered"));
}

#[tokio::test]
async fn module_listing_requires_bearer_token() {
    let (base, _) = spawn_server().await;
    let anonymous = client(&base);

    let err = anonymous.get_modules().await.expect_err("no token");
    assert_eq!(err, ResourceError::Unauthorized);
    assert!(err.is_auth_expired());

    let api = anonymous.with_credential(&credential());
    assert!(api.is_authorized());
    let modules = api.list_modules().await.expect("modules");
    let ids: Vec<&str> = modules.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "HR"]);
    assert!(!api.without_credential().is_authorized());
}

#[tokio::test]
async fn submodule_endpoints_decode_mixed_ids() {
    let (base, _) = spawn_server().await;
    let api = client(&base).with_credential(&credential());

    let subs = api.list_submodules("1").await.expect("submodules");
    assert_eq!(subs.len(), 2);
    assert_eq!(subs[0].id, "10");
    assert_eq!(subs[1].module_id, "1");

    let detail = api.get_submodule("10").await.expect("detail");
    assert_eq!(detail.module_id, "1");
}

#[tokio::test]
async fn module_mutations_hit_expected_routes() {
    let (base, state) = spawn_server().await;
    let api = client(&base).with_credential(&credential());
    let payload = ModulePayload {
        id: "INV".to_string(),
        name: "Inventory".to_string(),
    };

    api.create_module(&payload).await.expect("create");
    api.update_module("INV", &payload).await.expect("update");
    api.delete_module("INV").await.expect("delete");

    let recorded = state.lock().unwrap();
    assert_eq!(recorded.bodies[0].0, "create_module");
    assert_eq!(recorded.bodies[0].1, json!({"id": "INV", "name": "Inventory"}));
    assert_eq!(recorded.bodies[1].0, "update_module:INV");
    assert_eq!(recorded.deleted, vec!["INV".to_string()]);
}

#[tokio::test]
async fn missing_module_delete_reports_detail() {
    let (base, _) = spawn_server().await;
    let api = client(&base).with_credential(&credential());
    let err = api.delete_module("ghost").await.expect_err("not found");
    assert_eq!(
        err,
        ResourceError::Status {
            status: 404,
            detail: "Module not found".to_string(),
        }
    );
}

#[tokio::test]
async fn users_and_roles_resolve_names() {
    let (base, _) = spawn_server().await;
    let api = client(&base).with_credential(&credential());

    let users = api.get_users().await.expect("users");
    let roles = api.get_roles().await.expect("roles");
    assert_eq!(role_name(&roles, &users[0].role_id), "admin");
    assert_eq!(role_name(&roles, &users[1].role_id), "viewer");
    assert!(!users[1].is_active);
}

#[tokio::test]
async fn non_json_error_body_uses_fallback_message() {
    let (base, _) = spawn_server().await;
    let api = client(&base).with_credential(&credential());
    let err = api
        .create_user(&UserPayload {
            username: "x".to_string(),
            email: "x@example.com".to_string(),
            password: Some("pw".to_string()),
            role_id: 1,
            is_active: true,
        })
        .await
        .expect_err("server error");
    assert!(matches!(err, ResourceError::Status { status: 500, ref detail } if detail == "Request failed"));
}

#[tokio::test]
async fn unexpected_shape_is_a_decode_error() {
    let (base, _) = spawn_server().await;
    let api = client(&base).with_credential(&credential());
    let err = api.get_module("broken").await.expect_err("malformed");
    assert!(matches!(err, ResourceError::Decode(_)));
}

#[tokio::test]
async fn logout_succeeds_without_token() {
    let (base, _) = spawn_server().await;
    client(&base).logout().await.expect("logout");
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let err = client(&format!("http://{addr}"))
        .get_modules()
        .await
        .expect_err("refused");
    assert!(matches!(err, ResourceError::Transport(_)));
}
