use crate::state::{AppEvent, Effect, Mutation, PanelData, PanelRequest};
use adc_api::ApiClient;
use adc_core::{ActivityEvent, ActivityKind, IdleMonitor, ResourceError, ResourceLayer, SessionStore};
use crossterm::event::{Event, KeyEventKind, MouseEventKind};
use tokio::sync::mpsc::UnboundedSender;
use std::future::Future;
use tracing::{debug, error, info, warn};

/// Executes effects off the UI loop and reports back through `event_tx`.
pub struct Runtime {
    api: ApiClient,
    event_tx: UnboundedSender<AppEvent>,
    idle: Option<IdleMonitor>,
    idle_timeout_minutes: f64,
}

impl Runtime {
    pub fn new(api: ApiClient, event_tx: UnboundedSender<AppEvent>, idle_timeout_minutes: f64) -> Self {
        Self {
            api,
            event_tx,
            idle: None,
            idle_timeout_minutes,
        }
    }

    pub fn execute(&mut self, effect: Effect, session: &SessionStore) {
        match effect {
            Effect::StartIdle => self.start_idle(),
            Effect::StopIdle => self.stop_idle(),
            effect => {
                let api = match session.credential() {
                    Some(credential) => self.api.with_credential(credential),
                    None => self.api.without_credential(),
                };
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    if let Some(event) = run_effect(api, effect).await {
                        let _ = tx.send(event);
                    }
                });
            }
        }
    }

    fn start_idle(&mut self) {
        self.stop_idle();
        let tx = self.event_tx.clone();
        match IdleMonitor::start(
            move || {
                let _ = tx.send(AppEvent::IdleTimeout);
            },
            self.idle_timeout_minutes,
        ) {
            Ok(monitor) => {
                info!(event = "idle_monitor_armed", timeout_secs = monitor.timeout().as_secs());
                self.idle = Some(monitor);
            }
            Err(err) => error!(event = "idle_monitor_start_failed", error = %err),
        }
    }

    fn stop_idle(&mut self) {
        if let Some(mut monitor) = self.idle.take() {
            monitor.stop();
        }
    }

    /// Feeds terminal input to the idle monitor. No-op while signed out.
    pub fn notify_activity(&self, event: &Event) {
        let (Some(monitor), Some(kind)) = (&self.idle, activity_kind(event)) else {
            return;
        };
        if !monitor.notify(ActivityEvent::now(kind)) {
            debug!(event = "idle_activity_after_stop", kind = kind.as_str());
        }
    }

    pub fn shutdown(&mut self) {
        self.stop_idle();
    }
}

pub fn activity_kind(event: &Event) -> Option<ActivityKind> {
    match event {
        Event::Key(key) if key.kind != KeyEventKind::Release => Some(ActivityKind::KeyDown),
        Event::Paste(_) => Some(ActivityKind::KeyDown),
        Event::Mouse(mouse) => Some(match mouse.kind {
            MouseEventKind::Moved | MouseEventKind::Drag(_) => ActivityKind::PointerMove,
            MouseEventKind::Down(_) | MouseEventKind::Up(_) => ActivityKind::PointerClick,
            MouseEventKind::ScrollDown
            | MouseEventKind::ScrollUp
            | MouseEventKind::ScrollLeft
            | MouseEventKind::ScrollRight => ActivityKind::Scroll,
        }),
        _ => None,
    }
}

/// Session-bound calls fail fast as `Unauthorized` when no credential is attached.
async fn with_session<T>(
    api: &ApiClient,
    call: impl Future<Output = Result<T, ResourceError>>,
) -> Result<T, ResourceError> {
    if !api.is_authorized() {
        debug!(event = "request_skipped_without_session");
        return Err(ResourceError::Unauthorized);
    }
    call.await
}

async fn run_effect(api: ApiClient, effect: Effect) -> Option<AppEvent> {
    let event = match effect {
        Effect::FetchModules { generation } => AppEvent::ModulesLoaded {
            generation,
            result: with_session(&api, api.list_modules()).await,
        },
        Effect::FetchSubmodules {
            module_id,
            generation,
        } => {
            let result = with_session(&api, api.list_submodules(&module_id)).await;
            AppEvent::SubmodulesLoaded {
                module_id,
                generation,
                result,
            }
        }
        Effect::Login { username, password } => AppEvent::LoginFinished(
            api.without_credential().login(&username, &password).await,
        ),
        Effect::Register(request) => {
            AppEvent::RegisterFinished(api.without_credential().register(&request).await)
        }
        Effect::Logout(credential) => {
            AppEvent::LogoutFinished(api.with_credential(&credential).logout().await)
        }
        Effect::Mutate(mutation) => {
            let result = with_session(&api, apply_mutation(&api, &mutation)).await;
            AppEvent::MutationFinished { mutation, result }
        }
        Effect::LoadPanel { ticket, request } => AppEvent::PanelLoaded {
            ticket,
            result: with_session(&api, load_panel(&api, request)).await,
        },
        Effect::StartIdle | Effect::StopIdle => return None,
    };
    Some(event)
}

async fn apply_mutation(api: &ApiClient, mutation: &Mutation) -> Result<(), ResourceError> {
    match mutation {
        Mutation::CreateModule(payload) => api.create_module(payload).await,
        Mutation::UpdateModule { id, payload } => api.update_module(id, payload).await,
        Mutation::DeleteModule(id) => api.delete_module(id).await,
        Mutation::CreateSubmodule(payload) => api.create_submodule(payload).await,
        Mutation::UpdateSubmodule { id, payload } => api.update_submodule(id, payload).await,
        Mutation::DeleteSubmodule(id) => api.delete_submodule(id).await,
        Mutation::CreateUser(payload) => api.create_user(payload).await,
        Mutation::UpdateUser { id, payload } => api.update_user(id, payload).await,
        Mutation::DeleteUser(id) => api.delete_user(id).await,
    }
}

async fn load_panel(api: &ApiClient, request: PanelRequest) -> Result<PanelData, ResourceError> {
    match request {
        PanelRequest::Users => {
            let (users, roles) = tokio::join!(api.get_users(), api.get_roles());
            let users = users?;
            let roles = match roles {
                Ok(roles) => roles,
                Err(err) if err.is_auth_expired() => return Err(err),
                Err(err) => {
                    warn!(event = "roles_fetch_failed", error = %err);
                    Vec::new()
                }
            };
            Ok(PanelData::Users { users, roles })
        }
        PanelRequest::ModuleDetail(id) => Ok(PanelData::ModuleDetail(api.get_module(&id).await?)),
        PanelRequest::Submodules(module_id) => {
            let items = api.get_submodules(&module_id).await?;
            Ok(PanelData::Submodules { module_id, items })
        }
        PanelRequest::SubmoduleDetail(id) => {
            Ok(PanelData::SubmoduleDetail(api.get_submodule(&id).await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adc_api::ApiClientConfig;
    use adc_api::UserPayload;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn mouse(kind: MouseEventKind) -> Event {
        Event::Mouse(MouseEvent {
            kind,
            column: 0,
            row: 0,
            modifiers: KeyModifiers::NONE,
        })
    }

    fn runtime(base_url: &str) -> (Runtime, UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let api = ApiClient::new(ApiClientConfig::new(base_url).with_timeout(5)).expect("client");
        (Runtime::new(api, tx, 15.0), rx)
    }

    async fn spawn_server() -> String {
        async fn modules(headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
            match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                Some("Bearer tok-123") => Ok(Json(json!([{"id": "INV", "name": "Inventory"}]))),
                _ => Err(StatusCode::UNAUTHORIZED),
            }
        }
        async fn users() -> Json<Value> {
            Json(json!([{"id": 1, "username": "ana", "role_id": 1, "is_active": true}]))
        }
        async fn roles() -> StatusCode {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        async fn module(Path(id): Path<String>) -> Json<Value> {
            Json(json!({"id": id, "name": "Inventory"}))
        }
        async fn update_user(Path(id): Path<String>, Json(body): Json<Value>) -> StatusCode {
            if id == "7" && body["role_id"] == 2 && body.get("password").is_none() {
                StatusCode::OK
            } else {
                StatusCode::BAD_REQUEST
            }
        }

        let app = Router::new()
            .route("/modules", get(modules))
            .route("/modules/:id", get(module))
            .route("/users", get(users))
            .route("/users/:id", put(update_user))
            .route("/roles", get(roles));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    #[test]
    fn terminal_input_maps_to_activity_kinds() {
        let press = Event::Key(KeyEvent::new(KeyCode::Char('a'), KeyModifiers::NONE));
        assert_eq!(activity_kind(&press), Some(ActivityKind::KeyDown));

        let mut release = KeyEvent::new(KeyCode::Char('a'), KeyModifiers::NONE);
        release.kind = KeyEventKind::Release;
        assert_eq!(activity_kind(&Event::Key(release)), None);

        assert_eq!(
            activity_kind(&mouse(MouseEventKind::Moved)),
            Some(ActivityKind::PointerMove)
        );
        assert_eq!(
            activity_kind(&mouse(MouseEventKind::Down(MouseButton::Left))),
            Some(ActivityKind::PointerClick)
        );
        assert_eq!(
            activity_kind(&mouse(MouseEventKind::ScrollUp)),
            Some(ActivityKind::Scroll)
        );
        assert_eq!(activity_kind(&Event::Resize(80, 24)), None);
        assert_eq!(activity_kind(&Event::FocusGained), None);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_monitor_reports_timeout_as_event() {
        let (mut runtime, mut rx) = runtime("http://localhost:8000");
        runtime.execute(Effect::StartIdle, &SessionStore::in_memory());
        assert!(runtime.idle.as_ref().is_some_and(IdleMonitor::is_running));
        assert_eq!(
            runtime.idle.as_ref().map(IdleMonitor::timeout),
            Some(Duration::from_secs(15 * 60))
        );

        let event = rx.recv().await.expect("idle event");
        assert!(matches!(event, AppEvent::IdleTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_idle_monitor_stays_quiet() {
        let (mut runtime, mut rx) = runtime("http://localhost:8000");
        let session = SessionStore::in_memory();
        runtime.execute(Effect::StartIdle, &session);
        tokio::time::sleep(Duration::from_secs(60)).await;
        runtime.execute(Effect::StopIdle, &session);
        assert!(!runtime.idle.as_ref().is_some_and(IdleMonitor::is_running));

        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn activity_postpones_timeout() {
        let (mut runtime, mut rx) = runtime("http://localhost:8000");
        runtime.execute(Effect::StartIdle, &SessionStore::in_memory());
        let press = Event::Key(KeyEvent::new(KeyCode::Char('j'), KeyModifiers::NONE));

        tokio::time::sleep(Duration::from_secs(14 * 60)).await;
        runtime.notify_activity(&press);
        tokio::time::sleep(Duration::from_secs(14 * 60)).await;
        assert!(rx.try_recv().is_err());

        let event = rx.recv().await.expect("idle event");
        assert!(matches!(event, AppEvent::IdleTimeout));
    }

    #[tokio::test]
    async fn fetch_uses_session_credential() {
        let base = spawn_server().await;
        let (mut runtime, mut rx) = runtime(&base);
        let mut session = SessionStore::in_memory();
        session.set_credential("tok-123").expect("credential");

        runtime.execute(Effect::FetchModules { generation: 4 }, &session);
        match rx.recv().await.expect("event") {
            AppEvent::ModulesLoaded { generation, result } => {
                assert_eq!(generation, 4);
                assert_eq!(result.expect("modules")[0].id, "INV");
            }
            _ => panic!("expected modules result"),
        }

        session.clear_credential().expect("clear");
        runtime.execute(Effect::FetchModules { generation: 5 }, &session);
        match rx.recv().await.expect("event") {
            AppEvent::ModulesLoaded { result, .. } => {
                assert_eq!(result.expect_err("rejected"), ResourceError::Unauthorized);
            }
            _ => panic!("expected modules result"),
        }
    }

    #[tokio::test]
    async fn users_panel_survives_missing_roles() {
        let base = spawn_server().await;
        let (mut runtime, mut rx) = runtime(&base);
        let mut session = SessionStore::in_memory();
        session.set_credential("tok-123").expect("credential");

        runtime.execute(
            Effect::LoadPanel {
                ticket: 9,
                request: PanelRequest::Users,
            },
            &session,
        );
        match rx.recv().await.expect("event") {
            AppEvent::PanelLoaded {
                ticket,
                result: Ok(PanelData::Users { users, roles }),
            } => {
                assert_eq!(ticket, 9);
                assert_eq!(users.len(), 1);
                assert!(roles.is_empty());
            }
            _ => panic!("expected users panel"),
        }
    }

    fn signed_in() -> SessionStore {
        let mut session = SessionStore::in_memory();
        session.set_credential("tok-123").expect("credential");
        session
    }

    #[tokio::test]
    async fn signed_out_effects_never_reach_the_network() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let (mut runtime, mut rx) = runtime(&format!("http://{addr}"));

        runtime.execute(
            Effect::Mutate(Mutation::DeleteUser("7".to_string())),
            &SessionStore::in_memory(),
        );
        match rx.recv().await.expect("event") {
            AppEvent::MutationFinished { result, .. } => {
                assert_eq!(result, Err(ResourceError::Unauthorized));
            }
            _ => panic!("expected mutation result"),
        }
    }

    #[tokio::test]
    async fn user_update_goes_to_the_user_route() {
        let base = spawn_server().await;
        let (mut runtime, mut rx) = runtime(&base);
        let mutation = Mutation::UpdateUser {
            id: "7".to_string(),
            payload: UserPayload {
                username: "bo".to_string(),
                email: "bo@example.com".to_string(),
                password: None,
                role_id: 2,
                is_active: false,
            },
        };

        runtime.execute(Effect::Mutate(mutation.clone()), &signed_in());
        match rx.recv().await.expect("event") {
            AppEvent::MutationFinished {
                mutation: finished,
                result,
            } => {
                assert_eq!(finished, mutation);
                assert_eq!(result, Ok(()));
            }
            _ => panic!("expected mutation result"),
        }
    }

    #[tokio::test]
    async fn module_detail_panel_fetches_one_module() {
        let base = spawn_server().await;
        let (mut runtime, mut rx) = runtime(&base);
        runtime.execute(
            Effect::LoadPanel {
                ticket: 3,
                request: PanelRequest::ModuleDetail("INV".to_string()),
            },
            &signed_in(),
        );
        match rx.recv().await.expect("event") {
            AppEvent::PanelLoaded {
                ticket: 3,
                result: Ok(PanelData::ModuleDetail(module)),
            } => assert_eq!(module.name, "Inventory"),
            _ => panic!("expected module detail"),
        }
    }
}
