use crate::config::ConsoleConfig;
use crate::forms::{Form, FormAction};
use adc_api::{
    LoginResponse, ModulePayload, RegisterRequest, Role, SubmodulePayload, User, UserPayload,
};
use adc_core::{
    Destination, GatePolicy, NavCommand, NavModule, NavRowKind, NavSubmodule, NavTreeController,
    NavigationGate, RefreshBus, ResourceError, SessionCredential, SessionStore, Subscription,
    SETTINGS_LEAVES,
};
use chrono::{DateTime, Local};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// Work the app wants done. Executed by the runtime, never by the app itself.
pub enum Effect {
    FetchModules { generation: u64 },
    FetchSubmodules { module_id: String, generation: u64 },
    Login { username: String, password: String },
    Register(RegisterRequest),
    Logout(SessionCredential),
    Mutate(Mutation),
    LoadPanel { ticket: u64, request: PanelRequest },
    StartIdle,
    StopIdle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateModule(ModulePayload),
    UpdateModule { id: String, payload: ModulePayload },
    DeleteModule(String),
    CreateSubmodule(SubmodulePayload),
    UpdateSubmodule { id: String, payload: SubmodulePayload },
    DeleteSubmodule(String),
    CreateUser(UserPayload),
    UpdateUser { id: String, payload: UserPayload },
    DeleteUser(String),
}

impl Mutation {
    /// Module and submodule changes reshape the sidebar; user changes do not.
    pub fn refreshes_navigation(&self) -> bool {
        !matches!(
            self,
            Mutation::CreateUser(_) | Mutation::UpdateUser { .. } | Mutation::DeleteUser(_)
        )
    }

    pub fn success_note(&self) -> &'static str {
        match self {
            Mutation::CreateModule(_) => "Module created",
            Mutation::UpdateModule { .. } => "Module updated",
            Mutation::DeleteModule(_) => "Module deleted",
            Mutation::CreateSubmodule(_) => "Submodule created",
            Mutation::UpdateSubmodule { .. } => "Submodule updated",
            Mutation::DeleteSubmodule(_) => "Submodule deleted",
            Mutation::CreateUser(_) => "User created",
            Mutation::UpdateUser { .. } => "User updated",
            Mutation::DeleteUser(_) => "User deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelRequest {
    Users,
    ModuleDetail(String),
    Submodules(String),
    SubmoduleDetail(String),
}

#[derive(Debug, Clone)]
pub enum PanelData {
    Users { users: Vec<User>, roles: Vec<Role> },
    ModuleDetail(NavModule),
    Submodules { module_id: String, items: Vec<NavSubmodule> },
    SubmoduleDetail(NavSubmodule),
}

/// Completions and signals fed back into the loop, applied in arrival order.
pub enum AppEvent {
    NavRefresh(u64),
    ModulesLoaded {
        generation: u64,
        result: Result<Vec<NavModule>, ResourceError>,
    },
    SubmodulesLoaded {
        module_id: String,
        generation: u64,
        result: Result<Vec<NavSubmodule>, ResourceError>,
    },
    LoginFinished(Result<LoginResponse, ResourceError>),
    RegisterFinished(Result<(), ResourceError>),
    MutationFinished {
        mutation: Mutation,
        result: Result<(), ResourceError>,
    },
    PanelLoaded {
        ticket: u64,
        result: Result<PanelData, ResourceError>,
    },
    LogoutFinished(Result<(), ResourceError>),
    IdleTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Login,
    Register,
    Shell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    #[default]
    Sidebar,
    Main,
}

impl Focus {
    fn toggle(self) -> Self {
        match self {
            Focus::Sidebar => Focus::Main,
            Focus::Main => Focus::Sidebar,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    Module { id: String, name: String },
    Submodule { id: String, name: String },
    User { id: String, name: String },
}

impl DeleteTarget {
    pub fn label(&self) -> String {
        match self {
            DeleteTarget::Module { id, name } => format!("module '{name}' ({id})"),
            DeleteTarget::Submodule { id, name } => format!("submodule '{name}' ({id})"),
            DeleteTarget::User { id, name } => format!("user '{name}' ({id})"),
        }
    }

    fn into_mutation(self) -> Mutation {
        match self {
            DeleteTarget::Module { id, .. } => Mutation::DeleteModule(id),
            DeleteTarget::Submodule { id, .. } => Mutation::DeleteSubmodule(id),
            DeleteTarget::User { id, .. } => Mutation::DeleteUser(id),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Modal {
    Module {
        form: Form,
        editing: Option<String>,
    },
    Submodule {
        form: Form,
        editing: Option<String>,
        module_id: String,
    },
    User {
        form: Form,
        editing: Option<String>,
    },
    /// Read-only module view; `module` is filled once the server answers.
    ModuleDetail {
        id: String,
        module: Option<NavModule>,
    },
    ConfirmDelete(DeleteTarget),
}

enum ModalOutcome {
    Keep,
    Close,
    Open(Modal),
    Submit(Mutation),
}

fn user_payload(form: &Form) -> Result<UserPayload, String> {
    if let Some(field) = form.first_missing() {
        return Err(format!("{field} is required"));
    }
    let email = form.value("Email");
    if !email.contains('@') {
        return Err("Email address is not valid".to_string());
    }
    let role_id = form
        .value("Role")
        .parse::<i64>()
        .map_err(|_| "Role must be a numeric id".to_string())?;
    let password = form.raw_value("Password");
    Ok(UserPayload {
        username: form.value("Username").to_string(),
        email: email.to_string(),
        password: (!password.is_empty()).then(|| password.to_string()),
        role_id,
        is_active: form.value("Active") == "true",
    })
}

pub fn describe_error(err: &ResourceError) -> String {
    match err {
        ResourceError::Status { detail, .. } => detail.clone(),
        ResourceError::Transport(_) => "Cannot reach the server".to_string(),
        ResourceError::Decode(_) => "Unexpected response from the server".to_string(),
        ResourceError::Unauthorized => "Session rejected by the server".to_string(),
        ResourceError::InvalidPath(segment) => format!("Invalid identifier {segment}"),
    }
}

pub struct App {
    pub config: ConsoleConfig,
    session: SessionStore,
    gate: NavigationGate,
    pub tree: NavTreeController,
    bus: RefreshBus,
    event_tx: UnboundedSender<AppEvent>,
    subscription: Option<Subscription>,
    pub destination: Destination,
    pub focus: Focus,
    pub sidebar_selected: usize,
    pub main_selected: usize,
    pub login_form: Form,
    pub register_form: Form,
    pub modal: Option<Modal>,
    pub show_help: bool,
    pub status_note: Option<String>,
    pub last_error: Option<String>,
    pub auth_pending: bool,
    pub users: Vec<User>,
    pub roles: Vec<Role>,
    pub parameters_module: Option<String>,
    pub parameter_items: Vec<NavSubmodule>,
    pub submodule_detail: Option<NavSubmodule>,
    pub panel_loading: bool,
    panel_ticket: u64,
    pub last_refresh_at: Option<DateTime<Local>>,
    pub spinner: usize,
    should_quit: bool,
    effects: Vec<Effect>,
}

impl App {
    pub fn new(
        config: ConsoleConfig,
        session: SessionStore,
        event_tx: UnboundedSender<AppEvent>,
    ) -> Self {
        let gate = NavigationGate::new(GatePolicy {
            redirect_authenticated_from_public: config.redirect_authenticated_from_public,
        });
        Self {
            config,
            session,
            gate,
            tree: NavTreeController::new(),
            bus: RefreshBus::new(),
            event_tx,
            subscription: None,
            destination: Destination::Login,
            focus: Focus::Sidebar,
            sidebar_selected: 0,
            main_selected: 0,
            login_form: Form::login(),
            register_form: Form::register(),
            modal: None,
            show_help: false,
            status_note: None,
            last_error: None,
            auth_pending: false,
            users: Vec::new(),
            roles: Vec::new(),
            parameters_module: None,
            parameter_items: Vec::new(),
            submodule_detail: None,
            panel_loading: false,
            panel_ticket: 0,
            last_refresh_at: None,
            spinner: 0,
            should_quit: false,
            effects: Vec::new(),
        }
    }

    /// Enters the dashboard; the gate sends a guest to the login screen.
    pub fn start(&mut self) {
        self.navigate(Destination::Dashboard);
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn gate_policy(&self) -> GatePolicy {
        self.gate.policy()
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn screen(&self) -> Screen {
        match self.destination {
            Destination::Login => Screen::Login,
            Destination::Register => Screen::Register,
            _ => Screen::Shell,
        }
    }

    pub fn is_shell_mounted(&self) -> bool {
        self.tree.is_mounted()
    }

    pub fn is_busy(&self) -> bool {
        self.auth_pending || self.panel_loading || self.tree.is_loading_modules()
    }

    pub fn on_tick(&mut self) {
        if self.is_busy() {
            self.spinner = (self.spinner + 1) % 4;
        }
    }

    pub fn navigate(&mut self, requested: Destination) {
        let decision = self.gate.evaluate_session(requested.clone(), &self.session);
        if decision.is_redirect() {
            info!(
                event = "gate_redirect",
                from = %requested,
                to = %decision.destination()
            );
        }
        let target = decision.into_destination();

        if target.is_protected() {
            self.mount_shell();
        } else {
            self.teardown_shell();
        }

        self.destination = target.clone();
        self.main_selected = 0;
        if self.tree.is_mounted() {
            self.tree.note_navigation(&target);
            self.sync_sidebar_to_active();
        }
        self.load_panel_for(&target);
        debug!(event = "navigated", destination = %target);
    }

    fn mount_shell(&mut self) {
        if self.tree.is_mounted() {
            return;
        }
        let tx = self.event_tx.clone();
        self.subscription = Some(self.bus.subscribe(move |counter| {
            let _ = tx.send(AppEvent::NavRefresh(counter));
        }));
        let commands = self.tree.mount();
        self.effects.push(Effect::StartIdle);
        self.run_nav_commands(commands);
        info!(event = "shell_mounted");
    }

    fn teardown_shell(&mut self) {
        if !self.tree.is_mounted() && self.subscription.is_none() {
            return;
        }
        self.tree.unmount();
        self.subscription = None;
        self.effects.push(Effect::StopIdle);
        self.modal = None;
        self.focus = Focus::Sidebar;
        self.sidebar_selected = 0;
        self.users.clear();
        self.roles.clear();
        self.parameters_module = None;
        self.parameter_items.clear();
        self.submodule_detail = None;
        self.panel_ticket += 1;
        self.panel_loading = false;
        self.last_error = None;
        info!(event = "shell_unmounted");
    }

    fn run_nav_commands(&mut self, commands: Vec<NavCommand>) {
        for command in commands {
            match command {
                NavCommand::FetchModules { generation } => {
                    self.effects.push(Effect::FetchModules { generation })
                }
                NavCommand::FetchSubmodules {
                    module_id,
                    generation,
                } => self.effects.push(Effect::FetchSubmodules {
                    module_id,
                    generation,
                }),
                NavCommand::Navigate(destination) => self.navigate(destination),
            }
        }
    }

    fn request_panel(&mut self, request: PanelRequest) {
        self.panel_ticket += 1;
        self.panel_loading = true;
        self.effects.push(Effect::LoadPanel {
            ticket: self.panel_ticket,
            request,
        });
    }

    fn load_panel_for(&mut self, destination: &Destination) {
        match destination {
            Destination::Users => self.request_panel(PanelRequest::Users),
            Destination::Parameters => {
                self.sync_parameters_module();
                match self.parameters_module.clone() {
                    Some(module_id) => self.request_panel(PanelRequest::Submodules(module_id)),
                    None => self.panel_loading = false,
                }
            }
            Destination::Submodule { submodule_id, .. } => {
                self.submodule_detail = None;
                self.request_panel(PanelRequest::SubmoduleDetail(submodule_id.clone()));
            }
            _ => self.panel_loading = false,
        }
    }

    fn reload_panel(&mut self) {
        let destination = self.destination.clone();
        self.load_panel_for(&destination);
    }

    /// Keeps the Parameters selection pointing at a module that still exists.
    fn sync_parameters_module(&mut self) -> bool {
        let modules = self.tree.modules();
        if let Some(current) = &self.parameters_module {
            if modules.iter().any(|module| &module.id == current) {
                return false;
            }
        }
        let next = modules.first().map(|module| module.id.clone());
        if next == self.parameters_module {
            return false;
        }
        self.parameters_module = next;
        self.parameter_items.clear();
        self.main_selected = 0;
        true
    }

    fn cycle_parameters_module(&mut self, step: isize) {
        let modules = self.tree.modules();
        if modules.is_empty() {
            return;
        }
        let current = self
            .parameters_module
            .as_deref()
            .and_then(|id| modules.iter().position(|module| module.id == id))
            .unwrap_or(0);
        let len = modules.len() as isize;
        let next = (current as isize + step).rem_euclid(len) as usize;
        let module_id = modules[next].id.clone();
        self.parameters_module = Some(module_id.clone());
        self.parameter_items.clear();
        self.main_selected = 0;
        self.request_panel(PanelRequest::Submodules(module_id));
    }

    /// AuthExpired: drop the credential, tear the shell down, land on login.
    fn expire_session(&mut self, note: &str) {
        let erase_failed = match self.session.clear_credential() {
            Ok(()) => false,
            Err(err) => {
                error!(event = "session_clear_failed", error = %err);
                true
            }
        };
        self.auth_pending = false;
        self.navigate(Destination::Login);
        self.status_note = Some(if erase_failed {
            format!("{note}. The saved session could not be removed yet; it is retried on exit.")
        } else {
            note.to_string()
        });
    }

    pub fn logout(&mut self) {
        if let Some(credential) = self.session.credential().cloned() {
            self.effects.push(Effect::Logout(credential));
        }
        info!(event = "logout_requested");
        self.expire_session("Signed out");
    }

    fn expire_if_unauthorized<T>(&mut self, result: &Result<T, ResourceError>) -> bool {
        let rejected = matches!(result, Err(err) if err.is_auth_expired());
        if rejected && self.tree.is_mounted() {
            warn!(event = "session_rejected_by_server");
            self.expire_session("Session rejected by the server. Please sign in again.");
            return true;
        }
        false
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::NavRefresh(counter) => {
                let commands = self.tree.on_refresh(counter);
                if !commands.is_empty() {
                    self.last_refresh_at = Some(Local::now());
                }
                self.run_nav_commands(commands);
            }
            AppEvent::ModulesLoaded { generation, result } => {
                if self.expire_if_unauthorized(&result) {
                    return;
                }
                let commands = self.tree.apply_modules(generation, result);
                self.run_nav_commands(commands);
                self.clamp_selection();
                if self.destination == Destination::Parameters && self.sync_parameters_module() {
                    if let Some(module_id) = self.parameters_module.clone() {
                        self.request_panel(PanelRequest::Submodules(module_id));
                    }
                }
            }
            AppEvent::SubmodulesLoaded {
                module_id,
                generation,
                result,
            } => {
                if self.expire_if_unauthorized(&result) {
                    return;
                }
                let commands = self.tree.apply_submodules(&module_id, generation, result);
                self.run_nav_commands(commands);
                self.clamp_selection();
            }
            AppEvent::LoginFinished(result) => self.finish_login(result),
            AppEvent::RegisterFinished(result) => self.finish_register(result),
            AppEvent::MutationFinished { mutation, result } => {
                self.finish_mutation(mutation, result)
            }
            AppEvent::PanelLoaded { ticket, result } => self.finish_panel(ticket, result),
            AppEvent::LogoutFinished(result) => {
                if let Err(err) = result {
                    warn!(event = "server_logout_failed", error = %err);
                }
            }
            AppEvent::IdleTimeout => {
                if self.session.is_authenticated() || self.tree.is_mounted() {
                    info!(event = "session_idle_expired");
                    self.expire_session("Session expired after inactivity");
                }
            }
        }
    }

    fn finish_login(&mut self, result: Result<LoginResponse, ResourceError>) {
        if !self.auth_pending {
            return;
        }
        self.auth_pending = false;
        match result {
            Ok(login) => match self.session.set_credential(login.access_token) {
                Ok(()) => {
                    self.login_form.clear_secrets();
                    self.login_form.error = None;
                    self.status_note = None;
                    self.navigate(Destination::Dashboard);
                }
                Err(err) => {
                    warn!(event = "login_credential_rejected", error = %err);
                    self.login_form.error = Some(err.to_string());
                }
            },
            Err(err) => {
                self.login_form.error = Some(describe_error(&err));
            }
        }
    }

    fn finish_register(&mut self, result: Result<(), ResourceError>) {
        if !self.auth_pending {
            return;
        }
        self.auth_pending = false;
        match result {
            Ok(()) => {
                let username = self.register_form.value("Username").to_string();
                self.register_form = Form::register();
                self.login_form = Form::login();
                self.login_form.set_value("Username", &username);
                self.login_form.focus = 1;
                self.navigate(Destination::Login);
                self.status_note = Some("Account created. Sign in to continue.".to_string());
            }
            Err(err) => self.register_form.error = Some(describe_error(&err)),
        }
    }

    fn finish_mutation(&mut self, mutation: Mutation, result: Result<(), ResourceError>) {
        if !self.tree.is_mounted() {
            debug!(event = "mutation_result_after_teardown");
            return;
        }
        if self.expire_if_unauthorized(&result) {
            return;
        }
        match result {
            Ok(()) => {
                self.last_error = None;
                self.status_note = Some(mutation.success_note().to_string());
                if mutation.refreshes_navigation() {
                    let counter = self.bus.publish();
                    info!(event = "mutation_applied", counter, note = mutation.success_note());
                } else {
                    info!(event = "mutation_applied", note = mutation.success_note());
                }
                if matches!(self.destination, Destination::Parameters | Destination::Users) {
                    self.reload_panel();
                }
            }
            Err(err) => {
                self.status_note = None;
                self.last_error = Some(describe_error(&err));
            }
        }
    }

    fn finish_panel(&mut self, ticket: u64, result: Result<PanelData, ResourceError>) {
        if ticket != self.panel_ticket || !self.tree.is_mounted() {
            debug!(event = "panel_result_discarded", ticket);
            return;
        }
        self.panel_loading = false;
        if self.expire_if_unauthorized(&result) {
            return;
        }
        match result {
            Ok(PanelData::Users { users, roles }) => {
                self.users = users;
                self.roles = roles;
            }
            Ok(PanelData::ModuleDetail(detail)) => {
                if let Some(Modal::ModuleDetail { id, module }) = self.modal.as_mut() {
                    if *id == detail.id {
                        *module = Some(detail);
                    }
                }
            }
            Ok(PanelData::Submodules { module_id, items }) => {
                if self.parameters_module.as_deref() == Some(module_id.as_str()) {
                    self.parameter_items = items;
                }
            }
            Ok(PanelData::SubmoduleDetail(detail)) => self.submodule_detail = Some(detail),
            Err(err) => self.last_error = Some(describe_error(&err)),
        }
        self.clamp_selection();
    }

    // Input

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }
        if self.show_help {
            if matches!(key.code, KeyCode::Esc | KeyCode::Char('?') | KeyCode::F(1)) {
                self.show_help = false;
            }
            return;
        }
        match self.screen() {
            Screen::Login => self.handle_login_key(key),
            Screen::Register => self.handle_register_key(key),
            Screen::Shell => self.handle_shell_key(key),
        }
    }

    fn handle_login_key(&mut self, key: KeyEvent) {
        if self.auth_pending {
            return;
        }
        match key.code {
            KeyCode::F(1) => self.show_help = true,
            KeyCode::F(2) => self.navigate(Destination::Register),
            _ => match self.login_form.handle_key(key) {
                FormAction::Submit => self.submit_login(),
                FormAction::Cancel => self.should_quit = true,
                FormAction::Continue => {}
            },
        }
    }

    fn handle_register_key(&mut self, key: KeyEvent) {
        if self.auth_pending {
            return;
        }
        match key.code {
            KeyCode::F(1) => self.show_help = true,
            KeyCode::F(2) => self.navigate(Destination::Login),
            _ => match self.register_form.handle_key(key) {
                FormAction::Submit => self.submit_register(),
                FormAction::Cancel => self.navigate(Destination::Login),
                FormAction::Continue => {}
            },
        }
    }

    fn submit_login(&mut self) {
        if let Some(field) = self.login_form.first_missing() {
            self.login_form.error = Some(format!("{field} is required"));
            return;
        }
        self.login_form.error = None;
        self.status_note = None;
        self.auth_pending = true;
        self.effects.push(Effect::Login {
            username: self.login_form.value("Username").to_string(),
            password: self.login_form.raw_value("Password").to_string(),
        });
    }

    fn submit_register(&mut self) {
        if let Some(field) = self.register_form.first_missing() {
            self.register_form.error = Some(format!("{field} is required"));
            return;
        }
        let email = self.register_form.value("Email").to_string();
        if !email.contains('@') {
            self.register_form.error = Some("Email address is not valid".to_string());
            return;
        }
        self.register_form.error = None;
        self.auth_pending = true;
        self.effects.push(Effect::Register(RegisterRequest {
            username: self.register_form.value("Username").to_string(),
            email,
            password: self.register_form.raw_value("Password").to_string(),
        }));
    }

    fn handle_shell_key(&mut self, key: KeyEvent) {
        if self.modal.is_some() {
            self.handle_modal_key(key);
            return;
        }
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('?') | KeyCode::F(1) => self.show_help = true,
            KeyCode::Char('L') => self.logout(),
            KeyCode::Char('r') => {
                let counter = self.bus.publish();
                self.status_note = Some(format!("Refresh #{counter} requested"));
                self.reload_panel();
            }
            KeyCode::Tab | KeyCode::BackTab => self.focus = self.focus.toggle(),
            KeyCode::Esc => self.focus = Focus::Sidebar,
            _ => match self.focus {
                Focus::Sidebar => self.handle_sidebar_key(key),
                Focus::Main => self.handle_main_key(key),
            },
        }
    }

    fn handle_sidebar_key(&mut self, key: KeyEvent) {
        let len = self.tree.rows().len();
        match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                self.sidebar_selected = (self.sidebar_selected + 1).min(len.saturating_sub(1));
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.sidebar_selected = self.sidebar_selected.saturating_sub(1);
            }
            KeyCode::Char('g') | KeyCode::Home => self.sidebar_selected = 0,
            KeyCode::Enter | KeyCode::Char(' ') | KeyCode::Char('l') | KeyCode::Right => {
                self.activate_sidebar_row()
            }
            _ => {}
        }
    }

    fn activate_sidebar_row(&mut self) {
        let Some(row) = self.tree.rows().into_iter().nth(self.sidebar_selected) else {
            return;
        };
        match row.kind {
            NavRowKind::Leaf(destination) => {
                let commands = self.tree.select_leaf(row.label, destination);
                self.run_nav_commands(commands);
                self.focus = Focus::Main;
            }
            NavRowKind::Module(module_id) => {
                let commands = self.tree.toggle_module(&module_id);
                self.run_nav_commands(commands);
                if let Some(index) = self
                    .tree
                    .rows()
                    .iter()
                    .position(|row| row.kind == NavRowKind::Module(module_id.clone()))
                {
                    self.sidebar_selected = index;
                }
            }
            NavRowKind::SettingsGroup => {
                self.tree.toggle_settings();
                if self.tree.settings_open() {
                    self.navigate(Destination::Settings);
                }
                if let Some(index) = self
                    .tree
                    .rows()
                    .iter()
                    .position(|row| row.kind == NavRowKind::SettingsGroup)
                {
                    self.sidebar_selected = index;
                }
            }
        }
        self.clamp_selection();
    }

    fn sync_sidebar_to_active(&mut self) {
        if let Some(index) = self.tree.rows().iter().position(|row| row.active) {
            self.sidebar_selected = index;
        }
        self.clamp_selection();
    }

    fn main_len(&self) -> usize {
        match self.destination {
            Destination::Plugin => self.tree.modules().len(),
            Destination::Parameters => self.parameter_items.len(),
            Destination::Users => self.users.len(),
            Destination::Settings => SETTINGS_LEAVES.len(),
            _ => 0,
        }
    }

    fn clamp_selection(&mut self) {
        let rows = self.tree.rows().len();
        self.sidebar_selected = self.sidebar_selected.min(rows.saturating_sub(1));
        self.main_selected = self.main_selected.min(self.main_len().saturating_sub(1));
    }

    fn handle_main_key(&mut self, key: KeyEvent) {
        let len = self.main_len();
        match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                self.main_selected = (self.main_selected + 1).min(len.saturating_sub(1));
                return;
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.main_selected = self.main_selected.saturating_sub(1);
                return;
            }
            KeyCode::Char('g') | KeyCode::Home => {
                self.main_selected = 0;
                return;
            }
            _ => {}
        }
        match self.destination {
            Destination::Plugin => self.handle_plugin_key(key),
            Destination::Parameters => self.handle_parameters_key(key),
            Destination::Users => self.handle_users_key(key),
            Destination::Settings => {
                if matches!(key.code, KeyCode::Enter | KeyCode::Char(' ')) {
                    if let Some(leaf) = SETTINGS_LEAVES.get(self.main_selected) {
                        let label = leaf.fixed_label().unwrap_or_default().to_string();
                        let commands = self.tree.select_leaf(label, leaf.clone());
                        self.run_nav_commands(commands);
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_plugin_key(&mut self, key: KeyEvent) {
        let selected = self.tree.modules().get(self.main_selected).cloned();
        match key.code {
            KeyCode::Char('n') => {
                self.modal = Some(Modal::Module {
                    form: Form::module(None),
                    editing: None,
                })
            }
            KeyCode::Char('e') => {
                if let Some(module) = selected {
                    self.modal = Some(Modal::Module {
                        form: Form::module(Some(&module)),
                        editing: Some(module.id),
                    });
                }
            }
            KeyCode::Char('v') | KeyCode::Enter => {
                if let Some(module) = selected {
                    self.modal = Some(Modal::ModuleDetail {
                        id: module.id.clone(),
                        module: None,
                    });
                    self.request_panel(PanelRequest::ModuleDetail(module.id));
                }
            }
            KeyCode::Char('d') => {
                if let Some(module) = selected {
                    self.modal = Some(Modal::ConfirmDelete(DeleteTarget::Module {
                        id: module.id,
                        name: module.name,
                    }));
                }
            }
            _ => {}
        }
    }

    fn handle_users_key(&mut self, key: KeyEvent) {
        let selected = self.users.get(self.main_selected).cloned();
        match key.code {
            KeyCode::Char('n') => {
                self.modal = Some(Modal::User {
                    form: Form::user(None, &self.roles),
                    editing: None,
                })
            }
            KeyCode::Char('e') | KeyCode::Enter => {
                if let Some(user) = selected {
                    self.modal = Some(Modal::User {
                        form: Form::user(Some(&user), &self.roles),
                        editing: Some(user.id),
                    });
                }
            }
            KeyCode::Char('d') => {
                if let Some(user) = selected {
                    self.modal = Some(Modal::ConfirmDelete(DeleteTarget::User {
                        id: user.id,
                        name: user.username,
                    }));
                }
            }
            _ => {}
        }
    }

    fn handle_parameters_key(&mut self, key: KeyEvent) {
        let selected = self.parameter_items.get(self.main_selected).cloned();
        match key.code {
            KeyCode::Char('[') => self.cycle_parameters_module(-1),
            KeyCode::Char(']') => self.cycle_parameters_module(1),
            KeyCode::Char('n') => {
                if let Some(module_id) = self.parameters_module.clone() {
                    self.modal = Some(Modal::Submodule {
                        form: Form::submodule(None),
                        editing: None,
                        module_id,
                    });
                }
            }
            KeyCode::Char('e') => {
                if let (Some(sub), Some(module_id)) = (selected, self.parameters_module.clone()) {
                    self.modal = Some(Modal::Submodule {
                        form: Form::submodule(Some(&sub)),
                        editing: Some(sub.id),
                        module_id,
                    });
                }
            }
            KeyCode::Char('d') => {
                if let Some(sub) = selected {
                    self.modal = Some(Modal::ConfirmDelete(DeleteTarget::Submodule {
                        id: sub.id,
                        name: sub.name,
                    }));
                }
            }
            KeyCode::Enter => {
                if let (Some(sub), Some(module_id)) = (selected, self.parameters_module.clone()) {
                    let destination = Destination::Submodule {
                        module_id,
                        submodule_id: sub.id,
                    };
                    let commands = self.tree.select_leaf(sub.name, destination);
                    self.run_nav_commands(commands);
                }
            }
            _ => {}
        }
    }

    fn handle_modal_key(&mut self, key: KeyEvent) {
        let Some(modal) = self.modal.as_mut() else {
            return;
        };
        let outcome = match modal {
            Modal::ConfirmDelete(target) => match key.code {
                KeyCode::Char('y') | KeyCode::Enter => {
                    ModalOutcome::Submit(target.clone().into_mutation())
                }
                KeyCode::Char('n') | KeyCode::Esc => ModalOutcome::Close,
                _ => ModalOutcome::Keep,
            },
            Modal::ModuleDetail { module, .. } => match key.code {
                KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q') => ModalOutcome::Close,
                KeyCode::Char('e') => match module.as_ref() {
                    Some(module) => ModalOutcome::Open(Modal::Module {
                        form: Form::module(Some(module)),
                        editing: Some(module.id.clone()),
                    }),
                    None => ModalOutcome::Keep,
                },
                _ => ModalOutcome::Keep,
            },
            Modal::User { form, editing } => match form.handle_key(key) {
                FormAction::Cancel => ModalOutcome::Close,
                FormAction::Continue => ModalOutcome::Keep,
                FormAction::Submit => match user_payload(form) {
                    Ok(payload) => ModalOutcome::Submit(match editing {
                        Some(id) => Mutation::UpdateUser {
                            id: id.clone(),
                            payload,
                        },
                        None => Mutation::CreateUser(payload),
                    }),
                    Err(message) => {
                        form.error = Some(message);
                        ModalOutcome::Keep
                    }
                },
            },
            Modal::Module { form, editing } => match form.handle_key(key) {
                FormAction::Cancel => ModalOutcome::Close,
                FormAction::Continue => ModalOutcome::Keep,
                FormAction::Submit => match form.first_missing() {
                    Some(field) => {
                        form.error = Some(format!("{field} is required"));
                        ModalOutcome::Keep
                    }
                    None => {
                        let payload = ModulePayload {
                            id: form.value("ID").to_string(),
                            name: form.value("Name").to_string(),
                        };
                        ModalOutcome::Submit(match editing {
                            Some(id) => Mutation::UpdateModule {
                                id: id.clone(),
                                payload,
                            },
                            None => Mutation::CreateModule(payload),
                        })
                    }
                },
            },
            Modal::Submodule {
                form,
                editing,
                module_id,
            } => match form.handle_key(key) {
                FormAction::Cancel => ModalOutcome::Close,
                FormAction::Continue => ModalOutcome::Keep,
                FormAction::Submit => match form.first_missing() {
                    Some(field) => {
                        form.error = Some(format!("{field} is required"));
                        ModalOutcome::Keep
                    }
                    None => {
                        let payload = SubmodulePayload {
                            id: form.value("ID").to_string(),
                            name: form.value("Name").to_string(),
                            module_id: module_id.clone(),
                        };
                        ModalOutcome::Submit(match editing {
                            Some(id) => Mutation::UpdateSubmodule {
                                id: id.clone(),
                                payload,
                            },
                            None => Mutation::CreateSubmodule(payload),
                        })
                    }
                },
            },
        };

        match outcome {
            ModalOutcome::Keep => {}
            ModalOutcome::Close => self.modal = None,
            ModalOutcome::Open(next) => self.modal = Some(next),
            ModalOutcome::Submit(mutation) => {
                self.modal = None;
                self.last_error = None;
                self.status_note = Some("Saving...".to_string());
                self.effects.push(Effect::Mutate(mutation));
            }
        }
    }
}
