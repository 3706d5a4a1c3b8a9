use adc_api::{Role, User};
use adc_core::{NavModule, NavSubmodule};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// One entry of a pick-list field: the submitted value and what is shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub value: String,
    pub label: String,
}

impl Choice {
    fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub label: &'static str,
    pub value: String,
    pub secret: bool,
    pub locked: bool,
    pub optional: bool,
    /// Non-empty for pick-list fields; `value` then holds the chosen entry's value.
    pub choices: Vec<Choice>,
}

impl FormField {
    fn text(label: &'static str) -> Self {
        Self {
            label,
            value: String::new(),
            secret: false,
            locked: false,
            optional: false,
            choices: Vec::new(),
        }
    }

    fn choice(label: &'static str, choices: Vec<Choice>, selected: &str) -> Self {
        let value = choices
            .iter()
            .find(|choice| choice.value == selected)
            .or_else(|| choices.first())
            .map(|choice| choice.value.clone())
            .unwrap_or_default();
        Self {
            value,
            choices,
            ..Self::text(label)
        }
    }

    fn secret(label: &'static str) -> Self {
        Self {
            secret: true,
            ..Self::text(label)
        }
    }

    fn with_value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn is_choice(&self) -> bool {
        !self.choices.is_empty()
    }

    fn cycle(&mut self, step: isize) {
        if self.locked || self.choices.is_empty() {
            return;
        }
        let len = self.choices.len() as isize;
        let current = self
            .choices
            .iter()
            .position(|choice| choice.value == self.value)
            .unwrap_or(0) as isize;
        let next = (current + step).rem_euclid(len) as usize;
        self.value = self.choices[next].value.clone();
    }

    pub fn display_value(&self) -> String {
        if let Some(choice) = self.choices.iter().find(|choice| choice.value == self.value) {
            return format!("< {} >", choice.label);
        }
        if self.secret {
            "*".repeat(self.value.chars().count())
        } else {
            self.value.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormAction {
    Continue,
    Submit,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    pub title: String,
    pub fields: Vec<FormField>,
    pub focus: usize,
    pub error: Option<String>,
}

impl Form {
    fn new(title: impl Into<String>, fields: Vec<FormField>) -> Self {
        let focus = fields.iter().position(|field| !field.locked).unwrap_or(0);
        Self {
            title: title.into(),
            fields,
            focus,
            error: None,
        }
    }

    pub fn login() -> Self {
        Self::new(
            "Sign in",
            vec![FormField::text("Username"), FormField::secret("Password")],
        )
    }

    pub fn register() -> Self {
        Self::new(
            "Create account",
            vec![
                FormField::text("Username"),
                FormField::text("Email"),
                FormField::secret("Password"),
            ],
        )
    }

    pub fn module(existing: Option<&NavModule>) -> Self {
        match existing {
            Some(module) => Self::new(
                "Edit module",
                vec![
                    FormField::text("ID").with_value(&module.id).locked(),
                    FormField::text("Name").with_value(&module.name),
                ],
            ),
            None => Self::new(
                "New module",
                vec![FormField::text("ID"), FormField::text("Name")],
            ),
        }
    }

    pub fn submodule(existing: Option<&NavSubmodule>) -> Self {
        match existing {
            Some(sub) => Self::new(
                "Edit submodule",
                vec![
                    FormField::text("ID").with_value(&sub.id).locked(),
                    FormField::text("Name").with_value(&sub.name),
                ],
            ),
            None => Self::new(
                "New submodule",
                vec![FormField::text("ID"), FormField::text("Name")],
            ),
        }
    }

    /// Create or edit form for a user. The role is picked from `roles`; with
    /// no roles loaded it falls back to a typed role id.
    pub fn user(existing: Option<&User>, roles: &[Role]) -> Self {
        let role_id = existing.map_or("1", |user| user.role_id.as_str());
        let role = if roles.is_empty() {
            FormField::text("Role").with_value(role_id)
        } else {
            let mut choices: Vec<Choice> = roles
                .iter()
                .map(|role| Choice::new(role.id.clone(), role.name.clone()))
                .collect();
            if existing.is_some() && !choices.iter().any(|choice| choice.value == role_id) {
                choices.push(Choice::new(role_id, format!("Unknown ({role_id})")));
            }
            FormField::choice("Role", choices, role_id)
        };
        let active = FormField::choice(
            "Active",
            vec![Choice::new("true", "yes"), Choice::new("false", "no")],
            if existing.map_or(true, |user| user.is_active) {
                "true"
            } else {
                "false"
            },
        );
        match existing {
            Some(user) => Self::new(
                "Edit user",
                vec![
                    FormField::text("Username").with_value(&user.username),
                    FormField::text("Email").with_value(&user.email),
                    FormField::secret("Password").optional(),
                    role,
                    active,
                ],
            ),
            None => Self::new(
                "New user",
                vec![
                    FormField::text("Username"),
                    FormField::text("Email"),
                    FormField::secret("Password"),
                    role,
                    active,
                ],
            ),
        }
    }

    pub fn value(&self, label: &str) -> &str {
        self.fields
            .iter()
            .find(|field| field.label == label)
            .map(|field| field.value.trim())
            .unwrap_or_default()
    }

    /// Raw value, untrimmed. Passwords keep their whitespace.
    pub fn raw_value(&self, label: &str) -> &str {
        self.fields
            .iter()
            .find(|field| field.label == label)
            .map(|field| field.value.as_str())
            .unwrap_or_default()
    }

    pub fn set_value(&mut self, label: &str, value: &str) {
        if let Some(field) = self.fields.iter_mut().find(|field| field.label == label) {
            field.value = value.to_string();
        }
    }

    pub fn clear_secrets(&mut self) {
        for field in self.fields.iter_mut().filter(|field| field.secret) {
            field.value.clear();
        }
    }

    pub fn first_missing(&self) -> Option<&'static str> {
        self.fields
            .iter()
            .find(|field| !field.optional && field.value.trim().is_empty())
            .map(|field| field.label)
    }

    fn focus_next(&mut self) {
        if !self.fields.is_empty() {
            self.focus = (self.focus + 1) % self.fields.len();
        }
    }

    fn focus_prev(&mut self) {
        if !self.fields.is_empty() {
            self.focus = (self.focus + self.fields.len() - 1) % self.fields.len();
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> FormAction {
        match key.code {
            KeyCode::Esc => return FormAction::Cancel,
            KeyCode::Tab | KeyCode::Down => self.focus_next(),
            KeyCode::BackTab | KeyCode::Up => self.focus_prev(),
            KeyCode::Enter => {
                if self.focus + 1 >= self.fields.len() {
                    return FormAction::Submit;
                }
                self.focus_next();
            }
            KeyCode::Left | KeyCode::Right | KeyCode::Char(' ')
                if self.fields.get(self.focus).is_some_and(FormField::is_choice) =>
            {
                let step = if key.code == KeyCode::Left { -1 } else { 1 };
                if let Some(field) = self.fields.get_mut(self.focus) {
                    field.cycle(step);
                    self.error = None;
                }
            }
            KeyCode::Backspace => {
                if let Some(field) = self.fields.get_mut(self.focus) {
                    if !field.locked && !field.is_choice() {
                        field.value.pop();
                    }
                }
            }
            KeyCode::Char(ch)
                if !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) =>
            {
                if let Some(field) = self.fields.get_mut(self.focus) {
                    if !field.locked && !field.is_choice() {
                        field.value.push(ch);
                        self.error = None;
                    }
                }
            }
            _ => {}
        }
        FormAction::Continue
    }
}
