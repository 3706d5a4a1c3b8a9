use crate::forms::Form;
use crate::state::{App, DeleteTarget, Focus, Modal, Screen};
use crate::theme::{self, icons};
use adc_api::role_name;
use adc_core::{Destination, NavRowKind, SETTINGS_LEAVES};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table, TableState, Wrap},
    Frame,
};

pub fn render(f: &mut Frame, app: &App) {
    let area = f.size();
    match app.screen() {
        Screen::Login => render_auth(f, app, &app.login_form, "F2 create account  Esc quit", area),
        Screen::Register => render_auth(f, app, &app.register_form, "F2/Esc back to sign in", area),
        Screen::Shell => render_shell(f, app, area),
    }
    if app.show_help {
        render_help(f, app.screen(), area);
    }
}

fn render_auth(f: &mut Frame, app: &App, form: &Form, hint: &str, area: Rect) {
    let popup = centered_rect(50, 50, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(format!(" {} ", form.title), theme::HEADER_STYLE))
        .border_style(theme::border_style(true));
    let inner = block.inner(popup);
    f.render_widget(Clear, popup);
    f.render_widget(block, popup);

    let mut lines = vec![
        Line::from(Span::styled(app.config.api_base_url.clone(), theme::MUTED_STYLE)),
        Line::from(""),
    ];
    lines.extend(form_lines(form));
    lines.push(Line::from(""));
    if app.auth_pending {
        lines.push(Line::from(Span::styled(
            format!("{} Contacting server...", icons::SPINNER[app.spinner]),
            theme::NOTE_STYLE,
        )));
    } else if let Some(error) = &form.error {
        lines.push(Line::from(Span::styled(error.clone(), theme::ERROR_STYLE)));
    } else if let Some(note) = &app.status_note {
        lines.push(Line::from(Span::styled(note.clone(), theme::NOTE_STYLE)));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        format!("Enter next/submit  Tab switch field  {hint}"),
        theme::MUTED_STYLE,
    )));

    f.render_widget(Paragraph::new(lines).wrap(Wrap { trim: false }), inner);
}

fn form_lines(form: &Form) -> Vec<Line<'static>> {
    form.fields
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            let focused = idx == form.focus;
            let marker = if focused { ">" } else { " " };
            let value_style = if field.locked {
                theme::MUTED_STYLE
            } else if focused {
                Style::default().add_modifier(Modifier::UNDERLINED)
            } else {
                Style::default()
            };
            let cursor = if focused && !field.locked && !field.is_choice() {
                "_"
            } else {
                ""
            };
            Line::from(vec![
                Span::styled(format!("{marker} {:<9}", field.label), theme::HEADER_STYLE),
                Span::styled(format!("{}{cursor}", field.display_value()), value_style),
            ])
        })
        .collect()
}

fn render_shell(f: &mut Frame, app: &App, area: Rect) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(area);
    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(30), Constraint::Min(0)])
        .split(rows[1]);

    render_header(f, app, rows[0]);
    render_sidebar(f, app, body[0]);
    render_main(f, app, body[1]);
    render_footer(f, app, rows[2]);

    if let Some(modal) = &app.modal {
        render_modal(f, modal, area);
    }
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let mut spans = vec![
        Span::styled(" adc-console ", theme::HEADER_STYLE),
        Span::styled(app.config.api_base_url.clone(), theme::MUTED_STYLE),
        Span::raw("  "),
        Span::styled(app.destination.path(), theme::ACTIVE_STYLE),
    ];
    if app.is_busy() {
        spans.push(Span::raw(format!("  {}", icons::SPINNER[app.spinner])));
    }
    if let Some(at) = app.last_refresh_at {
        spans.push(Span::styled(
            format!("  refreshed {}", at.format("%H:%M:%S")),
            theme::MUTED_STYLE,
        ));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_sidebar(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Navigation")
        .border_style(theme::border_style(app.focus == Focus::Sidebar));

    let items: Vec<ListItem> = app
        .tree
        .rows()
        .into_iter()
        .map(|row| {
            let icon = match &row.kind {
                NavRowKind::Leaf(_) => icons::LEAF,
                NavRowKind::Module(_) | NavRowKind::SettingsGroup if row.expanded => {
                    icons::EXPANDED
                }
                _ => icons::COLLAPSED,
            };
            let loading = matches!(&row.kind, NavRowKind::Module(id) if app.tree.is_loading_submodules(id));
            let style = if row.active {
                theme::ACTIVE_STYLE
            } else {
                Style::default()
            };
            let mut spans = vec![
                Span::raw("  ".repeat(row.depth)),
                Span::styled(format!("{icon} "), Color::Blue),
                Span::styled(row.label, style),
            ];
            if loading {
                spans.push(Span::styled(" ...", theme::MUTED_STYLE));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let mut state = ListState::default();
    if app.focus == Focus::Sidebar {
        state.select(Some(app.sidebar_selected));
    }
    let list = List::new(items)
        .block(block)
        .highlight_style(theme::SELECTED_STYLE);
    f.render_stateful_widget(list, area, &mut state);
}

fn main_block(app: &App, title: String) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(theme::border_style(app.focus == Focus::Main))
}

fn render_main(f: &mut Frame, app: &App, area: Rect) {
    match &app.destination {
        Destination::Dashboard => render_dashboard(f, app, area),
        Destination::Settings => render_settings_index(f, app, area),
        Destination::Parameters => render_parameters(f, app, area),
        Destination::Preferences => render_preferences(f, app, area),
        Destination::Plugin => render_plugin(f, app, area),
        Destination::Users => render_users(f, app, area),
        Destination::Submodule {
            module_id,
            submodule_id,
        } => render_submodule(f, app, module_id, submodule_id, area),
        Destination::Login | Destination::Register => {}
    }
}

fn render_text(f: &mut Frame, block: Block<'static>, lines: Vec<Line<'static>>, area: Rect) {
    f.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: true }), area);
}

fn render_dashboard(f: &mut Frame, app: &App, area: Rect) {
    let mut lines = vec![
        Line::from(Span::styled("Welcome back.", theme::HEADER_STYLE)),
        Line::from(""),
        Line::from(format!("Modules: {}", app.tree.modules().len())),
        Line::from(format!(
            "Submodule lists cached: {}",
            app.tree.cached_submodule_count()
        )),
        Line::from(format!("Refresh signals seen: {}", app.tree.last_refresh())),
        Line::from(format!(
            "Session: {}",
            if app.config.remember_session {
                "remembered across restarts"
            } else {
                "this run only"
            }
        )),
        Line::from(format!(
            "Idle sign-out after {} min",
            app.config.idle_timeout_minutes
        )),
    ];
    if let Some(err) = app.tree.last_error() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!("Navigation load failed: {err}. Press r to retry."),
            theme::ERROR_STYLE,
        )));
    }
    render_text(f, main_block(app, "Dashboard".to_string()), lines, area);
}

fn render_settings_index(f: &mut Frame, app: &App, area: Rect) {
    let rows: Vec<Row> = SETTINGS_LEAVES
        .iter()
        .enumerate()
        .map(|(idx, leaf)| {
            Row::new(vec![
                Cell::from(leaf.fixed_label().unwrap_or_default()),
                Cell::from(Span::styled(leaf.path(), theme::MUTED_STYLE)),
            ])
            .style(theme::zebra_row_style(idx))
        })
        .collect();
    render_table(
        f,
        app,
        "Settings",
        Row::new(vec!["Section", "Path"]),
        rows,
        &[Constraint::Length(16), Constraint::Min(10)],
        area,
    );
}

fn setting_line(label: &str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{label:<22}"), theme::HEADER_STYLE),
        Span::raw(value),
    ])
}

fn render_preferences(f: &mut Frame, app: &App, area: Rect) {
    let config = &app.config;
    let policy = app.gate_policy();
    let lines = vec![
        setting_line("API base URL", config.api_base_url.clone()),
        setting_line(
            "Idle timeout",
            format!("{} min", config.idle_timeout_minutes),
        ),
        setting_line(
            "Request timeout",
            format!("{} s", config.request_timeout_secs),
        ),
        setting_line("Remember session", config.remember_session.to_string()),
        setting_line(
            "Redirect when signed in",
            policy.redirect_authenticated_from_public.to_string(),
        ),
        setting_line("Config file", config.config_path.display().to_string()),
        setting_line("State dir", config.state_dir.display().to_string()),
        setting_line("Log dir", config.log_dir.display().to_string()),
        Line::from(""),
        Line::from(Span::styled(
            "Edit the config file or pass flags to change these.",
            theme::MUTED_STYLE,
        )),
    ];
    render_text(f, main_block(app, "Preferences".to_string()), lines, area);
}

fn render_plugin(f: &mut Frame, app: &App, area: Rect) {
    let rows: Vec<Row> = app
        .tree
        .modules()
        .iter()
        .enumerate()
        .map(|(idx, module)| {
            let cached = app
                .tree
                .submodules(&module.id)
                .map(|subs| subs.len().to_string())
                .unwrap_or_else(|| "-".to_string());
            Row::new(vec![
                Cell::from(module.id.clone()),
                Cell::from(module.name.clone()),
                Cell::from(cached),
            ])
            .style(theme::zebra_row_style(idx))
        })
        .collect();
    render_table(
        f,
        app,
        "Modules  n new  e edit  d delete  Enter view",
        Row::new(vec!["ID", "Name", "Submodules"]),
        rows,
        &[
            Constraint::Length(12),
            Constraint::Min(16),
            Constraint::Length(10),
        ],
        area,
    );
}

fn render_parameters(f: &mut Frame, app: &App, area: Rect) {
    let Some(module_id) = app.parameters_module.as_deref() else {
        render_text(
            f,
            main_block(app, "Parameters".to_string()),
            vec![Line::from("Create a module under Plugin first.")],
            area,
        );
        return;
    };
    let module_name = app
        .tree
        .module(module_id)
        .map(|module| module.name.as_str())
        .unwrap_or(module_id);
    let rows: Vec<Row> = app
        .parameter_items
        .iter()
        .enumerate()
        .map(|(idx, sub)| {
            Row::new(vec![Cell::from(sub.id.clone()), Cell::from(sub.name.clone())])
                .style(theme::zebra_row_style(idx))
        })
        .collect();
    render_table(
        f,
        app,
        &format!("Parameters: {module_name}  [ ] module  n new  e edit  d delete  Enter open"),
        Row::new(vec!["ID", "Name"]),
        rows,
        &[Constraint::Length(12), Constraint::Min(16)],
        area,
    );
}

fn render_users(f: &mut Frame, app: &App, area: Rect) {
    let rows: Vec<Row> = app
        .users
        .iter()
        .enumerate()
        .map(|(idx, user)| {
            let status = if user.is_active { "active" } else { "inactive" };
            Row::new(vec![
                Cell::from(user.id.clone()),
                Cell::from(user.username.clone()),
                Cell::from(user.email.clone()),
                Cell::from(role_name(&app.roles, &user.role_id).to_string()),
                Cell::from(Span::styled(
                    status,
                    theme::active_flag_color(user.is_active),
                )),
            ])
            .style(theme::zebra_row_style(idx))
        })
        .collect();
    render_table(
        f,
        app,
        "Users  n new  e edit  d delete",
        Row::new(vec!["ID", "Username", "Email", "Role", "Status"]),
        rows,
        &[
            Constraint::Length(6),
            Constraint::Length(16),
            Constraint::Min(20),
            Constraint::Length(12),
            Constraint::Length(9),
        ],
        area,
    );
}

fn render_submodule(f: &mut Frame, app: &App, module_id: &str, submodule_id: &str, area: Rect) {
    let module_name = app
        .tree
        .module(module_id)
        .map(|module| module.name.clone())
        .unwrap_or_else(|| module_id.to_string());
    let mut lines = vec![
        Line::from(vec![
            Span::styled("Module     ", theme::HEADER_STYLE),
            Span::raw(format!("{module_name} ({module_id})")),
        ]),
        Line::from(vec![
            Span::styled("Submodule  ", theme::HEADER_STYLE),
            Span::raw(submodule_id.to_string()),
        ]),
    ];
    match &app.submodule_detail {
        Some(detail) => lines.push(Line::from(vec![
            Span::styled("Name       ", theme::HEADER_STYLE),
            Span::raw(detail.name.clone()),
        ])),
        None if app.panel_loading => {
            lines.push(Line::from(Span::styled("Loading...", theme::MUTED_STYLE)))
        }
        None => {}
    }
    render_text(
        f,
        main_block(app, app.tree.active_label().to_string()),
        lines,
        area,
    );
}

fn render_table(
    f: &mut Frame,
    app: &App,
    title: &str,
    header: Row<'static>,
    rows: Vec<Row<'static>>,
    widths: &[Constraint],
    area: Rect,
) {
    let empty = rows.is_empty();
    let block = main_block(app, title.to_string());
    if empty {
        let message = if app.panel_loading {
            "Loading..."
        } else {
            "Nothing here yet."
        };
        render_text(
            f,
            block,
            vec![Line::from(Span::styled(message, theme::MUTED_STYLE))],
            area,
        );
        return;
    }
    let table = Table::new(rows, widths.to_vec())
        .header(header.style(theme::HEADER_STYLE))
        .block(block)
        .highlight_style(theme::SELECTED_STYLE);
    let mut state = TableState::default();
    if app.focus == Focus::Main {
        state.select(Some(app.main_selected));
    }
    f.render_stateful_widget(table, area, &mut state);
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let line = if let Some(error) = &app.last_error {
        Line::from(Span::styled(format!(" {error}"), theme::ERROR_STYLE))
    } else if let Some(note) = &app.status_note {
        Line::from(Span::styled(format!(" {note}"), theme::NOTE_STYLE))
    } else {
        Line::from(Span::styled(
            " Tab focus  Enter open  r refresh  L sign out  ? help  q quit",
            theme::MUTED_STYLE,
        ))
    };
    f.render_widget(Paragraph::new(line), area);
}

fn render_modal(f: &mut Frame, modal: &Modal, area: Rect) {
    let popup = centered_rect(50, 40, area);
    f.render_widget(Clear, popup);
    let (title, lines) = match modal {
        Modal::ConfirmDelete(target) => {
            let what = match target {
                DeleteTarget::Module { .. } => "Delete module",
                DeleteTarget::Submodule { .. } => "Delete submodule",
                DeleteTarget::User { .. } => "Delete user",
            };
            (
                what.to_string(),
                vec![
                    Line::from(format!("Delete {}?", target.label())),
                    Line::from(""),
                    Line::from(Span::styled("y confirm  n cancel", theme::MUTED_STYLE)),
                ],
            )
        }
        Modal::ModuleDetail { id, module } => {
            let mut lines = vec![Line::from(vec![
                Span::styled("ID    ", theme::HEADER_STYLE),
                Span::raw(id.clone()),
            ])];
            match module {
                Some(module) => lines.push(Line::from(vec![
                    Span::styled("Name  ", theme::HEADER_STYLE),
                    Span::raw(module.name.clone()),
                ])),
                None => lines.push(Line::from(Span::styled("Loading...", theme::MUTED_STYLE))),
            }
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled("e edit  Esc close", theme::MUTED_STYLE)));
            ("Module".to_string(), lines)
        }
        Modal::Module { form, .. } | Modal::Submodule { form, .. } | Modal::User { form, .. } => {
            let mut lines = form_lines(form);
            lines.push(Line::from(""));
            if let Some(error) = &form.error {
                lines.push(Line::from(Span::styled(error.clone(), theme::ERROR_STYLE)));
            }
            let hint = if form.fields.iter().any(|field| field.is_choice()) {
                "Enter next/save  Left/Right choose  Esc cancel"
            } else {
                "Enter next/save  Esc cancel"
            };
            lines.push(Line::from(Span::styled(hint, theme::MUTED_STYLE)));
            (form.title.clone(), lines)
        }
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(format!(" {title} "), theme::HEADER_STYLE))
        .border_style(Style::default().fg(Color::Yellow));
    f.render_widget(
        Paragraph::new(lines).block(block).wrap(Wrap { trim: false }),
        popup,
    );
}

fn help_line(keys: &str, text: &str) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{keys:<12}"), Color::Cyan),
        Span::raw(text.to_string()),
    ])
}

fn render_help(f: &mut Frame, screen: Screen, area: Rect) {
    let popup = centered_rect(60, 70, area);
    f.render_widget(Clear, popup);
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Help")
        .border_style(Style::default().fg(Color::Yellow));

    let mut text = vec![
        Line::from(Span::styled(
            "Keyboard Shortcuts",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];
    match screen {
        Screen::Login | Screen::Register => {
            text.push(help_line("Tab / Down", "Next field"));
            text.push(help_line("Enter", "Next field, submit on last"));
            text.push(help_line("F2", "Switch sign in / register"));
            text.push(help_line("Esc", "Quit or go back"));
        }
        Screen::Shell => {
            text.push(help_line("j / k", "Move selection"));
            text.push(help_line("Enter / l", "Open or expand"));
            text.push(help_line("Tab", "Switch sidebar / main"));
            text.push(help_line("n e d", "New, edit, delete"));
            text.push(help_line("Left/Right", "Change a choice in forms"));
            text.push(help_line("[ ]", "Previous / next module (Parameters)"));
            text.push(help_line("r", "Refresh navigation"));
            text.push(help_line("L", "Sign out"));
            text.push(help_line("q", "Quit"));
        }
    }
    text.push(help_line("? / F1", "Toggle help"));
    text.push(help_line("Ctrl+C", "Quit"));

    f.render_widget(
        Paragraph::new(text).block(block).wrap(Wrap { trim: true }),
        popup,
    );
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100u16.saturating_sub(percent_y)) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100u16.saturating_sub(percent_y)) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100u16.saturating_sub(percent_x)) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100u16.saturating_sub(percent_x)) / 2),
        ])
        .split(vertical[1])[1]
}
