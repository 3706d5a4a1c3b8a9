use ratatui::style::{Color, Modifier, Style};

pub const HEADER_STYLE: Style = Style::new()
    .fg(Color::Rgb(142, 192, 124))
    .add_modifier(Modifier::BOLD);
pub const SELECTED_STYLE: Style = Style::new()
    .bg(Color::Rgb(131, 165, 152))
    .fg(Color::Black)
    .add_modifier(Modifier::BOLD);
pub const ACTIVE_STYLE: Style = Style::new()
    .fg(Color::Rgb(250, 189, 47))
    .add_modifier(Modifier::BOLD);
pub const MUTED_STYLE: Style = Style::new().fg(Color::Rgb(146, 131, 116));
pub const ERROR_STYLE: Style = Style::new().fg(Color::Rgb(254, 128, 25));
pub const NOTE_STYLE: Style = Style::new().fg(Color::Rgb(184, 187, 38));

pub const FOCUS_BORDER: Color = Color::Cyan;

pub fn zebra_row_style(index: usize) -> Style {
    let bg = if index % 2 == 0 {
        Color::Rgb(18, 20, 26)
    } else {
        Color::Rgb(24, 27, 34)
    };
    Style::new().bg(bg)
}

pub fn border_style(focused: bool) -> Style {
    if focused {
        Style::default().fg(FOCUS_BORDER)
    } else {
        Style::default()
    }
}

pub fn active_flag_color(active: bool) -> Color {
    if active {
        Color::Rgb(184, 187, 38)
    } else {
        Color::Rgb(214, 93, 14)
    }
}

pub mod icons {
    pub const EXPANDED: &str = "v";
    pub const COLLAPSED: &str = ">";
    pub const LEAF: &str = "-";
    pub const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];
}
