use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap};
use ratatui::Frame;

use super::{App, Field};
use crate::config;
use crate::todo;

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

impl App<'_> {
    pub(super) fn ui(&mut self, f: &mut Frame) {
        let theme = self.config.theme.clone();

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(1),
                Constraint::Length(2),
            ])
            .split(f.area());

        let spinner = if self.is_working() {
            SPINNER[self.spinner_index % SPINNER.len()]
        } else {
            " "
        };
        let header = Paragraph::new(format!(" {} {}", spinner, self.title()))
            .style(Style::default().fg(theme.header).add_modifier(Modifier::BOLD));
        f.render_widget(header, chunks[0]);

        let selected_index = self.list_state.selected();
        let items: Vec<ListItem> = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let date_str = todo::format_created_at(&item.created_at, self.offset);
                let date_style = if Some(i) == selected_index {
                    Style::default().fg(theme.selection_fg)
                } else {
                    Style::default().fg(theme.date)
                };
                ListItem::new(vec![
                    Line::from(item.text.clone()),
                    Line::from(Span::styled(format!("    {}", date_str), date_style)),
                ])
            })
            .collect();

        let list_border = if self.form_open || self.pending_delete.is_some() {
            theme.border_inactive
        } else {
            theme.border_active
        };
        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!(" Todos ({}) ", self.items.len()))
                    .border_style(Style::default().fg(list_border)),
            )
            .style(Style::default().fg(theme.foreground).bg(theme.background))
            .highlight_style(
                Style::default()
                    .bg(theme.selection_bg)
                    .fg(theme.selection_fg)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol(">>");
        f.render_stateful_widget(list, chunks[1], &mut self.list_state);

        if self.form_open {
            self.render_form(f, chunks[1]);
        }
        if self.pending_delete.is_some() {
            self.render_delete_confirm(f, chunks[1]);
        }

        self.render_footer(f, chunks[2]);
    }

    fn render_footer(&self, f: &mut Frame, area: Rect) {
        let theme = &self.config.theme;

        let (status, status_color) = match &self.notice {
            Some(n) if n.is_error => (format!(" {} ", n.text), theme.error),
            Some(n) => (format!(" {} ", n.text), theme.notice),
            None => (format!(" {} ", config::APP_VERSION), theme.border_inactive),
        };

        let help_text = if self.pending_delete.is_some() {
            " y: Confirm  •  n: Cancel "
        } else if self.form_open && self.mode.is_auth() {
            " Tab: Next Field  •  Enter: Submit  •  Ctrl+t: Switch  •  Ctrl+c: Quit "
        } else if self.form_open {
            " Enter: Add  •  Esc/Ctrl+t: Cancel "
        } else {
            " j/k: Move  •  a: Add  •  d: Delete  •  r: Reload  •  L: Logout  •  q: Quit "
        };

        let footer_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(24), Constraint::Min(1)])
            .split(area);

        f.render_widget(
            Paragraph::new(status)
                .style(Style::default().fg(status_color).add_modifier(Modifier::BOLD)),
            footer_chunks[0],
        );
        f.render_widget(
            Paragraph::new(help_text)
                .style(Style::default().fg(theme.border_inactive))
                .wrap(Wrap { trim: true }),
            footer_chunks[1],
        );
    }

    fn render_form(&mut self, f: &mut Frame, area: Rect) {
        let theme = self.config.theme.clone();
        let view = self.mode.view();
        let fields = self.visible_fields();

        let outer = centered_rect(60, 100, area);
        let height = (fields.len() as u16 * 3 + 4).min(outer.height);
        let form_area = Rect {
            x: outer.x,
            y: area.y + area.height.saturating_sub(height) / 2,
            width: outer.width,
            height,
        };
        f.render_widget(Clear, form_area);

        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!(" {} ", view.submit_label))
            .border_style(Style::default().fg(theme.border_active));
        let inner = block.inner(form_area);
        f.render_widget(block, form_area);

        let mut constraints = vec![Constraint::Length(3); fields.len()];
        constraints.push(Constraint::Length(1));
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(inner);

        for (row, field) in rows.iter().zip(fields.iter()) {
            let border = if *field == self.focus {
                theme.border_active
            } else {
                theme.border_inactive
            };
            let block = Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border));
            let textarea = match field {
                Field::Primary => &mut self.primary,
                Field::Password => &mut self.password,
                Field::Confirm => &mut self.confirm,
            };
            textarea.set_block(block);
            f.render_widget(&*textarea, *row);
        }

        let submit_style = if self.submit_enabled() {
            Style::default()
                .fg(theme.border_active)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(theme.disabled)
        };
        let buttons = Line::from(vec![
            Span::styled(
                format!("[Ctrl+t] {}", view.toggle_label),
                Style::default().fg(theme.foreground),
            ),
            Span::raw("   "),
            Span::styled(format!("[Enter] {}", view.submit_label), submit_style),
        ]);
        if let Some(row) = rows.last() {
            f.render_widget(Paragraph::new(buttons).alignment(Alignment::Center), *row);
        }
    }

    fn render_delete_confirm(&self, f: &mut Frame, area: Rect) {
        let theme = &self.config.theme;
        let text = self
            .pending_delete
            .as_ref()
            .map(|item| item.text.as_str())
            .unwrap_or("");

        let block = Block::default()
            .borders(Borders::ALL)
            .title(" Delete Todo? ")
            .border_style(Style::default().fg(theme.error));

        let text = format!("\n  \"{}\"\n\n  (y/n)", text);
        let p = Paragraph::new(text)
            .block(block)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: false });

        let confirm_area = centered_rect(40, 30, area);
        f.render_widget(Clear, confirm_area);
        f.render_widget(p, confirm_area);
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::session::session;
    use crate::sync::{Event, Op};
    use crate::todo::item;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;
    use tokio::sync::mpsc;

    fn screen(app: &mut App<'_>) -> String {
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
        terminal.draw(|f| app.ui(f)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        buffer
            .content()
            .chunks(buffer.area.width as usize)
            .map(|row| row.iter().map(|c| c.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn signed_out_screen_shows_login_form() {
        let (tx, _rx) = mpsc::channel(4);
        let mut app = App::new(tx, AppConfig::default());
        app.handle_event(Event::AuthStateChanged(None));
        let text = screen(&mut app);
        assert!(text.contains("awaiting login"));
        assert!(text.contains("go to signup"));
        assert!(text.contains("[Enter] login"));
    }

    #[test]
    fn list_shows_text_and_local_date() {
        let (tx, _rx) = mpsc::channel(4);
        let mut app = App::new(tx, AppConfig::default());
        app.handle_event(Event::AuthStateChanged(Some(session("u1"))));
        app.handle_event(Event::Published(vec![item("1", "buy milk", 0)]));
        app.handle_event(Event::Succeeded(Op::Load));
        let text = screen(&mut app);
        assert!(text.contains("u1@example.com"));
        assert!(text.contains("buy milk"));
        assert!(text.contains("1970/01/01 09:00:00"));
    }
}
