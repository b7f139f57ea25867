use anyhow::Result;
use chrono::FixedOffset;
use crossterm::event::{Event as TermEvent, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures_util::StreamExt;
use ratatui::backend::Backend;
use ratatui::style::{Modifier, Style};
use ratatui::widgets::ListState;
use ratatui::Terminal;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time;
use tracing::warn;
use tui_textarea::{Input, Key, TextArea};

use crate::config::AppConfig;
use crate::error::TodoError;
use crate::mode::{Fields, Mode};
use crate::session::SessionState;
use crate::sync::{Command, Event, Op};
use crate::todo::{self, Item};

mod ui;

const NOTICE_DURATION: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Primary,
    Password,
    Confirm,
}

struct Notice {
    text: String,
    is_error: bool,
    until: Instant,
}

/// Everything on screen. Only the UI task touches it; remote work happens in
/// the sync worker and comes back as [`Event`]s.
pub struct App<'a> {
    mode: Mode,
    form_open: bool,
    primary: TextArea<'a>,
    password: TextArea<'a>,
    confirm: TextArea<'a>,
    focus: Field,

    session: SessionState,
    awaiting_auth: bool,
    items: Vec<Item>,
    list_state: ListState,
    pending_delete: Option<Item>,

    busy: Option<Op>,
    notice: Option<Notice>,
    spinner_index: usize,

    commands: mpsc::Sender<Command>,
    config: AppConfig,
    offset: FixedOffset,
}

fn masked() -> TextArea<'static> {
    let mut area = TextArea::default();
    area.set_mask_char('•');
    area
}

fn first_line<'t>(area: &'t TextArea<'_>) -> &'t str {
    area.lines().first().map(String::as_str).unwrap_or("")
}

impl<'a> App<'a> {
    pub fn new(commands: mpsc::Sender<Command>, config: AppConfig) -> Self {
        let offset = todo::display_offset(config.display.utc_offset_minutes);
        let mut app = Self {
            mode: Mode::default(),
            form_open: false,
            primary: TextArea::default(),
            password: masked(),
            confirm: masked(),
            focus: Field::Primary,
            session: SessionState::default(),
            awaiting_auth: true,
            items: Vec::new(),
            list_state: ListState::default(),
            pending_delete: None,
            busy: None,
            notice: None,
            spinner_index: 0,
            commands,
            config,
            offset,
        };
        app.setup_fields();
        app
    }

    fn setup_fields(&mut self) {
        let placeholder = Style::default().fg(self.config.theme.placeholder);
        let view = self.mode.view();
        self.primary.set_placeholder_text(view.placeholder);
        self.primary.set_placeholder_style(placeholder);
        self.password.set_placeholder_text("password");
        self.password.set_placeholder_style(placeholder);
        self.confirm.set_placeholder_text("confirm password");
        self.confirm.set_placeholder_style(placeholder);
        for area in [&mut self.primary, &mut self.password, &mut self.confirm] {
            area.set_cursor_line_style(Style::default());
        }
        let focused = Style::default().add_modifier(Modifier::REVERSED);
        let (primary, password, confirm) = match self.focus {
            Field::Primary => (focused, Style::default(), Style::default()),
            Field::Password => (Style::default(), focused, Style::default()),
            Field::Confirm => (Style::default(), Style::default(), focused),
        };
        self.primary.set_cursor_style(primary);
        self.password.set_cursor_style(password);
        self.confirm.set_cursor_style(confirm);
    }

    fn fields(&self) -> Fields<'_> {
        Fields {
            primary: first_line(&self.primary),
            password: first_line(&self.password),
            confirm: first_line(&self.confirm),
        }
    }

    fn submit_enabled(&self) -> bool {
        self.busy.is_none() && self.mode.submit_enabled(&self.fields())
    }

    fn visible_fields(&self) -> Vec<Field> {
        let view = self.mode.view();
        let mut fields = vec![Field::Primary];
        if view.password_visible {
            fields.push(Field::Password);
        }
        if view.confirm_visible {
            fields.push(Field::Confirm);
        }
        fields
    }

    /// The prompt while the form is up, otherwise whoever is signed in.
    fn title(&self) -> &str {
        if self.form_open {
            return self.mode.view().prompt;
        }
        match self.session.session() {
            Some(s) => &s.email,
            None => "",
        }
    }

    fn is_working(&self) -> bool {
        self.awaiting_auth || self.busy.is_some()
    }

    fn show_notice(&mut self, text: &str, is_error: bool) {
        self.notice = Some(Notice {
            text: text.to_string(),
            is_error,
            until: Instant::now() + NOTICE_DURATION,
        });
    }

    fn clear_fields(&mut self) {
        self.primary = TextArea::default();
        self.password = masked();
        self.confirm = masked();
        self.focus = Field::Primary;
        self.setup_fields();
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        if !self.visible_fields().contains(&self.focus) {
            self.focus = Field::Primary;
        }
        self.setup_fields();
    }

    /// Hands a command to the worker regardless of what is in flight.
    fn send(&mut self, command: Command) -> bool {
        let op = command.op();
        match self.commands.try_send(command) {
            Ok(()) => {
                self.busy = Some(op);
                true
            }
            Err(e) => {
                warn!("App: could not queue {}: {}", op, e);
                self.show_notice("Background worker is not responding", true);
                false
            }
        }
    }

    /// User-initiated commands: refused while another one is in flight.
    fn dispatch(&mut self, command: Command) -> bool {
        if self.busy.is_some() {
            return false;
        }
        self.send(command)
    }

    fn finish(&mut self, op: Op) {
        if self.busy == Some(op) {
            self.busy = None;
        }
    }

    // --- intents ---

    fn press_toggle(&mut self) {
        if self.mode == Mode::Add {
            self.primary = TextArea::default();
            self.set_mode(self.mode.exit_add());
            self.form_open = false;
        } else {
            self.set_mode(self.mode.toggled());
        }
    }

    fn enter_add(&mut self) {
        if !self.session.is_ready() || self.busy.is_some() {
            return;
        }
        self.set_mode(self.mode.enter_add());
        self.form_open = true;
    }

    fn submit(&mut self) {
        if !self.submit_enabled() {
            return;
        }
        let fields = self.fields();
        let command = match self.mode {
            Mode::Login => Command::SignIn {
                email: fields.primary.to_string(),
                password: fields.password.to_string(),
            },
            Mode::Signup => Command::SignUp {
                email: fields.primary.to_string(),
                password: fields.password.to_string(),
            },
            Mode::Add => {
                let Some(session) = self.session.session() else {
                    return;
                };
                Command::Add {
                    session: session.clone(),
                    text: fields.primary.to_string(),
                }
            }
        };
        self.dispatch(command);
    }

    fn request_delete(&mut self) {
        if self.busy.is_some() || !self.session.is_ready() {
            return;
        }
        self.pending_delete = self
            .list_state
            .selected()
            .and_then(|i| self.items.get(i))
            .cloned();
    }

    fn confirm_delete(&mut self) {
        let Some(item) = self.pending_delete.take() else {
            return;
        };
        if let Some(session) = self.session.session().cloned() {
            self.dispatch(Command::Delete {
                session,
                id: item.id,
            });
        }
    }

    fn reload(&mut self) {
        if let Some(session) = self.session.session().cloned() {
            self.dispatch(Command::Load(session));
        }
    }

    fn logout(&mut self) {
        if self.session.session().is_some() {
            self.dispatch(Command::SignOut);
        }
    }

    fn move_selection(&mut self, delta: i32) {
        if self.items.is_empty() {
            return;
        }
        let last = self.items.len() - 1;
        let next = match self.list_state.selected() {
            Some(i) if delta < 0 => i.saturating_sub(delta.unsigned_abs() as usize),
            Some(i) => (i + delta as usize).min(last),
            None => 0,
        };
        self.list_state.select(Some(next));
    }

    // --- input ---

    /// Returns true when the user asked to quit.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return true;
        }

        if self.pending_delete.is_some() {
            match key.code {
                KeyCode::Char('y') | KeyCode::Enter => self.confirm_delete(),
                KeyCode::Char('n') | KeyCode::Esc => self.pending_delete = None,
                _ => {}
            }
            return false;
        }

        if self.form_open {
            match key.code {
                KeyCode::Char('t') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    self.press_toggle()
                }
                KeyCode::Esc if self.mode == Mode::Add => self.press_toggle(),
                KeyCode::Enter => self.submit(),
                KeyCode::Tab | KeyCode::Down => self.cycle_focus(1),
                KeyCode::BackTab | KeyCode::Up => self.cycle_focus(-1),
                _ => self.input_field(key.into()),
            }
            return false;
        }

        match key.code {
            KeyCode::Char('q') => return true,
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(-1),
            KeyCode::Char('a') => self.enter_add(),
            KeyCode::Char('d') => self.request_delete(),
            KeyCode::Char('r') => self.reload(),
            KeyCode::Char('L') => self.logout(),
            _ => {}
        }
        false
    }

    /// Every field is a single line, so nothing that would break one is let in.
    fn input_field(&mut self, input: Input) {
        match input {
            Input { key: Key::Enter, .. }
            | Input {
                key: Key::Char('m' | 'j'),
                ctrl: true,
                ..
            } => {}
            input => {
                let area = match self.focus {
                    Field::Primary => &mut self.primary,
                    Field::Password => &mut self.password,
                    Field::Confirm => &mut self.confirm,
                };
                area.input(input);
            }
        }
    }

    fn cycle_focus(&mut self, step: isize) {
        let fields = self.visible_fields();
        let current = fields.iter().position(|f| *f == self.focus).unwrap_or(0);
        let len = fields.len() as isize;
        let next = (current as isize + step).rem_euclid(len) as usize;
        self.focus = fields[next];
        self.setup_fields();
    }

    // --- worker events ---

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::AuthStateChanged(None) => {
                self.awaiting_auth = false;
                let was_signed_in = self.session.session().is_some();
                self.session.on_auth_state(None);
                if was_signed_in || self.mode == Mode::Add {
                    self.set_mode(Mode::Login);
                    self.clear_fields();
                }
                if matches!(self.busy, Some(Op::Load | Op::Add | Op::Delete)) {
                    self.busy = None;
                }
                self.items.clear();
                self.list_state.select(None);
                self.pending_delete = None;
                self.form_open = true;
            }
            Event::AuthStateChanged(Some(session)) => {
                self.awaiting_auth = false;
                if self.session.on_auth_state(Some(session.clone())) {
                    self.form_open = false;
                    self.send(Command::Load(session));
                }
            }
            Event::Published(_) if self.session.session().is_none() => {}
            Event::Published(items) => {
                self.items = items;
                if self.items.is_empty() {
                    self.list_state.select(None);
                } else if self
                    .list_state
                    .selected()
                    .map_or(true, |i| i >= self.items.len())
                {
                    self.list_state.select(Some(self.items.len() - 1));
                }
            }
            Event::Succeeded(op) => {
                self.finish(op);
                match op {
                    Op::SignIn | Op::SignUp => {
                        self.clear_fields();
                        self.form_open = false;
                    }
                    Op::Add => {
                        self.primary = TextArea::default();
                        self.set_mode(self.mode.exit_add());
                        self.form_open = false;
                    }
                    Op::Load => self.session.on_loaded(),
                    Op::SignOut | Op::Delete => {}
                }
                if let Some(text) = op.success_notice() {
                    self.show_notice(text, false);
                }
            }
            Event::Failed(err) => self.fail(err),
        }
    }

    fn fail(&mut self, err: TodoError) {
        let op = err.op();
        self.finish(op);
        if op == Op::Load {
            self.session.on_loaded();
        }
        self.show_notice(err.notice(), true);
    }

    /// Advances the spinner and expires the notice. True when a redraw is due.
    pub fn tick(&mut self) -> bool {
        let mut changed = false;
        if self.is_working() {
            self.spinner_index = self.spinner_index.wrapping_add(1);
            changed = true;
        }
        if self.notice.as_ref().is_some_and(|n| Instant::now() >= n.until) {
            self.notice = None;
            changed = true;
        }
        changed
    }

    pub async fn run<B: Backend>(
        &mut self,
        terminal: &mut Terminal<B>,
        mut events: mpsc::Receiver<Event>,
    ) -> Result<()> {
        let mut input = EventStream::new();
        let mut spinner_interval = time::interval(Duration::from_millis(100));
        let mut should_render = true;

        loop {
            if should_render {
                terminal.draw(|f| self.ui(f))?;
                should_render = false;
            }

            tokio::select! {
                maybe_event = input.next() => match maybe_event {
                    Some(Ok(TermEvent::Key(key))) => {
                        if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
                            if self.handle_key(key) {
                                return Ok(());
                            }
                            should_render = true;
                        }
                    }
                    Some(Ok(TermEvent::Resize(_, _))) => should_render = true,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                },
                Some(event) = events.recv() => {
                    self.handle_event(event);
                    should_render = true;
                }
                _ = spinner_interval.tick() => {
                    if self.tick() {
                        should_render = true;
                    }
                }
            }
        }
    }
}
