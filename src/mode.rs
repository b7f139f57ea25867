//! The login / signup / add form state machine.
//!
//! Everything the form shows is derived from [`Mode`] alone, and whether the
//! submit button is live is derived from the mode plus the current field
//! contents. Nothing in here touches the network or the terminal.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Login,
    Signup,
    Add,
}

/// Labels and visibility flags the presentation layer renders for a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewData {
    pub prompt: &'static str,
    pub placeholder: &'static str,
    pub toggle_label: &'static str,
    pub submit_label: &'static str,
    pub password_visible: bool,
    pub confirm_visible: bool,
}

/// Current contents of the three form fields. `primary` holds the email in
/// Login/Signup and the todo text in Add.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fields<'a> {
    pub primary: &'a str,
    pub password: &'a str,
    pub confirm: &'a str,
}

impl Mode {
    pub fn toggled(self) -> Self {
        match self {
            Mode::Login => Mode::Signup,
            Mode::Signup => Mode::Login,
            Mode::Add => Mode::Add,
        }
    }

    pub fn enter_add(self) -> Self {
        Mode::Add
    }

    /// Leaving Add always lands on Login, whichever auth mode came before.
    pub fn exit_add(self) -> Self {
        match self {
            Mode::Add => Mode::Login,
            other => other,
        }
    }

    pub fn view(self) -> ViewData {
        match self {
            Mode::Login => ViewData {
                prompt: "awaiting login",
                placeholder: "email",
                toggle_label: "go to signup",
                submit_label: "login",
                password_visible: true,
                confirm_visible: false,
            },
            Mode::Signup => ViewData {
                prompt: "awaiting signup",
                placeholder: "email",
                toggle_label: "go to login",
                submit_label: "signup",
                password_visible: true,
                confirm_visible: true,
            },
            Mode::Add => ViewData {
                prompt: "awaiting add",
                placeholder: "todo text",
                toggle_label: "cancel",
                submit_label: "add",
                password_visible: false,
                confirm_visible: false,
            },
        }
    }

    pub fn submit_enabled(self, fields: &Fields<'_>) -> bool {
        match self {
            Mode::Login => !fields.primary.is_empty() && !fields.password.is_empty(),
            Mode::Signup => {
                !fields.primary.is_empty()
                    && !fields.password.is_empty()
                    && !fields.confirm.is_empty()
                    && fields.password == fields.confirm
            }
            Mode::Add => !fields.primary.is_empty(),
        }
    }

    pub fn is_auth(self) -> bool {
        matches!(self, Mode::Login | Mode::Signup)
    }
}
