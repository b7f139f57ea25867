use serde::{Deserialize, Serialize};

/// The signed-in user. `user_id` names the collection all items live in.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    SignedOut,
    Loading(Session),
    Ready(Session),
}

impl SessionState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::SignedOut => None,
            SessionState::Loading(s) | SessionState::Ready(s) => Some(s),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready(_))
    }

    /// Follows an auth-state notification. A session that is already known
    /// does not restart loading.
    pub fn on_auth_state(&mut self, session: Option<Session>) -> bool {
        match session {
            None => {
                *self = SessionState::SignedOut;
                false
            }
            Some(s) if self.session() == Some(&s) => false,
            Some(s) => {
                *self = SessionState::Loading(s);
                true
            }
        }
    }

    /// A load finished, successfully or not. Only `Loading` moves.
    pub fn on_loaded(&mut self) {
        if let SessionState::Loading(s) = self {
            *self = SessionState::Ready(s.clone());
        }
    }
}

#[cfg(test)]
pub(crate) fn session(user_id: &str) -> Session {
    Session {
        user_id: user_id.to_string(),
        email: format!("{}@example.com", user_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_in_loads_then_ready() {
        let mut state = SessionState::default();
        assert!(state.on_auth_state(Some(session("u1"))));
        assert_eq!(state, SessionState::Loading(session("u1")));
        state.on_loaded();
        assert_eq!(state, SessionState::Ready(session("u1")));
        assert!(state.is_ready());
    }

    #[test]
    fn repeated_notification_for_same_user_is_ignored() {
        let mut state = SessionState::Ready(session("u1"));
        assert!(!state.on_auth_state(Some(session("u1"))));
        assert!(state.is_ready());
    }

    #[test]
    fn logout_signs_out_from_any_state() {
        let mut state = SessionState::Ready(session("u1"));
        assert!(!state.on_auth_state(None));
        assert_eq!(state, SessionState::SignedOut);
        assert!(state.session().is_none());
    }

    #[test]
    fn loaded_does_not_move_ready_or_signed_out() {
        let mut state = SessionState::SignedOut;
        state.on_loaded();
        assert_eq!(state, SessionState::SignedOut);

        let mut ready = SessionState::Ready(session("u1"));
        ready.on_loaded();
        assert_eq!(ready, SessionState::Ready(session("u1")));
    }
}
