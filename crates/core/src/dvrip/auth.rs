//! Per-connection login handshake.
//!
//! ```text
//! NoChallenge --login--> ChallengeSent --login--> Authenticated
//!                                      <--login-- (stays Authenticated)
//! ```
//!
//! Credentials are accepted on form only: the hash a client derives from the
//! realm and random is never verified. This is a compatibility shim, not a
//! security boundary.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    NoChallenge,
    ChallengeSent,
    Authenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Reply with realm and random; the client must log in again.
    Challenge,
    /// Reply with the server session id.
    Accepted,
}

impl AuthState {
    /// Binary login: the first request on a connection is always challenged.
    pub fn on_login(&mut self) -> AuthOutcome {
        match self {
            Self::NoChallenge => {
                *self = Self::ChallengeSent;
                AuthOutcome::Challenge
            }
            Self::ChallengeSent | Self::Authenticated => {
                *self = Self::Authenticated;
                AuthOutcome::Accepted
            }
        }
    }

    /// JSON login: an empty password asks for the challenge, anything else
    /// is accepted.
    pub fn on_password_login(&mut self, password: &str) -> AuthOutcome {
        if password.is_empty() {
            if *self == Self::NoChallenge {
                *self = Self::ChallengeSent;
            }
            AuthOutcome::Challenge
        } else {
            *self = Self::Authenticated;
            AuthOutcome::Accepted
        }
    }

    pub fn challenge_sent(&self) -> bool {
        *self != Self::NoChallenge
    }

    pub fn is_authenticated(&self) -> bool {
        *self == Self::Authenticated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_login_is_two_phase() {
        let mut state = AuthState::default();
        assert!(!state.challenge_sent());
        assert_eq!(state.on_login(), AuthOutcome::Challenge);
        assert!(state.challenge_sent());
        assert!(!state.is_authenticated());
        assert_eq!(state.on_login(), AuthOutcome::Accepted);
        assert!(state.is_authenticated());
        assert_eq!(state.on_login(), AuthOutcome::Accepted);
    }

    #[test]
    fn password_login_follows_password_presence() {
        let mut state = AuthState::default();
        assert_eq!(state.on_password_login(""), AuthOutcome::Challenge);
        assert_eq!(state, AuthState::ChallengeSent);
        assert_eq!(state.on_password_login("5F2A..."), AuthOutcome::Accepted);
        assert!(state.is_authenticated());
    }

    #[test]
    fn empty_password_after_login_keeps_session() {
        let mut state = AuthState::Authenticated;
        assert_eq!(state.on_password_login(""), AuthOutcome::Challenge);
        assert!(state.is_authenticated());
    }
}
