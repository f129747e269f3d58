use std::fmt::{Debug, Display};

use serde_derive::{Deserialize, Serialize};

/// Result of refreshing a resource from the server.
/// A cleared resource no longer exists remotely and must be dropped from the state,
/// it is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome<T> {
    Confirmed(T),
    Cleared,
}

#[cfg(test)]
impl<T> ReadOutcome<T> {
    pub fn confirmed(self) -> Option<T> {
        match self {
            ReadOutcome::Confirmed(v) => Some(v),
            ReadOutcome::Cleared => None,
        }
    }

    pub fn is_cleared(&self) -> bool {
        matches!(self, ReadOutcome::Cleared)
    }
}

/// Secret string that is written to the state file, but never shown in logs or output
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Sensitive(String);

impl Sensitive {
    pub fn new(value: impl Into<String>) -> Self {
        Sensitive(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Sensitive {
    fn from(value: String) -> Self {
        Sensitive(value)
    }
}

impl Debug for Sensitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(sensitive value)")
    }
}

impl Display for Sensitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(sensitive value)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_is_masked() {
        let secret = Sensitive::new("glrt-abc123");
        assert_eq!(format!("{:?}", secret), "(sensitive value)");
        assert_eq!(format!("{}", secret), "(sensitive value)");
        assert_eq!(secret.expose(), "glrt-abc123");
    }

    #[test]
    fn sensitive_is_stored_in_plain() {
        #[derive(Deserialize, Serialize)]
        struct Holder {
            token: Sensitive,
        }
        let text = toml::to_string(&Holder {
            token: Sensitive::new("abc123"),
        })
        .unwrap();
        assert_eq!(text.trim(), "token = \"abc123\"");
        let parsed: Holder = toml::from_str(&text).unwrap();
        assert_eq!(parsed.token.expose(), "abc123");
    }

    #[test]
    fn outcome_accessors() {
        assert_eq!(ReadOutcome::Confirmed(1).confirmed(), Some(1));
        assert!(ReadOutcome::<u32>::Cleared.is_cleared());
        assert_eq!(ReadOutcome::<u32>::Cleared.confirmed(), None);
    }
}
