use std::collections::HashMap;

/// Users every server knows about unless told otherwise.
const BUILTIN_USERS: &[(&str, &str)] = &[("admin", "admin123"), ("user", "pass")];

/// Static username to password table. Read-only after construction, so a single instance can be
/// shared by every session behind an `Arc`.
///
/// Passwords are kept and compared in plain text, and nothing throttles repeated attempts.
#[derive(Debug, Clone)]
pub struct Credentials {
    users: HashMap<String, String>,
}

impl Credentials {
    pub fn with_users<I, U, P>(users: I) -> Credentials
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        Credentials {
            users: users
                .into_iter()
                .map(|(user, pass)| (user.into(), pass.into()))
                .collect(),
        }
    }

    /// Both fields must match exactly.
    pub fn check(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|expected| expected == password)
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::with_users(BUILTIN_USERS.iter().copied())
    }
}

/// Splits a login message of the form `"<username> <password>"`. Anything other than exactly two
/// whitespace separated tokens is rejected.
pub fn parse_login(payload: &[u8]) -> Option<(&str, &str)> {
    let text = std::str::from_utf8(payload).ok()?;
    let mut parts = text.split_whitespace();

    match (parts.next(), parts.next(), parts.next()) {
        (Some(username), Some(password), None) => Some((username, password)),
        _ => None,
    }
}
