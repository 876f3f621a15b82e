use std::fmt;

use dialoguer::{Input, Password};

use crate::error::Result;

/// What the portal asks to log in
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Source of the credentials of an identity
pub trait CredentialProvider {
    fn provide(&mut self, identity: &str) -> Result<Credentials>;
}

/// Ask the credentials in the terminal
pub struct Prompt {
    /// Portal host shown in the prompts
    pub host: String,
}

impl Prompt {
    /// Ask for the identity itself, when it wasn't given
    pub fn identity(&self) -> Result<String> {
        let username: String = Input::new()
            .with_prompt(format!("Username for '{}'", self.host))
            .interact_text()?;

        Ok(username.trim().to_owned())
    }
}

impl CredentialProvider for Prompt {
    fn provide(&mut self, identity: &str) -> Result<Credentials> {
        let password = Password::new()
            .with_prompt(format!("Password for '{identity}'"))
            .interact()?;

        Ok(Credentials {
            username: identity.to_owned(),
            password: password.trim().to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_the_password() {
        let credentials = Credentials {
            username: "jdoe".into(),
            password: "hunter2".into(),
        };
        let shown = format!("{credentials:?}");
        assert!(shown.contains("jdoe"));
        assert!(!shown.contains("hunter2"));
    }
}
