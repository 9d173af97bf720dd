use crate::errors::AccessError;

/// Caller identity as asserted by the external identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    User { external_id: String, email: String },
}

impl Identity {
    /// A blank id yields [`Identity::Anonymous`].
    pub fn user(external_id: impl Into<String>, email: impl Into<String>) -> Self {
        let external_id = external_id.into().trim().to_string();
        if external_id.is_empty() {
            return Identity::Anonymous;
        }
        Identity::User {
            external_id,
            email: email.into(),
        }
    }

    pub fn external_id(&self) -> Result<&str, AccessError> {
        match self {
            Identity::Anonymous => Err(AccessError::Unauthorized),
            Identity::User { external_id, .. } => Ok(external_id),
        }
    }

    pub fn email(&self) -> &str {
        match self {
            Identity::Anonymous => "",
            Identity::User { email, .. } => email,
        }
    }

    /// Event log actor label.
    pub fn actor(&self) -> &str {
        match self {
            Identity::Anonymous => "anonymous",
            Identity::User { external_id, .. } => external_id,
        }
    }
}
