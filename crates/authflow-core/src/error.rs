use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthflowError {
    // Traversal signals
    #[error("input is not compatible with this edge")]
    IncompatibleInput,

    #[error("edge performed its action without advancing the graph")]
    SameNode,

    // User-facing errors
    #[error("input required (acceptable edges: {})", .edges.join(", "))]
    InputRequired { edges: Vec<String>, same_node: bool },

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid verification code")]
    InvalidCode,

    #[error("duplicated identity")]
    DuplicatedIdentity,

    #[error("duplicated authenticator")]
    DuplicatedAuthenticator,

    #[error("cannot remove last identity")]
    CannotRemoveLastIdentity,

    #[error("missing authenticator for the identity")]
    MissingAuthenticatorForIdentity,

    #[error("user not found")]
    UserNotFound,

    #[error("user is disabled")]
    UserDisabled,

    #[error("identity not found: {0}")]
    IdentityNotFound(String),

    #[error("authenticator not found: {0}")]
    AuthenticatorNotFound(String),

    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    // Infrastructure errors
    #[error("interaction graph not found")]
    GraphNotFound,

    #[error("interaction graph already exists: {0}")]
    GraphExists(String),

    #[error("rate limited: {bucket}")]
    RateLimited { bucket: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Corrupted state or a flow/node mismatch
    #[error("unknown {category} kind: {kind}")]
    UnknownKind { category: &'static str, kind: String },

    #[error("node used before prepare: {0}")]
    NotPrepared(&'static str),

    // Flow diagnostics
    #[error("{source} (intent: {intent_kind})")]
    InFlow {
        intent_kind: String,
        #[source]
        source: Box<AuthflowError>,
    },
}

/// Coarse classification used by callers to decide how to surface an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Traversal control flow, never shown to an end user.
    Signal,
    /// Recoverable by the end user (retry input, pick another option).
    User,
    /// Recoverable by retrying at a higher layer.
    Infrastructure,
    /// Corrupted graph or programmer error.
    Fatal,
}

impl AuthflowError {
    /// Attach the intent kind to an error, unless it already carries one.
    pub fn with_intent(self, intent_kind: &str) -> Self {
        match self {
            err @ AuthflowError::InFlow { .. } => err,
            err => AuthflowError::InFlow {
                intent_kind: intent_kind.to_string(),
                source: Box::new(err),
            },
        }
    }

    /// The underlying error with flow diagnostics peeled off.
    pub fn root(&self) -> &AuthflowError {
        match self {
            AuthflowError::InFlow { source, .. } => source.root(),
            err => err,
        }
    }

    /// Intent kind attached by the traversal, if any.
    pub fn intent_kind(&self) -> Option<&str> {
        match self {
            AuthflowError::InFlow { intent_kind, .. } => Some(intent_kind),
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self.root() {
            AuthflowError::IncompatibleInput | AuthflowError::SameNode => ErrorCategory::Signal,
            AuthflowError::InputRequired { .. }
            | AuthflowError::InvalidCredentials
            | AuthflowError::InvalidCode
            | AuthflowError::DuplicatedIdentity
            | AuthflowError::DuplicatedAuthenticator
            | AuthflowError::CannotRemoveLastIdentity
            | AuthflowError::MissingAuthenticatorForIdentity
            | AuthflowError::UserNotFound
            | AuthflowError::UserDisabled
            | AuthflowError::IdentityNotFound(_)
            | AuthflowError::AuthenticatorNotFound(_)
            | AuthflowError::OAuth(_)
            | AuthflowError::InvariantViolated(_) => ErrorCategory::User,
            AuthflowError::GraphNotFound
            | AuthflowError::GraphExists(_)
            | AuthflowError::RateLimited { .. }
            | AuthflowError::Database(_)
            | AuthflowError::Config(_)
            | AuthflowError::ConfigNotFound(_)
            | AuthflowError::Io(_)
            | AuthflowError::Json(_) => ErrorCategory::Infrastructure,
            AuthflowError::UnknownKind { .. } | AuthflowError::NotPrepared(_) => {
                ErrorCategory::Fatal
            }
            // root() never returns the wrapper
            AuthflowError::InFlow { .. } => ErrorCategory::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Fatal
    }
}

pub type Result<T> = std::result::Result<T, AuthflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_intent_wraps_once() {
        let err = AuthflowError::InvalidCredentials
            .with_intent("authenticate")
            .with_intent("other");
        assert_eq!(err.intent_kind(), Some("authenticate"));
        assert!(matches!(err.root(), AuthflowError::InvalidCredentials));
        assert_eq!(err.to_string(), "invalid credentials (intent: authenticate)");
    }

    #[test]
    fn test_categories() {
        assert_eq!(AuthflowError::SameNode.category(), ErrorCategory::Signal);
        assert_eq!(
            AuthflowError::CannotRemoveLastIdentity
                .with_intent("remove_identity")
                .category(),
            ErrorCategory::User
        );
        assert_eq!(AuthflowError::GraphNotFound.category(), ErrorCategory::Infrastructure);
        assert!(AuthflowError::UnknownKind {
            category: "node",
            kind: "nope".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_input_required_lists_edges() {
        let err = AuthflowError::InputRequired {
            edges: vec!["authentication_password".into(), "authentication_totp".into()],
            same_node: false,
        };
        assert_eq!(
            err.to_string(),
            "input required (acceptable edges: authentication_password, authentication_totp)"
        );
    }
}
