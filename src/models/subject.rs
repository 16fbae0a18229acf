//! The authenticated caller, as handed over by the auth middleware.

/// A validated caller identity.
///
/// `id` is the token subject (`sub`). Scopes are the ones granted to the
/// token; the middleware has already checked the required one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
    pub scopes: Vec<String>,
}

impl Subject {
    pub fn new(id: impl Into<String>, scopes: Vec<String>) -> Self {
        Self {
            id: id.into(),
            scopes,
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}
