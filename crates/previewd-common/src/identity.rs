//! Caller identities.
//!
//! A client keeps a set of anonymous `(id, secret)` pairs rather than a single
//! session, and presents all of them on every request. The set is ordered: the
//! first identity is the acting one, and iteration always follows insertion order.

use std::fmt;

use crate::error::PreviewError;

/// One anonymous identity. The secret never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub secret: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Ordered, duplicate-free set of identities held by one caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentitySet {
    identities: Vec<Identity>,
}

impl IdentitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity; a repeated id keeps its first position and secret.
    pub fn insert(&mut self, identity: Identity) {
        if !self.contains(&identity.id) {
            self.identities.push(identity);
        }
    }

    /// Parse the wire form `id:secret[,id:secret...]`.
    pub fn parse(raw: &str) -> Result<Self, PreviewError> {
        let mut set = Self::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (id, secret) = pair
                .split_once(':')
                .ok_or_else(|| PreviewError::bad_request("Malformed identity header"))?;
            let (id, secret) = (id.trim(), secret.trim());
            if id.is_empty() || secret.is_empty() {
                return Err(PreviewError::bad_request("Malformed identity header"));
            }
            set.insert(Identity::new(id, secret));
        }
        Ok(set)
    }

    /// The acting identity: the first one presented.
    pub fn primary(&self) -> Option<&Identity> {
        self.identities.first()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.identities.iter().any(|i| i.id == user_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.iter()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl FromIterator<Identity> for IdentitySet {
    fn from_iter<T: IntoIterator<Item = Identity>>(iter: T) -> Self {
        let mut set = Self::new();
        for identity in iter {
            set.insert(identity);
        }
        set
    }
}
