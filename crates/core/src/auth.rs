/// A caller that an outer layer has already authenticated.
///
/// The core never checks credentials; it only requires that one of these is
/// handed in, which keeps login/session handling at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    subject: String,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }

    /// The operator running a local command.
    pub fn local_operator() -> Self {
        Self::new("local-operator")
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}
