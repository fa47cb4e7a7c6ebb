use std::fmt;

/// The one out-of-band secret gating every route.
///
/// Injected explicitly at construction so the core stays testable
/// without environment coupling. `Debug` never prints the value.
#[derive(Clone)]
pub struct SharedSecret(String);

impl SharedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Constant-time equality: every byte of both strings is visited
    /// regardless of where the first mismatch sits.
    pub fn matches(&self, presented: &str) -> bool {
        let ours = self.0.as_bytes();
        let theirs = presented.as_bytes();
        let mut diff = ours.len() ^ theirs.len();
        for i in 0..ours.len().max(theirs.len()) {
            let a = ours.get(i).copied().unwrap_or(0);
            let b = theirs.get(i).copied().unwrap_or(0);
            diff |= usize::from(a ^ b);
        }
        diff == 0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}
