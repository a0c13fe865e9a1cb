//! Directory protocol failures

/// Typed failure from a directory operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// Transport-level failure: refused, reset, timed out, TLS handshake
    #[error("server unreachable at {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("invalid credentials for {dn}")]
    InvalidCredentials { dn: String },

    #[error("entry already exists: {dn}")]
    AlreadyExists { dn: String },

    #[error("no such object: {dn}")]
    NoSuchObject { dn: String },

    /// Any other non-success result code
    #[error("directory returned code {code}: {message}")]
    Protocol { code: u32, message: String },
}

/// LDAP result codes the engine branches on
pub mod rc {
    pub const SUCCESS: u32 = 0;
    pub const COMPARE_FALSE: u32 = 5;
    pub const COMPARE_TRUE: u32 = 6;
    pub const NO_SUCH_OBJECT: u32 = 32;
    pub const INVALID_CREDENTIALS: u32 = 49;
    pub const ALREADY_EXISTS: u32 = 68;
}

impl DirectoryError {
    pub fn unreachable(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Unreachable { url: url.into(), message: message.to_string() }
    }

    /// Classify a non-success result code for an operation on `dn`
    pub fn from_code(code: u32, dn: &str, message: &str) -> Self {
        match code {
            rc::NO_SUCH_OBJECT => Self::NoSuchObject { dn: dn.to_string() },
            rc::ALREADY_EXISTS => Self::AlreadyExists { dn: dn.to_string() },
            rc::INVALID_CREDENTIALS => Self::InvalidCredentials { dn: dn.to_string() },
            _ => Self::Protocol { code, message: message.to_string() },
        }
    }

    /// Only this class of failure triggers the fallback scheme
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_variants() {
        assert_eq!(
            DirectoryError::from_code(32, "cn=x", ""),
            DirectoryError::NoSuchObject { dn: "cn=x".into() }
        );
        assert_eq!(
            DirectoryError::from_code(68, "cn=x", ""),
            DirectoryError::AlreadyExists { dn: "cn=x".into() }
        );
        assert!(matches!(
            DirectoryError::from_code(50, "cn=x", "insufficient access"),
            DirectoryError::Protocol { code: 50, .. }
        ));
        assert!(DirectoryError::unreachable("ldap://h:389", "refused").is_unreachable());
        assert!(!DirectoryError::InvalidCredentials { dn: "cn=x".into() }.is_unreachable());
    }
}
