//! The security policy checked at module resolution, module import, and
//! resource read.
//!
//! The policy is immutable once created; it cannot be escalated during
//! evaluation. An empty allowlist denies everything, which makes the
//! evaluator a pure computation environment with no I/O.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::errors::{ErrorKind, EvalError, EvalResult};

/// Trust levels gate imports: an importer may reference targets of equal or
/// lower trust level.
pub const TRUST_REPL: u8 = 40;
pub const TRUST_LOCAL_FILE: u8 = 30;
pub const TRUST_MODULEPATH: u8 = 20;
pub const TRUST_OTHER: u8 = 10;
pub const TRUST_STDLIB: u8 = 0;

/// Default trust-level function.
///
/// `jar:` URIs take the trust level of the URI they wrap.
#[must_use]
pub fn default_trust_level(uri: &str) -> u8 {
    if let Some(inner) = uri.strip_prefix("jar:") {
        let inner = inner.split('!').next().unwrap_or(inner);
        return default_trust_level(inner);
    }
    match uri.split(':').next().unwrap_or("") {
        "repl" => TRUST_REPL,
        "file" => {
            if is_local_file(uri) {
                TRUST_LOCAL_FILE
            } else {
                TRUST_OTHER
            }
        }
        "modulepath" => TRUST_MODULEPATH,
        "pkl" => TRUST_STDLIB,
        _ => TRUST_OTHER,
    }
}

/// A `file:` URI with no authority, or a `localhost` authority, names the
/// local filesystem.
fn is_local_file(uri: &str) -> bool {
    let Some(rest) = uri.strip_prefix("file:") else {
        return false;
    };
    if let Some(after) = rest.strip_prefix("//") {
        let authority = after.split('/').next().unwrap_or("");
        authority.is_empty() || authority == "localhost"
    } else {
        true
    }
}

/// The uniform policy object.
#[derive(Debug)]
pub struct SecurityPolicy {
    allowed_modules: Vec<Regex>,
    allowed_resources: Vec<Regex>,
    trust_level: fn(&str) -> u8,
    root_dir: Option<PathBuf>,
}

impl SecurityPolicy {
    /// Builds a policy from allowlist patterns.
    ///
    /// A URI is allowed when any pattern matches a prefix of it (patterns
    /// are implicitly anchored at the start).
    pub fn new(allowed_modules: &[&str], allowed_resources: &[&str]) -> EvalResult<Self> {
        let compile = |patterns: &[&str]| -> EvalResult<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(&format!("^(?:{p})"))
                        .map_err(|err| EvalError::keyed(ErrorKind::ResolveError, "invalidRegex", &[p, &err]))
                })
                .collect()
        };
        Ok(Self {
            allowed_modules: compile(allowed_modules)?,
            allowed_resources: compile(allowed_resources)?,
            trust_level: default_trust_level,
            root_dir: None,
        })
    }

    /// A policy that allows every module and resource URI.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self::new(&[".*"], &[".*"]).expect("static patterns compile")
    }

    /// A policy that denies all module and resource access.
    #[must_use]
    pub fn none() -> Self {
        Self {
            allowed_modules: Vec::new(),
            allowed_resources: Vec::new(),
            trust_level: default_trust_level,
            root_dir: None,
        }
    }

    /// Replaces the trust-level function.
    #[must_use]
    pub fn with_trust_level(mut self, f: fn(&str) -> u8) -> Self {
        self.trust_level = f;
        self
    }

    /// Confines resolved `file:` paths to a root directory (checked after
    /// following symlinks).
    #[must_use]
    pub fn with_root_dir(mut self, root: PathBuf) -> Self {
        self.root_dir = Some(root);
        self
    }

    pub(crate) fn check_module(&self, uri: &str) -> EvalResult<()> {
        if self.allowed_modules.iter().any(|p| p.is_match(uri)) {
            Ok(())
        } else {
            Err(EvalError::keyed(ErrorKind::ResolveError, "moduleNotAllowed", &[&uri]))
        }
    }

    pub(crate) fn check_resource(&self, uri: &str) -> EvalResult<()> {
        if self.allowed_resources.iter().any(|p| p.is_match(uri)) {
            Ok(())
        } else {
            Err(EvalError::keyed(ErrorKind::ResolveError, "resourceNotAllowed", &[&uri]))
        }
    }

    /// Trust-level monotonicity: an import is accepted iff the importer's
    /// level is not less than the imported URI's.
    pub(crate) fn check_import(&self, importer_uri: &str, imported_uri: &str) -> EvalResult<()> {
        let importer = (self.trust_level)(importer_uri);
        let imported = (self.trust_level)(imported_uri);
        if importer >= imported {
            Ok(())
        } else {
            Err(EvalError::keyed(
                ErrorKind::ImportError,
                "importTrustViolation",
                &[&imported_uri, &importer, &imported],
            ))
        }
    }

    /// Checks that a resolved filesystem path lies under the configured root
    /// directory, if any. Symlinks are followed before the check.
    pub(crate) fn check_path_confinement(&self, path: &Path) -> EvalResult<()> {
        let Some(root) = &self.root_dir else {
            return Ok(());
        };
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let root = root.canonicalize().unwrap_or_else(|_| root.clone());
        if canonical.starts_with(&root) {
            Ok(())
        } else {
            Err(EvalError::keyed(
                ErrorKind::ResolveError,
                "moduleNotAllowed",
                &[&path.display()],
            ))
        }
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::unrestricted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_level_table() {
        assert_eq!(default_trust_level("repl:text"), 40);
        assert_eq!(default_trust_level("file:///home/x.pkl"), 30);
        assert_eq!(default_trust_level("file://localhost/x.pkl"), 30);
        assert_eq!(default_trust_level("file://other.host/x.pkl"), 10);
        assert_eq!(default_trust_level("modulepath:/x.pkl"), 20);
        assert_eq!(default_trust_level("https://example.com/x.pkl"), 10);
        assert_eq!(default_trust_level("package://example.com/x@1.0.0#/m.pkl"), 10);
        assert_eq!(default_trust_level("pkl:base"), 0);
    }

    #[test]
    fn jar_takes_inner_trust() {
        assert_eq!(default_trust_level("jar:file:///app.zip!/m.pkl"), 30);
        assert_eq!(default_trust_level("jar:https://x.com/app.zip!/m.pkl"), 10);
    }

    #[test]
    fn import_monotonicity() {
        let policy = SecurityPolicy::unrestricted();
        // a repl module may import a local file
        policy.check_import("repl:session", "file:///x.pkl").unwrap();
        // a modulepath module may not import a local file
        let err = policy
            .check_import("modulepath:/a.pkl", "file:///etc/foo.pkl")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ImportError);
        assert!(err.message.contains("trust level 20"), "{}", err.message);
        assert!(err.message.contains("trust level 30"), "{}", err.message);
    }

    #[test]
    fn allowlists() {
        let policy = SecurityPolicy::new(&["pkl:", "file:"], &["env:"]).unwrap();
        policy.check_module("pkl:base").unwrap();
        policy.check_module("file:///x.pkl").unwrap();
        assert!(policy.check_module("https://x.com/m.pkl").is_err());
        policy.check_resource("env:HOME").unwrap();
        assert!(policy.check_resource("file:///etc/passwd").is_err());
    }
}
