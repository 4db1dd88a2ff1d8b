//! Error kinds, the message bundle, and public error rendering.
//!
//! Errors travel through the evaluator as plain values (`EvalResult`), cheap
//! to construct and propagated with `?`. The public [`PklError`] is produced
//! at the top once evaluation has failed for good; it carries the interpreter
//! stack frames and any nested causes (union type checking aggregates one
//! cause per failed branch).

use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

use crate::lexer::Span;

/// Result type alias for operations that can produce an evaluation error.
pub(crate) type EvalResult<T> = Result<T, Box<EvalError>>;

/// The closed set of error kinds the engine produces.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, serde::Serialize, serde::Deserialize,
)]
pub enum ErrorKind {
    /// Malformed source; carries the expected-token set in the message.
    SyntaxError,
    /// A module or resource URI could not be resolved or is not allowed.
    ResolveError,
    /// Import cycle or trust-level violation.
    ImportError,
    /// A value failed its declared type; unions carry one cause per branch.
    TypeMismatch,
    /// A constraint predicate evaluated to false.
    ConstraintViolation,
    /// Read of a property that has no value (abstract without override).
    UndefinedProperty,
    /// A property transitively depends on itself.
    CycleError,
    /// Overflow, division by zero, or a bad numeric conversion.
    ArithmeticError,
    /// The external reader process failed, crashed, or was already closed.
    ExternalReaderError,
    /// The embedding caller requested cancellation.
    Cancelled,
    /// The evaluator's wall-clock budget expired.
    TimedOut,
    /// An explicit `throw` in user code.
    UserError,
    /// The interpreter's recursion-depth guard tripped.
    StackOverflow,
    /// An internal invariant was violated.
    Bug,
}

/// One captured interpreter stack frame, already resolved to a display form.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StackFrame {
    /// Qualified member name, e.g. `pigeon.age`, or `None` at module level.
    pub member: Option<String>,
    /// Source location in `uri:line:column` form.
    pub location: String,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.member {
            Some(member) => write!(f, "at {member} ({})", self.location),
            None => write!(f, "at ({})", self.location),
        }
    }
}

/// Internal error value used throughout the evaluator.
///
/// Boxed inside [`EvalResult`] so the `Ok` path stays a single word. The
/// `span` names the error site within the module currently being evaluated;
/// the evaluator converts it to a [`StackFrame`] as the error crosses member
/// boundaries, so a fully propagated error no longer needs source access.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EvalError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Option<Span>,
    pub frames: Vec<StackFrame>,
    pub causes: Vec<EvalError>,
}

impl EvalError {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Box<Self> {
        Box::new(Self {
            kind,
            message: message.into(),
            span: None,
            frames: Vec::new(),
            causes: Vec::new(),
        })
    }

    /// Builds an error from a bundle key and numbered placeholder arguments.
    pub(crate) fn keyed(kind: ErrorKind, key: &str, args: &[&dyn fmt::Display]) -> Box<Self> {
        Self::new(kind, bundle::format_message(key, args))
    }

    #[must_use]
    pub(crate) fn with_span(mut self: Box<Self>, span: Span) -> Box<Self> {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }

    pub(crate) fn push_frame(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }

    /// Converts into the public error form.
    #[must_use]
    pub fn into_public(self) -> PklError {
        PklError {
            kind: self.kind,
            message: self.message,
            frames: self.frames,
            causes: self.causes.into_iter().map(EvalError::into_public).collect(),
        }
    }
}

/// The public, fully rendered evaluation error.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PklError {
    pub kind: ErrorKind,
    pub message: String,
    pub frames: Vec<StackFrame>,
    pub causes: Vec<PklError>,
}

impl PklError {
    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, prefix: &str) -> fmt::Result {
        write!(f, "{}", indent_lines(&format!("{}: {}", self.kind, self.message), prefix))?;
        for cause in &self.causes {
            writeln!(f)?;
            cause.fmt_indented(f, &format!("{prefix}  "))?;
        }
        Ok(())
    }
}

impl fmt::Display for PklError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, "")?;
        for frame in &self.frames {
            write!(f, "\n{frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PklError {}

/// Indents every line of `text` (including the first) with `prefix`.
///
/// Continuation lines of multi-line messages line up under their first line,
/// so nested causes render as a readable tree.
#[must_use]
pub fn indent_lines(text: &str, prefix: &str) -> String {
    let mut out = String::with_capacity(text.len() + prefix.len() * 4);
    for (i, line) in text.lines().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(prefix);
        out.push_str(line);
    }
    out
}

/// The message bundle: symbolic name to template with numbered placeholders.
pub(crate) mod bundle {
    use std::fmt;

    /// Template table. Kept sorted by key for review; lookup is a linear scan
    /// over a small constant table.
    const MESSAGES: &[(&str, &str)] = &[
        ("cannotAmendValue", "cannot amend a value of type {0}"),
        ("cannotConvertUnit", "cannot convert to unknown unit `{0}`"),
        ("cannotFindMember", "cannot find member `{0}`"),
        ("cannotFindModule", "cannot find module `{0}`"),
        ("cannotFindResource", "cannot find resource `{0}`"),
        ("cannotRenderValue", "values of type {0} cannot be rendered as {1}"),
        ("cancelled", "evaluation was cancelled by the caller"),
        ("constraintViolated", "constraint {0} violated"),
        ("cyclicModuleImport", "circular module import involving `{0}`"),
        ("cyclicProperty", "circular reference involving `{0}`"),
        ("divisionByZero", "integer division by zero"),
        ("externalReaderClosed", "external reader process is already closed"),
        ("externalReaderCrashed", "external reader process for scheme `{0}` exited unexpectedly"),
        ("importTrustViolation", "cannot import `{0}`: importer trust level {1} is lower than imported trust level {2}"),
        ("integerOverflow", "integer overflow in operation `{0}`"),
        ("invalidGlobPattern", "invalid glob pattern `{0}`: {1}"),
        ("invalidRegex", "invalid regular expression `{0}`: {1}"),
        ("moduleNotAllowed", "module URI `{0}` is not allowed by the security policy"),
        ("noSuchScheme", "no reader is registered for URI scheme `{0}`"),
        ("resourceNotAllowed", "resource URI `{0}` is not allowed by the security policy"),
        ("timedOut", "evaluation timed out after {0} seconds"),
        ("typeMismatch", "expected {0}, got {1}"),
        ("undefinedProperty", "property `{0}` is abstract and has not been assigned a value"),
        ("usedNullValue", "expected a non-null value, but got null"),
        ("wrongArity", "expected {0} argument(s), got {1}"),
    ];

    /// Formats the template for `key`, substituting `{N}` placeholders.
    ///
    /// An unknown key is an internal defect; the key itself is returned so the
    /// error still surfaces something actionable.
    pub(crate) fn format_message(key: &str, args: &[&dyn fmt::Display]) -> String {
        let Some((_, template)) = MESSAGES.iter().find(|(k, _)| *k == key) else {
            return format!("<missing message `{key}`>");
        };
        let mut out = String::with_capacity(template.len() + 16);
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '{' {
                let mut digits = String::new();
                while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                    digits.push(*d);
                    chars.next();
                }
                if chars.peek() == Some(&'}') && !digits.is_empty() {
                    chars.next();
                    let idx: usize = digits.parse().unwrap_or(usize::MAX);
                    match args.get(idx) {
                        Some(arg) => out.push_str(&arg.to_string()),
                        None => out.push_str("<?>"),
                    }
                    continue;
                }
                out.push('{');
                out.push_str(&digits);
            } else {
                out.push(c);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_placeholders() {
        let msg = bundle::format_message("typeMismatch", &[&"String", &"Int"]);
        assert_eq!(msg, "expected String, got Int");
    }

    #[test]
    fn trust_violation_message() {
        let msg = bundle::format_message("importTrustViolation", &[&"file:///etc/foo.pkl", &20, &30]);
        assert_eq!(
            msg,
            "cannot import `file:///etc/foo.pkl`: importer trust level 20 is lower than imported trust level 30"
        );
    }

    #[test]
    fn indentation_lines_up() {
        let text = "first\nsecond";
        assert_eq!(indent_lines(text, "  "), "  first\n  second");
    }
}
