//! Event specifier parsing.
//!
//! A specifier is `event`, `event.namespace`, `.namespace` or `*.namespace`.
//! Only the first `.` separates event from namespace; anything after it,
//! further dots included, is the namespace. An empty or `*` part resolves
//! to the caller's default, where `None` means "any".

/// Namespace used for registrations that do not name one.
pub const DEFAULT_NAMESPACE: &str = "__default";

/// Wildcard accepted for either part of a specifier.
pub const WILDCARD: &str = "*";

/// A parsed `(event, namespace)` pair. `None` means "any".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventSpecifier {
    pub event: Option<String>,
    pub namespace: Option<String>,
}

impl EventSpecifier {
    /// Whether this specifier selects the given registry coordinates.
    pub fn selects(&self, event: &str, namespace: &str) -> bool {
        self.event.as_deref().map_or(true, |e| e == event)
            && self.namespace.as_deref().map_or(true, |ns| ns == namespace)
    }
}

/// Normalize raw specifier strings into individual specifiers.
///
/// Each input may hold several whitespace-separated specifiers
/// (`"click keyup.form"`). Blank entries are dropped; dots and stars are
/// left untouched for [`parse_specifier`].
pub fn sanitize_specifiers<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .flat_map(|s| {
            s.as_ref()
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Split a single specifier on its first dot.
pub fn parse_specifier(
    raw: &str,
    default_event: Option<&str>,
    default_namespace: Option<&str>,
) -> EventSpecifier {
    let (event, namespace) = match raw.split_once('.') {
        Some((event, namespace)) => (event, namespace),
        None => (raw, ""),
    };
    EventSpecifier {
        event: resolve_part(event, default_event),
        namespace: resolve_part(namespace, default_namespace),
    }
}

fn resolve_part(part: &str, default: Option<&str>) -> Option<String> {
    if part.is_empty() || part == WILDCARD {
        default.map(str::to_string)
    } else {
        Some(part.to_string())
    }
}
