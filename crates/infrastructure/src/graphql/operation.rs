//! Operation-type detection for GraphQL documents.

/// GraphQL root operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// `query`, or the `{ ... }` shorthand.
    Query,
    /// `mutation`.
    Mutation,
    /// `subscription`.
    Subscription,
}

/// Determines the operation kind from the document's first keyword.
///
/// Leading whitespace and `#` comment lines are skipped. Documents that
/// start with anything else (fragments first, or garbage) count as queries
/// and are left for the server to judge.
#[must_use]
pub fn operation_kind(query: &str) -> OperationKind {
    let body = strip_leading_comments(query);
    let keyword: String = body
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect();

    if keyword.eq_ignore_ascii_case("subscription") {
        OperationKind::Subscription
    } else if keyword.eq_ignore_ascii_case("mutation") {
        OperationKind::Mutation
    } else {
        OperationKind::Query
    }
}

/// True when the document is a subscription.
#[must_use]
pub fn is_subscription(query: &str) -> bool {
    operation_kind(query) == OperationKind::Subscription
}

fn strip_leading_comments(query: &str) -> &str {
    let mut rest = query.trim_start();
    while let Some(comment) = rest.strip_prefix('#') {
        rest = comment
            .split_once('\n')
            .map_or("", |(_, after)| after)
            .trim_start();
    }
    rest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords() {
        assert_eq!(operation_kind("{ me { id } }"), OperationKind::Query);
        assert_eq!(operation_kind("query Me { me { id } }"), OperationKind::Query);
        assert_eq!(operation_kind("  mutation { logout }"), OperationKind::Mutation);
        assert_eq!(
            operation_kind("subscription OnEvent { event }"),
            OperationKind::Subscription
        );
    }

    #[test]
    fn test_comments_and_case() {
        let query = "# watch events\n  # second line\n\n  SUBSCRIPTION{ event }";
        assert!(is_subscription(query));
        assert!(!is_subscription("# subscription\nquery { a }"));
        assert!(!is_subscription("# only a comment"));
        assert!(!is_subscription("subscriptions { a }"));
    }
}
