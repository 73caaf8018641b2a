//! Type-level allowlist enforcement for `ORDER BY` clauses (spec §4.9, §9,
//! P5). The allowlist is a borrowed `'static` slice built at compile time —
//! there is no code path that can insert a user-controlled string into it.

/// Sort direction, parsed from the `sort_order` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(raw: Option<&str>, default: SortOrder) -> Self {
        match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("asc") => SortOrder::Asc,
            Some("desc") => SortOrder::Desc,
            _ => default,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Maps an API-level sort key to a trusted DB column through a fixed
/// allowlist. Any `sort_by` value that doesn't match a pair falls back to
/// `default_column` — never to the raw input.
///
/// `allowlist` pairs are `(api_name, db_column)`; both sides are
/// `'static str` literals supplied by the call site, so nothing derived from
/// a request ever reaches the returned string.
pub fn safe_order_by(
    sort_by: Option<&str>,
    allowlist: &[(&'static str, &'static str)],
    default_column: &'static str,
) -> &'static str {
    match sort_by {
        Some(requested) => allowlist
            .iter()
            .find(|(api_name, _)| *api_name == requested)
            .map(|(_, column)| *column)
            .unwrap_or(default_column),
        None => default_column,
    }
}

pub const CORRUPTIONS_SORT_ALLOWLIST: &[(&str, &str)] = &[
    ("detected_at", "detected_at"),
    ("last_updated_at", "last_updated_at"),
    ("file_path", "file_path"),
    ("current_state", "current_state"),
    ("retry_count", "retry_count"),
];
pub const CORRUPTIONS_DEFAULT_SORT: &str = "detected_at";

pub const SCANS_SORT_ALLOWLIST: &[(&str, &str)] = &[
    ("started_at", "started_at"),
    ("path", "local_path"),
    ("status", "status"),
    ("files_scanned", "files_scanned"),
    ("corruptions_found", "corruptions_found"),
];
pub const SCANS_DEFAULT_SORT: &str = "started_at";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_sort_by_falls_back_to_default() {
        let column = safe_order_by(
            Some("id; DROP TABLE events;--"),
            CORRUPTIONS_SORT_ALLOWLIST,
            CORRUPTIONS_DEFAULT_SORT,
        );
        assert_eq!(column, CORRUPTIONS_DEFAULT_SORT);
    }

    #[test]
    fn known_sort_by_maps_to_its_column() {
        let column = safe_order_by(
            Some("file_path"),
            CORRUPTIONS_SORT_ALLOWLIST,
            CORRUPTIONS_DEFAULT_SORT,
        );
        assert_eq!(column, "file_path");
    }

    #[test]
    fn missing_sort_by_uses_default() {
        let column = safe_order_by(None, SCANS_SORT_ALLOWLIST, SCANS_DEFAULT_SORT);
        assert_eq!(column, SCANS_DEFAULT_SORT);
    }

    #[test]
    fn sort_order_parses_case_insensitively() {
        assert_eq!(SortOrder::parse(Some("DESC"), SortOrder::Asc), SortOrder::Desc);
        assert_eq!(SortOrder::parse(Some("bogus"), SortOrder::Asc), SortOrder::Asc);
    }
}
