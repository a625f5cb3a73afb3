//! Search filters for the Drive `files.list` endpoint.

use std::fmt;

use pdvbackup_common::DriveId;

/// MIME type marking a Drive folder.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Escape a value for use inside a single-quoted query literal.
pub fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// A `q=` filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query(String);

impl Query {
    /// Non-trashed folders whose name equals `name`.
    pub fn folder_named(name: &str) -> Self {
        Self(format!(
            "name='{}' and mimeType='{}' and trashed=false",
            escape_literal(name),
            FOLDER_MIME_TYPE
        ))
    }

    /// Non-trashed entries named `name` directly inside `parent`.
    pub fn child_named(parent: &DriveId, name: &str) -> Self {
        Self(format!(
            "'{}' in parents and name='{}' and trashed=false",
            escape_literal(parent.as_str()),
            escape_literal(name)
        ))
    }

    /// All non-trashed entries directly inside `parent`.
    pub fn children_of(parent: &DriveId) -> Self {
        Self(format!(
            "'{}' in parents and trashed=false",
            escape_literal(parent.as_str())
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_folder_query() {
        let query = Query::folder_named("backup");
        assert_eq!(
            query.as_str(),
            "name='backup' and mimeType='application/vnd.google-apps.folder' and trashed=false"
        );
    }

    #[test]
    fn test_child_query() {
        let parent = DriveId::new("abc").unwrap();
        assert_eq!(
            Query::child_named(&parent, "snap1.sqlite").as_str(),
            "'abc' in parents and name='snap1.sqlite' and trashed=false"
        );
        assert_eq!(
            Query::children_of(&parent).as_str(),
            "'abc' in parents and trashed=false"
        );
    }

    #[test]
    fn test_quotes_are_escaped() {
        let query = Query::folder_named("Respaldos d'Ana");
        assert!(query.as_str().starts_with("name='Respaldos d\\'Ana' and"));
    }

    #[test]
    fn test_backslash_escaped_before_quote() {
        assert_eq!(escape_literal(r"a\'b"), r"a\\\'b");
    }

    proptest! {
        #[test]
        fn prop_escaped_literal_never_closes_early(name in ".*") {
            let escaped = escape_literal(&name);
            // Every quote in the output is preceded by an odd run of backslashes
            let chars: Vec<char> = escaped.chars().collect();
            for (i, c) in chars.iter().enumerate() {
                if *c == '\'' {
                    let run = chars[..i].iter().rev().take_while(|c| **c == '\\').count();
                    prop_assert_eq!(run % 2, 1);
                }
            }
        }
    }
}
