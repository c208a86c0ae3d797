// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Database path decomposition.
//!
//! Fleet layouts follow a canonical shape:
//!
//! ```text
//! <root>/<project>/databases/<database>/branches/<branch>/tenants/<tenant>.db
//! ```
//!
//! [`DbPath::parse`] extracts the logical tokens from such a path; the same
//! tokens drive both replica key templating and metric labels. Parsing is a
//! pure string operation with no filesystem access.
//!
//! # Example
//!
//! ```
//! use fleetsync::dbpath::DbPath;
//!
//! let p = DbPath::parse("/data/acme/databases/users/branches/main/tenants/t1.db");
//! assert_eq!(p.project, "acme");
//! assert_eq!(p.database, "users");
//! assert_eq!(p.branch, "main");
//! assert_eq!(p.tenant, "t1");
//! ```

use std::path::{Path, PathBuf};

/// Logical tokens parsed from a database path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbPath {
    pub project: String,
    pub database: String,
    pub branch: String,
    pub tenant: String,
    /// File stem of the path (basename without extension). Always present,
    /// even when the structured layout does not match.
    pub filename: String,
}

impl DbPath {
    /// Parse logical tokens out of a filesystem path.
    ///
    /// Marker segments `databases`, `branches` and `tenants` bind the
    /// following segment to the corresponding token; the segment before
    /// `databases` is the project. When the structured layout does not
    /// match, falls back to `{project = parent dir, database = "default",
    /// branch = "main", tenant = stem}`.
    #[must_use]
    pub fn parse(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let parts: Vec<&str> = path
            .iter()
            .map(|s| s.to_str().unwrap_or_default())
            .collect();

        let mut project = String::new();
        let mut database = String::new();
        let mut branch = String::new();
        let mut tenant = String::new();

        for i in 0..parts.len() {
            match parts[i] {
                "databases" => {
                    if i > 0 {
                        project = parts[i - 1].to_string();
                    }
                    if i + 1 < parts.len() {
                        database = parts[i + 1].to_string();
                    }
                }
                "branches" => {
                    if i + 1 < parts.len() {
                        branch = parts[i + 1].to_string();
                    }
                }
                "tenants" => {
                    if i + 1 < parts.len() {
                        tenant = parts[i + 1].trim_end_matches(".db").to_string();
                    }
                }
                _ => {}
            }
        }

        let filename = stem_of(path);

        if project.is_empty() {
            // Unstructured layout: derive what we can from the file itself.
            project = path
                .parent()
                .and_then(Path::file_name)
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            database = "default".to_string();
            branch = "main".to_string();
            tenant = filename.clone();
        }

        Self {
            project,
            database,
            branch,
            tenant,
            filename,
        }
    }

    /// Re-render the canonical layout under `root`.
    ///
    /// Left inverse of [`parse`](Self::parse) for well-formed paths:
    /// `DbPath::parse(p).build(root) == p` whenever `p` follows the
    /// canonical structure under `root`.
    #[must_use]
    pub fn build(&self, root: impl AsRef<Path>) -> PathBuf {
        root.as_ref()
            .join(&self.project)
            .join("databases")
            .join(&self.database)
            .join("branches")
            .join(&self.branch)
            .join("tenants")
            .join(format!("{}.db", self.tenant))
    }

    /// Expand `{{project}} {{database}} {{branch}} {{tenant}} {{filename}}`
    /// placeholders in a key template.
    #[must_use]
    pub fn expand_template(&self, template: &str) -> String {
        template
            .replace("{{project}}", &self.project)
            .replace("{{database}}", &self.database)
            .replace("{{branch}}", &self.branch)
            .replace("{{tenant}}", &self.tenant)
            .replace("{{filename}}", &self.filename)
    }
}

/// Expand a template against a raw path in one step.
#[must_use]
pub fn expand_path_template(template: &str, db_path: impl AsRef<Path>) -> String {
    if template.is_empty() {
        return String::new();
    }
    DbPath::parse(db_path).expand_template(template)
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_layout() {
        let p = DbPath::parse("/data/acme/databases/users/branches/main/tenants/tenant1.db");
        assert_eq!(p.project, "acme");
        assert_eq!(p.database, "users");
        assert_eq!(p.branch, "main");
        assert_eq!(p.tenant, "tenant1");
        assert_eq!(p.filename, "tenant1");
    }

    #[test]
    fn test_parse_fallback_layout() {
        let p = DbPath::parse("/var/lib/app/orders.db");
        assert_eq!(p.project, "app");
        assert_eq!(p.database, "default");
        assert_eq!(p.branch, "main");
        assert_eq!(p.tenant, "orders");
        assert_eq!(p.filename, "orders");
    }

    #[test]
    fn test_parse_is_pure_for_missing_files() {
        // No filesystem access: a path that does not exist parses fine.
        let p = DbPath::parse("/nowhere/acme/databases/d/branches/b/tenants/t.db");
        assert_eq!(p.database, "d");
    }

    #[test]
    fn test_build_round_trip() {
        let original = PathBuf::from("/data/acme/databases/users/branches/dev/tenants/t42.db");
        let parsed = DbPath::parse(&original);
        assert_eq!(parsed.build("/data"), original);
    }

    #[test]
    fn test_expand_template() {
        let p = DbPath::parse("/data/acme/databases/users/branches/main/tenants/t1.db");
        assert_eq!(
            p.expand_template("{{project}}/{{database}}/{{branch}}/{{tenant}}"),
            "acme/users/main/t1"
        );
        assert_eq!(p.expand_template("backups/{{filename}}"), "backups/t1");
    }

    #[test]
    fn test_expand_empty_template() {
        assert_eq!(expand_path_template("", "/data/a.db"), "");
    }

    #[test]
    fn test_filename_always_set() {
        let p = DbPath::parse("/data/acme/databases/users/branches/main/tenants/t1.db");
        assert_eq!(p.filename, "t1");

        let p = DbPath::parse("flat.db");
        assert_eq!(p.filename, "flat");
    }
}
