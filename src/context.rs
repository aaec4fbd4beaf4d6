//! Per-file auxiliary context: related tests, sources under test, and
//! schema-migration files.
//!
//! Classification is pure path-pattern matching against the conventional
//! Maven-style layout (`src/main/java` / `src/test/java`) and Liquibase
//! resource markers. A fetch failure for any individual related file drops
//! that file from the bundle and records a warning token; it never fails
//! the review that asked for it.

use tracing::warn;

use crate::budget::clamp_head_tail;
use crate::config::ContextConfig;
use crate::domain::vcs::{PrRef, VcsProvider};
use crate::session::ChangedFile;

const TEST_CLAMP_MARKER: &str = "... TEST FILE CLAMPED ...";
const SOURCE_CLAMP_MARKER: &str = "... SOURCE FILE CLAMPED ...";
const MIGRATION_CLAMP_MARKER: &str = "... MIGRATION FILE CLAMPED ...";

/// A related file that made it into the prompt context.
#[derive(Debug, Clone)]
pub struct TextRef {
    pub path: String,
    pub content: String,
}

/// Context gathered for one file review.
#[derive(Debug, Default)]
pub struct ContextBundle {
    pub related_tests: Vec<TextRef>,
    pub related_sources: Vec<TextRef>,
    pub related_migrations: Vec<TextRef>,
    pub warnings: Vec<String>,
}

fn norm_lower(path: &str) -> String {
    path.replace('\\', "/").to_lowercase()
}

pub fn is_source_file(path: &str) -> bool {
    let p = norm_lower(path);
    p.ends_with(".java") && p.contains("src/main/java/")
}

pub fn is_test_file(path: &str) -> bool {
    let p = norm_lower(path);
    p.ends_with(".java") && p.contains("src/test/java/")
}

pub fn is_migration_file(path: &str) -> bool {
    let p = norm_lower(path);
    p.contains("/resources/db/") || p.contains("liquibase")
}

fn base_name(path: &str) -> String {
    let p = path.replace('\\', "/");
    let name = p.rsplit('/').next().unwrap_or(&p);
    name.strip_suffix(".java").unwrap_or(name).to_string()
}

fn strip_test_suffix(name: &str) -> String {
    let lower = name.to_lowercase();
    let cut = if lower.ends_with("tests") {
        5
    } else if lower.ends_with("test") {
        4
    } else {
        0
    };
    // the suffix is ASCII, so cutting by char count is safe
    let keep = name.chars().count() - cut;
    name.chars().take(keep).collect()
}

fn is_test_file_name(name: &str) -> bool {
    name.ends_with("Test.java") || name.ends_with("Tests.java")
}

/// Mirror a path between the main and test trees and drop the file name,
/// yielding the package directory on the other side.
fn mirror_package_dir(path: &str, from: &str, to: &str) -> String {
    let p = path.replace('\\', "/");
    let from_marker = format!("src/{from}/java/");
    let to_marker = format!("src/{to}/java/");
    let mirrored = match p.find(&from_marker) {
        Some(i) => format!("{}{}{}", &p[..i], to_marker, &p[i + from_marker.len()..]),
        None => p,
    };
    match mirrored.rfind('/') {
        Some(i) => mirrored[..i].to_string(),
        None => mirrored,
    }
}

/// Changelog files must sort before changesets: the review validates
/// changelog-to-changeset references, so the changelog has to be read first.
fn sort_migrations_changelog_first(files: &mut [TextRef]) {
    files.sort_by(|a, b| {
        let la = a.path.to_lowercase();
        let lb = b.path.to_lowercase();
        let a_changelog = la.contains("changelog");
        let b_changelog = lb.contains("changelog");
        b_changelog.cmp(&a_changelog).then(la.cmp(&lb))
    });
}

pub struct ContextLoader<'a> {
    vcs: &'a dyn VcsProvider,
    config: &'a ContextConfig,
}

impl<'a> ContextLoader<'a> {
    pub fn new(vcs: &'a dyn VcsProvider, config: &'a ContextConfig) -> Self {
        Self { vcs, config }
    }

    /// Load everything relevant to `file_path`. `changed_files` is the
    /// session's file list, used as the migration-context source so already
    /// known diffs/content are preferred over fresh fetches.
    pub async fn load_bundle(
        &self,
        pr: &PrRef,
        changed_files: &[ChangedFile],
        file_path: &str,
    ) -> ContextBundle {
        let mut bundle = ContextBundle::default();
        let head = pr.head_sha.as_str();

        if self.config.include_tests && is_source_file(file_path) && !head.is_empty() {
            self.load_related_tests(pr, file_path, head, &mut bundle).await;
        }

        if self.config.include_sources && is_test_file(file_path) && !head.is_empty() {
            self.load_related_sources(pr, file_path, head, &mut bundle).await;
        }

        if self.config.include_migrations && is_migration_file(file_path) {
            self.load_migration_context(pr, changed_files, head, &mut bundle).await;
        }

        bundle
    }

    async fn fetch_clamped(
        &self,
        pr: &PrRef,
        path: &str,
        head: &str,
        max_chars: usize,
        marker: &str,
        warning_block: &str,
        warnings: &mut Vec<String>,
    ) -> Option<TextRef> {
        match self.vcs.fetch_file_at_commit(pr, path, head).await {
            Ok(raw) => Some(TextRef {
                path: path.to_string(),
                content: clamp_head_tail(&raw, max_chars, marker),
            }),
            Err(e) => {
                warn!(path, error = %e, "dropping related file after fetch failure");
                warnings.push(format!("{warning_block}_FETCH_FAILED:{path}"));
                None
            }
        }
    }

    async fn load_related_tests(
        &self,
        pr: &PrRef,
        file_path: &str,
        head: &str,
        bundle: &mut ContextBundle,
    ) {
        if self.config.max_test_files == 0 {
            return;
        }

        let base = base_name(file_path);
        let test_dir = mirror_package_dir(file_path, "main", "test");

        let entries = match self.vcs.list_dir_at_commit(pr, &test_dir, head).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %test_dir, error = %e, "test directory listing failed");
                bundle
                    .warnings
                    .push(format!("RELATED_TESTS_FETCH_FAILED:{test_dir}"));
                return;
            }
        };

        let matches: Vec<String> = entries
            .into_iter()
            .filter(|entry| {
                let name = entry.rsplit('/').next().unwrap_or(entry.as_str());
                name.starts_with(&base) && is_test_file_name(name)
            })
            .take(self.config.max_test_files)
            .collect();

        for entry in matches {
            let full_path = if entry.contains('/') {
                entry
            } else {
                format!("{test_dir}/{entry}")
            };
            if let Some(text_ref) = self
                .fetch_clamped(
                    pr,
                    &full_path,
                    head,
                    self.config.max_test_chars,
                    TEST_CLAMP_MARKER,
                    "RELATED_TESTS",
                    &mut bundle.warnings,
                )
                .await
            {
                bundle.related_tests.push(text_ref);
            }
        }
    }

    async fn load_related_sources(
        &self,
        pr: &PrRef,
        file_path: &str,
        head: &str,
        bundle: &mut ContextBundle,
    ) {
        if self.config.max_source_files == 0 {
            return;
        }

        let src_base = strip_test_suffix(&base_name(file_path));
        let src_dir = mirror_package_dir(file_path, "test", "main");

        let entries = match self.vcs.list_dir_at_commit(pr, &src_dir, head).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %src_dir, error = %e, "source directory listing failed");
                bundle
                    .warnings
                    .push(format!("RELATED_SOURCES_FETCH_FAILED:{src_dir}"));
                return;
            }
        };

        let wanted = format!("{}.java", src_base.to_lowercase());
        let exact: Vec<&String> = entries
            .iter()
            .filter(|e| {
                e.rsplit('/').next().unwrap_or(e.as_str()).to_lowercase() == wanted
            })
            .collect();
        let fallback: Vec<&String> = entries
            .iter()
            .filter(|e| e.to_lowercase().ends_with(".java"))
            .collect();

        let chosen: Vec<String> = if exact.is_empty() { fallback } else { exact }
            .into_iter()
            .take(self.config.max_source_files)
            .cloned()
            .collect();

        for entry in chosen {
            let full_path = if entry.contains('/') {
                entry
            } else {
                format!("{src_dir}/{entry}")
            };
            if let Some(text_ref) = self
                .fetch_clamped(
                    pr,
                    &full_path,
                    head,
                    self.config.max_source_chars,
                    SOURCE_CLAMP_MARKER,
                    "RELATED_SOURCES",
                    &mut bundle.warnings,
                )
                .await
            {
                bundle.related_sources.push(text_ref);
            }
        }
    }

    async fn load_migration_context(
        &self,
        pr: &PrRef,
        changed_files: &[ChangedFile],
        head: &str,
        bundle: &mut ContextBundle,
    ) {
        let picked: Vec<&ChangedFile> = changed_files
            .iter()
            .filter(|f| is_migration_file(&f.path))
            .take(self.config.max_migration_files)
            .collect();

        for file in picked {
            let known = file
                .content_at_head
                .as_deref()
                .or(file.diff_text.as_deref())
                .filter(|s| !s.trim().is_empty());

            if let Some(content) = known {
                bundle.related_migrations.push(TextRef {
                    path: file.path.clone(),
                    content: content.to_string(),
                });
                continue;
            }

            if !self.config.migration_fetch_fallback || head.is_empty() {
                continue;
            }

            if let Some(text_ref) = self
                .fetch_clamped(
                    pr,
                    &file.path,
                    head,
                    self.config.max_migration_chars,
                    MIGRATION_CLAMP_MARKER,
                    "MIGRATIONS",
                    &mut bundle.warnings,
                )
                .await
            {
                bundle.related_migrations.push(text_ref);
            }
        }

        sort_migrations_changelog_first(&mut bundle.related_migrations);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::vcs::ChangedFileInfo;
    use crate::session::ChangeType;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn test_config() -> ContextConfig {
        ContextConfig {
            smart_context: true,
            diff_small_threshold_chars: 6_000,
            diff_hard_skip_threshold_chars: 40_000,
            fetch_file_for_medium_diffs: true,
            skip_extensions: vec!["png".into(), "lock".into()],
            file_content_max_chars: 25_000,
            include_tests: true,
            max_test_files: 2,
            max_test_chars: 1_000,
            include_sources: true,
            max_source_files: 2,
            max_source_chars: 1_000,
            include_migrations: true,
            max_migration_files: 10,
            max_migration_chars: 1_000,
            migration_fetch_fallback: false,
        }
    }

    fn pr() -> PrRef {
        PrRef {
            url: String::new(),
            owner: "acme".into(),
            repo: "widgets".into(),
            number: 1,
            title: String::new(),
            base_sha: "base".into(),
            head_sha: "headsha".into(),
            head_ref: String::new(),
        }
    }

    /// VCS fake serving from in-memory maps; unknown paths error.
    #[derive(Default)]
    struct FakeVcs {
        dirs: HashMap<String, Vec<String>>,
        files: HashMap<String, String>,
    }

    #[async_trait]
    impl VcsProvider for FakeVcs {
        async fn resolve_pr(&self, _url: &str) -> Result<PrRef> {
            unimplemented!()
        }
        async fn list_changed_files(&self, _pr: &PrRef) -> Result<Vec<ChangedFileInfo>> {
            unimplemented!()
        }
        async fn fetch_diff(&self, _pr: &PrRef) -> Result<String> {
            unimplemented!()
        }
        async fn fetch_file_at_commit(&self, _pr: &PrRef, path: &str, _commit: &str) -> Result<String> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404: {path}"))
        }
        async fn list_dir_at_commit(&self, _pr: &PrRef, dir: &str, _commit: &str) -> Result<Vec<String>> {
            self.dirs
                .get(dir)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404: {dir}"))
        }
    }

    #[test]
    fn classifies_by_path_pattern() {
        assert!(is_source_file("svc/src/main/java/com/acme/Widget.java"));
        assert!(!is_source_file("svc/src/main/java/com/acme/Widget.kt"));
        assert!(is_test_file("svc/src/test/java/com/acme/WidgetTest.java"));
        assert!(!is_test_file("svc/src/main/java/com/acme/Widget.java"));
        assert!(is_migration_file("svc/src/main/resources/db/changelog/db.changelog-master.xml"));
        assert!(is_migration_file("liquibase/0001-init.sql"));
        assert!(!is_migration_file("svc/src/main/java/com/acme/Widget.java"));
        // case-insensitive, backslash-tolerant
        assert!(is_source_file("svc\\SRC\\MAIN\\JAVA\\com\\acme\\Widget.JAVA"));
    }

    #[test]
    fn mirrors_package_dirs() {
        assert_eq!(
            mirror_package_dir("svc/src/main/java/com/acme/Widget.java", "main", "test"),
            "svc/src/test/java/com/acme"
        );
        assert_eq!(
            mirror_package_dir("svc/src/test/java/com/acme/WidgetTest.java", "test", "main"),
            "svc/src/main/java/com/acme"
        );
    }

    #[test]
    fn strips_test_suffixes_case_insensitively() {
        assert_eq!(strip_test_suffix("WidgetTest"), "Widget");
        assert_eq!(strip_test_suffix("WidgetTests"), "Widget");
        assert_eq!(strip_test_suffix("Widget"), "Widget");
    }

    #[test]
    fn changelog_sorts_before_changesets() {
        let mut files = vec![
            TextRef { path: "db/changeset/0002-b.xml".into(), content: String::new() },
            TextRef { path: "db/changelog/master.xml".into(), content: String::new() },
            TextRef { path: "db/changeset/0001-a.xml".into(), content: String::new() },
        ];
        sort_migrations_changelog_first(&mut files);
        assert_eq!(files[0].path, "db/changelog/master.xml");
        assert_eq!(files[1].path, "db/changeset/0001-a.xml");
        assert_eq!(files[2].path, "db/changeset/0002-b.xml");
    }

    #[tokio::test]
    async fn loads_matching_tests_for_a_source_file() {
        let mut vcs = FakeVcs::default();
        vcs.dirs.insert(
            "svc/src/test/java/com/acme".into(),
            vec![
                "svc/src/test/java/com/acme/WidgetTest.java".into(),
                "svc/src/test/java/com/acme/WidgetIntegrationTest.java".into(),
                "svc/src/test/java/com/acme/OtherTest.java".into(),
                "svc/src/test/java/com/acme/WidgetHelper.java".into(),
            ],
        );
        vcs.files.insert(
            "svc/src/test/java/com/acme/WidgetTest.java".into(),
            "class WidgetTest {}".into(),
        );
        vcs.files.insert(
            "svc/src/test/java/com/acme/WidgetIntegrationTest.java".into(),
            "class WidgetIntegrationTest {}".into(),
        );

        let config = test_config();
        let loader = ContextLoader::new(&vcs, &config);
        let bundle = loader
            .load_bundle(&pr(), &[], "svc/src/main/java/com/acme/Widget.java")
            .await;

        let paths: Vec<&str> = bundle.related_tests.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "svc/src/test/java/com/acme/WidgetTest.java",
                "svc/src/test/java/com/acme/WidgetIntegrationTest.java",
            ]
        );
        assert!(bundle.warnings.is_empty());
    }

    #[tokio::test]
    async fn exact_source_match_beats_fallback() {
        let mut vcs = FakeVcs::default();
        vcs.dirs.insert(
            "svc/src/main/java/com/acme".into(),
            vec![
                "svc/src/main/java/com/acme/Widget.java".into(),
                "svc/src/main/java/com/acme/Unrelated.java".into(),
            ],
        );
        vcs.files.insert(
            "svc/src/main/java/com/acme/Widget.java".into(),
            "class Widget {}".into(),
        );

        let config = test_config();
        let loader = ContextLoader::new(&vcs, &config);
        let bundle = loader
            .load_bundle(&pr(), &[], "svc/src/test/java/com/acme/WidgetTest.java")
            .await;

        assert_eq!(bundle.related_sources.len(), 1);
        assert_eq!(bundle.related_sources[0].path, "svc/src/main/java/com/acme/Widget.java");
    }

    #[tokio::test]
    async fn fetch_failure_drops_file_and_records_warning() {
        let mut vcs = FakeVcs::default();
        vcs.dirs.insert(
            "svc/src/test/java/com/acme".into(),
            vec!["svc/src/test/java/com/acme/WidgetTest.java".into()],
        );
        // no file content registered: the fetch will fail

        let config = test_config();
        let loader = ContextLoader::new(&vcs, &config);
        let bundle = loader
            .load_bundle(&pr(), &[], "svc/src/main/java/com/acme/Widget.java")
            .await;

        assert!(bundle.related_tests.is_empty());
        assert_eq!(
            bundle.warnings,
            vec!["RELATED_TESTS_FETCH_FAILED:svc/src/test/java/com/acme/WidgetTest.java".to_string()]
        );
    }

    #[tokio::test]
    async fn migration_context_prefers_session_content_and_sorts() {
        let vcs = FakeVcs::default();
        let changed = vec![
            {
                let mut f = ChangedFile::new(
                    "svc/src/main/resources/db/changeset/0001-add.xml".into(),
                    ChangeType::Added,
                    5,
                    0,
                );
                f.diff_text = Some("diff of changeset".into());
                f
            },
            {
                let mut f = ChangedFile::new(
                    "svc/src/main/resources/db/changelog/master.xml".into(),
                    ChangeType::Modified,
                    1,
                    0,
                );
                f.content_at_head = Some("changelog content".into());
                f
            },
            ChangedFile::new("svc/src/main/java/com/acme/Widget.java".into(), ChangeType::Modified, 1, 1),
        ];

        let config = test_config();
        let loader = ContextLoader::new(&vcs, &config);
        let bundle = loader
            .load_bundle(&pr(), &changed, "svc/src/main/resources/db/changeset/0001-add.xml")
            .await;

        assert_eq!(bundle.related_migrations.len(), 2);
        assert_eq!(
            bundle.related_migrations[0].path,
            "svc/src/main/resources/db/changelog/master.xml"
        );
        assert_eq!(bundle.related_migrations[0].content, "changelog content");
        assert_eq!(bundle.related_migrations[1].content, "diff of changeset");
    }

    #[tokio::test]
    async fn migration_without_content_is_skipped_when_fallback_disabled() {
        let vcs = FakeVcs::default();
        let changed = vec![ChangedFile::new(
            "db/liquibase/0001-init.sql".into(),
            ChangeType::Added,
            10,
            0,
        )];

        let config = test_config();
        let loader = ContextLoader::new(&vcs, &config);
        let bundle = loader
            .load_bundle(&pr(), &changed, "db/liquibase/0001-init.sql")
            .await;

        assert!(bundle.related_migrations.is_empty());
        assert!(bundle.warnings.is_empty());
    }
}
