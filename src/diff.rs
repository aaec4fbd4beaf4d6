//! Unified-diff splitting and path normalization.
//!
//! A PR diff arrives as one combined blob. Everything downstream (per-file
//! review, context loading, the UI's file lookups) works on a per-file map,
//! so the splitter reconstructs each file's section and keys it by the
//! normalized destination path. Paths from diff headers, the session file
//! list, and lookup requests all pass through the same normalizer, otherwise
//! file-to-diff matching silently fails.

use std::collections::BTreeMap;

/// Canonicalize a file path for map keys and lookups: trim, strip
/// surrounding quotes, strip a leading `a/` or `b/` (diff convention), strip
/// leading slashes, backslashes to forward slashes.
pub fn normalize_path(path: &str) -> String {
    let p = path.trim().trim_matches('"').replace('\\', "/");
    let p = p
        .strip_prefix("a/")
        .or_else(|| p.strip_prefix("b/"))
        .unwrap_or(&p);
    p.trim_start_matches('/').to_string()
}

/// Lowercased extension of a normalized path, empty if there is none.
pub fn ext_of(path: &str) -> String {
    let p = normalize_path(path);
    match p.rfind('.') {
        Some(i) => p[i + 1..].to_lowercase(),
        None => String::new(),
    }
}

/// Split a combined unified diff into normalized-path -> section text.
///
/// Sections start at `diff --git ` lines; lines before the first section are
/// preamble and dropped. Within a section, `rename to` wins the key, then
/// the `+++` path, then the `---` path; `/dev/null` never becomes a key. A
/// section with no usable path candidate (a pure mode change, or a header
/// that would not parse) is dropped rather than failing the whole blob.
pub fn split_unified_diff(blob: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if blob.is_empty() {
        return map;
    }

    let mut buf: Vec<&str> = Vec::new();
    let mut a_path: Option<String> = None;
    let mut b_path: Option<String> = None;
    let mut rename_to: Option<String> = None;

    fn pick_key(
        rename_to: &Option<String>,
        b_path: &Option<String>,
        a_path: &Option<String>,
    ) -> Option<String> {
        if let Some(r) = rename_to {
            return Some(normalize_path(r));
        }
        if let Some(b) = b_path
            && b != "/dev/null"
        {
            return Some(normalize_path(b));
        }
        if let Some(a) = a_path
            && a != "/dev/null"
        {
            return Some(normalize_path(a));
        }
        None
    }

    fn flush(
        buf: &mut Vec<&str>,
        a_path: &mut Option<String>,
        b_path: &mut Option<String>,
        rename_to: &mut Option<String>,
        map: &mut BTreeMap<String, String>,
    ) {
        if !buf.is_empty()
            && let Some(key) = pick_key(rename_to, b_path, a_path)
        {
            map.insert(key, buf.join("\n"));
        }
        buf.clear();
        *a_path = None;
        *b_path = None;
        *rename_to = None;
    }

    for line in blob.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            flush(&mut buf, &mut a_path, &mut b_path, &mut rename_to, &mut map);
            buf.push(line);

            // "diff --git a/foo b/bar" - the last space separates the two
            // path tokens (paths with spaces arrive quoted).
            if let Some((a, b)) = rest.rsplit_once(' ') {
                a_path = Some(a.trim().to_string());
                b_path = Some(b.trim().to_string());
            }
            continue;
        }

        if buf.is_empty() {
            continue; // preamble before the first section
        }

        buf.push(line);

        if let Some(rest) = line.strip_prefix("rename to ") {
            rename_to = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("--- ") {
            a_path = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            b_path = Some(rest.trim().to_string());
        }
    }

    flush(&mut buf, &mut a_path, &mut b_path, &mut rename_to, &mut map);
    map
}

/// Look up a file's diff section, tolerating prefix mismatches between the
/// diff keys and the caller's path: direct hit, then normalized equality,
/// then "one path ends with the other".
pub fn find_diff_for_path<'a>(map: &'a BTreeMap<String, String>, path: &str) -> Option<&'a str> {
    let wanted = normalize_path(path);

    if let Some(v) = map.get(path).or_else(|| map.get(&wanted)) {
        return Some(v);
    }

    for (k, v) in map {
        if normalize_path(k) == wanted {
            return Some(v);
        }
    }
    for (k, v) in map {
        let nk = normalize_path(k);
        if nk.ends_with(&wanted) || wanted.ends_with(&nk) {
            return Some(v);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        for p in [
            "a/foo/bar.java",
            "b/foo/bar.java",
            "foo/bar.java",
            "  \"a/spaced path/File.java\"  ",
            "/leading/slash.rs",
            "win\\style\\path.cs",
        ] {
            let once = normalize_path(p);
            assert_eq!(normalize_path(&once), once, "not idempotent for {p:?}");
        }
    }

    #[test]
    fn normalize_strips_diff_prefixes() {
        assert_eq!(normalize_path("a/foo/bar.java"), "foo/bar.java");
        assert_eq!(normalize_path("b/foo/bar.java"), "foo/bar.java");
        assert_eq!(normalize_path("foo/bar.java"), "foo/bar.java");
        assert_eq!(normalize_path("\"a/foo/bar.java\""), "foo/bar.java");
        assert_eq!(normalize_path("win\\style.cs"), "win/style.cs");
    }

    #[test]
    fn ext_of_lowercases() {
        assert_eq!(ext_of("a/Foo/Bar.JAVA"), "java");
        assert_eq!(ext_of("noext"), "");
        assert_eq!(ext_of("x.min.js"), "js");
    }

    #[test]
    fn splits_modified_and_added_sections_without_bleed() {
        let blob = concat!(
            "diff --git a/src/One.java b/src/One.java\n",
            "index 111..222 100644\n",
            "--- a/src/One.java\n",
            "+++ b/src/One.java\n",
            "@@ -1,2 +1,2 @@\n",
            "-old one\n",
            "+new one\n",
            "diff --git a/src/Two.java b/src/Two.java\n",
            "new file mode 100644\n",
            "--- /dev/null\n",
            "+++ b/src/Two.java\n",
            "@@ -0,0 +1,1 @@\n",
            "+hello two\n",
        );

        let map = split_unified_diff(blob);
        assert_eq!(map.len(), 2);

        let one = &map["src/One.java"];
        assert!(one.contains("+new one"));
        assert!(!one.contains("hello two"));

        let two = &map["src/Two.java"];
        assert!(two.contains("new file mode"));
        assert!(two.contains("+hello two"));
        assert!(!two.contains("old one"));
    }

    #[test]
    fn rename_section_keys_by_destination() {
        let blob = concat!(
            "diff --git a/old/Path.java b/new/Path.java\n",
            "similarity index 100%\n",
            "rename from old/Path.java\n",
            "rename to new/Path.java\n",
        );
        let map = split_unified_diff(blob);
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("new/Path.java"));
    }

    #[test]
    fn deletion_keys_by_old_path() {
        let blob = concat!(
            "diff --git a/gone/File.java b/gone/File.java\n",
            "deleted file mode 100644\n",
            "--- a/gone/File.java\n",
            "+++ /dev/null\n",
            "@@ -1,1 +0,0 @@\n",
            "-bye\n",
        );
        let map = split_unified_diff(blob);
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("gone/File.java"));
    }

    #[test]
    fn preamble_before_first_section_is_dropped() {
        let blob = concat!(
            "From: someone\n",
            "Subject: patch\n",
            "diff --git a/x.txt b/x.txt\n",
            "--- a/x.txt\n",
            "+++ b/x.txt\n",
            "@@ -1,1 +1,1 @@\n",
            "-old\n",
            "+new\n",
        );
        let map = split_unified_diff(blob);
        assert_eq!(map.len(), 1);
        assert!(!map["x.txt"].contains("Subject"));
        assert!(map["x.txt"].starts_with("diff --git"));
    }

    #[test]
    fn single_section_round_trip() {
        let blob = "diff --git a/x.txt b/x.txt\n--- a/x.txt\n+++ b/x.txt\n@@ -1,1 +1,1 @@\n-old\n+new\n";
        let map = split_unified_diff(blob);
        assert_eq!(map.len(), 1);
        assert_eq!(
            map["x.txt"],
            "diff --git a/x.txt b/x.txt\n--- a/x.txt\n+++ b/x.txt\n@@ -1,1 +1,1 @@\n-old\n+new"
        );
    }

    #[test]
    fn crlf_blobs_are_handled() {
        let blob = "diff --git a/x.txt b/x.txt\r\n--- a/x.txt\r\n+++ b/x.txt\r\n@@ -1,1 +1,1 @@\r\n-old\r\n+new\r\n";
        let map = split_unified_diff(blob);
        assert!(map["x.txt"].contains("+new"));
        assert!(!map["x.txt"].contains('\r'));
    }

    #[test]
    fn empty_blob_yields_empty_map() {
        assert!(split_unified_diff("").is_empty());
    }

    #[test]
    fn find_diff_tolerates_prefix_mismatch() {
        let blob = concat!(
            "diff --git a/service/src/main/java/com/acme/A.java b/service/src/main/java/com/acme/A.java\n",
            "--- a/service/src/main/java/com/acme/A.java\n",
            "+++ b/service/src/main/java/com/acme/A.java\n",
            "@@ -1,1 +1,1 @@\n",
            "-x\n",
            "+y\n",
        );
        let map = split_unified_diff(blob);

        // exact and normalized hits
        assert!(find_diff_for_path(&map, "service/src/main/java/com/acme/A.java").is_some());
        assert!(find_diff_for_path(&map, "a/service/src/main/java/com/acme/A.java").is_some());
        // suffix-tolerant hit: index system dropped the leading module dir
        assert!(find_diff_for_path(&map, "src/main/java/com/acme/A.java").is_some());
        assert!(find_diff_for_path(&map, "com/other/B.java").is_none());
    }
}
