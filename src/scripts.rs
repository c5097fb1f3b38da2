//! Shell programs executed inside companion containers (spec §4.4).

/// Git-diff-extractor script run inside the patch-extractor container.
///
/// `/workdir/old` holds the sanitized baseline archive (copied in via
/// `put_archive` before this runs), `/workdir/new` is the read-only mount of
/// the shared workspace volume, and `/workdir/meta` is the scratch git
/// repository used purely to diff the two trees against each other.
///
/// Emits the unified, binary-safe, rename-aware diff on stdout. The
/// "nothing to commit" message from the second commit is the caller's signal
/// that there is no patch to return — it is not treated as failure.
pub const GIT_DIFF_EXTRACTOR_SCRIPT: &str = r#"set -euo pipefail

OLD="/workdir/old"
NEW="/workdir/new"
META="/workdir/meta"

rm -rf "$META" "$OLD/.git" "$NEW/.git"
mkdir -p "$META"

printf '.git\n.git/\n' > /workdir/.git-excludes

git -C "$META" init -q
git -C "$META" config user.name daiv-sandbox
git -C "$META" config user.email daiv-sandbox@local
git -C "$META" config core.excludesFile /workdir/.git-excludes

git -C "$META" --work-tree="$OLD" add -A
git -C "$META" --work-tree="$OLD" commit -qm baseline

BASE_COMMIT=$(git -C "$META" rev-parse HEAD)

git -C "$META" --work-tree="$NEW" add -A
git -C "$META" --work-tree="$NEW" commit -qm post

git -C "$META" -c diff.renames=true diff -M --binary "$BASE_COMMIT"..HEAD
"#;

/// Substring `git commit` emits when there is nothing to commit — the
/// caller's signal to treat a non-zero exit as "no changes" rather than
/// [`crate::error::SandboxError::PatchFailed`].
pub const NOTHING_TO_COMMIT_MARKER: &str = "nothing to commit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_purges_and_recreates_meta_but_not_new() {
        assert!(GIT_DIFF_EXTRACTOR_SCRIPT.contains(r#"rm -rf "$META" "$OLD/.git" "$NEW/.git""#));
        assert!(!GIT_DIFF_EXTRACTOR_SCRIPT.contains(r#"rm -rf "$NEW""#));
    }

    #[test]
    fn script_commits_old_before_new() {
        let old_pos = GIT_DIFF_EXTRACTOR_SCRIPT.find("work-tree=\"$OLD\"").expect("old commit");
        let new_pos = GIT_DIFF_EXTRACTOR_SCRIPT.find("work-tree=\"$NEW\"").expect("new commit");
        assert!(old_pos < new_pos);
    }

    #[test]
    fn script_enables_rename_detection_and_binary_diff() {
        assert!(GIT_DIFF_EXTRACTOR_SCRIPT.contains("diff.renames=true"));
        assert!(GIT_DIFF_EXTRACTOR_SCRIPT.contains("--binary"));
        assert!(GIT_DIFF_EXTRACTOR_SCRIPT.contains("-M"));
    }
}
