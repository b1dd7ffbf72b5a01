//! Deterministic branch and worktree naming for executions.

/// Maximum slug length in characters. The output is pure ASCII, so byte
/// truncation is always safe.
const MAX_SLUG_LEN: usize = 50;

/// Converts an arbitrary string into a slug safe for git branch names:
/// lowercase ASCII letters and digits with single hyphens, trimmed, capped
/// at 50 characters. An empty result becomes "untitled".
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut last_was_hyphen = true; // suppress leading hyphens

    for ch in input.chars() {
        let lowered = ch.to_ascii_lowercase();
        if lowered.is_ascii_lowercase() || lowered.is_ascii_digit() {
            slug.push(lowered);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }

    while slug.ends_with('-') {
        slug.pop();
    }

    if slug.is_empty() {
        return "untitled".to_string();
    }

    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
        while slug.ends_with('-') {
            slug.pop();
        }
    }

    slug
}

/// Short slug built from the first six whitespace-separated words of a task
/// title.
fn title_slug(title: &str) -> String {
    let first_words: Vec<&str> = title.split_whitespace().take(6).collect();
    slugify(&first_words.join(" "))
}

/// Deterministic execution branch name:
/// `bore/<thread-slug>-<task_id>-<title-slug>`.
pub fn execution_branch(thread_name: &str, task_id: i64, task_title: &str) -> String {
    format!(
        "bore/{}-{}-{}",
        slugify(thread_name),
        task_id,
        title_slug(task_title)
    )
}

/// Deterministic worktree directory name for an execution, derived from the
/// same inputs as the branch name.
pub fn worktree_dir_name(thread_name: &str, task_id: i64, task_title: &str) -> String {
    format!(
        "{}-{}-{}",
        slugify(thread_name),
        task_id,
        title_slug(task_title)
    )
}
