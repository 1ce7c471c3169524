// Workspace-relative path rules: NFKC normalization, `..` rejection, 512 char max.
//
// Tool arguments name files relative to the workspace root. The root itself is
// the empty string, so `""`, `"."` and `"/"` all normalize to it.

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Maximum allowed path length in characters.
const MAX_PATH_CHARS: usize = 512;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path exceeds maximum length of {MAX_PATH_CHARS} characters")]
    TooLong,

    #[error("path escapes the workspace root")]
    Escape,

    #[error("path contains null byte")]
    NullByte,

    #[error("path contains invalid component: {0}")]
    InvalidComponent(String),
}

/// Normalize a workspace-relative path.
///
/// Rules:
/// - Apply Unicode NFKC normalization
/// - Convert `\` separators to `/` and collapse repeats
/// - Strip leading and trailing `/`
/// - Drop `.` components
/// - Reject `..` components, null bytes, whitespace-only components
/// - Enforce max 512 character limit (after normalization)
pub fn normalize_relative(input: &str) -> Result<String, PathError> {
    if input.contains('\0') {
        return Err(PathError::NullByte);
    }

    let normalized: String = input.nfkc().collect();
    let unified = normalized.replace('\\', "/");

    let mut components = Vec::new();
    for component in unified.split('/') {
        match component {
            "" | "." => continue,
            ".." => return Err(PathError::Escape),
            other if other.trim().is_empty() => {
                return Err(PathError::InvalidComponent("(whitespace-only component)".to_string()));
            }
            other => components.push(other),
        }
    }

    let result = components.join("/");
    if result.chars().count() > MAX_PATH_CHARS {
        return Err(PathError::TooLong);
    }
    Ok(result)
}

/// Appends a single directory entry name to a normalized relative path.
pub fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_path_is_unchanged() {
        assert_eq!(normalize_relative("src/main.rs").unwrap(), "src/main.rs");
    }

    #[test]
    fn root_spellings_normalize_to_empty() {
        for root in ["", ".", "/", "./", "//."] {
            assert_eq!(normalize_relative(root).unwrap(), "", "root spelling {root:?}");
        }
    }

    #[test]
    fn backslashes_and_repeats_collapse() {
        assert_eq!(normalize_relative("src\\\\nested//lib.rs/").unwrap(), "src/nested/lib.rs");
    }

    #[test]
    fn dot_components_are_dropped() {
        assert_eq!(normalize_relative("./src/./lib.rs").unwrap(), "src/lib.rs");
    }

    #[test]
    fn unicode_is_nfkc_normalized() {
        assert_eq!(normalize_relative("docs/\u{FB01}le.md").unwrap(), "docs/file.md");
        let decomposed = normalize_relative("caf\u{0065}\u{0301}.rs").unwrap();
        assert_eq!(decomposed, normalize_relative("café.rs").unwrap());
    }

    #[test]
    fn parent_components_are_rejected() {
        assert_eq!(normalize_relative("../etc/passwd"), Err(PathError::Escape));
        assert_eq!(normalize_relative("src\\..\\..\\secret"), Err(PathError::Escape));
    }

    #[test]
    fn null_bytes_are_rejected() {
        assert_eq!(normalize_relative("src/a\0.rs"), Err(PathError::NullByte));
    }

    #[test]
    fn whitespace_components_are_rejected() {
        assert!(matches!(
            normalize_relative("src/   /lib.rs"),
            Err(PathError::InvalidComponent(_))
        ));
    }

    #[test]
    fn length_limit_applies_after_normalization() {
        assert!(normalize_relative(&"a".repeat(512)).is_ok());
        assert_eq!(normalize_relative(&"a".repeat(513)), Err(PathError::TooLong));
        // Collapsed separators do not count.
        assert!(normalize_relative(&format!("{}//", "a".repeat(512))).is_ok());
    }

    #[test]
    fn dotfiles_and_triple_dots_are_names() {
        assert_eq!(normalize_relative(".gitignore").unwrap(), ".gitignore");
        assert_eq!(normalize_relative("docs/...").unwrap(), "docs/...");
    }

    #[test]
    fn join_handles_root_parent() {
        assert_eq!(join_relative("", "Cargo.toml"), "Cargo.toml");
        assert_eq!(join_relative("src", "lib.rs"), "src/lib.rs");
    }
}
