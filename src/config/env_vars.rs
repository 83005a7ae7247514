use std::env;
use std::path::PathBuf;

/// Expand a leading `~` and `$VAR` / `${VAR}` references in a local path.
///
/// Unset variables expand to nothing. A `$` not followed by a name is kept.
pub fn expand_local_path(path: &str) -> PathBuf {
    let expanded = expand_env_vars(path);

    let home = env::var("HOME").ok();
    match (expanded.strip_prefix('~'), home) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
            PathBuf::from(format!("{}{}", home, rest))
        }
        _ => PathBuf::from(expanded),
    }
}

fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => {
                    result.push_str(&env::var(&braced[..end]).unwrap_or_default());
                    rest = &braced[end + 1..];
                }
                None => {
                    // Unterminated, keep verbatim
                    result.push_str(&rest[pos..]);
                    rest = "";
                }
            }
            continue;
        }

        let name_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        if name_len == 0 {
            result.push('$');
        } else {
            result.push_str(&env::var(&after[..name_len]).unwrap_or_default());
        }
        rest = &after[name_len..];
    }

    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dollar_and_brace_styles() {
        env::set_var("SCP_PUSH_TEST_KEYDIR", "/keys");
        assert_eq!(
            expand_local_path("$SCP_PUSH_TEST_KEYDIR/id_rsa"),
            PathBuf::from("/keys/id_rsa")
        );
        assert_eq!(
            expand_local_path("${SCP_PUSH_TEST_KEYDIR}_old/id_rsa"),
            PathBuf::from("/keys_old/id_rsa")
        );
        env::remove_var("SCP_PUSH_TEST_KEYDIR");
    }

    #[test]
    fn test_unset_and_malformed() {
        assert_eq!(expand_local_path("/a/$SCP_PUSH_TEST_UNSET/b"), PathBuf::from("/a//b"));
        assert_eq!(expand_local_path("/cost/$5"), PathBuf::from("/cost/"));
        assert_eq!(expand_local_path("/a/$/b"), PathBuf::from("/a/$/b"));
        assert_eq!(expand_local_path("/a/${OPEN"), PathBuf::from("/a/${OPEN"));
    }

    #[test]
    fn test_tilde() {
        if let Ok(home) = env::var("HOME") {
            assert_eq!(
                expand_local_path("~/.ssh/id_ed25519"),
                PathBuf::from(format!("{}/.ssh/id_ed25519", home))
            );
        }
        assert_eq!(expand_local_path("~other/key"), PathBuf::from("~other/key"));
    }
}
