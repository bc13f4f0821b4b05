use std::collections::HashMap;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Applies a rename mapping to an archive entry name.
///
/// The longest matching prefix wins: an exact full-name mapping first, then
/// progressively shorter directory prefixes, with the unmatched remainder
/// carried over. Entry names always use `/`, regardless of platform.
pub fn handle_rename(rename: &HashMap<String, String>, name: &str) -> String {
    if rename.is_empty() {
        return name.to_string();
    }
    if let Some(mapped) = rename.get(name) {
        return mapped.clone();
    }
    let (mut prefix, mut remainder) = split_last(name);
    while !prefix.is_empty() {
        if let Some(mapped) = rename.get(prefix.as_str()) {
            return join(mapped, &remainder);
        }
        let trimmed = prefix.trim_end_matches('/');
        if trimmed != prefix {
            if let Some(mapped) = rename.get(trimmed) {
                return join(mapped, &remainder);
            }
        }
        let (new_prefix, middle) = split_last(trimmed);
        if new_prefix == prefix {
            return name.to_string();
        }
        remainder = join(&middle, &remainder);
        prefix = new_prefix;
    }
    name.to_string()
}

// splits "a/b/c" into ("a/b/", "c"), mirroring path.Split
fn split_last(name: &str) -> (String, String) {
    match name.rfind('/') {
        Some(idx) => (name[..=idx].to_string(), name[idx + 1..].to_string()),
        None => (String::new(), name.to_string()),
    }
}

fn join(prefix: &str, remainder: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return remainder.to_string();
    }
    if remainder.is_empty() {
        return prefix.to_string();
    }
    format!("{prefix}/{remainder}")
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn rename_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_rename_exact_match_wins() {
        let rename = rename_map(&[("old.txt", "new.txt"), ("old", "other")]);
        assert_eq!(handle_rename(&rename, "old.txt"), "new.txt");
    }

    #[test]
    fn test_rename_longest_prefix() {
        let rename = rename_map(&[("a", "x"), ("a/b", "y")]);
        assert_eq!(handle_rename(&rename, "a/b/c.txt"), "y/c.txt");
        assert_eq!(handle_rename(&rename, "a/other/c.txt"), "x/other/c.txt");
    }

    #[test]
    fn test_rename_no_match_passes_through() {
        let rename = rename_map(&[("a/b", "y")]);
        assert_eq!(handle_rename(&rename, "unrelated/file"), "unrelated/file");
        assert_eq!(handle_rename(&HashMap::new(), "same"), "same");
    }
}
