//! URL path normalization.

/// Return the canonical form of a URL path.
///
/// - Multiple slashes collapse into one
/// - `.` elements are removed
/// - `..` removes the preceding element (never climbs above the root)
/// - A trailing slash is preserved
/// - The result always begins with `/`
pub fn clean_path(p: &str) -> String {
    if p.is_empty() {
        return "/".to_string();
    }

    let trailing = p.len() > 1 && p.ends_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in p.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }

    let mut out = String::with_capacity(p.len() + 1);
    for part in &parts {
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    } else if trailing {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_path() {
        let cases = [
            ("", "/"),
            ("/", "/"),
            ("abc", "/abc"),
            ("/abc/", "/abc/"),
            ("//abc//def", "/abc/def"),
            ("/abc/./def", "/abc/def"),
            ("/abc/../def", "/def"),
            ("/../..//x/", "/x/"),
            ("/a/b/..", "/a"),
        ];
        for (input, expected) in cases {
            assert_eq!(clean_path(input), expected, "input {input:?}");
        }
    }
}
