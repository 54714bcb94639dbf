use std::path::Path;

/// Longest file name accepted after sanitization, in bytes.
pub const MAX_FILENAME_LEN: usize = 255;

/// Sanitizes a client-supplied file name so it can be joined onto a local or remote
/// directory without escaping it.
///
/// Directory components are dropped, whitespace and separators become `_`, and only
/// ASCII alphanumerics plus `.`, `-` and `_` survive. Leading and trailing dots and
/// underscores are trimmed, so hidden files and `..` collapse. The result fits in
/// `max_len` bytes: long names lose the end of their stem, the extension is kept.
/// Returns `None` when nothing usable is left.
pub fn sanitize_filename(filename: &str, max_len: usize) -> Option<String> {
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path components stripped from uploaded filename: {:?}", filename);
    }

    // Take the last path component regardless of the client's separator style.
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let mut sanitized = String::with_capacity(name.len());
    let mut pending_separator = false;
    for c in name.chars() {
        if c.is_whitespace() || c.is_control() {
            pending_separator = true;
            continue;
        }
        if pending_separator && !sanitized.is_empty() {
            sanitized.push('_');
        }
        pending_separator = false;
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            sanitized.push(c);
        }
    }

    let trimmed = sanitized.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        return None;
    }

    Some(truncate_keeping_extension(trimmed, max_len))
}

// Input is ASCII after sanitization, so byte offsets are char boundaries.
fn truncate_keeping_extension(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot < max_len => {
            let (stem, extension) = name.split_at(dot);
            let stem = stem[..max_len - extension.len()].trim_end_matches(['.', '_']);
            if stem.is_empty() {
                name[..max_len].to_string()
            } else {
                format!("{}{}", stem, extension)
            }
        }
        _ => name[..max_len].to_string(),
    }
}

/// Base name without its final extension, used as the manifest key.
pub fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
        .to_string()
}

/// Quotes a value for a POSIX shell command line.
pub fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}

/// Escapes text for interpolation into HTML element content or attributes.
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitize(name: &str) -> Option<String> {
        sanitize_filename(name, MAX_FILENAME_LEN)
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize("data.json").as_deref(), Some("data.json"));
        assert_eq!(sanitize("my file.json").as_deref(), Some("my_file.json"));
        assert_eq!(
            sanitize("train<set>.jsonl").as_deref(),
            Some("trainset.jsonl")
        );
        assert_eq!(sanitize("ข้อมูล.json").as_deref(), Some("json"));

        // Path traversal
        assert_eq!(sanitize("../../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(
            sanitize("..\\..\\windows\\system32").as_deref(),
            Some("system32")
        );

        // Hidden files lose their leading dot
        assert_eq!(sanitize(".env").as_deref(), Some("env"));

        // Nothing left
        assert_eq!(sanitize(""), None);
        assert_eq!(sanitize(".."), None);
        assert_eq!(sanitize("dir/"), None);
        assert_eq!(sanitize("\u{0}\u{7}"), None);
    }

    #[test]
    fn test_sanitize_filename_truncates() {
        let long = format!("{}.json", "a".repeat(400));
        let sanitized = sanitize(&long).unwrap();
        assert_eq!(sanitized.len(), MAX_FILENAME_LEN);
        assert!(sanitized.ends_with("a.json"));
    }

    #[test]
    fn test_sanitize_filename_keeps_extension() {
        let name = format!("{}.json", "a".repeat(245));
        let sanitized = sanitize_filename(&name, 239).unwrap();
        assert_eq!(sanitized, format!("{}.json", "a".repeat(234)));

        // Short names are untouched
        assert_eq!(
            sanitize_filename("data.json", 239).as_deref(),
            Some("data.json")
        );

        // No usable extension: plain cut
        let bare = "b".repeat(300);
        assert_eq!(sanitize_filename(&bare, 239).unwrap().len(), 239);
        let huge_extension = format!("x.{}", "c".repeat(300));
        assert_eq!(
            sanitize_filename(&huge_extension, 239).unwrap().len(),
            239
        );

        // Separators left dangling by the cut are dropped
        let name = format!("{}_{}.json", "a".repeat(233), "b".repeat(10));
        assert_eq!(
            sanitize_filename(&name, 239).unwrap(),
            format!("{}.json", "a".repeat(233))
        );
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("data.json"), "data");
        assert_eq!(file_stem("archive.tar.gz"), "archive.tar");
        assert_eq!(file_stem("README"), "README");
    }

    #[test]
    fn test_sh_quote() {
        assert_eq!(sh_quote("/tmp/a b.sh"), "'/tmp/a b.sh'");
        assert_eq!(sh_quote("it's"), r#"'it'"'"'s'"#);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<b>\"Llama\" & 'co'</b>"),
            "&lt;b&gt;&quot;Llama&quot; &amp; &#x27;co&#x27;&lt;/b&gt;"
        );
    }
}
