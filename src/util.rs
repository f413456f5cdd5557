use sha2::{Digest, Sha256};

pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Hex SHA-256 of `content`, cut to `len` characters.
pub fn sha256_prefix(content: &[u8], len: usize) -> String {
    let digest = Sha256::digest(content);
    let hex = format!("{:x}", digest);
    hex.chars().take(len).collect()
}

/// First line of a snippet, shortened for log and terminal output.
pub fn preview_line(code: &str, max: usize) -> String {
    let first = code.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let more = code.trim().lines().count() > 1;
    let line = truncate(first.trim(), max);
    if more && !line.ends_with("...") {
        format!("{} ...", line)
    } else {
        line
    }
}
