const DELIMITER: &str = "---";

/// Splits a `---` delimited header from the body that follows it.
///
/// Returns `None` when the text does not open with a delimiter line or the
/// header is never closed.
pub fn split_front_matter(content: &str) -> Option<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\n', '\r']) == DELIMITER {
            let header = rest[..offset].trim_end_matches(['\n', '\r']);
            let body = &rest[offset + line.len()..];
            return Some((header, body));
        }
        offset += line.len();
    }
    None
}

pub fn join_front_matter(header: &str, body: &str) -> String {
    let mut out = String::with_capacity(header.len() + body.len() + 8);
    out.push_str("---\n");
    out.push_str(header);
    if !header.is_empty() && !header.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("---\n");
    out.push_str(body);
    out
}
