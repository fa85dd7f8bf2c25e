/// Replace every run of whitespace or path separators with a single underscore.
pub fn sanitize_subject(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for ch in name.chars() {
        if ch.is_whitespace() || matches!(ch, '/' | '\\') {
            if !in_run {
                out.push('_');
                in_run = true;
            }
        } else {
            out.push(ch);
            in_run = false;
        }
    }
    out
}

/// `{prefix}_{sanitized subject}_{epoch millis}.pdf`
pub fn export_file_name(prefix: &str, subject: &str, timestamp_millis: i64) -> String {
    format!(
        "{}_{}_{}.pdf",
        prefix,
        sanitize_subject(subject),
        timestamp_millis
    )
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
