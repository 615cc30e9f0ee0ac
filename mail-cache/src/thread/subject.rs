//! Subject normalization, used to gather threads whose messages
//! lost their References and In-Reply-To headers.

const REPLY_PREFIXES: [&str; 4] = ["re:", "fwd:", "fw:", "aw:"];

/// Normalize a subject for threading comparison.
///
/// The subject is lower-cased, reply and forward markers (`Re:`,
/// `Fwd:`, `Fw:`, `Aw:`) are repeatedly stripped from its start, and
/// whitespaces are collapsed.
pub fn normalize_subject(subject: &str) -> String {
    let lowercase = subject.to_lowercase();
    let mut normalized = lowercase.trim();

    'strip: loop {
        for prefix in REPLY_PREFIXES {
            if let Some(rest) = normalized.strip_prefix(prefix) {
                normalized = rest.trim_start();
                continue 'strip;
            }
        }
        break;
    }

    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Return `true` if the subject starts with a reply marker.
pub fn has_reply_prefix(subject: &str) -> bool {
    let subject = subject.trim_start();

    subject
        .get(..3)
        .map(|prefix| prefix.eq_ignore_ascii_case("re:"))
        .unwrap_or(false)
}
