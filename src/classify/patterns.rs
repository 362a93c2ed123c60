//! Built-in keyword sets.
//!
//! Patterns are compiled case-insensitively and tried in order; the first
//! pattern that matches decides the classification. Error patterns are
//! always checked before warning patterns.
//!
//! Built-in patterns run against the line with `_` read as a space, so `\b`
//! also splits `fatal_error` or `ERR_CONNECTION_REFUSED` into words.

/// Patterns that flag a line as an error.
pub const ERROR_PATTERNS: &[&str] = &[
    r"\berrors?\b",
    // CamelCase error types such as `DbError` or `TypeError`
    r"(?-i:[a-z]Error)s?\b",
    r"\bfail(?:s|ed|ure|ures|ing)?\b",
    // Java/.NET style exception types (`IOException`, `NullPointerException`)
    r"exceptions?\b",
    r"\bcritical\b",
    r"\bfatal\b",
    r"\bpanic(?:s|ked)?\b",
    r"\bcrash(?:es|ed|ing)?\b",
    r"\b(?:timeout|timed[\s-]out|time-out)s?\b",
    r"\brefused\b",
    r"\bdenied\b",
    r"\bunauthori[sz]ed\b",
    r"\bforbidden\b",
    r"\binvalid\b",
    r"\bcorrupt(?:ed|ion)?\b",
    r"\bout of memory\b",
    r"\boom(?:kill(?:s|ed|er)?)?\b",
    r"\bsegfault\b",
    r"\bsegmentation fault\b",
    r"\babort(?:s|ed|ing)?\b",
    // HTTP 5xx: access-log status field, `HTTP/1.1 503`, `status=502`, `code: 500`
    r#"(?:\bHTTP/\d(?:\.\d)?"?\s+|\bstatus(?:\s?code)?[=:\s]\s*|\bcode[=:\s]\s*|"\s+)5\d{2}\b"#,
    r"\btraceback\b",
    r"\bstack\s*trace\b",
    // Stack frame shapes: Java/JS, Python, Go, Rust
    r"^\s+at\s+[\w$.<>\[\]/]+\s*\(",
    r#"^\s+File\s+"[^"]+",\s+line\s+\d+"#,
    r"^goroutine\s+\d+\s+\[",
    r"\bpanicked at\b",
    r"^Caused by:",
];

/// Patterns that flag a line as a warning.
pub const WARNING_PATTERNS: &[&str] = &[
    r"\bwarn(?:s|ed|ing|ings)?\b",
    r"\bdeprecat(?:ed|ion)\b",
    r"\bretr(?:y|ies)\b",
    r"\bslow(?:er|ness)?\b",
    r"\blatency\b",
    r"\bdelay(?:ed)?\b",
    r"\bthrottl(?:e|es|ed|ing)\b",
    r"\brate[\s_-]?limit(?:ed|ing)?\b",
    r"\bhigh[\s_-]?(?:cpu|memory|mem|load)\b",
    r"\blow[\s_-]?(?:disk|space|memory)\b",
];
