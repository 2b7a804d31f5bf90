//! Pattern compiler
//!
//! Compiles a TinTin-style pattern string (or, failing detection, a plain
//! substring literal) into a `regex::Regex` plus enough bookkeeping to
//! substitute `%0..%99` captures back into a template.

use std::sync::OnceLock;

use regex::Regex;

/// How a compiled pattern should be matched against a line.
#[derive(Debug, Clone)]
pub enum CompiledPattern {
    /// Case-sensitive substring containment.
    Literal(String),
    /// A regex compiled from TinTin wildcard syntax.
    Regex(Regex),
}

impl CompiledPattern {
    /// Compile `pattern`, detecting TinTin-style syntax per the documented
    /// trigger rules (unanchored unless `^`/`$` are present in the source).
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        if is_tintin_style(pattern) {
            let translated = tintin_to_regex(pattern);
            Ok(CompiledPattern::Regex(Regex::new(&translated)?))
        } else {
            Ok(CompiledPattern::Literal(pattern.to_string()))
        }
    }

    /// Compile `pattern` anchored with `^...$` and case-insensitive, as used
    /// by alias matching's `tintin` match type.
    pub fn compile_anchored_ci(pattern: &str) -> Result<Regex, regex::Error> {
        let translated = tintin_to_regex(pattern);
        let anchored = format!("(?i)^{translated}$");
        Regex::new(&anchored)
    }

    /// Find the first match in `line`, if any, returning captures as
    /// `(full_match, [group1, group2, ...])` where unmatched groups are `None`.
    pub fn find<'a>(&self, line: &'a str) -> Option<Match<'a>> {
        match self {
            CompiledPattern::Literal(lit) => line.find(lit.as_str()).map(|start| Match {
                start,
                end: start + lit.len(),
                text: &line[start..start + lit.len()],
                groups: Vec::new(),
            }),
            CompiledPattern::Regex(re) => {
                let caps = re.captures(line)?;
                let whole = caps.get(0).unwrap();
                let groups = (1..caps.len())
                    .map(|i| caps.get(i).map(|m| m.as_str().to_string()))
                    .collect();
                Some(Match {
                    start: whole.start(),
                    end: whole.end(),
                    text: whole.as_str(),
                    groups,
                })
            }
        }
    }
}

/// A single match against a line.
pub struct Match<'a> {
    pub start: usize,
    pub end: usize,
    pub text: &'a str,
    pub groups: Vec<Option<String>>,
}

impl Match<'_> {
    /// `%0` is the full match, `%1..%N` are capture groups.
    pub fn capture(&self, n: usize) -> Option<&str> {
        if n == 0 {
            Some(self.text)
        } else {
            self.groups.get(n - 1).and_then(|g| g.as_deref())
        }
    }
}

fn is_tintin_style(pattern: &str) -> bool {
    if pattern.starts_with('^') || pattern.ends_with('$') {
        return true;
    }
    if has_unescaped_braces(pattern) {
        return true;
    }
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'%' {
            let c = bytes[i + 1] as char;
            if "*+?.dDwWsSaAcCpPuUi!".contains(c) || c.is_ascii_digit() {
                return true;
            }
        }
        i += 1;
    }
    false
}

fn has_unescaped_braces(pattern: &str) -> bool {
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' && (i == 0 || bytes[i - 1] != b'%') {
            return true;
        }
        i += 1;
    }
    false
}

/// Character classes for `%d/%D/%w/%W/%s/%S/%a/%A/%p/%P/%u/%U`.
fn char_class(letter: char) -> &'static str {
    match letter {
        'd' => r"[0-9]",
        'D' => r"[^0-9]",
        'w' => r"[A-Za-z0-9_]",
        'W' => r"[^A-Za-z0-9_]",
        's' => r"\s",
        'S' => r"\S",
        'a' => r"[A-Za-z]",
        'A' => r"[^A-Za-z]",
        'p' => r"[[:punct:]]",
        'P' => r"[^[:punct:]]",
        'u' => r"[A-Z]",
        'U' => r"[^A-Z]",
        _ => unreachable!(),
    }
}

fn sgr_class() -> &'static str {
    r"(?:\x1b\[[0-9;]*m)*"
}

/// Translate a TinTin-style pattern string into a `regex`-crate pattern.
fn tintin_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '^' | '$' => {
                out.push(c);
                i += 1;
            }
            '{' => {
                // `{...}` group: content passed through as regex syntax,
                // capturing unless immediately preceded by `%!`.
                let non_capturing = out.ends_with("%!NC_MARK%!");
                if non_capturing {
                    let trimmed_len = out.len() - "%!NC_MARK%!".len();
                    out.truncate(trimmed_len);
                }
                let close = find_matching_brace(&chars, i);
                let inner: String = chars[i + 1..close].iter().collect();
                if non_capturing {
                    out.push_str("(?:");
                } else {
                    out.push('(');
                }
                out.push_str(&inner);
                out.push(')');
                i = close + 1;
            }
            '%' if i + 1 < chars.len() => {
                let next = chars[i + 1];
                match next {
                    '*' => {
                        out.push_str("(.*)");
                        i += 2;
                    }
                    '+' => {
                        if i + 2 < chars.len() && (chars[i + 2].is_ascii_digit() || chars[i + 2] == '.') {
                            // %+min[..max]<type>
                            let (quant, type_char, consumed) = parse_quantified(&chars, i + 2);
                            let class = char_class(type_char);
                            out.push_str(&format!("({class}{quant})"));
                            i += 2 + consumed;
                        } else {
                            out.push_str("(.+)");
                            i += 2;
                        }
                    }
                    '?' => {
                        out.push_str("(.?)");
                        i += 2;
                    }
                    '.' => {
                        out.push_str("(.)");
                        i += 2;
                    }
                    'c' => {
                        out.push_str(sgr_class());
                        i += 2;
                    }
                    'i' | 'I' => {
                        // consumed, no-op: matching defaults case-sensitive.
                        i += 2;
                    }
                    '!' => {
                        if i + 2 < chars.len() && chars[i + 2] == '{' {
                            // Marker consumed by the `{` branch above.
                            out.push_str("%!NC_MARK%!");
                            i += 2;
                        } else if i + 2 < chars.len() {
                            let class_char = chars[i + 2];
                            out.push_str(char_class(class_char));
                            i += 3;
                        } else {
                            i += 2;
                        }
                    }
                    'd' | 'D' | 'w' | 'W' | 's' | 'S' | 'a' | 'A' | 'p' | 'P' | 'u' | 'U' => {
                        let class = char_class(next);
                        out.push_str(&format!("({class}+)"));
                        i += 2;
                    }
                    c if c.is_ascii_digit() => {
                        let mut j = i + 1;
                        while j < chars.len() && chars[j].is_ascii_digit() && j < i + 3 {
                            j += 1;
                        }
                        out.push_str("(.*)");
                        i = j;
                    }
                    _ => {
                        out.push_str(&regex::escape(&next.to_string()));
                        i += 2;
                    }
                }
            }
            _ => {
                out.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }

    out
}

fn find_matching_brace(chars: &[char], open: usize) -> usize {
    let mut depth = 0;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => {}
        }
        i += 1;
    }
    chars.len().saturating_sub(1)
}

/// Parse `%+min[..max]<type>` starting just after `%+`. Returns the regex
/// quantifier string, the type letter, and how many source chars were consumed.
fn parse_quantified(chars: &[char], start: usize) -> (String, char, usize) {
    let mut i = start;
    let mut min = String::new();
    while i < chars.len() && chars[i].is_ascii_digit() {
        min.push(chars[i]);
        i += 1;
    }
    let mut max = String::new();
    if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1] == '.' {
        i += 2;
        while i < chars.len() && chars[i].is_ascii_digit() {
            max.push(chars[i]);
            i += 1;
        }
    }
    // The type letter is wrapped in `<...>`; skip the opening delimiter
    // before reading it and consume the closing one afterward.
    if i < chars.len() && chars[i] == '<' {
        i += 1;
    }
    let type_char = if i < chars.len() { chars[i] } else { 'w' };
    if i < chars.len() {
        i += 1;
    }
    if i < chars.len() && chars[i] == '>' {
        i += 1;
    }
    let quant = if max.is_empty() {
        format!("{{{min}}}")
    } else {
        format!("{{{min},{max}}}")
    };
    (quant, type_char, i - start)
}

/// Substitute `%0..%99` placeholders in `template` using `m`'s captures.
/// Captured values have SGR sequences stripped first; unmatched `%N`
/// placeholders are removed entirely.
pub fn substitute_percent_captures(template: &str, m: &Match) -> String {
    substitute_with(template, '%', |n| m.capture(n).map(strip_sgr))
}

/// Substitute `$0..$N` placeholders (regex alias match type).
pub fn substitute_dollar_captures(template: &str, m: &Match) -> String {
    substitute_with(template, '$', |n| m.capture(n).map(strip_sgr))
}

fn substitute_with(template: &str, sigil: char, lookup: impl Fn(usize) -> Option<String>) -> String {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == sigil && i + 1 < chars.len() && chars[i + 1].is_ascii_digit() {
            let mut j = i + 1;
            let mut num = String::new();
            while j < chars.len() && chars[j].is_ascii_digit() && num.len() < 2 {
                num.push(chars[j]);
                j += 1;
            }
            let n: usize = num.parse().unwrap_or(0);
            if let Some(value) = lookup(n) {
                out.push_str(&value);
            }
            i = j;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

fn strip_sgr(s: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").unwrap());
    re.replace_all(s, "").to_string()
}
