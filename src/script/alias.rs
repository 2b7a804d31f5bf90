//! Alias expander
//!
//! Recursively rewrites outgoing commands: split on unbraced semicolons
//! or newlines, match each part against the ordered alias list, substitute
//! captures into the replacement, then re-split and re-match the result up
//! to a bounded recursion depth.

use crate::pattern::{substitute_dollar_captures, substitute_percent_captures, CompiledPattern};
use crate::script::{Alias, MatchType};

const MAX_RECURSION_DEPTH: u32 = 10;

/// Expand `command` against `aliases`, returning the fully-expanded
/// sequence of resulting commands in order.
pub fn expand(command: &str, aliases: &[Alias]) -> Vec<String> {
    let mut out = Vec::new();
    for part in super::split_unbraced(command) {
        expand_part(&part, aliases, 0, &mut out);
    }
    out
}

fn expand_part(part: &str, aliases: &[Alias], depth: u32, out: &mut Vec<String>) {
    if part.is_empty() {
        return;
    }
    if depth >= MAX_RECURSION_DEPTH {
        out.push(part.to_string());
        return;
    }

    match match_alias(part, aliases) {
        Some(expanded) => {
            for sub_part in super::split_unbraced(&expanded) {
                expand_part(&sub_part, aliases, depth + 1, out);
            }
        }
        None => out.push(part.to_string()),
    }
}

fn match_alias(command: &str, aliases: &[Alias]) -> Option<String> {
    for alias in aliases {
        if !alias.enabled {
            continue;
        }
        if let Some(replacement) = try_match(command, alias) {
            return Some(replacement);
        }
    }
    None
}

fn try_match(command: &str, alias: &Alias) -> Option<String> {
    match alias.match_type {
        MatchType::Exact => {
            let mut words = command.split_whitespace();
            let first = words.next()?;
            if !first.eq_ignore_ascii_case(&alias.pattern) {
                return None;
            }
            let args: Vec<&str> = words.collect();
            Some(substitute_word_args(&alias.replacement, first, &args))
        }
        MatchType::StartsWith => {
            let prefix = format!("{} ", alias.pattern);
            if command == alias.pattern {
                Some(substitute_word_args(&alias.replacement, command, &[]))
            } else if let Some(rest) = command.strip_prefix(&prefix) {
                let args: Vec<&str> = rest.split_whitespace().collect();
                Some(substitute_word_args(&alias.replacement, &alias.pattern, &args))
            } else {
                None
            }
        }
        MatchType::Tintin => {
            let re = CompiledPattern::compile_anchored_ci(&alias.pattern).ok()?;
            let caps = re.captures(command)?;
            let groups: Vec<Option<String>> = (1..caps.len())
                .map(|i| caps.get(i).map(|m| m.as_str().to_string()))
                .collect();
            let m = crate::pattern::Match {
                start: 0,
                end: command.len(),
                text: command,
                groups,
            };
            Some(substitute_percent_captures(&alias.replacement, &m))
        }
        MatchType::Regex => {
            let re = regex::RegexBuilder::new(&alias.pattern)
                .case_insensitive(true)
                .build()
                .ok()?;
            let caps = re.captures(command)?;
            let groups: Vec<Option<String>> = (1..caps.len())
                .map(|i| caps.get(i).map(|m| m.as_str().to_string()))
                .collect();
            let m = crate::pattern::Match {
                start: 0,
                end: command.len(),
                text: command,
                groups,
            };
            Some(substitute_dollar_captures(&alias.replacement, &m))
        }
    }
}

/// Substitute `$*` (all args joined) and `$1..$N` (individual args) into
/// `replacement`; unmatched `$N` are stripped. `$0` is the matched word.
fn substitute_word_args(replacement: &str, word: &str, args: &[&str]) -> String {
    let joined = args.join(" ");
    let chars: Vec<char> = replacement.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' && i + 1 < chars.len() {
            if chars[i + 1] == '*' {
                out.push_str(&joined);
                i += 2;
                continue;
            }
            if chars[i + 1].is_ascii_digit() {
                let mut j = i + 1;
                let mut num = String::new();
                while j < chars.len() && chars[j].is_ascii_digit() && num.len() < 2 {
                    num.push(chars[j]);
                    j += 1;
                }
                let n: usize = num.parse().unwrap_or(0);
                if n == 0 {
                    out.push_str(word);
                } else if let Some(arg) = args.get(n - 1) {
                    out.push_str(arg);
                }
                i = j;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(pattern: &str, replacement: &str) -> Alias {
        Alias {
            pattern: pattern.to_string(),
            match_type: MatchType::Exact,
            replacement: replacement.to_string(),
            enabled: true,
        }
    }

    #[test]
    fn scenario_d_alias_recursion() {
        let aliases = vec![exact("kk", "kill $1; loot"), exact("loot", "get all from corpse")];
        let result = expand("kk kobold", &aliases);
        assert_eq!(result, vec!["kill kobold".to_string(), "get all from corpse".to_string()]);
    }

    #[test]
    fn unmatched_command_passes_through_unchanged() {
        let aliases = vec![exact("kk", "kill $1")];
        let result = expand("look", &aliases);
        assert_eq!(result, vec!["look".to_string()]);
    }

    #[test]
    fn starts_with_match_type() {
        let aliases = vec![Alias {
            pattern: "cast".to_string(),
            match_type: MatchType::StartsWith,
            replacement: "perform spell $*".to_string(),
            enabled: true,
        }];
        let result = expand("cast fireball at orc", &aliases);
        assert_eq!(result, vec!["perform spell fireball at orc".to_string()]);
    }

    #[test]
    fn recursion_depth_capped_at_ten() {
        // Self-referential alias: expanding always produces a match again.
        let aliases = vec![exact("loop", "loop")];
        let result = expand("loop", &aliases);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0], "loop");
    }

    #[test]
    fn tintin_match_type_anchored_and_case_insensitive() {
        let aliases = vec![Alias {
            pattern: "go %1".to_string(),
            match_type: MatchType::Tintin,
            replacement: "walk %1".to_string(),
            enabled: true,
        }];
        let result = expand("GO north", &aliases);
        assert_eq!(result, vec!["walk north".to_string()]);
    }

    #[test]
    fn regex_match_type_dollar_captures() {
        let aliases = vec![Alias {
            pattern: r"^give (\w+) to (\w+)$".to_string(),
            match_type: MatchType::Regex,
            replacement: "hand $1 over to $2".to_string(),
            enabled: true,
        }];
        let result = expand("give sword to bob", &aliases);
        assert_eq!(result, vec!["hand sword over to bob".to_string()]);
    }

    #[test]
    fn disabled_alias_is_skipped() {
        let mut a = exact("kk", "kill $1");
        a.enabled = false;
        let result = expand("kk kobold", &[a]);
        assert_eq!(result, vec!["kk kobold".to_string()]);
    }
}
