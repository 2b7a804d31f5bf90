//! Trigger engine
//!
//! Walks the ordered trigger set over each non-MIP line, composing
//! gag/highlight/substitute/command/sound/discord/chatmon actions, and
//! disables triggers that trip the sliding-window loop detector.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::pattern::{substitute_percent_captures, CompiledPattern};
use crate::script::{Action, Trigger};

const LOOP_WINDOW: Duration = Duration::from_secs(2);
const LOOP_THRESHOLD: u32 = 50;

/// Sliding-window fire count for one trigger.
#[derive(Debug, Clone)]
pub struct LoopWindow {
    pub count: u32,
    pub first_fire: Instant,
}

/// A queued Discord side effect, template-substituted but not yet
/// `$name`-expanded from the session variable scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscordEffect {
    pub webhook_url: String,
    pub message: String,
}

/// A queued chatmon side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatmonEffect {
    pub message: String,
    pub channel: String,
}

/// A trigger that tripped the loop detector on this line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDetected {
    pub trigger_id: String,
}

/// Accumulated result of running the trigger set over one line.
#[derive(Debug, Clone, Default)]
pub struct TriggerResult {
    pub line: String,
    pub gag: bool,
    pub commands: Vec<String>,
    pub sound: Option<String>,
    pub discord: Vec<DiscordEffect>,
    pub chatmon: Vec<ChatmonEffect>,
    pub loop_detected: Vec<LoopDetected>,
}

/// Run every enabled, non-disabled trigger over `line`.
///
/// `loop_tracker` and `disabled` are per-session state carried across calls.
/// A trigger that trips the loop detector on this call is added to
/// `disabled` and its actions are skipped for this fire (the fire that
/// trips it does not run).
pub fn apply(
    line: &str,
    triggers: &[Trigger],
    loop_tracker: &mut HashMap<String, LoopWindow>,
    disabled: &mut std::collections::HashSet<String>,
    now: Instant,
) -> TriggerResult {
    let mut result = TriggerResult {
        line: line.to_string(),
        ..Default::default()
    };

    for trigger in triggers {
        if !trigger.enabled || disabled.contains(&trigger.id) {
            continue;
        }

        let compiled = match CompiledPattern::compile(&trigger.pattern) {
            Ok(c) => c,
            Err(_) => continue,
        };
        let Some(m) = compiled.find(&result.line) else {
            continue;
        };

        if loop_tripped(&trigger.id, loop_tracker, now) {
            result.loop_detected.push(LoopDetected {
                trigger_id: trigger.id.clone(),
            });
            disabled.insert(trigger.id.clone());
            continue;
        }

        for action in &trigger.actions {
            match action {
                Action::Gag => result.gag = true,
                Action::Highlight { fg, bg, blink, underline } => {
                    let tag = highlight_tag(fg.as_deref(), bg.as_deref(), *blink, *underline);
                    let span = m.text;
                    let wrapped = format!("{tag}{span}</hl>");
                    result.line = result.line.replacen(span, &wrapped, 1);
                }
                Action::Substitute { template } => {
                    let replacement = substitute_percent_captures(template, &m);
                    result.line = result.line.replacen(m.text, &replacement, 1);
                }
                Action::Command { template } => {
                    result.commands.push(substitute_percent_captures(template, &m));
                }
                Action::Sound { name } => {
                    result.sound = Some(name.clone());
                }
                Action::Discord { webhook_url, message } => {
                    result.discord.push(DiscordEffect {
                        webhook_url: webhook_url.clone(),
                        message: substitute_percent_captures(message, &m),
                    });
                }
                Action::Chatmon { message, channel } => {
                    result.chatmon.push(ChatmonEffect {
                        message: substitute_percent_captures(message, &m),
                        channel: channel.clone(),
                    });
                }
            }
        }
    }

    result
}

/// Update the sliding window for `trigger_id`; return `true` if this fire
/// is the one that trips the loop detector (the 50th within 2 seconds).
fn loop_tripped(trigger_id: &str, tracker: &mut HashMap<String, LoopWindow>, now: Instant) -> bool {
    let window = tracker
        .entry(trigger_id.to_string())
        .or_insert_with(|| LoopWindow { count: 0, first_fire: now });

    if now.duration_since(window.first_fire) > LOOP_WINDOW {
        window.first_fire = now;
        window.count = 1;
    } else {
        window.count += 1;
    }

    window.count >= LOOP_THRESHOLD
}

fn highlight_tag(fg: Option<&str>, bg: Option<&str>, blink: bool, underline: bool) -> String {
    let mut tag = String::from("<hl");
    if let Some(fg) = fg {
        tag.push_str(&format!(r#" fg="{fg}""#));
    }
    if let Some(bg) = bg {
        tag.push_str(&format!(r#" bg="{bg}""#));
    }
    if blink {
        tag.push_str(" blink");
    }
    if underline {
        tag.push_str(" underline");
    }
    tag.push('>');
    tag
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn trigger(pattern: &str, actions: Vec<Action>) -> Trigger {
        Trigger {
            id: "t1".to_string(),
            name: "test".to_string(),
            pattern: pattern.to_string(),
            enabled: true,
            actions,
        }
    }

    #[test]
    fn literal_substring_match_is_case_sensitive() {
        let triggers = vec![trigger("hello", vec![Action::Gag])];
        let mut tracker = HashMap::new();
        let mut disabled = HashSet::new();
        let now = Instant::now();

        let matched = apply("say hello world", &triggers, &mut tracker, &mut disabled, now);
        assert!(matched.gag);

        let not_matched = apply("say Hello world", &triggers, &mut tracker, &mut disabled, now);
        assert!(!not_matched.gag);
    }

    #[test]
    fn scenario_c_capture_and_gag() {
        let triggers = vec![trigger(
            "^%1 tells you '%2'",
            vec![Action::Gag, Action::Command { template: "reply %1 got it: %2".to_string() }],
        )];
        let mut tracker = HashMap::new();
        let mut disabled = HashSet::new();

        let result = apply(
            "Alice tells you 'hello'",
            &triggers,
            &mut tracker,
            &mut disabled,
            Instant::now(),
        );

        assert!(result.gag);
        assert_eq!(result.commands, vec!["reply Alice got it: hello".to_string()]);
    }

    #[test]
    fn disabled_trigger_is_skipped() {
        let mut t = trigger("hello", vec![Action::Gag]);
        t.enabled = false;
        let mut tracker = HashMap::new();
        let mut disabled = HashSet::new();
        let result = apply("hello", &[t], &mut tracker, &mut disabled, Instant::now());
        assert!(!result.gag);
    }

    #[test]
    fn highlight_wraps_matched_span_with_neutral_tag() {
        let triggers = vec![trigger(
            "danger",
            vec![Action::Highlight {
                fg: Some("red".to_string()),
                bg: None,
                blink: false,
                underline: true,
            }],
        )];
        let mut tracker = HashMap::new();
        let mut disabled = HashSet::new();
        let result = apply("beware danger ahead", &triggers, &mut tracker, &mut disabled, Instant::now());
        assert_eq!(result.line, r#"beware <hl fg="red" underline>danger</hl> ahead"#);
    }

    #[test]
    fn scenario_f_loop_detection_trips_at_fifty() {
        let triggers = vec![trigger("echo", vec![Action::Command { template: "echo".to_string() }])];
        let mut tracker = HashMap::new();
        let mut disabled = HashSet::new();
        let base = Instant::now();

        for _ in 0..49 {
            let result = apply("echo", &triggers, &mut tracker, &mut disabled, base);
            assert!(result.loop_detected.is_empty());
            assert!(!result.commands.is_empty());
        }

        let tripped = apply("echo", &triggers, &mut tracker, &mut disabled, base);
        assert_eq!(tripped.loop_detected.len(), 1);
        assert_eq!(tripped.loop_detected[0].trigger_id, "t1");
        assert!(tripped.commands.is_empty());

        let after = apply("echo", &triggers, &mut tracker, &mut disabled, base);
        assert!(after.commands.is_empty());
        assert!(after.loop_detected.is_empty());
    }

    #[test]
    fn loop_window_resets_after_two_seconds() {
        let triggers = vec![trigger("echo", vec![Action::Command { template: "echo".to_string() }])];
        let mut tracker = HashMap::new();
        let mut disabled = HashSet::new();
        let t0 = Instant::now();

        for _ in 0..49 {
            apply("echo", &triggers, &mut tracker, &mut disabled, t0);
        }

        let later = t0 + Duration::from_secs(3);
        let result = apply("echo", &triggers, &mut tracker, &mut disabled, later);
        assert!(result.loop_detected.is_empty());
        assert!(!result.commands.is_empty());
    }
}
