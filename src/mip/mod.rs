//! MIP decoder
//!
//! Recognizes and consumes MIP frames embedded in the MUD's byte stream,
//! maintaining [`MipStats`] and emitting chat events. MIP frames never
//! reach the browser as raw text; they either update `mipStats` or are
//! dropped entirely. This runs before trigger evaluation on every line.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Header pattern: `%<mipId:5><length:3><type:3 upper>`.
fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"%(\d{5})(\d{3})([A-Z]{3})").unwrap())
}

/// Current known MIP game-state values for a session. All fields are
/// `Option`/default-empty until the corresponding frame type has been seen
/// at least once, so a snapshot sent before any frame arrives is still
/// well-formed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MipStats {
    pub hp_current: Option<i64>,
    pub hp_max: Option<i64>,
    pub sp_current: Option<i64>,
    pub sp_max: Option<i64>,
    pub gp1_current: Option<i64>,
    pub gp1_max: Option<i64>,
    pub gp2_current: Option<i64>,
    pub gp2_max: Option<i64>,
    pub enemy_name: Option<String>,
    pub enemy_pct: Option<i64>,
    pub round: Option<i64>,
    /// Raw (uncolorized) guild status line, message type `I`.
    pub guild_raw: Option<String>,
    /// Colorized guild status line, message type `J`.
    pub guild_colorized: Option<String>,
    pub room: Option<String>,
    pub exits: Option<String>,
    pub gp1_label: Option<String>,
    pub gp2_label: Option<String>,
    pub hp_label: Option<String>,
    pub sp_label: Option<String>,
    pub uptime: Option<String>,
    pub reboot: Option<String>,
    /// Derived guild variables extracted from `guild_raw`/`guild_colorized`,
    /// keyed `<lowercasename>_current` / `_max` / `_pct`, or bare
    /// `<lowercasename>` for a single `[X]` form.
    #[serde(default)]
    pub guild_vars: HashMap<String, String>,
}

/// A chat message surfaced from a MIP `BAB` (tell) or `CAA` (channel) frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MipChat {
    pub chat_type: String,
    pub channel: String,
    pub raw: String,
    pub raw_text: String,
    pub message: String,
}

/// A debug echo of a raw MIP frame, emitted only when `debug` is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MipDebug {
    pub msg_type: String,
    pub msg_data: String,
}

/// Result of running [`MipDecoder::decode_line`] on one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MipOutcome {
    /// No MIP frame was found (or MIP is disabled); the line is unchanged
    /// and must continue through the normal trigger pipeline.
    Passthrough(String),
    /// A frame addressed to this session's `mipId` was found; the text
    /// surrounding it (with a leading `]` trimmed) continues through the
    /// pipeline. A stats or chat update was also produced, if any.
    Surrounding(String),
    /// Embedded frames were stripped because `mipId` isn't known yet; the
    /// residue (possibly empty) continues through the pipeline.
    Stripped(String),
    /// A frame (not addressed to us, or addressed when unknown) consumed
    /// the entire line; nothing continues to the trigger pipeline.
    Gagged,
}

/// Per-session MIP frame decoder.
#[derive(Debug, Default)]
pub struct MipDecoder {
    pub enabled: bool,
    pub mip_id: Option<String>,
    pub debug: bool,
    pub stats: MipStats,
}

/// Side effects produced while decoding one line.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MipEffects {
    pub stats_changed: bool,
    pub chat: Option<MipChat>,
    pub debug: Option<MipDebug>,
}

impl MipDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one line, updating `self.stats` in place and returning both
    /// the outcome for the rest of the pipeline and any side effects to
    /// surface to the browser.
    pub fn decode_line(&mut self, line: &str) -> (MipOutcome, MipEffects) {
        if !self.enabled {
            return (MipOutcome::Passthrough(line.to_string()), MipEffects::default());
        }

        let Some(frame) = find_first_valid_frame(line) else {
            return (MipOutcome::Passthrough(line.to_string()), MipEffects::default());
        };

        match &self.mip_id {
            Some(known) if *known == frame.mip_id => {
                let effects = self.apply_frame(&frame);
                let mut before = line[..frame.header_start].to_string();
                // The `#K` prefix, if present, sits immediately before the `%`.
                if before.ends_with("#K") {
                    before.truncate(before.len() - 2);
                }
                let after = &line[frame.end..];
                let mut surrounding = format!("{before}{after}");
                if let Some(stripped) = surrounding.strip_prefix(']') {
                    surrounding = stripped.to_string();
                }
                (MipOutcome::Surrounding(surrounding), effects)
            }
            None => {
                let stripped = strip_all_frames(line);
                (MipOutcome::Stripped(stripped), MipEffects::default())
            }
            Some(_other) => {
                let effects = self.apply_frame(&frame);
                (MipOutcome::Gagged, effects)
            }
        }
    }

    fn apply_frame(&mut self, frame: &Frame) -> MipEffects {
        let mut effects = MipEffects::default();
        if self.debug {
            effects.debug = Some(MipDebug {
                msg_type: frame.msg_type.clone(),
                msg_data: frame.data.clone(),
            });
        }

        match frame.msg_type.as_str() {
            "FFF" => {
                self.apply_fff(&frame.data);
                effects.stats_changed = true;
            }
            "BAD" => {
                self.stats.room = Some(clean_room(&frame.data));
                effects.stats_changed = true;
            }
            "DDD" => {
                self.stats.exits = Some(frame.data.split('~').collect::<Vec<_>>().join(", "));
                effects.stats_changed = true;
            }
            "BBA" => {
                self.stats.gp1_label = Some(frame.data.clone());
                effects.stats_changed = true;
            }
            "BBB" => {
                self.stats.gp2_label = Some(frame.data.clone());
                effects.stats_changed = true;
            }
            "BBC" => {
                self.stats.hp_label = Some(frame.data.clone());
                effects.stats_changed = true;
            }
            "BBD" => {
                self.stats.sp_label = Some(frame.data.clone());
                effects.stats_changed = true;
            }
            "BAB" => {
                effects.chat = Some(self.parse_tell(&frame.data));
            }
            "CAA" => {
                effects.chat = Some(parse_channel_chat(&frame.data));
            }
            "AAC" => {
                self.stats.reboot = Some(render_days(&frame.data));
                effects.stats_changed = true;
            }
            "AAF" => {
                self.stats.uptime = Some(render_days(&frame.data));
                effects.stats_changed = true;
            }
            "BAE" | "HAA" | "HAB" => {
                // Recognized and intentionally ignored.
            }
            _ => {}
        }
        effects
    }

    fn apply_fff(&mut self, data: &str) {
        let parts: Vec<&str> = data.split('~').collect();
        let mut it = parts.iter();
        while let (Some(key), Some(value)) = (it.next(), it.next()) {
            let value = value.to_string();
            match *key {
                "A" => self.stats.hp_current = value.parse().ok(),
                "B" => self.stats.hp_max = value.parse().ok(),
                "C" => self.stats.sp_current = value.parse().ok(),
                "D" => self.stats.sp_max = value.parse().ok(),
                "E" => self.stats.gp1_current = value.parse().ok(),
                "F" => self.stats.gp1_max = value.parse().ok(),
                "G" => self.stats.gp2_current = value.parse().ok(),
                "H" => self.stats.gp2_max = value.parse().ok(),
                "K" => self.stats.enemy_name = Some(value),
                "L" => self.stats.enemy_pct = value.parse().ok(),
                "N" => self.stats.round = value.parse().ok(),
                "I" => self.stats.guild_raw = Some(value),
                "J" => self.stats.guild_colorized = Some(value),
                _ => {}
            }
        }
        self.recompute_guild_vars();
    }

    fn recompute_guild_vars(&mut self) {
        let combined = format!(
            "{} {}",
            self.stats.guild_raw.as_deref().unwrap_or(""),
            self.stats.guild_colorized.as_deref().unwrap_or("")
        );
        self.stats.guild_vars = derive_guild_vars(&combined);
    }

    fn parse_tell(&self, data: &str) -> MipChat {
        let (raw_text, message) = if let Some(rest) = data.strip_prefix('x') {
            let mut parts = rest.splitn(3, '~');
            let _blank = parts.next().unwrap_or_default();
            let recipient = parts.next().unwrap_or_default();
            let msg = parts.next().unwrap_or_default();
            (recipient.to_string(), msg.to_string())
        } else {
            let mut parts = data.splitn(3, '~');
            let _blank = parts.next().unwrap_or_default();
            let sender = parts.next().unwrap_or_default();
            let msg = parts.next().unwrap_or_default();
            (sender.to_string(), msg.to_string())
        };
        MipChat {
            chat_type: "mip_chat".to_string(),
            channel: "tell".to_string(),
            raw: data.to_string(),
            raw_text,
            message: colorize_mip_spans(&message),
        }
    }
}

struct Frame {
    mip_id: String,
    msg_type: String,
    data: String,
    header_start: usize,
    end: usize,
}

/// Find the leftmost occurrence of the header pattern that has at least
/// `length` bytes of data following it.
fn find_first_valid_frame(line: &str) -> Option<Frame> {
    for caps in header_re().captures_iter(line) {
        let whole = caps.get(0).unwrap();
        let mip_id = caps.get(1).unwrap().as_str().to_string();
        let length: usize = caps.get(2).unwrap().as_str().parse().ok()?;
        let msg_type = caps.get(3).unwrap().as_str().to_string();
        let data_start = whole.end();
        let data_end = data_start + length;
        if data_end > line.len() {
            continue;
        }
        // Byte-safe slicing: header_re only matches ASCII, so byte offsets
        // from the match are valid char boundaries up to here, but `data`
        // may contain multi-byte text; only slice if it lands on a boundary.
        if !line.is_char_boundary(data_end) {
            continue;
        }
        let data = line[data_start..data_end].to_string();
        return Some(Frame {
            mip_id,
            msg_type,
            data,
            header_start: whole.start(),
            end: data_end,
        });
    }
    None
}

/// Strip every embedded MIP frame (bare or `#K`-prefixed) from `line`,
/// regardless of `mipId`, used while the session's own id is still unknown.
fn strip_all_frames(line: &str) -> String {
    let mut out = String::new();
    let mut rest = line;
    loop {
        match find_first_valid_frame(rest) {
            Some(frame) => {
                let mut start = frame.header_start;
                if rest[..start].ends_with("#K") {
                    start -= 2;
                }
                out.push_str(&rest[..start]);
                rest = &rest[frame.end..];
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }
    out
}

fn clean_room(data: &str) -> String {
    static TRAILING: OnceLock<Regex> = OnceLock::new();
    let re = TRAILING.get_or_init(|| Regex::new(r"(\s*\([^)]*\)|~\d+)\s*$").unwrap());
    let mut s = data.to_string();
    // Repeatedly strip trailing "(...)" and "~NN" forms.
    loop {
        if let Some(m) = re.find(&s) {
            if m.end() == s.len() {
                s.truncate(m.start());
                continue;
            }
        }
        break;
    }
    s.trim_end().to_string()
}

/// Render a leading decimal number of days as `"Xd Yh"` (X = whole days,
/// Y = round(fraction * 24)) or `"Yh"` when X is zero.
fn render_days(data: &str) -> String {
    static LEADING_NUM: OnceLock<Regex> = OnceLock::new();
    let re = LEADING_NUM.get_or_init(|| Regex::new(r"^-?\d+(\.\d+)?").unwrap());
    let Some(m) = re.find(data.trim_start()) else {
        return data.to_string();
    };
    let days: f64 = m.as_str().parse().unwrap_or(0.0);
    let whole = days.floor() as i64;
    let hours = ((days - days.floor()) * 24.0).round() as i64;
    if whole > 0 {
        format!("{whole}d {hours}h")
    } else {
        format!("{hours}h")
    }
}

fn parse_channel_chat(data: &str) -> MipChat {
    let parts: Vec<&str> = data.split('~').collect();
    let (channel, message) = if parts.len() >= 4 {
        (parts[0], parts.last().copied().unwrap_or(""))
    } else {
        (
            parts.first().copied().unwrap_or(""),
            parts.get(1).copied().unwrap_or(""),
        )
    };
    // Suppress "X divvies N coins" style noise.
    let suppressed = message.to_lowercase().contains("divv");
    let message = if suppressed {
        String::new()
    } else {
        colorize_mip_spans(message)
    };
    MipChat {
        chat_type: "mip_chat".to_string(),
        channel: channel.to_lowercase(),
        raw: data.to_string(),
        raw_text: channel.to_string(),
        message,
    }
}

fn palette_color(letter: char) -> Option<&'static str> {
    match letter {
        'b' => Some("blue"),
        'c' => Some("cyan"),
        'g' => Some("green"),
        'r' => Some("red"),
        's' => Some("gray"),
        'v' => Some("violet"),
        'w' => Some("white"),
        'y' => Some("yellow"),
        _ => None,
    }
}

/// Replace `<letter>...>` inline color spans with a stable `<hl fg="...">`
/// tag the browser can render; unmatched `<x` passes through literally.
fn colorize_mip_spans(text: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"<([a-z])([^<>]*)>").unwrap());
    re.replace_all(text, |caps: &regex::Captures| {
        let letter = caps[1].chars().next().unwrap();
        match palette_color(letter) {
            Some(color) => format!(r#"<hl fg="{color}">{}</hl>"#, &caps[2]),
            None => caps[0].to_string(),
        }
    })
    .to_string()
}

/// Extract guild-derived variables from the concatenation of the raw and
/// colorized guild lines, in the fixed order: ratio, bracketed `%`,
/// unbracketed `%`, single `[X]`. First match for a given name wins; later
/// patterns never override an already-set key. This order is a documented
/// quirk (see DESIGN.md) and must not be re-sorted.
fn derive_guild_vars(combined: &str) -> HashMap<String, String> {
    let mut out: HashMap<String, String> = HashMap::new();

    static RATIO: OnceLock<Regex> = OnceLock::new();
    let ratio = RATIO.get_or_init(|| Regex::new(r"(\w+):\s*\[(\d+)/(\d+)\]").unwrap());
    for caps in ratio.captures_iter(combined) {
        let name = caps[1].to_lowercase();
        out.entry(format!("{name}_current")).or_insert_with(|| caps[2].to_string());
        out.entry(format!("{name}_max")).or_insert_with(|| caps[3].to_string());
    }

    static BRACKETED_PCT: OnceLock<Regex> = OnceLock::new();
    let bracketed = BRACKETED_PCT.get_or_init(|| Regex::new(r"(\w+):\[(\d+)%\]").unwrap());
    for caps in bracketed.captures_iter(combined) {
        let name = caps[1].to_lowercase();
        out.entry(format!("{name}_pct")).or_insert_with(|| caps[2].to_string());
    }

    static UNBRACKETED_PCT: OnceLock<Regex> = OnceLock::new();
    let unbracketed = UNBRACKETED_PCT.get_or_init(|| Regex::new(r"(\w+):\s*(\d+)%").unwrap());
    for caps in unbracketed.captures_iter(combined) {
        let name = caps[1].to_lowercase();
        out.entry(format!("{name}_pct")).or_insert_with(|| caps[2].to_string());
    }

    static SINGLE: OnceLock<Regex> = OnceLock::new();
    let single = SINGLE.get_or_init(|| Regex::new(r"(\w+):\[(\d+)\]").unwrap());
    for caps in single.captures_iter(combined) {
        let name = caps[1].to_lowercase();
        out.entry(name).or_insert_with(|| caps[2].to_string());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_decoder_passes_through() {
        let mut decoder = MipDecoder::new();
        let (outcome, effects) = decoder.decode_line("%623950008AACignored");
        assert_eq!(outcome, MipOutcome::Passthrough("%623950008AACignored".to_string()));
        assert_eq!(effects, MipEffects::default());
    }

    #[test]
    fn unknown_mip_id_strips_but_does_not_gag() {
        let mut decoder = MipDecoder::new();
        decoder.enabled = true;
        let line = "before #K%623950008AAC3.7 days after";
        let (outcome, _effects) = decoder.decode_line(line);
        assert_eq!(outcome, MipOutcome::Stripped("before  after".to_string()));
    }

    #[test]
    fn scenario_b_mip_gag_with_known_id() {
        let mut decoder = MipDecoder::new();
        decoder.enabled = true;
        decoder.mip_id = Some("62395".to_string());

        // Corrected reproduction of the spec's scenario B fixture: mipId=62395,
        // type=AAC (reboot), data="3.7 days" (8 bytes, length field "008").
        let line = "You see a bird.#K%623950008AAC3.7 days";
        let (outcome, effects) = decoder.decode_line(line);

        assert_eq!(outcome, MipOutcome::Surrounding("You see a bird.".to_string()));
        assert!(effects.stats_changed);
        assert_eq!(decoder.stats.reboot.as_deref(), Some("3d 17h"));
    }

    #[test]
    fn foreign_mip_id_is_fully_gagged() {
        let mut decoder = MipDecoder::new();
        decoder.enabled = true;
        decoder.mip_id = Some("00001".to_string());

        let line = "visible text #K%623950008AAC3.7 days more text";
        let (outcome, effects) = decoder.decode_line(line);
        assert_eq!(outcome, MipOutcome::Gagged);
        assert!(effects.stats_changed);
        assert_eq!(decoder.stats.reboot.as_deref(), Some("3d 17h"));
    }

    #[test]
    fn line_with_only_a_mip_frame_produces_no_mud_output() {
        let mut decoder = MipDecoder::new();
        decoder.enabled = true;
        decoder.mip_id = Some("11111".to_string());
        let line = "%111110008AAC3.7 days";
        let (outcome, effects) = decoder.decode_line(line);
        assert_eq!(outcome, MipOutcome::Surrounding(String::new()));
        assert!(effects.stats_changed);
    }

    #[test]
    fn fff_frame_updates_hp_sp_gp_and_enemy() {
        let mut decoder = MipDecoder::new();
        decoder.enabled = true;
        decoder.mip_id = Some("62395".to_string());
        let data = "A~100~B~120~C~50~D~60~K~a rabid dog~L~75~N~3";
        let line = format!("%62395{:03}FFF{}", data.len(), data);
        let (_outcome, effects) = decoder.decode_line(&line);
        assert!(effects.stats_changed);
        assert_eq!(decoder.stats.hp_current, Some(100));
        assert_eq!(decoder.stats.hp_max, Some(120));
        assert_eq!(decoder.stats.sp_current, Some(50));
        assert_eq!(decoder.stats.sp_max, Some(60));
        assert_eq!(decoder.stats.enemy_name.as_deref(), Some("a rabid dog"));
        assert_eq!(decoder.stats.enemy_pct, Some(75));
        assert_eq!(decoder.stats.round, Some(3));
    }

    #[test]
    fn bad_frame_strips_trailing_parens_and_tilde_number() {
        let mut decoder = MipDecoder::new();
        decoder.enabled = true;
        decoder.mip_id = Some("62395".to_string());
        let data = "The Town Square (lit)~42";
        let line = format!("%62395{:03}BAD{}", data.len(), data);
        decoder.decode_line(&line);
        assert_eq!(decoder.stats.room.as_deref(), Some("The Town Square"));
    }

    #[test]
    fn ddd_frame_converts_tildes_to_commas() {
        let mut decoder = MipDecoder::new();
        decoder.enabled = true;
        decoder.mip_id = Some("62395".to_string());
        let data = "north~south~east";
        let line = format!("%62395{:03}DDD{}", data.len(), data);
        decoder.decode_line(&line);
        assert_eq!(decoder.stats.exits.as_deref(), Some("north, south, east"));
    }

    #[test]
    fn bab_tell_emits_mip_chat_with_colorized_message() {
        let mut decoder = MipDecoder::new();
        decoder.enabled = true;
        decoder.mip_id = Some("62395".to_string());
        let data = "~Alice~<rhello there>";
        let line = format!("%62395{:03}BAB{}", data.len(), data);
        let (_outcome, effects) = decoder.decode_line(&line);
        let chat = effects.chat.expect("expected chat event");
        assert_eq!(chat.channel, "tell");
        assert_eq!(chat.raw_text, "Alice");
        assert_eq!(chat.message, r#"<hl fg="red">hello there</hl>"#);
    }

    #[test]
    fn caa_channel_chat_lowercases_channel_name() {
        let mut decoder = MipDecoder::new();
        decoder.enabled = true;
        decoder.mip_id = Some("62395".to_string());
        let data = "OOC~Bob~ignored~hey everyone";
        let line = format!("%62395{:03}CAA{}", data.len(), data);
        let (_outcome, effects) = decoder.decode_line(&line);
        let chat = effects.chat.expect("expected chat event");
        assert_eq!(chat.channel, "ooc");
        assert_eq!(chat.message, "hey everyone");
    }

    #[test]
    fn caa_suppresses_divvy_noise() {
        let mut decoder = MipDecoder::new();
        decoder.enabled = true;
        decoder.mip_id = Some("62395".to_string());
        let data = "OOC~Bob divvies 10 coins to the party";
        let line = format!("%62395{:03}CAA{}", data.len(), data);
        let (_outcome, effects) = decoder.decode_line(&line);
        let chat = effects.chat.expect("expected chat event");
        assert_eq!(chat.message, "");
    }

    #[test]
    fn render_days_whole_days_and_hours_only() {
        assert_eq!(render_days("3.7 days"), "3d 17h");
        assert_eq!(render_days("0.5 days"), "12h");
        assert_eq!(render_days("1.0 days"), "1d 0h");
    }

    #[test]
    fn guild_vars_follow_documented_order() {
        let combined = "Knight: [5/10] Knight:[50%] Mage: 30% Squire:[7]";
        let vars = derive_guild_vars(combined);
        assert_eq!(vars.get("knight_current"), Some(&"5".to_string()));
        assert_eq!(vars.get("knight_max"), Some(&"10".to_string()));
        // Ratio pattern claimed "knight" first; bracketed % must not override it,
        // but has nothing to add since knight already has _current/_max, not _pct.
        assert_eq!(vars.get("knight_pct"), Some(&"50".to_string()));
        assert_eq!(vars.get("mage_pct"), Some(&"30".to_string()));
        assert_eq!(vars.get("squire"), Some(&"7".to_string()));
    }

    #[test]
    fn unmatched_palette_letter_passes_through_literally() {
        assert_eq!(colorize_mip_spans("<zfoo>"), "<zfoo>");
    }
}
