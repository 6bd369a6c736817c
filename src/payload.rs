//! The request payload and its one-step mapping onto a canonical record.
//!
//! Deployed clients send the same logical field under many names. Each field
//! has an ordered alias list; the first alias holding a non-empty value wins.
//! Order matters, so keep new aliases at the end of their list.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::chart::BAND_LABELS;
use crate::layout::BULLET;
use crate::template::StateKey;

/// Standard alphabet, padding optional. URL-safe input is mapped onto the
/// standard alphabet before decoding.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    NO_PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// List markers rewritten to [`BULLET`] when normalising TLDR text.
const ALT_MARKERS: [char; 5] = ['-', '–', '—', '·', '*'];

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("missing payload")]
    Missing,
    #[error("payload is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload must be a JSON object")]
    NotAnObject,
}

/// Normalises base64 or base64url text (padded or not) for [`LENIENT`].
/// Form decoding turns `+` into a space, so spaces become `+` again.
fn normalize_base64(raw: &str) -> String {
    let raw = raw
        .split_once(";base64,")
        .map(|(_, data)| data)
        .unwrap_or(raw);
    raw.chars()
        .filter(|c| !matches!(c, '\n' | '\r' | '\t'))
        .map(|c| match c {
            ' ' => '+',
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect()
}

pub fn decode_base64(raw: &str) -> Result<Vec<u8>, PayloadError> {
    Ok(LENIENT.decode(normalize_base64(raw.trim()))?)
}

/// Decodes the `data` query parameter into a JSON object. Plain JSON is
/// accepted as well as base64/base64url.
pub fn decode_data_param(raw: &str) -> Result<Value, PayloadError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PayloadError::Missing);
    }
    let value: Value = if raw.starts_with('{') {
        serde_json::from_str(raw)?
    } else {
        serde_json::from_slice(&decode_base64(raw)?)?
    };
    if !value.is_object() {
        return Err(PayloadError::NotAnObject);
    }
    Ok(value)
}

/// Every textual field the report can draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    FullName,
    DateLabel,
    ExecSummary,
    ExecTldr,
    StateSummary,
    StateTldr,
    FreqSummary,
    FreqTldr,
    SeqSummary,
    SeqTldr,
    ThemeSummary,
    ThemeTldr,
    Collab(StateKey),
    Tip(u8),
    Action(u8),
}

impl Field {
    pub const ALL: [Field; 20] = [
        Field::FullName,
        Field::DateLabel,
        Field::ExecSummary,
        Field::ExecTldr,
        Field::StateSummary,
        Field::StateTldr,
        Field::FreqSummary,
        Field::FreqTldr,
        Field::SeqSummary,
        Field::SeqTldr,
        Field::ThemeSummary,
        Field::ThemeTldr,
        Field::Collab(StateKey::C),
        Field::Collab(StateKey::T),
        Field::Collab(StateKey::R),
        Field::Collab(StateKey::L),
        Field::Tip(0),
        Field::Tip(1),
        Field::Action(0),
        Field::Action(1),
    ];

    /// Canonical name, also the key used by layout overrides.
    pub fn key(self) -> &'static str {
        match self {
            Field::FullName => "fullName",
            Field::DateLabel => "dateLabel",
            Field::ExecSummary => "p3_exec_summary",
            Field::ExecTldr => "p3_exec_tldr",
            Field::StateSummary => "p4_state_summary",
            Field::StateTldr => "p4_state_tldr",
            Field::FreqSummary => "p5_freq_summary",
            Field::FreqTldr => "p5_freq_tldr",
            Field::SeqSummary => "p6_seq_summary",
            Field::SeqTldr => "p6_seq_tldr",
            Field::ThemeSummary => "p7_theme_summary",
            Field::ThemeTldr => "p7_theme_tldr",
            Field::Collab(StateKey::C) => "collab_C",
            Field::Collab(StateKey::T) => "collab_T",
            Field::Collab(StateKey::R) => "collab_R",
            Field::Collab(StateKey::L) => "collab_L",
            Field::Tip(0) => "tip_1",
            Field::Tip(_) => "tip_2",
            Field::Action(0) => "action_1",
            Field::Action(_) => "action_2",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    /// TLDR fields are rendered as bullet lists.
    pub const fn is_tldr(self) -> bool {
        matches!(
            self,
            Field::ExecTldr | Field::StateTldr | Field::FreqTldr | Field::SeqTldr | Field::ThemeTldr
        )
    }

    /// Ordered alias paths (dot-separated) for single-valued lookup.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::FullName => &[
                "fullName",
                "full_name",
                "name",
                "identity.fullName",
                "identity.name",
                "person.fullName",
                "P.fullName",
            ],
            Field::DateLabel => &[
                "dateLbl",
                "dateLabel",
                "date_label",
                "date",
                "identity.dateLabel",
                "identity.dateLbl",
                "identity.date",
                "P.dateLabel",
            ],
            Field::ExecSummary => &[
                "P.p3_exec_summary",
                "p.p3_exec_summary",
                "p3_exec_summary",
                "execSummary",
                "exec.summary",
            ],
            Field::ExecTldr => &[
                "P.p3_exec_tldr",
                "p.p3_exec_tldr",
                "p3_exec_tldr",
                "execTldr",
                "exec.tldr",
            ],
            Field::StateSummary => &[
                "P.p4_state_summary",
                "p.p4_state_summary",
                "p4_state_summary",
                "stateSummary",
                "state.summary",
            ],
            Field::StateTldr => &[
                "P.p4_state_tldr",
                "p.p4_state_tldr",
                "p4_state_tldr",
                "stateTldr",
                "state.tldr",
            ],
            Field::FreqSummary => &[
                "P.p5_freq_summary",
                "p.p5_freq_summary",
                "p5_freq_summary",
                "freqSummary",
                "frequency.summary",
            ],
            Field::FreqTldr => &[
                "P.p5_freq_tldr",
                "p.p5_freq_tldr",
                "p5_freq_tldr",
                "freqTldr",
                "frequency.tldr",
            ],
            Field::SeqSummary => &[
                "P.p6_seq_summary",
                "p.p6_seq_summary",
                "p6_seq_summary",
                "seqSummary",
                "sequence.summary",
            ],
            Field::SeqTldr => &[
                "P.p6_seq_tldr",
                "p.p6_seq_tldr",
                "p6_seq_tldr",
                "seqTldr",
                "sequence.tldr",
            ],
            Field::ThemeSummary => &[
                "P.p7_theme_summary",
                "p.p7_theme_summary",
                "p7_theme_summary",
                "themeSummary",
                "theme.summary",
            ],
            Field::ThemeTldr => &[
                "P.p7_theme_tldr",
                "p.p7_theme_tldr",
                "p7_theme_tldr",
                "themeTldr",
                "theme.tldr",
            ],
            Field::Collab(StateKey::C) => &[
                "P.collab_C",
                "p.collab_C",
                "collab_C",
                "collab.C",
                "collaboration.C",
                "collabC",
            ],
            Field::Collab(StateKey::T) => &[
                "P.collab_T",
                "p.collab_T",
                "collab_T",
                "collab.T",
                "collaboration.T",
                "collabT",
            ],
            Field::Collab(StateKey::R) => &[
                "P.collab_R",
                "p.collab_R",
                "collab_R",
                "collab.R",
                "collaboration.R",
                "collabR",
            ],
            Field::Collab(StateKey::L) => &[
                "P.collab_L",
                "p.collab_L",
                "collab_L",
                "collab.L",
                "collaboration.L",
                "collabL",
            ],
            Field::Tip(0) => &["tip1", "tip_1", "P.tip1", "P.tip_1"],
            Field::Tip(_) => &["tip2", "tip_2", "P.tip2", "P.tip_2"],
            Field::Action(0) => &["action1", "action_1", "P.action1", "P.action_1"],
            Field::Action(_) => &["action2", "action_2", "P.action2", "P.action_2"],
        }
    }
}

const DOM_ALIASES: &[&str] = &[
    "domKey",
    "dominantKey",
    "dom",
    "dominant",
    "identity.domKey",
    "state.dom",
    "P.domKey",
];
const SECOND_ALIASES: &[&str] = &[
    "secondKey",
    "secKey",
    "second",
    "identity.secondKey",
    "state.second",
    "P.secondKey",
];
const TIP_LIST_ALIASES: &[&str] = &["tips", "P.tips", "p.tips", "advice.tips"];
const ACTION_LIST_ALIASES: &[&str] = &["actions", "P.actions", "p.actions", "advice.actions"];
const BAND_ALIASES: &[&str] = &["bands", "P.bands", "chart.bands", "bandScores", "scores.bands"];
const COUNT_ALIASES: &[&str] = &[
    "counts",
    "stateCounts",
    "P.counts",
    "chart.counts",
    "scores.counts",
];
const CHART_URL_ALIASES: &[&str] = &[
    "chartUrl",
    "spiderChartUrl",
    "radarUrl",
    "chart.url",
    "P.chartUrl",
];
const LAYOUT_ALIASES: &[&str] = &["layout", "L"];
const TEMPLATE_ALIASES: &[&str] = &["pdfTplB64", "pdfTpl"];
const FONT_ALIASES: &[&str] = &["fontB64"];
const BOLD_FONT_ALIASES: &[&str] = &["fontBoldB64"];

/// Resolves a dot-separated path through nested objects.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |node, segment| node.get(segment))
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// First alias with a non-empty text value.
pub fn coalesce_text(root: &Value, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .find_map(|path| lookup(root, path).and_then(as_text))
}

/// First alias holding an object with at least one entry.
fn coalesce_object<'a>(root: &'a Value, aliases: &[&str]) -> Option<&'a Map<String, Value>> {
    aliases.iter().find_map(|path| {
        lookup(root, path)
            .and_then(Value::as_object)
            .filter(|map| !map.is_empty())
    })
}

/// Up to two entries: a non-empty list alias wins, otherwise the per-item
/// aliases of `item(0)` and `item(1)`.
fn coalesce_pair(root: &Value, list_aliases: &[&str], item: fn(u8) -> Field) -> Vec<String> {
    let from_list = list_aliases.iter().find_map(|path| {
        let items: Vec<String> = lookup(root, path)?
            .as_array()?
            .iter()
            .filter_map(as_text)
            .take(2)
            .collect();
        (!items.is_empty()).then_some(items)
    });
    from_list.unwrap_or_else(|| {
        (0..2)
            .filter_map(|i| coalesce_text(root, item(i).aliases()))
            .collect()
    })
}

fn coalesce_bool(root: &Value, path: &str) -> bool {
    match lookup(root, path) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => matches!(s.trim(), "1" | "true" | "yes"),
        _ => false,
    }
}

/// Picks the second state from counts when the payload does not name one:
/// the highest positive count that is not the dominant state. Equal counts
/// keep their payload order.
pub fn rank_second_state(dom: Option<StateKey>, counts: &[(StateKey, f64)]) -> Option<StateKey> {
    let mut ranked: Vec<(StateKey, f64)> = counts
        .iter()
        .copied()
        .filter(|&(key, value)| Some(key) != dom && value > 0.0)
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    ranked.first().map(|&(key, _)| key)
}

/// Normalises TLDR text into newline-separated bullet paragraphs.
///
/// Inline `" • "` separators become line breaks, leading `-`, `–`, `—`, `·`
/// or `*` markers become `•`, and a lone unmarked line gets a bullet.
pub fn format_tldr(raw: &str) -> String {
    let s = raw.trim();
    if s.is_empty() {
        return String::new();
    }
    let inline_sep = format!(" {BULLET} ");
    if s.contains(&inline_sep) {
        return s
            .split(&inline_sep)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(bulletize)
            .collect::<Vec<_>>()
            .join("\n");
    }
    if s.contains('\n') {
        return s.lines().map(normalize_marker).collect::<Vec<_>>().join("\n");
    }
    bulletize(s)
}

fn bulletize(part: &str) -> String {
    let line = normalize_marker(part);
    if line.trim_start().starts_with(BULLET) {
        line
    } else {
        format!("{BULLET} {}", line.trim_start())
    }
}

fn normalize_marker(line: &str) -> String {
    let trimmed = line.trim_start();
    for marker in ALT_MARKERS {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            if rest.starts_with(char::is_whitespace) {
                return format!("{BULLET} {}", rest.trim_start());
            }
        }
    }
    line.to_string()
}

/// The canonical record every downstream step works from.
#[derive(Debug, Clone, Default)]
pub struct ReportPayload {
    pub texts: BTreeMap<Field, String>,
    pub dom_key: Option<StateKey>,
    pub second_key: Option<StateKey>,
    /// `second_key` came from [`rank_second_state`] rather than the payload.
    pub second_key_ranked: bool,
    pub bands: Option<[f64; 12]>,
    /// State counts in payload order.
    pub counts: Vec<(StateKey, f64)>,
    pub chart_url: Option<String>,
    pub layout_override: Option<Map<String, Value>>,
    pub inline_template: Option<String>,
    pub inline_font: Option<String>,
    pub inline_bold_font: Option<String>,
    pub debug: bool,
}

impl ReportPayload {
    pub fn from_value(root: &Value) -> Self {
        let mut texts = BTreeMap::new();
        for field in Field::ALL {
            if matches!(field, Field::Tip(_) | Field::Action(_)) {
                continue;
            }
            if let Some(text) = coalesce_text(root, field.aliases()) {
                texts.insert(field, text);
            }
        }
        for (i, tip) in coalesce_pair(root, TIP_LIST_ALIASES, Field::Tip)
            .into_iter()
            .enumerate()
        {
            texts.insert(Field::Tip(i as u8), tip);
        }
        for (i, action) in coalesce_pair(root, ACTION_LIST_ALIASES, Field::Action)
            .into_iter()
            .enumerate()
        {
            texts.insert(Field::Action(i as u8), action);
        }

        let bands = coalesce_object(root, BAND_ALIASES)
            .filter(|map| BAND_LABELS.iter().any(|label| map.contains_key(*label)))
            .map(|map| BAND_LABELS.map(|label| map.get(label).and_then(as_number).unwrap_or(0.0)));

        let counts: Vec<(StateKey, f64)> = coalesce_object(root, COUNT_ALIASES)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| Some((StateKey::parse_loose(k)?, as_number(v)?)))
                    .collect()
            })
            .unwrap_or_default();

        let dom_key = coalesce_text(root, DOM_ALIASES).and_then(|s| StateKey::parse_loose(&s));
        let explicit_second =
            coalesce_text(root, SECOND_ALIASES).and_then(|s| StateKey::parse_loose(&s));
        let (second_key, second_key_ranked) = match explicit_second {
            Some(key) => (Some(key), false),
            None => {
                let ranked = rank_second_state(dom_key, &counts);
                (ranked, ranked.is_some())
            }
        };

        Self {
            texts,
            dom_key,
            second_key,
            second_key_ranked,
            bands,
            counts,
            chart_url: coalesce_text(root, CHART_URL_ALIASES),
            layout_override: coalesce_object(root, LAYOUT_ALIASES).cloned(),
            inline_template: coalesce_text(root, TEMPLATE_ALIASES),
            inline_font: coalesce_text(root, FONT_ALIASES),
            inline_bold_font: coalesce_text(root, BOLD_FONT_ALIASES),
            debug: coalesce_bool(root, "debug"),
        }
    }

    pub fn text(&self, field: Field) -> Option<&str> {
        self.texts.get(&field).map(String::as_str)
    }

    pub fn full_name(&self) -> &str {
        self.text(Field::FullName).unwrap_or("")
    }

    pub fn date_label(&self) -> &str {
        self.text(Field::DateLabel).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn decodes_standard_and_url_safe_base64() {
        let payload = json!({ "fullName": "Ana Ölz", "note": "??>>" }).to_string();
        for encoded in [
            STANDARD.encode(&payload),
            URL_SAFE_NO_PAD.encode(&payload),
            STANDARD.encode(&payload).replace('+', " "),
        ] {
            let value = decode_data_param(&encoded).unwrap();
            assert_eq!(value["fullName"], "Ana Ölz");
        }
    }

    #[test]
    fn plain_json_is_accepted() {
        let value = decode_data_param(r#"{"domKey":"T"}"#).unwrap();
        assert_eq!(value["domKey"], "T");
    }

    #[test]
    fn bad_payloads_are_rejected() {
        assert!(matches!(decode_data_param("  "), Err(PayloadError::Missing)));
        assert!(matches!(decode_data_param("%%%"), Err(PayloadError::Encoding(_))));
        let not_json = STANDARD.encode("hello");
        assert!(matches!(decode_data_param(&not_json), Err(PayloadError::Json(_))));
        let array = STANDARD.encode("[1,2]");
        assert!(matches!(decode_data_param(&array), Err(PayloadError::NotAnObject)));
    }

    #[test]
    fn data_url_prefix_is_stripped() {
        let bytes = decode_base64("data:application/pdf;base64,JVBERg==").unwrap();
        assert_eq!(bytes, b"%PDF");
    }

    #[test]
    fn first_alias_wins() {
        let root = json!({
            "dateLabel": "second choice",
            "dateLbl": "first choice",
            "identity": { "dateLabel": "third choice" }
        });
        assert_eq!(
            coalesce_text(&root, Field::DateLabel.aliases()),
            Some("first choice".into())
        );
    }

    #[test]
    fn empty_values_fall_through_to_later_aliases() {
        let root = json!({
            "dateLbl": "   ",
            "identity": { "dateLabel": "March 2025" }
        });
        let payload = ReportPayload::from_value(&root);
        assert_eq!(payload.date_label(), "March 2025");
    }

    #[test]
    fn nested_narrative_and_collab_aliases() {
        let root = json!({
            "P": { "p3_exec_summary": "Summary", "collab_T": "Works with T" },
            "collaboration": { "C": "Works with C" },
            "p4_state_tldr": "- first\n- second"
        });
        let payload = ReportPayload::from_value(&root);
        assert_eq!(payload.text(Field::ExecSummary), Some("Summary"));
        assert_eq!(payload.text(Field::Collab(StateKey::T)), Some("Works with T"));
        assert_eq!(payload.text(Field::Collab(StateKey::C)), Some("Works with C"));
        assert_eq!(
            format_tldr(payload.text(Field::StateTldr).unwrap()),
            "• first\n• second"
        );
    }

    #[test]
    fn tips_from_list_or_singles() {
        let from_list = ReportPayload::from_value(&json!({
            "tips": ["", "Breathe", "Plan", "Extra"],
            "tip1": "ignored"
        }));
        assert_eq!(from_list.text(Field::Tip(0)), Some("Breathe"));
        assert_eq!(from_list.text(Field::Tip(1)), Some("Plan"));

        let from_singles = ReportPayload::from_value(&json!({
            "action2": "Only second",
            "P": { "action_1": "First" }
        }));
        assert_eq!(from_singles.text(Field::Action(0)), Some("First"));
        assert_eq!(from_singles.text(Field::Action(1)), Some("Only second"));
    }

    #[test]
    fn state_keys_and_bands() {
        let payload = ReportPayload::from_value(&json!({
            "dominantKey": "t",
            "secKey": "L",
            "bands": { "C_low": 2, "T_high": "4.5", "unknown": 9 }
        }));
        assert_eq!(payload.dom_key, Some(StateKey::T));
        assert_eq!(payload.second_key, Some(StateKey::L));
        assert!(!payload.second_key_ranked);
        let bands = payload.bands.unwrap();
        assert_eq!(bands[0], 2.0);
        assert_eq!(bands[5], 4.5);
        assert_eq!(bands[6], 0.0);
    }

    #[test]
    fn second_state_ranked_from_counts() {
        let payload = ReportPayload::from_value(&json!({
            "domKey": "R",
            "counts": { "R": 9, "L": 3, "C": 5, "T": 5 }
        }));
        assert_eq!(payload.second_key, Some(StateKey::C));
        assert!(payload.second_key_ranked);
        assert_eq!(payload.counts.len(), 4);
    }

    #[test]
    fn ranking_ties_keep_payload_order() {
        let counts = [(StateKey::L, 4.0), (StateKey::T, 4.0), (StateKey::C, 1.0)];
        assert_eq!(rank_second_state(None, &counts), Some(StateKey::L));
        assert_eq!(rank_second_state(Some(StateKey::L), &counts), Some(StateKey::T));
        assert_eq!(rank_second_state(Some(StateKey::L), &[(StateKey::L, 2.0)]), None);
        assert_eq!(rank_second_state(None, &[(StateKey::C, 0.0)]), None);
    }

    #[test]
    fn tldr_normalisation() {
        assert_eq!(format_tldr(""), "");
        assert_eq!(format_tldr("just one"), "• just one");
        assert_eq!(format_tldr("• already"), "• already");
        assert_eq!(format_tldr("a • b •  c"), "• a\n• b\n• c");
        assert_eq!(format_tldr("• a • b"), "• a\n• b");
        assert_eq!(format_tldr("– one\n· two\nplain"), "• one\n• two\nplain");
        assert_eq!(format_tldr("-5 degrees"), "• -5 degrees");
    }

    #[test]
    fn layout_and_inline_assets() {
        let payload = ReportPayload::from_value(&json!({
            "L": { "p3_exec_tldr": { "maxLines": 2 } },
            "pdfTpl": "JVBERg==",
            "debug": "1"
        }));
        assert!(payload.layout_override.unwrap().contains_key("p3_exec_tldr"));
        assert_eq!(payload.inline_template.as_deref(), Some("JVBERg=="));
        assert!(payload.debug);
    }

    #[test]
    fn field_keys_round_trip() {
        for field in Field::ALL {
            assert_eq!(Field::from_key(field.key()), Some(field));
        }
    }
}
