//! Verdict parsing for verifier replies.
//!
//! The verifier is asked to answer in four labeled sections:
//!
//! ```text
//! Result: <free text>
//! Match: True|False
//! Check completed: True|False
//! Adjustment: <free text>
//! ```
//!
//! Models drift from that format (markdown bold, missing sections, lowercase
//! booleans), so parsing is total: every input yields a verdict, and replies
//! that did not follow the format are tagged [`ParsedVerdict::Degraded`].

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// Structured reading of one verifier reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdict {
    /// Query output or diagnostic text as reported by the model
    pub result_text: String,
    /// Whether the SQL answers the task
    pub is_match: bool,
    /// Whether the model says it finished checking
    pub check_completed: bool,
    /// Suggested change when `is_match` is false
    pub adjustment: String,
}

/// One labeled section of the verdict format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerdictField {
    Result,
    Match,
    CheckCompleted,
    Adjustment,
}

impl VerdictField {
    pub const ALL: [VerdictField; 4] = [
        VerdictField::Result,
        VerdictField::Match,
        VerdictField::CheckCompleted,
        VerdictField::Adjustment,
    ];

    /// Label as it appears in the reply, without the colon.
    pub fn label(self) -> &'static str {
        match self {
            VerdictField::Result => "Result",
            VerdictField::Match => "Match",
            VerdictField::CheckCompleted => "Check completed",
            VerdictField::Adjustment => "Adjustment",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.label() == label)
    }

    fn is_boolean(self) -> bool {
        matches!(self, VerdictField::Match | VerdictField::CheckCompleted)
    }
}

impl fmt::Display for VerdictField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Parse outcome, tagged by whether the reply followed the format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedVerdict {
    /// Every label was present and both booleans were `True` or `False`.
    WellFormed(Verdict),
    /// Some sections were absent or unreadable; they hold default values.
    /// `reply` keeps the full text the verdict was read from.
    Degraded {
        verdict: Verdict,
        missing: Vec<VerdictField>,
        reply: String,
    },
}

impl ParsedVerdict {
    pub fn verdict(&self) -> &Verdict {
        match self {
            ParsedVerdict::WellFormed(v) => v,
            ParsedVerdict::Degraded { verdict, .. } => verdict,
        }
    }

    pub fn into_verdict(self) -> Verdict {
        match self {
            ParsedVerdict::WellFormed(v) => v,
            ParsedVerdict::Degraded { verdict, .. } => verdict,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ParsedVerdict::Degraded { .. })
    }

    /// Text worth recording as the task result: the `Result:` section, or the
    /// whole reply when a degraded reply left that section empty.
    pub fn result_text(&self) -> &str {
        match self {
            ParsedVerdict::WellFormed(v) => &v.result_text,
            ParsedVerdict::Degraded { verdict, reply, .. } => {
                if verdict.result_text.is_empty() {
                    reply.trim()
                } else {
                    &verdict.result_text
                }
            }
        }
    }

    /// Sections that fell back to defaults. Empty when well formed.
    pub fn missing(&self) -> &[VerdictField] {
        match self {
            ParsedVerdict::WellFormed(_) => &[],
            ParsedVerdict::Degraded { missing, .. } => missing,
        }
    }
}

fn label_regex() -> &'static Regex {
    static LABELS: OnceLock<Regex> = OnceLock::new();
    LABELS.get_or_init(|| {
        // Emphasis hugging the label belongs to it: `**Match:** True`, `**Match**: True`.
        Regex::new(r"(?m)[*_]*\b(Result|Match|Check completed|Adjustment)[*_]*\s*:(?:[*_]+(?:\s|$))?")
            .expect("verdict label pattern is valid")
    })
}

fn boolean_regex() -> &'static Regex {
    static BOOLEAN: OnceLock<Regex> = OnceLock::new();
    BOOLEAN.get_or_init(|| {
        Regex::new(r"^(True|False)\b").expect("verdict boolean pattern is valid")
    })
}

/// Strip whitespace and markdown emphasis around a boolean token.
fn clean(section: &str) -> &str {
    section.trim_matches(|c: char| c.is_whitespace() || c == '*' || c == '_')
}

fn parse_bool(section: &str) -> Option<bool> {
    boolean_regex()
        .captures(clean(section))
        .map(|caps| &caps[1] == "True")
}

/// Parse a verifier reply.
///
/// Each section runs from its label to the next label or the end of the
/// text. When a label repeats, the first occurrence wins. Never fails.
pub fn parse(text: &str) -> ParsedVerdict {
    let labels: Vec<_> = label_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let field = VerdictField::from_label(caps.get(1)?.as_str())?;
            Some((field, whole.start(), whole.end()))
        })
        .collect();

    let mut sections: [Option<&str>; 4] = [None; 4];
    for (i, &(field, _, value_start)) in labels.iter().enumerate() {
        let slot = &mut sections[field as usize];
        if slot.is_some() {
            continue;
        }
        let value_end = labels.get(i + 1).map_or(text.len(), |&(_, start, _)| start);
        *slot = Some(&text[value_start..value_end]);
    }

    let mut verdict = Verdict::default();
    let mut missing = Vec::new();

    for field in VerdictField::ALL {
        let Some(section) = sections[field as usize] else {
            missing.push(field);
            continue;
        };
        if field.is_boolean() {
            match parse_bool(section) {
                Some(value) if field == VerdictField::Match => verdict.is_match = value,
                Some(value) => verdict.check_completed = value,
                None => missing.push(field),
            }
        } else if field == VerdictField::Result {
            verdict.result_text = section.trim().to_string();
        } else {
            verdict.adjustment = section.trim().to_string();
        }
    }

    if missing.is_empty() {
        ParsedVerdict::WellFormed(verdict)
    } else {
        ParsedVerdict::Degraded {
            verdict,
            missing,
            reply: text.to_string(),
        }
    }
}
