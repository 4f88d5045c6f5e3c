//! Control Directive Grammar
//!
//! Assistant responses may embed one LED control directive:
//! ```text
//! directive := TOKEN ( WS key "=" value )*
//! TOKEN     := "LED_CONTROL_ON" | "LED_CONTROL_OFF" | "LED_CONTROL_BLINK"
//! ```
//! The earliest token in the text wins; ties go to the scan order
//! ON, OFF, BLINK. Every token occurrence is stripped from the text shown to
//! the peer, but only the winning one is actuated.

use thiserror::Error;

use crate::Seconds;

/// Blink delay used when a blink directive carries no `delay`
pub const DEFAULT_BLINK_DELAY: Seconds = 0.5;

/// Blink count used when a blink directive carries no `times`
pub const DEFAULT_BLINK_TIMES: u32 = 5;

/// Errors raised while reading directive parameters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectiveError {
    #[error("invalid value for {key}: '{value}'")]
    Parameter { key: String, value: String },
}

/// Directive families, in scan order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    On,
    Off,
    Blink,
}

impl DirectiveKind {
    /// Scan order used to break ties between tokens at the same position
    pub const SCAN_ORDER: [DirectiveKind; 3] =
        [DirectiveKind::On, DirectiveKind::Off, DirectiveKind::Blink];

    /// Token recognized inside assistant text
    pub fn token(self) -> &'static str {
        match self {
            DirectiveKind::On => "LED_CONTROL_ON",
            DirectiveKind::Off => "LED_CONTROL_OFF",
            DirectiveKind::Blink => "LED_CONTROL_BLINK",
        }
    }

    /// Keyword accepted as a local command typed by the peer
    pub fn keyword(self) -> &'static str {
        match self {
            DirectiveKind::On => "on",
            DirectiveKind::Off => "off",
            DirectiveKind::Blink => "blink",
        }
    }

    fn accepts(self, key: &str) -> bool {
        match self {
            DirectiveKind::On => key == "duration",
            DirectiveKind::Off => false,
            DirectiveKind::Blink => matches!(key, "duration" | "delay" | "times"),
        }
    }
}

/// An actuator instruction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlDirective {
    TurnOn {
        duration: Option<Seconds>,
    },
    TurnOff,
    Blink {
        delay: Seconds,
        times: u32,
        duration: Option<Seconds>,
    },
}

impl ControlDirective {
    /// Blink directive with the implicit duration `times * delay * 2` filled in
    pub fn blink(delay: Seconds, times: u32, duration: Option<Seconds>) -> Self {
        ControlDirective::Blink {
            delay,
            times,
            duration: Some(duration.unwrap_or(times as Seconds * delay * 2.0)),
        }
    }

    /// Directive family
    pub fn kind(&self) -> DirectiveKind {
        match self {
            ControlDirective::TurnOn { .. } => DirectiveKind::On,
            ControlDirective::TurnOff => DirectiveKind::Off,
            ControlDirective::Blink { .. } => DirectiveKind::Blink,
        }
    }
}

/// Result of scanning one assistant response
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    /// The winning directive, none, or the parameter error that voided it
    pub directive: Result<Option<ControlDirective>, DirectiveError>,
    /// Response text with directives removed, trimmed
    pub remainder: String,
}

#[derive(Debug, Default)]
struct Params {
    duration: Option<Seconds>,
    delay: Option<Seconds>,
    times: Option<u32>,
}

/// Split a `key=value` word; `None` if the word is not a parameter
fn split_param(word: &str) -> Option<(&str, &str)> {
    let (key, value) = word.split_once('=')?;
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((key, value))
}

fn parse_number(key: &str, value: &str) -> Result<f64, DirectiveError> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(DirectiveError::Parameter {
            key: key.into(),
            value: value.into(),
        }),
    }
}

impl Params {
    fn set(&mut self, kind: DirectiveKind, key: &str, value: &str) -> Result<(), DirectiveError> {
        if !kind.accepts(key) {
            return Ok(());
        }
        let number = parse_number(key, value)?;
        match key {
            "duration" => self.duration = Some(number),
            "delay" => self.delay = Some(number),
            "times" => {
                let truncated = number.trunc();
                if truncated < 0.0 || truncated > u32::MAX as f64 {
                    return Err(DirectiveError::Parameter {
                        key: key.into(),
                        value: value.into(),
                    });
                }
                self.times = Some(truncated as u32);
            }
            _ => {}
        }
        Ok(())
    }

    fn into_directive(self, kind: DirectiveKind) -> ControlDirective {
        match kind {
            DirectiveKind::On => ControlDirective::TurnOn {
                duration: self.duration,
            },
            DirectiveKind::Off => ControlDirective::TurnOff,
            DirectiveKind::Blink => ControlDirective::blink(
                self.delay.unwrap_or(DEFAULT_BLINK_DELAY),
                self.times.unwrap_or(DEFAULT_BLINK_TIMES),
                self.duration,
            ),
        }
    }
}

/// Every token occurrence as `(start, kind)`, earliest first, ties in scan order
fn find_tokens(text: &str) -> Vec<(usize, DirectiveKind)> {
    let mut found = Vec::new();
    for (rank, kind) in DirectiveKind::SCAN_ORDER.iter().enumerate() {
        for (pos, _) in text.match_indices(kind.token()) {
            found.push((pos, rank, *kind));
        }
    }
    found.sort_by_key(|&(pos, rank, _)| (pos, rank));
    found.into_iter().map(|(pos, _, kind)| (pos, kind)).collect()
}

/// Read the `key=value` words that directly follow a token
///
/// Returns the byte offset where the parameter run ends and the parameters.
fn read_params(
    text: &str,
    mut cursor: usize,
    kind: DirectiveKind,
) -> (usize, Result<Params, DirectiveError>) {
    let mut params = Params::default();
    let mut error = None;

    loop {
        let rest = &text[cursor..];
        let word_start = rest.len() - rest.trim_start().len();
        if word_start == 0 {
            break;
        }
        let word = rest[word_start..]
            .split(char::is_whitespace)
            .next()
            .unwrap_or_default();
        let Some((key, value)) = split_param(word) else {
            break;
        };
        if error.is_none() {
            if let Err(e) = params.set(kind, key, value) {
                error = Some(e);
            }
        }
        cursor += word_start + word.len();
    }

    match error {
        Some(e) => (cursor, Err(e)),
        None => (cursor, Ok(params)),
    }
}

/// Remove byte spans (sorted, non-overlapping) plus the whitespace after each
fn strip_spans(text: &str, spans: &[(usize, usize)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for &(start, end) in spans {
        if start < cursor {
            continue;
        }
        out.push_str(&text[cursor..start]);
        let tail = &text[end..];
        cursor = end + (tail.len() - tail.trim_start().len());
    }
    out.push_str(&text[cursor..]);
    out.trim().to_string()
}

/// Scan an assistant response for a control directive
pub fn parse(response: &str) -> ParsedResponse {
    let tokens = find_tokens(response);

    let Some(&(start, kind)) = tokens.first() else {
        return ParsedResponse {
            directive: Ok(None),
            remainder: response.trim().to_string(),
        };
    };

    let (params_end, params) = read_params(response, start + kind.token().len(), kind);

    let mut spans = vec![(start, params_end)];
    spans.extend(
        tokens[1..]
            .iter()
            .filter(|(pos, _)| *pos >= params_end)
            .map(|&(pos, other)| (pos, pos + other.token().len())),
    );

    ParsedResponse {
        directive: params.map(|p| Some(p.into_directive(kind))),
        remainder: strip_spans(response, &spans),
    }
}

/// Parse a local command line such as `blink delay=0.2 times=3`
///
/// Returns `None` unless the first word is a directive keyword
/// (case-insensitive) and every following word is a `key=value` parameter.
pub fn parse_command(line: &str) -> Option<Result<ControlDirective, DirectiveError>> {
    let mut words = line.split_whitespace();
    let first = words.next()?;
    let kind = DirectiveKind::SCAN_ORDER
        .into_iter()
        .find(|k| first.eq_ignore_ascii_case(k.keyword()))?;

    let pairs: Vec<(&str, &str)> = words.map(split_param).collect::<Option<_>>()?;

    let mut params = Params::default();
    for (key, value) in pairs {
        if let Err(e) = params.set(kind, key, value) {
            return Some(Err(e));
        }
    }
    Some(Ok(params.into_directive(kind)))
}
