use crate::config;
use crate::voltronic::packet_decoder::Response;

use num_enum::TryFromPrimitive;
use serde::Serialize;

// {{{ Qpigs
/// Decoded reply to `QPIGS`.
///
/// Tokens are positional. A field is only present when its token exists and
/// parses to a finite number; nothing is ever filled in.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Qpigs {
    pub raw_fields: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_v: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_hz: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ac_out_v: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ac_out_hz: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apparent_power_va: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_power_w: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_pct: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus_v: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_v: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_charge_a: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_capacity_pct: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heatsink_c: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pv_input_a: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pv_input_v: Option<f64>,

    /// pv_input_v * pv_input_a, rounded to one decimal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pv_w_est: Option<f64>,
}

impl Qpigs {
    pub fn parse(text: &str) -> Self {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        Self::from_tokens(&tokens)
    }

    pub fn from_tokens(tokens: &[&str]) -> Self {
        let float = |i: usize| tokens.get(i).and_then(|t| parse_float(t));
        let int = |i: usize| tokens.get(i).and_then(|t| parse_int(t));

        let mut r = Self {
            raw_fields: tokens.iter().map(|t| t.to_string()).collect(),
            grid_v: float(0),
            grid_hz: float(1),
            ac_out_v: float(2),
            ac_out_hz: float(3),
            apparent_power_va: int(4),
            active_power_w: int(5),
            load_pct: int(6),
            bus_v: int(7),
            battery_v: float(8),
            battery_charge_a: int(9),
            battery_capacity_pct: int(10),
            heatsink_c: int(11),
            pv_input_a: int(12),
            pv_input_v: float(13),
            pv_w_est: None,
        };

        if let (Some(v), Some(a)) = (r.pv_input_v, r.pv_input_a) {
            r.pv_w_est = Some((v * a as f64 * 10.0).round() / 10.0);
        }

        r
    }
}

// leading decimal number, so "51.2V" is 51.2 and "V51" is nothing
fn parse_float(token: &str) -> Option<f64> {
    let bytes = token.as_bytes();
    let digits = |from: usize| bytes[from..].iter().take_while(|b| b.is_ascii_digit()).count();

    let mut end = usize::from(token.starts_with(&['-', '+'][..]));
    let whole = digits(end);
    end += whole;
    let mut fraction = 0;
    if bytes.get(end).copied() == Some(b'.') {
        fraction = digits(end + 1);
        end += 1 + fraction;
    }
    if whole + fraction == 0 {
        return None;
    }

    if matches!(bytes.get(end).copied(), Some(b'e') | Some(b'E')) {
        let mut exponent = end + 1;
        if matches!(bytes.get(exponent).copied(), Some(b'-') | Some(b'+')) {
            exponent += 1;
        }
        let n = digits(exponent);
        if n > 0 {
            end = exponent + n;
        }
    }

    token[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}

// leading decimal integer, so "051" is 51 and "12.5" is 12
fn parse_int(token: &str) -> Option<i64> {
    let digits_start = usize::from(token.starts_with(&['-', '+'][..]));
    let digits_end = token[digits_start..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(token.len(), |i| i + digits_start);

    if digits_end == digits_start {
        return None;
    }
    token[..digits_end].parse().ok()
} // }}}

// {{{ Mode
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Mode {
    PowerOn = 0x50,     // P
    Standby = 0x53,     // S
    Line = 0x4c,        // L
    Battery = 0x42,     // B
    Fault = 0x46,       // F
    PowerSaving = 0x48, // H
}

impl Mode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::PowerOn => "PowerOn",
            Self::Standby => "Standby",
            Self::Line => "Line",
            Self::Battery => "Battery",
            Self::Fault => "Fault",
            Self::PowerSaving => "PowerSaving",
        }
    }
}

/// Decoded reply to `QMOD`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModeRecord {
    pub mode_code: String,
    pub mode: String,
}

impl ModeRecord {
    pub const PLACEHOLDER_CODE: &'static str = "?";
    pub const PLACEHOLDER_LABEL: &'static str = "Unknown";

    /// Looks at the first character only. Unknown codes are passed through
    /// as their own label.
    pub fn parse(text: &str) -> Self {
        let Some(c) = text.trim().chars().next() else {
            return Self {
                mode_code: Self::PLACEHOLDER_CODE.to_string(),
                mode: Self::PLACEHOLDER_LABEL.to_string(),
            };
        };

        let code = c.to_string();
        let mode = u8::try_from(c)
            .ok()
            .and_then(|b| Mode::try_from(b).ok())
            .map_or_else(|| code.clone(), |m| m.label().to_string());

        Self {
            mode_code: code,
            mode,
        }
    }
} // }}}

// {{{ Telemetry
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Raw {
    #[serde(rename = "QPIGS")]
    pub qpigs: Option<String>,
    #[serde(rename = "QMOD")]
    pub qmod: Option<String>,
}

/// What gets published on `<device>/state` once per poll cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Telemetry {
    pub timestamp: String,
    pub inverter: String,
    pub port: String,
    pub ok: bool,
    pub raw: Raw,

    #[serde(flatten)]
    pub metrics: Option<Qpigs>,
    #[serde(flatten)]
    pub mode: Option<ModeRecord>,
}

impl Telemetry {
    /// Builds the record from this cycle's two responses alone. A failed or
    /// empty response contributes a null raw value and no decoded fields.
    pub fn new(
        inverter: &config::Inverter,
        timestamp: String,
        qpigs: &Response,
        qmod: &Response,
    ) -> Self {
        let decoded = |r: &Response| r.as_ref().ok().filter(|t| !t.is_empty()).cloned();

        Self {
            timestamp,
            inverter: inverter.name().to_string(),
            port: inverter.port().to_string(),
            ok: qpigs.is_ok() && qmod.is_ok(),
            raw: Raw {
                qpigs: qpigs.as_ref().ok().cloned(),
                qmod: qmod.as_ref().ok().cloned(),
            },
            metrics: decoded(qpigs).map(|t| Qpigs::parse(&t)),
            mode: decoded(qmod).map(|t| ModeRecord::parse(&t)),
        }
    }
} // }}}
