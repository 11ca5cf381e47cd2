//! Declarative property descriptors.
//!
//! Every instrument model describes its settable/readable properties as a
//! `static` table of [`Descriptor`]s. A descriptor carries the command
//! templates used to read and write the property, the domain a new value must
//! fall in, and the functions that format a value into command text and parse
//! a response back into a [`Value`].
//!
//! Templates use named placeholders (`{value}`, `{channel}`, ...) which are
//! filled from [`CommandArgs`] when a command is rendered.

pub mod codec;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use strfmt::strfmt;

use crate::error::{InstrResult, InstrumentError};

/// Typed value of a property
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Compare two values, allowing numeric values to differ by a relative
    /// `tolerance` (absolute below magnitude 1).
    pub fn approx_eq(&self, other: &Value, tolerance: f64) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => {
                let scale = a.abs().max(b.abs()).max(1.0);
                (a - b).abs() <= tolerance * scale
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// One member of an enumerated domain: the name callers use, the token the
/// instrument understands, and any other spellings the instrument answers with.
#[derive(Debug, Clone, Copy)]
pub struct Choice {
    pub name: &'static str,
    pub token: &'static str,
    pub aliases: &'static [&'static str],
}

impl Choice {
    pub const fn new(name: &'static str, token: &'static str) -> Self {
        Choice {
            name,
            token,
            aliases: &[],
        }
    }

    pub const fn also(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    /// Whether `text` names this choice, by name, token or alias
    pub fn matches(&self, text: &str) -> bool {
        self.name.eq_ignore_ascii_case(text)
            || self.token.eq_ignore_ascii_case(text)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(text))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Domain {
    Any,
    Range { min: f64, max: f64 },
    Choices(&'static [Choice]),
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Any => write!(f, "any"),
            Domain::Range { min, max } => write!(f, "[{}, {}]", min, max),
            Domain::Choices(choices) => {
                let names: Vec<&str> = choices.iter().map(|c| c.name).collect();
                write!(f, "{{{}}}", names.join(", "))
            }
        }
    }
}

pub type FormatFn = fn(&Descriptor, &Value) -> InstrResult<String>;
pub type ParseFn = fn(&Descriptor, &str) -> InstrResult<Value>;

/// How one named property is read, written and parsed
#[derive(Clone, Copy)]
pub struct Descriptor {
    name: &'static str,
    unit: Option<&'static str>,
    domain: Domain,
    query: Option<&'static str>,
    command: Option<&'static str>,
    format: FormatFn,
    parse: ParseFn,
    tolerance: f64,
}

impl Descriptor {
    const fn with_codec(name: &'static str, format: FormatFn, parse: ParseFn) -> Self {
        Descriptor {
            name,
            unit: None,
            domain: Domain::Any,
            query: None,
            command: None,
            format,
            parse,
            tolerance: 1e-9,
        }
    }

    pub const fn float(name: &'static str) -> Self {
        Self::with_codec(name, codec::format_float, codec::parse_float)
    }

    pub const fn int(name: &'static str) -> Self {
        Self::with_codec(name, codec::format_int, codec::parse_int)
    }

    /// Boolean sent as `ON`/`OFF`, read back from `ON`/`OFF`/`1`/`0`
    pub const fn boolean(name: &'static str) -> Self {
        Self::with_codec(name, codec::format_on_off, codec::parse_bool)
    }

    pub const fn choice(name: &'static str, choices: &'static [Choice]) -> Self {
        let mut d = Self::with_codec(name, codec::format_choice, codec::parse_choice);
        d.domain = Domain::Choices(choices);
        d
    }

    pub const fn text(name: &'static str) -> Self {
        Self::with_codec(name, codec::format_text, codec::parse_text)
    }

    /// Template of the command reading the property
    pub const fn query(mut self, template: &'static str) -> Self {
        self.query = Some(template);
        self
    }

    /// Template of the command writing the property; `{value}` receives the
    /// formatted value
    pub const fn command(mut self, template: &'static str) -> Self {
        self.command = Some(template);
        self
    }

    pub const fn unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn range(mut self, min: f64, max: f64) -> Self {
        self.domain = Domain::Range { min, max };
        self
    }

    pub const fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub const fn formatted(mut self, format: FormatFn) -> Self {
        self.format = format;
        self
    }

    pub const fn parsed(mut self, parse: ParseFn) -> Self {
        self.parse = parse;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn unit_name(&self) -> Option<&'static str> {
        self.unit
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn query_template(&self) -> Option<&'static str> {
        self.query
    }

    pub fn command_template(&self) -> Option<&'static str> {
        self.command
    }

    pub fn numeric_tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn is_readable(&self) -> bool {
        self.query.is_some()
    }

    pub fn is_settable(&self) -> bool {
        self.command.is_some()
    }

    /// Check `value` against the declared domain. Enumerated values are
    /// normalised to the choice name.
    pub fn validate(&self, value: &Value) -> InstrResult<Value> {
        match self.domain {
            Domain::Any => Ok(value.clone()),
            Domain::Range { min, max } => {
                let v = value.as_f64().ok_or_else(|| {
                    InstrumentError::Validation(format!(
                        "{} expects a number, got {:?}",
                        self.name, value
                    ))
                })?;
                if v.is_nan() || v < min || v > max {
                    return Err(InstrumentError::Validation(format!(
                        "{} = {} is outside {}",
                        self.name, v, self.domain
                    )));
                }
                Ok(value.clone())
            }
            Domain::Choices(choices) => {
                let text = match value {
                    Value::Text(t) => t.trim().to_owned(),
                    other => other.to_string(),
                };
                choices
                    .iter()
                    .find(|c| c.matches(&text))
                    .map(|c| Value::Text(c.name.to_owned()))
                    .ok_or_else(|| {
                        InstrumentError::Validation(format!(
                            "{} = {:?} is not one of {}",
                            self.name, text, self.domain
                        ))
                    })
            }
        }
    }

    /// Validate then format `value` into command text
    pub fn encode(&self, value: &Value) -> InstrResult<String> {
        let value = self.validate(value)?;
        (self.format)(self, &value)
    }

    pub fn decode(&self, response: &str) -> InstrResult<Value> {
        (self.parse)(self, response)
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("name", &self.name)
            .field("unit", &self.unit)
            .field("domain", &self.domain)
            .field("query", &self.query)
            .field("command", &self.command)
            .finish()
    }
}

/// Placeholder values for command templates
#[derive(Debug, Clone, Default)]
pub struct CommandArgs {
    vars: HashMap<String, String>,
}

impl CommandArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(channel: u32) -> Self {
        Self::new().with("channel", channel)
    }

    pub fn with(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.vars.insert(key.to_owned(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Fill `template`, with `value` bound to `{value}` when given
    pub fn render(&self, template: &str, value: Option<&str>) -> InstrResult<String> {
        let rendered = match value {
            Some(value) => {
                let mut vars = self.vars.clone();
                vars.insert("value".to_owned(), value.to_owned());
                strfmt(template, &vars)
            }
            None => strfmt(template, &self.vars),
        };

        rendered.map_err(|e| {
            InstrumentError::Configuration(format!("Cannot render command {:?}: {}", template, e))
        })
    }
}

/// Flat name → descriptor table built from layered descriptor sets
#[derive(Debug, Clone, Default)]
pub struct PropertyTable {
    entries: BTreeMap<&'static str, &'static Descriptor>,
}

impl PropertyTable {
    /// Merge `layers` in order; a later layer overrides same-named entries of
    /// an earlier one.
    pub fn compose(layers: &[&'static [Descriptor]]) -> Self {
        let mut entries = BTreeMap::new();
        for layer in layers {
            for descriptor in layer.iter() {
                entries.insert(descriptor.name(), descriptor);
            }
        }
        PropertyTable { entries }
    }

    pub fn get(&self, name: &str) -> Option<&'static Descriptor> {
        self.entries.get(name).copied()
    }

    pub fn lookup(&self, name: &str) -> InstrResult<&'static Descriptor> {
        self.get(name)
            .ok_or_else(|| InstrumentError::Validation(format!("Unknown property {:?}", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static Descriptor> + '_ {
        self.entries.values().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static SWITCH: [Choice; 2] = [Choice::new("on", "ON"), Choice::new("off", "OFF")];

    static BASE: &[Descriptor] = &[
        Descriptor::float("level").query("LEV?").command("LEV {value}"),
        Descriptor::text("identity").query("*IDN?"),
    ];

    static MODEL: &[Descriptor] = &[
        Descriptor::float("level")
            .query("SOUR{channel}:LEV?")
            .command("SOUR{channel}:LEV {value}")
            .range(-5.0, 5.0),
        Descriptor::choice("state", &SWITCH).command("STAT {value}"),
    ];

    #[test]
    fn later_layers_override_earlier_ones() {
        let table = PropertyTable::compose(&[BASE, MODEL]);

        assert_eq!(table.len(), 3);
        let level = table.get("level").unwrap();
        assert_eq!(level.query_template(), Some("SOUR{channel}:LEV?"));
        assert!(table.lookup("missing").is_err());
    }

    #[test]
    fn range_rejects_out_of_domain_and_wrong_kind() {
        let level = MODEL[0];
        assert!(level.validate(&Value::Float(4.9)).is_ok());
        assert!(matches!(
            level.validate(&Value::Float(5.1)),
            Err(InstrumentError::Validation(_))
        ));
        assert!(matches!(
            level.validate(&Value::Float(f64::NAN)),
            Err(InstrumentError::Validation(_))
        ));
        assert!(matches!(
            level.validate(&Value::from("high")),
            Err(InstrumentError::Validation(_))
        ));
    }

    #[test]
    fn choices_normalise_to_name_and_encode_to_token() {
        let state = MODEL[1];
        assert_eq!(state.validate(&"ON".into()).unwrap(), Value::from("on"));
        assert_eq!(state.encode(&"off".into()).unwrap(), "OFF");
        assert!(matches!(
            state.encode(&"STANDBY".into()),
            Err(InstrumentError::Validation(_))
        ));
    }

    #[test]
    fn render_fills_placeholders() {
        let args = CommandArgs::channel(2);
        let cmd = args.render("SOUR{channel}:LEV {value}", Some("1.5")).unwrap();
        assert_eq!(cmd, "SOUR2:LEV 1.5");
    }

    #[test]
    fn render_reports_missing_placeholder() {
        let err = CommandArgs::new().render("SOUR{channel}:LEV?", None);
        assert!(matches!(err, Err(InstrumentError::Configuration(_))));
    }

    #[test]
    fn approx_eq_uses_relative_tolerance() {
        assert!(Value::Float(1000.0).approx_eq(&Value::Float(1000.0000001), 1e-9));
        assert!(!Value::Float(1.0).approx_eq(&Value::Float(1.1), 1e-3));
        assert!(Value::Int(3).approx_eq(&Value::Float(3.0), 0.0));
        assert!(Value::from("a").approx_eq(&Value::from("a"), 0.0));
    }
}
