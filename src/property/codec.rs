//! Format and parse functions used by descriptors.

use super::{Descriptor, Domain, Value};
use crate::error::{InstrResult, InstrumentError};
use crate::util::clean_response;

fn expect_number(descriptor: &Descriptor, value: &Value) -> InstrResult<f64> {
    value.as_f64().ok_or_else(|| {
        InstrumentError::Validation(format!(
            "{} expects a number, got {:?}",
            descriptor.name(),
            value
        ))
    })
}

/// Render a number the way SCPI instruments expect it: plain decimal for
/// moderate magnitudes, `1.5E-9` style otherwise.
pub fn scpi_number(v: f64) -> String {
    let magnitude = v.abs();
    if v == 0.0 || (1e-4..1e6).contains(&magnitude) {
        format!("{}", v)
    } else {
        format!("{:E}", v)
    }
}

/// `v` as an `i64` when it is integral and representable
pub(crate) fn integral(v: f64) -> Option<i64> {
    let bounds = i64::MIN as f64..i64::MAX as f64;
    (v.fract() == 0.0 && bounds.contains(&v)).then_some(v as i64)
}

pub fn format_float(descriptor: &Descriptor, value: &Value) -> InstrResult<String> {
    Ok(scpi_number(expect_number(descriptor, value)?))
}

pub fn format_int(descriptor: &Descriptor, value: &Value) -> InstrResult<String> {
    let v = expect_number(descriptor, value)?;
    let n = integral(v).ok_or_else(|| {
        InstrumentError::Validation(format!(
            "{} expects an integer, got {}",
            descriptor.name(),
            v
        ))
    })?;
    Ok(format!("{}", n))
}

fn expect_bool(descriptor: &Descriptor, value: &Value) -> InstrResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Int(0) => Ok(false),
        Value::Int(1) => Ok(true),
        Value::Text(t) => parse_flag(t).ok_or_else(|| {
            InstrumentError::Validation(format!(
                "{} expects on/off, got {:?}",
                descriptor.name(),
                t
            ))
        }),
        other => Err(InstrumentError::Validation(format!(
            "{} expects on/off, got {:?}",
            descriptor.name(),
            other
        ))),
    }
}

pub fn format_on_off(descriptor: &Descriptor, value: &Value) -> InstrResult<String> {
    Ok(if expect_bool(descriptor, value)? { "ON" } else { "OFF" }.to_owned())
}

pub fn format_one_zero(descriptor: &Descriptor, value: &Value) -> InstrResult<String> {
    Ok(if expect_bool(descriptor, value)? { "1" } else { "0" }.to_owned())
}

pub fn format_choice(descriptor: &Descriptor, value: &Value) -> InstrResult<String> {
    let Domain::Choices(choices) = descriptor.domain() else {
        return format_text(descriptor, value);
    };
    let text = value.to_string();
    choices
        .iter()
        .find(|c| c.matches(&text))
        .map(|c| c.token.to_owned())
        .ok_or_else(|| {
            InstrumentError::Validation(format!(
                "{} = {:?} is not one of {}",
                descriptor.name(),
                text,
                descriptor.domain()
            ))
        })
}

pub fn format_text(_descriptor: &Descriptor, value: &Value) -> InstrResult<String> {
    Ok(value.to_string())
}

/// Percentages carried as integer tenths of a percent on the wire
pub fn format_deci_percent(descriptor: &Descriptor, value: &Value) -> InstrResult<String> {
    let v = expect_number(descriptor, value)?;
    let tenths = integral((v * 10.0).round()).ok_or_else(|| {
        InstrumentError::Validation(format!("{} is out of range: {}", descriptor.name(), v))
    })?;
    Ok(format!("{}", tenths))
}

pub fn parse_float(descriptor: &Descriptor, response: &str) -> InstrResult<Value> {
    let text = clean_response(response);
    text.parse::<f64>()
        .map(Value::Float)
        .map_err(|_| InstrumentError::parse(response, format!("a number for {}", descriptor.name())))
}

pub fn parse_int(descriptor: &Descriptor, response: &str) -> InstrResult<Value> {
    let text = clean_response(response);
    if let Ok(v) = text.parse::<i64>() {
        return Ok(Value::Int(v));
    }
    // Some instruments answer integers in NR3 form, e.g. 1.000000E+02
    match text.parse::<f64>().ok().and_then(integral) {
        Some(v) => Ok(Value::Int(v)),
        None => Err(InstrumentError::parse(
            response,
            format!("an integer for {}", descriptor.name()),
        )),
    }
}

fn parse_flag(text: &str) -> Option<bool> {
    match text.to_ascii_uppercase().as_str() {
        "ON" | "TRUE" => Some(true),
        "OFF" | "FALSE" => Some(false),
        other => other.parse::<f64>().ok().map(|v| v > 0.0),
    }
}

pub fn parse_bool(descriptor: &Descriptor, response: &str) -> InstrResult<Value> {
    parse_flag(clean_response(response))
        .map(Value::Bool)
        .ok_or_else(|| InstrumentError::parse(response, format!("on/off for {}", descriptor.name())))
}

pub fn parse_choice(descriptor: &Descriptor, response: &str) -> InstrResult<Value> {
    let Domain::Choices(choices) = descriptor.domain() else {
        return parse_text(descriptor, response);
    };
    let text = clean_response(response);
    choices
        .iter()
        .find(|c| c.matches(text))
        .map(|c| Value::Text(c.name.to_owned()))
        .ok_or_else(|| {
            InstrumentError::parse(
                response,
                format!("one of {} for {}", descriptor.domain(), descriptor.name()),
            )
        })
}

pub fn parse_text(_descriptor: &Descriptor, response: &str) -> InstrResult<Value> {
    Ok(Value::Text(clean_response(response).to_owned()))
}

pub fn parse_deci_percent(descriptor: &Descriptor, response: &str) -> InstrResult<Value> {
    match parse_int(descriptor, response)? {
        Value::Int(v) => Ok(Value::Float(v as f64 / 10.0)),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Choice;

    static FUNCTIONS: [Choice; 2] = [
        Choice::new("voltage", "VOLT").also(&["VOLT:DC"]),
        Choice::new("current", "CURR").also(&["CURR:DC"]),
    ];

    #[test]
    fn numbers_use_exponent_outside_moderate_range() {
        assert_eq!(scpi_number(1.5), "1.5");
        assert_eq!(scpi_number(0.0), "0");
        assert_eq!(scpi_number(-250.0), "-250");
        assert_eq!(scpi_number(2e-9), "2E-9");
        assert_eq!(scpi_number(3.0e7), "3E7");
    }

    #[test]
    fn float_parse_accepts_nr3_and_rejects_garbage() {
        let d = Descriptor::float("voltage");
        assert_eq!(parse_float(&d, "1.234E+00\n").unwrap(), Value::Float(1.234));
        assert_eq!(parse_float(&d, "\"-5e-3\"").unwrap(), Value::Float(-0.005));
        assert!(matches!(
            parse_float(&d, "OVERLOAD"),
            Err(InstrumentError::Parse { .. })
        ));
    }

    #[test]
    fn int_parse_accepts_integral_nr3() {
        let d = Descriptor::int("points");
        assert_eq!(parse_int(&d, "+100").unwrap(), Value::Int(100));
        assert_eq!(parse_int(&d, "1.000000E+02").unwrap(), Value::Int(100));
        assert!(parse_int(&d, "1.5").is_err());
        assert!(parse_int(&d, "1E30").is_err());
    }

    #[test]
    fn huge_integers_are_rejected_not_saturated() {
        let d = Descriptor::int("count");
        assert_eq!(format_int(&d, &Value::Float(65536.0)).unwrap(), "65536");
        assert!(matches!(
            format_int(&d, &Value::Float(1e30)),
            Err(InstrumentError::Validation(_))
        ));
        assert!(matches!(
            format_int(&d, &Value::Float(f64::NAN)),
            Err(InstrumentError::Validation(_))
        ));
        assert!(integral(-9.3e18).is_none());
    }

    #[test]
    fn bool_codecs() {
        let d = Descriptor::boolean("output");
        assert_eq!(format_on_off(&d, &Value::Bool(true)).unwrap(), "ON");
        assert_eq!(format_one_zero(&d, &Value::from("off")).unwrap(), "0");
        assert_eq!(parse_bool(&d, "1").unwrap(), Value::Bool(true));
        assert_eq!(parse_bool(&d, "OFF").unwrap(), Value::Bool(false));
        assert!(parse_bool(&d, "maybe").is_err());
        assert!(format_on_off(&d, &Value::Float(0.5)).is_err());
    }

    #[test]
    fn choice_parse_accepts_aliases() {
        let d = Descriptor::choice("function", &FUNCTIONS);
        assert_eq!(parse_choice(&d, "\"VOLT:DC\"").unwrap(), Value::from("voltage"));
        assert_eq!(parse_choice(&d, "CURR").unwrap(), Value::from("current"));
        assert!(parse_choice(&d, "RES").is_err());
        assert_eq!(format_choice(&d, &Value::from("current")).unwrap(), "CURR");
    }

    #[test]
    fn deci_percent_scales_by_ten() {
        let d = Descriptor::float("gain");
        assert_eq!(format_deci_percent(&d, &Value::Float(45.5)).unwrap(), "455");
        assert_eq!(parse_deci_percent(&d, "455").unwrap(), Value::Float(45.5));
    }
}
