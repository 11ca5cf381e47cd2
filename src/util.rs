use crate::error::{InstrResult, InstrumentError};

/// Strip surrounding whitespace, line endings and double quotes from a response
pub(crate) fn clean_response(response: &str) -> &str {
    response.trim_matches(|c: char| c.is_whitespace() || c == '"')
}

/// Split a delimited list of numbers, e.g. `1.0E-3,2.0E-3`
pub(crate) fn split_values(response: &str, separator: char) -> InstrResult<Vec<f64>> {
    let text = clean_response(response);
    if text.is_empty() {
        return Ok(Vec::new());
    }

    text.split(separator)
        .map(|item| {
            let item = clean_response(item);
            item.parse::<f64>()
                .map_err(|_| InstrumentError::parse(item, "a number in a value list"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_strips_quotes_and_terminators() {
        assert_eq!(clean_response("\"VOLT:DC\"\r\n"), "VOLT:DC");
        assert_eq!(clean_response("  1.5 "), "1.5");
    }

    #[test]
    fn split_values_parses_each_element() {
        assert_eq!(
            split_values("1.0E-3, 2.5,-4\n", ',').unwrap(),
            vec![0.001, 2.5, -4.0]
        );
        assert!(split_values("", ',').unwrap().is_empty());
        assert!(split_values("1,abc,3", ',').is_err());
    }
}
