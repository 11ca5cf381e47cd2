//! YAML metadata stored as the `#`-commented header of a data file.
//!
//! ```text
//! # instrument: DR-VE-10-MO
//! # fit:
//! #     coefficients: [0.5, 9.5, 3.2, 1.1]
//! 0.0, 0.51
//! 1.0, 0.98
//! ```

use std::fs;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{InstrResult, InstrumentError};

/// Extract the YAML text held in the leading `#` lines of `content`
pub fn header_yaml(content: &str) -> String {
    let mut yaml = String::new();
    for line in content.lines() {
        let Some(stripped) = line.strip_prefix('#') else {
            break;
        };
        yaml.push_str(&stripped.replace('\t', "    "));
        yaml.push('\n');
    }
    yaml
}

fn read_header(path: &Path) -> InstrResult<String> {
    let content = fs::read_to_string(path).map_err(|e| {
        InstrumentError::Configuration(format!("Could not read {}: {}", path.display(), e))
    })?;
    Ok(header_yaml(&content))
}

/// Load the metadata header of the data file at `path`
pub fn load_metadata(path: impl AsRef<Path>) -> InstrResult<serde_yaml::Value> {
    load_metadata_as(path)
}

/// Load the metadata header of the data file at `path` into `T`
pub fn load_metadata_as<T: DeserializeOwned>(path: impl AsRef<Path>) -> InstrResult<T> {
    let path = path.as_ref();
    let yaml = read_header(path)?;
    serde_yaml::from_str(&yaml).map_err(|e| {
        InstrumentError::Configuration(format!("Bad metadata in {}: {}", path.display(), e))
    })
}

/// Render `metadata` as a `#`-commented header ready to be written above data rows
pub fn metadata_header<T: Serialize>(metadata: &T) -> InstrResult<String> {
    let yaml = serde_yaml::to_string(metadata)
        .map_err(|e| InstrumentError::Configuration(format!("Cannot encode metadata: {}", e)))?;

    Ok(yaml.lines().map(|line| format!("# {}\n", line)).collect())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Run {
        operator: String,
        points: u32,
    }

    fn data_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn header_stops_at_first_data_line() {
        let yaml = header_yaml("# a: 1\n# b:\n#\tc: 2\n1,2\n# d: 3\n");
        assert_eq!(yaml, " a: 1\n b:\n    c: 2\n");
    }

    #[test]
    fn loads_nested_header() {
        let file = data_file("# fit:\n#\tcoefficients: [1.0, 2.0]\n0.1,0.2\n");
        let metadata = load_metadata(file.path()).unwrap();
        let coefficients = &metadata["fit"]["coefficients"];
        assert_eq!(coefficients[1].as_f64(), Some(2.0));
    }

    #[test]
    fn loads_typed_header() {
        let file = data_file("# operator: bench-2\n# points: 11\n");
        let run: Run = load_metadata_as(file.path()).unwrap();
        assert_eq!(
            run,
            Run {
                operator: "bench-2".to_owned(),
                points: 11
            }
        );
    }

    #[test]
    fn written_header_loads_back() {
        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("instrument", "Keithley 2450");
        let header = metadata_header(&metadata).unwrap();
        assert_eq!(header, "# instrument: Keithley 2450\n");

        let file = data_file(&format!("{}1,2\n", header));
        let loaded = load_metadata(file.path()).unwrap();
        assert_eq!(loaded["instrument"].as_str(), Some("Keithley 2450"));
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        assert!(matches!(
            load_metadata("/nonexistent/calibration.dat"),
            Err(InstrumentError::Configuration(_))
        ));
    }
}
