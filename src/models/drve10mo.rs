//! iXblue DR-VE-10-MO RF amplifier driver.
//!
//! The amplifier answers every command, `OK`-style or `ERR`, and knows no
//! SCPI common commands. Percentages go over the wire as integer tenths.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::adapter::{Adapter, AdapterSettings};
use crate::error::{InstrResult, InstrumentError};
use crate::instrument::Instrument;
use crate::metadata::load_metadata_as;
use crate::property::codec::{format_deci_percent, integral, parse_deci_percent};
use crate::property::{CommandArgs, Descriptor, PropertyTable};

use super::InstrumentDriver;

pub const NAME: &str = "DR-VE-10-MO";

const BAUD_RATE: u32 = 115200;
const TERMINATION: &str = "\r";

pub static PROPERTIES: &[Descriptor] = &[
    Descriptor::float("gain")
        .unit("%")
        .query("GD?")
        .command("GD {value}")
        .range(0.0, 100.0)
        .tolerance(0.05)
        .formatted(format_deci_percent)
        .parsed(parse_deci_percent),
    Descriptor::float("amplitude")
        .unit("%")
        .query("AM?")
        .command("AM {value}")
        .range(0.0, 100.0)
        .tolerance(0.05)
        .formatted(format_deci_percent)
        .parsed(parse_deci_percent),
    Descriptor::float("crosspoint")
        .unit("%")
        .query("XP?")
        .command("XP {value}")
        .range(0.0, 100.0)
        .tolerance(0.05)
        .formatted(format_deci_percent)
        .parsed(parse_deci_percent),
    Descriptor::int("temperature").unit("°C").query("T?"),
];

/// Reject the amplifier's `ERR` reply
fn check_reply(command: &str, reply: &str) -> InstrResult<()> {
    if reply == "ERR" {
        return Err(InstrumentError::Device(format!(
            "{} returned an error",
            command
        )));
    }
    Ok(())
}

/// Gain, amplitude and crosspoint, in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmplifierSettings {
    pub gain: f64,
    pub amplitude: f64,
    pub crosspoint: f64,
}

/// Coefficients `[min, max, k, a]` of the output amplitude S-curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fit {
    pub coefficients: [f64; 4],
}

/// Calibration header of an amplifier characterisation file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    #[serde(rename = "amplifier settings")]
    pub settings: AmplifierSettings,
    pub fit: Fit,
}

impl Calibration {
    /// Input amplitude that makes the amplifier output `amplitude`.
    ///
    /// Inverts the fitted curve
    /// `out = min + (max - min) / (1 + exp(-k * in)) ^ a`.
    pub fn define_input_amplitude(&self, amplitude: f64) -> InstrResult<f64> {
        let [min, max, k, a] = self.fit.coefficients;
        if k == 0.0 || a == 0.0 || max <= min {
            return Err(InstrumentError::Configuration(format!(
                "Degenerate amplifier fit {:?}",
                self.fit.coefficients
            )));
        }
        if amplitude <= min || amplitude >= max {
            return Err(InstrumentError::Validation(format!(
                "Output amplitude {} is outside the reachable range ({}, {})",
                amplitude, min, max
            )));
        }

        let ratio = ((max - min) / (amplitude - min)).powf(1.0 / a) - 1.0;
        if ratio <= 0.0 {
            return Err(InstrumentError::Validation(format!(
                "Output amplitude {} is not reachable with fit {:?}",
                amplitude, self.fit.coefficients
            )));
        }
        Ok((-1.0 / k) * ratio.ln())
    }
}

pub struct DrVe10Mo {
    instrument: Instrument,
}

impl DrVe10Mo {
    pub fn properties() -> PropertyTable {
        PropertyTable::compose(&[PROPERTIES])
    }

    pub fn default_settings() -> AdapterSettings {
        AdapterSettings::default()
            .with_baud_rate(BAUD_RATE)
            .with_terminations(TERMINATION)
    }

    pub fn new(adapter: Adapter) -> Self {
        let instrument = Instrument::new(NAME, adapter, Self::properties())
            .without_scpi()
            .with_acknowledgement(check_reply);
        DrVe10Mo { instrument }
    }

    /// Open the amplifier at `resource` (`ASRL<port>::INSTR`) with its
    /// default serial settings
    pub fn connect(resource: &str) -> InstrResult<Self> {
        info!("Opening {} on {}", NAME, resource);
        Ok(Self::new(Adapter::open(resource, Self::default_settings())?))
    }

    pub fn gain(&mut self) -> InstrResult<f64> {
        self.instrument.get_f64("gain", &CommandArgs::new())
    }

    pub fn set_gain(&mut self, gain: f64) -> InstrResult<()> {
        self.instrument.set("gain", gain)
    }

    pub fn amplitude(&mut self) -> InstrResult<f64> {
        self.instrument.get_f64("amplitude", &CommandArgs::new())
    }

    pub fn set_amplitude(&mut self, amplitude: f64) -> InstrResult<()> {
        self.instrument.set("amplitude", amplitude)
    }

    pub fn crosspoint(&mut self) -> InstrResult<f64> {
        self.instrument.get_f64("crosspoint", &CommandArgs::new())
    }

    pub fn set_crosspoint(&mut self, crosspoint: f64) -> InstrResult<()> {
        self.instrument.set("crosspoint", crosspoint)
    }

    pub fn temperature(&mut self) -> InstrResult<i64> {
        let temperature = self.instrument.get_f64("temperature", &CommandArgs::new())?;
        integral(temperature)
            .ok_or_else(|| InstrumentError::parse(&temperature.to_string(), "a temperature in degrees"))
    }

    pub fn set_settings(&mut self, settings: &AmplifierSettings) -> InstrResult<()> {
        self.set_gain(settings.gain)?;
        self.set_amplitude(settings.amplitude)?;
        self.set_crosspoint(settings.crosspoint)
    }

    pub fn enable(&mut self) -> InstrResult<()> {
        self.instrument.write("P ON")
    }

    pub fn disable(&mut self) -> InstrResult<()> {
        self.instrument.write("P OFF")
    }

    /// Read the calibration header of the characterisation file at `path`
    pub fn load_calibration(path: impl AsRef<Path>) -> InstrResult<Calibration> {
        load_metadata_as(path)
    }
}

impl InstrumentDriver for DrVe10Mo {
    fn instrument(&mut self) -> &mut Instrument {
        &mut self.instrument
    }

    fn shutdown(&mut self) -> InstrResult<()> {
        self.disable()?;
        self.instrument.mark_shut_down();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::interface::mock::MockTransport;

    fn serial_mock() -> MockTransport {
        MockTransport::new().with_reply_termination("\r")
    }

    fn amplifier(mock: &MockTransport) -> DrVe10Mo {
        DrVe10Mo::new(Adapter::from_device(
            "ASRL/dev/ttyUSB0::INSTR",
            mock.boxed(),
            DrVe10Mo::default_settings(),
        ))
    }

    fn calibration() -> Calibration {
        Calibration {
            settings: AmplifierSettings {
                gain: 50.0,
                amplitude: 80.0,
                crosspoint: 50.0,
            },
            fit: Fit {
                coefficients: [0.5, 9.5, 3.0, 1.0],
            },
        }
    }

    #[test]
    fn percentages_are_sent_in_tenths() {
        let mock = serial_mock().with_acknowledgement("OK");
        let mut amplifier = amplifier(&mock);

        amplifier.set_gain(45.5).unwrap();
        amplifier.enable().unwrap();
        assert_eq!(mock.written(), vec!["GD 455".to_owned(), "P ON".to_owned()]);
    }

    #[test]
    fn gain_reads_back_in_percent() {
        let mock = serial_mock();
        mock.respond_to("GD?", "455");
        let mut amplifier = amplifier(&mock);

        assert_eq!(amplifier.gain().unwrap(), 45.5);
    }

    #[test]
    fn err_reply_is_a_device_error() {
        let mock = serial_mock().with_acknowledgement("ERR");
        let mut amplifier = amplifier(&mock);

        match amplifier.set_crosspoint(50.0) {
            Err(InstrumentError::Device(message)) => assert!(message.contains("XP 500")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(mock.write_count(), 1);
    }

    #[test]
    fn gain_above_full_scale_is_rejected() {
        let mock = serial_mock().with_acknowledgement("OK");
        let mut amplifier = amplifier(&mock);

        assert!(matches!(
            amplifier.set_gain(100.5),
            Err(InstrumentError::Validation(_))
        ));
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn shutdown_powers_down() {
        let mock = serial_mock().with_acknowledgement("OK");
        let mut amplifier = amplifier(&mock);

        amplifier.shutdown().unwrap();
        assert_eq!(mock.written(), vec!["P OFF".to_owned()]);
        assert!(amplifier.instrument().is_shut_down());
        assert!(!amplifier.instrument().is_scpi());
    }

    #[test]
    fn input_amplitude_inverts_the_fit() {
        let calibration = calibration();
        let [min, max, k, a] = calibration.fit.coefficients;

        let input = calibration.define_input_amplitude(5.0).unwrap();
        let output = min + (max - min) / (1.0 + (-k * input).exp()).powf(a);
        assert!((output - 5.0).abs() < 1e-9);
        // Midpoint of a symmetric curve sits at zero input
        assert!(input.abs() < 1e-12);
    }

    #[test]
    fn unreachable_amplitude_is_rejected() {
        let calibration = calibration();

        assert!(matches!(
            calibration.define_input_amplitude(9.5),
            Err(InstrumentError::Validation(_))
        ));
        assert!(matches!(
            calibration.define_input_amplitude(0.2),
            Err(InstrumentError::Validation(_))
        ));
    }

    #[test]
    fn calibration_loads_from_file_header() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "# amplifier settings:\n\
             #     gain: 50\n\
             #     amplitude: 80\n\
             #     crosspoint: 50\n\
             # fit:\n\
             #     coefficients: [0.5, 9.5, 3.0, 1.0]\n\
             0.0, 0.51\n"
        )
        .unwrap();

        let loaded = DrVe10Mo::load_calibration(file.path()).unwrap();
        assert_eq!(loaded, calibration());
    }
}
