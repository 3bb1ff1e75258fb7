use rust_decimal::{prelude::FromPrimitive, Decimal, RoundingStrategy};
use serde::Serialize;
use thiserror::Error;

/// Number of input registers the meter exposes per phase, starting at address 0.
pub const BLOCK_LEN: usize = 10;

/// The register block returned by a single "read input registers" transaction. Positional only.
pub type RawRegisterBlock = [u16; BLOCK_LEN];

/// Power factor register is in hundredths, so anything above this is outside `[0, 1]`.
const MAX_POWER_FACTOR: u16 = 100;

const DECIMAL_PLACES: u32 = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Power factor register out of range: {0}")]
    PowerFactor(u16),

    #[error("Value of {field} is not a finite number")]
    NotFinite { field: &'static str },
}

/// Electrical quantities of one phase, each rounded to 3 decimal places.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PhaseMeasurement {
    pub voltage: f64,
    pub current: f64,
    pub freq: f64,
    pub power_real: f64,
    pub power_factor: f64,
    pub power_angle: f64,
    pub power_full: f64,
    pub power_reactive: f64,
}

impl PhaseMeasurement {
    /// Field name and value pairs, in declaration order.
    pub fn fields(&self) -> [(&'static str, f64); 8] {
        [
            ("voltage", self.voltage),
            ("current", self.current),
            ("freq", self.freq),
            ("power_real", self.power_real),
            ("power_factor", self.power_factor),
            ("power_angle", self.power_angle),
            ("power_full", self.power_full),
            ("power_reactive", self.power_reactive),
        ]
    }
}

/// Combines two registers into a 32-bit value, low word first.
fn combine(low: u16, high: u16) -> u32 {
    u32::from(low) | u32::from(high) << 16
}

/// Rounds half-to-even on the decimal value, then takes the closest `f64` to the result.
fn round(field: &'static str, value: f64) -> Result<f64, DecodeError> {
    let rounded = Decimal::from_f64(value)
        .ok_or(DecodeError::NotFinite { field })?
        .round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointNearestEven);
    Ok(rounded.mantissa() as f64 / 10f64.powi(rounded.scale() as i32))
}

pub fn decode(reg: &RawRegisterBlock) -> Result<PhaseMeasurement, DecodeError> {
    if reg[8] > MAX_POWER_FACTOR {
        return Err(DecodeError::PowerFactor(reg[8]));
    }

    let power_real = f64::from(combine(reg[3], reg[4])) * 0.1;
    let power_factor = f64::from(reg[8]) * 0.01;
    let power_angle = power_factor.acos();
    let (power_full, power_reactive) = if power_factor > 0.0 {
        let power_full = power_real / power_factor;
        (power_full, power_full * power_angle.sin())
    } else {
        (0.0, 0.0)
    };

    Ok(PhaseMeasurement {
        voltage: round("voltage", f64::from(reg[0]) * 0.1)?,
        current: round("current", f64::from(combine(reg[1], reg[2])) * 0.001)?,
        freq: round("freq", f64::from(reg[7]) * 0.1)?,
        power_real: round("power_real", power_real)?,
        power_factor: round("power_factor", power_factor)?,
        power_angle: round("power_angle", power_angle)?,
        power_full: round("power_full", power_full)?,
        power_reactive: round("power_reactive", power_reactive)?,
    })
}

#[cfg(test)]
use pretty_assertions::assert_eq;

#[test]
fn decode_nominal_block() {
    let m = decode(&[2300, 1000, 0, 5000, 0, 0, 0, 500, 80, 0]).unwrap();
    assert_eq!(
        m,
        PhaseMeasurement {
            voltage: 230.0,
            current: 1.0,
            freq: 50.0,
            power_real: 500.0,
            power_factor: 0.8,
            power_angle: 0.644,
            power_full: 625.0,
            power_reactive: 375.0,
        }
    );
}

#[test]
fn decode_is_deterministic() {
    let block = [2291, 4321, 0, 9123, 0, 0, 0, 499, 93, 0];
    let first = decode(&block).unwrap();
    decode(&[0; BLOCK_LEN]).unwrap();
    assert_eq!(decode(&block).unwrap(), first);
}

#[test]
fn zero_power_factor_has_no_apparent_power() {
    let m = decode(&[2300, 1000, 0, 5000, 7, 0, 0, 500, 0, 0]).unwrap();
    assert_eq!(m.power_factor, 0.0);
    assert_eq!(m.power_full, 0.0);
    assert_eq!(m.power_reactive, 0.0);
    assert_eq!(m.power_real, 46375.2);
    assert_eq!(m.power_angle, 1.571);
}

#[test]
fn unity_power_factor_has_no_reactive_power() {
    let m = decode(&[2300, 1000, 0, 5000, 0, 0, 0, 500, 100, 0]).unwrap();
    assert_eq!(m.power_angle, 0.0);
    assert_eq!(m.power_full, 500.0);
    assert_eq!(m.power_reactive, 0.0);
}

#[test]
fn high_word_is_significant() {
    let m = decode(&[0, 0, 1, 0, 0, 0, 0, 0, 0, 0]).unwrap();
    assert_eq!(m.current, 65.536);
}

#[test]
fn power_factor_above_one_is_rejected() {
    assert_eq!(
        decode(&[2300, 1000, 0, 5000, 0, 0, 0, 500, 101, 0]),
        Err(DecodeError::PowerFactor(101))
    );
}

#[test]
fn fields_cover_every_measurement() {
    let m = decode(&[2300, 1000, 0, 5000, 0, 0, 0, 500, 80, 0]).unwrap();
    let names: Vec<_> = m.fields().iter().map(|(name, _)| *name).collect();
    let json = serde_json::to_value(&m).unwrap();
    let object = json.as_object().unwrap();
    assert_eq!(names.len(), object.len());
    for (name, value) in m.fields() {
        assert_eq!(object[name].as_f64(), Some(value));
    }
}

#[test]
fn non_finite_values_are_decode_errors() {
    assert_eq!(
        round("power_full", f64::NAN),
        Err(DecodeError::NotFinite {
            field: "power_full"
        })
    );
    assert_eq!(round("power_full", 1.23449), Ok(1.234));
}
