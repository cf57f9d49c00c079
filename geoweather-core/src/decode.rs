//! Turns the weather API's JSON body into a [`WeatherSummary`].

use serde_json::Value;

use crate::error::DecodeError;
use crate::model::WeatherSummary;

/// `trunc(kelvin * 1.8) - 459`.
///
/// This is deliberately not `K * 9/5 - 459.67`; results can differ from the
/// exact conversion by one degree. The cast saturates (NaN becomes 0) and
/// the subtraction wraps, so absurd inputs yield a number rather than a panic.
pub fn kelvin_to_fahrenheit(kelvin: f64) -> i32 {
    ((kelvin * 1.8) as i32).wrapping_sub(459)
}

pub fn decode(raw: &str) -> Result<WeatherSummary, DecodeError> {
    let root: Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let city = root
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::missing("name"))?;

    let kelvin = root
        .get("main")
        .and_then(|main| main.get("temp"))
        .and_then(temperature_value)
        .ok_or_else(|| DecodeError::missing("main.temp"))?;

    let weather = root
        .get("weather")
        .and_then(Value::as_array)
        .ok_or_else(|| DecodeError::missing("weather"))?;

    let description = weather
        .first()
        .and_then(|w| w.get("description"))
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::missing("weather[0].description"))?;

    Ok(WeatherSummary::new(
        city.to_string(),
        kelvin_to_fahrenheit(kelvin),
        description.to_string(),
    ))
}

// The documented payload carries the temperature as a string; the live API
// sends a number. Accept either.
fn temperature_value(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
