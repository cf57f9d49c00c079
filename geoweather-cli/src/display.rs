use chrono::Local;
use geoweather_core::{Coordinate, FetchResult};
use std::io::{self, Write};

pub fn loading() {
    eprintln!("Loading weather...");
}

/// Prints one completed refresh to stdout.
pub fn render(result: &FetchResult, coord: Coordinate, json: bool) {
    let mut out = io::stdout().lock();
    let written = if json {
        serde_json::to_writer_pretty(&mut out, &json_report(result, coord))
            .map_err(io::Error::from)
            .and_then(|()| writeln!(out))
    } else {
        write_report(&mut out, result, coord)
    };

    if let Err(err) = written {
        tracing::warn!(error = %err, "failed to print weather report");
    }
}

pub fn json_report(result: &FetchResult, coord: Coordinate) -> serde_json::Value {
    serde_json::json!({
        "latitude": coord.latitude,
        "longitude": coord.longitude,
        "result": result,
        "fetched_at": Local::now().to_rfc3339(),
    })
}

/// Raw coordinates come first and are shown whether or not the weather
/// request succeeded.
pub fn write_report<W: Write>(out: &mut W, result: &FetchResult, coord: Coordinate) -> io::Result<()> {
    writeln!(out, "Latitude:  {}", coord.latitude)?;
    writeln!(out, "Longitude: {}", coord.longitude)?;
    if coord.is_unset() {
        writeln!(out, "(no location fix yet)")?;
    }

    match result {
        FetchResult::Success(summary) => {
            writeln!(out)?;
            writeln!(out, "{}", summary.city())?;
            writeln!(out, "{}°F", summary.temperature_f())?;
            writeln!(out, "{}", summary.description())?;
            writeln!(out)?;
            writeln!(out, "Updated {}", Local::now().format("%H:%M"))?;
        }
        FetchResult::Failure { message, .. } => {
            writeln!(out)?;
            writeln!(out, "{message}")?;
        }
    }
    Ok(())
}
