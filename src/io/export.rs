//! CSV export for stored time series.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::store::{MemoryStore, Sample, SampleKind};

/// Column header for series export.
const HEADER: [&str; 4] = ["timestamp", "series", "accessory_id", "value"];

/// Every sample held by `store`, ordered by timestamp then series.
pub fn collect_series(store: &MemoryStore) -> Vec<Sample> {
    let mut samples: Vec<Sample> = store
        .kinds()
        .flat_map(|kind| store.samples(kind).iter().copied())
        .collect();
    samples.sort_by_key(|s| (s.timestamp(), s.kind()));
    samples
}

/// Exports samples to a CSV file at the given path.
///
/// Produces deterministic output for identical inputs.
///
/// # Arguments
///
/// * `samples` - Samples in the order they should be written
/// * `path` - Output file path
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(samples: &[Sample], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(samples, buf)
}

/// Writes samples as CSV to any writer.
///
/// The accessory column is empty for whole-home series. Timestamps are
/// RFC 3339 with millisecond precision.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(samples: &[Sample], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(HEADER)?;

    for s in samples {
        let accessory = match s.kind() {
            SampleKind::AccessoryConsumption(id) => id.0.to_string(),
            _ => String::new(),
        };
        wtr.write_record(&[
            s.timestamp()
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            s.kind().label().to_string(),
            accessory,
            format!("{:.4}", s.value()),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
