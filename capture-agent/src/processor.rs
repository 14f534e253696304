//! Data processor
//!
//! Turns captured panel-layout responses into CSV rows, one directory per
//! day, and keeps a raw dump of each batch's first response next to them.

use crate::error::AgentResult;
use capture_core::CapturedRecord;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const CSV_FILE: &str = "processed.csv";
const DUMP_DIR: &str = "dump";

/// Records drained from the page in one go
#[derive(Debug, Clone)]
pub struct ScrapeBatch {
    /// Local wall-clock time of the drain
    pub captured_at: NaiveDateTime,
    pub records: Vec<CapturedRecord>,
}

/// One CSV row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelReading {
    pub panel: String,
    pub energy: String,
    pub units: String,
    pub unscaled_energy: String,
    pub module_energy: String,
    pub relay_state: String,
    pub date: String,
}

/// Text form of a JSON scalar as it lands in a CSV cell
fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl PanelReading {
    fn from_entry(panel: &str, entry: &Value, captured_at: &NaiveDateTime) -> Option<Self> {
        let field = |name: &str| entry.get(name).map(cell);
        Some(Self {
            panel: panel.to_string(),
            energy: field("energy")?,
            units: field("units")?,
            unscaled_energy: field("unscaledEnergy")?,
            module_energy: field("moduleEnergy")?,
            relay_state: field("relayState")?,
            date: captured_at.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        })
    }
}

/// Flatten every record whose body is an object into panel rows
pub fn extract_readings(batch: &ScrapeBatch) -> Vec<PanelReading> {
    let mut readings = Vec::new();
    for record in &batch.records {
        let Value::Object(panels) = &record.body else {
            continue;
        };
        for (panel, entry) in panels {
            match PanelReading::from_entry(panel, entry, &batch.captured_at) {
                Some(reading) => readings.push(reading),
                None => warn!("Skipping panel {} from {}: missing fields", panel, record.url),
            }
        }
    }
    readings
}

/// Writes processed batches under a data directory
#[derive(Debug, Clone)]
pub struct DataProcessor {
    data_dir: PathBuf,
}

impl DataProcessor {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// `<data_dir>/<YYYY-MM-DD>` for the batch
    pub fn day_dir(&self, captured_at: &NaiveDateTime) -> PathBuf {
        self.data_dir
            .join(captured_at.date().format("%Y-%m-%d").to_string())
    }

    /// Dump file name: epoch seconds and microseconds joined by `_`.
    ///
    /// `captured_at` is local wall-clock time; a time skipped by a DST jump
    /// is read as UTC.
    pub fn dump_path(&self, captured_at: &NaiveDateTime) -> PathBuf {
        let instant: DateTime<Local> = Local
            .from_local_datetime(captured_at)
            .earliest()
            .unwrap_or_else(|| captured_at.and_utc().with_timezone(&Local));
        self.day_dir(captured_at).join(DUMP_DIR).join(format!(
            "{}_{:06}.json",
            instant.timestamp(),
            instant.timestamp_subsec_micros()
        ))
    }

    /// Process one batch; returns how many rows were written
    pub fn process(&self, batch: &ScrapeBatch) -> AgentResult<usize> {
        info!("Received batch of {} records", batch.records.len());
        let readings = extract_readings(batch);
        if readings.is_empty() {
            return Ok(0);
        }

        let day_dir = self.day_dir(&batch.captured_at);
        fs::create_dir_all(day_dir.join(DUMP_DIR))?;

        let csv_path = day_dir.join(CSV_FILE);
        self.append_csv(&csv_path, &readings)?;

        if let Some(first) = batch.records.first() {
            let dump_path = self.dump_path(&batch.captured_at);
            info!("Dumping data to {:?}", dump_path);
            fs::write(&dump_path, serde_json::to_vec(&first.body)?)?;
        }
        Ok(readings.len())
    }

    fn append_csv(&self, path: &Path, readings: &[PanelReading]) -> AgentResult<()> {
        info!("Writing {} rows to {:?}", readings.len(), path);
        let is_new = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        for reading in readings {
            writer.serialize(reading)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Consume batches until every sender is dropped
    pub fn spawn(self, mut batches: mpsc::Receiver<ScrapeBatch>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(batch) = batches.recv().await {
                let processor = self.clone();
                let outcome = tokio::task::spawn_blocking(move || processor.process(&batch)).await;
                match outcome {
                    Ok(Ok(rows)) if rows > 0 => info!("Processed {} panel readings", rows),
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("Failed to process batch: {}", e),
                    Err(e) => error!("Processor task failed: {}", e),
                }
            }
            info!("Batch channel closed, processor stopping");
        })
    }
}
