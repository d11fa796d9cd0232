use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{ItemList, ProgressEvent, ProgressSink, RegisteredList, RegistrationReport};
use crate::domain::DataMapEntry;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_lookup(entries: &[DataMapEntry]) -> io::Result<()> {
        Self::print_json(entries)
    }

    pub fn print_register(report: &RegistrationReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_registered(list: &RegisteredList) -> io::Result<()> {
        Self::print_json(list)
    }

    pub fn print_items(list: &ItemList) -> io::Result<()> {
        Self::print_json(list)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress to the tracing subscriber.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}
