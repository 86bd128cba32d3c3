//! Alert sinks: console, append-only file and in-process channel

pub mod formats;

use crossbeam_channel::Sender;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use crate::config::{OutputConfig, OutputFormat};
use crate::error::{Result, ThreatError};
use crate::fusion::AlertEvent;

pub use formats::{format_json, format_text};

/// Destination for alert events. Transport is up to the implementation.
pub trait AlertSink: Send {
    fn emit(&mut self, event: &AlertEvent) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Output writer that handles console and file destinations
pub struct OutputWriter {
    config: OutputConfig,
    file: Option<File>,
    written: u64,
}

impl OutputWriter {
    pub fn new(config: OutputConfig) -> io::Result<Self> {
        let file = if let Some(ref path) = config.output_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            Some(OpenOptions::new().create(true).append(true).open(path)?)
        } else {
            None
        };

        Ok(Self {
            config,
            file,
            written: 0,
        })
    }

    fn format(&self, event: &AlertEvent) -> String {
        match self.config.format {
            OutputFormat::Text => format_text(event),
            OutputFormat::Json => format_json(event),
        }
    }

    fn write_console(&self, text: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", text)?;
        stdout.flush()
    }

    /// Number of events written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn output_path(&self) -> Option<&PathBuf> {
        self.config.output_path.as_ref()
    }
}

impl AlertSink for OutputWriter {
    fn emit(&mut self, event: &AlertEvent) -> Result<()> {
        let formatted = self.format(event);

        if self.config.enable_console {
            self.write_console(&formatted)?;
        }

        if let Some(ref mut file) = self.file {
            writeln!(file, "{}", formatted)?;
            file.flush()?;
        }

        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(ref mut file) = self.file {
            file.flush()?;
        }
        Ok(())
    }
}

/// Forwards events to a channel, for embedding the pipeline in another program
pub struct ChannelSink {
    sender: Sender<AlertEvent>,
}

impl ChannelSink {
    pub fn new(sender: Sender<AlertEvent>) -> Self {
        Self { sender }
    }
}

impl AlertSink for ChannelSink {
    fn emit(&mut self, event: &AlertEvent) -> Result<()> {
        self.sender
            .send(event.clone())
            .map_err(|_| ThreatError::Channel("alert receiver dropped".into()))
    }
}

/// Format milliseconds as HH:MM:SS.mmm
pub fn format_timestamp(ms: i64) -> String {
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = ms % 1000;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
    } else {
        format!("{:02}:{:02}.{:03}", minutes, seconds, millis)
    }
}
