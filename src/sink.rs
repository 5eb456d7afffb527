//! Destinations for outbound MIDI bytes.

use std::sync::Arc;

use midir::{MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;

use crate::error::{PlayerError, Result};

const CLIENT_NAME: &str = "midicue";

pub trait OutputSink: Send {
    fn send(&mut self, message: &[u8]) -> Result<()>;
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        (**self).send(message)
    }
}

/// Platform MIDI output port.
pub struct MidirSink {
    port_name: String,
    connection: MidiOutputConnection,
}

impl MidirSink {
    pub fn list_ports() -> Result<Vec<String>> {
        let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| PlayerError::Port(e.to_string()))?;
        Ok(midi_out
            .ports()
            .iter()
            .map(|p| midi_out.port_name(p).unwrap_or_default())
            .collect())
    }

    /// Connects to the first port whose name contains `filter`, or to the
    /// first port at all.
    pub fn connect(filter: Option<&str>) -> Result<Self> {
        let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| PlayerError::Port(e.to_string()))?;
        let ports = midi_out.ports();
        let port = match filter {
            Some(filter) => ports
                .iter()
                .find(|p| midi_out.port_name(p).unwrap_or_default().contains(filter)),
            None => ports.first(),
        }
        .ok_or_else(|| PlayerError::Port(format!("no output port matching {:?}", filter)))?;

        let port_name = midi_out.port_name(port).unwrap_or_default();
        let connection = midi_out
            .connect(port, "midicue-output")
            .map_err(|e| PlayerError::Port(e.to_string()))?;
        tracing::info!(port = %port_name, "Connected MIDI output");

        Ok(Self {
            port_name,
            connection,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl OutputSink for MidirSink {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        self.connection
            .send(message)
            .map_err(|e| PlayerError::Send(e.to_string()))
    }
}

/// Writes every message to the log instead of a port.
#[derive(Debug, Default)]
pub struct LogSink;

impl OutputSink for LogSink {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        tracing::info!("MIDI out {:02X?}", message);
        Ok(())
    }
}

/// Keeps sent messages in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    rejected_status: Arc<Mutex<Option<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later message starting with `status` fail to send.
    pub fn reject_status(&self, status: u8) {
        *self.rejected_status.lock() = Some(status);
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl OutputSink for MemorySink {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        let rejected = *self.rejected_status.lock();
        if rejected.is_some() && message.first().copied() == rejected {
            return Err(PlayerError::Send(format!("rejected {:02X?}", message)));
        }
        self.sent.lock().push(message.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_shares_buffer() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.send(&[0x90, 60, 100]).unwrap();
        assert_eq!(sink.sent(), vec![vec![0x90, 60, 100]]);
        assert_eq!(sink.take().len(), 1);
        assert!(sink.sent().is_empty());
    }

    #[test]
    fn test_memory_sink_rejects() {
        let mut sink = MemorySink::new();
        sink.reject_status(0x90);
        assert!(matches!(sink.send(&[0x90, 1, 1]), Err(PlayerError::Send(_))));
        assert!(sink.send(&[0x80, 1, 0]).is_ok());
    }
}
