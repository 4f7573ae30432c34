//! MIDI Engine
//!
//! Receives MIDI input through midir and turns note messages into
//! [`NoteEvent`]s on a lock-free queue the audio thread drains.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use midir::{MidiInput, MidiInputConnection, MidiInputPort};

use super::channels::{realtime_queue, QueueConsumer, QueueProducer};
use super::commands::NoteEvent;
use super::error::{EngineError, EngineResult};

/// Capacity of the MIDI note queue.
pub const DEFAULT_MIDI_QUEUE_SIZE: usize = 512;

const CLIENT_NAME: &str = "studio_core";
const RESCAN_INTERVAL: Duration = Duration::from_secs(2);

/// Information about a MIDI input device.
#[derive(Debug, Clone)]
pub struct MidiDeviceInfo {
    pub name: String,
    pub index: usize,
}

/// Ports seen by the last scan.
struct MidiState {
    ports: Vec<MidiInputPort>,
    port_names: Vec<String>,
}

fn scan_ports(midi_in: &MidiInput) -> MidiState {
    let ports: Vec<MidiInputPort> = midi_in.ports().into_iter().collect();
    let port_names = ports
        .iter()
        .map(|p| midi_in.port_name(p).unwrap_or_else(|_| "Unknown".to_string()))
        .collect();
    MidiState { ports, port_names }
}

/// Forwards note messages from the MIDI callback thread to the queue.
/// Returns whether `bytes` was a note message.
fn forward(bytes: &[u8], tx: &mut QueueProducer<NoteEvent>) -> bool {
    match NoteEvent::from_midi(0, bytes) {
        Some(event) => {
            tx.push_lossy(event);
            true
        }
        None => false,
    }
}

pub struct MidiEngine {
    devices: Vec<MidiDeviceInfo>,
    selected_device: Option<usize>,
    connection: Option<MidiInputConnection<QueueProducer<NoteEvent>>>,
    /// Held here while no device is connected.
    note_tx: Option<QueueProducer<NoteEvent>>,
    state: Arc<Mutex<MidiState>>,
    scan_running: Arc<AtomicBool>,
    scan_thread: Option<thread::JoinHandle<()>>,
}

impl MidiEngine {
    /// Creates the engine and the note queue the audio side drains.
    pub fn new() -> EngineResult<(Self, QueueConsumer<NoteEvent>)> {
        let (note_tx, note_rx) = realtime_queue(DEFAULT_MIDI_QUEUE_SIZE)?;

        let midi_in = MidiInput::new(CLIENT_NAME).map_err(|e| EngineError::Device(e.to_string()))?;
        let initial = scan_ports(&midi_in);
        let devices = Self::device_list(&initial.port_names);
        let state = Arc::new(Mutex::new(initial));

        // Background rescans pick up hot-plugged devices.
        let scan_running = Arc::new(AtomicBool::new(true));
        let state_clone = Arc::clone(&state);
        let running_clone = Arc::clone(&scan_running);
        let scan_thread = thread::spawn(move || {
            while running_clone.load(Ordering::Relaxed) {
                thread::sleep(RESCAN_INTERVAL);
                if !running_clone.load(Ordering::Relaxed) {
                    break;
                }
                if let Ok(midi_in) = MidiInput::new(CLIENT_NAME) {
                    let scanned = scan_ports(&midi_in);
                    if let Ok(mut state) = state_clone.lock() {
                        *state = scanned;
                    }
                }
            }
        });

        let engine = Self {
            devices,
            selected_device: None,
            connection: None,
            note_tx: Some(note_tx),
            state,
            scan_running,
            scan_thread: Some(scan_thread),
        };
        Ok((engine, note_rx))
    }

    fn device_list(names: &[String]) -> Vec<MidiDeviceInfo> {
        names
            .iter()
            .enumerate()
            .map(|(index, name)| MidiDeviceInfo {
                name: name.clone(),
                index,
            })
            .collect()
    }

    /// Current device list, including hot-plugged devices.
    pub fn enumerate_devices(&mut self) -> Vec<MidiDeviceInfo> {
        if let Ok(state) = self.state.lock() {
            self.devices = Self::device_list(&state.port_names);
        }
        self.devices.clone()
    }

    pub fn devices(&self) -> &[MidiDeviceInfo] {
        &self.devices
    }

    pub fn selected_device(&self) -> Option<usize> {
        self.selected_device
    }

    /// Connects to a device by index, replacing any existing connection.
    pub fn connect(&mut self, device_index: usize) -> EngineResult<()> {
        self.disconnect();

        let port = {
            let state = self
                .state
                .lock()
                .map_err(|_| EngineError::Device("MIDI state lock poisoned".into()))?;
            state
                .ports
                .get(device_index)
                .cloned()
                .ok_or_else(|| EngineError::Device(format!("no MIDI device {}", device_index)))?
        };

        let midi_in = MidiInput::new(CLIENT_NAME).map_err(|e| EngineError::Device(e.to_string()))?;
        let note_tx = self
            .note_tx
            .take()
            .ok_or_else(|| EngineError::Device("MIDI note queue already in use".into()))?;

        // The producer travels into the callback and comes back on close.
        let connection = midi_in
            .connect(
                &port,
                "studio_core-in",
                |_timestamp_us, bytes, tx| {
                    forward(bytes, tx);
                },
                note_tx,
            )
            .map_err(|e| EngineError::Device(e.to_string()))?;

        self.connection = Some(connection);
        self.selected_device = Some(device_index);
        log::info!(
            "MIDI connected to device {}: {}",
            device_index,
            self.devices
                .get(device_index)
                .map(|d| d.name.as_str())
                .unwrap_or("Unknown")
        );
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            let (_, note_tx) = connection.close();
            self.note_tx = Some(note_tx);
            self.selected_device = None;
            log::info!("MIDI disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

impl Drop for MidiEngine {
    fn drop(&mut self) {
        self.scan_running.store(false, Ordering::Relaxed);
        self.disconnect();
        if let Some(thread) = self.scan_thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_notes_only() {
        let (mut tx, mut rx) = realtime_queue::<NoteEvent>(8).unwrap();
        assert!(forward(&[0x90, 60, 100], &mut tx));
        assert!(forward(&[0x80, 60, 0], &mut tx));
        assert!(!forward(&[0xE0, 0x00, 0x40], &mut tx), "pitch bend is ignored");
        assert!(!forward(&[], &mut tx));

        assert_eq!(rx.pop(), Some(NoteEvent::note_on(0, 60, 100)));
        assert_eq!(rx.pop(), Some(NoteEvent::note_off(0, 60)));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn test_forward_is_lossy_when_full() {
        let (mut tx, rx) = realtime_queue::<NoteEvent>(4).unwrap();
        for _ in 0..6 {
            forward(&[0x90, 60, 100], &mut tx);
        }
        assert_eq!(rx.len(), 3);
        assert_eq!(tx.overflow_count(), 3);
    }
}
