//! Studio Core device demo
//!
//! Plays a short chord progression through the master bus on the default
//! output device and logs meters and protection changes. Connects the first
//! MIDI input, if any, so a keyboard can play along.
//!
//! Usage: `studio_core [device-name-substring]`

use std::thread;
use std::time::Duration;

use studio_core::engine::{
    AudioEngine, EngineChannels, EngineContext, EngineResult, MidiEngine, NoteEvent,
    ParamTarget, ParameterChange,
};
use studio_core::master::{EffectKind, MasterParam, MasterProcessor, ProtectionState};

const BLOCK_SIZE: usize = 512;
const CHORDS: [[u8; 3]; 4] = [[60, 64, 67], [57, 60, 64], [53, 57, 60], [55, 59, 62]];

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> EngineResult<()> {
    for device in AudioEngine::output_devices() {
        log::info!(
            "{} {} ({} Hz, {} ch)",
            if device.is_default { "*" } else { " " },
            device.name,
            device.sample_rate,
            device.channels
        );
    }
    let query = std::env::args().nth(1);
    let mut audio = AudioEngine::open(query.as_deref())?;
    let ctx = EngineContext::new(audio.engine_config(BLOCK_SIZE))?;
    let mut master = MasterProcessor::new(&ctx)?;
    let stats = master.stats();

    let (mut control, engine, _inference) = EngineChannels::new(&ctx.config().queues)?;
    master.attach_channels(engine);

    let (mut midi, midi_rx) = MidiEngine::new()?;
    if let Some(device) = midi.enumerate_devices().first() {
        midi.connect(device.index)?;
    }

    // A touch of reverb on the first send.
    for change in [
        ParameterChange::new(
            ParamTarget::Master(MasterParam::SendKind(0)),
            EffectKind::Reverb as u8 as f32,
        ),
        ParameterChange::flag(ParamTarget::Master(MasterParam::SendEnabled(0)), true),
        ParameterChange::new(ParamTarget::Master(MasterParam::SendLevel(0)), 0.3),
    ] {
        let _ = control.set_parameter(change);
    }

    audio.start(master, Some(midi_rx))?;

    let mut protection = ProtectionState::Normal;
    for chord in CHORDS.iter().cycle().take(8) {
        for &note in chord {
            let _ = control.send_note(NoteEvent::note_on(0, note, 96));
        }
        for _ in 0..4 {
            thread::sleep(Duration::from_millis(250));
            let peak = control
                .drain_meters()
                .fold(0.0f32, |m, update| m.max(update.peak));
            let snap = stats.snapshot();
            if snap.protection_state != protection {
                log::warn!("protection: {:?} -> {:?}", protection, snap.protection_state);
                protection = snap.protection_state;
            }
            log::info!(
                "peak {:.3}  cpu {:.1}%  voices {}  quality {:?}",
                peak,
                snap.cpu_usage * 100.0,
                snap.active_voices,
                snap.quality_level
            );
        }
        for &note in chord {
            let _ = control.send_note(NoteEvent::note_off(0, note));
        }
    }

    thread::sleep(Duration::from_secs(2));
    audio.stop()?;
    log::info!("final stats: {:?}", stats.snapshot());
    Ok(())
}
