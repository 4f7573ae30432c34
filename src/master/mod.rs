//! Master bus: the orchestrator and the stages only it uses.

pub mod ai_tap;
pub mod config;
pub mod effects;
pub mod limiter;
pub mod optimizer;
pub mod processor;
pub mod protection;
pub mod slots;
pub mod stats;

pub use ai_tap::AiTap;
pub use config::{MasterConfig, ProtectionConfig};
pub use effects::{EffectKind, EffectOutcome, EffectParams, EffectRack};
pub use limiter::LookaheadLimiter;
pub use optimizer::{AutoOptimizer, QualityLevel};
pub use processor::{MasterControls, MasterParam, MasterPreset, MasterProcessor};
pub use protection::{BlockHealth, ProtectionMonitor, ProtectionState, Transition};
pub use slots::{InsertSettings, InsertSlot, SendSettings, SendSlot, NUM_INSERTS, NUM_SENDS};
pub use stats::{Levels, MasterStats, MasterStatsSnapshot};
