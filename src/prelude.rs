/*!
Re-export of common values and datatypes used for configuring, running, and
analyzing simulations. Must be imported manually.

```
use powsim::prelude::*;
```
*/

pub use crate::block::{Block, BlockId, BlockTable, PoolId, HISTORY_POOL};

pub use crate::config::{
    BootstrapRow, ConfigError, DataMode, DynamicConfig, LogChannel,
    ManifestEntry, PoolEntry, Rounds, RunSettings, SimConfig,
};

pub use crate::difficulty::{DifficultyParams, DifficultyWindow};

pub use crate::engine::{Abort, Engine, EngineError, RunStats};

pub use crate::event::{Event, EventKind, EventQueue};

pub use crate::metrics::{PoolMetrics, Summary};

pub use crate::noise::{InternetParams, Lcg64, NoiseModel};

pub use crate::output::{OutputWriter, RunLogs};

pub use crate::pool::{Pool, Score, ScoreBook};

pub use crate::round::{run_round, RoundError, RoundResult, RoundSpec};

pub use crate::simulation::{SimulationError, SimulationGroup};

pub use crate::strategy::{Decision, ScoringRule, Strategy};
