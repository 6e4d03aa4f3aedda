//! Activity generation: slot planning, stream demultiplexing, the per-slot repair
//! executor, and the `ActivityGenerator` entry points.

pub mod demux;
pub mod executor;
pub mod plan;
pub mod run;

pub use demux::SlotDemuxer;
pub use executor::{SlotExecutor, SlotOutcome, SlotVerdict};
pub use plan::{plan_slot, SlotPlan};
pub use run::{ActivityGenerator, ActivityStream, OutcomeStream};
