//! taskscore - live task scoring for glider races
//!
//! Raw position fixes go in, per-competitor scored status comes out. Each
//! competitor runs through its own chain of pull-based stages (reordering,
//! flight status, task position, distance optimisation, formatting) and a
//! per-class collector batches the results for the leaderboard.

pub mod aat;
pub mod class_scoring;
pub mod collector;
pub mod config;
pub mod distance;
pub mod fix;
pub mod flight_status;
pub mod geometry;
pub mod graph;
pub mod in_order;
pub mod log_format;
pub mod pilot_cache;
pub mod pipeline;
pub mod racing;
pub mod scores;
pub mod sector;
pub mod task;
pub mod task_position;

pub use class_scoring::{ClassHandle, TrackUpdate, spawn_class};
pub use collector::{ScoreBatch, ScoreCollector};
pub use fix::{Epoch, PositionFix};
pub use pipeline::{CompetitorPipeline, PipelineOptions};
pub use scores::PilotScore;
pub use task::{Task, TaskDefinition};
