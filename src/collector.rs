//! Fan-in of every competitor's scores for a class, emitted in periodic
//! batches
//!
//! Each competitor's pipeline carries a generation number. Rebuilding a
//! pipeline bumps it, and anything still in flight from an older generation
//! is discarded on arrival instead of overwriting newer results.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fix::Epoch;
use crate::scores::PilotScore;

pub const DEFAULT_COLLECTOR_INTERVAL_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreUpdate {
    pub competitor: String,
    pub generation: u64,
    pub score: PilotScore,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollectorMessage {
    Score(ScoreUpdate),
    /// A pipeline was (re)built for the competitor
    Register { competitor: String, generation: u64 },
    /// Competitor cleared, forget their score
    Remove { competitor: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStart {
    pub competitor: String,
    pub utc_start: Epoch,
}

/// One emission: the latest score of every competitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBatch {
    pub class: String,
    /// Wall clock time of the emission
    pub at: Epoch,
    pub scores: Vec<PilotScore>,
    /// Starts found since the last emission
    pub new_starts: Vec<NewStart>,
    pub removed: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ScoreCollector {
    class: String,
    scores: BTreeMap<String, PilotScore>,
    generations: HashMap<String, u64>,
    announced_starts: HashMap<String, Epoch>,
    pending_starts: BTreeMap<String, Epoch>,
    removed: Vec<String>,
    dirty: bool,
}

impl ScoreCollector {
    pub fn new(class: &str) -> Self {
        Self {
            class: class.to_string(),
            ..Self::default()
        }
    }

    /// Apply one message, returns false if it was stale
    pub fn apply(&mut self, message: CollectorMessage) -> bool {
        match message {
            CollectorMessage::Register { competitor, generation } => {
                let current = self.generations.entry(competitor.clone()).or_insert(0);
                if generation < *current {
                    return false;
                }
                *current = generation;
                debug!(class = %self.class, competitor = %competitor, generation, "Registered pipeline");
                true
            }
            CollectorMessage::Remove { competitor } => {
                self.generations.entry(competitor.clone()).and_modify(|g| *g += 1);
                self.announced_starts.remove(&competitor);
                self.pending_starts.remove(&competitor);
                if self.scores.remove(&competitor).is_some() {
                    self.removed.push(competitor);
                    self.dirty = true;
                }
                true
            }
            CollectorMessage::Score(update) => self.apply_score(update),
        }
    }

    fn apply_score(&mut self, update: ScoreUpdate) -> bool {
        let current = self.generations.entry(update.competitor.clone()).or_insert(update.generation);
        if update.generation < *current {
            metrics::counter!("scoring.collector.stale_discarded").increment(1);
            debug!(
                class = %self.class,
                competitor = %update.competitor,
                generation = update.generation,
                current = *current,
                "Discarding score from superseded pipeline"
            );
            return false;
        }
        *current = update.generation;

        let ScoreUpdate { competitor, score, .. } = update;
        match score.utc_start {
            Some(start) if self.announced_starts.get(&competitor) != Some(&start) => {
                self.announced_starts.insert(competitor.clone(), start);
                self.pending_starts.insert(competitor.clone(), start);
            }
            None => {
                // a restart clears the start until it is found again
                self.announced_starts.remove(&competitor);
                self.pending_starts.remove(&competitor);
            }
            _ => {}
        }
        self.scores.insert(competitor, score);
        self.dirty = true;
        true
    }

    pub fn latest(&self, competitor: &str) -> Option<&PilotScore> {
        self.scores.get(competitor)
    }

    pub fn generation(&self, competitor: &str) -> Option<u64> {
        self.generations.get(competitor).copied()
    }

    /// Snapshot everything if anything changed since the last batch
    pub fn take_batch(&mut self, at: Epoch) -> Option<ScoreBatch> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        let new_starts = std::mem::take(&mut self.pending_starts)
            .into_iter()
            .map(|(competitor, utc_start)| NewStart { competitor, utc_start })
            .collect();
        Some(ScoreBatch {
            class: self.class.clone(),
            at,
            scores: self.scores.values().cloned().collect(),
            new_starts,
            removed: std::mem::take(&mut self.removed),
        })
    }
}

/// Collect messages until cancelled or every sender is gone, emitting a
/// batch every `period` when something changed
pub async fn run_collector(
    mut collector: ScoreCollector,
    messages: flume::Receiver<CollectorMessage>,
    batches: flume::Sender<ScoreBatch>,
    period: Duration,
    cancel: CancellationToken,
) {
    info!(class = %collector.class, period_secs = period.as_secs(), "Starting score collector");
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(class = %collector.class, "Score collector cancelled");
                break;
            }
            message = messages.recv_async() => {
                match message {
                    Ok(message) => {
                        collector.apply(message);
                    }
                    Err(_) => {
                        // all pipelines gone: flush what we have and stop
                        emit(&mut collector, &batches).await;
                        info!(class = %collector.class, "Score collector stopped");
                        break;
                    }
                }
            }
            _ = interval.tick() => {
                if !emit(&mut collector, &batches).await {
                    warn!(class = %collector.class, "Batch receiver gone, stopping collector");
                    break;
                }
            }
        }
    }
}

/// Returns false if the batch receiver has gone away
async fn emit(collector: &mut ScoreCollector, batches: &flume::Sender<ScoreBatch>) -> bool {
    let Some(batch) = collector.take_batch(chrono::Utc::now().timestamp()) else {
        return true;
    };
    debug!(
        class = %batch.class,
        scores = batch.scores.len(),
        new_starts = batch.new_starts.len(),
        "Emitting score batch"
    );
    metrics::counter!("scoring.collector.batches_emitted").increment(1);
    batches.send_async(batch).await.is_ok()
}
