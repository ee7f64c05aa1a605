//! Pipeline manager for one competition class
//!
//! A single task owns every competitor pipeline of the class and advances
//! them in turn on a fixed pump interval. Fixes reach it through one bounded
//! queue per competitor; control operations arrive on a command channel.
//! Every rebuild of a competitor's pipeline bumps their generation so the
//! collector can drop results from the chain being replaced.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use crate::collector::{CollectorMessage, ScoreUpdate};
use crate::config::ScoringConfig;
use crate::fix::{Epoch, PositionFix};
use crate::in_order::Mode;
use crate::pilot_cache::PilotCache;
use crate::pipeline::{CompetitorPipeline, PipelineOptions};
use crate::task::Task;

const COMMAND_QUEUE_SIZE: usize = 64;

/// Replacement track and corrections for one competitor
#[derive(Debug, Clone, Default)]
pub struct TrackUpdate {
    pub history: Vec<PositionFix>,
    /// Overrides the pilot directory's handicap
    pub handicap: Option<f64>,
    pub start_override: Option<Epoch>,
}

#[derive(Debug)]
enum ClassCommand {
    SetTask(Arc<Task>),
    Attach {
        competitor: String,
        fixes: flume::Receiver<PositionFix>,
    },
    SetTrack {
        competitor: String,
        update: TrackUpdate,
    },
    Clear {
        competitor: String,
    },
    Shutdown,
}

/// Control surface of a running class
#[derive(Clone)]
pub struct ClassHandle {
    class: String,
    commands: flume::Sender<ClassCommand>,
    queues: Arc<DashMap<String, flume::Sender<PositionFix>>>,
    queue_size: usize,
    cancel: CancellationToken,
}

impl ClassHandle {
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Publish a new task; every competitor is rescored against it
    pub async fn set_task(&self, task: Task) -> Result<()> {
        self.send(ClassCommand::SetTask(Arc::new(task))).await
    }

    /// Replace a competitor's track, handicap and start override
    pub async fn set_track(&self, competitor: &str, update: TrackUpdate) -> Result<()> {
        self.queue(competitor).await?;
        self.send(ClassCommand::SetTrack {
            competitor: competitor.to_string(),
            update,
        })
        .await
    }

    pub async fn clear_competitor(&self, competitor: &str) -> Result<()> {
        self.queues.remove(competitor);
        self.send(ClassCommand::Clear {
            competitor: competitor.to_string(),
        })
        .await
    }

    /// Deliver a fix, waiting if the competitor's queue is full
    pub async fn push_fix(&self, fix: PositionFix) -> Result<()> {
        let queue = self.queue(&fix.competitor).await?;
        queue
            .send_async(fix)
            .await
            .map_err(|_| anyhow!("Class {} is not accepting fixes", self.class))
    }

    pub async fn shutdown(&self) -> Result<()> {
        let result = self.send(ClassCommand::Shutdown).await;
        self.cancel.cancel();
        result
    }

    pub fn competitors(&self) -> usize {
        self.queues.len()
    }

    async fn queue(&self, competitor: &str) -> Result<flume::Sender<PositionFix>> {
        if let Some(queue) = self.queues.get(competitor) {
            return Ok(queue.clone());
        }
        let (tx, rx) = flume::bounded(self.queue_size);
        let queue = self
            .queues
            .entry(competitor.to_string())
            .or_insert_with(|| tx.clone())
            .clone();
        // only the caller whose sender went in attaches the receiver
        if queue.same_channel(&tx) {
            self.send(ClassCommand::Attach {
                competitor: competitor.to_string(),
                fixes: rx,
            })
            .await?;
        }
        Ok(queue)
    }

    async fn send(&self, command: ClassCommand) -> Result<()> {
        self.commands
            .send_async(command)
            .await
            .map_err(|_| anyhow!("Class {} has shut down", self.class))
    }
}

struct CompetitorSlot {
    fixes: flume::Receiver<PositionFix>,
    history: Vec<PositionFix>,
    handicap: Option<f64>,
    start_override: Option<Epoch>,
    pipeline: Option<CompetitorPipeline>,
    generation: u64,
    failed: bool,
}

impl CompetitorSlot {
    fn new(fixes: flume::Receiver<PositionFix>, generation: u64) -> Self {
        Self {
            fixes,
            history: Vec::new(),
            handicap: None,
            start_override: None,
            pipeline: None,
            generation,
            failed: false,
        }
    }
}

struct ClassScoring {
    class: String,
    config: ScoringConfig,
    pilots: Arc<PilotCache>,
    task: Option<Arc<Task>>,
    competitors: HashMap<String, CompetitorSlot>,
    /// Last generation handed out per competitor, kept across clears so a
    /// returning competitor never reuses a number the collector has retired
    generations: HashMap<String, u64>,
    collector: flume::Sender<CollectorMessage>,
}

/// Start the class loop. Scores go to `collector`; dropping every handle
/// or cancelling `cancel` stops the loop, which in turn lets the collector
/// flush and stop.
pub fn spawn_class(
    class: &str,
    config: ScoringConfig,
    pilots: Arc<PilotCache>,
    collector: flume::Sender<CollectorMessage>,
    cancel: CancellationToken,
) -> (ClassHandle, JoinHandle<()>) {
    let (commands_tx, commands_rx) = flume::bounded(COMMAND_QUEUE_SIZE);
    let handle = ClassHandle {
        class: class.to_string(),
        commands: commands_tx,
        queues: Arc::new(DashMap::new()),
        queue_size: config.fix_queue_size.max(1),
        cancel: cancel.clone(),
    };

    let scoring = ClassScoring {
        class: class.to_string(),
        config,
        pilots,
        task: None,
        competitors: HashMap::new(),
        generations: HashMap::new(),
        collector,
    };
    let join = tokio::spawn(
        scoring
            .run(commands_rx, cancel)
            .instrument(tracing::info_span!("class_scoring", class = %class)),
    );
    (handle, join)
}

impl ClassScoring {
    async fn run(mut self, commands: flume::Receiver<ClassCommand>, cancel: CancellationToken) {
        info!(pump_ms = self.config.pump_interval_ms, "Starting class scoring");
        let mut pump = tokio::time::interval(self.config.pump_interval());
        pump.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Class scoring cancelled");
                    break;
                }
                command = commands.recv_async() => {
                    let Ok(command) = command else {
                        info!("All class handles dropped");
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                _ = pump.tick() => {
                    if !self.pump(chrono::Utc::now().timestamp()).await {
                        warn!("Collector gone, stopping class scoring");
                        break;
                    }
                }
            }
        }
        info!(competitors = self.competitors.len(), "Class scoring stopped");
    }

    /// Returns false when the loop should stop
    async fn handle_command(&mut self, command: ClassCommand) -> bool {
        match command {
            ClassCommand::SetTask(task) => {
                info!(legs = task.legs.len(), assigned_area = task.is_assigned_area(), "New task, rebuilding all pipelines");
                self.task = Some(task);
                let competitors: Vec<String> = self.competitors.keys().cloned().collect();
                for competitor in competitors {
                    if !self.rebuild(&competitor).await {
                        return false;
                    }
                }
                true
            }
            ClassCommand::Attach { competitor, fixes } => {
                debug!(competitor = %competitor, "Attaching fix queue");
                match self.competitors.get_mut(&competitor) {
                    Some(slot) => slot.fixes = fixes,
                    None => {
                        let generation = self.generations.get(&competitor).copied().unwrap_or(0);
                        self.competitors
                            .insert(competitor.clone(), CompetitorSlot::new(fixes, generation));
                        return self.rebuild(&competitor).await;
                    }
                }
                true
            }
            ClassCommand::SetTrack { competitor, update } => {
                let Some(slot) = self.competitors.get_mut(&competitor) else {
                    warn!(competitor = %competitor, "Track update for unknown competitor");
                    return true;
                };
                info!(competitor = %competitor, fixes = update.history.len(), "Replacing track");
                slot.history = update.history;
                slot.handicap = update.handicap;
                slot.start_override = update.start_override;
                self.pilots.invalidate(&self.class, &competitor);
                self.rebuild(&competitor).await
            }
            ClassCommand::Clear { competitor } => {
                info!(competitor = %competitor, "Clearing competitor");
                self.competitors.remove(&competitor);
                // the collector retires the current generation on removal
                *self.generations.entry(competitor.clone()).or_insert(0) += 1;
                self.collector
                    .send_async(CollectorMessage::Remove { competitor })
                    .await
                    .is_ok()
            }
            ClassCommand::Shutdown => {
                info!("Class shutdown requested");
                false
            }
        }
    }

    /// Replace a competitor's pipeline with a fresh one over their full
    /// history. Without a task there is nothing to build yet.
    async fn rebuild(&mut self, competitor: &str) -> bool {
        let Some(task) = self.task.clone() else {
            return true;
        };
        let Some(slot) = self.competitors.get_mut(competitor) else {
            return true;
        };

        slot.generation += 1;
        slot.failed = false;
        self.generations.insert(competitor.to_string(), slot.generation);
        let mut pilot = self.pilots.pilot(&self.class, competitor);
        if let Some(handicap) = slot.handicap {
            pilot.handicap = handicap;
        }
        let options = PipelineOptions {
            delay_secs: self.config.in_order_delay_secs,
            mode: Mode::Live,
            start_override: slot.start_override,
            history: slot.history.clone(),
        };
        slot.pipeline = Some(CompetitorPipeline::new(task, pilot, options));
        debug!(competitor = %competitor, generation = slot.generation, "Rebuilt pipeline");

        self.collector
            .send_async(CollectorMessage::Register {
                competitor: competitor.to_string(),
                generation: slot.generation,
            })
            .await
            .is_ok()
    }

    /// Drain the fix queues and advance every pipeline up to `now`.
    /// Returns false if the collector has gone away.
    async fn pump(&mut self, now: Epoch) -> bool {
        for (competitor, slot) in self.competitors.iter_mut() {
            for fix in slot.fixes.try_iter() {
                slot.history.push(fix.clone());
                if let Some(pipeline) = slot.pipeline.as_mut() {
                    pipeline.push_fix(fix);
                }
            }

            if slot.failed {
                continue;
            }
            let Some(pipeline) = slot.pipeline.as_mut() else {
                continue;
            };
            match pipeline.advance(now) {
                Ok(Some(score)) => {
                    let update = ScoreUpdate {
                        competitor: competitor.clone(),
                        generation: slot.generation,
                        score,
                    };
                    if self.collector.send_async(CollectorMessage::Score(update)).await.is_err() {
                        return false;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(competitor = %competitor, error = %e, "Pipeline failed, keeping last good score");
                    metrics::counter!("scoring.pipeline.failures").increment(1);
                    slot.failed = true;
                }
            }
        }
        true
    }
}
