// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tokio::select;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::bounded;
use crate::exporters::influx::{InfluxConfig, InfluxExporter};
use crate::exporters::retry::RetryConfig;
use crate::init::args::AgentRun;
use crate::init::wait::{self, TaskSet};
use crate::parser::{AccessLogParser, ParseStage, ParserConfig};
use crate::receivers::tail::{FileTailer, TailConfig};
use crate::topology::batch::BatchConfig;
use crate::topology::payload::{LogEvent, RawLine};

/// Fully resolved settings for one pipeline run.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub tail: TailConfig,
    pub parser: ParserConfig,
    pub influx: InfluxConfig,
    pub batch: BatchConfig,
    pub retry: RetryConfig,
    pub queue_capacity: usize,
    pub drain_timeout: Duration,
}

impl AgentConfig {
    pub fn from_args(args: &AgentRun) -> Result<Self, BoxError> {
        Ok(Self {
            tail: args.tail_config(),
            parser: args.parser_config(),
            influx: args.influx_config()?,
            batch: args.batch_config(),
            retry: args.retry_config(),
            queue_capacity: args.queue_capacity,
            drain_timeout: args.drain_timeout,
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        self.tail.validate()?;
        self.influx.validate()?;
        self.batch.validate()?;
        self.retry.validate()?;
        if self.queue_capacity == 0 {
            return Err("queue capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Runs the tail, parse and publish stages connected by bounded queues.
pub struct Agent {
    config: AgentConfig,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Runs until `agent_cancel` fires or a stage fails.
    ///
    /// Either way only the tailer is stopped. The parser and exporter exit
    /// once their input queues close, so everything already read gets
    /// written, bounded by the drain timeout. A stage failure is returned
    /// after the drain.
    pub async fn run(self, agent_cancel: CancellationToken) -> Result<(), BoxError> {
        let config = self.config;
        config.validate()?;

        let (lines_tx, lines_rx) = bounded::<RawLine>(config.queue_capacity);
        let (events_tx, events_rx) = bounded::<LogEvent>(config.queue_capacity);

        let parser = AccessLogParser::new(config.parser)?;
        let exporter = InfluxExporter::new(
            &config.influx,
            config.batch.clone(),
            config.retry.clone(),
            events_rx,
        )?;
        let tailer = FileTailer::new(config.tail.clone(), lines_tx)?;

        let mut receivers_task_set = TaskSet::new();
        let mut pipeline_task_set = TaskSet::new();
        let mut exporters_task_set = TaskSet::new();

        let receivers_cancel = CancellationToken::new();

        exporters_task_set.spawn(exporter.start());
        pipeline_task_set.spawn(ParseStage::new(parser, lines_rx, events_tx).run());
        if let Err(e) = tailer.start(&mut receivers_task_set, &receivers_cancel) {
            // dropping the sets aborts the exporter and parser
            return Err(e.into());
        }

        info!(
            path = %config.tail.path.display(),
            endpoint = %config.influx.endpoint,
            database = %config.influx.database,
            "Pipeline started."
        );

        let mut result = Ok(());
        select! {
            _ = agent_cancel.cancelled() => {
                debug!("Agent cancellation signaled.");
            },
            e = wait::wait_for_any_task(&mut receivers_task_set) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of tailer."),
                    Err(e) => result = Err(e),
                }
            },
            e = wait::wait_for_any_task(&mut pipeline_task_set) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of parser."),
                    Err(e) => result = Err(e),
                }
            },
            e = wait::wait_for_any_task(&mut exporters_task_set) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of exporter."),
                    Err(e) => result = Err(e),
                }
            }
        }

        // Stop reading in every case. The tailer closes the line queue on exit.
        receivers_cancel.cancel();

        if let Err(e) = &result {
            error!(error = %e, "Pipeline stage failed, draining before exit.");
        }

        // A failed stage still drains the others, so lines already read are
        // written or reported as dropped and the client is released.
        let hard_stop = Instant::now() + config.drain_timeout;
        let stages = [
            (&mut receivers_task_set, "tailer"),
            (&mut pipeline_task_set, "parser"),
            (&mut exporters_task_set, "exporter"),
        ];
        for (tasks, stage) in stages {
            if let Err(e) = wait::wait_for_tasks_with_deadline(tasks, stage, hard_stop).await {
                if result.is_ok() {
                    result = Err(e);
                } else {
                    warn!(stage, error = %e, "Stage failed while draining.");
                }
            }
        }

        if result.is_ok() {
            info!("Pipeline drained.");
        }
        result
    }
}
