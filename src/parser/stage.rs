// SPDX-License-Identifier: Apache-2.0

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tower::BoxError;
use tracing::{debug, info, warn};

use super::LineParser;
use crate::bounded_channel::{BoundedReceiver, BoundedSender};
use crate::topology::payload::{LogEvent, RawLine};

/// Longest slice of a rejected line included in its diagnostic.
const LINE_PREVIEW_CHARS: usize = 160;

/// Pipeline stage between the tailer and the publisher.
///
/// Runs until its input queue closes. Rejected lines are logged and skipped,
/// they never stop the stage.
pub struct ParseStage<P> {
    parser: P,
    input: BoundedReceiver<RawLine>,
    output: BoundedSender<LogEvent>,
}

impl<P: LineParser> ParseStage<P> {
    pub fn new(parser: P, input: BoundedReceiver<RawLine>, output: BoundedSender<LogEvent>) -> Self {
        Self {
            parser,
            input,
            output,
        }
    }

    pub async fn run(mut self) -> Result<(), BoxError> {
        let mut parsed: u64 = 0;
        let mut skipped: u64 = 0;

        while let Some(line) = self.input.next().await {
            match self.parser.parse(&line) {
                Ok(event) => {
                    if self.output.send(event).await.is_err() {
                        debug!("Publisher queue closed, parser exiting.");
                        return Ok(());
                    }
                    parsed += 1;
                }
                Err(e) => {
                    skipped += 1;
                    warn!(
                        error = %e,
                        length = line.len(),
                        line_hash = %line_hash(&line),
                        line = %preview(&line),
                        "Skipping unparseable line."
                    );
                }
            }
        }

        info!(parsed, skipped, "Parser input closed, exiting.");
        Ok(())
    }
}

fn preview(line: &RawLine) -> String {
    String::from_utf8_lossy(line.as_bytes())
        .chars()
        .take(LINE_PREVIEW_CHARS)
        .collect()
}

/// Stable identifier for a rejected line, for correlating repeats in logs.
fn line_hash(line: &RawLine) -> String {
    let mut hasher = DefaultHasher::new();
    line.as_bytes().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
