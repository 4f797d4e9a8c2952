//! CLI channel: runs one assessment in the terminal.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::assessment::community::{self, CommunityView};
use crate::assessment::model::{FocusGroup, MessageContent, QuickOption, Role};
use crate::assessment::orchestrator::{
    AssessmentOrchestrator, SessionEvent, TurnOutcome, TurnReport,
};
use crate::assessment::report::WellnessReport;
use crate::assessment::state::Stage;
use crate::error::{AssessmentError, ChannelError};
use crate::store::AssessmentStore;

/// What the participant asked for on one line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Start,
    Submit(String),
    Retry,
    Quit,
}

/// How a CLI session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliExit {
    Completed {
        record_id: Uuid,
        final_group: FocusGroup,
    },
    Quit,
    InputClosed,
}

/// Drives a single orchestrator from stdin and renders its events.
pub struct CliChannel {
    orchestrator: Arc<AssessmentOrchestrator>,
    store: Arc<dyn AssessmentStore>,
}

impl CliChannel {
    pub fn new(orchestrator: Arc<AssessmentOrchestrator>, store: Arc<dyn AssessmentStore>) -> Self {
        Self {
            orchestrator,
            store,
        }
    }

    pub async fn run(&self) -> Result<CliExit, ChannelError> {
        self.run_with(BufReader::new(tokio::io::stdin())).await
    }

    /// Run the session reading lines from `reader`.
    ///
    /// A line is only read once the previous turn has finished.
    pub async fn run_with<R>(&self, reader: R) -> Result<CliExit, ChannelError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut events = self.orchestrator.subscribe();
        let (done_tx, mut done_rx) = mpsc::channel(1);
        let mut lines = reader.lines();
        let mut options: Vec<QuickOption> = Vec::new();
        let mut input_closed = false;

        self.spawn_turn(Command::Start, &done_tx);
        let mut turn_running = true;

        loop {
            tokio::select! {
                // Drain events before the turn result so output stays in order
                biased;

                result = events.recv() => {
                    match result {
                        Ok(event) => {
                            if let SessionEvent::QuickOptions { options: offered } = &event {
                                options = offered.clone();
                            }
                            if let Some(text) = render_event(&event) {
                                println!("{text}");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(missed = n, "CLI fell behind session events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }

                Some(result) = done_rx.recv() => {
                    turn_running = false;
                    match self.finish_turn(result).await? {
                        Some(exit) => return Ok(exit),
                        None if input_closed => return Ok(CliExit::InputClosed),
                        None => eprint!("> "),
                    }
                }

                line = lines.next_line(), if !turn_running && !input_closed => {
                    match line? {
                        Some(line) => {
                            let open_ended =
                                self.orchestrator.session().await.stage == Stage::OpenEnded;
                            match parse_line(&line, &options, open_ended) {
                                Some(Command::Quit) => return Ok(CliExit::Quit),
                                Some(command) => {
                                    self.spawn_turn(command, &done_tx);
                                    turn_running = true;
                                }
                                None => eprint!("> "),
                            }
                        }
                        None => {
                            input_closed = true;
                            if !turn_running {
                                return Ok(CliExit::InputClosed);
                            }
                        }
                    }
                }
            }
        }

        Ok(CliExit::InputClosed)
    }

    fn spawn_turn(
        &self,
        command: Command,
        done: &mpsc::Sender<Result<TurnReport, AssessmentError>>,
    ) {
        let orchestrator = self.orchestrator.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let result = match command {
                Command::Start => orchestrator.start().await,
                Command::Submit(input) => orchestrator.submit(&input).await,
                Command::Retry => orchestrator.retry().await,
                Command::Quit => return,
            };
            let _ = done.send(result).await;
        });
    }

    /// Report how a turn ended; `Some` when the session is over.
    async fn finish_turn(
        &self,
        result: Result<TurnReport, AssessmentError>,
    ) -> Result<Option<CliExit>, ChannelError> {
        let report = match result {
            Ok(report) => report,
            Err(AssessmentError::Rejected(e)) => {
                eprintln!("  {e}");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match report.outcome {
            TurnOutcome::AwaitingInput => Ok(None),
            TurnOutcome::Failed { .. } => {
                eprintln!("  Type /retry (or pick \"Try again\") to try once more.");
                Ok(None)
            }
            TurnOutcome::Completed => {
                let session = self.orchestrator.session().await;
                let (Some(record_id), Some(final_group)) = (session.record_id, session.final_group)
                else {
                    return Ok(None);
                };
                let view =
                    community::group_members(self.store.as_ref(), final_group, Some(record_id))
                        .await?;
                if let Some(report) = &session.report_data {
                    println!("{}", render_summary(report, &view));
                }
                Ok(Some(CliExit::Completed {
                    record_id,
                    final_group,
                }))
            }
        }
    }
}

/// Blank lines re-prompt unless `accepts_empty`, where they are an answer.
fn parse_line(line: &str, options: &[QuickOption], accepts_empty: bool) -> Option<Command> {
    let line = line.trim();
    match line {
        "" if accepts_empty => Some(Command::Submit(String::new())),
        "" => None,
        "/quit" | "/exit" => Some(Command::Quit),
        "/retry" => Some(Command::Retry),
        _ => Some(Command::Submit(resolve_input(line, options))),
    }
}

/// Map an option label typed verbatim to its value.
fn resolve_input(input: &str, options: &[QuickOption]) -> String {
    options
        .iter()
        .find(|o| o.label.eq_ignore_ascii_case(input))
        .map(|o| o.value.clone())
        .unwrap_or_else(|| input.to_string())
}

fn render_event(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::Message { message } => match (&message.role, &message.content) {
            (Role::User, _) => None,
            (_, MessageContent::Text(text)) => Some(format!("🌿 {text}")),
            (_, MessageContent::Image(image)) => {
                Some(format!("🖼  {} ({})\n   {}", image.alt, image.url, image.prompt))
            }
        },
        SessionEvent::QuickOptions { options } if !options.is_empty() => {
            let labels: Vec<&str> = options.iter().map(|o| o.label.as_str()).collect();
            Some(format!("   [{}]", labels.join(" | ")))
        }
        SessionEvent::StageChanged { label, progress, .. } => Some(format!(
            "\n── {label} ({}/{}) ──",
            progress + 1,
            Stage::ALL.len()
        )),
        SessionEvent::TurnFailed { failure } => Some(format!("⚠️  {}", failure.reason)),
        _ => None,
    }
}

fn render_summary(report: &WellnessReport, view: &CommunityView) -> String {
    let mut out = format!(
        "\n✨ Your group: {} {}\n   {}\n\n{}\n",
        view.group.icon, view.group.title, view.group.description, report.conversation_summary
    );
    for index in report.indices() {
        out.push_str(&format!(
            "   {}: {:.0}  {}\n",
            index.name, index.value, index.insight
        ));
    }
    out.push_str(&format!("   Risk level: {}\n", report.risk_summary.risk_level));
    match view.members.len() {
        0 => out.push_str("\nYou're the first member of this group.\n"),
        n => out.push_str(&format!("\n{n} other member(s) are already in this group.\n")),
    }
    out
}
