use crate::{Hunk, HunkStatus};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::io::{BufRead, Write};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("terminal error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReviewError>;

/// Answer to "keep this change?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
    /// Accept this hunk and every one after it.
    AcceptRest,
    /// Reject this hunk and every one after it.
    RejectRest,
    /// Stop; this and later hunks stay undecided.
    Quit,
}

/// What a reviewer is asked about.
pub struct Prompt<'a> {
    pub hunk: &'a Hunk,
    /// 0-based position in the session.
    pub index: usize,
    pub total: usize,
}

/// Source of accept/reject decisions.
///
/// Called once per hunk, in order; the next hunk is only shown after the
/// previous one is decided.
pub trait Reviewer {
    fn decide(&mut self, prompt: &Prompt<'_>) -> Result<Decision>;

    /// Called once when the session ends, however it ends.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Hunks partitioned by the user's decisions.
#[derive(Debug, Default)]
pub struct ReviewOutcome {
    pub accepted: Vec<Hunk>,
    pub rejected: Vec<Hunk>,
    pub undecided: Vec<Hunk>,
}

impl ReviewOutcome {
    /// The session stopped before every hunk was decided.
    pub fn aborted(&self) -> bool {
        !self.undecided.is_empty()
    }
}

/// Ask `reviewer` about each hunk in turn.
///
/// A reviewer error ends the session the same way quitting does: decisions
/// made so far stand and the rest are undecided.
pub fn review(hunks: Vec<Hunk>, reviewer: &mut dyn Reviewer) -> ReviewOutcome {
    let Ok(outcome) = review_with(hunks, reviewer, |_| Ok::<(), Infallible>(()));
    outcome
}

/// Like [`review`], calling `on_reject` as soon as each hunk is rejected.
///
/// Lets the caller act on a rejection before the next prompt, so nothing
/// already decided is lost if the process dies mid-review. An error from
/// `on_reject` stops the review.
pub fn review_with<E>(
    hunks: Vec<Hunk>,
    reviewer: &mut dyn Reviewer,
    mut on_reject: impl FnMut(&Hunk) -> std::result::Result<(), E>,
) -> std::result::Result<ReviewOutcome, E> {
    let total = hunks.len();
    let mut statuses = vec![HunkStatus::Pending; total];
    let mut rest: Option<HunkStatus> = None;
    let mut failed = None;

    for (index, hunk) in hunks.iter().enumerate() {
        statuses[index] = match rest {
            Some(status) => status,
            None => {
                let decision = match reviewer.decide(&Prompt { hunk, index, total }) {
                    Ok(decision) => decision,
                    Err(err) => {
                        warn!(error = %err, "review interrupted");
                        Decision::Quit
                    }
                };
                debug!(path = %hunk.path.display(), line = hunk.new_start, ?decision, "hunk decided");

                match decision {
                    Decision::Accept => HunkStatus::Accepted,
                    Decision::Reject => HunkStatus::Rejected,
                    Decision::AcceptRest => {
                        rest = Some(HunkStatus::Accepted);
                        HunkStatus::Accepted
                    }
                    Decision::RejectRest => {
                        rest = Some(HunkStatus::Rejected);
                        HunkStatus::Rejected
                    }
                    Decision::Quit => {
                        rest = Some(HunkStatus::Undecided);
                        HunkStatus::Undecided
                    }
                }
            }
        };

        if statuses[index] == HunkStatus::Rejected
            && let Err(err) = on_reject(hunk)
        {
            failed = Some(err);
            break;
        }
    }

    if let Err(err) = reviewer.finish() {
        warn!(error = %err, "reviewer did not shut down cleanly");
    }
    if let Some(err) = failed {
        return Err(err);
    }

    let mut outcome = ReviewOutcome::default();
    for (hunk, status) in hunks.into_iter().zip(statuses) {
        match status {
            HunkStatus::Accepted => outcome.accepted.push(hunk),
            HunkStatus::Rejected => outcome.rejected.push(hunk),
            HunkStatus::Pending | HunkStatus::Undecided => outcome.undecided.push(hunk),
        }
    }
    Ok(outcome)
}

const PROMPT_HELP: &str = "y - keep this change
n - discard this change and remember it
a - keep this and all remaining changes
d - discard this and all remaining changes
q - quit; remaining changes stay applied and are not remembered
? - print help
";

/// Line-oriented prompt in the style of `git add -p`.
///
/// End of input counts as quitting.
pub struct PromptReviewer<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptReviewer<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn show(&mut self, prompt: &Prompt<'_>) -> std::io::Result<()> {
        writeln!(self.output, "{}", prompt.hunk.path.display())?;
        writeln!(self.output, "{}", prompt.hunk.header())?;
        for line in prompt.hunk.diff_lines() {
            writeln!(self.output, "{}", line)?;
        }
        Ok(())
    }
}

impl<R: BufRead, W: Write> Reviewer for PromptReviewer<R, W> {
    fn decide(&mut self, prompt: &Prompt<'_>) -> Result<Decision> {
        self.show(prompt)?;
        loop {
            write!(
                self.output,
                "({}/{}) Keep this change [y,n,a,d,q,?]? ",
                prompt.index + 1,
                prompt.total
            )?;
            self.output.flush()?;

            let mut answer = String::new();
            if self.input.read_line(&mut answer)? == 0 {
                writeln!(self.output)?;
                return Ok(Decision::Quit);
            }

            match parse_answer(answer.trim()) {
                Some(decision) => return Ok(decision),
                None => write!(self.output, "{}", PROMPT_HELP)?,
            }
        }
    }
}

fn parse_answer(answer: &str) -> Option<Decision> {
    match answer.to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(Decision::Accept),
        "n" | "no" => Some(Decision::Reject),
        "a" => Some(Decision::AcceptRest),
        "d" => Some(Decision::RejectRest),
        "q" | "quit" => Some(Decision::Quit),
        _ => None,
    }
}

/// Replays a fixed list of decisions, then falls back to a default.
pub struct ScriptedReviewer {
    decisions: VecDeque<Decision>,
    fallback: Decision,
    seen: Vec<Hunk>,
}

impl ScriptedReviewer {
    /// Play `decisions` in order; quit once they run out.
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            decisions: decisions.into_iter().collect(),
            fallback: Decision::Quit,
            seen: Vec::new(),
        }
    }

    /// Give the same answer to every hunk.
    pub fn always(decision: Decision) -> Self {
        Self {
            decisions: VecDeque::new(),
            fallback: decision,
            seen: Vec::new(),
        }
    }

    /// Hunks presented so far, in order.
    pub fn seen(&self) -> &[Hunk] {
        &self.seen
    }
}

impl Reviewer for ScriptedReviewer {
    fn decide(&mut self, prompt: &Prompt<'_>) -> Result<Decision> {
        self.seen.push(prompt.hunk.clone());
        Ok(self.decisions.pop_front().unwrap_or(self.fallback))
    }
}
