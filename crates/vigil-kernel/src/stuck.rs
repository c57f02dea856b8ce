//! [`StuckDetector`] – multi-pattern loop recognition over agent history.
//!
//! An agent that has stopped making progress rarely repeats itself verbatim:
//! the same command may come back with differently-worded errors, the same
//! syntax error may be reported at a shifting line number, and a cycle may
//! stretch over several interleaved events. The detector runs six
//! independent pattern checks over the filtered tail of history (see
//! [`inspectable_tail`]) and reports the first match:
//!
//! 1. **Context-window loop** – ten or more condensation observations in a
//!    row: the prompt no longer fits and trimming is not helping.
//! 2. **Repeating action/observation** – the same action drawing the same
//!    observation four times.
//! 3. **Repeating action with errors** – the same action drawing errors at
//!    least three times in the last four attempts, wording aside.
//! 4. **Action/observation pattern** – a two-step cycle repeated three
//!    times.
//! 5. **Monologue** – the agent telling itself the same thing three or more
//!    times in a row.
//! 6. **Repeated syntax error** – four notebook cells failing with the same
//!    syntax error at the same reported line, once the volatile Jupyter
//!    banner is stripped.
//!
//! Each check is a pure function of the tail; the evaluation order is
//! policy, not dependency. A hit stores a [`StuckAnalysis`] and emits a
//! single `tracing` warning; a miss has no observable effect.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;
use vigil_types::{Event, EventAxis, EventPayload, EventSource, LoopType, StuckAnalysis};

use crate::history::inspectable_tail;

// ────────────────────────────────────────────────────────────────────────────
// Thresholds
// ────────────────────────────────────────────────────────────────────────────

/// Fewest inspectable events worth analyzing at all.
const MIN_INSPECTABLE_EVENTS: usize = 3;
/// Identical (action, observation) repetitions that constitute a loop.
const REPEAT_WINDOW: usize = 4;
/// Error observations among the last [`REPEAT_WINDOW`] that constitute an
/// error loop.
const ERROR_THRESHOLD: usize = 3;
/// Action/observation pairs examined for a repeating two-step cycle.
const PATTERN_WINDOW: usize = 6;
/// Pairs per block of the two-step cycle.
const PATTERN_BLOCK_PAIRS: usize = 2;
/// Identical consecutive agent messages that constitute a monologue.
const MONOLOGUE_RUN: usize = 3;
/// Consecutive condensation observations that constitute a context-window
/// loop.
const CONDENSATION_RUN: usize = 10;
/// Divisor mapping a condensation run length to its reported repeat count.
const CONDENSATION_REPEAT_DIVISOR: usize = 5;
/// Identical syntax-error incidents that constitute a syntax-error loop.
const SYNTAX_ERROR_INCIDENTS: usize = 4;

/// Leading markers of the Jupyter banner lines appended to cell output. The
/// banner names session-local paths and must not defeat content comparison.
const JUPYTER_BANNER_MARKERS: [&str; 2] = [
    "[Jupyter current working directory:",
    "[Jupyter Python interpreter:",
];

static CELL_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Cell In\[\d+\], line (\d+)").expect("valid regex"));
static DETECTED_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"detected at line (\d+)").expect("valid regex"));

// ────────────────────────────────────────────────────────────────────────────
// StuckDetector
// ────────────────────────────────────────────────────────────────────────────

/// Decides whether an agent has entered a non-productive loop.
///
/// The detector is bound to a read-only view of the session history and
/// never mutates it. It is stateless across calls except for the most recent
/// [`StuckAnalysis`], which is cleared at the start of every call and set
/// only on a stuck verdict.
///
/// # Example
///
/// ```
/// use vigil_kernel::StuckDetector;
/// use vigil_types::Event;
///
/// let history: Vec<Event> = Vec::new();
/// let mut detector = StuckDetector::new(&history);
/// assert!(!detector.is_stuck(true));
/// assert!(detector.stuck_analysis().is_none());
/// ```
pub struct StuckDetector<'a> {
    history: &'a [Event],
    stuck_analysis: Option<StuckAnalysis>,
}

impl<'a> StuckDetector<'a> {
    /// Bind a detector to a read-only history view.
    pub fn new(history: &'a [Event]) -> Self {
        Self {
            history,
            stuck_analysis: None,
        }
    }

    /// Return `true` when the recent history forms a recognized loop.
    ///
    /// The filtered tail is computed once and handed to every check. Checks
    /// run in a fixed order and the first hit wins; its analysis is stored
    /// and one warning is logged. A verdict of `false` leaves
    /// [`StuckDetector::stuck_analysis`] unset and logs nothing.
    pub fn is_stuck(&mut self, headless_mode: bool) -> bool {
        self.stuck_analysis = None;

        let tail = inspectable_tail(self.history, headless_mode);
        if tail.len() < MIN_INSPECTABLE_EVENTS {
            return false;
        }

        // The context-window check runs first: a condensation storm can
        // coexist with other patterns and must be reported under its own
        // tag.
        let hit = check_context_window_loop(&tail)
            .or_else(|| check_repeating_action_observation(&tail))
            .or_else(|| check_repeating_action_error(&tail))
            .or_else(|| check_action_observation_pattern(&tail))
            .or_else(|| check_monologue(&tail))
            .or_else(|| check_repeated_syntax_error(&tail));

        match hit {
            Some(analysis) => {
                warn_for(analysis.loop_type);
                self.stuck_analysis = Some(analysis);
                true
            }
            None => false,
        }
    }

    /// The analysis of the most recent call, present only when it returned
    /// `true`.
    pub fn stuck_analysis(&self) -> Option<&StuckAnalysis> {
        self.stuck_analysis.as_ref()
    }
}

/// One warning per verdict, keyed by loop category. The exact wording of the
/// first five lines is relied upon by log-scraping supervisors.
fn warn_for(loop_type: LoopType) {
    match loop_type {
        LoopType::RepeatingActionObservation => {
            warn!("Action, Observation loop detected");
        }
        LoopType::RepeatingActionError => {
            warn!("Action, ErrorObservation loop detected");
        }
        LoopType::RepeatingActionObservationPattern => {
            warn!("Action, Observation pattern detected");
        }
        LoopType::Monologue => {
            warn!("Agent monologue detected");
        }
        LoopType::ContextWindowError => {
            warn!("Context window error loop detected - repeated condensation events");
        }
        LoopType::SyntaxError => {
            warn!("Repeated IPython syntax error detected");
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tail scanning helpers
// ────────────────────────────────────────────────────────────────────────────

/// Collect the last `n` events on `axis`, most recent first, with their tail
/// positions.
fn last_by_axis<'e>(tail: &[&'e Event], axis: EventAxis, n: usize) -> Vec<(usize, &'e Event)> {
    let mut out = Vec::with_capacity(n);
    for (idx, event) in tail.iter().enumerate().rev() {
        if event.axis() == axis {
            out.push((idx, *event));
            if out.len() == n {
                break;
            }
        }
    }
    out
}

/// True when every event in the window is equivalent to the first.
fn all_equivalent(events: &[(usize, &Event)]) -> bool {
    match events.split_first() {
        Some(((_, first), rest)) => rest.iter().all(|(_, event)| event.equivalent_to(first)),
        None => true,
    }
}

fn is_error(event: &Event) -> bool {
    matches!(event.payload, EventPayload::Error { .. })
}

// ────────────────────────────────────────────────────────────────────────────
// Pattern checks
// ────────────────────────────────────────────────────────────────────────────

/// Same action, same observation, [`REPEAT_WINDOW`] times in a row.
///
/// Windows whose observations are errors are left to
/// [`check_repeating_action_error`], so the error loop is reported under its
/// own tag.
fn check_repeating_action_observation(tail: &[&Event]) -> Option<StuckAnalysis> {
    let actions = last_by_axis(tail, EventAxis::Action, REPEAT_WINDOW);
    let observations = last_by_axis(tail, EventAxis::Observation, REPEAT_WINDOW);
    if actions.len() < REPEAT_WINDOW || observations.len() < REPEAT_WINDOW {
        return None;
    }

    if !all_equivalent(&actions) || !all_equivalent(&observations) {
        return None;
    }
    if observations.iter().any(|(_, obs)| is_error(obs)) {
        return None;
    }

    Some(StuckAnalysis {
        loop_type: LoopType::RepeatingActionObservation,
        loop_repeat_times: REPEAT_WINDOW,
        loop_start_idx: actions[REPEAT_WINDOW - 1].0,
    })
}

/// Same action drawing errors in at least [`ERROR_THRESHOLD`] of the last
/// [`REPEAT_WINDOW`] attempts. The error wording is free to differ: the
/// pattern is the retrying, not the message.
fn check_repeating_action_error(tail: &[&Event]) -> Option<StuckAnalysis> {
    let actions = last_by_axis(tail, EventAxis::Action, REPEAT_WINDOW);
    let observations = last_by_axis(tail, EventAxis::Observation, REPEAT_WINDOW);
    if actions.len() < REPEAT_WINDOW || observations.len() < REPEAT_WINDOW {
        return None;
    }

    if !all_equivalent(&actions) {
        return None;
    }
    let error_count = observations.iter().filter(|(_, obs)| is_error(obs)).count();
    if error_count < ERROR_THRESHOLD {
        return None;
    }

    Some(StuckAnalysis {
        loop_type: LoopType::RepeatingActionError,
        loop_repeat_times: ERROR_THRESHOLD,
        loop_start_idx: actions[REPEAT_WINDOW - 1].0,
    })
}

/// A two-step cycle (action₁, obs₁, action₂, obs₂) repeated three times over
/// the last [`PATTERN_WINDOW`] pairs. Length-one cycles belong to
/// [`check_repeating_action_observation`] and are excluded here.
fn check_action_observation_pattern(tail: &[&Event]) -> Option<StuckAnalysis> {
    let actions = last_by_axis(tail, EventAxis::Action, PATTERN_WINDOW);
    let observations = last_by_axis(tail, EventAxis::Observation, PATTERN_WINDOW);
    if actions.len() < PATTERN_WINDOW || observations.len() < PATTERN_WINDOW {
        return None;
    }

    // Chronological order for positional block comparison.
    let a: Vec<&(usize, &Event)> = actions.iter().rev().collect();
    let o: Vec<&(usize, &Event)> = observations.iter().rev().collect();

    let blocks_match = a[0].1.equivalent_to(a[2].1)
        && a[2].1.equivalent_to(a[4].1)
        && a[1].1.equivalent_to(a[3].1)
        && a[3].1.equivalent_to(a[5].1)
        && o[0].1.equivalent_to(o[2].1)
        && o[2].1.equivalent_to(o[4].1)
        && o[1].1.equivalent_to(o[3].1)
        && o[3].1.equivalent_to(o[5].1);
    if !blocks_match {
        return None;
    }
    if a[0].1.equivalent_to(a[1].1) {
        return None;
    }
    if is_error(o[0].1) || is_error(o[1].1) {
        return None;
    }

    Some(StuckAnalysis {
        loop_type: LoopType::RepeatingActionObservationPattern,
        loop_repeat_times: PATTERN_WINDOW / PATTERN_BLOCK_PAIRS,
        loop_start_idx: a[0].0,
    })
}

/// A trailing run of at least [`MONOLOGUE_RUN`] agent messages, all with
/// identical content. Any other event at the end of the tail breaks the run.
fn check_monologue(tail: &[&Event]) -> Option<StuckAnalysis> {
    let run_len = tail
        .iter()
        .rev()
        .take_while(|event| {
            event.source == EventSource::Agent
                && matches!(event.payload, EventPayload::Message { .. })
        })
        .count();
    if run_len < MONOLOGUE_RUN {
        return None;
    }

    let run = &tail[tail.len() - run_len..];
    let first = run[0];
    if !run.iter().all(|event| event.equivalent_to(first)) {
        return None;
    }

    Some(StuckAnalysis {
        loop_type: LoopType::Monologue,
        loop_repeat_times: run_len,
        loop_start_idx: tail.len() - run_len,
    })
}

/// A trailing run of at least [`CONDENSATION_RUN`] condensation
/// observations: the prompt keeps getting trimmed without a single action in
/// between.
fn check_context_window_loop(tail: &[&Event]) -> Option<StuckAnalysis> {
    let run_len = tail
        .iter()
        .rev()
        .take_while(|event| matches!(event.payload, EventPayload::AgentCondensation { .. }))
        .count();
    if run_len < CONDENSATION_RUN {
        return None;
    }

    Some(StuckAnalysis {
        loop_type: LoopType::ContextWindowError,
        loop_repeat_times: run_len / CONDENSATION_REPEAT_DIVISOR,
        loop_start_idx: tail.len() - run_len,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Syntax-error fingerprinting
// ────────────────────────────────────────────────────────────────────────────

/// The parts of a notebook cell output that identify a syntax-error
/// incident once volatile surface (Jupyter banner, trailing whitespace) is
/// removed.
#[derive(Debug, PartialEq, Eq)]
struct SyntaxErrorFingerprint {
    /// The full first `SyntaxError:` line, if any.
    error_tag: Option<String>,
    /// N of the first `Cell In[_], line N` marker, if any.
    cell_line: Option<u64>,
    /// N of the first `detected at line N` suffix (unterminated-string
    /// errors), if any.
    detected_line: Option<u64>,
    /// Banner-stripped content with trailing whitespace trimmed.
    residual: String,
}

impl SyntaxErrorFingerprint {
    fn of(content: &str) -> Self {
        let mut lines: Vec<&str> = content.lines().collect();
        while lines.last().is_some_and(|line| {
            JUPYTER_BANNER_MARKERS
                .iter()
                .any(|marker| line.starts_with(marker))
        }) {
            lines.pop();
        }
        let stripped = lines.join("\n");

        let error_tag = stripped
            .lines()
            .find(|line| line.starts_with("SyntaxError:"))
            .map(str::to_owned);
        let cell_line: Option<u64> = CELL_LINE
            .captures(&stripped)
            .and_then(|caps| caps[1].parse().ok());
        let detected_line: Option<u64> = DETECTED_LINE
            .captures(&stripped)
            .and_then(|caps| caps[1].parse().ok());

        Self {
            error_tag,
            cell_line,
            detected_line,
            residual: stripped.trim_end().to_owned(),
        }
    }
}

/// The last [`SYNTAX_ERROR_INCIDENTS`] notebook cell outputs all encode the
/// same syntax error at the same reported line with identical residual
/// content. A shifting line number or changing residual means the agent is
/// still editing and may recover; a stable fingerprint means it is not.
fn check_repeated_syntax_error(tail: &[&Event]) -> Option<StuckAnalysis> {
    let mut incidents: Vec<(usize, &str)> = Vec::with_capacity(SYNTAX_ERROR_INCIDENTS);
    for (idx, event) in tail.iter().enumerate().rev() {
        if let EventPayload::IPythonRunCellObs { content, .. } = &event.payload {
            incidents.push((idx, content.as_str()));
            if incidents.len() == SYNTAX_ERROR_INCIDENTS {
                break;
            }
        }
    }
    if incidents.len() < SYNTAX_ERROR_INCIDENTS {
        return None;
    }

    let fingerprints: Vec<SyntaxErrorFingerprint> = incidents
        .iter()
        .map(|(_, content)| SyntaxErrorFingerprint::of(content))
        .collect();
    let first = &fingerprints[0];
    if first.error_tag.is_none() || first.cell_line.is_none() {
        return None;
    }
    if !fingerprints.iter().all(|fp| fp == first) {
        return None;
    }

    Some(StuckAnalysis {
        loop_type: LoopType::SyntaxError,
        loop_repeat_times: SYNTAX_ERROR_INCIDENTS,
        loop_start_idx: incidents[SYNTAX_ERROR_INCIDENTS - 1].0,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
