//! Phases of one hook invocation.
//!
//! `Entered -> PayloadConstructed -> Dispatching(i of n) -> Dispatched -> Decided -> exit`,
//! where the exit is `OriginalContinuation` for an allowed event and `EarlyExit` for a denied
//! one. There is no retry: a finished invocation accepts no further transitions.

use crate::bus::{DispatchReport, EventBus};
use crate::payload::{Cancellable, HookName, Verdict};
use crate::result::{Error, Result};
use serde::Serialize;
use std::fmt;

/// Where control goes once the verdict is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Exit {
    OriginalContinuation,
    EarlyExit,
}

impl From<Verdict> for Exit {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Allowed => Exit::OriginalContinuation,
            Verdict::Denied => Exit::EarlyExit,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Entered,
    PayloadConstructed,
    Dispatching { index: usize, of: usize },
    Dispatched,
    Decided(Verdict),
    Finished(Exit),
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Entered => f.write_str("entered"),
            Phase::PayloadConstructed => f.write_str("payload-constructed"),
            Phase::Dispatching { index, of } => write!(f, "dispatching({} of {of})", index + 1),
            Phase::Dispatched => f.write_str("dispatched"),
            Phase::Decided(verdict) => write!(f, "decided({verdict})"),
            Phase::Finished(Exit::OriginalContinuation) => f.write_str("original-continuation"),
            Phase::Finished(Exit::EarlyExit) => f.write_str("early-exit"),
        }
    }
}

/// Tracks one invocation of a patched method through its phases.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Invocation {
    hook: HookName,
    history: Vec<Phase>,
}

impl Invocation {
    pub fn enter(hook: impl Into<HookName>) -> Self {
        Self {
            hook: hook.into(),
            history: vec![Phase::Entered],
        }
    }

    pub fn hook(&self) -> &HookName {
        &self.hook
    }

    pub fn phase(&self) -> Phase {
        self.history.last().copied().unwrap_or(Phase::Entered)
    }

    /// Every phase visited, in order.
    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    pub fn exit(&self) -> Option<Exit> {
        match self.phase() {
            Phase::Finished(exit) => Some(exit),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.exit().is_some()
    }

    fn advance(&mut self, to: Phase) -> Result<()> {
        let from = self.phase();
        let legal = match (from, to) {
            (Phase::Entered, Phase::PayloadConstructed) => true,
            (Phase::PayloadConstructed, Phase::Dispatching { index: 0, of }) => of > 0,
            (Phase::Dispatching { index, of }, Phase::Dispatching { index: next, of: n }) => {
                n == of && next == index + 1 && next < of
            }
            (Phase::PayloadConstructed, Phase::Dispatched) => true,
            (Phase::Dispatching { index, of }, Phase::Dispatched) => index + 1 == of,
            (Phase::Dispatched, Phase::Decided(_)) => true,
            (Phase::Decided(verdict), Phase::Finished(exit)) => Exit::from(verdict) == exit,
            _ => false,
        };
        if !legal {
            return Err(Error::InvalidTransition { from, to });
        }
        self.history.push(to);
        Ok(())
    }

    pub fn payload_constructed(&mut self) -> Result<()> {
        self.advance(Phase::PayloadConstructed)
    }

    pub fn dispatching(&mut self, index: usize, of: usize) -> Result<()> {
        self.advance(Phase::Dispatching { index, of })
    }

    pub fn dispatched(&mut self) -> Result<()> {
        self.advance(Phase::Dispatched)
    }

    pub fn decide(&mut self, verdict: Verdict) -> Result<()> {
        self.advance(Phase::Decided(verdict))
    }

    /// Takes the exit the verdict implies.
    pub fn finish(&mut self) -> Result<Exit> {
        let exit = match self.phase() {
            Phase::Decided(verdict) => Exit::from(verdict),
            from => {
                return Err(Error::InvalidTransition {
                    from,
                    to: Phase::Finished(Exit::OriginalContinuation),
                });
            }
        };
        self.advance(Phase::Finished(exit))?;
        Ok(exit)
    }

    /// Drives an already-constructed payload through dispatch and the verdict.
    pub fn run<E: Cancellable>(
        hook: &str,
        bus: &EventBus<E>,
        payload: &mut E,
    ) -> Result<(Self, DispatchReport)> {
        let mut invocation = Invocation::enter(hook);
        invocation.payload_constructed()?;
        let mut fault = None;
        let report = bus.dispatch_observed(hook, payload, &mut |index, of| {
            if let Err(err) = invocation.dispatching(index, of) {
                fault.get_or_insert(err);
            }
        });
        if let Some(err) = fault {
            return Err(err);
        }
        invocation.dispatched()?;
        invocation.decide(report.verdict)?;
        invocation.finish()?;
        Ok((invocation, report))
    }
}
