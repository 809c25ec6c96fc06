//! Locating splice points in a method body.
//!
//! A predicate is a [`Matcher`] evaluated at every position, an [`Occurrence`] choosing one
//! of the matches, and an offset from the chosen match to the insertion point. Resolution is
//! a pure function of the body and the predicate.

use hookwright_core::{Instruction, MethodBody, Opcode, Operand};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Structural test applied at one position of an instruction sequence.
pub trait Matcher: Send + Sync {
    fn matches(&self, instructions: &[Instruction], at: usize) -> bool;

    /// Human-readable form used in diagnostics.
    fn describe(&self) -> String;
}

/// Matches one instruction by opcode and operand. `None` fields match anything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionPattern {
    pub opcode: Option<Opcode>,
    pub operand: Option<Operand>,
}

impl InstructionPattern {
    pub fn opcode(opcode: Opcode) -> Self {
        Self {
            opcode: Some(opcode),
            operand: None,
        }
    }

    /// Matches exactly this opcode and operand.
    pub fn exact(ins: &Instruction) -> Self {
        Self {
            opcode: Some(ins.opcode),
            operand: Some(ins.operand.clone()),
        }
    }

    pub fn with_operand(mut self, operand: Operand) -> Self {
        self.operand = Some(operand);
        self
    }

    pub fn test(&self, ins: &Instruction) -> bool {
        self.opcode.is_none_or(|op| op == ins.opcode)
            && self.operand.as_ref().is_none_or(|operand| *operand == ins.operand)
    }
}

impl fmt::Display for InstructionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.opcode {
            Some(op) => write!(f, "{op}")?,
            None => f.write_str("*")?,
        }
        match &self.operand {
            None => Ok(()),
            Some(Operand::None) => f.write_str(" <none>"),
            Some(Operand::Int(v)) => write!(f, " {v}"),
            Some(Operand::Str(s)) => write!(f, " {s:?}"),
            Some(Operand::Arg(i)) => write!(f, " arg{i}"),
            Some(Operand::Local(i)) => write!(f, " loc{i}"),
            Some(Operand::Label(l)) => write!(f, " {l}"),
            Some(Operand::Field(id)) => write!(f, " {id}"),
            Some(Operand::Method(id)) => write!(f, " {id}"),
            Some(Operand::Type(id)) => write!(f, " {id}"),
        }
    }
}

impl Matcher for InstructionPattern {
    fn matches(&self, instructions: &[Instruction], at: usize) -> bool {
        instructions.get(at).is_some_and(|ins| self.test(ins))
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

/// Matches a run of consecutive instructions starting at the position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sequence(pub Vec<InstructionPattern>);

impl Matcher for Sequence {
    fn matches(&self, instructions: &[Instruction], at: usize) -> bool {
        !self.0.is_empty()
            && instructions
                .get(at..at + self.0.len())
                .is_some_and(|run| run.iter().zip(&self.0).all(|(ins, p)| p.test(ins)))
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        format!("[{}]", parts.join("; "))
    }
}

/// Wraps a closure over `(instruction, position)`.
pub struct FnMatcher<F> {
    description: String,
    test: F,
}

impl<F> Matcher for FnMatcher<F>
where
    F: Fn(&Instruction, usize) -> bool + Send + Sync,
{
    fn matches(&self, instructions: &[Instruction], at: usize) -> bool {
        instructions.get(at).is_some_and(|ins| (self.test)(ins, at))
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// Which of several matches to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Occurrence {
    /// Exactly one match is required.
    #[default]
    Only,
    First,
    Last,
    /// Zero-based match index.
    Nth(usize),
}

impl fmt::Display for Occurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Occurrence::Only => f.write_str("only"),
            Occurrence::First => f.write_str("first"),
            Occurrence::Last => f.write_str("last"),
            Occurrence::Nth(n) => write!(f, "#{n}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AnchorError {
    /// No position matches; the host no longer has the expected shape.
    #[error("anchor not found: no instruction matches {pattern}")]
    NotFound { pattern: String },

    /// The requested occurrence does not single out one match.
    #[error("anchor ambiguous: {pattern} matched {matches} times, occurrence {occurrence} requested")]
    Ambiguous {
        pattern: String,
        occurrence: Occurrence,
        matches: usize,
    },

    /// The offset moves the insertion point outside the body.
    #[error("anchor offset {offset} from match at {matched} leaves the body ({len} instructions) for {pattern}")]
    OffsetOutOfRange {
        pattern: String,
        matched: usize,
        offset: isize,
        len: usize,
    },
}

/// A resolved anchor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AnchorMatch {
    /// Every position the matcher accepted.
    pub matches: Vec<usize>,
    /// The match the occurrence selected.
    pub matched: usize,
    /// Insertion point: `matched + offset`.
    pub index: usize,
}

/// Matcher plus occurrence and offset.
#[derive(Clone)]
pub struct AnchorPredicate {
    matcher: Arc<dyn Matcher>,
    occurrence: Occurrence,
    offset: isize,
}

impl AnchorPredicate {
    pub fn new(matcher: impl Matcher + 'static) -> Self {
        Self {
            matcher: Arc::new(matcher),
            occurrence: Occurrence::Only,
            offset: 0,
        }
    }

    pub fn instruction(pattern: InstructionPattern) -> Self {
        Self::new(pattern)
    }

    pub fn sequence(patterns: Vec<InstructionPattern>) -> Self {
        Self::new(Sequence(patterns))
    }

    /// Predicate from a closure over `(instruction, position)`.
    pub fn when<F>(description: impl Into<String>, test: F) -> Self
    where
        F: Fn(&Instruction, usize) -> bool + Send + Sync + 'static,
    {
        Self::new(FnMatcher {
            description: description.into(),
            test,
        })
    }

    pub fn occurrence(mut self, occurrence: Occurrence) -> Self {
        self.occurrence = occurrence;
        self
    }

    pub fn nth(self, n: usize) -> Self {
        self.occurrence(Occurrence::Nth(n))
    }

    pub fn offset(mut self, offset: isize) -> Self {
        self.offset = offset;
        self
    }

    pub fn describe(&self) -> String {
        let mut text = self.matcher.describe();
        if self.occurrence != Occurrence::Only {
            text.push_str(&format!(" ({})", self.occurrence));
        }
        if self.offset != 0 {
            text.push_str(&format!(" {:+}", self.offset));
        }
        text
    }

    /// Positions the matcher accepts, ignoring occurrence and offset.
    pub fn locate_all(&self, instructions: &[Instruction]) -> Vec<usize> {
        (0..instructions.len())
            .filter(|&at| self.matcher.matches(instructions, at))
            .collect()
    }

    /// Resolves against a bare instruction sequence.
    pub fn resolve(&self, instructions: &[Instruction]) -> Result<AnchorMatch, AnchorError> {
        let matches = self.locate_all(instructions);
        if matches.is_empty() {
            return Err(AnchorError::NotFound {
                pattern: self.describe(),
            });
        }
        let chosen = match self.occurrence {
            Occurrence::Only if matches.len() == 1 => Some(matches[0]),
            Occurrence::Only => None,
            Occurrence::First => matches.first().copied(),
            Occurrence::Last => matches.last().copied(),
            Occurrence::Nth(n) => matches.get(n).copied(),
        };
        let Some(matched) = chosen else {
            return Err(AnchorError::Ambiguous {
                pattern: self.describe(),
                occurrence: self.occurrence,
                matches: matches.len(),
            });
        };
        let len = instructions.len();
        let index = matched
            .checked_add_signed(self.offset)
            .filter(|&index| index < len)
            .ok_or_else(|| AnchorError::OffsetOutOfRange {
                pattern: self.describe(),
                matched,
                offset: self.offset,
                len,
            })?;
        debug!(
            "anchor {} matched {:?}, selected {} -> insert at {}",
            self.describe(),
            matches,
            matched,
            index
        );
        Ok(AnchorMatch {
            matches,
            matched,
            index,
        })
    }
}

impl fmt::Debug for AnchorPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AnchorPredicate")
            .field(&self.describe())
            .finish()
    }
}

/// Finds the insertion index `predicate` selects in `body`.
pub fn locate(body: &MethodBody, predicate: &AnchorPredicate) -> Result<usize, AnchorError> {
    predicate.resolve(&body.instructions).map(|m| m.index)
}
