// Question model, the QuestionSource contract, and the text-file provider.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum QuestionError {
    #[error("question pool is empty")]
    Empty,

    #[error("question {id} not found")]
    NotFound { id: u64 },

    #[error("failed to read question file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid question at line {line}: {message}")]
    Parse { line: usize, message: String },
}

// ---------------------------------------------------------------------------
// Question model
// ---------------------------------------------------------------------------

/// A scored group of equivalent answers. Any alternative claims the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerGroup {
    pub alternatives: Vec<String>,
    pub score: u32,
}

impl AnswerGroup {
    pub fn new(alternatives: Vec<String>, score: u32) -> Self {
        Self {
            alternatives,
            score,
        }
    }
}

impl fmt::Display for AnswerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.alternatives.join(" / "))
    }
}

/// A question with its answer groups. Each answer group becomes one slot in
/// a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: u64,
    pub text: String,
    pub answers: Vec<AnswerGroup>,
    lookup: HashMap<String, usize>,
}

impl Question {
    /// Build a question and its answer index. When two groups share an
    /// alternative, the first group owns it.
    pub fn new(id: u64, text: impl Into<String>, answers: Vec<AnswerGroup>) -> Self {
        let mut lookup = HashMap::new();
        for (slot, group) in answers.iter().enumerate() {
            for alt in &group.alternatives {
                lookup.entry(normalize(alt)).or_insert(slot);
            }
        }
        Self {
            id,
            text: text.into(),
            answers,
            lookup,
        }
    }

    /// Slot index of the answer group `text` belongs to, if any.
    pub fn check_answer(&self, text: &str) -> Option<usize> {
        self.lookup.get(&normalize(text)).copied()
    }

    pub fn slot_count(&self) -> usize {
        self.answers.len()
    }
}

/// Canonical form used for answer matching: trimmed, lowercase, inner runs
/// of whitespace collapsed to one space.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// QuestionSource contract
// ---------------------------------------------------------------------------

/// Deterministic supplier of questions. Shared between concurrently running
/// games, so implementations must be safe for concurrent use.
pub trait QuestionSource: Send + Sync {
    /// The question at position `played` of the permutation derived from
    /// `seed`, restricted to the first `limit` positions (0 = no limit).
    /// Identical arguments always return the identical question.
    fn next_question(&self, seed: i64, played: u64, limit: usize) -> Result<Question, QuestionError>;

    /// Number of questions in the pool.
    fn count(&self) -> usize;
}

/// Pick the 0-based question index for `played` rounds under `seed`.
///
/// The id order is a ChaCha8 shuffle of `0..size`, re-derived on every call
/// so the result depends only on the arguments.
pub fn permuted_index(seed: i64, played: u64, size: usize, limit: usize) -> Option<usize> {
    if size == 0 {
        return None;
    }
    let limit = if limit == 0 || limit > size { size } else { limit };

    let mut order: Vec<usize> = (0..size).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed as u64);
    order.shuffle(&mut rng);

    let position = (played % limit as u64) as usize;
    order.get(position).copied()
}

// ---------------------------------------------------------------------------
// Text-file provider
// ---------------------------------------------------------------------------

/// Questions loaded from a plain text file, one per line:
///
/// `question text*30:first answer*21:second / alias*7:third*`
///
/// Each `*`-separated field after the question is `score:alternatives`, with
/// alternatives separated by `/`. Lines without any answer are skipped.
#[derive(Debug, Clone, Default)]
pub struct TextQuestions {
    questions: Vec<Question>,
}

impl TextQuestions {
    pub fn load(path: &Path) -> Result<Self, QuestionError> {
        let content = std::fs::read_to_string(path).map_err(|e| QuestionError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let pool = Self::parse(&content);
        info!("Loaded {} questions from {}", pool.count(), path.display());
        Ok(pool)
    }

    /// Parse a question file. Lines without answers and lines that fail to
    /// parse are skipped; the rest of the file still loads.
    pub fn parse(content: &str) -> Self {
        let mut questions = Vec::new();
        for (i, line) in content.lines().enumerate() {
            let line_no = i + 1;
            match parse_line(line, line_no) {
                Ok(Some((text, answers))) => {
                    let id = questions.len() as u64 + 1;
                    questions.push(Question::new(id, text, answers));
                }
                Ok(None) => debug!("Skipping line {line_no}: no answers"),
                Err(e) => warn!("Skipping question: {e}"),
            }
        }
        Self { questions }
    }

    /// Wrap already-built questions. Ids are reassigned to 1-based positions.
    pub fn from_questions(questions: Vec<Question>) -> Self {
        let questions = questions
            .into_iter()
            .enumerate()
            .map(|(i, q)| Question::new(i as u64 + 1, q.text, q.answers))
            .collect();
        Self { questions }
    }

    pub fn question(&self, id: u64) -> Result<Question, QuestionError> {
        id.checked_sub(1)
            .and_then(|i| self.questions.get(i as usize))
            .cloned()
            .ok_or(QuestionError::NotFound { id })
    }
}

impl QuestionSource for TextQuestions {
    fn next_question(&self, seed: i64, played: u64, limit: usize) -> Result<Question, QuestionError> {
        let index = permuted_index(seed, played, self.questions.len(), limit)
            .ok_or(QuestionError::Empty)?;
        self.question(index as u64 + 1)
    }

    fn count(&self) -> usize {
        self.questions.len()
    }
}

fn parse_line(line: &str, line_no: usize) -> Result<Option<(String, Vec<AnswerGroup>)>, QuestionError> {
    let mut fields = line.split('*');
    let text = match fields.next() {
        Some(t) if !t.trim().is_empty() => t.trim().to_string(),
        _ => return Ok(None),
    };

    let mut answers = Vec::new();
    for raw in fields {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let (score, rest) = match raw.split_once(':') {
            Some((score, rest)) => {
                let score = score.trim().parse::<u32>().map_err(|e| QuestionError::Parse {
                    line: line_no,
                    message: format!("bad score {score:?}: {e}"),
                })?;
                (score, rest)
            }
            None => (0, raw),
        };

        let alternatives: Vec<String> = rest
            .split('/')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();
        if alternatives.is_empty() {
            continue;
        }
        answers.push(AnswerGroup::new(alternatives, score));
    }

    if answers.is_empty() {
        return Ok(None);
    }
    Ok(Some((text, answers)))
}
