use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

//
// ─── OPTION TAGS ───────────────────────────────────────────────────────────────
//

/// Label of one answer option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptionTag {
    A,
    B,
    C,
    D,
}

impl OptionTag {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OptionTag::A => "A",
            OptionTag::B => "B",
            OptionTag::C => "C",
            OptionTag::D => "D",
        }
    }
}

impl fmt::Display for OptionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptionTag {
    type Err = QuestionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(OptionTag::A),
            "B" | "b" => Ok(OptionTag::B),
            "C" | "c" => Ok(OptionTag::C),
            "D" | "d" => Ok(OptionTag::D),
            other => Err(QuestionError::UnknownTag(other.to_owned())),
        }
    }
}

//
// ─── QUESTIONS ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question text cannot be empty")]
    EmptyText,

    #[error("a question needs at least two options")]
    TooFewOptions,

    #[error("option {0} appears more than once")]
    DuplicateTag(OptionTag),

    #[error("correct option {0} is not among the options")]
    MissingCorrectOption(OptionTag),

    #[error("unknown option tag: {0}")]
    UnknownTag(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizOption {
    pub text: String,
    pub tag: OptionTag,
}

/// A multiple-choice question with its ordered options and answer key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QuestionDraft")]
pub struct Question {
    text: String,
    options: Vec<QuizOption>,
    correct_option: OptionTag,
}

/// Unvalidated question shape as it arrives from a store.
#[derive(Debug, Clone, Deserialize)]
pub struct QuestionDraft {
    pub text: String,
    pub options: Vec<QuizOption>,
    pub correct_option: OptionTag,
}

impl QuestionDraft {
    /// # Errors
    ///
    /// Returns `QuestionError` if the text is blank, fewer than two options are
    /// given, a tag repeats, or the correct option is not offered.
    pub fn validate(self) -> Result<Question, QuestionError> {
        if self.text.trim().is_empty() {
            return Err(QuestionError::EmptyText);
        }
        if self.options.len() < 2 {
            return Err(QuestionError::TooFewOptions);
        }
        let mut seen = HashSet::new();
        for option in &self.options {
            if !seen.insert(option.tag) {
                return Err(QuestionError::DuplicateTag(option.tag));
            }
        }
        if !seen.contains(&self.correct_option) {
            return Err(QuestionError::MissingCorrectOption(self.correct_option));
        }
        Ok(Question {
            text: self.text,
            options: self.options,
            correct_option: self.correct_option,
        })
    }
}

impl TryFrom<QuestionDraft> for Question {
    type Error = QuestionError;

    fn try_from(draft: QuestionDraft) -> Result<Self, Self::Error> {
        draft.validate()
    }
}

impl Question {
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn options(&self) -> &[QuizOption] {
        &self.options
    }

    #[must_use]
    pub fn correct_option(&self) -> OptionTag {
        self.correct_option
    }

    #[must_use]
    pub fn is_correct(&self, answer: OptionTag) -> bool {
        self.correct_option == answer
    }
}

/// Counts answers that match the answer key, position by position.
///
/// Missing answers count as wrong; answers beyond the question list are ignored.
#[must_use]
pub fn count_correct(questions: &[Question], answers: &[Option<OptionTag>]) -> u32 {
    let correct = questions
        .iter()
        .zip(answers)
        .filter(|(question, answer)| answer.is_some_and(|tag| question.is_correct(tag)))
        .count();
    u32::try_from(correct).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(tag: OptionTag) -> QuizOption {
        QuizOption {
            text: format!("option {tag}"),
            tag,
        }
    }

    fn draft(correct: OptionTag) -> QuestionDraft {
        QuestionDraft {
            text: "What does a stack pop?".into(),
            options: vec![option(OptionTag::A), option(OptionTag::B), option(OptionTag::C)],
            correct_option: correct,
        }
    }

    #[test]
    fn validates_answer_key_is_offered() {
        assert!(draft(OptionTag::B).validate().is_ok());
        assert_eq!(
            draft(OptionTag::D).validate().unwrap_err(),
            QuestionError::MissingCorrectOption(OptionTag::D)
        );
    }

    #[test]
    fn rejects_duplicate_tags() {
        let mut d = draft(OptionTag::A);
        d.options.push(option(OptionTag::A));
        assert_eq!(d.validate().unwrap_err(), QuestionError::DuplicateTag(OptionTag::A));
    }

    #[test]
    fn counts_positionally_and_treats_gaps_as_wrong() {
        let questions = vec![
            draft(OptionTag::A).validate().unwrap(),
            draft(OptionTag::B).validate().unwrap(),
            draft(OptionTag::C).validate().unwrap(),
        ];
        let answers = vec![Some(OptionTag::A), None, Some(OptionTag::C)];
        assert_eq!(count_correct(&questions, &answers), 2);
    }

    #[test]
    fn tag_parses_lowercase() {
        assert_eq!("c".parse::<OptionTag>().unwrap(), OptionTag::C);
        assert!("E".parse::<OptionTag>().is_err());
    }
}
