mod attempt;
mod ids;
mod level;
mod policy;
mod question;
mod track;

pub use attempt::{AttemptError, LockoutMap, QuizAttempt, percent_of};
pub use ids::{ParseIdError, QuizId, SessionId, UserId};
pub use level::{Level, LevelParseError};
pub use policy::{QuizPolicy, QuizPolicyDraft, QuizPolicyError};
pub use question::{
    OptionTag, Question, QuestionDraft, QuestionError, QuizOption, count_correct,
};
pub use track::{BASIC_TOPIC, Language, QuizKey, Topic, TrackError, TrackKind};
