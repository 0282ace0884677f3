use std::sync::Arc;

use quiz_core::model::{Language, Level, QuizKey, QuizPolicy, Topic, UserId};
use storage::repository::AttemptStore;
use tracing::info;

use crate::error::CourseCompletionError;
use crate::progression::ProgressionService;

/// Records a course result once every level of a topic track is completed.
#[derive(Clone)]
pub struct CourseCompletionService {
    policy: QuizPolicy,
    progression: ProgressionService,
    store: Arc<dyn AttemptStore>,
}

impl CourseCompletionService {
    #[must_use]
    pub fn new(policy: QuizPolicy, progression: ProgressionService, store: Arc<dyn AttemptStore>) -> Self {
        Self {
            policy,
            progression,
            store,
        }
    }

    /// Complete the course for `topic` if all levels are done.
    ///
    /// Returns the recorded percentage, or `None` for the basic track and for
    /// topics with unfinished levels.
    ///
    /// # Errors
    ///
    /// Returns `CourseCompletionError` when progress or statistics cannot be
    /// read, or the result cannot be stored.
    pub async fn complete_if_finished(
        &self,
        user: UserId,
        language: &Language,
        topic: &Topic,
    ) -> Result<Option<u32>, CourseCompletionError> {
        if topic.is_basic() {
            return Ok(None);
        }
        let board = self.progression.board(user, language, topic).await?;
        if !board.all_completed() {
            return Ok(None);
        }

        let mut percentages = Vec::with_capacity(Level::ALL.len());
        for level in Level::ALL {
            let key = QuizKey::new(language.clone(), level, topic.clone());
            let review = self
                .store
                .get_review(user, &key)
                .await
                .map_err(CourseCompletionError::Statistics)?;
            percentages.push(review.statistics.best_percentage);
        }

        let result = course_result(&percentages, self.policy.course_completion_floor());
        self.store
            .complete_course(user, topic, result)
            .await
            .map_err(CourseCompletionError::Record)?;
        info!(user_id = %user, %topic, result, "course completed");
        Ok(Some(result))
    }
}

/// `max(round(mean), best, floor)`, capped at 100.
fn course_result(percentages: &[u32], floor: u32) -> u32 {
    let best = percentages.iter().copied().max().unwrap_or(0);
    let average = if percentages.is_empty() {
        0
    } else {
        let sum: u32 = percentages.iter().sum();
        let count = u32::try_from(percentages.len()).unwrap_or(u32::MAX);
        (sum + count / 2) / count
    };
    average.max(best).max(floor).min(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_applies_to_weak_courses() {
        assert_eq!(course_result(&[40, 50, 45], 60), 60);
    }

    #[test]
    fn best_level_beats_average() {
        assert_eq!(course_result(&[70, 90, 80], 60), 90);
    }

    #[test]
    fn never_exceeds_hundred() {
        assert_eq!(course_result(&[100, 100, 100], 120), 100);
        assert_eq!(course_result(&[], 60), 60);
    }
}
