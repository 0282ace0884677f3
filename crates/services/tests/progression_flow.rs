mod common;

use std::sync::Arc;

use chrono::Duration;
use common::*;
use quiz_core::LevelStatus;
use quiz_core::model::{Level, QuizPolicy, Topic, UserId};
use quiz_core::time::{fixed_clock, fixed_now};
use services::{CourseCompletionService, ProgressionService, SessionError, SessionPhase};

fn progression(h: &Harness) -> ProgressionService {
    ProgressionService::new(
        fixed_clock(),
        QuizPolicy::default(),
        Arc::new(h.store.clone()),
        Arc::new(h.store.clone()),
    )
}

fn completion(h: &Harness) -> CourseCompletionService {
    CourseCompletionService::new(QuizPolicy::default(), progression(h), Arc::new(h.store.clone()))
}

async fn take(h: &Harness, topic: &Topic, level: Level, correct: usize) {
    let mut session = open_ready(h, key(topic, level)).await;
    answer_all(&mut session, correct);
    session.submit().await.unwrap();
}

fn statuses(board: &services::LevelBoard) -> Vec<LevelStatus> {
    board.entries.iter().map(|entry| entry.status).collect()
}

#[tokio::test]
async fn fresh_user_can_only_start_beginner() {
    let h = harness(&stacks());
    let board = progression(&h).board(USER, &python(), &stacks()).await.unwrap();
    assert_eq!(
        statuses(&board),
        vec![LevelStatus::Available, LevelStatus::Locked, LevelStatus::Locked]
    );
    assert!(board.entries.iter().all(|entry| entry.quiz.is_some()));
}

#[tokio::test]
async fn unknown_user_board_fails_while_checking() {
    let h = harness(&stacks());
    let err = progression(&h)
        .board(UserId::new(99), &python(), &stacks())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::FetchFailure {
            phase: SessionPhase::Checking,
            ..
        }
    ));
}

#[tokio::test]
async fn board_reflects_latest_history() {
    let h = harness(&stacks());
    let service = progression(&h);

    take(&h, &stacks(), Level::Beginner, 3).await;
    let board = service.board(USER, &python(), &stacks()).await.unwrap();
    assert_eq!(
        statuses(&board),
        vec![LevelStatus::Completed, LevelStatus::Available, LevelStatus::Locked]
    );

    take(&h, &stacks(), Level::Intermediate, 1).await;
    let board = service.board(USER, &python(), &stacks()).await.unwrap();
    assert_eq!(
        board.status(Level::Intermediate),
        Some(LevelStatus::LockedUntil(fixed_now() + Duration::hours(24)))
    );
    assert!(!board.all_completed());
}

#[tokio::test]
async fn board_serializes_for_the_level_selector() {
    let h = harness(&stacks());
    take(&h, &stacks(), Level::Beginner, 4).await;
    let board = progression(&h).board(USER, &python(), &stacks()).await.unwrap();

    let json = serde_json::to_value(&board).unwrap();
    assert_eq!(json["topic"], "stacks");
    assert_eq!(json["entries"][0]["status"]["state"], "completed");
    assert_eq!(json["entries"][1]["status"]["state"], "available");
}

#[tokio::test]
async fn finished_topic_records_course_result() {
    let h = harness(&stacks());
    for level in Level::ALL {
        take(&h, &stacks(), level, 3).await;
    }

    let result = completion(&h)
        .complete_if_finished(USER, &python(), &stacks())
        .await
        .unwrap();
    assert_eq!(result, Some(75));
    assert_eq!(h.store.course_result(USER, &stacks()).unwrap(), Some(75));
}

#[tokio::test]
async fn weak_course_result_is_raised_to_the_floor() {
    let h = harness(&stacks());
    // every level at 75%
    for level in Level::ALL {
        take(&h, &stacks(), level, 3).await;
    }
    let policy = QuizPolicy::default();
    let mut draft = policy.to_draft();
    draft.course_completion_floor = 80;
    let service = CourseCompletionService::new(draft.validate().unwrap(), progression(&h), Arc::new(h.store.clone()));

    let result = service.complete_if_finished(USER, &python(), &stacks()).await.unwrap();
    assert_eq!(result, Some(80));
}

#[tokio::test]
async fn unfinished_or_basic_tracks_are_left_alone() {
    let h = harness(&stacks());
    take(&h, &stacks(), Level::Beginner, 4).await;

    let service = completion(&h);
    assert_eq!(
        service.complete_if_finished(USER, &python(), &stacks()).await.unwrap(),
        None
    );
    assert_eq!(h.store.course_result(USER, &stacks()).unwrap(), None);

    let basic = Topic::basic();
    let hb = harness(&basic);
    for level in Level::ALL {
        take(&hb, &basic, level, 0).await;
    }
    assert_eq!(
        completion(&hb)
            .complete_if_finished(USER, &python(), &basic)
            .await
            .unwrap(),
        None
    );
}
