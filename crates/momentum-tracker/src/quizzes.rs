//! Circle quizzes and scored attempts.

use std::sync::Arc;

use momentum_store::{
    ActivityKind, Mutation, NewQuiz, NewQuizAttempt, Order, QUIZ_ATTEMPTS_TABLE, QUIZZES_TABLE,
    Query, Quiz, QuizAttempt, QuizQuestion,
};
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::derived::score_quiz;
use crate::error::TrackerError;
use crate::feed::ActivityDraft;
use crate::{Context, Result, keys};

/// Check a quiz before it is stored.
pub fn validate_quiz(title: &str, questions: &[QuizQuestion]) -> Result<()> {
    if title.trim().is_empty() {
        return Err(TrackerError::invalid("quiz title is empty"));
    }
    if questions.is_empty() {
        return Err(TrackerError::invalid("quiz has no questions"));
    }
    for (i, q) in questions.iter().enumerate() {
        let n = i + 1;
        if q.question.trim().is_empty() {
            return Err(TrackerError::invalid(format!("question {} has no text", n)));
        }
        if q.options.len() < 2 {
            return Err(TrackerError::invalid(format!(
                "question {} needs at least two options",
                n
            )));
        }
        if q.options.iter().any(|o| o.trim().is_empty()) {
            return Err(TrackerError::invalid(format!("question {} has an empty option", n)));
        }
        if q.correct_index >= q.options.len() {
            return Err(TrackerError::invalid(format!(
                "question {} marks option {} correct but has {}",
                n,
                q.correct_index,
                q.options.len()
            )));
        }
    }
    Ok(())
}

pub struct Quizzes<'a> {
    ctx: &'a Context,
}

impl Context {
    pub fn quizzes(&self) -> Quizzes<'_> {
        Quizzes { ctx: self }
    }
}

impl Quizzes<'_> {
    /// A circle's quizzes, newest first.
    pub async fn list(&self, circle_id: Uuid) -> Result<Arc<Vec<Quiz>>> {
        let query = Query::table(QUIZZES_TABLE)
            .eq("circle_id", circle_id)
            .order("created_at", Order::Desc);
        self.ctx
            .read(keys::quizzes(circle_id), move |store| async move {
                store.select(&query).await
            })
            .await
    }

    #[instrument(skip(self, questions), fields(questions = questions.len()))]
    pub async fn create(
        &self,
        circle_id: Uuid,
        title: &str,
        questions: Vec<QuizQuestion>,
    ) -> Result<Quiz> {
        validate_quiz(title, &questions)?;
        let row = NewQuiz {
            circle_id,
            created_by: self.ctx.user_id,
            title: title.trim().to_string(),
            questions,
        };
        self.ctx
            .write(
                Mutation::new("Quiz created").invalidates(keys::quizzes(circle_id)),
                move |store| async move { store.insert_one(QUIZZES_TABLE, &row).await },
            )
            .await
    }

    /// Score `answers` against the quiz and store the attempt.
    #[instrument(skip(self, answers))]
    pub async fn submit(&self, quiz_id: Uuid, answers: Vec<usize>) -> Result<QuizAttempt> {
        let quiz: Quiz = self
            .ctx
            .store
            .select_one(&Query::table(QUIZZES_TABLE).eq("id", quiz_id))
            .await?
            .ok_or_else(|| TrackerError::not_found(format!("quiz {}", quiz_id)))?;
        if answers.len() != quiz.questions.len() {
            return Err(TrackerError::invalid(format!(
                "{} answers for {} questions",
                answers.len(),
                quiz.questions.len()
            )));
        }

        let correct: Vec<usize> = quiz.questions.iter().map(|q| q.correct_index).collect();
        let score = score_quiz(&answers, &correct);
        let total = quiz.questions.len() as u32;
        let row = NewQuizAttempt {
            quiz_id,
            user_id: self.ctx.user_id,
            score,
            total_questions: total,
            answers,
        };
        let attempt: QuizAttempt = self
            .ctx
            .write(
                Mutation::new("Quiz submitted").invalidates(keys::quiz_attempts(quiz_id)),
                move |store| async move { store.insert_one(QUIZ_ATTEMPTS_TABLE, &row).await },
            )
            .await?;
        info!(quiz = %quiz_id, score, total, "quiz attempt stored");

        self.ctx
            .feed()
            .post(ActivityDraft {
                circle_id: Some(quiz.circle_id),
                kind: ActivityKind::QuizCompleted,
                title: format!("Scored {}/{} on \"{}\"", score, total, quiz.title),
                metadata: json!({ "quiz_id": quiz_id, "score": score, "total": total }),
            })
            .await?;
        Ok(attempt)
    }

    /// Attempts on a quiz, best score first.
    pub async fn attempts(&self, quiz_id: Uuid) -> Result<Arc<Vec<QuizAttempt>>> {
        let query = Query::table(QUIZ_ATTEMPTS_TABLE)
            .eq("quiz_id", quiz_id)
            .order("score", Order::Desc);
        self.ctx
            .read(keys::quiz_attempts(quiz_id), move |store| async move {
                store.select(&query).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(options: &[&str], correct_index: usize) -> QuizQuestion {
        QuizQuestion {
            question: "Which?".to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
            correct_index,
        }
    }

    #[test]
    fn test_valid_quiz() {
        let questions = vec![question(&["a", "b"], 1), question(&["x", "y", "z"], 0)];
        assert!(validate_quiz("Week 1", &questions).is_ok());
    }

    #[test]
    fn test_rejects_bad_quizzes() {
        assert!(validate_quiz("  ", &[question(&["a", "b"], 0)]).is_err());
        assert!(validate_quiz("Quiz", &[]).is_err());
        assert!(validate_quiz("Quiz", &[question(&["a"], 0)]).is_err());
        assert!(validate_quiz("Quiz", &[question(&["a", " "], 0)]).is_err());
        assert!(validate_quiz("Quiz", &[question(&["a", "b"], 2)]).is_err());
    }
}
