//! Assessment-session state machine.
//!
//! ```text
//! in_progress --answer-->   in_progress
//! in_progress --complete--> completed   (terminal)
//! in_progress --abandon-->  abandoned   (terminal)
//! ```
//!
//! Terminal sessions are immutable; every transition method returns
//! [`SessionError::Terminal`] once a session has left `in_progress`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "abandoned" => Some(SessionStatus::Abandoned),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::InProgress)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLink {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredArchetype {
    pub archetype_id: String,
    pub name: String,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence_score: f64,
    pub is_primary: bool,
    #[serde(default)]
    pub insight: String,
    #[serde(default)]
    pub resources: Vec<ResourceLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session is {} and can no longer change", .0.as_str())]
    Terminal(SessionStatus),
    #[error("progress percentage must be between 0 and 100, got {0}")]
    InvalidProgress(u32),
    #[error("confidence score for '{0}' must be between 0 and 1")]
    InvalidConfidence(String),
    #[error("at most one discovered archetype may be primary")]
    MultiplePrimary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentSession {
    pub id: String,
    pub user_id: String,
    pub assessment_id: String,
    pub status: SessionStatus,
    pub progress_percentage: u32,
    pub current_question_index: u32,
    pub discovered_archetypes: Vec<DiscoveredArchetype>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AssessmentSession {
    /// Start a fresh session at 0% progress.
    pub fn start(user_id: impl Into<String>, assessment_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            assessment_id: assessment_id.into(),
            status: SessionStatus::InProgress,
            progress_percentage: 0,
            current_question_index: 0,
            discovered_archetypes: Vec::new(),
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.status.is_terminal() {
            return Err(SessionError::Terminal(self.status));
        }
        Ok(())
    }

    /// Record an answered question.
    pub fn record_progress(
        &mut self,
        percentage: u32,
        question_index: u32,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        if percentage > 100 {
            return Err(SessionError::InvalidProgress(percentage));
        }
        self.progress_percentage = percentage;
        self.current_question_index = question_index;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Finish the session and snapshot the discovered archetypes.
    pub fn complete(&mut self, archetypes: Vec<DiscoveredArchetype>) -> Result<(), SessionError> {
        self.ensure_open()?;
        for a in &archetypes {
            if !(0.0..=1.0).contains(&a.confidence_score) {
                return Err(SessionError::InvalidConfidence(a.name.clone()));
            }
        }
        if archetypes.iter().filter(|a| a.is_primary).count() > 1 {
            return Err(SessionError::MultiplePrimary);
        }
        let now = Utc::now();
        self.status = SessionStatus::Completed;
        self.progress_percentage = 100;
        self.discovered_archetypes = archetypes;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn abandon(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.status = SessionStatus::Abandoned;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sage(primary: bool) -> DiscoveredArchetype {
        DiscoveredArchetype {
            archetype_id: "sage".into(),
            name: "Sage".into(),
            confidence_score: 0.82,
            is_primary: primary,
            insight: "You look for understanding first.".into(),
            resources: vec![ResourceLink {
                title: "Reading list".into(),
                url: None,
            }],
        }
    }

    #[test]
    fn test_progress_then_complete() {
        let mut s = AssessmentSession::start("u1", "a1");
        s.record_progress(40, 4).unwrap();
        assert_eq!(s.progress_percentage, 40);
        assert_eq!(s.current_question_index, 4);

        s.complete(vec![sage(true)]).unwrap();
        assert_eq!(s.status, SessionStatus::Completed);
        assert!(s.completed_at.is_some());
        assert_eq!(s.discovered_archetypes.len(), 1);
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut done = AssessmentSession::start("u1", "a1");
        done.complete(vec![]).unwrap();
        assert_eq!(
            done.record_progress(10, 1),
            Err(SessionError::Terminal(SessionStatus::Completed))
        );
        assert!(done.abandon().is_err());
        assert!(done.complete(vec![]).is_err());

        let mut gone = AssessmentSession::start("u1", "a1");
        gone.abandon().unwrap();
        assert_eq!(
            gone.complete(vec![]),
            Err(SessionError::Terminal(SessionStatus::Abandoned))
        );
    }

    #[test]
    fn test_invalid_progress() {
        let mut s = AssessmentSession::start("u1", "a1");
        assert_eq!(
            s.record_progress(101, 0),
            Err(SessionError::InvalidProgress(101))
        );
        assert_eq!(s.status, SessionStatus::InProgress);
    }

    #[test]
    fn test_complete_validates_archetypes() {
        let mut s = AssessmentSession::start("u1", "a1");
        assert_eq!(
            s.complete(vec![sage(true), sage(true)]),
            Err(SessionError::MultiplePrimary)
        );
        let mut bad = sage(false);
        bad.confidence_score = 1.5;
        assert!(matches!(
            s.complete(vec![bad]),
            Err(SessionError::InvalidConfidence(_))
        ));
        assert_eq!(s.status, SessionStatus::InProgress);
    }
}
