//! Notice documents and their pipeline state machine.
//!
//! ```text
//! discovered -> downloading -> downloaded -> extracting -> extracted -> analyzing -> analyzed
//!                    ^  |                        ^  |                      ^  |
//!                    |  v                        |  v                      |  v
//!              download_failed            extraction_failed          analysis_failed
//! ```
//!
//! A failed state only re-enters its own "-ing" state. Re-downloading a
//! settled document is an explicit restart, never an automatic transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Discovered,
    Downloading,
    Downloaded,
    DownloadFailed,
    Extracting,
    Extracted,
    ExtractionFailed,
    Analyzing,
    Analyzed,
    AnalysisFailed,
}

/// The three external stages of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Extraction,
    Analysis,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Extraction => "extraction",
            Stage::Analysis => "analysis",
        }
    }

    pub fn in_flight(&self) -> DocumentState {
        match self {
            Stage::Download => DocumentState::Downloading,
            Stage::Extraction => DocumentState::Extracting,
            Stage::Analysis => DocumentState::Analyzing,
        }
    }

    pub fn succeeded(&self) -> DocumentState {
        match self {
            Stage::Download => DocumentState::Downloaded,
            Stage::Extraction => DocumentState::Extracted,
            Stage::Analysis => DocumentState::Analyzed,
        }
    }

    pub fn failed(&self) -> DocumentState {
        match self {
            Stage::Download => DocumentState::DownloadFailed,
            Stage::Extraction => DocumentState::ExtractionFailed,
            Stage::Analysis => DocumentState::AnalysisFailed,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DocumentState {
    pub const ALL: [DocumentState; 10] = [
        DocumentState::Discovered,
        DocumentState::Downloading,
        DocumentState::Downloaded,
        DocumentState::DownloadFailed,
        DocumentState::Extracting,
        DocumentState::Extracted,
        DocumentState::ExtractionFailed,
        DocumentState::Analyzing,
        DocumentState::Analyzed,
        DocumentState::AnalysisFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Discovered => "discovered",
            DocumentState::Downloading => "downloading",
            DocumentState::Downloaded => "downloaded",
            DocumentState::DownloadFailed => "download_failed",
            DocumentState::Extracting => "extracting",
            DocumentState::Extracted => "extracted",
            DocumentState::ExtractionFailed => "extraction_failed",
            DocumentState::Analyzing => "analyzing",
            DocumentState::Analyzed => "analyzed",
            DocumentState::AnalysisFailed => "analysis_failed",
        }
    }

    /// Stage this state belongs to, `None` for `discovered`.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            DocumentState::Discovered => None,
            DocumentState::Downloading
            | DocumentState::Downloaded
            | DocumentState::DownloadFailed => Some(Stage::Download),
            DocumentState::Extracting
            | DocumentState::Extracted
            | DocumentState::ExtractionFailed => Some(Stage::Extraction),
            DocumentState::Analyzing
            | DocumentState::Analyzed
            | DocumentState::AnalysisFailed => Some(Stage::Analysis),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            DocumentState::Downloading | DocumentState::Extracting | DocumentState::Analyzing
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            DocumentState::DownloadFailed
                | DocumentState::ExtractionFailed
                | DocumentState::AnalysisFailed
        )
    }

    /// The stage the pipeline should run next from this state.
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            DocumentState::Discovered | DocumentState::DownloadFailed => Some(Stage::Download),
            DocumentState::Downloaded | DocumentState::ExtractionFailed => Some(Stage::Extraction),
            DocumentState::Extracted | DocumentState::AnalysisFailed => Some(Stage::Analysis),
            _ => None,
        }
    }

    /// Forward edges plus retry edges from a failure into its own stage.
    pub fn can_transition_to(&self, next: DocumentState) -> bool {
        use DocumentState::*;

        matches!(
            (self, next),
            (Discovered, Downloading)
                | (DownloadFailed, Downloading)
                | (Downloading, Downloaded)
                | (Downloading, DownloadFailed)
                | (Downloaded, Extracting)
                | (ExtractionFailed, Extracting)
                | (Extracting, Extracted)
                | (Extracting, ExtractionFailed)
                | (Extracted, Analyzing)
                | (AnalysisFailed, Analyzing)
                | (Analyzing, Analyzed)
                | (Analyzing, AnalysisFailed)
        )
    }

    /// States from which an explicit re-download may start.
    pub fn can_restart_download(&self) -> bool {
        !self.is_in_flight() && !matches!(self, DocumentState::Discovered | DocumentState::DownloadFailed)
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        DocumentState::ALL
            .iter()
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| AppError::validation(format!("unknown document state '{s}'"), Some("state")))
    }
}

/// Content metadata recorded when a download completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedContent {
    pub sha256: String,
    pub content_type: Option<String>,
    pub file_size: i64,
}

/// What a completed download did to previously derived results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// No earlier content on record
    First,
    /// Same checksum as before: extracted text and analysis retained
    Unchanged,
    /// Different checksum: extracted text and analysis cleared
    Changed,
}

/// A document referenced by a notice, identified by URL at discovery time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeDocument {
    pub id: Uuid,
    pub notice_id: Uuid,
    pub lot_ref: Option<String>,
    pub url: String,
    pub title: Option<String>,

    pub state: DocumentState,
    /// Attempts at the current stage, reset when a new stage begins
    pub attempt_count: i32,
    pub last_error: Option<String>,

    pub content_type: Option<String>,
    pub file_size: Option<i64>,
    pub sha256: Option<String>,
    pub downloaded_at: Option<DateTime<Utc>>,

    pub extracted_text: Option<String>,
    pub extracted_at: Option<DateTime<Utc>>,

    pub ai_analysis: Option<String>,
    pub ai_analysis_generated_at: Option<DateTime<Utc>>,

    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NoticeDocument {
    pub fn discovered(
        notice_id: Uuid,
        url: String,
        title: Option<String>,
        lot_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            notice_id,
            lot_ref,
            url,
            title,
            state: DocumentState::Discovered,
            attempt_count: 0,
            last_error: None,
            content_type: None,
            file_size: None,
            sha256: None,
            downloaded_at: None,
            extracted_text: None,
            extracted_at: None,
            ai_analysis: None,
            ai_analysis_generated_at: None,
            discovered_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: DocumentState, now: DateTime<Utc>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(AppError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    /// Enter the in-flight state of `stage`, counting the attempt.
    pub fn begin(&mut self, stage: Stage, now: DateTime<Utc>) -> Result<()> {
        let retrying = self.state == stage.failed();
        self.transition(stage.in_flight(), now)?;
        self.attempt_count = if retrying { self.attempt_count + 1 } else { 1 };
        Ok(())
    }

    /// Explicitly re-download a document that already settled.
    pub fn restart_download(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.state.can_restart_download() {
            return Err(AppError::InvalidTransition {
                from: self.state.to_string(),
                to: DocumentState::Downloading.to_string(),
            });
        }
        self.state = DocumentState::Downloading;
        self.attempt_count = 1;
        self.updated_at = now;
        Ok(())
    }

    pub fn complete_download(
        &mut self,
        content: DownloadedContent,
        now: DateTime<Utc>,
    ) -> Result<DownloadOutcome> {
        self.transition(DocumentState::Downloaded, now)?;

        let outcome = match self.sha256.as_deref() {
            None => DownloadOutcome::First,
            Some(previous) if previous == content.sha256 => DownloadOutcome::Unchanged,
            Some(_) => DownloadOutcome::Changed,
        };

        if outcome == DownloadOutcome::Changed {
            self.extracted_text = None;
            self.extracted_at = None;
            self.ai_analysis = None;
            self.ai_analysis_generated_at = None;
        }

        self.sha256 = Some(content.sha256);
        self.content_type = content.content_type;
        self.file_size = Some(content.file_size);
        self.downloaded_at = Some(now);
        self.last_error = None;
        Ok(outcome)
    }

    /// `text` is `None` when extraction was skipped and the prior text kept.
    pub fn complete_extraction(&mut self, text: Option<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(DocumentState::Extracted, now)?;
        if let Some(text) = text {
            self.extracted_text = Some(text);
            self.extracted_at = Some(now);
        }
        self.last_error = None;
        Ok(())
    }

    /// `analysis` is `None` when the prior analysis was kept.
    pub fn complete_analysis(&mut self, analysis: Option<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(DocumentState::Analyzed, now)?;
        if let Some(analysis) = analysis {
            self.ai_analysis = Some(analysis);
            self.ai_analysis_generated_at = Some(now);
        }
        self.last_error = None;
        Ok(())
    }

    /// Move the in-flight stage to its failed state.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        let stage = match self.state.stage() {
            Some(stage) if self.state.is_in_flight() => stage,
            _ => {
                return Err(AppError::InvalidTransition {
                    from: self.state.to_string(),
                    to: "failed".to_string(),
                })
            }
        };
        self.transition(stage.failed(), now)?;
        self.last_error = Some(error.into());
        Ok(())
    }
}
