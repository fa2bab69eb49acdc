//! Plain-text session transcripts.
//!
//! Ending a session always produces something for the user. Three tiers are
//! tried in order, each rendered by its own pure function:
//!
//! 1. [`TranscriptTier::Full`]: the whole conversation with insights
//! 2. [`TranscriptTier::Minimal`]: a short closing note when the full render fails
//! 3. [`TranscriptTier::Acknowledgement`]: a one-line JSON acknowledgement
//!
//! [`TranscriptOutcome::select`] is the combinator that walks those tiers.

use std::fmt::{self, Write as _};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::session::{Message, Session, Speaker};

/// Text of the last-resort acknowledgement.
pub const ACKNOWLEDGEMENT: &str = "Session ended successfully. Thank you for using Therabot!";

const RULE_WIDTH: usize = 80;
const SEPARATOR_WIDTH: usize = 40;
const SIGNATURE: &str = "🤖 Therabot - Your AI Therapy Assistant";

/// A downloadable text file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptDocument {
    /// Suggested download name.
    pub filename: String,
    pub body: String,
}

/// Degradation level, ordered `Full > Minimal > Acknowledgement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TranscriptTier {
    Acknowledgement,
    Minimal,
    Full,
}

/// JSON body returned when no document could be produced.
#[derive(Debug, Clone, Serialize)]
pub struct Acknowledgement {
    pub message: &'static str,
}

/// What ending a session produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptOutcome {
    Full(TranscriptDocument),
    Minimal(TranscriptDocument),
    Acknowledgement,
}

impl TranscriptOutcome {
    /// Walk the tiers: keep `full` if it succeeded, else try `minimal`, else
    /// acknowledge.
    pub fn select<E, M, F>(full: Result<TranscriptDocument, E>, minimal: F) -> Self
    where
        E: fmt::Display,
        M: fmt::Display,
        F: FnOnce() -> Result<TranscriptDocument, M>,
    {
        let err = match full {
            Ok(doc) => return Self::Full(doc),
            Err(e) => e,
        };
        tracing::warn!(
            name: "transcript.degraded",
            tier = "minimal",
            error = %err,
            "Full transcript unavailable"
        );

        match minimal() {
            Ok(doc) => Self::Minimal(doc),
            Err(e) => {
                tracing::error!(
                    name: "transcript.degraded",
                    tier = "acknowledgement",
                    error = %e,
                    "Minimal transcript unavailable"
                );
                Self::Acknowledgement
            }
        }
    }

    #[must_use]
    pub fn tier(&self) -> TranscriptTier {
        match self {
            Self::Full(_) => TranscriptTier::Full,
            Self::Minimal(_) => TranscriptTier::Minimal,
            Self::Acknowledgement => TranscriptTier::Acknowledgement,
        }
    }

    #[must_use]
    pub fn document(&self) -> Option<&TranscriptDocument> {
        match self {
            Self::Full(doc) | Self::Minimal(doc) => Some(doc),
            Self::Acknowledgement => None,
        }
    }
}

/// Overall mood label from the mean score of the scored user messages.
#[must_use]
pub fn mood_summary(messages: &[Message]) -> &'static str {
    let scores: Vec<f32> = messages
        .iter()
        .filter(|m| m.speaker == Speaker::User)
        .filter_map(|m| m.sentiment)
        .collect();
    if scores.is_empty() {
        return "Engaged & Open";
    }

    #[allow(clippy::cast_precision_loss)]
    let mean = scores.iter().sum::<f32>() / scores.len() as f32;
    if mean > 0.1 {
        "Generally Positive"
    } else if mean < -0.1 {
        "Reflective & Processing"
    } else {
        "Balanced & Thoughtful"
    }
}

/// Whole minutes between start and end; zero while the session is open.
fn duration_minutes(session: &Session) -> i64 {
    session.ended_at.map_or(0, |ended| {
        let secs = (ended - session.created_at).num_seconds().max(0);
        (secs + 30) / 60
    })
}

fn header(out: &mut String) -> fmt::Result {
    let inner = RULE_WIDTH - 2;
    writeln!(out)?;
    writeln!(out, "╔{}╗", "═".repeat(inner))?;
    writeln!(out, "║{:^inner$}║", "THERABOT SESSION SUMMARY")?;
    writeln!(out, "╚{}╝", "═".repeat(inner))?;
    writeln!(out)
}

fn section(out: &mut String, title: &str) -> fmt::Result {
    let rule = "=".repeat(RULE_WIDTH);
    writeln!(out, "{rule}")?;
    writeln!(out, "{title:^width$}", width = RULE_WIDTH)?;
    writeln!(out, "{rule}")
}

/// Render the complete transcript of an ended (or ongoing) session.
pub fn render_full(
    session: &Session,
    messages: &[Message],
    now: DateTime<Utc>,
) -> Result<TranscriptDocument, fmt::Error> {
    let mut out = String::new();
    let user_exchanges = messages
        .iter()
        .filter(|m| m.speaker == Speaker::User)
        .count();
    let end_time = session.ended_at.map_or_else(
        || "Ongoing".to_string(),
        |t| t.format("%I:%M %p").to_string(),
    );

    header(&mut out)?;
    writeln!(
        out,
        "📅 Session Date: {}",
        session.created_at.format("%A, %B %d, %Y")
    )?;
    writeln!(
        out,
        "⏰ Session Time: {} - {end_time}",
        session.created_at.format("%I:%M %p")
    )?;
    writeln!(out, "⏱️  Duration: {} minutes", duration_minutes(session))?;
    writeln!(out, "💬 Messages Exchanged: {}", messages.len())?;
    writeln!(out, "🎭 Overall Mood: {}", mood_summary(messages))?;
    writeln!(out)?;

    section(&mut out, "CONVERSATION")?;
    if messages.is_empty() {
        writeln!(out, "\nNo messages were recorded in this session.")?;
    }
    for (i, msg) in messages.iter().enumerate() {
        let who = match msg.speaker {
            Speaker::User => "👤 YOU",
            Speaker::Assistant => "🤖 THERABOT",
        };
        writeln!(out, "\n[{}] {who}:", msg.timestamp.format("%H:%M"))?;
        writeln!(out, "{}", msg.content)?;
        if i + 1 < messages.len() {
            writeln!(out, "{}", "-".repeat(SEPARATOR_WIDTH))?;
        }
    }
    writeln!(out, "\n")?;

    section(&mut out, "SESSION INSIGHTS")?;
    writeln!(out)?;
    writeln!(out, "🌱 REFLECTION:")?;
    writeln!(
        out,
        "Putting your thoughts and feelings into words is a real step for your wellbeing."
    )?;
    writeln!(out)?;
    writeln!(out, "✨ KEY MOMENTS:")?;
    writeln!(out, "• You shared {user_exchanges} thoughtful exchanges")?;
    writeln!(out, "• Being open about how you feel takes courage")?;
    writeln!(out)?;
    writeln!(out, "💙 GENTLE REMINDER:")?;
    writeln!(out, "• Your mental health matters")?;
    writeln!(out, "• It's okay to have difficult days")?;
    writeln!(out, "• Professional support is always available when needed")?;
    writeln!(out)?;
    writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;
    writeln!(out)?;
    writeln!(
        out,
        "Thank you for trusting Therabot with your thoughts today. Take care of yourself!"
    )?;
    writeln!(out)?;
    writeln!(
        out,
        "Generated on {}",
        now.format("%B %d, %Y at %I:%M %p")
    )?;
    writeln!(out, "Session ID: {}", session.id)?;
    writeln!(out)?;
    writeln!(out, "{SIGNATURE}")?;

    Ok(TranscriptDocument {
        filename: format!(
            "therabot_session_{}.txt",
            session.created_at.format("%Y%m%d_%H%M")
        ),
        body: out,
    })
}

/// Short closing note used when the full transcript cannot be produced.
pub fn render_minimal(now: DateTime<Utc>) -> Result<TranscriptDocument, fmt::Error> {
    let mut out = String::new();
    header(&mut out)?;
    writeln!(
        out,
        "⚠️  We couldn't put together your full session summary, but your time here still counts."
    )?;
    writeln!(out)?;
    writeln!(out, "📅 Session Date: {}", now.format("%A, %B %d, %Y"))?;
    writeln!(out, "⏰ End Time: {}", now.format("%I:%M %p"))?;
    writeln!(out)?;
    writeln!(out, "💙 REMEMBER:")?;
    writeln!(out, "• Every conversation about mental health is meaningful")?;
    writeln!(out, "• Professional support is always available when needed")?;
    writeln!(out, "• You're not alone on this journey")?;
    writeln!(out)?;
    writeln!(out, "{SIGNATURE}")?;

    Ok(TranscriptDocument {
        filename: format!("therabot_session_{}.txt", now.format("%Y%m%d_%H%M")),
        body: out,
    })
}

/// Generic closing document for a visit without a known session.
pub fn render_visit(now: DateTime<Utc>) -> Result<TranscriptDocument, fmt::Error> {
    let mut out = String::new();
    header(&mut out)?;
    writeln!(out, "📅 Session Date: {}", now.format("%A, %B %d, %Y"))?;
    writeln!(out, "⏰ Session Time: {}", now.format("%I:%M %p"))?;
    writeln!(out)?;
    writeln!(out, "Thank you for visiting Therabot!")?;
    writeln!(out)?;
    writeln!(
        out,
        "Even without a full conversation, reaching out for support shows strength."
    )?;
    writeln!(out)?;
    writeln!(out, "💙 REMEMBER:")?;
    writeln!(out, "• Your mental health matters")?;
    writeln!(out, "• Every small step counts")?;
    writeln!(out, "• You're not alone on this journey")?;
    writeln!(out)?;
    writeln!(out, "{SIGNATURE}")?;

    Ok(TranscriptDocument {
        filename: format!("therabot_visit_{}.txt", now.format("%Y%m%d_%H%M")),
        body: out,
    })
}
