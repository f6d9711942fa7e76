//! Message categorization.
//!
//! The engine only depends on the [`Classifier`] contract; the default
//! implementation is a keyword heuristic. Rules are checked in a fixed
//! precedence order: auto-replies first, then spam, then meeting
//! confirmations, then interest signals, with `NotInterested` as the
//! fallback.

use crate::models::Category;

/// Pure classification seam. No side effects are assumed; the pipeline
/// may call this concurrently from many messages.
pub trait Classifier: Send + Sync {
    fn classify(&self, subject: &str, body: &str, from: &str) -> Category;
}

const OUT_OF_OFFICE_KEYWORDS: &[&str] = &[
    "out of office",
    "ooo",
    "away from office",
    "on vacation",
    "on leave",
    "automatic reply",
    "auto-reply",
    "currently unavailable",
    "will be out",
    "away until",
];

const SPAM_KEYWORDS: &[&str] = &[
    "unsubscribe",
    "click here now",
    "limited time offer",
    "act now",
    "congratulations you won",
    "claim your prize",
    "increase your income",
    "work from home",
    "make money fast",
    "buy now",
    "free money",
    "risk free",
    "no credit card",
];

const SPAM_SENDER_MARKERS: &[&str] = &[
    "noreply",
    "no-reply",
    "donotreply",
    "newsletter",
    "marketing",
];

const MEETING_KEYWORDS: &[&str] = &[
    "meeting scheduled",
    "meeting confirmed",
    "calendar invite",
    "has invited you",
    "meeting request",
    "appointment confirmed",
    "scheduled a meeting",
    "zoom meeting",
    "google meet",
    "teams meeting",
    "meeting link",
    "join the meeting",
    "calendar event",
];

const INTERESTED_KEYWORDS: &[&str] = &[
    "job opportunity",
    "job opening",
    "position available",
    "interview",
    "hiring",
    "recruitment",
    "shortlisted",
    "selected for",
    "next round",
    "technical interview",
    "phone screen",
    "interested in your profile",
    "resume",
    "application",
    "business opportunity",
    "partnership",
    "collaboration",
    "proposal",
    "investment opportunity",
    "would like to discuss",
    "schedule a call",
    "lets connect",
    "coffee chat",
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Default keyword-based classifier.
pub struct KeywordClassifier;

impl Classifier for KeywordClassifier {
    fn classify(&self, subject: &str, body: &str, from: &str) -> Category {
        let text = format!("{} {}", subject, body).to_lowercase();
        let from = from.to_lowercase();

        if contains_any(&text, OUT_OF_OFFICE_KEYWORDS) {
            return Category::OutOfOffice;
        }
        if contains_any(&text, SPAM_KEYWORDS) || contains_any(&from, SPAM_SENDER_MARKERS) {
            return Category::Spam;
        }
        if contains_any(&text, MEETING_KEYWORDS) {
            return Category::MeetingBooked;
        }
        if contains_any(&text, INTERESTED_KEYWORDS) {
            return Category::Interested;
        }
        Category::NotInterested
    }
}
