//! Content identity and admission.
//!
//! A pure decision over one candidate: is it inside the window, is it new,
//! and does it pass the keyword gate. Callers log and count the outcome.

use std::collections::HashSet;
use std::fmt;

use threadwatch_common::{SourcePost, SourceReply, TimeWindow};

/// The fields of a fetched item the filter looks at.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub id: &'a str,
    pub created_at: i64,
    pub title: Option<&'a str>,
    pub body: Option<&'a str>,
    pub flair: Option<&'a str>,
}

impl<'a> From<&'a SourcePost> for Candidate<'a> {
    fn from(post: &'a SourcePost) -> Self {
        Self {
            id: &post.id,
            created_at: post.created_at,
            title: Some(&post.title),
            body: post.body.as_deref(),
            flair: post.flair.as_deref(),
        }
    }
}

impl<'a> From<&'a SourceReply> for Candidate<'a> {
    fn from(reply: &'a SourceReply) -> Self {
        Self {
            id: &reply.id,
            created_at: reply.created_at,
            title: None,
            body: reply.body.as_deref(),
            flair: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    Admitted,
    OutOfWindow,
    Duplicate,
    /// Matched this exclude keyword.
    Excluded(String),
    /// Include keywords are configured and none matched.
    NoIncludeMatch,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Admitted => f.write_str("admitted"),
            Reason::OutOfWindow => f.write_str("outside time window"),
            Reason::Duplicate => f.write_str("already stored"),
            Reason::Excluded(kw) => write!(f, "matched exclude keyword {kw:?}"),
            Reason::NoIncludeMatch => f.write_str("no include keyword matched"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub admit: bool,
    pub reason: Reason,
}

impl Admission {
    fn admitted() -> Self {
        Self {
            admit: true,
            reason: Reason::Admitted,
        }
    }

    fn rejected(reason: Reason) -> Self {
        Self {
            admit: false,
            reason,
        }
    }
}

/// Case-folded include/exclude keyword sets. Empty sets admit everything.
#[derive(Debug, Clone, Default)]
pub struct KeywordGate {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl KeywordGate {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        let fold = |words: &[String]| {
            words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect()
        };
        Self {
            include: fold(include),
            exclude: fold(exclude),
        }
    }

    pub fn is_open(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Exclude wins over include when both match.
    pub fn check(&self, candidate: &Candidate<'_>) -> Result<(), Reason> {
        if self.is_open() {
            return Ok(());
        }
        let haystack = [candidate.title, candidate.body, candidate.flair]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        if let Some(kw) = self.exclude.iter().find(|kw| haystack.contains(kw.as_str())) {
            return Err(Reason::Excluded(kw.clone()));
        }
        if !self.include.is_empty() && !self.include.iter().any(|kw| haystack.contains(kw.as_str())) {
            return Err(Reason::NoIncludeMatch);
        }
        Ok(())
    }
}

/// Decide whether a fetched post enters the store.
pub fn should_admit(
    candidate: &Candidate<'_>,
    window: TimeWindow,
    existing: &HashSet<String>,
    gate: &KeywordGate,
) -> Admission {
    if !window.contains(candidate.created_at) {
        return Admission::rejected(Reason::OutOfWindow);
    }
    if existing.contains(candidate.id) {
        return Admission::rejected(Reason::Duplicate);
    }
    match gate.check(candidate) {
        Ok(()) => Admission::admitted(),
        Err(reason) => Admission::rejected(reason),
    }
}

/// Replies are admitted by identity only.
pub fn should_admit_reply(candidate: &Candidate<'_>, existing: &HashSet<String>) -> Admission {
    if existing.contains(candidate.id) {
        Admission::rejected(Reason::Duplicate)
    } else {
        Admission::admitted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate<'a>(id: &'a str, ts: i64, body: &'a str) -> Candidate<'a> {
        Candidate {
            id,
            created_at: ts,
            title: Some("Question"),
            body: Some(body),
            flair: Some("Support"),
        }
    }

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn admits_new_item_in_window() {
        let decision = should_admit(
            &candidate("t3_a", 150, "hello"),
            TimeWindow::new(100, 200),
            &HashSet::new(),
            &KeywordGate::default(),
        );
        assert!(decision.admit);
        assert_eq!(decision.reason, Reason::Admitted);
    }

    #[test]
    fn rejects_at_window_end() {
        let decision = should_admit(
            &candidate("t3_a", 200, "hello"),
            TimeWindow::new(100, 200),
            &HashSet::new(),
            &KeywordGate::default(),
        );
        assert_eq!(decision.reason, Reason::OutOfWindow);
    }

    #[test]
    fn rejects_duplicate() {
        let existing: HashSet<String> = ["t3_a".to_string()].into();
        let decision = should_admit(
            &candidate("t3_a", 150, "hello"),
            TimeWindow::new(100, 200),
            &existing,
            &KeywordGate::default(),
        );
        assert!(!decision.admit);
        assert_eq!(decision.reason, Reason::Duplicate);
    }

    #[test]
    fn exclude_beats_include() {
        let gate = KeywordGate::new(&words(&["refund"]), &words(&["spam"]));
        let decision = should_admit(
            &candidate("t3_a", 150, "Refund please, not SPAM"),
            TimeWindow::unbounded(),
            &HashSet::new(),
            &gate,
        );
        assert!(!decision.admit);
        assert_eq!(decision.reason, Reason::Excluded("spam".to_string()));
    }

    #[test]
    fn include_required_when_configured() {
        let gate = KeywordGate::new(&words(&["refund"]), &[]);
        let decision = should_admit(
            &candidate("t3_a", 150, "love the new layout"),
            TimeWindow::unbounded(),
            &HashSet::new(),
            &gate,
        );
        assert_eq!(decision.reason, Reason::NoIncludeMatch);
    }

    #[test]
    fn keywords_match_flair_case_insensitively() {
        let gate = KeywordGate::new(&words(&["  SUPPORT "]), &[]);
        assert!(gate.check(&candidate("t3_a", 0, "nothing here")).is_ok());
    }

    #[test]
    fn blank_keywords_are_ignored() {
        let gate = KeywordGate::new(&words(&["", "  "]), &[]);
        assert!(gate.is_open());
    }

    #[test]
    fn replies_only_checked_for_identity() {
        let reply = SourceReply {
            id: "t1_x".to_string(),
            post_id: "t3_a".to_string(),
            created_at: i64::MAX - 1,
            author: None,
            body: Some("spam".to_string()),
            score: 0,
            distinguished: None,
        };
        assert!(should_admit_reply(&Candidate::from(&reply), &HashSet::new()).admit);
        let existing: HashSet<String> = ["t1_x".to_string()].into();
        assert!(!should_admit_reply(&Candidate::from(&reply), &existing).admit);
    }
}
