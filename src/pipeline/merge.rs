//! Merge & Deduplicate (C6): reconcile per-chunk syllabus extracts into one
//! canonical hierarchy (§4.6). Pure, synchronous, no I/O — every invariant
//! here is enforced by unit tests without touching a database or LLM.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{BookReference, PyqPaper, Subject, SyllabusExtract, Topic, Unit};

static TRAILING_PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s.,;:!?]+$").unwrap());
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
/// Matches a trailing ordinal-suffix marker like "II", "- Part 2", "(contd)".
static ORDINAL_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[\s\-(]*(part\s*\d+|contd\.?|continued|[ivx]+)\)?\s*$").unwrap());

/// Case-fold, collapse internal whitespace, strip trailing punctuation — the
/// normalisation primitive every dedup key in this module is built from.
pub fn normalize(s: &str) -> String {
    let collapsed = WHITESPACE_RUN.replace_all(s.trim(), " ");
    TRAILING_PUNCTUATION.replace(&collapsed, "").to_lowercase()
}

/// Strip a trailing ordinal-suffix marker, for cross-chunk split detection
/// ("Data Mining" vs "Data Mining - Part 2").
fn normalize_base_name(s: &str) -> String {
    let n = normalize(s);
    ORDINAL_SUFFIX.replace(&n, "").trim().to_string()
}

/// Merge every chunk's `SyllabusExtract` into one canonical document.
/// Subjects with no surviving units are dropped (§4.6 invariant).
#[must_use]
pub fn merge_syllabus_extracts(extracts: Vec<SyllabusExtract>) -> Vec<Subject> {
    let mut merged: Vec<Subject> = Vec::new();
    let mut key_index: Vec<String> = Vec::new();

    for extract in extracts {
        for subject in extract.subjects {
            let key = normalize_base_name(&subject.name);
            if key.is_empty() {
                continue;
            }

            let existing_pos = key_index.iter().position(|k| *k == key);
            match existing_pos {
                Some(pos) => merge_subject_into(&mut merged[pos], subject),
                None => {
                    key_index.push(key);
                    merged.push(subject);
                }
            }
        }
    }

    merged.retain(|s| !s.units.is_empty());
    merged
}

fn merge_subject_into(target: &mut Subject, incoming: Subject) {
    if target.code.as_deref().unwrap_or("").is_empty() {
        if let Some(code) = incoming.code {
            if !code.is_empty() {
                target.code = Some(code);
            }
        }
    }

    for unit in incoming.units {
        merge_unit_into(target, unit);
    }

    for book in incoming.books {
        merge_book_into(target, book);
    }
}

fn merge_unit_into(subject: &mut Subject, incoming: Unit) {
    match subject.units.iter_mut().find(|u| u.number == incoming.number) {
        Some(existing) => {
            if normalize(&incoming.title).len() > normalize(&existing.title).len() {
                existing.title = incoming.title;
            }
            for topic in incoming.topics {
                merge_topic_into(existing, topic);
            }
        }
        None => subject.units.push(incoming),
    }
}

fn merge_topic_into(unit: &mut Unit, incoming: Topic) {
    let key = normalize(&incoming.title);
    if key.is_empty() {
        return;
    }
    match unit.topics.iter_mut().find(|t| normalize(&t.title) == key) {
        Some(existing) => {
            let mut keywords: BTreeSet<String> = existing.keywords.iter().cloned().collect();
            keywords.extend(incoming.keywords);
            existing.keywords = keywords.into_iter().collect();
        }
        None => unit.topics.push(incoming),
    }
}

fn merge_book_into(subject: &mut Subject, incoming: BookReference) {
    let key = (normalize(&incoming.title), normalize(&incoming.authors));
    match subject
        .books
        .iter_mut()
        .find(|b| (normalize(&b.title), normalize(&b.authors)) == key)
    {
        Some(existing) => {
            if existing.publisher.as_deref().unwrap_or("").is_empty() {
                existing.publisher = incoming.publisher;
            }
            if existing.edition.as_deref().unwrap_or("").is_empty() {
                existing.edition = incoming.edition;
            }
        }
        None => subject.books.push(incoming),
    }
}

/// Cross-unit topic collision (§4.6 rule 5): if the same normalised topic
/// appears under two different units of one subject, keep it only under
/// the lower unit number. Run this once, after all chunks have been folded
/// in by [`merge_syllabus_extracts`], since the collision may span units
/// that were populated by different chunks.
pub fn resolve_cross_unit_topic_collisions(subjects: &mut [Subject]) {
    for subject in subjects.iter_mut() {
        subject.units.sort_by_key(|u| u.number);
        let mut seen: Vec<String> = Vec::new();
        for unit in subject.units.iter_mut() {
            unit.topics.retain(|t| {
                let key = normalize(&t.title);
                if seen.contains(&key) {
                    false
                } else {
                    seen.push(key);
                    true
                }
            });
        }
    }
}

/// Merge per-chunk PYQ extracts into one paper: header fields come from the
/// first chunk that supplies them, questions are concatenated in chunk
/// order (each chunk covers a disjoint page range, so insertion order is
/// already document order) and deduplicated by question number, dropping
/// any question that fails the §3 invariants (positive marks, non-empty
/// text).
#[must_use]
pub fn merge_pyq_papers(papers: Vec<PyqPaper>) -> PyqPaper {
    let mut merged = PyqPaper::default();
    let mut seen_numbers: BTreeSet<String> = BTreeSet::new();

    for paper in papers {
        if merged.year.is_none() {
            merged.year = paper.year;
        }
        if merged.month.is_none() {
            merged.month = paper.month;
        }
        if merged.exam_type.is_none() {
            merged.exam_type = paper.exam_type;
        }
        if merged.total_marks.is_none() {
            merged.total_marks = paper.total_marks;
        }
        if merged.duration.is_none() {
            merged.duration = paper.duration;
        }
        if merged.instructions.is_none() {
            merged.instructions = paper.instructions;
        }

        for question in paper.questions {
            if question.marks == 0 || question.text.trim().is_empty() {
                continue;
            }
            let key = normalize(&question.question_number);
            if key.is_empty() || !seen_numbers.insert(key) {
                continue;
            }
            merged.questions.push(question);
        }
    }

    merged
}
