//! Rule-based entity and relation extraction.
//!
//! No model weights: candidates are runs of capitalized tokens, classified by
//! suffixes, casing, gazetteer hits, and the preposition in front of them.
//! Relations come from verb phrases between two entities of one sentence.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use intelgraph_shared::{EntityLabel, Result};

use crate::embed::HashingEmbedder;
use crate::text::sentence_spans;
use crate::{CandidateEntity, CandidateRelation, Extraction, Extractor};

static CAPITALIZED_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][\w&'\-]*(?:\s+(?:of\s+|de\s+|for\s+)?[A-Z][\w&'\-]*)*")
        .expect("static regex is valid")
});

/// Capitalized words that only start sentences.
const STOPWORDS: &[&str] = &[
    "A", "An", "And", "As", "At", "But", "By", "For", "From", "He", "Her", "His", "How", "However",
    "I", "If", "In", "It", "Its", "Mr", "Mrs", "Ms", "Dr", "Of", "On", "Our", "She", "So", "That",
    "The", "Their", "There", "These", "They", "This", "Those", "To", "We", "What", "When", "Where",
    "Which", "While", "Who", "Why", "With", "You", "January", "February", "March", "April", "May",
    "June", "July", "August", "September", "October", "November", "December", "Monday", "Tuesday",
    "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
];

const ORG_SUFFIXES: &[&str] = &[
    "Inc", "Corp", "Corporation", "Company", "Co", "Ltd", "LLC", "Group", "University", "Agency",
    "Institute", "Foundation", "Bank", "Labs", "Technologies", "Systems", "Motors", "Airlines",
    "Association", "Council", "Ministry", "Department", "Administration", "Party", "Times", "News",
];

const LOCATION_SUFFIXES: &[&str] = &[
    "City", "County", "River", "Mountains", "Mountain", "Island", "Islands", "Street", "Valley",
    "Bay", "Lake", "Ocean", "Sea", "Province", "State", "Republic", "Kingdom",
];

const KNOWN_LOCATIONS: &[&str] = &[
    "Africa", "America", "Asia", "Australia", "Beijing", "Berlin", "Brazil", "California",
    "Canada", "China", "Europe", "Florida", "France", "Germany", "India", "Japan", "London",
    "Mars", "Moscow", "New York", "Paris", "Russia", "Texas", "Tokyo", "Ukraine",
    "United Kingdom", "United States", "Washington",
];

const PERSON_TITLES: &[&str] = &["Mr", "Mrs", "Ms", "Dr", "Prof", "President", "CEO", "Senator"];

const LOCATION_PREPOSITIONS: &[&str] = &["in", "at", "near", "from", "to"];

/// Relation phrases: (pattern, edge type, passive). A passive phrase points
/// the edge from the second entity to the first.
const RELATION_PHRASES: &[(&str, &str, bool)] = &[
    ("founded by", "FOUNDED", true),
    ("acquired by", "ACQUIRED", true),
    ("owned by", "OWNS", true),
    ("led by", "LEADS", true),
    ("works for", "WORKS_FOR", false),
    ("works at", "WORKS_FOR", false),
    ("employed by", "WORKS_FOR", false),
    ("joined", "WORKS_FOR", false),
    ("co-founded", "FOUNDED", false),
    ("founded", "FOUNDED", false),
    ("acquired", "ACQUIRED", false),
    ("bought", "ACQUIRED", false),
    ("headquartered in", "LOCATED_IN", false),
    ("based in", "LOCATED_IN", false),
    ("located in", "LOCATED_IN", false),
    ("ceo of", "LEADS", false),
    ("chief executive of", "LEADS", false),
    ("leads", "LEADS", false),
    ("partnered with", "PARTNERS_WITH", false),
    ("owns", "OWNS", false),
];

/// Longest gap (in chars) between two entities for a relation to count.
const MAX_RELATION_GAP: usize = 48;

/// Extractor backed by capitalization heuristics and a hashing embedder.
#[derive(Debug, Clone)]
pub struct HeuristicExtractor {
    embedder: HashingEmbedder,
}

impl HeuristicExtractor {
    pub fn new(dimensions: usize) -> Self {
        Self {
            embedder: HashingEmbedder::new(dimensions),
        }
    }
}

impl Default for HeuristicExtractor {
    fn default() -> Self {
        Self::new(crate::DEFAULT_DIMENSIONS)
    }
}

impl Extractor for HeuristicExtractor {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    fn extract(&self, text: &str) -> Result<Extraction> {
        let mut entities = Vec::new();
        let mut relations = Vec::new();
        let mut seen = HashSet::new();

        for (offset, sentence) in sentence_spans(text) {
            let found = entities_in_sentence(sentence, offset);
            relations.extend(relations_in_sentence(text, &found));
            for entity in found {
                if seen.insert((entity.text.to_lowercase(), entity.label)) {
                    entities.push(entity);
                }
            }
        }

        Ok(Extraction {
            embedding: Some(self.embedder.embed(text)),
            entities,
            relations,
        })
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embedder.embed(text))
    }
}

fn entities_in_sentence(sentence: &str, offset: usize) -> Vec<CandidateEntity> {
    let mut out = Vec::new();

    for m in CAPITALIZED_RUN.find_iter(sentence) {
        let mut start = m.start();
        let mut span = m.as_str();

        // Drop leading stopwords ("The Boeing Company" -> "Boeing Company").
        let mut title_hint = false;
        while let Some((first, rest)) = span.split_once(char::is_whitespace) {
            let first = first.trim_end_matches('.');
            if STOPWORDS.contains(&first) || PERSON_TITLES.contains(&first) {
                title_hint |= PERSON_TITLES.contains(&first);
                let trimmed = rest.trim_start();
                start += span.len() - trimmed.len();
                span = trimmed;
            } else {
                break;
            }
        }
        let span = span.trim_end_matches(|c: char| c == '\'' || c == '-');
        if span.is_empty() || STOPWORDS.contains(&span) || span.chars().count() < 2 {
            continue;
        }

        let before = sentence[..start].trim_end();
        let preceding = before.rsplit(char::is_whitespace).next().unwrap_or("");
        let title_hint = title_hint || PERSON_TITLES.contains(&preceding.trim_end_matches('.'));

        let (label, confidence) = classify(span, preceding, title_hint);
        out.push(CandidateEntity {
            text: span.to_string(),
            label,
            confidence,
            start: offset + start,
            end: offset + start + span.len(),
        });
    }

    out
}

fn classify(span: &str, preceding: &str, title_hint: bool) -> (EntityLabel, f32) {
    let tokens: Vec<&str> = span.split_whitespace().collect();
    let last = tokens.last().copied().unwrap_or(span).trim_end_matches('.');

    if ORG_SUFFIXES.contains(&last) {
        return (EntityLabel::Organization, 0.85);
    }
    if KNOWN_LOCATIONS.contains(&span) || LOCATION_SUFFIXES.contains(&last) {
        return (EntityLabel::Location, 0.8);
    }
    if title_hint && tokens.len() <= 3 {
        return (EntityLabel::Person, 0.8);
    }
    if tokens.len() == 1 && is_acronym(span) {
        return (EntityLabel::Organization, 0.7);
    }
    if tokens.len() == 1 && has_inner_capital(span) {
        return (EntityLabel::Organization, 0.65);
    }
    if LOCATION_PREPOSITIONS.contains(&preceding.to_lowercase().as_str()) && tokens.len() <= 2 {
        return (EntityLabel::Location, 0.6);
    }
    if (2..=3).contains(&tokens.len()) && tokens.iter().all(|t| is_name_token(t)) {
        return (EntityLabel::Person, 0.7);
    }
    (EntityLabel::Generic, 0.5)
}

fn is_acronym(token: &str) -> bool {
    (2..=6).contains(&token.len()) && token.chars().all(|c| c.is_ascii_uppercase() || c == '&')
}

/// `SpaceX`, `OpenAI`, `YouTube`.
fn has_inner_capital(token: &str) -> bool {
    token.chars().skip(1).any(|c| c.is_uppercase()) && token.chars().any(|c| c.is_lowercase())
}

fn is_name_token(token: &str) -> bool {
    let mut chars = token.chars();
    chars.next().is_some_and(char::is_uppercase)
        && chars.all(|c| c.is_lowercase() || c == '\'' || c == '-')
}

fn relations_in_sentence(text: &str, entities: &[CandidateEntity]) -> Vec<CandidateRelation> {
    entities
        .windows(2)
        .filter_map(|pair| {
            let (a, b) = (&pair[0], &pair[1]);
            let gap = text.get(a.end..b.start)?;
            if gap.len() > MAX_RELATION_GAP || gap.contains(" and ") || gap.contains(';') {
                return None;
            }
            let gap = gap.to_lowercase();
            let &(_, kind, passive) = RELATION_PHRASES
                .iter()
                .find(|(phrase, _, _)| contains_phrase(&gap, phrase))?;
            let (subject, object) = if passive { (b, a) } else { (a, b) };
            Some(CandidateRelation {
                subject: subject.text.clone(),
                subject_label: subject.label,
                object: object.text.clone(),
                object_label: object.label,
                kind: kind.to_string(),
                confidence: subject.confidence.min(object.confidence),
            })
        })
        .collect()
}

fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    haystack
        .match_indices(phrase)
        .any(|(idx, _)| {
            let before_ok = haystack[..idx].chars().last().is_none_or(|c| !c.is_alphanumeric());
            let after = &haystack[idx + phrase.len()..];
            let after_ok = after.chars().next().is_none_or(|c| !c.is_alphanumeric());
            before_ok && after_ok
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(text: &str) -> Vec<(String, EntityLabel)> {
        HeuristicExtractor::default()
            .extract(text)
            .unwrap()
            .entities
            .into_iter()
            .map(|e| (e.text, e.label))
            .collect()
    }

    #[test]
    fn classifies_common_shapes() {
        let found = labels(
            "SpaceX was founded by Elon Musk in 2002. It is based in Hawthorne, California. \
             NASA awarded The Boeing Company a contract.",
        );
        assert!(found.contains(&("SpaceX".into(), EntityLabel::Organization)));
        assert!(found.contains(&("Elon Musk".into(), EntityLabel::Person)));
        assert!(found.contains(&("Hawthorne".into(), EntityLabel::Location)));
        assert!(found.contains(&("California".into(), EntityLabel::Location)));
        assert!(found.contains(&("NASA".into(), EntityLabel::Organization)));
        assert!(found.contains(&("Boeing Company".into(), EntityLabel::Organization)));
        assert!(!found.iter().any(|(t, _)| t == "It" || t == "The"));
    }

    #[test]
    fn offsets_point_into_source() {
        let text = "Reports say Gwynne Shotwell works for SpaceX.   Über fans cheer.  NASA agreed.";
        let extraction = HeuristicExtractor::default().extract(text).unwrap();
        assert!(extraction.entities.iter().any(|e| e.text == "NASA"));
        for e in &extraction.entities {
            assert_eq!(&text[e.start..e.end], e.text);
        }
    }

    #[test]
    fn duplicate_mentions_collapse() {
        let found = labels("SpaceX launched. SpaceX landed. SpaceX celebrated.");
        assert_eq!(found, vec![("SpaceX".to_string(), EntityLabel::Organization)]);
    }

    #[test]
    fn active_and_passive_relations() {
        let extraction = HeuristicExtractor::default()
            .extract("Gwynne Shotwell works for SpaceX. SpaceX was founded by Elon Musk.")
            .unwrap();
        let rels: Vec<(&str, &str, &str)> = extraction
            .relations
            .iter()
            .map(|r| (r.subject.as_str(), r.kind.as_str(), r.object.as_str()))
            .collect();
        assert!(rels.contains(&("Gwynne Shotwell", "WORKS_FOR", "SpaceX")));
        assert!(rels.contains(&("Elon Musk", "FOUNDED", "SpaceX")));
    }

    #[test]
    fn conjunction_blocks_relation() {
        let extraction = HeuristicExtractor::default()
            .extract("Elon Musk visited Texas and is based in Austin.")
            .unwrap();
        assert!(extraction.relations.is_empty());
    }

    #[test]
    fn embedding_has_configured_dimensions() {
        let extraction = HeuristicExtractor::new(64).extract("SpaceX").unwrap();
        assert_eq!(extraction.embedding.unwrap().len(), 64);
    }
}
