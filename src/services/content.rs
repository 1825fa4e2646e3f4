use rand::Rng;
use rand::seq::SliceRandom;

const NOUNS: &[&str] = &[
    "time", "year", "people", "way", "day", "man", "thing", "woman", "life", "child", "world",
    "school", "state", "family", "student", "group", "country", "problem", "hand", "part",
    "place", "case", "week", "company", "system", "program", "question", "work", "government",
    "number", "night", "point", "home", "water", "room", "mother", "area", "money", "story",
    "fact", "month", "lot", "right", "study", "book", "eye", "job", "word", "business", "issue",
    "side", "kind", "head", "house", "service", "friend", "father", "power", "hour", "game",
    "line", "end", "member", "law", "car", "city", "community", "name", "president", "team",
    "minute", "idea", "kid", "body", "information", "back", "parent", "face", "others", "level",
    "office", "door", "health", "person", "art", "war", "history", "party", "result", "change",
    "morning", "reason", "research", "girl", "guy", "moment", "air", "teacher", "force",
    "education",
];

const VERBS: &[&str] = &[
    "is", "has", "does", "says", "goes", "can", "gets", "would", "makes", "knows", "will",
    "thinks", "takes", "sees", "comes", "could", "wants", "looks", "uses", "finds", "gives",
    "tells", "works", "may", "should", "calls", "tries", "asks", "needs", "feels", "becomes",
    "leaves", "puts", "means", "keeps", "lets", "begins", "seems", "helps", "talks", "turns",
    "starts", "might", "shows", "hears", "plays", "runs", "moves", "likes", "lives", "believes",
    "holds", "brings", "happens", "must", "writes", "provides", "sits", "stands", "loses", "pays",
    "meets", "includes", "continues", "sets", "learns", "changes", "lead", "understands",
    "watches", "follows", "stops", "creates", "speaks", "reads", "allows", "adds", "spends",
    "grows", "opens", "walks", "wins", "offers", "remembers", "loves", "considers", "appears",
    "buys", "waits", "serves", "dies", "sends", "expects", "builds", "stays", "falls", "cuts",
    "reaches", "kills", "remains",
];

const CONJUNCTIONS: &[&str] = &["and", "or", "if", "because"];

const PREPOSITIONS: &[&str] = &[
    "to", "of", "in", "for", "on", "with", "at", "by", "from", "out", "into", "now", "over",
    "after",
];

const ARTICLES: &[&str] = &["the", "a", "every", "some"];

/// Produces filler post bodies from fixed word lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentGenerator;

impl ContentGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn make_content(&self) -> String {
        self.make_content_with(&mut rand::thread_rng())
    }

    /// Two clauses shaped "Article noun verb preposition article noun,
    /// conjunction article noun verb preposition article noun."
    pub fn make_content_with<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let mut pick = |words: &[&'static str]| -> &'static str {
            words.choose(&mut *rng).copied().unwrap_or_default()
        };

        let opening = capitalize(pick(ARTICLES));
        let first = [pick(NOUNS), pick(VERBS), pick(PREPOSITIONS), pick(ARTICLES), pick(NOUNS)];
        let conjunction = pick(CONJUNCTIONS);
        let second = [
            pick(ARTICLES),
            pick(NOUNS),
            pick(VERBS),
            pick(PREPOSITIONS),
            pick(ARTICLES),
            pick(NOUNS),
        ];

        format!(
            "{} {}, {} {}.",
            opening,
            first.join(" "),
            conjunction,
            second.join(" ")
        )
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
