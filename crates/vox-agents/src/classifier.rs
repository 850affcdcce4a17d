//! Two-tier intent classification.
//!
//! A local keyword pass decides most queries without a network call. The
//! model is consulted only when that pass is unsure or thinks live data is
//! needed, and any model failure falls back to a broader keyword heuristic.

use std::fmt;
use std::sync::LazyLock;

use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vox_core::{Capability, CompletionClient, CompletionOptions, Message, ResponseFormat};

const LOCAL_CONFIDENCE: f32 = 0.9;
const TOOL_MATCH_CONFIDENCE: f32 = 0.8;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const MODEL_CONFIDENCE: f32 = 0.85;
const HEURISTIC_CONFIDENCE: f32 = 0.6;

/// Above this the local verdict stands on its own.
const MODEL_PASS_THRESHOLD: f32 = 0.8;

const CLASSIFICATION_PROMPT: &str = r#"You classify user queries for a voice assistant. Decide which capabilities are needed to answer the query well.

Respond with ONLY a JSON object, no other text, with exactly these fields:
{
  "needsWebSearch": boolean,      // requires looking something up on the web
  "needsCalculation": boolean,    // requires arithmetic or a numeric computation
  "needsDateTime": boolean,       // requires the current date, time or a date difference
  "needsRealTimeInfo": boolean,   // depends on information that changes (news, prices, weather, scores)
  "categories": [string],         // any of: news, finance, weather, science, sports, entertainment, general
  "reasoning": string             // one short sentence
}"#;

static NO_LIVE_DATA: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)^\s*(explain|describe|define|summari[sz]e|compare|translate|write|list)\b",
        r"(?i)\b(how to|how does|how do|what does .+ mean|definition of|meaning of|difference between)\b",
        r"(?i)\b(code|function|algorithm|program|programming|syntax|compile|regex|sql|recursion|data structure)\b",
        r"(?i)\b(concept|theory|principle|tutorial|example of|history of)\b",
        r"\d\s*[-+*/×÷^]\s*\d",
        r"(?i)\b(calculate|compute|solve|square root|percent of)\b",
    ])
    .expect("no-live-data patterns are valid")
});

static LIVE_DATA: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)\b(current|currently|today|tonight|latest|breaking|right now|now)\b",
        r"(?i)\b(weather|forecast|stock|stocks|share price|exchange rate|score|scores|news|headlines)\b",
        r"(?i)\b(this (week|weekend|month|year)|recent|recently|upcoming)\b",
    ])
    .expect("live-data patterns are valid")
});

static CALCULATION: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"\d\s*[-+*/×÷^]\s*\d",
        r"(?i)\b(calculate|compute|solve|sum of|plus|minus|times|multiplied|divided|percent|percentage|square root|sqrt|power of|squared|average|factorial)\b",
    ])
    .expect("calculation patterns are valid")
});

static DATE_TIME: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)\bwhat time\b|\bwhat('s| is) the (date|time)\b|\bwhat day\b",
        r"(?i)\b(tomorrow|yesterday|timezone|time zone|utc offset|day of the week)\b",
        r"(?i)\b(days|weeks|months) (until|till|since|ago)\b|\bhow long (until|ago|since)\b",
    ])
    .expect("date/time patterns are valid")
});

// Broader second pass used when the model cannot be consulted.
static HEURISTIC_WEB: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)\b(who (is|was|are|won)|where (is|are|can)|when (is|does|did|will))\b",
        r"(?i)\b(price|cost|release|released|announce[sd]?|election|president|ceo|population|open now|near me)\b",
        r"(?i)\b(20[2-9]\d)\b",
        r"(?i)\b(search|look up|find out|google)\b",
    ])
    .expect("heuristic web patterns are valid")
});

static HEURISTIC_CALCULATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d.*\b(and|by|of|over)\b.*\d|\bhow much is\b|\bconvert\b")
        .expect("heuristic calculation pattern is valid")
});

static HEURISTIC_DATE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(time|date|day|week|month|year|clock|calendar|deadline|birthday|anniversary)\b")
        .expect("heuristic date/time pattern is valid")
});

static CATEGORY_PATTERNS: LazyLock<Vec<(Category, Regex)>> = LazyLock::new(|| {
    [
        (Category::News, r"(?i)\b(news|headline|headlines|breaking|announce|election|politic\w*)\b"),
        (Category::Finance, r"(?i)\b(stock|stocks|market|price|prices|crypto|bitcoin|invest\w*|economy|inflation|exchange rate)\b"),
        (Category::Weather, r"(?i)\b(weather|forecast|temperature|rain|snow|sunny|storm|humidity)\b"),
        (Category::Science, r"(?i)\b(science|scientific|physics|chemistry|biology|space|nasa|research|study)\b"),
        (Category::Sports, r"(?i)\b(sports?|game|match|score|scores|team|league|nba|nfl|football|soccer|tennis)\b"),
        (Category::Entertainment, r"(?i)\b(movie|movies|film|music|song|album|celebrity|tv|show|series|netflix)\b"),
    ]
    .into_iter()
    .map(|(category, pattern)| {
        (
            category,
            Regex::new(pattern).expect("category pattern is valid"),
        )
    })
    .collect()
});

/// Topic group attached to an analysis as a tool-selection hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    News,
    Finance,
    Weather,
    Science,
    Sports,
    Entertainment,
    General,
}

impl Category {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "news" => Some(Category::News),
            "finance" => Some(Category::Finance),
            "weather" => Some(Category::Weather),
            "science" => Some(Category::Science),
            "sports" => Some(Category::Sports),
            "entertainment" => Some(Category::Entertainment),
            "general" => Some(Category::General),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::News => "news",
            Category::Finance => "finance",
            Category::Weather => "weather",
            Category::Science => "science",
            Category::Sports => "sports",
            Category::Entertainment => "entertainment",
            Category::General => "general",
        };
        f.write_str(name)
    }
}

/// Keyword-derived categories, `general` when nothing matches.
pub fn categorize(query: &str) -> Vec<Category> {
    let categories: Vec<_> = CATEGORY_PATTERNS
        .iter()
        .filter(|(_, pattern)| pattern.is_match(query))
        .map(|(category, _)| *category)
        .collect();
    if categories.is_empty() {
        vec![Category::General]
    } else {
        categories
    }
}

/// Which pass produced an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    Local,
    Model,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAnalysis {
    pub needs_web_search: bool,
    pub needs_calculation: bool,
    pub needs_date_time: bool,
    pub needs_real_time_info: bool,
    pub categories: Vec<Category>,
    pub confidence: f32,
    pub reasoning: String,
    pub source: IntentSource,
}

impl IntentAnalysis {
    /// Whether the analysis asks for tools with this capability.
    pub fn requests(&self, capability: Capability) -> bool {
        match capability {
            Capability::WebSearch => self.needs_web_search || self.needs_real_time_info,
            Capability::Calculation => self.needs_calculation,
            Capability::DateTime => self.needs_date_time,
        }
    }

    /// True when the model pass should be consulted.
    fn is_uncertain(&self) -> bool {
        self.confidence <= MODEL_PASS_THRESHOLD || self.needs_web_search
    }
}

/// Shape of the model's JSON verdict.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ModelVerdict {
    needs_web_search: bool,
    needs_calculation: bool,
    needs_date_time: bool,
    needs_real_time_info: bool,
    categories: Vec<String>,
    reasoning: String,
}

/// Parse a verdict, first as a whole document, then from the outermost
/// `{...}` block inside free text.
fn parse_verdict(reply: &str) -> Option<ModelVerdict> {
    if let Ok(verdict) = serde_json::from_str(reply.trim()) {
        return Some(verdict);
    }
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&reply[start..=end]).ok()
}

/// Local keyword pass. Never touches the network.
pub fn classify_local(query: &str) -> IntentAnalysis {
    let mut analysis = IntentAnalysis {
        needs_web_search: false,
        needs_calculation: false,
        needs_date_time: false,
        needs_real_time_info: false,
        categories: categorize(query),
        confidence: DEFAULT_CONFIDENCE,
        reasoning: "no decisive keywords".to_string(),
        source: IntentSource::Local,
    };

    if NO_LIVE_DATA.is_match(query) {
        analysis.confidence = LOCAL_CONFIDENCE;
        analysis.reasoning = "answerable without live data".to_string();
    } else if LIVE_DATA.is_match(query) {
        analysis.needs_web_search = true;
        analysis.needs_real_time_info = true;
        analysis.confidence = LOCAL_CONFIDENCE;
        analysis.reasoning = "asks for live information".to_string();
    }

    if CALCULATION.is_match(query) {
        analysis.needs_calculation = true;
        analysis.confidence = analysis.confidence.max(TOOL_MATCH_CONFIDENCE);
    }
    if DATE_TIME.is_match(query) {
        analysis.needs_date_time = true;
        analysis.confidence = analysis.confidence.max(TOOL_MATCH_CONFIDENCE);
    }

    analysis
}

/// Broader keyword pass used when the model pass fails.
pub fn classify_heuristic(query: &str) -> IntentAnalysis {
    let live = LIVE_DATA.is_match(query);
    IntentAnalysis {
        needs_web_search: live || HEURISTIC_WEB.is_match(query),
        needs_calculation: CALCULATION.is_match(query) || HEURISTIC_CALCULATION.is_match(query),
        needs_date_time: DATE_TIME.is_match(query) || HEURISTIC_DATE_TIME.is_match(query),
        needs_real_time_info: live,
        categories: categorize(query),
        confidence: HEURISTIC_CONFIDENCE,
        reasoning: "keyword heuristic".to_string(),
        source: IntentSource::Heuristic,
    }
}

/// Decides which capabilities a query needs.
#[derive(Clone)]
pub struct IntentClassifier {
    client: CompletionClient,
}

impl IntentClassifier {
    pub fn new(client: CompletionClient) -> Self {
        Self { client }
    }

    /// Classify a query. Always produces an analysis.
    pub async fn classify(&self, query: &str) -> IntentAnalysis {
        let local = classify_local(query);
        if !local.is_uncertain() {
            debug!(
                confidence = local.confidence,
                "Local classification is decisive, skipping model"
            );
            return local;
        }

        match self.classify_with_model(query, &local).await {
            Some(analysis) => analysis,
            None => classify_heuristic(query),
        }
    }

    async fn classify_with_model(
        &self,
        query: &str,
        local: &IntentAnalysis,
    ) -> Option<IntentAnalysis> {
        let messages = vec![Message::system(CLASSIFICATION_PROMPT), Message::user(query)];
        let options = CompletionOptions::new()
            .with_response_format(ResponseFormat::JsonObject)
            .with_temperature(0.0)
            .with_max_tokens(200);

        let response = match self.client.send_completion(messages, options).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, category = %e.category(), "Classification request failed, using heuristic");
                return None;
            }
        };

        let Some(verdict) = parse_verdict(response.text()) else {
            warn!("Classification reply was not valid JSON, using heuristic");
            return None;
        };

        let mut categories = local.categories.clone();
        for category in verdict.categories.iter().filter_map(|c| Category::from_name(c)) {
            if !categories.contains(&category) {
                categories.push(category);
            }
        }
        if categories.len() > 1 {
            categories.retain(|c| *c != Category::General);
        }

        debug!(reasoning = %verdict.reasoning, "Model classification");
        Some(IntentAnalysis {
            needs_web_search: verdict.needs_web_search,
            needs_calculation: verdict.needs_calculation || local.needs_calculation,
            needs_date_time: verdict.needs_date_time || local.needs_date_time,
            needs_real_time_info: verdict.needs_real_time_info,
            categories,
            confidence: MODEL_CONFIDENCE,
            reasoning: verdict.reasoning,
            source: IntentSource::Model,
        })
    }
}
