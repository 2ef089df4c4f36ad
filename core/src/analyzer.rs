//! Task analysis: classify a prompt and derive discussion parameters.
//!
//! Pure and deterministic: the output depends only on the input text.
//! Pattern tables are compiled once at first use and shared.

use std::collections::HashSet;
use std::sync::LazyLock;

use quorum_protocol::Task;
use quorum_protocol::TaskType;
use regex::Regex;
use regex::RegexBuilder;

/// Prompts at or under this many characters are simple chat.
const SIMPLE_MAX_CHARS: usize = 15;

/// Cues that mark a short message as small talk (greetings, thanks,
/// acknowledgements), across the languages the engine sees in practice.
const SIMPLE_CUES: &[&str] = &[
    // Greetings
    "안녕", "하이", "hi", "hello", "헬로", "방가", "반가", "안녕하세요", "good morning",
    "good night", "잘자", // Thanks
    "고마워", "감사", "thx", "thanks", "thank you", "thank", // Yes / no
    "응", "네", "예", "아니", "노", "ok", "okay", "yes", "no", "sure", "ㅇㅇ", "ㄴㄴ", "그래",
    "알겠어", // Emoticons and interjections
    "ㅎㅎ", "ㅋㅋ", "ㅠㅠ", "ㅜㅜ", "ㅎ", "ㅋ", "ㅠ", "ㅜ", "오", "와", "헐", "대박",
    // Farewells
    "bye", "잘가", "바이", "굿나잇", "굿모닝", // Short conversational bits
    "뭐해", "뭐야", "왜", "어때", "좋아", "싫어",
];

/// Cues that keep a short prompt out of the simple-chat bucket.
const TECHNICAL_CUES: &[&str] = &[
    "코드",
    "code",
    "함수",
    "function",
    "구현",
    "implement",
    "버그",
    "bug",
    "에러",
    "error",
    "디버그",
    "debug",
    "설계",
    "design",
    "아키텍처",
    "architecture",
    "분석",
    "analyze",
    "비교",
    "compare",
    "만들어",
    "작성",
    "생성",
    "create",
    "make",
    "build",
];

#[allow(clippy::unwrap_used)]
fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| RegexBuilder::new(p).case_insensitive(true).build().unwrap())
        .collect()
}

static CODE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(코드|code|implement|구현|function|함수|class|클래스)\b",
        r"\b(프로그램|program|script|스크립트|algorithm|알고리즘)\b",
        r"\b(python|javascript|typescript|java|rust|go)\b",
    ])
});

static DESIGN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(설계|design|architecture|아키텍처|structure|구조)\b",
        r"\b(api|인터페이스|interface|schema|스키마)\b",
        r"\b(시스템|system|database|데이터베이스)\b",
    ])
});

static ANALYSIS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(분석|analyze|analysis|평가|evaluate|review|리뷰)\b",
        r"\b(비교|compare|comparison|장단점|pros|cons)\b",
        r"\b(최적화|optimize|performance|성능)\b",
    ])
});

static CREATIVE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(아이디어|idea|창의|creative|brainstorm|브레인스토밍)\b",
        r"\b(새로운|new|혁신|innovative|unique|독특)\b",
    ])
});

static RESEARCH_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(조사|research|찾아|find|search|검색)\b",
        r"\b(트렌드|trend|최신|latest|현재|current)\b",
    ])
});

static DEBUG_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(버그|bug|에러|error|오류|fix|수정|debug|디버그)\b",
        r"\b(안되|doesn't work|not working|문제|problem|issue)\b",
    ])
});

static EXPLAIN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(설명|explain|explanation|뭐야|what is|어떻게|how)\b",
        r"\b(이해|understand|meaning|의미)\b",
    ])
});

static COMPLEXITY_BOOSTERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(복잡|complex|advanced|고급|sophisticated)\b",
        r"\b(전체|entire|complete|전부|all|모든)\b",
        r"\b(통합|integrate|integration|연동)\b",
        r"\b(대규모|large-scale|enterprise|엔터프라이즈)\b",
    ])
});

static COMPLEXITY_REDUCERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(간단|simple|basic|기본|쉬운|easy)\b",
        r"\b(하나|one|single|단일)\b",
        r"\b(예시|example|샘플|sample)\b",
    ])
});

static WORD: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let pattern = Regex::new(r"\b\w+\b").unwrap();
    pattern
});

static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "have", "has", "had", "do",
        "does", "did", "will", "would", "could", "should", "may", "might", "must", "can", "to",
        "of", "in", "for", "on", "with", "at", "by", "from", "as", "or", "and", "but", "if",
        "then", "else", "when", "where", "what", "which", "who", "how", "why", "all", "each",
        "every", "both", "few", "more", "most", "other", "some", "such", "no", "not", "only",
        "same", "so", "than", "too", "very", "just", "also", "now", "here", "there", "this",
        "that", "these", "those", "해", "줘", "해줘", "주세요", "하세요", "좀", "것", "거", "이",
        "그",
    ]
    .into_iter()
    .collect()
});

/// Task kinds in tie-break priority order.
const PRIORITY: &[TaskType] = &[
    TaskType::Debug,
    TaskType::Code,
    TaskType::Design,
    TaskType::Research,
    TaskType::Analysis,
    TaskType::Creative,
    TaskType::Explain,
];

/// Analyze a user prompt.
pub fn analyze(prompt: &str) -> Task {
    let lower = prompt.trim().to_lowercase();

    if is_simple_chat(&lower) {
        return Task {
            prompt: prompt.to_string(),
            task_type: TaskType::SimpleChat,
            complexity: 0.1,
            keywords: Vec::new(),
            requires_code: false,
            requires_creativity: false,
            requires_analysis: false,
            suggested_rounds: 1,
            suggested_ai_count: 1,
        };
    }

    let task_type = detect_task_type(&lower);
    let keywords = extract_keywords(&lower);
    let complexity = calculate_complexity(&lower, &keywords);

    Task {
        prompt: prompt.to_string(),
        task_type,
        complexity,
        requires_code: matches_any(&lower, &CODE_PATTERNS),
        requires_creativity: matches_any(&lower, &CREATIVE_PATTERNS),
        requires_analysis: matches_any(&lower, &ANALYSIS_PATTERNS),
        suggested_rounds: suggest_rounds(complexity, task_type),
        suggested_ai_count: suggest_ai_count(complexity),
        keywords,
    }
}

fn is_simple_chat(lower: &str) -> bool {
    if lower.is_empty() {
        return true;
    }
    let chars = lower.chars().count();
    if chars <= SIMPLE_MAX_CHARS {
        return true;
    }
    if lower.split_whitespace().count() <= 3 {
        return true;
    }
    if chars < 30
        && SIMPLE_CUES.iter().any(|cue| lower.contains(cue))
        && !TECHNICAL_CUES.iter().any(|cue| lower.contains(cue))
    {
        return true;
    }
    false
}

fn pattern_score(text: &str, patterns: &[Regex]) -> u32 {
    patterns.iter().filter(|p| p.is_match(text)).count() as u32
}

fn matches_any(text: &str, patterns: &[Regex]) -> bool {
    pattern_score(text, patterns) > 0
}

fn patterns_for(kind: TaskType) -> &'static [Regex] {
    match kind {
        TaskType::Code => &CODE_PATTERNS,
        TaskType::Design => &DESIGN_PATTERNS,
        TaskType::Analysis => &ANALYSIS_PATTERNS,
        TaskType::Creative => &CREATIVE_PATTERNS,
        TaskType::Research => &RESEARCH_PATTERNS,
        TaskType::Debug => &DEBUG_PATTERNS,
        TaskType::Explain => &EXPLAIN_PATTERNS,
        TaskType::General | TaskType::SimpleChat => &[],
    }
}

fn detect_task_type(lower: &str) -> TaskType {
    let mut best = TaskType::General;
    let mut best_score = 0;
    // Walking in priority order with a strict comparison makes ties
    // resolve toward the earlier kind.
    for &kind in PRIORITY {
        let score = pattern_score(lower, patterns_for(kind));
        if score > best_score {
            best = kind;
            best_score = score;
        }
    }
    best
}

fn extract_keywords(lower: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    for token in WORD.find_iter(lower) {
        let word = token.as_str();
        if word.chars().count() <= 2 || STOPWORDS.contains(word) {
            continue;
        }
        if seen.insert(word.to_string()) {
            keywords.push(word.to_string());
            if keywords.len() == 10 {
                break;
            }
        }
    }
    keywords
}

fn calculate_complexity(lower: &str, keywords: &[String]) -> f64 {
    let mut score: f64 = 0.5;

    let word_count = lower.split_whitespace().count();
    if word_count > 50 {
        score += 0.15;
    } else if word_count > 20 {
        score += 0.08;
    } else if word_count < 10 {
        score -= 0.1;
    }

    if keywords.len() > 7 {
        score += 0.1;
    } else if keywords.len() > 4 {
        score += 0.05;
    }

    if matches_any(lower, &COMPLEXITY_BOOSTERS) {
        score += 0.2;
    }
    if matches_any(lower, &COMPLEXITY_REDUCERS) {
        score -= 0.2;
    }

    // A prompt that spans several requirement groups is harder.
    let group_count = [
        matches_any(lower, &CODE_PATTERNS),
        matches_any(lower, &DESIGN_PATTERNS),
        matches_any(lower, &ANALYSIS_PATTERNS),
    ]
    .iter()
    .filter(|&&m| m)
    .count();
    if group_count > 1 {
        score += 0.1 * (group_count - 1) as f64;
    }

    score.clamp(0.0, 1.0)
}

fn suggest_rounds(complexity: f64, task_type: TaskType) -> u32 {
    let mut rounds: i32 = 3;
    if complexity > 0.7 {
        rounds += 2;
    } else if complexity > 0.4 {
        rounds += 1;
    }
    match task_type {
        TaskType::Design | TaskType::Analysis => rounds += 1,
        TaskType::Explain | TaskType::General => rounds -= 1,
        _ => {}
    }
    rounds.clamp(2, 7) as u32
}

fn suggest_ai_count(complexity: f64) -> u32 {
    if complexity < 0.3 {
        2
    } else if complexity < 0.6 {
        3
    } else {
        4
    }
}
