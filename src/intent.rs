//! Voice command interpretation
//!
//! Maps free-form transcripts to a single [`CommandIntent`] using an ordered
//! keyword table. Rules are checked top to bottom and the first match wins,
//! so overlapping keywords resolve deterministically.

use serde::{Deserialize, Serialize};

/// Selectable vision analysis backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendId {
    /// Google Gemini
    #[default]
    Gemini,
    /// `OpenAI` GPT vision models
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic Claude
    Claude,
}

impl BackendId {
    /// Every known backend, in switch-matching order
    pub const ALL: [Self; 3] = [Self::Gemini, Self::OpenAi, Self::Claude];

    /// Stable identifier used in config and preference files
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Claude => "claude",
        }
    }

    /// Name spoken back to the user
    #[must_use]
    pub const fn spoken_name(self) -> &'static str {
        match self {
            Self::Gemini => "ジェミニ",
            Self::OpenAi => "チャットGPT",
            Self::Claude => "クロード",
        }
    }

    /// Keywords that select this backend in a voice command (normalized form)
    #[must_use]
    pub const fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Gemini => &["ジェミニ", "ジェミナイ", "gemini"],
            Self::OpenAi => &["チャットgpt", "gpt", "オープンai", "openai"],
            Self::Claude => &["クロード", "claude"],
        }
    }
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" | "gpt" => Ok(Self::OpenAi),
            "claude" | "anthropic" => Ok(Self::Claude),
            other => Err(crate::Error::Config(format!("unknown backend: {other}"))),
        }
    }
}

/// Discrete action derived from a recognized voice command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandIntent {
    /// Explain the available commands
    Help,
    /// Stop automatic narration until re-engaged
    Stop,
    /// Switch the vision backend
    SwitchBackend(BackendId),
    /// Run one detailed description of the scene
    DescribeInDetail,
    /// Clear any pause or failure suppression and restart narration
    Resume,
    /// Nothing matched
    Unknown,
}

/// Which intent a keyword rule produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleTarget {
    Fixed(CommandIntent),
    Backends,
}

/// One row of the matcher table
#[derive(Debug, Clone)]
struct IntentRule {
    target: RuleTarget,
    keywords: Vec<String>,
}

impl IntentRule {
    fn fixed(intent: CommandIntent, keywords: &[&str]) -> Self {
        Self {
            target: RuleTarget::Fixed(intent),
            keywords: keywords.iter().map(|k| normalize(k)).collect(),
        }
    }

    fn matches(&self, text: &str) -> bool {
        self.keywords.iter().any(|k| !k.is_empty() && text.contains(k.as_str()))
    }
}

/// Ordered keyword matcher producing [`CommandIntent`]s
#[derive(Debug, Clone)]
pub struct CommandInterpreter {
    rules: Vec<IntentRule>,
}

impl Default for CommandInterpreter {
    fn default() -> Self {
        Self {
            rules: vec![
                IntentRule::fixed(
                    CommandIntent::Help,
                    &["ヘルプ", "使い方", "つかいかた", "何ができる", "help"],
                ),
                IntentRule::fixed(
                    CommandIntent::Stop,
                    &[
                        "とまれ", "止まれ", "ストップ", "とめて", "止めて", "停止", "やめて",
                        "stop",
                    ],
                ),
                IntentRule {
                    target: RuleTarget::Backends,
                    keywords: Vec::new(),
                },
                IntentRule::fixed(
                    CommandIntent::DescribeInDetail,
                    &["詳しく", "くわしく", "詳細", "しょうさい", "detail"],
                ),
                IntentRule::fixed(
                    CommandIntent::Resume,
                    &["再開", "さいかい", "スタート", "resume"],
                ),
            ],
        }
    }
}

impl CommandInterpreter {
    /// Create an interpreter with the built-in Japanese/English table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add extra keywords to the rule producing `intent`
    ///
    /// The rule keeps its position, so priority order is unchanged.
    #[must_use]
    pub fn with_keywords(mut self, intent: CommandIntent, keywords: &[&str]) -> Self {
        if let Some(rule) = self
            .rules
            .iter_mut()
            .find(|r| r.target == RuleTarget::Fixed(intent))
        {
            rule.keywords.extend(keywords.iter().map(|k| normalize(k)));
        }
        self
    }

    /// Resolve a transcript to exactly one intent
    #[must_use]
    pub fn interpret(&self, transcript: &str) -> CommandIntent {
        let text = normalize(transcript);
        if text.is_empty() {
            return CommandIntent::Unknown;
        }

        for rule in &self.rules {
            match rule.target {
                RuleTarget::Fixed(intent) => {
                    if rule.matches(&text) {
                        return intent;
                    }
                }
                RuleTarget::Backends => {
                    if let Some(id) = BackendId::ALL
                        .into_iter()
                        .find(|id| id.keywords().iter().any(|k| text.contains(k)))
                    {
                        return CommandIntent::SwitchBackend(id);
                    }
                }
            }
        }

        CommandIntent::Unknown
    }
}

/// Normalize a transcript for matching: lowercase, no whitespace or punctuation
#[must_use]
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && !is_punctuation(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

const fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(
            c,
            '、' | '。' | '！' | '？' | '「' | '」' | '・' | '…'
        )
}
