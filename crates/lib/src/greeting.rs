//! Greeting short-circuit: canned replies for salutations, no backend involved.
//!
//! Categories are checked in a fixed order and the religious salutation always wins.
//! Time-of-day categories answer with the phrase for the category the user typed; only
//! the decorative emoji follows the wall clock. The generic hello answers entirely from
//! the current hour.

use std::sync::LazyLock;

use chrono::Timelike;
use regex::Regex;

/// Which greeting pattern matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GreetingCategory {
    Salam,
    Morning,
    Afternoon,
    Evening,
    Night,
    Hello,
}

impl GreetingCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            GreetingCategory::Salam => "salam",
            GreetingCategory::Morning => "morning",
            GreetingCategory::Afternoon => "afternoon",
            GreetingCategory::Evening => "evening",
            GreetingCategory::Night => "night",
            GreetingCategory::Hello => "hello",
        }
    }
}

/// Hour band used for the emoji and the generic hello phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayBand {
    /// [5, 11)
    Morning,
    /// [11, 15)
    Midday,
    /// [15, 18)
    Afternoon,
    /// everything else
    Night,
}

impl DayBand {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=10 => DayBand::Morning,
            11..=14 => DayBand::Midday,
            15..=17 => DayBand::Afternoon,
            _ => DayBand::Night,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            DayBand::Morning => "🌅",
            DayBand::Midday => "☀️",
            DayBand::Afternoon => "🌤️",
            DayBand::Night => "🌙",
        }
    }

    fn salutation(&self) -> &'static str {
        match self {
            DayBand::Morning => "Selamat pagi",
            DayBand::Midday => "Selamat siang",
            DayBand::Afternoon => "Selamat sore",
            DayBand::Night => "Selamat malam",
        }
    }
}

/// A matched greeting and the reply to send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreetingReply {
    pub category: GreetingCategory,
    pub reply: String,
}

const SALAM_REPLY: &str = "Wa'alaikumsalam Warahmatullahi Wabarakatuh 🙏";

static PATTERNS: LazyLock<Vec<(GreetingCategory, Regex)>> = LazyLock::new(|| {
    [
        (GreetingCategory::Salam, r"^(assalamu'?alaikum|asw|ass)\b"),
        (GreetingCategory::Morning, r"^(selamat\s+pagi|pagi)\b"),
        (GreetingCategory::Afternoon, r"^(selamat\s+siang|siang)\b"),
        (GreetingCategory::Evening, r"^(selamat\s+sore|sore)\b"),
        (GreetingCategory::Night, r"^(selamat\s+malam|malam)\b"),
        (GreetingCategory::Hello, r"^(halo|hello|hai|hi|hey)\b"),
    ]
    .into_iter()
    .filter_map(|(category, pattern)| match Regex::new(pattern) {
        Ok(re) => Some((category, re)),
        Err(e) => {
            log::error!("greeting: invalid pattern for {}: {}", category.as_str(), e);
            None
        }
    })
    .collect()
});

/// Match `text` against the greeting patterns using the current local hour.
pub fn match_greeting(text: &str) -> Option<GreetingReply> {
    match_greeting_at(text, chrono::Local::now().hour())
}

/// Match `text` against the greeting patterns as if the local time were `hour` (0-23).
pub fn match_greeting_at(text: &str, hour: u32) -> Option<GreetingReply> {
    let normalized = text.trim().to_lowercase();
    let category = PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(&normalized))
        .map(|(category, _)| *category)?;
    let band = DayBand::from_hour(hour);
    let reply = match category {
        GreetingCategory::Salam => SALAM_REPLY.to_string(),
        GreetingCategory::Morning => {
            format!("Selamat pagi juga! {} Semoga hari Anda menyenangkan!", band.emoji())
        }
        GreetingCategory::Afternoon => {
            format!("Selamat siang juga! {} Ada yang bisa saya bantu?", band.emoji())
        }
        GreetingCategory::Evening => {
            format!("Selamat sore juga! {} Semoga hari Anda menyenangkan!", band.emoji())
        }
        GreetingCategory::Night => {
            format!("Selamat malam juga! {} Semoga hari Anda menyenangkan!", band.emoji())
        }
        GreetingCategory::Hello => format!(
            "Halo! {}! {} Ada yang bisa saya bantu?",
            band.salutation(),
            band.emoji()
        ),
    };
    Some(GreetingReply { category, reply })
}
