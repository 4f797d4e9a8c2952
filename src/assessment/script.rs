//! Scripted bot lines, their pacing, and quick-option sets.

use std::time::Duration;

use super::model::{LikertAnswer, QuickOption};

/// Default pause before a bot message appears.
pub const DEFAULT_PACE: Duration = Duration::from_millis(800);

/// A scripted bot message and the pause that precedes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BotLine {
    pub text: &'static str,
    pub pace: Duration,
}

const fn line(text: &'static str, millis: u64) -> BotLine {
    BotLine {
        text,
        pace: Duration::from_millis(millis),
    }
}

pub const GREETING: [BotLine; 3] = [
    line("Hello, and welcome 🌿", 500),
    line(
        "I'm here to help you find the right support. This is a safe, confidential space where you can share at your own pace.",
        1200,
    ),
    line("Let's start by getting to know you a little. What's your age?", 1000),
];

pub const AGE_RECEIVED: [BotLine; 2] = [
    line("Thank you for sharing that with me. 💜", 800),
    line("How do you identify?", 800),
];

pub const AGE_REPROMPT: [BotLine; 1] = [line(
    "I didn't quite catch that. Could you share your age as a number, like 30?",
    800,
)];

pub const GENDER_RECEIVED: [BotLine; 3] = [
    line("It's lovely to meet you. 🌸", 800),
    line(
        "Now, I'd like to hear more about how you've been feeling. There are no right or wrong answers here—just share whatever feels comfortable.",
        1200,
    ),
    line("So tell me... how have you been lately?", 1000),
];

/// Reply after the n-th (0-based) free-text answer, for n in 0..2.
pub const FREE_TEXT_FOLLOW_UPS: [[BotLine; 2]; 2] = [
    [
        line("I appreciate you opening up. That takes courage. 💚", 800),
        line(
            "Is there anything specific that's been weighing on your mind? Perhaps something at work, at home, or with your health?",
            1200,
        ),
    ],
    [
        line("Thank you for sharing that with me. I'm here to listen. 🌷", 800),
        line(
            "One more question: What brings you here today? What kind of support are you hoping to find?",
            1200,
        ),
    ],
];

pub const IMAGE_INTRO: [BotLine; 2] = [
    line("I really appreciate your openness. 💜", 800),
    line(
        "Now I'd like to try something a little different. I'm going to show you an image, and I'd love to hear what story or feelings come to mind when you look at it. There's no right or wrong answer—just share whatever comes naturally.",
        1500,
    ),
];

pub const GROUPS_INFERRED: [BotLine; 2] = [
    line(
        "Thank you for sharing all of that with me. I can see you're going through a lot, and I want you to know that seeking support is a sign of strength. 🌟",
        800,
    ),
    line(
        "Based on what you've shared, I'd like to ask a few more specific questions to better understand your needs. These will help me connect you with the most supportive group.",
        1200,
    ),
];

/// Pause before the projective image appears.
pub const IMAGE_PROMPT_PACE: Duration = Duration::from_millis(1000);

pub const AGE_HINT: &str = "Type your age...";
pub const IMAGE_HINT: &str = "Describe what you see and feel...";
pub const DEFAULT_HINT: &str = "Share your thoughts...";

/// Pause before the first psychometric question.
pub const FIRST_QUESTION_PACE: Duration = Duration::from_millis(1000);

pub const ANSWER_RECEIVED: BotLine = line("Thank you for your honesty. 💜", 800);

pub const ANSWER_REPROMPT: [BotLine; 1] = [line(
    "Please pick one of the options: Rarely, Sometimes, Often, or Very Often.",
    800,
)];

pub const CLOSING: [BotLine; 2] = [
    line("You've done wonderfully. 🌸", 800),
    line(
        "I've prepared a personalized wellness report for you. Take your time reading through it.",
        800,
    ),
];

pub const ANALYSIS_APOLOGY: BotLine = line(
    "I'm sorry, something went wrong on my side while I was reflecting on your answers. Nothing you shared has been lost. Would you like me to try again?",
    800,
);

pub const SAVE_APOLOGY: BotLine = line(
    "I'm sorry, I couldn't save your report just now. Your answers are safe with me. Would you like me to try saving it again?",
    800,
);

/// Quick-option value that requests a retry of the pending operation.
pub const RETRY_VALUE: &str = "retry";

pub fn age_options() -> Vec<QuickOption> {
    vec![
        QuickOption::new("18-25", "21"),
        QuickOption::new("26-35", "30"),
        QuickOption::new("36-45", "40"),
        QuickOption::new("46-55", "50"),
        QuickOption::new("56+", "60"),
    ]
}

pub fn gender_options() -> Vec<QuickOption> {
    vec![
        QuickOption::new("Female", "female"),
        QuickOption::new("Male", "male"),
        QuickOption::new("Non-binary", "non-binary"),
        QuickOption::new("Prefer not to say", "prefer-not-to-say"),
    ]
}

pub fn likert_options() -> Vec<QuickOption> {
    LikertAnswer::ALL
        .iter()
        .map(|a| QuickOption::new(a.label(), a.score().to_string()))
        .collect()
}

pub fn retry_options() -> Vec<QuickOption> {
    vec![QuickOption::new("Try again", RETRY_VALUE)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn likert_options_carry_scores() {
        let options = likert_options();
        assert_eq!(options.len(), 4);
        assert_eq!(options[0], QuickOption::new("Rarely", "1"));
        assert_eq!(options[3], QuickOption::new("Very Often", "4"));
    }

    #[test]
    fn age_options_parse_as_ages() {
        for option in age_options() {
            assert!(option.value.parse::<u32>().is_ok(), "{} is not numeric", option.value);
        }
    }

    #[test]
    fn greeting_ends_with_age_question() {
        assert!(GREETING[2].text.contains("age"));
        assert_eq!(GREETING[0].pace, Duration::from_millis(500));
    }
}
