//! Tutor Characters
//!
//! The four fixed AI-tutor personas. Each one owns an independent
//! conversation history, a system prompt and a greeting template.
//! Characters are static; nothing creates or destroys them at runtime.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::context::ProgressStats;

/// Identifier of a tutor persona
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CharacterId {
    /// Aristotle - natural philosophy and classification of living things
    #[default]
    Aristotle,
    /// Gregor Mendel - heredity and genetics
    Mendel,
    /// Marie Curie - chemistry and radioactivity
    Curie,
    /// Isaac Newton - motion, forces and energy
    Newton,
}

impl CharacterId {
    /// Every character, in display order
    pub const ALL: [CharacterId; 4] = [Self::Aristotle, Self::Mendel, Self::Curie, Self::Newton];

    /// Stable lowercase identifier (used in storage and on the command line)
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aristotle => "aristotle",
            Self::Mendel => "mendel",
            Self::Curie => "curie",
            Self::Newton => "newton",
        }
    }

    /// Static persona data for this character
    #[must_use]
    pub fn persona(self) -> &'static Persona {
        match self {
            Self::Aristotle => &ARISTOTLE,
            Self::Mendel => &MENDEL,
            Self::Curie => &CURIE,
            Self::Newton => &NEWTON,
        }
    }
}

impl std::fmt::Display for CharacterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown character id
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Unknown character: {0} (expected one of aristotle, mendel, curie, newton)")]
pub struct UnknownCharacter(pub String);

impl FromStr for CharacterId {
    type Err = UnknownCharacter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "aristotle" => Ok(Self::Aristotle),
            "mendel" => Ok(Self::Mendel),
            "curie" => Ok(Self::Curie),
            "newton" => Ok(Self::Newton),
            other => Err(UnknownCharacter(other.to_string())),
        }
    }
}

/// Static description of a persona
#[derive(Debug)]
pub struct Persona {
    /// Display name
    pub name: &'static str,
    /// Subject area the persona leans towards
    pub subject: &'static str,
    /// System prompt sent before every conversation
    pub system_prompt: &'static str,
    /// Greeting template
    ///
    /// Placeholders: `{name}`, `{completed}`, `{total}`, `{percent}`.
    pub greeting_template: &'static str,
    /// Greeting used before the student has completed anything
    pub first_greeting: &'static str,
}

impl Persona {
    /// Fill the greeting template from progress stats
    #[must_use]
    pub fn render_greeting(&self, stats: &ProgressStats) -> String {
        if stats.completed_lessons == 0 {
            return self.first_greeting.replace("{name}", self.name);
        }

        let mut greeting = self
            .greeting_template
            .replace("{name}", self.name)
            .replace("{completed}", &stats.completed_lessons.to_string())
            .replace("{total}", &stats.total_lessons.to_string())
            .replace("{percent}", &stats.percentage().to_string());

        if stats.streak_days > 1 {
            greeting.push_str(&format!(
                " {} days in a row - keep that streak going!",
                stats.streak_days
            ));
        }
        greeting
    }
}

const SHARED_RULES: &str = "You are tutoring a Grade 9 science student. \
Keep answers short (under 150 words), friendly and accurate. \
Use simple language, one everyday example, and end with a quick question \
that checks understanding. If a question is not about science or learning, \
gently steer back to the lesson.";

static ARISTOTLE: Persona = Persona {
    name: "Aristotle",
    subject: "biology and the scientific method",
    system_prompt: "You are Aristotle, the ancient Greek philosopher who first \
classified living things by careful observation. Speak warmly and with curiosity, \
ask the student what they observe, and connect ideas to nature.",
    greeting_template: "Greetings, young philosopher! I am {name}. You have explored \
{completed} of {total} lessons ({percent}%). What shall we observe today?",
    first_greeting: "Greetings, young philosopher! I am {name}. Every great inquiry \
begins with a question - what would you like to explore?",
};

static MENDEL: Persona = Persona {
    name: "Gregor Mendel",
    subject: "genetics and heredity",
    system_prompt: "You are Gregor Mendel, the patient monk who discovered the laws \
of inheritance by growing pea plants. Explain with gardens, ratios and Punnett \
squares, and encourage careful counting.",
    greeting_template: "Hello again! {name} here. {completed} of {total} lessons done - \
that is {percent}% of the garden tended. Which traits shall we trace today?",
    first_greeting: "Hello! I am {name}. Like my pea plants, learning grows one \
generation at a time. What would you like to know?",
};

static CURIE: Persona = Persona {
    name: "Marie Curie",
    subject: "chemistry and atomic structure",
    system_prompt: "You are Marie Curie, pioneer of radioactivity and two-time Nobel \
laureate. Be precise and encouraging, stress safety in the laboratory, and \
relate chemistry to atoms and their structure.",
    greeting_template: "Bonjour! {name} here. You have completed {completed} of {total} \
lessons ({percent}%). Shall we continue our experiments?",
    first_greeting: "Bonjour! I am {name}. Nothing in life is to be feared, only \
understood. What shall we understand together?",
};

static NEWTON: Persona = Persona {
    name: "Isaac Newton",
    subject: "physics, forces and motion",
    system_prompt: "You are Isaac Newton, who described gravity and the laws of \
motion. Reason step by step, use simple numbers in examples, and relate physics \
to things the student can see every day.",
    greeting_template: "Good day! {name} at your service. {completed} of {total} lessons \
complete ({percent}%) - a body in motion stays in motion!",
    first_greeting: "Good day! I am {name}. If I have seen further, it is by standing \
on the shoulders of giants. What puzzles you today?",
};

/// Full system prompt for a character, including the shared tutoring rules
#[must_use]
pub fn system_prompt(character: CharacterId) -> String {
    let persona = character.persona();
    format!(
        "{} Your specialty is {}. {}",
        persona.system_prompt, persona.subject, SHARED_RULES
    )
}
