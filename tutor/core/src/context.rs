//! Learning Context
//!
//! Where the student is in the app and how far they have come. The
//! orchestrator embeds a flattened rendering of this context in every system
//! prompt so the tutor can refer to the lesson on screen.
//!
//! # Resolution rules
//!
//! - `module_context(lesson, index)` describes one module of a lesson
//! - `lesson_context(lesson)` describes a whole lesson
//! - `current_context()` describes wherever the student last was
//!
//! Unknown lesson ids or module indices fall back to `current_context()`.

use std::collections::HashSet;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Where the student currently is
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Location {
    /// Home screen / topic browser
    #[default]
    Home,
    /// Inside a lesson overview
    Lesson {
        /// Lesson identifier
        id: String,
        /// Lesson title
        title: String,
    },
    /// Inside one module of a lesson
    Module {
        /// Lesson identifier
        lesson_id: String,
        /// Lesson title
        lesson_title: String,
        /// Zero-based module index
        index: usize,
        /// Module title
        title: String,
    },
}

/// Location plus progress, as handed to the prompt builder
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LearningContext {
    /// Where the student is
    pub location: Location,
    /// Completed share of all lessons (0-100)
    pub progress_percentage: u8,
    /// Lessons completed
    pub completed_count: usize,
    /// Lessons available
    pub total_count: usize,
}

impl LearningContext {
    /// Flattened text for embedding in a system prompt
    #[must_use]
    pub fn render(&self) -> String {
        let location = match &self.location {
            Location::Home => "The student is on the home screen browsing topics.".to_string(),
            Location::Lesson { title, .. } => {
                format!("The student is viewing the lesson \"{title}\".")
            }
            Location::Module {
                lesson_title,
                index,
                title,
                ..
            } => format!(
                "The student is studying module {} (\"{title}\") of the lesson \"{lesson_title}\".",
                index + 1
            ),
        };

        format!(
            "{location} Progress: {} of {} lessons completed ({}%).",
            self.completed_count, self.total_count, self.progress_percentage
        )
    }
}

/// Progress figures shown in greetings
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStats {
    /// Lessons completed
    pub completed_lessons: usize,
    /// Lessons available
    pub total_lessons: usize,
    /// Consecutive days with activity
    pub streak_days: u32,
}

impl ProgressStats {
    /// Completed share, rounded down, 0 when there are no lessons
    #[must_use]
    pub fn percentage(&self) -> u8 {
        percentage(self.completed_lessons, self.total_lessons)
    }
}

fn percentage(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = completed.min(total) * 100 / total;
    u8::try_from(pct).unwrap_or(100)
}

/// Supplies learning context to the chat orchestrator
pub trait ContextResolver: Send + Sync {
    /// Context for wherever the student currently is
    fn current_context(&self) -> LearningContext;

    /// Context for a lesson; unknown ids fall back to [`Self::current_context`]
    fn lesson_context(&self, lesson_id: &str) -> LearningContext;

    /// Context for a lesson module; unknown ids fall back to [`Self::current_context`]
    fn module_context(&self, lesson_id: &str, module_index: usize) -> LearningContext;
}

/// A lesson in the curriculum
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    /// Stable identifier
    pub id: String,
    /// Display title
    pub title: String,
    /// Module titles, in order
    pub modules: Vec<String>,
}

impl Lesson {
    /// Create a lesson
    pub fn new(id: impl Into<String>, title: impl Into<String>, modules: &[&str]) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            modules: modules.iter().map(|m| (*m).to_string()).collect(),
        }
    }
}

/// Mutable part of the curriculum context
#[derive(Debug, Default)]
struct CurriculumState {
    location: Location,
    completed: HashSet<String>,
    streak_days: u32,
}

/// Context resolver backed by a lesson catalogue
#[derive(Debug)]
pub struct CurriculumContext {
    lessons: Vec<Lesson>,
    state: RwLock<CurriculumState>,
}

impl CurriculumContext {
    /// Create a resolver over the given lessons
    #[must_use]
    pub fn new(lessons: Vec<Lesson>) -> Self {
        Self {
            lessons,
            state: RwLock::new(CurriculumState::default()),
        }
    }

    /// The built-in Grade 9 science catalogue
    #[must_use]
    pub fn grade9_science() -> Self {
        Self::new(vec![
            Lesson::new(
                "cells",
                "Cells: The Building Blocks of Life",
                &["Cell theory", "Plant vs animal cells", "Mitosis"],
            ),
            Lesson::new(
                "genetics",
                "Heredity and Genetics",
                &["DNA and genes", "Mendel's experiments", "Punnett squares"],
            ),
            Lesson::new(
                "atoms",
                "Atoms and Elements",
                &["Atomic structure", "The periodic table", "Ions and isotopes"],
            ),
            Lesson::new(
                "reactions",
                "Chemical Reactions",
                &["Balancing equations", "Acids and bases", "Reaction rates"],
            ),
            Lesson::new(
                "motion",
                "Forces and Motion",
                &["Speed and velocity", "Newton's laws", "Gravity"],
            ),
            Lesson::new(
                "electricity",
                "Electricity",
                &["Static charge", "Circuits", "Ohm's law"],
            ),
            Lesson::new(
                "space",
                "Space Exploration",
                &["The solar system", "Stars and galaxies", "Exploring space"],
            ),
            Lesson::new(
                "ecology",
                "Ecosystems and Sustainability",
                &["Food webs", "Nutrient cycles", "Human impact"],
            ),
        ])
    }

    /// Record where the student is
    pub fn set_location(&self, location: Location) {
        self.state.write().location = location;
    }

    /// Mark a lesson completed; unknown ids are ignored
    pub fn mark_completed(&self, lesson_id: &str) -> bool {
        if self.find(lesson_id).is_none() {
            tracing::debug!(lesson_id, "Ignoring completion for unknown lesson");
            return false;
        }
        self.state.write().completed.insert(lesson_id.to_string())
    }

    /// Set the activity streak
    pub fn set_streak_days(&self, days: u32) {
        self.state.write().streak_days = days;
    }

    /// Lessons in the catalogue
    #[must_use]
    pub fn lessons(&self) -> &[Lesson] {
        &self.lessons
    }

    /// Progress figures for greetings
    #[must_use]
    pub fn progress(&self) -> ProgressStats {
        let state = self.state.read();
        ProgressStats {
            completed_lessons: state.completed.len(),
            total_lessons: self.lessons.len(),
            streak_days: state.streak_days,
        }
    }

    fn find(&self, lesson_id: &str) -> Option<&Lesson> {
        self.lessons.iter().find(|l| l.id == lesson_id)
    }

    fn with_location(&self, location: Location) -> LearningContext {
        let completed = self.state.read().completed.len();
        let total = self.lessons.len();
        LearningContext {
            location,
            progress_percentage: percentage(completed, total),
            completed_count: completed,
            total_count: total,
        }
    }
}

impl ContextResolver for CurriculumContext {
    fn current_context(&self) -> LearningContext {
        let location = self.state.read().location.clone();
        self.with_location(location)
    }

    fn lesson_context(&self, lesson_id: &str) -> LearningContext {
        match self.find(lesson_id) {
            Some(lesson) => self.with_location(Location::Lesson {
                id: lesson.id.clone(),
                title: lesson.title.clone(),
            }),
            None => {
                tracing::debug!(lesson_id, "Unknown lesson, using current context");
                self.current_context()
            }
        }
    }

    fn module_context(&self, lesson_id: &str, module_index: usize) -> LearningContext {
        let module = self
            .find(lesson_id)
            .and_then(|lesson| lesson.modules.get(module_index).map(|m| (lesson, m)));

        match module {
            Some((lesson, title)) => self.with_location(Location::Module {
                lesson_id: lesson.id.clone(),
                lesson_title: lesson.title.clone(),
                index: module_index,
                title: title.clone(),
            }),
            None => {
                tracing::debug!(lesson_id, module_index, "Unknown module, using current context");
                self.current_context()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_home_context_render() {
        let ctx = CurriculumContext::grade9_science();
        let rendered = ctx.current_context().render();
        assert!(rendered.contains("home screen"));
        assert!(rendered.contains("0 of 8 lessons"));
    }

    #[test]
    fn test_progress_percentage() {
        let ctx = CurriculumContext::grade9_science();
        assert!(ctx.mark_completed("cells"));
        assert!(ctx.mark_completed("atoms"));
        assert!(!ctx.mark_completed("atoms"));
        assert!(!ctx.mark_completed("alchemy"));

        let current = ctx.current_context();
        assert_eq!(current.completed_count, 2);
        assert_eq!(current.total_count, 8);
        assert_eq!(current.progress_percentage, 25);
    }

    #[test]
    fn test_lesson_context() {
        let ctx = CurriculumContext::grade9_science();
        let lesson = ctx.lesson_context("genetics");
        assert_eq!(
            lesson.location,
            Location::Lesson {
                id: "genetics".to_string(),
                title: "Heredity and Genetics".to_string(),
            }
        );
    }

    #[test]
    fn test_module_context_render() {
        let ctx = CurriculumContext::grade9_science();
        let module = ctx.module_context("cells", 2);
        let rendered = module.render();
        assert!(rendered.contains("module 3"));
        assert!(rendered.contains("Mitosis"));
    }

    #[test]
    fn test_unknown_ids_fall_back_to_current() {
        let ctx = CurriculumContext::grade9_science();
        ctx.set_location(Location::Lesson {
            id: "motion".to_string(),
            title: "Forces and Motion".to_string(),
        });

        assert_eq!(ctx.lesson_context("alchemy"), ctx.current_context());
        assert_eq!(ctx.module_context("cells", 99), ctx.current_context());
        assert_eq!(ctx.module_context("alchemy", 0), ctx.current_context());
    }

    #[test]
    fn test_percentage_without_lessons() {
        let stats = ProgressStats::default();
        assert_eq!(stats.percentage(), 0);
    }
}
