//! Psychometric question bank and projective image catalogue.
//!
//! Questions are addressed through an explicit two-level table
//! (group → ordered questions). `PsychSchedule` is the one place that maps
//! a session-wide question index onto that table.

use super::model::{FocusGroup, ImageRef};

/// Questions asked per probable group.
pub const QUESTIONS_PER_GROUP: usize = 3;

/// Fixed per-group bank, asked in this order.
static QUESTION_BANK: [(FocusGroup, [&str; QUESTIONS_PER_GROUP]); 3] = [
    (
        FocusGroup::PostpartumDepression,
        [
            "Since becoming a parent, how often have you felt overwhelmed by your responsibilities?",
            "Do you find it difficult to bond with or feel connected to your baby?",
            "How often do you experience feelings of sadness or hopelessness about being a parent?",
        ],
    ),
    (
        FocusGroup::AnxietyManagement,
        [
            "How often do you experience racing thoughts that are difficult to control?",
            "Do you frequently feel restless, on edge, or have difficulty relaxing?",
            "How much does worry interfere with your daily activities and concentration?",
        ],
    ),
    (
        FocusGroup::WorkplaceStress,
        [
            "How often do you feel exhausted or drained due to work demands?",
            "Do you find it difficult to disconnect from work during personal time?",
            "How frequently do workplace conflicts or pressures affect your mood?",
        ],
    ),
];

/// The ordered questions for one group.
pub fn questions_for(group: FocusGroup) -> &'static [&'static str; QUESTIONS_PER_GROUP] {
    // Every FocusGroup variant has a bank entry.
    QUESTION_BANK
        .iter()
        .find(|(g, _)| *g == group)
        .map(|(_, questions)| questions)
        .unwrap_or(&QUESTION_BANK[0].1)
}

/// One scheduled psychometric question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledQuestion {
    pub group: FocusGroup,
    pub local_index: usize,
    pub text: &'static str,
}

/// Question order for a session: all of the first group's questions, then
/// all of the second's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsychSchedule<'a> {
    groups: &'a [FocusGroup],
}

impl<'a> PsychSchedule<'a> {
    pub fn new(groups: &'a [FocusGroup]) -> Self {
        Self { groups }
    }

    pub fn len(&self) -> usize {
        self.groups.len() * QUESTIONS_PER_GROUP
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Map a session-wide index to `(group, index within that group's bank)`.
    pub fn locate(&self, index: usize) -> Option<(FocusGroup, usize)> {
        let group = self.groups.get(index / QUESTIONS_PER_GROUP)?;
        Some((*group, index % QUESTIONS_PER_GROUP))
    }

    pub fn question(&self, index: usize) -> Option<ScheduledQuestion> {
        let (group, local_index) = self.locate(index)?;
        Some(ScheduledQuestion {
            group,
            local_index,
            text: questions_for(group)[local_index],
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = ScheduledQuestion> + '_ {
        (0..self.len()).filter_map(|i| self.question(i))
    }
}

struct ProjectiveImage {
    url: &'static str,
    alt: &'static str,
    prompt: &'static str,
}

static PROJECTIVE_IMAGES: [ProjectiveImage; 3] = [
    ProjectiveImage {
        url: "https://images.unsplash.com/photo-1516534775068-ba3e7458af70?w=400&h=300&fit=crop",
        alt: "Person sitting alone looking out window",
        prompt: "Take a moment to look at this image. What do you think is happening? What might this person be feeling or thinking?",
    },
    ProjectiveImage {
        url: "https://images.unsplash.com/photo-1517457373958-b7bdd4587205?w=400&h=300&fit=crop",
        alt: "Two people in conversation",
        prompt: "Look at this scene. What story do you see unfolding? What emotions might be present?",
    },
    ProjectiveImage {
        url: "https://images.unsplash.com/photo-1454165804606-c3d57bc86b40?w=400&h=300&fit=crop",
        alt: "Person at desk with papers",
        prompt: "Observe this image carefully. What do you imagine is going through this person's mind? What led to this moment?",
    },
];

/// Projective image by index, wrapping around the catalogue.
pub fn projective_image(index: usize) -> ImageRef {
    let image = &PROJECTIVE_IMAGES[index % PROJECTIVE_IMAGES.len()];
    ImageRef {
        index: index % PROJECTIVE_IMAGES.len(),
        url: image.url.to_string(),
        alt: image.alt.to_string(),
        prompt: image.prompt.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_group_has_a_full_bank() {
        for group in FocusGroup::ALL {
            let questions = questions_for(group);
            assert_eq!(questions.len(), QUESTIONS_PER_GROUP);
            assert!(questions.iter().all(|q| !q.is_empty()));
        }
        assert_ne!(
            questions_for(FocusGroup::AnxietyManagement),
            questions_for(FocusGroup::WorkplaceStress)
        );
    }

    #[test]
    fn schedule_maps_all_six_indices() {
        let groups = [FocusGroup::AnxietyManagement, FocusGroup::WorkplaceStress];
        let schedule = PsychSchedule::new(&groups);
        assert_eq!(schedule.len(), 6);

        for i in 0..6 {
            let q = schedule.question(i).unwrap();
            assert_eq!(q.group, groups[i / 3]);
            assert_eq!(q.local_index, i % 3);
            assert_eq!(q.text, questions_for(groups[i / 3])[i % 3]);
        }
        assert!(schedule.question(6).is_none());
    }

    #[test]
    fn schedule_asks_first_group_before_second() {
        let groups = [FocusGroup::WorkplaceStress, FocusGroup::PostpartumDepression];
        let order: Vec<FocusGroup> = PsychSchedule::new(&groups).iter().map(|q| q.group).collect();
        assert_eq!(
            order,
            vec![
                FocusGroup::WorkplaceStress,
                FocusGroup::WorkplaceStress,
                FocusGroup::WorkplaceStress,
                FocusGroup::PostpartumDepression,
                FocusGroup::PostpartumDepression,
                FocusGroup::PostpartumDepression,
            ]
        );
    }

    #[test]
    fn empty_schedule() {
        let schedule = PsychSchedule::new(&[]);
        assert!(schedule.is_empty());
        assert!(schedule.locate(0).is_none());
    }

    #[test]
    fn projective_image_wraps() {
        assert_eq!(projective_image(0).index, 0);
        assert_eq!(projective_image(4).index, 1);
        assert!(projective_image(0).alt.contains("window"));
    }
}
