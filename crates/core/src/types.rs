use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Per-item progress rating recorded by a doctor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Good,
    Average,
    NoImprovement,
}

impl Rating {
    /// Weight used by the report score (good=3, average=2, no_improvement=1).
    pub fn weight(self) -> u32 {
        match self {
            Self::Good => 3,
            Self::Average => 2,
            Self::NoImprovement => 1,
        }
    }

    /// Percentage used by the single session view.
    pub fn percentage(self) -> u32 {
        match self {
            Self::Good => 100,
            Self::Average => 60,
            Self::NoImprovement => 20,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Average => "average",
            Self::NoImprovement => "no_improvement",
        }
    }
}

macro_rules! rating_group {
    ($(#[$meta:meta])* $name:ident { $($field:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name {
            $(
                #[serde(default)]
                pub $field: Option<Rating>,
            )+
        }

        impl $name {
            /// Iterates over the ratings that were actually recorded.
            pub fn ratings(&self) -> impl Iterator<Item = Rating> {
                [$(self.$field),+].into_iter().flatten()
            }
        }
    };
}

rating_group!(
    /// Spoken communication items.
    VerbalSkills {
        speak_words_sentences,
        clarity_pronunciation,
        expressing_needs,
        turn_taking,
        initiating_conversation,
        vocabulary,
        functional_speech,
    }
);

rating_group!(
    /// Non-verbal communication items.
    NonVerbalSkills {
        eye_contact,
        gestures,
        facial_expressions,
        body_language,
        following_directions,
    }
);

rating_group!(EmotionalDevelopment {
    identify_own_emotions,
    identify_others_emotions,
    emotional_regulation,
    sensory_overload_response,
    meltdowns_vs_tantrums,
    coping_strategies,
});

rating_group!(SocialSkills {
    playing_with_peers,
    sharing_turn_taking,
    understanding_social_rules,
    joint_attention,
    imitation_skills,
    response_to_name,
    group_participation,
});

rating_group!(Behavior {
    aggression,
    self_injury,
    eloping,
    throwing_objects,
    behavior_triggers,
    following_routines,
    flexibility_to_change,
    response_to_reinforcement,
});

rating_group!(CognitiveSkills {
    attention_span,
    focus,
    memory,
    problem_solving,
    matching_sorting_sequencing,
    learning_new_concepts,
    basic_academics,
});

rating_group!(SensoryProcessing {
    hyper_hypo_sensitivity,
    stimming,
    sensory_seeking,
    light_sound_touch_tolerance,
    food_selectiveness,
});

rating_group!(DailyLivingSkills {
    eating_independently,
    dressing,
    toilet_training,
    brushing_teeth,
    hand_washing,
    sleeping_patterns,
    using_yes_no,
    safety_awareness,
});

rating_group!(TherapyParticipation {
    sitting_tolerance,
    responsiveness,
    engagement_level,
    prompt_dependency,
    transitioning_between_tasks,
});

/// Communication is the only domain split into sub-groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicationSkills {
    #[serde(default)]
    pub verbal: Option<VerbalSkills>,
    #[serde(default)]
    pub non_verbal: Option<NonVerbalSkills>,
}

impl CommunicationSkills {
    pub fn ratings(&self) -> impl Iterator<Item = Rating> + '_ {
        self.verbal
            .iter()
            .flat_map(VerbalSkills::ratings)
            .chain(self.non_verbal.iter().flat_map(NonVerbalSkills::ratings))
    }
}

/// The fixed set of developmental domains, in reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Communication,
    Emotional,
    Social,
    Behavior,
    Cognitive,
    Sensory,
    DailyLiving,
    TherapyParticipation,
}

impl Domain {
    pub const ALL: [Domain; 8] = [
        Domain::Communication,
        Domain::Emotional,
        Domain::Social,
        Domain::Behavior,
        Domain::Cognitive,
        Domain::Sensory,
        Domain::DailyLiving,
        Domain::TherapyParticipation,
    ];

    /// Field name used in stored sessions and report maps.
    pub fn key(self) -> &'static str {
        match self {
            Self::Communication => "communication_skills",
            Self::Emotional => "emotional_development",
            Self::Social => "social_skills",
            Self::Behavior => "behavior",
            Self::Cognitive => "cognitive_skills",
            Self::Sensory => "sensory_processing",
            Self::DailyLiving => "daily_living_skills",
            Self::TherapyParticipation => "therapy_participation",
        }
    }

    /// Short key used by the session detail view.
    pub fn short_key(self) -> &'static str {
        match self {
            Self::Communication => "communication",
            Self::Emotional => "emotional",
            Self::Social => "social",
            Self::Behavior => "behavior",
            Self::Cognitive => "cognitive",
            Self::Sensory => "sensory",
            Self::DailyLiving => "daily_living",
            Self::TherapyParticipation => "social_participation",
        }
    }

    /// Human readable name, e.g. `Daily Living Skills`.
    pub fn title(self) -> String {
        self.key()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One value per domain, serialized as an object keyed by [`Domain::key`] in
/// reporting order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainMap<T> {
    pub communication_skills: T,
    pub emotional_development: T,
    pub social_skills: T,
    pub behavior: T,
    pub cognitive_skills: T,
    pub sensory_processing: T,
    pub daily_living_skills: T,
    pub therapy_participation: T,
}

impl<T> DomainMap<T> {
    pub fn from_fn(mut f: impl FnMut(Domain) -> T) -> Self {
        Self {
            communication_skills: f(Domain::Communication),
            emotional_development: f(Domain::Emotional),
            social_skills: f(Domain::Social),
            behavior: f(Domain::Behavior),
            cognitive_skills: f(Domain::Cognitive),
            sensory_processing: f(Domain::Sensory),
            daily_living_skills: f(Domain::DailyLiving),
            therapy_participation: f(Domain::TherapyParticipation),
        }
    }

    pub fn get(&self, domain: Domain) -> &T {
        match domain {
            Domain::Communication => &self.communication_skills,
            Domain::Emotional => &self.emotional_development,
            Domain::Social => &self.social_skills,
            Domain::Behavior => &self.behavior,
            Domain::Cognitive => &self.cognitive_skills,
            Domain::Sensory => &self.sensory_processing,
            Domain::DailyLiving => &self.daily_living_skills,
            Domain::TherapyParticipation => &self.therapy_participation,
        }
    }

    pub fn get_mut(&mut self, domain: Domain) -> &mut T {
        match domain {
            Domain::Communication => &mut self.communication_skills,
            Domain::Emotional => &mut self.emotional_development,
            Domain::Social => &mut self.social_skills,
            Domain::Behavior => &mut self.behavior,
            Domain::Cognitive => &mut self.cognitive_skills,
            Domain::Sensory => &mut self.sensory_processing,
            Domain::DailyLiving => &mut self.daily_living_skills,
            Domain::TherapyParticipation => &mut self.therapy_participation,
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(Domain, &T) -> U) -> DomainMap<U> {
        DomainMap::from_fn(|domain| f(domain, self.get(domain)))
    }
}

impl<T: Default> Default for DomainMap<T> {
    fn default() -> Self {
        Self::from_fn(|_| T::default())
    }
}

/// The eight optional domain assessments attached to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainAssessments {
    #[serde(default)]
    pub communication_skills: Option<CommunicationSkills>,
    #[serde(default)]
    pub emotional_development: Option<EmotionalDevelopment>,
    #[serde(default)]
    pub social_skills: Option<SocialSkills>,
    #[serde(default)]
    pub behavior: Option<Behavior>,
    #[serde(default)]
    pub cognitive_skills: Option<CognitiveSkills>,
    #[serde(default)]
    pub sensory_processing: Option<SensoryProcessing>,
    #[serde(default)]
    pub daily_living_skills: Option<DailyLivingSkills>,
    #[serde(default)]
    pub therapy_participation: Option<TherapyParticipation>,
}

impl DomainAssessments {
    /// Returns every rating recorded for `domain`, nested groups flattened.
    pub fn ratings(&self, domain: Domain) -> Vec<Rating> {
        match domain {
            Domain::Communication => collect(self.communication_skills.as_ref(), |d| d.ratings()),
            Domain::Emotional => collect(self.emotional_development.as_ref(), |d| d.ratings()),
            Domain::Social => collect(self.social_skills.as_ref(), |d| d.ratings()),
            Domain::Behavior => collect(self.behavior.as_ref(), |d| d.ratings()),
            Domain::Cognitive => collect(self.cognitive_skills.as_ref(), |d| d.ratings()),
            Domain::Sensory => collect(self.sensory_processing.as_ref(), |d| d.ratings()),
            Domain::DailyLiving => collect(self.daily_living_skills.as_ref(), |d| d.ratings()),
            Domain::TherapyParticipation => {
                collect(self.therapy_participation.as_ref(), |d| d.ratings())
            }
        }
    }
}

fn collect<'a, D, I>(domain: Option<&'a D>, ratings: impl Fn(&'a D) -> I) -> Vec<Rating>
where
    I: Iterator<Item = Rating>,
{
    domain.map(|d| ratings(d).collect()).unwrap_or_default()
}

/// A recorded therapy session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TherapyLog {
    pub id: String,
    pub child_id: String,
    pub doctor_id: String,
    pub session_date: DateTime<Utc>,
    pub duration_minutes: i64,
    pub activities_performed: String,
    pub notes: String,
    #[serde(default)]
    pub goals_addressed: Option<String>,
    #[serde(default)]
    pub recommendations: Option<String>,
    #[serde(flatten)]
    pub assessments: DomainAssessments,
    pub created_at: DateTime<Utc>,
}

/// Account role carried in access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Doctor,
    Parent,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Doctor => "doctor",
            Self::Parent => "parent",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid email address: {0}")]
pub struct InvalidEmail(pub String);

/// Validates and lowercases an email address.
pub fn normalize_email(raw: &str) -> Result<String, InvalidEmail> {
    let trimmed = raw.trim();
    let Some((local, domain)) = trimmed.split_once('@') else {
        return Err(InvalidEmail(raw.to_string()));
    };
    let domain_ok = !domain.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.');
    if local.is_empty() || !domain_ok || trimmed.chars().any(char::is_whitespace) {
        return Err(InvalidEmail(raw.to_string()));
    }
    Ok(trimmed.to_lowercase())
}

/// Parses a session timestamp. Values without an offset are taken as UTC.
pub fn parse_session_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(value) = DateTime::parse_from_rfc3339(raw) {
        return Some(value.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Serde adapter for [`parse_session_date`].
pub fn deserialize_session_date<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_session_date(&raw).ok_or_else(|| D::Error::custom(format!("invalid session_date: {raw}")))
}
