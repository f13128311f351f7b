//! Voice catalogs and voice selection

/// Voice gender category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gender {
    Female,
    Male,
}

impl Gender {
    /// Infer the category a selector asks for
    ///
    /// Recognizes explicit words ("female", "woman", "male", "man") and the
    /// names of built-in voices.
    #[must_use]
    pub fn infer(selector: &str) -> Option<Self> {
        let lower = selector.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        if words.iter().any(|w| matches!(*w, "female" | "woman" | "girl")) {
            return Some(Self::Female);
        }
        if words.iter().any(|w| matches!(*w, "male" | "man" | "boy")) {
            return Some(Self::Male);
        }

        GOOGLE_WAVENET
            .iter()
            .chain(OPENAI)
            .find(|v| words.contains(&v.name))
            .map(|v| v.gender)
    }
}

/// One entry of a voice catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceInfo {
    /// Backend voice identifier
    pub id: &'static str,
    /// Friendly name used as a selector
    pub name: &'static str,
    pub gender: Gender,
}

/// Google Cloud Wavenet voices; the first entry is the default
pub const GOOGLE_WAVENET: &[VoiceInfo] = &[
    VoiceInfo {
        id: "en-US-Wavenet-D",
        name: "john",
        gender: Gender::Male,
    },
    VoiceInfo {
        id: "en-US-Wavenet-C",
        name: "sarah",
        gender: Gender::Female,
    },
    VoiceInfo {
        id: "en-US-Wavenet-E",
        name: "emily",
        gender: Gender::Female,
    },
    VoiceInfo {
        id: "en-US-Wavenet-B",
        name: "michael",
        gender: Gender::Male,
    },
];

/// `OpenAI` speech voices; the first entry is the default
pub const OPENAI: &[VoiceInfo] = &[
    VoiceInfo {
        id: "onyx",
        name: "onyx",
        gender: Gender::Male,
    },
    VoiceInfo {
        id: "nova",
        name: "nova",
        gender: Gender::Female,
    },
    VoiceInfo {
        id: "shimmer",
        name: "shimmer",
        gender: Gender::Female,
    },
    VoiceInfo {
        id: "echo",
        name: "echo",
        gender: Gender::Male,
    },
];

/// Pick a voice for `selector`
///
/// Order: exact name or id, then name fragment, then gender category, then
/// the first catalog entry. Returns `None` only for an empty catalog.
#[must_use]
pub fn select_voice<'a>(catalog: &'a [VoiceInfo], selector: &str) -> Option<&'a VoiceInfo> {
    let wanted = selector.trim().to_lowercase();

    if !wanted.is_empty() {
        let exact = catalog
            .iter()
            .find(|v| v.name == wanted || v.id.to_lowercase() == wanted);
        if exact.is_some() {
            return exact;
        }

        let fragment = catalog.iter().find(|v| {
            v.name.contains(wanted.as_str())
                || v.id.to_lowercase().contains(wanted.as_str())
                || wanted.contains(v.name)
        });
        if fragment.is_some() {
            return fragment;
        }

        if let Some(gender) = Gender::infer(&wanted) {
            if let Some(voice) = catalog.iter().find(|v| v.gender == gender) {
                return Some(voice);
            }
        }
    }

    catalog.first()
}
