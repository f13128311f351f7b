//! Tutor system framing and opening request

use super::SessionConfig;

/// System framing with `{{ subject }}`, `{{ topic }}`, `{{ style }}` placeholders
pub const SYSTEM_TEMPLATE: &str = "You are a highly knowledgeable tutor teaching a real-time voice session with a student. Your goal is to teach the student about the topic and subject.

Tutor Guidelines:
Stick to the given topic - {{ topic }} and subject - {{ subject }} and teach the student about it.
Keep the conversation flowing smoothly while maintaining control.
From time to time make sure that the student is following you and understands you.
Break down the topic into smaller parts and teach the student one part at a time.
Keep your style of conversation {{ style }}.
Keep your responses short, like in a real voice conversation.
Do not include any special characters in your responses - this is a voice conversation.";

/// Render the system framing for a session
#[must_use]
pub fn system_prompt(config: &SessionConfig) -> String {
    SYSTEM_TEMPLATE
        .replace("{{ topic }}", &config.topic)
        .replace("{{ subject }}", &config.subject)
        .replace("{{ style }}", &config.style)
}

/// Synthetic message that asks the tutor to open the session
#[must_use]
pub fn opening_request(config: &SessionConfig) -> String {
    format!(
        "Open the session: greet the student and introduce today's topic, {}.",
        config.topic
    )
}

/// Fixed greeting used when the opening is answered locally
#[must_use]
pub fn scripted_greeting(config: &SessionConfig) -> String {
    format!(
        "Hello, let's start the session. Today we'll be talking about {}.",
        config.topic
    )
}
