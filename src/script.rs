//! Template announcements. Never fails, and the same song always gets the
//! same words.

use crate::collaborators::ScriptWriter;
use crate::config::StationConfig;

const NEWS_LINES: &[&str] = &[
    "Stay informed with the latest news updates throughout the day.",
    "Keep up with current events and breaking news as it happens.",
    "For the latest news and weather, stay tuned to your local news sources.",
    "Remember to stay connected with what's happening in your community and around the world.",
];

#[derive(Debug, Clone, Default)]
pub struct TemplateScriptWriter {
    station_name: Option<String>,
}

impl TemplateScriptWriter {
    pub fn new() -> Self {
        TemplateScriptWriter { station_name: None }
    }

    pub fn from_config(config: &StationConfig) -> Self {
        match &config.station_name {
            Some(name) => Self::new().with_station_name(name.as_str()),
            None => Self::new(),
        }
    }

    /// Sign the announcements with a station name.
    pub fn with_station_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.station_name = (!name.trim().is_empty()).then_some(name);
        self
    }

    fn sign_off(&self) -> String {
        match &self.station_name {
            Some(name) => format!(" You're listening to {name}."),
            None => String::new(),
        }
    }
}

/// Stable template index for a song.
fn pick(title: &str, artist: &str, choices: usize) -> usize {
    let sum = title
        .bytes()
        .chain(artist.bytes())
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    sum % choices
}

fn music_transition(title: &str, artist: &str) -> String {
    match pick(title, artist, 4) {
        0 => format!("Now let's get back to the music with {title} by {artist}."),
        1 => format!("That's your update. Turn it up for {title} by {artist}."),
        2 => format!("Time to get back to the music. Here's {title} by {artist}."),
        _ => format!("Back to the beats with {title} by {artist}."),
    }
}

impl ScriptWriter for TemplateScriptWriter {
    fn introduction_text(&self, title: &str, artist: &str) -> String {
        let body = match pick(title, artist, 3) {
            0 => format!(
                "Here's a fantastic track from {artist}. You're about to hear {title}, \
                 a song that never fails to get the crowd moving. Turn it up and enjoy this one!"
            ),
            1 => format!(
                "Coming up next, {artist} with {title}. Settle in, this one is a favourite around here."
            ),
            _ => format!(
                "Let's keep it going. This is {title} from {artist}, right here, right now."
            ),
        };
        format!("{body}{}", self.sign_off())
    }

    fn news_text(&self, title: &str, artist: &str) -> String {
        let news = NEWS_LINES[pick(artist, title, NEWS_LINES.len())];
        format!("{news}{} {}", self.sign_off(), music_transition(title, artist))
    }
}
