//! Spoken or typed driver commands.

use serde::{Deserialize, Serialize};

/// A recognized driver request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Current speed
    Speed,
    /// Remaining travel time on the active route
    TravelTime,
    /// Nearest radar on the active route
    NextRadar,
    /// Recompute the route from the current position
    Recalculate,
    /// Recenter the map on the current position
    Recenter,
    Unknown,
}

// Checked in this order; the first group with a matching keyword wins.
const KEYWORDS: &[(Command, &[&str])] = &[
    (Command::Speed, &["vitesse", "speed"]),
    (
        Command::TravelTime,
        &[
            "temps", "trajet", "durée", "arrivée", "time", "travel", "duration", "arrival", "eta",
        ],
    ),
    (Command::NextRadar, &["radar"]),
    (
        Command::Recalculate,
        &[
            "recalcul",
            "nouvel itinéraire",
            "autre route",
            "recalculate",
            "reroute",
            "new route",
            "other route",
        ],
    ),
    (
        Command::Recenter,
        &["centre", "recentrer", "center", "recenter", "position"],
    ),
];

impl Command {
    /// Match `text` against the command keywords, case-insensitively.
    pub fn parse(text: &str) -> Self {
        let text = text.to_lowercase();
        let words: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        KEYWORDS
            .iter()
            .find(|(_, keywords)| {
                keywords.iter().any(|k| {
                    if k.contains(' ') || k.chars().count() > 4 {
                        text.contains(k)
                    } else {
                        // Short keywords must be whole words ("eta" not in "metal")
                        words.contains(k)
                    }
                })
            })
            .map(|(command, _)| *command)
            .unwrap_or(Command::Unknown)
    }

    /// Reply for an unrecognized request.
    pub fn help_text() -> &'static str {
        "Command not understood. You can ask for: speed, travel time, next radar, or recalculate the route."
    }
}
