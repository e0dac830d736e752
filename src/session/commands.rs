//! Line commands accepted by the interactive scoring loop.

use crate::models::Accuracy;

#[derive(Debug, Clone, PartialEq)]
pub enum ScoringCommand {
    Score(Accuracy),
    Note(String),
    NextItem,
    PrevItem,
    NextParticipant,
    PrevParticipant,
    JumpToUnscored,
    Play,
    Stop,
    Rate(f32),
    ZoomIn,
    ZoomOut,
    ExportParticipant,
    ExportAll,
    Back,
    Help,
}

impl ScoringCommand {
    /// Parses one input line. An empty line (plain Enter) advances.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            // Space-only input is the play shortcut, bare Enter moves on.
            return Some(if line.contains(' ') {
                Self::Play
            } else {
                Self::NextItem
            });
        }

        let (head, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (trimmed, ""),
        };

        let command = match head.to_ascii_lowercase().as_str() {
            "0" => Self::Score(Accuracy::Incorrect),
            "1" => Self::Score(Accuracy::Correct),
            "n" | "note" => Self::Note(rest.to_string()),
            "right" | "next" | "l" => Self::NextItem,
            "left" | "prev" | "h" => Self::PrevItem,
            "pgdn" | "pagedown" | "down" => Self::NextParticipant,
            "pgup" | "pageup" | "up" => Self::PrevParticipant,
            "j" | "jump" => Self::JumpToUnscored,
            "p" | "play" => Self::Play,
            "s" | "stop" => Self::Stop,
            "rate" => Self::Rate(rest.parse().ok().filter(|r: &f32| *r > 0.0)?),
            "+" | "=" => Self::ZoomIn,
            "-" => Self::ZoomOut,
            "x" => Self::ExportParticipant,
            "a" => Self::ExportAll,
            "q" | "quit" | "back" => Self::Back,
            "?" | "help" => Self::Help,
            _ => return None,
        };
        Some(command)
    }
}

pub const HELP: &str = "\
  0 / 1          score incorrect / correct
  n <text>       set the note for this item
  enter, right   next item            left   previous item
  pgdn / pgup    next / previous participant
  j              jump to nearest unscored item
  space, p       play                 s      stop
  rate <x>       playback rate        + / -  zoom waveform
  x              export this participant
  a              export every assigned participant
  q              back to setup";
